//! Shared RSS 2.0 `<item>` parsing, used by every `SiteDriver` whose feed
//! surface is a standard tracker RSS document (NexusPHP and mTorrent both
//! publish one even though their detail surfaces differ).

use quick_xml::events::Event;
use quick_xml::Reader;
use ratioguard_core::{FeedItem, SiteError, SiteResult};

/// Parse an RSS 2.0 document's `<channel><item>` entries into [`FeedItem`]s,
/// in document order.
pub fn parse_rss_feed(site_id: &str, body: &str) -> SiteResult<Vec<FeedItem>> {
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);

    let mut items = Vec::new();
    let mut current: Option<PartialItem> = None;
    let mut field: Option<Field> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(tag)) => {
                let name = local_name(tag.name().as_ref());
                match name.as_str() {
                    "item" => current = Some(PartialItem::default()),
                    "title" => field = Some(Field::Title),
                    "guid" => field = Some(Field::Guid),
                    "link" => field = Some(Field::Link),
                    "category" => field = Some(Field::Category),
                    "enclosure" => {
                        if let Some(item) = current.as_mut() {
                            for attr in tag.attributes().flatten() {
                                if attr.key.as_ref() == b"url" {
                                    item.enclosure_url = attr
                                        .unescape_value()
                                        .ok()
                                        .map(|value| value.into_owned());
                                }
                            }
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Text(text)) => {
                if let (Some(item), Some(field)) = (current.as_mut(), field) {
                    let value = text.unescape().unwrap_or_default().into_owned();
                    match field {
                        Field::Title => item.title = Some(value),
                        Field::Guid => item.guid = Some(value),
                        Field::Link => item.link = Some(value),
                        Field::Category => item.categories.push(value),
                    }
                }
            }
            Ok(Event::End(tag)) => {
                let name = local_name(tag.name().as_ref());
                match name.as_str() {
                    "item" => {
                        if let Some(item) = current.take() {
                            items.push(item.into_feed_item(site_id)?);
                        }
                    }
                    "title" | "guid" | "link" | "category" => field = None,
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(source) => {
                return Err(SiteError::Feed {
                    site: site_id.to_string(),
                    message: source.to_string(),
                })
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(items)
}

#[derive(Clone, Copy)]
enum Field {
    Title,
    Guid,
    Link,
    Category,
}

#[derive(Default)]
struct PartialItem {
    title: Option<String>,
    guid: Option<String>,
    link: Option<String>,
    enclosure_url: Option<String>,
    categories: Vec<String>,
}

impl PartialItem {
    fn into_feed_item(self, site_id: &str) -> SiteResult<FeedItem> {
        let title = self.title.ok_or_else(|| SiteError::Feed {
            site: site_id.to_string(),
            message: "item missing <title>".to_string(),
        })?;
        let link = self.link.clone().ok_or_else(|| SiteError::Feed {
            site: site_id.to_string(),
            message: "item missing <link>".to_string(),
        })?;
        let guid = self.guid.unwrap_or_else(|| link.clone());
        Ok(FeedItem {
            guid,
            title,
            url: link,
            enclosure_url: self.enclosure_url,
            categories: self.categories,
        })
    }
}

fn local_name(qualified: &[u8]) -> String {
    let text = String::from_utf8_lossy(qualified);
    text.rsplit(':').next().unwrap_or(&text).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
  <item>
    <title>Demo.Title.2026</title>
    <guid>12345</guid>
    <link>https://tracker.example/details.php?id=12345</link>
    <category>Movies</category>
    <enclosure url="https://tracker.example/download.php?id=12345" length="0" type="application/x-bittorrent"/>
  </item>
  <item>
    <title>Second.Item</title>
    <link>https://tracker.example/details.php?id=999</link>
  </item>
</channel></rss>"#;

    #[test]
    fn parses_items_in_document_order() {
        let items = parse_rss_feed("demo", FEED).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].guid, "12345");
        assert_eq!(items[0].categories, vec!["Movies".to_string()]);
        assert_eq!(
            items[0].enclosure_url.as_deref(),
            Some("https://tracker.example/download.php?id=12345")
        );
        assert_eq!(items[1].guid, "https://tracker.example/details.php?id=999");
    }

    #[test]
    fn missing_title_is_rejected() {
        let bad = "<rss><channel><item><link>https://x/1</link></item></channel></rss>";
        let err = parse_rss_feed("demo", bad).unwrap_err();
        assert!(matches!(err, SiteError::Feed { .. }));
    }
}
