#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::cargo,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::multiple_crate_versions)]

//! Process-wide typed event bus for the RatioGuard engine.
//!
//! Built on `tokio::broadcast` with a bounded in-memory replay ring: when the
//! channel overflows, the oldest events are dropped rather than blocking the
//! publisher, matching the "consumers must treat events as hints" contract.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::sync::broadcast::{Receiver, Sender};
use tracing::error;

/// Identifier assigned to each event emitted by the bus.
pub type EventId = u64;

/// Default buffer size for the in-memory replay ring.
const DEFAULT_REPLAY_CAPACITY: usize = 1_024;

/// Area of configuration a `ConfigChanged` event originated from.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConfigSource {
    /// `GlobalSettings` was modified.
    Global,
    /// A `Downloader` row was modified.
    Downloaders,
    /// A `Site` (and/or its RSS associations) was modified.
    Sites,
    /// An `RSSSubscription` was modified independently of its site.
    RssSubscriptions,
    /// A `FilterRule` or its associations were modified.
    FilterRules,
}

impl ConfigSource {
    /// Machine-friendly discriminator.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Downloaders => "downloaders",
            Self::Sites => "sites",
            Self::RssSubscriptions => "rss_subscriptions",
            Self::FilterRules => "filter_rules",
        }
    }
}

/// Typed domain events fanned out to any number of subscribers.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A mutating write completed against the `ConfigStore`.
    ConfigChanged {
        /// Area of configuration that changed.
        source: ConfigSource,
        /// Monotonic version (unix nanoseconds) assigned at write time.
        version: i64,
    },
    /// A downloader's reported free disk space fell below its configured floor.
    DiskSpaceLow {
        /// Downloader whose free space triggered the event.
        downloader_id: uuid::Uuid,
        /// Observed free bytes at the time of the check.
        free_bytes: u64,
        /// Configured minimum free bytes.
        threshold_bytes: u64,
    },
    /// A pushed torrent's promotional window ended.
    FreeEndReached {
        /// Site the torrent belongs to.
        site: String,
        /// Site-local torrent identifier.
        torrent_id: String,
    },
    /// A candidate was discovered via RSS and admitted into the pipeline.
    TorrentDiscovered {
        /// Site the torrent belongs to.
        site: String,
        /// Site-local torrent identifier.
        torrent_id: String,
    },
    /// A candidate was rejected for this round without being downloaded.
    TorrentSkipped {
        /// Site the torrent belongs to.
        site: String,
        /// Site-local torrent identifier.
        torrent_id: String,
        /// Human-readable reason the candidate was skipped.
        reason: String,
    },
    /// A `.torrent` file was fetched and hashed.
    TorrentDownloaded {
        /// Site the torrent belongs to.
        site: String,
        /// Site-local torrent identifier.
        torrent_id: String,
        /// SHA-1 hash of the torrent's `info` dictionary.
        hash: String,
    },
    /// A torrent was accepted by the downloader.
    TorrentPushed {
        /// Site the torrent belongs to.
        site: String,
        /// Site-local torrent identifier.
        torrent_id: String,
        /// SHA-1 hash of the torrent's `info` dictionary.
        hash: String,
    },
    /// A push attempt to the downloader failed.
    PushFailed {
        /// Site the torrent belongs to.
        site: String,
        /// Site-local torrent identifier.
        torrent_id: String,
        /// Error detail reported by the downloader.
        message: String,
    },
    /// A `TorrentInfo` row was purged by the cleanup monitor.
    TorrentPurged {
        /// Site the torrent belongs to.
        site: String,
        /// Site-local torrent identifier.
        torrent_id: String,
    },
}

impl Event {
    /// Machine-friendly discriminator.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ConfigChanged { .. } => "config_changed",
            Self::DiskSpaceLow { .. } => "disk_space_low",
            Self::FreeEndReached { .. } => "free_end_reached",
            Self::TorrentDiscovered { .. } => "torrent_discovered",
            Self::TorrentSkipped { .. } => "torrent_skipped",
            Self::TorrentDownloaded { .. } => "torrent_downloaded",
            Self::TorrentPushed { .. } => "torrent_pushed",
            Self::PushFailed { .. } => "push_failed",
            Self::TorrentPurged { .. } => "torrent_purged",
        }
    }
}

/// Metadata wrapper around events. Each envelope tracks the event id and
/// emission timestamp.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct EventEnvelope {
    /// Monotonic identifier assigned to the wrapped event.
    pub id: EventId,
    /// Timestamp recording when the envelope was produced.
    pub timestamp: DateTime<Utc>,
    /// Wrapped event payload.
    pub event: Event,
}

/// Shared event bus built on top of `tokio::broadcast`.
#[derive(Clone)]
pub struct EventBus {
    sender: Sender<EventEnvelope>,
    buffer: Arc<Mutex<VecDeque<EventEnvelope>>>,
    next_id: Arc<std::sync::atomic::AtomicU64>,
    replay_capacity: usize,
}

impl EventBus {
    /// Construct a new bus with the provided broadcast capacity.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "event bus capacity must be positive");
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            buffer: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            next_id: Arc::new(std::sync::atomic::AtomicU64::new(1)),
            replay_capacity: capacity,
        }
    }

    /// Construct a bus with the default in-memory buffer size.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_REPLAY_CAPACITY)
    }

    /// Publish a new event to the bus, assigning it a sequential identifier.
    ///
    /// Never blocks: subscribers with a full queue silently lose the oldest
    /// buffered event (handled internally by `tokio::broadcast`).
    ///
    /// # Panics
    ///
    /// Panics if the replay buffer mutex has been poisoned.
    pub fn publish(&self, event: Event) -> EventId {
        let id = self
            .next_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let envelope = EventEnvelope {
            id,
            timestamp: Utc::now(),
            event,
        };

        {
            let mut buffer = self.lock_buffer();
            if buffer.len() == self.replay_capacity {
                buffer.pop_front();
            }
            buffer.push_back(envelope.clone());
        }

        let _ = self.sender.send(envelope);
        id
    }

    /// Subscribe to the bus, replaying any buffered events newer than `since_id`.
    ///
    /// # Panics
    ///
    /// Panics if the replay buffer mutex has been poisoned.
    #[must_use]
    pub fn subscribe(&self, since_id: Option<EventId>) -> EventStream {
        let mut backlog = VecDeque::new();
        if let Some(since) = since_id {
            let buffer = self.lock_buffer();
            for item in buffer.iter() {
                if item.id > since {
                    backlog.push_back(item.clone());
                }
            }
        }

        let receiver = self.sender.subscribe();
        EventStream { backlog, receiver }
    }

    /// Returns the last assigned identifier, if any events have been published.
    ///
    /// # Panics
    ///
    /// Panics if the replay buffer mutex has been poisoned.
    #[must_use]
    pub fn last_event_id(&self) -> Option<EventId> {
        let buffer = self.lock_buffer();
        buffer.back().map(|event| event.id)
    }

    fn lock_buffer(&self) -> MutexGuard<'_, VecDeque<EventEnvelope>> {
        match self.buffer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                error!("event buffer mutex poisoned; continuing with recovered guard");
                poisoned.into_inner()
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Stream wrapper that yields events either from the replay backlog or from the
/// live broadcast channel.
pub struct EventStream {
    backlog: VecDeque<EventEnvelope>,
    receiver: Receiver<EventEnvelope>,
}

impl EventStream {
    /// Receive the next event, respecting the replay backlog first (FIFO per
    /// subscriber).
    pub async fn next(&mut self) -> Option<EventEnvelope> {
        if let Some(event) = self.backlog.pop_front() {
            return Some(event);
        }

        match self.receiver.recv().await {
            Ok(event) => Some(event),
            Err(broadcast::error::RecvError::Lagged(_)) => self.receiver.recv().await.ok(),
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::time::Duration;
    use tokio::task;
    use tokio::time::timeout;

    const PUBLISH_TIMEOUT: Duration = Duration::from_secs(1);

    fn sample_event(i: usize) -> Event {
        Event::TorrentDiscovered {
            site: "example".to_string(),
            torrent_id: i.to_string(),
        }
    }

    #[test]
    fn event_kinds_cover_all_variants() {
        let events = [
            Event::ConfigChanged {
                source: ConfigSource::Global,
                version: 1,
            },
            Event::DiskSpaceLow {
                downloader_id: uuid::Uuid::nil(),
                free_bytes: 1,
                threshold_bytes: 2,
            },
            Event::FreeEndReached {
                site: "s".into(),
                torrent_id: "1".into(),
            },
            Event::TorrentDiscovered {
                site: "s".into(),
                torrent_id: "1".into(),
            },
            Event::TorrentSkipped {
                site: "s".into(),
                torrent_id: "1".into(),
                reason: "non-free".into(),
            },
            Event::TorrentDownloaded {
                site: "s".into(),
                torrent_id: "1".into(),
                hash: "a".repeat(40),
            },
            Event::TorrentPushed {
                site: "s".into(),
                torrent_id: "1".into(),
                hash: "a".repeat(40),
            },
            Event::PushFailed {
                site: "s".into(),
                torrent_id: "1".into(),
                message: "500".into(),
            },
            Event::TorrentPurged {
                site: "s".into(),
                torrent_id: "1".into(),
            },
        ];

        let expected = [
            "config_changed",
            "disk_space_low",
            "free_end_reached",
            "torrent_discovered",
            "torrent_skipped",
            "torrent_downloaded",
            "torrent_pushed",
            "push_failed",
            "torrent_purged",
        ];

        for (event, kind) in events.iter().zip(expected) {
            assert_eq!(event.kind(), kind);
        }
    }

    #[tokio::test]
    async fn sequential_ids_and_replay() {
        let bus = EventBus::with_capacity(16);

        let mut last_id = 0;
        for i in 0..5 {
            last_id = bus.publish(sample_event(i));
        }
        assert_eq!(last_id, 5);

        let mut stream = bus.subscribe(Some(2));
        let mut received = Vec::new();
        for _ in 0..3 {
            if let Some(event) = stream.next().await {
                received.push(event);
            }
        }

        assert_eq!(received.len(), 3);
        assert_eq!(received.first().unwrap().id, 3);
        assert_eq!(received.last().unwrap().id, 5);
    }

    #[tokio::test]
    async fn publish_never_blocks_under_slow_subscriber() {
        let bus = Arc::new(EventBus::with_capacity(4));
        let _slow_subscriber = bus.subscribe(None);

        let publisher_bus = bus.clone();
        let publisher = task::spawn(async move {
            for i in 0..100 {
                timeout(PUBLISH_TIMEOUT, async {
                    publisher_bus.publish(sample_event(i));
                })
                .await
                .expect("publish timed out under backpressure");
            }
        });

        publisher.await.expect("publisher task panicked");
    }

    #[tokio::test]
    async fn per_subscriber_fifo_ordering() {
        let bus = EventBus::with_capacity(64);
        let mut stream = bus.subscribe(None);
        for i in 0..20 {
            bus.publish(sample_event(i));
        }

        let mut ids = Vec::new();
        for _ in 0..20 {
            ids.push(stream.next().await.expect("event").id);
        }
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(ids, sorted, "events must be delivered in publish order");
    }

    #[tokio::test]
    async fn last_event_id_reflects_recent_publish() {
        let bus = EventBus::with_capacity(2);
        assert!(bus.last_event_id().is_none(), "no events published yet");
        let published = bus.publish(sample_event(0));
        assert_eq!(bus.last_event_id(), Some(published));
    }

    #[tokio::test]
    async fn stream_returns_none_after_sender_dropped() {
        let mut stream = {
            let bus = EventBus::with_capacity(1);
            let stream = bus.subscribe(None);
            drop(bus);
            stream
        };
        assert!(
            stream.next().await.is_none(),
            "closing the sender should end the stream"
        );
    }

    #[tokio::test]
    async fn load_test_does_not_stall_publishers() {
        let bus = Arc::new(EventBus::with_capacity(512));
        let mut stream = bus.subscribe(None);

        let publisher = {
            let bus = bus.clone();
            task::spawn(async move {
                for i in 0..500 {
                    let publish_bus = bus.clone();
                    timeout(PUBLISH_TIMEOUT, async move {
                        let _ = publish_bus.publish(sample_event(i));
                    })
                    .await
                    .expect("publish timed out");
                }
            })
        };

        let consumer = task::spawn(async move {
            let mut ids = HashSet::new();
            while ids.len() < 500 {
                if let Some(event) = stream.next().await {
                    ids.insert(event.id);
                }
            }
            ids
        });

        publisher.await.expect("publisher task panicked");
        let ids = consumer.await.expect("consumer task panicked");
        assert_eq!(ids.len(), 500);
    }
}
