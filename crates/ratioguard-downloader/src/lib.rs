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
#![allow(unexpected_cfgs)]
#![allow(clippy::multiple_crate_versions)]

//! `Downloader` capability adapters: qBittorrent v2 (cookie session,
//! multipart upload) and Transmission (JSON-RPC, session-id CSRF dance).
//! [`DownloaderManager`] resolves a configured downloader id to the
//! concrete client a subscription should push through.

pub mod qbittorrent;
pub mod transmission;

pub use qbittorrent::QbittorrentClient;
pub use transmission::TransmissionClient;

use std::collections::HashMap;
use std::sync::Arc;

use ratioguard_config::Downloader as DownloaderConfig;
use ratioguard_core::Downloader;
use tracing::warn;

/// Registry mapping a configured downloader's stable id to a constructed
/// client, rebuilt whenever `ConfigChanged` reports a downloader edit.
pub struct DownloaderManager {
    clients: HashMap<String, Arc<dyn Downloader>>,
    default_by_kind: HashMap<String, String>,
}

impl DownloaderManager {
    /// Build a manager from the configured downloader rows, constructing
    /// one client per enabled entry. Rows with an unrecognised `kind` are
    /// skipped with a warning — they can never be resolved, matching the
    /// capability trait's "unsupported backends aren't wired in" stance.
    #[must_use]
    pub fn build(http: &reqwest::Client, downloaders: &[DownloaderConfig]) -> Self {
        let mut clients: HashMap<String, Arc<dyn Downloader>> = HashMap::new();
        let mut default_by_kind = HashMap::new();

        for entry in downloaders {
            if !entry.enabled {
                continue;
            }
            let client: Arc<dyn Downloader> = match entry.kind.as_str() {
                "qbittorrent" => Arc::new(QbittorrentClient::new(
                    http.clone(),
                    entry.url.clone(),
                    entry.username.clone().unwrap_or_default(),
                    entry.password.clone().unwrap_or_default(),
                )),
                "transmission" => Arc::new(TransmissionClient::new(
                    http.clone(),
                    entry.url.clone(),
                    String::new(),
                )),
                other => {
                    warn!(kind = other, id = %entry.id, "unrecognised downloader kind, skipping");
                    continue;
                }
            };

            if entry.is_default {
                default_by_kind.insert(entry.kind.clone(), entry.id.clone());
            }
            clients.insert(entry.id.clone(), client);
        }

        Self {
            clients,
            default_by_kind,
        }
    }

    /// Construct a manager directly from pre-built clients, bypassing the
    /// config-driven construction in [`DownloaderManager::build`]. Used by
    /// other crates' tests to register a fake [`Downloader`] implementation.
    #[must_use]
    pub fn with_clients_for_tests(clients: HashMap<String, Arc<dyn Downloader>>) -> Self {
        Self {
            clients,
            default_by_kind: HashMap::new(),
        }
    }

    /// Resolve a downloader id to its client, if configured and enabled.
    #[must_use]
    pub fn resolve(&self, id: &str) -> Option<Arc<dyn Downloader>> {
        self.clients.get(id).cloned()
    }

    /// The default downloader id for a given backend `kind`, if one is
    /// configured.
    #[must_use]
    pub fn default_for_kind(&self, kind: &str) -> Option<&str> {
        self.default_by_kind.get(kind).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn downloader_row(id: &str, kind: &str, is_default: bool) -> DownloaderConfig {
        DownloaderConfig {
            id: id.to_string(),
            name: id.to_string(),
            kind: kind.to_string(),
            url: "http://127.0.0.1:8080".to_string(),
            username: None,
            password: None,
            enabled: true,
            is_default,
            auto_start: false,
        }
    }

    #[test]
    fn resolves_known_kinds_and_skips_unknown() {
        let rows = vec![
            downloader_row("qb1", "qbittorrent", true),
            downloader_row("tr1", "transmission", true),
            downloader_row("weird", "rtorrent", false),
        ];
        let manager = DownloaderManager::build(&reqwest::Client::new(), &rows);

        assert!(manager.resolve("qb1").is_some());
        assert!(manager.resolve("tr1").is_some());
        assert!(manager.resolve("weird").is_none());
        assert_eq!(manager.default_for_kind("qbittorrent"), Some("qb1"));
        assert_eq!(manager.default_for_kind("transmission"), Some("tr1"));
    }

    #[test]
    fn disabled_downloaders_are_not_registered() {
        let mut row = downloader_row("qb1", "qbittorrent", true);
        row.enabled = false;
        let manager = DownloaderManager::build(&reqwest::Client::new(), &[row]);
        assert!(manager.resolve("qb1").is_none());
    }
}
