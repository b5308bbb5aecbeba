//! Transmission RPC adapter.
//!
//! Transmission requires a CSRF-style session id: the first request with no
//! `X-Transmission-Session-Id` header (or a stale one) gets a `409
//! Conflict` carrying the current id in a response header; the caller is
//! expected to retry once with it attached.

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use ratioguard_core::downloader::{
    AddTorrentRequest, Downloader, DownloaderTorrent, TorrentProperties,
};
use ratioguard_core::error::{DownloaderError, DownloaderResult};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::RwLock;

const SESSION_HEADER: &str = "X-Transmission-Session-Id";

/// Connection details for a Transmission RPC endpoint.
pub struct TransmissionClient {
    http: reqwest::Client,
    rpc_url: String,
    download_dir: String,
    session_id: RwLock<Option<String>>,
}

#[derive(Debug, Deserialize)]
struct RpcEnvelope {
    result: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Deserialize)]
struct TorrentRow {
    #[serde(rename = "hashString")]
    hash: String,
    #[serde(default)]
    name: String,
    #[serde(rename = "percentDone", default)]
    percent_done: f64,
    #[serde(rename = "downloadDir", default)]
    download_dir: String,
    #[serde(rename = "isFinished", default)]
    is_finished: bool,
    #[serde(rename = "uploadRatio", default)]
    upload_ratio: f64,
    #[serde(rename = "secondsSeeding", default)]
    seconds_seeding: i64,
    #[serde(rename = "rateDownload", default)]
    rate_download: i64,
    #[serde(rename = "rateUpload", default)]
    rate_upload: i64,
}

impl TransmissionClient {
    /// Construct a client for the RPC endpoint at `rpc_url`
    /// (e.g. `http://host:9091/transmission/rpc`). `download_dir` is used
    /// as the default path when querying free disk space.
    #[must_use]
    pub fn new(http: reqwest::Client, rpc_url: impl Into<String>, download_dir: impl Into<String>) -> Self {
        Self {
            http,
            rpc_url: rpc_url.into(),
            download_dir: download_dir.into(),
            session_id: RwLock::new(None),
        }
    }

    async fn call(&self, method: &str, arguments: Value) -> DownloaderResult<Value> {
        let body = json!({ "method": method, "arguments": arguments });

        for attempt in 0..2 {
            let mut request = self.http.post(&self.rpc_url).json(&body);
            if let Some(id) = self.session_id.read().await.clone() {
                request = request.header(SESSION_HEADER, id);
            }

            let response = request
                .send()
                .await
                .map_err(|e| DownloaderError::Transport(e.to_string()))?;

            if response.status().as_u16() == 409 {
                if let Some(id) = response
                    .headers()
                    .get(SESSION_HEADER)
                    .and_then(|v| v.to_str().ok())
                {
                    *self.session_id.write().await = Some(id.to_string());
                }
                if attempt == 0 {
                    continue;
                }
            }

            let status = response.status();
            if !status.is_success() {
                let message = response.text().await.unwrap_or_default();
                return Err(DownloaderError::Request {
                    status: status.as_u16(),
                    message,
                });
            }

            let envelope: RpcEnvelope = response
                .json()
                .await
                .map_err(|e| DownloaderError::Transport(e.to_string()))?;

            return if envelope.result == "success" {
                Ok(envelope.arguments)
            } else {
                Err(DownloaderError::Request {
                    status: 200,
                    message: envelope.result,
                })
            };
        }

        Err(DownloaderError::Transport(
            "transmission session negotiation failed".to_string(),
        ))
    }

    async fn torrents(&self, ids: Option<Value>) -> DownloaderResult<Vec<TorrentRow>> {
        let fields = json!([
            "hashString", "name", "percentDone", "downloadDir", "isFinished",
            "uploadRatio", "secondsSeeding", "rateDownload", "rateUpload"
        ]);
        let mut arguments = json!({ "fields": fields });
        if let Some(ids) = ids {
            arguments["ids"] = ids;
        }

        #[derive(Deserialize)]
        struct TorrentsArg {
            torrents: Vec<TorrentRow>,
        }
        let value = self.call("torrent-get", arguments).await?;
        let parsed: TorrentsArg = serde_json::from_value(value)
            .map_err(|e| DownloaderError::Transport(e.to_string()))?;
        Ok(parsed.torrents)
    }
}

#[async_trait]
impl Downloader for TransmissionClient {
    async fn authenticate(&self) -> DownloaderResult<()> {
        self.call("session-get", json!({})).await.map(|_| ())
    }

    async fn add_torrent(&self, request: AddTorrentRequest) -> DownloaderResult<()> {
        let arguments = json!({
            "metainfo": BASE64.encode(&request.torrent_bytes),
            "paused": request.paused,
            "download-dir": request.save_path,
        });
        self.call("torrent-add", arguments).await.map(|_| ())
    }

    async fn exists(&self, hash: &str) -> DownloaderResult<bool> {
        let rows = self.torrents(Some(json!([hash]))).await?;
        Ok(!rows.is_empty())
    }

    async fn list_torrents(&self) -> DownloaderResult<Vec<DownloaderTorrent>> {
        let rows = self.torrents(None).await?;
        Ok(rows
            .into_iter()
            .map(|t| DownloaderTorrent {
                hash: t.hash,
                name: t.name,
                progress_percent: t.percent_done * 100.0,
                ratio: t.upload_ratio,
                seeding_seconds: t.seconds_seeding,
                speed_bps: t.rate_download + t.rate_upload,
            })
            .collect())
    }

    async fn free_space(&self) -> DownloaderResult<u64> {
        #[derive(Deserialize)]
        struct FreeSpace {
            #[serde(rename = "size-bytes")]
            size_bytes: i64,
        }
        let value = self
            .call("free-space", json!({ "path": self.download_dir }))
            .await?;
        let parsed: FreeSpace =
            serde_json::from_value(value).map_err(|e| DownloaderError::Transport(e.to_string()))?;
        Ok(u64::try_from(parsed.size_bytes).unwrap_or(0))
    }

    async fn pause(&self, hash: &str) -> DownloaderResult<()> {
        self.call("torrent-stop", json!({ "ids": [hash] }))
            .await
            .map(|_| ())
    }

    async fn delete(&self, hash: &str, remove_data: bool) -> DownloaderResult<()> {
        self.call(
            "torrent-remove",
            json!({ "ids": [hash], "delete-local-data": remove_data }),
        )
        .await
        .map(|_| ())
    }

    async fn properties(&self, hash: &str) -> DownloaderResult<Option<TorrentProperties>> {
        let rows = self.torrents(Some(json!([hash]))).await?;
        Ok(rows.into_iter().next().map(|t| TorrentProperties {
            save_path: t.download_dir,
            progress_percent: t.percent_done * 100.0,
            is_complete: t.is_finished,
        }))
    }
}
