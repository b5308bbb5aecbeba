//! qBittorrent v2 Web API adapter.

use async_trait::async_trait;
use ratioguard_core::downloader::{
    AddTorrentRequest, Downloader, DownloaderTorrent, TorrentProperties,
};
use ratioguard_core::error::{DownloaderError, DownloaderResult};
use reqwest::multipart;
use serde::Deserialize;

/// Credentials and connection details for a qBittorrent instance.
pub struct QbittorrentClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct QbitTorrent {
    hash: String,
    name: String,
    progress: f64,
    save_path: String,
    completion_on: i64,
    ratio: f64,
    seeding_time: i64,
    dlspeed: i64,
    upspeed: i64,
}

impl QbittorrentClient {
    /// Construct a client for the instance at `base_url` (no trailing
    /// slash). `http` must be built with a cookie store enabled, since
    /// qBittorrent's session auth is cookie-based.
    #[must_use]
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            username: username.into(),
            password: password.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v2/{path}", self.base_url.trim_end_matches('/'))
    }

    async fn list_raw(&self) -> DownloaderResult<Vec<QbitTorrent>> {
        let response = self
            .http
            .get(self.url("torrents/info"))
            .send()
            .await
            .map_err(|e| DownloaderError::Transport(e.to_string()))?;
        response_into_json(response).await
    }
}

#[async_trait]
impl Downloader for QbittorrentClient {
    async fn authenticate(&self) -> DownloaderResult<()> {
        let response = self
            .http
            .post(self.url("auth/login"))
            .form(&[("username", &self.username), ("password", &self.password)])
            .send()
            .await
            .map_err(|e| DownloaderError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| DownloaderError::Transport(e.to_string()))?;

        if status.is_success() && body.trim() == "Ok." {
            Ok(())
        } else {
            Err(DownloaderError::Auth)
        }
    }

    async fn add_torrent(&self, request: AddTorrentRequest) -> DownloaderResult<()> {
        let file_part = multipart::Part::bytes(request.torrent_bytes)
            .file_name("upload.torrent")
            .mime_str("application/x-bittorrent")
            .map_err(|e| DownloaderError::Transport(e.to_string()))?;

        let mut form = multipart::Form::new()
            .part("torrents", file_part)
            .text("paused", request.paused.to_string())
            .text("savepath", request.save_path);

        if let Some(category) = request.category {
            form = form.text("category", category);
        }
        if !request.tags.is_empty() {
            form = form.text("tags", request.tags.join(","));
        }

        let response = self
            .http
            .post(self.url("torrents/add"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| DownloaderError::Transport(e.to_string()))?;

        expect_success(response).await
    }

    async fn exists(&self, hash: &str) -> DownloaderResult<bool> {
        let torrents = self.list_raw().await?;
        Ok(torrents.iter().any(|t| t.hash.eq_ignore_ascii_case(hash)))
    }

    async fn list_torrents(&self) -> DownloaderResult<Vec<DownloaderTorrent>> {
        let torrents = self.list_raw().await?;
        Ok(torrents
            .into_iter()
            .map(|t| DownloaderTorrent {
                hash: t.hash,
                name: t.name,
                progress_percent: t.progress * 100.0,
                ratio: t.ratio,
                seeding_seconds: t.seeding_time,
                speed_bps: t.dlspeed + t.upspeed,
            })
            .collect())
    }

    async fn free_space(&self) -> DownloaderResult<u64> {
        #[derive(Deserialize)]
        struct ServerState {
            free_space_on_disk: u64,
        }
        #[derive(Deserialize)]
        struct MainData {
            server_state: ServerState,
        }

        let response = self
            .http
            .get(self.url("sync/maindata"))
            .send()
            .await
            .map_err(|e| DownloaderError::Transport(e.to_string()))?;
        let data: MainData = response_into_json(response).await?;
        Ok(data.server_state.free_space_on_disk)
    }

    async fn pause(&self, hash: &str) -> DownloaderResult<()> {
        let response = self
            .http
            .post(self.url("torrents/pause"))
            .form(&[("hashes", hash)])
            .send()
            .await
            .map_err(|e| DownloaderError::Transport(e.to_string()))?;
        expect_success(response).await
    }

    async fn delete(&self, hash: &str, remove_data: bool) -> DownloaderResult<()> {
        let response = self
            .http
            .post(self.url("torrents/delete"))
            .form(&[("hashes", hash), ("deleteFiles", if remove_data { "true" } else { "false" })])
            .send()
            .await
            .map_err(|e| DownloaderError::Transport(e.to_string()))?;
        expect_success(response).await
    }

    async fn properties(&self, hash: &str) -> DownloaderResult<Option<TorrentProperties>> {
        let torrents = self.list_raw().await?;
        Ok(torrents
            .into_iter()
            .find(|t| t.hash.eq_ignore_ascii_case(hash))
            .map(|t| TorrentProperties {
                save_path: t.save_path,
                progress_percent: t.progress * 100.0,
                is_complete: t.completion_on > 0,
            }))
    }
}

async fn response_into_json<T: for<'de> Deserialize<'de>>(
    response: reqwest::Response,
) -> DownloaderResult<T> {
    let status = response.status();
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(DownloaderError::Request {
            status: status.as_u16(),
            message,
        });
    }
    response
        .json::<T>()
        .await
        .map_err(|e| DownloaderError::Transport(e.to_string()))
}

async fn expect_success(response: reqwest::Response) -> DownloaderResult<()> {
    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        let message = response.text().await.unwrap_or_default();
        Err(DownloaderError::Request {
            status: status.as_u16(),
            message,
        })
    }
}
