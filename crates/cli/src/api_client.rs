use anyhow::{Context, Result};
use futures::TryStreamExt;
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use sitesync_core::{DeleteResponse, DiffRequest, DiffResponse, Session, SessionId};
use std::path::Path;
use std::time::Duration;
use tokio_util::io::ReaderStream;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    token: String,
}

/// Result of one chunk upload.
#[derive(Debug)]
pub struct ChunkResponse {
    /// `201 Created` once the receiver has finalized the session.
    pub status: StatusCode,
    pub session: Session,
}

impl ChunkResponse {
    pub fn completed(&self) -> bool {
        self.status == StatusCode::CREATED
    }
}

impl ApiClient {
    pub fn new(base_url: &str, token: &str, timeout: Duration) -> Result<Self> {
        let mut base_url = Url::parse(base_url).context("invalid server URL")?;
        // The endpoint is a directory: relative joins must land below it.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url,
            token: token.to_string(),
        })
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url.join(path).context("failed to build API URL")
    }

    async fn send_json<T: DeserializeOwned>(&self, req: reqwest::RequestBuilder) -> Result<T> {
        let (_, value) = self.send_with_status(req).await?;
        Ok(value)
    }

    async fn send_with_status<T: DeserializeOwned>(
        &self,
        req: reqwest::RequestBuilder,
    ) -> Result<(StatusCode, T)> {
        let response = req.bearer_auth(&self.token).send().await?;
        let status = response.status();
        let body = response
            .text()
            .await
            .with_context(|| format!("failed to read response body ({status})"))?;
        if !status.is_success() {
            anyhow::bail!("API error ({}): {}", status, body);
        }
        let value = serde_json::from_str(&body)
            .with_context(|| format!("unexpected response body: {body}"))?;
        Ok((status, value))
    }

    /// The descriptor of the currently published version.
    pub async fn get_version(&self) -> Result<serde_json::Value> {
        let url = self.url("")?;
        self.send_json(self.http.get(url)).await
    }

    /// Post the manifest. With `id`, the receiver records the removals for that session.
    pub async fn resolve_diff(
        &self,
        id: Option<&SessionId>,
        request: &DiffRequest,
    ) -> Result<DiffResponse> {
        let mut url = self.url("")?;
        if let Some(id) = id {
            url.query_pairs_mut().append_pair("id", id.as_str());
        }
        self.send_json(self.http.post(url).json(request)).await
    }

    /// Stream one archive to the receiver, reporting bytes sent through `on_progress`.
    pub async fn upload_chunk<F>(
        &self,
        id: &SessionId,
        chunks: u32,
        index: u32,
        archive: &Path,
        on_progress: F,
    ) -> Result<ChunkResponse>
    where
        F: Fn(u64) + Send + Sync + 'static,
    {
        let file = tokio::fs::File::open(archive)
            .await
            .with_context(|| format!("failed to open archive {}", archive.display()))?;
        let len = file.metadata().await?.len();

        let stream = ReaderStream::new(file).inspect_ok(move |bytes| on_progress(bytes.len() as u64));

        let mut url = self.url("")?;
        url.query_pairs_mut()
            .append_pair("id", id.as_str())
            .append_pair("chunks", &chunks.to_string())
            .append_pair("index", &index.to_string());

        let req = self
            .http
            .put(url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .header(reqwest::header::CONTENT_LENGTH, len)
            .body(reqwest::Body::wrap_stream(stream));
        let (status, session) = self.send_with_status(req).await?;
        Ok(ChunkResponse { status, session })
    }

    pub async fn delete_file(&self, path: &str) -> Result<DeleteResponse> {
        let mut url = self.url("")?;
        url.query_pairs_mut().append_pair("file", path);
        self.send_json(self.http.delete(url)).await
    }

    pub async fn get_session(&self, id: &SessionId) -> Result<Session> {
        let url = self.url(&format!("sessions/{id}"))?;
        self.send_json(self.http.get(url)).await
    }
}
