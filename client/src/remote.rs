//! Client for the remote sync service.
//!
//! Pulls and pushes are plain HTTP; the real-time stream is a WebSocket
//! whose text frames each carry one bookmark delta.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use marksync_engine::{Bookmark, BootstrapPage, BootstrapQuery, PushRequest, PushResponse};
use reqwest::{RequestBuilder, Response};
use tokio::time::timeout;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        client::IntoClientRequest,
        http::{header::AUTHORIZATION, HeaderValue},
        Message,
    },
};

use crate::config::Config;
use crate::error::{Result, SyncError};

/// Raw text frames of the real-time stream.
pub type FrameStream = BoxStream<'static, Result<String>>;

/// The remote authoritative store.
#[async_trait]
pub trait RemoteService: Send + Sync {
    /// One page of rows changed after `query.from`.
    async fn bootstrap(&self, query: &BootstrapQuery) -> Result<BootstrapPage>;

    /// Upsert a batch of rows. Any non-2xx answer is an error.
    async fn push(&self, rows: &[Bookmark]) -> Result<PushResponse>;

    /// Open the real-time stream.
    async fn subscribe(&self) -> Result<FrameStream>;
}

/// [`RemoteService`] over HTTP and WebSocket.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    timeout: Duration,
}

impl HttpRemote {
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            timeout: config.request_timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// `ws://` or `wss://` URL of the event stream.
    pub fn events_url(&self) -> String {
        let url = self.url("events");
        if let Some(rest) = url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            url
        }
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn transport_error(&self, err: reqwest::Error) -> SyncError {
        if err.is_timeout() {
            SyncError::Timeout(self.timeout)
        } else {
            err.into()
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl RemoteService for HttpRemote {
    async fn bootstrap(&self, query: &BootstrapQuery) -> Result<BootstrapPage> {
        let request = self.client.get(self.url("bootstrap")).query(query);
        let response = self.send(request).await?;
        response
            .json::<BootstrapPage>()
            .await
            .map_err(|e| self.transport_error(e))
    }

    async fn push(&self, rows: &[Bookmark]) -> Result<PushResponse> {
        let body = PushRequest {
            bookmarks: rows.to_vec(),
        };
        let request = self.client.post(self.url("sync")).json(&body);
        let response = self.send(request).await?;

        // Only the status matters; an empty or unfamiliar body is fine.
        Ok(response.json::<PushResponse>().await.unwrap_or_default())
    }

    async fn subscribe(&self) -> Result<FrameStream> {
        let mut request = self.events_url().into_client_request()?;
        if let Some(token) = &self.token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| SyncError::WebSocket(e.to_string()))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (ws, _) = match timeout(self.timeout, connect_async(request)).await {
            Ok(Ok(ws)) => ws,
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Err(SyncError::Timeout(self.timeout)),
        };

        let frames = ws.filter_map(|message| async move {
            match message {
                Ok(Message::Text(text)) => Some(Ok(text.to_string())),
                Ok(Message::Binary(_)) => {
                    tracing::warn!("Ignoring binary frame on event stream");
                    None
                }
                Ok(_) => None,
                Err(e) => Some(Err(SyncError::from(e))),
            }
        });

        Ok(frames.boxed())
    }
}
