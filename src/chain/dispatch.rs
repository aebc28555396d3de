//! Ways of handing the follow-up invocation to whoever runs the next step.

use crate::core::{ChainPayload, ReplayError, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Delivers a chain payload at least once. Returning `Ok` means the payload
/// was accepted; what happens afterwards is the receiver's business.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, payload: ChainPayload) -> Result<()>;
}

/// In-process dispatch over a tokio channel, drained by a [`super::ChainWorker`].
#[derive(Debug, Clone)]
pub struct ChannelDispatcher {
    sender: mpsc::UnboundedSender<ChainPayload>,
}

impl ChannelDispatcher {
    pub fn new(sender: mpsc::UnboundedSender<ChainPayload>) -> Self {
        Self { sender }
    }
}

/// Creates a connected dispatcher and receiver.
pub fn channel() -> (ChannelDispatcher, mpsc::UnboundedReceiver<ChainPayload>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (ChannelDispatcher::new(sender), receiver)
}

#[async_trait]
impl Dispatcher for ChannelDispatcher {
    async fn dispatch(&self, payload: ChainPayload) -> Result<()> {
        self.sender
            .send(payload)
            .map_err(|_| ReplayError::dispatch("chain worker is gone"))
    }
}

/// Posts the payload as JSON to `<base>/invoke` of an invocation server.
pub struct HttpDispatcher {
    client: reqwest::Client,
    url: String,
}

impl HttpDispatcher {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ReplayError::dispatch(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: format!("{}/invoke", base_url.trim_end_matches('/')),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Dispatcher for HttpDispatcher {
    async fn dispatch(&self, payload: ChainPayload) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ReplayError::dispatch(format!("POST {} failed: {}", self.url, e)))?;

        match response.status() {
            StatusCode::ACCEPTED | StatusCode::OK => Ok(()),
            status => Err(ReplayError::dispatch(format!(
                "POST {} answered HTTP {}",
                self.url, status
            ))),
        }
    }
}

/// Keeps dispatched payloads in memory instead of delivering them.
///
/// Used when a single step is run by hand: the next cursor is reported to
/// the operator, who decides when to invoke it.
#[derive(Debug, Clone, Default)]
pub struct RecordingDispatcher {
    sent: Arc<Mutex<Vec<ChainPayload>>>,
    refuse: bool,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// A dispatcher whose channel never accepts anything.
    pub fn refusing() -> Self {
        Self {
            refuse: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<ChainPayload> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Dispatcher for RecordingDispatcher {
    async fn dispatch(&self, payload: ChainPayload) -> Result<()> {
        if self.refuse {
            return Err(ReplayError::dispatch("follow-up refused"));
        }
        self.sent
            .lock()
            .map_err(|e| ReplayError::dispatch(e.to_string()))?
            .push(payload);
        Ok(())
    }
}
