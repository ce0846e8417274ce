//! Where batches go. Delivery runs off the engine thread; the engine only
//! ever polls for the result.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::thread;
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;

use crate::error::TransportError;
use crate::telemetry::events::{EventBatch, InteractionEvent};

pub type Delivery = Result<(), TransportError>;

/// One batch in flight at a time.
pub trait Collector {
    /// Start sending `events`. An error here means nothing was sent.
    fn begin(&mut self, events: &[InteractionEvent]) -> Delivery;

    /// Result of the send started by `begin`, once it is known.
    fn poll(&mut self) -> Option<Delivery>;

    /// Block up to `timeout` for the result. Only used at shutdown.
    fn wait(&mut self, timeout: Duration) -> Option<Delivery>;
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

/// Posts `{"events": [...]}` to a batch endpoint from a worker thread.
pub struct HttpCollector {
    client: reqwest::blocking::Client,
    endpoint: String,
    pending: Option<Receiver<Delivery>>,
}

impl HttpCollector {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("petpal/", env!("CARGO_PKG_VERSION")))
            .build()?;
        log::info!("Collector endpoint: {endpoint}");
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            pending: None,
        })
    }

    /// Check once that the backend answers. The outcome is only logged.
    pub fn probe(&self, url: &str, timeout: Duration) {
        let client = self.client.clone();
        let url = url.to_string();
        let spawned = thread::Builder::new()
            .name("petpal-probe".into())
            .spawn(move || match client.get(&url).timeout(timeout).send() {
                Ok(resp) if resp.status().is_success() => log::info!("Backend reachable at {url}"),
                Ok(resp) => log::warn!("Backend at {url} answered {}", resp.status()),
                Err(e) => log::warn!("Backend unreachable at {url}: {e}"),
            });
        if let Err(e) = spawned {
            log::warn!("Could not start health probe: {e}");
        }
    }
}

fn settle(result: Result<Delivery, TryRecvError>) -> Option<Delivery> {
    match result {
        Ok(delivery) => Some(delivery),
        Err(TryRecvError::Empty) => None,
        Err(TryRecvError::Disconnected) => Some(Err(TransportError::Disconnected)),
    }
}

impl Collector for HttpCollector {
    fn begin(&mut self, events: &[InteractionEvent]) -> Delivery {
        let body = serde_json::to_vec(&EventBatch { events })?;
        let (tx, rx) = mpsc::channel();
        let client = self.client.clone();
        let url = self.endpoint.clone();

        thread::Builder::new()
            .name("petpal-flush".into())
            .spawn(move || {
                let result = client
                    .post(&url)
                    .header(CONTENT_TYPE, "application/json")
                    .body(body)
                    .send()
                    .map_err(TransportError::from)
                    .and_then(|resp| {
                        let status = resp.status();
                        if status.is_success() {
                            Ok(())
                        } else {
                            Err(TransportError::Status(status.as_u16()))
                        }
                    });
                // Receiver gone means the engine already shut down.
                let _ = tx.send(result);
            })?;

        self.pending = Some(rx);
        Ok(())
    }

    fn poll(&mut self) -> Option<Delivery> {
        let delivery = settle(self.pending.as_ref()?.try_recv())?;
        self.pending = None;
        Some(delivery)
    }

    fn wait(&mut self, timeout: Duration) -> Option<Delivery> {
        let result = match self.pending.as_ref()?.recv_timeout(timeout) {
            Ok(delivery) => delivery,
            Err(RecvTimeoutError::Timeout) => return None,
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::Disconnected),
        };
        self.pending = None;
        Some(result)
    }
}

// ---------------------------------------------------------------------------
// Log only
// ---------------------------------------------------------------------------

/// Used when no endpoint is configured: writes batches to the log and
/// always succeeds.
#[derive(Default)]
pub struct LogCollector {
    pending: bool,
}

impl Collector for LogCollector {
    fn begin(&mut self, events: &[InteractionEvent]) -> Delivery {
        for event in events {
            match serde_json::to_string(event.metadata()) {
                Ok(json) => log::debug!("{} {:?} {json}", event.timestamp().to_rfc3339(), event.kind()),
                Err(e) => log::warn!("Unencodable {:?} event: {e}", event.kind()),
            }
        }
        if let Some(first) = events.first() {
            log::info!("Logged {} interaction events for session {}", events.len(), first.session_id());
        }
        self.pending = true;
        Ok(())
    }

    fn poll(&mut self) -> Option<Delivery> {
        std::mem::take(&mut self.pending).then_some(Ok(()))
    }

    fn wait(&mut self, _timeout: Duration) -> Option<Delivery> {
        self.poll()
    }
}

// ---------------------------------------------------------------------------
// Test double
// ---------------------------------------------------------------------------
