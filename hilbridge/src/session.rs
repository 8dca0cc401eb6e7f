//! Per-channel sessions.
//!
//! A [`Channel`] is one instrument endpoint with at most one streaming
//! worker in flight. Starting a new stream cancels the previous one and
//! waits a bounded grace period for it to wind down.
//!
//! A [`TestSession`] sits on top of a channel and holds the current base
//! configuration. Payloads are encoded against it and dispatched in the
//! response mode the selected test case needs.

use crate::classify::{GenericResult, classify_transport};
use crate::error::{Error, Result};
use crate::model::{
    BaseConfig, PayloadConfig, ProtocolFamily, ResponseMode, TestCaseKind, UartPayloadConfig,
};
use crate::protocol::message::{WireMessage, encode};
use crate::transport::client::{ClientConfig, TransportClient, TransportResult};
use crate::transport::stream::{
    self, StreamConfig, StreamSubscription, WorkerHandle, WorkerState,
};
use crate::transport::Endpoint;
use log::{debug, info, trace};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::Duration;

/// How long a superseded stream worker is given to stop.
pub const DEFAULT_SUPERSEDE_GRACE: Duration = Duration::from_secs(3);

/// One instrument endpoint.
#[derive(Debug)]
pub struct Channel {
    endpoint: Endpoint,
    client: TransportClient,
    stream_config: StreamConfig,
    grace: Duration,
    active: Option<WorkerHandle>,
}

impl Channel {
    /// Create a channel with default timeouts.
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            client: TransportClient::default(),
            stream_config: StreamConfig::default(),
            grace: DEFAULT_SUPERSEDE_GRACE,
            active: None,
        }
    }

    /// Set the request/response client configuration.
    #[must_use]
    pub fn with_client_config(mut self, config: ClientConfig) -> Self {
        self.client = TransportClient::new(config);
        self
    }

    /// Set the streaming configuration.
    #[must_use]
    pub fn with_stream_config(mut self, config: StreamConfig) -> Self {
        self.stream_config = config;
        self
    }

    /// Set the supersession grace period.
    #[must_use]
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Endpoint of this channel.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Send `message` and wait for a single response.
    pub fn send_once(&mut self, message: &WireMessage) -> TransportResult {
        self.client.send(message, &self.endpoint)
    }

    /// Run a single exchange on its own thread.
    ///
    /// The result is delivered once on the returned receiver.
    pub fn spawn_once(&mut self, message: WireMessage) -> Result<Receiver<TransportResult>> {
        let (tx, rx) = mpsc::channel();
        let client = self.client.clone();
        let endpoint = self.endpoint.clone();
        thread::Builder::new()
            .name("hilbridge-send".into())
            .spawn(move || {
                if tx.send(client.send(&message, &endpoint)).is_err() {
                    trace!("Result receiver dropped");
                }
            })?;
        Ok(rx)
    }

    /// Start a streaming exchange, superseding any stream still running on
    /// this channel.
    pub fn send_streaming(&mut self, message: WireMessage) -> Result<StreamSubscription> {
        self.cancel_active();
        let (subscription, handle) =
            stream::spawn(message, self.endpoint.clone(), self.stream_config.clone())?;
        self.active = Some(handle);
        Ok(subscription)
    }

    /// Cancel the running stream, if any, and wait up to the grace period
    /// for it to stop.
    ///
    /// Returns `true` if a running stream was cancelled.
    pub fn cancel_active(&mut self) -> bool {
        let Some(handle) = self.active.take() else {
            return false;
        };
        if handle.is_finished() {
            handle.wait(Duration::ZERO);
            return false;
        }

        info!("Cancelling active stream on {}", self.endpoint);
        handle.cancel();
        handle.wait(self.grace);
        true
    }

    /// State of the most recent stream, if one was started.
    pub fn active_state(&self) -> Option<WorkerState> {
        self.active.as_ref().map(WorkerHandle::state)
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        if let Some(handle) = &self.active {
            handle.cancel();
        }
    }
}

/// Result of dispatching a payload.
#[derive(Debug)]
pub enum Dispatch {
    /// The test answered with one block.
    Single {
        /// Kind of the test that was run.
        kind: TestCaseKind,
        /// Raw transport outcome.
        result: TransportResult,
        /// Classified outcome.
        classified: GenericResult,
    },
    /// The test answers with a stream of lines.
    Streaming {
        /// Kind of the test that was run.
        kind: TestCaseKind,
        /// Live event stream.
        subscription: StreamSubscription,
    },
}

/// Base configuration plus the channel it is sent over.
#[derive(Debug)]
pub struct TestSession {
    family: ProtocolFamily,
    base: Option<BaseConfig>,
    channel: Channel,
}

impl TestSession {
    /// Create a session for `family` with no base configuration yet.
    pub fn new(family: ProtocolFamily, channel: Channel) -> Self {
        Self {
            family,
            base: None,
            channel,
        }
    }

    /// Protocol family of this session.
    pub fn family(&self) -> ProtocolFamily {
        self.family
    }

    /// Current base configuration.
    pub fn base(&self) -> Option<&BaseConfig> {
        self.base.as_ref()
    }

    /// Underlying channel.
    pub fn channel_mut(&mut self) -> &mut Channel {
        &mut self.channel
    }

    /// Replace the base configuration.
    pub fn submit_configuration(&mut self, base: BaseConfig) -> Result<()> {
        if base.family() != self.family {
            return Err(Error::Config(format!(
                "{} configuration submitted to a {} session",
                base.family(),
                self.family
            )));
        }
        base.validate()?;
        info!("Configuration set: {} ({})", base.test_name(), self.family);
        self.base = Some(base);
        Ok(())
    }

    /// Encode `payload` against the current base configuration.
    pub fn submit_payload(&self, payload: &PayloadConfig) -> Result<WireMessage> {
        let base = self.require_base()?;
        encode(base, payload)
    }

    /// Payload sent for streaming tests when the caller has none.
    pub fn default_payload(&self) -> Option<PayloadConfig> {
        match self.base.as_ref()? {
            BaseConfig::Uart(base) => UartPayloadConfig::default_for(base.test_name).map(Into::into),
            BaseConfig::I2c(_) => None,
        }
    }

    /// Encode and send `payload`, in the response mode of the selected
    /// test case.
    pub fn dispatch(&mut self, payload: &PayloadConfig) -> Result<Dispatch> {
        let message = self.submit_payload(payload)?;
        let kind = self.require_base()?.test_kind();
        debug!("Dispatching {kind:?} test to {}", self.channel.endpoint());

        match kind.response_mode() {
            ResponseMode::Single => {
                let result = self.channel.send_once(&message);
                let classified = classify_transport(&result, payload.message_data(), kind);
                Ok(Dispatch::Single {
                    kind,
                    result,
                    classified,
                })
            },
            ResponseMode::Streaming => Ok(Dispatch::Streaming {
                kind,
                subscription: self.channel.send_streaming(message)?,
            }),
        }
    }

    fn require_base(&self) -> Result<&BaseConfig> {
        self.base
            .as_ref()
            .ok_or_else(|| Error::Config("no base configuration submitted".into()))
    }
}
