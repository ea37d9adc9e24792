//! Shared signaling point between the supervisor and the rest of the
//! firmware
//!
//! A `Link` is `const`-constructible so it can live in a `static`:
//!
//! ```ignore
//! static LINK: Link = Link::new();
//!
//! // telemetry task
//! LINK.publish("device/abc/status", b"{}", QoS::AtLeastOnce)?;
//!
//! // network driver, on link-down
//! LINK.connectivity_lost();
//! ```
//!
//! Application requests are checked against the published session state
//! at the call boundary and queued; only the supervisor touches the
//! channel.

use core::cell::Cell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use hal_abstractions::{InboundMessage, QoS, MAX_PAYLOAD_LEN, MAX_TOPIC_LEN};
use heapless::{String, Vec};

use crate::bridge::EventBridge;
use crate::channel::ReadMeter;
use crate::error::RequestError;
use crate::state::SessionState;
use crate::topic;

/// Pending application requests
pub const REQUEST_QUEUE_DEPTH: usize = 8;

/// Inbound messages buffered for the application
pub const INBOUND_QUEUE_DEPTH: usize = 8;

/// A publish or subscribe accepted while a session was up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingRequest {
    Publish {
        topic: String<MAX_TOPIC_LEN>,
        payload: Vec<u8, MAX_PAYLOAD_LEN>,
        qos: QoS,
    },
    Subscribe {
        filter: String<MAX_TOPIC_LEN>,
        qos: QoS,
    },
}

pub struct Link {
    pub(crate) reconnect: EventBridge,
    pub(crate) shutdown: Signal<CriticalSectionRawMutex, ()>,
    state: Mutex<CriticalSectionRawMutex, Cell<SessionState>>,
    pub(crate) requests: Channel<CriticalSectionRawMutex, PendingRequest, REQUEST_QUEUE_DEPTH>,
    inbound: Channel<CriticalSectionRawMutex, InboundMessage, INBOUND_QUEUE_DEPTH>,
    pub(crate) rx: ReadMeter,
}

impl Link {
    pub const fn new() -> Self {
        Self {
            reconnect: EventBridge::new(),
            shutdown: Signal::new(),
            state: Mutex::new(Cell::new(SessionState::Disconnected)),
            requests: Channel::new(),
            inbound: Channel::new(),
            rx: ReadMeter::new(),
        }
    }

    /// Current supervisor state
    pub fn state(&self) -> SessionState {
        self.state.lock(|s| s.get())
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        self.state.lock(|s| s.set(state));
    }

    /// Queue a publish.
    ///
    /// # Errors
    ///
    /// `NotConnected` immediately, without queueing, unless the session is
    /// connected or subscribed.
    pub fn publish(&self, topic: &str, payload: &[u8], qos: QoS) -> Result<(), RequestError> {
        if !self.state().accepts_requests() {
            return Err(RequestError::NotConnected);
        }
        topic::validate_name(topic).map_err(|_| RequestError::InvalidTopic)?;
        let topic = String::try_from(topic).map_err(|_| RequestError::InvalidTopic)?;
        let payload = Vec::from_slice(payload).map_err(|_| RequestError::PayloadTooLarge)?;
        self.requests
            .try_send(PendingRequest::Publish {
                topic,
                payload,
                qos,
            })
            .map_err(|_| RequestError::QueueFull)
    }

    /// Queue a subscription on top of the configured ones.
    pub fn subscribe(&self, filter: &str, qos: QoS) -> Result<(), RequestError> {
        if !self.state().accepts_requests() {
            return Err(RequestError::NotConnected);
        }
        topic::validate_filter(filter).map_err(|_| RequestError::InvalidTopic)?;
        let filter = String::try_from(filter).map_err(|_| RequestError::InvalidTopic)?;
        self.requests
            .try_send(PendingRequest::Subscribe { filter, qos })
            .map_err(|_| RequestError::QueueFull)
    }

    /// Report that the network underneath the session went away.
    ///
    /// Non-blocking and idempotent; callable from any context.
    pub fn connectivity_lost(&self) {
        self.reconnect.post();
    }

    /// Ask the supervisor to disconnect and return from `run`.
    pub fn request_shutdown(&self) {
        self.shutdown.signal(());
    }

    /// Wait for the next message on a subscribed topic.
    pub async fn next_message(&self) -> InboundMessage {
        self.inbound.receive().await
    }

    pub fn try_next_message(&self) -> Option<InboundMessage> {
        self.inbound.try_receive().ok()
    }

    /// Hand a received message to the application, dropping the oldest
    /// one when the queue is full.
    pub(crate) fn deliver(&self, message: InboundMessage) {
        if let Err(embassy_sync::channel::TrySendError::Full(message)) =
            self.inbound.try_send(message)
        {
            if let Ok(dropped) = self.inbound.try_receive() {
                warn!(
                    "Inbound queue full, dropping message on '{}'",
                    dropped.topic.as_str()
                );
            }
            // Only the supervisor sends, so the slot just freed is still free.
            let _ = self.inbound.try_send(message);
        }
    }

    /// Discard requests accepted for a session that no longer exists.
    pub(crate) fn discard_pending(&self) -> usize {
        let mut discarded = 0;
        while self.requests.try_receive().is_ok() {
            discarded += 1;
        }
        if discarded > 0 {
            warn!("Discarded {} stale request(s)", discarded);
        }
        discarded
    }
}

impl Default for Link {
    fn default() -> Self {
        Self::new()
    }
}
