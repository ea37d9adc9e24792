//! Session supervisor
//!
//! Owns one broker session end to end. Each cycle:
//!
//! 1. CONNECTING: open the transport (bounded by the I/O timeout)
//! 2. HANDSHAKING: TLS handshake, when the endpoint uses TLS
//! 3. CONNECTED: protocol CONNECT
//! 4. SUBSCRIBED: subscribe to every configured filter, then serve
//!    application requests and inbound traffic until something fails
//!
//! Any failure closes the channel, counts toward [`RetryState`] and goes
//! back to DISCONNECTED, sleeps per the backoff policy and posts the
//! reconnect bridge. Bounded failure classes (authentication, and every
//! class when `escalate_transient` is set) that exceed `max_attempts`
//! move straight to DEGRADED and end [`Supervisor::run`]. Fatal failures
//! (a credential set that became partial after startup) do so at once.
//!
//! # Example
//!
//! ```ignore
//! static LINK: Link = Link::new();
//!
//! let mut supervisor = Supervisor::new(
//!     config, &LINK, transport, tls_engine, mqtt_engine, credentials, Delay,
//! )?;
//! loop {
//!     match supervisor.run().await {
//!         Ok(()) => break,
//!         Err(degraded) => {
//!             error!("{}", degraded);
//!             Timer::after_secs(600).await;
//!         }
//!     }
//! }
//! ```

use embassy_futures::select::{select, select3, Either, Either3};
use embedded_hal_async::delay::DelayNs;
use hal_abstractions::{
    Connection, CredentialStore, ProtocolEngine, TlsEngine, Transport, TransportError,
};
use heapless::Deque;

use crate::backoff::Backoff;
use crate::channel::{ChannelOf, Metered, SessionChannel};
use crate::config::{ConfigError, SupervisorConfig};
use crate::credentials::{CredentialError, Credentials};
use crate::error::{Degraded, StageError};
use crate::link::{Link, PendingRequest};
use crate::secure::SecureChannel;
use crate::session::{Session, SessionError};
use crate::state::{RetryState, SessionState, Transition};
use crate::timeout::with_timeout;

/// Number of transitions kept for diagnostics
pub const HISTORY_LEN: usize = 32;

/// State, retry and backoff bookkeeping
struct Tracker {
    state: SessionState,
    retry: RetryState,
    backoff: Backoff,
    history: Deque<Transition, HISTORY_LEN>,
}

impl Tracker {
    fn transition(&mut self, link: &Link, to: SessionState) {
        let from = self.state;
        debug_assert!(
            from.can_transition_to(to),
            "invalid transition {:?} -> {:?}",
            from,
            to
        );
        if !from.can_transition_to(to) {
            error!("Invalid transition {} -> {}", from, to);
        }

        let record = Transition {
            from,
            to,
            attempt: self.retry.attempt_count,
        };
        if self.history.is_full() {
            self.history.pop_front();
        }
        let _ = self.history.push_back(record);

        self.state = to;
        link.set_state(to);
        info!(
            "Session state: {} -> {} (attempt {})",
            from, to, self.retry.attempt_count
        );
    }

    fn established(&mut self) {
        self.retry.reset();
        self.backoff.reset();
    }
}

/// Why a cycle ended without an error
enum CycleEnd {
    Shutdown,
}

pub struct Supervisor<'a, T, E, P, S, D> {
    config: SupervisorConfig,
    link: &'a Link,
    transport: T,
    secure: SecureChannel<E>,
    engine: P,
    store: S,
    delay: D,
    tracker: Tracker,
}

impl<'a, T, E, P, S, D> Supervisor<'a, T, E, P, S, D>
where
    T: Transport,
    E: TlsEngine,
    P: ProtocolEngine<ChannelOf<'a, T, E>>,
    S: CredentialStore,
    D: DelayNs,
{
    /// Validate `config` and assemble a supervisor.
    ///
    /// # Errors
    ///
    /// Configuration mistakes, including a missing trust anchor or a half
    /// client identity in `store`, are reported here and never retried.
    pub fn new(
        config: SupervisorConfig,
        link: &'a Link,
        transport: T,
        tls: E,
        engine: P,
        mut store: S,
        delay: D,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        if config.endpoint.use_tls {
            match Credentials::load(&mut store, config.tls.verify) {
                Ok(_) => {}
                Err(CredentialError::MissingTrustAnchor) => {
                    return Err(ConfigError::MissingTrustAnchor)
                }
                Err(CredentialError::Incomplete) => {
                    return Err(ConfigError::IncompleteCredentials)
                }
                Err(e) => warn!("Credential preflight: {}", e),
            }
        }

        link.set_state(SessionState::Disconnected);
        info!(
            "Supervisor for {}:{} (tls: {}, max attempts: {})",
            config.endpoint.host,
            config.endpoint.port,
            config.endpoint.use_tls,
            config.retry.max_attempts
        );

        Ok(Self {
            link,
            transport,
            secure: SecureChannel::new(tls, config.tls),
            engine,
            store,
            delay,
            tracker: Tracker {
                state: SessionState::Disconnected,
                retry: RetryState::new(config.retry.max_attempts),
                backoff: Backoff::new(config.backoff),
                history: Deque::new(),
            },
            config,
        })
    }

    pub fn state(&self) -> SessionState {
        self.tracker.state
    }

    pub fn retry(&self) -> RetryState {
        self.tracker.retry
    }

    /// Recent transitions, oldest first
    pub fn history(&self) -> impl Iterator<Item = &Transition> + '_ {
        self.tracker.history.iter()
    }

    pub fn link(&self) -> &'a Link {
        self.link
    }

    /// Clear the retry count and backoff; the next `run` starts fresh.
    pub fn restart(&mut self) {
        info!(
            "Supervisor restart (was {}, {} failed attempts)",
            self.tracker.state, self.tracker.retry.attempt_count
        );
        self.tracker.retry.reset();
        self.tracker.backoff.reset();
    }

    /// Maintain the session until shutdown or until retries are exhausted.
    ///
    /// Calling `run` again after it returned `Err(Degraded)` performs a
    /// manual restart.
    ///
    /// # Errors
    ///
    /// [`Degraded`] once a bounded failure exceeds `max_attempts`.
    pub async fn run(&mut self) -> Result<(), Degraded> {
        if self.tracker.state == SessionState::Degraded {
            self.restart();
        }
        self.link.reconnect.post();

        loop {
            if let Either::First(()) =
                select(self.link.shutdown.wait(), self.link.reconnect.wait()).await
            {
                info!("Shutdown requested");
                self.link.discard_pending();
                return Ok(());
            }

            let err = match self.cycle().await {
                Ok(CycleEnd::Shutdown) => {
                    self.tracker.transition(self.link, SessionState::Disconnected);
                    self.link.discard_pending();
                    return Ok(());
                }
                Err(err) => err,
            };

            let cause = err.class();
            let bounded = cause.is_bounded() || self.config.retry.escalate_transient;
            let attempt = self.tracker.retry.record_failure(bounded);
            warn!(
                "Attempt {} failed in {} ({} failure): {}",
                attempt, self.tracker.state, cause, err
            );
            self.link.discard_pending();

            if cause.is_fatal() || (bounded && self.tracker.retry.exceeded()) {
                self.tracker.transition(self.link, SessionState::Degraded);
                let degraded = Degraded {
                    cause,
                    last_error: err,
                    attempts: self.tracker.retry.bounded_count,
                };
                if err.is_credential_problem() {
                    error!("Giving up: bad credentials: {}", degraded);
                } else {
                    error!("Giving up: {}", degraded);
                }
                return Err(degraded);
            }

            self.tracker.transition(self.link, SessionState::Disconnected);
            let wait_ms = self.tracker.backoff.next_delay_ms();
            info!("Reconnecting in {} ms", wait_ms);
            if let Either::First(()) =
                select(self.link.shutdown.wait(), self.delay.delay_ms(wait_ms)).await
            {
                info!("Shutdown requested during backoff");
                return Ok(());
            }
            self.link.reconnect.post();
        }
    }

    /// One connection attempt plus the steady state that follows it.
    async fn cycle(&mut self) -> Result<CycleEnd, StageError> {
        let Self {
            config,
            link,
            transport,
            secure,
            engine,
            store,
            delay,
            tracker,
        } = self;
        let link: &'a Link = *link;

        // Step 1: transport
        tracker.transition(link, SessionState::Connecting);
        let io = match with_timeout(delay, config.io_timeout_ms, transport.open(&config.endpoint))
            .await
        {
            Ok(Ok(io)) => io,
            Ok(Err(e)) => return Err(StageError::Transport(e)),
            Err(_) => return Err(StageError::Transport(TransportError::Timeout)),
        };
        debug!("Transport open to {}:{}", config.endpoint.host, config.endpoint.port);
        let io = Metered::new(io, &link.rx);

        // Step 2: TLS
        let channel: ChannelOf<'a, T, E> = if config.endpoint.use_tls {
            tracker.transition(link, SessionState::Handshaking);
            let stream = secure
                .handshake(io, config.server_name(), store, delay)
                .await
                .map_err(StageError::Secure)?;
            SessionChannel::Secure(stream)
        } else {
            SessionChannel::Plain(io)
        };

        // Step 3: CONNECT
        tracker.transition(link, SessionState::Connected);
        let mut session: Session<'_, ChannelOf<'a, T, E>, P> =
            Session::new(engine, &link.reconnect, &link.rx, config.io_timeout_ms);
        if let Err(e) = session
            .connect(channel, &config.connect_options(), delay)
            .await
        {
            session.close();
            return Err(StageError::Session(e));
        }

        // Step 4: SUBSCRIBE
        tracker.transition(link, SessionState::Subscribed);
        for sub in config.subscriptions {
            match session.subscribe(sub.filter, sub.qos, delay).await {
                Ok(granted) => info!("Subscribed to '{}' (QoS {})", sub.filter, granted as u8),
                Err(e) => {
                    session.close();
                    return Err(StageError::Session(e));
                }
            }
        }

        tracker.established();
        info!("Session established with {}", config.endpoint.host);

        serve(session, link, delay, config.poll_interval_ms).await
    }
}

/// Steady state: requests, inbound traffic, loss and shutdown.
///
/// Queued requests interrupt the poll and are served once it returns.
/// Shutdown and connectivity loss end the session, so they may drop a
/// poll in the middle of a packet.
async fn serve<C, P, D>(
    mut session: Session<'_, C, P>,
    link: &Link,
    delay: &mut D,
    poll_interval_ms: u32,
) -> Result<CycleEnd, StageError>
where
    C: Connection,
    P: ProtocolEngine<C>,
    D: DelayNs,
{
    loop {
        let event = select3(
            link.shutdown.wait(),
            link.reconnect.wait(),
            session.poll(delay, poll_interval_ms, link.requests.ready_to_receive()),
        )
        .await;

        match event {
            Either3::First(()) => {
                info!("Shutdown requested, disconnecting");
                session.disconnect(delay).await;
                session.close();
                return Ok(CycleEnd::Shutdown);
            }
            Either3::Second(()) => {
                warn!("Connectivity lost");
                session.close();
                return Err(StageError::ConnectivityLost);
            }
            Either3::Third(Ok(Some(message))) => {
                debug!(
                    "Received {} bytes on '{}'",
                    message.payload.len(),
                    message.topic.as_str()
                );
                link.deliver(message);
            }
            Either3::Third(Ok(None)) => {}
            Either3::Third(Err(e)) => {
                session.close();
                return Err(StageError::Session(e));
            }
        }

        while let Ok(request) = link.requests.try_receive() {
            if let Err(e) = handle_request(&mut session, request, delay).await {
                if session.is_lost() {
                    session.close();
                    return Err(StageError::Session(e));
                }
                warn!("Request failed: {}", e);
            }
        }
    }
}

async fn handle_request<C, P, D>(
    session: &mut Session<'_, C, P>,
    request: PendingRequest,
    delay: &mut D,
) -> Result<(), SessionError>
where
    C: Connection,
    P: ProtocolEngine<C>,
    D: DelayNs,
{
    match request {
        PendingRequest::Publish {
            topic,
            payload,
            qos,
        } => session.publish(&topic, &payload, qos, delay).await,
        PendingRequest::Subscribe { filter, qos } => {
            let granted = session.subscribe(&filter, qos, delay).await?;
            info!("Subscribed to '{}' (QoS {})", filter.as_str(), granted as u8);
            Ok(())
        }
    }
}
