//! Pub/sub session over an established channel
//!
//! A `Session` drives a [`ProtocolEngine`] for one connection. Every
//! request is bounded by the I/O timeout. When the channel fails the
//! session posts connectivity-lost on the [`EventBridge`] exactly once and
//! refuses further I/O; the supervisor tears it down from there.
//!
//! [`Session::poll`] can be interrupted, but only between packets: the
//! shared [`ReadMeter`] tells it whether the engine has started reading
//! one.

use core::future::Future;
use core::marker::PhantomData;
use core::pin::pin;

use embassy_futures::select::{select, Either};
use embedded_hal_async::delay::DelayNs;
use hal_abstractions::{Connection, ConnectOptions, InboundMessage, ProtocolEngine, ProtocolError, QoS};

use crate::bridge::EventBridge;
use crate::channel::ReadMeter;
use crate::timeout::with_timeout;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionError {
    /// The channel has already failed; nothing was sent
    NotConnected,
    Protocol(ProtocolError),
}

impl core::fmt::Display for SessionError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotConnected => write!(f, "Not connected"),
            Self::Protocol(e) => write!(f, "{}", e),
        }
    }
}

impl core::error::Error for SessionError {}

pub struct Session<'a, C, P> {
    engine: &'a mut P,
    notifier: &'a EventBridge,
    meter: &'a ReadMeter,
    io_timeout_ms: u32,
    lost: bool,
    _channel: PhantomData<C>,
}

impl<'a, C, P> Session<'a, C, P>
where
    C: Connection,
    P: ProtocolEngine<C>,
{
    /// `meter` must count the reads of the channel handed to `connect`.
    pub fn new(
        engine: &'a mut P,
        notifier: &'a EventBridge,
        meter: &'a ReadMeter,
        io_timeout_ms: u32,
    ) -> Self {
        Self {
            engine,
            notifier,
            meter,
            io_timeout_ms,
            lost: false,
            _channel: PhantomData,
        }
    }

    /// Whether connectivity loss has been signaled for this session
    pub fn is_lost(&self) -> bool {
        self.lost
    }

    fn fail(&mut self, e: ProtocolError) -> SessionError {
        if e.is_link_fatal() && !self.lost {
            self.lost = true;
            warn!("Session channel failed: {}", e);
            self.notifier.post();
        }
        SessionError::Protocol(e)
    }

    fn ensure_live(&self) -> Result<(), SessionError> {
        if self.lost {
            Err(SessionError::NotConnected)
        } else {
            Ok(())
        }
    }

    /// Hand `channel` to the engine and perform CONNECT.
    pub async fn connect<D: DelayNs>(
        &mut self,
        channel: C,
        options: &ConnectOptions<'_>,
        delay: &mut D,
    ) -> Result<(), SessionError> {
        self.ensure_live()?;
        info!("Connecting session as '{}'", options.client_id);
        match with_timeout(delay, self.io_timeout_ms, self.engine.connect(channel, options)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(self.fail(e)),
            Err(_) => Err(self.fail(ProtocolError::Timeout)),
        }
    }

    pub async fn publish<D: DelayNs>(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        delay: &mut D,
    ) -> Result<(), SessionError> {
        self.ensure_live()?;
        match with_timeout(
            delay,
            self.io_timeout_ms,
            self.engine.publish(topic, payload, qos),
        )
        .await
        {
            Ok(Ok(())) => {
                debug!("Published {} bytes to '{}'", payload.len(), topic);
                Ok(())
            }
            Ok(Err(e)) => Err(self.fail(e)),
            Err(_) => Err(self.fail(ProtocolError::Timeout)),
        }
    }

    /// Subscribe to `filter`; returns the granted QoS.
    pub async fn subscribe<D: DelayNs>(
        &mut self,
        filter: &str,
        qos: QoS,
        delay: &mut D,
    ) -> Result<QoS, SessionError> {
        self.ensure_live()?;
        match with_timeout(delay, self.io_timeout_ms, self.engine.subscribe(filter, qos)).await {
            Ok(Ok(granted)) => {
                if granted < qos {
                    warn!(
                        "Broker downgraded '{}' from QoS {} to QoS {}",
                        filter, qos as u8, granted as u8
                    );
                }
                Ok(granted)
            }
            Ok(Err(e)) => Err(self.fail(e)),
            Err(_) => Err(self.fail(ProtocolError::Timeout)),
        }
    }

    /// Wait for inbound traffic until `idle_ms` pass or `interrupt` fires.
    ///
    /// When the wait ends after the engine already read part of a packet,
    /// that packet is finished first (bounded by the I/O timeout) so the
    /// stream never loses sync. Returns `Ok(None)` when the wait ended or
    /// only control traffic was handled.
    pub async fn poll<D, I>(
        &mut self,
        delay: &mut D,
        idle_ms: u32,
        interrupt: I,
    ) -> Result<Option<InboundMessage>, SessionError>
    where
        D: DelayNs,
        I: Future,
    {
        self.ensure_live()?;
        let io_timeout_ms = self.io_timeout_ms;
        let start = self.meter.count();

        let outcome = {
            let mut poll = pin!(self.engine.poll());
            let first = select(poll.as_mut(), select(interrupt, delay.delay_ms(idle_ms))).await;
            match first {
                Either::First(result) => Some(result),
                Either::Second(_) if self.meter.count() == start => None,
                Either::Second(_) => {
                    debug!("Finishing inbound packet before yielding");
                    Some(
                        with_timeout(delay, io_timeout_ms, poll)
                            .await
                            .unwrap_or(Err(ProtocolError::Timeout)),
                    )
                }
            }
        };

        match outcome {
            None => Ok(None),
            Some(Ok(message)) => Ok(message),
            Some(Err(e)) => Err(self.fail(e)),
        }
    }

    /// Send DISCONNECT, best effort.
    pub async fn disconnect<D: DelayNs>(&mut self, delay: &mut D) {
        if self.lost {
            return;
        }
        match with_timeout(delay, self.io_timeout_ms, self.engine.disconnect()).await {
            Ok(Ok(())) => info!("Session disconnected"),
            Ok(Err(e)) => debug!("DISCONNECT failed: {}", e),
            Err(_) => debug!("DISCONNECT timed out"),
        }
    }

    /// Drop protocol state and close the channel.
    pub fn close(self) {
        if let Some(mut channel) = self.engine.release() {
            channel.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;
    use embedded_io_async::{ErrorType, Read, Write};
    use hal_abstractions::TransportError;

    struct NullConnection;

    impl ErrorType for NullConnection {
        type Error = TransportError;
    }

    impl Read for NullConnection {
        async fn read(&mut self, _buf: &mut [u8]) -> Result<usize, TransportError> {
            Ok(0)
        }
    }

    impl Write for NullConnection {
        async fn write(&mut self, buf: &[u8]) -> Result<usize, TransportError> {
            Ok(buf.len())
        }

        async fn flush(&mut self) -> Result<(), TransportError> {
            Ok(())
        }
    }

    impl Connection for NullConnection {
        fn close(&mut self) {}
    }

    struct InstantDelay;

    impl DelayNs for InstantDelay {
        async fn delay_ns(&mut self, _ns: u32) {}
    }

    enum PollMode {
        Fail(ProtocolError),
        Hang,
        /// Read part of a packet from the wire, then never finish it
        HangMidPacket,
    }

    struct ScriptedEngine<'m> {
        meter: &'m ReadMeter,
        mode: PollMode,
        calls: u32,
    }

    impl<'m> ScriptedEngine<'m> {
        fn new(meter: &'m ReadMeter, mode: PollMode) -> Self {
            Self {
                meter,
                mode,
                calls: 0,
            }
        }
    }

    impl ProtocolEngine<NullConnection> for ScriptedEngine<'_> {
        async fn connect(
            &mut self,
            _channel: NullConnection,
            _options: &ConnectOptions<'_>,
        ) -> Result<(), ProtocolError> {
            self.calls += 1;
            Ok(())
        }

        async fn publish(&mut self, _topic: &str, _payload: &[u8], _qos: QoS) -> Result<(), ProtocolError> {
            self.calls += 1;
            Ok(())
        }

        async fn subscribe(&mut self, _filter: &str, qos: QoS) -> Result<QoS, ProtocolError> {
            self.calls += 1;
            Ok(qos)
        }

        async fn poll(&mut self) -> Result<Option<InboundMessage>, ProtocolError> {
            self.calls += 1;
            match self.mode {
                PollMode::Fail(e) => Err(e),
                PollMode::Hang => core::future::pending().await,
                PollMode::HangMidPacket => {
                    self.meter.record(2);
                    core::future::pending().await
                }
            }
        }

        async fn disconnect(&mut self) -> Result<(), ProtocolError> {
            self.calls += 1;
            Ok(())
        }

        fn release(&mut self) -> Option<NullConnection> {
            None
        }
    }

    #[test]
    fn test_channel_failure_posts_loss_once() {
        let bridge = EventBridge::new();
        let meter = ReadMeter::new();
        let mut engine = ScriptedEngine::new(&meter, PollMode::Fail(ProtocolError::ConnectionLost));
        let mut delay = InstantDelay;
        let mut session: Session<'_, NullConnection, _> =
            Session::new(&mut engine, &bridge, &meter, 1_000);

        assert_eq!(
            block_on(session.poll(&mut delay, 500, core::future::pending::<()>())),
            Err(SessionError::Protocol(ProtocolError::ConnectionLost))
        );
        assert!(session.is_lost());
        assert!(bridge.try_take());

        assert_eq!(
            block_on(session.publish("a/b", b"x", QoS::AtMostOnce, &mut delay)),
            Err(SessionError::NotConnected)
        );
        assert_eq!(
            block_on(session.poll(&mut delay, 500, core::future::pending::<()>())),
            Err(SessionError::NotConnected)
        );
        assert!(!bridge.try_take());
        session.close();
        assert_eq!(engine.calls, 1);
    }

    #[test]
    fn test_rejected_subscription_keeps_session() {
        struct Rejecting;

        impl ProtocolEngine<NullConnection> for Rejecting {
            async fn connect(&mut self, _: NullConnection, _: &ConnectOptions<'_>) -> Result<(), ProtocolError> {
                Ok(())
            }
            async fn publish(&mut self, _: &str, _: &[u8], _: QoS) -> Result<(), ProtocolError> {
                Ok(())
            }
            async fn subscribe(&mut self, _: &str, _: QoS) -> Result<QoS, ProtocolError> {
                Err(ProtocolError::SubscriptionRejected)
            }
            async fn poll(&mut self) -> Result<Option<InboundMessage>, ProtocolError> {
                Ok(None)
            }
            async fn disconnect(&mut self) -> Result<(), ProtocolError> {
                Ok(())
            }
            fn release(&mut self) -> Option<NullConnection> {
                None
            }
        }

        let bridge = EventBridge::new();
        let meter = ReadMeter::new();
        let mut engine = Rejecting;
        let mut session: Session<'_, NullConnection, _> =
            Session::new(&mut engine, &bridge, &meter, 1_000);
        assert_eq!(
            block_on(session.subscribe("a/#", QoS::AtLeastOnce, &mut InstantDelay)),
            Err(SessionError::Protocol(ProtocolError::SubscriptionRejected))
        );
        assert!(!session.is_lost());
        assert!(!bridge.is_pending());
    }

    #[test]
    fn test_idle_poll_yields_between_packets() {
        let bridge = EventBridge::new();
        let meter = ReadMeter::new();
        let mut engine = ScriptedEngine::new(&meter, PollMode::Hang);
        let mut session: Session<'_, NullConnection, _> =
            Session::new(&mut engine, &bridge, &meter, 1_000);

        assert_eq!(
            block_on(session.poll(&mut InstantDelay, 500, core::future::pending::<()>())),
            Ok(None)
        );
        assert_eq!(block_on(session.poll(&mut InstantDelay, 500, async {})), Ok(None));
        assert!(!session.is_lost());
        assert!(!bridge.is_pending());
    }

    #[test]
    fn test_stalled_packet_times_out_as_loss() {
        let bridge = EventBridge::new();
        let meter = ReadMeter::new();
        let mut engine = ScriptedEngine::new(&meter, PollMode::HangMidPacket);
        let mut session: Session<'_, NullConnection, _> =
            Session::new(&mut engine, &bridge, &meter, 1_000);

        assert_eq!(
            block_on(session.poll(&mut InstantDelay, 500, async {})),
            Err(SessionError::Protocol(ProtocolError::Timeout))
        );
        assert!(session.is_lost());
        assert!(bridge.try_take());
    }
}
