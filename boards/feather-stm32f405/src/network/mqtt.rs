#![allow(unsafe_code)] // Required for MQTT buffer access and pre-validated topics
//! MQTT v5.0 engine on top of rust-mqtt
//!
//! The supervisor validates every topic before it reaches this module, so
//! topic names and filters are built with the unchecked constructors.
//!
//! # Memory Management
//!
//! Packets are assembled in a 2 KB bump buffer (see `net_buffers`); a new
//! client and a fresh buffer are created for every connection.
//!
//! # Polling
//!
//! The supervisor only drops a poll that has not read anything from the
//! socket yet. Once the first byte of a TLS record is in, the poll runs to
//! the end of the packet, so neither embedded-tls nor rust-mqtt ever sees
//! a record or packet cut in half.

use defmt::{debug, info, warn, Debug2Format};
use hal_abstractions::{
    ConnectOptions, ConnectRefusal, Connection, InboundMessage, ProtocolEngine, ProtocolError, QoS,
    TransportError,
};
use heapless::{String, Vec};
use rust_mqtt::{
    buffer::BumpBuffer,
    client::{
        event::Event,
        options::{
            ConnectOptions as MqttConnectOptions, PublicationOptions, SubscriptionOptions,
            TopicReference,
        },
        Client, MqttError,
    },
    config::{KeepAlive, SessionExpiryInterval},
    types::{MqttBinary, MqttString, QoS as MqttQoS, TopicFilter, TopicName},
    Bytes,
};

use crate::net_buffers;

/// Concurrent subscriptions the client tracks
const MAX_SUBSCRIBES: usize = 4;

type MqttClient<C> = Client<'static, C, BumpBuffer<'static>, MAX_SUBSCRIBES, 1, 1, 0>;

fn to_mqtt(qos: QoS) -> MqttQoS {
    match qos {
        QoS::AtMostOnce => MqttQoS::AtMostOnce,
        QoS::AtLeastOnce => MqttQoS::AtLeastOnce,
        QoS::ExactlyOnce => MqttQoS::ExactlyOnce,
    }
}

fn from_mqtt(qos: MqttQoS) -> QoS {
    match qos {
        MqttQoS::AtMostOnce => QoS::AtMostOnce,
        MqttQoS::AtLeastOnce => QoS::AtLeastOnce,
        MqttQoS::ExactlyOnce => QoS::ExactlyOnce,
    }
}

fn string(s: &str) -> Result<MqttString<'_>, ProtocolError> {
    MqttString::new(s.into()).map_err(|e| {
        warn!("Invalid MQTT string: {:?}", Debug2Format(&e));
        ProtocolError::Malformed
    })
}

/// Sort a rust-mqtt error into the failure the supervisor acts on
fn client_error(e: &MqttError<'_>) -> ProtocolError {
    match e {
        MqttError::Network(kind) => TransportError::from(*kind).into(),
        // CONNACK refusals and server DISCONNECTs carry a reason code
        MqttError::Disconnect { reason, .. } => match ConnectRefusal::from_reason_code(*reason as u8) {
            Some(refusal) => ProtocolError::Refused(refusal),
            None => ProtocolError::ConnectionLost,
        },
        MqttError::Alloc(_) => ProtocolError::BufferTooSmall,
        _ => ProtocolError::Malformed,
    }
}

/// rust-mqtt behind the `ProtocolEngine` seam
pub struct MqttEngine<C> {
    client: Option<MqttClient<C>>,
}

impl<C> MqttEngine<C> {
    pub const fn new() -> Self {
        Self { client: None }
    }

    fn client(&mut self) -> Result<&mut MqttClient<C>, ProtocolError> {
        self.client.as_mut().ok_or(ProtocolError::ConnectionLost)
    }
}

impl<C> Default for MqttEngine<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Connection> ProtocolEngine<C> for MqttEngine<C> {
    async fn connect(&mut self, channel: C, options: &ConnectOptions<'_>) -> Result<(), ProtocolError> {
        self.client = None;

        // SAFETY: the previous client, and with it the previous borrow of
        // the buffer, was dropped just above.
        let buffer = unsafe { net_buffers::mqtt_buffer() };
        let mut client = MqttClient::<C>::new(buffer);

        let password = match options.password {
            Some(p) => Some(MqttBinary::new(p.into()).map_err(|_| ProtocolError::Malformed)?),
            None => None,
        };
        let user_name = match options.username {
            Some(u) => Some(string(u)?),
            None => None,
        };
        let connect_opts = MqttConnectOptions {
            session_expiry_interval: SessionExpiryInterval::EndOnDisconnect,
            clean_start: options.clean_session,
            keep_alive: if options.keep_alive_secs == 0 {
                KeepAlive::Infinite
            } else {
                KeepAlive::Seconds(options.keep_alive_secs)
            },
            will: None,
            user_name,
            password,
        };

        client
            .connect(channel, &connect_opts, Some(string(options.client_id)?))
            .await
            .map_err(|e| {
                warn!("MQTT connect failed: {:?}", Debug2Format(&e));
                client_error(&e)
            })?;

        info!("MQTT connection established as {}", options.client_id);
        self.client = Some(client);
        Ok(())
    }

    async fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS) -> Result<(), ProtocolError> {
        // SAFETY: topic names are validated by the supervisor's link: no
        // wildcards, no NUL, within MAX_TOPIC_LEN.
        let topic_name = unsafe { TopicName::new_unchecked(string(topic)?) };
        let options = PublicationOptions {
            retain: false,
            message_expiry_interval: None,
            topic: TopicReference::Name(topic_name),
            qos: to_mqtt(qos),
        };

        let packet_id = self
            .client()?
            .publish(&options, Bytes::from(payload))
            .await
            .map_err(|e| {
                warn!("MQTT publish failed: {:?}", Debug2Format(&e));
                client_error(&e)
            })?;
        debug!("Published to '{}' (packet_id: {})", topic, packet_id);
        Ok(())
    }

    async fn subscribe(&mut self, filter: &str, qos: QoS) -> Result<QoS, ProtocolError> {
        // SAFETY: filters are validated by the supervisor configuration and
        // link before they get here.
        let topic_filter = unsafe { TopicFilter::new_unchecked(string(filter)?) };
        let options = SubscriptionOptions {
            qos: to_mqtt(qos),
            ..Default::default()
        };

        self.client()?
            .subscribe(topic_filter, options)
            .await
            .map(from_mqtt)
            .map_err(|e| {
                warn!("MQTT subscribe to '{}' failed: {:?}", filter, Debug2Format(&e));
                match e {
                    MqttError::Network(_) | MqttError::Disconnect { .. } => client_error(&e),
                    _ => ProtocolError::SubscriptionRejected,
                }
            })
    }

    async fn poll(&mut self) -> Result<Option<InboundMessage>, ProtocolError> {
        let event = self.client()?.poll().await.map_err(|e| {
            warn!("MQTT poll failed: {:?}", Debug2Format(&e));
            client_error(&e)
        })?;

        match event {
            Event::Publish(publish) => {
                let topic = String::try_from(publish.topic.as_ref())
                    .map_err(|_| ProtocolError::BufferTooSmall)?;
                let payload = Vec::from_slice(publish.message.as_ref())
                    .map_err(|_| ProtocolError::BufferTooSmall)?;
                Ok(Some(InboundMessage {
                    topic,
                    payload,
                    qos: from_mqtt(publish.qos),
                }))
            }
            other => {
                debug!("MQTT control event: {:?}", Debug2Format(&other));
                Ok(None)
            }
        }
    }

    async fn disconnect(&mut self) -> Result<(), ProtocolError> {
        self.client()?.disconnect().await.map_err(|e| {
            debug!("MQTT disconnect failed: {:?}", Debug2Format(&e));
            client_error(&e)
        })
    }

    fn release(&mut self) -> Option<C> {
        // The client owns the channel; dropping it drops the channel too.
        self.client = None;
        None
    }
}
