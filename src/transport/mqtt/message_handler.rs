//! Pure routing of rumqttc events
//!
//! Every event polled from the rumqttc event loop is classified here before
//! the session pump acts on it. Nothing in this module performs I/O.

use crate::transport::QosLevel;
use bytes::Bytes;
use rumqttc::v5::mqttbytes::v5::{
    Packet, PubAckReason, PubCompReason, SubscribeReasonCode, UnsubAckReason,
};
use rumqttc::v5::Event;
use rumqttc::Outgoing;

/// Request handed to the network, with the packet id the event loop assigned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SentRequest {
    Subscribe(u16),
    Unsubscribe(u16),
    Publish(u16),
}

/// Broker acknowledgement for an earlier request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ack {
    Subscribe { pkid: u16, outcome: Result<(), String> },
    Unsubscribe { pkid: u16, outcome: Result<(), String> },
    /// PubAck for QoS 1
    PublishAck { pkid: u16, outcome: Result<(), String> },
    /// PubComp for QoS 2
    PublishComplete { pkid: u16, outcome: Result<(), String> },
}

/// Routing decisions for rumqttc events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    ConnectionAcknowledged,
    MessageReceived {
        topic: String,
        payload: Bytes,
        qos: QosLevel,
        retain: bool,
    },
    /// Broker closed the session
    Disconnected(String),
    /// Our own DISCONNECT went out
    ClosedLocally,
    RequestSent(SentRequest),
    Acknowledged(Ack),
    /// PingResp and friends
    InfrastructureEvent(String),
}

pub struct MessageHandler;

impl MessageHandler {
    pub fn route_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(packet) => Self::route_incoming(packet),
            Event::Outgoing(outgoing) => match outgoing {
                Outgoing::Subscribe(pkid) => EventRoute::RequestSent(SentRequest::Subscribe(*pkid)),
                Outgoing::Unsubscribe(pkid) => {
                    EventRoute::RequestSent(SentRequest::Unsubscribe(*pkid))
                }
                Outgoing::Publish(pkid) => EventRoute::RequestSent(SentRequest::Publish(*pkid)),
                Outgoing::Disconnect => EventRoute::ClosedLocally,
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
        }
    }

    fn route_incoming(packet: &Packet) -> EventRoute {
        match packet {
            Packet::ConnAck(_) => EventRoute::ConnectionAcknowledged,
            Packet::Publish(publish) => EventRoute::MessageReceived {
                topic: String::from_utf8_lossy(&publish.topic).to_string(),
                payload: publish.payload.clone(),
                qos: Self::qos_from_rumqttc(publish.qos),
                retain: publish.retain,
            },
            Packet::Disconnect(disconnect) => EventRoute::Disconnected(format!(
                "Broker closed the session: {:?}",
                disconnect.reason_code
            )),
            Packet::SubAck(suback) => EventRoute::Acknowledged(Ack::Subscribe {
                pkid: suback.pkid,
                outcome: Self::validate_subscription_success(&suback.return_codes),
            }),
            Packet::UnsubAck(unsuback) => EventRoute::Acknowledged(Ack::Unsubscribe {
                pkid: unsuback.pkid,
                outcome: if unsuback
                    .reasons
                    .iter()
                    .all(|r| matches!(r, UnsubAckReason::Success))
                {
                    Ok(())
                } else {
                    Err(format!("Unsubscribe rejected: {:?}", unsuback.reasons))
                },
            }),
            Packet::PubAck(puback) => EventRoute::Acknowledged(Ack::PublishAck {
                pkid: puback.pkid,
                outcome: match puback.reason {
                    PubAckReason::Success | PubAckReason::NoMatchingSubscribers => Ok(()),
                    ref other => Err(format!("Publish rejected: {other:?}")),
                },
            }),
            Packet::PubComp(pubcomp) => EventRoute::Acknowledged(Ack::PublishComplete {
                pkid: pubcomp.pkid,
                outcome: match pubcomp.reason {
                    PubCompReason::Success => Ok(()),
                    ref other => Err(format!("Publish rejected: {other:?}")),
                },
            }),
            other => EventRoute::InfrastructureEvent(format!("{other:?}")),
        }
    }

    /// A SubAck succeeds only if every filter was granted
    pub fn validate_subscription_success(codes: &[SubscribeReasonCode]) -> Result<(), String> {
        if codes
            .iter()
            .all(|code| matches!(code, SubscribeReasonCode::Success(_)))
        {
            Ok(())
        } else {
            Err(format!("Subscription failed with reason codes: {codes:?}"))
        }
    }

    pub fn qos_from_rumqttc(qos: rumqttc::v5::mqttbytes::QoS) -> QosLevel {
        use rumqttc::v5::mqttbytes::QoS;
        match qos {
            QoS::AtMostOnce => QosLevel::AtMostOnce,
            QoS::AtLeastOnce => QosLevel::AtLeastOnce,
            QoS::ExactlyOnce => QosLevel::ExactlyOnce,
        }
    }
}
