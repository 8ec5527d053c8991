//! Pure routing of MQTT event loop events
//!
//! The session supervisor only cares about a handful of packets: the
//! CONNACK, outgoing publishes (which carry the packet id assigned by the
//! client), PUBACKs and disconnects.

use rumqttc::{Event, Outgoing, Packet};

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// Connection acknowledged - ready to publish
    ConnectionAcknowledged { session_present: bool },
    /// A QoS 1 publish left the client with this packet id
    PublishSent(u16),
    /// Broker acknowledged the publish with this packet id
    PublishAcknowledged(u16),
    /// Keep-alive answered
    PingResponse,
    /// Broker sent DISCONNECT
    Disconnected,
    /// Our DISCONNECT has been written
    DisconnectSent,
    /// Anything else, for trace logging
    Other(String),
}

/// Route MQTT event to the supervisor action (pure function)
pub fn route_event(event: &Event) -> EventRoute {
    match event {
        Event::Incoming(Packet::ConnAck(connack)) => EventRoute::ConnectionAcknowledged {
            session_present: connack.session_present,
        },
        Event::Incoming(Packet::PubAck(puback)) => EventRoute::PublishAcknowledged(puback.pkid),
        Event::Incoming(Packet::PingResp) => EventRoute::PingResponse,
        Event::Incoming(Packet::Disconnect) => EventRoute::Disconnected,
        Event::Outgoing(Outgoing::Publish(pkid)) => EventRoute::PublishSent(*pkid),
        Event::Outgoing(Outgoing::Disconnect) => EventRoute::DisconnectSent,
        other => EventRoute::Other(format!("{other:?}")),
    }
}
