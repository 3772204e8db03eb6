//! Per-node broadcast endpoint.
//!
//! Each node owns one endpoint with:
//! - a send socket connected to the broadcast address
//! - a receive socket bound to the node's own address
//!
//! The send path is driven by `SimEvent::Send` events: it stamps the current
//! simulated time into a payload, encodes it and hands it to the transport.
//! The receive path is driven by `SimEvent::Deliver`: it decodes the payload,
//! takes element 0 as the origination time and reports a `DeliveryRecord`.
//! Neither path keeps state between invocations.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

use super::codec::PayloadCodec;
use super::scheduler::Scheduler;
use super::socket::{BroadcastTransport, ReceiveSocket, SendSocket};
use super::types::{DeliveryRecord, NodeId, ReceivedPacket, SendRecord, SimEvent, as_seconds};

/// Local port used by send sockets.
const SEND_SOCKET_PORT: u16 = 49153;

/// Receiver side of the transport boundary. The medium delivers packets by
/// calling this directly, so endpoints can be exercised without a scheduler.
pub trait ReceiveHandler {
    /// Handle one arrived packet. Returns `None` when the packet is dropped.
    fn on_receive(&self, packet: ReceivedPacket) -> Option<DeliveryRecord>;
}

#[derive(Debug, Clone)]
pub struct BroadcastEndpoint {
    node_id: NodeId,
    send_socket: SendSocket,
    receive_socket: ReceiveSocket,
    codec: PayloadCodec,
    /// Extra values appended after the timestamp of every payload.
    aux_fields: Vec<f64>,
}

impl BroadcastEndpoint {
    /// Create the endpoint for `node_id` and wire up both sockets.
    pub fn new(node_id: NodeId, address: Ipv4Addr, port: u16, codec: PayloadCodec, aux_fields: Vec<f64>) -> Self {
        let mut receive_socket = ReceiveSocket::new();
        receive_socket.bind(SocketAddrV4::new(address, port));

        let mut send_socket = SendSocket::new(node_id, SocketAddrV4::new(address, SEND_SOCKET_PORT));
        send_socket.set_allow_broadcast(true);
        send_socket.connect(SocketAddrV4::new(Ipv4Addr::BROADCAST, port));

        Self {
            node_id,
            send_socket,
            receive_socket,
            codec,
            aux_fields,
        }
    }

    pub fn send_socket(&self) -> &SendSocket {
        &self.send_socket
    }

    pub fn receive_socket(&self) -> &ReceiveSocket {
        &self.receive_socket
    }

    /// Payload for a send at `now`: the timestamp followed by the auxiliary fields.
    pub fn build_payload(&self, now: Duration) -> Vec<f64> {
        let mut payload = Vec::with_capacity(1 + self.aux_fields.len());
        payload.push(as_seconds(now));
        payload.extend_from_slice(&self.aux_fields);
        payload
    }

    /// Fire one broadcast. Fire-and-forget: no retry or acknowledgement.
    ///
    /// Returns `None` if the transport refused the packet; the failure is
    /// logged and never reaches the scheduler.
    pub fn handle_send(&self, now: Duration, transport: &mut dyn BroadcastTransport) -> Option<SendRecord> {
        log::debug!("{}s Creating one packet! at node {}", as_seconds(now), self.node_id);
        let bytes = self.codec.encode(&self.build_payload(now));
        let packet_size = bytes.len();

        if let Err(err) = transport.send(&self.send_socket, bytes) {
            log::warn!("{}s node {} failed to send: {}", as_seconds(now), self.node_id, err);
            return None;
        }

        log::debug!("{}s sending one packet! at node {}", as_seconds(now), self.node_id);
        Some(SendRecord {
            node_id: self.node_id,
            timestamp: as_seconds(now),
            packet_size,
        })
    }
}

impl ReceiveHandler for BroadcastEndpoint {
    fn on_receive(&self, packet: ReceivedPacket) -> Option<DeliveryRecord> {
        let now = as_seconds(packet.timestamp);
        if packet.node_id != self.node_id {
            log::warn!("{}s node {} dropped packet addressed to node {}", now, self.node_id, packet.node_id);
            return None;
        }
        let payload = match self.codec.decode(&packet.bytes) {
            Ok(payload) => payload,
            Err(err) => {
                log::warn!("{}s node {} dropped packet from {}: {}", now, self.node_id, packet.from, err);
                return None;
            }
        };
        let send_time = *payload.first()?;

        log::info!("{}s Received one packet! at node {} sent at time: {}", now, self.node_id, send_time);
        Some(DeliveryRecord {
            node_id: self.node_id,
            origin_timestamp: send_time,
            receipt_timestamp: now,
        })
    }
}

/// Register a one-shot broadcast from `node_id` at `fire_time`.
///
/// May be called any number of times for the same node.
pub fn schedule_send(scheduler: &mut Scheduler<SimEvent>, node_id: NodeId, fire_time: Duration) {
    scheduler.schedule_at(fire_time, SimEvent::Send { node_id });
}
