//! Range-limited shared broadcast medium.
//!
//! A broadcast reaches every other node whose receive socket accepts the
//! destination and whose distance from the sender is at most `max_range` at
//! the moment of sending. Each reachable node gets its own `Deliver` event
//! after `propagation_delay`. Nodes out of range simply get nothing.

use serde::Serialize;
use std::time::Duration;

use super::geometry::{distance2, distance_from_d2};
use super::scheduler::Scheduler;
use super::socket::{BroadcastTransport, ReceiveSocket, SendSocket, TransportError};
use super::types::{NodeId, Point, ReceivedPacket, SimEvent};

/// Propagation model: all-or-nothing reception inside `max_range` meters.
#[derive(Debug, Clone, PartialEq)]
pub struct RangePropagation {
    pub max_range: f64,
    pub propagation_delay: Duration,
}

impl RangePropagation {
    pub fn new(max_range: f64, propagation_delay: Duration) -> Self {
        Self { max_range, propagation_delay }
    }

    /// Inclusive range check on squared distance.
    pub fn in_range(&self, a: &Point, b: &Point) -> bool {
        distance2(a, b) <= self.max_range * self.max_range
    }
}

/// Running totals for the medium.
#[derive(Debug, Serialize, Clone, Default, PartialEq, Eq)]
pub struct MediumCounters {
    /// Broadcasts put on the medium.
    pub transmitted: u64,
    /// Copies handed to receivers.
    pub delivered: u64,
    /// Candidate receivers skipped because they were out of range.
    pub out_of_range: u64,
}

/// A node's receive side as seen by the medium at send time.
pub struct Listener<'a> {
    pub node_id: NodeId,
    pub position: Point,
    pub socket: &'a ReceiveSocket,
}

/// One send's view of the medium: who is listening where, and the scheduler
/// to queue arrivals on.
pub struct MediumTransmission<'a> {
    pub propagation: &'a RangePropagation,
    pub listeners: &'a [Listener<'a>],
    pub scheduler: &'a mut Scheduler<SimEvent>,
    pub counters: &'a mut MediumCounters,
}

impl<'a> MediumTransmission<'a> {
    /// Nodes that would hear a broadcast to the socket's destination.
    ///
    /// The sender is excluded. Order follows the listener slice.
    fn find_target_nodes(&mut self, sender_id: NodeId, sender_position: &Point, socket: &SendSocket) -> Result<Vec<NodeId>, TransportError> {
        let destination = socket.destination()?;
        let mut target_ids = Vec::new();

        for listener in self.listeners {
            if listener.node_id == sender_id || !listener.socket.accepts(&destination) {
                continue;
            }
            if self.propagation.in_range(sender_position, &listener.position) {
                target_ids.push(listener.node_id);
            } else {
                self.counters.out_of_range += 1;
                log::trace!(
                    "Node {} out of range of node {} ({:.2} m > {} m)",
                    listener.node_id,
                    sender_id,
                    distance_from_d2(distance2(sender_position, &listener.position)),
                    self.propagation.max_range
                );
            }
        }

        Ok(target_ids)
    }
}

impl BroadcastTransport for MediumTransmission<'_> {
    fn send(&mut self, socket: &SendSocket, bytes: Vec<u8>) -> Result<(), TransportError> {
        let sender_id = socket.node_id();
        let sender_position = self
            .listeners
            .iter()
            .find(|l| l.node_id == sender_id)
            .map(|l| l.position)
            .ok_or(TransportError::UnknownNode(sender_id))?;

        let target_ids = self.find_target_nodes(sender_id, &sender_position, socket)?;
        self.counters.transmitted += 1;

        let delay = self.propagation.propagation_delay;
        let arrival = self.scheduler.now().saturating_add(delay);
        for target_id in target_ids {
            self.scheduler.schedule_in(
                delay,
                SimEvent::Deliver(ReceivedPacket {
                    node_id: target_id,
                    bytes: bytes.clone(),
                    timestamp: arrival,
                    from: socket.local_addr(),
                }),
            );
            self.counters.delivered += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::socket::DEFAULT_PORT;
    use std::net::{Ipv4Addr, SocketAddrV4};

    fn receive_socket(host: u8) -> ReceiveSocket {
        let mut socket = ReceiveSocket::new();
        socket.bind(SocketAddrV4::new(Ipv4Addr::new(10, 1, 3, host), DEFAULT_PORT));
        socket
    }

    fn broadcast_socket(node_id: NodeId) -> SendSocket {
        let mut socket = SendSocket::new(node_id, SocketAddrV4::new(Ipv4Addr::new(10, 1, 3, node_id as u8 + 1), 49153));
        socket.set_allow_broadcast(true);
        socket.connect(SocketAddrV4::new(Ipv4Addr::BROADCAST, DEFAULT_PORT));
        socket
    }

    fn delivered_to(scheduler: &mut Scheduler<SimEvent>) -> Vec<(Duration, NodeId)> {
        std::iter::from_fn(|| scheduler.next_event())
            .map(|(at, event)| match event {
                SimEvent::Deliver(packet) => (at, packet.node_id),
                other => panic!("unexpected event {other:?}"),
            })
            .collect()
    }

    #[test]
    fn delivers_only_within_range_and_not_to_sender() {
        let sockets = [receive_socket(1), receive_socket(2), receive_socket(3)];
        let listeners = [
            Listener { node_id: 0, position: Point::new(0.0, 0.0), socket: &sockets[0] },
            Listener { node_id: 1, position: Point::new(30.0, 0.0), socket: &sockets[1] },
            Listener { node_id: 2, position: Point::new(30.1, 0.0), socket: &sockets[2] },
        ];
        let propagation = RangePropagation::new(30.0, Duration::ZERO);
        let mut scheduler = Scheduler::new();
        let mut counters = MediumCounters::default();

        let mut transmission = MediumTransmission {
            propagation: &propagation,
            listeners: &listeners,
            scheduler: &mut scheduler,
            counters: &mut counters,
        };
        transmission.send(&broadcast_socket(0), b"0\0".to_vec()).unwrap();

        assert_eq!(delivered_to(&mut scheduler), vec![(Duration::ZERO, 1)]);
        assert_eq!(
            counters,
            MediumCounters {
                transmitted: 1,
                delivered: 1,
                out_of_range: 1
            }
        );
    }

    #[test]
    fn arrivals_are_delayed_by_propagation() {
        let sockets = [receive_socket(1), receive_socket(2)];
        let listeners = [
            Listener { node_id: 0, position: Point::new(0.0, 0.0), socket: &sockets[0] },
            Listener { node_id: 1, position: Point::new(1.0, 0.0), socket: &sockets[1] },
        ];
        let propagation = RangePropagation::new(30.0, Duration::from_micros(50));
        let mut scheduler = Scheduler::new();
        let mut counters = MediumCounters::default();

        let mut transmission = MediumTransmission {
            propagation: &propagation,
            listeners: &listeners,
            scheduler: &mut scheduler,
            counters: &mut counters,
        };
        transmission.send(&broadcast_socket(0), b"0\0".to_vec()).unwrap();

        assert_eq!(delivered_to(&mut scheduler), vec![(Duration::from_micros(50), 1)]);
    }

    #[test]
    fn unknown_sender_is_rejected() {
        let sockets = [receive_socket(1)];
        let listeners = [Listener { node_id: 0, position: Point::new(0.0, 0.0), socket: &sockets[0] }];
        let propagation = RangePropagation::new(30.0, Duration::ZERO);
        let mut scheduler = Scheduler::new();
        let mut counters = MediumCounters::default();

        let mut transmission = MediumTransmission {
            propagation: &propagation,
            listeners: &listeners,
            scheduler: &mut scheduler,
            counters: &mut counters,
        };
        assert_eq!(transmission.send(&broadcast_socket(9), b"0\0".to_vec()), Err(TransportError::UnknownNode(9)));
        assert_eq!(counters.transmitted, 0);
    }
}
