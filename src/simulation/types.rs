//! Type definitions for the simulation.
//!
//! Contains the data structures shared across the simulation:
//! - Node identity and positions
//! - Scheduler events and the packet envelope handed to receivers
//! - Send and delivery records emitted by the endpoints

use serde::{Deserialize, Serialize};
use std::net::SocketAddrV4;
use std::time::Duration;

use super::endpoint::BroadcastEndpoint;
use super::mobility::Mobility;

/// Node index, assigned in creation order starting at 0.
pub type NodeId = u32;

/// Simple 2D point in meters.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// A packet handed to a receiving node by the broadcast medium.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedPacket {
    /// Receiving node.
    pub node_id: NodeId,
    /// Raw payload bytes as transmitted.
    pub bytes: Vec<u8>,
    /// Simulated arrival time.
    pub timestamp: Duration,
    /// Source address of the transmitting socket.
    pub from: SocketAddrV4,
}

/// Events dispatched by the simulation loop.
#[derive(Debug, Clone, PartialEq)]
pub enum SimEvent {
    /// A node's scheduled broadcast fires.
    Send { node_id: NodeId },
    /// A broadcast copy reaches a node within range.
    Deliver(ReceivedPacket),
}

/// Log record of one broadcast.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct SendRecord {
    pub node_id: NodeId,
    /// Simulated send time in seconds.
    pub timestamp: f64,
    /// Encoded packet size in bytes.
    pub packet_size: usize,
}

/// Log record correlating a received payload back to its origination time.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct DeliveryRecord {
    /// Receiving node.
    pub node_id: NodeId,
    /// Timestamp carried in element 0 of the payload.
    pub origin_timestamp: f64,
    /// Simulated time the packet was handled.
    pub receipt_timestamp: f64,
}

impl DeliveryRecord {
    pub fn latency(&self) -> f64 {
        self.receipt_timestamp - self.origin_timestamp
    }
}

/// Records in the order the simulation produced them.
#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceRecord {
    Send(SendRecord),
    Delivery(DeliveryRecord),
}

/// Node with its endpoint and movement model.
pub struct Node {
    pub node_id: NodeId,
    pub endpoint: BroadcastEndpoint,
    pub mobility: Mobility,
}

/// Simulated time as the seconds value carried in payloads and records.
pub fn as_seconds(time: Duration) -> f64 {
    time.as_secs_f64()
}
