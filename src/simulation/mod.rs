//! Network simulation core module.
//!
//! Nodes broadcast timestamped payloads over a range-limited shared medium;
//! every node in range decodes the payload and logs when it was sent and
//! when it arrived. It integrates:
//! - A text payload codec
//! - Per-node broadcast endpoints with send and receive sockets
//! - A discrete-event scheduler over simulated time
//! - Range-limited delivery and random-walk mobility
//!
//! ## Module Organization
//!
//! - `types`: Core data structures (nodes, events, records)
//! - `codec`: Payload encoding and decoding
//! - `socket`: Sockets, addressing and the transport trait
//! - `endpoint`: Per-node send/receive logic
//! - `scheduler`: Discrete-event queue and simulated clock
//! - `medium`: Range-limited broadcast delivery
//! - `mobility`, `geometry`: Node placement and movement
//! - `trace`: JSON-lines record output
//! - `network`: The run loop coordinating all nodes

pub mod codec;
pub mod endpoint;
pub mod geometry;
pub mod medium;
pub mod mobility;
pub mod network;
pub mod scheduler;
pub mod socket;
pub mod trace;
pub mod types;
