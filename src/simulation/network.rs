//! Simulation run loop tying nodes, medium and scheduler together.
//!
//! High-level flow:
//! 1) Nodes are created with an address, a broadcast endpoint and a mobility
//!    model; sends are registered with the scheduler.
//! 2) The loop pops events in time order until the queue drains or the stop
//!    time is reached.
//! 3) `Send` events refresh node positions, let the sender's endpoint encode
//!    and transmit, and the medium queues a `Deliver` event per node in range.
//! 4) `Deliver` events go to the receiving endpoint, which produces the
//!    delivery record.

use anyhow::Context;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;
use std::net::Ipv4Addr;
use std::time::Duration;

use crate::config::{MobilityModel, SimulationConfig};

use super::codec::PayloadCodec;
use super::endpoint::{BroadcastEndpoint, ReceiveHandler, schedule_send};
use super::medium::{Listener, MediumCounters, MediumTransmission, RangePropagation};
use super::mobility::{Mobility, RandomWalk2d};
use super::scheduler::Scheduler;
use super::socket::Ipv4AddressAllocator;
use super::trace::{TraceHeader, TraceWriter};
use super::types::{DeliveryRecord, Node, NodeId, Point, ReceivedPacket, SendRecord, SimEvent, TraceRecord, as_seconds};

/// Per-node totals derived from the records.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct NodeSummary {
    pub node_id: NodeId,
    pub sent: usize,
    pub received: usize,
    pub mean_latency: Option<f64>,
}

/// Everything observable about a finished run.
#[derive(Debug, Serialize, Clone, Default, PartialEq)]
pub struct SimulationReport {
    pub sends: Vec<SendRecord>,
    pub deliveries: Vec<DeliveryRecord>,
    pub counters: MediumCounters,
    /// Simulated time of the last dispatched event, in seconds.
    pub end_time: f64,
    pub events_fired: u64,
    /// Events still queued when the stop time cut the run short.
    pub pending_at_stop: usize,
}

impl SimulationReport {
    pub fn deliveries_at(&self, node_id: NodeId) -> impl Iterator<Item = &DeliveryRecord> {
        self.deliveries.iter().filter(move |d| d.node_id == node_id)
    }

    pub fn mean_latency(&self) -> Option<f64> {
        mean(self.deliveries.iter().map(DeliveryRecord::latency))
    }

    /// Totals for nodes `0..node_count`, in node order.
    pub fn node_summaries(&self, node_count: u32) -> Vec<NodeSummary> {
        let mut sent: BTreeMap<NodeId, usize> = BTreeMap::new();
        for record in &self.sends {
            *sent.entry(record.node_id).or_default() += 1;
        }

        (0..node_count)
            .map(|node_id| NodeSummary {
                node_id,
                sent: sent.get(&node_id).copied().unwrap_or(0),
                received: self.deliveries_at(node_id).count(),
                mean_latency: mean(self.deliveries_at(node_id).map(DeliveryRecord::latency)),
            })
            .collect()
    }
}

/// Configured seconds as simulated time, rejecting values a `Duration` cannot hold.
fn seconds(value: f64, what: &str) -> anyhow::Result<Duration> {
    Duration::try_from_secs_f64(value).with_context(|| format!("Invalid {what}: {value}s"))
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 { None } else { Some(sum / count as f64) }
}

pub struct Simulation {
    nodes: Vec<Node>,
    scheduler: Scheduler<SimEvent>,
    propagation: RangePropagation,
    rng: StdRng,
    counters: MediumCounters,
    report: SimulationReport,
    trace: Option<TraceWriter<Box<dyn Write>>>,
}

impl Simulation {
    pub fn new(propagation: RangePropagation, rng: StdRng) -> Self {
        Self {
            nodes: Vec::new(),
            scheduler: Scheduler::new(),
            propagation,
            rng,
            counters: MediumCounters::default(),
            report: SimulationReport::default(),
            trace: None,
        }
    }

    /// Build the full scenario described by `config`: nodes on the grid,
    /// addresses from the configured network, sends per the send policy.
    pub fn from_config(config: &SimulationConfig) -> anyhow::Result<Self> {
        config.validate().map_err(anyhow::Error::msg).context("Invalid configuration")?;

        let propagation = RangePropagation::new(config.max_range, seconds(config.propagation_delay, "propagation_delay")?);
        let mut simulation = Simulation::new(propagation, StdRng::seed_from_u64(config.seed));
        let codec = PayloadCodec::new(config.payload.precision, config.payload.strict_decode);
        let mut addresses = Ipv4AddressAllocator::new(config.network, config.prefix_len);

        for index in 0..config.n_wifi {
            let address = addresses.allocate().with_context(|| format!("No address left for node {index}"))?;
            let start = config.mobility.grid.position(index);
            let mobility = match config.mobility.model {
                MobilityModel::Static => Mobility::Static(start),
                MobilityModel::RandomWalk => Mobility::RandomWalk(RandomWalk2d::new(start, &config.mobility.random_walk, &mut simulation.rng)),
            };
            let node_id = simulation.add_node(address, config.port, mobility, codec, config.payload.aux_fields.clone());

            for at in config.send.send_times(index) {
                simulation.schedule_send(node_id, seconds(at, "send time")?);
            }
        }
        simulation.stop_at(seconds(config.stop_time, "stop_time")?);

        if config.tracing {
            let header = TraceHeader::new(config.n_wifi, config.max_range, config.seed);
            simulation.set_trace(TraceWriter::create(&config.trace_file, &header)?);
        }

        log::info!(
            "Created {} nodes, max range {} m, stop at {}s, {} sends scheduled",
            config.n_wifi,
            config.max_range,
            config.stop_time,
            simulation.scheduler.pending()
        );
        Ok(simulation)
    }

    /// Add a node with the next free id and wire up its endpoint.
    pub fn add_node(&mut self, address: Ipv4Addr, port: u16, mobility: Mobility, codec: PayloadCodec, aux_fields: Vec<f64>) -> NodeId {
        let node_id = self.nodes.len() as NodeId;
        self.nodes.push(Node {
            node_id,
            endpoint: BroadcastEndpoint::new(node_id, address, port, codec, aux_fields),
            mobility,
        });
        let node = &self.nodes[node_id as usize];
        log::debug!(
            "Node {} sends from {} to {:?}, listens on {:?}, {:?}",
            node_id,
            node.endpoint.send_socket().local_addr(),
            node.endpoint.send_socket().destination(),
            node.endpoint.receive_socket().local_addr(),
            node.mobility
        );
        node_id
    }

    pub fn schedule_send(&mut self, node_id: NodeId, fire_time: Duration) {
        schedule_send(&mut self.scheduler, node_id, fire_time);
    }

    pub fn stop_at(&mut self, time: Duration) {
        self.scheduler.stop_at(time);
    }

    pub fn set_trace(&mut self, trace: TraceWriter<Box<dyn Write>>) {
        self.trace = Some(trace);
    }

    /// Run until the queue drains or the stop time is reached.
    pub fn run(mut self) -> anyhow::Result<SimulationReport> {
        while let Some((_, event)) = self.scheduler.next_event() {
            match event {
                SimEvent::Send { node_id } => self.dispatch_send(node_id)?,
                SimEvent::Deliver(packet) => self.dispatch_delivery(packet)?,
            }
        }

        self.report.counters = self.counters.clone();
        self.report.end_time = as_seconds(self.scheduler.now());
        self.report.events_fired = self.scheduler.fired();
        self.report.pending_at_stop = self.scheduler.pending();
        if !self.scheduler.is_empty() {
            log::debug!("Stop time reached with {} events queued", self.report.pending_at_stop);
        }

        if let Some(trace) = self.trace.take() {
            let (_, records) = trace.finish()?;
            log::info!("Wrote {} trace records", records);
        }

        Ok(self.report)
    }

    fn dispatch_send(&mut self, node_id: NodeId) -> anyhow::Result<()> {
        let now = self.scheduler.now();
        let positions: Vec<Point> = self.nodes.iter_mut().map(|node| node.mobility.position_at(now, &mut self.rng)).collect();

        let record = {
            let Some(sender) = self.nodes.get(node_id as usize) else {
                log::warn!("{}s send scheduled for unknown node {}", as_seconds(now), node_id);
                return Ok(());
            };
            let listeners: Vec<Listener> = self
                .nodes
                .iter()
                .zip(&positions)
                .map(|(node, position)| Listener {
                    node_id: node.node_id,
                    position: *position,
                    socket: node.endpoint.receive_socket(),
                })
                .collect();
            let mut transmission = MediumTransmission {
                propagation: &self.propagation,
                listeners: &listeners,
                scheduler: &mut self.scheduler,
                counters: &mut self.counters,
            };
            sender.endpoint.handle_send(now, &mut transmission)
        };

        match record {
            Some(record) => self.record(TraceRecord::Send(record)),
            None => Ok(()),
        }
    }

    fn dispatch_delivery(&mut self, packet: ReceivedPacket) -> anyhow::Result<()> {
        let Some(receiver) = self.nodes.get(packet.node_id as usize) else {
            log::warn!("{}s packet for unknown node {}", as_seconds(packet.timestamp), packet.node_id);
            return Ok(());
        };

        match receiver.endpoint.on_receive(packet) {
            Some(record) => self.record(TraceRecord::Delivery(record)),
            None => Ok(()),
        }
    }

    fn record(&mut self, record: TraceRecord) -> anyhow::Result<()> {
        if let Some(trace) = self.trace.as_mut() {
            trace.write(&record)?;
        }
        match record {
            TraceRecord::Send(send) => self.report.sends.push(send),
            TraceRecord::Delivery(delivery) => self.report.deliveries.push(delivery),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::socket::DEFAULT_PORT;

    fn static_simulation(positions: &[Point], max_range: f64) -> Simulation {
        let mut simulation = Simulation::new(RangePropagation::new(max_range, Duration::ZERO), StdRng::seed_from_u64(12));
        for (i, position) in positions.iter().enumerate() {
            simulation.add_node(Ipv4Addr::new(10, 1, 3, i as u8 + 1), DEFAULT_PORT, Mobility::Static(*position), PayloadCodec::default(), Vec::new());
        }
        simulation
    }

    #[test]
    fn three_node_scenario_respects_range() {
        let mut simulation = static_simulation(&[Point::new(0.0, 0.0), Point::new(10.0, 0.0), Point::new(100.0, 0.0)], 30.0);
        simulation.schedule_send(0, Duration::ZERO);
        let report = simulation.run().unwrap();

        assert_eq!(
            report.sends,
            vec![SendRecord {
                node_id: 0,
                timestamp: 0.0,
                packet_size: 2
            }]
        );
        assert_eq!(
            report.deliveries,
            vec![DeliveryRecord {
                node_id: 1,
                origin_timestamp: 0.0,
                receipt_timestamp: 0.0
            }]
        );
        assert_eq!(report.deliveries_at(2).count(), 0);
        assert_eq!(report.counters.out_of_range, 1);
    }

    #[test]
    fn sends_are_logged_in_time_order() {
        let mut simulation = static_simulation(&[Point::new(0.0, 0.0), Point::new(1.0, 0.0), Point::new(2.0, 0.0)], 30.0);
        simulation.schedule_send(2, Duration::from_secs(2));
        simulation.schedule_send(1, Duration::from_secs(1));
        simulation.schedule_send(0, Duration::from_secs(1));
        simulation.schedule_send(0, Duration::ZERO);
        let report = simulation.run().unwrap();

        let sends: Vec<_> = report.sends.iter().map(|s| (s.node_id, s.timestamp)).collect();
        assert_eq!(sends, vec![(0, 0.0), (1, 1.0), (0, 1.0), (2, 2.0)]);
    }

    #[test]
    fn every_in_range_neighbour_hears_every_send() {
        let mut simulation = static_simulation(&[Point::new(0.0, 0.0), Point::new(5.0, 0.0), Point::new(10.0, 0.0)], 30.0);
        for node_id in 0..3 {
            simulation.schedule_send(node_id, Duration::from_secs(node_id as u64));
        }
        let report = simulation.run().unwrap();

        assert_eq!(report.deliveries.len(), 6);
        let summaries = report.node_summaries(3);
        assert!(summaries.iter().all(|s| s.sent == 1 && s.received == 2));
        assert_eq!(report.counters.transmitted, 3);
        assert_eq!(report.counters.delivered, 6);
        assert_eq!(report.mean_latency(), Some(0.0));
    }

    #[test]
    fn latency_is_never_negative() {
        let config = SimulationConfig {
            n_wifi: 6,
            propagation_delay: 0.002,
            send: crate::config::SendPolicy {
                first_send: 0.25,
                stagger: 0.5,
                sends_per_node: 4,
                repeat_interval: 1.5,
            },
            ..SimulationConfig::default()
        };
        let report = Simulation::from_config(&config).unwrap().run().unwrap();

        assert!(!report.deliveries.is_empty());
        for delivery in &report.deliveries {
            assert!(delivery.latency() >= 0.0, "{delivery:?}");
            assert!((delivery.latency() - 0.002).abs() < 1e-6);
        }
    }

    #[test]
    fn reference_configuration_runs() {
        let config = SimulationConfig {
            verbose: false,
            ..SimulationConfig::default()
        };
        let report = Simulation::from_config(&config).unwrap().run().unwrap();

        // The walk area is 5 x 10 m, so every node stays within 30 m of every other.
        let times: Vec<_> = report.sends.iter().map(|s| s.timestamp).collect();
        assert_eq!(times, vec![0.0, 1.0, 2.0]);
        assert_eq!(report.deliveries.len(), 6);
        for node_id in 0..3 {
            let origins: Vec<_> = report.deliveries_at(node_id).map(|d| d.origin_timestamp).collect();
            assert_eq!(origins.len(), 2);
            assert!(!origins.contains(&(node_id as f64)));
        }
    }

    #[test]
    fn stop_time_cuts_off_late_sends() {
        let config = SimulationConfig {
            n_wifi: 12,
            ..SimulationConfig::default()
        };
        let report = Simulation::from_config(&config).unwrap().run().unwrap();

        assert_eq!(report.sends.len(), 11);
        assert!(report.sends.iter().all(|s| s.timestamp <= 10.0));
        assert_eq!(report.pending_at_stop, 1);
        assert_eq!(report.end_time, 10.0);
    }

    #[test]
    fn auxiliary_fields_do_not_disturb_correlation() {
        let config = SimulationConfig {
            payload: crate::config::PayloadConfig {
                precision: Some(6),
                strict_decode: true,
                aux_fields: vec![7.0, 8.5],
            },
            ..SimulationConfig::default()
        };
        let report = Simulation::from_config(&config).unwrap().run().unwrap();

        assert_eq!(report.sends[0].packet_size, b"0.000000,7.000000,8.500000\0".len());
        assert_eq!(report.deliveries.len(), 6);
        assert!(report.deliveries.iter().all(|d| d.latency() == 0.0));
    }

    #[test]
    fn same_seed_reproduces_run() {
        let config = SimulationConfig {
            n_wifi: 20,
            max_range: 4.0,
            ..SimulationConfig::default()
        };
        let first = Simulation::from_config(&config).unwrap().run().unwrap();
        let second = Simulation::from_config(&config).unwrap().run().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn oversized_times_fail_setup_instead_of_panicking() {
        let config = SimulationConfig {
            stop_time: 1e20,
            ..SimulationConfig::default()
        };
        assert!(Simulation::from_config(&config).is_err());

        let config = SimulationConfig {
            send: crate::config::SendPolicy {
                first_send: 1e20,
                ..crate::config::SendPolicy::default()
            },
            ..SimulationConfig::default()
        };
        assert!(Simulation::from_config(&config).is_err());
    }

    #[test]
    fn mean_latency_covers_all_deliveries() {
        let mut simulation = Simulation::new(RangePropagation::new(30.0, Duration::from_millis(5)), StdRng::seed_from_u64(12));
        for i in 0..3u8 {
            simulation.add_node(Ipv4Addr::new(10, 1, 3, i + 1), DEFAULT_PORT, Mobility::Static(Point::new(i as f64, 0.0)), PayloadCodec::default(), Vec::new());
        }
        simulation.schedule_send(0, Duration::ZERO);
        let report = simulation.run().unwrap();

        assert_eq!(report.deliveries.len(), 2);
        let mean = report.mean_latency().unwrap();
        assert!((mean - 0.005).abs() < 1e-9, "{mean}");
        assert_eq!(SimulationReport::default().mean_latency(), None);
    }

    #[test]
    fn tracing_writes_every_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.jsonl");
        let config = SimulationConfig {
            tracing: true,
            trace_file: path.clone(),
            ..SimulationConfig::default()
        };
        let report = Simulation::from_config(&config).unwrap().run().unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 1 + report.sends.len() + report.deliveries.len());
    }
}
