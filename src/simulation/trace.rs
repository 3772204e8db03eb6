//! JSON-lines event trace.
//!
//! The first line is a `TraceHeader` describing the run; every following line
//! is one `TraceRecord` in the order the simulation produced it.

use anyhow::Context;
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use super::types::TraceRecord;

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct TraceHeader {
    /// Wall-clock start of the run, RFC 3339.
    pub started_at: String,
    pub node_count: u32,
    pub max_range: f64,
    pub seed: u64,
}

impl TraceHeader {
    pub fn new(node_count: u32, max_range: f64, seed: u64) -> Self {
        Self {
            started_at: chrono::Utc::now().to_rfc3339(),
            node_count,
            max_range,
            seed,
        }
    }
}

pub struct TraceWriter<W: Write> {
    out: W,
    records: u64,
}

impl TraceWriter<Box<dyn Write>> {
    /// Create (or truncate) the trace file at `path`.
    pub fn create(path: &Path, header: &TraceHeader) -> anyhow::Result<Self> {
        let file = File::create(path).with_context(|| format!("Failed to create trace file: {}", path.display()))?;
        let out: Box<dyn Write> = Box::new(BufWriter::new(file));
        Self::new(out, header)
    }
}

impl<W: Write> TraceWriter<W> {
    pub fn new(mut out: W, header: &TraceHeader) -> anyhow::Result<Self> {
        serde_json::to_writer(&mut out, header).context("Failed to write trace header")?;
        out.write_all(b"\n")?;
        Ok(Self { out, records: 0 })
    }

    pub fn write(&mut self, record: &TraceRecord) -> anyhow::Result<()> {
        serde_json::to_writer(&mut self.out, record).context("Failed to write trace record")?;
        self.out.write_all(b"\n")?;
        self.records += 1;
        Ok(())
    }

    /// Flush and return the writer with the number of records written.
    pub fn finish(mut self) -> anyhow::Result<(W, u64)> {
        self.out.flush().context("Failed to flush trace")?;
        Ok((self.out, self.records))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::types::{DeliveryRecord, SendRecord};

    #[test]
    fn writes_header_then_one_line_per_record() {
        let header = TraceHeader::new(3, 30.0, 12);
        let mut writer = TraceWriter::new(Vec::new(), &header).unwrap();
        writer
            .write(&TraceRecord::Send(SendRecord {
                node_id: 0,
                timestamp: 0.0,
                packet_size: 2,
            }))
            .unwrap();
        writer
            .write(&TraceRecord::Delivery(DeliveryRecord {
                node_id: 1,
                origin_timestamp: 0.0,
                receipt_timestamp: 0.0,
            }))
            .unwrap();
        let (bytes, records) = writer.finish().unwrap();
        assert_eq!(records, 2);

        let text = String::from_utf8(bytes).unwrap();
        let lines: Vec<serde_json::Value> = text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["node_count"], 3);
        assert_eq!(lines[1]["event"], "send");
        assert_eq!(lines[1]["packet_size"], 2);
        assert_eq!(lines[2]["event"], "delivery");
        assert_eq!(lines[2]["node_id"], 1);
    }
}
