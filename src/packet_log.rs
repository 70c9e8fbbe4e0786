//! Per-packet timing record kept while data is being saved.
//!
//! Four columns per accepted packet: the raw text (so a session can be fed
//! back through the processor verbatim), seconds since the previous packet,
//! when the derived values were pushed to the motion model, and when a
//! rendered frame first consumed them.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Instant;

use crate::error::Result;
use crate::trial::LoopStatus;
use crate::types::wall_timestamp;

pub const DLC_HEADER: &str = "ID,x,y;...;Time Frame was Captured;Time Packet was Sent;DLC_Latency#DeltaPacketTime#ValuesUpdate#FrameCreated";
pub const VALUES_OVERWRITTEN: &str = "Values Overwritten";

#[derive(Clone, Debug, PartialEq)]
pub struct PacketRow {
    pub raw: String,
    pub delta_secs: f64,
    pub values_updated: String,
    pub frame_consumed: Option<String>,
}

impl PacketRow {
    fn to_line(&self) -> String {
        format!(
            "{}#{}#{}#{}",
            self.raw,
            self.delta_secs,
            self.values_updated,
            self.frame_consumed.as_deref().unwrap_or("")
        )
    }
}

pub struct PacketLog {
    saving: bool,
    rows: Vec<PacketRow>,
    last_arrival: Option<Instant>,
    /// Row whose values have not been picked up by a frame yet
    pending: Option<usize>,
    packets_this_trial: u64,
}

impl PacketLog {
    pub fn new(saving: bool) -> Self {
        Self {
            saving,
            rows: Vec::new(),
            last_arrival: None,
            pending: None,
            packets_this_trial: 0,
        }
    }

    pub fn is_saving(&self) -> bool {
        self.saving
    }

    /// Log an accepted data packet. `values_pushed` is true when the packet
    /// produced angles for the motion model (loop closed).
    pub fn record(&mut self, raw: &str, status: LoopStatus, values_pushed: bool) {
        if !self.saving {
            return;
        }
        let now = Instant::now();
        let delta_secs = match self.last_arrival {
            None => 0.0,
            Some(prev) => round5(now.duration_since(prev).as_secs_f64()),
        };
        self.last_arrival = Some(now);

        if status != LoopStatus::BetweenTrials {
            self.packets_this_trial += 1;
        }

        let row = if values_pushed {
            if let Some(idx) = self.pending.take() {
                self.rows[idx].frame_consumed = Some(VALUES_OVERWRITTEN.to_string());
            }
            self.pending = Some(self.rows.len());
            PacketRow {
                raw: raw.to_string(),
                delta_secs,
                values_updated: wall_timestamp(),
                frame_consumed: None,
            }
        } else {
            PacketRow {
                raw: raw.to_string(),
                delta_secs,
                values_updated: status.to_string(),
                frame_consumed: Some(status.to_string()),
            }
        };
        self.rows.push(row);
    }

    /// Called once per rendered frame
    pub fn frame_rendered(&mut self) {
        if let Some(idx) = self.pending.take() {
            self.rows[idx].frame_consumed = Some(wall_timestamp());
        }
    }

    pub fn packets_this_trial(&self) -> u64 {
        self.packets_this_trial
    }

    pub fn rows(&self) -> &[PacketRow] {
        &self.rows
    }

    /// Start a fresh trial: clears rows and the inter-packet clock
    pub fn reset(&mut self) {
        self.rows.clear();
        self.pending = None;
        self.last_arrival = None;
        self.packets_this_trial = 0;
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        writeln!(writer, "{}", DLC_HEADER)?;
        for row in &self.rows {
            writeln!(writer, "{}", row.to_line())?;
        }
        writer.flush()?;
        Ok(())
    }
}

fn round5(value: f64) -> f64 {
    (value * 1e5).round() / 1e5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_delta_is_zero() {
        let mut log = PacketLog::new(true);
        log.record("0,1,2;", LoopStatus::PreStim, false);
        log.record("0,1,2;", LoopStatus::PreStim, false);
        assert_eq!(log.rows()[0].delta_secs, 0.0);
        assert!(log.rows()[1].delta_secs >= 0.0);
        assert_eq!(log.rows()[0].values_updated, "PreStim");
        assert_eq!(log.rows()[0].frame_consumed.as_deref(), Some("PreStim"));
        assert_eq!(log.packets_this_trial(), 2);
    }

    #[test]
    fn test_overwritten_before_frame() {
        let mut log = PacketLog::new(true);
        log.record("a;", LoopStatus::LoopClosed, true);
        log.record("b;", LoopStatus::LoopClosed, true);
        log.frame_rendered();
        log.frame_rendered();
        assert_eq!(log.rows()[0].frame_consumed.as_deref(), Some(VALUES_OVERWRITTEN));
        let consumed = log.rows()[1].frame_consumed.as_deref().unwrap();
        assert_ne!(consumed, VALUES_OVERWRITTEN);
    }

    #[test]
    fn test_between_trials_not_counted() {
        let mut log = PacketLog::new(true);
        log.record("a;", LoopStatus::BetweenTrials, false);
        assert_eq!(log.packets_this_trial(), 0);
        assert_eq!(log.rows().len(), 1);
    }

    #[test]
    fn test_not_saving_records_nothing() {
        let mut log = PacketLog::new(false);
        log.record("a;", LoopStatus::LoopClosed, true);
        assert!(log.rows().is_empty());
    }

    #[test]
    fn test_round5() {
        assert_eq!(round5(0.123456789), 0.12346);
    }
}
