//! Optional on-disk metric record: one pipe-separated line per non-empty
//! second per resource, appended by the timer thread. Write failures are
//! logged and swallowed; they never reach callers.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::clock::Clock;
use crate::node::Node;
use crate::runtime::Shared;

/// One flushed second of one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricLine {
    pub timestamp_ms: u64,
    pub resource: String,
    pub pass: i64,
    pub block: i64,
    pub success: i64,
    pub exception: i64,
    pub rt: i64,
    pub occupied_pass: i64,
    pub concurrency: i64,
}

impl MetricLine {
    pub fn format(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}|{}|{}|{}|{}",
            self.timestamp_ms,
            format_wall(self.timestamp_ms),
            self.resource,
            self.pass,
            self.block,
            self.success,
            self.exception,
            self.rt,
            self.occupied_pass,
            self.concurrency,
        )
    }
}

/// Appends completed seconds of every cluster node to a rolling file.
pub(crate) struct MetricWriter {
    path: PathBuf,
    /// Wall-clock milliseconds corresponding to the runtime clock's zero.
    wall_offset_ms: u64,
    last_flushed: HashMap<Arc<str>, u64>,
}

impl MetricWriter {
    pub fn new(path: PathBuf, clock: &Clock) -> Self {
        let epoch_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            path,
            wall_offset_ms: epoch_ms.saturating_sub(clock.now_ms()),
            last_flushed: HashMap::new(),
        }
    }

    pub fn flush(&mut self, shared: &Shared) {
        let now_ms = shared.clock.now_ms();
        let mut lines = Vec::new();

        for entry in shared.cluster_nodes.iter() {
            let resource = entry.key();
            let node = entry.value();
            let watermark = self.last_flushed.get(resource).copied();
            let mut newest = watermark;

            for snap in node.stat().minute_snapshots() {
                // Only completed, non-empty seconds that were not yet written.
                if watermark.is_some_and(|w| snap.window_start_ms <= w) {
                    continue;
                }
                if snap.window_start_ms + 1_000 > now_ms || snap.is_empty() {
                    continue;
                }
                newest = Some(newest.map_or(snap.window_start_ms, |n| n.max(snap.window_start_ms)));
                lines.push(MetricLine {
                    timestamp_ms: self.wall_offset_ms + snap.window_start_ms,
                    resource: resource.to_string(),
                    pass: snap.pass,
                    block: snap.block,
                    success: snap.success,
                    exception: snap.exception,
                    rt: snap.rt,
                    occupied_pass: snap.occupied_pass,
                    concurrency: node.stat().cur_thread_num(),
                });
            }
            if let Some(newest) = newest {
                self.last_flushed.insert(Arc::clone(resource), newest);
            }
        }

        if lines.is_empty() {
            return;
        }
        lines.sort_by(|a, b| {
            a.timestamp_ms
                .cmp(&b.timestamp_ms)
                .then_with(|| a.resource.cmp(&b.resource))
        });
        self.append(&lines);
    }

    fn append(&self, lines: &[MetricLine]) {
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| {
                for line in lines {
                    writeln!(file, "{}", line.format())?;
                }
                file.flush()
            });
        if let Err(err) = result {
            tracing::warn!(path = %self.path.display(), %err, "metric log write failed");
        }
    }
}

fn format_wall(ms: u64) -> String {
    let secs = ms / 1_000;
    let (year, month, day) = civil_from_days((secs / 86_400) as i64);
    let tod = secs % 86_400;
    format!(
        "{year:04}-{month:02}-{day:02} {:02}:{:02}:{:02}",
        tod / 3_600,
        (tod / 60) % 60,
        tod % 60
    )
}

/// Days-since-epoch to (year, month, day), valid across the Gregorian range.
fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u64;
    let yoe = (doe - doe / 1_460 + doe / 36_524 - doe / 146_096) / 365;
    let year = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    (if month <= 2 { year + 1 } else { year }, month, day)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wall_formatting_matches_known_timestamps() {
        assert_eq!(format_wall(0), "1970-01-01 00:00:00");
        // 2021-01-01T00:00:00Z
        assert_eq!(format_wall(1_609_459_200_000), "2021-01-01 00:00:00");
        // 2024-02-29T12:34:56Z (leap day)
        assert_eq!(format_wall(1_709_210_096_000), "2024-02-29 12:34:56");
    }

    #[test]
    fn line_format_is_pipe_separated() {
        let line = MetricLine {
            timestamp_ms: 1_609_459_200_000,
            resource: "orders".into(),
            pass: 10,
            block: 2,
            success: 9,
            exception: 1,
            rt: 450,
            occupied_pass: 0,
            concurrency: 3,
        };
        assert_eq!(
            line.format(),
            "1609459200000|2021-01-01 00:00:00|orders|10|2|9|1|450|0|3"
        );
    }
}
