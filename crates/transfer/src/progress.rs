//! Progress accounting shared by both transfer workers.

/// Granularity of progress milestones, in percent.
const MILESTONE_STEP: u8 = 10;

/// Tracks which 10% boundaries of a transfer have already been reported.
#[derive(Debug, Clone)]
pub struct ProgressMilestones {
    total: u64,
    last_logged_percent: u8,
}

impl ProgressMilestones {
    pub fn new(total: u64) -> Self {
        Self {
            total,
            last_logged_percent: 0,
        }
    }

    /// Records `done` bytes and returns the highest newly crossed
    /// boundary, if any.
    ///
    /// An empty transfer reports 100% on its first call.
    pub fn advance(&mut self, done: u64) -> Option<u8> {
        let percent = percent_of(done, self.total);
        let boundary = percent / MILESTONE_STEP * MILESTONE_STEP;
        if boundary > self.last_logged_percent {
            self.last_logged_percent = boundary;
            Some(boundary)
        } else {
            None
        }
    }

    pub fn last_logged_percent(&self) -> u8 {
        self.last_logged_percent
    }
}

/// Integer percentage of `done` over `total`, clamped to 100.
pub fn percent_of(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let pct = (done.min(total) as u128 * 100) / total as u128;
    pct as u8
}

/// Formats a throughput figure for logs.
pub fn format_transfer_speed(bytes_transferred: u64, elapsed_secs: f64) -> String {
    if elapsed_secs <= 0.0 {
        return "n/a".to_string();
    }

    let speed_bps = bytes_transferred as f64 / elapsed_secs;
    if speed_bps > 1_000_000.0 {
        format!("{:.2} MB/s", speed_bps / 1_000_000.0)
    } else if speed_bps > 1_000.0 {
        format!("{:.1} KB/s", speed_bps / 1_000.0)
    } else {
        format!("{:.0} B/s", speed_bps)
    }
}
