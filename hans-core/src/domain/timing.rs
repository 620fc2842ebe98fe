//! Stage timing record

use std::fmt;
use std::time::Duration;

/// Wall-clock durations of the three measured stages of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimingRecord {
    /// Clone plus optional merge
    pub git: Duration,
    pub build: Duration,
    pub hardware: Duration,
}

impl fmt::Display for TimingRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "git: {:4.2}s build: {:4.2}s hw: {:4.2}s",
            self.git.as_secs_f64(),
            self.build.as_secs_f64(),
            self.hardware.as_secs_f64()
        )
    }
}
