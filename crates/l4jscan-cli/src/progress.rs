//! Periodic progress reporting and the number formats it uses.

use std::fmt::Display;
use std::time::Instant;
use tracing::info;

/// Counts scanned items and logs a progress line every `interval` items
#[derive(Debug)]
pub struct Progress {
    interval: u64,
    scanned: u64,
    matched: u64,
    last_step: Instant,
}

impl Progress {
    pub fn new(interval: u64) -> Self {
        Self {
            interval,
            scanned: 0,
            matched: 0,
            last_step: Instant::now(),
        }
    }

    /// Counts one item, logging progress when an interval completes
    pub fn increment(&mut self, current: impl Display) {
        self.scanned += 1;
        if self.interval == 0 || self.scanned % self.interval != 0 {
            return;
        }
        let now = Instant::now();
        let step = now.duration_since(self.last_step);
        self.last_step = now;
        info!(
            "Done {}, found {}, {} per {}, cur {}",
            format_count(self.scanned),
            format_count(self.matched),
            format_duration(step.as_millis() as u64),
            format_count(self.interval),
            current
        );
    }

    pub fn record_match(&mut self) {
        self.matched += 1;
    }

    pub fn scanned(&self) -> u64 {
        self.scanned
    }

    pub fn matched(&self) -> u64 {
        self.matched
    }
}

/// Formats a count for humans: dotted thousands up to 2000, then `K`, then `M`
pub fn format_count(count: u64) -> String {
    if count > 2000 {
        let thousands = count as f64 / 1000.0;
        if thousands > 2000.0 {
            return format!("{}M", format_fraction(thousands / 1000.0));
        }
        return format!("{}K", format_fraction(thousands));
    }
    wrap_thousand(&count.to_string())
}

/// Drops the fraction when it is below 0.01, otherwise keeps one digit
fn format_fraction(value: f64) -> String {
    if value.fract() < 0.01 {
        format!("{value:.0}")
    } else {
        format!("{value:.1}")
    }
}

/// Inserts `.` before the last two groups of three digits
pub fn wrap_thousand(digits: &str) -> String {
    let len = digits.len();
    if len <= 3 {
        return digits.to_string();
    }
    let mut out = String::with_capacity(len + 2);
    if len > 6 {
        out.push_str(&digits[..len - 6]);
        out.push('.');
        out.push_str(&digits[len - 6..len - 3]);
    } else {
        out.push_str(&digits[..len - 3]);
    }
    out.push('.');
    out.push_str(&digits[len - 3..]);
    out
}

pub fn format_duration(millis: u64) -> String {
    format!("{} ms", format_count(millis))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_wrap_thousand() {
        assert_eq!(wrap_thousand("1"), "1");
        assert_eq!(wrap_thousand("100"), "100");
        assert_eq!(wrap_thousand("1000"), "1.000");
        assert_eq!(wrap_thousand("100100"), "100.100");
        assert_eq!(wrap_thousand("1001000"), "1.001.000");
        assert_eq!(wrap_thousand("101001000"), "101.001.000");
        // only two groups are separated
        assert_eq!(wrap_thousand("1001001000"), "1001.001.000");
    }

    #[test]
    fn test_format_count() {
        assert_eq!(format_count(1), "1");
        assert_eq!(format_count(1001), "1.001");
        assert_eq!(format_count(2000), "2.000");
        assert_eq!(format_count(10000), "10K");
        assert_eq!(format_count(10001), "10K");
        assert_eq!(format_count(15500), "15.5K");
        assert_eq!(format_count(3_000_000), "3M");
        assert_eq!(format_count(3_050_001), "3.1M");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(12), "12 ms");
        assert_eq!(format_duration(1500), "1.500 ms");
    }

    #[test]
    fn test_progress_counts() {
        let mut progress = Progress::new(2);
        progress.increment("a");
        progress.record_match();
        progress.increment("b");
        progress.increment("c");
        assert_eq!(progress.scanned(), 3);
        assert_eq!(progress.matched(), 1);
    }
}
