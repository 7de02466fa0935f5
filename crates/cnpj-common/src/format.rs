//! Human-readable formatting for progress output

/// Format bytes into a human-readable string ("1.50 KB")
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit = 0;

    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", size, UNITS[unit])
    }
}

/// Group digits in thousands ("1,234,567")
pub fn format_count(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Percentage of `done` over `total`, clamped to 100 and 0 when `total` is zero
pub fn percent(done: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    ((done as f64 * 100.0) / total as f64).min(100.0)
}

/// Percentage steps crossed while work advances, reported once each
///
/// Keeps `info` logs readable when progress bars are hidden (no TTY).
#[derive(Debug, Clone)]
pub struct Milestones {
    step: f64,
    next: f64,
}

impl Milestones {
    pub fn new(step: f64) -> Self {
        let step = step.clamp(1.0, 100.0);
        Self { step, next: step }
    }

    /// The current percentage, the first time `done` reaches a new step
    pub fn reached(&mut self, done: u64, total: u64) -> Option<f64> {
        if total == 0 {
            return None;
        }
        let pct = percent(done, total);
        if pct < self.next {
            return None;
        }
        self.next = (pct / self.step).floor() * self.step + self.step;
        Some(pct)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1_073_741_824), "1.00 GB");
    }

    #[test]
    fn test_format_count() {
        assert_eq!(format_count(0), "0");
        assert_eq!(format_count(999), "999");
        assert_eq!(format_count(1000), "1,000");
        assert_eq!(format_count(60_123_456), "60,123,456");
    }

    #[test]
    fn test_percent() {
        assert_eq!(percent(0, 0), 0.0);
        assert_eq!(percent(50, 200), 25.0);
        assert_eq!(percent(16_384, 10_000), 100.0);
    }

    #[test]
    fn test_milestones_report_each_step_once() {
        let mut steps = Milestones::new(25.0);
        assert_eq!(steps.reached(10, 100), None);
        assert_eq!(steps.reached(30, 100), Some(30.0));
        assert_eq!(steps.reached(40, 100), None);
        // Jumping several steps reports once
        assert_eq!(steps.reached(95, 100), Some(95.0));
        assert_eq!(steps.reached(100, 100), Some(100.0));
        assert_eq!(steps.reached(100, 100), None);
        assert_eq!(Milestones::new(10.0).reached(5, 0), None);
    }
}
