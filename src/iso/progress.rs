//! Download progress tracking
//!
//! Converts `(downloaded, total, elapsed)` samples into percent, the
//! instantaneous speed since the previous sample, and an ETA.

use std::time::Duration;

/// Default progress bar width in cells
pub const BAR_WIDTH: usize = 30;

const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// Display-ready progress snapshot
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransferProgress {
    /// `None` while the total size is unknown
    pub percent: Option<u8>,
    /// Bytes per second between the last two samples
    pub speed: Option<f64>,
    pub eta: Option<Duration>,
    pub downloaded: u64,
    pub total: u64,
}

impl TransferProgress {
    pub fn speed_label(&self) -> Option<String> {
        self.speed.map(|s| format!("{}/s", format_bytes(s.round() as u64)))
    }

    pub fn eta_label(&self) -> Option<String> {
        self.eta.map(format_eta)
    }

    /// `"speed • ETA: x • done / total"` with absent parts left out
    pub fn status_line(&self) -> String {
        let mut parts = Vec::new();
        if let Some(speed) = self.speed_label() {
            parts.push(speed);
        }
        if let Some(eta) = self.eta_label() {
            parts.push(format!("ETA: {}", eta));
        }
        if self.total > 0 {
            parts.push(format!(
                "{} / {}",
                format_bytes(self.downloaded),
                format_bytes(self.total)
            ));
        } else if self.downloaded > 0 {
            parts.push(format_bytes(self.downloaded));
        }
        parts.join(" • ")
    }
}

#[derive(Debug, Default)]
pub struct TransferProgressTracker {
    last: Option<(u64, Duration)>,
    current: TransferProgress,
}

impl TransferProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one sample; `elapsed` is measured from the start of the transfer
    pub fn record(&mut self, downloaded: u64, total: u64, elapsed: Duration) -> &TransferProgress {
        let percent = (total > 0).then(|| {
            let pct = (downloaded as f64 / total as f64 * 100.0).round();
            pct.clamp(0.0, 100.0) as u8
        });

        let speed = match self.last {
            Some((prev_bytes, prev_elapsed)) if elapsed > prev_elapsed => {
                let dt = (elapsed - prev_elapsed).as_secs_f64();
                Some(downloaded.saturating_sub(prev_bytes) as f64 / dt)
            }
            // Same instant as the previous sample: keep the last known speed
            Some(_) => self.current.speed,
            None => None,
        };

        let eta = match speed {
            Some(s) if s > 0.0 && total > 0 => {
                let remaining = total.saturating_sub(downloaded) as f64;
                Some(Duration::from_secs_f64(remaining / s))
            }
            _ => None,
        };

        self.last = Some((downloaded, elapsed));
        self.current = TransferProgress {
            percent,
            speed,
            eta,
            downloaded,
            total,
        };
        &self.current
    }
}

/// Format a byte count with base-1024 units and one decimal place
pub fn format_bytes(bytes: u64) -> String {
    if bytes == 0 {
        return "0 B".to_string();
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

/// Format an ETA as `45s`, `3m 07s` or `1h 05m`
pub fn format_eta(eta: Duration) -> String {
    let secs = eta.as_secs_f64().round() as u64;
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {:02}s", secs / 60, secs % 60)
    } else {
        format!("{}h {:02}m", secs / 3600, (secs % 3600) / 60)
    }
}

/// Render a fixed-width bar: `round(width * percent / 100)` filled cells
pub fn render_bar(percent: u8, width: usize) -> String {
    let percent = percent.min(100) as f64;
    let filled = ((width as f64) * percent / 100.0).round() as usize;
    let filled = filled.min(width);
    format!("{}{}", "█".repeat(filled), "░".repeat(width - filled))
}
