//! Progress state and reporting.
//!
//! `ProgressState` is the shared byte counter every copy worker updates with
//! atomic adds. `ProgressSink` decouples the engine from any presentation
//! layer: the engine pushes snapshots and short log lines, and a sink must
//! never block the caller. `ChannelSink` is the stock implementation, handing
//! lines to a consumer thread through a bounded channel and dropping them when
//! the consumer falls behind.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender};

/// Shared byte counters for a run. The total is fixed at plan time.
#[derive(Debug)]
pub struct ProgressState {
    total: u64,
    transferred: AtomicU64,
    started: Instant,
}

impl ProgressState {
    pub fn new(total: u64) -> Self {
        ProgressState {
            total,
            transferred: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    pub fn add(&self, bytes: u64) {
        self.transferred.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn transferred(&self) -> u64 {
        self.transferred.load(Ordering::Relaxed)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            total: self.total,
            transferred: self.transferred().min(self.total),
            elapsed: self.elapsed(),
        }
    }
}

/// A point-in-time view of `ProgressState`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSnapshot {
    pub total: u64,
    pub transferred: u64,
    pub elapsed: Duration,
}

impl ProgressSnapshot {
    /// Average bytes per second since the run started.
    pub fn speed(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.transferred as f64 / secs
        } else {
            0.0
        }
    }

    pub fn percent(&self) -> f64 {
        percent(self.transferred, self.total)
    }

    pub fn eta(&self) -> String {
        eta(self.total.saturating_sub(self.transferred), self.speed())
    }

    /// `[TOTAL] done / total (pct%) | speed/s | ETA hh:mm:ss`
    pub fn total_line(&self) -> String {
        format!(
            "[TOTAL] {} / {} ({:.1}%) | {}/s | ETA {}",
            human_size(self.transferred),
            human_size(self.total),
            self.percent(),
            human_size(self.speed() as u64),
            self.eta()
        )
    }
}

/// Receiver of progress from the engine.
///
/// All methods are called from engine threads (scanner or copy workers) and
/// must return promptly.
pub trait ProgressSink: Send + Sync {
    /// Latest numeric progress. Later snapshots supersede earlier ones.
    fn on_progress(&self, _snapshot: ProgressSnapshot) {}

    /// A short human-readable line. May be dropped.
    fn on_log(&self, line: String);
}

/// Forward a line to an optional sink.
pub(crate) fn emit(sink: Option<&dyn ProgressSink>, line: impl FnOnce() -> String) {
    if let Some(sink) = sink {
        sink.on_log(line());
    }
}

/// A `ProgressSink` backed by a bounded channel for log lines and a single
/// overwritten slot for the latest snapshot.
#[derive(Debug)]
pub struct ChannelSink {
    logs: Sender<String>,
    latest: Mutex<Option<ProgressSnapshot>>,
}

impl ChannelSink {
    /// Create the sink and the receiving end for the presentation thread.
    pub fn new(capacity: usize) -> (Self, Receiver<String>) {
        let (tx, rx) = bounded(capacity.max(1));
        (
            ChannelSink {
                logs: tx,
                latest: Mutex::new(None),
            },
            rx,
        )
    }

    pub fn latest(&self) -> Option<ProgressSnapshot> {
        self.latest.lock().ok().and_then(|slot| *slot)
    }
}

impl ProgressSink for ChannelSink {
    fn on_progress(&self, snapshot: ProgressSnapshot) {
        if let Ok(mut slot) = self.latest.lock() {
            *slot = Some(snapshot);
        }
    }

    fn on_log(&self, line: String) {
        // Full or disconnected: drop rather than stall a worker
        let _ = self.logs.try_send(line);
    }
}

/// Format a byte count with a 1024 base and two decimals.
pub fn human_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_idx])
}

/// Format seconds as `hh:mm:ss`, hours capped at 99.
pub fn format_eta(secs: f64) -> String {
    let secs = if secs.is_finite() && secs > 0.0 { secs } else { 0.0 };
    let total = (secs + 0.5) as u64;
    let hours = (total / 3600).min(99);
    let mins = (total % 3600) / 60;
    let secs = total % 60;
    format!("{:02}:{:02}:{:02}", hours, mins, secs)
}

/// ETA for `remaining` bytes at `speed` bytes/s; unknown below 1 B/s.
pub fn eta(remaining: u64, speed: f64) -> String {
    if speed > 1.0 {
        format_eta(remaining as f64 / speed)
    } else {
        "--:--:--".to_string()
    }
}

pub fn percent(done: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        done as f64 * 100.0 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_human_size() {
        assert_eq!(human_size(0), "0.00 B");
        assert_eq!(human_size(1536), "1.50 KB");
        assert_eq!(human_size(5 * 1024 * 1024), "5.00 MB");
        assert_eq!(human_size(3 * 1024u64.pow(5)), "3072.00 TB");
    }

    #[test]
    fn test_format_eta() {
        assert_eq!(format_eta(0.0), "00:00:00");
        assert_eq!(format_eta(3661.0), "01:01:01");
        assert_eq!(format_eta(-5.0), "00:00:00");
        assert_eq!(format_eta(1_000_000.0), "99:46:40");
        assert_eq!(eta(100, 0.5), "--:--:--");
        assert_eq!(eta(100, 10.0), "00:00:10");
    }

    #[test]
    fn test_percent_handles_zero_total() {
        assert_eq!(percent(5, 0), 0.0);
        assert_eq!(percent(50, 200), 25.0);
    }

    #[test]
    fn test_progress_state_accumulates_across_threads() {
        let state = ProgressState::new(8_000);
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..1000 {
                        state.add(1);
                    }
                });
            }
        });
        assert_eq!(state.transferred(), 8_000);
        let snapshot = state.snapshot();
        assert_eq!(snapshot.transferred, snapshot.total);
        assert!(snapshot.total_line().starts_with("[TOTAL] 7.81 KB / 7.81 KB (100.0%)"));
    }

    #[test]
    fn test_channel_sink_drops_when_full() {
        let (sink, rx) = ChannelSink::new(2);
        for i in 0..5 {
            sink.on_log(format!("line {}", i));
        }
        let lines: Vec<String> = rx.try_iter().collect();
        assert_eq!(lines, vec!["line 0".to_string(), "line 1".to_string()]);
    }

    #[test]
    fn test_channel_sink_keeps_latest_snapshot() {
        let (sink, _rx) = ChannelSink::new(1);
        assert!(sink.latest().is_none());
        for transferred in [10, 20, 30] {
            sink.on_progress(ProgressSnapshot {
                total: 100,
                transferred,
                elapsed: Duration::from_secs(1),
            });
        }
        assert_eq!(sink.latest().map(|s| s.transferred), Some(30));
    }
}
