// src/scan/progress.rs

use std::sync::Arc;
use std::time::Instant;

use log::debug;
use once_cell::sync::Lazy;
use tokio::sync::watch;

/// Event name carried by the progress channel; part of the published
/// contract with interactive consumers.
pub const EVENT_NAME: &str = "dupescan";

/// Progress is only emitted for phases with more work than this, so small
/// datasets don't flood subscribers.
pub const REPORT_THRESHOLD: u64 = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanPhase {
    Load,
    Index,
    Scan,
}

impl ScanPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanPhase::Load => "load",
            ScanPhase::Index => "index",
            ScanPhase::Scan => "scan",
        }
    }
}

/// Last reported progress of an in-flight scan.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProgressSnapshot {
    pub phase: Option<ScanPhase>,
    pub percent: u32,
    pub eta_seconds: u64,
}

impl ProgressSnapshot {
    /// Human message shown to an operator when a second scan bounces off
    /// the table lock.
    pub fn busy_message(&self) -> String {
        let mut msg = String::from("Duplicate scan in progress");
        if let Some(phase) = self.phase {
            msg.push_str(&format!(", {} phase", phase.as_str()));
        }
        if self.percent > 0 && self.eta_seconds > 0 {
            msg.push_str(&format!(
                " {}% complete, estimated completion in {}",
                self.percent,
                format_eta(self.eta_seconds)
            ));
        }
        msg
    }
}

pub fn format_eta(eta_seconds: u64) -> String {
    if eta_seconds < 90 {
        format!("{} seconds", eta_seconds)
    } else if eta_seconds < 90 * 60 {
        format!("{} minutes", eta_seconds / 60)
    } else {
        format!("{} hours", eta_seconds / 3600)
    }
}

/// Process-wide publish/subscribe channel for scan progress. Subscribers
/// poll the latest snapshot without ever blocking the scan; the transport
/// beyond this process is someone else's concern.
#[derive(Clone)]
pub struct ProgressChannel {
    tx: Arc<watch::Sender<ProgressSnapshot>>,
}

impl ProgressChannel {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ProgressSnapshot::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn publish(&self, phase: ScanPhase, percent: u32, eta_seconds: u64) {
        debug!(
            target: EVENT_NAME,
            "{} {}% eta {}s",
            phase.as_str(),
            percent,
            eta_seconds
        );
        self.tx.send_replace(ProgressSnapshot {
            phase: Some(phase),
            percent,
            eta_seconds,
        });
    }

    pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        *self.tx.borrow()
    }
}

impl Default for ProgressChannel {
    fn default() -> Self {
        Self::new()
    }
}

static DUPESCAN: Lazy<ProgressChannel> = Lazy::new(ProgressChannel::new);

/// The channel scans in this process publish on.
pub fn dupescan_channel() -> &'static ProgressChannel {
    &DUPESCAN
}

/// Emits 1% progress steps for one phase with a naive linear ETA, once the
/// phase's total work clears the reporting threshold.
pub struct PhaseReporter {
    channel: ProgressChannel,
    phase: ScanPhase,
    total: u64,
    done: u64,
    last_percent: u32,
    started: Instant,
}

impl PhaseReporter {
    pub fn new(channel: &ProgressChannel, phase: ScanPhase, total: u64) -> Self {
        Self {
            channel: channel.clone(),
            phase,
            total,
            done: 0,
            last_percent: 0,
            started: Instant::now(),
        }
    }

    pub fn tick(&mut self) {
        self.done += 1;
        if self.total <= REPORT_THRESHOLD {
            return;
        }
        let percent = (self.done * 100 / self.total) as u32;
        if percent != self.last_percent {
            let elapsed = self.started.elapsed().as_secs_f64();
            let eta = (elapsed / self.done as f64 * (self.total - self.done) as f64) as u64;
            self.channel.publish(self.phase, percent, eta);
            self.last_percent = percent;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_message_renders_snapshot() {
        assert_eq!(
            ProgressSnapshot::default().busy_message(),
            "Duplicate scan in progress"
        );
        let snapshot = ProgressSnapshot {
            phase: Some(ScanPhase::Index),
            percent: 12,
            eta_seconds: 45,
        };
        assert_eq!(
            snapshot.busy_message(),
            "Duplicate scan in progress, index phase 12% complete, estimated completion in 45 seconds"
        );
    }

    #[test]
    fn eta_formatting() {
        assert_eq!(format_eta(89), "89 seconds");
        assert_eq!(format_eta(90), "1 minutes");
        assert_eq!(format_eta(600), "10 minutes");
        assert_eq!(format_eta(5400), "1 hours");
    }

    #[test]
    fn reporter_gates_small_workloads() {
        let channel = ProgressChannel::new();
        let mut reporter = PhaseReporter::new(&channel, ScanPhase::Index, 10);
        for _ in 0..10 {
            reporter.tick();
        }
        assert!(channel.snapshot().phase.is_none());
    }

    #[test]
    fn reporter_emits_percent_steps_above_threshold() {
        let channel = ProgressChannel::new();
        let total = REPORT_THRESHOLD + 1;
        let mut reporter = PhaseReporter::new(&channel, ScanPhase::Scan, total);
        for _ in 0..=(total / 100) {
            reporter.tick();
        }
        let snapshot = channel.snapshot();
        assert_eq!(snapshot.phase, Some(ScanPhase::Scan));
        assert_eq!(snapshot.percent, 1);
    }

    #[test]
    fn subscribers_see_latest_snapshot() {
        let channel = ProgressChannel::new();
        let rx = channel.subscribe();
        channel.publish(ScanPhase::Load, 0, 0);
        channel.publish(ScanPhase::Scan, 55, 30);
        let snapshot = *rx.borrow();
        assert_eq!(snapshot.phase, Some(ScanPhase::Scan));
        assert_eq!(snapshot.percent, 55);
    }
}
