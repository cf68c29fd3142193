// src/scan/mod.rs

pub mod orchestrator;
pub mod progress;

use std::fmt;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use log::info;
use tokio::task::JoinHandle;

use crate::config::MatcherConfig;
use crate::db::PgPool;

pub use orchestrator::{PairStrategy, ScanOrchestrator, ScanState, ScanStats};

/// Scan scope: a full pass over every candidate pair, or only pairs
/// touching a record changed since the previous run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    Full,
    Incremental,
}

/// Runs a scan as a detached background task on its own pooled
/// connection. The exclusive table lock lives exactly as long as the
/// task's transaction: normal completion commits it, and any failure,
/// cancellation or process exit drops it.
pub fn spawn_scan(pool: PgPool, config: MatcherConfig, mode: ScanMode) -> JoinHandle<Result<ScanStats>> {
    tokio::spawn(async move {
        let mut conn = pool
            .get()
            .await
            .context("Failed to get DB connection for dupe scan")?;
        let tx = conn
            .transaction()
            .await
            .context("Failed to start dupe scan transaction")?;
        let mut scan = ScanOrchestrator::new(&config, mode);
        let stats = scan.run(&tx).await?;
        tx.commit().await.context("Failed to commit dupe scan")?;
        info!("Dupe scan complete: {}", stats);
        Ok(stats)
    })
}

/// Wall-clock accounting per scan phase, for the completion log line.
#[derive(Debug, Default)]
pub struct ScanTimer {
    laps: Vec<(&'static str, Duration)>,
    running: Option<(&'static str, Instant)>,
}

impl ScanTimer {
    pub fn start(&mut self, label: &'static str) {
        self.running = Some((label, Instant::now()));
    }

    pub fn stop(&mut self) {
        if let Some((label, started)) = self.running.take() {
            self.laps.push((label, started.elapsed()));
        }
    }
}

impl fmt::Display for ScanTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (label, elapsed) in &self.laps {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            let secs = elapsed.as_secs_f64();
            if secs > 90.0 {
                write!(f, "{}: {:.1}m", label, secs / 60.0)?;
            } else {
                write!(f, "{}: {:.2}s", label, secs)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_reports_phases_in_order() {
        let mut timer = ScanTimer::default();
        timer.start("load");
        timer.stop();
        timer.start("scan");
        timer.stop();
        let rendered = timer.to_string();
        assert!(rendered.starts_with("load: "), "{rendered}");
        assert!(rendered.contains(", scan: "), "{rendered}");
    }

    #[test]
    fn unbalanced_stop_is_harmless() {
        let mut timer = ScanTimer::default();
        timer.stop();
        assert_eq!(timer.to_string(), "");
    }
}
