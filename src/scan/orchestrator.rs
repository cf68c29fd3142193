// src/scan/orchestrator.rs

use std::collections::HashSet;
use std::fmt;

use chrono::NaiveDateTime;
use log::{debug, info};
use tokio_postgres::GenericClient;
use uuid::Uuid;

use crate::config::MatcherConfig;
use crate::db::{self, LockMode};
use crate::error::ScanError;
use crate::matching::{compile_matchers, MatcherSpec, NGramIndex, Record};
use crate::models::{MatchStatus, PersonRecord};
use crate::scan::progress::{dupescan_channel, PhaseReporter, ScanPhase};
use crate::scan::{ScanMode, ScanTimer};
use crate::store::{self, MatchPairStore};

/// Scan lifecycle. `LockBusy` is terminal and only reachable from `Init`;
/// any other failure propagates out of whatever state it struck in and
/// the caller rolls the transaction back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Init,
    Load,
    Prescan,
    CrossCompare,
    Save,
    Done,
    LockBusy,
}

/// Candidate pair generation strategy. `Likely` is the production path;
/// `All` is the full cross product, kept for offline diagnostics only;
/// `Updated` drives incremental runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairStrategy {
    Likely,
    All,
    Updated,
}

/// Single-threaded batch scan over the whole person register. Owns the
/// scan-scoped records, inverted indexes and working pair set; all are
/// rebuilt fresh per run and dropped with it.
pub struct ScanOrchestrator {
    run_id: Uuid,
    specs: Vec<MatcherSpec>,
    cutoff: f64,
    mode: ScanMode,
    records: Vec<Record>,
    indexes: Vec<NGramIndex>,
    store: MatchPairStore,
    last_run: Option<NaiveDateTime>,
    timer: ScanTimer,
    state: ScanState,
    comparisons: u64,
}

impl ScanOrchestrator {
    pub fn new(config: &MatcherConfig, mode: ScanMode) -> Self {
        let specs = compile_matchers(config);
        let indexes = specs.iter().map(|_| NGramIndex::new()).collect();
        Self {
            run_id: Uuid::new_v4(),
            specs,
            cutoff: config.cutoff,
            mode,
            records: Vec::new(),
            indexes,
            store: MatchPairStore::new(),
            last_run: None,
            timer: ScanTimer::default(),
            state: ScanState::Init,
            comparisons: 0,
        }
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    pub fn store(&self) -> &MatchPairStore {
        &self.store
    }

    pub fn cutoff(&self) -> f64 {
        self.cutoff
    }

    /// Drives the whole scan inside the caller's transaction. The caller
    /// commits, or rolls back by dropping the transaction; the exclusive
    /// lock taken here lives until then. A contended lock fails
    /// immediately with the last known progress snapshot attached.
    pub async fn run<C: GenericClient>(&mut self, client: &C) -> Result<ScanStats, ScanError> {
        self.state = ScanState::Init;
        if !db::try_lock_pairs(client, LockMode::Exclusive).await? {
            self.state = ScanState::LockBusy;
            return Err(ScanError::LockBusy(dupescan_channel().snapshot()));
        }
        info!("Dupe scan {} started ({:?} mode)", self.run_id, self.mode);

        self.state = ScanState::Load;
        self.timer.start("load");
        self.load(client).await?;
        self.timer.stop();

        self.state = ScanState::Prescan;
        self.timer.start("prescan");
        self.prescan();
        self.timer.stop();

        self.state = ScanState::CrossCompare;
        self.timer.start("scan");
        self.cross_compare();
        self.timer.stop();

        self.state = ScanState::Save;
        self.timer.start("save");
        self.save(client).await?;
        self.timer.stop();

        self.state = ScanState::Done;
        Ok(self.stats())
    }

    async fn load<C: GenericClient>(&mut self, client: &C) -> Result<(), ScanError> {
        dupescan_channel().publish(ScanPhase::Load, 0, 0);
        let persons = db::load_persons(client, &self.specs).await?;
        self.ingest(&persons);
        let excluded = self.store.load(client, Some(MatchStatus::Excluded)).await?;
        self.last_run = store::last_run(client).await?;
        debug!(
            "Loaded {} persons and {} excluded pairs",
            self.records.len(),
            excluded
        );
        Ok(())
    }

    /// Builds the scan-scoped records and inverted indexes from person
    /// rows.
    pub fn ingest(&mut self, persons: &[PersonRecord]) {
        for person in persons {
            let record = Record::new(person, &self.specs);
            let rec_idx = self.records.len();
            record.add_to_index(rec_idx, &mut self.indexes);
            self.records.push(record);
        }
    }

    /// Blocking phase: every record mines the inverted indexes for its
    /// likely candidates.
    pub fn prescan(&mut self) {
        let mut reporter = PhaseReporter::new(
            dupescan_channel(),
            ScanPhase::Index,
            self.records.len() as u64,
        );
        let indexes = &self.indexes;
        for (rec_idx, record) in self.records.iter_mut().enumerate() {
            record.prescan(rec_idx, indexes);
            reporter.tick();
        }
    }

    /// Scoring phase. Pairs come from the strategy matching the scan
    /// mode; every score above the running cutoff is recorded and the
    /// store immediately rebalanced, so it never exceeds its bound by
    /// more than one insertion.
    pub fn cross_compare(&mut self) {
        let strategy = match self.mode {
            ScanMode::Full => PairStrategy::Likely,
            ScanMode::Incremental => PairStrategy::Updated,
        };
        self.cross_compare_with(strategy);
    }

    pub fn cross_compare_with(&mut self, strategy: PairStrategy) {
        match strategy {
            PairStrategy::Likely => self.compare_likely(),
            PairStrategy::All => self.compare_all(),
            PairStrategy::Updated => self.compare_updated(),
        }
    }

    fn score_pair(&mut self, a_idx: usize, b_idx: usize) {
        self.comparisons += 1;
        let a = &self.records[a_idx];
        let b = &self.records[b_idx];
        let confidence = a.score(b, b_idx, &self.specs);
        if confidence > self.cutoff {
            self.store.get(a.key, b.key).confidence = Some(confidence);
            self.cutoff = self.store.adjust_cutoff(self.cutoff);
        }
    }

    /// Likely pairs, each unordered pair visited once.
    fn compare_likely(&mut self) {
        let total: u64 = self
            .records
            .iter()
            .enumerate()
            .map(|(a_idx, r)| r.likely.iter().filter(|&&b_idx| b_idx > a_idx).count() as u64)
            .sum();
        let mut reporter = PhaseReporter::new(dupescan_channel(), ScanPhase::Scan, total);
        for a_idx in 0..self.records.len() {
            let candidates: Vec<usize> = self.records[a_idx]
                .likely
                .iter()
                .copied()
                .filter(|&b_idx| b_idx > a_idx)
                .collect();
            for b_idx in candidates {
                reporter.tick();
                self.score_pair(a_idx, b_idx);
            }
        }
    }

    /// Full cross product; diagnostics only, never the production path.
    fn compare_all(&mut self) {
        let n = self.records.len() as u64;
        let total = n.saturating_sub(1) * n / 2;
        let mut reporter = PhaseReporter::new(dupescan_channel(), ScanPhase::Scan, total);
        for a_idx in 0..self.records.len() {
            for b_idx in (a_idx + 1)..self.records.len() {
                reporter.tick();
                self.score_pair(a_idx, b_idx);
            }
        }
    }

    /// Incremental strategy: every pair with at least one member updated
    /// since the previous run, compared against the full population.
    /// Records without a timestamp always count as updated.
    fn compare_updated(&mut self) {
        let threshold = self.last_run;
        let updated: Vec<usize> = self
            .records
            .iter()
            .enumerate()
            .filter(|(_, r)| match (r.last_update, threshold) {
                (None, _) => true,
                (Some(_), None) => true,
                (Some(last_update), Some(floor)) => last_update >= floor,
            })
            .map(|(i, _)| i)
            .collect();
        let total = self.records.len() as u64 * updated.len() as u64;
        let mut reporter = PhaseReporter::new(dupescan_channel(), ScanPhase::Scan, total);
        let mut checked: HashSet<(i64, i64)> = HashSet::new();
        for &a_idx in &updated {
            for b_idx in 0..self.records.len() {
                reporter.tick();
                if a_idx == b_idx {
                    continue;
                }
                let (a_key, b_key) = (self.records[a_idx].key, self.records[b_idx].key);
                let keypair = if a_key > b_key {
                    (b_key, a_key)
                } else {
                    (a_key, b_key)
                };
                if !checked.insert(keypair) {
                    continue;
                }
                self.score_pair(a_idx, b_idx);
            }
        }
    }

    async fn save<C: GenericClient>(&self, client: &C) -> Result<(), ScanError> {
        match self.mode {
            ScanMode::Full => self.store.save_full(client).await,
            ScanMode::Incremental => self.store.save_incremental(client).await,
        }
    }

    pub fn ngram_count(&self) -> usize {
        self.records.iter().map(|r| r.ngram_count()).sum()
    }

    pub fn stats(&self) -> ScanStats {
        ScanStats {
            run_id: self.run_id,
            records: self.records.len(),
            ngrams: self.ngram_count(),
            pairs: self.store.len(),
            comparisons: self.comparisons,
            cutoff: self.cutoff,
            times: self.timer.to_string(),
        }
    }
}

/// Summary of a completed scan, logged on completion and handed back to
/// the spawner.
#[derive(Debug, Clone)]
pub struct ScanStats {
    pub run_id: Uuid,
    pub records: usize,
    pub ngrams: usize,
    pub pairs: usize,
    pub comparisons: u64,
    pub cutoff: f64,
    pub times: String,
}

impl fmt::Display for ScanStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rate = if self.records > 0 {
            format!("{:.1}", self.ngrams as f64 / self.records as f64)
        } else {
            "??".to_string()
        };
        write!(
            f,
            "times: {} ({} ngrams, {} records, {} ngrams/rec, {} comparisons, {} match pairs, cutoff {:.2})",
            self.times, self.ngrams, self.records, rate, self.comparisons, self.pairs, self.cutoff
        )
    }
}
