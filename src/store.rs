// src/store.rs

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use log::{debug, info, warn};
use tokio_postgres::types::ToSql;
use tokio_postgres::GenericClient;

use crate::db::{try_lock_pairs, LockMode, PgPool};
use crate::error::ScanError;
use crate::models::{MatchPair, MatchStatus};
use crate::scan::progress::dupescan_channel;

/// Hard cap on retained New-status pairs; the adaptive cutoff trades
/// recall for staying under it.
pub const MAX_MATCHES: usize = 10_000;

const CUTOFF_STEP: f64 = 0.05;
const CUTOFF_CEILING: f64 = 0.9;
const SAVE_BATCH_ROWS: usize = 500;

/// In-memory working set of match pairs, keyed by canonical `(low, high)`
/// id order, plus the adaptive eviction machinery that keeps it bounded.
#[derive(Debug)]
pub struct MatchPairStore {
    pairs: BTreeMap<(i64, i64), MatchPair>,
    max_matches: usize,
}

impl Default for MatchPairStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MatchPairStore {
    pub fn new() -> Self {
        Self {
            pairs: BTreeMap::new(),
            max_matches: MAX_MATCHES,
        }
    }

    pub fn with_max_matches(max_matches: usize) -> Self {
        Self {
            pairs: BTreeMap::new(),
            max_matches,
        }
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    fn new_count(&self) -> usize {
        self.pairs
            .values()
            .filter(|p| p.status == MatchStatus::New)
            .count()
    }

    /// Canonicalizes the id pair and lazily creates a New entry.
    pub fn get(&mut self, id_a: i64, id_b: i64) -> &mut MatchPair {
        let key = if id_a > id_b { (id_b, id_a) } else { (id_a, id_b) };
        self.pairs
            .entry(key)
            .or_insert_with(|| MatchPair::new(key.0, key.1))
    }

    /// Pairs ordered best match first; unscored pairs sort last and equal
    /// confidences order by ascending id pair so report output is stable.
    /// Presentation only.
    pub fn sorted(&self) -> Vec<&MatchPair> {
        let mut pairs: Vec<&MatchPair> = self.pairs.values().collect();
        pairs.sort_by(|a, b| {
            let ca = a.confidence.unwrap_or(f64::NEG_INFINITY);
            let cb = b.confidence.unwrap_or(f64::NEG_INFINITY);
            cb.partial_cmp(&ca)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| (a.low_id, a.high_id).cmp(&(b.low_id, b.high_id)))
        });
        pairs
    }

    /// Raises the cutoff in steps, evicting New pairs that fall below it,
    /// until the New count fits the cap or the ceiling is reached.
    /// Excluded and Conflict pairs are sticky collaborator decisions and
    /// are never evicted, whatever their score.
    pub fn adjust_cutoff(&mut self, mut cutoff: f64) -> f64 {
        while self.new_count() > self.max_matches && cutoff < CUTOFF_CEILING {
            cutoff += CUTOFF_STEP;
            self.pairs.retain(|_, p| {
                p.status != MatchStatus::New
                    || p.confidence.unwrap_or(f64::NEG_INFINITY) >= cutoff
            });
        }
        cutoff
    }

    /// Loads persisted pairs, optionally restricted to one status. Scans
    /// load the Excluded baseline so operator decisions are never
    /// re-scored as New.
    pub async fn load<C: GenericClient>(
        &mut self,
        client: &C,
        status: Option<MatchStatus>,
    ) -> Result<usize, ScanError> {
        const BASE_SQL: &str = "SELECT low_person_id, high_person_id, confidence, status, \
                                exclude_reason FROM dupe_persons";
        let rows = match status {
            Some(status) => {
                let sql = format!("{} WHERE status = $1", BASE_SQL);
                client
                    .query(sql.as_str(), &[&status.as_str()])
                    .await
                    .map_err(|e| ScanError::storage("load match pairs", e))?
            }
            None => client
                .query(BASE_SQL, &[])
                .await
                .map_err(|e| ScanError::storage("load match pairs", e))?,
        };

        let mut loaded = 0;
        for row in &rows {
            let code: String = row.get("status");
            let status = match MatchStatus::from_code(code.trim()) {
                Some(status) => status,
                None => {
                    warn!("Ignoring match pair with unknown status {:?}", code);
                    continue;
                }
            };
            let pair = MatchPair {
                low_id: row.get("low_person_id"),
                high_id: row.get("high_person_id"),
                confidence: row.get("confidence"),
                status,
                exclude_reason: row.get("exclude_reason"),
            };
            self.pairs.insert((pair.low_id, pair.high_id), pair);
            loaded += 1;
        }
        Ok(loaded)
    }

    /// Full-scan persistence: replaces every non-Conflict row with the
    /// in-memory set. Conflict rows stay put, and an insert landing on a
    /// surviving Conflict row is a no-op.
    pub async fn save_full<C: GenericClient>(&self, client: &C) -> Result<(), ScanError> {
        client
            .execute(
                "DELETE FROM dupe_persons WHERE status != $1",
                &[&MatchStatus::Conflict.as_str()],
            )
            .await
            .map_err(|e| ScanError::storage("clear match pairs", e))?;
        self.write_batches(
            client,
            "ON CONFLICT (low_person_id, high_person_id) DO NOTHING",
            "save match pairs",
        )
        .await
    }

    /// Incremental persistence: upsert only, never delete, and never
    /// clobber a Conflict row another collaborator wrote.
    pub async fn save_incremental<C: GenericClient>(&self, client: &C) -> Result<(), ScanError> {
        self.write_batches(
            client,
            "ON CONFLICT (low_person_id, high_person_id) DO UPDATE SET \
             confidence = EXCLUDED.confidence, \
             status = EXCLUDED.status, \
             exclude_reason = EXCLUDED.exclude_reason, \
             timechecked = CURRENT_TIMESTAMP \
             WHERE dupe_persons.status != 'C'",
            "upsert match pairs",
        )
        .await
    }

    async fn write_batches<C: GenericClient>(
        &self,
        client: &C,
        conflict_clause: &str,
        op: &'static str,
    ) -> Result<(), ScanError> {
        let all: Vec<&MatchPair> = self.pairs.values().collect();
        for chunk in all.chunks(SAVE_BATCH_ROWS) {
            let statuses: Vec<&'static str> = chunk.iter().map(|p| p.status.as_str()).collect();
            let mut clauses = Vec::with_capacity(chunk.len());
            let mut params: Vec<&(dyn ToSql + Sync)> = Vec::with_capacity(chunk.len() * 5);
            for (i, pair) in chunk.iter().enumerate() {
                let base = i * 5;
                clauses.push(format!(
                    "(${}, ${}, ${}, ${}, ${}, CURRENT_TIMESTAMP)",
                    base + 1,
                    base + 2,
                    base + 3,
                    base + 4,
                    base + 5
                ));
                params.push(&pair.low_id);
                params.push(&pair.high_id);
                params.push(&pair.confidence);
                params.push(&statuses[i]);
                params.push(&pair.exclude_reason);
            }
            let sql = format!(
                "INSERT INTO dupe_persons \
                 (low_person_id, high_person_id, confidence, status, exclude_reason, timechecked) \
                 VALUES {} {}",
                clauses.join(", "),
                conflict_clause
            );
            client
                .execute(sql.as_str(), &params)
                .await
                .map_err(|e| ScanError::storage(op, e))?;
        }
        debug!("Persisted {} match pairs", self.pairs.len());
        Ok(())
    }
}

/// Timestamp of the previous run: the oldest `timechecked` across the
/// persisted pairs, used as the incremental-scan floor.
pub async fn last_run<C: GenericClient>(client: &C) -> Result<Option<NaiveDateTime>, ScanError> {
    let row = client
        .query_one("SELECT min(timechecked) AS last_run FROM dupe_persons", &[])
        .await
        .map_err(|e| ScanError::storage("read last run timestamp", e))?;
    Ok(row.get("last_run"))
}

/// Loads the full review list under a brief SHARE lock, best match first.
pub async fn load_review_list(pool: &PgPool) -> Result<Vec<MatchPair>> {
    let mut conn = pool
        .get()
        .await
        .context("Failed to get DB connection for review list")?;
    let tx = conn
        .transaction()
        .await
        .context("Failed to start review list transaction")?;
    if !try_lock_pairs(&tx, LockMode::Share).await? {
        return Err(ScanError::LockBusy(dupescan_channel().snapshot()).into());
    }
    let mut store = MatchPairStore::new();
    store.load(&tx, None).await?;
    tx.commit()
        .await
        .context("Failed to commit review list transaction")?;
    Ok(store.sorted().into_iter().cloned().collect())
}

/// Import-conflict rows only; a read-only snapshot, no lock needed.
pub async fn load_conflicts(pool: &PgPool) -> Result<Vec<MatchPair>> {
    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for conflict list")?;
    let mut store = MatchPairStore::new();
    store.load(&*conn, Some(MatchStatus::Conflict)).await?;
    Ok(store.sorted().into_iter().cloned().collect())
}

/// Upserts one pair's status under a brief SHARE lock, so a concurrently
/// running exclusive scan cannot commit underneath the change (and vice
/// versa). Confidence is only overwritten when a new value is supplied.
pub async fn set_pair_status(
    pool: &PgPool,
    id_a: i64,
    id_b: i64,
    status: MatchStatus,
    exclude_reason: Option<&str>,
    confidence: Option<f64>,
) -> Result<()> {
    let (low, high) = if id_a > id_b { (id_b, id_a) } else { (id_a, id_b) };
    let mut conn = pool
        .get()
        .await
        .context("Failed to get DB connection for set_pair_status")?;
    let tx = conn
        .transaction()
        .await
        .context("Failed to start pair status transaction")?;
    if !try_lock_pairs(&tx, LockMode::Share).await? {
        return Err(ScanError::LockBusy(dupescan_channel().snapshot()).into());
    }

    let existing = tx
        .query_opt(
            "SELECT confidence FROM dupe_persons \
             WHERE low_person_id = $1 AND high_person_id = $2 FOR UPDATE",
            &[&low, &high],
        )
        .await
        .context("Failed to look up match pair")?;
    match existing {
        Some(row) => {
            let confidence = confidence.or_else(|| row.get("confidence"));
            tx.execute(
                "UPDATE dupe_persons \
                 SET status = $3, exclude_reason = $4, confidence = $5 \
                 WHERE low_person_id = $1 AND high_person_id = $2",
                &[&low, &high, &status.as_str(), &exclude_reason, &confidence],
            )
            .await
            .context("Failed to update match pair status")?;
        }
        None => {
            tx.execute(
                "INSERT INTO dupe_persons \
                 (low_person_id, high_person_id, status, exclude_reason, confidence) \
                 VALUES ($1, $2, $3, $4, $5)",
                &[&low, &high, &status.as_str(), &exclude_reason, &confidence],
            )
            .await
            .context("Failed to insert match pair status")?;
        }
    }
    tx.commit()
        .await
        .context("Failed to commit pair status change")?;
    info!("Set pair ({}, {}) status to {}", low, high, status.as_str());
    Ok(())
}

/// Operator exclusion from the review UI.
pub async fn exclude(pool: &PgPool, id_a: i64, id_b: i64, reason: &str) -> Result<()> {
    set_pair_status(pool, id_a, id_b, MatchStatus::Excluded, Some(reason), None).await
}

/// Reverses an exclusion; the pair becomes a fresh candidate again.
pub async fn clear_exclude(pool: &PgPool, id_a: i64, id_b: i64) -> Result<()> {
    set_pair_status(pool, id_a, id_b, MatchStatus::New, None, None).await
}

/// Import-pipeline conflict marker; conflicts are pinned at full
/// confidence and survive every scan.
pub async fn conflict(pool: &PgPool, id_a: i64, id_b: i64) -> Result<()> {
    set_pair_status(pool, id_a, id_b, MatchStatus::Conflict, None, Some(1.0)).await
}

/// Current status of one pair, defaulting to New when never scored.
pub async fn pair_status(
    pool: &PgPool,
    id_a: i64,
    id_b: i64,
) -> Result<(MatchStatus, Option<String>)> {
    let (low, high) = if id_a > id_b { (id_b, id_a) } else { (id_a, id_b) };
    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for pair_status")?;
    let row = conn
        .query_opt(
            "SELECT status, exclude_reason FROM dupe_persons \
             WHERE low_person_id = $1 AND high_person_id = $2",
            &[&low, &high],
        )
        .await
        .context("Failed to read match pair status")?;
    Ok(match row {
        Some(row) => {
            let code: String = row.get("status");
            (
                MatchStatus::from_code(code.trim()).unwrap_or(MatchStatus::New),
                row.get("exclude_reason"),
            )
        }
        None => (MatchStatus::New, None),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_canonicalizes_pair_order() {
        let mut store = MatchPairStore::new();
        store.get(42, 7).confidence = Some(0.8);
        let pair = store.get(7, 42);
        assert_eq!((pair.low_id, pair.high_id), (7, 42));
        assert_eq!(pair.confidence, Some(0.8));
        assert_eq!(store.len(), 1);
        for pair in store.sorted() {
            assert!(pair.low_id < pair.high_id);
        }
    }

    #[test]
    fn sorted_orders_best_first() {
        let mut store = MatchPairStore::new();
        store.get(1, 2).confidence = Some(0.6);
        store.get(3, 4).confidence = Some(0.9);
        store.get(5, 6); // never scored
        let order: Vec<_> = store
            .sorted()
            .iter()
            .map(|p| (p.low_id, p.high_id))
            .collect();
        assert_eq!(order, vec![(3, 4), (1, 2), (5, 6)]);
    }

    #[test]
    fn adaptive_cutoff_converges() {
        let mut store = MatchPairStore::with_max_matches(100);
        // three bands of New pairs: 120 weak, 120 middling, 90 strong
        for i in 0..120 {
            store.get(i, 1000 + i).confidence = Some(0.52);
        }
        for i in 200..320 {
            store.get(i, 1000 + i).confidence = Some(0.57);
        }
        for i in 400..490 {
            store.get(i, 1000 + i).confidence = Some(0.87);
        }
        {
            let excluded = store.get(900, 901);
            excluded.status = MatchStatus::Excluded;
            excluded.confidence = Some(0.01);
        }
        {
            let conflict = store.get(902, 903);
            conflict.status = MatchStatus::Conflict;
            conflict.confidence = Some(1.0);
        }

        // two steps clear the weak and middling bands, then the strong
        // band fits the cap
        let cutoff = store.adjust_cutoff(0.5);
        assert!((cutoff - 0.6).abs() < 1e-9);
        let new_count = store
            .sorted()
            .iter()
            .filter(|p| p.status == MatchStatus::New)
            .count();
        assert_eq!(new_count, 90);
        // sticky decisions survive regardless of score
        assert!(store
            .sorted()
            .iter()
            .any(|p| p.status == MatchStatus::Excluded));
        assert!(store
            .sorted()
            .iter()
            .any(|p| p.status == MatchStatus::Conflict));
    }

    #[test]
    fn cutoff_stops_rising_at_ceiling() {
        let mut store = MatchPairStore::with_max_matches(10);
        for i in 0..50 {
            store.get(i, 100 + i).confidence = Some(0.99);
        }
        let cutoff = store.adjust_cutoff(0.5);
        assert!((cutoff - 0.9).abs() < 1e-9);
        // everything scores above the ceiling, so nothing was evicted
        assert_eq!(store.len(), 50);
    }

    #[test]
    fn unscored_new_pairs_are_evicted_first() {
        let mut store = MatchPairStore::with_max_matches(1);
        store.get(1, 2);
        store.get(3, 4).confidence = Some(0.95);
        store.get(5, 6).confidence = Some(0.95);
        store.adjust_cutoff(0.5);
        assert!(store
            .sorted()
            .iter()
            .all(|p| p.confidence.is_some()));
    }
}
