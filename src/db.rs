// src/db.rs

use std::time::Duration;

use anyhow::{Context, Result};
use bb8::Pool;
use bb8_postgres::PostgresConnectionManager;
use log::{debug, info};
use tokio_postgres::error::SqlState;
use tokio_postgres::{Config, GenericClient, NoTls};

use crate::config::MatcherKind;
use crate::error::ScanError;
use crate::matching::MatcherSpec;
use crate::models::PersonRecord;

pub type PgPool = Pool<PostgresConnectionManager<NoTls>>;

/// Reads environment variables and constructs a PostgreSQL config.
fn build_pg_config() -> Config {
    let mut config = Config::new();
    let host = std::env::var("POSTGRES_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port = std::env::var("POSTGRES_PORT")
        .ok()
        .and_then(|p| p.parse::<u16>().ok())
        .unwrap_or(5432);
    let dbname = std::env::var("POSTGRES_DB").unwrap_or_else(|_| "person_register".to_string());
    let user = std::env::var("POSTGRES_USER").unwrap_or_else(|_| "postgres".to_string());
    let password = std::env::var("POSTGRES_PASSWORD").unwrap_or_default();

    info!(
        "DB Config: Host={}, Port={}, DB={}, User={}",
        host, port, dbname, user
    );
    config
        .host(&host)
        .port(port)
        .dbname(&dbname)
        .user(&user)
        .password(&password);
    config.application_name("person_dupe_scan");
    config.connect_timeout(Duration::from_secs(10));
    config
}

/// Initializes the database connection pool.
pub async fn connect() -> Result<PgPool> {
    let config = build_pg_config();
    info!("Connecting to PostgreSQL database...");
    let manager = PostgresConnectionManager::new(config, NoTls);

    let pool = Pool::builder()
        .max_size(10)
        .min_idle(Some(1))
        .idle_timeout(Some(Duration::from_secs(180)))
        .connection_timeout(Duration::from_secs(15))
        .build(manager)
        .await
        .context("Failed to build database connection pool")?;

    // Test connection
    {
        let conn = pool
            .get()
            .await
            .context("Failed to get test connection from pool")?;
        conn.query_one("SELECT 1", &[])
            .await
            .context("Test query 'SELECT 1' failed")?;
    }
    info!("Database connection pool initialized successfully.");
    Ok(pool)
}

/// Loads environment variables from a .env file when present.
pub fn load_env() {
    if dotenv::dotenv().is_ok() {
        debug!("Loaded environment from .env file");
    }
}

/// Table lock modes used for mutual exclusion on the match-pair table:
/// one long-running EXCLUSIVE scan versus brief SHARE collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Share,
    Exclusive,
}

impl LockMode {
    fn as_sql(&self) -> &'static str {
        match self {
            LockMode::Share => "SHARE",
            LockMode::Exclusive => "EXCLUSIVE",
        }
    }
}

/// Non-blocking table lock attempt. Returns false the instant the lock is
/// contended; callers must treat that as "scan already running" and retry
/// later, never wait. Any backing store swapped in here has to keep this
/// fail-fast semantic (a lease row with owner id and heartbeat is the
/// portable fallback).
pub async fn try_lock_pairs<C: GenericClient>(client: &C, mode: LockMode) -> Result<bool, ScanError> {
    let sql = format!("LOCK TABLE dupe_persons IN {} MODE NOWAIT", mode.as_sql());
    match client.batch_execute(&sql).await {
        Ok(()) => Ok(true),
        Err(e) if e.code() == Some(&SqlState::LOCK_NOT_AVAILABLE) => {
            debug!("dupe_persons {} lock busy", mode.as_sql());
            Ok(false)
        }
        Err(e) => Err(ScanError::storage("lock match pair table", e)),
    }
}

const DUPE_PERSONS_DDL: &str = "
CREATE TABLE IF NOT EXISTS dupe_persons (
    low_person_id   BIGINT NOT NULL,
    high_person_id  BIGINT NOT NULL,
    status          CHAR(1) NOT NULL DEFAULT 'N',
    confidence      DOUBLE PRECISION,
    exclude_reason  TEXT,
    timechecked     TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY (low_person_id, high_person_id)
);
CREATE INDEX IF NOT EXISTS dp_timechecked_idx ON dupe_persons (timechecked);
";

/// Creates the match-pair table and its index if missing. The persons
/// table belongs to the register and is only ever read.
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for ensure_schema")?;
    conn.batch_execute(DUPE_PERSONS_DDL)
        .await
        .context("Failed to create dupe_persons schema")?;
    info!("dupe_persons schema is in place");
    Ok(())
}

/// Person columns the compiled matcher set reads, in a stable order with
/// `person_id` and `last_update` first.
fn person_columns(specs: &[MatcherSpec]) -> Vec<String> {
    let mut columns = vec!["person_id".to_string(), "last_update".to_string()];
    for spec in specs {
        let fields: Vec<String> = match spec.kind {
            MatcherKind::Sex => vec!["sex".to_string()],
            MatcherKind::Age => vec!["dob".to_string(), "dob_prec".to_string()],
            MatcherKind::NGram => spec.fields.iter().map(|f| f.to_ascii_lowercase()).collect(),
        };
        for field in fields {
            if !columns.contains(&field) {
                columns.push(field);
            }
        }
    }
    columns
}

/// Fetches every person row into the engine's input shape, selecting only
/// the columns the configured matchers read. The configured fields other
/// than `sex`/`DOB` must be text columns.
pub async fn load_persons<C: GenericClient>(
    client: &C,
    specs: &[MatcherSpec],
) -> Result<Vec<PersonRecord>, ScanError> {
    let columns = person_columns(specs);
    let mut select = vec![
        "person_id::bigint AS person_id".to_string(),
        "last_update".to_string(),
    ];
    select.extend(columns[2..].iter().cloned());
    let sql = format!("SELECT {} FROM persons", select.join(", "));

    let rows = client
        .query(sql.as_str(), &[])
        .await
        .map_err(|e| ScanError::storage("load person records", e))?;

    let mut persons = Vec::with_capacity(rows.len());
    for row in &rows {
        let mut person = PersonRecord::new(row.get::<_, i64>("person_id"));
        person.last_update = row.get("last_update");
        for column in &columns[2..] {
            match column.as_str() {
                "dob" => person.dob = row.get("dob"),
                "dob_prec" => person.dob_prec = row.get("dob_prec"),
                name => {
                    if let Some(value) = row.get::<_, Option<String>>(name) {
                        person.set_value(name, &value);
                    }
                }
            }
        }
        persons.push(person);
    }
    debug!("Loaded {} person rows", persons.len());
    Ok(persons)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MatcherConfig;
    use crate::matching::compile_matchers;

    #[test]
    fn person_columns_cover_configured_fields() {
        let specs = compile_matchers(&MatcherConfig::default());
        let columns = person_columns(&specs);
        assert_eq!(columns[0], "person_id");
        assert_eq!(columns[1], "last_update");
        for expected in ["surname", "given_names", "sex", "dob", "dob_prec", "e_mail"] {
            assert!(columns.contains(&expected.to_string()), "missing {expected}");
        }
        let mut deduped = columns.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(deduped.len(), columns.len());
    }
}
