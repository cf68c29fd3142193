// src/bin/explain_pair.rs
//
// Prints the per-group similarity breakdown for one pair of person ids,
// using the same matcher configuration as a real scan.

use anyhow::{Context, Result};
use clap::Parser;

use dupescan_lib::config::MatcherConfig;
use dupescan_lib::db::{connect, load_env, load_persons};
use dupescan_lib::matching::{compile_matchers, NGramIndex, Record};

#[derive(Parser)]
#[command(name = "explain_pair", about = "Explain a candidate pair's similarity score")]
struct Args {
    person_a: i64,
    person_b: i64,
    /// Matcher configuration as a JSON file; defaults apply when omitted.
    #[arg(long)]
    config: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    load_env();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read matcher config {}", path.display()))?;
            serde_json::from_str(&text).context("Failed to parse matcher config")?
        }
        None => MatcherConfig::default(),
    };
    let specs = compile_matchers(&config);

    let pool = connect().await.context("Failed to connect to database")?;
    let conn = pool.get().await.context("Failed to get DB connection")?;
    let persons = load_persons(&*conn, &specs).await?;

    let person_a = persons
        .iter()
        .find(|p| p.id == args.person_a)
        .with_context(|| format!("person {} not found", args.person_a))?;
    let person_b = persons
        .iter()
        .find(|p| p.id == args.person_b)
        .with_context(|| format!("person {} not found", args.person_b))?;

    let mut indexes: Vec<NGramIndex> = specs.iter().map(|_| NGramIndex::new()).collect();
    let mut rec_a = Record::new(person_a, &specs);
    let mut rec_b = Record::new(person_b, &specs);
    rec_a.add_to_index(0, &mut indexes);
    rec_b.add_to_index(1, &mut indexes);
    rec_a.prescan(0, &indexes);
    rec_b.prescan(1, &indexes);

    println!("{}", rec_a.describe_match(&rec_b, 1, &specs));
    Ok(())
}
