use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use recorder_fix::models::{DEFAULT_DB_PATH, DEFAULT_PREVIEW_LIMIT, DEFAULT_RECENT_LIMIT};
use recorder_fix::{DeleteOutcome, EngineOptions, RepairEngine, StateRow};

/// recorder-fix - remove erroneous sensor readings from a Home Assistant
/// recorder database.
///
/// Make a backup of the database before deleting anything: this tool has no
/// undo.
#[derive(Parser, Debug)]
#[command(name = "recorder-fix")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the recorder SQLite database
    #[arg(long, default_value = DEFAULT_DB_PATH, env = "RECORDER_DB")]
    db: PathBuf,

    /// Milliseconds to wait for a lock held by another writer
    #[arg(long, default_value_t = 5000, env = "RECORDER_BUSY_TIMEOUT_MS")]
    busy_timeout_ms: u64,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List all sensors with their metadata_id
    List,
    /// Show metadata_id, statistic id and a quick state preview
    Find {
        entity_id: String,
        #[arg(long, default_value_t = DEFAULT_PREVIEW_LIMIT)]
        preview: i64,
    },
    /// Show all unique state values of a sensor
    Values { entity_id: String },
    /// Show the latest raw records of a sensor
    Raw {
        entity_id: String,
        #[arg(long, default_value_t = DEFAULT_RECENT_LIMIT)]
        limit: i64,
    },
    /// Delete every record with the given state value, in all tables
    Delete {
        entity_id: String,
        #[arg(allow_hyphen_values = true)]
        value: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "recorder_fix=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let options = EngineOptions {
        busy_timeout: Duration::from_millis(cli.busy_timeout_ms),
        ..EngineOptions::default()
    };
    let engine = RepairEngine::open_with(&cli.db, options)
        .with_context(|| format!("failed to open {}", cli.db.display()))?;

    let result = run(&engine, cli.command, cli.json);
    engine.close().context("failed to close database")?;
    result
}

fn run(engine: &RepairEngine, command: Command, json: bool) -> Result<()> {
    match command {
        Command::List => {
            let entities = engine.list_entities()?;
            if json {
                return print_json(&entities);
            }
            if entities.is_empty() {
                println!("No sensors found.");
            }
            for entity in &entities {
                println!("  {} → {}", entity.entity_id, entity.metadata_id);
            }
        }
        Command::Find { entity_id, preview } => {
            let summary = engine.find_entity(&entity_id, Some(preview))?;
            if json {
                return print_json(&summary);
            }
            match summary {
                None => println!("Sensor '{entity_id}' not found."),
                Some(summary) => {
                    println!(
                        "metadata_id for '{}' is {}",
                        summary.entity_id, summary.metadata_id
                    );
                    match summary.statistic_id {
                        Some(id) => println!("statistic id for '{}' is {id}", summary.entity_id),
                        None => println!("'{}' has no long-term statistics", summary.entity_id),
                    }
                    print_states(&summary.recent);
                }
            }
        }
        Command::Values { entity_id } => {
            let values = engine.list_unique_values(&entity_id)?;
            if json {
                return print_json(&values);
            }
            if values.is_empty() {
                println!("No values found for sensor '{entity_id}'.");
            }
            for value in &values {
                println!("  {value}");
            }
        }
        Command::Raw { entity_id, limit } => {
            let rows = engine.list_recent_states(&entity_id, Some(limit))?;
            if json {
                return print_json(&rows);
            }
            if rows.is_empty() {
                println!("No data for sensor '{entity_id}'.");
            }
            print_states(&rows);
        }
        Command::Delete { entity_id, value } => {
            let outcome = engine
                .delete_value_everywhere(&entity_id, &value)
                .with_context(|| format!("deleting '{value}' for '{entity_id}' was rolled back"))?;
            if json {
                return print_json(&outcome);
            }
            print!("{}", format_deletion(&entity_id, &value, &outcome));
        }
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_states(rows: &[StateRow]) {
    for row in rows {
        println!(
            "  {} → {} (id: {})",
            row.last_updated.as_deref().unwrap_or("-"),
            row.state.as_deref().unwrap_or("<null>"),
            row.state_id
        );
    }
}

fn format_deletion(entity_id: &str, value: &str, outcome: &DeleteOutcome) -> String {
    let counts = match outcome {
        DeleteOutcome::EntityNotFound => {
            return format!("Sensor '{entity_id}' not found in states_meta. Nothing deleted.\n");
        }
        DeleteOutcome::Deleted(counts) => counts,
    };
    let mut out = format!(
        "Deleted {} records from 'states'\n\
         Deleted {} records from 'statistics'\n\
         Deleted {} records from 'statistics_short_term'\n\
         Total deleted records: {}\n",
        counts.states,
        counts.statistics,
        counts.statistics_short_term,
        counts.total()
    );
    if counts.short_term_foreign > 0 {
        out.push_str(&format!(
            "Note: {} 'statistics_short_term' record(s) matching {value} belonged to other entities.\n",
            counts.short_term_foreign
        ));
    }
    out
}
