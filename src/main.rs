//! ORCA archive recovery and reconciliation tool
//!
//! Provides a CLI interface over the restore-request orchestrator, the
//! S3-inventory reconciliation pipeline, and the report readers.

// archivetool/src/main.rs
mod config;
mod db;
mod errors;
mod reconcile;
mod recovery;
mod store;

use anyhow::{Context, Result};
use std::env;
use std::fs;
use std::process::ExitCode;

/// Main entry point for the recovery/reconciliation tool
#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    match run_app().await {
        Ok(_) => {
            println!("✅ Operation completed successfully.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_app() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    let choice = args
        .get(1)
        .map(|c| c.trim().to_string())
        .unwrap_or_default();

    match choice.as_str() {
        "recover" => {
            println!("🚀 Starting Restore Request Process...");
            let event = serde_json::from_str(&read_event_file(&args)?)
                .context("Failed to parse recovery event JSON")?;
            let output = recovery::run_recovery_flow(event)
                .await
                .context("Restore request process failed")?;
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        "reconcile" => {
            println!("⚙️ Starting Reconciliation Process...");
            let event = serde_json::from_str(&read_event_file(&args)?)
                .context("Failed to parse reconciliation event JSON")?;
            let job_id = reconcile::run_reconcile_flow(event)
                .await
                .context("Reconciliation process failed")?;
            println!("Reconciliation job id: {}", job_id);
        }
        "report" => {
            println!("🔍 Reading Reconciliation Report...");
            let request = serde_json::from_str(&read_event_file(&args)?)
                .context("Failed to parse report request JSON")?;
            let response = reconcile::run_report_flow(request)
                .await
                .context("Report read failed")?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        "init-db" => {
            println!("🛠 Applying database schema...");
            let db_config = config::DbConfig::from_env()?;
            let pool = db::connect(&db_config).await?;
            db::apply_schema(&pool)
                .await
                .context("Schema application failed")?;
        }
        _ => {
            println!(
                "❌ Invalid choice. Usage: archivetool <recover|reconcile|report> <event.json>, or archivetool init-db"
            );
            anyhow::bail!("Invalid operation choice");
        }
    }
    Ok(())
}

/// Reads the event document named by the second CLI argument.
fn read_event_file(args: &[String]) -> Result<String> {
    let path = args
        .get(2)
        .context("Expected a path to an event JSON file as the second argument")?;
    fs::read_to_string(path).with_context(|| format!("Failed to read event file {}", path))
}
