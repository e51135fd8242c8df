use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, bail};
use serde::Serialize;

use label_relay::channels::{EmailConfig, ImapSource, SmtpDelivery};
use label_relay::config::PipelineConfig;
use label_relay::extract::ocr_command::OcrCommandDocuments;
use label_relay::pipeline::Pipeline;
use label_relay::store::{LibSqlTableStore, TableStore};
use label_relay::table::METADATA_PREFIX_WIDTH;

const USAGE: &str = "\
Usage: label-relay <command>

Commands:
  run                          Ingest, clean, and report
  ingest                       Fetch new attachments into the raw table
  clean                        Move unprocessed raw rows into the clean table
  report                       Send one export per sender group
  dedup <table> [prefix]       Remove duplicate rows from a table
  cleanup-labels [max]         Clear the fetched marker from source messages
  check                        Verify tables and source connectivity";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first().map(String::as_str) else {
        eprintln!("{USAGE}");
        std::process::exit(2);
    };

    let config = PipelineConfig::from_env().context("invalid configuration")?;

    eprintln!("📦 Label Relay v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Database: {}", config.store.path.display());

    // ── Store ───────────────────────────────────────────────────────
    let store = LibSqlTableStore::new_local(&config.store.path)
        .await
        .unwrap_or_else(|e| {
            eprintln!(
                "Error: Failed to open database at {}: {}",
                config.store.path.display(),
                e
            );
            std::process::exit(1);
        });
    for name in config.tables.all() {
        store
            .ensure_table(name)
            .await
            .with_context(|| format!("failed to create table {name}"))?;
    }

    // ── Collaborators ───────────────────────────────────────────────
    let pdf_enabled = config.pdf.enabled;
    let scratch_dir = config
        .store
        .path
        .parent()
        .unwrap_or(Path::new("."))
        .join("ocr-scratch");
    let mut pipeline = Pipeline::new(Arc::new(store), config);

    if let Some(email) = EmailConfig::from_env() {
        eprintln!("   Mailbox: {}@{}", email.username, email.imap_host);
        pipeline = pipeline
            .with_source(Arc::new(ImapSource::new(email.clone())))
            .with_delivery(Arc::new(SmtpDelivery::new(email)));
    } else {
        eprintln!("   Mailbox: disabled (EMAIL_IMAP_HOST not set)");
    }

    if pdf_enabled {
        eprintln!("   OCR scratch: {}", scratch_dir.display());
        pipeline = pipeline.with_extractor(Arc::new(OcrCommandDocuments::new(scratch_dir)));
    }

    // ── Command ─────────────────────────────────────────────────────
    match command {
        "run" => print_report(&pipeline.run().await?),
        "ingest" => print_report(&pipeline.ingest().await?),
        "clean" => print_report(&pipeline.clean().await?),
        "report" => print_report(&pipeline.report().await?),
        "dedup" => {
            let Some(table) = args.get(1) else {
                bail!("dedup needs a table name\n\n{USAGE}");
            };
            let prefix = match args.get(2) {
                Some(raw) => raw
                    .parse()
                    .with_context(|| format!("invalid prefix width: {raw}"))?,
                None => METADATA_PREFIX_WIDTH,
            };
            print_report(&pipeline.dedup(table, prefix).await?)
        }
        "cleanup-labels" => {
            let max = match args.get(1) {
                Some(raw) => raw
                    .parse()
                    .with_context(|| format!("invalid message count: {raw}"))?,
                None => 500,
            };
            let cleared = pipeline.cleanup_labels(max).await?;
            eprintln!("   Cleared {cleared} fetched markers");
            Ok(())
        }
        "check" => {
            let report = pipeline.check_configuration().await;
            print_report(&report)?;
            if !report.is_ok() {
                std::process::exit(1);
            }
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}\n\n{USAGE}");
            std::process::exit(2);
        }
    }
}

fn print_report<T: Serialize>(report: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}
