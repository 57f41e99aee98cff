use anyhow::Result;
use clap::{Arg, ArgAction, Command};
use std::fs::File;
use std::io::BufWriter;
use tracing::{error, info};

use audit_sentinel::audit::{AuditStore, ExportFormat, ExportOptions, Exporter};
use audit_sentinel::config::AppConfig;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let matches = Command::new("audit-export")
        .version("1.0.0")
        .about("Export audit records as JSON Lines for SIEM shipping")
        .arg(
            Arg::new("database-url")
                .short('d')
                .long("database-url")
                .value_name("URL")
                .help("Database URL (defaults to DATABASE_URL)"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("PATH")
                .required(true)
                .help("Output file path"),
        )
        .arg(
            Arg::new("format")
                .long("format")
                .value_name("FORMAT")
                .default_value("default")
                .help("Output shape: 'default' or 'ecs'"),
        )
        .arg(
            Arg::new("from-id")
                .short('f')
                .long("from-id")
                .value_name("ID")
                .value_parser(clap::value_parser!(i64))
                .help("First record id to export"),
        )
        .arg(
            Arg::new("to-id")
                .short('t')
                .long("to-id")
                .value_name("ID")
                .value_parser(clap::value_parser!(i64))
                .help("Last record id to export"),
        )
        .arg(
            Arg::new("chunk-size")
                .short('c')
                .long("chunk-size")
                .value_name("N")
                .value_parser(clap::value_parser!(i64))
                .help("Records per chunk (default 500)"),
        )
        .arg(
            Arg::new("include-context")
                .long("include-context")
                .action(ArgAction::SetTrue)
                .help("Include the context payload (redacted)"),
        )
        .arg(
            Arg::new("include-changes")
                .long("include-changes")
                .action(ArgAction::SetTrue)
                .help("Include old/new value payloads (redacted)"),
        )
        .get_matches();

    let mut config = AppConfig::load()?;
    if let Some(url) = matches.get_one::<String>("database-url") {
        config.database_url = url.clone();
    }
    config.validate()?;

    // Preconditions are checked before any processing starts.
    let format: ExportFormat = match matches
        .get_one::<String>("format")
        .map(String::as_str)
        .unwrap_or("default")
        .parse()
    {
        Ok(format) => format,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let output_path = matches
        .get_one::<String>("output")
        .expect("--output is required by clap");
    let file = match File::create(output_path) {
        Ok(file) => file,
        Err(e) => {
            error!("Cannot write to {}: {}", output_path, e);
            std::process::exit(1);
        }
    };

    let store = AuditStore::connect(&config.database_url).await?;
    if !store.schema_ready().await? {
        error!("Audit table not found; run migrations first");
        std::process::exit(1);
    }

    let options = ExportOptions {
        from_id: matches.get_one::<i64>("from-id").copied(),
        to_id: matches.get_one::<i64>("to-id").copied(),
        chunk_size: matches
            .get_one::<i64>("chunk-size")
            .copied()
            .unwrap_or(config.chain.export_chunk),
        format,
        include_context: matches.get_flag("include-context"),
        include_changes: matches.get_flag("include-changes"),
    };

    info!(output = %output_path, "Exporting audit records");

    let exporter = Exporter::new(&store, &config.export.sensitive_keys);
    let mut sink = BufWriter::new(file);
    let exported = exporter.export(&options, &mut sink).await?;

    println!("✓ Exported {} records to {}", exported, output_path);

    Ok(())
}
