use anyhow::Result;
use clap::{Arg, ArgAction, Command};
use tracing::{error, info};

use audit_sentinel::audit::{AuditStore, ChainHasher, ChainRepairer};
use audit_sentinel::config::AppConfig;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let matches = Command::new("audit-rehash")
        .version("1.0.0")
        .about("Recompute audit chain hashes and repair drifted records")
        .arg(
            Arg::new("database-url")
                .short('d')
                .long("database-url")
                .value_name("URL")
                .help("Database URL (defaults to DATABASE_URL)"),
        )
        .arg(
            Arg::new("from-id")
                .short('f')
                .long("from-id")
                .value_name("ID")
                .value_parser(clap::value_parser!(i64))
                .help("Resume rehash from this record id"),
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
            Arg::new("dry-run")
                .long("dry-run")
                .action(ArgAction::SetTrue)
                .help("Compute and count drifted records without writing"),
        )
        .get_matches();

    let mut config = AppConfig::load()?;
    if let Some(url) = matches.get_one::<String>("database-url") {
        config.database_url = url.clone();
    }
    config.validate()?;

    let from_id = matches.get_one::<i64>("from-id").copied();
    let chunk_size = matches
        .get_one::<i64>("chunk-size")
        .copied()
        .unwrap_or(config.chain.rehash_chunk);
    let dry_run = matches.get_flag("dry-run");

    let store = AuditStore::connect(&config.database_url).await?;
    if !store.schema_ready().await? {
        error!("Audit table not found; run migrations first");
        std::process::exit(1);
    }

    let hasher = ChainHasher::new(&config.signature)?;
    let repairer = ChainRepairer::new(&store, &hasher, chunk_size, dry_run);

    if dry_run {
        println!("Dry run: no records will be written");
    }

    info!(?from_id, chunk_size, dry_run, "Rehashing audit chain");
    let report = repairer.rehash(from_id).await?;

    println!(
        "{} records processed, {} {}",
        report.total,
        report.updated,
        if dry_run { "would be updated" } else { "updated" }
    );
    println!("✓ Rehash completed");

    Ok(())
}
