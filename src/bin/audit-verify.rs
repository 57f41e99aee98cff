use anyhow::Result;
use clap::{Arg, Command};
use tracing::{error, info};

use audit_sentinel::audit::{AuditStore, ChainHasher, ChainVerifier};
use audit_sentinel::config::AppConfig;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let matches = Command::new("audit-verify")
        .version("1.0.0")
        .about("Verify audit log hash chain integrity")
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
                .help("Resume verification from this record id"),
        )
        .arg(
            Arg::new("chunk-size")
                .short('c')
                .long("chunk-size")
                .value_name("N")
                .value_parser(clap::value_parser!(i64))
                .help("Records per chunk (default 500)"),
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
        .unwrap_or(config.chain.verify_chunk);

    let store = AuditStore::connect(&config.database_url).await?;
    if !store.schema_ready().await? {
        error!("Audit table not found; run migrations first");
        std::process::exit(1);
    }

    let hasher = ChainHasher::new(&config.signature)?;
    let verifier = ChainVerifier::new(&store, &hasher, chunk_size);

    info!(?from_id, chunk_size, "Verifying audit chain");
    let report = verifier.verify(from_id).await?;

    println!("{}", report.summary());

    if report.is_clean() {
        println!("✓ Audit chain verified");
        Ok(())
    } else {
        println!("✗ Audit chain has integrity findings");
        std::process::exit(1);
    }
}
