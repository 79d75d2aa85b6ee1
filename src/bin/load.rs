use anyhow::{Context, Result};
use clap::Parser;
use fixdump::db::{migrate, Db};
use fixdump::schema::introspect;
use fixdump::snapshot::{load_snapshot, read_snapshot};
use fixdump::Config;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "load-snapshot")]
#[command(about = "Replay a dumped snapshot into a database with foreign keys enforced")]
struct Args {
    /// Snapshot JSON written by dump-object
    snapshot: PathBuf,

    /// Target database (created if missing)
    #[arg(long)]
    db: PathBuf,

    /// Directory of NNN_name.sql files applied before loading
    #[arg(long)]
    schema_dir: Option<PathBuf>,

    /// Config file supplying natural keys and table overrides
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load_from(args.config.as_deref())?;

    env_logger::Builder::from_env(
        env_logger::Env::default()
            .filter_or("RUST_LOG", &config.store.log_level)
    ).init();

    let file = File::open(&args.snapshot)
        .with_context(|| format!("Failed to open {}", args.snapshot.display()))?;
    let entries = read_snapshot(BufReader::new(file))
        .with_context(|| format!("Failed to parse {}", args.snapshot.display()))?;
    log::info!("Read {} entries from {}", entries.len(), args.snapshot.display());

    let db = Db::new(&args.db);
    let report = db.with_connection(|conn| {
        if let Some(dir) = &args.schema_dir {
            let applied = migrate::apply_schema_files(conn, dir)?;
            log::info!("Applied {} schema files", applied);
        }
        let mut schema = introspect(conn, &config.schema.model_tables)?;
        schema.apply_natural_keys(&config.natural_keys)?;
        load_snapshot(conn, &schema, &entries)
    })?;

    println!(
        "Loaded {} entries into {} ({} inserted, {} updated)",
        report.total(),
        args.db.display(),
        report.inserted,
        report.updated
    );

    Ok(())
}
