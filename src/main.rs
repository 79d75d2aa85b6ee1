use anyhow::{Context, Result};
use clap::Parser;
use fixdump::db::Db;
use fixdump::dump::parse_type_list;
use fixdump::graph::{FilterPolicy, OrderStrategy};
use fixdump::schema::parse_type_identifier;
use fixdump::snapshot::write_snapshot;
use fixdump::store::SqliteStore;
use fixdump::{dump, Config, DumpError, DumpRequest};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "dump-object")]
#[command(about = "Dump records and everything they depend on as a loadable JSON fixture")]
struct Args {
    /// Type to dump, as app_name.model_name
    object_class: Option<String>,

    /// Primary keys to dump; all rows (or a sample) when omitted
    ids: Vec<String>,

    /// Follow reverse and many-to-many relations as well as foreign keys
    #[arg(short, long)]
    kitchensink: bool,

    /// Identify records by natural key where one is configured
    #[arg(short, long)]
    natural: bool,

    /// Types to leave out, comma or space separated
    #[arg(short = 'e', long = "exclude-list", alias = "exclude_list")]
    exclude: Vec<String>,

    /// Only emit these types (plus the dumped type)
    #[arg(short = 'f', long = "filter-list", alias = "filter_list")]
    include: Vec<String>,

    /// Stop expanding at this depth
    #[arg(short, long)]
    depth: Option<usize>,

    /// Max rows followed per relation per record
    #[arg(long)]
    fanout: Option<usize>,

    /// Follow foreign keys only
    #[arg(long)]
    hard_only: bool,

    /// Do not walk through filtered-out records
    #[arg(long)]
    prune: bool,

    /// Ordering strategy: topological or pairwise
    #[arg(long)]
    order: Option<OrderStrategy>,

    /// Random sample size when no ids are given
    #[arg(short, long)]
    sample: Option<usize>,

    /// Source database (overrides store.db_path)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Config file (default: $FIXDUMP_CONFIG or ./fixdump.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the snapshot here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// JSON indent width, 0 for compact output
    #[arg(long)]
    indent: Option<usize>,
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            let usage = err
                .downcast_ref::<DumpError>()
                .is_some_and(DumpError::is_usage);
            if usage {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

fn run(args: Args) -> Result<()> {
    // Usage problems are reported before any config or store access.
    let object_class = args.object_class.clone().ok_or_else(|| {
        DumpError::Usage(
            "No object_class or id arguments supplied. Expected app_name.model_name [ids...]".to_string(),
        )
    })?;
    parse_type_identifier(&object_class)?;
    if args.indent.is_some_and(|i| i > 16) {
        return Err(DumpError::Usage("--indent must be at most 16".to_string()).into());
    }

    let config = Config::load_from(args.config.as_deref())?;

    env_logger::Builder::from_env(
        env_logger::Env::default()
            .filter_or("RUST_LOG", &config.store.log_level)
    ).init();

    let mut request = DumpRequest::from_config(object_class, args.ids, &config.dump);
    request.recursive = args.kitchensink;
    request.natural = args.natural;
    request.hard_only |= args.hard_only;
    request.exclude.extend(parse_type_list(&args.exclude));
    request.include.extend(parse_type_list(&args.include));
    if args.depth.is_some() {
        request.max_depth = args.depth;
    }
    if args.fanout.is_some() {
        request.max_fanout = args.fanout;
    }
    if args.prune {
        request.filter_policy = FilterPolicy::Prune;
    }
    if let Some(order) = args.order {
        request.order = order;
    }
    if args.sample.is_some() {
        request.sample = args.sample;
    }

    let db_path = args.db.unwrap_or_else(|| config.db_path().to_path_buf());
    let db = Db::new(&db_path);
    let store = SqliteStore::open(&db, &config)
        .with_context(|| format!("Failed to open {}", db_path.display()))?;

    let output = dump(&store, &request)?;
    let stats = &output.stats;
    log::info!(
        "Traversal: {} dequeued, {} duplicates, {} filtered, {} dangling, depth {}",
        stats.dequeued,
        stats.duplicates,
        stats.filtered,
        stats.dangling,
        stats.max_depth_seen
    );

    let indent = args.indent.unwrap_or(config.dump.indent);
    match &args.output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            write_snapshot(&output.entries, BufWriter::new(file), indent)?;
            log::info!("Wrote {} entries to {}", output.entries.len(), path.display());
        }
        None => {
            let stdout = std::io::stdout();
            let mut handle = stdout.lock();
            write_snapshot(&output.entries, &mut handle, indent)?;
            handle.flush()?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_flags_accept_underscore_spelling() {
        let args = Args::try_parse_from([
            "dump-object",
            "blog.article",
            "10",
            "--exclude_list",
            "auth.user",
            "--filter_list",
            "blog.author,blog.comment",
        ])
        .unwrap();
        assert_eq!(args.exclude, vec!["auth.user"]);
        assert_eq!(args.include, vec!["blog.author,blog.comment"]);

        let args = Args::try_parse_from(["dump-object", "blog.article", "--exclude-list", "auth.user"]).unwrap();
        assert_eq!(args.exclude, vec!["auth.user"]);
    }
}
