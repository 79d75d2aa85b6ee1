use anyhow::{Context, Result};
use clap::Parser;
use fixdump::db::Db;
use fixdump::schema::{parse_type_identifier, Model, SoftKind};
use fixdump::store::{RelationLookup, SqliteStore};
use fixdump::Config;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "schema-info")]
#[command(about = "Show the models and relations dump-object sees in a database")]
struct Args {
    /// Only show this model (app_name.model_name)
    model: Option<String>,

    /// Database to inspect (overrides store.db_path)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Config file
    #[arg(long)]
    config: Option<PathBuf>,
}

fn print_model(model: &Model) {
    println!("{} (table {}, pk {})", model.type_name, model.table, model.pk_column);
    if let Some(nk) = &model.natural_key {
        println!("  natural key: ({})", nk.join(", "));
    }
    for hard in &model.hard {
        println!(
            "  {} -> {}.{}",
            hard.column, hard.target_type, hard.target_column
        );
    }
    for soft in &model.soft {
        let via = match &soft.kind {
            SoftKind::Reverse { source_column, .. } => format!("reverse of {}", source_column),
            SoftKind::ManyToMany { through_table, .. } => format!("through {}", through_table),
        };
        println!("  {} ~> {} ({})", soft.accessor, soft.target_type, via);
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load_from(args.config.as_deref())?;

    env_logger::Builder::from_env(
        env_logger::Env::default()
            .filter_or("RUST_LOG", &config.store.log_level)
    ).init();

    let db_path = args.db.unwrap_or_else(|| config.db_path().to_path_buf());
    let store = SqliteStore::open(&Db::new(&db_path), &config)
        .with_context(|| format!("Failed to open {}", db_path.display()))?;
    let schema = store.schema();

    match &args.model {
        Some(raw) => {
            let type_name = parse_type_identifier(raw)?;
            print_model(schema.require(&type_name)?);
        }
        None => {
            println!("{} models in {}\n", schema.len(), db_path.display());
            for model in schema.models() {
                print_model(model);
            }
        }
    }

    Ok(())
}
