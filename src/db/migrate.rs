//! Prepare a replay target from a directory of `NNN_name.sql` files.
//!
//! Applied files are tracked in `schema_migrations`, so pointing several
//! loads at the same target only runs each file once.

use rusqlite::{Connection, params};
use std::fs;
use std::path::Path;
use crate::error::{Result, DumpError};

/// One schema file
#[derive(Debug)]
struct SchemaFile {
    version: u32,
    name: String,
    sql: String,
}

fn ensure_tracking_table(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;
    Ok(())
}

/// Names of schema files already applied, in version order
pub fn applied(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM schema_migrations ORDER BY version")?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
    Ok(names)
}

fn load_schema_files(dir: &Path) -> Result<Vec<SchemaFile>> {
    let mut paths: Vec<_> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|s| s.to_str()) == Some("sql"))
        .collect();
    paths.sort();

    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| DumpError::Config(format!("Invalid schema filename: {}", path.display())))?;

        // "001_blog.sql" -> 1
        let version = filename
            .split('_')
            .next()
            .and_then(|v| v.parse::<u32>().ok())
            .ok_or_else(|| DumpError::Config(format!("Schema file has no version prefix: {}", filename)))?;

        files.push(SchemaFile {
            version,
            name: filename.trim_end_matches(".sql").to_string(),
            sql: fs::read_to_string(&path)?,
        });
    }

    files.sort_by_key(|f| f.version);
    Ok(files)
}

/// Apply every pending schema file in `dir`; returns how many ran.
pub fn apply_schema_files(conn: &mut Connection, dir: &Path) -> Result<usize> {
    ensure_tracking_table(conn)?;

    let done = applied(conn)?;
    let mut count = 0;

    for file in load_schema_files(dir)? {
        if done.contains(&file.name) {
            log::debug!("Schema file {} already applied, skipping", file.name);
            continue;
        }

        log::info!("Applying schema file: {} (version {})", file.name, file.version);

        let tx = conn.transaction()?;
        tx.execute_batch(&file.sql)
            .map_err(|e| DumpError::Config(format!("Failed to apply schema file {}: {}", file.name, e)))?;
        tx.execute(
            "INSERT INTO schema_migrations (version, name) VALUES (?1, ?2)",
            params![file.version, file.name],
        )?;
        tx.commit()?;
        count += 1;
    }

    Ok(count)
}
