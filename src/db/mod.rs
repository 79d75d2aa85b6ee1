use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};
use crate::error::{Result, DumpError};

/// Database connection wrapper
pub struct Db {
    path: PathBuf,
}

impl Db {
    /// Create a new database connection manager
    pub fn new<P: AsRef<Path>>(db_path: P) -> Self {
        Self {
            path: db_path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a read-write connection, used as a replay target.
    ///
    /// Foreign keys are enforced immediately so an out-of-order snapshot fails
    /// at the offending row.
    pub fn open_connection(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)
            .map_err(DumpError::Database)?;

        conn.execute_batch(
            "PRAGMA synchronous = NORMAL; \
             PRAGMA foreign_keys = ON; \
             PRAGMA temp_store = MEMORY;"
        )?;

        Ok(conn)
    }

    /// Open a read-only connection on an existing database, used as a dump source.
    pub fn open_read_only(&self) -> Result<Connection> {
        if !self.path.exists() {
            return Err(DumpError::Config(format!(
                "Database does not exist: {}",
                self.path.display()
            )));
        }

        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(DumpError::Database)?;

        // cache_size = -65536 (64MB cache) for wide traversals
        conn.execute_batch(
            "PRAGMA query_only = ON; \
             PRAGMA foreign_keys = ON; \
             PRAGMA temp_store = MEMORY; \
             PRAGMA cache_size = -65536;"
        )?;

        Ok(conn)
    }

    /// Execute a closure with a fresh read-write connection
    pub fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut conn = self.open_connection()?;
        f(&mut conn)
    }
}

pub mod migrate;
