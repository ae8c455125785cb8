//! SQLite connection pools.
//!
//! SQLite permits one writer at a time, and the store leans on that: the
//! workflow step-list primitives and the per-step instance-document updates
//! run as multi-statement transactions on a single-connection writer pool,
//! which serializes them against every other write with no application-level
//! locking. Reads go through a separate pool of read-only connections so
//! instance hydration and run listings never queue behind a write. Both
//! sides use WAL journal mode and enforce foreign keys; the busy timeout
//! covers the window where a reader upgrades its snapshot while the writer
//! is mid-transaction.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

/// Read-only connections kept for concurrent SELECTs.
const READER_CONNECTIONS: u32 = 4;

/// How long a connection waits on a locked database before erroring.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Database file name inside the data directory.
const DB_FILE: &str = "mailloom.db";

/// Paired pools over one SQLite database.
///
/// `writer` holds exactly one connection; transactions started on it are
/// atomic with respect to every other write in the process. `reader` serves
/// concurrent read-only queries.
#[derive(Clone)]
pub struct DatabasePool {
    pub reader: SqlitePool,
    pub writer: SqlitePool,
}

impl DatabasePool {
    /// Open (creating if missing) the database at `database_url`.
    ///
    /// Pending migrations run on the writer before the first reader
    /// connects, so readers never observe a partially migrated schema.
    pub async fn open(database_url: &str) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(BUSY_TIMEOUT);

        let writer = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options.clone())
            .await?;

        sqlx::migrate!("../../migrations").run(&writer).await?;

        let reader = SqlitePoolOptions::new()
            .max_connections(READER_CONNECTIONS)
            .connect_with(options.read_only(true))
            .await?;

        Ok(Self { reader, writer })
    }

    /// Open the `mailloom.db` database under `data_dir`.
    pub async fn open_in_dir(data_dir: &Path) -> Result<Self, sqlx::Error> {
        let url = format!("sqlite://{}/{DB_FILE}?mode=rwc", data_dir.display());
        Self::open(&url).await
    }
}
