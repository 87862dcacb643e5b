use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{Connection, OpenFlags};

use crate::errors::{LibraryError, Result};
use crate::utils::paths::asset_dirs;

pub mod queries;

/// File name of the catalog inside the library folder.
pub const CATALOG_FILE: &str = "main.db";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to the catalog file. Every logical operation opens its own
/// connection and drops it when done, so no lock outlives an operation.
#[derive(Clone, Debug)]
pub struct Database {
    path: PathBuf,
}

impl Database {
    /// Opens an existing catalog. A missing file is `NotFound`.
    pub fn open(path: PathBuf) -> Result<Self> {
        let db = Self { path };
        db.connection()?;
        Ok(db)
    }

    /// Creates the catalog file if needed and brings the schema up to date.
    pub fn create(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;
        drop(conn);

        let db = Self { path };
        db.run_migrations()?;
        Ok(db)
    }

    pub fn run_migrations(&self) -> Result<()> {
        let conn = self.connection()?;
        conn.execute_batch(include_str!("../../migrations/001_claims.sql"))?;
        ensure_claim_columns(&conn)?;
        conn.execute_batch(include_str!("../../migrations/002_claim_indexes.sql"))?;
        Ok(())
    }

    pub fn connection(&self) -> Result<Connection> {
        if !self.path.exists() {
            return Err(LibraryError::NotFound(format!(
                "catalog file does not exist at {}",
                self.path.display()
            )));
        }
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA temp_store = MEMORY;")?;
        Ok(conn)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

pub fn catalog_path(library_folder: &Path) -> PathBuf {
    library_folder.join(CATALOG_FILE)
}

/// First `main.db` bundled under the asset directories, if any.
pub fn find_seed_catalog() -> Option<PathBuf> {
    asset_dirs()
        .into_iter()
        .map(|dir| dir.join(CATALOG_FILE))
        .find(|candidate| candidate.is_file())
}

/// Opens the catalog in `library_folder`. A missing catalog is seeded from
/// the bundled one when present, otherwise created empty.
pub fn init(library_folder: &Path) -> Result<Database> {
    init_with_seed(library_folder, find_seed_catalog().as_deref())
}

pub fn init_with_seed(library_folder: &Path, seed: Option<&Path>) -> Result<Database> {
    std::fs::create_dir_all(library_folder)?;
    let path = catalog_path(library_folder);
    match Database::open(path.clone()) {
        Ok(db) => {
            db.run_migrations()?;
            Ok(db)
        }
        Err(LibraryError::NotFound(_)) => match seed.filter(|seed| *seed != path.as_path()) {
            Some(seed) => {
                tracing::info!(seed = %seed.display(), "copying bundled catalog to {}", path.display());
                std::fs::copy(seed, &path)?;
                let db = Database::open(path)?;
                db.run_migrations()?;
                Ok(db)
            }
            None => {
                tracing::info!("creating new catalog at {}", path.display());
                Database::create(path)
            }
        },
        Err(err) => Err(err),
    }
}

// Older catalogs may predate any of these columns; the indexes need them.
const CLAIM_COLUMNS: &[(&str, &str)] = &[
    ("File_Name", "TEXT"),
    ("Alt_File_Name", "TEXT"),
    ("File_URL", "TEXT"),
    ("Alt_File_URL", "TEXT"),
    ("File_Size", "INTEGER"),
    ("Dev_Name", "TEXT"),
    ("Dev_Claim_ID", "TEXT"),
    ("Release_Date", "TEXT"),
    ("Media_Type", "TEXT"),
    ("Description", "TEXT"),
    ("Thumbnail_URL", "TEXT"),
    ("File_Download_Name", "TEXT"),
    ("Downloaded", "INTEGER DEFAULT 0"),
    ("New", "INTEGER DEFAULT 0"),
    ("File_Path", "TEXT"),
];

fn ensure_claim_columns(conn: &Connection) -> Result<()> {
    for (column, definition) in CLAIM_COLUMNS {
        ensure_column(conn, "Claims", column, definition)?;
    }
    Ok(())
}

fn ensure_column(conn: &Connection, table: &str, column: &str, definition: &str) -> Result<()> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(());
        }
    }
    conn.execute(
        &format!("ALTER TABLE {table} ADD COLUMN {column} {definition}"),
        [],
    )?;
    Ok(())
}
