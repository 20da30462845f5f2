//! Durable registry of enrolled identities and their sample images (SQLite).
//!
//! Every mutation is committed with `synchronous = FULL` before it returns.
//! Bulk loading from a list file is the one place that trades durability for
//! throughput: it turns syncing off for the duration of the load and restores
//! it afterwards. A load interrupted midway is recovered by re-running it.

use crate::types::{Identity, IdentityId, SampleOwner, SampleRecord};
use image::GrayImage;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use thiserror::Error;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS identities (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS samples (
    identity_id INTEGER NOT NULL REFERENCES identities(id) ON DELETE CASCADE,
    path TEXT NOT NULL
);
";

// `PRAGMA synchronous` levels.
const SYNC_OFF: i64 = 0;
const SYNC_FULL: i64 = 2;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("identity already enrolled: {0}")]
    DuplicateIdentity(String),
    #[error("no identity with id {0}")]
    UnknownIdentity(IdentityId),
    #[error("{path}:{line}: expected `[number,]name,path`")]
    MalformedList { path: PathBuf, line: usize },
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("image: {0}")]
    Image(#[from] image::ImageError),
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Handle to the catalog database.
pub struct Catalog {
    conn: Connection,
}

impl Catalog {
    /// Open (creating if needed) the catalog at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        tracing::info!(path = %path.display(), "opened catalog");
        Self::init(conn)
    }

    /// A throwaway catalog that lives only as long as the handle.
    pub fn open_in_memory() -> Result<Self, CatalogError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, CatalogError> {
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.pragma_update(None, "synchronous", SYNC_FULL)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Enroll a new identity. Fails if the name is taken.
    pub fn create_identity(&self, name: &str) -> Result<IdentityId, CatalogError> {
        if self.identity_by_name(name)?.is_some() {
            return Err(CatalogError::DuplicateIdentity(name.to_string()));
        }

        let created_at = chrono::Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO identities (name, created_at) VALUES (?1, ?2)",
                params![name, created_at],
            )
            .map_err(|e| match e.sqlite_error_code() {
                Some(ErrorCode::ConstraintViolation) => CatalogError::DuplicateIdentity(name.to_string()),
                _ => CatalogError::Sqlite(e),
            })?;

        let id = IdentityId(self.conn.last_insert_rowid());
        tracing::info!(%id, name, "enrolled identity");
        Ok(id)
    }

    /// Append a sample for `owner`, enrolling a named owner on first use.
    ///
    /// Returns the identity the sample was attached to.
    pub fn add_sample(
        &self,
        owner: impl Into<SampleOwner>,
        path: impl AsRef<Path>,
    ) -> Result<IdentityId, CatalogError> {
        let id = match owner.into() {
            SampleOwner::Existing(id) => {
                if !self.identity_exists(id)? {
                    return Err(CatalogError::UnknownIdentity(id));
                }
                id
            }
            SampleOwner::NameLookupOrCreate(name) => match self.identity_by_name(&name)? {
                Some(id) => id,
                None => self.create_identity(&name)?,
            },
        };

        let path = path.as_ref();
        let path_text = path.to_string_lossy().into_owned();
        self.conn.execute(
            "INSERT INTO samples (identity_id, path) VALUES (?1, ?2)",
            params![id.0, path_text],
        )?;
        tracing::debug!(%id, path = %path.display(), "added sample");
        Ok(id)
    }

    /// All samples in insertion order. This is the training row order.
    pub fn list_samples(&self) -> Result<Vec<SampleRecord>, CatalogError> {
        let mut stmt = self
            .conn
            .prepare("SELECT identity_id, path FROM samples ORDER BY rowid")?;
        let rows = stmt.query_map([], |row| {
            Ok(SampleRecord {
                identity_id: IdentityId(row.get(0)?),
                path: PathBuf::from(row.get::<_, String>(1)?),
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn count_samples(&self) -> Result<usize, CatalogError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM samples", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Number of samples attached to one identity.
    pub fn count_samples_for(&self, id: IdentityId) -> Result<usize, CatalogError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM samples WHERE identity_id = ?1",
            [id.0],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn name_for_identity(&self, id: IdentityId) -> Result<Option<String>, CatalogError> {
        Ok(self
            .conn
            .query_row("SELECT name FROM identities WHERE id = ?1", [id.0], |row| row.get(0))
            .optional()?)
    }

    pub fn identity_by_name(&self, name: &str) -> Result<Option<IdentityId>, CatalogError> {
        Ok(self
            .conn
            .query_row("SELECT id FROM identities WHERE name = ?1", [name], |row| {
                row.get(0).map(IdentityId)
            })
            .optional()?)
    }

    /// Every enrolled identity, by id.
    pub fn list_identities(&self) -> Result<Vec<Identity>, CatalogError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, created_at FROM identities ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok(Identity {
                id: IdentityId(row.get(0)?),
                name: row.get(1)?,
                created_at: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Stream every sample through `f` in insertion order without
    /// materializing the list. Stops at the first error `f` returns.
    pub fn for_each_sample<F, E>(&self, mut f: F) -> Result<(), E>
    where
        F: FnMut(IdentityId, &Path) -> Result<(), E>,
        E: From<CatalogError>,
    {
        let mut stmt = self
            .conn
            .prepare("SELECT identity_id, path FROM samples ORDER BY rowid")
            .map_err(CatalogError::from)?;
        let mut rows = stmt.query([]).map_err(CatalogError::from)?;

        while let Some(row) = rows.next().map_err(CatalogError::from)? {
            let id: i64 = row.get(0).map_err(CatalogError::from)?;
            let path: String = row.get(1).map_err(CatalogError::from)?;
            f(IdentityId(id), Path::new(&path))?;
        }
        Ok(())
    }

    /// Bulk-load samples from a list file with one `[number,]name,path` per line.
    ///
    /// The optional leading person number is ignored; names are resolved (or
    /// enrolled) through the catalog. Blank lines and `#` comments are skipped.
    /// A `(name, path)` pair already in the catalog is not added again, so
    /// reloading the same list leaves the catalog unchanged.
    /// Returns the number of samples added.
    pub fn load_from_list(&self, list_path: impl AsRef<Path>) -> Result<usize, CatalogError> {
        let list_path = list_path.as_ref();
        let file = File::open(list_path).map_err(|source| CatalogError::Io {
            path: list_path.to_path_buf(),
            source,
        })?;

        tracing::info!(path = %list_path.display(), "loading sample list");
        self.conn.pragma_update(None, "synchronous", SYNC_OFF)?;
        let loaded = self.ingest(list_path, BufReader::new(file));
        let restored = self.conn.pragma_update(None, "synchronous", SYNC_FULL);

        let count = loaded?;
        restored?;
        tracing::info!(count, path = %list_path.display(), "loaded sample list");
        Ok(count)
    }

    fn ingest(&self, list_path: &Path, reader: impl BufRead) -> Result<usize, CatalogError> {
        let mut count = 0;
        for (idx, line) in reader.lines().enumerate() {
            let line = line.map_err(|source| CatalogError::Io {
                path: list_path.to_path_buf(),
                source,
            })?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (name, path) = parse_list_line(line).ok_or_else(|| CatalogError::MalformedList {
                path: list_path.to_path_buf(),
                line: idx + 1,
            })?;
            if let Some(id) = self.identity_by_name(name)? {
                if self.sample_exists(id, Path::new(path))? {
                    tracing::debug!(%id, path, "sample already registered, skipping");
                    continue;
                }
            }
            self.add_sample(SampleOwner::NameLookupOrCreate(name.to_string()), path)?;
            count += 1;
        }
        Ok(count)
    }

    fn sample_exists(&self, id: IdentityId, path: &Path) -> Result<bool, CatalogError> {
        let path_text = path.to_string_lossy();
        Ok(self
            .conn
            .query_row(
                "SELECT 1 FROM samples WHERE identity_id = ?1 AND path = ?2",
                params![id.0, path_text.as_ref()],
                |_| Ok(()),
            )
            .optional()?
            .is_some())
    }

    /// Save a cropped face under `dir` and register it as a sample of `name`.
    ///
    /// Files are named `<name>_<n>.png`, `n` counting the identity's samples.
    pub fn add_face_image(
        &self,
        name: &str,
        face: &GrayImage,
        dir: impl AsRef<Path>,
    ) -> Result<PathBuf, CatalogError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).map_err(|source| CatalogError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut n = match self.identity_by_name(name)? {
            Some(id) => self.count_samples_for(id)?,
            None => 0,
        };
        let stem = file_stem_for(name);
        let mut path = dir.join(format!("{stem}_{n}.png"));
        while path.exists() {
            n += 1;
            path = dir.join(format!("{stem}_{n}.png"));
        }

        face.save(&path)?;
        self.add_sample(SampleOwner::NameLookupOrCreate(name.to_string()), &path)?;
        Ok(path)
    }

    fn identity_exists(&self, id: IdentityId) -> Result<bool, CatalogError> {
        Ok(self
            .conn
            .query_row("SELECT 1 FROM identities WHERE id = ?1", [id.0], |_| Ok(()))
            .optional()?
            .is_some())
    }

    #[cfg(test)]
    fn synchronous_level(&self) -> i64 {
        self.conn
            .pragma_query_value(None, "synchronous", |row| row.get(0))
            .unwrap()
    }
}

fn parse_list_line(line: &str) -> Option<(&str, &str)> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    let (name, path) = match fields.as_slice() {
        [name, path] => (*name, *path),
        [number, name, path] if number.parse::<i64>().is_ok() => (*name, *path),
        _ => return None,
    };
    if name.is_empty() || path.is_empty() {
        return None;
    }
    Some((name, path))
}

fn file_stem_for(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}
