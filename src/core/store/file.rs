//! core::store::file
//!
//! Branch store persisted as a single JSON file.
//!
//! # Storage
//!
//! - `<file>` - store document (`kind`, `schema_version`, searchable
//!   fields, branch documents)
//! - `<file>.lock` - lock file with an OS-level exclusive lock
//!
//! # Invariants
//!
//! - Every operation holds the exclusive lock for its whole
//!   read-modify-write cycle, so CAS holds across processes
//! - Writes go to a temporary file that is renamed over the store, so a
//!   crash never leaves a half-written store behind
//! - The lock is released on drop

use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use super::{
    check_expected, check_path, check_searchable, BranchQuery, BranchStore, SearchField,
    StoreError,
};
use crate::core::branch::schema::BranchDocument;
use crate::core::branch::Branch;
use crate::core::locks::FileLock;
use crate::core::types::BranchPath;

/// The kind identifier for store files.
pub const STORE_KIND: &str = "branchline.store";

/// Current store file version.
pub const STORE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct StoreFile {
    kind: String,
    schema_version: u32,
    #[serde(default)]
    searchable: BTreeSet<SearchField>,
    #[serde(default)]
    branches: Vec<BranchDocument>,
}

/// Decoded store contents.
#[derive(Debug, Default)]
struct Snapshot {
    searchable: BTreeSet<SearchField>,
    branches: Vec<Branch>,
}

impl Snapshot {
    fn get(&self, path: &BranchPath) -> Option<&Branch> {
        self.branches.iter().find(|b| b.path() == path)
    }

    fn upsert(&mut self, branch: &Branch) {
        match self.branches.iter_mut().find(|b| b.path() == branch.path()) {
            Some(slot) => *slot = branch.clone(),
            None => {
                self.branches.push(branch.clone());
                self.branches.sort_by(|a, b| a.path().cmp(b.path()));
            }
        }
    }
}

/// Branch store backed by a JSON file.
///
/// # Example
///
/// ```no_run
/// use branchline::core::store::{BranchStore, FileStore};
/// use branchline::core::types::BranchPath;
///
/// let store = FileStore::open("/tmp/state/branches.json").unwrap();
/// let main = store.get(&BranchPath::main()).unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl FileStore {
    /// Open (or prepare to create) the store at `path`.
    ///
    /// The parent directory is created if missing. The file itself is
    /// written on the first mutation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the directory cannot be created.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        let lock_path = FileLock::sibling_of(&path);
        Ok(Self { path, lock_path })
    }

    /// Location of the store file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<FileLock, StoreError> {
        FileLock::acquire(&self.lock_path).map_err(|e| {
            StoreError::LockFailed(format!("cannot lock {}: {}", self.lock_path.display(), e))
        })
    }

    fn read_locked<T>(
        &self,
        f: impl FnOnce(&Snapshot) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let _lock = self.lock()?;
        let snapshot = self.load()?;
        f(&snapshot)
    }

    fn write_locked<T>(
        &self,
        f: impl FnOnce(&mut Snapshot) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let _lock = self.lock()?;
        let mut snapshot = self.load()?;
        let result = f(&mut snapshot)?;
        self.save(&snapshot)?;
        Ok(result)
    }

    fn load(&self) -> Result<Snapshot, StoreError> {
        let json = match fs::read_to_string(&self.path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Snapshot::default())
            }
            Err(e) => return Err(e.into()),
        };

        let file: StoreFile =
            serde_json::from_str(&json).map_err(|e| StoreError::Serialize(e.to_string()))?;
        if file.kind != STORE_KIND || file.schema_version != STORE_VERSION {
            return Err(StoreError::Serialize(format!(
                "unsupported store file '{}' v{}",
                file.kind, file.schema_version
            )));
        }

        let branches = file
            .branches
            .into_iter()
            .map(BranchDocument::into_branch)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Snapshot {
            searchable: file.searchable,
            branches,
        })
    }

    fn save(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        let file = StoreFile {
            kind: STORE_KIND.to_string(),
            schema_version: STORE_VERSION,
            searchable: snapshot.searchable.clone(),
            branches: snapshot
                .branches
                .iter()
                .map(BranchDocument::from_branch)
                .collect(),
        };
        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| StoreError::Serialize(e.to_string()))?;

        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| StoreError::Io(e.error))?;
        Ok(())
    }
}

impl BranchStore for FileStore {
    fn get(&self, path: &BranchPath) -> Result<Option<Branch>, StoreError> {
        self.read_locked(|snapshot| Ok(snapshot.get(path).cloned()))
    }

    fn put(&self, path: &BranchPath, branch: &Branch) -> Result<(), StoreError> {
        check_path(path, branch)?;
        self.write_locked(|snapshot| {
            snapshot.upsert(branch);
            Ok(())
        })
    }

    fn replace(
        &self,
        path: &BranchPath,
        expected: Option<&Branch>,
        new: &Branch,
    ) -> Result<(), StoreError> {
        check_path(path, new)?;
        self.write_locked(|snapshot| {
            check_expected(path, snapshot.get(path), expected)?;
            snapshot.upsert(new);
            Ok(())
        })
    }

    fn search(
        &self,
        query: &BranchQuery,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Branch>, StoreError> {
        self.read_locked(|snapshot| {
            check_searchable(&snapshot.searchable, query)?;
            Ok(snapshot
                .branches
                .iter()
                .filter(|b| query.matches(b))
                .skip(offset)
                .take(limit)
                .cloned()
                .collect())
        })
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.write_locked(|snapshot| {
            snapshot.branches.clear();
            Ok(())
        })
    }

    fn configure_searchable(&self, field: SearchField) -> Result<(), StoreError> {
        self.write_locked(|snapshot| {
            snapshot.searchable.insert(field);
            Ok(())
        })
    }
}
