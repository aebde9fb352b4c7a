//! core::store::memory
//!
//! In-process branch store.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{PoisonError, RwLock};

use super::{
    check_expected, check_path, check_searchable, BranchQuery, BranchStore, SearchField,
    StoreError,
};
use crate::core::branch::Branch;
use crate::core::types::BranchPath;

/// Branch store backed by an ordered map behind a `RwLock`.
///
/// Every operation, including `replace`, runs under the lock, so the CAS
/// check and the write are atomic with respect to other callers.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Debug, Default)]
struct MemoryStoreInner {
    branches: BTreeMap<BranchPath, Branch>,
    searchable: BTreeSet<SearchField>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records, deleted ones included.
    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .branches
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BranchStore for MemoryStore {
    fn get(&self, path: &BranchPath) -> Result<Option<Branch>, StoreError> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        Ok(inner.branches.get(path).cloned())
    }

    fn put(&self, path: &BranchPath, branch: &Branch) -> Result<(), StoreError> {
        check_path(path, branch)?;
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.branches.insert(path.clone(), branch.clone());
        Ok(())
    }

    fn replace(
        &self,
        path: &BranchPath,
        expected: Option<&Branch>,
        new: &Branch,
    ) -> Result<(), StoreError> {
        check_path(path, new)?;
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        check_expected(path, inner.branches.get(path), expected)?;
        inner.branches.insert(path.clone(), new.clone());
        Ok(())
    }

    fn search(
        &self,
        query: &BranchQuery,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Branch>, StoreError> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        check_searchable(&inner.searchable, query)?;
        Ok(inner
            .branches
            .values()
            .filter(|b| query.matches(b))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    fn clear(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.branches.clear();
        Ok(())
    }

    fn configure_searchable(&self, field: SearchField) -> Result<(), StoreError> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.searchable.insert(field);
        Ok(())
    }
}
