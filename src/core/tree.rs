//! core::tree
//!
//! Branch tree representation and traversal.
//!
//! # Architecture
//!
//! The tree is derived from branch records:
//! - Nodes are branch paths
//! - Edges point from child to parent (implied by the path itself)
//! - The root is `MAIN`
//!
//! Deleted branches stay in the tree; callers filter when they care.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use super::branch::Branch;
use super::types::BranchPath;

/// In-memory parent/children view over a set of branch records.
#[derive(Debug, Default)]
pub struct BranchTree {
    parents: BTreeMap<BranchPath, BranchPath>,
    children: BTreeMap<BranchPath, BTreeSet<BranchPath>>,
    deleted: BTreeSet<BranchPath>,
}

impl BranchTree {
    /// Create an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the tree from branch records.
    ///
    /// # Example
    ///
    /// ```
    /// use branchline::core::branch::Branch;
    /// use branchline::core::tree::BranchTree;
    /// use branchline::core::types::{BranchName, Metadata, Timestamp};
    ///
    /// let main = Branch::main(Timestamp::new(0), Timestamp::new(1)).unwrap();
    /// let a = Branch::child(&main, BranchName::new("a").unwrap(), Metadata::new());
    /// let tree = BranchTree::from_branches([&main, &a]);
    /// assert_eq!(tree.parent(a.path()), Some(main.path()));
    /// ```
    pub fn from_branches<'a>(branches: impl IntoIterator<Item = &'a Branch>) -> Self {
        let mut tree = Self::new();
        for branch in branches {
            if let Some(parent) = branch.parent_path() {
                tree.add_edge(branch.path().clone(), parent);
            }
            if branch.is_deleted() {
                tree.deleted.insert(branch.path().clone());
            }
        }
        tree
    }

    /// Add a parent relationship.
    ///
    /// This also updates the children cache.
    pub fn add_edge(&mut self, child: BranchPath, parent: BranchPath) {
        self.children
            .entry(parent.clone())
            .or_default()
            .insert(child.clone());
        self.parents.insert(child, parent);
    }

    /// Get the parent of a branch.
    pub fn parent(&self, path: &BranchPath) -> Option<&BranchPath> {
        self.parents.get(path)
    }

    /// Get the direct children of a branch.
    pub fn children(&self, path: &BranchPath) -> Option<&BTreeSet<BranchPath>> {
        self.children.get(path)
    }

    pub fn is_deleted(&self, path: &BranchPath) -> bool {
        self.deleted.contains(path)
    }

    /// Get all descendants of a branch (children, grandchildren, etc.).
    ///
    /// Uses breadth-first traversal, so results are ordered by depth.
    pub fn descendants(&self, path: &BranchPath) -> Vec<BranchPath> {
        let mut result = Vec::new();
        let mut queue = VecDeque::new();

        if let Some(children) = self.children(path) {
            queue.extend(children.iter().cloned());
        }

        while let Some(current) = queue.pop_front() {
            if let Some(children) = self.children(&current) {
                queue.extend(children.iter().cloned());
            }
            result.push(current);
        }

        result
    }

    /// Descendants ordered so every branch comes before its parent.
    ///
    /// This is the order in which a subtree is tombstoned.
    pub fn descendants_deepest_first(&self, path: &BranchPath) -> Vec<BranchPath> {
        let mut result = self.descendants(path);
        result.reverse();
        result
    }

    /// Get all ancestors of a branch, from immediate parent to root.
    pub fn ancestors(&self, path: &BranchPath) -> Vec<BranchPath> {
        let mut result = Vec::new();
        let mut current = self.parent(path);

        while let Some(parent) = current {
            result.push(parent.clone());
            current = self.parent(parent);
        }

        result
    }

    /// Render the subtree under `root` as indented lines.
    pub fn render(&self, root: &BranchPath) -> Vec<String> {
        let mut lines = Vec::new();
        self.render_into(root, 0, &mut lines);
        lines
    }

    fn render_into(&self, path: &BranchPath, depth: usize, lines: &mut Vec<String>) {
        let marker = if self.is_deleted(path) {
            " (deleted)"
        } else {
            ""
        };
        lines.push(format!("{}{}{}", "  ".repeat(depth), path.name(), marker));
        if let Some(children) = self.children(path) {
            for child in children {
                self.render_into(child, depth + 1, lines);
            }
        }
    }
}
