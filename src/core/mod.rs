//! core
//!
//! Core domain types, schemas, and storage for Branchline.
//!
//! # Modules
//!
//! - [`types`] - Strong types: BranchName, BranchPath, Timestamp, etc.
//! - [`branch`] - The immutable branch value and divergence states
//! - [`store`] - Branch record persistence
//! - [`tree`] - Parent/children view over branch records
//! - [`locks`] - Per-path locking for mutations
//! - [`config`] - Configuration schema and loading
//!
//! # Design Principles
//!
//! - Strong typing prevents invalid states at compile time
//! - Schemas are strict and self-describing
//! - Branch values are immutable; every change is a new version

pub mod branch;
pub mod config;
pub mod locks;
pub mod store;
pub mod tree;
pub mod types;
