//! cli
//!
//! Command-line interface layer for branchline.
//!
//! # Responsibilities
//!
//! - Parse command-line arguments and global flags
//! - Load configuration and install logging
//! - Open the on-disk state and delegate to command handlers
//!
//! # Architecture
//!
//! The CLI layer is thin. Every branch mutation goes through the
//! [`crate::service::BranchService`]; handlers only translate arguments
//! and print results.

pub mod args;
pub mod commands;

pub use args::Cli;

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context as _, Result};

use crate::core::branch::Branch;
use crate::core::config::Config;
use crate::core::store::FileStore;
use crate::core::types::Timestamp;
use crate::manager::{BranchManager, ManagerSettings};
use crate::merge::LocalApplier;
use crate::review::ReviewStore;
use crate::service::BranchService;
use crate::telemetry;
use crate::ui::output::{self, Verbosity};

/// Branch store file inside the state directory.
pub const BRANCHES_FILE: &str = "branches.json";

/// Change log file inside the state directory.
pub const CHANGES_FILE: &str = "changes.json";

/// Review file inside the state directory.
pub const REVIEWS_FILE: &str = "reviews.json";

/// Everything a command handler needs.
#[derive(Debug)]
pub struct Context {
    pub service: BranchService,
    pub applier: Arc<LocalApplier>,
    pub verbosity: Verbosity,
    pub json: bool,
}

impl Context {
    /// Open the state under `dir` and install the root branch if needed.
    ///
    /// # Errors
    ///
    /// Fails if any state file exists but cannot be decoded.
    pub fn open(dir: &Path, config: &Config, verbosity: Verbosity, json: bool) -> Result<Self> {
        let store = FileStore::open(dir.join(BRANCHES_FILE))
            .with_context(|| format!("failed to open branch store in {}", dir.display()))?;
        let applier = Arc::new(
            LocalApplier::open(dir.join(CHANGES_FILE))
                .with_context(|| format!("failed to open change log in {}", dir.display()))?,
        );
        let reviews = ReviewStore::open(dir.join(REVIEWS_FILE))
            .with_context(|| format!("failed to open reviews in {}", dir.display()))?;

        let manager = BranchManager::new(
            Arc::new(store),
            applier.clone(),
            ManagerSettings::from(config),
        );
        manager.initialize(Branch::main(Timestamp::default(), Timestamp::default())?)?;

        Ok(Self {
            service: BranchService::new(Arc::new(manager), Arc::new(reviews)),
            applier,
            verbosity,
            json,
        })
    }
}

/// Run the CLI application.
///
/// This is the main entry point called from `main.rs`.
pub fn run() -> Result<()> {
    let cli = Cli::parse_args();

    let loaded = Config::load(Some(&cli.state))?;
    let config = loaded.config;
    let filter = if cli.debug {
        "debug".to_string()
    } else {
        config.log_filter()
    };
    telemetry::init(&filter, config.log_format());

    let verbosity = Verbosity::from_flags(cli.quiet, cli.debug);
    for warning in &loaded.warnings {
        output::warn(&warning.message, verbosity);
    }

    let initializing = matches!(cli.command, args::Command::Init);
    if !initializing && !store_exists(&cli.state) {
        bail!(
            "no branchline state in {}; run `bl init` first",
            cli.state.display()
        );
    }

    let ctx = Context::open(&cli.state, &config, verbosity, cli.json)?;
    commands::dispatch(cli.command, &ctx)
}

fn store_exists(dir: &Path) -> bool {
    dir.join(BRANCHES_FILE).is_file()
}
