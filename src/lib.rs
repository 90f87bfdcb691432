pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;

pub use config::{DevupConfig, PhaseSelection};
pub use crate::core::{engine::BootstrapEngine, runner::ProcessRunner};
pub use domain::model::{PhaseKind, RunState, RunSummary};
pub use utils::error::{BootstrapError, Result};
