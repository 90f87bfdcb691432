pub mod toml_config;

pub use toml_config::{DevupConfig, PhaseSelection};

#[cfg(feature = "cli")]
use crate::utils::error::Result;
#[cfg(feature = "cli")]
use clap::Parser;
#[cfg(feature = "cli")]
use std::path::PathBuf;

#[cfg(feature = "cli")]
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    Compact,
    Json,
}

#[cfg(feature = "cli")]
#[derive(Debug, Clone, Parser)]
#[command(name = "devup")]
#[command(about = "Create the project virtualenv, then bring up the development VM")]
pub struct CliConfig {
    /// TOML config file (default: <root>/devup.toml when present)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Directory holding the project and machine directories
    #[arg(short = 'C', long, default_value = ".")]
    pub root: PathBuf,

    #[arg(long, help = "Project directory holding the manifest, relative to root")]
    pub project_dir: Option<String>,

    #[arg(long, help = "Virtualenv directory, relative to the project directory")]
    pub venv_dir: Option<String>,

    #[arg(long, help = "Dependency manifest, relative to the project directory")]
    pub manifest: Option<String>,

    #[arg(long, help = "Directory holding the Vagrantfile, relative to root")]
    pub machine_dir: Option<String>,

    #[arg(long, help = "Provider passed to `vagrant up --provider`")]
    pub provider: Option<String>,

    #[arg(long, value_enum)]
    pub phase: Option<PhaseSelection>,

    #[arg(long, help = "Print the commands that would run and exit")]
    pub dry_run: bool,

    #[arg(long, help = "Write the run summary as JSON to this file")]
    pub summary: Option<PathBuf>,

    #[arg(short, long, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, value_enum, default_value = "compact")]
    pub log_format: LogFormat,

    #[arg(long, help = "Log host CPU and memory around each phase")]
    pub monitor: bool,
}

#[cfg(feature = "cli")]
impl CliConfig {
    fn config_file(&self) -> Option<PathBuf> {
        match &self.config {
            Some(path) => Some(path.clone()),
            None => {
                let default = self.root.join(toml_config::DEFAULT_CONFIG_FILE);
                default.exists().then_some(default)
            }
        }
    }

    /// 讀設定檔（若有），再套用命令列覆蓋
    pub fn load_config(&self) -> Result<DevupConfig> {
        let mut config = match self.config_file() {
            Some(path) => {
                tracing::info!("📁 Loading configuration from: {}", path.display());
                DevupConfig::from_file(path)?
            }
            None => DevupConfig::default(),
        };
        self.apply_overrides(&mut config);
        Ok(config)
    }

    pub fn apply_overrides(&self, config: &mut DevupConfig) {
        if let Some(dir) = &self.project_dir {
            config.environment.project_dir = dir.clone();
        }
        if let Some(dir) = &self.venv_dir {
            config.environment.venv_dir = dir.clone();
        }
        if let Some(manifest) = &self.manifest {
            config.environment.manifest = manifest.clone();
        }
        if let Some(dir) = &self.machine_dir {
            config.machine.dir = dir.clone();
        }
        if let Some(provider) = &self.provider {
            config.machine.provider = Some(provider.clone());
        }
        if let Some(phase) = self.phase {
            config.run.phases = phase;
        }
        if self.monitor {
            config.run.monitor = true;
        }
    }
}
