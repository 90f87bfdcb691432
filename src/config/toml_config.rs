use crate::utils::error::{BootstrapError, Result};
use crate::utils::validation::{self, Validate};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "devup.toml";

/// devup.toml；所有欄位都有預設值，檔案可以不存在
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DevupConfig {
    pub environment: EnvironmentConfig,
    pub machine: MachineConfig,
    pub run: RunConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VenvCreator {
    /// `virtualenv <dir>`
    Virtualenv,
    /// `<python> -m venv <dir>`
    Venv,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EnvironmentConfig {
    /// 放 requirements 的應用程式目錄（相對於 root）
    pub project_dir: String,
    /// virtualenv 目錄（相對於 project_dir）
    pub venv_dir: String,
    pub manifest: String,
    pub creator: VenvCreator,
    pub python: String,
    pub virtualenv_program: String,
    pub pip_args: Vec<String>,
    pub verify_pins: bool,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            project_dir: "app".to_string(),
            venv_dir: "venv".to_string(),
            manifest: "requirements.txt".to_string(),
            creator: VenvCreator::Virtualenv,
            python: "python3".to_string(),
            virtualenv_program: "virtualenv".to_string(),
            pip_args: Vec::new(),
            verify_pins: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MachineConfig {
    /// 放 Vagrantfile 的目錄（相對於 root）
    pub dir: String,
    pub definition_file: String,
    pub program: String,
    pub provider: Option<String>,
    pub status_probe: bool,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            dir: "vm".to_string(),
            definition_file: "Vagrantfile".to_string(),
            program: "vagrant".to_string(),
            provider: None,
            status_probe: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[serde(rename_all = "kebab-case")]
pub enum PhaseSelection {
    All,
    Setup,
    BringUp,
}

impl PhaseSelection {
    pub fn includes_setup(&self) -> bool {
        matches!(self, PhaseSelection::All | PhaseSelection::Setup)
    }

    pub fn includes_bring_up(&self) -> bool {
        matches!(self, PhaseSelection::All | PhaseSelection::BringUp)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    pub phases: PhaseSelection,
    /// 失敗時保留的輸出行數
    pub output_tail_lines: usize,
    pub monitor: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            phases: PhaseSelection::All,
            output_tail_lines: crate::core::runner::DEFAULT_TAIL_LINES,
            monitor: false,
        }
    }
}

impl DevupConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                BootstrapError::MissingFile {
                    what: "Config file".to_string(),
                    path: path.to_path_buf(),
                }
            } else {
                BootstrapError::IoError(e)
            }
        })?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content);
        Ok(toml::from_str(&processed_content)?)
    }

    /// 替換環境變數 (例如 ${VAGRANT_PROVIDER})；未設定的保留原樣
    fn substitute_env_vars(content: &str) -> String {
        use regex::Regex;
        use std::sync::LazyLock;

        static ENV_RE: LazyLock<Regex> =
            LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("env var regex"));

        ENV_RE
            .replace_all(content, |caps: &regex::Captures| {
                let var_name = &caps[1];
                std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
            })
            .into_owned()
    }
}

impl Validate for DevupConfig {
    fn validate(&self) -> Result<()> {
        let env = &self.environment;
        validation::validate_relative_path("environment.project_dir", &env.project_dir)?;
        validation::validate_relative_path("environment.venv_dir", &env.venv_dir)?;
        validation::validate_relative_path("environment.manifest", &env.manifest)?;
        validation::validate_non_empty_string("environment.python", &env.python)?;
        validation::validate_non_empty_string(
            "environment.virtualenv_program",
            &env.virtualenv_program,
        )?;

        let machine = &self.machine;
        validation::validate_relative_path("machine.dir", &machine.dir)?;
        validation::validate_file_name("machine.definition_file", &machine.definition_file)?;
        validation::validate_non_empty_string("machine.program", &machine.program)?;
        if let Some(provider) = &machine.provider {
            validation::validate_non_empty_string("machine.provider", provider)?;
            if provider.contains("${") {
                return Err(BootstrapError::InvalidConfigValueError {
                    field: "machine.provider".to_string(),
                    value: provider.clone(),
                    reason: "Environment variable is not set".to_string(),
                });
            }
        }

        validation::validate_range("run.output_tail_lines", self.run.output_tail_lines, 1, 10_000)?;

        if self.run.phases.includes_setup() && self.run.phases.includes_bring_up() {
            let venv_path = normalized(&Path::new(&env.project_dir).join(&env.venv_dir));
            if venv_path == normalized(Path::new(&machine.dir)) {
                return Err(BootstrapError::ConfigError {
                    message: "virtualenv and machine directory must differ".to_string(),
                });
            }
        }

        Ok(())
    }
}

fn normalized(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}
