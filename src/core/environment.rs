use crate::config::toml_config::{EnvironmentConfig, VenvCreator};
use crate::domain::manifest::{self, DependencyManifest};
use crate::domain::model::{CommandSpec, EnvironmentReport, PhaseKind, PhaseOutcome};
use crate::domain::ports::{CommandRunner, Phase, PhaseLog};
use crate::utils::error::{BootstrapError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

const BIN_DIR: &str = if cfg!(windows) { "Scripts" } else { "bin" };
const EXE_SUFFIX: &str = if cfg!(windows) { ".exe" } else { "" };

/// 建立 virtualenv 並安裝 requirements。
///
/// 「啟用」只作用在 pip 子行程上：設定 `VIRTUAL_ENV`、把 venv 的 bin 放到
/// `PATH` 最前面並移除 `PYTHONHOME`。父行程的環境從頭到尾不變，所以子行程
/// 結束即等同 deactivate。
pub struct EnvironmentSetup {
    project_dir: PathBuf,
    venv_dir: PathBuf,
    manifest_path: PathBuf,
    config: EnvironmentConfig,
}

impl EnvironmentSetup {
    pub fn new(root: &Path, config: &EnvironmentConfig) -> Result<Self> {
        let root = std::path::absolute(root)?;
        let project_dir = root.join(&config.project_dir);
        Ok(Self {
            venv_dir: project_dir.join(&config.venv_dir),
            manifest_path: project_dir.join(&config.manifest),
            project_dir,
            config: config.clone(),
        })
    }

    pub fn venv_dir(&self) -> &Path {
        &self.venv_dir
    }

    fn bin_dir(&self) -> PathBuf {
        self.venv_dir.join(BIN_DIR)
    }

    fn interpreter_path(&self) -> PathBuf {
        self.bin_dir().join(format!("python{}", EXE_SUFFIX))
    }

    /// virtualenv 是否已經存在（以直譯器為準）
    pub fn interpreter(&self) -> Option<PathBuf> {
        let python = self.interpreter_path();
        python.exists().then_some(python)
    }

    fn create_command(&self) -> CommandSpec {
        match self.config.creator {
            VenvCreator::Virtualenv => {
                CommandSpec::new(&self.config.virtualenv_program, &self.project_dir)
                    .arg(&self.config.venv_dir)
            }
            VenvCreator::Venv => CommandSpec::new(&self.config.python, &self.project_dir)
                .args(["-m", "venv"])
                .arg(&self.config.venv_dir),
        }
    }

    /// 套上 virtualenv 的環境變數
    fn activated(&self, command: CommandSpec) -> CommandSpec {
        let bin_dir = self.bin_dir();
        let mut paths = vec![bin_dir];
        if let Some(current) = std::env::var_os("PATH") {
            paths.extend(std::env::split_paths(&current));
        }
        let path = std::env::join_paths(paths)
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|_| self.bin_dir().to_string_lossy().into_owned());

        command
            .env("VIRTUAL_ENV", self.venv_dir.to_string_lossy())
            .env("PATH", path)
            .env_remove("PYTHONHOME")
    }

    /// 有 pip 執行檔就用它，否則 `python -m pip`；venv 尚未建立時假設會有 pip
    fn pip_command(&self) -> CommandSpec {
        let pip = self.bin_dir().join(format!("pip{}", EXE_SUFFIX));
        let base = if pip.exists() || self.interpreter().is_none() {
            CommandSpec::new(pip.to_string_lossy(), &self.project_dir)
        } else {
            CommandSpec::new(self.interpreter_path().to_string_lossy(), &self.project_dir)
                .args(["-m", "pip"])
        };
        self.activated(base)
    }

    fn install_command(&self) -> CommandSpec {
        self.pip_command()
            .arg("install")
            .arg("-r")
            .arg(&self.config.manifest)
            .args(self.config.pip_args.iter().cloned())
    }

    /// `--all` 才會列出 pip、setuptools、wheel
    fn freeze_command(&self) -> CommandSpec {
        self.pip_command().args(["freeze", "--all"]).capture_stdout()
    }

    fn preflight(&self) -> Result<DependencyManifest> {
        if !self.project_dir.is_dir() {
            return Err(BootstrapError::MissingFile {
                what: "Project directory".to_string(),
                path: self.project_dir.clone(),
            });
        }

        let manifest = DependencyManifest::load(&self.manifest_path)?;
        tracing::info!(
            "📄 {} lists {} requirement(s), {} pinned",
            self.manifest_path.display(),
            manifest.requirements().count(),
            manifest.pinned().len()
        );
        Ok(manifest)
    }
}

#[async_trait]
impl Phase for EnvironmentSetup {
    fn kind(&self) -> PhaseKind {
        PhaseKind::Setup
    }

    fn plan(&self) -> Vec<CommandSpec> {
        let mut plan = Vec::new();
        if self.interpreter().is_none() {
            plan.push(self.create_command());
        }
        plan.push(self.install_command());
        if self.config.verify_pins {
            plan.push(self.freeze_command());
        }
        plan
    }

    async fn run(&self, runner: &dyn CommandRunner, log: &mut PhaseLog) -> Result<PhaseOutcome> {
        // 在啟動任何行程前擋下缺檔與寫壞的 manifest
        let manifest = self.preflight()?;

        let created = match self.interpreter() {
            Some(python) => {
                tracing::info!("♻️ Reusing existing virtualenv ({})", python.display());
                false
            }
            None => {
                tracing::info!("🐍 Creating virtualenv at {}", self.venv_dir.display());
                log.run_checked(runner, &self.create_command()).await?;
                true
            }
        };

        let python = self.interpreter().ok_or_else(|| BootstrapError::MissingFile {
            what: "Virtualenv interpreter".to_string(),
            path: self.interpreter_path(),
        })?;

        tracing::info!("📦 Installing requirements into {}", self.venv_dir.display());
        log.run_checked(runner, &self.install_command()).await?;

        let mut installed = Vec::new();
        let mut verified_pins = Vec::new();
        if self.config.verify_pins && !manifest.pinned().is_empty() {
            let freeze = log.run_checked(runner, &self.freeze_command()).await?;
            installed = manifest::parse_freeze_output(&freeze.stdout_tail);

            let (verified, mismatches) = manifest::verify_pins(&manifest, &installed);
            if !mismatches.is_empty() {
                return Err(BootstrapError::PinMismatch { mismatches });
            }
            tracing::info!("🔒 Verified {} pinned requirement(s)", verified.len());
            verified_pins = verified;
        }

        tracing::debug!("virtualenv scope ended with the installer process");

        Ok(PhaseOutcome::Environment(EnvironmentReport {
            env_dir: self.venv_dir.clone(),
            python,
            created,
            requirement_count: manifest.requirements().count(),
            installed,
            verified_pins,
        }))
    }
}
