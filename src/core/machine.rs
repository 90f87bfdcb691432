use crate::config::toml_config::MachineConfig;
use crate::domain::model::{CommandSpec, MachineReport, MachineState, PhaseKind, PhaseOutcome};
use crate::domain::ports::{CommandRunner, Phase, PhaseLog};
use crate::utils::error::{BootstrapError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// `vagrant up`；是否已在執行由 vagrant 自己判斷
pub struct MachineBringUp {
    dir: PathBuf,
    definition: PathBuf,
    config: MachineConfig,
}

impl MachineBringUp {
    pub fn new(root: &Path, config: &MachineConfig) -> Result<Self> {
        let root = std::path::absolute(root)?;
        let dir = root.join(&config.dir);
        Ok(Self {
            definition: dir.join(&config.definition_file),
            dir,
            config: config.clone(),
        })
    }

    fn up_command(&self) -> CommandSpec {
        let command = CommandSpec::new(&self.config.program, &self.dir).arg("up");
        match &self.config.provider {
            Some(provider) => command.arg("--provider").arg(provider),
            None => command,
        }
    }

    fn status_command(&self) -> CommandSpec {
        CommandSpec::new(&self.config.program, &self.dir)
            .args(["status", "--machine-readable"])
            .capture_stdout()
    }

    /// 探測失敗只記警告，不影響結果
    async fn probe(&self, runner: &dyn CommandRunner, log: &mut PhaseLog) -> Option<MachineState> {
        match log.run_unchecked(runner, &self.status_command()).await {
            Ok(outcome) if outcome.success() => {
                let state = parse_machine_state(&outcome.stdout_tail);
                if state.is_none() {
                    tracing::warn!("⚠️ No machine state in `{}` output", outcome.command);
                }
                state
            }
            Ok(outcome) => {
                tracing::warn!("⚠️ `{}` exited with {}", outcome.command, outcome.status);
                None
            }
            Err(e) => {
                tracing::warn!("⚠️ Status probe failed: {}", e);
                None
            }
        }
    }
}

/// 解析 `--machine-readable` 輸出（timestamp,target,type,data...），取第一個 state
pub fn parse_machine_state(lines: &[String]) -> Option<MachineState> {
    lines.iter().find_map(|line| {
        let mut fields = line.splitn(4, ',');
        let _timestamp = fields.next()?;
        let _target = fields.next()?;
        let kind = fields.next()?;
        let data = fields.next()?;
        (kind == "state").then(|| MachineState::parse(data))
    })
}

#[async_trait]
impl Phase for MachineBringUp {
    fn kind(&self) -> PhaseKind {
        PhaseKind::BringUp
    }

    fn plan(&self) -> Vec<CommandSpec> {
        let mut plan = vec![self.up_command()];
        if self.config.status_probe {
            plan.insert(0, self.status_command());
            plan.push(self.status_command());
        }
        plan
    }

    async fn run(&self, runner: &dyn CommandRunner, log: &mut PhaseLog) -> Result<PhaseOutcome> {
        if !self.definition.is_file() {
            return Err(BootstrapError::MissingFile {
                what: "Machine definition".to_string(),
                path: self.definition.clone(),
            });
        }

        let prior_state = if self.config.status_probe {
            self.probe(runner, log).await
        } else {
            None
        };

        match &prior_state {
            Some(MachineState::Running) => {
                tracing::info!("🟢 Machine already running; `up` should be a no-op")
            }
            Some(state) => tracing::info!("🖥️ Machine is {}; bringing it up", state),
            None => tracing::info!("🖥️ Bringing up machine from {}", self.definition.display()),
        }

        log.run_checked(runner, &self.up_command()).await?;

        let final_state = if self.config.status_probe {
            self.probe(runner, log).await
        } else {
            None
        };
        if let Some(state) = &final_state {
            tracing::info!("🖥️ Machine state after up: {}", state);
        }

        Ok(PhaseOutcome::Machine(MachineReport {
            definition: self.definition.clone(),
            prior_state,
            final_state,
        }))
    }
}
