use crate::config::toml_config::DevupConfig;
use crate::core::environment::EnvironmentSetup;
use crate::core::machine::MachineBringUp;
use crate::core::runner::ProcessRunner;
use crate::domain::model::{CommandSpec, PhaseKind, PhaseReport, RunState, RunSummary};
use crate::domain::ports::{CommandRunner, Phase, PhaseLog};
use crate::utils::error::{BootstrapError, Result};
use crate::utils::monitor::HostMonitor;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::time::Instant;

enum Step {
    Run(Box<dyn Phase>),
    Skip(PhaseKind),
}

impl Step {
    fn kind(&self) -> PhaseKind {
        match self {
            Step::Run(phase) => phase.kind(),
            Step::Skip(kind) => *kind,
        }
    }
}

/// 依序執行各階段，第一個失敗就停止
pub struct BootstrapEngine {
    runner: Box<dyn CommandRunner>,
    steps: Vec<Step>,
    state: RunState,
    monitor: HostMonitor,
    reports: Vec<PhaseReport>,
    skipped: Vec<PhaseKind>,
    started_at: Option<DateTime<Utc>>,
}

impl BootstrapEngine {
    pub fn new(runner: Box<dyn CommandRunner>) -> Self {
        Self {
            runner,
            steps: Vec::new(),
            state: RunState::NotStarted,
            monitor: HostMonitor::default(),
            reports: Vec::new(),
            skipped: Vec::new(),
            started_at: None,
        }
    }

    /// 依設定檔組出引擎，使用真正的子行程
    pub fn from_config(root: &Path, config: &DevupConfig) -> Result<Self> {
        let runner = ProcessRunner::new(config.run.output_tail_lines);
        let mut engine = Self::new(Box::new(runner)).with_monitoring(config.run.monitor);
        engine.register_phases(root, config)?;
        Ok(engine)
    }

    pub fn register_phases(&mut self, root: &Path, config: &DevupConfig) -> Result<()> {
        if config.run.phases.includes_setup() {
            self.add_phase(Box::new(EnvironmentSetup::new(root, &config.environment)?))?;
        } else {
            self.skip_phase(PhaseKind::Setup)?;
        }

        if config.run.phases.includes_bring_up() {
            self.add_phase(Box::new(MachineBringUp::new(root, &config.machine)?))?;
        } else {
            self.skip_phase(PhaseKind::BringUp)?;
        }
        Ok(())
    }

    pub fn with_monitoring(mut self, enabled: bool) -> Self {
        self.monitor = HostMonitor::new(enabled);
        self
    }

    pub fn add_phase(&mut self, phase: Box<dyn Phase>) -> Result<()> {
        self.push_step(Step::Run(phase))
    }

    pub fn skip_phase(&mut self, kind: PhaseKind) -> Result<()> {
        self.push_step(Step::Skip(kind))
    }

    /// 階段必須照 Setup → Bring-Up 的順序登記，且各只一次
    fn push_step(&mut self, step: Step) -> Result<()> {
        let kind = step.kind();
        if let Some(last) = self.steps.last() {
            if last.kind() >= kind {
                return Err(BootstrapError::ConfigError {
                    message: format!("{} cannot be registered after {}", kind, last.kind()),
                });
            }
        }
        self.steps.push(step);
        Ok(())
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn plan(&self) -> Vec<(PhaseKind, Vec<CommandSpec>)> {
        self.steps
            .iter()
            .filter_map(|step| match step {
                Step::Run(phase) => Some((phase.kind(), phase.plan())),
                Step::Skip(_) => None,
            })
            .collect()
    }

    fn advance(state: &mut RunState, next: RunState) -> Result<()> {
        if !state.can_transition_to(next) {
            return Err(BootstrapError::ConfigError {
                message: format!("invalid state transition {} -> {}", state, next),
            });
        }
        tracing::debug!("state {} -> {}", state, next);
        *state = next;
        Ok(())
    }

    pub async fn run(&mut self) -> Result<RunSummary> {
        if self.started_at.is_some() {
            return Err(BootstrapError::ConfigError {
                message: format!("engine already ran (state {})", self.state),
            });
        }
        self.started_at = Some(Utc::now());
        self.monitor.log_stats("Bootstrap started");

        for step in &self.steps {
            let phase = match step {
                Step::Skip(kind) => {
                    tracing::info!("⏭️ Skipping {}", kind);
                    self.state = RunState::done(*kind);
                    self.skipped.push(*kind);
                    continue;
                }
                Step::Run(phase) => phase,
            };

            let kind = phase.kind();
            Self::advance(&mut self.state, RunState::running(kind))?;
            tracing::info!("🚀 {} started", kind);

            let start_time = Instant::now();
            let mut log = PhaseLog::default();
            match phase.run(self.runner.as_ref(), &mut log).await {
                Ok(outcome) => {
                    Self::advance(&mut self.state, RunState::done(kind))?;
                    let duration = start_time.elapsed();
                    tracing::info!(
                        "✅ {} finished ({} command(s), {:?})",
                        kind,
                        log.commands.len(),
                        duration
                    );
                    self.monitor.log_stats(kind.display_name());
                    self.reports.push(PhaseReport {
                        kind,
                        outcome,
                        commands: log.commands,
                        duration_ms: duration.as_millis() as u64,
                    });
                }
                Err(e) => {
                    self.state = RunState::Failed;
                    tracing::error!("❌ {} failed: {}", kind, e);
                    return Err(BootstrapError::Phase {
                        phase: kind.display_name().to_string(),
                        source: Box::new(e),
                    });
                }
            }
        }

        Ok(self.summary())
    }

    /// 目前為止的結果；失敗後也可以呼叫
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            started_at: self.started_at.unwrap_or_else(Utc::now),
            finished_at: Utc::now(),
            final_state: self.state,
            phases: self.reports.clone(),
            skipped: self.skipped.clone(),
        }
    }
}
