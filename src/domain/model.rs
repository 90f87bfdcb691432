use crate::domain::manifest::normalize_name;
use crate::utils::error::{BootstrapError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// 一次外部命令呼叫
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    /// 只作用在子行程上的環境變數
    pub env: Vec<(String, String)>,
    pub env_remove: Vec<String>,
    /// 完整保留 stdout 且不轉送到終端機（需要解析輸出的命令）
    pub capture_stdout: bool,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.into(),
            env: Vec::new(),
            env_remove: Vec::new(),
            capture_stdout: false,
        }
    }

    pub fn capture_stdout(mut self) -> Self {
        self.capture_stdout = true;
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn env_remove(mut self, key: impl Into<String>) -> Self {
        self.env_remove.push(key.into());
        self
    }

    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " '{}'", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum ExitStatusKind {
    Code(i32),
    Signal(i32),
}

impl ExitStatusKind {
    pub fn success(&self) -> bool {
        matches!(self, ExitStatusKind::Code(0))
    }

    /// shell 慣例：被訊號終止時為 128 + signal
    pub fn exit_code(&self) -> i32 {
        match self {
            ExitStatusKind::Code(code) => *code,
            ExitStatusKind::Signal(signal) => 128 + signal,
        }
    }
}

impl fmt::Display for ExitStatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatusKind::Code(code) => write!(f, "exit code {}", code),
            ExitStatusKind::Signal(signal) => write!(f, "signal {}", signal),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandOutcome {
    pub command: CommandSpec,
    pub status: ExitStatusKind,
    pub stdout_tail: Vec<String>,
    pub stderr_tail: Vec<String>,
    pub duration_ms: u64,
}

impl CommandOutcome {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// 非零結束轉成 CommandFailed
    pub fn ensure_success(self) -> Result<Self> {
        if self.success() {
            return Ok(self);
        }
        Err(BootstrapError::CommandFailed {
            command: self.command.to_string(),
            status: self.status.to_string(),
            exit_code: self.status.exit_code(),
            stderr_tail: self.stderr_tail,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKind {
    Setup,
    BringUp,
}

impl PhaseKind {
    pub fn display_name(&self) -> &'static str {
        match self {
            PhaseKind::Setup => "Environment Setup",
            PhaseKind::BringUp => "Machine Bring-Up",
        }
    }
}

impl fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// 執行狀態機
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    NotStarted,
    SetupRunning,
    SetupDone,
    BringupRunning,
    BringupDone,
    Failed,
}

impl RunState {
    pub fn running(kind: PhaseKind) -> Self {
        match kind {
            PhaseKind::Setup => RunState::SetupRunning,
            PhaseKind::BringUp => RunState::BringupRunning,
        }
    }

    pub fn done(kind: PhaseKind) -> Self {
        match kind {
            PhaseKind::Setup => RunState::SetupDone,
            PhaseKind::BringUp => RunState::BringupDone,
        }
    }

    /// 合法的狀態轉移；任何狀態都可直接進入 Failed（終態除外）
    pub fn can_transition_to(&self, next: RunState) -> bool {
        use RunState::*;
        match (self, next) {
            (Failed, _) | (BringupDone, _) => false,
            (_, Failed) => true,
            (NotStarted, SetupRunning) => true,
            (SetupRunning, SetupDone) => true,
            (SetupDone, BringupRunning) => true,
            (BringupRunning, BringupDone) => true,
            _ => false,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::NotStarted => "NOT_STARTED",
            RunState::SetupRunning => "SETUP_RUNNING",
            RunState::SetupDone => "SETUP_DONE",
            RunState::BringupRunning => "BRINGUP_RUNNING",
            RunState::BringupDone => "BRINGUP_DONE",
            RunState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledPackage {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentReport {
    pub env_dir: PathBuf,
    pub python: PathBuf,
    /// false 表示沿用既有的 virtualenv
    pub created: bool,
    pub requirement_count: usize,
    pub installed: Vec<InstalledPackage>,
    pub verified_pins: Vec<String>,
}

impl EnvironmentReport {
    pub fn installed_version(&self, name: &str) -> Option<&str> {
        let wanted = normalize_name(name);
        self.installed
            .iter()
            .find(|p| normalize_name(&p.name) == wanted)
            .map(|p| p.version.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineState {
    Running,
    Poweroff,
    NotCreated,
    Saved,
    Aborted,
    Other(String),
}

impl MachineState {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "running" => MachineState::Running,
            "poweroff" => MachineState::Poweroff,
            "not_created" | "not created" => MachineState::NotCreated,
            "saved" => MachineState::Saved,
            "aborted" => MachineState::Aborted,
            other => MachineState::Other(other.to_string()),
        }
    }
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MachineState::Running => f.write_str("running"),
            MachineState::Poweroff => f.write_str("poweroff"),
            MachineState::NotCreated => f.write_str("not_created"),
            MachineState::Saved => f.write_str("saved"),
            MachineState::Aborted => f.write_str("aborted"),
            MachineState::Other(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineReport {
    pub definition: PathBuf,
    pub prior_state: Option<MachineState>,
    pub final_state: Option<MachineState>,
}

impl MachineReport {
    pub fn was_already_running(&self) -> bool {
        self.prior_state == Some(MachineState::Running)
    }
}

/// 每個階段的型別化結果
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "phase")]
pub enum PhaseOutcome {
    Environment(EnvironmentReport),
    Machine(MachineReport),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseReport {
    pub kind: PhaseKind,
    pub outcome: PhaseOutcome,
    pub commands: Vec<CommandOutcome>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub final_state: RunState,
    pub phases: Vec<PhaseReport>,
    pub skipped: Vec<PhaseKind>,
}

impl RunSummary {
    pub fn phase(&self, kind: PhaseKind) -> Option<&PhaseReport> {
        self.phases.iter().find(|p| p.kind == kind)
    }

    pub fn command_count(&self) -> usize {
        self.phases.iter().map(|p| p.commands.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_spec_display_quotes_whitespace() {
        let spec = CommandSpec::new("pip", "/tmp")
            .arg("install")
            .arg("-r")
            .arg("my requirements.txt");
        assert_eq!(spec.to_string(), "pip install -r 'my requirements.txt'");
    }

    #[test]
    fn test_env_value_takes_last_assignment() {
        let spec = CommandSpec::new("pip", "/tmp")
            .env("PATH", "/a")
            .env("PATH", "/b");
        assert_eq!(spec.env_value("PATH"), Some("/b"));
        assert_eq!(spec.env_value("HOME"), None);
    }

    #[test]
    fn test_exit_status_codes() {
        assert!(ExitStatusKind::Code(0).success());
        assert!(!ExitStatusKind::Code(2).success());
        assert_eq!(ExitStatusKind::Code(2).exit_code(), 2);
        assert_eq!(ExitStatusKind::Signal(2).exit_code(), 130);
    }

    #[test]
    fn test_ensure_success_maps_failure() {
        let outcome = CommandOutcome {
            command: CommandSpec::new("vagrant", "/vm").arg("up"),
            status: ExitStatusKind::Code(7),
            stdout_tail: vec![],
            stderr_tail: vec!["no provider".to_string()],
            duration_ms: 5,
        };
        match outcome.ensure_success() {
            Err(BootstrapError::CommandFailed {
                command, exit_code, ..
            }) => {
                assert_eq!(command, "vagrant up");
                assert_eq!(exit_code, 7);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_state_machine_transitions() {
        use RunState::*;
        assert!(NotStarted.can_transition_to(SetupRunning));
        assert!(SetupRunning.can_transition_to(SetupDone));
        assert!(SetupDone.can_transition_to(BringupRunning));
        assert!(BringupRunning.can_transition_to(BringupDone));
        assert!(SetupRunning.can_transition_to(Failed));

        assert!(!NotStarted.can_transition_to(BringupRunning));
        assert!(!SetupRunning.can_transition_to(BringupRunning));
        assert!(!Failed.can_transition_to(SetupRunning));
        assert!(!BringupDone.can_transition_to(Failed));
        assert_eq!(BringupRunning.to_string(), "BRINGUP_RUNNING");
    }

    #[test]
    fn test_machine_state_parse() {
        assert_eq!(MachineState::parse("running"), MachineState::Running);
        assert_eq!(MachineState::parse("not_created"), MachineState::NotCreated);
        assert_eq!(
            MachineState::parse("gurumeditation"),
            MachineState::Other("gurumeditation".to_string())
        );
    }
}
