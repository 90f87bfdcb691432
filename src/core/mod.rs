pub mod engine;
pub mod environment;
pub mod machine;
pub mod runner;

pub use crate::domain::model::{CommandOutcome, CommandSpec, PhaseKind, PhaseOutcome, RunState};
pub use crate::domain::ports::{CommandRunner, Phase, PhaseLog};
pub use crate::utils::error::Result;

#[cfg(test)]
pub(crate) mod test_support {
    use crate::domain::model::{CommandOutcome, CommandSpec, ExitStatusKind};
    use crate::domain::ports::CommandRunner;
    use crate::utils::error::Result;
    use std::path::Path;
    use std::sync::Mutex;

    type SideEffect = Box<dyn Fn(&CommandSpec) + Send + Sync>;

    struct Rule {
        pattern: String,
        status: ExitStatusKind,
        stdout: Vec<String>,
        side_effect: Option<SideEffect>,
    }

    /// 依命令內容回傳預設結果；沒有對應規則時視為成功
    pub struct ScriptedRunner {
        rules: Vec<Rule>,
        calls: Mutex<Vec<CommandSpec>>,
    }

    impl ScriptedRunner {
        pub fn new() -> Self {
            Self {
                rules: Vec::new(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn rule(mut self, pattern: &str, status: ExitStatusKind, stdout: &[&str]) -> Self {
            self.rules.push(Rule {
                pattern: pattern.to_string(),
                status,
                stdout: stdout.iter().map(|s| s.to_string()).collect(),
                side_effect: None,
            });
            self
        }

        pub fn on_status(self, pattern: &str, status: ExitStatusKind) -> Self {
            self.rule(pattern, status, &[])
        }

        pub fn on_output(self, pattern: &str, stdout: &[&str]) -> Self {
            self.rule(pattern, ExitStatusKind::Code(0), stdout)
        }

        pub fn on_with<F>(mut self, pattern: &str, effect: F) -> Self
        where
            F: Fn(&CommandSpec) + Send + Sync + 'static,
        {
            self.rules.push(Rule {
                pattern: pattern.to_string(),
                status: ExitStatusKind::Code(0),
                stdout: Vec::new(),
                side_effect: Some(Box::new(effect)),
            });
            self
        }

        pub fn calls(&self) -> Vec<CommandSpec> {
            self.calls.lock().unwrap().clone()
        }
    }

    /// 程式檔名加上參數，避免暫存目錄路徑誤中規則
    fn key(command: &CommandSpec) -> String {
        let program = Path::new(&command.program)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| command.program.clone());
        format!("{} {}", program, command.args.join(" "))
    }

    #[async_trait::async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn run(&self, command: &CommandSpec) -> Result<CommandOutcome> {
            self.calls.lock().unwrap().push(command.clone());

            let key = key(command);
            let rule = self.rules.iter().find(|r| key.contains(&r.pattern));
            if let Some(effect) = rule.and_then(|r| r.side_effect.as_ref()) {
                effect(command);
            }

            Ok(CommandOutcome {
                command: command.clone(),
                status: rule.map(|r| r.status).unwrap_or(ExitStatusKind::Code(0)),
                stdout_tail: rule.map(|r| r.stdout.clone()).unwrap_or_default(),
                stderr_tail: Vec::new(),
                duration_ms: 0,
            })
        }
    }
}
