use crate::domain::model::{CommandOutcome, CommandSpec, PhaseKind, PhaseOutcome};
use crate::utils::error::Result;
use async_trait::async_trait;

/// 外部行程的接縫；測試用腳本化的實作替換
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// 執行到結束為止。非零結束不是 Err，只有啟動失敗才是
    async fn run(&self, command: &CommandSpec) -> Result<CommandOutcome>;
}

/// 階段執行期間累積的命令結果
#[derive(Debug, Default)]
pub struct PhaseLog {
    pub commands: Vec<CommandOutcome>,
}

impl PhaseLog {
    /// 執行並要求成功；失敗的那一筆也會留在紀錄裡
    pub async fn run_checked(
        &mut self,
        runner: &dyn CommandRunner,
        command: &CommandSpec,
    ) -> Result<CommandOutcome> {
        let outcome = runner.run(command).await?;
        self.commands.push(outcome.clone());
        outcome.ensure_success()
    }

    /// 執行但不要求成功（狀態探測之類）
    pub async fn run_unchecked(
        &mut self,
        runner: &dyn CommandRunner,
        command: &CommandSpec,
    ) -> Result<CommandOutcome> {
        let outcome = runner.run(command).await?;
        self.commands.push(outcome.clone());
        Ok(outcome)
    }
}

#[async_trait]
pub trait Phase: Send + Sync {
    fn kind(&self) -> PhaseKind;

    /// dry-run 用：預計執行的命令
    fn plan(&self) -> Vec<CommandSpec>;

    async fn run(&self, runner: &dyn CommandRunner, log: &mut PhaseLog) -> Result<PhaseOutcome>;
}
