use clap::Parser;
use devup::config::LogFormat;
use devup::utils::{logger, validation::Validate};
use devup::{BootstrapEngine, BootstrapError, CliConfig, RunSummary};
use std::path::Path;

fn exit_with(e: &BootstrapError) -> ! {
    tracing::error!(
        "❌ devup failed: {} (Category: {:?}, exit code: {})",
        e,
        e.category(),
        e.exit_code()
    );
    tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

    eprintln!("❌ {}", e.user_friendly_message());
    eprintln!("💡 建議: {}", e.recovery_suggestion());
    std::process::exit(e.exit_code());
}

fn write_summary(path: &Path, summary: &RunSummary) -> devup::Result<()> {
    let json = serde_json::to_string_pretty(summary)?;
    std::fs::write(path, json)?;
    tracing::info!("📝 Run summary written to {}", path.display());
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = CliConfig::parse();

    // 初始化日誌
    match cli.log_format {
        LogFormat::Compact => logger::init_cli_logger(cli.verbose),
        LogFormat::Json => logger::init_json_logger(cli.verbose),
    }

    tracing::info!("Starting devup in {}", cli.root.display());

    let config = match cli.load_config() {
        Ok(config) => config,
        Err(e) => exit_with(&e),
    };
    if cli.verbose {
        tracing::debug!("Resolved config: {:?}", config);
    }

    // 驗證配置
    if let Err(e) = config.validate() {
        exit_with(&e);
    }

    let mut engine = match BootstrapEngine::from_config(&cli.root, &config) {
        Ok(engine) => engine,
        Err(e) => exit_with(&e),
    };

    if cli.dry_run {
        tracing::info!("🔍 DRY RUN MODE - nothing will be executed");
        for (kind, commands) in engine.plan() {
            println!("{}:", kind);
            for command in commands {
                println!("  (cd {} && {})", command.cwd.display(), command);
            }
        }
        return;
    }

    let result = engine.run().await;

    if let Some(path) = &cli.summary {
        if let Err(e) = write_summary(path, &engine.summary()) {
            tracing::warn!("⚠️ Could not write run summary: {}", e);
        }
    }

    match result {
        Ok(summary) => {
            tracing::info!(
                "✅ devup finished in state {} ({} command(s))",
                summary.final_state,
                summary.command_count()
            );
            println!("✅ Development environment is up");
        }
        Err(e) => exit_with(&e),
    }
}
