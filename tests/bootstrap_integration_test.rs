#![cfg(unix)]

use anyhow::Result;
use devup::domain::model::{MachineState, PhaseOutcome};
use devup::{BootstrapEngine, BootstrapError, DevupConfig, PhaseKind, RunState};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// 假的 virtualenv / pip / vagrant，呼叫紀錄寫到 calls.log
struct Workspace {
    root: TempDir,
    log: PathBuf,
}

impl Workspace {
    fn new(manifest: &str, installed_version: &str, up_code: i32) -> Result<Self> {
        let root = TempDir::new()?;
        let log = root.path().join("calls.log");
        let bin = root.path().join("fake-bin");
        std::fs::create_dir_all(&bin)?;
        std::fs::create_dir_all(root.path().join("app"))?;
        std::fs::create_dir_all(root.path().join("vm"))?;

        std::fs::write(root.path().join("app/requirements.txt"), manifest)?;
        std::fs::write(
            root.path().join("vm/Vagrantfile"),
            "Vagrant.configure(\"2\") do |config|\n  config.vm.box = \"ubuntu/jammy64\"\nend\n",
        )?;

        let virtualenv = format!(
            r#"#!/bin/sh
set -e
echo "virtualenv $*" >> "{log}"
mkdir -p "$1/bin"
cat > "$1/bin/pip" <<'PIP'
#!/bin/sh
echo "pip $* VIRTUAL_ENV=$VIRTUAL_ENV" >> "{log}"
case "$1" in
  install) echo "Successfully installed requests-{version}" ;;
  freeze) echo "certifi==2024.2.2"; echo "requests=={version}" ;;
esac
PIP
chmod +x "$1/bin/pip"
: > "$1/bin/python"
"#,
            log = log.display(),
            version = installed_version,
        );
        write_executable(&bin.join("virtualenv"), &virtualenv)?;

        let state = root.path().join("vm/.running");
        let vagrant = format!(
            r#"#!/bin/sh
echo "vagrant $*" >> "{log}"
case "$1" in
  status)
    if [ -f "{state}" ]; then echo "1700000000,default,state,running"; else echo "1700000000,default,state,not_created"; fi ;;
  up)
    if [ {code} -ne 0 ]; then echo "No usable default provider could be found" >&2; exit {code}; fi
    touch "{state}"
    echo "==> default: Machine booted and ready!" ;;
esac
"#,
            log = log.display(),
            state = state.display(),
            code = up_code,
        );
        write_executable(&bin.join("vagrant"), &vagrant)?;

        Ok(Self { root, log })
    }

    fn path(&self) -> &Path {
        self.root.path()
    }

    fn config(&self) -> DevupConfig {
        let bin = self.path().join("fake-bin");
        let mut config = DevupConfig::default();
        config.environment.virtualenv_program = bin.join("virtualenv").display().to_string();
        config.machine.program = bin.join("vagrant").display().to_string();
        config
    }

    fn config_toml(&self) -> String {
        let bin = self.path().join("fake-bin");
        format!(
            "[environment]\nvirtualenv_program = \"{}\"\n\n[machine]\nprogram = \"{}\"\n",
            bin.join("virtualenv").display(),
            bin.join("vagrant").display()
        )
    }

    fn calls(&self) -> Vec<String> {
        std::fs::read_to_string(&self.log)
            .map(|s| s.lines().map(String::from).collect())
            .unwrap_or_default()
    }
}

fn write_executable(path: &Path, content: &str) -> Result<()> {
    std::fs::write(path, content)?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    Ok(())
}

#[tokio::test]
async fn test_full_bootstrap_creates_env_and_boots_machine() -> Result<()> {
    let ws = Workspace::new("# app deps\nrequests==2.31.0\n", "2.31.0", 0)?;

    let mut engine = BootstrapEngine::from_config(ws.path(), &ws.config())?;
    let summary = engine.run().await?;

    assert_eq!(summary.final_state, RunState::BringupDone);
    assert!(ws.path().join("app/venv/bin/python").exists());

    let setup = summary.phase(PhaseKind::Setup).unwrap();
    match &setup.outcome {
        PhaseOutcome::Environment(report) => {
            assert!(report.created);
            assert_eq!(report.installed_version("requests"), Some("2.31.0"));
            assert_eq!(report.verified_pins, vec!["requests==2.31.0".to_string()]);
        }
        other => panic!("unexpected setup outcome: {:?}", other),
    }

    let bring_up = summary.phase(PhaseKind::BringUp).unwrap();
    match &bring_up.outcome {
        PhaseOutcome::Machine(report) => {
            assert_eq!(report.prior_state, Some(MachineState::NotCreated));
            assert_eq!(report.final_state, Some(MachineState::Running));
        }
        other => panic!("unexpected bring-up outcome: {:?}", other),
    }

    let calls = ws.calls();
    assert_eq!(calls[0], "virtualenv venv");
    assert!(calls[1].starts_with("pip install -r requirements.txt"));
    assert!(calls[1].contains("VIRTUAL_ENV=") && calls[1].contains("app/venv"));
    assert!(calls[2].starts_with("pip freeze --all"));
    assert_eq!(
        &calls[3..],
        &[
            "vagrant status --machine-readable".to_string(),
            "vagrant up".to_string(),
            "vagrant status --machine-readable".to_string(),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_second_run_is_idempotent() -> Result<()> {
    let ws = Workspace::new("requests==2.31.0\n", "2.31.0", 0)?;

    BootstrapEngine::from_config(ws.path(), &ws.config())?.run().await?;
    let summary = BootstrapEngine::from_config(ws.path(), &ws.config())?
        .run()
        .await?;

    assert_eq!(summary.final_state, RunState::BringupDone);
    match &summary.phase(PhaseKind::Setup).unwrap().outcome {
        PhaseOutcome::Environment(report) => assert!(!report.created),
        other => panic!("unexpected setup outcome: {:?}", other),
    }
    match &summary.phase(PhaseKind::BringUp).unwrap().outcome {
        PhaseOutcome::Machine(report) => assert!(report.was_already_running()),
        other => panic!("unexpected bring-up outcome: {:?}", other),
    }

    let creations = ws.calls().iter().filter(|c| c.starts_with("virtualenv")).count();
    assert_eq!(creations, 1);
    Ok(())
}

#[tokio::test]
async fn test_malformed_manifest_never_reaches_vagrant() -> Result<()> {
    let ws = Workspace::new("requests=2.31.0\n", "2.31.0", 0)?;

    let mut engine = BootstrapEngine::from_config(ws.path(), &ws.config())?;
    let err = engine.run().await.unwrap_err();

    assert!(matches!(err.root(), BootstrapError::MalformedManifest { .. }));
    assert_ne!(err.exit_code(), 0);
    assert_eq!(engine.state(), RunState::Failed);
    assert!(ws.calls().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_missing_vagrantfile_fails_after_setup() -> Result<()> {
    let ws = Workspace::new("requests==2.31.0\n", "2.31.0", 0)?;
    std::fs::remove_file(ws.path().join("vm/Vagrantfile"))?;

    let mut engine = BootstrapEngine::from_config(ws.path(), &ws.config())?;
    let err = engine.run().await.unwrap_err();

    assert!(matches!(err.root(), BootstrapError::MissingFile { .. }));
    assert_ne!(err.exit_code(), 0);
    assert_eq!(engine.summary().phases.len(), 1);
    assert!(ws.calls().iter().all(|c| !c.starts_with("vagrant")));
    Ok(())
}

#[tokio::test]
async fn test_pin_mismatch_fails_setup() -> Result<()> {
    let ws = Workspace::new("requests==2.31.0\n", "2.30.0", 0)?;

    let mut engine = BootstrapEngine::from_config(ws.path(), &ws.config())?;
    let err = engine.run().await.unwrap_err();

    assert!(matches!(err.root(), BootstrapError::PinMismatch { .. }));
    assert!(ws.calls().iter().all(|c| !c.starts_with("vagrant")));
    Ok(())
}

#[tokio::test]
async fn test_vagrant_exit_code_is_propagated() -> Result<()> {
    let ws = Workspace::new("requests==2.31.0\n", "2.31.0", 3)?;

    let mut engine = BootstrapEngine::from_config(ws.path(), &ws.config())?;
    let err = engine.run().await.unwrap_err();

    assert_eq!(err.exit_code(), 3);
    match err.root() {
        BootstrapError::CommandFailed { stderr_tail, .. } => {
            assert_eq!(
                stderr_tail.last().map(String::as_str),
                Some("No usable default provider could be found")
            );
        }
        other => panic!("unexpected error: {:?}", other),
    }
    Ok(())
}

#[test]
fn test_binary_success_writes_summary() -> Result<()> {
    let ws = Workspace::new("requests==2.31.0\n", "2.31.0", 0)?;
    std::fs::write(ws.path().join("devup.toml"), ws.config_toml())?;
    let summary_path = ws.path().join("summary.json");

    let status = std::process::Command::new(env!("CARGO_BIN_EXE_devup"))
        .arg("-C")
        .arg(ws.path())
        .arg("--summary")
        .arg(&summary_path)
        .status()?;

    assert!(status.success());
    let summary: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&summary_path)?)?;
    assert_eq!(summary["final_state"], "BRINGUP_DONE");
    assert_eq!(summary["phases"].as_array().unwrap().len(), 2);
    Ok(())
}

#[test]
fn test_binary_exit_code_matches_failing_command() -> Result<()> {
    let ws = Workspace::new("requests==2.31.0\n", "2.31.0", 5)?;
    std::fs::write(ws.path().join("devup.toml"), ws.config_toml())?;

    let status = std::process::Command::new(env!("CARGO_BIN_EXE_devup"))
        .arg("--root")
        .arg(ws.path())
        .status()?;

    assert_eq!(status.code(), Some(5));
    Ok(())
}

#[test]
fn test_binary_dry_run_executes_nothing() -> Result<()> {
    let ws = Workspace::new("requests==2.31.0\n", "2.31.0", 0)?;
    std::fs::write(ws.path().join("devup.toml"), ws.config_toml())?;

    let output = std::process::Command::new(env!("CARGO_BIN_EXE_devup"))
        .arg("--root")
        .arg(ws.path())
        .arg("--dry-run")
        .output()?;

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Environment Setup:"));
    assert!(stdout.contains("Machine Bring-Up:"));
    assert!(stdout.contains("install -r requirements.txt"));
    assert!(ws.calls().is_empty());
    Ok(())
}
