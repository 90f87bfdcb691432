use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BootstrapError {
    #[error("`{command}` exited with {status}")]
    CommandFailed {
        command: String,
        status: String,
        exit_code: i32,
        stderr_tail: Vec<String>,
    },

    #[error("Failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{what} not found: {}", .path.display())]
    MissingFile { what: String, path: PathBuf },

    #[error("Malformed manifest {}:{line}: {reason}", .path.display())]
    MalformedManifest {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("Pinned packages not installed at the declared version: {}", .mismatches.join(", "))]
    PinMismatch { mismatches: Vec<String> },

    #[error("{phase} failed: {source}")]
    Phase {
        phase: String,
        #[source]
        source: Box<BootstrapError>,
    },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Invalid value for '{field}' ({value}): {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// 外部工具回傳非零
    ExternalCommand,
    /// 找不到或無法啟動的程式
    Toolchain,
    /// 輸入檔案缺失或格式錯誤
    Input,
    Configuration,
    System,
}

impl BootstrapError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            BootstrapError::CommandFailed { .. } | BootstrapError::PinMismatch { .. } => {
                ErrorCategory::ExternalCommand
            }
            BootstrapError::Spawn { .. } => ErrorCategory::Toolchain,
            BootstrapError::MissingFile { .. } | BootstrapError::MalformedManifest { .. } => {
                ErrorCategory::Input
            }
            BootstrapError::ConfigError { .. }
            | BootstrapError::InvalidConfigValueError { .. }
            | BootstrapError::TomlError(_) => ErrorCategory::Configuration,
            BootstrapError::IoError(_) | BootstrapError::SerializationError(_) => {
                ErrorCategory::System
            }
            BootstrapError::Phase { source, .. } => source.category(),
        }
    }

    /// 行程結束碼：外部命令的結束碼原樣傳遞
    pub fn exit_code(&self) -> i32 {
        match self {
            BootstrapError::CommandFailed { exit_code, .. } => *exit_code,
            BootstrapError::Spawn { .. } => 127,
            BootstrapError::Phase { source, .. } => source.exit_code(),
            _ => 1,
        }
    }

    /// 最內層的錯誤（去掉 Phase 包裝）
    pub fn root(&self) -> &BootstrapError {
        match self {
            BootstrapError::Phase { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn recovery_suggestion(&self) -> String {
        match self.root() {
            BootstrapError::CommandFailed { command, .. } => format!(
                "Read the output of `{}` above; devup stops at the first failing command",
                command
            ),
            BootstrapError::Spawn { program, .. } => format!(
                "Install `{}` or point the config at the right executable",
                program
            ),
            BootstrapError::MissingFile { path, .. } => {
                format!("Create {} or pass the correct directory", path.display())
            }
            BootstrapError::MalformedManifest { path, line, .. } => {
                format!("Fix line {} of {}", line, path.display())
            }
            BootstrapError::PinMismatch { .. } => {
                "Recreate the virtualenv or check for conflicting requirements".to_string()
            }
            BootstrapError::ConfigError { .. }
            | BootstrapError::InvalidConfigValueError { .. }
            | BootstrapError::TomlError(_) => {
                "Check devup.toml and the command line flags".to_string()
            }
            _ => "Check file permissions and free disk space".to_string(),
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            BootstrapError::Phase { phase, source } => {
                format!("{} failed: {}", phase, source.user_friendly_message())
            }
            BootstrapError::CommandFailed { stderr_tail, .. } if !stderr_tail.is_empty() => {
                format!("{} (last error line: {})", self, stderr_tail[stderr_tail.len() - 1])
            }
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BootstrapError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(code: i32) -> BootstrapError {
        BootstrapError::CommandFailed {
            command: "vagrant up".to_string(),
            status: format!("exit code {}", code),
            exit_code: code,
            stderr_tail: vec!["boom".to_string()],
        }
    }

    #[test]
    fn test_exit_code_passes_through_phase_wrapper() {
        let err = BootstrapError::Phase {
            phase: "Machine Bring-Up".to_string(),
            source: Box::new(failed(42)),
        };
        assert_eq!(err.exit_code(), 42);
        assert_eq!(err.category(), ErrorCategory::ExternalCommand);
        assert!(matches!(err.root(), BootstrapError::CommandFailed { .. }));
    }

    #[test]
    fn test_exit_code_for_spawn_and_input_errors() {
        let spawn = BootstrapError::Spawn {
            program: "virtualenv".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "nope"),
        };
        assert_eq!(spawn.exit_code(), 127);

        let missing = BootstrapError::MissingFile {
            what: "Machine definition".to_string(),
            path: PathBuf::from("vagrant/Vagrantfile"),
        };
        assert_eq!(missing.exit_code(), 1);
        assert_eq!(missing.category(), ErrorCategory::Input);
    }

    #[test]
    fn test_user_friendly_message_includes_last_stderr_line() {
        let msg = failed(3).user_friendly_message();
        assert!(msg.contains("vagrant up"));
        assert!(msg.contains("boom"));
    }
}
