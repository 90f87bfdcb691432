use crate::domain::model::{CommandOutcome, CommandSpec, ExitStatusKind};
use crate::domain::ports::CommandRunner;
use crate::utils::error::{BootstrapError, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::process::{ExitStatus, Stdio};
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

pub const DEFAULT_TAIL_LINES: usize = 20;

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

/// 用 tokio::process 執行外部命令。
///
/// 子行程的 stdout/stderr 會逐行轉送到終端機（`echo`），同時保留最後
/// `tail_lines` 行給錯誤報告與後續解析使用。
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    tail_lines: usize,
    echo: bool,
}

impl ProcessRunner {
    pub fn new(tail_lines: usize) -> Self {
        Self {
            tail_lines,
            echo: true,
        }
    }

    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new(DEFAULT_TAIL_LINES)
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, command: &CommandSpec) -> Result<CommandOutcome> {
        tracing::info!("▶️ {} (in {})", command, command.cwd.display());
        let start_time = Instant::now();

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .current_dir(&command.cwd)
            .stdin(Stdio::inherit())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for key in &command.env_remove {
            cmd.env_remove(key);
        }
        for (key, value) in &command.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|source| BootstrapError::Spawn {
            program: command.program.clone(),
            source,
        })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (stdout_keep, stdout_echo) = if command.capture_stdout {
            (usize::MAX, false)
        } else {
            (self.tail_lines, self.echo)
        };
        let (stdout_tail, stderr_tail) = tokio::join!(
            drain(stdout, stdout_keep, Stream::Stdout, stdout_echo),
            drain(stderr, self.tail_lines, Stream::Stderr, self.echo),
        );

        let status = child.wait().await?;
        let duration = start_time.elapsed();
        let status = exit_status_kind(status);

        tracing::debug!("`{}` finished with {} after {:?}", command, status, duration);

        Ok(CommandOutcome {
            command: command.clone(),
            status,
            stdout_tail: stdout_tail?,
            stderr_tail: stderr_tail?,
            duration_ms: duration.as_millis() as u64,
        })
    }
}

async fn drain<R>(
    reader: Option<R>,
    keep: usize,
    stream: Stream,
    echo: bool,
) -> std::io::Result<Vec<String>>
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return Ok(Vec::new());
    };

    let mut reader = BufReader::new(reader);
    let mut tail = VecDeque::with_capacity(keep.min(64));
    let mut buf = Vec::new();

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buf);
        let line = line.trim_end_matches(['\n', '\r']).to_string();

        if echo {
            match stream {
                Stream::Stdout => println!("{}", line),
                Stream::Stderr => eprintln!("{}", line),
            }
        }

        if keep > 0 {
            if tail.len() == keep {
                tail.pop_front();
            }
            tail.push_back(line);
        }
    }

    Ok(tail.into_iter().collect())
}

#[cfg(unix)]
fn exit_status_kind(status: ExitStatus) -> ExitStatusKind {
    use std::os::unix::process::ExitStatusExt;
    match (status.code(), status.signal()) {
        (Some(code), _) => ExitStatusKind::Code(code),
        (None, Some(signal)) => ExitStatusKind::Signal(signal),
        (None, None) => ExitStatusKind::Code(1),
    }
}

#[cfg(not(unix))]
fn exit_status_kind(status: ExitStatus) -> ExitStatusKind {
    ExitStatusKind::Code(status.code().unwrap_or(1))
}
