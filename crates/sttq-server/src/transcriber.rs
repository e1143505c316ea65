use log::{debug, error, warn};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use sttq_common::{Result, TaskError};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Number of trailing stderr lines kept for a `TranscriberError`'s tail.
const STDERR_TAIL_LINES: usize = 80;
/// Grace period between a graceful terminate request and a forceful kill.
const KILL_GRACE: Duration = Duration::from_secs(5);

/// Supervises one invocation of the external Whisper CLI over a single
/// audio file. One driver call corresponds to one child process; the
/// worker loop enforces that only one call is in flight at a time.
pub struct TranscriberDriver {
    binary: String,
}

impl TranscriberDriver {
    pub fn new(binary: impl Into<String>) -> Self {
        Self { binary: binary.into() }
    }

    /// Run the transcriber over `audio_path`, writing SRT output into
    /// `output_dir`. Returns the path to the single produced SRT file.
    pub async fn transcribe(
        &self,
        audio_path: &Path,
        model: &str,
        output_dir: &Path,
        cancel: CancellationToken,
    ) -> Result<PathBuf> {
        let output_base = output_dir.join(
            audio_path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("audio"),
        );

        let mut cmd = Command::new(&self.binary);
        cmd.args([
            "-m",
            model,
            "-of",
            output_base.to_str().unwrap_or("output"),
            "-osrt",
        ])
        .arg(audio_path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(TaskError::Io)?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| TaskError::Internal("transcriber stderr not piped".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TaskError::Internal("transcriber stdout not piped".to_string()))?;

        let tail: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let tail_writer = tail.clone();
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!("transcriber: {line}");
                let mut buf = tail_writer.lock().await;
                buf.push(line);
                if buf.len() > STDERR_TAIL_LINES {
                    let excess = buf.len() - STDERR_TAIL_LINES;
                    buf.drain(0..excess);
                }
            }
        });
        let stdout_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!("transcriber stdout: {line}");
            }
        });

        let status = self.wait_with_cancellation(&mut child, cancel).await?;

        let _ = stdout_task.await;
        let _ = stderr_task.await;

        if !status.success() {
            let tail_lines = tail.lock().await;
            return Err(TaskError::Transcriber {
                code: status.code().unwrap_or(-1),
                tail: tail_lines.join("\n"),
            });
        }

        sttq_srt::find_unique_output(
            output_dir,
            audio_path.file_stem().and_then(|s| s.to_str()).unwrap_or("audio"),
        )
    }

    async fn wait_with_cancellation(
        &self,
        child: &mut Child,
        cancel: CancellationToken,
    ) -> Result<std::process::ExitStatus> {
        tokio::select! {
            status = child.wait() => status.map_err(TaskError::Io),
            _ = cancel.cancelled() => {
                warn!("transcriber cancelled; signalling child");
                self.terminate(child).await;
                Err(TaskError::Cancelled)
            }
        }
    }

    async fn terminate(&self, child: &mut Child) {
        if let Some(pid) = child.id() {
            #[cfg(unix)]
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
            #[cfg(not(unix))]
            {
                let _ = pid;
            }
        }

        let graceful = tokio::time::timeout(KILL_GRACE, child.wait()).await;
        if graceful.is_err() {
            if let Err(e) = child.kill().await {
                error!("failed to force-kill transcriber child: {e}");
            }
            let _ = child.wait().await;
        }
    }
}
