//! Screenshot capture for failed tests.
//!
//! Capturing the screen belongs to the host framework (a browser helper, a
//! device bridge, ...). The reporter only needs [`ScreenshotCapture`]: save a
//! file with a given name into a known directory. [`CommandCapture`] covers
//! hosts that can take a screenshot from a shell command.
//!
//! # Example Configuration
//!
//! ```toml
//! [testrail]
//! output_dir = "output"
//! screenshot_command = "xwd -root -silent | convert xwd:- png:{file}"
//! ```

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

/// Result type for capture operations.
pub type CaptureResult<T> = Result<T, CaptureError>;

/// Errors that can occur while capturing a screenshot.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("Failed to run screenshot command: {0}")]
    Spawn(String),

    #[error("Screenshot command exited with {code:?}: {stderr}")]
    CommandFailed { code: Option<i32>, stderr: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Capability to save a screenshot of the system under test.
#[async_trait]
pub trait ScreenshotCapture: Send + Sync {
    /// Directory that screenshot file names are relative to.
    fn output_dir(&self) -> &Path;

    /// Saves a screenshot as `file_name` inside [`output_dir`](Self::output_dir).
    async fn save_screenshot(&self, file_name: &str) -> CaptureResult<()>;
}

/// Captures screenshots by running a shell command template.
///
/// `{file}` in the template is replaced with the absolute target path.
pub struct CommandCapture {
    command: String,
    output_dir: PathBuf,
    shell: String,
}

impl CommandCapture {
    pub fn new(command: impl Into<String>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            output_dir: output_dir.into(),
            shell: "/bin/sh".to_string(),
        }
    }

    /// Uses a different shell for running the command.
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    fn render(&self, target: &Path) -> String {
        self.command
            .replace("{file}", &target.display().to_string())
    }
}

#[async_trait]
impl ScreenshotCapture for CommandCapture {
    fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    async fn save_screenshot(&self, file_name: &str) -> CaptureResult<()> {
        tokio::fs::create_dir_all(&self.output_dir).await?;

        let target = self.output_dir.join(file_name);
        let shell_cmd = self.render(&target);
        debug!("Capturing screenshot: {}", shell_cmd);

        let output = tokio::process::Command::new(&self.shell)
            .arg("-c")
            .arg(&shell_cmd)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| CaptureError::Spawn(e.to_string()))?;

        if !output.status.success() {
            return Err(CaptureError::CommandFailed {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(())
    }
}

/// Waits until `path` exists as a regular file, polling every 100ms.
///
/// Returns `false` when the file did not show up within `timeout`.
pub async fn wait_for_file(path: &Path, timeout: Duration) -> bool {
    let poll = Duration::from_millis(100);
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        if let Ok(meta) = tokio::fs::metadata(path).await
            && meta.is_file()
        {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(poll).await;
    }
}
