#![forbid(unsafe_code)]

//! Seam between the pipeline and the external video platform.
//!
//! Client handles are never shared: every resolve and every fetch asks the
//! factory for a fresh one, so a client implementation is free to keep
//! per-call state. The production client shells out to `yt-dlp`.

use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;

use serde_json::Value;

use crate::error::PlatformError;

pub const DEFAULT_YT_DLP: &str = "yt-dlp";

// Fragments yt-dlp prints on stderr when a video is gone rather than the
// request having failed.
const UNAVAILABLE_MARKERS: &[&str] = &[
    "Video unavailable",
    "Private video",
    "This video is not available",
    "This video has been removed",
];

/// How much of the target to extract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractMode {
    /// Listing only: entries carry ids but no per-video metadata.
    Flat,
    /// Full metadata for a single video.
    Full,
}

pub trait PlatformClient: Send {
    fn extract_info(&mut self, url: &str, mode: ExtractMode) -> Result<Value, PlatformError>;
}

/// Hands out one client per unit of work.
pub trait ClientFactory: Send + Sync {
    fn create(&self) -> Box<dyn PlatformClient>;
}

#[derive(Debug, Clone)]
pub struct YtDlpOptions {
    pub program: PathBuf,
    /// Passed as `--socket-timeout`; `None` keeps yt-dlp's own default.
    pub socket_timeout: Option<Duration>,
    pub cookies: Option<PathBuf>,
}

impl Default for YtDlpOptions {
    fn default() -> Self {
        Self {
            program: PathBuf::from(DEFAULT_YT_DLP),
            socket_timeout: None,
            cookies: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct YtDlpFactory {
    options: YtDlpOptions,
}

impl YtDlpFactory {
    /// A cookies file that does not exist is dropped with a warning.
    pub fn new(mut options: YtDlpOptions) -> Self {
        if let Some(cookies) = options.cookies.take_if(|path| !path.exists()) {
            tracing::warn!(
                cookies = %cookies.display(),
                "cookies file not found, running without cookies"
            );
        }
        Self { options }
    }
}

impl ClientFactory for YtDlpFactory {
    fn create(&self) -> Box<dyn PlatformClient> {
        Box::new(YtDlpClient {
            options: self.options.clone(),
        })
    }
}

/// Runs `yt-dlp --dump-single-json` and parses its stdout.
#[derive(Debug)]
pub struct YtDlpClient {
    options: YtDlpOptions,
}

impl YtDlpClient {
    fn command(&self, url: &str, mode: ExtractMode) -> Command {
        let mut command = Command::new(&self.options.program);
        command
            .arg("--dump-single-json")
            .arg("--skip-download")
            .arg("--no-warnings")
            .arg("--no-progress");

        if mode == ExtractMode::Flat {
            command.arg("--flat-playlist");
        }
        if let Some(timeout) = self.options.socket_timeout {
            command
                .arg("--socket-timeout")
                .arg(timeout.as_secs().max(1).to_string());
        }
        if let Some(cookies) = &self.options.cookies {
            command.arg("--cookies").arg(cookies);
        }

        command
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        command
    }

    fn program_label(&self) -> String {
        self.options.program.to_string_lossy().into_owned()
    }
}

impl PlatformClient for YtDlpClient {
    fn extract_info(&mut self, url: &str, mode: ExtractMode) -> Result<Value, PlatformError> {
        let output = self
            .command(url, mode)
            .output()
            .map_err(|source| PlatformError::Spawn {
                program: self.program_label(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if UNAVAILABLE_MARKERS
                .iter()
                .any(|marker| stderr.contains(marker))
            {
                return Err(PlatformError::Unavailable(format!("{url}: {stderr}")));
            }
            return Err(PlatformError::Exit {
                program: self.program_label(),
                status: output.status.to_string(),
                stderr,
            });
        }

        let raw = String::from_utf8(output.stdout)
            .map_err(|err| PlatformError::Parse(format!("stdout is not UTF-8: {err}")))?;
        Ok(serde_json::from_str(&raw)?)
    }
}
