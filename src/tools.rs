//! Adapters around the external programs the pipeline shells out to.

use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;

use tracing::debug;

use crate::error::ToolError;
use crate::step::Offset;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Keeps console windows from flashing up for child processes on Windows.
pub trait NoWindowExt {
    fn no_window(&mut self) -> &mut Self;
}

impl NoWindowExt for Command {
    fn no_window(&mut self) -> &mut Self {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.creation_flags(CREATE_NO_WINDOW);
        }
        self
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TrimRequest<'a> {
    pub input: &'a Path,
    pub output: &'a Path,
    pub start: Offset,
    pub end: Offset,
}

#[derive(Debug, Clone, Copy)]
pub struct UpscaleRequest<'a> {
    pub input: &'a Path,
    pub output: &'a Path,
    pub width: u32,
}

/// Invokers for each step kind. Implementations write exactly to the
/// requested output path and keep the input's container format.
pub trait StepTools {
    fn trim(&self, request: &TrimRequest<'_>) -> Result<(), ToolError>;
    fn upscale(&self, request: &UpscaleRequest<'_>) -> Result<(), ToolError>;
}

pub const DEFAULT_FFMPEG: &str = "ffmpeg";

const STDERR_TAIL_LINES: usize = 20;

/// Runs every step through `ffmpeg`.
#[derive(Debug, Clone)]
pub struct FfmpegTools {
    program: PathBuf,
}

impl Default for FfmpegTools {
    fn default() -> Self {
        Self::new(DEFAULT_FFMPEG)
    }
}

impl FfmpegTools {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn base_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.no_window();
        cmd.args(["-hide_banner", "-nostdin"]);
        cmd
    }

    /// Stream copy between `start` and `end`; no re-encode.
    pub fn trim_command(&self, request: &TrimRequest<'_>) -> Command {
        let mut cmd = self.base_command();
        cmd.arg("-i")
            .arg(request.input)
            .arg("-ss")
            .arg(request.start.to_string())
            .arg("-to")
            .arg(request.end.to_string())
            .args(["-c", "copy"])
            .arg(request.output)
            .arg("-y");
        cmd
    }

    /// Scale to `width`, keeping the aspect ratio with an even height.
    pub fn upscale_command(&self, request: &UpscaleRequest<'_>) -> Command {
        let mut cmd = self.base_command();
        cmd.arg("-i")
            .arg(request.input)
            .arg("-vf")
            .arg(format!("scale={}:-2", request.width))
            .args(["-c:a", "copy"])
            .arg(request.output)
            .arg("-y");
        cmd
    }

    fn run(&self, mut cmd: Command) -> Result<(), ToolError> {
        let program = self.program.display().to_string();
        debug!(
            program = %program,
            args = ?cmd.get_args().collect::<Vec<_>>(),
            "Invoking tool"
        );
        let output = cmd
            .stdin(Stdio::null())
            .output()
            .map_err(|source| ToolError::Spawn {
                program: program.clone(),
                source,
            })?;
        if output.status.success() {
            return Ok(());
        }
        Err(ToolError::Failed {
            program,
            code: output.status.code(),
            stderr: stderr_tail(&output.stderr),
        })
    }
}

impl StepTools for FfmpegTools {
    fn trim(&self, request: &TrimRequest<'_>) -> Result<(), ToolError> {
        self.run(self.trim_command(request))
    }

    fn upscale(&self, request: &UpscaleRequest<'_>) -> Result<(), ToolError> {
        self.run(self.upscale_command(request))
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

/// Hands a URI to whatever the host uses to open links.
pub trait UriLauncher {
    /// Fire-and-forget: returns once the handler has been started.
    fn open(&self, uri: &str) -> io::Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLauncher;

impl UriLauncher for SystemLauncher {
    fn open(&self, uri: &str) -> io::Result<()> {
        let mut cmd = opener_command(uri);
        cmd.no_window()
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        let mut child = cmd.spawn()?;
        debug!(uri, pid = child.id(), "Launched URI handler");
        // Reap the handler in the background so it does not linger as a zombie.
        thread::spawn(move || {
            let _ = child.wait();
        });
        Ok(())
    }
}

#[cfg(target_os = "macos")]
fn opener_command(uri: &str) -> Command {
    let mut cmd = Command::new("open");
    cmd.arg(uri);
    cmd
}

#[cfg(windows)]
fn opener_command(uri: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.args(["/C", "start", ""]).arg(uri);
    cmd
}

#[cfg(all(unix, not(target_os = "macos")))]
fn opener_command(uri: &str) -> Command {
    let mut cmd = Command::new("xdg-open");
    cmd.arg(uri);
    cmd
}
