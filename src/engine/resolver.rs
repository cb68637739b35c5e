//! Tool Variant Resolution
//!
//! Probes the local environment once at startup to determine which
//! ImageMagick toolchain is installed: the unified `magick` entry point of
//! version 7 and later, or the legacy `convert` toolchain of version 6.
//! The result is a startup-time constant shared freely across callers.

use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

/// Major version at which the unified `magick` entry point became the
/// supported calling convention.
const MODERN_MAJOR_VERSION: u32 = 7;

/// Upper bound on each version probe so a hung binary cannot stall startup.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// The resolved calling convention of the installed ImageMagick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolVariant {
    /// ImageMagick 6.x: `convert`, `identify`, `mogrify` as separate binaries
    Legacy,
    /// ImageMagick 7.x and later: the unified `magick` entry point
    Modern,
}

impl ToolVariant {
    /// Binary name substituted into generically-addressed commands.
    pub fn binary(&self) -> &'static str {
        match self {
            ToolVariant::Legacy => "convert",
            ToolVariant::Modern => "magick",
        }
    }
}

impl std::fmt::Display for ToolVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolVariant::Legacy => write!(f, "legacy (convert)"),
            ToolVariant::Modern => write!(f, "modern (magick)"),
        }
    }
}

/// Errors raised while resolving the installed toolchain. Fatal at startup;
/// never retried.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error(
        "ImageMagick is not installed. Please install it:\n\
         \x20 Ubuntu/Debian: sudo apt-get install imagemagick\n\
         \x20 macOS: brew install imagemagick\n\
         \x20 Windows: https://imagemagick.org/script/download.php"
    )]
    ToolNotFound,

    #[error("version probe for '{binary}' did not answer within {timeout:?}")]
    ProbeTimedOut { binary: &'static str, timeout: Duration },
}

/// Resolve the installed ImageMagick variant.
///
/// Spawns at most two short-lived probe processes: `magick -version` first,
/// falling back to `convert -version`. A probe that hangs is a hard
/// resolution failure, not a transient one.
pub async fn resolve() -> Result<ToolVariant, ResolveError> {
    if let Some(banner) = probe("magick").await? {
        match parse_major_version(&banner) {
            Some(major) if major >= MODERN_MAJOR_VERSION => {
                info!(major, "resolved modern ImageMagick (magick)");
                return Ok(ToolVariant::Modern);
            }
            other => debug!(?other, "magick probe answered but below modern threshold"),
        }
    }

    if probe("convert").await?.is_some() {
        info!("resolved legacy ImageMagick (convert)");
        return Ok(ToolVariant::Legacy);
    }

    Err(ResolveError::ToolNotFound)
}

/// Run `<binary> -version` and return its stdout, or `None` when the binary
/// is absent or exits unsuccessfully.
async fn probe(binary: &'static str) -> Result<Option<String>, ResolveError> {
    let spawned = Command::new(binary)
        .arg("-version")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .output();

    let output = match tokio::time::timeout(PROBE_TIMEOUT, spawned).await {
        Err(_) => {
            return Err(ResolveError::ProbeTimedOut {
                binary,
                timeout: PROBE_TIMEOUT,
            })
        }
        Ok(Err(e)) => {
            debug!(binary, error = %e, "version probe could not spawn");
            return Ok(None);
        }
        Ok(Ok(output)) => output,
    };

    if !output.status.success() {
        debug!(binary, status = ?output.status.code(), "version probe exited non-zero");
        return Ok(None);
    }

    Ok(Some(String::from_utf8_lossy(&output.stdout).to_string()))
}

/// Extract the major version from an ImageMagick version banner, e.g.
/// `Version: ImageMagick 7.1.1-21 Q16-HDRI x86_64 ...`.
fn parse_major_version(banner: &str) -> Option<u32> {
    let rest = banner.split("ImageMagick ").nth(1)?;
    let version = rest.split_whitespace().next()?;
    let major = version.split(['.', '-']).next()?;
    major.parse().ok()
}
