//! External Fetch
//!
//! The fetch is an opaque, blocking, fallible operation. The pipeline runs it
//! on the blocking thread pool, so implementations are free to block.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::FetchConfig;

/// Local result of a successful fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// Classified fetch failure
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Result exceeds the deliverable size
    #[error("result size {size_bytes} exceeds maximum {max_bytes} bytes")]
    ResultTooLarge { size_bytes: u64, max_bytes: u64 },

    /// Source missing, private, or without media
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    /// Anything else
    #[error("fetch failed: {0}")]
    Unknown(String),
}

/// Blocking fetch of `url` into `destination`
pub trait Fetcher: Send + Sync {
    fn fetch(&self, url: &str, destination: &Path) -> Result<Artifact, FetchError>;
}

/// Check the fetched file against the size cap, removing it when too large
pub fn check_artifact(destination: &Path, max_bytes: u64) -> Result<Artifact, FetchError> {
    let metadata = std::fs::metadata(destination).map_err(|_| {
        FetchError::SourceUnavailable(format!(
            "download completed but file not found: {}",
            destination.display()
        ))
    })?;

    let size_bytes = metadata.len();
    if size_bytes > max_bytes {
        if let Err(e) = std::fs::remove_file(destination) {
            warn!("Failed to remove oversized artifact {}: {}", destination.display(), e);
        }
        return Err(FetchError::ResultTooLarge {
            size_bytes,
            max_bytes,
        });
    }

    Ok(Artifact {
        path: destination.to_path_buf(),
        size_bytes,
    })
}

/// Fetcher that shells out to a downloader program (default: `yt-dlp`)
///
/// Arguments are passed as a list, never through a shell. `{url}` and
/// `{output}` in the configured arguments are substituted per job.
#[derive(Debug, Clone)]
pub struct CommandFetcher {
    program: String,
    args: Vec<String>,
    max_result_bytes: u64,
}

impl CommandFetcher {
    pub fn new(config: &FetchConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            max_result_bytes: config.max_result_bytes,
        }
    }

    fn render_args(&self, url: &str, destination: &Path) -> Vec<String> {
        let output = destination.to_string_lossy();
        self.args
            .iter()
            .map(|arg| arg.replace("{url}", url).replace("{output}", &output))
            .collect()
    }
}

impl Fetcher for CommandFetcher {
    fn fetch(&self, url: &str, destination: &Path) -> Result<Artifact, FetchError> {
        let start = Instant::now();
        let args = self.render_args(url, destination);
        info!("Downloading video from: {}", url);
        debug!("Executing: {} ({} args)", self.program, args.len());

        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| FetchError::Unknown(format!("failed to spawn {}: {e}", self.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let reason = stderr.lines().last().unwrap_or("no output").trim().to_string();
            warn!(
                "Downloader failed: {} (exit code: {:?})",
                reason,
                output.status.code()
            );
            return Err(FetchError::SourceUnavailable(reason));
        }

        let artifact = check_artifact(destination, self.max_result_bytes)?;
        info!(
            "Downloaded {} ({:.1} MB in {:.1}s)",
            artifact.path.display(),
            artifact.size_bytes as f64 / 1024.0 / 1024.0,
            start.elapsed().as_secs_f64()
        );
        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetcher(program: &str, args: &[&str], max: u64) -> CommandFetcher {
        CommandFetcher::new(&FetchConfig {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            max_result_bytes: max,
            ..FetchConfig::default()
        })
    }

    #[test]
    fn test_render_args_substitutes_placeholders() {
        let f = fetcher("dl", &["-o", "{output}", "{url}"], 10);
        let args = f.render_args("https://x.com/i/status/1", Path::new("/tmp/out.mp4"));
        assert_eq!(args, vec!["-o", "/tmp/out.mp4", "https://x.com/i/status/1"]);
    }

    #[test]
    fn test_check_artifact_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = check_artifact(&dir.path().join("nope.mp4"), 10).unwrap_err();
        assert!(matches!(err, FetchError::SourceUnavailable(_)));
    }

    #[test]
    fn test_check_artifact_too_large_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.mp4");
        std::fs::write(&path, vec![0u8; 64]).unwrap();

        let err = check_artifact(&path, 32).unwrap_err();
        assert!(matches!(
            err,
            FetchError::ResultTooLarge {
                size_bytes: 64,
                max_bytes: 32
            }
        ));
        assert!(!path.exists());
    }

    #[test]
    fn test_check_artifact_within_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ok.mp4");
        std::fs::write(&path, b"data").unwrap();

        let artifact = check_artifact(&path, 32).unwrap();
        assert_eq!(artifact.size_bytes, 4);
    }

    #[test]
    fn test_missing_program_is_unknown_failure() {
        let dir = tempfile::tempdir().unwrap();
        let f = fetcher("jobgate-no-such-downloader", &["{url}"], 10);
        let err = f.fetch("https://x.com/i/status/1", &dir.path().join("o.mp4")).unwrap_err();
        assert!(matches!(err, FetchError::Unknown(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_program_is_source_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let f = fetcher("false", &[], 10);
        let err = f.fetch("https://x.com/i/status/1", &dir.path().join("o.mp4")).unwrap_err();
        assert!(matches!(err, FetchError::SourceUnavailable(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_program_output_is_checked() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("o.mp4");
        let f = fetcher("sh", &["-c", "printf abc > \"$0\"", "{output}"], 10);

        let artifact = f.fetch("https://x.com/i/status/1", &dest).unwrap();
        assert_eq!(artifact.size_bytes, 3);
        assert_eq!(artifact.path, dest);
    }
}
