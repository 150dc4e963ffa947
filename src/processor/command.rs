//! Scoped external process invocation
//!
//! External tools are driven through piped standard I/O: source bytes in on
//! stdin, encoded output out on stdout, stderr captured for diagnostics. A
//! timeout forcibly terminates a hung child (the spawned process is
//! kill-on-drop, so abandoning the wait future reaps it), releasing the
//! worker instead of exhausting the pool. Tools that need seekable input get
//! a prefixed temp file; a startup sweep removes any files a crashed process
//! left behind.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::constants::TEMP_FILE_PREFIX;

/// Cap on stderr carried into error messages.
const STDERR_SNIPPET_LEN: usize = 2000;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("I/O error talking to {program}: {source}")]
    Io {
        program: String,
        source: std::io::Error,
    },

    #[error("{program} timed out after {timeout_secs}s and was killed")]
    TimedOut { program: String, timeout_secs: u64 },

    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("{program} succeeded but produced no output")]
    EmptyOutput { program: String },
}

/// Run a command with no stdin and capture its stdout.
///
/// Used for capability probes and dimension queries. Nonzero exit or empty
/// stdout is an error; the caller decides whether that means the backend is
/// unavailable or the request failed.
pub async fn capture_stdout(
    program: &str,
    args: &[String],
    timeout: Duration,
) -> Result<Vec<u8>, CommandError> {
    run(program, args, None, timeout).await
}

/// Pipe `input` through a command and capture its stdout.
pub async fn pipe_through(
    program: &str,
    args: &[String],
    input: &[u8],
    timeout: Duration,
) -> Result<Vec<u8>, CommandError> {
    run(program, args, Some(input), timeout).await
}

async fn run(
    program: &str,
    args: &[String],
    input: Option<&[u8]>,
    timeout: Duration,
) -> Result<Vec<u8>, CommandError> {
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    tracing::debug!(program, ?args, "invoking external tool");

    let mut child = command.spawn().map_err(|source| CommandError::Spawn {
        program: program.to_string(),
        source,
    })?;

    let mut stdin = child.stdin.take();
    let io_err = |source| CommandError::Io {
        program: program.to_string(),
        source,
    };

    // Feed stdin while the output collector drains stdout/stderr, so a child
    // with a full pipe buffer can never deadlock against us.
    let feed = async {
        if let (Some(mut pipe), Some(bytes)) = (stdin.take(), input) {
            pipe.write_all(bytes).await?;
            pipe.shutdown().await?;
        }
        Ok::<_, std::io::Error>(())
    };
    let wait = child.wait_with_output();

    let output = match tokio::time::timeout(timeout, async {
        let (fed, output) = tokio::join!(feed, wait);
        // A child that exits early may close stdin mid-write; its exit status
        // is the authoritative failure signal, so broken pipes are ignored.
        if let Err(e) = fed {
            if e.kind() != std::io::ErrorKind::BrokenPipe {
                return Err(io_err(e));
            }
        }
        output.map_err(|e| io_err(e))
    })
    .await
    {
        Ok(result) => result?,
        Err(_) => {
            tracing::warn!(program, timeout_secs = timeout.as_secs(), "external tool timed out");
            return Err(CommandError::TimedOut {
                program: program.to_string(),
                timeout_secs: timeout.as_secs(),
            });
        }
    };

    if !output.status.success() {
        return Err(CommandError::Failed {
            program: program.to_string(),
            status: output.status.to_string(),
            stderr: stderr_snippet(&output.stderr),
        });
    }
    if output.stdout.is_empty() {
        return Err(CommandError::EmptyOutput {
            program: program.to_string(),
        });
    }
    Ok(output.stdout)
}

fn stderr_snippet(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let trimmed = text.trim();
    if trimmed.len() > STDERR_SNIPPET_LEN {
        let mut snippet: String = trimmed.chars().take(STDERR_SNIPPET_LEN).collect();
        snippet.push('…');
        snippet
    } else {
        trimmed.to_string()
    }
}

/// Materialize source bytes as a prefixed temp file for tools that require
/// seekable input. The file is removed when the returned handle drops, on
/// every exit path.
pub async fn write_temp_source(
    data: &[u8],
    dir: &Path,
) -> Result<NamedTempFile, CommandError> {
    let program = "tempfile".to_string();
    let file = tempfile::Builder::new()
        .prefix(TEMP_FILE_PREFIX)
        .tempfile_in(dir)
        .map_err(|source| CommandError::Io {
            program: program.clone(),
            source,
        })?;
    tokio::fs::write(file.path(), data)
        .await
        .map_err(|source| CommandError::Io { program, source })?;
    Ok(file)
}

/// Remove stale temp files left by a previous process that crashed before
/// its scoped cleanup ran. Call once at startup. Returns the number of
/// files removed.
pub fn sweep_temp_dir(dir: &Path) -> std::io::Result<usize> {
    let mut removed = 0;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if name.to_string_lossy().starts_with(TEMP_FILE_PREFIX)
            && entry.file_type()?.is_file()
        {
            std::fs::remove_file(entry.path())?;
            removed += 1;
        }
    }
    if removed > 0 {
        tracing::info!(removed, dir = %dir.display(), "swept stale source temp files");
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_capture_stdout_success() {
        let out = capture_stdout("echo", &args(&["hello"]), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(String::from_utf8_lossy(&out).trim(), "hello");
    }

    #[tokio::test]
    async fn test_pipe_through_roundtrip() {
        let out = pipe_through("cat", &args(&[]), b"pixel data", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out, b"pixel data");
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let err = capture_stdout(
            "tessera-definitely-not-a-real-tool",
            &args(&[]),
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CommandError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_nonzero_exit_carries_stderr() {
        let err = pipe_through(
            "sh",
            &args(&["-c", "echo boom >&2; exit 3"]),
            b"",
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
        match err {
            CommandError::Failed { stderr, .. } => assert!(stderr.contains("boom")),
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_output_is_an_error() {
        let err = capture_stdout("true", &args(&[]), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::EmptyOutput { .. }));
    }

    #[tokio::test]
    async fn test_hung_child_is_killed_on_timeout() {
        let start = std::time::Instant::now();
        let err = pipe_through(
            "sleep",
            &args(&["30"]),
            b"",
            Duration::from_millis(200),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CommandError::TimedOut { .. }));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_temp_source_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = {
            let file = write_temp_source(b"bytes", dir.path()).await.unwrap();
            assert!(file
                .path()
                .file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with(TEMP_FILE_PREFIX));
            file.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_sweep_removes_only_prefixed_files() {
        let dir = tempfile::tempdir().unwrap();
        let stale = dir.path().join(format!("{}stale", TEMP_FILE_PREFIX));
        let other = dir.path().join("unrelated.txt");
        std::fs::write(&stale, b"x").unwrap();
        std::fs::write(&other, b"y").unwrap();

        let removed = sweep_temp_dir(dir.path()).unwrap();
        assert_eq!(removed, 1);
        assert!(!stale.exists());
        assert!(other.exists());
    }
}
