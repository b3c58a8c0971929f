use crate::error::{BridgeError, Result};
use std::process::Stdio;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, info, warn};

/// The external RF decoder, emitting one JSON record per stdout line.
pub struct DecoderProcess {
    child: Child,
    command: String,
}

impl DecoderProcess {
    /// Starts the decoder. The command line is split on whitespace, no shell is involved.
    ///
    /// Returns the process handle and its buffered stdout. Stderr is forwarded to the log.
    pub fn spawn(command_line: &str) -> Result<(Self, BufReader<ChildStdout>)> {
        let mut parts = command_line.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| BridgeError::Config("decoder command is empty".to_string()))?;

        info!("Starting decoder: {}", command_line);
        let mut child = Command::new(program)
            .args(parts)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| BridgeError::DecoderSpawn {
                command: command_line.to_string(),
                source,
            })?;

        let stdout = child.stdout.take().ok_or_else(|| BridgeError::DecoderSpawn {
            command: command_line.to_string(),
            source: std::io::Error::other("stdout was not captured"),
        })?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut reader = BufReader::new(stderr);
                let mut buf = Vec::new();
                loop {
                    match read_line_lossy(&mut reader, &mut buf).await {
                        Ok(Some(line)) => debug!("decoder: {}", line),
                        Ok(None) => break,
                        Err(e) => {
                            warn!("Failed to read decoder stderr: {}", e);
                            break;
                        }
                    }
                }
            });
        }

        Ok((
            Self {
                child,
                command: command_line.to_string(),
            },
            BufReader::new(stdout),
        ))
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Stops the decoder if it is still running and reaps it.
    pub async fn shutdown(mut self) -> Result<()> {
        if self.child.try_wait()?.is_none() {
            info!("Stopping decoder `{}`", self.command);
            self.child.kill().await?;
        }
        Ok(())
    }
}

/// Reads one line, without its line ending, replacing invalid UTF-8 instead of failing.
/// `None` means the stream is closed.
pub(crate) async fn read_line_lossy<R>(reader: &mut R, buf: &mut Vec<u8>) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    if reader.read_until(b'\n', buf).await? == 0 {
        return Ok(None);
    }

    let line = String::from_utf8_lossy(buf);
    Ok(Some(line.trim_end_matches(['\n', '\r']).to_string()))
}
