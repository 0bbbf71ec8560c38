use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use futures_util::future::join_all;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Instant;

use crate::store::BuildLog;

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` timed out after {}s", timeout.as_secs_f64())]
    Timeout { command: String, timeout: Duration },

    #[error("failed to wait for `{command}`: {source}")]
    Wait {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// Run `command`, streaming its stdout and stderr into `log` as they are
/// produced, and return its exit status.
///
/// `timeout` bounds the whole run, including draining output held open by
/// any background process the command left behind. On expiry the child is
/// killed and its output is no longer read. A non-zero exit is not an error
/// here; callers decide what the status means.
#[tracing::instrument(skip(command, stdin, log), fields(sha = %log.sha(), slot = %log.slot()), err)]
pub async fn run_logged(
    command: &mut Command,
    shown: &str,
    stdin: Option<&[u8]>,
    timeout: Duration,
    log: &BuildLog,
) -> Result<ExitStatus, ExecError> {
    let deadline = Instant::now() + timeout;
    log.append(format!("$ {shown}")).await;

    command
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn().map_err(|source| ExecError::Spawn {
        command: shown.to_owned(),
        source,
    })?;

    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        let input = input.to_vec();
        tokio::spawn(async move {
            if let Err(e) = pipe.write_all(&input).await {
                tracing::debug!(error = %e, "child closed stdin early");
            }
        });
    }

    let (tx, rx) = mpsc::unbounded_channel();
    let mut readers = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        readers.push(forward_lines(stdout, tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(forward_lines(stderr, tx.clone()));
    }
    drop(tx);
    let drain = tokio::spawn(drain_lines(rx, log.clone()));
    let abort_readers: Vec<AbortHandle> = readers.iter().map(JoinHandle::abort_handle).collect();

    let waited = tokio::time::timeout_at(deadline, child.wait()).await;
    let result = match waited {
        Ok(Ok(status)) => {
            // Background processes may still hold the pipes open.
            match tokio::time::timeout_at(deadline, join_all(readers)).await {
                Ok(_) => Ok(status),
                Err(_) => {
                    tracing::warn!(command = %shown, %status, "output still open after exit");
                    Err(ExecError::Timeout {
                        command: shown.to_owned(),
                        timeout,
                    })
                }
            }
        }
        Ok(Err(source)) => Err(ExecError::Wait {
            command: shown.to_owned(),
            source,
        }),
        Err(_) => {
            if let Err(e) = child.kill().await {
                tracing::warn!(error = %e, command = %shown, "failed to kill timed out process");
            }
            Err(ExecError::Timeout {
                command: shown.to_owned(),
                timeout,
            })
        }
    };
    abort_readers.iter().for_each(AbortHandle::abort);

    if let Err(e) = drain.await {
        tracing::error!(error = %e, "build log writer panicked");
    }

    match &result {
        Ok(status) => {
            tracing::info!(command = %shown, %status, "command finished");
            log.append(status.to_string()).await;
        }
        Err(e) => log.append(e.to_string()).await,
    }
    result
}

fn forward_lines<R>(stream: R, tx: mpsc::UnboundedSender<String>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    if tx.send(String::from_utf8_lossy(&buf).into_owned()).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!(error = %e, "stopped reading process output");
                    break;
                }
            }
        }
    })
}

/// Batch whatever output is queued into one append so a chatty process
/// does not rewrite the build record once per line.
async fn drain_lines(mut rx: mpsc::UnboundedReceiver<String>, log: BuildLog) {
    while let Some(first) = rx.recv().await {
        let mut chunk = first;
        while let Ok(next) = rx.try_recv() {
            chunk.push_str(&next);
        }
        log.append(chunk).await;
    }
}
