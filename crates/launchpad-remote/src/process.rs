//! Child process plumbing shared by the transports

use launchpad_core::{ExecutionResult, OutputLine, OutputStream};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::debug;

use crate::{LineCallback, RemoteInput};

/// Spawn `command`, feed `input` to its stdin and collect stdout/stderr.
///
/// stdin, stdout and stderr are pumped concurrently so a chatty process can never block
/// on a full pipe while we are still writing to it. The child is killed if the returned
/// future is dropped.
pub(crate) async fn run(
    mut command: Command,
    input: Option<RemoteInput>,
    on_line: Option<LineCallback>,
) -> std::io::Result<ExecutionResult> {
    command
        .stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn()?;
    let stdin = child.stdin.take();
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let feed = async move {
        if let (Some(mut input), Some(mut stdin)) = (input, stdin) {
            match tokio::io::copy(&mut input, &mut stdin).await {
                Ok(bytes) => debug!("Fed {} bytes to stdin", bytes),
                // The exit status tells the caller what happened on the other side
                Err(e) => debug!("stdin closed early: {}", e),
            }
            let _ = stdin.shutdown().await;
        }
    };

    let ((), stdout, stderr) = tokio::join!(
        feed,
        collect(stdout, OutputStream::Stdout, on_line.as_ref()),
        collect(stderr, OutputStream::Stderr, on_line.as_ref()),
    );

    let status = child.wait().await?;
    Ok(ExecutionResult {
        exit_code: status.code().unwrap_or(-1),
        stdout,
        stderr,
    })
}

async fn collect<R>(
    reader: Option<R>,
    stream: OutputStream,
    on_line: Option<&LineCallback>,
) -> String
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return String::new();
    };
    let mut reader = BufReader::new(reader);
    let mut collected = String::new();
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&buf);
                collected.push_str(&text);
                if let Some(callback) = on_line {
                    callback(&OutputLine {
                        stream,
                        line: text.trim_end_matches(&['\n', '\r'][..]).to_string(),
                    });
                }
            }
            Err(e) => {
                debug!("Failed to read {}: {}", stream, e);
                break;
            }
        }
    }
    collected
}
