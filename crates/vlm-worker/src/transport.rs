//! JSON-lines host transport
//!
//! One JSON command per input line, one JSON event per output line.
//! Anything that is not a command is logged and skipped.

use futures::future::join_all;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use vlm_kernel::{HostCommand, WorkerEvent};

use crate::router::Router;

/// Serve `router` over a line-oriented reader/writer pair.
///
/// Returns once `reader` hits EOF and every spawned `load`/`run` has
/// finished and its events have been written.
pub async fn serve_json_lines<R, W>(
    router: Router,
    mut events: mpsc::UnboundedReceiver<WorkerEvent>,
    reader: R,
    mut writer: W,
) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    let mut pending: Vec<JoinHandle<()>> = Vec::new();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if let Some(task) = dispatch_line(&router, &line) {
                    pending.retain(|t| !t.is_finished());
                    pending.push(task);
                }
            }
            Some(event) = events.recv() => write_event(&mut writer, &event).await?,
        }
    }

    tracing::debug!(pending = pending.len(), "input closed, finishing pending work");
    let finished = join_all(pending);
    tokio::pin!(finished);
    loop {
        tokio::select! {
            _ = &mut finished => break,
            Some(event) = events.recv() => write_event(&mut writer, &event).await?,
        }
    }
    while let Ok(event) = events.try_recv() {
        write_event(&mut writer, &event).await?;
    }
    writer.flush().await
}

fn dispatch_line(router: &Router, line: &str) -> Option<JoinHandle<()>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match HostCommand::from_json(line) {
        Ok(command) => router.dispatch(command),
        Err(e) => {
            tracing::warn!(error = %e, "ignoring malformed command line");
            None
        }
    }
}

async fn write_event<W: AsyncWrite + Unpin>(
    writer: &mut W,
    event: &WorkerEvent,
) -> std::io::Result<()> {
    let mut line = event.to_json()?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}
