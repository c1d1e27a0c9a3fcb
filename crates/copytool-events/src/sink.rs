//! External event sink writing one JSON envelope per line.

use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{SinkError, SinkResult};
use crate::{EventBus, EventEnvelope, EventStream};

/// Handle on a running sink writer.
pub struct EventSink {
    path: PathBuf,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

fn encode(envelope: &EventEnvelope) -> SinkResult<Vec<u8>> {
    let mut line =
        serde_json::to_vec(envelope).map_err(|source| SinkError::Encode { source })?;
    line.push(b'\n');
    Ok(line)
}

async fn write_line(file: &mut File, path: &Path, envelope: &EventEnvelope) -> SinkResult<()> {
    let line = encode(envelope)?;
    file.write_all(&line)
        .await
        .map_err(|source| SinkError::Write {
            path: path.to_path_buf(),
            source,
        })?;
    file.flush().await.map_err(|source| SinkError::Write {
        path: path.to_path_buf(),
        source,
    })
}

async fn pump(mut file: File, path: PathBuf, mut stream: EventStream, cancel: CancellationToken) {
    loop {
        let envelope = tokio::select! {
            () = cancel.cancelled() => break,
            next = stream.next() => match next {
                Some(envelope) => envelope,
                None => break,
            },
        };
        if let Err(err) = write_line(&mut file, &path, &envelope).await {
            warn!(error = %err, path = %path.display(), "event sink write failed, detaching");
            break;
        }
    }
    debug!(path = %path.display(), "event sink closed");
}

impl EventSink {
    /// Open `path` (a regular file or FIFO) and forward every future event into it.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Open`] when the sink cannot be opened for writing.
    pub async fn attach(bus: &EventBus, path: &Path) -> SinkResult<Self> {
        // read access keeps a FIFO open without waiting for a reader
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)
            .await
            .map_err(|source| SinkError::Open {
                path: path.to_path_buf(),
                source,
            })?;
        let stream = bus.subscribe();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(pump(file, path.to_path_buf(), stream, cancel.clone()));
        debug!(path = %path.display(), "event sink attached");
        Ok(Self {
            path: path.to_path_buf(),
            cancel,
            task,
        })
    }

    /// Location the sink writes to.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stop forwarding and wait for the writer to close the sink.
    pub async fn detach(self) {
        self.cancel.cancel();
        if let Err(err) = self.task.await {
            warn!(error = %err, path = %self.path.display(), "event sink writer aborted");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Event, OutcomeKind};
    use std::time::Duration;
    use uuid::Uuid;

    #[tokio::test]
    async fn writes_one_json_line_per_event() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("events.ndjson");
        let bus = EventBus::new();
        let sink = EventSink::attach(&bus, &path).await?;

        bus.publish(Event::ItemFinished {
            batch_id: Uuid::nil(),
            fid: "0x1:0x2:0x0".into(),
            cookie: 4,
            action: "REMOVE".into(),
            outcome: OutcomeKind::Failed,
            code: 2,
        });
        bus.publish(Event::Shutdown {
            reason: "coordinator shutdown".into(),
        });

        let mut contents = String::new();
        for _ in 0..50 {
            contents = tokio::fs::read_to_string(&path).await?;
            if contents.lines().count() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        sink.detach().await;

        let lines: Vec<serde_json::Value> = contents
            .lines()
            .map(serde_json::from_str)
            .collect::<Result<_, _>>()?;
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"]["type"], "item_finished");
        assert_eq!(lines[1]["event"]["type"], "shutdown");
        Ok(())
    }

    #[tokio::test]
    async fn attach_reports_unopenable_paths() {
        let bus = EventBus::new();
        let result = EventSink::attach(&bus, Path::new("/nonexistent/dir/events")).await;
        assert!(matches!(result, Err(SinkError::Open { .. })));
    }
}
