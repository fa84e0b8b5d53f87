//! JSONL trace export (SPEC_FULL supplement) — every event published for a
//! run is appended to `<workdir>/.sykli/runs/<run_id>/occurrence.json`, one
//! JSON object per line, for offline replay and debugging.

use std::path::PathBuf;

use tokio::io::AsyncWriteExt;
use tracing::warn;

use super::{Event, EventBus, Scope};

/// Subscribe to `bus` for `run_id` and append every event to the run's
/// occurrence log until the sender side is dropped. `Scheduler::run` spawns
/// this once per run and aborts it shortly after publishing `RunCompleted`.
pub async fn export_run_trace(bus: &EventBus, run_id: ulid::Ulid, workdir: &std::path::Path) {
    let mut rx = bus.subscribe(Scope::Run(run_id));
    let path = trace_path(workdir, run_id);

    if let Some(parent) = path.parent() {
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            warn!(error = %e, "failed to create run trace directory; trace export disabled for this run");
            return;
        }
    }

    let file = match tokio::fs::OpenOptions::new().create(true).append(true).open(&path).await {
        Ok(f) => f,
        Err(e) => {
            warn!(error = %e, path = %path.display(), "failed to open occurrence log");
            return;
        }
    };
    let mut writer = tokio::io::BufWriter::new(file);

    while let Some(event) = rx.recv().await {
        if let Err(e) = append_line(&mut writer, &event).await {
            warn!(error = %e, "failed to append event to occurrence log");
        }
        // Flush per event rather than only at loop exit: this task is
        // typically ended by aborting it alongside run teardown, not by the
        // channel closing, so deferred flushing would lose the tail.
        let _ = writer.flush().await;
    }
}

fn trace_path(workdir: &std::path::Path, run_id: ulid::Ulid) -> PathBuf {
    workdir.join(".sykli").join("runs").join(run_id.to_string()).join("occurrence.json")
}

async fn append_line<W: tokio::io::AsyncWrite + Unpin>(writer: &mut W, event: &Event) -> std::io::Result<()> {
    let mut line = serde_json::to_vec(event).unwrap_or_default();
    line.push(b'\n');
    writer.write_all(&line).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventType;
    use std::sync::Arc;

    #[tokio::test]
    async fn trace_file_accumulates_one_line_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let workdir = dir.path().to_path_buf();
        let bus = Arc::new(EventBus::new());
        let run_id = crate::util::ulid_gen::next_ulid();

        let exporter = tokio::spawn({
            let bus = bus.clone();
            let workdir = workdir.clone();
            async move { export_run_trace(&bus, run_id, &workdir).await }
        });

        bus.publish(Event::new("node1", run_id, EventType::RunStarted, serde_json::json!({})));
        bus.publish(Event::new("node1", run_id, EventType::RunCompleted, serde_json::json!({})));

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        exporter.abort();

        let contents = tokio::fs::read_to_string(trace_path(&workdir, run_id)).await.unwrap();
        assert_eq!(contents.lines().count(), 2);
    }
}
