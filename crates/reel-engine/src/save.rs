use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;

use reel_core::types::VideoWorkItem;
use reel_observe::metrics::ScopedTimer;
use reel_store::{Backoff, StorageBackend};

use crate::entry::EvalEntry;
use crate::job::EngineMetrics;
use crate::queue::WorkQueue;

pub(crate) struct SaveContext {
    pub rank: usize,
    pub id: usize,
    pub job_name: String,
    pub video_paths: Arc<Vec<String>>,
    pub work_items: Arc<Vec<VideoWorkItem>>,
    pub output_names: Vec<String>,
    pub storage: Arc<dyn StorageBackend>,
    pub backoff: Backoff,
    pub input: WorkQueue<EvalEntry>,
    pub retired_items: Arc<AtomicI64>,
    pub metrics: Arc<EngineMetrics>,
}

/// Blob path for one output column of one work item.
pub fn column_blob_path(job: &str, video: &str, column: &str, work_item_index: i64) -> String {
    format!("{job}/{video}/{column}/{work_item_index}")
}

/// Persists each output column of each incoming item as a size-prefixed blob
/// and retires the item.
pub(crate) fn run_save_worker(ctx: SaveContext) -> Result<()> {
    loop {
        let idle_start = Instant::now();
        let Some(entry) = ctx.input.pop() else { break };
        if entry.is_sentinel() {
            break;
        }
        ctx.metrics.save_idle.record(idle_start.elapsed());

        tracing::debug!(
            rank = ctx.rank,
            id = ctx.id,
            item = entry.work_item_index,
            "save: processing item"
        );

        let work_item = &ctx.work_items[entry.work_item_index as usize];
        let video_path = &ctx.video_paths[work_item.video_index];

        anyhow::ensure!(
            entry.device.is_cpu() && entry.columns.iter().flatten().all(|b| b.device().is_cpu()),
            "item {}: non-CPU buffers reached the save stage",
            entry.work_item_index
        );
        anyhow::ensure!(
            entry.columns.len() == ctx.output_names.len(),
            "item {}: {} columns arrived, job has {}",
            entry.work_item_index,
            entry.columns.len(),
            ctx.output_names.len()
        );

        let num_frames = entry.batch_len();
        for (name, column) in ctx.output_names.iter().zip(entry.columns.iter()) {
            anyhow::ensure!(
                column.len() == num_frames,
                "item {}: column {name} holds {} buffers, expected {num_frames}",
                entry.work_item_index,
                column.len()
            );

            let path = column_blob_path(&ctx.job_name, video_path, name, entry.work_item_index);
            let _io_span = ScopedTimer::new(&ctx.metrics.save_io);
            let mut file = ctx.backoff.retry(|| ctx.storage.write(&path))?;

            // Size prefixes first so readers can index into the blob, then
            // the concatenated payloads.
            let mut written = 0u64;
            for buffer in column {
                file.write_all(&(buffer.len() as u64).to_le_bytes())?;
                written += 8;
            }
            for buffer in column {
                file.write_all(buffer.as_slice())?;
                written += buffer.len() as u64;
            }
            file.save()?;

            ctx.metrics.bytes_written.inc_by(written);
        }
        // Column buffers are freed when the entry drops below.

        ctx.metrics.items_saved.inc();
        ctx.metrics.rows_saved.inc_by(num_frames as u64);
        // Gauge first: once the retired counter moves, the dispatcher may
        // admit a replacement item.
        ctx.metrics.on_item_retired();
        ctx.retired_items.fetch_add(1, Ordering::Release);

        tracing::debug!(
            rank = ctx.rank,
            id = ctx.id,
            item = entry.work_item_index,
            "save: finished item"
        );
    }

    tracing::debug!(rank = ctx.rank, id = ctx.id, "save: worker finished");
    Ok(())
}
