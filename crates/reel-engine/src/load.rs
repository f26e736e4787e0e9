use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;

use reel_core::types::{
    DecodeArgs, Device, Interval, LoadEntry, LoadItem, SampledRange, VideoMetadata, VideoWorkItem,
};
use reel_observe::metrics::ScopedTimer;
use reel_store::{Backoff, RandomReadFile, StorageBackend};

use crate::entry::EvalEntry;
use crate::job::EngineMetrics;
use crate::keyframes::find_keyframe_indices;
use crate::memory::DeviceBuffer;
use crate::queue::WorkQueue;

/// Column holding the encoded keyframe-aligned byte ranges.
pub const ENCODED_VIDEO_COLUMN: &str = "video";
/// Column holding the serialized decode arguments, aligned with the encoded
/// chunks one-to-one.
pub const DECODE_ARGS_COLUMN: &str = "video_args";

pub(crate) struct LoadContext {
    pub rank: usize,
    pub id: usize,
    pub warmup_count: i64,
    pub video_paths: Arc<Vec<String>>,
    pub metadata: Arc<Vec<VideoMetadata>>,
    pub work_items: Arc<Vec<VideoWorkItem>>,
    pub storage: Arc<dyn StorageBackend>,
    pub backoff: Backoff,
    pub input: WorkQueue<LoadItem>,
    pub output: WorkQueue<EvalEntry>,
    pub metrics: Arc<EngineMetrics>,
}

/// Translates each load entry into keyframe-aligned byte-range reads and
/// emits one decode-ready entry per work item.
pub(crate) fn run_load_worker(ctx: LoadContext) -> Result<()> {
    // The most recently read video stays open across items.
    let mut open: Option<(String, Box<dyn RandomReadFile>)> = None;

    loop {
        let idle_start = Instant::now();
        let Some(item) = ctx.input.pop() else { break };
        if item.is_sentinel() {
            break;
        }
        ctx.metrics.load_idle.record(idle_start.elapsed());

        tracing::debug!(
            rank = ctx.rank,
            id = ctx.id,
            item = item.work_item_index,
            "load: processing item"
        );

        let work_item = &ctx.work_items[item.work_item_index as usize];
        let video_path = &ctx.video_paths[work_item.video_index];
        let metadata = &ctx.metadata[work_item.video_index];

        let file = match &mut open {
            Some((path, file)) if path == video_path => file,
            slot => {
                // Open failures are fatal; only range reads are retried.
                let handle = ctx.storage.random_read(video_path)?;
                &mut slot.insert((video_path.clone(), handle)).1
            }
        };

        let mut entry = EvalEntry {
            work_item_index: item.work_item_index,
            column_names: vec![
                ENCODED_VIDEO_COLUMN.to_string(),
                DECODE_ARGS_COLUMN.to_string(),
            ],
            columns: vec![Vec::new(), Vec::new()],
            device: Device::CPU,
            video_decode_item: true,
        };

        for (interval, range) in expand_entry(&item.entry) {
            let (start_kf, end_kf) =
                find_keyframe_indices(interval.start, interval.end, &metadata.keyframe_positions)?;

            let start_offset = metadata.keyframe_byte_offsets[start_kf] as u64;
            let end_offset = metadata.keyframe_byte_offsets[end_kf] as u64;
            let chunk_size = (end_offset - start_offset) as usize;

            let mut chunk = vec![0u8; chunk_size];
            {
                let _io_span = ScopedTimer::new(&ctx.metrics.load_io);
                ctx.backoff
                    .retry(|| file.read_exact_at(start_offset, &mut chunk))?;
            }
            ctx.metrics.bytes_read.inc_by(chunk_size as u64);

            let args = DecodeArgs {
                // Capped by the rows that exist ahead of the item so the
                // decoder never emits more warmup rows than the terminal
                // group will trim.
                warmup_count: ctx.warmup_count.min(work_item.rows_from_start),
                start_keyframe: metadata.keyframe_positions[start_kf],
                end_keyframe: metadata.keyframe_positions[end_kf],
                range,
            };
            let args_bytes = bincode::serialize(&args)?;

            entry.columns[0].push(DeviceBuffer::from_vec(Device::CPU, chunk));
            entry.columns[1].push(DeviceBuffer::from_vec(Device::CPU, args_bytes));
        }

        ctx.metrics.items_loaded.inc();
        ctx.output.push(entry);
    }

    tracing::debug!(rank = ctx.rank, id = ctx.id, "load: worker finished");
    Ok(())
}

/// One `(interval, range)` pair per decode invocation: a single pair for
/// All/Strided, one per point for Gather, one per sub-interval for
/// SequenceGather.
fn expand_entry(entry: &LoadEntry) -> Vec<(Interval, SampledRange)> {
    match entry {
        LoadEntry::All { interval } => {
            vec![(*interval, SampledRange::All { interval: *interval })]
        }
        LoadEntry::Strided { interval, stride } => vec![(
            *interval,
            SampledRange::Strided {
                interval: *interval,
                stride: *stride,
            },
        )],
        LoadEntry::Gather { points } => points
            .iter()
            .map(|&frame| {
                (
                    Interval::new(frame, frame + 1),
                    SampledRange::Gather { frame },
                )
            })
            .collect(),
        LoadEntry::SequenceGather { intervals } => intervals
            .iter()
            .map(|&interval| (interval, SampledRange::SequenceGather { interval }))
            .collect(),
    }
}
