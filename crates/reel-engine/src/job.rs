use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::{Context, Result};

use reel_core::types::{Device, DeviceType, JobDescriptor, LoadItem, Sampling, VideoMetadata};
use reel_observe::metrics::{Counter, DurationAgg, Gauge};
use reel_store::{Backoff, StorageBackend};

use crate::dispatch::{dispatch_work, Communicator, DispatchContext};
use crate::entry::EvalEntry;
use crate::eval::{run_eval_worker, EvalContext};
use crate::evaluator::{EvaluatorConfig, EvaluatorFactory};
use crate::groups::group_factories;
use crate::load::{run_load_worker, LoadContext};
use crate::planner::{max_warmup, plan_work};
use crate::queue::WorkQueue;
use crate::save::{run_save_worker, SaveContext};

/// One video in the dataset: where its encoded stream lives and what the
/// ingest path learned about it.
#[derive(Debug, Clone)]
pub struct VideoSource {
    pub path: String,
    pub metadata: VideoMetadata,
}

/// A declarative job: dataset, frame selection, and the evaluator chain.
pub struct JobRequest {
    pub job_name: String,
    pub videos: Vec<VideoSource>,
    pub sampling: Sampling,
    pub factories: Vec<Arc<dyn EvaluatorFactory>>,
}

/// Per-node worker counts and sizing knobs.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub load_workers_per_node: usize,
    pub pus_per_node: usize,
    pub save_workers_per_node: usize,
    /// Backlog each processing unit may hold; bounds in-flight items.
    pub tasks_in_queue_per_pu: i64,
    /// Output rows per work item.
    pub work_item_size: i64,
    pub backoff: Backoff,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            load_workers_per_node: 2,
            pus_per_node: 1,
            save_workers_per_node: 2,
            tasks_in_queue_per_pu: 4,
            work_item_size: 64,
            backoff: Backoff::default(),
        }
    }
}

impl EngineOptions {
    /// Defaults overridden by `REEL_*` environment knobs.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            load_workers_per_node: env_usize("REEL_LOAD_WORKERS", defaults.load_workers_per_node),
            pus_per_node: env_usize("REEL_PUS", defaults.pus_per_node),
            save_workers_per_node: env_usize("REEL_SAVE_WORKERS", defaults.save_workers_per_node),
            tasks_in_queue_per_pu: env_i64(
                "REEL_TASKS_IN_QUEUE_PER_PU",
                defaults.tasks_in_queue_per_pu,
            ),
            work_item_size: env_i64("REEL_WORK_ITEM_SIZE", defaults.work_item_size),
            backoff: defaults.backoff,
        }
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.load_workers_per_node >= 1, "need at least one load worker");
        anyhow::ensure!(self.pus_per_node >= 1, "need at least one processing unit");
        anyhow::ensure!(self.save_workers_per_node >= 1, "need at least one save worker");
        anyhow::ensure!(self.tasks_in_queue_per_pu >= 1, "backlog must admit work");
        anyhow::ensure!(self.work_item_size >= 1, "work items must hold rows");
        Ok(())
    }
}

fn env_usize(name: &str, default: usize) -> usize {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse::<usize>().ok().unwrap_or(default),
        Err(_) => default,
    }
}

fn env_i64(name: &str, default: i64) -> i64 {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse::<i64>().ok().unwrap_or(default),
        Err(_) => default,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobSummary {
    pub work_items: usize,
    pub total_rows: i64,
    pub retired_items: i64,
}

/// Engine-wide counters and stage timings, logged once per job under the
/// `reel_metrics` target.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    pub items_loaded: Counter,
    pub bytes_read: Counter,
    pub items_evaluated: Counter,
    pub device_migrations: Counter,
    pub warmup_rows_trimmed: Counter,
    pub items_saved: Counter,
    pub rows_saved: Counter,
    pub bytes_written: Counter,
    /// Items admitted to this node's load queue and not yet retired; the
    /// dispatcher gate keeps this below `pus * tasks_in_queue_per_pu`.
    pub inflight_items: Gauge,
    pub inflight_items_high_water: Gauge,
    pub load_idle: DurationAgg,
    pub load_io: DurationAgg,
    pub eval_idle: DurationAgg,
    pub eval_task: DurationAgg,
    pub save_idle: DurationAgg,
    pub save_io: DurationAgg,
}

impl EngineMetrics {
    /// An item entered this node's load queue.
    pub(crate) fn on_item_accepted(&self) {
        let now = self.inflight_items.add(1);
        self.inflight_items_high_water.max(now);
    }

    /// An item finished the save stage and left the node.
    pub(crate) fn on_item_retired(&self) {
        self.inflight_items.sub(1);
    }

    fn snapshot(&self, job_name: &str, rank: usize) {
        tracing::info!(
            target: "reel_metrics",
            job = %job_name,
            rank = rank,
            items_loaded = self.items_loaded.get(),
            bytes_read = self.bytes_read.get(),
            items_evaluated = self.items_evaluated.get(),
            device_migrations = self.device_migrations.get(),
            warmup_rows_trimmed = self.warmup_rows_trimmed.get(),
            items_saved = self.items_saved.get(),
            rows_saved = self.rows_saved.get(),
            bytes_written = self.bytes_written.get(),
            inflight_items = self.inflight_items.get(),
            inflight_items_high_water = self.inflight_items_high_water.get(),
            load_idle_avg_ns = self.load_idle.snapshot().avg_ns(),
            load_io_avg_ns = self.load_io.snapshot().avg_ns(),
            eval_idle_avg_ns = self.eval_idle.snapshot().avg_ns(),
            eval_task_avg_ns = self.eval_task.snapshot().avg_ns(),
            save_idle_avg_ns = self.save_idle.snapshot().avg_ns(),
            save_io_avg_ns = self.save_io.snapshot().avg_ns(),
            "metrics"
        );
    }
}

/// Runs a job to completion on this node, coordinating with the rest of the
/// cluster through `comm`.
///
/// Every node runs the same planner over the same request, so the master can
/// hand out bare item indices. Worker threads are joined in pipeline order:
/// loads, then each evaluator group front to back, then saves, so no stage
/// terminates while an upstream stage may still enqueue work.
pub fn run_job(
    storage: Arc<dyn StorageBackend>,
    comm: Arc<dyn Communicator>,
    request: JobRequest,
    options: EngineOptions,
) -> Result<JobSummary> {
    options.validate()?;
    anyhow::ensure!(
        !request.factories.is_empty(),
        "job needs at least one evaluator"
    );
    anyhow::ensure!(!request.videos.is_empty(), "job needs at least one video");

    let rank = comm.rank();
    let job_name = request.job_name.clone();

    // Normalize ingest metadata once; the planner and load stage rely on the
    // trailing sentinels.
    let mut metadata = Vec::with_capacity(request.videos.len());
    let mut video_paths = Vec::with_capacity(request.videos.len());
    for (index, video) in request.videos.iter().enumerate() {
        let mut meta = video.metadata.clone();
        meta.ensure_sentinels();
        meta.validate()
            .with_context(|| format!("video {index} ({})", video.path))?;
        metadata.push(meta);
        video_paths.push(video.path.clone());
    }
    let metadata = Arc::new(metadata);
    let video_paths = Arc::new(video_paths);

    let capabilities: Vec<_> = request.factories.iter().map(|f| f.capabilities()).collect();
    let warmup_count = max_warmup(&capabilities);
    let output_names = request
        .factories
        .last()
        .map(|f| f.output_names())
        .unwrap_or_default();

    let plan = plan_work(&metadata, &request.sampling, options.work_item_size)?;
    let work_items = Arc::new(plan.work_items);
    let load_items = Arc::new(plan.load_items);
    let total_rows = plan.total_rows;

    if rank == 0 {
        tracing::info!(
            job = %job_name,
            work_items = work_items.len(),
            total_rows = total_rows,
            "planned job"
        );
    }

    let factory_groups = group_factories(&request.factories);
    let num_groups = factory_groups.len();
    let max_frame_width = metadata.iter().map(|m| m.width).max().unwrap_or(0);
    let max_frame_height = metadata.iter().map(|m| m.height).max().unwrap_or(0);

    let metrics = Arc::new(EngineMetrics::default());
    let retired_items = Arc::new(AtomicI64::new(0));

    let load_queue: WorkQueue<LoadItem> = WorkQueue::new();
    let initial_eval_queue: WorkQueue<EvalEntry> = WorkQueue::new();
    let save_queue: WorkQueue<EvalEntry> = WorkQueue::new();
    // Per processing unit, one queue between each pair of adjacent groups.
    let group_queues: Vec<Vec<WorkQueue<EvalEntry>>> = (0..options.pus_per_node)
        .map(|_| (0..num_groups.saturating_sub(1)).map(|_| WorkQueue::new()).collect())
        .collect();

    let mut load_handles = Vec::with_capacity(options.load_workers_per_node);
    for id in 0..options.load_workers_per_node {
        let ctx = LoadContext {
            rank,
            id,
            warmup_count,
            video_paths: video_paths.clone(),
            metadata: metadata.clone(),
            work_items: work_items.clone(),
            storage: storage.clone(),
            backoff: options.backoff,
            input: load_queue.clone(),
            output: initial_eval_queue.clone(),
            metrics: metrics.clone(),
        };
        load_handles.push(spawn_worker(format!("reel-load-{id}"), move || {
            run_load_worker(ctx)
        })?);
    }

    let mut eval_handles: Vec<Vec<JoinHandle<()>>> = Vec::with_capacity(options.pus_per_node);
    for pu in 0..options.pus_per_node {
        let mut chain_handles = Vec::with_capacity(num_groups);
        for (group_index, group) in factory_groups.iter().enumerate() {
            let configs: Vec<EvaluatorConfig> = group
                .iter()
                .map(|factory| EvaluatorConfig {
                    max_input_count: options.work_item_size.max(warmup_count),
                    max_frame_width,
                    max_frame_height,
                    device: match factory.capabilities().device_type {
                        DeviceType::Cpu => Device::CPU,
                        DeviceType::Gpu => Device::gpu(pu as u32),
                    },
                })
                .collect();
            let input = if group_index == 0 {
                initial_eval_queue.clone()
            } else {
                group_queues[pu][group_index - 1].clone()
            };
            let output = if group_index == num_groups - 1 {
                save_queue.clone()
            } else {
                group_queues[pu][group_index].clone()
            };
            let ctx = EvalContext {
                rank,
                pu,
                group_index,
                last_group: group_index == num_groups - 1,
                warmup_count,
                work_item_size: options.work_item_size,
                metadata: metadata.clone(),
                work_items: work_items.clone(),
                factories: group.clone(),
                configs,
                input,
                output,
                metrics: metrics.clone(),
            };
            chain_handles.push(spawn_worker(
                format!("reel-eval-{pu}-{group_index}"),
                move || run_eval_worker(ctx),
            )?);
        }
        eval_handles.push(chain_handles);
    }

    let mut save_handles = Vec::with_capacity(options.save_workers_per_node);
    for id in 0..options.save_workers_per_node {
        let ctx = SaveContext {
            rank,
            id,
            job_name: job_name.clone(),
            video_paths: video_paths.clone(),
            work_items: work_items.clone(),
            output_names: output_names.clone(),
            storage: storage.clone(),
            backoff: options.backoff,
            input: save_queue.clone(),
            retired_items: retired_items.clone(),
            metrics: metrics.clone(),
        };
        save_handles.push(spawn_worker(format!("reel-save-{id}"), move || {
            run_save_worker(ctx)
        })?);
    }

    dispatch_work(DispatchContext {
        comm: comm.clone(),
        load_items: load_items.clone(),
        load_queue: load_queue.clone(),
        retired_items: retired_items.clone(),
        backlog_limit: options.pus_per_node as i64 * options.tasks_in_queue_per_pu,
        metrics: metrics.clone(),
    })?;

    // Shutdown: drain stage by stage so no stage exits while an upstream one
    // can still enqueue work.
    for _ in 0..options.load_workers_per_node {
        load_queue.push(LoadItem::sentinel());
    }
    join_all(load_handles)?;

    for _ in 0..options.pus_per_node {
        initial_eval_queue.push(EvalEntry::sentinel());
    }
    let mut eval_tails: Vec<Vec<JoinHandle<()>>> = Vec::with_capacity(options.pus_per_node);
    for chain in eval_handles {
        let mut chain = chain.into_iter();
        if let Some(first) = chain.next() {
            join_one(first)?;
        }
        eval_tails.push(chain.collect());
    }
    for group_index in 1..num_groups {
        for pu in 0..options.pus_per_node {
            group_queues[pu][group_index - 1].push(EvalEntry::sentinel());
        }
        for chain in eval_tails.iter_mut() {
            if !chain.is_empty() {
                join_one(chain.remove(0))?;
            }
        }
    }

    for _ in 0..options.save_workers_per_node {
        save_queue.push(EvalEntry::sentinel());
    }
    join_all(save_handles)?;

    if rank == 0 {
        let descriptor = JobDescriptor::new(
            reel_observe::time::unix_time_ms() as i64,
            &request.sampling,
            options.work_item_size,
            &output_names,
        );
        let bytes = serde_json::to_vec_pretty(&descriptor)?;
        let mut file = options
            .backoff
            .retry(|| storage.write(&descriptor_blob_path(&job_name)))?;
        file.write_all(&bytes)?;
        file.save()?;
    }

    metrics.snapshot(&job_name, rank);

    Ok(JobSummary {
        work_items: work_items.len(),
        total_rows,
        retired_items: retired_items.load(Ordering::Acquire),
    })
}

/// Blob path of the persisted job descriptor.
pub fn descriptor_blob_path(job: &str) -> String {
    format!("{job}/descriptor.json")
}

fn spawn_worker(
    name: String,
    f: impl FnOnce() -> Result<()> + Send + 'static,
) -> Result<JoinHandle<()>> {
    let thread_name = name.clone();
    let handle = std::thread::Builder::new()
        .name(thread_name)
        .spawn(move || {
            if let Err(err) = f() {
                // No per-item recovery: a failed worker aborts the job.
                tracing::error!(worker = %name, error = %err, "worker failed, aborting job");
                std::process::exit(1);
            }
        })?;
    Ok(handle)
}

fn join_all(handles: Vec<JoinHandle<()>>) -> Result<()> {
    for handle in handles {
        join_one(handle)?;
    }
    Ok(())
}

fn join_one(handle: JoinHandle<()>) -> Result<()> {
    handle
        .join()
        .map_err(|_| anyhow::anyhow!("worker thread panicked"))
}
