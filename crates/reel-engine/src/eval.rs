use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;

use reel_core::types::{Device, VideoMetadata, VideoWorkItem};

use crate::entry::EvalEntry;
use crate::error::EngineError;
use crate::evaluator::{BatchColumns, EvaluatorConfig, EvaluatorFactory};
use crate::job::EngineMetrics;
use crate::memory::DeviceBuffer;
use crate::queue::WorkQueue;

pub(crate) struct EvalContext {
    pub rank: usize,
    pub pu: usize,
    pub group_index: usize,
    /// Warmup rows are discarded only here; earlier groups forward them to
    /// warm up downstream evaluators.
    pub last_group: bool,
    pub warmup_count: i64,
    pub work_item_size: i64,
    pub metadata: Arc<Vec<VideoMetadata>>,
    pub work_items: Arc<Vec<VideoWorkItem>>,
    pub factories: Vec<Arc<dyn EvaluatorFactory>>,
    pub configs: Vec<EvaluatorConfig>,
    pub input: WorkQueue<EvalEntry>,
    pub output: WorkQueue<EvalEntry>,
    pub metrics: Arc<EngineMetrics>,
}

/// Runs one factory group's slice of the evaluator chain over every incoming
/// work item.
pub(crate) fn run_eval_worker(ctx: EvalContext) -> Result<()> {
    anyhow::ensure!(
        !ctx.factories.is_empty() && ctx.factories.len() == ctx.configs.len(),
        "evaluator group must pair each factory with a config"
    );

    let output_names: Vec<Vec<String>> = ctx.factories.iter().map(|f| f.output_names()).collect();
    let mut evaluators = Vec::with_capacity(ctx.factories.len());
    for (factory, config) in ctx.factories.iter().zip(ctx.configs.iter()) {
        evaluators.push(factory.new_evaluator(*config)?);
    }

    let group_columns = output_names.last().cloned().unwrap_or_default();

    let mut last_video_index: Option<usize> = None;
    let mut last_next_item_id: i64 = -1;

    loop {
        let idle_start = Instant::now();
        let Some(entry) = ctx.input.pop() else { break };
        if entry.is_sentinel() {
            break;
        }
        ctx.metrics.eval_idle.record(idle_start.elapsed());

        tracing::debug!(
            rank = ctx.rank,
            pu = ctx.pu,
            group = ctx.group_index,
            item = entry.work_item_index,
            "evaluate: processing item"
        );
        let work_start = Instant::now();

        let work_item = &ctx.work_items[entry.work_item_index as usize];
        let metadata = &ctx.metadata[work_item.video_index];

        let needs_configure = last_video_index != Some(work_item.video_index);
        let needs_reset = needs_configure || work_item.item_id != last_next_item_id;
        for evaluator in evaluators.iter_mut() {
            if needs_configure {
                evaluator.configure(metadata)?;
            }
            if needs_reset {
                evaluator.reset();
            }
        }
        last_video_index = Some(work_item.video_index);
        last_next_item_id = work_item.next_item_id;

        let EvalEntry {
            work_item_index,
            columns: mut remaining,
            device: entry_device,
            video_decode_item,
            ..
        } = entry;

        let total_inputs = remaining.first().map(|c| c.len()).unwrap_or(0) as i64;
        anyhow::ensure!(
            remaining.iter().all(|c| c.len() == total_inputs as usize),
            "item {work_item_index}: input columns differ in length"
        );

        let mut item_columns: Vec<Vec<DeviceBuffer>> = vec![Vec::new(); group_columns.len()];
        let mut item_device = Device::CPU;

        // Rows produced so far within this item; includes forwarded warmup
        // rows, which is what the trim arithmetic below counts against.
        let mut current_input = 0i64;
        let mut consumed = 0i64;
        while consumed < total_inputs {
            let batch = ctx.work_item_size.min(total_inputs - consumed) as usize;
            let mut batch_columns: BatchColumns = remaining
                .iter_mut()
                .map(|col| col.drain(..batch).collect())
                .collect();
            let mut batch_size = batch;
            let mut device = entry_device;

            for (e, evaluator) in evaluators.iter_mut().enumerate() {
                let target = ctx.configs[e].device;
                if device != target {
                    batch_columns = migrate(batch_columns, target, &ctx.metrics);
                    device = target;
                }

                let outputs = evaluator.evaluate(&batch_columns)?;

                let want_columns = output_names[e].len();
                if outputs.len() != want_columns {
                    return Err(EngineError::ColumnCountMismatch {
                        evaluator: e,
                        got: outputs.len(),
                        want: want_columns,
                    }
                    .into());
                }
                // A decoder turns each encoded chunk into however many frames
                // it covers; the new cardinality binds the rest of the chain.
                if e == 0 && video_decode_item {
                    batch_size = outputs.first().map(|c| c.len()).unwrap_or(0);
                }
                for (c, column) in outputs.iter().enumerate() {
                    if column.len() != batch_size {
                        return Err(EngineError::ContractViolation {
                            evaluator: e,
                            column: output_names[e][c].clone(),
                            got: column.len(),
                            want: batch_size,
                        }
                        .into());
                    }
                }

                // Inputs are consumed here; outputs live on the evaluator's
                // device per its capabilities.
                drop(batch_columns);
                batch_columns = outputs;
                device = target;
            }

            let warmup_rows = if ctx.last_group && needs_reset {
                let total_warmup = ctx.warmup_count.min(work_item.rows_from_start);
                (batch_size as i64).min((total_warmup - current_input).max(0)) as usize
            } else {
                0
            };
            if warmup_rows > 0 {
                for column in batch_columns.iter_mut() {
                    column.drain(..warmup_rows);
                }
                ctx.metrics
                    .warmup_rows_trimmed
                    .inc_by(warmup_rows as u64);
            }

            if ctx.last_group && !device.is_cpu() {
                batch_columns = migrate(batch_columns, Device::CPU, &ctx.metrics);
                device = Device::CPU;
            }

            for (c, column) in batch_columns.into_iter().enumerate() {
                item_columns[c].extend(column);
            }
            item_device = device;
            current_input += batch_size as i64;
            consumed += batch as i64;
        }

        ctx.metrics.eval_task.record(work_start.elapsed());
        ctx.metrics.items_evaluated.inc();
        tracing::debug!(
            rank = ctx.rank,
            pu = ctx.pu,
            group = ctx.group_index,
            item = work_item_index,
            "evaluate: finished item"
        );

        ctx.output.push(EvalEntry {
            work_item_index,
            column_names: group_columns.clone(),
            columns: item_columns,
            device: item_device,
            video_decode_item: false,
        });
    }

    tracing::debug!(
        rank = ctx.rank,
        pu = ctx.pu,
        group = ctx.group_index,
        "evaluate: worker finished"
    );
    Ok(())
}

fn migrate(columns: BatchColumns, target: Device, metrics: &EngineMetrics) -> BatchColumns {
    columns
        .into_iter()
        .map(|column| {
            column
                .into_iter()
                .map(|buffer| {
                    metrics.device_migrations.inc();
                    buffer.copy_to(target)
                })
                .collect()
        })
        .collect()
}
