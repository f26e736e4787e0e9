use reel_core::types::{
    EvaluatorCapabilities, Interval, LoadEntry, LoadItem, Sampling, VideoMetadata, VideoWorkItem,
};

use crate::error::EngineError;

/// Ordered work items with their sampling-specific load recipes.
///
/// Planning is deterministic and replicated on every node, so a bare item
/// index received from the master identifies the work completely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkPlan {
    pub work_items: Vec<VideoWorkItem>,
    pub load_items: Vec<LoadItem>,
    /// Output rows the whole job will persist, summed over all videos.
    pub total_rows: i64,
}

/// The chain-wide warmup requirement: the largest warmup any evaluator needs.
pub fn max_warmup(capabilities: &[EvaluatorCapabilities]) -> i64 {
    capabilities
        .iter()
        .map(|caps| caps.warmup_size)
        .max()
        .unwrap_or(0)
}

/// Splits the sampled frames of every video into work items of at most
/// `work_item_size` output rows each.
pub fn plan_work(
    videos: &[VideoMetadata],
    sampling: &Sampling,
    work_item_size: i64,
) -> Result<WorkPlan, EngineError> {
    if work_item_size < 1 {
        return Err(EngineError::InvalidWorkItemSize(work_item_size));
    }
    sampling.validate()?;

    let mut plan = WorkPlan {
        work_items: Vec::new(),
        load_items: Vec::new(),
        total_rows: 0,
    };

    match sampling {
        Sampling::All => {
            for (video_index, meta) in videos.iter().enumerate() {
                let mut allocated = 0i64;
                while allocated < meta.frames {
                    let take = work_item_size.min(meta.frames - allocated);
                    push_item(
                        &mut plan,
                        VideoWorkItem {
                            video_index,
                            item_id: allocated,
                            next_item_id: allocated + take,
                            rows_from_start: allocated,
                        },
                        LoadEntry::All {
                            interval: Interval::new(allocated, allocated + take),
                        },
                    );
                    allocated += take;
                }
                plan.total_rows += meta.frames;
            }
        }
        Sampling::Strided { stride } => {
            for (video_index, meta) in videos.iter().enumerate() {
                let mut allocated = 0i64;
                while allocated < meta.frames {
                    let take = (work_item_size * stride).min(meta.frames - allocated);
                    push_item(
                        &mut plan,
                        VideoWorkItem {
                            video_index,
                            item_id: allocated,
                            next_item_id: allocated + take,
                            rows_from_start: allocated / stride,
                        },
                        LoadEntry::Strided {
                            interval: Interval::new(allocated, allocated + take),
                            stride: *stride,
                        },
                    );
                    allocated += take;
                    plan.total_rows += take / stride;
                }
            }
        }
        Sampling::Gather { points } => {
            for samples in points {
                check_video_index(samples.video_index, videos)?;
                let frames_in_sample = samples.frames.len() as i64;
                let mut allocated = 0i64;
                while allocated < frames_in_sample {
                    let take = work_item_size.min(frames_in_sample - allocated);
                    push_item(
                        &mut plan,
                        VideoWorkItem {
                            video_index: samples.video_index,
                            item_id: allocated,
                            next_item_id: allocated + take,
                            rows_from_start: allocated,
                        },
                        LoadEntry::Gather {
                            points: samples.frames
                                [allocated as usize..(allocated + take) as usize]
                                .to_vec(),
                        },
                    );
                    allocated += take;
                }
                plan.total_rows += frames_in_sample;
            }
        }
        Sampling::SequenceGather { sequences } => {
            for samples in sequences {
                check_video_index(samples.video_index, videos)?;
                // Stream ids run across the whole sample so consecutive
                // chunks of one interval share a stream, while each interval
                // boundary forces a reset via the -1 marker below.
                let mut frames_in_sequences = 0i64;
                for interval in &samples.intervals {
                    let frames_in_sample = interval.len();
                    let mut allocated = 0i64;
                    while allocated < frames_in_sample {
                        let take = work_item_size.min(frames_in_sample - allocated);
                        push_item(
                            &mut plan,
                            VideoWorkItem {
                                video_index: samples.video_index,
                                item_id: frames_in_sequences,
                                next_item_id: frames_in_sequences + take,
                                rows_from_start: allocated,
                            },
                            LoadEntry::SequenceGather {
                                intervals: vec![Interval::new(
                                    interval.start + allocated,
                                    interval.start + allocated + take,
                                )],
                            },
                        );
                        allocated += take;
                        frames_in_sequences += take;
                    }
                    if let Some(last) = plan.work_items.last_mut() {
                        last.next_item_id = -1;
                    }
                    plan.total_rows += frames_in_sample;
                }
            }
        }
    }

    Ok(plan)
}

fn push_item(plan: &mut WorkPlan, item: VideoWorkItem, entry: LoadEntry) {
    plan.work_items.push(item);
    plan.load_items
        .push(LoadItem::new(plan.work_items.len() as i64 - 1, entry));
}

fn check_video_index(video_index: usize, videos: &[VideoMetadata]) -> Result<(), EngineError> {
    if video_index >= videos.len() {
        return Err(EngineError::UnknownVideo(video_index));
    }
    Ok(())
}
