use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Work-item index carried by queue entries; `-1` tells a consumer to exit.
pub const SENTINEL_WORK_ITEM: i64 = -1;

/// Half-open `[start, end)` range of frame indices within one video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    pub start: i64,
    pub end: i64, // half-open [start, end)
}

impl Interval {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> i64 {
        (self.end - self.start).max(0)
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn contains(&self, frame: i64) -> bool {
        self.start <= frame && frame < self.end
    }
}

/// One unit of pipelined work: a contiguous output span for one video.
///
/// `item_id` / `next_item_id` are opaque stream markers. An item whose
/// `item_id` equals the previous item's `next_item_id` continues the same
/// decode stream and stateful evaluators carry over; any mismatch forces a
/// reset. `next_item_id == -1` forces a reset unconditionally (used at
/// sequence-gather boundaries).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoWorkItem {
    pub video_index: usize,
    pub item_id: i64,
    pub next_item_id: i64,
    /// Output rows that precede this item within its video; bounds how many
    /// warmup rows can exist ahead of the item.
    pub rows_from_start: i64,
}

/// Sampling-specific recipe for one work item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadEntry {
    All { interval: Interval },
    Strided { interval: Interval, stride: i64 },
    Gather { points: Vec<i64> },
    SequenceGather { intervals: Vec<Interval> },
}

/// Queue entry for the load stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadItem {
    pub work_item_index: i64,
    pub entry: LoadEntry,
}

impl LoadItem {
    pub fn new(work_item_index: i64, entry: LoadEntry) -> Self {
        Self {
            work_item_index,
            entry,
        }
    }

    pub fn sentinel() -> Self {
        Self {
            work_item_index: SENTINEL_WORK_ITEM,
            entry: LoadEntry::All {
                interval: Interval::new(0, 0),
            },
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.work_item_index == SENTINEL_WORK_ITEM
    }
}

/// Gather points for one video, in frame order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointSamples {
    pub video_index: usize,
    pub frames: Vec<i64>,
}

/// Gather intervals for one video, in frame order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceSamples {
    pub video_index: usize,
    pub intervals: Vec<Interval>,
}

/// Job-level frame selection over the dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sampling {
    /// Every frame of every video.
    All,
    /// Every `stride`-th frame of every video.
    Strided { stride: i64 },
    /// An explicit set of frames per video.
    Gather { points: Vec<PointSamples> },
    /// An explicit set of frame intervals per video.
    SequenceGather { sequences: Vec<SequenceSamples> },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SamplingError {
    #[error("stride must be >= 1 (got {0})")]
    InvalidStride(i64),
    #[error("gather points for video {video_index} must be non-empty and strictly increasing")]
    InvalidGatherPoints { video_index: usize },
    #[error("gather sequences for video {video_index} must be non-empty, each interval non-empty")]
    InvalidGatherSequences { video_index: usize },
}

impl Sampling {
    pub fn validate(&self) -> Result<(), SamplingError> {
        match self {
            Sampling::All => Ok(()),
            Sampling::Strided { stride } => {
                if *stride < 1 {
                    return Err(SamplingError::InvalidStride(*stride));
                }
                Ok(())
            }
            Sampling::Gather { points } => {
                for samples in points {
                    let frames = &samples.frames;
                    let increasing = frames.windows(2).all(|w| w[0] < w[1]);
                    if frames.is_empty() || !increasing || frames[0] < 0 {
                        return Err(SamplingError::InvalidGatherPoints {
                            video_index: samples.video_index,
                        });
                    }
                }
                Ok(())
            }
            Sampling::SequenceGather { sequences } => {
                for samples in sequences {
                    let ok = !samples.intervals.is_empty()
                        && samples
                            .intervals
                            .iter()
                            .all(|iv| iv.start >= 0 && !iv.is_empty());
                    if !ok {
                        return Err(SamplingError::InvalidGatherSequences {
                            video_index: samples.video_index,
                        });
                    }
                }
                Ok(())
            }
        }
    }
}

/// Compute device class an evaluator runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceType {
    Cpu,
    Gpu,
}

/// A concrete device slot: class plus ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Device {
    pub kind: DeviceType,
    pub id: u32,
}

impl Device {
    pub const CPU: Device = Device {
        kind: DeviceType::Cpu,
        id: 0,
    };

    pub fn gpu(id: u32) -> Self {
        Device {
            kind: DeviceType::Gpu,
            id,
        }
    }

    pub fn is_cpu(&self) -> bool {
        self.kind == DeviceType::Cpu
    }
}

/// Static properties an evaluator advertises to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvaluatorCapabilities {
    pub device_type: DeviceType,
    /// Leading rows a fresh stream needs before outputs are trustworthy.
    pub warmup_size: i64,
    /// Whether this evaluator should run in its own thread group so it can
    /// pipeline with the rest of the chain on a different device.
    pub can_overlap: bool,
}

/// Per-video ingest metadata consumed by the planner and load stage.
///
/// `keyframe_positions` is expected to end with a synthetic sentinel equal to
/// `frames` and `keyframe_byte_offsets` with one equal to `file_size`;
/// `ensure_sentinels` appends them when the ingest path left them off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub frames: i64,
    pub width: u32,
    pub height: u32,
    pub file_size: u64,
    pub keyframe_positions: Vec<i64>,
    pub keyframe_byte_offsets: Vec<i64>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MetadataError {
    #[error("frames must be > 0 (got {0})")]
    NoFrames(i64),
    #[error("keyframe position and byte-offset arrays differ in length ({positions} vs {offsets})")]
    MismatchedKeyframeArrays { positions: usize, offsets: usize },
    #[error("keyframe arrays must be non-empty")]
    EmptyKeyframes,
    #[error("keyframe positions must start at 0 and be strictly increasing")]
    NonMonotonicKeyframes,
    #[error("keyframe byte offsets must be non-decreasing")]
    NonMonotonicByteOffsets,
    #[error("last keyframe position {position} does not match frame count {frames}")]
    MissingFrameSentinel { position: i64, frames: i64 },
}

impl VideoMetadata {
    /// Appends the trailing frame-count / file-size sentinels if absent.
    pub fn ensure_sentinels(&mut self) {
        if self.keyframe_positions.last() != Some(&self.frames) {
            self.keyframe_positions.push(self.frames);
            self.keyframe_byte_offsets.push(self.file_size as i64);
        }
    }

    pub fn validate(&self) -> Result<(), MetadataError> {
        if self.frames <= 0 {
            return Err(MetadataError::NoFrames(self.frames));
        }
        if self.keyframe_positions.len() != self.keyframe_byte_offsets.len() {
            return Err(MetadataError::MismatchedKeyframeArrays {
                positions: self.keyframe_positions.len(),
                offsets: self.keyframe_byte_offsets.len(),
            });
        }
        if self.keyframe_positions.is_empty() {
            return Err(MetadataError::EmptyKeyframes);
        }
        let positions_ok = self.keyframe_positions[0] == 0
            && self.keyframe_positions.windows(2).all(|w| w[0] < w[1]);
        if !positions_ok {
            return Err(MetadataError::NonMonotonicKeyframes);
        }
        if !self.keyframe_byte_offsets.windows(2).all(|w| w[0] <= w[1]) {
            return Err(MetadataError::NonMonotonicByteOffsets);
        }
        let last = *self.keyframe_positions.last().unwrap_or(&0);
        if last != self.frames {
            return Err(MetadataError::MissingFrameSentinel {
                position: last,
                frames: self.frames,
            });
        }
        Ok(())
    }
}

/// The sampled range one decode invocation must materialize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampledRange {
    All { interval: Interval },
    Strided { interval: Interval, stride: i64 },
    Gather { frame: i64 },
    SequenceGather { interval: Interval },
}

/// Arguments attached to each encoded chunk handed to the decoder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodeArgs {
    /// Rows the decoder should emit ahead of the range after a reset, capped
    /// by what exists before the range in the stream.
    pub warmup_count: i64,
    /// Frame index of the keyframe the encoded chunk starts at.
    pub start_keyframe: i64,
    /// Frame index of the keyframe bounding the chunk from above.
    pub end_keyframe: i64,
    pub range: SampledRange,
}

/// Output column identity within a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub id: u32,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SamplingKind {
    All,
    Strided,
    Gather,
    SequenceGather,
}

/// Persisted per-job metadata describing how outputs were produced and
/// chunked, so readers can locate rows without re-running the planner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub id: i64,
    pub sampling: SamplingKind,
    pub work_item_size: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stride: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gather_points: Option<Vec<PointSamples>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gather_sequences: Option<Vec<SequenceSamples>>,
    pub columns: Vec<ColumnDescriptor>,
}

impl JobDescriptor {
    pub fn new(id: i64, sampling: &Sampling, work_item_size: i64, columns: &[String]) -> Self {
        let columns = columns
            .iter()
            .enumerate()
            .map(|(i, name)| ColumnDescriptor {
                id: i as u32,
                name: name.clone(),
            })
            .collect();
        let mut descriptor = Self {
            id,
            sampling: SamplingKind::All,
            work_item_size,
            stride: None,
            gather_points: None,
            gather_sequences: None,
            columns,
        };
        match sampling {
            Sampling::All => descriptor.sampling = SamplingKind::All,
            Sampling::Strided { stride } => {
                descriptor.sampling = SamplingKind::Strided;
                descriptor.stride = Some(*stride);
            }
            Sampling::Gather { points } => {
                descriptor.sampling = SamplingKind::Gather;
                descriptor.gather_points = Some(points.clone());
            }
            Sampling::SequenceGather { sequences } => {
                descriptor.sampling = SamplingKind::SequenceGather;
                descriptor.gather_sequences = Some(sequences.clone());
            }
        }
        descriptor
    }
}
