use reel_core::types::{Device, SENTINEL_WORK_ITEM};

use crate::memory::DeviceBuffer;

/// Payload flowing between pipeline stages: the per-item buffers for every
/// column, laid out `[column][batch]`.
///
/// `video_decode_item` is set only on the load → evaluate handoff and marks
/// that the first evaluator is a decoder, whose output count per chunk may
/// differ from its input count.
#[derive(Debug)]
pub struct EvalEntry {
    pub work_item_index: i64,
    pub column_names: Vec<String>,
    pub columns: Vec<Vec<DeviceBuffer>>,
    pub device: Device,
    pub video_decode_item: bool,
}

impl EvalEntry {
    pub fn sentinel() -> Self {
        Self {
            work_item_index: SENTINEL_WORK_ITEM,
            column_names: Vec::new(),
            columns: Vec::new(),
            device: Device::CPU,
            video_decode_item: false,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.work_item_index == SENTINEL_WORK_ITEM
    }

    /// Batch cardinality, taken from the first column.
    pub fn batch_len(&self) -> usize {
        self.columns.first().map(|c| c.len()).unwrap_or(0)
    }
}
