use anyhow::Result;

use reel_core::types::{Device, EvaluatorCapabilities, VideoMetadata};

use crate::memory::DeviceBuffer;

/// Buffer layout exchanged with evaluators: `[column][batch]`.
pub type BatchColumns = Vec<Vec<DeviceBuffer>>;

/// Construction-time limits handed to every evaluator instance.
#[derive(Debug, Clone, Copy)]
pub struct EvaluatorConfig {
    /// Largest batch the evaluator must accept, the work-item size or the
    /// chain warmup, whichever is larger.
    pub max_input_count: i64,
    pub max_frame_width: u32,
    pub max_frame_height: u32,
    pub device: Device,
}

/// A stateful per-batch operator in the evaluation chain.
///
/// Contract: `evaluate` returns one vector per advertised output column, each
/// with exactly one buffer per input row, resident on the device the factory
/// advertises. The one exception is a decoder consuming encoded chunks, which
/// may expand a single chunk into many frames.
pub trait Evaluator: Send {
    /// Called before the first item of a new video.
    fn configure(&mut self, metadata: &VideoMetadata) -> Result<()>;

    /// Called when the next item does not continue the current stream.
    fn reset(&mut self);

    fn evaluate(&mut self, inputs: &BatchColumns) -> Result<BatchColumns>;
}

/// Constructs evaluator instances and advertises their static properties.
///
/// One instance is built per evaluate thread; instances are never shared.
pub trait EvaluatorFactory: Send + Sync {
    fn capabilities(&self) -> EvaluatorCapabilities;
    fn output_names(&self) -> Vec<String>;
    fn new_evaluator(&self, config: EvaluatorConfig) -> Result<Box<dyn Evaluator>>;
}
