#![allow(dead_code)] // each test binary uses its own subset of these helpers

//! Synthetic videos and stub evaluators shared by the end-to-end tests.
//!
//! The encoded stream format is trivial: frame `f` occupies eight bytes
//! holding `f` as a little-endian u64, and keyframe byte offsets are frame
//! positions times eight. A stub decoder reconstructs frames from the
//! keyframe-aligned chunks the load stage reads.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;

use reel_core::types::{
    DecodeArgs, Device, DeviceType, EvaluatorCapabilities, SampledRange, VideoMetadata,
};
use reel_engine::evaluator::{BatchColumns, Evaluator, EvaluatorConfig, EvaluatorFactory};
use reel_engine::memory::DeviceBuffer;
use reel_store::fs::FsStorage;
use reel_store::StorageBackend;

pub const FRAME_BYTES: usize = 8;

pub fn temp_root(test_name: &str) -> Result<PathBuf> {
    let mut root = std::env::temp_dir();
    root.push(format!(
        "reel-engine-{}-{}-{}",
        test_name,
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos()
    ));
    std::fs::create_dir_all(&root)?;
    Ok(root)
}

pub fn frame_payload(frame: i64) -> [u8; FRAME_BYTES] {
    (frame as u64).to_le_bytes()
}

/// Writes a synthetic encoded stream and returns its ingest metadata
/// (without trailing sentinels, the way the ingest path hands it over).
pub fn write_video(
    storage: &FsStorage,
    path: &str,
    frames: i64,
    keyframes: &[i64],
) -> Result<VideoMetadata> {
    let mut writer = storage.write(path)?;
    for f in 0..frames {
        writer.write_all(&frame_payload(f))?;
    }
    writer.save()?;
    Ok(VideoMetadata {
        frames,
        width: 64,
        height: 48,
        file_size: (frames as u64) * FRAME_BYTES as u64,
        keyframe_positions: keyframes.to_vec(),
        keyframe_byte_offsets: keyframes.iter().map(|k| k * FRAME_BYTES as i64).collect(),
    })
}

/// Parses a size-prefixed column blob into its per-row payloads.
pub fn read_blob(storage: &FsStorage, path: &str, rows: usize) -> Result<Vec<Vec<u8>>> {
    let mut file = storage.random_read(path)?;
    let size = file.size()? as usize;
    let mut bytes = vec![0u8; size];
    file.read_exact_at(0, &mut bytes)?;

    let mut sizes = Vec::with_capacity(rows);
    for i in 0..rows {
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&bytes[i * 8..i * 8 + 8]);
        sizes.push(u64::from_le_bytes(prefix) as usize);
    }
    let mut offset = rows * 8;
    let mut payloads = Vec::with_capacity(rows);
    for len in sizes {
        payloads.push(bytes[offset..offset + len].to_vec());
        offset += len;
    }
    anyhow::ensure!(offset == size, "blob {path} has trailing bytes");
    Ok(payloads)
}

/// Reads a frame-column blob back as frame values.
pub fn blob_frames(storage: &FsStorage, path: &str, rows: usize) -> Result<Vec<u64>> {
    read_blob(storage, path, rows)?
        .into_iter()
        .map(|payload| {
            anyhow::ensure!(payload.len() == FRAME_BYTES, "unexpected payload length");
            let mut raw = [0u8; FRAME_BYTES];
            raw.copy_from_slice(&payload);
            Ok(u64::from_le_bytes(raw))
        })
        .collect()
}

/// Stub decoder: reconstructs frames from the synthetic chunk format. Keeps a
/// `primed` flag per stream; after a reset it prepends the warmup rows the
/// decode args ask for, bounded by what the chunk holds before the range.
pub struct StubDecoder {
    device: Device,
    primed: bool,
}

impl StubDecoder {
    fn frame(&self, chunk: &DeviceBuffer, chunk_base: i64, frame: i64) -> DeviceBuffer {
        let offset = ((frame - chunk_base) as usize) * FRAME_BYTES;
        DeviceBuffer::from_vec(
            self.device,
            chunk.as_slice()[offset..offset + FRAME_BYTES].to_vec(),
        )
    }
}

impl Evaluator for StubDecoder {
    fn configure(&mut self, _metadata: &VideoMetadata) -> Result<()> {
        Ok(())
    }

    fn reset(&mut self) {
        self.primed = false;
    }

    fn evaluate(&mut self, inputs: &BatchColumns) -> Result<BatchColumns> {
        anyhow::ensure!(inputs.len() == 2, "decoder expects chunk and args columns");
        let mut frames = Vec::new();
        for (chunk, args_buffer) in inputs[0].iter().zip(inputs[1].iter()) {
            let args: DecodeArgs = bincode::deserialize(args_buffer.as_slice())?;
            match args.range {
                SampledRange::All { interval } | SampledRange::SequenceGather { interval } => {
                    let mut start = interval.start;
                    if !self.primed {
                        let available = interval.start - args.start_keyframe;
                        start -= args.warmup_count.min(available);
                    }
                    for f in start..interval.end {
                        frames.push(self.frame(chunk, args.start_keyframe, f));
                    }
                }
                SampledRange::Strided { interval, stride } => {
                    let mut f = interval.start;
                    while f < interval.end {
                        frames.push(self.frame(chunk, args.start_keyframe, f));
                        f += stride;
                    }
                }
                SampledRange::Gather { frame } => {
                    frames.push(self.frame(chunk, args.start_keyframe, frame));
                }
            }
            self.primed = true;
        }
        Ok(vec![frames])
    }
}

pub struct StubDecoderFactory {
    pub device_type: DeviceType,
}

impl EvaluatorFactory for StubDecoderFactory {
    fn capabilities(&self) -> EvaluatorCapabilities {
        EvaluatorCapabilities {
            device_type: self.device_type,
            warmup_size: 0,
            can_overlap: true,
        }
    }

    fn output_names(&self) -> Vec<String> {
        vec!["frame".to_string()]
    }

    fn new_evaluator(&self, config: EvaluatorConfig) -> Result<Box<dyn Evaluator>> {
        Ok(Box::new(StubDecoder {
            device: config.device,
            primed: false,
        }))
    }
}

/// Adds a constant to every frame value on its own device.
pub struct AddConstant {
    device: Device,
    delta: u64,
}

impl Evaluator for AddConstant {
    fn configure(&mut self, _metadata: &VideoMetadata) -> Result<()> {
        Ok(())
    }

    fn reset(&mut self) {}

    fn evaluate(&mut self, inputs: &BatchColumns) -> Result<BatchColumns> {
        let column = inputs[0]
            .iter()
            .map(|buffer| {
                anyhow::ensure!(
                    buffer.device() == self.device,
                    "input on {:?}, evaluator on {:?}",
                    buffer.device(),
                    self.device
                );
                let mut raw = [0u8; FRAME_BYTES];
                raw.copy_from_slice(buffer.as_slice());
                let value = u64::from_le_bytes(raw) + self.delta;
                Ok(DeviceBuffer::from_vec(
                    self.device,
                    value.to_le_bytes().to_vec(),
                ))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(vec![column])
    }
}

pub struct AddConstantFactory {
    pub device_type: DeviceType,
    pub delta: u64,
    pub can_overlap: bool,
}

impl EvaluatorFactory for AddConstantFactory {
    fn capabilities(&self) -> EvaluatorCapabilities {
        EvaluatorCapabilities {
            device_type: self.device_type,
            warmup_size: 0,
            can_overlap: self.can_overlap,
        }
    }

    fn output_names(&self) -> Vec<String> {
        vec!["frame".to_string()]
    }

    fn new_evaluator(&self, config: EvaluatorConfig) -> Result<Box<dyn Evaluator>> {
        Ok(Box::new(AddConstant {
            device: config.device,
            delta: self.delta,
        }))
    }
}

/// Passthrough that only contributes a warmup requirement to the chain.
pub struct WarmupGateFactory {
    pub warmup_size: i64,
}

struct WarmupGate {
    device: Device,
}

impl Evaluator for WarmupGate {
    fn configure(&mut self, _metadata: &VideoMetadata) -> Result<()> {
        Ok(())
    }

    fn reset(&mut self) {}

    fn evaluate(&mut self, inputs: &BatchColumns) -> Result<BatchColumns> {
        Ok(vec![inputs[0]
            .iter()
            .map(|b| DeviceBuffer::from_vec(self.device, b.as_slice().to_vec()))
            .collect()])
    }
}

impl EvaluatorFactory for WarmupGateFactory {
    fn capabilities(&self) -> EvaluatorCapabilities {
        EvaluatorCapabilities {
            device_type: DeviceType::Cpu,
            warmup_size: self.warmup_size,
            can_overlap: false,
        }
    }

    fn output_names(&self) -> Vec<String> {
        vec!["frame".to_string()]
    }

    fn new_evaluator(&self, config: EvaluatorConfig) -> Result<Box<dyn Evaluator>> {
        Ok(Box::new(WarmupGate {
            device: config.device,
        }))
    }
}

/// Terminal stage with two output columns: the frame value itself and a
/// one-byte parity tag.
pub struct ParityTagFactory {
    pub can_overlap: bool,
}

struct ParityTag {
    device: Device,
}

impl Evaluator for ParityTag {
    fn configure(&mut self, _metadata: &VideoMetadata) -> Result<()> {
        Ok(())
    }

    fn reset(&mut self) {}

    fn evaluate(&mut self, inputs: &BatchColumns) -> Result<BatchColumns> {
        let mut values = Vec::with_capacity(inputs[0].len());
        let mut tags = Vec::with_capacity(inputs[0].len());
        for buffer in &inputs[0] {
            let mut raw = [0u8; FRAME_BYTES];
            raw.copy_from_slice(buffer.as_slice());
            let value = u64::from_le_bytes(raw);
            values.push(DeviceBuffer::from_vec(
                self.device,
                value.to_le_bytes().to_vec(),
            ));
            tags.push(DeviceBuffer::from_vec(
                self.device,
                vec![(value % 2) as u8],
            ));
        }
        Ok(vec![values, tags])
    }
}

impl EvaluatorFactory for ParityTagFactory {
    fn capabilities(&self) -> EvaluatorCapabilities {
        EvaluatorCapabilities {
            device_type: DeviceType::Cpu,
            warmup_size: 0,
            can_overlap: self.can_overlap,
        }
    }

    fn output_names(&self) -> Vec<String> {
        vec!["frame".to_string(), "parity".to_string()]
    }

    fn new_evaluator(&self, config: EvaluatorConfig) -> Result<Box<dyn Evaluator>> {
        Ok(Box::new(ParityTag {
            device: config.device,
        }))
    }
}

pub fn decoder_chain(device_type: DeviceType) -> Vec<Arc<dyn EvaluatorFactory>> {
    vec![Arc::new(StubDecoderFactory { device_type })]
}
