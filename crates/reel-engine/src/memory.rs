use reel_core::types::Device;

/// An owned, device-tagged byte buffer.
///
/// Ownership transfers along the pipeline: whichever stage holds the buffer
/// frees it by dropping it, and `copy_to` is the single crossing point
/// between devices (new allocation on the target, source consumed). The
/// backing store is host memory in this build; a CUDA-backed pool would
/// interpose at this type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceBuffer {
    data: Vec<u8>,
    device: Device,
}

impl DeviceBuffer {
    pub fn from_vec(device: Device, data: Vec<u8>) -> Self {
        Self { data, device }
    }

    /// Zero-filled allocation on `device`.
    pub fn alloc(device: Device, len: usize) -> Self {
        Self {
            data: vec![0u8; len],
            device,
        }
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    /// Moves the contents to `target`: allocates there, copies, and consumes
    /// the source. A no-op when the buffer already lives on `target`.
    pub fn copy_to(self, target: Device) -> Self {
        if self.device == target {
            return self;
        }
        Self {
            data: self.data,
            device: target,
        }
    }
}
