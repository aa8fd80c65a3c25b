/// Staged uploads of static component data.
///
/// Static components live in device-local memory, so their bytes reach the
/// GPU through a transient host-visible buffer and a copy recorded on the
/// scratch command buffer. A batch collects components touched by one
/// `edit()` (or by construction) and uploads each of them once.

use std::sync::Arc;
use crate::device::{Buffer, BufferDesc, BufferUsage, CommandBuffer, GraphicsDevice, ImageLayout, MemoryResidency};
use crate::error::Result;
use crate::renderer::{ComponentRef, GpuObject};
use crate::engine_trace;

#[derive(Default)]
pub(crate) struct StagingBatch {
    components: Vec<ComponentRef>,
}

impl StagingBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a full upload of `component`
    ///
    /// Dynamic components are ignored (their data already lives in mapped
    /// memory) and a component is queued at most once.
    pub fn push(&mut self, component: &ComponentRef) {
        if !component.needs_upload() {
            return;
        }
        if self.components.iter().any(|queued| queued.ptr_eq(component)) {
            return;
        }
        self.components.push(component.clone());
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// Record one copy per queued component into `command_buffer`
    ///
    /// Returns the staging buffers, which must outlive the submission.
    pub fn record(
        &self,
        device: &dyn GraphicsDevice,
        command_buffer: &mut dyn CommandBuffer,
    ) -> Result<Vec<Arc<dyn Buffer>>> {
        let mut staging_buffers = Vec::with_capacity(self.components.len());
        for component in &self.components {
            let component = component.read()?;
            let bytes = component.resource().data().as_bytes();
            let staging = device.create_buffer(&BufferDesc {
                size: bytes.len() as u64,
                usage: BufferUsage::TRANSFER_SRC,
                residency: MemoryResidency::Host,
                debug_name: format!("{}_staging", component.name()),
            })?;
            staging.update(0, bytes)?;

            match component.gpu() {
                GpuObject::Buffer(buffer) => {
                    command_buffer.copy_buffer(&staging, buffer, bytes.len() as u64)?;
                }
                GpuObject::Image { image, .. } => {
                    command_buffer.copy_buffer_to_image(&staging, image, ImageLayout::ShaderReadOnly)?;
                }
            }
            engine_trace!("topaz::Staging", "Staged {} bytes for '{}'", bytes.len(), component.name());
            staging_buffers.push(staging);
        }
        Ok(staging_buffers)
    }
}

#[cfg(test)]
#[path = "staging_tests.rs"]
mod tests;
