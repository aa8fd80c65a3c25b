/// Descriptor layout, pools and per-frame sets of a renderer.
///
/// The layout is one storage-buffer binding per descriptor-visible buffer
/// (handle order), followed by a single combined-image-sampler array holding
/// every image (handle order). One set exists per frame in flight.

use std::sync::Arc;
use crate::device::{
    DescriptorAllocation, DescriptorBindingDesc, DescriptorLayout, DescriptorLayoutDesc, DescriptorPool,
    DescriptorPoolDesc, DescriptorResource, DescriptorSet, DescriptorType, DescriptorWrite, GraphicsDevice,
};
use crate::error::{Error, Result};
use crate::renderer::resource_store::{descriptor_buffer_count, descriptor_visible, ResourceStore};
use crate::renderer::{GpuObject, RenderState};
use crate::resource::{ResourceHandle, ResourceType};
use crate::{engine_debug, engine_error, engine_warn};

/// Pools tried before an allocation failure is fatal
pub(crate) const MAX_POOL_ATTEMPTS: usize = 8;

pub(crate) struct DescriptorManager {
    layout: Arc<dyn DescriptorLayout>,
    /// Kept alive for as long as their sets
    pools: Vec<Box<dyn DescriptorPool>>,
    sets: Vec<Arc<dyn DescriptorSet>>,
}

impl DescriptorManager {
    /// Layout for `resources` (in handle order)
    pub fn deduce_layout(resources: &[ResourceType], state: &RenderState) -> DescriptorLayoutDesc {
        let buffer_count = descriptor_buffer_count(resources, state);
        let image_count = resources.iter().filter(|t| **t == ResourceType::Image).count() as u32;

        let mut bindings: Vec<DescriptorBindingDesc> = (0..buffer_count)
            .map(|binding| DescriptorBindingDesc {
                binding,
                descriptor_type: DescriptorType::StorageBuffer,
                count: 1,
            })
            .collect();
        if image_count > 0 {
            bindings.push(DescriptorBindingDesc {
                binding: buffer_count,
                descriptor_type: DescriptorType::CombinedImageSampler,
                count: image_count,
            });
        }
        DescriptorLayoutDesc { bindings }
    }

    /// Create the layout and allocate `frames_in_flight` sets, fully written
    pub fn new(
        device: &dyn GraphicsDevice,
        store: &ResourceStore,
        state: &RenderState,
        frames_in_flight: usize,
    ) -> Result<Self> {
        let desc = Self::deduce_layout(&store.resource_types(), state);
        let layout = device.create_descriptor_layout(&desc)?;
        let mut manager = Self { layout, pools: Vec::new(), sets: Vec::new() };
        if !desc.is_empty() {
            manager.allocate(device, frames_in_flight as u32)?;
            manager.sync(device, store, state, true)?;
        }
        Ok(manager)
    }

    pub fn layout(&self) -> &Arc<dyn DescriptorLayout> {
        &self.layout
    }

    /// No bindings: nothing allocated and nothing to bind
    pub fn is_empty(&self) -> bool {
        self.layout.desc().is_empty()
    }

    pub fn sets(&self) -> &[Arc<dyn DescriptorSet>] {
        &self.sets
    }

    pub fn set(&self, frame: usize) -> Option<&Arc<dyn DescriptorSet>> {
        self.sets.get(frame)
    }

    fn pool_desc(&self, count: u32, scale: u32) -> DescriptorPoolDesc {
        let desc = self.layout.desc();
        DescriptorPoolDesc {
            max_sets: count * scale,
            storage_buffers: desc.descriptor_count(DescriptorType::StorageBuffer) * count * scale,
            combined_image_samplers: desc.descriptor_count(DescriptorType::CombinedImageSampler) * count * scale,
        }
    }

    /// Allocate `count` sets, opening larger pools while the current one is
    /// exhausted or fragmented
    pub fn allocate(&mut self, device: &dyn GraphicsDevice, count: u32) -> Result<()> {
        let mut scale = 1;
        for attempt in 0..MAX_POOL_ATTEMPTS {
            if attempt > 0 || self.pools.is_empty() {
                let pool_desc = self.pool_desc(count, scale);
                self.pools.push(device.create_descriptor_pool(&pool_desc)?);
            }
            let Some(pool) = self.pools.last_mut() else {
                return Err(Error::OutOfMemory);
            };
            match pool.allocate(&self.layout, count)? {
                DescriptorAllocation::Allocated(sets) => {
                    engine_debug!(
                        "topaz::DescriptorManager",
                        "Allocated {} descriptor sets from pool {}",
                        sets.len(), self.pools.len()
                    );
                    self.sets = sets;
                    return Ok(());
                }
                DescriptorAllocation::PoolExhausted | DescriptorAllocation::Fragmented => {
                    engine_warn!(
                        "topaz::DescriptorManager",
                        "Descriptor pool {} cannot hold {} sets, opening a new pool (attempt {}/{})",
                        self.pools.len(), count, attempt + 1, MAX_POOL_ATTEMPTS
                    );
                    scale *= 2;
                }
            }
        }
        engine_error!(
            "topaz::DescriptorManager",
            "Descriptor set allocation failed after {} pools",
            MAX_POOL_ATTEMPTS
        );
        Err(Error::OutOfMemory)
    }

    /// Point every set at the store's current device objects
    ///
    /// `write_everything` rewrites the image array as well; otherwise only
    /// buffer bindings are written.
    pub fn sync(
        &self,
        device: &dyn GraphicsDevice,
        store: &ResourceStore,
        state: &RenderState,
        write_everything: bool,
    ) -> Result<()> {
        if self.sets.is_empty() {
            return Ok(());
        }
        // Snapshot first so no component lock is held across the device call
        let objects: Vec<(ResourceHandle, GpuObject)> = store
            .components()
            .map(|(handle, component)| Ok((handle, component.read()?.gpu().clone())))
            .collect::<Result<_>>()?;
        let layout = self.layout.desc();
        let image_binding = descriptor_buffer_count(&store.resource_types(), state);

        let mut writes = Vec::with_capacity(objects.len() * self.sets.len());
        for set in &self.sets {
            let mut buffer_binding = 0;
            let mut image_element = 0;
            for (handle, object) in &objects {
                match object {
                    GpuObject::Buffer(buffer) => {
                        if !descriptor_visible(*handle, state) {
                            continue;
                        }
                        writes.push(DescriptorWrite {
                            set,
                            binding: buffer_binding,
                            array_element: 0,
                            resource: DescriptorResource::StorageBuffer(buffer),
                        });
                        buffer_binding += 1;
                    }
                    GpuObject::Image { image, sampler } => {
                        if write_everything {
                            writes.push(DescriptorWrite {
                                set,
                                binding: image_binding,
                                array_element: image_element,
                                resource: DescriptorResource::CombinedImageSampler(image, sampler),
                            });
                        }
                        image_element += 1;
                    }
                }
            }
        }

        for write in &writes {
            let expected = layout.binding(write.binding).map(|b| b.descriptor_type);
            if expected != Some(write.resource.descriptor_type()) {
                engine_error!(
                    "topaz::DescriptorManager",
                    "Binding {} is {:?} in the layout, but a {:?} was written",
                    write.binding, expected, write.resource.descriptor_type()
                );
                return Err(Error::InvalidConfiguration(format!(
                    "descriptor type mismatch at binding {}",
                    write.binding
                )));
            }
        }

        device.update_descriptor_sets(&writes)?;
        engine_debug!(
            "topaz::DescriptorManager",
            "Synced {} descriptor writes across {} sets (images: {})",
            writes.len(), self.sets.len(), write_everything
        );
        Ok(())
    }
}

#[cfg(test)]
#[path = "descriptor_manager_tests.rs"]
mod tests;
