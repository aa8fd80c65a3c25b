/// Descriptor set layouts, pools, sets and descriptor writes

use ash::vk;
use std::any::Any;
use std::sync::Arc;
use topaz_gl::device::{
    DescriptorAllocation, DescriptorLayout as DeviceDescriptorLayout, DescriptorLayoutDesc,
    DescriptorPool as DevicePool, DescriptorPoolDesc, DescriptorResource, DescriptorSet as DeviceDescriptorSet,
    DescriptorType, DescriptorWrite,
};
use topaz_gl::topaz::Result;
use topaz_gl::{engine_debug, engine_err, engine_trace};

use crate::vulkan_buffer::vk_buffer;
use crate::vulkan_context::GpuContext;
use crate::vulkan_format::descriptor_type_to_vk;
use crate::vulkan_image::vk_image;
use crate::vulkan_sampler::vk_sampler;

// ============================================================================
// Layout
// ============================================================================

pub struct DescriptorLayout {
    ctx: Arc<GpuContext>,
    pub(crate) layout: vk::DescriptorSetLayout,
    desc: DescriptorLayoutDesc,
}

impl DescriptorLayout {
    pub(crate) fn create(ctx: &Arc<GpuContext>, desc: &DescriptorLayoutDesc) -> Result<Self> {
        let bindings: Vec<vk::DescriptorSetLayoutBinding> = desc
            .bindings
            .iter()
            .map(|b| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(b.binding)
                    .descriptor_type(descriptor_type_to_vk(b.descriptor_type))
                    .descriptor_count(b.count)
                    .stage_flags(vk::ShaderStageFlags::ALL)
            })
            .collect();

        // Image arrays are filled progressively, unused elements stay unbound
        let binding_flags: Vec<vk::DescriptorBindingFlags> = desc
            .bindings
            .iter()
            .map(|b| {
                if b.descriptor_type == DescriptorType::CombinedImageSampler && b.count > 1 {
                    vk::DescriptorBindingFlags::PARTIALLY_BOUND
                } else {
                    vk::DescriptorBindingFlags::empty()
                }
            })
            .collect();
        let mut flags_info = vk::DescriptorSetLayoutBindingFlagsCreateInfo::default().binding_flags(&binding_flags);

        let create_info = vk::DescriptorSetLayoutCreateInfo::default()
            .bindings(&bindings)
            .push_next(&mut flags_info);

        let layout = unsafe { ctx.device.create_descriptor_set_layout(&create_info, None) }
            .map_err(|e| engine_err!("topaz::vulkan", "Failed to create descriptor set layout: {:?}", e))?;

        Ok(Self {
            ctx: Arc::clone(ctx),
            layout,
            desc: desc.clone(),
        })
    }
}

impl DeviceDescriptorLayout for DescriptorLayout {
    fn desc(&self) -> &DescriptorLayoutDesc {
        &self.desc
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for DescriptorLayout {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

pub(crate) fn vk_descriptor_layout(layout: &Arc<dyn DeviceDescriptorLayout>) -> Result<&DescriptorLayout> {
    layout
        .as_any()
        .downcast_ref::<DescriptorLayout>()
        .ok_or_else(|| engine_err!("topaz::vulkan", "Descriptor layout was not created by the Vulkan device"))
}

// ============================================================================
// Pool
// ============================================================================

/// Descriptor pool
///
/// Sets are never freed individually, destroying the pool releases them all.
pub struct DescriptorPool {
    ctx: Arc<GpuContext>,
    pool: vk::DescriptorPool,
}

impl DescriptorPool {
    pub(crate) fn create(ctx: &Arc<GpuContext>, desc: &DescriptorPoolDesc) -> Result<Self> {
        let mut pool_sizes = Vec::with_capacity(2);
        if desc.storage_buffers > 0 {
            pool_sizes.push(vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_BUFFER,
                descriptor_count: desc.storage_buffers,
            });
        }
        if desc.combined_image_samplers > 0 || pool_sizes.is_empty() {
            pool_sizes.push(vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: desc.combined_image_samplers.max(1),
            });
        }

        let create_info = vk::DescriptorPoolCreateInfo::default()
            .pool_sizes(&pool_sizes)
            .max_sets(desc.max_sets.max(1));

        let pool = unsafe { ctx.device.create_descriptor_pool(&create_info, None) }
            .map_err(|e| engine_err!("topaz::vulkan", "Failed to create descriptor pool: {:?}", e))?;

        engine_debug!(
            "topaz::vulkan",
            "Descriptor pool created: {} sets, {} storage buffers, {} image samplers",
            desc.max_sets,
            desc.storage_buffers,
            desc.combined_image_samplers
        );

        Ok(Self { ctx: Arc::clone(ctx), pool })
    }
}

impl DevicePool for DescriptorPool {
    fn allocate(&mut self, layout: &Arc<dyn DeviceDescriptorLayout>, count: u32) -> Result<DescriptorAllocation> {
        let layouts = vec![vk_descriptor_layout(layout)?.layout; count as usize];
        let allocate_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);

        match unsafe { self.ctx.device.allocate_descriptor_sets(&allocate_info) } {
            Ok(sets) => Ok(DescriptorAllocation::Allocated(
                sets.into_iter()
                    .map(|set| Arc::new(DescriptorSet { set }) as Arc<dyn DeviceDescriptorSet>)
                    .collect(),
            )),
            Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY) => Ok(DescriptorAllocation::PoolExhausted),
            Err(vk::Result::ERROR_FRAGMENTED_POOL) => Ok(DescriptorAllocation::Fragmented),
            Err(e) => Err(engine_err!("topaz::vulkan", "Failed to allocate {} descriptor sets: {:?}", count, e)),
        }
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.destroy_descriptor_pool(self.pool, None);
        }
    }
}

// ============================================================================
// Set
// ============================================================================

/// Descriptor set, owned by its pool
pub struct DescriptorSet {
    pub(crate) set: vk::DescriptorSet,
}

impl DeviceDescriptorSet for DescriptorSet {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub(crate) fn vk_descriptor_set(set: &Arc<dyn DeviceDescriptorSet>) -> Result<vk::DescriptorSet> {
    set.as_any()
        .downcast_ref::<DescriptorSet>()
        .map(|s| s.set)
        .ok_or_else(|| engine_err!("topaz::vulkan", "Descriptor set was not created by the Vulkan device"))
}

// ============================================================================
// Writes
// ============================================================================

enum ResourceInfo {
    Buffer(vk::DescriptorBufferInfo),
    Image(vk::DescriptorImageInfo),
}

/// Translate and apply a batch of descriptor writes
pub(crate) fn update_descriptor_sets(ctx: &GpuContext, writes: &[DescriptorWrite]) -> Result<()> {
    if writes.is_empty() {
        return Ok(());
    }

    // Resource infos must outlive the write structs pointing at them
    let infos = writes
        .iter()
        .map(|write| match &write.resource {
            DescriptorResource::StorageBuffer(buffer) => Ok(ResourceInfo::Buffer(
                vk::DescriptorBufferInfo::default()
                    .buffer(vk_buffer(buffer)?)
                    .offset(0)
                    .range(vk::WHOLE_SIZE),
            )),
            DescriptorResource::CombinedImageSampler(image, sampler) => {
                let image = vk_image(image)?;
                Ok(ResourceInfo::Image(
                    vk::DescriptorImageInfo::default()
                        .image_layout(image.sampled_layout())
                        .image_view(image.view)
                        .sampler(vk_sampler(sampler)?),
                ))
            }
        })
        .collect::<Result<Vec<_>>>()?;

    let vk_writes = writes
        .iter()
        .zip(infos.iter())
        .map(|(write, info)| {
            let base = vk::WriteDescriptorSet::default()
                .dst_set(vk_descriptor_set(write.set)?)
                .dst_binding(write.binding)
                .dst_array_element(write.array_element)
                .descriptor_type(descriptor_type_to_vk(write.resource.descriptor_type()));
            Ok(match info {
                ResourceInfo::Buffer(buffer_info) => base.buffer_info(std::slice::from_ref(buffer_info)),
                ResourceInfo::Image(image_info) => base.image_info(std::slice::from_ref(image_info)),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    unsafe {
        ctx.device.update_descriptor_sets(&vk_writes, &[]);
    }
    engine_trace!("topaz::vulkan", "Applied {} descriptor writes", vk_writes.len());
    Ok(())
}
