/// Sampler objects and the cache that deduplicates them
///
/// Every sampled image asks for a sampler, but only a handful of distinct
/// filter/address combinations exist, so samplers are created on first use
/// and shared afterwards.

use ash::vk;
use rustc_hash::FxHashMap;
use std::any::Any;
use std::sync::{Arc, Mutex};
use topaz_gl::device::{Sampler as DeviceSampler, SamplerDesc};
use topaz_gl::topaz::Result;
use topaz_gl::{engine_debug, engine_err};

use crate::vulkan_context::GpuContext;
use crate::vulkan_format::{address_mode_to_vk, filter_to_vk};

pub struct Sampler {
    ctx: Arc<GpuContext>,
    pub(crate) sampler: vk::Sampler,
    desc: SamplerDesc,
}

impl Sampler {
    fn create(ctx: &Arc<GpuContext>, desc: SamplerDesc) -> Result<Self> {
        let (filter, mipmap_mode) = filter_to_vk(desc.filter);
        let address = address_mode_to_vk(desc.address_mode);

        let create_info = vk::SamplerCreateInfo::default()
            .mag_filter(filter)
            .min_filter(filter)
            .mipmap_mode(mipmap_mode)
            .address_mode_u(address)
            .address_mode_v(address)
            .address_mode_w(address)
            .mip_lod_bias(0.0)
            .min_lod(0.0)
            .max_lod(vk::LOD_CLAMP_NONE)
            .border_color(vk::BorderColor::FLOAT_OPAQUE_BLACK)
            .anisotropy_enable(false)
            .max_anisotropy(1.0)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .unnormalized_coordinates(false);

        let sampler = unsafe { ctx.device.create_sampler(&create_info, None) }
            .map_err(|e| engine_err!("topaz::vulkan", "Failed to create sampler {:?}: {:?}", desc, e))?;

        Ok(Self { ctx: Arc::clone(ctx), sampler, desc })
    }
}

impl DeviceSampler for Sampler {
    fn desc(&self) -> SamplerDesc {
        self.desc
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.destroy_sampler(self.sampler, None);
        }
    }
}

/// Samplers by description, created on first use
pub(crate) struct SamplerCache {
    cache: Mutex<FxHashMap<SamplerDesc, Arc<Sampler>>>,
}

impl SamplerCache {
    pub(crate) fn new() -> Self {
        Self {
            cache: Mutex::new(FxHashMap::default()),
        }
    }

    pub(crate) fn get(&self, ctx: &Arc<GpuContext>, desc: &SamplerDesc) -> Result<Arc<Sampler>> {
        let mut cache = self
            .cache
            .lock()
            .map_err(|_| engine_err!("topaz::vulkan", "Sampler cache mutex poisoned"))?;

        if let Some(sampler) = cache.get(desc) {
            return Ok(Arc::clone(sampler));
        }

        let sampler = Arc::new(Sampler::create(ctx, *desc)?);
        engine_debug!("topaz::vulkan", "Created sampler {:?} ({} cached)", desc, cache.len() + 1);
        cache.insert(*desc, Arc::clone(&sampler));
        Ok(sampler)
    }

    pub(crate) fn len(&self) -> usize {
        self.cache.lock().map(|cache| cache.len()).unwrap_or(0)
    }
}

pub(crate) fn vk_sampler(sampler: &Arc<dyn DeviceSampler>) -> Result<vk::Sampler> {
    sampler
        .as_any()
        .downcast_ref::<Sampler>()
        .map(|s| s.sampler)
        .ok_or_else(|| engine_err!("topaz::vulkan", "Sampler was not created by the Vulkan device"))
}
