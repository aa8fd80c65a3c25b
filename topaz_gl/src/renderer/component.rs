/// GPU-side instantiation of a resource.
///
/// A Component pairs a Resource with the device object backing it: a
/// buffer, or an image plus its sampler. Components are shared between
/// renderers through `ComponentRef`, so a component referenced by another
/// renderer stays alive as long as any renderer holds it.

use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, TryLockError};
use bytemuck::Pod;
use glam::UVec2;
use crate::device::{
    Buffer, BufferDesc, BufferUsage, GraphicsDevice, Image, ImageDesc, ImageUsage,
    MemoryResidency, Sampler,
};
use crate::error::{Error, Result};
use crate::resource::{Resource, ResourceAccess, ResourceFlags, ResourceType};
use crate::{engine_debug, engine_error};

/// Device object behind a component
#[derive(Clone)]
pub enum GpuObject {
    Buffer(Arc<dyn Buffer>),
    Image {
        image: Arc<dyn Image>,
        sampler: Arc<dyn Sampler>,
    },
}

pub struct Component {
    resource: Resource,
    gpu: GpuObject,
    name: String,
    /// Bumped whenever `gpu` is replaced; shared with every `ComponentRef`
    generation: Arc<AtomicU64>,
}

impl Component {
    /// Create the device object for `resource`
    ///
    /// Dynamic resources are mapped straight away and their data re-pointed
    /// at the mapping. Static resources keep owned bytes and must be
    /// uploaded by the caller (see `needs_upload`).
    pub(crate) fn create(device: &dyn GraphicsDevice, resource: Resource, name: String) -> Result<Self> {
        resource.validate()?;
        let gpu = Self::create_gpu_object(device, &resource, &name)?;
        let mut component = Self { resource, gpu, name, generation: Arc::new(AtomicU64::new(0)) };
        component.map_dynamic_data()?;
        engine_debug!(
            "topaz::Component",
            "Created {:?} component '{}' ({} bytes, {:?})",
            component.resource.resource_type(),
            component.name,
            component.resource.data().size_bytes(),
            component.resource.access()
        );
        Ok(component)
    }

    fn residency(resource: &Resource) -> MemoryResidency {
        if resource.access().is_dynamic() {
            MemoryResidency::Host
        } else {
            MemoryResidency::Device
        }
    }

    fn create_gpu_object(device: &dyn GraphicsDevice, resource: &Resource, name: &str) -> Result<GpuObject> {
        match resource {
            Resource::Buffer(_) => {
                let flags = resource.flags();
                let mut usage = BufferUsage::STORAGE | BufferUsage::TRANSFER_DST;
                if flags.contains(ResourceFlags::INDEX_BUFFER) {
                    usage |= BufferUsage::INDEX;
                }
                if flags.contains(ResourceFlags::DRAW_INDIRECT_BUFFER) {
                    usage |= BufferUsage::INDIRECT;
                }
                let buffer = device.create_buffer(&BufferDesc {
                    size: resource.data().size_bytes() as u64,
                    usage,
                    residency: Self::residency(resource),
                    debug_name: name.to_string(),
                })?;
                Ok(GpuObject::Buffer(buffer))
            }
            Resource::Image(image_resource) => {
                let mut usage = ImageUsage::SAMPLED | ImageUsage::TRANSFER_DST;
                if resource.flags().contains(ResourceFlags::RENDERER_OUTPUT) {
                    usage |= if image_resource.format().is_depth() {
                        ImageUsage::DEPTH_ATTACHMENT
                    } else {
                        ImageUsage::COLOUR_ATTACHMENT
                    };
                }
                let image = device.create_image(&ImageDesc {
                    format: image_resource.format(),
                    dimensions: image_resource.dimensions(),
                    usage,
                    residency: Self::residency(resource),
                    debug_name: name.to_string(),
                })?;
                let sampler = device.create_sampler(&image_resource.sampler_desc())?;
                Ok(GpuObject::Image { image, sampler })
            }
        }
    }

    /// Alias dynamic data onto the current device object's mapping
    fn map_dynamic_data(&mut self) -> Result<()> {
        if !self.resource.access().is_dynamic() {
            return Ok(());
        }
        let (mapped, len) = match &self.gpu {
            GpuObject::Buffer(buffer) => (buffer.mapped_ptr(), buffer.size() as usize),
            GpuObject::Image { image, .. } => {
                (image.mapped_ptr(), image.format().image_size_bytes(image.dimensions()))
            }
        };
        let Some(ptr) = mapped else {
            engine_error!("topaz::Component", "Dynamic component '{}' has no host mapping", self.name);
            return Err(Error::BackendError(format!("dynamic component '{}' is not host-visible", self.name)));
        };
        // SAFETY: the mapping lives as long as `self.gpu`, and the data is
        // re-pointed whenever `self.gpu` is replaced.
        unsafe { self.resource.data_mut().map_onto(ptr, len) };
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    pub(crate) fn resource_mut(&mut self) -> &mut Resource {
        &mut self.resource
    }

    pub fn resource_type(&self) -> ResourceType {
        self.resource.resource_type()
    }

    /// Number of times the device object has been recreated
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn gpu(&self) -> &GpuObject {
        &self.gpu
    }

    pub fn buffer(&self) -> Option<&Arc<dyn Buffer>> {
        match &self.gpu {
            GpuObject::Buffer(buffer) => Some(buffer),
            GpuObject::Image { .. } => None,
        }
    }

    pub fn image(&self) -> Option<&Arc<dyn Image>> {
        match &self.gpu {
            GpuObject::Image { image, .. } => Some(image),
            GpuObject::Buffer(_) => None,
        }
    }

    pub fn sampler(&self) -> Option<&Arc<dyn Sampler>> {
        match &self.gpu {
            GpuObject::Image { sampler, .. } => Some(sampler),
            GpuObject::Buffer(_) => None,
        }
    }

    /// Static components hold their data CPU-side and need staged uploads
    pub fn needs_upload(&self) -> bool {
        !self.resource.access().is_dynamic()
    }

    /// Recreate the buffer at `size` bytes
    ///
    /// The overlapping prefix is preserved and growth is zero-filled. On
    /// failure the component is left as it was.
    pub(crate) fn resize_buffer(&mut self, device: &dyn GraphicsDevice, size: usize) -> Result<()> {
        if !matches!(self.resource, Resource::Buffer(_)) {
            return Err(Error::InvalidResource(format!("'{}' is not a buffer", self.name)));
        }
        // Owned copy first: the old mapping dies with the old buffer
        let mut resized = self.resource.clone();
        resized.data_mut().resize_owned(size);
        self.replace_gpu_object(device, resized)
    }

    /// Recreate the image at `dimensions`
    ///
    /// Texel data is kept as a byte prefix, not re-laid out per row.
    pub(crate) fn resize_image(&mut self, device: &dyn GraphicsDevice, dimensions: UVec2) -> Result<()> {
        let mut resized = self.resource.clone();
        let Some(image) = resized.image_mut() else {
            return Err(Error::InvalidResource(format!("'{}' is not an image", self.name)));
        };
        let len = image.format().image_size_bytes(dimensions);
        image.set_dimensions(dimensions);
        resized.data_mut().resize_owned(len);
        self.replace_gpu_object(device, resized)
    }

    fn replace_gpu_object(&mut self, device: &dyn GraphicsDevice, resized: Resource) -> Result<()> {
        let gpu = Self::create_gpu_object(device, &resized, &self.name)?;
        self.resource = resized;
        self.gpu = gpu;
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.map_dynamic_data()
    }
}

struct SharedComponent {
    component: RwLock<Component>,
    generation: Arc<AtomicU64>,
    // Fixed for the component's lifetime, readable without the lock
    name: String,
    resource_type: ResourceType,
    access: ResourceAccess,
    flags: ResourceFlags,
}

/// Shared handle to a component
///
/// Cloning shares the component; it is destroyed when the last handle
/// (owning renderer or referrer) goes away.
///
/// Locking never blocks: a component borrowed through `get_resource_mut`
/// makes every other access fail with `Error::InvalidResource` until the
/// guard is dropped.
#[derive(Clone)]
pub struct ComponentRef(Arc<SharedComponent>);

impl ComponentRef {
    pub(crate) fn new(component: Component) -> Self {
        Self(Arc::new(SharedComponent {
            generation: component.generation.clone(),
            name: component.name.clone(),
            resource_type: component.resource_type(),
            access: component.resource.access(),
            flags: component.resource.flags(),
            component: RwLock::new(component),
        }))
    }

    fn locked(&self) -> Error {
        engine_error!(
            "topaz::Component",
            "'{}' is borrowed through a resource guard that is still alive",
            self.0.name
        );
        Error::InvalidResource(format!("'{}' is locked by an outstanding resource guard", self.0.name))
    }

    pub fn read(&self) -> Result<RwLockReadGuard<'_, Component>> {
        match self.0.component.try_read() {
            Ok(guard) => Ok(guard),
            Err(TryLockError::Poisoned(poisoned)) => Ok(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => Err(self.locked()),
        }
    }

    pub(crate) fn write(&self) -> Result<RwLockWriteGuard<'_, Component>> {
        match self.0.component.try_write() {
            Ok(guard) => Ok(guard),
            Err(TryLockError::Poisoned(poisoned)) => Ok(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => Err(self.locked()),
        }
    }

    /// Number of times the device object has been recreated
    pub fn generation(&self) -> u64 {
        self.0.generation.load(Ordering::Acquire)
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn resource_type(&self) -> ResourceType {
        self.0.resource_type
    }

    pub fn access(&self) -> ResourceAccess {
        self.0.access
    }

    pub fn flags(&self) -> ResourceFlags {
        self.0.flags
    }

    pub fn needs_upload(&self) -> bool {
        !self.0.access.is_dynamic()
    }

    /// Whether another renderer may hold this component too
    pub fn is_shared(&self) -> bool {
        Arc::strong_count(&self.0) > 1
    }

    /// Whether both handles share one component
    pub fn ptr_eq(&self, other: &ComponentRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl std::fmt::Debug for ComponentRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentRef")
            .field("name", &self.0.name)
            .field("type", &self.0.resource_type)
            .finish()
    }
}

/// Read access to a renderer resource
pub struct ResourceRef<'a> {
    guard: RwLockReadGuard<'a, Component>,
}

impl<'a> ResourceRef<'a> {
    pub(crate) fn new(component: &'a ComponentRef) -> Result<Self> {
        Ok(Self { guard: component.read()? })
    }
}

impl Deref for ResourceRef<'_> {
    type Target = Resource;

    fn deref(&self) -> &Resource {
        self.guard.resource()
    }
}

/// Write access to a renderer resource
///
/// Only the bytes can be changed; the resource itself (type, size, the
/// mapping behind dynamic data) stays under the component's control.
///
/// ```compile_fail
/// fn replace(mut resource: topaz_gl::renderer::ResourceMut<'_>) {
///     *resource = topaz_gl::resource::ImageResource::null().into();
/// }
/// ```
///
/// ```compile_fail
/// fn take(mut resource: topaz_gl::renderer::ResourceMut<'_>) {
///     let empty = topaz_gl::resource::ResourceData::from_bytes(Vec::new());
///     let _mapped = std::mem::replace(resource.data_mut(), empty);
/// }
/// ```
pub struct ResourceMut<'a> {
    guard: RwLockWriteGuard<'a, Component>,
}

impl<'a> ResourceMut<'a> {
    pub(crate) fn new(component: &'a ComponentRef) -> Result<Self> {
        Ok(Self { guard: component.write()? })
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        self.guard.resource_mut().data_mut().as_bytes_mut()
    }

    /// Mutable typed view of the bytes, if size and alignment allow it
    pub fn as_slice_mut<T: Pod>(&mut self) -> Option<&mut [T]> {
        self.guard.resource_mut().data_mut().as_slice_mut()
    }

    /// Write the `index`-th `T`
    pub fn write<T: Pod>(&mut self, index: usize, value: T) -> Result<()> {
        self.guard.resource_mut().data_mut().write(index, value)
    }
}

impl Deref for ResourceMut<'_> {
    type Target = Resource;

    fn deref(&self) -> &Resource {
        self.guard.resource()
    }
}

#[cfg(test)]
#[path = "component_tests.rs"]
mod tests;
