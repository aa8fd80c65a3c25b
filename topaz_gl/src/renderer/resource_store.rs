/// Renderer resource storage.
///
/// Handles index an indirection table of `ComponentSlot`s. A slot selects
/// either the renderer's own component arena or its reference arena, so a
/// handle stays valid when the component behind it is recreated (resize) or
/// swapped for another renderer's component (re-seat).

use std::collections::hash_map::Entry;
use glam::UVec2;
use rustc_hash::FxHashMap;
use crate::device::{GraphicsDevice, ImageFormat};
use crate::error::{Error, Result};
use crate::renderer::{Component, ComponentRef, RenderState, RendererEdit, ResourceEntry, ResourceMut, ResourceRef};
use crate::resource::{Resource, ResourceAccess, ResourceHandle, ResourceType};
use crate::{engine_debug, engine_error};

/// Number of storage-buffer bindings a renderer's descriptor layout has
///
/// Every buffer except the designated index and draw-indirect buffers is
/// descriptor-visible; the image array binding comes right after them.
pub fn descriptor_buffer_count(resources: &[ResourceType], state: &RenderState) -> u32 {
    resources
        .iter()
        .enumerate()
        .filter(|(index, resource_type)| {
            **resource_type == ResourceType::Buffer && descriptor_visible(ResourceHandle(*index as u32), state)
        })
        .count() as u32
}

/// Whether the buffer at `handle` gets a descriptor binding
pub(crate) fn descriptor_visible(handle: ResourceHandle, state: &RenderState) -> bool {
    state.graphics.index_buffer != Some(handle) && state.graphics.draw_buffer != Some(handle)
}

fn contract_error(message: String) -> Error {
    engine_error!("topaz::ResourceStore", "{}", message);
    Error::InvalidResource(message)
}

fn check_resize(handle: ResourceHandle, access: ResourceAccess, actual: ResourceType, expected: ResourceType) -> Result<()> {
    if access != ResourceAccess::DynamicVariable {
        return Err(contract_error(format!(
            "resource {} is {:?}; only DynamicVariable resources can be resized",
            handle, access
        )));
    }
    if actual != expected {
        return Err(contract_error(format!("resource {} is a {:?}, not a {:?}", handle, actual, expected)));
    }
    Ok(())
}

fn check_buffer_size(handle: ResourceHandle, size: usize) -> Result<()> {
    if size == 0 {
        return Err(contract_error(format!("resource {} resized to zero bytes", handle)));
    }
    Ok(())
}

fn check_image_dimensions(name: &str, dimensions: UVec2) -> Result<()> {
    if dimensions.x == 0 || dimensions.y == 0 {
        return Err(contract_error(format!("'{}' resized to zero area", name)));
    }
    Ok(())
}

/// End of a `len`-byte write at `offset` into `size_bytes`
fn check_write(handle: ResourceHandle, size_bytes: usize, offset: usize, len: usize) -> Result<usize> {
    match offset.checked_add(len).filter(|end| *end <= size_bytes) {
        Some(end) => Ok(end),
        None => Err(contract_error(format!(
            "write of {} bytes at offset {} past the end of resource {} ({} bytes)",
            len, offset, handle, size_bytes
        ))),
    }
}

fn check_reseat(handle: ResourceHandle, current: ResourceType, new: ResourceType) -> Result<()> {
    if current != new {
        return Err(contract_error(format!(
            "resource {} is a {:?}, got a {:?} component",
            handle, current, new
        )));
    }
    Ok(())
}

/// What a resource will look like once the edits before it are applied
struct Projected {
    resource_type: ResourceType,
    access: ResourceAccess,
    size_bytes: usize,
    image: Option<(ImageFormat, UVec2)>,
}

impl Projected {
    fn of(component: &ComponentRef) -> Result<Self> {
        let guard = component.read()?;
        let resource = guard.resource();
        Ok(Self {
            resource_type: component.resource_type(),
            access: component.access(),
            size_bytes: resource.data().size_bytes(),
            image: resource.as_image().map(|image| (image.format(), image.dimensions())),
        })
    }
}

/// Where a handle's component lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentSlot {
    /// Own arena when true, reference arena otherwise
    pub owned: bool,
    pub index: u32,
}

pub(crate) struct ResourceStore {
    slots: Vec<ComponentSlot>,
    /// None once re-seated to a reference
    owned: Vec<Option<ComponentRef>>,
    references: Vec<ComponentRef>,
    /// Component generation per handle as of the last descriptor sync
    synced_generations: Vec<u64>,
    renderer_name: String,
}

impl ResourceStore {
    /// Instantiate every entry: owned resources get a fresh component,
    /// references share the other renderer's
    pub fn new(device: &dyn GraphicsDevice, entries: Vec<ResourceEntry>, renderer_name: &str) -> Result<Self> {
        let mut store = Self {
            slots: Vec::with_capacity(entries.len()),
            owned: Vec::new(),
            references: Vec::new(),
            synced_generations: Vec::with_capacity(entries.len()),
            renderer_name: renderer_name.to_string(),
        };
        for entry in entries {
            match entry {
                ResourceEntry::Owned(resource) => {
                    store.add_resource(device, resource)?;
                }
                ResourceEntry::Reference(component) => {
                    store.ref_resource(component);
                }
            }
        }
        Ok(store)
    }

    pub fn add_resource(&mut self, device: &dyn GraphicsDevice, resource: Resource) -> Result<ResourceHandle> {
        let handle = ResourceHandle(self.slots.len() as u32);
        let name = format!("{}{}", self.renderer_name, handle);
        let component = ComponentRef::new(Component::create(device, resource, name)?);
        self.synced_generations.push(component.generation());
        self.slots.push(ComponentSlot { owned: true, index: self.owned.len() as u32 });
        self.owned.push(Some(component));
        Ok(handle)
    }

    pub fn ref_resource(&mut self, component: ComponentRef) -> ResourceHandle {
        let handle = ResourceHandle(self.slots.len() as u32);
        engine_debug!(
            "topaz::ResourceStore",
            "'{}' references {:?} as {}",
            self.renderer_name, component, handle
        );
        self.synced_generations.push(component.generation());
        self.slots.push(ComponentSlot { owned: false, index: self.references.len() as u32 });
        self.references.push(component);
        handle
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn slot(&self, handle: ResourceHandle) -> Result<ComponentSlot> {
        match self.slots.get(handle.index()) {
            Some(slot) => Ok(*slot),
            None => {
                engine_error!(
                    "topaz::ResourceStore",
                    "'{}' has no resource {} ({} resources)",
                    self.renderer_name, handle, self.slots.len()
                );
                Err(Error::InvalidHandle(format!("resource {} of '{}'", handle, self.renderer_name)))
            }
        }
    }

    pub fn component(&self, handle: ResourceHandle) -> Result<&ComponentRef> {
        let slot = self.slot(handle)?;
        let component = if slot.owned {
            self.owned.get(slot.index as usize).and_then(|c| c.as_ref())
        } else {
            self.references.get(slot.index as usize)
        };
        component.ok_or_else(|| Error::InvalidHandle(format!("resource {} has no component", handle)))
    }

    pub fn get_resource(&self, handle: ResourceHandle) -> Result<ResourceRef<'_>> {
        ResourceRef::new(self.component(handle)?)
    }

    pub fn get_resource_mut(&self, handle: ResourceHandle) -> Result<ResourceMut<'_>> {
        ResourceMut::new(self.component(handle)?)
    }

    /// Components in handle order
    pub fn components(&self) -> impl Iterator<Item = (ResourceHandle, &ComponentRef)> + '_ {
        (0..self.slots.len() as u32).filter_map(move |index| {
            let handle = ResourceHandle(index);
            self.component(handle).ok().map(|component| (handle, component))
        })
    }

    /// Components this renderer owns (not re-seated away)
    pub fn owned_components(&self) -> impl Iterator<Item = &ComponentRef> + '_ {
        self.owned.iter().flatten()
    }

    pub fn resource_types(&self) -> Vec<ResourceType> {
        self.components().map(|(_, component)| component.resource_type()).collect()
    }

    /// Check a whole batch of edits without touching any resource
    ///
    /// Later edits are checked against the shape earlier ones leave behind,
    /// so a resize followed by a write into the new range is accepted.
    pub fn validate_edits(&self, edits: &[RendererEdit]) -> Result<()> {
        let mut projected: FxHashMap<ResourceHandle, Projected> = FxHashMap::default();
        for edit in edits {
            match edit {
                RendererEdit::BufferResize { handle, size } => {
                    let resource = self.projected(&mut projected, *handle)?;
                    check_resize(*handle, resource.access, resource.resource_type, ResourceType::Buffer)?;
                    check_buffer_size(*handle, *size)?;
                    resource.size_bytes = *size;
                }
                RendererEdit::ImageResize { handle, dimensions } => {
                    let resource = self.projected(&mut projected, *handle)?;
                    check_resize(*handle, resource.access, resource.resource_type, ResourceType::Image)?;
                    check_image_dimensions(&handle.to_string(), *dimensions)?;
                    if let Some((format, current)) = resource.image.as_mut() {
                        *current = *dimensions;
                        resource.size_bytes = format.image_size_bytes(*dimensions);
                    }
                }
                RendererEdit::ResourceWrite { handle, offset, data } => {
                    let resource = self.projected(&mut projected, *handle)?;
                    check_write(*handle, resource.size_bytes, *offset, data.len())?;
                }
                RendererEdit::ResourceReference { handle, component } => {
                    let resource = self.projected(&mut projected, *handle)?;
                    check_reseat(*handle, resource.resource_type, component.resource_type())?;
                    *resource = Projected::of(component)?;
                }
                RendererEdit::ComputeConfig { .. } | RendererEdit::RenderConfig(_) | RendererEdit::Scissor { .. } => {}
            }
        }
        Ok(())
    }

    fn projected<'a>(
        &self,
        projected: &'a mut FxHashMap<ResourceHandle, Projected>,
        handle: ResourceHandle,
    ) -> Result<&'a mut Projected> {
        match projected.entry(handle) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => Ok(entry.insert(Projected::of(self.component(handle)?)?)),
        }
    }

    /// Recreate the buffer at `handle` with `size` bytes
    ///
    /// Returns false when the size is unchanged and nothing was done.
    pub fn buffer_resize(&self, device: &dyn GraphicsDevice, handle: ResourceHandle, size: usize) -> Result<bool> {
        let component = self.component(handle)?;
        check_resize(handle, component.access(), component.resource_type(), ResourceType::Buffer)?;
        check_buffer_size(handle, size)?;
        let shared = component.is_shared();
        let mut guard = component.write()?;
        if guard.resource().data().size_bytes() == size {
            return Ok(false);
        }
        // Other renderers may still have frames using the old buffer
        if shared {
            device.wait_idle()?;
        }
        guard.resize_buffer(device, size)?;
        engine_debug!("topaz::ResourceStore", "Resized buffer '{}' to {} bytes", guard.name(), size);
        Ok(true)
    }

    /// Recreate the image at `handle` with `dimensions`
    ///
    /// Returns false when the dimensions are unchanged.
    pub fn image_resize(&self, device: &dyn GraphicsDevice, handle: ResourceHandle, dimensions: UVec2) -> Result<bool> {
        let component = self.component(handle)?;
        check_resize(handle, component.access(), component.resource_type(), ResourceType::Image)?;
        Self::resize_image_component(device, component, dimensions)
    }

    /// Resize an image component regardless of its access mode
    pub fn resize_image_component(device: &dyn GraphicsDevice, component: &ComponentRef, dimensions: UVec2) -> Result<bool> {
        if component.resource_type() != ResourceType::Image {
            return Err(contract_error(format!("'{}' is not an image", component.name())));
        }
        check_image_dimensions(component.name(), dimensions)?;
        let shared = component.is_shared();
        let mut guard = component.write()?;
        if guard.resource().dimensions() == Some(dimensions) {
            return Ok(false);
        }
        if shared {
            device.wait_idle()?;
        }
        guard.resize_image(device, dimensions)?;
        engine_debug!(
            "topaz::ResourceStore",
            "Resized image '{}' to {}x{}",
            guard.name(), dimensions.x, dimensions.y
        );
        Ok(true)
    }

    /// Copy `data` into the resource at `handle` starting at byte `offset`
    ///
    /// Returns whether the component needs a staged upload (static data).
    pub fn write(&self, handle: ResourceHandle, offset: usize, data: &[u8]) -> Result<bool> {
        let component = self.component(handle)?;
        let mut guard = component.write()?;
        let end = check_write(handle, guard.resource().data().size_bytes(), offset, data.len())?;
        guard.resource_mut().data_mut().as_bytes_mut()[offset..end].copy_from_slice(data);
        Ok(guard.needs_upload())
    }

    /// Point `handle` at `component`, which must have the same type
    ///
    /// An owned component replaced this way is released by this renderer.
    pub fn reseat(&mut self, handle: ResourceHandle, component: ComponentRef) -> Result<ResourceType> {
        let slot = self.slot(handle)?;
        let new_type = component.resource_type();
        check_reseat(handle, self.component(handle)?.resource_type(), new_type)?;
        if slot.owned {
            self.owned[slot.index as usize] = None;
            self.slots[handle.index()] = ComponentSlot { owned: false, index: self.references.len() as u32 };
            self.references.push(component);
        } else {
            self.references[slot.index as usize] = component;
        }
        Ok(new_type)
    }

    /// Handles whose component was recreated since the last `mark_synced`
    pub fn stale_handles(&self) -> Vec<ResourceHandle> {
        self.components()
            .filter(|(handle, component)| {
                self.synced_generations.get(handle.index()) != Some(&component.generation())
            })
            .map(|(handle, _)| handle)
            .collect()
    }

    /// Record the current generations as bound into descriptors and commands
    pub fn mark_synced(&mut self) {
        let generations: Vec<u64> = self.components().map(|(_, c)| c.generation()).collect();
        self.synced_generations = generations;
    }
}

#[cfg(test)]
#[path = "resource_store_tests.rs"]
mod tests;
