/// Descriptor layouts, pools and sets

use std::any::Any;
use std::sync::Arc;
use crate::error::Result;
use crate::device::{Buffer, Image, Sampler};

/// Kind of resource a descriptor binding holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorType {
    StorageBuffer,
    CombinedImageSampler,
}

/// One binding slot of a descriptor layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorBindingDesc {
    pub binding: u32,
    pub descriptor_type: DescriptorType,
    /// Array length (1 for plain bindings)
    pub count: u32,
}

/// Shape of a descriptor set
///
/// Bindings are visible to every shader stage. An array binding of
/// combined image samplers is created with partially-bound support, so
/// shaders may index it dynamically.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DescriptorLayoutDesc {
    pub bindings: Vec<DescriptorBindingDesc>,
}

impl DescriptorLayoutDesc {
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Binding description at `binding`, if declared
    pub fn binding(&self, binding: u32) -> Option<&DescriptorBindingDesc> {
        self.bindings.iter().find(|b| b.binding == binding)
    }

    /// Number of descriptors of `descriptor_type` one set of this layout consumes
    pub fn descriptor_count(&self, descriptor_type: DescriptorType) -> u32 {
        self.bindings
            .iter()
            .filter(|b| b.descriptor_type == descriptor_type)
            .map(|b| b.count)
            .sum()
    }
}

/// Descriptor set layout object
pub trait DescriptorLayout: Send + Sync + Any {
    fn desc(&self) -> &DescriptorLayoutDesc;
    fn as_any(&self) -> &dyn Any;
}

/// Capacity of a descriptor pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorPoolDesc {
    pub max_sets: u32,
    pub storage_buffers: u32,
    pub combined_image_samplers: u32,
}

/// Outcome of a descriptor set allocation
///
/// Exhaustion and fragmentation are expected outcomes, not errors: the
/// caller recovers by allocating from a fresh pool.
pub enum DescriptorAllocation {
    Allocated(Vec<Arc<dyn DescriptorSet>>),
    PoolExhausted,
    Fragmented,
}

/// Descriptor pool
///
/// Sets allocated from a pool stay valid until the pool is dropped, so the
/// owner must keep the pool alive at least as long as its sets.
pub trait DescriptorPool: Send + Sync {
    /// Allocate `count` sets of `layout`
    fn allocate(&mut self, layout: &Arc<dyn DescriptorLayout>, count: u32) -> Result<DescriptorAllocation>;
}

/// Descriptor set
pub trait DescriptorSet: Send + Sync + Any {
    fn as_any(&self) -> &dyn Any;
}

/// Resource written into one descriptor
pub enum DescriptorResource<'a> {
    StorageBuffer(&'a Arc<dyn Buffer>),
    CombinedImageSampler(&'a Arc<dyn Image>, &'a Arc<dyn Sampler>),
}

impl DescriptorResource<'_> {
    pub fn descriptor_type(&self) -> DescriptorType {
        match self {
            DescriptorResource::StorageBuffer(_) => DescriptorType::StorageBuffer,
            DescriptorResource::CombinedImageSampler(_, _) => DescriptorType::CombinedImageSampler,
        }
    }
}

/// One descriptor update
pub struct DescriptorWrite<'a> {
    pub set: &'a Arc<dyn DescriptorSet>,
    pub binding: u32,
    pub array_element: u32,
    pub resource: DescriptorResource<'a>,
}
