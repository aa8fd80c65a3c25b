//! Resource module
//!
//! CPU-side descriptions of the buffers and images a renderer exposes to
//! its shaders.

mod resource;

pub use resource::{
    Resource, BufferResource, ImageResource, ResourceData,
    ResourceAccess, ResourceFlags, ResourceType, ResourceHandle,
};
