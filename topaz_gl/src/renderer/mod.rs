//! Renderer module
//!
//! A renderer is built from a `RendererInfo` and is made of six parts:
//! resource storage, descriptor sets, output targets, pipeline, command
//! buffers and the staged upload path for static data.

mod component;
mod output;
mod renderer_info;
mod edit;
mod staging;
pub(crate) mod resource_store;
pub(crate) mod descriptor_manager;
pub(crate) mod output_manager;
pub(crate) mod pipeline_manager;
pub(crate) mod command_processor;
mod renderer;

pub use component::{Component, ComponentRef, GpuObject, ResourceMut, ResourceRef};
pub use output::{ImageOutput, OutputTarget, RendererOutput, ScissorRegion};
pub use renderer_info::{
    ComputeState, GraphicsState, ProgramKind, RenderState, RendererInfo, RendererOptions, ResourceEntry, ShaderInfo,
};
pub use edit::{RenderConfig, RendererEdit, RendererEditBuilder, RendererEditRequest};
pub use resource_store::{descriptor_buffer_count, ComponentSlot};
pub use renderer::Renderer;
