/// Batched renderer edits.
///
/// An edit request is a list of changes applied atomically by
/// `Renderer::edit`: the whole list is checked first, then the renderer
/// drains its in-flight frames once, applies every change and rebuilds only
/// what the changes invalidated.

use glam::{UVec2, UVec3, Vec4};
use crate::device::CullMode;
use crate::renderer::{ComponentRef, ScissorRegion};
use crate::resource::ResourceHandle;

/// Partial graphics state update; None fields are left unchanged
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RenderConfig {
    pub wireframe: Option<bool>,
    pub clear_colour: Option<Vec4>,
    pub tri_count: Option<u32>,
    pub culling: Option<CullMode>,
}

/// One change to a renderer
#[derive(Debug, Clone)]
pub enum RendererEdit {
    /// Resize a `DynamicVariable` buffer to `size` bytes
    BufferResize { handle: ResourceHandle, size: usize },
    /// Resize a `DynamicVariable` image
    ImageResize { handle: ResourceHandle, dimensions: UVec2 },
    /// Overwrite bytes of a resource starting at `offset`
    ResourceWrite { handle: ResourceHandle, offset: usize, data: Vec<u8> },
    /// New dispatch size (compute renderers)
    ComputeConfig { kernel: UVec3 },
    /// Graphics state changes (graphics renderers)
    RenderConfig(RenderConfig),
    /// Point `handle` at another renderer's component of the same type
    ResourceReference { handle: ResourceHandle, component: ComponentRef },
    /// New scissor region; None restores the full target extent
    Scissor { region: Option<ScissorRegion> },
}

/// Ordered list of edits
#[derive(Debug, Clone, Default)]
pub struct RendererEditRequest {
    pub edits: Vec<RendererEdit>,
}

impl RendererEditRequest {
    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }
}

/// Fluent builder for `RendererEditRequest`
///
/// ```ignore
/// let request = RendererEditBuilder::new()
///     .buffer_resize(particles, 2 * size_of::<f32>())
///     .write(params, 0, bytemuck::bytes_of(&params_value))
///     .build();
/// renderer.edit(&mut ctx, request)?;
/// ```
#[derive(Debug, Default)]
pub struct RendererEditBuilder {
    request: RendererEditRequest,
}

impl RendererEditBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn buffer_resize(mut self, handle: ResourceHandle, size: usize) -> Self {
        self.request.edits.push(RendererEdit::BufferResize { handle, size });
        self
    }

    pub fn image_resize(mut self, handle: ResourceHandle, dimensions: UVec2) -> Self {
        self.request.edits.push(RendererEdit::ImageResize { handle, dimensions });
        self
    }

    pub fn write(mut self, handle: ResourceHandle, offset: usize, data: &[u8]) -> Self {
        self.request.edits.push(RendererEdit::ResourceWrite { handle, offset, data: data.to_vec() });
        self
    }

    pub fn compute(mut self, kernel: UVec3) -> Self {
        self.request.edits.push(RendererEdit::ComputeConfig { kernel });
        self
    }

    pub fn render_state(mut self, config: RenderConfig) -> Self {
        self.request.edits.push(RendererEdit::RenderConfig(config));
        self
    }

    pub fn reseat(mut self, handle: ResourceHandle, component: ComponentRef) -> Self {
        self.request.edits.push(RendererEdit::ResourceReference { handle, component });
        self
    }

    pub fn scissor(mut self, region: Option<ScissorRegion>) -> Self {
        self.request.edits.push(RendererEdit::Scissor { region });
        self
    }

    pub fn build(self) -> RendererEditRequest {
        self.request
    }
}

#[cfg(test)]
#[path = "edit_tests.rs"]
mod tests;
