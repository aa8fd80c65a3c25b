/// CommandBuffer trait - for recording GPU commands

use std::any::Any;
use std::sync::Arc;
use crate::error::Result;
use crate::device::{
    Buffer, Image, ImageLayout, RenderPass, Framebuffer, Pipeline,
    DescriptorSet, Rect2D,
};

/// Stride of one non-indexed indirect draw command (4 x u32)
pub const DRAW_INDIRECT_STRIDE: u32 = 16;

/// Stride of one indexed indirect draw command (5 x u32)
pub const DRAW_INDEXED_INDIRECT_STRIDE: u32 = 20;

/// Queue a command buffer is submitted to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueType {
    Graphics,
    Compute,
}

/// Clear value for an attachment
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClearValue {
    /// Colour clear value (RGBA)
    Colour([f32; 4]),
    /// Depth/stencil clear value
    DepthStencil { depth: f32, stencil: u32 },
}

/// Command buffer for recording GPU commands
///
/// Commands are recorded once and submitted many times through
/// `GraphicsDevice::submit`. Recording resets the buffer implicitly.
pub trait CommandBuffer: Send + Sync + Any {
    /// Begin recording commands
    fn begin(&mut self) -> Result<()>;

    /// End recording commands
    fn end(&mut self) -> Result<()>;

    /// Begin a render pass
    ///
    /// # Arguments
    ///
    /// * `render_pass` - The render pass to begin
    /// * `framebuffer` - The framebuffer containing colour and depth attachments
    /// * `clear_values` - One clear value per attachment, depth last
    fn begin_render_pass(
        &mut self,
        render_pass: &Arc<dyn RenderPass>,
        framebuffer: &Arc<dyn Framebuffer>,
        clear_values: &[ClearValue],
    ) -> Result<()>;

    /// End the current render pass
    fn end_render_pass(&mut self) -> Result<()>;

    /// Bind a graphics or compute pipeline
    fn bind_pipeline(&mut self, pipeline: &Arc<dyn Pipeline>) -> Result<()>;

    /// Bind a descriptor set at set index 0 of the pipeline's layout
    ///
    /// # Arguments
    ///
    /// * `pipeline` - Pipeline whose layout and bind point are used
    /// * `set` - The descriptor set to bind
    fn bind_descriptor_set(
        &mut self,
        pipeline: &Arc<dyn Pipeline>,
        set: &Arc<dyn DescriptorSet>,
    ) -> Result<()>;

    /// Set the dynamic scissor rectangle
    fn set_scissor(&mut self, scissor: Rect2D) -> Result<()>;

    /// Bind a u32 index buffer at offset 0
    fn bind_index_buffer(&mut self, buffer: &Arc<dyn Buffer>) -> Result<()>;

    /// Draw `vertex_count` vertices, no vertex buffers
    fn draw(&mut self, vertex_count: u32) -> Result<()>;

    /// Draw `index_count` indices from the bound index buffer
    fn draw_indexed(&mut self, index_count: u32) -> Result<()>;

    /// Draw with parameters read from `buffer`
    ///
    /// # Arguments
    ///
    /// * `buffer` - Buffer of tightly packed draw commands
    /// * `offset` - Offset of the first command in bytes
    /// * `draw_count` - Number of commands
    /// * `stride` - Byte stride between commands
    fn draw_indirect(&mut self, buffer: &Arc<dyn Buffer>, offset: u64, draw_count: u32, stride: u32) -> Result<()>;

    /// Indexed variant of `draw_indirect`
    fn draw_indexed_indirect(&mut self, buffer: &Arc<dyn Buffer>, offset: u64, draw_count: u32, stride: u32) -> Result<()>;

    /// Draw with parameters and a draw count both read from GPU memory
    ///
    /// # Arguments
    ///
    /// * `buffer` - Buffer of draw commands
    /// * `offset` - Offset of the first command in bytes
    /// * `count_buffer` - Buffer holding the u32 draw count
    /// * `count_offset` - Offset of the draw count in bytes
    /// * `max_draw_count` - Upper bound on the draw count
    /// * `stride` - Byte stride between commands
    fn draw_indirect_count(
        &mut self,
        buffer: &Arc<dyn Buffer>,
        offset: u64,
        count_buffer: &Arc<dyn Buffer>,
        count_offset: u64,
        max_draw_count: u32,
        stride: u32,
    ) -> Result<()>;

    /// Dispatch compute work groups
    fn dispatch(&mut self, x: u32, y: u32, z: u32) -> Result<()>;

    /// Copy `size` bytes from the start of `src` to the start of `dst`
    fn copy_buffer(&mut self, src: &Arc<dyn Buffer>, dst: &Arc<dyn Buffer>, size: u64) -> Result<()>;

    /// Copy tightly packed texels from `src` into the whole of `dst`
    ///
    /// The image is transitioned to TransferDst for the copy and left in
    /// `final_layout` afterwards.
    fn copy_buffer_to_image(
        &mut self,
        src: &Arc<dyn Buffer>,
        dst: &Arc<dyn Image>,
        final_layout: ImageLayout,
    ) -> Result<()>;

    fn as_any(&self) -> &dyn Any;
}

/// Pool command buffers are allocated from
///
/// Pools are bound to one queue type. A pool that cannot hold more buffers
/// reports `Error::OutOfMemory` so the caller can open a new pool.
pub trait CommandPool: Send + Sync {
    /// Allocate `count` primary command buffers
    fn allocate(&mut self, count: u32) -> Result<Vec<Box<dyn CommandBuffer>>>;
}
