/// Render pass and framebuffer types

use std::any::Any;
use std::sync::Arc;
use glam::UVec2;
use crate::device::{Image, ImageFormat};

/// What happens to an attachment's contents at the start of a render pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadOp {
    Load,
    Clear,
    DontCare,
}

/// What happens to an attachment's contents at the end of a render pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Store,
    DontCare,
}

/// Image layouts the frontend transitions between
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageLayout {
    Undefined,
    ColourAttachment,
    DepthAttachment,
    ShaderReadOnly,
    TransferDst,
    Present,
}

/// Description of one render pass attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttachmentDesc {
    pub format: ImageFormat,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
    pub initial_layout: ImageLayout,
    pub final_layout: ImageLayout,
}

/// Attachment signature of a single-subpass render pass
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RenderPassDesc {
    pub colour_attachments: Vec<AttachmentDesc>,
    pub depth_attachment: Option<AttachmentDesc>,
}

/// Render pass object
pub trait RenderPass: Send + Sync + Any {
    fn desc(&self) -> &RenderPassDesc;
    fn as_any(&self) -> &dyn Any;
}

/// Descriptor for creating a framebuffer
pub struct FramebufferDesc<'a> {
    pub render_pass: &'a Arc<dyn RenderPass>,
    pub colour_attachments: &'a [Arc<dyn Image>],
    pub depth_attachment: Option<&'a Arc<dyn Image>>,
    pub dimensions: UVec2,
}

/// Framebuffer object
pub trait Framebuffer: Send + Sync + Any {
    fn dimensions(&self) -> UVec2;
    fn as_any(&self) -> &dyn Any;
}
