/// Pipeline layout and pipeline types

use std::any::Any;
use std::sync::Arc;
use crate::device::{DescriptorLayout, RenderPass};

/// Shader stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShaderStage {
    Vertex,
    TessellationControl,
    TessellationEvaluation,
    Fragment,
    Compute,
}

/// Face culling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CullMode {
    #[default]
    None,
    Front,
    Back,
    Both,
}

/// Rasterization polygon mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolygonMode {
    Fill,
    Line,
}

/// Viewport rectangle with depth range
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

/// Integer rectangle (scissor)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rect2D {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Pipeline bind point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineBindPoint {
    Graphics,
    Compute,
}

/// Pipeline layout object (descriptor set layouts of a pipeline)
pub trait PipelineLayout: Send + Sync + Any {
    fn as_any(&self) -> &dyn Any;
}

/// Compiled shader bytes for one stage
#[derive(Debug, Clone, Copy)]
pub struct ShaderModuleDesc<'a> {
    pub stage: ShaderStage,
    /// SPIR-V for the Vulkan backend
    pub code: &'a [u8],
}

/// Descriptor for a graphics pipeline
///
/// The scissor is always dynamic.
pub struct GraphicsPipelineDesc<'a> {
    pub stages: Vec<ShaderModuleDesc<'a>>,
    pub layout: &'a Arc<dyn PipelineLayout>,
    pub render_pass: &'a Arc<dyn RenderPass>,
    pub viewport: Viewport,
    pub polygon_mode: PolygonMode,
    pub cull_mode: CullMode,
    pub depth_test: bool,
    pub alpha_blending: bool,
}

impl GraphicsPipelineDesc<'_> {
    /// Tessellated pipelines consume patch lists of 3 control points
    pub fn is_tessellated(&self) -> bool {
        self.stages.iter().any(|s| {
            matches!(s.stage, ShaderStage::TessellationControl | ShaderStage::TessellationEvaluation)
        })
    }
}

/// Descriptor for a compute pipeline
pub struct ComputePipelineDesc<'a> {
    pub code: &'a [u8],
    pub layout: &'a Arc<dyn PipelineLayout>,
}

/// Pipeline object
pub trait Pipeline: Send + Sync + Any {
    fn bind_point(&self) -> PipelineBindPoint;
    fn as_any(&self) -> &dyn Any;
}

/// Descriptor set layouts a pipeline layout is built from
pub struct PipelineLayoutDesc<'a> {
    pub descriptor_layouts: Vec<&'a Arc<dyn DescriptorLayout>>,
}
