/// Graphics or compute pipeline of a renderer.
///
/// The pipeline layout is created once from the descriptor layout; only the
/// pipeline object itself is replaced on recreation (new render pass,
/// viewport, wireframe or culling).

use std::sync::Arc;
use crate::device::{
    ComputePipelineDesc, GraphicsDevice, GraphicsPipelineDesc, Pipeline, PipelineLayout, PipelineLayoutDesc,
    PolygonMode, ShaderModuleDesc, ShaderStage,
};
use crate::error::{Error, Result};
use crate::renderer::descriptor_manager::DescriptorManager;
use crate::renderer::output_manager::OutputManager;
use crate::renderer::{GraphicsState, ProgramKind, RendererOptions, ShaderInfo};
use crate::{engine_debug, engine_error};

pub(crate) struct PipelineManager {
    shader: ShaderInfo,
    kind: ProgramKind,
    options: RendererOptions,
    layout: Arc<dyn PipelineLayout>,
    pipeline: Arc<dyn Pipeline>,
}

impl PipelineManager {
    /// Build the pipeline for `kind`
    ///
    /// Graphics programs need `output`; compute programs ignore it.
    pub fn build(
        device: &dyn GraphicsDevice,
        shader: ShaderInfo,
        kind: ProgramKind,
        options: RendererOptions,
        descriptors: &DescriptorManager,
        output: Option<&OutputManager>,
        state: &GraphicsState,
    ) -> Result<Self> {
        let descriptor_layouts = if descriptors.is_empty() { Vec::new() } else { vec![descriptors.layout()] };
        let layout = device.create_pipeline_layout(&PipelineLayoutDesc { descriptor_layouts })?;
        let pipeline = Self::create_pipeline(device, &shader, kind, options, &layout, output, state)?;
        Ok(Self { shader, kind, options, layout, pipeline })
    }

    fn create_pipeline(
        device: &dyn GraphicsDevice,
        shader: &ShaderInfo,
        kind: ProgramKind,
        options: RendererOptions,
        layout: &Arc<dyn PipelineLayout>,
        output: Option<&OutputManager>,
        state: &GraphicsState,
    ) -> Result<Arc<dyn Pipeline>> {
        match kind {
            ProgramKind::Compute => {
                let Some(code) = shader.stage(ShaderStage::Compute) else {
                    return Err(Error::InvalidConfiguration("compute program without a compute shader".to_string()));
                };
                let pipeline = device.create_compute_pipeline(&ComputePipelineDesc { code, layout })?;
                engine_debug!("topaz::PipelineManager", "Created compute pipeline");
                Ok(pipeline)
            }
            ProgramKind::Graphics { tessellated } => {
                let Some(output) = output else {
                    engine_error!("topaz::PipelineManager", "Graphics pipeline requested without an output");
                    return Err(Error::InvalidConfiguration("graphics renderer has no output".to_string()));
                };
                let stages = shader.stages().map(|(stage, code)| ShaderModuleDesc { stage, code }).collect();
                let desc = GraphicsPipelineDesc {
                    stages,
                    layout,
                    render_pass: output.render_pass(),
                    viewport: output.viewport(),
                    polygon_mode: if state.wireframe { PolygonMode::Line } else { PolygonMode::Fill },
                    cull_mode: state.culling,
                    depth_test: !options.contains(RendererOptions::NO_DEPTH_TESTING) && output.has_depth(),
                    alpha_blending: options.contains(RendererOptions::ALPHA_BLENDING),
                };
                let pipeline = device.create_graphics_pipeline(&desc)?;
                engine_debug!(
                    "topaz::PipelineManager",
                    "Created graphics pipeline ({:?}, {:?}, tessellated: {}, depth: {})",
                    desc.polygon_mode, desc.cull_mode, tessellated, desc.depth_test
                );
                Ok(pipeline)
            }
        }
    }

    /// Replace the pipeline against the current output and state, keeping the layout
    pub fn recreate(&mut self, device: &dyn GraphicsDevice, output: Option<&OutputManager>, state: &GraphicsState) -> Result<()> {
        self.pipeline = Self::create_pipeline(device, &self.shader, self.kind, self.options, &self.layout, output, state)?;
        Ok(())
    }

    pub fn pipeline(&self) -> &Arc<dyn Pipeline> {
        &self.pipeline
    }

    pub fn kind(&self) -> ProgramKind {
        self.kind
    }

    pub fn is_compute(&self) -> bool {
        self.kind == ProgramKind::Compute
    }
}

#[cfg(test)]
#[path = "pipeline_manager_tests.rs"]
mod tests;
