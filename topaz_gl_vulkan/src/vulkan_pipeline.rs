/// Pipeline layouts, graphics and compute pipelines
///
/// Shader modules only live for the duration of pipeline creation. Each
/// module is reflected with spirq to find its entry point and to check the
/// descriptors it declares against the pipeline layout.

use ash::vk;
use std::any::Any;
use std::ffi::CString;
use std::io::Cursor;
use std::sync::Arc;
use topaz_gl::device::{
    ComputePipelineDesc, DescriptorLayoutDesc, DescriptorType, GraphicsPipelineDesc, Pipeline as DevicePipeline,
    PipelineBindPoint, PipelineLayout as DevicePipelineLayout, PipelineLayoutDesc, ShaderStage,
};
use topaz_gl::topaz::{Error, Result};
use topaz_gl::{engine_debug, engine_err, engine_warn};

use crate::vulkan_context::GpuContext;
use crate::vulkan_descriptor::vk_descriptor_layout;
use crate::vulkan_format::{cull_mode_to_vk, polygon_mode_to_vk, shader_stage_to_vk};
use crate::vulkan_render_pass::vk_render_pass;

/// Control points per patch for tessellated pipelines
const PATCH_CONTROL_POINTS: u32 = 3;

// ============================================================================
// Layout
// ============================================================================

pub struct PipelineLayout {
    ctx: Arc<GpuContext>,
    pub(crate) layout: vk::PipelineLayout,
    /// Descriptor layouts per set index, for shader checks
    sets: Vec<DescriptorLayoutDesc>,
}

impl PipelineLayout {
    pub(crate) fn create(ctx: &Arc<GpuContext>, desc: &PipelineLayoutDesc) -> Result<Self> {
        let set_layouts = desc
            .descriptor_layouts
            .iter()
            .map(|layout| vk_descriptor_layout(layout).map(|l| l.layout))
            .collect::<Result<Vec<_>>>()?;

        let create_info = vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts);
        let layout = unsafe { ctx.device.create_pipeline_layout(&create_info, None) }
            .map_err(|e| engine_err!("topaz::vulkan", "Failed to create pipeline layout: {:?}", e))?;

        Ok(Self {
            ctx: Arc::clone(ctx),
            layout,
            sets: desc.descriptor_layouts.iter().map(|l| l.desc().clone()).collect(),
        })
    }
}

impl DevicePipelineLayout for PipelineLayout {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

fn vk_pipeline_layout(layout: &Arc<dyn DevicePipelineLayout>) -> Result<&PipelineLayout> {
    layout
        .as_any()
        .downcast_ref::<PipelineLayout>()
        .ok_or_else(|| engine_err!("topaz::vulkan", "Pipeline layout was not created by the Vulkan device"))
}

// ============================================================================
// Shader modules
// ============================================================================

/// Shader module destroyed on drop
struct ShaderModule<'a> {
    ctx: &'a GpuContext,
    module: vk::ShaderModule,
    stage: ShaderStage,
    entry_point: CString,
}

impl<'a> ShaderModule<'a> {
    fn create(ctx: &'a GpuContext, stage: ShaderStage, code: &[u8], layout: &PipelineLayout) -> Result<Self> {
        let words = ash::util::read_spv(&mut Cursor::new(code)).map_err(|e| {
            Error::InvalidConfiguration(format!("{:?} shader is not valid SPIR-V: {}", stage, e))
        })?;

        let entry_point = reflect_entry_point(&words, stage, layout)?;

        let create_info = vk::ShaderModuleCreateInfo::default().code(&words);
        let module = unsafe { ctx.device.create_shader_module(&create_info, None) }
            .map_err(|e| engine_err!("topaz::vulkan", "Failed to create {:?} shader module: {:?}", stage, e))?;

        Ok(Self { ctx, module, stage, entry_point })
    }

    fn stage_info(&self) -> vk::PipelineShaderStageCreateInfo<'_> {
        vk::PipelineShaderStageCreateInfo::default()
            .stage(shader_stage_to_vk(self.stage))
            .module(self.module)
            .name(&self.entry_point)
    }
}

impl Drop for ShaderModule<'_> {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.destroy_shader_module(self.module, None);
        }
    }
}

/// Entry point name of a SPIR-V module, warning about descriptors the
/// pipeline layout does not provide
fn reflect_entry_point(words: &[u32], stage: ShaderStage, layout: &PipelineLayout) -> Result<CString> {
    let entry_points = spirq::ReflectConfig::new()
        .spv(words)
        .ref_all_rscs(true)
        .reflect()
        .map_err(|e| Error::InvalidConfiguration(format!("SPIR-V reflection failed for {:?} shader: {:?}", stage, e)))?;

    let Some(entry_point) = entry_points.first() else {
        return Err(Error::InvalidConfiguration(format!("{:?} shader declares no entry point", stage)));
    };

    for var in entry_point.vars.iter() {
        if let spirq::var::Variable::Descriptor { desc_bind, desc_ty, .. } = var {
            let expected = match desc_ty {
                spirq::ty::DescriptorType::StorageBuffer(..) => Some(DescriptorType::StorageBuffer),
                spirq::ty::DescriptorType::CombinedImageSampler() => Some(DescriptorType::CombinedImageSampler),
                _ => None,
            };
            let declared = layout
                .sets
                .get(desc_bind.set() as usize)
                .and_then(|set| set.binding(desc_bind.bind()))
                .map(|binding| binding.descriptor_type);

            if expected.is_none() || declared != expected {
                engine_warn!(
                    "topaz::vulkan",
                    "{:?} shader binding (set {}, binding {}) of type {:?} does not match the renderer layout ({:?})",
                    stage,
                    desc_bind.set(),
                    desc_bind.bind(),
                    desc_ty,
                    declared
                );
            }
        }
    }

    CString::new(entry_point.name.as_str())
        .map_err(|_| Error::InvalidConfiguration(format!("{:?} shader entry point name is not a C string", stage)))
}

// ============================================================================
// Pipelines
// ============================================================================

pub struct Pipeline {
    ctx: Arc<GpuContext>,
    pub(crate) pipeline: vk::Pipeline,
    pub(crate) layout: vk::PipelineLayout,
    bind_point: PipelineBindPoint,
    /// Keeps the layout alive while the pipeline may be bound
    _layout: Arc<dyn DevicePipelineLayout>,
}

impl Pipeline {
    pub(crate) fn create_graphics(ctx: &Arc<GpuContext>, desc: &GraphicsPipelineDesc) -> Result<Self> {
        let layout = vk_pipeline_layout(desc.layout)?;
        let render_pass = vk_render_pass(desc.render_pass)?;

        let modules = desc
            .stages
            .iter()
            .map(|stage| ShaderModule::create(ctx, stage.stage, stage.code, layout))
            .collect::<Result<Vec<_>>>()?;
        let stages: Vec<_> = modules.iter().map(|m| m.stage_info()).collect();

        let tessellated = desc.is_tessellated();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default();
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(if tessellated {
                vk::PrimitiveTopology::PATCH_LIST
            } else {
                vk::PrimitiveTopology::TRIANGLE_LIST
            })
            .primitive_restart_enable(false);
        let tessellation = vk::PipelineTessellationStateCreateInfo::default().patch_control_points(PATCH_CONTROL_POINTS);

        let viewports = [vk::Viewport {
            x: desc.viewport.x,
            y: desc.viewport.y,
            width: desc.viewport.width,
            height: desc.viewport.height,
            min_depth: desc.viewport.min_depth,
            max_depth: desc.viewport.max_depth,
        }];
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewports(&viewports)
            .scissor_count(1);

        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(polygon_mode_to_vk(desc.polygon_mode))
            .cull_mode(cull_mode_to_vk(desc.cull_mode))
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_bias_enable(false)
            .line_width(1.0);

        let multisample = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1)
            .sample_shading_enable(false);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(desc.depth_test)
            .depth_write_enable(desc.depth_test)
            .depth_compare_op(vk::CompareOp::LESS)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let blend_attachment = if desc.alpha_blending {
            vk::PipelineColorBlendAttachmentState::default()
                .blend_enable(true)
                .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
                .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                .color_blend_op(vk::BlendOp::ADD)
                .src_alpha_blend_factor(vk::BlendFactor::ONE)
                .dst_alpha_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                .alpha_blend_op(vk::BlendOp::ADD)
                .color_write_mask(vk::ColorComponentFlags::RGBA)
        } else {
            vk::PipelineColorBlendAttachmentState::default()
                .blend_enable(false)
                .color_write_mask(vk::ColorComponentFlags::RGBA)
        };
        let blend_attachments = vec![blend_attachment; desc.render_pass.desc().colour_attachments.len()];
        let colour_blend = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(&blend_attachments);

        let dynamic_states = [vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let mut pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&colour_blend)
            .dynamic_state(&dynamic_state)
            .layout(layout.layout)
            .render_pass(render_pass)
            .subpass(0);
        if tessellated {
            pipeline_info = pipeline_info.tessellation_state(&tessellation);
        }

        let pipeline = unsafe {
            ctx.device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
        }
        .map_err(|(_, e)| engine_err!("topaz::vulkan", "Failed to create graphics pipeline: {:?}", e))?[0];

        engine_debug!(
            "topaz::vulkan",
            "Graphics pipeline created: {} stages, {:?}, depth test {}",
            desc.stages.len(),
            desc.polygon_mode,
            desc.depth_test
        );

        Ok(Self {
            ctx: Arc::clone(ctx),
            pipeline,
            layout: layout.layout,
            bind_point: PipelineBindPoint::Graphics,
            _layout: Arc::clone(desc.layout),
        })
    }

    pub(crate) fn create_compute(ctx: &Arc<GpuContext>, desc: &ComputePipelineDesc) -> Result<Self> {
        let layout = vk_pipeline_layout(desc.layout)?;
        let module = ShaderModule::create(ctx, ShaderStage::Compute, desc.code, layout)?;

        let pipeline_info = vk::ComputePipelineCreateInfo::default()
            .stage(module.stage_info())
            .layout(layout.layout);

        let pipeline = unsafe {
            ctx.device
                .create_compute_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
        }
        .map_err(|(_, e)| engine_err!("topaz::vulkan", "Failed to create compute pipeline: {:?}", e))?[0];

        Ok(Self {
            ctx: Arc::clone(ctx),
            pipeline,
            layout: layout.layout,
            bind_point: PipelineBindPoint::Compute,
            _layout: Arc::clone(desc.layout),
        })
    }

    pub(crate) fn vk_bind_point(&self) -> vk::PipelineBindPoint {
        match self.bind_point {
            PipelineBindPoint::Graphics => vk::PipelineBindPoint::GRAPHICS,
            PipelineBindPoint::Compute => vk::PipelineBindPoint::COMPUTE,
        }
    }
}

impl DevicePipeline for Pipeline {
    fn bind_point(&self) -> PipelineBindPoint {
        self.bind_point
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.destroy_pipeline(self.pipeline, None);
        }
    }
}

pub(crate) fn vk_pipeline(pipeline: &Arc<dyn DevicePipeline>) -> Result<&Pipeline> {
    pipeline
        .as_any()
        .downcast_ref::<Pipeline>()
        .ok_or_else(|| engine_err!("topaz::vulkan", "Pipeline was not created by the Vulkan device"))
}
