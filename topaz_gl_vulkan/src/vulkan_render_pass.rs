/// RenderPass and Framebuffer - Vulkan implementations
///
/// Render passes always have a single subpass using every colour attachment
/// and the optional depth attachment.

use ash::vk;
use glam::UVec2;
use std::any::Any;
use std::sync::Arc;
use topaz_gl::device::{
    Framebuffer as DeviceFramebuffer, FramebufferDesc, Image as DeviceImage, RenderPass as DeviceRenderPass,
    RenderPassDesc,
};
use topaz_gl::topaz::{Error, Result};
use topaz_gl::engine_err;

use crate::vulkan_context::GpuContext;
use crate::vulkan_format::attachment_to_vk;
use crate::vulkan_image::vk_image;

pub struct RenderPass {
    ctx: Arc<GpuContext>,
    pub(crate) render_pass: vk::RenderPass,
    desc: RenderPassDesc,
}

impl RenderPass {
    pub(crate) fn create(ctx: &Arc<GpuContext>, desc: &RenderPassDesc) -> Result<Self> {
        let mut attachments: Vec<vk::AttachmentDescription> =
            desc.colour_attachments.iter().map(attachment_to_vk).collect();

        let colour_refs: Vec<vk::AttachmentReference> = (0..desc.colour_attachments.len() as u32)
            .map(|index| vk::AttachmentReference {
                attachment: index,
                layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            })
            .collect();

        let depth_ref = desc.depth_attachment.as_ref().map(|depth| {
            attachments.push(attachment_to_vk(depth));
            vk::AttachmentReference {
                attachment: colour_refs.len() as u32,
                layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            }
        });

        let mut subpass = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&colour_refs);
        if let Some(depth_ref) = depth_ref.as_ref() {
            subpass = subpass.depth_stencil_attachment(depth_ref);
        }

        let attachment_stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
            | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
        let attachment_writes =
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE;
        let shader_stages = vk::PipelineStageFlags::VERTEX_SHADER
            | vk::PipelineStageFlags::FRAGMENT_SHADER
            | vk::PipelineStageFlags::COMPUTE_SHADER;

        // Outputs may have been sampled before the pass and are sampled after it
        let dependencies = [
            vk::SubpassDependency::default()
                .src_subpass(vk::SUBPASS_EXTERNAL)
                .dst_subpass(0)
                .src_stage_mask(attachment_stages | shader_stages)
                .src_access_mask(vk::AccessFlags::empty())
                .dst_stage_mask(attachment_stages)
                .dst_access_mask(
                    attachment_writes
                        | vk::AccessFlags::COLOR_ATTACHMENT_READ
                        | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ,
                ),
            vk::SubpassDependency::default()
                .src_subpass(0)
                .dst_subpass(vk::SUBPASS_EXTERNAL)
                .src_stage_mask(attachment_stages)
                .src_access_mask(attachment_writes)
                .dst_stage_mask(shader_stages)
                .dst_access_mask(vk::AccessFlags::SHADER_READ),
        ];

        let render_pass_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(std::slice::from_ref(&subpass))
            .dependencies(&dependencies);

        let render_pass = unsafe { ctx.device.create_render_pass(&render_pass_info, None) }
            .map_err(|e| engine_err!("topaz::vulkan", "Failed to create render pass: {:?}", e))?;

        Ok(Self {
            ctx: Arc::clone(ctx),
            render_pass,
            desc: desc.clone(),
        })
    }
}

impl DeviceRenderPass for RenderPass {
    fn desc(&self) -> &RenderPassDesc {
        &self.desc
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.destroy_render_pass(self.render_pass, None);
        }
    }
}

pub(crate) fn vk_render_pass(render_pass: &Arc<dyn DeviceRenderPass>) -> Result<vk::RenderPass> {
    render_pass
        .as_any()
        .downcast_ref::<RenderPass>()
        .map(|rp| rp.render_pass)
        .ok_or_else(|| engine_err!("topaz::vulkan", "Render pass was not created by the Vulkan device"))
}

/// Vulkan framebuffer
///
/// Holds its attachments so their views outlive the framebuffer.
pub struct Framebuffer {
    ctx: Arc<GpuContext>,
    pub(crate) framebuffer: vk::Framebuffer,
    dimensions: UVec2,
    _attachments: Vec<Arc<dyn DeviceImage>>,
}

impl Framebuffer {
    pub(crate) fn create(ctx: &Arc<GpuContext>, desc: &FramebufferDesc) -> Result<Self> {
        let mut attachments: Vec<Arc<dyn DeviceImage>> = desc.colour_attachments.to_vec();
        if let Some(depth) = desc.depth_attachment {
            attachments.push(Arc::clone(depth));
        }

        for attachment in &attachments {
            let size = attachment.dimensions();
            if size.x < desc.dimensions.x || size.y < desc.dimensions.y {
                return Err(Error::InvalidResource(format!(
                    "Framebuffer attachment {}x{} is smaller than the framebuffer {}x{}",
                    size.x, size.y, desc.dimensions.x, desc.dimensions.y
                )));
            }
        }

        let views = attachments
            .iter()
            .map(|image| vk_image(image).map(|image| image.view))
            .collect::<Result<Vec<_>>>()?;

        let framebuffer_info = vk::FramebufferCreateInfo::default()
            .render_pass(vk_render_pass(desc.render_pass)?)
            .attachments(&views)
            .width(desc.dimensions.x)
            .height(desc.dimensions.y)
            .layers(1);

        let framebuffer = unsafe { ctx.device.create_framebuffer(&framebuffer_info, None) }
            .map_err(|e| engine_err!("topaz::vulkan", "Failed to create framebuffer: {:?}", e))?;

        Ok(Self {
            ctx: Arc::clone(ctx),
            framebuffer,
            dimensions: desc.dimensions,
            _attachments: attachments,
        })
    }
}

impl DeviceFramebuffer for Framebuffer {
    fn dimensions(&self) -> UVec2 {
        self.dimensions
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.destroy_framebuffer(self.framebuffer, None);
        }
    }
}

pub(crate) fn vk_framebuffer(framebuffer: &Arc<dyn DeviceFramebuffer>) -> Result<&Framebuffer> {
    framebuffer
        .as_any()
        .downcast_ref::<Framebuffer>()
        .ok_or_else(|| engine_err!("topaz::vulkan", "Framebuffer was not created by the Vulkan device"))
}
