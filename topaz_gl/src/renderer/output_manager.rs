/// Render targets, render pass and framebuffers of a graphics renderer.
///
/// Window output renders into the device's presentable images; image output
/// renders into `RENDERER_OUTPUT` components, repeated once per frame in
/// flight. Either way there is one target (and one framebuffer) per frame
/// slot.

use std::sync::Arc;
use glam::UVec2;
use crate::device::{
    AttachmentDesc, Framebuffer, FramebufferDesc, GraphicsDevice, Image, ImageFormat, ImageLayout, LoadOp, Rect2D,
    RenderPass, RenderPassDesc, StoreOp, Viewport,
};
use crate::error::{Error, Result};
use crate::renderer::{ComponentRef, ImageOutput, OutputTarget, RendererOptions, RendererOutput, ScissorRegion};
use crate::resource::ResourceFlags;
use crate::{engine_debug, engine_error, engine_warn};

/// Attachments of one frame slot
#[derive(Clone)]
pub(crate) struct RenderTarget {
    pub colours: Vec<Arc<dyn Image>>,
    pub depth: Option<Arc<dyn Image>>,
    pub dimensions: UVec2,
}

pub(crate) struct OutputManager {
    output: RendererOutput,
    options: RendererOptions,
    targets: Vec<RenderTarget>,
    render_pass: Arc<dyn RenderPass>,
    framebuffers: Vec<Arc<dyn Framebuffer>>,
    /// Surface generation the window targets were resolved against
    surface_generation: u64,
    /// Generations of the output components the targets were resolved against
    component_generations: Vec<u64>,
}

impl OutputManager {
    pub fn new(
        device: &dyn GraphicsDevice,
        output: RendererOutput,
        options: RendererOptions,
        frames_in_flight: usize,
        device_depth: Option<&Arc<dyn Image>>,
    ) -> Result<Self> {
        if let OutputTarget::Image(image_output) = &output.target {
            Self::validate_image_output(image_output)?;
        }
        let targets = Self::resolve_targets(device, &output, options, frames_in_flight, device_depth)?;
        let render_pass = Self::render_pass_for(device, &output, options, &targets)?;
        let framebuffers = Self::create_framebuffers(device, &render_pass, &targets)?;
        let component_generations = Self::output_generations(&output);
        Ok(Self {
            output,
            options,
            targets,
            render_pass,
            framebuffers,
            surface_generation: device.surface_generation(),
            component_generations,
        })
    }

    fn validate_image_output(output: &ImageOutput) -> Result<()> {
        let Some(first) = output.colours.first() else {
            engine_error!("topaz::OutputManager", "Image output has no colour attachments");
            return Err(Error::InvalidConfiguration("image output needs at least one colour image".to_string()));
        };
        let format = first.read()?.resource().format();

        for colour in &output.colours {
            let component = colour.read()?;
            let resource = component.resource();
            let Some(colour_format) = resource.format() else {
                engine_error!("topaz::OutputManager", "Output '{}' is a buffer", component.name());
                return Err(Error::InvalidConfiguration(format!("output '{}' is not an image", component.name())));
            };
            if !resource.flags().contains(ResourceFlags::RENDERER_OUTPUT) {
                engine_error!("topaz::OutputManager", "Output image '{}' lacks RENDERER_OUTPUT", component.name());
                return Err(Error::InvalidConfiguration(format!(
                    "output image '{}' is not flagged RENDERER_OUTPUT",
                    component.name()
                )));
            }
            if !colour_format.is_colour_renderable() {
                engine_error!("topaz::OutputManager", "Output image '{}' has depth format", component.name());
                return Err(Error::InvalidConfiguration(format!(
                    "colour output '{}' has format {:?}",
                    component.name(),
                    colour_format
                )));
            }
            if Some(colour_format) != format {
                engine_error!(
                    "topaz::OutputManager",
                    "Output format mismatch: '{}' is {:?}, expected {:?}",
                    component.name(), colour_format, format
                );
                return Err(Error::InvalidConfiguration("output images must share one format".to_string()));
            }
        }

        if let Some(depth) = &output.depth {
            let component = depth.read()?;
            let is_depth = component.resource().format().is_some_and(|f| f.is_depth());
            if !is_depth || !component.resource().flags().contains(ResourceFlags::RENDERER_OUTPUT) {
                engine_error!("topaz::OutputManager", "Depth output '{}' is not a depth RENDERER_OUTPUT image", component.name());
                return Err(Error::InvalidConfiguration(format!(
                    "depth output '{}' must be a RENDERER_OUTPUT depth image",
                    component.name()
                )));
            }
        }
        Ok(())
    }

    fn output_components(output: &RendererOutput) -> Vec<&ComponentRef> {
        match &output.target {
            OutputTarget::Window => Vec::new(),
            OutputTarget::Image(image_output) => {
                image_output.colours.iter().chain(image_output.depth.iter()).collect()
            }
        }
    }

    fn output_generations(output: &RendererOutput) -> Vec<u64> {
        Self::output_components(output).iter().map(|c| c.generation()).collect()
    }

    /// One target per frame slot
    pub fn resolve_targets(
        device: &dyn GraphicsDevice,
        output: &RendererOutput,
        options: RendererOptions,
        frames_in_flight: usize,
        device_depth: Option<&Arc<dyn Image>>,
    ) -> Result<Vec<RenderTarget>> {
        let shared_depth = |dimensions: UVec2| -> Option<Arc<dyn Image>> {
            if options.contains(RendererOptions::NO_DEPTH_TESTING) {
                return None;
            }
            let depth = device_depth?;
            let depth_dimensions = depth.dimensions();
            if depth_dimensions.x < dimensions.x || depth_dimensions.y < dimensions.y {
                engine_warn!(
                    "topaz::OutputManager",
                    "Device depth image ({}x{}) is smaller than the target ({}x{}); rendering without depth",
                    depth_dimensions.x, depth_dimensions.y, dimensions.x, dimensions.y
                );
                return None;
            }
            Some(depth.clone())
        };

        match &output.target {
            OutputTarget::Window => Ok(device
                .surface_images()
                .into_iter()
                .map(|image| {
                    let dimensions = image.dimensions();
                    RenderTarget { colours: vec![image], depth: shared_depth(dimensions), dimensions }
                })
                .collect()),
            OutputTarget::Image(image_output) => {
                let mut colours = Vec::with_capacity(image_output.colours.len());
                for colour in &image_output.colours {
                    let image = colour.read()?.image().cloned();
                    match image {
                        Some(image) => colours.push(image),
                        None => return Err(Error::InvalidConfiguration("output component is a buffer".to_string())),
                    }
                }
                let dimensions = colours.first().map_or(UVec2::ZERO, |image| image.dimensions());
                let depth = if options.contains(RendererOptions::NO_DEPTH_TESTING) {
                    None
                } else {
                    match &image_output.depth {
                        Some(depth) => depth.read()?.image().cloned(),
                        None => shared_depth(dimensions),
                    }
                };
                let target = RenderTarget { colours, depth, dimensions };
                Ok(vec![target; frames_in_flight])
            }
        }
    }

    /// Render pass matching `targets` and the clear/load policy of `options`
    pub fn render_pass_for(
        device: &dyn GraphicsDevice,
        output: &RendererOutput,
        options: RendererOptions,
        targets: &[RenderTarget],
    ) -> Result<Arc<dyn RenderPass>> {
        let Some(first) = targets.first() else {
            engine_error!("topaz::OutputManager", "No render targets to derive a render pass from");
            return Err(Error::InvalidConfiguration("renderer output resolved to no targets".to_string()));
        };
        let clear = !options.contains(RendererOptions::NO_CLEAR_OUTPUT);
        let load_op = if clear { LoadOp::Clear } else { LoadOp::Load };
        let window = output.targets_window();
        let colour_layout = if window { ImageLayout::Present } else { ImageLayout::ShaderReadOnly };

        let colour_attachments = first
            .colours
            .iter()
            .map(|image| AttachmentDesc {
                format: image.format(),
                load_op,
                store_op: StoreOp::Store,
                initial_layout: if clear { ImageLayout::Undefined } else { colour_layout },
                final_layout: colour_layout,
            })
            .collect();

        let owned_depth = matches!(&output.target, OutputTarget::Image(image) if image.depth.is_some());
        let depth_attachment = first.depth.as_ref().map(|depth| {
            // A depth output component is sampled afterwards like any image
            let (resting, store_op) = if owned_depth {
                (ImageLayout::ShaderReadOnly, StoreOp::Store)
            } else if options.contains(RendererOptions::NO_PRESENT) {
                (ImageLayout::DepthAttachment, StoreOp::Store)
            } else {
                (ImageLayout::DepthAttachment, StoreOp::DontCare)
            };
            AttachmentDesc {
                format: depth.format(),
                load_op,
                store_op,
                initial_layout: if clear { ImageLayout::Undefined } else { resting },
                final_layout: resting,
            }
        });

        device.create_render_pass(&RenderPassDesc { colour_attachments, depth_attachment })
    }

    fn create_framebuffers(
        device: &dyn GraphicsDevice,
        render_pass: &Arc<dyn RenderPass>,
        targets: &[RenderTarget],
    ) -> Result<Vec<Arc<dyn Framebuffer>>> {
        targets
            .iter()
            .map(|target| {
                device.create_framebuffer(&FramebufferDesc {
                    render_pass,
                    colour_attachments: &target.colours,
                    depth_attachment: target.depth.as_ref(),
                    dimensions: target.dimensions,
                })
            })
            .collect()
    }

    /// Rebuild targets, render pass and framebuffers
    pub fn on_resize(&mut self, device: &dyn GraphicsDevice, device_depth: Option<&Arc<dyn Image>>) -> Result<()> {
        let frames = self.framebuffers.len().max(1);
        self.targets = Self::resolve_targets(device, &self.output, self.options, frames, device_depth)?;
        self.render_pass = Self::render_pass_for(device, &self.output, self.options, &self.targets)?;
        self.framebuffers = Self::create_framebuffers(device, &self.render_pass, &self.targets)?;
        self.surface_generation = device.surface_generation();
        self.component_generations = Self::output_generations(&self.output);
        engine_debug!(
            "topaz::OutputManager",
            "Resolved {} targets at {}x{}",
            self.targets.len(), self.dimensions().x, self.dimensions().y
        );
        Ok(())
    }

    /// Whether the targets no longer match the surface or output images
    pub fn is_stale(&self, device: &dyn GraphicsDevice) -> bool {
        if self.output.targets_window() && device.surface_generation() != self.surface_generation {
            return true;
        }
        Self::output_generations(&self.output) != self.component_generations
    }

    pub fn targets_window(&self) -> bool {
        self.output.targets_window()
    }

    pub fn targets(&self) -> &[RenderTarget] {
        &self.targets
    }

    pub fn render_pass(&self) -> &Arc<dyn RenderPass> {
        &self.render_pass
    }

    pub fn framebuffers(&self) -> &[Arc<dyn Framebuffer>] {
        &self.framebuffers
    }

    pub fn has_depth(&self) -> bool {
        self.render_pass.desc().depth_attachment.is_some()
    }

    pub fn colour_format(&self) -> Option<ImageFormat> {
        self.render_pass.desc().colour_attachments.first().map(|a| a.format)
    }

    pub fn colour_attachment_count(&self) -> usize {
        self.render_pass.desc().colour_attachments.len()
    }

    pub fn dimensions(&self) -> UVec2 {
        self.targets.first().map_or(UVec2::ZERO, |t| t.dimensions)
    }

    pub fn viewport(&self) -> Viewport {
        let dimensions = self.dimensions();
        Viewport {
            x: 0.0,
            y: 0.0,
            width: dimensions.x as f32,
            height: dimensions.y as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }

    /// Requested scissor, or the full target extent
    pub fn scissor_rect(&self) -> Rect2D {
        match self.output.scissor {
            Some(region) => region.to_rect(),
            None => {
                let dimensions = self.dimensions();
                Rect2D { x: 0, y: 0, width: dimensions.x, height: dimensions.y }
            }
        }
    }

    pub fn set_scissor(&mut self, region: Option<ScissorRegion>) {
        self.output.scissor = region;
    }
}

#[cfg(test)]
#[path = "output_manager_tests.rs"]
mod tests;
