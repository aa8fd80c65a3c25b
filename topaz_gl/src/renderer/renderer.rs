/// A renderer: one shader program, its resources and its output.
///
/// The renderer wires the resource store, descriptor sets, output targets,
/// pipeline and command buffers together. Work commands are recorded once
/// and replayed every frame; `edit()` and surface changes re-record only
/// what they invalidate.
///
/// # Example
///
/// ```ignore
/// let mut info = RendererInfo::new();
/// info.shader_mut()
///     .set_shader(ShaderStage::Vertex, vertex_spirv)
///     .set_shader(ShaderStage::Fragment, fragment_spirv);
/// let colour = info.add_resource(BufferResource::from_one(Vec4::ONE).with_access(ResourceAccess::DynamicFixed))?;
/// info.set_tri_count(1);
///
/// let mut renderer = Renderer::new(&mut ctx, info)?;
/// renderer.render(&mut ctx)?;
/// ```

use std::sync::{Arc, PoisonError};
use glam::UVec2;
use crate::device::{Buffer, GraphicsDevice, QueueType};
use crate::device_context::{DeviceContext, ReleaseQueue};
use crate::error::{Error, Result};
use crate::render_graph::RendererId;
use crate::renderer::command_processor::{
    record_work, CommandProcessor, DrawCommand, FrameOutcome, FrameTarget, PassRecording, TimelineSubmit, Work,
};
use crate::renderer::descriptor_manager::DescriptorManager;
use crate::renderer::output_manager::OutputManager;
use crate::renderer::pipeline_manager::PipelineManager;
use crate::renderer::resource_store::{descriptor_visible, ResourceStore};
use crate::renderer::staging::StagingBatch;
use crate::renderer::{
    ComponentRef, OutputTarget, ProgramKind, RenderConfig, RenderState, RendererEdit, RendererEditRequest,
    RendererInfo, RendererOptions, ResourceMut, ResourceRef,
};
use crate::resource::{ResourceFlags, ResourceHandle, ResourceType};
use crate::{engine_debug, engine_error, engine_info, engine_trace, engine_warn};

/// Surface recreations tried within one `render()` before giving up
pub(crate) const MAX_OUT_OF_DATE_RETRIES: usize = 4;

/// What a batch of edits invalidated
#[derive(Default)]
struct Invalidation {
    buffer_bindings: bool,
    all_bindings: bool,
    pipeline: bool,
    commands: bool,
}

pub struct Renderer {
    id: RendererId,
    name: String,
    options: RendererOptions,
    state: RenderState,
    store: ResourceStore,
    descriptors: DescriptorManager,
    /// None for compute renderers
    output: Option<OutputManager>,
    pipeline: PipelineManager,
    processor: CommandProcessor,
    device: Arc<dyn GraphicsDevice>,
    released: ReleaseQueue,
}

impl Renderer {
    /// Build a renderer from `info`
    ///
    /// # Errors
    ///
    /// Fails on an unsupported shader stage set, an invalid output, or any
    /// device object creation failure.
    pub fn new(ctx: &mut DeviceContext, info: RendererInfo) -> Result<Self> {
        let kind = info.validate()?;
        let name = info.name();
        let (shader, entries, output, options, state) = info.into_parts();
        let device = ctx.device.clone();
        let frames = ctx.frames_in_flight();

        let store = ResourceStore::new(device.as_ref(), entries, &name)?;
        let descriptors = DescriptorManager::new(device.as_ref(), &store, &state, frames)?;

        let output = match kind {
            ProgramKind::Compute => {
                if let OutputTarget::Image(_) = output.target {
                    engine_warn!("topaz::Renderer", "'{}' is a compute renderer, its image output is ignored", name);
                }
                None
            }
            ProgramKind::Graphics { .. } => {
                let depth = ctx.depth_image()?;
                Some(OutputManager::new(device.as_ref(), output, options, frames, depth.as_ref())?)
            }
        };

        let pipeline = PipelineManager::build(
            device.as_ref(),
            shader,
            kind,
            options,
            &descriptors,
            output.as_ref(),
            &state.graphics,
        )?;

        let (queue, work_buffers, surface_images) = match &output {
            None => (QueueType::Compute, frames, 0),
            Some(output) if output.targets_window() => {
                (QueueType::Graphics, output.targets().len(), device.surface_images().len())
            }
            Some(output) => (QueueType::Graphics, output.targets().len(), 0),
        };
        let processor = CommandProcessor::new(device.as_ref(), queue, work_buffers, frames, surface_images)?;

        let mut renderer = Self {
            id: ctx.register_renderer(),
            name,
            options,
            state,
            store,
            descriptors,
            output,
            pipeline,
            processor,
            device,
            released: ctx.release_queue(),
        };

        let mut uploads = StagingBatch::new();
        for component in renderer.store.owned_components() {
            uploads.push(component);
        }
        renderer.upload(&uploads)?;
        renderer.record_commands()?;

        engine_info!(
            "topaz::Renderer",
            "Created {} '{}' ({:?}, {} resources, {} work buffers)",
            renderer.id, renderer.name, kind, renderer.store.len(), renderer.processor.work_buffer_count()
        );
        Ok(renderer)
    }

    pub fn id(&self) -> RendererId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> RendererOptions {
        self.options
    }

    pub fn render_state(&self) -> &RenderState {
        &self.state
    }

    pub fn is_compute(&self) -> bool {
        self.pipeline.is_compute()
    }

    pub fn resource_count(&self) -> usize {
        self.store.len()
    }

    /// Read access to a resource
    ///
    /// For dynamic resources the bytes are the live GPU mapping.
    pub fn get_resource(&self, handle: ResourceHandle) -> Result<ResourceRef<'_>> {
        self.store.get_resource(handle)
    }

    /// Write access to a resource's bytes
    ///
    /// Writes to dynamic resources are seen by the next frame without an
    /// edit. Static resources need a `write` edit to reach the GPU. While the
    /// guard is alive, renderers sharing the component fail with
    /// `Error::InvalidResource` wherever they need its contents.
    pub fn get_resource_mut(&self, handle: ResourceHandle) -> Result<ResourceMut<'_>> {
        self.store.get_resource_mut(handle)
    }

    /// Shared handle to the component behind `handle`, for other renderers
    pub fn get_component(&self, handle: ResourceHandle) -> Result<ComponentRef> {
        self.store.component(handle).cloned()
    }

    // ===== RECORDING =====

    fn buffer_at(&self, handle: Option<ResourceHandle>) -> Result<Option<Arc<dyn Buffer>>> {
        let Some(handle) = handle else {
            return Ok(None);
        };
        let buffer = self.store.component(handle)?.read()?.buffer().cloned();
        Ok(buffer)
    }

    /// Re-record every work buffer against the current bindings and state
    fn record_commands(&mut self) -> Result<()> {
        let pipeline = self.pipeline.pipeline().clone();
        let sets = self.descriptors.sets().to_vec();
        let set_for = |index: usize| if sets.is_empty() { None } else { Some(&sets[index % sets.len()]) };

        let Some(output) = &self.output else {
            let kernel = self.state.compute.kernel;
            return self.processor.set_work_commands(|index, command_buffer| {
                record_work(command_buffer, &pipeline, set_for(index), &Work::Compute { kernel })
            });
        };

        let graphics = self.state.graphics;
        let index_buffer = self.buffer_at(graphics.index_buffer)?;
        let draw_buffer = self.buffer_at(graphics.draw_buffer)?;
        let indirect_count = self.options.contains(RendererOptions::DRAW_INDIRECT_COUNT);
        let render_pass = output.render_pass().clone();
        let framebuffers = output.framebuffers().to_vec();
        let scissor = output.scissor_rect();
        let colour_attachments = output.colour_attachment_count();
        let has_depth = output.has_depth();

        self.processor.set_work_commands(|index, command_buffer| {
            let Some(framebuffer) = framebuffers.get(index) else {
                return Err(Error::BackendError(format!("no framebuffer for work buffer {}", index)));
            };
            let pass = PassRecording {
                render_pass: &render_pass,
                framebuffer,
                clear_colour: graphics.clear_colour,
                colour_attachments,
                has_depth,
                scissor,
                draw: DrawCommand::select(index_buffer.as_ref(), draw_buffer.as_ref(), indirect_count, graphics.tri_count),
            };
            record_work(command_buffer, &pipeline, set_for(index), &Work::Graphics(pass))
        })
    }

    /// Copy static component data to the GPU through the scratch buffer
    fn upload(&mut self, uploads: &StagingBatch) -> Result<()> {
        if uploads.is_empty() {
            return Ok(());
        }
        let device = self.device.clone();
        // Staging buffers must outlive the (synchronous) submission
        let _staging = self.processor.do_scratch(device.as_ref(), |command_buffer| {
            uploads.record(device.as_ref(), command_buffer)
        })?;
        engine_debug!("topaz::Renderer", "'{}' uploaded {} static resources", self.name, uploads.len());
        Ok(())
    }

    // ===== FRAME =====

    fn minimised(&self) -> bool {
        let targets_window = self.output.as_ref().is_some_and(|o| o.targets_window());
        let dimensions = self.device.surface_dimensions();
        targets_window && (dimensions.x == 0 || dimensions.y == 0)
    }

    /// Catch up with components recreated elsewhere and with surface changes
    fn refresh(&mut self, ctx: &mut DeviceContext) -> Result<()> {
        let output_stale = self.output.as_ref().is_some_and(|o| o.is_stale(self.device.as_ref()));
        let stale = self.store.stale_handles();
        if !stale.is_empty() {
            engine_debug!("topaz::Renderer", "'{}' rebinding recreated resources {:?}", self.name, stale);
            self.processor.wait_all()?;
            let images = stale.iter().any(|handle| {
                self.store.component(*handle).is_ok_and(|c| c.resource_type() == ResourceType::Image)
            });
            self.descriptors.sync(self.device.as_ref(), &self.store, &self.state, images)?;
            if !output_stale {
                self.record_commands()?;
            }
            self.store.mark_synced();
        }
        if output_stale {
            self.handle_resize(ctx)?;
        }
        Ok(())
    }

    /// Rebuild everything that depends on the output size
    fn handle_resize(&mut self, ctx: &mut DeviceContext) -> Result<()> {
        if self.output.is_none() || self.minimised() {
            return Ok(());
        }
        self.processor.wait_all()?;
        let device = self.device.clone();
        let targets_window = self.output.as_ref().is_some_and(|o| o.targets_window());

        if targets_window {
            let dimensions = device.surface_dimensions();
            let mut uploads = StagingBatch::new();
            let mut resized = false;
            for component in self.store.owned_components() {
                let output_image = component.resource_type() == ResourceType::Image
                    && component.flags().contains(ResourceFlags::RENDERER_OUTPUT);
                if output_image && ResourceStore::resize_image_component(device.as_ref(), component, dimensions)? {
                    uploads.push(component);
                    resized = true;
                }
            }
            if resized {
                self.descriptors.sync(device.as_ref(), &self.store, &self.state, true)?;
                self.upload(&uploads)?;
            }
        }

        let depth = ctx.depth_image()?;
        let surface_images = if targets_window { device.surface_images().len() } else { 0 };
        if let Some(output) = self.output.as_mut() {
            output.on_resize(device.as_ref(), depth.as_ref())?;
            self.processor.reset_surface(device.as_ref(), surface_images)?;
            self.processor.ensure_work_buffers(device.as_ref(), output.targets().len())?;
            self.pipeline.recreate(device.as_ref(), Some(&*output), &self.state.graphics)?;
        }
        self.record_commands()?;
        self.store.mark_synced();

        let dimensions = self.output.as_ref().map_or(UVec2::ZERO, |o| o.dimensions());
        engine_info!("topaz::Renderer", "'{}' resized to {}x{}", self.name, dimensions.x, dimensions.y);
        Ok(())
    }

    /// Submit one frame with the current draw count
    ///
    /// A window that is minimised renders nothing; its timeline value is
    /// still signalled so dependants do not stall.
    pub fn render(&mut self, ctx: &mut DeviceContext) -> Result<()> {
        ctx.collect_released();
        if self.minimised() {
            engine_trace!("topaz::Renderer", "'{}' skipped, window is minimised", self.name);
            return ctx.scheduler.skip(&ctx.graph, self.id);
        }
        self.refresh(ctx)?;

        let plan = ctx.scheduler.plan(&ctx.graph, self.id)?;
        let targets_window = self.output.as_ref().is_some_and(|o| o.targets_window());
        let present = !self.options.contains(RendererOptions::NO_PRESENT);
        let render_wait = self.options.contains(RendererOptions::RENDER_WAIT);

        for attempt in 0..=MAX_OUT_OF_DATE_RETRIES {
            let target = if targets_window {
                FrameTarget::Window { pending: &mut ctx.pending_acquire, present }
            } else {
                FrameTarget::Slot
            };
            let timeline = plan.as_ref().map(|plan| TimelineSubmit {
                semaphore: ctx.scheduler.semaphore(),
                waits: &plan.waits,
                signal: plan.signal,
            });

            match self.processor.submit_frame(self.device.as_ref(), target, timeline, render_wait)? {
                FrameOutcome::Submitted | FrameOutcome::Presented => {
                    if let Some(plan) = &plan {
                        ctx.scheduler.commit(plan);
                    }
                    return Ok(());
                }
                FrameOutcome::PresentOutOfDate => {
                    if let Some(plan) = &plan {
                        ctx.scheduler.commit(plan);
                    }
                    ctx.recreate_surface()?;
                    return self.handle_resize(ctx);
                }
                FrameOutcome::AcquireOutOfDate => {
                    engine_warn!(
                        "topaz::Renderer",
                        "'{}' surface out of date, recreating (attempt {}/{})",
                        self.name, attempt + 1, MAX_OUT_OF_DATE_RETRIES + 1
                    );
                    ctx.recreate_surface()?;
                    self.handle_resize(ctx)?;
                    if self.minimised() {
                        return ctx.scheduler.skip(&ctx.graph, self.id);
                    }
                }
            }
        }
        engine_error!(
            "topaz::Renderer",
            "'{}' could not acquire a surface image after {} surface recreations",
            self.name, MAX_OUT_OF_DATE_RETRIES
        );
        Err(Error::OutOfDate)
    }

    /// Submit one frame drawing `tri_count` triangles
    ///
    /// The count sticks for later `render()` calls.
    pub fn render_tris(&mut self, ctx: &mut DeviceContext, tri_count: u32) -> Result<()> {
        if !self.is_compute() && self.state.graphics.tri_count != tri_count {
            self.processor.wait_all()?;
            self.state.graphics.tri_count = tri_count;
            self.record_commands()?;
        }
        self.render(ctx)
    }

    // ===== EDIT =====

    /// Apply a batch of edits
    ///
    /// The whole batch is checked before anything changes: an invalid edit
    /// anywhere fails the call and leaves the renderer untouched. A valid
    /// batch drains every in-flight frame of this renderer once. An empty
    /// request does nothing at all.
    pub fn edit(&mut self, ctx: &mut DeviceContext, request: RendererEditRequest) -> Result<()> {
        if request.is_empty() {
            return Ok(());
        }
        self.store.validate_edits(&request.edits)?;
        self.processor.wait_all()?;
        let mut invalid = Invalidation::default();
        let mut uploads = StagingBatch::new();

        let applied = self.apply_edits(request.edits, &mut invalid, &mut uploads);
        // Whatever was applied before a device failure still has to reach the GPU
        let finished = self.finish_edit(ctx, &mut invalid, &uploads);
        applied.and(finished)
    }

    fn apply_edits(&mut self, edits: Vec<RendererEdit>, invalid: &mut Invalidation, uploads: &mut StagingBatch) -> Result<()> {
        let device = self.device.clone();
        for edit in edits {
            match edit {
                RendererEdit::BufferResize { handle, size } => {
                    if self.store.buffer_resize(device.as_ref(), handle, size)? {
                        self.invalidate_buffer(handle, invalid);
                    }
                }
                RendererEdit::ImageResize { handle, dimensions } => {
                    if self.store.image_resize(device.as_ref(), handle, dimensions)? {
                        invalid.all_bindings = true;
                        invalid.commands = true;
                    }
                }
                RendererEdit::ResourceWrite { handle, offset, data } => {
                    if self.store.write(handle, offset, &data)? {
                        uploads.push(self.store.component(handle)?);
                    } else {
                        engine_debug!(
                            "topaz::Renderer",
                            "'{}': {} is dynamic, writing through get_resource_mut() avoids the edit",
                            self.name, handle
                        );
                    }
                }
                RendererEdit::ComputeConfig { kernel } => {
                    if self.is_compute() {
                        if self.state.compute.kernel != kernel {
                            self.state.compute.kernel = kernel;
                            invalid.commands = true;
                        }
                    } else {
                        engine_warn!("topaz::Renderer", "'{}' is a graphics renderer, compute config ignored", self.name);
                    }
                }
                RendererEdit::RenderConfig(config) => {
                    if self.is_compute() {
                        engine_warn!("topaz::Renderer", "'{}' is a compute renderer, render config ignored", self.name);
                    } else {
                        self.apply_render_config(config, invalid);
                    }
                }
                RendererEdit::ResourceReference { handle, component } => match self.store.reseat(handle, component)? {
                    ResourceType::Buffer => self.invalidate_buffer(handle, invalid),
                    ResourceType::Image => {
                        invalid.all_bindings = true;
                        invalid.commands = true;
                    }
                },
                RendererEdit::Scissor { region } => match self.output.as_mut() {
                    Some(output) => {
                        output.set_scissor(region);
                        invalid.commands = true;
                    }
                    None => engine_warn!("topaz::Renderer", "'{}' has no output, scissor ignored", self.name),
                },
            }
        }
        Ok(())
    }

    /// Rebind, rebuild and upload whatever the applied edits invalidated
    fn finish_edit(&mut self, ctx: &mut DeviceContext, invalid: &mut Invalidation, uploads: &StagingBatch) -> Result<()> {
        let device = self.device.clone();
        // Components recreated by other renderers since the last sync
        for handle in self.store.stale_handles() {
            match self.store.component(handle)?.resource_type() {
                ResourceType::Buffer => self.invalidate_buffer(handle, invalid),
                ResourceType::Image => {
                    invalid.all_bindings = true;
                    invalid.commands = true;
                }
            }
        }

        if invalid.all_bindings || invalid.buffer_bindings {
            self.descriptors.sync(device.as_ref(), &self.store, &self.state, invalid.all_bindings)?;
        }
        let output_stale = self.output.as_ref().is_some_and(|o| o.is_stale(device.as_ref()));
        if output_stale {
            // Rebuilds the pipeline and re-records too
            self.handle_resize(ctx)?;
        } else {
            if invalid.pipeline {
                self.pipeline.recreate(device.as_ref(), self.output.as_ref(), &self.state.graphics)?;
            }
            if invalid.commands {
                self.record_commands()?;
            }
        }
        self.store.mark_synced();
        self.upload(uploads)
    }

    /// Index and draw buffers are baked into the commands, the rest into descriptors
    fn invalidate_buffer(&self, handle: ResourceHandle, invalid: &mut Invalidation) {
        if descriptor_visible(handle, &self.state) {
            invalid.buffer_bindings = true;
        } else {
            invalid.commands = true;
        }
    }

    fn apply_render_config(&mut self, config: RenderConfig, invalid: &mut Invalidation) {
        let graphics = &mut self.state.graphics;
        if let Some(wireframe) = config.wireframe.filter(|w| *w != graphics.wireframe) {
            graphics.wireframe = wireframe;
            invalid.pipeline = true;
            invalid.commands = true;
        }
        if let Some(culling) = config.culling.filter(|c| *c != graphics.culling) {
            graphics.culling = culling;
            invalid.pipeline = true;
            invalid.commands = true;
        }
        if let Some(colour) = config.clear_colour.filter(|c| *c != graphics.clear_colour) {
            graphics.clear_colour = colour;
            invalid.commands = true;
        }
        if let Some(tri_count) = config.tri_count.filter(|n| *n != graphics.tri_count) {
            graphics.tri_count = tri_count;
            invalid.commands = true;
        }
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        // Owned components may still be bound in other renderers' frames
        if let Err(err) = self.device.wait_idle() {
            engine_error!("topaz::Renderer", "'{}' dropped without a device-idle wait: {}", self.name, err);
        }
        if let Err(err) = self.processor.wait_all() {
            engine_error!("topaz::Renderer", "'{}' dropped with frames in flight: {}", self.name, err);
        }
        self.released.lock().unwrap_or_else(PoisonError::into_inner).push(self.id);
        engine_debug!("topaz::Renderer", "Destroyed {} '{}'", self.id, self.name);
    }
}

#[cfg(test)]
#[path = "renderer_tests.rs"]
mod tests;
