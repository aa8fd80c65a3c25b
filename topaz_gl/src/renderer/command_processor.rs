/// Command buffers, frame slots and submission of a renderer.
///
/// Work command buffers are recorded once per target and re-recorded only
/// when bindings, pipeline or draw parameters change. Every submission goes
/// through a frame slot guarded by a fence; window renderers additionally
/// acquire and present surface images.

use std::sync::Arc;
use glam::{UVec3, Vec4};
use crate::device::{
    AcquireResult, Buffer, ClearValue, CommandBuffer, CommandPool, DescriptorSet, Fence, Framebuffer,
    GraphicsDevice, Pipeline, PresentResult, QueueType, Rect2D, RenderPass, Semaphore, SemaphoreSubmit, SubmitInfo,
    DRAW_INDEXED_INDIRECT_STRIDE, DRAW_INDIRECT_STRIDE,
};
use crate::error::{Error, Result};
use crate::{engine_debug, engine_error, engine_trace, engine_warn};

/// Command pools tried before an allocation failure is fatal
pub(crate) const MAX_COMMAND_POOL_ATTEMPTS: usize = 4;

/// Surface image acquired by one renderer and left for the next one
///
/// `wait` is the acquire semaphore if no submission has waited on it yet.
pub(crate) struct PendingAcquire {
    pub image_index: u32,
    pub wait: Option<Arc<dyn Semaphore>>,
    pub surface_generation: u64,
}

/// How a frame picks its command buffer
pub(crate) enum FrameTarget<'a> {
    /// Offscreen or compute work: one command buffer per frame slot
    Slot,
    /// Window work: one command buffer per surface image
    Window {
        pending: &'a mut Option<PendingAcquire>,
        present: bool,
    },
}

/// Timeline semaphore operations of one submission
pub(crate) struct TimelineSubmit<'a> {
    pub semaphore: &'a Arc<dyn Semaphore>,
    pub waits: &'a [u64],
    pub signal: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FrameOutcome {
    Submitted,
    Presented,
    /// Submitted, but presentation reported the surface out of date
    PresentOutOfDate,
    /// Nothing was submitted; the surface must be recreated first
    AcquireOutOfDate,
}

// ============================================================================
// Work Recording
// ============================================================================

/// The single draw a graphics renderer records
pub(crate) enum DrawCommand<'a> {
    Triangles { vertex_count: u32 },
    Indexed { index_buffer: &'a Arc<dyn Buffer>, index_count: u32 },
    Indirect { draw_buffer: &'a Arc<dyn Buffer> },
    IndirectCount { draw_buffer: &'a Arc<dyn Buffer> },
    IndexedIndirect { index_buffer: &'a Arc<dyn Buffer>, draw_buffer: &'a Arc<dyn Buffer> },
}

impl<'a> DrawCommand<'a> {
    /// Pick the draw from the bound buffers and options
    ///
    /// An index buffer always selects an indexed draw. Indexed indirect
    /// draws with a count are rejected before a renderer is built.
    pub fn select(
        index_buffer: Option<&'a Arc<dyn Buffer>>,
        draw_buffer: Option<&'a Arc<dyn Buffer>>,
        indirect_count: bool,
        tri_count: u32,
    ) -> Self {
        match (index_buffer, draw_buffer) {
            (None, None) => DrawCommand::Triangles { vertex_count: 3 * tri_count },
            (None, Some(draw_buffer)) if indirect_count => DrawCommand::IndirectCount { draw_buffer },
            (None, Some(draw_buffer)) => DrawCommand::Indirect { draw_buffer },
            (Some(index_buffer), None) => DrawCommand::Indexed { index_buffer, index_count: 3 * tri_count },
            (Some(index_buffer), Some(draw_buffer)) => DrawCommand::IndexedIndirect { index_buffer, draw_buffer },
        }
    }

    fn record(&self, command_buffer: &mut dyn CommandBuffer) -> Result<()> {
        match self {
            DrawCommand::Triangles { vertex_count } => command_buffer.draw(*vertex_count),
            DrawCommand::Indexed { index_buffer, index_count } => {
                command_buffer.bind_index_buffer(index_buffer)?;
                command_buffer.draw_indexed(*index_count)
            }
            DrawCommand::Indirect { draw_buffer } => {
                let draw_count = (draw_buffer.size() / DRAW_INDIRECT_STRIDE as u64) as u32;
                command_buffer.draw_indirect(draw_buffer, 0, draw_count, DRAW_INDIRECT_STRIDE)
            }
            DrawCommand::IndirectCount { draw_buffer } => {
                // u32 count first, commands after it
                let max_draw_count = (draw_buffer.size().saturating_sub(4) / DRAW_INDIRECT_STRIDE as u64) as u32;
                command_buffer.draw_indirect_count(draw_buffer, 4, draw_buffer, 0, max_draw_count, DRAW_INDIRECT_STRIDE)
            }
            DrawCommand::IndexedIndirect { index_buffer, draw_buffer } => {
                command_buffer.bind_index_buffer(index_buffer)?;
                let draw_count = (draw_buffer.size() / DRAW_INDEXED_INDIRECT_STRIDE as u64) as u32;
                command_buffer.draw_indexed_indirect(draw_buffer, 0, draw_count, DRAW_INDEXED_INDIRECT_STRIDE)
            }
        }
    }
}

/// Render pass inputs of one graphics work buffer
pub(crate) struct PassRecording<'a> {
    pub render_pass: &'a Arc<dyn RenderPass>,
    pub framebuffer: &'a Arc<dyn Framebuffer>,
    pub clear_colour: Vec4,
    pub colour_attachments: usize,
    pub has_depth: bool,
    pub scissor: Rect2D,
    pub draw: DrawCommand<'a>,
}

pub(crate) enum Work<'a> {
    Graphics(PassRecording<'a>),
    Compute { kernel: UVec3 },
}

/// Record one work buffer: pipeline, descriptor set (if any), then the
/// draw or dispatch
pub(crate) fn record_work(
    command_buffer: &mut dyn CommandBuffer,
    pipeline: &Arc<dyn Pipeline>,
    descriptor_set: Option<&Arc<dyn DescriptorSet>>,
    work: &Work<'_>,
) -> Result<()> {
    match work {
        Work::Graphics(pass) => {
            let mut clear_values = vec![ClearValue::Colour(pass.clear_colour.to_array()); pass.colour_attachments];
            if pass.has_depth {
                clear_values.push(ClearValue::DepthStencil { depth: 1.0, stencil: 0 });
            }
            command_buffer.begin_render_pass(pass.render_pass, pass.framebuffer, &clear_values)?;
            command_buffer.bind_pipeline(pipeline)?;
            if let Some(set) = descriptor_set {
                command_buffer.bind_descriptor_set(pipeline, set)?;
            }
            command_buffer.set_scissor(pass.scissor)?;
            pass.draw.record(command_buffer)?;
            command_buffer.end_render_pass()
        }
        Work::Compute { kernel } => {
            command_buffer.bind_pipeline(pipeline)?;
            if let Some(set) = descriptor_set {
                command_buffer.bind_descriptor_set(pipeline, set)?;
            }
            command_buffer.dispatch(kernel.x, kernel.y, kernel.z)
        }
    }
}

// ============================================================================
// Command Processor
// ============================================================================

pub(crate) struct CommandProcessor {
    queue: QueueType,
    pools: Vec<Box<dyn CommandPool>>,
    work_buffers: Vec<Box<dyn CommandBuffer>>,
    scratch_buffer: Box<dyn CommandBuffer>,
    scratch_fence: Arc<dyn Fence>,
    frame_fences: Vec<Arc<dyn Fence>>,
    image_available: Vec<Arc<dyn Semaphore>>,
    /// One per surface image, signalled by the submission presenting it
    render_finished: Vec<Arc<dyn Semaphore>>,
    /// Frame slot whose fence guards each surface image
    images_in_flight: Vec<Option<usize>>,
    current_frame: usize,
}

impl CommandProcessor {
    /// Allocate `work_buffer_count` work buffers and `frames_in_flight` slots
    ///
    /// `surface_images` is the number of presentable images for window
    /// renderers, 0 otherwise.
    pub fn new(
        device: &dyn GraphicsDevice,
        queue: QueueType,
        work_buffer_count: usize,
        frames_in_flight: usize,
        surface_images: usize,
    ) -> Result<Self> {
        let mut pools = vec![device.create_command_pool(queue)?];
        let mut buffers = Self::allocate_from(device, queue, &mut pools, work_buffer_count as u32 + 1)?;
        let scratch_buffer = buffers.remove(0);

        let frame_fences = (0..frames_in_flight)
            .map(|_| device.create_fence(true))
            .collect::<Result<Vec<_>>>()?;
        let image_available = (0..frames_in_flight)
            .map(|_| device.create_semaphore())
            .collect::<Result<Vec<_>>>()?;
        let render_finished = (0..surface_images)
            .map(|_| device.create_semaphore())
            .collect::<Result<Vec<_>>>()?;

        engine_debug!(
            "topaz::CommandProcessor",
            "Allocated {} work buffers, {} frame slots on the {:?} queue",
            buffers.len(), frames_in_flight, queue
        );
        Ok(Self {
            queue,
            pools,
            work_buffers: buffers,
            scratch_buffer,
            scratch_fence: device.create_fence(false)?,
            frame_fences,
            image_available,
            render_finished,
            images_in_flight: vec![None; surface_images],
            current_frame: 0,
        })
    }

    /// Allocate `count` command buffers, opening a new pool when the
    /// current one runs out of memory
    fn allocate_from(
        device: &dyn GraphicsDevice,
        queue: QueueType,
        pools: &mut Vec<Box<dyn CommandPool>>,
        count: u32,
    ) -> Result<Vec<Box<dyn CommandBuffer>>> {
        for attempt in 0..MAX_COMMAND_POOL_ATTEMPTS {
            if attempt > 0 {
                pools.push(device.create_command_pool(queue)?);
            }
            let Some(pool) = pools.last_mut() else {
                return Err(Error::OutOfMemory);
            };
            match pool.allocate(count) {
                Ok(buffers) => return Ok(buffers),
                Err(Error::OutOfMemory) => {
                    engine_warn!(
                        "topaz::CommandProcessor",
                        "Command pool out of memory, opening a new pool (attempt {}/{})",
                        attempt + 1, MAX_COMMAND_POOL_ATTEMPTS
                    );
                }
                Err(err) => return Err(err),
            }
        }
        engine_error!(
            "topaz::CommandProcessor",
            "Command buffer allocation failed after {} pools",
            MAX_COMMAND_POOL_ATTEMPTS
        );
        Err(Error::OutOfMemory)
    }

    /// Make sure there are exactly `count` work buffers
    pub fn ensure_work_buffers(&mut self, device: &dyn GraphicsDevice, count: usize) -> Result<()> {
        if self.work_buffers.len() < count {
            let missing = (count - self.work_buffers.len()) as u32;
            let buffers = Self::allocate_from(device, self.queue, &mut self.pools, missing)?;
            self.work_buffers.extend(buffers);
        } else {
            self.work_buffers.truncate(count);
        }
        Ok(())
    }

    pub fn work_buffer_count(&self) -> usize {
        self.work_buffers.len()
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frame_fences.len()
    }

    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    /// Re-record every work buffer
    ///
    /// The caller must have drained in-flight frames (`wait_all`).
    pub fn set_work_commands<F>(&mut self, mut record: F) -> Result<()>
    where
        F: FnMut(usize, &mut dyn CommandBuffer) -> Result<()>,
    {
        for (index, command_buffer) in self.work_buffers.iter_mut().enumerate() {
            command_buffer.begin()?;
            record(index, command_buffer.as_mut())?;
            command_buffer.end()?;
        }
        engine_trace!("topaz::CommandProcessor", "Recorded {} work buffers", self.work_buffers.len());
        Ok(())
    }

    /// Record, submit and wait for one-off work
    pub fn do_scratch<F, R>(&mut self, device: &dyn GraphicsDevice, record: F) -> Result<R>
    where
        F: FnOnce(&mut dyn CommandBuffer) -> Result<R>,
    {
        self.scratch_buffer.begin()?;
        let result = record(self.scratch_buffer.as_mut())?;
        self.scratch_buffer.end()?;
        device.submit(&SubmitInfo {
            queue: self.queue,
            command_buffer: self.scratch_buffer.as_ref(),
            waits: &[],
            signals: &[],
            fence: Some(&self.scratch_fence),
        })?;
        self.scratch_fence.wait()?;
        self.scratch_fence.reset()?;
        Ok(result)
    }

    /// Block until every frame slot is idle
    pub fn wait_all(&self) -> Result<()> {
        for fence in &self.frame_fences {
            fence.wait()?;
        }
        Ok(())
    }

    /// Submit the work of the current frame slot
    ///
    /// Returns `AcquireOutOfDate` without submitting when the surface image
    /// could not be acquired; the frame slot is left untouched.
    pub fn submit_frame(
        &mut self,
        device: &dyn GraphicsDevice,
        target: FrameTarget<'_>,
        timeline: Option<TimelineSubmit<'_>>,
        render_wait: bool,
    ) -> Result<FrameOutcome> {
        let frame = self.current_frame;
        let fence = self.frame_fences[frame].clone();
        fence.wait()?;

        let mut waits = Vec::new();
        let mut signals = Vec::new();
        let mut present = None;

        let buffer_index = match target {
            FrameTarget::Slot => frame,
            FrameTarget::Window { pending, present: should_present } => {
                let generation = device.surface_generation();
                let reusable = pending.take().filter(|p| p.surface_generation == generation);
                let (image_index, acquire_wait) = match reusable {
                    Some(acquired) => (acquired.image_index, acquired.wait),
                    None => {
                        let semaphore = self.image_available[frame].clone();
                        match device.acquire_image(&semaphore)? {
                            AcquireResult::Acquired { image_index, suboptimal } => {
                                if suboptimal {
                                    engine_debug!("topaz::CommandProcessor", "Acquired suboptimal surface image {}", image_index);
                                }
                                (image_index, Some(semaphore))
                            }
                            AcquireResult::OutOfDate => {
                                engine_warn!("topaz::CommandProcessor", "Surface out of date on acquire");
                                return Ok(FrameOutcome::AcquireOutOfDate);
                            }
                        }
                    }
                };
                let image = image_index as usize;
                if image >= self.work_buffers.len() || image >= self.images_in_flight.len() {
                    engine_error!(
                        "topaz::CommandProcessor",
                        "Surface image {} out of range ({} work buffers)",
                        image_index, self.work_buffers.len()
                    );
                    return Err(Error::BackendError(format!("surface image {} out of range", image_index)));
                }
                if let Some(previous) = self.images_in_flight[image] {
                    if previous != frame {
                        self.frame_fences[previous].wait()?;
                    }
                }
                self.images_in_flight[image] = Some(frame);

                if let Some(semaphore) = acquire_wait {
                    waits.push(SemaphoreSubmit::binary(semaphore));
                }
                if should_present {
                    let finished = self.render_finished[image].clone();
                    signals.push(SemaphoreSubmit::binary(finished.clone()));
                    present = Some((image_index, finished));
                } else {
                    // The next window renderer draws into the same image
                    *pending = Some(PendingAcquire { image_index, wait: None, surface_generation: generation });
                }
                image
            }
        };

        if let Some(timeline) = &timeline {
            for value in timeline.waits {
                waits.push(SemaphoreSubmit::timeline(timeline.semaphore.clone(), *value));
            }
            signals.push(SemaphoreSubmit::timeline(timeline.semaphore.clone(), timeline.signal));
        }

        fence.reset()?;
        device.submit(&SubmitInfo {
            queue: self.queue,
            command_buffer: self.work_buffers[buffer_index].as_ref(),
            waits: &waits,
            signals: &signals,
            fence: Some(&fence),
        })?;
        self.current_frame = (frame + 1) % self.frame_fences.len();

        if render_wait {
            fence.wait()?;
        }

        let Some((image_index, finished)) = present else {
            return Ok(FrameOutcome::Submitted);
        };
        match device.present(image_index, &[finished])? {
            PresentResult::Presented => Ok(FrameOutcome::Presented),
            PresentResult::Suboptimal => {
                engine_debug!("topaz::CommandProcessor", "Presented suboptimal surface image {}", image_index);
                Ok(FrameOutcome::Presented)
            }
            PresentResult::OutOfDate => {
                engine_warn!("topaz::CommandProcessor", "Surface out of date on present");
                Ok(FrameOutcome::PresentOutOfDate)
            }
        }
    }

    /// Forget per-image state after the surface was recreated
    pub fn reset_surface(&mut self, device: &dyn GraphicsDevice, surface_images: usize) -> Result<()> {
        self.images_in_flight = vec![None; surface_images];
        if self.render_finished.len() != surface_images {
            self.render_finished = (0..surface_images)
                .map(|_| device.create_semaphore())
                .collect::<Result<Vec<_>>>()?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "command_processor_tests.rs"]
mod tests;
