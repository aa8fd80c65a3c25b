/// Per-device state shared by every renderer.
///
/// The context is created once per device and passed by `&mut` into
/// renderer construction and every per-frame call. It owns the device depth
/// image, the render graph with its timeline semaphore, and the surface
/// image a renderer may leave acquired for the next one.
///
/// Dropped renderers queue their id; the context takes them out of the
/// render graph and recycles the id the next time it is used.

use std::sync::{Arc, Mutex, PoisonError};
use glam::UVec2;
use crate::device::{GraphicsDevice, Image, ImageDesc, ImageFormat, ImageUsage, MemoryResidency};
use crate::error::Result;
use crate::render_graph::{FrameScheduler, RenderGraph, RendererId, RendererIdAllocator};
use crate::renderer::command_processor::PendingAcquire;
use crate::renderer::Renderer;
use crate::{engine_debug, engine_info};

/// Ids of renderers dropped since the context last looked
pub(crate) type ReleaseQueue = Arc<Mutex<Vec<RendererId>>>;

pub struct DeviceContext {
    pub(crate) device: Arc<dyn GraphicsDevice>,
    frames_in_flight: usize,
    depth: Option<Arc<dyn Image>>,
    /// Surface generation the depth image was created for
    depth_generation: u64,
    pub(crate) pending_acquire: Option<PendingAcquire>,
    pub(crate) graph: RenderGraph,
    pub(crate) scheduler: FrameScheduler,
    ids: RendererIdAllocator,
    released: ReleaseQueue,
}

impl DeviceContext {
    /// Wrap `device`, creating the depth image and the timeline semaphore
    pub fn new(device: Arc<dyn GraphicsDevice>) -> Result<Self> {
        let frames_in_flight = device.frames_in_flight();
        let depth = Self::create_depth(device.as_ref(), device.surface_dimensions())?;
        let depth_generation = device.surface_generation();
        let scheduler = FrameScheduler::new(device.create_timeline_semaphore(0)?)?;
        engine_info!(
            "topaz::DeviceContext",
            "Device context ready: {} frames in flight, surface {:?}",
            frames_in_flight, device.surface_dimensions()
        );
        Ok(Self {
            device,
            frames_in_flight,
            depth,
            depth_generation,
            pending_acquire: None,
            graph: RenderGraph::new(),
            scheduler,
            ids: RendererIdAllocator::new(),
            released: ReleaseQueue::default(),
        })
    }

    fn create_depth(device: &dyn GraphicsDevice, dimensions: UVec2) -> Result<Option<Arc<dyn Image>>> {
        // Minimised window: nothing to attach until it comes back
        if dimensions.x == 0 || dimensions.y == 0 {
            return Ok(None);
        }
        let depth = device.create_image(&ImageDesc {
            format: ImageFormat::Depth32_SFLOAT,
            dimensions,
            usage: ImageUsage::DEPTH_ATTACHMENT,
            residency: MemoryResidency::Device,
            debug_name: "device_depth".to_string(),
        })?;
        engine_debug!("topaz::DeviceContext", "Created depth image {}x{}", dimensions.x, dimensions.y);
        Ok(Some(depth))
    }

    pub fn device(&self) -> &Arc<dyn GraphicsDevice> {
        &self.device
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    /// Depth image matching the current surface, rebuilt if the surface changed
    pub(crate) fn depth_image(&mut self) -> Result<Option<Arc<dyn Image>>> {
        let generation = self.device.surface_generation();
        if generation != self.depth_generation {
            self.depth = Self::create_depth(self.device.as_ref(), self.device.surface_dimensions())?;
            self.depth_generation = generation;
        }
        Ok(self.depth.clone())
    }

    /// Tell the context the window changed size
    ///
    /// Recreates the surface; renderers pick up the new generation on their
    /// next `render()`.
    pub fn notify_resize(&mut self) -> Result<()> {
        self.recreate_surface()
    }

    pub(crate) fn recreate_surface(&mut self) -> Result<()> {
        self.pending_acquire = None;
        self.device.recreate_surface()?;
        engine_debug!(
            "topaz::DeviceContext",
            "Surface recreated at {:?} (generation {})",
            self.device.surface_dimensions(), self.device.surface_generation()
        );
        Ok(())
    }

    /// The render graph, without renderers dropped since the last call
    pub fn render_graph(&mut self) -> &RenderGraph {
        self.collect_released();
        &self.graph
    }

    pub fn render_graph_mut(&mut self) -> &mut RenderGraph {
        self.collect_released();
        &mut self.graph
    }

    /// Allocate a renderer id; renderers get one on construction
    pub fn register_renderer(&mut self) -> RendererId {
        self.collect_released();
        self.ids.allocate()
    }

    /// Queue dropped renderers push their id to
    pub(crate) fn release_queue(&self) -> ReleaseQueue {
        self.released.clone()
    }

    /// Take every dropped renderer out of the graph and recycle its id
    pub(crate) fn collect_released(&mut self) {
        let released = std::mem::take(&mut *self.released.lock().unwrap_or_else(PoisonError::into_inner));
        for id in released {
            self.release_renderer(id);
        }
    }

    /// Return `id` to the pool and drop it from the render graph
    ///
    /// For ids taken with `register_renderer`; a `Renderer` releases its own
    /// id when dropped.
    pub fn release_renderer(&mut self, id: RendererId) {
        self.graph.remove(id);
        if self.ids.release(id) {
            engine_debug!("topaz::DeviceContext", "Released {}", id);
        }
    }

    /// Destroy `renderer`
    ///
    /// Same as dropping it, except the id is released right away.
    pub fn destroy_renderer(&mut self, renderer: Renderer) -> Result<()> {
        drop(renderer);
        self.collect_released();
        Ok(())
    }

    /// Signal `id`'s timeline value for a frame in which it does not render
    pub fn skip_renderer(&mut self, id: RendererId) -> Result<()> {
        self.collect_released();
        self.scheduler.skip(&self.graph, id)
    }

    /// Number of live renderers
    pub fn renderer_count(&mut self) -> usize {
        self.collect_released();
        self.ids.live_count()
    }
}

#[cfg(test)]
#[path = "device_context_tests.rs"]
mod tests;
