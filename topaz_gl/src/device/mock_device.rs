/// Mock graphics device for unit tests (no GPU required)
///
/// Every object gets a unique id. Command buffers record their commands as
/// strings (`"draw(3)"`, `"bind_index_buffer(buffer#12)"`) and submissions
/// snapshot them, so tests can assert on exactly what would reach the GPU.
/// Buffer and image memory is real host memory: mapped pointers alias it,
/// and recorded copies are executed at submit time.
///
/// The mock also enforces the usage rules a real driver would reject:
/// submitting with a signalled fence, waiting on a fence that will never be
/// signalled, waiting on an unsignalled binary semaphore, or signalling a
/// timeline semaphore with a non-increasing value.

use std::any::Any;
use std::cell::UnsafeCell;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use glam::UVec2;

use crate::device::*;
use crate::error::{Error, Result};
use crate::engine_bail;

static NEXT_MOCK_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> u64 {
    NEXT_MOCK_ID.fetch_add(1, Ordering::Relaxed)
}

// ============================================================================
// Mock Memory
// ============================================================================

/// Fixed-size host allocation standing in for device memory
struct MockMemory(UnsafeCell<Box<[u8]>>);

// Access is serialised by the frontend's fence discipline; the tests are the
// only other reader.
unsafe impl Send for MockMemory {}
unsafe impl Sync for MockMemory {}

impl MockMemory {
    fn zeroed(len: usize) -> Self {
        Self(UnsafeCell::new(vec![0u8; len].into_boxed_slice()))
    }

    fn ptr(&self) -> NonNull<u8> {
        // SAFETY: the boxed slice is never reallocated
        unsafe { NonNull::new_unchecked((&mut *self.0.get()).as_mut_ptr()) }
    }

    fn len(&self) -> usize {
        unsafe { (&*self.0.get()).len() }
    }

    fn read(&self) -> Vec<u8> {
        unsafe { (&*self.0.get()).to_vec() }
    }

    fn write(&self, offset: usize, data: &[u8]) -> Result<()> {
        if offset + data.len() > self.len() {
            engine_bail!("topaz::mock", "write of {} bytes at {} overflows {} bytes", data.len(), offset, self.len());
        }
        unsafe { (&mut *self.0.get())[offset..offset + data.len()].copy_from_slice(data) };
        Ok(())
    }
}

// ============================================================================
// Mock Buffer / Image / Sampler
// ============================================================================

pub struct MockBuffer {
    pub id: u64,
    pub desc: BufferDesc,
    memory: MockMemory,
}

impl MockBuffer {
    /// Current contents, host-visible or not
    pub fn contents(&self) -> Vec<u8> {
        self.memory.read()
    }
}

impl Buffer for MockBuffer {
    fn size(&self) -> u64 {
        self.desc.size
    }

    fn update(&self, offset: u64, data: &[u8]) -> Result<()> {
        if self.desc.residency != MemoryResidency::Host {
            engine_bail!("topaz::mock", "update on device-local buffer#{}", self.id);
        }
        self.memory.write(offset as usize, data)
    }

    fn mapped_ptr(&self) -> Option<NonNull<u8>> {
        match self.desc.residency {
            MemoryResidency::Host => Some(self.memory.ptr()),
            MemoryResidency::Device => None,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct MockImage {
    pub id: u64,
    pub desc: ImageDesc,
    memory: MockMemory,
}

impl MockImage {
    pub fn contents(&self) -> Vec<u8> {
        self.memory.read()
    }
}

impl Image for MockImage {
    fn format(&self) -> ImageFormat {
        self.desc.format
    }

    fn dimensions(&self) -> UVec2 {
        self.desc.dimensions
    }

    fn mapped_ptr(&self) -> Option<NonNull<u8>> {
        match self.desc.residency {
            MemoryResidency::Host => Some(self.memory.ptr()),
            MemoryResidency::Device => None,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct MockSampler {
    pub id: u64,
    pub desc: SamplerDesc,
}

impl Sampler for MockSampler {
    fn desc(&self) -> SamplerDesc {
        self.desc
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Id of a mock buffer (0 for foreign objects)
pub fn buffer_id(buffer: &Arc<dyn Buffer>) -> u64 {
    buffer.as_any().downcast_ref::<MockBuffer>().map_or(0, |b| b.id)
}

pub fn image_id(image: &Arc<dyn Image>) -> u64 {
    image.as_any().downcast_ref::<MockImage>().map_or(0, |i| i.id)
}

pub fn pipeline_id(pipeline: &Arc<dyn Pipeline>) -> u64 {
    pipeline.as_any().downcast_ref::<MockPipeline>().map_or(0, |p| p.id)
}

pub fn set_id(set: &Arc<dyn DescriptorSet>) -> u64 {
    set.as_any().downcast_ref::<MockDescriptorSet>().map_or(0, |s| s.id)
}

pub fn buffer_contents(buffer: &Arc<dyn Buffer>) -> Vec<u8> {
    buffer.as_any().downcast_ref::<MockBuffer>().map(|b| b.contents()).unwrap_or_default()
}

pub fn image_contents(image: &Arc<dyn Image>) -> Vec<u8> {
    image.as_any().downcast_ref::<MockImage>().map(|i| i.contents()).unwrap_or_default()
}

// ============================================================================
// Mock Descriptors
// ============================================================================

pub struct MockDescriptorLayout {
    pub id: u64,
    pub desc: DescriptorLayoutDesc,
}

impl DescriptorLayout for MockDescriptorLayout {
    fn desc(&self) -> &DescriptorLayoutDesc {
        &self.desc
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct MockDescriptorSet {
    pub id: u64,
    pub layout: DescriptorLayoutDesc,
}

impl DescriptorSet for MockDescriptorSet {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct MockDescriptorPool {
    pub id: u64,
    pub desc: DescriptorPoolDesc,
    /// Pools created while the device had forced exhaustion pending
    pub force_exhausted: bool,
    used_sets: u32,
    used_buffers: u32,
    used_images: u32,
}

impl DescriptorPool for MockDescriptorPool {
    fn allocate(&mut self, layout: &Arc<dyn DescriptorLayout>, count: u32) -> Result<DescriptorAllocation> {
        if self.force_exhausted {
            return Ok(DescriptorAllocation::PoolExhausted);
        }
        let desc = layout.desc();
        let buffers = desc.descriptor_count(DescriptorType::StorageBuffer) * count;
        let images = desc.descriptor_count(DescriptorType::CombinedImageSampler) * count;
        if self.used_sets + count > self.desc.max_sets {
            return Ok(DescriptorAllocation::PoolExhausted);
        }
        if self.used_buffers + buffers > self.desc.storage_buffers
            || self.used_images + images > self.desc.combined_image_samplers
        {
            return Ok(DescriptorAllocation::Fragmented);
        }
        self.used_sets += count;
        self.used_buffers += buffers;
        self.used_images += images;
        let sets = (0..count)
            .map(|_| {
                Arc::new(MockDescriptorSet { id: next_id(), layout: desc.clone() }) as Arc<dyn DescriptorSet>
            })
            .collect();
        Ok(DescriptorAllocation::Allocated(sets))
    }
}

/// A descriptor write as the mock saw it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockDescriptorWrite {
    pub set: u64,
    pub binding: u32,
    pub array_element: u32,
    pub descriptor_type: DescriptorType,
    /// Id of the buffer or image written
    pub object: u64,
}

// ============================================================================
// Mock Passes & Pipelines
// ============================================================================

pub struct MockRenderPass {
    pub id: u64,
    pub desc: RenderPassDesc,
}

impl RenderPass for MockRenderPass {
    fn desc(&self) -> &RenderPassDesc {
        &self.desc
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct MockFramebuffer {
    pub id: u64,
    pub dimensions: UVec2,
    pub colour_attachments: Vec<u64>,
    pub depth_attachment: Option<u64>,
}

impl Framebuffer for MockFramebuffer {
    fn dimensions(&self) -> UVec2 {
        self.dimensions
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct MockPipelineLayout {
    pub id: u64,
}

impl PipelineLayout for MockPipelineLayout {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Fixed state of a created pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct MockPipelineRecord {
    pub id: u64,
    pub bind_point: PipelineBindPoint,
    pub stages: Vec<ShaderStage>,
    pub viewport: Option<Viewport>,
    pub polygon_mode: Option<PolygonMode>,
    pub cull_mode: Option<CullMode>,
    pub depth_test: bool,
    pub alpha_blending: bool,
    pub tessellated: bool,
    pub render_pass: Option<u64>,
}

pub struct MockPipeline {
    pub id: u64,
    pub bind_point: PipelineBindPoint,
}

impl Pipeline for MockPipeline {
    fn bind_point(&self) -> PipelineBindPoint {
        self.bind_point
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ============================================================================
// Mock Commands
// ============================================================================

enum MockCopy {
    Buffer { src: Arc<dyn Buffer>, dst: Arc<dyn Buffer>, size: u64 },
    Image { src: Arc<dyn Buffer>, dst: Arc<dyn Image> },
}

pub struct MockCommandBuffer {
    pub id: u64,
    pub queue: QueueType,
    pub commands: Vec<String>,
    recording: bool,
    copies: Vec<MockCopy>,
    recordings: Arc<AtomicUsize>,
}

impl MockCommandBuffer {
    fn record(&mut self, command: String) -> Result<()> {
        if !self.recording {
            engine_bail!("topaz::mock", "command buffer#{} is not recording ({})", self.id, command);
        }
        self.commands.push(command);
        Ok(())
    }
}

impl CommandBuffer for MockCommandBuffer {
    fn begin(&mut self) -> Result<()> {
        self.commands.clear();
        self.copies.clear();
        self.recording = true;
        self.recordings.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        if !self.recording {
            engine_bail!("topaz::mock", "end() without begin() on command buffer#{}", self.id);
        }
        self.recording = false;
        Ok(())
    }

    fn begin_render_pass(
        &mut self,
        render_pass: &Arc<dyn RenderPass>,
        framebuffer: &Arc<dyn Framebuffer>,
        clear_values: &[ClearValue],
    ) -> Result<()> {
        let rp = render_pass.as_any().downcast_ref::<MockRenderPass>().map_or(0, |r| r.id);
        let fb = framebuffer.as_any().downcast_ref::<MockFramebuffer>().map_or(0, |f| f.id);
        self.record(format!("begin_render_pass(render_pass#{}, framebuffer#{}, {:?})", rp, fb, clear_values))
    }

    fn end_render_pass(&mut self) -> Result<()> {
        self.record("end_render_pass".to_string())
    }

    fn bind_pipeline(&mut self, pipeline: &Arc<dyn Pipeline>) -> Result<()> {
        self.record(format!("bind_pipeline(pipeline#{})", pipeline_id(pipeline)))
    }

    fn bind_descriptor_set(&mut self, _pipeline: &Arc<dyn Pipeline>, set: &Arc<dyn DescriptorSet>) -> Result<()> {
        self.record(format!("bind_descriptor_set(set#{})", set_id(set)))
    }

    fn set_scissor(&mut self, scissor: Rect2D) -> Result<()> {
        self.record(format!("set_scissor({}, {}, {}, {})", scissor.x, scissor.y, scissor.width, scissor.height))
    }

    fn bind_index_buffer(&mut self, buffer: &Arc<dyn Buffer>) -> Result<()> {
        self.record(format!("bind_index_buffer(buffer#{})", buffer_id(buffer)))
    }

    fn draw(&mut self, vertex_count: u32) -> Result<()> {
        self.record(format!("draw({})", vertex_count))
    }

    fn draw_indexed(&mut self, index_count: u32) -> Result<()> {
        self.record(format!("draw_indexed({})", index_count))
    }

    fn draw_indirect(&mut self, buffer: &Arc<dyn Buffer>, offset: u64, draw_count: u32, stride: u32) -> Result<()> {
        self.record(format!("draw_indirect(buffer#{}, {}, {}, {})", buffer_id(buffer), offset, draw_count, stride))
    }

    fn draw_indexed_indirect(&mut self, buffer: &Arc<dyn Buffer>, offset: u64, draw_count: u32, stride: u32) -> Result<()> {
        self.record(format!(
            "draw_indexed_indirect(buffer#{}, {}, {}, {})",
            buffer_id(buffer), offset, draw_count, stride
        ))
    }

    fn draw_indirect_count(
        &mut self,
        buffer: &Arc<dyn Buffer>,
        offset: u64,
        count_buffer: &Arc<dyn Buffer>,
        count_offset: u64,
        max_draw_count: u32,
        stride: u32,
    ) -> Result<()> {
        self.record(format!(
            "draw_indirect_count(buffer#{}, {}, buffer#{}, {}, {}, {})",
            buffer_id(buffer), offset, buffer_id(count_buffer), count_offset, max_draw_count, stride
        ))
    }

    fn dispatch(&mut self, x: u32, y: u32, z: u32) -> Result<()> {
        self.record(format!("dispatch({}, {}, {})", x, y, z))
    }

    fn copy_buffer(&mut self, src: &Arc<dyn Buffer>, dst: &Arc<dyn Buffer>, size: u64) -> Result<()> {
        self.record(format!("copy_buffer(buffer#{}, buffer#{}, {})", buffer_id(src), buffer_id(dst), size))?;
        self.copies.push(MockCopy::Buffer { src: src.clone(), dst: dst.clone(), size });
        Ok(())
    }

    fn copy_buffer_to_image(&mut self, src: &Arc<dyn Buffer>, dst: &Arc<dyn Image>, final_layout: ImageLayout) -> Result<()> {
        self.record(format!(
            "copy_buffer_to_image(buffer#{}, image#{}, {:?})",
            buffer_id(src), image_id(dst), final_layout
        ))?;
        self.copies.push(MockCopy::Image { src: src.clone(), dst: dst.clone() });
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct MockCommandPool {
    pub id: u64,
    pub queue: QueueType,
    /// Maximum number of buffers this pool hands out (None = unlimited)
    pub capacity: Option<u32>,
    allocated: u32,
    recordings: Arc<AtomicUsize>,
}

impl CommandPool for MockCommandPool {
    fn allocate(&mut self, count: u32) -> Result<Vec<Box<dyn CommandBuffer>>> {
        if let Some(capacity) = self.capacity {
            if self.allocated + count > capacity {
                return Err(Error::OutOfMemory);
            }
        }
        self.allocated += count;
        Ok((0..count)
            .map(|_| {
                Box::new(MockCommandBuffer {
                    id: next_id(),
                    queue: self.queue,
                    commands: Vec::new(),
                    recording: false,
                    copies: Vec::new(),
                    recordings: self.recordings.clone(),
                }) as Box<dyn CommandBuffer>
            })
            .collect())
    }
}

// ============================================================================
// Mock Sync
// ============================================================================

pub struct MockFence {
    pub id: u64,
    signalled: AtomicBool,
}

impl Fence for MockFence {
    fn wait(&self) -> Result<()> {
        if !self.signalled.load(Ordering::SeqCst) {
            engine_bail!("topaz::mock", "wait on fence#{} that no submission will signal", self.id);
        }
        Ok(())
    }

    fn reset(&self) -> Result<()> {
        self.signalled.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_signalled(&self) -> Result<bool> {
        Ok(self.signalled.load(Ordering::SeqCst))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct MockSemaphore {
    pub id: u64,
    pub timeline: bool,
    /// Timeline counter, or 0/1 for a binary semaphore
    value: AtomicU64,
}

impl MockSemaphore {
    fn consume_binary(&self) -> Result<()> {
        if self.value.swap(0, Ordering::SeqCst) == 0 {
            engine_bail!("topaz::mock", "wait on unsignalled binary semaphore#{}", self.id);
        }
        Ok(())
    }

    fn signal_binary(&self) -> Result<()> {
        if self.value.swap(1, Ordering::SeqCst) != 0 {
            engine_bail!("topaz::mock", "binary semaphore#{} signalled twice", self.id);
        }
        Ok(())
    }

    fn signal_timeline(&self, value: u64) -> Result<()> {
        let current = self.value.load(Ordering::SeqCst);
        if value <= current {
            engine_bail!("topaz::mock", "timeline semaphore#{} signalled with {} <= {}", self.id, value, current);
        }
        self.value.store(value, Ordering::SeqCst);
        Ok(())
    }
}

impl Semaphore for MockSemaphore {
    fn is_timeline(&self) -> bool {
        self.timeline
    }

    fn value(&self) -> Result<u64> {
        Ok(self.value.load(Ordering::SeqCst))
    }

    fn signal(&self, value: u64) -> Result<()> {
        if !self.timeline {
            engine_bail!("topaz::mock", "host signal on binary semaphore#{}", self.id);
        }
        self.signal_timeline(value)
    }

    fn wait(&self, value: u64) -> Result<()> {
        if !self.timeline {
            engine_bail!("topaz::mock", "host wait on binary semaphore#{}", self.id);
        }
        let current = self.value.load(Ordering::SeqCst);
        if current < value {
            engine_bail!("topaz::mock", "host wait on semaphore#{} for {} would never return ({})", self.id, value, current);
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn mock_semaphore(semaphore: &Arc<dyn Semaphore>) -> Result<&MockSemaphore> {
    match semaphore.as_any().downcast_ref::<MockSemaphore>() {
        Some(s) => Ok(s),
        None => Err(Error::BackendError("foreign semaphore".to_string())),
    }
}

// ============================================================================
// Mock Graphics Device
// ============================================================================

/// One recorded queue submission
#[derive(Debug, Clone)]
pub struct MockSubmission {
    pub queue: QueueType,
    pub command_buffer: u64,
    pub commands: Vec<String>,
    /// (semaphore id, value)
    pub waits: Vec<(u64, u64)>,
    pub signals: Vec<(u64, u64)>,
}

/// Everything the mock device has seen, plus failure injection knobs
pub struct MockDeviceState {
    pub frames_in_flight: usize,
    pub surface_format: ImageFormat,
    pub surface_dimensions: UVec2,
    pub surface_generation: u64,
    pub surface_images: Vec<Arc<dyn Image>>,
    next_acquire: usize,

    /// The next N acquires report OutOfDate
    pub out_of_date_acquires: u32,
    /// The next N presents report OutOfDate
    pub out_of_date_presents: u32,
    /// The next N descriptor pools created report PoolExhausted on every allocation
    pub exhausted_descriptor_pools: u32,
    /// Capacity of command pools created from now on
    pub command_pool_capacity: Option<u32>,

    pub buffers_created: usize,
    pub images_created: usize,
    pub samplers: Vec<SamplerDesc>,
    pub descriptor_layouts: Vec<DescriptorLayoutDesc>,
    pub descriptor_pools: Vec<DescriptorPoolDesc>,
    pub descriptor_writes: Vec<MockDescriptorWrite>,
    pub render_passes: Vec<RenderPassDesc>,
    pub framebuffers_created: usize,
    pub pipelines: Vec<MockPipelineRecord>,
    pub command_pools_created: usize,
    pub submissions: Vec<MockSubmission>,
    pub presents: Vec<u32>,
    pub wait_idle_count: usize,
    pub surface_recreations: usize,
}

pub struct MockGraphicsDevice {
    state: Mutex<MockDeviceState>,
    recordings: Arc<AtomicUsize>,
}

impl MockGraphicsDevice {
    /// Device with `frames_in_flight` presentable images of `dimensions`
    pub fn new(frames_in_flight: usize, dimensions: UVec2) -> Self {
        let format = ImageFormat::BGRA32_SRGB;
        let surface_images = Self::make_surface_images(frames_in_flight, format, dimensions);
        Self {
            state: Mutex::new(MockDeviceState {
                frames_in_flight,
                surface_format: format,
                surface_dimensions: dimensions,
                surface_generation: 0,
                surface_images,
                next_acquire: 0,
                out_of_date_acquires: 0,
                out_of_date_presents: 0,
                exhausted_descriptor_pools: 0,
                command_pool_capacity: None,
                buffers_created: 0,
                images_created: 0,
                samplers: Vec::new(),
                descriptor_layouts: Vec::new(),
                descriptor_pools: Vec::new(),
                descriptor_writes: Vec::new(),
                render_passes: Vec::new(),
                framebuffers_created: 0,
                pipelines: Vec::new(),
                command_pools_created: 0,
                submissions: Vec::new(),
                presents: Vec::new(),
                wait_idle_count: 0,
                surface_recreations: 0,
            }),
            recordings: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn make_surface_images(count: usize, format: ImageFormat, dimensions: UVec2) -> Vec<Arc<dyn Image>> {
        (0..count)
            .map(|i| {
                let desc = ImageDesc {
                    format,
                    dimensions,
                    usage: ImageUsage::COLOUR_ATTACHMENT,
                    residency: MemoryResidency::Device,
                    debug_name: format!("surface_{}", i),
                };
                let memory = MockMemory::zeroed(format.image_size_bytes(dimensions));
                Arc::new(MockImage { id: next_id(), desc, memory }) as Arc<dyn Image>
            })
            .collect()
    }

    /// Inspect or tweak the recorded state
    pub fn state(&self) -> MutexGuard<'_, MockDeviceState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Total number of `begin()` calls on command buffers (re-recordings included)
    pub fn recordings(&self) -> usize {
        self.recordings.load(Ordering::SeqCst)
    }

    /// Simulate the window changing size (the surface is not recreated)
    pub fn resize_window(&self, dimensions: UVec2) {
        self.state().surface_dimensions = dimensions;
    }

    /// Commands of the most recent submission
    pub fn last_commands(&self) -> Vec<String> {
        self.state().submissions.last().map(|s| s.commands.clone()).unwrap_or_default()
    }

    pub fn submission_count(&self) -> usize {
        self.state().submissions.len()
    }

    fn execute_copies(copies: &[MockCopy]) -> Result<()> {
        for copy in copies {
            match copy {
                MockCopy::Buffer { src, dst, size } => {
                    let bytes = buffer_contents(src);
                    let Some(dst) = dst.as_any().downcast_ref::<MockBuffer>() else {
                        engine_bail!("topaz::mock", "copy into foreign buffer");
                    };
                    dst.memory.write(0, &bytes[..*size as usize])?;
                }
                MockCopy::Image { src, dst } => {
                    let Some(dst) = dst.as_any().downcast_ref::<MockImage>() else {
                        engine_bail!("topaz::mock", "copy into foreign image");
                    };
                    let bytes = buffer_contents(src);
                    let len = dst.memory.len().min(bytes.len());
                    dst.memory.write(0, &bytes[..len])?;
                }
            }
        }
        Ok(())
    }
}

impl GraphicsDevice for MockGraphicsDevice {
    fn surface_images(&self) -> Vec<Arc<dyn Image>> {
        self.state().surface_images.clone()
    }

    fn surface_format(&self) -> ImageFormat {
        self.state().surface_format
    }

    fn surface_dimensions(&self) -> UVec2 {
        self.state().surface_dimensions
    }

    fn surface_generation(&self) -> u64 {
        self.state().surface_generation
    }

    fn recreate_surface(&self) -> Result<()> {
        let mut state = self.state();
        state.surface_images = Self::make_surface_images(
            state.frames_in_flight,
            state.surface_format,
            state.surface_dimensions,
        );
        state.next_acquire = 0;
        state.surface_generation += 1;
        state.surface_recreations += 1;
        state.wait_idle_count += 1;
        Ok(())
    }

    fn acquire_image(&self, signal: &Arc<dyn Semaphore>) -> Result<AcquireResult> {
        let mut state = self.state();
        if state.out_of_date_acquires > 0 {
            state.out_of_date_acquires -= 1;
            return Ok(AcquireResult::OutOfDate);
        }
        mock_semaphore(signal)?.signal_binary()?;
        let image_index = state.next_acquire as u32;
        state.next_acquire = (state.next_acquire + 1) % state.surface_images.len().max(1);
        Ok(AcquireResult::Acquired { image_index, suboptimal: false })
    }

    fn present(&self, image_index: u32, waits: &[Arc<dyn Semaphore>]) -> Result<PresentResult> {
        for semaphore in waits {
            mock_semaphore(semaphore)?.consume_binary()?;
        }
        let mut state = self.state();
        state.presents.push(image_index);
        if state.out_of_date_presents > 0 {
            state.out_of_date_presents -= 1;
            return Ok(PresentResult::OutOfDate);
        }
        Ok(PresentResult::Presented)
    }

    fn frames_in_flight(&self) -> usize {
        self.state().frames_in_flight
    }

    fn create_buffer(&self, desc: &BufferDesc) -> Result<Arc<dyn Buffer>> {
        if desc.size == 0 {
            engine_bail!("topaz::mock", "zero-sized buffer '{}'", desc.debug_name);
        }
        self.state().buffers_created += 1;
        Ok(Arc::new(MockBuffer {
            id: next_id(),
            desc: desc.clone(),
            memory: MockMemory::zeroed(desc.size as usize),
        }))
    }

    fn create_image(&self, desc: &ImageDesc) -> Result<Arc<dyn Image>> {
        if desc.dimensions.x == 0 || desc.dimensions.y == 0 {
            engine_bail!("topaz::mock", "zero-area image '{}'", desc.debug_name);
        }
        self.state().images_created += 1;
        Ok(Arc::new(MockImage {
            id: next_id(),
            desc: desc.clone(),
            memory: MockMemory::zeroed(desc.format.image_size_bytes(desc.dimensions)),
        }))
    }

    fn create_sampler(&self, desc: &SamplerDesc) -> Result<Arc<dyn Sampler>> {
        self.state().samplers.push(*desc);
        Ok(Arc::new(MockSampler { id: next_id(), desc: *desc }))
    }

    fn create_descriptor_layout(&self, desc: &DescriptorLayoutDesc) -> Result<Arc<dyn DescriptorLayout>> {
        self.state().descriptor_layouts.push(desc.clone());
        Ok(Arc::new(MockDescriptorLayout { id: next_id(), desc: desc.clone() }))
    }

    fn create_descriptor_pool(&self, desc: &DescriptorPoolDesc) -> Result<Box<dyn DescriptorPool>> {
        let mut state = self.state();
        state.descriptor_pools.push(*desc);
        let force_exhausted = state.exhausted_descriptor_pools > 0;
        if force_exhausted {
            state.exhausted_descriptor_pools -= 1;
        }
        Ok(Box::new(MockDescriptorPool {
            id: next_id(),
            desc: *desc,
            force_exhausted,
            used_sets: 0,
            used_buffers: 0,
            used_images: 0,
        }))
    }

    fn update_descriptor_sets(&self, writes: &[DescriptorWrite]) -> Result<()> {
        let mut recorded = Vec::with_capacity(writes.len());
        for write in writes {
            let Some(set) = write.set.as_any().downcast_ref::<MockDescriptorSet>() else {
                engine_bail!("topaz::mock", "write to foreign descriptor set");
            };
            let Some(binding) = set.layout.binding(write.binding) else {
                engine_bail!("topaz::mock", "set#{} has no binding {}", set.id, write.binding);
            };
            if binding.descriptor_type != write.resource.descriptor_type() {
                engine_bail!(
                    "topaz::mock",
                    "binding {} of set#{} is {:?}, got {:?}",
                    write.binding, set.id, binding.descriptor_type, write.resource.descriptor_type()
                );
            }
            if write.array_element >= binding.count {
                engine_bail!("topaz::mock", "array element {} out of range {}", write.array_element, binding.count);
            }
            let object = match &write.resource {
                DescriptorResource::StorageBuffer(buffer) => buffer_id(buffer),
                DescriptorResource::CombinedImageSampler(image, _) => image_id(image),
            };
            recorded.push(MockDescriptorWrite {
                set: set.id,
                binding: write.binding,
                array_element: write.array_element,
                descriptor_type: binding.descriptor_type,
                object,
            });
        }
        self.state().descriptor_writes.extend(recorded);
        Ok(())
    }

    fn create_render_pass(&self, desc: &RenderPassDesc) -> Result<Arc<dyn RenderPass>> {
        self.state().render_passes.push(desc.clone());
        Ok(Arc::new(MockRenderPass { id: next_id(), desc: desc.clone() }))
    }

    fn create_framebuffer(&self, desc: &FramebufferDesc) -> Result<Arc<dyn Framebuffer>> {
        let pass = desc.render_pass.desc();
        if pass.colour_attachments.len() != desc.colour_attachments.len()
            || pass.depth_attachment.is_some() != desc.depth_attachment.is_some()
        {
            engine_bail!("topaz::mock", "framebuffer attachments do not match the render pass");
        }
        for (attachment, image) in pass.colour_attachments.iter().zip(desc.colour_attachments) {
            if attachment.format != image.format() {
                engine_bail!("topaz::mock", "attachment format {:?} != {:?}", image.format(), attachment.format);
            }
        }
        self.state().framebuffers_created += 1;
        Ok(Arc::new(MockFramebuffer {
            id: next_id(),
            dimensions: desc.dimensions,
            colour_attachments: desc.colour_attachments.iter().map(image_id).collect(),
            depth_attachment: desc.depth_attachment.map(image_id),
        }))
    }

    fn create_pipeline_layout(&self, _desc: &PipelineLayoutDesc) -> Result<Arc<dyn PipelineLayout>> {
        Ok(Arc::new(MockPipelineLayout { id: next_id() }))
    }

    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc) -> Result<Arc<dyn Pipeline>> {
        let id = next_id();
        let render_pass = desc.render_pass.as_any().downcast_ref::<MockRenderPass>().map(|r| r.id);
        self.state().pipelines.push(MockPipelineRecord {
            id,
            bind_point: PipelineBindPoint::Graphics,
            stages: desc.stages.iter().map(|s| s.stage).collect(),
            viewport: Some(desc.viewport),
            polygon_mode: Some(desc.polygon_mode),
            cull_mode: Some(desc.cull_mode),
            depth_test: desc.depth_test,
            alpha_blending: desc.alpha_blending,
            tessellated: desc.is_tessellated(),
            render_pass,
        });
        Ok(Arc::new(MockPipeline { id, bind_point: PipelineBindPoint::Graphics }))
    }

    fn create_compute_pipeline(&self, _desc: &ComputePipelineDesc) -> Result<Arc<dyn Pipeline>> {
        let id = next_id();
        self.state().pipelines.push(MockPipelineRecord {
            id,
            bind_point: PipelineBindPoint::Compute,
            stages: vec![ShaderStage::Compute],
            viewport: None,
            polygon_mode: None,
            cull_mode: None,
            depth_test: false,
            alpha_blending: false,
            tessellated: false,
            render_pass: None,
        });
        Ok(Arc::new(MockPipeline { id, bind_point: PipelineBindPoint::Compute }))
    }

    fn create_command_pool(&self, queue: QueueType) -> Result<Box<dyn CommandPool>> {
        let mut state = self.state();
        state.command_pools_created += 1;
        Ok(Box::new(MockCommandPool {
            id: next_id(),
            queue,
            capacity: state.command_pool_capacity,
            allocated: 0,
            recordings: self.recordings.clone(),
        }))
    }

    fn create_fence(&self, signalled: bool) -> Result<Arc<dyn Fence>> {
        Ok(Arc::new(MockFence { id: next_id(), signalled: AtomicBool::new(signalled) }))
    }

    fn create_semaphore(&self) -> Result<Arc<dyn Semaphore>> {
        Ok(Arc::new(MockSemaphore { id: next_id(), timeline: false, value: AtomicU64::new(0) }))
    }

    fn create_timeline_semaphore(&self, initial_value: u64) -> Result<Arc<dyn Semaphore>> {
        Ok(Arc::new(MockSemaphore { id: next_id(), timeline: true, value: AtomicU64::new(initial_value) }))
    }

    fn submit(&self, info: &SubmitInfo) -> Result<()> {
        let Some(command_buffer) = info.command_buffer.as_any().downcast_ref::<MockCommandBuffer>() else {
            engine_bail!("topaz::mock", "submit of a foreign command buffer");
        };
        if command_buffer.recording {
            engine_bail!("topaz::mock", "submit of command buffer#{} while recording", command_buffer.id);
        }
        if let Some(fence) = info.fence {
            if fence.is_signalled()? {
                engine_bail!("topaz::mock", "submit with an already signalled fence");
            }
        }

        let mut waits = Vec::with_capacity(info.waits.len());
        for wait in info.waits {
            let semaphore = mock_semaphore(&wait.semaphore)?;
            if semaphore.timeline {
                let value = semaphore.value.load(Ordering::SeqCst);
                if value < wait.value {
                    engine_bail!(
                        "topaz::mock",
                        "timeline semaphore#{} waits for {} but only {} can ever be reached",
                        semaphore.id, wait.value, value
                    );
                }
            } else {
                semaphore.consume_binary()?;
            }
            waits.push((semaphore.id, wait.value));
        }

        // Work completes immediately
        Self::execute_copies(&command_buffer.copies)?;

        let mut signals = Vec::with_capacity(info.signals.len());
        for signal in info.signals {
            let semaphore = mock_semaphore(&signal.semaphore)?;
            if semaphore.timeline {
                semaphore.signal_timeline(signal.value)?;
            } else {
                semaphore.signal_binary()?;
            }
            signals.push((semaphore.id, signal.value));
        }

        if let Some(fence) = info.fence {
            if let Some(fence) = fence.as_any().downcast_ref::<MockFence>() {
                fence.signalled.store(true, Ordering::SeqCst);
            }
        }

        self.state().submissions.push(MockSubmission {
            queue: info.queue,
            command_buffer: command_buffer.id,
            commands: command_buffer.commands.clone(),
            waits,
            signals,
        });
        Ok(())
    }

    fn wait_idle(&self) -> Result<()> {
        self.state().wait_idle_count += 1;
        Ok(())
    }
}

#[cfg(test)]
#[path = "mock_device_tests.rs"]
mod tests;
