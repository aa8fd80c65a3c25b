/// Tests for Renderer
///
/// These tests drive whole renderers against the mock device: construction,
/// frames, edits, sharing between renderers and surface changes.

use std::mem::size_of;
use std::sync::Arc;
use crate::device::mock_device::{buffer_contents, buffer_id, image_id, pipeline_id, MockGraphicsDevice};
use crate::device::{GraphicsDevice, ImageFormat, PolygonMode, ShaderStage};
use crate::device_context::DeviceContext;
use crate::error::Error;
use crate::log::CapturingLogger;
use crate::renderer::*;
use crate::resource::*;
use crate::topaz::log::LogSeverity;
use crate::topaz::Engine;
use glam::{IVec2, UVec2, UVec3, Vec4};
use serial_test::serial;
use super::MAX_OUT_OF_DATE_RETRIES;

fn setup(frames: usize) -> (Arc<MockGraphicsDevice>, DeviceContext) {
    let device = Arc::new(MockGraphicsDevice::new(frames, UVec2::new(32, 16)));
    let ctx = DeviceContext::new(device.clone()).unwrap();
    (device, ctx)
}

fn compute_info() -> RendererInfo {
    let mut info = RendererInfo::new();
    info.shader_mut().set_shader(ShaderStage::Compute, vec![0u8]);
    info
}

fn graphics_info(options: RendererOptions) -> RendererInfo {
    let mut info = RendererInfo::new();
    info.shader_mut()
        .set_shader(ShaderStage::Vertex, vec![1u8])
        .set_shader(ShaderStage::Fragment, vec![2u8]);
    info.set_options(options).set_tri_count(1);
    info
}

fn dynamic(value: f32) -> BufferResource {
    BufferResource::from_one(value).with_access(ResourceAccess::DynamicVariable)
}

fn gpu_buffer(renderer: &Renderer, handle: ResourceHandle) -> Vec<u8> {
    let component = renderer.get_component(handle).unwrap();
    let buffer = component.read().unwrap().buffer().cloned().unwrap();
    buffer_contents(&buffer)
}

fn f32_bytes(values: &[f32]) -> Vec<u8> {
    bytemuck::cast_slice(values).to_vec()
}

// ============================================================================
// Tests: End-to-End Scenarios
// ============================================================================

#[test]
fn test_static_buffer_renders_and_keeps_data() {
    let (_, mut ctx) = setup(2);
    let mut info = compute_info();
    let handle = info.add_resource(BufferResource::from_one(1.0f32)).unwrap();
    let mut renderer = Renderer::new(&mut ctx, info).unwrap();

    renderer.render(&mut ctx).unwrap();
    assert_eq!(renderer.get_resource(handle).unwrap().data().read::<f32>(0), Some(1.0));
    assert_eq!(gpu_buffer(&renderer, handle), f32_bytes(&[1.0]));
}

#[test]
fn test_reference_sees_other_renderers_buffer() {
    let (_, mut ctx) = setup(2);
    let mut info = compute_info();
    let handle = info.add_resource(dynamic(69.0)).unwrap();
    let mut first = Renderer::new(&mut ctx, info).unwrap();

    let mut info = compute_info();
    let reference = info.ref_resource(&first, handle).unwrap();
    let mut second = Renderer::new(&mut ctx, info).unwrap();

    first.render(&mut ctx).unwrap();
    second.render(&mut ctx).unwrap();
    assert_eq!(second.get_resource(reference).unwrap().data().read::<f32>(0), Some(69.0));
    assert!(first.get_component(handle).unwrap().ptr_eq(&second.get_component(reference).unwrap()));
}

#[test]
fn test_buffer_resize_preserves_prefix() {
    let (_, mut ctx) = setup(2);
    let mut info = compute_info();
    let handle = info.add_resource(dynamic(1.0)).unwrap();
    let mut renderer = Renderer::new(&mut ctx, info).unwrap();

    let request = RendererEditBuilder::new().buffer_resize(handle, 2 * size_of::<f32>()).build();
    renderer.edit(&mut ctx, request).unwrap();

    let resource = renderer.get_resource(handle).unwrap();
    assert_eq!(resource.data().size_bytes(), 2 * size_of::<f32>());
    assert_eq!(resource.data().read::<f32>(0), Some(1.0));
    assert_eq!(resource.data().read::<f32>(1), Some(0.0));
    drop(resource);
    renderer.render(&mut ctx).unwrap();
}

#[test]
fn test_write_edit_is_visible() {
    let (device, mut ctx) = setup(2);
    let mut info = compute_info();
    let handle = info.add_resource(BufferResource::from_many(&[1.0f32, 2.0, 3.0])).unwrap();
    let mut renderer = Renderer::new(&mut ctx, info).unwrap();
    let submissions = device.submission_count();

    let request = RendererEditBuilder::new().write(handle, 0, &f32_bytes(&[4.0, 5.0, 6.0])).build();
    renderer.edit(&mut ctx, request).unwrap();

    assert_eq!(renderer.get_resource(handle).unwrap().data().as_slice::<f32>(), Some(&[4.0f32, 5.0, 6.0][..]));
    assert_eq!(gpu_buffer(&renderer, handle), f32_bytes(&[4.0, 5.0, 6.0]));
    // One scratch submission for the staged copy
    assert_eq!(device.submission_count(), submissions + 1);
}

#[test]
fn test_compute_renderer_ignores_draw_buffers() {
    let (device, mut ctx) = setup(2);
    let mut info = compute_info();
    info.add_resource(BufferResource::null()).unwrap();
    info.add_resource(BufferResource::from_many(&[0u32, 1, 2]).with_flags(ResourceFlags::INDEX_BUFFER)).unwrap();
    info.add_resource(BufferResource::from_many(&[3u32, 1, 0, 0]).with_flags(ResourceFlags::DRAW_INDIRECT_BUFFER))
        .unwrap();
    let mut renderer = Renderer::new(&mut ctx, info).unwrap();
    renderer.render(&mut ctx).unwrap();

    assert_eq!(renderer.descriptors.layout().desc().bindings.len(), 1);
    let commands = device.last_commands();
    assert_eq!(commands.last().map(String::as_str), Some("dispatch(1, 1, 1)"));
    assert!(commands.iter().all(|c| !c.starts_with("draw") && !c.starts_with("bind_index_buffer")));
}

// ============================================================================
// Tests: Aliasing And Sharing
// ============================================================================

#[test]
fn test_dynamic_writes_alias_gpu_memory() {
    let (_, mut ctx) = setup(2);
    let mut info = compute_info();
    let handle = info.add_resource(dynamic(0.0)).unwrap();
    let mut renderer = Renderer::new(&mut ctx, info).unwrap();

    renderer.get_resource_mut(handle).unwrap().write(0, 5.0f32).unwrap();
    assert_eq!(gpu_buffer(&renderer, handle), f32_bytes(&[5.0]));
    renderer.render(&mut ctx).unwrap();
}

#[test]
fn test_byte_writes_keep_the_mapping() {
    let (_, mut ctx) = setup(2);
    let mut info = compute_info();
    let handle = info
        .add_resource(BufferResource::from_many(&[0.0f32, 0.0]).with_access(ResourceAccess::DynamicFixed))
        .unwrap();
    let mut renderer = Renderer::new(&mut ctx, info).unwrap();

    let mut resource = renderer.get_resource_mut(handle).unwrap();
    resource.as_slice_mut::<f32>().unwrap()[0] = 3.0;
    resource.as_bytes_mut()[4..].copy_from_slice(&4.0f32.to_le_bytes());
    assert!(resource.data().is_mapped());
    assert_eq!(resource.resource_type(), ResourceType::Buffer);
    drop(resource);

    assert_eq!(gpu_buffer(&renderer, handle), f32_bytes(&[3.0, 4.0]));
    renderer.render(&mut ctx).unwrap();
}

#[test]
fn test_held_guard_fails_other_renderers_instead_of_blocking() {
    let (_, mut ctx) = setup(2);
    let mut info = compute_info();
    let handle = info.add_resource(dynamic(69.0)).unwrap();
    let mut first = Renderer::new(&mut ctx, info).unwrap();

    let mut info = compute_info();
    let reference = info.ref_resource(&first, handle).unwrap();
    let mut second = Renderer::new(&mut ctx, info).unwrap();
    first.render(&mut ctx).unwrap();
    second.render(&mut ctx).unwrap();

    let mut guard = first.get_resource_mut(handle).unwrap();
    guard.write(0, 1.0f32).unwrap();
    // Nothing to rebind, so the frame goes through
    second.render(&mut ctx).unwrap();
    assert!(matches!(second.get_resource(reference), Err(Error::InvalidResource(_))));
    drop(guard);
    assert_eq!(second.get_resource(reference).unwrap().data().read::<f32>(0), Some(1.0));

    first.edit(&mut ctx, RendererEditBuilder::new().buffer_resize(handle, 8).build()).unwrap();
    let guard = first.get_resource_mut(handle).unwrap();
    // The recreated buffer cannot be rebound while it is borrowed
    assert!(matches!(second.render(&mut ctx), Err(Error::InvalidResource(_))));
    drop(guard);
    second.render(&mut ctx).unwrap();
    assert_eq!(second.get_resource(reference).unwrap().data().size_bytes(), 8);
}

#[test]
fn test_image_resize_is_seen_through_references() {
    let (device, mut ctx) = setup(2);
    let mut info = compute_info();
    let image = ImageResource::from_uninitialised(ImageFormat::RGBA32, UVec2::new(4, 4))
        .with_access(ResourceAccess::DynamicVariable);
    let handle = info.add_resource(image).unwrap();
    let mut owner = Renderer::new(&mut ctx, info).unwrap();

    let mut info = compute_info();
    let reference = info.ref_resource(&owner, handle).unwrap();
    let mut referrer = Renderer::new(&mut ctx, info).unwrap();
    referrer.render(&mut ctx).unwrap();

    let idle = device.state().wait_idle_count;
    let request = RendererEditBuilder::new().image_resize(handle, UVec2::new(8, 2)).build();
    owner.edit(&mut ctx, request).unwrap();
    assert_eq!(device.state().wait_idle_count, idle + 1);
    assert_eq!(owner.get_resource(handle).unwrap().dimensions(), Some(UVec2::new(8, 2)));
    assert_eq!(referrer.get_resource(reference).unwrap().dimensions(), Some(UVec2::new(8, 2)));

    // The referrer rebinds the recreated image before its next frame
    referrer.render(&mut ctx).unwrap();
    let new_image = owner.get_component(handle).unwrap().read().unwrap().image().cloned().unwrap();
    let last_write = device.state().descriptor_writes.last().cloned().unwrap();
    assert_eq!(last_write.object, image_id(&new_image));
}

#[test]
fn test_reseat_points_at_other_component() {
    let (device, mut ctx) = setup(2);
    let mut info = compute_info();
    let source_handle = info.add_resource(dynamic(7.0)).unwrap();
    let source = Renderer::new(&mut ctx, info).unwrap();

    let mut info = compute_info();
    let handle = info.add_resource(dynamic(0.0)).unwrap();
    let mut renderer = Renderer::new(&mut ctx, info).unwrap();

    let component = source.get_component(source_handle).unwrap();
    renderer.edit(&mut ctx, RendererEditBuilder::new().reseat(handle, component.clone()).build()).unwrap();

    assert_eq!(renderer.get_resource(handle).unwrap().data().read::<f32>(0), Some(7.0));
    assert!(!renderer.store.slot(handle).unwrap().owned);
    let buffer = component.read().unwrap().buffer().cloned().unwrap();
    assert_eq!(device.state().descriptor_writes.last().unwrap().object, buffer_id(&buffer));
}

// ============================================================================
// Tests: Edits
// ============================================================================

#[test]
fn test_index_buffer_resize_rerecords_draw() {
    let (device, mut ctx) = setup(2);
    let mut info = graphics_info(RendererOptions::empty());
    let indices = BufferResource::from_many(&[0u32, 1, 2])
        .with_flags(ResourceFlags::INDEX_BUFFER)
        .with_access(ResourceAccess::DynamicVariable);
    let handle = info.add_resource(indices).unwrap();
    let mut renderer = Renderer::new(&mut ctx, info).unwrap();

    renderer.render(&mut ctx).unwrap();
    let old = renderer.get_component(handle).unwrap().read().unwrap().buffer().cloned().unwrap();
    assert!(device.last_commands().contains(&format!("bind_index_buffer(buffer#{})", buffer_id(&old))));

    renderer.edit(&mut ctx, RendererEditBuilder::new().buffer_resize(handle, 24).build()).unwrap();
    renderer.render(&mut ctx).unwrap();
    let new = renderer.get_component(handle).unwrap().read().unwrap().buffer().cloned().unwrap();
    assert_ne!(buffer_id(&old), buffer_id(&new));
    assert!(device.last_commands().contains(&format!("bind_index_buffer(buffer#{})", buffer_id(&new))));
}

#[test]
fn test_draw_buffer_resize_rerecords_indirect_draw() {
    let (device, mut ctx) = setup(2);
    let mut info = graphics_info(RendererOptions::empty());
    let draws = BufferResource::from_many(&[3u32, 1, 0, 0])
        .with_flags(ResourceFlags::DRAW_INDIRECT_BUFFER)
        .with_access(ResourceAccess::DynamicVariable);
    let handle = info.add_resource(draws).unwrap();
    let mut renderer = Renderer::new(&mut ctx, info).unwrap();

    renderer.render(&mut ctx).unwrap();
    let old = renderer.get_component(handle).unwrap().read().unwrap().buffer().cloned().unwrap();
    assert!(device.last_commands().contains(&format!("draw_indirect(buffer#{}, 0, 1, 16)", buffer_id(&old))));

    renderer.edit(&mut ctx, RendererEditBuilder::new().buffer_resize(handle, 32).build()).unwrap();
    renderer.render(&mut ctx).unwrap();
    let new = renderer.get_component(handle).unwrap().read().unwrap().buffer().cloned().unwrap();
    assert_ne!(buffer_id(&old), buffer_id(&new));
    assert!(device.last_commands().contains(&format!("draw_indirect(buffer#{}, 0, 2, 16)", buffer_id(&new))));
}

#[test]
fn test_resized_dynamic_buffer_takes_new_values() {
    let (_, mut ctx) = setup(2);
    let mut info = compute_info();
    let values = BufferResource::from_many(&[1.0f32, 2.0, 3.0]).with_access(ResourceAccess::DynamicVariable);
    let handle = info.add_resource(values).unwrap();
    let mut renderer = Renderer::new(&mut ctx, info).unwrap();
    renderer.render(&mut ctx).unwrap();

    let request = RendererEditBuilder::new()
        .buffer_resize(handle, 4 * size_of::<f32>())
        .write(handle, 0, &f32_bytes(&[4.0, 5.0, 6.0]))
        .build();
    renderer.edit(&mut ctx, request).unwrap();
    renderer.render(&mut ctx).unwrap();

    let expected = [4.0f32, 5.0, 6.0, 0.0];
    assert_eq!(renderer.get_resource(handle).unwrap().data().as_slice::<f32>(), Some(&expected[..]));
    assert_eq!(gpu_buffer(&renderer, handle), f32_bytes(&expected));

    renderer.get_resource_mut(handle).unwrap().write(3, 7.0f32).unwrap();
    assert_eq!(gpu_buffer(&renderer, handle), f32_bytes(&[4.0, 5.0, 6.0, 7.0]));
}

#[test]
fn test_failed_edit_batch_changes_nothing() {
    let (device, mut ctx) = setup(2);
    let mut info = compute_info();
    let handle = info.add_resource(BufferResource::from_many(&[1.0f32, 2.0, 3.0])).unwrap();
    let mut renderer = Renderer::new(&mut ctx, info).unwrap();
    let submissions = device.submission_count();
    let recordings = device.recordings();

    let request = RendererEditBuilder::new()
        .write(handle, 0, &f32_bytes(&[4.0, 5.0, 6.0]))
        .buffer_resize(ResourceHandle(99), 8)
        .build();
    assert!(matches!(renderer.edit(&mut ctx, request), Err(Error::InvalidHandle(_))));

    let original = [1.0f32, 2.0, 3.0];
    assert_eq!(renderer.get_resource(handle).unwrap().data().as_slice::<f32>(), Some(&original[..]));
    assert_eq!(gpu_buffer(&renderer, handle), f32_bytes(&original));
    assert_eq!(device.submission_count(), submissions);
    assert_eq!(device.recordings(), recordings);

    renderer.render(&mut ctx).unwrap();
    assert_eq!(gpu_buffer(&renderer, handle), f32_bytes(&original));
}

#[test]
fn test_failed_edit_batch_keeps_render_state() {
    let (device, mut ctx) = setup(2);
    let mut renderer = Renderer::new(&mut ctx, graphics_info(RendererOptions::empty())).unwrap();
    let pipelines = device.state().pipelines.len();

    let config = RenderConfig { wireframe: Some(true), tri_count: Some(4), ..Default::default() };
    let request = RendererEditBuilder::new().render_state(config).write(ResourceHandle(5), 0, &[0u8; 4]).build();
    assert!(renderer.edit(&mut ctx, request).is_err());

    assert!(!renderer.render_state().graphics.wireframe);
    assert_eq!(renderer.render_state().graphics.tri_count, 1);
    assert_eq!(device.state().pipelines.len(), pipelines);
    renderer.render(&mut ctx).unwrap();
    assert!(device.last_commands().contains(&"draw(3)".to_string()));
}

#[test]
fn test_empty_edit_is_a_no_op() {
    let (device, mut ctx) = setup(2);
    let mut info = compute_info();
    info.add_resource(dynamic(1.0)).unwrap();
    let mut renderer = Renderer::new(&mut ctx, info).unwrap();

    let recordings = device.recordings();
    let writes = device.state().descriptor_writes.len();
    renderer.edit(&mut ctx, RendererEditRequest::default()).unwrap();
    assert_eq!(device.recordings(), recordings);
    assert_eq!(device.state().descriptor_writes.len(), writes);
}

#[test]
fn test_set_count_follows_frames_in_flight() {
    let (_, mut ctx) = setup(3);
    let mut info = compute_info();
    let image = ImageResource::from_uninitialised(ImageFormat::RGBA32, UVec2::new(2, 2))
        .with_access(ResourceAccess::DynamicVariable);
    let handle = info.add_resource(image).unwrap();
    info.add_resource(dynamic(1.0)).unwrap();
    let mut renderer = Renderer::new(&mut ctx, info).unwrap();
    assert_eq!(renderer.descriptors.sets().len(), 3);

    renderer.edit(&mut ctx, RendererEditBuilder::new().image_resize(handle, UVec2::new(4, 4)).build()).unwrap();
    assert_eq!(renderer.descriptors.sets().len(), 3);
}

#[test]
fn test_scissor_edit_rerecords() {
    let (device, mut ctx) = setup(2);
    let mut renderer = Renderer::new(&mut ctx, graphics_info(RendererOptions::empty())).unwrap();

    let recordings = device.recordings();
    let region = ScissorRegion::new(IVec2::new(2, 3), UVec2::new(4, 5));
    renderer.edit(&mut ctx, RendererEditBuilder::new().scissor(Some(region)).build()).unwrap();
    assert_eq!(device.recordings(), recordings + 2);

    renderer.render(&mut ctx).unwrap();
    assert!(device.last_commands().contains(&"set_scissor(2, 3, 4, 5)".to_string()));
}

#[test]
fn test_tri_count_sticks_between_frames() {
    let (device, mut ctx) = setup(2);
    let mut renderer = Renderer::new(&mut ctx, graphics_info(RendererOptions::empty())).unwrap();

    renderer.render(&mut ctx).unwrap();
    assert!(device.last_commands().contains(&"draw(3)".to_string()));
    renderer.render_tris(&mut ctx, 5).unwrap();
    assert!(device.last_commands().contains(&"draw(15)".to_string()));
    renderer.render(&mut ctx).unwrap();
    assert!(device.last_commands().contains(&"draw(15)".to_string()));
    assert_eq!(renderer.render_state().graphics.tri_count, 5);
}

#[test]
fn test_wireframe_recreates_pipeline() {
    let (device, mut ctx) = setup(2);
    let mut renderer = Renderer::new(&mut ctx, graphics_info(RendererOptions::empty())).unwrap();
    let pipelines = device.state().pipelines.len();

    let config = RenderConfig { wireframe: Some(true), ..Default::default() };
    renderer.edit(&mut ctx, RendererEditBuilder::new().render_state(config).build()).unwrap();
    assert_eq!(device.state().pipelines.len(), pipelines + 1);
    assert_eq!(device.state().pipelines.last().unwrap().polygon_mode, Some(PolygonMode::Line));

    renderer.render(&mut ctx).unwrap();
    let bind = format!("bind_pipeline(pipeline#{})", pipeline_id(renderer.pipeline.pipeline()));
    assert!(device.last_commands().contains(&bind));
}

#[test]
fn test_clear_colour_rerecords_without_new_pipeline() {
    let (device, mut ctx) = setup(2);
    let mut renderer = Renderer::new(&mut ctx, graphics_info(RendererOptions::NO_DEPTH_TESTING)).unwrap();
    let pipelines = device.state().pipelines.len();
    let recordings = device.recordings();

    let config = RenderConfig { clear_colour: Some(Vec4::new(1.0, 0.0, 0.0, 1.0)), ..Default::default() };
    renderer.edit(&mut ctx, RendererEditBuilder::new().render_state(config).build()).unwrap();
    assert_eq!(device.state().pipelines.len(), pipelines);
    assert_eq!(device.recordings(), recordings + 2);

    renderer.render(&mut ctx).unwrap();
    assert!(device.last_commands()[0].contains("Colour([1.0, 0.0, 0.0, 1.0])"));
}

#[test]
fn test_contract_violations() {
    let (_, mut ctx) = setup(2);
    let mut info = compute_info();
    let fixed = info.add_resource(BufferResource::from_one(1.0f32)).unwrap();
    let mut renderer = Renderer::new(&mut ctx, info).unwrap();

    assert!(matches!(renderer.get_resource(ResourceHandle(9)), Err(Error::InvalidHandle(_))));
    let result = renderer.edit(&mut ctx, RendererEditBuilder::new().buffer_resize(fixed, 8).build());
    assert!(matches!(result, Err(Error::InvalidResource(_))));
}

#[test]
#[serial]
fn test_mismatched_config_is_ignored_with_warning() {
    let logger = CapturingLogger::default();
    Engine::set_logger(logger.clone());

    let (_, mut ctx) = setup(2);
    let mut graphics = Renderer::new(&mut ctx, graphics_info(RendererOptions::empty())).unwrap();
    graphics.edit(&mut ctx, RendererEditBuilder::new().compute(UVec3::new(2, 2, 2)).build()).unwrap();
    let mut compute = Renderer::new(&mut ctx, compute_info()).unwrap();
    let config = RenderConfig { tri_count: Some(4), ..Default::default() };
    compute.edit(&mut ctx, RendererEditBuilder::new().render_state(config).build()).unwrap();

    let warnings = logger.messages(LogSeverity::Warn);
    Engine::reset_logger();
    assert!(warnings.iter().any(|m| m.contains("compute config ignored")));
    assert!(warnings.iter().any(|m| m.contains("render config ignored")));
    assert_eq!(graphics.render_state().compute.kernel, UVec3::ONE);
}

// ============================================================================
// Tests: Window And Surface
// ============================================================================

#[test]
fn test_surface_generation_bump_re_resolves_targets() {
    let (device, mut ctx) = setup(2);
    let mut renderer = Renderer::new(&mut ctx, graphics_info(RendererOptions::empty())).unwrap();
    renderer.render(&mut ctx).unwrap();
    let pipelines = device.state().pipelines.len();

    device.resize_window(UVec2::new(64, 48));
    ctx.notify_resize().unwrap();
    renderer.render(&mut ctx).unwrap();

    let output = renderer.output.as_ref().unwrap();
    assert_eq!(output.dimensions(), UVec2::new(64, 48));
    assert!(output.has_depth());
    let surface = device.surface_images();
    assert_eq!(image_id(&output.targets()[0].colours[0]), image_id(&surface[0]));
    assert_eq!(device.state().pipelines.len(), pipelines + 1);
    let viewport = device.state().pipelines.last().unwrap().viewport.unwrap();
    assert_eq!((viewport.width, viewport.height), (64.0, 48.0));
}

#[test]
fn test_window_output_images_follow_window_size() {
    let (device, mut ctx) = setup(2);
    let mut info = graphics_info(RendererOptions::empty());
    let image = ImageResource::from_uninitialised(ImageFormat::RGBA32, UVec2::new(32, 16))
        .with_flags(ResourceFlags::RENDERER_OUTPUT)
        .with_access(ResourceAccess::DynamicVariable);
    let handle = info.add_resource(image).unwrap();
    let mut renderer = Renderer::new(&mut ctx, info).unwrap();

    device.resize_window(UVec2::new(20, 10));
    ctx.notify_resize().unwrap();
    renderer.render(&mut ctx).unwrap();
    assert_eq!(renderer.get_resource(handle).unwrap().dimensions(), Some(UVec2::new(20, 10)));
}

#[test]
fn test_no_present_hands_image_to_next_renderer() {
    let (device, mut ctx) = setup(2);
    let mut background = Renderer::new(&mut ctx, graphics_info(RendererOptions::NO_PRESENT)).unwrap();
    let mut overlay = Renderer::new(&mut ctx, graphics_info(RendererOptions::NO_CLEAR_OUTPUT)).unwrap();

    background.render(&mut ctx).unwrap();
    overlay.render(&mut ctx).unwrap();

    let state = device.state();
    assert_eq!(state.presents, vec![0]);
    assert_eq!(state.submissions[state.submissions.len() - 2].waits.len(), 1);
    assert!(state.submissions.last().unwrap().waits.is_empty());
}

#[test]
fn test_acquire_out_of_date_is_retried_then_fatal() {
    let (device, mut ctx) = setup(2);
    let mut renderer = Renderer::new(&mut ctx, graphics_info(RendererOptions::empty())).unwrap();

    device.state().out_of_date_acquires = MAX_OUT_OF_DATE_RETRIES as u32;
    renderer.render(&mut ctx).unwrap();
    assert_eq!(device.state().surface_recreations, MAX_OUT_OF_DATE_RETRIES);
    assert_eq!(device.state().presents.len(), 1);

    device.state().out_of_date_acquires = MAX_OUT_OF_DATE_RETRIES as u32 + 1;
    assert!(matches!(renderer.render(&mut ctx), Err(Error::OutOfDate)));
}

#[test]
fn test_present_out_of_date_recreates_surface() {
    let (device, mut ctx) = setup(2);
    let mut renderer = Renderer::new(&mut ctx, graphics_info(RendererOptions::empty())).unwrap();

    device.state().out_of_date_presents = 1;
    renderer.render(&mut ctx).unwrap();
    assert_eq!(device.state().surface_recreations, 1);
    assert!(!renderer.output.as_ref().unwrap().is_stale(device.as_ref()));

    renderer.render(&mut ctx).unwrap();
    assert_eq!(device.state().presents.len(), 2);
}

#[test]
fn test_minimised_window_skips_frames() {
    let (device, mut ctx) = setup(2);
    let mut renderer = Renderer::new(&mut ctx, graphics_info(RendererOptions::empty())).unwrap();
    let submissions = device.submission_count();

    device.resize_window(UVec2::ZERO);
    ctx.notify_resize().unwrap();
    renderer.render(&mut ctx).unwrap();
    assert_eq!(device.submission_count(), submissions);

    device.resize_window(UVec2::new(32, 16));
    ctx.notify_resize().unwrap();
    renderer.render(&mut ctx).unwrap();
    assert_eq!(device.submission_count(), submissions + 1);
}

// ============================================================================
// Tests: Render Graph
// ============================================================================

#[test]
fn test_dependencies_become_timeline_waits() {
    let (device, mut ctx) = setup(2);
    let mut producer = Renderer::new(&mut ctx, compute_info()).unwrap();
    let mut consumer = Renderer::new(&mut ctx, compute_info()).unwrap();
    let graph = ctx.render_graph_mut();
    graph.set_timeline(vec![producer.id(), consumer.id()]).unwrap();
    graph.add_dependencies(consumer.id(), &[producer.id()]).unwrap();

    for frame in 0..2u64 {
        producer.render(&mut ctx).unwrap();
        consumer.render(&mut ctx).unwrap();
        let state = device.state();
        let consumer_submit = state.submissions.last().unwrap();
        assert_eq!(consumer_submit.waits.iter().map(|(_, v)| *v).collect::<Vec<_>>(), vec![2 * frame + 1]);
        assert_eq!(consumer_submit.signals.iter().map(|(_, v)| *v).collect::<Vec<_>>(), vec![2 * frame + 2]);
    }
}

#[test]
fn test_renderer_outside_timeline_has_no_semaphores() {
    let (device, mut ctx) = setup(2);
    let mut renderer = Renderer::new(&mut ctx, compute_info()).unwrap();
    renderer.render(&mut ctx).unwrap();
    let state = device.state();
    assert!(state.submissions.last().unwrap().waits.is_empty());
    assert!(state.submissions.last().unwrap().signals.is_empty());
}

#[test]
fn test_dropped_renderer_leaves_graph_and_frees_id() {
    let (device, mut ctx) = setup(2);
    let producer = Renderer::new(&mut ctx, compute_info()).unwrap();
    let mut consumer = Renderer::new(&mut ctx, compute_info()).unwrap();
    let id = producer.id();
    let graph = ctx.render_graph_mut();
    graph.set_timeline(vec![id, consumer.id()]).unwrap();
    graph.add_dependencies(consumer.id(), &[id]).unwrap();

    let idle = device.state().wait_idle_count;
    drop(producer);
    assert_eq!(device.state().wait_idle_count, idle + 1);

    // No longer waits on a producer that will never signal
    consumer.render(&mut ctx).unwrap();
    let graph = ctx.render_graph();
    assert!(graph.rank(id).is_none());
    assert_eq!(graph.timeline(), &[consumer.id()]);
    assert!(graph.dependencies(consumer.id()).is_empty());
    assert_eq!(ctx.renderer_count(), 1);
    assert_eq!(ctx.register_renderer(), id);
}
