/// Unit tests for descriptor_manager.rs

use crate::device::mock_device::{buffer_id, image_id, set_id, MockGraphicsDevice};
use crate::device::{DescriptorType, GraphicsDevice};
use crate::error::Error;
use crate::renderer::descriptor_manager::*;
use crate::renderer::resource_store::{descriptor_buffer_count, ResourceStore};
use crate::renderer::{RenderState, ResourceEntry};
use crate::resource::*;
use glam::UVec2;

fn device() -> MockGraphicsDevice {
    MockGraphicsDevice::new(3, UVec2::new(16, 16))
}

fn store(device: &MockGraphicsDevice, resources: Vec<Resource>) -> ResourceStore {
    let entries = resources.into_iter().map(ResourceEntry::Owned).collect();
    ResourceStore::new(device, entries, "R").unwrap()
}

fn mixed_resources() -> Vec<Resource> {
    vec![
        BufferResource::null().into(),
        ImageResource::null().into(),
        BufferResource::from_many(&[0u32, 1, 2]).with_flags(ResourceFlags::INDEX_BUFFER).into(),
        BufferResource::from_one(1.0f32).with_access(ResourceAccess::DynamicVariable).into(),
        ImageResource::null().into(),
    ]
}

fn mixed_state() -> RenderState {
    let mut state = RenderState::default();
    state.graphics.index_buffer = Some(ResourceHandle(2));
    state
}

// ============================================================================
// Layout Deduction
// ============================================================================

#[test]
fn test_deduce_layout_buffers_then_image_array() {
    let types: Vec<ResourceType> = mixed_resources().iter().map(|r| r.resource_type()).collect();
    let state = mixed_state();
    let layout = DescriptorManager::deduce_layout(&types, &state);

    assert_eq!(layout.bindings.len(), 3);
    assert_eq!(layout.bindings[0].descriptor_type, DescriptorType::StorageBuffer);
    assert_eq!(layout.bindings[1].binding, 1);
    let images = layout.bindings[2];
    assert_eq!(images.binding, descriptor_buffer_count(&types, &state));
    assert_eq!(images.descriptor_type, DescriptorType::CombinedImageSampler);
    assert_eq!(images.count, 2);
}

#[test]
fn test_buffer_binding_count_matches_function() {
    use ResourceType::{Buffer, Image};
    let types = [Buffer, Image, Buffer, Buffer];
    for index in [None, Some(ResourceHandle(0))] {
        for draw in [None, Some(ResourceHandle(2))] {
            let mut state = RenderState::default();
            state.graphics.index_buffer = index;
            state.graphics.draw_buffer = draw;
            let layout = DescriptorManager::deduce_layout(&types, &state);
            assert_eq!(
                layout.descriptor_count(DescriptorType::StorageBuffer),
                descriptor_buffer_count(&types, &state)
            );
        }
    }
}

// ============================================================================
// Allocation
// ============================================================================

#[test]
fn test_one_set_per_frame_in_flight() {
    let device = device();
    let store = store(&device, mixed_resources());
    let manager = DescriptorManager::new(&device, &store, &mixed_state(), device.frames_in_flight()).unwrap();

    assert_eq!(manager.sets().len(), 3);
    assert!(!manager.is_empty());
    let pools = device.state().descriptor_pools.clone();
    assert_eq!(pools.len(), 1);
    assert_eq!(pools[0].max_sets, 3);
    assert_eq!(pools[0].storage_buffers, 6);
    assert_eq!(pools[0].combined_image_samplers, 6);
}

#[test]
fn test_empty_layout_allocates_nothing() {
    let device = device();
    let store = store(&device, vec![BufferResource::from_many(&[0u32, 1, 2]).with_flags(ResourceFlags::INDEX_BUFFER).into()]);
    let mut state = RenderState::default();
    state.graphics.index_buffer = Some(ResourceHandle(0));

    let manager = DescriptorManager::new(&device, &store, &state, 3).unwrap();
    assert!(manager.is_empty());
    assert!(manager.sets().is_empty());
    assert!(device.state().descriptor_pools.is_empty());
}

#[test]
fn test_pool_exhaustion_retries_with_larger_pool() {
    let device = device();
    device.state().exhausted_descriptor_pools = MAX_POOL_ATTEMPTS as u32 - 1;
    let store = store(&device, vec![BufferResource::null().into()]);

    let manager = DescriptorManager::new(&device, &store, &RenderState::default(), 3).unwrap();
    assert_eq!(manager.sets().len(), 3);
    let pools = device.state().descriptor_pools.clone();
    assert_eq!(pools.len(), MAX_POOL_ATTEMPTS);
    assert_eq!(pools[1].max_sets, pools[0].max_sets * 2);
}

#[test]
fn test_pool_exhaustion_fails_after_bound() {
    let device = device();
    device.state().exhausted_descriptor_pools = MAX_POOL_ATTEMPTS as u32;
    let store = store(&device, vec![BufferResource::null().into()]);

    let result = DescriptorManager::new(&device, &store, &RenderState::default(), 3);
    assert!(matches!(result, Err(Error::OutOfMemory)));
    assert_eq!(device.state().descriptor_pools.len(), MAX_POOL_ATTEMPTS);
}

// ============================================================================
// Sync
// ============================================================================

#[test]
fn test_initial_sync_writes_every_binding() {
    let device = device();
    let store = store(&device, mixed_resources());
    let state = mixed_state();
    let manager = DescriptorManager::new(&device, &store, &state, 3).unwrap();

    let writes = device.state().descriptor_writes.clone();
    // 2 buffers + 2 images per set
    assert_eq!(writes.len(), 3 * 4);

    let first_set = set_id(&manager.sets()[0]);
    let first: Vec<_> = writes.iter().filter(|w| w.set == first_set).collect();
    let buffer = |h: u32| buffer_id(store.component(ResourceHandle(h)).unwrap().read().unwrap().buffer().unwrap());
    let image = |h: u32| image_id(store.component(ResourceHandle(h)).unwrap().read().unwrap().image().unwrap());
    assert_eq!((first[0].binding, first[0].object), (0, buffer(0)));
    assert_eq!((first[1].binding, first[1].array_element, first[1].object), (2, 0, image(1)));
    assert_eq!((first[2].binding, first[2].object), (1, buffer(3)));
    assert_eq!((first[3].binding, first[3].array_element, first[3].object), (2, 1, image(4)));
}

#[test]
fn test_buffer_only_sync_after_resize() {
    let device = device();
    let store = store(&device, mixed_resources());
    let state = mixed_state();
    let manager = DescriptorManager::new(&device, &store, &state, 3).unwrap();
    device.state().descriptor_writes.clear();

    store.buffer_resize(&device, ResourceHandle(3), 16).unwrap();
    manager.sync(&device, &store, &state, false).unwrap();

    let writes = device.state().descriptor_writes.clone();
    assert_eq!(writes.len(), 3 * 2);
    assert!(writes.iter().all(|w| w.descriptor_type == DescriptorType::StorageBuffer));
    let resized = buffer_id(store.component(ResourceHandle(3)).unwrap().read().unwrap().buffer().unwrap());
    assert_eq!(writes.iter().filter(|w| w.object == resized).count(), 3);
}
