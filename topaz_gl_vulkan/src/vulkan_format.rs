/// Conversions between topaz device enums and their Vulkan counterparts

use ash::vk;
use topaz_gl::device::{
    AddressMode, AttachmentDesc, BufferUsage, ClearValue, CullMode, DescriptorType, Filter, ImageFormat,
    ImageLayout, ImageUsage, LoadOp, PolygonMode, ShaderStage, StoreOp,
};

pub(crate) fn image_format_to_vk(format: ImageFormat) -> vk::Format {
    match format {
        ImageFormat::RGBA32 => vk::Format::R8G8B8A8_UNORM,
        ImageFormat::BGRA32 => vk::Format::B8G8R8A8_UNORM,
        ImageFormat::RGBA32_SRGB => vk::Format::R8G8B8A8_SRGB,
        ImageFormat::BGRA32_SRGB => vk::Format::B8G8R8A8_SRGB,
        ImageFormat::R32_SFLOAT => vk::Format::R32_SFLOAT,
        ImageFormat::RGBA128_SFLOAT => vk::Format::R32G32B32A32_SFLOAT,
        ImageFormat::Depth32_SFLOAT => vk::Format::D32_SFLOAT,
    }
}

/// Reverse mapping, used for swapchain formats
pub(crate) fn image_format_from_vk(format: vk::Format) -> Option<ImageFormat> {
    match format {
        vk::Format::R8G8B8A8_UNORM => Some(ImageFormat::RGBA32),
        vk::Format::B8G8R8A8_UNORM => Some(ImageFormat::BGRA32),
        vk::Format::R8G8B8A8_SRGB => Some(ImageFormat::RGBA32_SRGB),
        vk::Format::B8G8R8A8_SRGB => Some(ImageFormat::BGRA32_SRGB),
        vk::Format::R32_SFLOAT => Some(ImageFormat::R32_SFLOAT),
        vk::Format::R32G32B32A32_SFLOAT => Some(ImageFormat::RGBA128_SFLOAT),
        vk::Format::D32_SFLOAT => Some(ImageFormat::Depth32_SFLOAT),
        _ => None,
    }
}

pub(crate) fn aspect_mask(format: ImageFormat) -> vk::ImageAspectFlags {
    if format.is_depth() {
        vk::ImageAspectFlags::DEPTH
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

pub(crate) fn buffer_usage_to_vk(usage: BufferUsage) -> vk::BufferUsageFlags {
    let mut flags = vk::BufferUsageFlags::empty();
    if usage.contains(BufferUsage::STORAGE) {
        flags |= vk::BufferUsageFlags::STORAGE_BUFFER;
    }
    if usage.contains(BufferUsage::INDEX) {
        flags |= vk::BufferUsageFlags::INDEX_BUFFER;
    }
    if usage.contains(BufferUsage::INDIRECT) {
        flags |= vk::BufferUsageFlags::INDIRECT_BUFFER;
    }
    if usage.contains(BufferUsage::TRANSFER_SRC) {
        flags |= vk::BufferUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(BufferUsage::TRANSFER_DST) {
        flags |= vk::BufferUsageFlags::TRANSFER_DST;
    }
    flags
}

pub(crate) fn image_usage_to_vk(usage: ImageUsage) -> vk::ImageUsageFlags {
    let mut flags = vk::ImageUsageFlags::empty();
    if usage.contains(ImageUsage::SAMPLED) {
        flags |= vk::ImageUsageFlags::SAMPLED;
    }
    if usage.contains(ImageUsage::TRANSFER_DST) {
        flags |= vk::ImageUsageFlags::TRANSFER_DST;
    }
    if usage.contains(ImageUsage::COLOUR_ATTACHMENT) {
        flags |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
    }
    if usage.contains(ImageUsage::DEPTH_ATTACHMENT) {
        flags |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
    }
    flags
}

/// Vulkan layout for a frontend layout, given the image format
///
/// `ShaderReadOnly` and `DepthAttachment` keep their meaning for depth images.
pub(crate) fn image_layout_to_vk(layout: ImageLayout) -> vk::ImageLayout {
    match layout {
        ImageLayout::Undefined => vk::ImageLayout::UNDEFINED,
        ImageLayout::ColourAttachment => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        ImageLayout::DepthAttachment => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        ImageLayout::ShaderReadOnly => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        ImageLayout::TransferDst => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        ImageLayout::Present => vk::ImageLayout::PRESENT_SRC_KHR,
    }
}

pub(crate) fn load_op_to_vk(op: LoadOp) -> vk::AttachmentLoadOp {
    match op {
        LoadOp::Load => vk::AttachmentLoadOp::LOAD,
        LoadOp::Clear => vk::AttachmentLoadOp::CLEAR,
        LoadOp::DontCare => vk::AttachmentLoadOp::DONT_CARE,
    }
}

pub(crate) fn store_op_to_vk(op: StoreOp) -> vk::AttachmentStoreOp {
    match op {
        StoreOp::Store => vk::AttachmentStoreOp::STORE,
        StoreOp::DontCare => vk::AttachmentStoreOp::DONT_CARE,
    }
}

pub(crate) fn attachment_to_vk(attachment: &AttachmentDesc) -> vk::AttachmentDescription {
    vk::AttachmentDescription::default()
        .format(image_format_to_vk(attachment.format))
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(load_op_to_vk(attachment.load_op))
        .store_op(store_op_to_vk(attachment.store_op))
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(image_layout_to_vk(attachment.initial_layout))
        .final_layout(image_layout_to_vk(attachment.final_layout))
}

pub(crate) fn clear_value_to_vk(value: ClearValue) -> vk::ClearValue {
    match value {
        ClearValue::Colour(float32) => vk::ClearValue {
            color: vk::ClearColorValue { float32 },
        },
        ClearValue::DepthStencil { depth, stencil } => vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue { depth, stencil },
        },
    }
}

pub(crate) fn cull_mode_to_vk(mode: CullMode) -> vk::CullModeFlags {
    match mode {
        CullMode::None => vk::CullModeFlags::NONE,
        CullMode::Front => vk::CullModeFlags::FRONT,
        CullMode::Back => vk::CullModeFlags::BACK,
        CullMode::Both => vk::CullModeFlags::FRONT_AND_BACK,
    }
}

pub(crate) fn polygon_mode_to_vk(mode: PolygonMode) -> vk::PolygonMode {
    match mode {
        PolygonMode::Fill => vk::PolygonMode::FILL,
        PolygonMode::Line => vk::PolygonMode::LINE,
    }
}

pub(crate) fn shader_stage_to_vk(stage: ShaderStage) -> vk::ShaderStageFlags {
    match stage {
        ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
        ShaderStage::TessellationControl => vk::ShaderStageFlags::TESSELLATION_CONTROL,
        ShaderStage::TessellationEvaluation => vk::ShaderStageFlags::TESSELLATION_EVALUATION,
        ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
        ShaderStage::Compute => vk::ShaderStageFlags::COMPUTE,
    }
}

pub(crate) fn descriptor_type_to_vk(descriptor_type: DescriptorType) -> vk::DescriptorType {
    match descriptor_type {
        DescriptorType::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
        DescriptorType::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
    }
}

pub(crate) fn filter_to_vk(filter: Filter) -> (vk::Filter, vk::SamplerMipmapMode) {
    match filter {
        Filter::Nearest => (vk::Filter::NEAREST, vk::SamplerMipmapMode::NEAREST),
        Filter::Linear => (vk::Filter::LINEAR, vk::SamplerMipmapMode::LINEAR),
    }
}

pub(crate) fn address_mode_to_vk(mode: AddressMode) -> vk::SamplerAddressMode {
    match mode {
        AddressMode::ClampToEdge => vk::SamplerAddressMode::CLAMP_TO_EDGE,
        AddressMode::Repeat => vk::SamplerAddressMode::REPEAT,
        AddressMode::MirroredRepeat => vk::SamplerAddressMode::MIRRORED_REPEAT,
    }
}

/// Access mask and pipeline stage an image is used with in `layout`
pub(crate) fn layout_access(layout: vk::ImageLayout) -> (vk::AccessFlags, vk::PipelineStageFlags) {
    match layout {
        vk::ImageLayout::UNDEFINED | vk::ImageLayout::PREINITIALIZED => {
            (vk::AccessFlags::empty(), vk::PipelineStageFlags::TOP_OF_PIPE)
        }
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => (vk::AccessFlags::TRANSFER_WRITE, vk::PipelineStageFlags::TRANSFER),
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => (
            vk::AccessFlags::SHADER_READ,
            vk::PipelineStageFlags::VERTEX_SHADER | vk::PipelineStageFlags::FRAGMENT_SHADER | vk::PipelineStageFlags::COMPUTE_SHADER,
        ),
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => (
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        ),
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL => (
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
        ),
        vk::ImageLayout::PRESENT_SRC_KHR => (vk::AccessFlags::empty(), vk::PipelineStageFlags::BOTTOM_OF_PIPE),
        _ => (
            vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
            vk::PipelineStageFlags::ALL_COMMANDS,
        ),
    }
}

/// Full-image layout transition barrier
pub(crate) fn layout_barrier<'a>(
    image: vk::Image,
    aspect: vk::ImageAspectFlags,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) -> (vk::ImageMemoryBarrier<'a>, vk::PipelineStageFlags, vk::PipelineStageFlags) {
    let (src_access, src_stage) = layout_access(old_layout);
    let (dst_access, dst_stage) = layout_access(new_layout);

    let barrier = vk::ImageMemoryBarrier::default()
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: aspect,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        })
        .src_access_mask(src_access)
        .dst_access_mask(dst_access);

    (barrier, src_stage, dst_stage)
}

#[cfg(test)]
#[path = "vulkan_format_tests.rs"]
mod tests;
