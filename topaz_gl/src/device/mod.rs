/// Device module - backend-neutral GPU object traits

pub mod graphics_device;
pub mod buffer;
pub mod image;
pub mod descriptor;
pub mod render_pass;
pub mod pipeline;
pub mod command_buffer;
pub mod sync;

pub use graphics_device::*;
pub use buffer::*;
pub use image::*;
pub use descriptor::*;
pub use render_pass::*;
pub use pipeline::*;
pub use command_buffer::*;
pub use sync::*;

// Mock graphics device for tests (no GPU required)
#[cfg(test)]
pub mod mock_device;
