//! Render graph module
//!
//! Orders renderers on a device. The timeline fixes the submission order
//! within a frame and explicit dependencies turn into timeline semaphore
//! waits between renderers.

mod render_graph;
mod frame_scheduler;

pub use render_graph::{RenderGraph, RendererId, RendererIdAllocator};
pub use frame_scheduler::TimelinePlan;
pub(crate) use frame_scheduler::FrameScheduler;
