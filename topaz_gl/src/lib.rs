/*!
# Topaz GL

Backend-neutral renderer frontend for GPU compute and graphics programs.

A renderer is described declaratively (`RendererInfo`: shader stages,
resources, output, options) and turned into device objects against a
`GraphicsDevice` implementation such as `topaz_gl_vulkan`.

## Architecture

- **DeviceContext**: per-device state (depth image, render graph, timeline)
- **Renderer**: resources, descriptors, output, pipeline and commands of one program
- **Resource / Component**: CPU description and its GPU instantiation
- **RenderGraph**: submission order and dependencies between renderers
- **device**: traits implemented by backends
*/

mod error;
mod engine;
pub mod log;
pub mod device;
pub mod resource;
pub mod renderer;
pub mod render_graph;
mod device_context;

pub use device_context::DeviceContext;

// Main topaz namespace module
pub mod topaz {
    // Error types
    pub use crate::error::{Error, Result};

    // Logger registry
    pub use crate::engine::Engine;

    // Per-device state
    pub use crate::device_context::DeviceContext;

    // Logging sub-module (types only, NOT macros)
    pub mod log {
        pub use crate::log::{Logger, LogEntry, LogSeverity, DefaultLogger};
    }

    // Renderer sub-module
    pub mod render {
        pub use crate::renderer::*;
    }

    // Resource sub-module
    pub mod resource {
        pub use crate::resource::*;
    }

    // Render graph sub-module
    pub mod graph {
        pub use crate::render_graph::*;
    }
}

// Re-export math library at crate root
pub use glam;
