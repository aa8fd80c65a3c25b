/// Where a renderer draws to.

use glam::{IVec2, UVec2};
use crate::device::Rect2D;
use crate::renderer::ComponentRef;

/// Scissor rectangle in target pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScissorRegion {
    pub offset: IVec2,
    pub extent: UVec2,
}

impl ScissorRegion {
    pub fn new(offset: IVec2, extent: UVec2) -> Self {
        Self { offset, extent }
    }

    pub(crate) fn to_rect(self) -> Rect2D {
        Rect2D {
            x: self.offset.x,
            y: self.offset.y,
            width: self.extent.x,
            height: self.extent.y,
        }
    }
}

/// Offscreen output: colour images (and optionally a depth image) owned by
/// some renderer and flagged `RENDERER_OUTPUT`
#[derive(Debug, Clone)]
pub struct ImageOutput {
    pub colours: Vec<ComponentRef>,
    pub depth: Option<ComponentRef>,
}

impl ImageOutput {
    pub fn new(colours: Vec<ComponentRef>) -> Self {
        Self { colours, depth: None }
    }

    pub fn with_depth(mut self, depth: ComponentRef) -> Self {
        self.depth = Some(depth);
        self
    }
}

/// Render target kind
#[derive(Debug, Clone, Default)]
pub enum OutputTarget {
    /// The window's presentable images
    #[default]
    Window,
    Image(ImageOutput),
}

/// Output of a renderer: a target plus an optional scissor region
#[derive(Debug, Clone, Default)]
pub struct RendererOutput {
    pub target: OutputTarget,
    /// Full target extent when None
    pub scissor: Option<ScissorRegion>,
}

impl RendererOutput {
    pub fn window() -> Self {
        Self::default()
    }

    pub fn image(output: ImageOutput) -> Self {
        Self {
            target: OutputTarget::Image(output),
            scissor: None,
        }
    }

    pub fn with_scissor(mut self, scissor: ScissorRegion) -> Self {
        self.scissor = Some(scissor);
        self
    }

    pub fn targets_window(&self) -> bool {
        matches!(self.target, OutputTarget::Window)
    }
}
