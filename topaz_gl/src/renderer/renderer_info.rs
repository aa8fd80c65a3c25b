/// Declarative description of a renderer.
///
/// A RendererInfo collects everything a renderer is built from: shader
/// stages, resources (owned or referenced), an output, option flags and the
/// initial render state. It is consumed by `Renderer::new`.

use std::collections::BTreeMap;
use bitflags::bitflags;
use glam::{UVec3, Vec4};
use crate::device::{CullMode, ShaderStage};
use crate::error::{Error, Result};
use crate::renderer::{ComponentRef, Renderer, RendererOutput};
use crate::resource::{Resource, ResourceFlags, ResourceHandle, ResourceType};
use crate::engine_error;

bitflags! {
    /// Renderer execution options
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RendererOptions: u32 {
        /// No depth attachment, no depth test
        const NO_DEPTH_TESTING = 1 << 0;
        /// src-alpha / one-minus-src-alpha blending on every colour attachment
        const ALPHA_BLENDING = 1 << 1;
        /// Block the host until the GPU finishes each frame
        const RENDER_WAIT = 1 << 2;
        /// Load the previous output contents instead of clearing
        const NO_CLEAR_OUTPUT = 1 << 3;
        /// Render to the window image without presenting it
        const NO_PRESENT = 1 << 4;
        /// Read the draw count from the start of the draw-indirect buffer
        const DRAW_INDIRECT_COUNT = 1 << 5;
    }
}

/// Graphics pipeline state
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GraphicsState {
    pub clear_colour: Vec4,
    /// Triangles drawn by non-indirect draws
    pub tri_count: u32,
    pub wireframe: bool,
    pub culling: CullMode,
    pub index_buffer: Option<ResourceHandle>,
    pub draw_buffer: Option<ResourceHandle>,
}

impl Default for GraphicsState {
    fn default() -> Self {
        Self {
            clear_colour: Vec4::new(0.0, 0.0, 0.0, 1.0),
            tri_count: 0,
            wireframe: false,
            culling: CullMode::None,
            index_buffer: None,
            draw_buffer: None,
        }
    }
}

/// Compute dispatch state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComputeState {
    /// Work group counts
    pub kernel: UVec3,
}

impl Default for ComputeState {
    fn default() -> Self {
        Self { kernel: UVec3::ONE }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RenderState {
    pub graphics: GraphicsState,
    pub compute: ComputeState,
}

/// Kind of program a set of shader stages forms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramKind {
    Graphics { tessellated: bool },
    Compute,
}

/// Compiled shader bytes per stage
#[derive(Debug, Clone, Default)]
pub struct ShaderInfo {
    stages: BTreeMap<ShaderStage, Vec<u8>>,
}

impl ShaderInfo {
    pub fn set_shader(&mut self, stage: ShaderStage, code: impl Into<Vec<u8>>) -> &mut Self {
        self.stages.insert(stage, code.into());
        self
    }

    pub fn stage(&self, stage: ShaderStage) -> Option<&[u8]> {
        self.stages.get(&stage).map(|code| code.as_slice())
    }

    pub fn has_stage(&self, stage: ShaderStage) -> bool {
        self.stages.contains_key(&stage)
    }

    /// Stages in pipeline order
    pub fn stages(&self) -> impl Iterator<Item = (ShaderStage, &[u8])> {
        self.stages.iter().map(|(stage, code)| (*stage, code.as_slice()))
    }

    /// Classify the stage set
    ///
    /// Valid sets are {compute} alone, or {vertex, fragment} optionally
    /// with both tessellation stages.
    pub fn program_kind(&self) -> Result<ProgramKind> {
        let has = |stage| self.has_stage(stage);
        let tess_control = has(ShaderStage::TessellationControl);
        let tess_eval = has(ShaderStage::TessellationEvaluation);

        let problem = if has(ShaderStage::Compute) {
            if self.stages.len() == 1 {
                return Ok(ProgramKind::Compute);
            }
            "a compute shader cannot be combined with graphics stages"
        } else if self.stages.is_empty() {
            "no shader stages"
        } else if !has(ShaderStage::Vertex) || !has(ShaderStage::Fragment) {
            "graphics programs need both a vertex and a fragment shader"
        } else if tess_control != tess_eval {
            "tessellation control and evaluation shaders must be given together"
        } else {
            return Ok(ProgramKind::Graphics { tessellated: tess_control });
        };

        let stages: Vec<ShaderStage> = self.stages.keys().copied().collect();
        engine_error!("topaz::RendererInfo", "Unsupported shader stages {:?}: {}", stages, problem);
        Err(Error::InvalidConfiguration(format!("{} (stages: {:?})", problem, stages)))
    }
}

/// A resource as declared on the info
#[derive(Debug, Clone)]
pub enum ResourceEntry {
    /// Cloned into the renderer and instantiated there
    Owned(Resource),
    /// A component owned by another renderer
    Reference(ComponentRef),
}

impl ResourceEntry {
    pub fn resource_type(&self) -> ResourceType {
        match self {
            ResourceEntry::Owned(resource) => resource.resource_type(),
            ResourceEntry::Reference(component) => component.resource_type(),
        }
    }
}

/// Builder-style description of a renderer
#[derive(Debug, Clone, Default)]
pub struct RendererInfo {
    shader: ShaderInfo,
    resources: Vec<ResourceEntry>,
    output: RendererOutput,
    options: RendererOptions,
    state: RenderState,
    debug_name: Option<String>,
}

impl RendererInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a resource, cloned into the renderer when it is built
    ///
    /// An `INDEX_BUFFER` or `DRAW_INDIRECT_BUFFER` resource becomes the
    /// renderer's index or draw buffer; a renderer has at most one of each.
    pub fn add_resource(&mut self, resource: impl Into<Resource>) -> Result<ResourceHandle> {
        let resource = resource.into();
        resource.validate()?;
        let handle = self.next_handle();
        self.designate(resource.flags(), handle)?;
        self.resources.push(ResourceEntry::Owned(resource));
        Ok(handle)
    }

    /// Reference a resource of an existing renderer
    pub fn ref_resource(&mut self, renderer: &Renderer, handle: ResourceHandle) -> Result<ResourceHandle> {
        let component = renderer.get_component(handle)?;
        self.ref_component(component)
    }

    /// Reference a component directly
    pub fn ref_component(&mut self, component: ComponentRef) -> Result<ResourceHandle> {
        let flags = component.flags();
        let handle = self.next_handle();
        self.designate(flags, handle)?;
        self.resources.push(ResourceEntry::Reference(component));
        Ok(handle)
    }

    fn next_handle(&self) -> ResourceHandle {
        ResourceHandle(self.resources.len() as u32)
    }

    fn designate(&mut self, flags: ResourceFlags, handle: ResourceHandle) -> Result<()> {
        let graphics = &mut self.state.graphics;
        let (slot, what) = if flags.contains(ResourceFlags::INDEX_BUFFER) {
            (&mut graphics.index_buffer, "index")
        } else if flags.contains(ResourceFlags::DRAW_INDIRECT_BUFFER) {
            (&mut graphics.draw_buffer, "draw-indirect")
        } else {
            return Ok(());
        };
        if let Some(existing) = slot {
            engine_error!(
                "topaz::RendererInfo",
                "Resource {} is a second {} buffer (already {})",
                handle, what, existing
            );
            return Err(Error::InvalidConfiguration(format!("renderer already has a {} buffer", what)));
        }
        *slot = Some(handle);
        Ok(())
    }

    pub fn set_output(&mut self, output: RendererOutput) -> &mut Self {
        self.output = output;
        self
    }

    pub fn set_options(&mut self, options: RendererOptions) -> &mut Self {
        self.options = options;
        self
    }

    pub fn set_clear_colour(&mut self, colour: Vec4) -> &mut Self {
        self.state.graphics.clear_colour = colour;
        self
    }

    pub fn set_compute_kernel(&mut self, kernel: UVec3) -> &mut Self {
        self.state.compute.kernel = kernel;
        self
    }

    pub fn set_culling(&mut self, culling: CullMode) -> &mut Self {
        self.state.graphics.culling = culling;
        self
    }

    pub fn set_tri_count(&mut self, tri_count: u32) -> &mut Self {
        self.state.graphics.tri_count = tri_count;
        self
    }

    pub fn set_wireframe(&mut self, wireframe: bool) -> &mut Self {
        self.state.graphics.wireframe = wireframe;
        self
    }

    pub fn shader(&self) -> &ShaderInfo {
        &self.shader
    }

    pub fn shader_mut(&mut self) -> &mut ShaderInfo {
        &mut self.shader
    }

    pub fn debug_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.debug_name = Some(name.into());
        self
    }

    /// Explicit debug name, or `R{buffers}b{images}i{w|h}`
    pub fn name(&self) -> String {
        if let Some(name) = &self.debug_name {
            return name.clone();
        }
        let buffers = self.resources.iter().filter(|r| r.resource_type() == ResourceType::Buffer).count();
        let images = self.resources.len() - buffers;
        let target = if self.output.targets_window() { 'w' } else { 'h' };
        format!("R{}b{}i{}", buffers, images, target)
    }

    pub fn resources(&self) -> &[ResourceEntry] {
        &self.resources
    }

    pub fn output(&self) -> &RendererOutput {
        &self.output
    }

    pub fn options(&self) -> RendererOptions {
        self.options
    }

    pub fn state(&self) -> &RenderState {
        &self.state
    }

    /// Check the combination of stages, buffers and options
    pub(crate) fn validate(&self) -> Result<ProgramKind> {
        let kind = self.shader.program_kind()?;
        let graphics = &self.state.graphics;
        if matches!(kind, ProgramKind::Graphics { .. })
            && self.options.contains(RendererOptions::DRAW_INDIRECT_COUNT)
            && graphics.index_buffer.is_some()
            && graphics.draw_buffer.is_some()
        {
            engine_error!(
                "topaz::RendererInfo",
                "DRAW_INDIRECT_COUNT with an index buffer is not supported"
            );
            return Err(Error::InvalidConfiguration(
                "indexed draw-indirect-count is not supported".to_string(),
            ));
        }
        Ok(kind)
    }

    pub(crate) fn into_parts(self) -> (ShaderInfo, Vec<ResourceEntry>, RendererOutput, RendererOptions, RenderState) {
        (self.shader, self.resources, self.output, self.options, self.state)
    }
}

#[cfg(test)]
#[path = "renderer_info_tests.rs"]
mod tests;
