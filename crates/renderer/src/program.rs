use std::collections::BTreeMap;

use crate::context::{AttributeSlot, BufferId, GraphicsContext, ProgramId, UniformSlot, UniformValue};
use crate::error::Result;

/// A linked program together with the slots of the names its owner asked for.
///
/// Every requested name maps to either a resolved slot or `None`, the unbound
/// sentinel. Shaders are free to omit any of them: writes and bindings
/// targeting an unbound name are silently dropped.
#[derive(Debug, Clone)]
pub struct ProgramHandle {
    program: ProgramId,
    attributes: BTreeMap<String, Option<AttributeSlot>>,
    uniforms: BTreeMap<String, Option<UniformSlot>>,
}

impl ProgramHandle {
    /// Compiles and links both stages, then resolves every requested name.
    pub fn new<C: GraphicsContext>(
        ctx: &mut C,
        vertex_source: &str,
        fragment_source: &str,
        attribute_names: &[&str],
        uniform_names: &[&str],
    ) -> Result<Self> {
        let program = ctx.create_program(vertex_source, fragment_source)?;

        let attributes: BTreeMap<_, _> = attribute_names
            .iter()
            .map(|name| (name.to_string(), ctx.attribute_slot(program, name)))
            .collect();
        let uniforms: BTreeMap<_, _> = uniform_names
            .iter()
            .map(|name| (name.to_string(), ctx.uniform_slot(program, name)))
            .collect();

        let unbound: Vec<&str> = attributes
            .iter()
            .filter(|(_, slot)| slot.is_none())
            .map(|(name, _)| name.as_str())
            .chain(
                uniforms
                    .iter()
                    .filter(|(_, slot)| slot.is_none())
                    .map(|(name, _)| name.as_str()),
            )
            .collect();
        tracing::debug!(
            %program,
            attributes = attributes.len(),
            uniforms = uniforms.len(),
            ?unbound,
            "linked shader program"
        );

        Ok(Self {
            program,
            attributes,
            uniforms,
        })
    }

    pub fn id(&self) -> ProgramId {
        self.program
    }

    /// Makes this the current program. Bound textures and targets are untouched.
    pub fn activate<C: GraphicsContext>(&self, ctx: &mut C) -> Result<()> {
        ctx.use_program(self.program)
    }

    /// Resolved slot of an attribute, `None` when unbound or never requested.
    pub fn attribute(&self, name: &str) -> Option<AttributeSlot> {
        self.attributes.get(name).copied().flatten()
    }

    /// Resolved slot of a uniform, `None` when unbound or never requested.
    pub fn uniform(&self, name: &str) -> Option<UniformSlot> {
        self.uniforms.get(name).copied().flatten()
    }

    /// Writes a uniform; a no-op when the name is unbound.
    pub fn set_uniform<C: GraphicsContext>(&self, ctx: &mut C, name: &str, value: UniformValue) {
        match self.uniform(name) {
            Some(slot) => ctx.set_uniform(self.program, slot, value),
            None => tracing::trace!(program = %self.program, name, "skipping unbound uniform"),
        }
    }

    /// Feeds `buffer` into the named attribute; a no-op when the name is unbound.
    pub fn bind_attribute<C: GraphicsContext>(&self, ctx: &mut C, name: &str, buffer: BufferId) {
        match self.attribute(name) {
            Some(slot) => ctx.bind_vertex_attribute(slot, buffer),
            None => tracing::trace!(program = %self.program, name, "skipping unbound attribute"),
        }
    }
}
