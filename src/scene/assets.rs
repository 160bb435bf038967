use slotmap::{SlotMap, new_key_type};

use crate::shader::Material;

use super::particles::EmitterDescription;

new_key_type! {
    pub struct MaterialId;
    pub struct EmitterId;
}

/// Materials and emitter descriptions handed over by loader collaborators.
#[derive(Debug, Default)]
pub struct Assets {
    pub materials: SlotMap<MaterialId, Material>,
    pub emitters: SlotMap<EmitterId, EmitterDescription>,
}

impl Assets {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_material(&mut self, material: Material) -> MaterialId {
        self.materials.insert(material)
    }

    pub fn add_emitter(&mut self, emitter: EmitterDescription) -> EmitterId {
        self.emitters.insert(emitter)
    }

    #[must_use]
    pub fn material(&self, id: MaterialId) -> Option<&Material> {
        self.materials.get(id)
    }

    pub fn material_mut(&mut self, id: MaterialId) -> Option<&mut Material> {
        self.materials.get_mut(id)
    }

    #[must_use]
    pub fn emitter(&self, id: EmitterId) -> Option<&EmitterDescription> {
        self.emitters.get(id)
    }
}
