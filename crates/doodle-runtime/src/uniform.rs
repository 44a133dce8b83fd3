//! Per-program uniform registry with change-diffed uploads.

use std::collections::HashMap;

use doodle_core::{UniformState, UniformValue};

use crate::gpu::{Gpu, ProgramId, TextureUnit, UniformKind, UniformLocation};

#[derive(Debug)]
pub struct Uniform {
    name: String,
    kind: UniformKind,
    location: UniformLocation,
    cache: Option<UniformValue>,
    mismatch_logged: bool,
}

impl Uniform {
    pub fn new(name: impl Into<String>, kind: UniformKind, location: UniformLocation) -> Self {
        Self {
            name: name.into(),
            kind,
            location,
            cache: None,
            mismatch_logged: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> UniformKind {
        self.kind
    }

    pub fn location(&self) -> UniformLocation {
        self.location
    }

    /// Upload `value` unless it equals the cached one. Returns whether an
    /// upload happened. Values whose layout does not match the declared type
    /// are dropped (logged once).
    pub fn set_value(&mut self, gpu: &dyn Gpu, value: &UniformValue) -> bool {
        let accepted = match self.kind {
            UniformKind::Value(ty) => value.ty() == ty,
            UniformKind::Sampler => matches!(value, UniformValue::Int(_)),
            UniformKind::Unsupported(_) => false,
        };
        if !accepted {
            if !self.mismatch_logged {
                self.mismatch_logged = true;
                tracing::warn!(
                    uniform = %self.name,
                    declared = ?self.kind,
                    given = %value.ty(),
                    "uniform type mismatch; value ignored"
                );
            }
            return false;
        }

        match &mut self.cache {
            Some(cached) if cached == value => false,
            Some(cached) => {
                gpu.upload_uniform(self.location, value);
                cached.assign(value);
                true
            }
            None => {
                gpu.upload_uniform(self.location, value);
                self.cache = Some(*value);
                true
            }
        }
    }
}

/// Active uniforms of one linked program, keyed by name.
#[derive(Debug, Default)]
pub struct UniformTable {
    entries: HashMap<String, Uniform>,
}

impl UniformTable {
    pub fn introspect(gpu: &dyn Gpu, program: ProgramId) -> Self {
        let mut entries = HashMap::new();
        for info in gpu.active_uniforms(program) {
            // Drivers report arrays as `name[0]`; address them by base name too.
            if let Some(base) = info.name.strip_suffix("[0]") {
                entries
                    .entry(base.to_string())
                    .or_insert_with(|| Uniform::new(base, info.kind, info.location));
            }
            entries.insert(info.name.clone(), Uniform::new(info.name, info.kind, info.location));
        }
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Uniform> {
        self.entries.get_mut(name)
    }

    /// Inactive or undeclared names are ignored: shaders only declare what they use.
    pub fn set(&mut self, gpu: &dyn Gpu, name: &str, value: &UniformValue) -> bool {
        match self.entries.get_mut(name) {
            Some(u) => u.set_value(gpu, value),
            None => false,
        }
    }

    /// Write a state under the name this program sees (toy alias or plain).
    pub fn set_state(&mut self, gpu: &dyn Gpu, state: &UniformState, toy: bool) -> bool {
        self.set(gpu, state.name_for(toy), &state.value)
    }

    pub fn set_sampler(&mut self, gpu: &dyn Gpu, name: &str, unit: TextureUnit) -> bool {
        self.set(gpu, name, &UniformValue::Int(unit.index() as i32))
    }
}
