//! Uniform data model and the built-in uniform tables.
//!
//! A [`UniformState`] is the record that flows from the clock, the surfaces and
//! user declarations down to every render node. Its value has a fixed component
//! count; writers mutate it in place and never change the variant.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UniformType {
    Float,
    Int,
    Vec2,
    Vec3,
    Vec4,
}

impl UniformType {
    pub fn glsl_name(self) -> &'static str {
        match self {
            UniformType::Float => "float",
            UniformType::Int => "int",
            UniformType::Vec2 => "vec2",
            UniformType::Vec3 => "vec3",
            UniformType::Vec4 => "vec4",
        }
    }

    pub fn components(self) -> usize {
        match self {
            UniformType::Float | UniformType::Int => 1,
            UniformType::Vec2 => 2,
            UniformType::Vec3 => 3,
            UniformType::Vec4 => 4,
        }
    }

    /// Accepts the GLSL spelling (`float`, `vec3`, ...). Case-insensitive.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "float" => Some(UniformType::Float),
            "int" => Some(UniformType::Int),
            "vec2" => Some(UniformType::Vec2),
            "vec3" => Some(UniformType::Vec3),
            "vec4" => Some(UniformType::Vec4),
            _ => None,
        }
    }
}

impl fmt::Display for UniformType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.glsl_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Int(i32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
}

impl UniformValue {
    pub fn zero(ty: UniformType) -> Self {
        match ty {
            UniformType::Float => UniformValue::Float(0.0),
            UniformType::Int => UniformValue::Int(0),
            UniformType::Vec2 => UniformValue::Vec2([0.0; 2]),
            UniformType::Vec3 => UniformValue::Vec3([0.0; 3]),
            UniformType::Vec4 => UniformValue::Vec4([0.0; 4]),
        }
    }

    pub fn ty(&self) -> UniformType {
        match self {
            UniformValue::Float(_) => UniformType::Float,
            UniformValue::Int(_) => UniformType::Int,
            UniformValue::Vec2(_) => UniformType::Vec2,
            UniformValue::Vec3(_) => UniformType::Vec3,
            UniformValue::Vec4(_) => UniformType::Vec4,
        }
    }

    /// Build a value of `ty` from up to four loose components; missing ones are 0.
    pub fn from_components(ty: UniformType, c: [f32; 4]) -> Self {
        match ty {
            UniformType::Float => UniformValue::Float(c[0]),
            UniformType::Int => UniformValue::Int(c[0] as i32),
            UniformType::Vec2 => UniformValue::Vec2([c[0], c[1]]),
            UniformType::Vec3 => UniformValue::Vec3([c[0], c[1], c[2]]),
            UniformType::Vec4 => UniformValue::Vec4(c),
        }
    }

    /// Copy `other` into `self` in place. Refuses (returns false) when the
    /// component layout differs, so the fixed-length invariant holds.
    pub fn assign(&mut self, other: &UniformValue) -> bool {
        match (self, other) {
            (UniformValue::Float(a), UniformValue::Float(b)) => *a = *b,
            (UniformValue::Int(a), UniformValue::Int(b)) => *a = *b,
            (UniformValue::Vec2(a), UniformValue::Vec2(b)) => a.copy_from_slice(b),
            (UniformValue::Vec3(a), UniformValue::Vec3(b)) => a.copy_from_slice(b),
            (UniformValue::Vec4(a), UniformValue::Vec4(b)) => a.copy_from_slice(b),
            _ => return false,
        }
        true
    }
}

/// A named uniform record with an optional shadertoy alias.
#[derive(Debug, Clone, PartialEq)]
pub struct UniformState {
    pub name: String,
    pub toy_name: Option<String>,
    pub value: UniformValue,
}

impl UniformState {
    pub fn new(name: impl Into<String>, value: UniformValue) -> Self {
        Self {
            name: name.into(),
            toy_name: None,
            value,
        }
    }

    pub fn aliased(name: impl Into<String>, toy_name: impl Into<String>, value: UniformValue) -> Self {
        Self {
            name: name.into(),
            toy_name: Some(toy_name.into()),
            value,
        }
    }

    pub fn name_for(&self, toy: bool) -> &str {
        match (&self.toy_name, toy) {
            (Some(alias), true) => alias,
            _ => &self.name,
        }
    }

    pub fn ty(&self) -> UniformType {
        self.value.ty()
    }

    /// `uniform <type> <name>;` as it is prepended to fragment sources.
    pub fn declaration(&self, toy: bool) -> String {
        format!("uniform {} {};\n", self.ty().glsl_name(), self.name_for(toy))
    }
}

pub const PREVBUFFER: &str = "u_prevbuffer";

// Indices into the tables below.
pub const TIME: usize = 0;
pub const DELTA: usize = 1;
pub const DATE: usize = 2;
pub const FRAME: usize = 3;

pub const ORIENTATION: usize = 0;

pub const RESOLUTION: usize = 0;
pub const MOUSE: usize = 1;
pub const MOUSEDRAG: usize = 2;

/// Clock-driven uniforms, owned by the renderer.
pub fn global_uniforms() -> Vec<UniformState> {
    vec![
        UniformState::aliased("u_time", "iTime", UniformValue::Float(0.0)),
        UniformState::aliased("u_delta", "iTimeDelta", UniformValue::Float(0.0)),
        UniformState::aliased("u_date", "iDate", UniformValue::Vec4([0.0; 4])),
        UniformState::aliased("u_frame", "iFrame", UniformValue::Int(0)),
    ]
}

pub fn orientation_uniforms() -> Vec<UniformState> {
    vec![UniformState::aliased(
        "u_orientation",
        "iOrientation",
        UniformValue::Vec3([0.0; 3]),
    )]
}

/// Per-surface uniforms. `u_mouse` is the current pointer, `u_mousedrag`
/// carries the drag anchor in `zw` with its sign flipped after release.
pub fn surface_uniforms() -> Vec<UniformState> {
    vec![
        UniformState::aliased("u_resolution", "iResolution", UniformValue::Vec2([0.0; 2])),
        UniformState::aliased("u_mouse", "iCurrentMouse", UniformValue::Vec2([0.0; 2])),
        UniformState::aliased("u_mousedrag", "iMouse", UniformValue::Vec4([0.0; 4])),
    ]
}

/// Declarations for every built-in uniform, in table order.
pub fn builtin_declarations(toy: bool) -> String {
    global_uniforms()
        .iter()
        .chain(orientation_uniforms().iter())
        .chain(surface_uniforms().iter())
        .map(|u| u.declaration(toy))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toy_alias_resolution() {
        let u = &global_uniforms()[TIME];
        assert_eq!(u.name_for(false), "u_time");
        assert_eq!(u.name_for(true), "iTime");

        let plain = UniformState::new("u_custom", UniformValue::Float(1.0));
        assert_eq!(plain.name_for(true), "u_custom");
    }

    #[test]
    fn assign_keeps_layout() {
        let mut v = UniformValue::Vec2([1.0, 2.0]);
        assert!(v.assign(&UniformValue::Vec2([3.0, 4.0])));
        assert_eq!(v, UniformValue::Vec2([3.0, 4.0]));
        assert!(!v.assign(&UniformValue::Vec3([0.0; 3])));
        assert_eq!(v, UniformValue::Vec2([3.0, 4.0]));
    }

    #[test]
    fn declarations_cover_all_builtins() {
        let toy = builtin_declarations(true);
        assert!(toy.contains("uniform vec4 iMouse;"));
        assert!(toy.contains("uniform int iFrame;"));
        let plain = builtin_declarations(false);
        assert!(plain.contains("uniform vec3 u_orientation;"));
        assert_eq!(plain.lines().count(), 8);
    }

    #[test]
    fn parse_type_names() {
        assert_eq!(UniformType::parse("VEC3"), Some(UniformType::Vec3));
        assert_eq!(UniformType::parse("mat4"), None);
    }
}
