//! Declarative configuration for shader scenes.
//!
//! These structs replace the markup layer: a host either deserializes them
//! from JSON or builds them from attribute strings with the `from_attrs`
//! helpers. Nothing here touches the GPU.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::DoodleError;
use crate::sampler::{Filter, Wrap};
use crate::uniforms::{UniformType, UniformValue};

/// Raw attribute map (`name -> value`) as delivered by a markup collaborator.
pub type Attributes = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShaderSourceConfig {
    Inline(String),
    Url(String),
}

/// Per-pass settings of a render node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassConfig {
    #[serde(default)]
    pub name: Option<String>,
    pub fragment: ShaderSourceConfig,
    #[serde(default)]
    pub vertex: Option<ShaderSourceConfig>,
    #[serde(default)]
    pub shadertoy: bool,
    #[serde(default)]
    pub vertices: Option<Vec<f32>>,
    /// Keep a feedback buffer exposed as `u_prevbuffer`.
    #[serde(default)]
    pub prevbuffer: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(flatten)]
    pub pass: PassConfig,
    #[serde(default)]
    pub children: Vec<ChildConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChildConfig {
    Node(NodeConfig),
    Texture(TextureConfig),
    Audio(AudioConfig),
    Uniform(UniformConfig),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextureConfig {
    pub name: Option<String>,
    /// URL/path of an image or video, or a reference to a host-registered source.
    pub src: Option<String>,
    pub webcam: bool,
    pub wrap_s: Option<Wrap>,
    pub wrap_t: Option<Wrap>,
    pub min_filter: Option<Filter>,
    pub mag_filter: Option<Filter>,
    /// Re-upload host canvases every frame.
    pub force_update: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub name: Option<String>,
    pub src: Option<String>,
    pub autoplay: bool,
    #[serde(rename = "loop")]
    pub looped: bool,
    pub mic: bool,
    pub cross_origin: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniformConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: UniformType,
    #[serde(default)]
    pub x: f32,
    #[serde(default)]
    pub y: f32,
    #[serde(default)]
    pub z: f32,
    #[serde(default)]
    pub w: f32,
}

impl UniformConfig {
    pub fn value(&self) -> UniformValue {
        UniformValue::from_components(self.ty, [self.x, self.y, self.z, self.w])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurfaceConfig {
    /// Fixed CSS-pixel width; 0 follows the canvas rectangle.
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    pub root: NodeConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoodleConfig {
    pub surfaces: Vec<SurfaceConfig>,
}

impl DoodleConfig {
    pub fn from_json_str(text: &str) -> Result<Self, DoodleError> {
        let cfg: DoodleConfig = serde_json::from_str(text).map_err(|e| DoodleError::Json {
            path: "<inline>".into(),
            source: e,
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_json_path(path: impl AsRef<Path>) -> Result<Self, DoodleError> {
        let cfg: DoodleConfig = load_typed_json(path)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), DoodleError> {
        if self.surfaces.is_empty() {
            return Err(DoodleError::InvalidConfig("no surfaces declared".into()));
        }
        for s in &self.surfaces {
            validate_node(&s.root)?;
        }
        Ok(())
    }
}

fn validate_node(node: &NodeConfig) -> Result<(), DoodleError> {
    if let Some(v) = &node.pass.vertices {
        if v.len() < 6 || v.len() % 2 != 0 {
            return Err(DoodleError::InvalidConfig(format!(
                "vertices must be pairs of at least 3 points, got {} floats",
                v.len()
            )));
        }
    }
    for child in &node.children {
        match child {
            ChildConfig::Node(n) => validate_node(n)?,
            ChildConfig::Uniform(u) if u.name.trim().is_empty() => {
                return Err(DoodleError::InvalidConfig("uniform without a name".into()));
            }
            _ => {}
        }
    }
    Ok(())
}

/// Read and deserialize a JSON file.
pub fn load_typed_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, DoodleError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|e| DoodleError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    serde_json::from_str(&text).map_err(|e| DoodleError::Json {
        path: path.to_path_buf(),
        source: e,
    })
}

// ---- attribute parsing ----

/// Boolean attributes are true when present, unless spelled `"false"`.
pub fn flag(attrs: &Attributes, key: &str) -> bool {
    attrs
        .get(key)
        .map(|v| !v.trim().eq_ignore_ascii_case("false"))
        .unwrap_or(false)
}

fn text(attrs: &Attributes, key: &str) -> Option<String> {
    attrs
        .get(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn number(attrs: &Attributes, key: &str) -> Result<Option<f32>, DoodleError> {
    match attrs.get(key).map(|v| v.trim()) {
        None | Some("") => Ok(None),
        Some(v) => v
            .parse::<f32>()
            .map(Some)
            .map_err(|_| DoodleError::InvalidConfig(format!("{key}: not a number: {v:?}"))),
    }
}

fn size(attrs: &Attributes, key: &str) -> Result<u32, DoodleError> {
    Ok(number(attrs, key)?.map(|v| v.max(0.0) as u32).unwrap_or(0))
}

/// Vertex lists are written as a JSON array of floats.
pub fn parse_vertices(s: &str) -> Result<Vec<f32>, DoodleError> {
    serde_json::from_str::<Vec<f32>>(s)
        .map_err(|e| DoodleError::InvalidConfig(format!("vertices: {e}")))
}

impl PassConfig {
    pub fn from_attrs(attrs: &Attributes, fragment: ShaderSourceConfig) -> Result<Self, DoodleError> {
        let vertices = match attrs.get("vertices") {
            Some(v) => Some(parse_vertices(v)?),
            None => None,
        };
        Ok(Self {
            name: text(attrs, "name"),
            fragment,
            vertex: None,
            shadertoy: flag(attrs, "shadertoy"),
            vertices,
            prevbuffer: flag(attrs, "prevbuffer"),
        })
    }
}

impl TextureConfig {
    pub fn from_attrs(attrs: &Attributes) -> Result<Self, DoodleError> {
        let wrap = |key: &str| -> Result<Option<Wrap>, DoodleError> {
            match text(attrs, key) {
                None => Ok(None),
                Some(v) => Wrap::parse(&v)
                    .map(Some)
                    .ok_or_else(|| DoodleError::InvalidConfig(format!("{key}: unknown wrap {v:?}"))),
            }
        };
        let filter = |key: &str| -> Result<Option<Filter>, DoodleError> {
            match text(attrs, key) {
                None => Ok(None),
                Some(v) => Filter::parse(&v)
                    .map(Some)
                    .ok_or_else(|| DoodleError::InvalidConfig(format!("{key}: unknown filter {v:?}"))),
            }
        };
        Ok(Self {
            name: text(attrs, "name"),
            src: text(attrs, "src"),
            webcam: flag(attrs, "webcam"),
            wrap_s: wrap("wrap-s")?,
            wrap_t: wrap("wrap-t")?,
            min_filter: filter("min-filter")?,
            mag_filter: filter("mag-filter")?,
            force_update: flag(attrs, "force-update"),
        })
    }
}

impl AudioConfig {
    pub fn from_attrs(attrs: &Attributes) -> Self {
        Self {
            name: text(attrs, "name"),
            src: text(attrs, "src"),
            autoplay: flag(attrs, "autoplay"),
            looped: flag(attrs, "loop"),
            mic: flag(attrs, "mic"),
            cross_origin: text(attrs, "crossorigin"),
        }
    }
}

impl UniformConfig {
    pub fn from_attrs(attrs: &Attributes) -> Result<Self, DoodleError> {
        let name = text(attrs, "name")
            .ok_or_else(|| DoodleError::InvalidConfig("uniform without a name".into()))?;
        let ty = match text(attrs, "type") {
            Some(t) => UniformType::parse(&t)
                .ok_or_else(|| DoodleError::InvalidConfig(format!("{name}: unknown type {t:?}")))?,
            None => UniformType::Float,
        };
        Ok(Self {
            name,
            ty,
            x: number(attrs, "x")?.unwrap_or(0.0),
            y: number(attrs, "y")?.unwrap_or(0.0),
            z: number(attrs, "z")?.unwrap_or(0.0),
            w: number(attrs, "w")?.unwrap_or(0.0),
        })
    }
}

impl SurfaceConfig {
    pub fn from_attrs(attrs: &Attributes, root: NodeConfig) -> Result<Self, DoodleError> {
        Ok(Self {
            width: size(attrs, "width")?,
            height: size(attrs, "height")?,
            root,
        })
    }
}
