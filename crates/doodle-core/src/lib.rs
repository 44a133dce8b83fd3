#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(missing_debug_implementations)]

pub mod config;
pub mod error;
pub mod sampler;
pub mod uniforms;

pub use error::DoodleError;

pub use config::{
    load_typed_json, Attributes, AudioConfig, ChildConfig, DoodleConfig, NodeConfig, PassConfig,
    ShaderSourceConfig, SurfaceConfig, TextureConfig, UniformConfig,
};
pub use sampler::{floor_pow2, is_pow2, Filter, SamplerParams, Wrap};
pub use uniforms::{UniformState, UniformType, UniformValue};
