use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Wrap {
    Repeat,
    ClampToEdge,
    MirroredRepeat,
}

impl Wrap {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "REPEAT" => Some(Wrap::Repeat),
            "CLAMP_TO_EDGE" | "CLAMP" => Some(Wrap::ClampToEdge),
            "MIRRORED_REPEAT" => Some(Wrap::MirroredRepeat),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Filter {
    Nearest,
    Linear,
    NearestMipmapNearest,
    LinearMipmapNearest,
    NearestMipmapLinear,
    LinearMipmapLinear,
}

impl Filter {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NEAREST" => Some(Filter::Nearest),
            "LINEAR" => Some(Filter::Linear),
            "NEAREST_MIPMAP_NEAREST" => Some(Filter::NearestMipmapNearest),
            "LINEAR_MIPMAP_NEAREST" => Some(Filter::LinearMipmapNearest),
            "NEAREST_MIPMAP_LINEAR" => Some(Filter::NearestMipmapLinear),
            "LINEAR_MIPMAP_LINEAR" => Some(Filter::LinearMipmapLinear),
            _ => None,
        }
    }

    pub fn is_mipmap(self) -> bool {
        !matches!(self, Filter::Nearest | Filter::Linear)
    }
}

/// Sampler state applied every time a texture is (re)bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SamplerParams {
    pub wrap_s: Wrap,
    pub wrap_t: Wrap,
    pub min_filter: Filter,
    pub mag_filter: Filter,
}

impl Default for SamplerParams {
    /// GL defaults: repeat wrapping with a mipmapped min filter.
    fn default() -> Self {
        Self {
            wrap_s: Wrap::Repeat,
            wrap_t: Wrap::Repeat,
            min_filter: Filter::NearestMipmapLinear,
            mag_filter: Filter::Linear,
        }
    }
}

impl SamplerParams {
    pub const CLAMP_LINEAR: SamplerParams = SamplerParams {
        wrap_s: Wrap::ClampToEdge,
        wrap_t: Wrap::ClampToEdge,
        min_filter: Filter::Linear,
        mag_filter: Filter::Linear,
    };

    pub const CLAMP_NEAREST: SamplerParams = SamplerParams {
        wrap_s: Wrap::ClampToEdge,
        wrap_t: Wrap::ClampToEdge,
        min_filter: Filter::Nearest,
        mag_filter: Filter::Nearest,
    };

    /// WebGL1 rule: non-clamped wrapping or mipmapped minification require
    /// power-of-two texture dimensions.
    pub fn needs_pow2(&self) -> bool {
        self.wrap_s != Wrap::ClampToEdge
            || self.wrap_t != Wrap::ClampToEdge
            || self.min_filter.is_mipmap()
    }
}

pub fn is_pow2(n: u32) -> bool {
    n != 0 && n.is_power_of_two()
}

/// Largest power of two `<= n` (1 for 0).
pub fn floor_pow2(n: u32) -> u32 {
    if n == 0 {
        1
    } else {
        1 << (31 - n.leading_zeros())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floor_pow2_values() {
        assert_eq!(floor_pow2(1), 1);
        assert_eq!(floor_pow2(300), 256);
        assert_eq!(floor_pow2(512), 512);
        assert_eq!(floor_pow2(0), 1);
    }

    #[test]
    fn pow2_requirement() {
        assert!(SamplerParams::default().needs_pow2());
        assert!(!SamplerParams::CLAMP_LINEAR.needs_pow2());
        let mut p = SamplerParams::CLAMP_LINEAR;
        p.min_filter = Filter::LinearMipmapLinear;
        assert!(p.needs_pow2());
    }

    #[test]
    fn parse_attribute_names() {
        assert_eq!(Wrap::parse("mirrored_repeat"), Some(Wrap::MirroredRepeat));
        assert_eq!(Filter::parse("LINEAR_MIPMAP_NEAREST"), Some(Filter::LinearMipmapNearest));
        assert_eq!(Filter::parse("bogus"), None);
    }
}
