//! Fragment source preparation and the default geometry.

use std::sync::OnceLock;

use regex::Regex;

use doodle_core::uniforms::builtin_declarations;

pub const DEFAULT_VERTEX_SHADER: &str =
    "attribute vec2 position;\nvoid main() {\n  gl_Position = vec4(position, 0.0, 1.0);\n}\n";

/// Full-screen quad as two triangles.
pub const DEFAULT_VERTICES: [f32; 12] = [
    -1.0, -1.0, 1.0, -1.0, -1.0, 1.0, //
    -1.0, 1.0, 1.0, -1.0, 1.0, 1.0,
];

fn shadertoy_io() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\(\s*out\s+vec4\s+(\S+)\s*,\s*in\s+vec2\s+(\S+)\s*\)").expect("static regex")
    })
}

/// Rewrite a `mainImage(out vec4 c, in vec2 p)` entry point into `main()`
/// with `c`/`p` mapped onto the fragment builtins.
pub fn rewrite_shadertoy(src: &str) -> String {
    let io = shadertoy_io()
        .captures(src)
        .map(|caps| (caps[1].to_string(), caps[2].to_string()));
    let body = src.replacen("mainImage", "main", 1);
    let body = shadertoy_io().replacen(&body, 1, "()").into_owned();
    match io {
        Some((color, coord)) => {
            format!("#define {color} gl_FragColor\n#define {coord} gl_FragCoord.xy\n{body}")
        }
        None => body,
    }
}

/// Final fragment source: precision, built-in uniform declarations, then the
/// body (rewritten when `toy`). User uniforms are declared by the shader itself.
pub fn prepare_fragment(src: &str, toy: bool) -> String {
    let body = if toy { rewrite_shadertoy(src) } else { src.to_string() };
    let mut out = String::with_capacity(body.len() + 512);
    out.push_str("precision highp float;\n");
    out.push_str(&builtin_declarations(toy));
    out.push_str(&body);
    out
}
