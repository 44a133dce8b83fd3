use std::path::PathBuf;

/// Errors shared by the doodle crates.
///
/// Render paths never return these; they log and degrade. Construction paths
/// (config loading, graph building, program compilation) do.
#[derive(Debug, thiserror::Error)]
pub enum DoodleError {
    // ---- Config / declarations ----
    #[error("io error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("json parse error at {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("graph: {0}")]
    Graph(String),

    // ---- Backend ----
    #[error("vertex shader compile error: {0}")]
    VertexCompile(String),

    #[error("fragment shader compile error: {0}")]
    FragmentCompile(String),

    #[error("program link error: {0}")]
    Link(String),

    #[error("backend object creation failed: {0}")]
    GpuCreate(String),

    // ---- Resources ----
    #[error("fetch failed for {src}: {msg}")]
    Fetch { src: String, msg: String },

    #[error("decode failed: {0}")]
    Decode(String),
}

impl DoodleError {
    pub fn graph<T: Into<String>>(s: T) -> Self {
        DoodleError::Graph(s.into())
    }
}
