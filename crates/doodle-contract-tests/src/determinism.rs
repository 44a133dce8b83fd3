#![forbid(unsafe_code)]

#[cfg(test)]
mod tests {
    use doodle_core::{ChildConfig, NodeConfig, PassConfig, ShaderSourceConfig, TextureConfig};
    use doodle_graph::SceneGraph;

    fn pass(name: Option<&str>) -> PassConfig {
        PassConfig {
            name: name.map(str::to_string),
            fragment: ShaderSourceConfig::Inline("void main(){}".into()),
            vertex: None,
            shadertoy: false,
            vertices: None,
            prevbuffer: false,
        }
    }

    fn tree() -> NodeConfig {
        NodeConfig {
            pass: pass(None),
            children: vec![
                ChildConfig::Node(NodeConfig {
                    pass: pass(Some("u_a")),
                    children: vec![ChildConfig::Texture(TextureConfig {
                        name: Some("u_noise".into()),
                        ..TextureConfig::default()
                    })],
                }),
                ChildConfig::Node(NodeConfig {
                    pass: pass(None),
                    children: vec![],
                }),
            ],
        }
    }

    /// Determinism contract:
    /// compiling the same declarations twice yields the same bottom-up order.
    #[test]
    fn graph_compile_is_deterministic_for_same_config() {
        let (g1, r1) = SceneGraph::from_config(&tree()).expect("graph 1");
        let (g2, r2) = SceneGraph::from_config(&tree()).expect("graph 2");

        let p1 = g1.compile(r1).expect("compile 1");
        let p2 = g2.compile(r2).expect("compile 2");
        let p1_again = g1.compile(r1).expect("compile 1 again");

        assert_eq!(p1.order, p2.order, "plan order must be stable across builds");
        assert_eq!(p1, p1_again, "plan must be stable for one graph");
        assert_eq!(p1.order.last(), Some(&r1), "root renders last");
        assert_eq!(p1.unnamed_passes, 1);
    }
}
