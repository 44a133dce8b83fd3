#![forbid(unsafe_code)]

//! End-to-end properties of the runtime, checked against the recording GPU.

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use image::RgbaImage;

    use doodle_core::{SamplerParams, UniformValue};
    use doodle_runtime::testing::RecordingGpu;
    use doodle_runtime::{
        compile_program, BufferCanvas, Gpu, PointerKind, Rect, RenderNode, Renderer, ShaderOptions, Surface,
        TextureBinding, TextureOptions, TextureSource, TextureUnit, TextureUpdate, UniformTable, Viewport,
    };

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn node(gpu: &RecordingGpu, fragment: &str) -> RenderNode {
        RenderNode::new(
            gpu,
            &ShaderOptions {
                fragment: fragment.into(),
                ..ShaderOptions::default()
            },
        )
    }

    fn renderer(gpu: &RecordingGpu) -> Renderer {
        let mut r = Renderer::new(Box::new(gpu.clone()));
        r.set_viewport(Viewport::new(800.0, 600.0));
        r
    }

    #[test]
    fn non_pow2_sources_upload_at_floor_pow2_through_one_scratch_canvas() {
        init_tracing();
        let gpu = RecordingGpu::new();
        let mut binding = TextureBinding::new(
            &gpu,
            TextureUnit(0),
            TextureOptions {
                sampler: SamplerParams::default(),
                ..TextureOptions::default()
            },
        )
        .expect("binding");
        let tex = binding.texture().expect("texture created");

        let src = RgbaImage::new(300, 130);
        binding.update(&gpu, TextureUpdate::pixels(&src));
        let scratch = binding.scratch_id();
        let rec = gpu.texture(tex).expect("texture record");
        assert_eq!((rec.width, rec.height), (256, 128));

        for _ in 0..3 {
            binding.update(&gpu, TextureUpdate::pixels(&src));
        }
        assert_eq!(binding.scratch_id(), scratch, "scratch canvas must be reused");
        assert_eq!(gpu.texture(tex).map(|r| (r.width, r.height)), Some((256, 128)));
    }

    #[test]
    fn uniform_writes_are_idempotent() {
        let gpu = RecordingGpu::new();
        let program = compile_program(
            &gpu,
            "attribute vec2 position;\nvoid main(){}",
            "uniform vec3 u_tint;\nvoid main(){}",
        )
        .expect("program");
        gpu.use_program(Some(program));
        let mut table = UniformTable::introspect(&gpu, program);

        let tint = UniformValue::Vec3([0.2, 0.4, 0.6]);
        table.set(&gpu, "u_tint", &tint);
        table.set(&gpu, "u_tint", &tint);
        assert_eq!(gpu.upload_count(), 1);
    }

    #[test]
    fn texture_units_are_consecutive_in_declaration_order() {
        let gpu = RecordingGpu::new();
        let mut r = renderer(&gpu);
        for name in ["a", "b"] {
            r.sources_mut()
                .register_texture(name, TextureSource::Canvas(Rc::new(RefCell::new(RgbaImage::new(2, 2)))));
        }

        let cfg: doodle_core::NodeConfig = serde_json_node(
            r##"{
                "fragment": { "inline": "void main(){}" },
                "children": [
                    { "kind": "texture", "name": "u_a", "src": "#a" },
                    { "kind": "node", "name": "u_pass", "fragment": { "inline": "void main(){}" } },
                    { "kind": "uniform", "name": "u_k", "type": "float" },
                    { "kind": "texture", "name": "u_b", "src": "#b" }
                ]
            }"##,
        );
        let root = doodle_runtime::build_node(&mut r, &cfg).expect("build");

        let mut units: Vec<u32> = root.textures().map(|t| t.unit().index()).collect();
        units.extend(root.child_unit("u_pass").map(TextureUnit::index));
        units.sort_unstable();
        let k = units[0];
        assert_eq!(units, vec![k, k + 1, k + 2]);
        assert_eq!(root.child_unit("u_pass"), Some(TextureUnit(k + 1)));
    }

    fn serde_json_node(text: &str) -> doodle_core::NodeConfig {
        let wrapped = format!(r#"{{ "surfaces": [ {{ "root": {text} }} ] }}"#);
        doodle_core::DoodleConfig::from_json_str(&wrapped)
            .expect("node config")
            .surfaces
            .remove(0)
            .root
    }

    #[test]
    fn feedback_previous_is_last_frames_target() {
        let gpu = RecordingGpu::new();
        let mut root = node(&gpu, "uniform sampler2D u_fb;\nvoid main(){}");
        let child = node(&gpu, "uniform sampler2D u_prevbuffer;\nvoid main(){}");
        root.add_node(&gpu, child, "u_fb", true);
        let prev_unit = root.child("u_fb").and_then(RenderNode::prevbuffer_unit).expect("feedback unit");

        root.render(&gpu, 16, 16, &[]);
        let first_target = gpu.draws()[0].framebuffer.expect("child renders off-screen");

        gpu.reset_log();
        root.render(&gpu, 16, 16, &[]);
        let child_draw = &gpu.draws()[0];
        let previous = child_draw
            .bindings
            .iter()
            .find(|(unit, _)| *unit == prev_unit)
            .map(|(_, tex)| *tex);
        assert_eq!(previous, gpu.framebuffer_texture(first_target));
        assert_ne!(child_draw.framebuffer, Some(first_target));
    }

    #[test]
    fn release_flips_the_drag_anchor() {
        let gpu = RecordingGpu::new();
        let mut r = renderer(&gpu);
        let canvas = BufferCanvas::new(Rect::new(0.0, 0.0, 200.0, 150.0));
        let surface = Surface::new(
            Box::new(canvas),
            node(&gpu, "void main(){}"),
            0,
            0,
            r.viewport(),
        );
        let id = r.add_surface(surface);

        r.pointer_down(id, 10.0, 20.0, PointerKind::Mouse);
        r.pointer_move(id, 30.0, 50.0, PointerKind::Mouse);
        r.pointer_up(id, PointerKind::Mouse);

        let s = r.surface(id).expect("surface");
        assert_eq!(s.mouse(), [30.0, 100.0]);
        assert_eq!(s.mouse_drag(), [30.0, 100.0, -10.0, -130.0]);
    }

    #[test]
    fn surfaces_above_the_viewport_draw_nothing() {
        let gpu = RecordingGpu::new();
        let mut r = renderer(&gpu);
        let canvas = BufferCanvas::new(Rect::new(0.0, -200.0, 100.0, 150.0));
        let surface = Surface::new(
            Box::new(canvas.clone()),
            node(&gpu, "void main(){}"),
            0,
            0,
            r.viewport(),
        );
        let id = r.add_surface(surface);

        r.frame(0.0);
        assert_eq!(gpu.draw_count(), 0);

        let scrolled = Rect::new(0.0, -180.0, 100.0, 150.0);
        canvas.set_rect(scrolled);
        r.frame(16.0);
        assert_eq!(gpu.draw_count(), 0);
        assert_eq!(r.surface(id).map(Surface::rect), Some(scrolled));
    }

    #[test]
    fn feedback_tree_counts_three_frames() {
        init_tracing();
        let gpu = RecordingGpu::new();
        let mut r = renderer(&gpu);

        let mut root = node(&gpu, "uniform sampler2D u_trail;\nvoid main(){}");
        let trail = node(&gpu, "uniform sampler2D u_prevbuffer;\nvoid main(){}");
        root.add_node(&gpu, trail, "u_trail", true);
        let canvas = BufferCanvas::new(Rect::new(0.0, 0.0, 64.0, 64.0));
        let id = r.add_surface(Surface::new(Box::new(canvas), root, 0, 0, r.viewport()));

        for ts in [0.0, 16.0, 33.0] {
            assert_eq!(r.frame(ts), 1);
        }
        assert_eq!(r.uniform("u_frame"), Some(&UniformValue::Int(3)));
        assert_eq!(gpu.last_upload("u_frame"), Some(UniformValue::Int(3)));
        assert_eq!(gpu.draw_count(), 6);
        assert!(r.remove_surface(id));
        assert_eq!(gpu.live_framebuffers(), 0);
    }
}
