//! Material graph to GLSL compiler.
//!
//! Compilation walks the graph from the active output node, orders the
//! reachable nodes so every node follows its inputs, and emits one block of
//! fragment shader code per node. The GLSL is then handed to a
//! [`ShaderCompiler`] for SPIR-V.

use crate::error::{CompileError, GraphError, ParamError};
use crate::graph::{MaterialGraph, Node, NodeId, PinId};
use crate::node::{Domain, NodeKind};
use crate::params::{ColorRamp, NoiseParams};
use crate::value::{float_literal, PinType, PinValue};
use hashbrown::HashMap;
use radiant_shaders::glsl::MATERIAL_PRELUDE;
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::sync::Arc;
use tracing::{debug, warn};

/// Descriptor set holding material textures.
pub const TEXTURE_SET: u32 = 1;

/// GLSL to SPIR-V translation.
pub trait ShaderCompiler: Send + Sync {
    /// Compile a fragment shader. Errors carry the compiler's diagnostic text.
    fn compile_fragment(&self, source: &str, name: &str) -> Result<Vec<u32>, String>;
}

/// Runtime compilation through shaderc.
#[cfg(feature = "shaderc")]
#[derive(Debug, Default, Clone, Copy)]
pub struct ShadercCompiler;

#[cfg(feature = "shaderc")]
impl ShaderCompiler for ShadercCompiler {
    fn compile_fragment(&self, source: &str, name: &str) -> Result<Vec<u32>, String> {
        let compiler =
            shaderc::Compiler::new().ok_or_else(|| "Failed to create shader compiler".to_string())?;
        let mut options = shaderc::CompileOptions::new()
            .ok_or_else(|| "Failed to create compile options".to_string())?;
        options.set_target_env(
            shaderc::TargetEnv::Vulkan,
            shaderc::EnvVersion::Vulkan1_3 as u32,
        );
        options.set_optimization_level(shaderc::OptimizationLevel::Performance);

        let artifact = compiler
            .compile_into_spirv(source, shaderc::ShaderKind::Fragment, name, "main", Some(&options))
            .map_err(|e| e.to_string())?;
        Ok(artifact.as_binary().to_vec())
    }
}

/// Texture sampled by an image node, bound at `layout(set = 1, binding)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextureBinding {
    pub binding: u32,
    pub node: NodeId,
    /// Image path. Empty when the node has no image assigned.
    pub path: String,
}

/// GLSL produced from a graph, before SPIR-V compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedShader {
    pub source: String,
    pub textures: Vec<TextureBinding>,
}

/// Result of a successful compile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledMaterial {
    pub source: String,
    pub spirv: Vec<u32>,
    /// Content hash of the graph this was compiled from.
    pub hash: u64,
    pub domain: Domain,
    pub textures: Vec<TextureBinding>,
}

/// Compiles material graphs. Cheap to clone; clones share the shader compiler.
#[derive(Clone)]
pub struct MaterialCompiler {
    shader_compiler: Arc<dyn ShaderCompiler>,
}

impl MaterialCompiler {
    pub fn new(shader_compiler: Arc<dyn ShaderCompiler>) -> Self {
        Self { shader_compiler }
    }

    /// Emit GLSL without compiling it.
    pub fn generate(&self, graph: &MaterialGraph) -> Result<GeneratedShader, CompileError> {
        generate_glsl(graph)
    }

    #[tracing::instrument(skip_all, fields(domain = ?graph.domain(), nodes = graph.node_count()))]
    pub fn compile(&self, graph: &MaterialGraph) -> Result<CompiledMaterial, CompileError> {
        let hash = graph.compute_hash();
        let generated = generate_glsl(graph)?;

        let name = format!("material_{hash:016x}.frag");
        let spirv = self
            .shader_compiler
            .compile_fragment(&generated.source, &name)
            .map_err(|diagnostic| {
                warn!(%diagnostic, "Material shader failed to compile");
                CompileError::Shader(diagnostic)
            })?;

        debug!(hash, words = spirv.len(), textures = generated.textures.len(), "Compiled material");
        Ok(CompiledMaterial {
            source: generated.source,
            spirv,
            hash,
            domain: graph.domain(),
            textures: generated.textures,
        })
    }
}

/// Rewrite `expr` of type `from` as an expression of type `to`.
///
/// Scalars broadcast, vectors truncate by swizzle and pad with `0.0` for
/// color components and `1.0` for alpha. Any numeric value becomes an
/// emissive surface. Returns `None` when no conversion exists.
pub fn convert(expr: &str, from: PinType, to: PinType) -> Option<String> {
    use PinType::{Float, Sampler, Shader, Vec2, Vec3, Vec4};

    let converted = match (from, to) {
        _ if from == to && from != Sampler => expr.to_string(),
        (Float, Vec2) => format!("vec2({expr})"),
        (Float, Vec3) => format!("vec3({expr})"),
        (Float, Vec4) => format!("vec4(vec3({expr}), 1.0)"),
        (Vec2 | Vec3 | Vec4, Float) => format!("({expr}).x"),
        (Vec3 | Vec4, Vec2) => format!("({expr}).xy"),
        (Vec4, Vec3) => format!("({expr}).xyz"),
        (Vec2, Vec3) => format!("vec3({expr}, 0.0)"),
        (Vec2, Vec4) => format!("vec4({expr}, 0.0, 1.0)"),
        (Vec3, Vec4) => format!("vec4({expr}, 1.0)"),
        (Float | Vec2 | Vec3 | Vec4, Shader) => {
            format!("surface_emission({})", convert(expr, from, Vec3)?)
        }
        (Shader | Sampler, _) | (_, Sampler) => return None,
        (Float | Vec2 | Vec3 | Vec4, Float | Vec2 | Vec3 | Vec4) => expr.to_string(),
    };
    Some(converted)
}

/// Nodes reachable from `root`, each after every node it reads from.
pub fn topological_order(graph: &MaterialGraph, root: NodeId) -> Result<Vec<NodeId>, CompileError> {
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn visit(
        graph: &MaterialGraph,
        id: NodeId,
        marks: &mut HashMap<NodeId, Mark>,
        order: &mut Vec<NodeId>,
    ) -> Result<(), CompileError> {
        match marks.get(&id) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => return Err(CompileError::Cycle(id)),
            None => {}
        }
        marks.insert(id, Mark::Visiting);

        let node = graph.node(id).ok_or(GraphError::UnknownNode(id))?;
        for &input in &node.inputs {
            if let Some((source, _)) = graph.source_of(input) {
                visit(graph, source.id, marks, order)?;
            }
        }

        marks.insert(id, Mark::Done);
        order.push(id);
        Ok(())
    }

    let mut marks = HashMap::new();
    let mut order = Vec::new();
    visit(graph, root, &mut marks, &mut order)?;
    Ok(order)
}

/// Emit the fragment shader for a graph's active output.
pub fn generate_glsl(graph: &MaterialGraph) -> Result<GeneratedShader, CompileError> {
    let domain = graph.domain();
    let output = graph.active_output().ok_or(CompileError::NoOutput(domain))?;
    let order = topological_order(graph, output)?;

    let mut emitter = Emitter::new(graph);
    let mut surface = String::from("surface_default()");
    for id in order {
        let node = graph.node(id).ok_or(GraphError::UnknownNode(id))?;
        if id == output {
            surface = emitter.input(node, 0)?;
        } else {
            emitter.emit_node(node)?;
        }
    }

    let mut source = String::with_capacity(MATERIAL_PRELUDE.len() + emitter.body.len() + 1024);
    source.push_str("#version 460\n\n");
    source.push_str(MATERIAL_PRELUDE);
    source.push_str(
        "\nlayout(location = 0) in vec3 v_position;\n\
         layout(location = 1) in vec3 v_normal;\n\
         layout(location = 2) in vec2 v_uv;\n\n\
         layout(std140, set = 0, binding = 0) uniform SceneUniforms {\n\
         \x20   mat4 view_projection;\n\
         \x20   vec4 camera_position;\n\
         \x20   vec4 light_direction;\n\
         \x20   vec4 light_color;\n\
         } scene;\n\n",
    );
    for texture in &emitter.textures {
        let _ = writeln!(
            source,
            "layout(set = {TEXTURE_SET}, binding = {0}) uniform sampler2D texture_{0};",
            texture.binding
        );
    }
    source.push_str("\nlayout(location = 0) out vec4 out_color;\n\nvoid main() {\n");
    source.push_str("    vec3 geometric_normal = normalize(v_normal);\n");
    source.push_str("    vec3 view_dir = normalize(scene.camera_position.xyz - v_position);\n");
    source.push_str(&emitter.body);
    let _ = writeln!(source, "    Surface surface = {surface};");
    match domain {
        Domain::Surface => source.push_str(
            "    out_color = shade_surface(surface, geometric_normal, view_dir, \
             scene.light_direction.xyz, scene.light_color.rgb);\n",
        ),
        Domain::Volume => {
            source.push_str("    out_color = shade_volume(surface, scene.light_color.rgb);\n");
        }
    }
    source.push_str("}\n");

    Ok(GeneratedShader {
        source,
        textures: emitter.textures,
    })
}

/// Per-compile state: emitted statements and the expression of every
/// output pin emitted so far.
struct Emitter<'g> {
    graph: &'g MaterialGraph,
    exprs: HashMap<PinId, String>,
    body: String,
    textures: Vec<TextureBinding>,
}

impl<'g> Emitter<'g> {
    fn new(graph: &'g MaterialGraph) -> Self {
        Self {
            graph,
            exprs: HashMap::new(),
            body: String::new(),
            textures: Vec::new(),
        }
    }

    /// Expression for input `index` of `node`, converted to the pin's type.
    fn input(&self, node: &Node, index: usize) -> Result<String, CompileError> {
        let pin_id = node.inputs[index];
        let pin = self.graph.pin(pin_id).ok_or(GraphError::UnknownPin(pin_id))?;

        if let Some((_, source)) = self.graph.source_of(pin_id) {
            let expr = self
                .exprs
                .get(&source.id)
                .ok_or(GraphError::UnknownPin(source.id))?;
            return convert(expr, source.ty, pin.ty).ok_or(CompileError::Conversion {
                pin: pin_id,
                from: source.ty,
                to: pin.ty,
            });
        }

        let fallback = node
            .kind
            .schema()
            .inputs
            .get(index)
            .and_then(|spec| spec.fallback);
        Ok(match (fallback, &pin.default) {
            (Some(expr), _) => expr.to_string(),
            (None, Some(value)) => value.glsl_literal(),
            (None, None) => "surface_default()".to_string(),
        })
    }

    fn inputs(&self, node: &Node) -> Result<Vec<String>, CompileError> {
        (0..node.inputs.len()).map(|i| self.input(node, i)).collect()
    }

    /// Declare output `index` of `node` as a local holding `expr`.
    fn define(&mut self, node: &Node, index: usize, expr: &str) -> Result<String, CompileError> {
        let pin_id = node.outputs[index];
        let pin = self.graph.pin(pin_id).ok_or(GraphError::UnknownPin(pin_id))?;
        let name = format!("p{}", pin_id.0);
        let _ = writeln!(self.body, "    {} {name} = {expr};", pin.ty.glsl_type());
        self.exprs.insert(pin_id, name.clone());
        Ok(name)
    }

    /// Bind an output directly to an existing expression.
    fn alias(&mut self, node: &Node, index: usize, expr: &str) {
        self.exprs.insert(node.outputs[index], expr.to_string());
    }

    fn line(&mut self, statement: &str) {
        let _ = writeln!(self.body, "    {statement}");
    }

    fn emit_node(&mut self, node: &Node) -> Result<(), CompileError> {
        let a = self.inputs(node)?;
        let id = node.id.0;
        let _ = writeln!(self.body, "    // {} #{id}", node.kind.label());

        match node.kind {
            NodeKind::SurfaceOutput | NodeKind::VolumeOutput => {}
            NodeKind::PrincipledBsdf => {
                self.define(node, 0, &format!("principled_bsdf({})", a.join(", ")))?;
            }
            NodeKind::Emission => {
                self.define(node, 0, &format!("surface_emission({} * {})", a[0], a[1]))?;
            }
            NodeKind::MixShader => {
                self.define(node, 0, &format!("mix_surface({}, {}, {})", a[1], a[2], a[0]))?;
            }
            NodeKind::PrincipledVolume => {
                self.define(node, 0, &format!("principled_volume({})", a.join(", ")))?;
            }
            NodeKind::TextureCoordinate => {
                self.alias(node, 0, "v_uv");
                self.alias(node, 1, "v_position");
                self.alias(node, 2, "geometric_normal");
            }
            NodeKind::Geometry => {
                self.alias(node, 0, "v_position");
                self.alias(node, 1, "geometric_normal");
                self.alias(node, 2, "view_dir");
            }
            NodeKind::Value | NodeKind::Rgb => {
                let literal = node
                    .params
                    .first()
                    .map(PinValue::glsl_literal)
                    .unwrap_or_default();
                self.define(node, 0, &literal)?;
            }
            NodeKind::ImageTexture => {
                let binding = self.textures.len() as u32;
                let path = self
                    .graph
                    .pin(node.inputs[1])
                    .and_then(|p| p.default.as_ref())
                    .and_then(|v| v.as_text())
                    .unwrap_or_default()
                    .to_string();
                self.textures.push(TextureBinding {
                    binding,
                    node: node.id,
                    path,
                });
                let sample = format!("n{id}_sample");
                self.line(&format!("vec4 {sample} = texture(texture_{binding}, {});", a[0]));
                self.define(node, 0, &format!("{sample}.rgb"))?;
                self.define(node, 1, &format!("{sample}.a"))?;
            }
            NodeKind::NoiseTexture => {
                let params = node
                    .params
                    .first()
                    .ok_or(ParamError::NotText)
                    .and_then(NoiseParams::from_value)
                    .map_err(|source| CompileError::Param {
                        node: node.id,
                        source,
                    })?;
                let args = format!(
                    "{}, {}, {}, {}, {}",
                    params.kind().glsl_index(),
                    float_literal(params.scale()),
                    float_literal(params.detail()),
                    float_literal(params.roughness()),
                    float_literal(params.distortion())
                );
                let p = &a[0];
                let fac = self.define(node, 0, &format!("noise_texture({p}, {args})"))?;
                self.define(
                    node,
                    1,
                    &format!(
                        "vec3({fac}, noise_texture({p} + vec3(19.1), {args}), \
                         noise_texture({p} + vec3(33.4), {args}))"
                    ),
                )?;
            }
            NodeKind::Checker => {
                let fac = self.define(node, 1, &format!("checker_factor({}, {})", a[0], a[3]))?;
                self.define(node, 0, &format!("mix({}, {}, {fac})", a[1], a[2]))?;
            }
            NodeKind::Add => {
                self.define(node, 0, &format!("({} + {})", a[0], a[1]))?;
            }
            NodeKind::Subtract => {
                self.define(node, 0, &format!("({} - {})", a[0], a[1]))?;
            }
            NodeKind::Multiply => {
                self.define(node, 0, &format!("({} * {})", a[0], a[1]))?;
            }
            NodeKind::Divide => {
                self.define(node, 0, &format!("safe_divide({}, {})", a[0], a[1]))?;
            }
            NodeKind::Scale => {
                self.define(node, 0, &format!("({} * {})", a[0], a[1]))?;
            }
            NodeKind::DotProduct => {
                self.define(node, 0, &format!("dot({}, {})", a[0], a[1]))?;
            }
            NodeKind::Mix => {
                self.define(
                    node,
                    0,
                    &format!("mix({}, {}, clamp({}, 0.0, 1.0))", a[1], a[2], a[0]),
                )?;
            }
            NodeKind::ColorRamp => self.emit_ramp(node, &a[0])?,
            NodeKind::SeparateXyz => {
                self.define(node, 0, &format!("({}).x", a[0]))?;
                self.define(node, 1, &format!("({}).y", a[0]))?;
                self.define(node, 2, &format!("({}).z", a[0]))?;
            }
            NodeKind::CombineXyz => {
                self.define(node, 0, &format!("vec3({}, {}, {})", a[0], a[1], a[2]))?;
            }
            NodeKind::Invert => {
                self.define(
                    node,
                    0,
                    &format!("mix({1}, vec3(1.0) - {1}, {0})", a[0], a[1]),
                )?;
            }
            NodeKind::Clamp => {
                self.define(node, 0, &format!("clamp({}, {}, {})", a[0], a[1], a[2]))?;
            }
            NodeKind::Fresnel => {
                self.define(node, 0, &format!("fresnel_schlick({}, {}, view_dir)", a[0], a[1]))?;
            }
        }
        Ok(())
    }

    /// Piecewise-linear ramp: start at the first stop and blend towards
    /// each following stop over its segment.
    fn emit_ramp(&mut self, node: &Node, fac: &str) -> Result<(), CompileError> {
        let ramp = node
            .params
            .first()
            .ok_or(ParamError::NotText)
            .and_then(ColorRamp::from_value)
            .map_err(|source| CompileError::Param {
                node: node.id,
                source,
            })?;
        let stops = ramp.sorted_stops();

        let t = format!("n{}_t", node.id.0);
        self.line(&format!("float {t} = clamp({fac}, 0.0, 1.0);"));
        let first = stops.first().ok_or(CompileError::Param {
            node: node.id,
            source: ParamError::EmptyRamp,
        })?;
        let color = self.define(node, 0, &PinValue::Vec3(first.color).glsl_literal())?;
        for pair in stops.windows(2) {
            let (from, to) = (pair[0], pair[1]);
            let span = (to.position - from.position).max(1.0e-6);
            self.line(&format!(
                "{color} = mix({color}, {}, clamp(({t} - {}) / {}, 0.0, 1.0));",
                PinValue::Vec3(to.color).glsl_literal(),
                float_literal(from.position),
                float_literal(span)
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns the source length as a one-word module.
    #[derive(Default)]
    struct CountingCompiler {
        calls: AtomicUsize,
    }

    impl ShaderCompiler for CountingCompiler {
        fn compile_fragment(&self, source: &str, _name: &str) -> Result<Vec<u32>, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![0x0723_0203, source.len() as u32])
        }
    }

    struct FailingCompiler;

    impl ShaderCompiler for FailingCompiler {
        fn compile_fragment(&self, _source: &str, name: &str) -> Result<Vec<u32>, String> {
            Err(format!("{name}:42: error: 'frobnicate' : no matching overloaded function found"))
        }
    }

    fn compiler() -> MaterialCompiler {
        MaterialCompiler::new(Arc::new(CountingCompiler::default()))
    }

    fn link(graph: &mut MaterialGraph, from: NodeId, output: &str, to: NodeId, input: &str) {
        let start = graph.output(from, output).unwrap();
        let end = graph.input(to, input).unwrap();
        graph.create_link(start, end).unwrap();
    }

    #[test]
    fn conversions() {
        use PinType::{Float, Sampler, Shader, Vec2, Vec3, Vec4};
        assert_eq!(convert("x", Float, Vec2).unwrap(), "vec2(x)");
        assert_eq!(convert("x", Float, Vec3).unwrap(), "vec3(x)");
        assert_eq!(convert("x", Float, Vec4).unwrap(), "vec4(vec3(x), 1.0)");
        assert_eq!(convert("v", Vec3, Float).unwrap(), "(v).x");
        assert_eq!(convert("v", Vec4, Vec3).unwrap(), "(v).xyz");
        assert_eq!(convert("v", Vec3, Vec2).unwrap(), "(v).xy");
        assert_eq!(convert("v", Vec2, Vec3).unwrap(), "vec3(v, 0.0)");
        assert_eq!(convert("v", Vec2, Vec4).unwrap(), "vec4(v, 0.0, 1.0)");
        assert_eq!(convert("v", Vec3, Vec4).unwrap(), "vec4(v, 1.0)");
        assert_eq!(convert("v", Vec3, Vec3).unwrap(), "v");
        assert_eq!(convert("s", Shader, Shader).unwrap(), "s");
        assert_eq!(convert("x", Float, Shader).unwrap(), "surface_emission(vec3(x))");
        assert_eq!(
            convert("c", Vec4, Shader).unwrap(),
            "surface_emission((c).xyz)"
        );
        assert_eq!(convert("s", Shader, Vec3), None);
        assert_eq!(convert("t", Sampler, Sampler), None);
        assert_eq!(convert("x", Float, Sampler), None);
    }

    #[test]
    fn default_graph_compiles_to_default_surface() {
        let graph = MaterialGraph::default();
        let compiled = compiler().compile(&graph).unwrap();
        assert!(compiled.source.starts_with("#version 460\n"));
        assert!(compiled.source.contains("Surface surface = surface_default();"));
        assert!(compiled.source.contains("out_color = shade_surface("));
        assert_eq!(compiled.hash, graph.compute_hash());
        assert_eq!(compiled.domain, Domain::Surface);
        assert_eq!(compiled.spirv[0], 0x0723_0203);
    }

    #[test]
    fn nodes_follow_their_inputs() {
        let mut graph = MaterialGraph::default();
        let output = graph.active_output().unwrap();
        let bsdf = graph.create_node(NodeKind::PrincipledBsdf, [0.0, 0.0]).unwrap();
        let mix = graph.create_node(NodeKind::Mix, [0.0, 0.0]).unwrap();
        let value = graph.create_node(NodeKind::Value, [0.0, 0.0]).unwrap();
        let unused = graph.create_node(NodeKind::Rgb, [0.0, 0.0]).unwrap();
        link(&mut graph, bsdf, "BSDF", output, "Surface");
        link(&mut graph, mix, "Result", bsdf, "Base Color");
        link(&mut graph, value, "Value", mix, "Fac");
        link(&mut graph, value, "Value", bsdf, "Roughness");

        let order = topological_order(&graph, output).unwrap();
        assert_eq!(order.len(), 4);
        let position = |id| order.iter().position(|&n| n == id).unwrap();
        assert!(position(value) < position(mix));
        assert!(position(mix) < position(bsdf));
        assert_eq!(*order.last().unwrap(), output);
        assert!(!order.contains(&unused));
    }

    #[test]
    fn emits_linked_expressions_and_defaults() {
        let mut graph = MaterialGraph::default();
        let output = graph.active_output().unwrap();
        let bsdf = graph.create_node(NodeKind::PrincipledBsdf, [0.0, 0.0]).unwrap();
        let value = graph.create_node(NodeKind::Value, [0.0, 0.0]).unwrap();
        graph.set_param(value, 0, PinValue::Float(0.25)).unwrap();
        link(&mut graph, bsdf, "BSDF", output, "Surface");
        link(&mut graph, value, "Value", bsdf, "Base Color");

        let value_pin = graph.output(value, "Value").unwrap().0;
        let bsdf_pin = graph.output(bsdf, "BSDF").unwrap().0;
        let source = generate_glsl(&graph).unwrap().source;

        assert!(source.contains(&format!("float p{value_pin} = 0.25;")));
        assert!(source.contains(&format!(
            "Surface p{bsdf_pin} = principled_bsdf(vec3(p{value_pin}), 0.0, 0.5, 1.45, 1.0, \
             vec3(0.0, 0.0, 0.0), 0.0, vec3(0.0, 0.0, 0.0));"
        )));
        assert!(source.contains(&format!("Surface surface = p{bsdf_pin};")));
    }

    #[test]
    fn value_into_shader_becomes_emission() {
        let mut graph = MaterialGraph::default();
        let output = graph.active_output().unwrap();
        let rgb = graph.create_node(NodeKind::Rgb, [0.0, 0.0]).unwrap();
        link(&mut graph, rgb, "Color", output, "Surface");
        let pin = graph.output(rgb, "Color").unwrap().0;

        let source = generate_glsl(&graph).unwrap().source;
        assert!(source.contains(&format!("vec3 p{pin} = vec3(0.8, 0.8, 0.8);")));
        assert!(source.contains(&format!("Surface surface = surface_emission(p{pin});")));
    }

    #[test]
    fn shader_into_value_is_an_error() {
        let mut graph = MaterialGraph::default();
        let output = graph.active_output().unwrap();
        let emission = graph.create_node(NodeKind::Emission, [0.0, 0.0]).unwrap();
        let bsdf = graph.create_node(NodeKind::PrincipledBsdf, [0.0, 0.0]).unwrap();
        link(&mut graph, emission, "Emission", output, "Surface");
        link(&mut graph, bsdf, "BSDF", emission, "Strength");

        let strength = graph.input(emission, "Strength").unwrap();
        assert_eq!(
            compiler().compile(&graph).unwrap_err(),
            CompileError::Conversion {
                pin: strength,
                from: PinType::Shader,
                to: PinType::Float
            }
        );
    }

    #[test]
    fn cycle_is_a_compile_error() {
        let mut graph = MaterialGraph::default();
        let output = graph.active_output().unwrap();
        let emission = graph.create_node(NodeKind::Emission, [0.0, 0.0]).unwrap();
        let a = graph.create_node(NodeKind::Clamp, [0.0, 0.0]).unwrap();
        let b = graph.create_node(NodeKind::Clamp, [0.0, 0.0]).unwrap();
        link(&mut graph, emission, "Emission", output, "Surface");
        link(&mut graph, a, "Result", emission, "Strength");
        link(&mut graph, b, "Result", a, "Value");
        // Refused by create_link, so force it in
        let start = graph.output(a, "Result").unwrap();
        let end = graph.input(b, "Value").unwrap();
        graph.force_link(start, end);

        let compiler = MaterialCompiler::new(Arc::new(CountingCompiler::default()));
        assert!(matches!(
            compiler.compile(&graph),
            Err(CompileError::Cycle(id)) if id == a || id == b
        ));
    }

    #[test]
    fn shader_diagnostic_is_verbatim() {
        let compiler = MaterialCompiler::new(Arc::new(FailingCompiler));
        let graph = MaterialGraph::default();
        let name = format!("material_{:016x}.frag", graph.compute_hash());
        let err = compiler.compile(&graph).unwrap_err();
        let expected = format!("{name}:42: error: 'frobnicate' : no matching overloaded function found");
        assert_eq!(err, CompileError::Shader(expected.clone()));
        assert_eq!(err.to_string(), expected);
    }

    #[test]
    fn image_textures_get_bindings() {
        let mut graph = MaterialGraph::default();
        let output = graph.active_output().unwrap();
        let bsdf = graph.create_node(NodeKind::PrincipledBsdf, [0.0, 0.0]).unwrap();
        let albedo = graph.create_node(NodeKind::ImageTexture, [0.0, 0.0]).unwrap();
        let rough = graph.create_node(NodeKind::ImageTexture, [0.0, 0.0]).unwrap();
        let image = graph.input(albedo, "Image").unwrap();
        graph
            .set_pin_default(image, PinValue::Text("textures/albedo.png".into()))
            .unwrap();
        link(&mut graph, bsdf, "BSDF", output, "Surface");
        link(&mut graph, albedo, "Color", bsdf, "Base Color");
        link(&mut graph, rough, "Alpha", bsdf, "Roughness");

        let generated = generate_glsl(&graph).unwrap();
        assert_eq!(generated.textures.len(), 2);
        let albedo_binding = generated.textures.iter().find(|t| t.node == albedo).unwrap();
        assert_eq!(albedo_binding.path, "textures/albedo.png");
        let bindings: Vec<u32> = generated.textures.iter().map(|t| t.binding).collect();
        assert_eq!(bindings, vec![0, 1]);
        assert!(generated
            .source
            .contains("layout(set = 1, binding = 1) uniform sampler2D texture_1;"));
        // Unconnected vector reads the interpolated UV
        assert!(generated.source.contains("texture(texture_0, v_uv)"));
    }

    #[test]
    fn ramp_and_noise_parameters() {
        let mut graph = MaterialGraph::default();
        let output = graph.active_output().unwrap();
        let ramp = graph.create_node(NodeKind::ColorRamp, [0.0, 0.0]).unwrap();
        let noise = graph.create_node(NodeKind::NoiseTexture, [0.0, 0.0]).unwrap();
        link(&mut graph, ramp, "Color", output, "Surface");
        link(&mut graph, noise, "Fac", ramp, "Fac");
        graph
            .set_param(ramp, 0, PinValue::Text("RAMP:0,1,0,0;0.5,0,1,0;1,0,0,1".into()))
            .unwrap();

        let source = generate_glsl(&graph).unwrap().source;
        assert!(source.contains("noise_texture(v_position, 0, 5.0, 2.0, 0.5, 0.0)"));
        assert!(source.contains("vec3(0.0, 1.0, 0.0), clamp((n"));
        assert!(source.contains(" - 0.5) / 0.5, 0.0, 1.0));"));

        graph
            .set_param(noise, 0, PinValue::Text("NOISE2:voronoi;1,1,1,1".into()))
            .unwrap();
        assert!(matches!(
            generate_glsl(&graph),
            Err(CompileError::Param { node, .. }) if node == noise
        ));
    }

    #[test]
    fn volume_domain_uses_volume_shading() {
        let mut graph = MaterialGraph::new(Domain::Volume);
        let output = graph.active_output().unwrap();
        let volume = graph.create_node(NodeKind::PrincipledVolume, [0.0, 0.0]).unwrap();
        link(&mut graph, volume, "Volume", output, "Volume");
        let source = generate_glsl(&graph).unwrap().source;
        assert!(source.contains("principled_volume(vec3(0.5, 0.5, 0.5), 1.0,"));
        assert!(source.contains("out_color = shade_volume(surface, scene.light_color.rgb);"));
    }

    #[test]
    fn every_node_kind_emits() {
        let counting = Arc::new(CountingCompiler::default());
        let compiler = MaterialCompiler::new(counting.clone());
        for kind in NodeKind::ALL {
            if kind.is_output() {
                continue;
            }
            let mut graph = MaterialGraph::default();
            let output = graph.active_output().unwrap();
            let node = graph.create_node(kind, [0.0, 0.0]).unwrap();
            let first_output = graph.node(node).unwrap().outputs[0];
            let end = graph.input(output, "Surface").unwrap();
            graph.create_link(first_output, end).unwrap();
            let compiled = compiler.compile(&graph);
            assert!(compiled.is_ok(), "{kind:?}: {compiled:?}");
        }
        assert_eq!(counting.calls.load(Ordering::SeqCst), NodeKind::ALL.len() - 2);
    }
}
