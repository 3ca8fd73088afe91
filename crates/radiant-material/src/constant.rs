//! Reduce a material graph to the constant material the tracers consume.

use crate::graph::{MaterialGraph, Node, PinId};
use crate::node::{Domain, NodeKind};
use crate::value::{PinType, PinValue};
use glam::Vec3;
use radiant_core::Material;

/// Flatten the surface feeding the active output into a [`Material`].
///
/// Inputs read their pin defaults, or the constant of a `Value` / `Rgb` node
/// linked into them. Anything else falls back to the default material.
pub fn flatten(graph: &MaterialGraph) -> Material {
    if graph.domain() != Domain::Surface {
        return Material::default();
    }
    graph
        .active_output()
        .and_then(|output| graph.node(output))
        .and_then(|output| output.inputs.first().copied())
        .and_then(|surface| flatten_shader(graph, surface, 0))
        .unwrap_or_default()
}

/// Nested mix shaders deeper than this flatten to the default material.
const MAX_DEPTH: u32 = 16;

fn flatten_shader(graph: &MaterialGraph, input: PinId, depth: u32) -> Option<Material> {
    if depth > MAX_DEPTH {
        return None;
    }
    let (node, pin) = graph.source_of(input)?;
    if pin.ty != PinType::Shader {
        return constant_vec3(graph, input).map(Material::emissive);
    }

    match node.kind {
        NodeKind::PrincipledBsdf => {
            let float = |name| constant_float(graph, node, name);
            let color = |name| constant_vec3(graph, graph.input(node.id, name)?);
            Some(Material {
                base_color: color("Base Color")?,
                metallic: float("Metallic")?,
                roughness: float("Roughness")?,
                ior: float("IOR")?,
                opacity: float("Alpha")?,
                emission_color: color("Emission")?,
                emission_strength: float("Emission Strength")?,
            })
        }
        NodeKind::Emission => {
            let color = constant_vec3(graph, graph.input(node.id, "Color")?)?;
            let strength = constant_float(graph, node, "Strength")?;
            Some(Material {
                emission_strength: strength,
                ..Material::emissive(color)
            })
        }
        NodeKind::MixShader => {
            let t = constant_float(graph, node, "Fac")?.clamp(0.0, 1.0);
            let a = flatten_shader(graph, graph.input(node.id, "Shader A")?, depth + 1)
                .unwrap_or_default();
            let b = flatten_shader(graph, graph.input(node.id, "Shader B")?, depth + 1)
                .unwrap_or_default();
            Some(mix(&a, &b, t))
        }
        _ => None,
    }
}

/// Constant value arriving at an input: a linked `Value` / `Rgb` node or the
/// pin default. Other sources are not constant.
fn constant_value(graph: &MaterialGraph, input: PinId) -> Option<PinValue> {
    match graph.source_of(input) {
        Some((source, _)) => match source.kind {
            NodeKind::Value | NodeKind::Rgb => source.params.first().cloned(),
            _ => None,
        },
        None => graph.pin(input)?.default.clone(),
    }
}

fn constant_float(graph: &MaterialGraph, node: &Node, name: &str) -> Option<f32> {
    constant_value(graph, graph.input(node.id, name)?)?.as_float()
}

fn constant_vec3(graph: &MaterialGraph, input: PinId) -> Option<Vec3> {
    constant_value(graph, input)?.as_vec3().map(Vec3::from_array)
}

fn mix(a: &Material, b: &Material, t: f32) -> Material {
    let lerp = |x: f32, y: f32| x + (y - x) * t;
    Material {
        base_color: a.base_color.lerp(b.base_color, t),
        metallic: lerp(a.metallic, b.metallic),
        roughness: lerp(a.roughness, b.roughness),
        ior: lerp(a.ior, b.ior),
        opacity: lerp(a.opacity, b.opacity),
        emission_color: a.emission().lerp(b.emission(), t),
        emission_strength: 1.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn link(graph: &mut MaterialGraph, from: crate::NodeId, output: &str, to: crate::NodeId, input: &str) {
        let start = graph.output(from, output).unwrap();
        let end = graph.input(to, input).unwrap();
        graph.create_link(start, end).unwrap();
    }

    #[test]
    fn default_graph_flattens_to_default_material() {
        assert_eq!(flatten(&MaterialGraph::default()), Material::default());
        assert_eq!(flatten(&MaterialGraph::new(Domain::Volume)), Material::default());
    }

    #[test]
    fn bsdf_reads_defaults_and_constant_sources() {
        let mut graph = MaterialGraph::default();
        let output = graph.active_output().unwrap();
        let bsdf = graph.create_node(NodeKind::PrincipledBsdf, [0.0, 0.0]).unwrap();
        let rgb = graph.create_node(NodeKind::Rgb, [0.0, 0.0]).unwrap();
        let value = graph.create_node(NodeKind::Value, [0.0, 0.0]).unwrap();
        graph.set_param(rgb, 0, PinValue::Vec3([0.1, 0.2, 0.3])).unwrap();
        graph.set_param(value, 0, PinValue::Float(0.9)).unwrap();
        let metallic = graph.input(bsdf, "Metallic").unwrap();
        graph.set_pin_default(metallic, PinValue::Float(1.0)).unwrap();

        link(&mut graph, bsdf, "BSDF", output, "Surface");
        link(&mut graph, rgb, "Color", bsdf, "Base Color");
        link(&mut graph, value, "Value", bsdf, "Roughness");

        let material = flatten(&graph);
        assert_eq!(material.base_color, Vec3::new(0.1, 0.2, 0.3));
        assert_eq!(material.metallic, 1.0);
        assert_eq!(material.roughness, 0.9);
        assert_eq!(material.ior, 1.45);
        assert_eq!(material.opacity, 1.0);
        assert_eq!(material.emission(), Vec3::ZERO);
    }

    #[test]
    fn emission_node() {
        let mut graph = MaterialGraph::default();
        let output = graph.active_output().unwrap();
        let emission = graph.create_node(NodeKind::Emission, [0.0, 0.0]).unwrap();
        let strength = graph.input(emission, "Strength").unwrap();
        graph.set_pin_default(strength, PinValue::Float(4.0)).unwrap();
        link(&mut graph, emission, "Emission", output, "Surface");

        let material = flatten(&graph);
        assert_eq!(material.emission(), Vec3::splat(4.0));
        assert_eq!(material.base_color, Vec3::ZERO);
    }

    #[test]
    fn value_into_surface_is_emissive() {
        let mut graph = MaterialGraph::default();
        let output = graph.active_output().unwrap();
        let rgb = graph.create_node(NodeKind::Rgb, [0.0, 0.0]).unwrap();
        graph.set_param(rgb, 0, PinValue::Vec3([0.5, 0.5, 0.5])).unwrap();
        link(&mut graph, rgb, "Color", output, "Surface");
        assert_eq!(flatten(&graph).emission(), Vec3::splat(0.5));
    }

    #[test]
    fn mix_shader_blends() {
        let mut graph = MaterialGraph::default();
        let output = graph.active_output().unwrap();
        let mix_node = graph.create_node(NodeKind::MixShader, [0.0, 0.0]).unwrap();
        let bsdf = graph.create_node(NodeKind::PrincipledBsdf, [0.0, 0.0]).unwrap();
        let emission = graph.create_node(NodeKind::Emission, [0.0, 0.0]).unwrap();
        link(&mut graph, mix_node, "Shader", output, "Surface");
        link(&mut graph, bsdf, "BSDF", mix_node, "Shader A");
        link(&mut graph, emission, "Emission", mix_node, "Shader B");

        let material = flatten(&graph);
        assert_relative_eq!(material.base_color.x, 0.4);
        assert_relative_eq!(material.emission().x, 0.5);
    }

    #[test]
    fn procedural_inputs_fall_back_to_default() {
        let mut graph = MaterialGraph::default();
        let output = graph.active_output().unwrap();
        let bsdf = graph.create_node(NodeKind::PrincipledBsdf, [0.0, 0.0]).unwrap();
        let noise = graph.create_node(NodeKind::NoiseTexture, [0.0, 0.0]).unwrap();
        link(&mut graph, bsdf, "BSDF", output, "Surface");
        link(&mut graph, noise, "Color", bsdf, "Base Color");
        assert_eq!(flatten(&graph), Material::default());
    }
}
