//! Canonical test scenes.

use glam::Vec3;
use radiant_core::{Light, Material, Triangle};
use radiant_material::{flatten, Domain, MaterialGraph, NodeKind, PinValue};
use radiant_trace::{Camera, SceneData};

/// Two triangles spanning the quad `a b c d`, counter-clockwise.
pub fn quad(a: Vec3, b: Vec3, c: Vec3, d: Vec3, material: u32) -> [Triangle; 2] {
    [
        Triangle::flat(a, b, c, material),
        Triangle::flat(a, c, d, material),
    ]
}

/// Camera at the origin looking down -Z.
pub fn front_camera() -> Camera {
    Camera::look_at(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y, 1.0, 1.0)
}

/// A wall at `z = -1` wide enough to fill any view of [`front_camera`].
pub fn wall(material: Material) -> SceneData {
    let triangles = quad(
        Vec3::new(-100.0, -100.0, -1.0),
        Vec3::new(100.0, -100.0, -1.0),
        Vec3::new(100.0, 100.0, -1.0),
        Vec3::new(-100.0, 100.0, -1.0),
        0,
    );
    SceneData::new(triangles.to_vec(), vec![material])
}

/// Every camera ray sees exactly `radiance`.
pub fn constant_wall(radiance: f32) -> SceneData {
    wall(Material::emissive(Vec3::splat(radiance)))
}

/// Emissive wall covering only `x < 0` of the [`front_camera`] view.
pub fn half_wall(radiance: f32) -> SceneData {
    let triangles = quad(
        Vec3::new(-100.0, -100.0, -1.0),
        Vec3::new(0.0, -100.0, -1.0),
        Vec3::new(0.0, 100.0, -1.0),
        Vec3::new(-100.0, 100.0, -1.0),
        0,
    );
    SceneData::new(
        triangles.to_vec(),
        vec![Material::emissive(Vec3::splat(radiance))],
    )
}

/// Wall shaded with the constant material a graph flattens to.
pub fn material_preview(graph: &MaterialGraph) -> SceneData {
    wall(flatten(graph))
}

/// Surface graph whose output is a single Emission node.
pub fn emission_graph(color: [f32; 3], strength: f32) -> Option<MaterialGraph> {
    let mut graph = MaterialGraph::new(Domain::Surface);
    let output = graph.active_output()?;
    let emission = graph.create_node(NodeKind::Emission, [-200.0, 0.0]).ok()?;

    let color_pin = graph.input(emission, "Color")?;
    let strength_pin = graph.input(emission, "Strength")?;
    graph.set_pin_default(color_pin, PinValue::Vec3(color)).ok()?;
    graph.set_pin_default(strength_pin, PinValue::Float(strength)).ok()?;

    let start = graph.output(emission, "Emission")?;
    let end = graph.input(output, "Surface")?;
    graph.create_link(start, end).ok()?;
    Some(graph)
}

/// Closed box with red and green side walls and an area light in the ceiling.
///
/// The box spans `[-1, 1] x [0, 2] x [-1, 1]` and is open towards +Z, where
/// the returned camera sits.
pub fn cornell_box() -> (SceneData, Camera) {
    const WHITE: u32 = 0;
    const RED: u32 = 1;
    const GREEN: u32 = 2;
    const LIGHT: u32 = 3;

    let p = |x: f32, y: f32, z: f32| Vec3::new(x, y, z);
    let mut triangles = Vec::new();
    // floor, ceiling, back
    triangles.extend(quad(p(-1.0, 0.0, 1.0), p(1.0, 0.0, 1.0), p(1.0, 0.0, -1.0), p(-1.0, 0.0, -1.0), WHITE));
    triangles.extend(quad(p(-1.0, 2.0, -1.0), p(1.0, 2.0, -1.0), p(1.0, 2.0, 1.0), p(-1.0, 2.0, 1.0), WHITE));
    triangles.extend(quad(p(-1.0, 0.0, -1.0), p(1.0, 0.0, -1.0), p(1.0, 2.0, -1.0), p(-1.0, 2.0, -1.0), WHITE));
    triangles.extend(quad(p(-1.0, 0.0, 1.0), p(-1.0, 0.0, -1.0), p(-1.0, 2.0, -1.0), p(-1.0, 2.0, 1.0), RED));
    triangles.extend(quad(p(1.0, 0.0, -1.0), p(1.0, 0.0, 1.0), p(1.0, 2.0, 1.0), p(1.0, 2.0, -1.0), GREEN));
    triangles.extend(quad(p(-0.3, 1.99, -0.3), p(0.3, 1.99, -0.3), p(0.3, 1.99, 0.3), p(-0.3, 1.99, 0.3), LIGHT));

    let materials = vec![
        Material::diffuse(Vec3::splat(0.73)),
        Material::diffuse(Vec3::new(0.65, 0.05, 0.05)),
        Material::diffuse(Vec3::new(0.12, 0.45, 0.15)),
        Material::emissive(Vec3::splat(15.0)),
    ];
    let scene = SceneData::new(triangles, materials)
        .with_lights(vec![Light::point(Vec3::new(0.0, 1.8, 0.0), Vec3::ONE, 2.0)]);
    let camera = Camera::look_at(Vec3::new(0.0, 1.0, 3.4), Vec3::new(0.0, 1.0, 0.0), Vec3::Y, 0.9, 1.0);
    (scene, camera)
}
