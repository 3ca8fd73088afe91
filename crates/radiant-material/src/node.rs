//! Node kinds and their fixed pin schemas.

use crate::value::{PinType, PinValue};
use serde::{Deserialize, Serialize};

/// Shading domain a graph compiles for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Domain {
    Surface,
    Volume,
}

/// Every node a material graph can contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    SurfaceOutput,
    VolumeOutput,
    PrincipledBsdf,
    Emission,
    MixShader,
    PrincipledVolume,
    TextureCoordinate,
    Geometry,
    Value,
    Rgb,
    ImageTexture,
    NoiseTexture,
    Checker,
    Add,
    Subtract,
    Multiply,
    Divide,
    Scale,
    DotProduct,
    Mix,
    ColorRamp,
    SeparateXyz,
    CombineXyz,
    Invert,
    Clamp,
    Fresnel,
}

/// Input pin template.
#[derive(Debug, Clone, PartialEq)]
pub struct InputSpec {
    pub name: &'static str,
    pub ty: PinType,
    /// Editable default. `None` for shader inputs.
    pub default: Option<PinValue>,
    /// GLSL expression read instead of the default when unconnected.
    pub fallback: Option<&'static str>,
}

/// Output pin template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputSpec {
    pub name: &'static str,
    pub ty: PinType,
}

/// Node parameter template.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub default: PinValue,
}

/// Pins and parameters a node of a given kind is created with.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NodeSchema {
    pub inputs: Vec<InputSpec>,
    pub outputs: Vec<OutputSpec>,
    pub params: Vec<ParamSpec>,
}

/// Default [`NoiseParams`](crate::params::NoiseParams) text for new noise nodes.
pub const DEFAULT_NOISE: &str = "NOISE2:fbm;5,2,0.5,0";
/// Default [`ColorRamp`](crate::params::ColorRamp) text for new ramp nodes.
pub const DEFAULT_RAMP: &str = "RAMP:0,0,0,0;1,1,1,1";

fn float(name: &'static str, value: f32) -> InputSpec {
    InputSpec {
        name,
        ty: PinType::Float,
        default: Some(PinValue::Float(value)),
        fallback: None,
    }
}

fn vec3(name: &'static str, value: [f32; 3]) -> InputSpec {
    InputSpec {
        name,
        ty: PinType::Vec3,
        default: Some(PinValue::Vec3(value)),
        fallback: None,
    }
}

fn shader(name: &'static str) -> InputSpec {
    InputSpec {
        name,
        ty: PinType::Shader,
        default: None,
        fallback: None,
    }
}

fn coordinate(name: &'static str, ty: PinType, fallback: &'static str) -> InputSpec {
    InputSpec {
        name,
        ty,
        default: Some(ty.default_value()),
        fallback: Some(fallback),
    }
}

const fn out(name: &'static str, ty: PinType) -> OutputSpec {
    OutputSpec { name, ty }
}

fn param(name: &'static str, default: PinValue) -> ParamSpec {
    ParamSpec { name, default }
}

impl NodeKind {
    pub const ALL: [Self; 26] = [
        Self::SurfaceOutput,
        Self::VolumeOutput,
        Self::PrincipledBsdf,
        Self::Emission,
        Self::MixShader,
        Self::PrincipledVolume,
        Self::TextureCoordinate,
        Self::Geometry,
        Self::Value,
        Self::Rgb,
        Self::ImageTexture,
        Self::NoiseTexture,
        Self::Checker,
        Self::Add,
        Self::Subtract,
        Self::Multiply,
        Self::Divide,
        Self::Scale,
        Self::DotProduct,
        Self::Mix,
        Self::ColorRamp,
        Self::SeparateXyz,
        Self::CombineXyz,
        Self::Invert,
        Self::Clamp,
        Self::Fresnel,
    ];

    /// Domain this node terminates, if it is an output node.
    pub const fn output_domain(self) -> Option<Domain> {
        match self {
            Self::SurfaceOutput => Some(Domain::Surface),
            Self::VolumeOutput => Some(Domain::Volume),
            _ => None,
        }
    }

    pub const fn is_output(self) -> bool {
        self.output_domain().is_some()
    }

    /// Output node kind for a domain.
    pub const fn output_for(domain: Domain) -> Self {
        match domain {
            Domain::Surface => Self::SurfaceOutput,
            Domain::Volume => Self::VolumeOutput,
        }
    }

    /// Display name shown in the node editor.
    pub const fn label(self) -> &'static str {
        match self {
            Self::SurfaceOutput => "Material Output",
            Self::VolumeOutput => "Volume Output",
            Self::PrincipledBsdf => "Principled BSDF",
            Self::Emission => "Emission",
            Self::MixShader => "Mix Shader",
            Self::PrincipledVolume => "Principled Volume",
            Self::TextureCoordinate => "Texture Coordinate",
            Self::Geometry => "Geometry",
            Self::Value => "Value",
            Self::Rgb => "RGB",
            Self::ImageTexture => "Image Texture",
            Self::NoiseTexture => "Noise Texture",
            Self::Checker => "Checker Texture",
            Self::Add => "Add",
            Self::Subtract => "Subtract",
            Self::Multiply => "Multiply",
            Self::Divide => "Divide",
            Self::Scale => "Scale",
            Self::DotProduct => "Dot Product",
            Self::Mix => "Mix",
            Self::ColorRamp => "Color Ramp",
            Self::SeparateXyz => "Separate XYZ",
            Self::CombineXyz => "Combine XYZ",
            Self::Invert => "Invert",
            Self::Clamp => "Clamp",
            Self::Fresnel => "Fresnel",
        }
    }

    /// Pins and parameters of a freshly created node.
    ///
    /// Input order is argument order in generated code.
    pub fn schema(self) -> NodeSchema {
        let (inputs, outputs, params) = match self {
            Self::SurfaceOutput => (vec![shader("Surface")], vec![], vec![]),
            Self::VolumeOutput => (vec![shader("Volume")], vec![], vec![]),
            Self::PrincipledBsdf => (
                vec![
                    vec3("Base Color", [0.8; 3]),
                    float("Metallic", 0.0),
                    float("Roughness", 0.5),
                    float("IOR", 1.45),
                    float("Alpha", 1.0),
                    vec3("Emission", [0.0; 3]),
                    float("Emission Strength", 0.0),
                    vec3("Normal", [0.0; 3]),
                ],
                vec![out("BSDF", PinType::Shader)],
                vec![],
            ),
            Self::Emission => (
                vec![vec3("Color", [1.0; 3]), float("Strength", 1.0)],
                vec![out("Emission", PinType::Shader)],
                vec![],
            ),
            Self::MixShader => (
                vec![float("Fac", 0.5), shader("Shader A"), shader("Shader B")],
                vec![out("Shader", PinType::Shader)],
                vec![],
            ),
            Self::PrincipledVolume => (
                vec![
                    vec3("Color", [0.5; 3]),
                    float("Density", 1.0),
                    vec3("Emission", [0.0; 3]),
                    float("Emission Strength", 0.0),
                ],
                vec![out("Volume", PinType::Shader)],
                vec![],
            ),
            Self::TextureCoordinate => (
                vec![],
                vec![
                    out("UV", PinType::Vec2),
                    out("Generated", PinType::Vec3),
                    out("Normal", PinType::Vec3),
                ],
                vec![],
            ),
            Self::Geometry => (
                vec![],
                vec![
                    out("Position", PinType::Vec3),
                    out("Normal", PinType::Vec3),
                    out("Incoming", PinType::Vec3),
                ],
                vec![],
            ),
            Self::Value => (
                vec![],
                vec![out("Value", PinType::Float)],
                vec![param("Value", PinValue::Float(0.5))],
            ),
            Self::Rgb => (
                vec![],
                vec![out("Color", PinType::Vec3)],
                vec![param("Color", PinValue::Vec3([0.8; 3]))],
            ),
            Self::ImageTexture => (
                vec![
                    coordinate("Vector", PinType::Vec2, "v_uv"),
                    InputSpec {
                        name: "Image",
                        ty: PinType::Sampler,
                        default: Some(PinValue::Text(String::new())),
                        fallback: None,
                    },
                ],
                vec![out("Color", PinType::Vec3), out("Alpha", PinType::Float)],
                vec![],
            ),
            Self::NoiseTexture => (
                vec![coordinate("Vector", PinType::Vec3, "v_position")],
                vec![out("Fac", PinType::Float), out("Color", PinType::Vec3)],
                vec![param("Noise", PinValue::Text(DEFAULT_NOISE.to_string()))],
            ),
            Self::Checker => (
                vec![
                    coordinate("Vector", PinType::Vec3, "v_position"),
                    vec3("Color1", [0.8; 3]),
                    vec3("Color2", [0.2; 3]),
                    float("Scale", 5.0),
                ],
                vec![out("Color", PinType::Vec3), out("Fac", PinType::Float)],
                vec![],
            ),
            Self::Add | Self::Subtract => (
                vec![vec3("A", [0.0; 3]), vec3("B", [0.0; 3])],
                vec![out("Vector", PinType::Vec3)],
                vec![],
            ),
            Self::Multiply | Self::Divide => (
                vec![vec3("A", [1.0; 3]), vec3("B", [1.0; 3])],
                vec![out("Vector", PinType::Vec3)],
                vec![],
            ),
            Self::Scale => (
                vec![vec3("Vector", [0.0; 3]), float("Scale", 1.0)],
                vec![out("Vector", PinType::Vec3)],
                vec![],
            ),
            Self::DotProduct => (
                vec![vec3("A", [0.0; 3]), vec3("B", [0.0; 3])],
                vec![out("Value", PinType::Float)],
                vec![],
            ),
            Self::Mix => (
                vec![
                    float("Fac", 0.5),
                    vec3("A", [0.5; 3]),
                    vec3("B", [0.5; 3]),
                ],
                vec![out("Result", PinType::Vec3)],
                vec![],
            ),
            Self::ColorRamp => (
                vec![float("Fac", 0.5)],
                vec![out("Color", PinType::Vec3)],
                vec![param("Ramp", PinValue::Text(DEFAULT_RAMP.to_string()))],
            ),
            Self::SeparateXyz => (
                vec![vec3("Vector", [0.0; 3])],
                vec![
                    out("X", PinType::Float),
                    out("Y", PinType::Float),
                    out("Z", PinType::Float),
                ],
                vec![],
            ),
            Self::CombineXyz => (
                vec![float("X", 0.0), float("Y", 0.0), float("Z", 0.0)],
                vec![out("Vector", PinType::Vec3)],
                vec![],
            ),
            Self::Invert => (
                vec![float("Fac", 1.0), vec3("Color", [0.0; 3])],
                vec![out("Color", PinType::Vec3)],
                vec![],
            ),
            Self::Clamp => (
                vec![float("Value", 1.0), float("Min", 0.0), float("Max", 1.0)],
                vec![out("Result", PinType::Float)],
                vec![],
            ),
            Self::Fresnel => (
                vec![
                    float("IOR", 1.45),
                    coordinate("Normal", PinType::Vec3, "geometric_normal"),
                ],
                vec![out("Fac", PinType::Float)],
                vec![],
            ),
        };

        NodeSchema {
            inputs,
            outputs,
            params,
        }
    }
}
