//! Pin types and pin values.

use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

/// Type of a node pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PinType {
    Float,
    Vec2,
    Vec3,
    Vec4,
    /// A shading closure (`Surface` in generated code).
    Shader,
    /// A texture slot. Never linkable.
    Sampler,
}

impl PinType {
    /// GLSL type used for expressions of this type.
    pub const fn glsl_type(self) -> &'static str {
        match self {
            Self::Float => "float",
            Self::Vec2 => "vec2",
            Self::Vec3 => "vec3",
            Self::Vec4 => "vec4",
            Self::Shader => "Surface",
            Self::Sampler => "sampler2D",
        }
    }

    /// Number of scalar components, `None` for non-numeric types.
    pub const fn components(self) -> Option<u32> {
        match self {
            Self::Float => Some(1),
            Self::Vec2 => Some(2),
            Self::Vec3 => Some(3),
            Self::Vec4 => Some(4),
            Self::Shader | Self::Sampler => None,
        }
    }

    pub const fn is_numeric(self) -> bool {
        self.components().is_some()
    }

    /// Zero-like default used when a pin carries no explicit default.
    pub fn default_value(self) -> PinValue {
        match self {
            Self::Float => PinValue::Float(0.0),
            Self::Vec2 => PinValue::Vec2([0.0; 2]),
            Self::Vec3 => PinValue::Vec3([0.0; 3]),
            Self::Vec4 => PinValue::Vec4([0.0, 0.0, 0.0, 1.0]),
            Self::Shader | Self::Sampler => PinValue::Text(String::new()),
        }
    }
}

/// Default value of an input pin or value of a node parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PinValue {
    Float(f32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    /// Texture paths and compound encodings such as color ramps.
    Text(String),
}

impl PinValue {
    /// Pin type this value can be stored in. Text belongs to sampler slots.
    pub const fn pin_type(&self) -> PinType {
        match self {
            Self::Float(_) => PinType::Float,
            Self::Vec2(_) => PinType::Vec2,
            Self::Vec3(_) => PinType::Vec3,
            Self::Vec4(_) => PinType::Vec4,
            Self::Text(_) => PinType::Sampler,
        }
    }

    /// Whether this value may replace `other` without changing its type.
    pub fn same_kind(&self, other: &Self) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }

    /// GLSL constant expression for this value.
    ///
    /// Text has no numeric meaning and becomes `0.0`.
    pub fn glsl_literal(&self) -> String {
        match self {
            Self::Float(x) => float_literal(*x),
            Self::Vec2(v) => format!("vec2({})", join_floats(v)),
            Self::Vec3(v) => format!("vec3({})", join_floats(v)),
            Self::Vec4(v) => format!("vec4({})", join_floats(v)),
            Self::Text(_) => "0.0".to_string(),
        }
    }

    /// First component, or `None` for text.
    pub const fn as_float(&self) -> Option<f32> {
        match self {
            Self::Float(x) => Some(*x),
            Self::Vec2([x, ..]) | Self::Vec3([x, ..]) | Self::Vec4([x, ..]) => Some(*x),
            Self::Text(_) => None,
        }
    }

    /// Value as an RGB triple: scalars broadcast, shorter vectors pad with 0.
    pub const fn as_vec3(&self) -> Option<[f32; 3]> {
        match self {
            Self::Float(x) => Some([*x; 3]),
            Self::Vec2([x, y]) => Some([*x, *y, 0.0]),
            Self::Vec3(v) => Some(*v),
            Self::Vec4([x, y, z, _]) => Some([*x, *y, *z]),
            Self::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Float(_) | Self::Vec2(_) | Self::Vec3(_) | Self::Vec4(_) => None,
        }
    }

    /// Feed the value into a content hash. Floats hash by bit pattern.
    pub fn hash_into<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Float(x) => {
                0u8.hash(state);
                x.to_bits().hash(state);
            }
            Self::Vec2(v) => {
                1u8.hash(state);
                hash_floats(v, state);
            }
            Self::Vec3(v) => {
                2u8.hash(state);
                hash_floats(v, state);
            }
            Self::Vec4(v) => {
                3u8.hash(state);
                hash_floats(v, state);
            }
            Self::Text(s) => {
                4u8.hash(state);
                s.hash(state);
            }
        }
    }
}

fn hash_floats<H: Hasher>(values: &[f32], state: &mut H) {
    for v in values {
        v.to_bits().hash(state);
    }
}

/// GLSL float literal. Always carries a decimal point or exponent.
pub fn float_literal(x: f32) -> String {
    if x.is_finite() {
        // Debug formatting never drops the fractional part ("1.0", "1e-7")
        format!("{x:?}")
    } else {
        "0.0".to_string()
    }
}

fn join_floats(values: &[f32]) -> String {
    values
        .iter()
        .map(|v| float_literal(*v))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of(value: &PinValue) -> u64 {
        let mut hasher = DefaultHasher::new();
        value.hash_into(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn literals() {
        assert_eq!(PinValue::Float(1.0).glsl_literal(), "1.0");
        assert_eq!(PinValue::Float(0.25).glsl_literal(), "0.25");
        assert_eq!(
            PinValue::Vec3([0.5, 1.0, 0.0]).glsl_literal(),
            "vec3(0.5, 1.0, 0.0)"
        );
        assert_eq!(PinValue::Vec2([-2.0, 3.5]).glsl_literal(), "vec2(-2.0, 3.5)");
        assert_eq!(PinValue::Text("a.png".into()).glsl_literal(), "0.0");
        assert_eq!(float_literal(f32::NAN), "0.0");
    }

    #[test]
    fn pin_type_of_values() {
        assert_eq!(PinValue::Float(0.0).pin_type(), PinType::Float);
        assert_eq!(PinValue::Vec4([0.0; 4]).pin_type(), PinType::Vec4);
        assert_eq!(PinValue::Text(String::new()).pin_type(), PinType::Sampler);
        for ty in [PinType::Float, PinType::Vec2, PinType::Vec3, PinType::Vec4] {
            assert_eq!(ty.default_value().pin_type(), ty);
        }
    }

    #[test]
    fn hash_distinguishes_variants() {
        // Same bits, different shapes
        assert_ne!(
            hash_of(&PinValue::Vec2([1.0, 1.0])),
            hash_of(&PinValue::Vec3([1.0, 1.0, 0.0]))
        );
        assert_ne!(hash_of(&PinValue::Float(0.0)), hash_of(&PinValue::Float(-0.0)));
        assert_eq!(
            hash_of(&PinValue::Text("x".into())),
            hash_of(&PinValue::Text("x".into()))
        );
    }

    #[test]
    fn vector_views() {
        assert_eq!(PinValue::Float(0.3).as_vec3(), Some([0.3; 3]));
        assert_eq!(PinValue::Vec4([1.0, 2.0, 3.0, 4.0]).as_vec3(), Some([1.0, 2.0, 3.0]));
        assert_eq!(PinValue::Vec2([1.0, 2.0]).as_float(), Some(1.0));
        assert_eq!(PinValue::Text("t".into()).as_float(), None);
        assert_eq!(PinValue::Text("t".into()).as_text(), Some("t"));
    }
}
