//! Scene primitive types shared by the tracers.

use crate::math::{Aabb, Ray};
use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};

/// World-space triangle as submitted to the tracers.
///
/// Rebuilt wholesale whenever the scene changes.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Triangle {
    pub positions: [Vec3; 3],
    pub normals: [Vec3; 3],
    pub uvs: [Vec2; 3],
    pub material: u32,
}

impl Triangle {
    /// Flat-shaded triangle with a face normal and zero UVs.
    pub fn flat(a: Vec3, b: Vec3, c: Vec3, material: u32) -> Self {
        let n = (b - a).cross(c - a).normalize_or_zero();
        Self {
            positions: [a, b, c],
            normals: [n; 3],
            uvs: [Vec2::ZERO, Vec2::X, Vec2::Y],
            material,
        }
    }

    /// Bounding box of the three vertices.
    #[inline]
    pub fn aabb(&self) -> Aabb {
        Aabb::from_points(&self.positions)
    }

    /// Centroid of the triangle.
    #[inline]
    pub fn centroid(&self) -> Vec3 {
        (self.positions[0] + self.positions[1] + self.positions[2]) / 3.0
    }

    /// Unnormalized geometric normal (winding order a→b→c).
    #[inline]
    pub fn geometric_normal(&self) -> Vec3 {
        let [a, b, c] = self.positions;
        (b - a).cross(c - a)
    }

    /// Möller–Trumbore intersection. Returns `(t, u, v)` for hits in `(t_min, t_max)`.
    pub fn intersect(&self, ray: &Ray, t_min: f32, t_max: f32) -> Option<(f32, f32, f32)> {
        let [a, b, c] = self.positions;
        let e1 = b - a;
        let e2 = c - a;
        let p = ray.direction.cross(e2);
        let det = e1.dot(p);
        if det.abs() < 1.0e-9 {
            return None;
        }
        let inv_det = 1.0 / det;
        let s = ray.origin - a;
        let u = s.dot(p) * inv_det;
        if !(0.0..=1.0).contains(&u) {
            return None;
        }
        let q = s.cross(e1);
        let v = ray.direction.dot(q) * inv_det;
        if v < 0.0 || u + v > 1.0 {
            return None;
        }
        let t = e2.dot(q) * inv_det;
        (t > t_min && t < t_max).then_some((t, u, v))
    }

    /// Barycentric interpolation of the shading normal.
    pub fn shading_normal(&self, u: f32, v: f32) -> Vec3 {
        let w = 1.0 - u - v;
        let n = self.normals[0] * w + self.normals[1] * u + self.normals[2] * v;
        let n = n.normalize_or_zero();
        if n == Vec3::ZERO {
            self.geometric_normal().normalize_or_zero()
        } else {
            n
        }
    }

    /// Barycentric interpolation of the texture coordinate.
    pub fn uv(&self, u: f32, v: f32) -> Vec2 {
        let w = 1.0 - u - v;
        self.uvs[0] * w + self.uvs[1] * u + self.uvs[2] * v
    }
}

/// Constant-parameter material consumed by the tracers.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Material {
    /// Base color (linear RGB)
    pub base_color: Vec3,
    /// Metallic (0.0 = dielectric, 1.0 = metal)
    pub metallic: f32,
    /// Roughness (0.0 = mirror, 1.0 = diffuse)
    pub roughness: f32,
    /// Index of refraction
    pub ior: f32,
    /// Opacity (1.0 = opaque)
    pub opacity: f32,
    /// Emission color (linear RGB)
    pub emission_color: Vec3,
    /// Emission multiplier
    pub emission_strength: f32,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            base_color: Vec3::splat(0.8),
            metallic: 0.0,
            roughness: 0.5,
            ior: 1.45,
            opacity: 1.0,
            emission_color: Vec3::ZERO,
            emission_strength: 0.0,
        }
    }
}

impl Material {
    /// Pure emitter with a black base color.
    pub fn emissive(radiance: Vec3) -> Self {
        Self {
            base_color: Vec3::ZERO,
            emission_color: radiance,
            emission_strength: 1.0,
            ..Self::default()
        }
    }

    /// Lambertian surface.
    pub fn diffuse(color: Vec3) -> Self {
        Self {
            base_color: color,
            roughness: 1.0,
            ..Self::default()
        }
    }

    /// Emitted radiance (color times strength).
    #[inline]
    pub fn emission(&self) -> Vec3 {
        self.emission_color * self.emission_strength
    }
}

/// Kind of analytic light.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum LightKind {
    /// Omnidirectional light at a position
    Point { position: Vec3 },
    /// Infinitely distant light travelling along `direction`
    Directional { direction: Vec3 },
}

/// Analytic light source used for next-event estimation.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Light {
    pub kind: LightKind,
    pub color: Vec3,
    pub intensity: f32,
}

impl Light {
    pub fn point(position: Vec3, color: Vec3, intensity: f32) -> Self {
        Self {
            kind: LightKind::Point { position },
            color,
            intensity,
        }
    }

    pub fn directional(direction: Vec3, color: Vec3, intensity: f32) -> Self {
        Self {
            kind: LightKind::Directional {
                direction: direction.normalize_or_zero(),
            },
            color,
            intensity,
        }
    }
}

/// Equirectangular HDR environment texture.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentMap {
    pub width: u32,
    pub height: u32,
    /// Linear RGBA texels, row-major
    pub texels: Vec<[f32; 4]>,
}

impl EnvironmentMap {
    /// Nearest-texel lookup along a world direction.
    pub fn sample(&self, direction: Vec3) -> Vec3 {
        if self.width == 0 || self.height == 0 || self.texels.is_empty() {
            return Vec3::ZERO;
        }
        let d = direction.normalize_or_zero();
        let u = 0.5 + d.z.atan2(d.x) / std::f32::consts::TAU;
        let v = d.y.clamp(-1.0, 1.0).acos() / std::f32::consts::PI;
        let x = ((u * self.width as f32) as u32).min(self.width - 1);
        let y = ((v * self.height as f32) as u32).min(self.height - 1);
        let texel = self.texels[(y * self.width + x) as usize];
        Vec3::new(texel[0], texel[1], texel[2])
    }
}

/// Radiance arriving from directions that escape the scene.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Environment {
    pub color: Vec3,
    pub intensity: f32,
    pub map: Option<EnvironmentMap>,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            color: Vec3::ZERO,
            intensity: 1.0,
            map: None,
        }
    }
}

impl Environment {
    /// Uniform background radiance.
    pub fn constant(color: Vec3) -> Self {
        Self {
            color,
            ..Self::default()
        }
    }

    /// Radiance seen along `direction`.
    pub fn radiance(&self, direction: Vec3) -> Vec3 {
        let base = self
            .map
            .as_ref()
            .map_or(self.color, |map| map.sample(direction) * self.color);
        base * self.intensity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn unit_triangle() -> Triangle {
        Triangle::flat(
            Vec3::new(-1.0, -1.0, 0.0),
            Vec3::new(1.0, -1.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
            0,
        )
    }

    #[test]
    fn triangle_bounds_and_centroid() {
        let tri = unit_triangle();
        let aabb = tri.aabb();
        assert_eq!(aabb.min, Vec3::new(-1.0, -1.0, 0.0));
        assert_eq!(aabb.max, Vec3::new(1.0, 1.0, 0.0));
        assert_relative_eq!(tri.centroid().y, -1.0 / 3.0);
    }

    #[test]
    fn triangle_intersection() {
        let tri = unit_triangle();
        let hit = Ray::new(Vec3::new(0.0, 0.0, 2.0), -Vec3::Z);
        let (t, _, _) = tri.intersect(&hit, 0.0, f32::MAX).expect("ray should hit");
        assert_relative_eq!(t, 2.0);

        let miss = Ray::new(Vec3::new(3.0, 0.0, 2.0), -Vec3::Z);
        assert!(tri.intersect(&miss, 0.0, f32::MAX).is_none());

        // Hit exists but lies beyond t_max
        assert!(tri.intersect(&hit, 0.0, 1.0).is_none());
    }

    #[test]
    fn flat_normal_faces_winding() {
        let tri = unit_triangle();
        assert_relative_eq!(tri.shading_normal(0.2, 0.2).z, 1.0);
    }

    #[test]
    fn emissive_material_radiance() {
        let m = Material::emissive(Vec3::splat(0.5));
        assert_eq!(m.emission(), Vec3::splat(0.5));
        assert_eq!(m.base_color, Vec3::ZERO);
    }

    #[test]
    fn environment_constant() {
        let env = Environment::constant(Vec3::new(0.1, 0.2, 0.3));
        assert_eq!(env.radiance(Vec3::Y), Vec3::new(0.1, 0.2, 0.3));
    }
}
