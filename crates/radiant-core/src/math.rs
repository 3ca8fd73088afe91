//! Math utilities and helpers.

use glam::{Mat4, Vec3};

/// Ray for tracing and picking operations.
#[derive(Clone, Copy, Debug)]
pub struct Ray {
    /// Ray origin
    pub origin: Vec3,
    /// Ray direction (should be normalized)
    pub direction: Vec3,
}

impl Ray {
    /// Create a new ray
    #[inline]
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self {
            origin,
            direction: direction.normalize(),
        }
    }

    /// Get a point along the ray at distance t
    #[inline]
    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }

    /// Transform ray by a matrix
    #[inline]
    pub fn transform(&self, matrix: Mat4) -> Self {
        let origin = matrix.transform_point3(self.origin);
        let direction = matrix.transform_vector3(self.direction).normalize();
        Self { origin, direction }
    }
}

/// Axis-Aligned Bounding Box.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    /// Minimum corner
    pub min: Vec3,
    /// Maximum corner
    pub max: Vec3,
}

impl Default for Aabb {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl Aabb {
    /// Inverted box that any `grow` call replaces.
    pub const EMPTY: Self = Self {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    /// Create a new AABB from min and max corners
    #[inline]
    pub const fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Smallest box containing every point.
    pub fn from_points(points: &[Vec3]) -> Self {
        let mut aabb = Self::EMPTY;
        for &p in points {
            aabb.grow_point(p);
        }
        aabb
    }

    /// True once at least one point has been added.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.min.cmple(self.max).all()
    }

    /// Get the center of the AABB
    #[inline]
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Get the size of the AABB
    #[inline]
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// Surface area, the SAH cost weight. Zero for empty boxes.
    #[inline]
    pub fn surface_area(&self) -> f32 {
        if !self.is_valid() {
            return 0.0;
        }
        let d = self.size();
        2.0 * (d.x * d.y + d.y * d.z + d.z * d.x)
    }

    /// Index of the longest axis (0=x, 1=y, 2=z).
    #[inline]
    pub fn longest_axis(&self) -> usize {
        let d = self.size();
        if d.x >= d.y && d.x >= d.z {
            0
        } else if d.y >= d.z {
            1
        } else {
            2
        }
    }

    /// Check if a point is inside the AABB
    #[inline]
    pub fn contains_point(&self, point: Vec3) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }

    /// Check if `other` lies entirely inside this box.
    #[inline]
    pub fn contains(&self, other: &Aabb) -> bool {
        other.min.cmpge(self.min).all() && other.max.cmple(self.max).all()
    }

    /// Check if this AABB intersects another
    #[inline]
    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.cmple(other.max).all() && self.max.cmpge(other.min).all()
    }

    /// Slab test against a ray with a precomputed reciprocal direction.
    ///
    /// Returns the entry distance when the box is hit inside `[0, t_max]`.
    #[inline]
    pub fn intersect_ray_inv(&self, origin: Vec3, inv_dir: Vec3, t_max: f32) -> Option<f32> {
        let t1 = (self.min - origin) * inv_dir;
        let t2 = (self.max - origin) * inv_dir;

        let t_near = t1.min(t2).max_element().max(0.0);
        let t_far = t1.max(t2).min_element().min(t_max);

        (t_near <= t_far).then_some(t_near)
    }

    /// Ray-AABB intersection test, returns (t_near, t_far) or None if no intersection
    pub fn intersect_ray(&self, ray: &Ray) -> Option<(f32, f32)> {
        let inv_dir = Vec3::ONE / ray.direction;

        let t1 = (self.min - ray.origin) * inv_dir;
        let t2 = (self.max - ray.origin) * inv_dir;

        let t_near = t1.min(t2).max_element();
        let t_far = t1.max(t2).min_element();

        if t_near <= t_far && t_far >= 0.0 {
            Some((t_near.max(0.0), t_far))
        } else {
            None
        }
    }

    /// Expand AABB to include a point
    #[inline]
    pub fn grow_point(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    /// Expand AABB to include another box
    #[inline]
    pub fn grow(&mut self, other: &Aabb) {
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    /// Merge two AABBs
    #[inline]
    pub fn merge(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn ray_at() {
        let ray = Ray::new(Vec3::ZERO, Vec3::X);
        assert_eq!(ray.at(0.0), Vec3::ZERO);
        assert_eq!(ray.at(1.0), Vec3::X);
        assert_eq!(ray.at(5.0), Vec3::new(5.0, 0.0, 0.0));
    }

    #[test]
    fn aabb_contains_point() {
        let aabb = Aabb::new(Vec3::ZERO, Vec3::ONE);
        assert!(aabb.contains_point(Vec3::splat(0.5)));
        assert!(aabb.contains_point(Vec3::ZERO));
        assert!(aabb.contains_point(Vec3::ONE));
        assert!(!aabb.contains_point(Vec3::new(2.0, 0.5, 0.5)));
    }

    #[test]
    fn empty_box_grows_to_first_point() {
        let mut aabb = Aabb::EMPTY;
        assert!(!aabb.is_valid());
        assert_eq!(aabb.surface_area(), 0.0);

        aabb.grow_point(Vec3::new(1.0, 2.0, 3.0));
        assert!(aabb.is_valid());
        assert_eq!(aabb.min, aabb.max);
    }

    #[test]
    fn surface_area_of_unit_cube() {
        let aabb = Aabb::new(Vec3::ZERO, Vec3::ONE);
        assert_relative_eq!(aabb.surface_area(), 6.0);

        let slab = Aabb::new(Vec3::ZERO, Vec3::new(2.0, 1.0, 0.0));
        assert_relative_eq!(slab.surface_area(), 4.0);
        assert_eq!(slab.longest_axis(), 0);
    }

    #[test]
    fn containment() {
        let outer = Aabb::new(Vec3::splat(-1.0), Vec3::splat(1.0));
        let inner = Aabb::new(Vec3::splat(-0.5), Vec3::splat(0.5));
        assert!(outer.contains(&inner));
        assert!(!inner.contains(&outer));
        assert!(outer.contains(&outer));
    }

    #[test]
    fn aabb_ray_intersection() {
        let aabb = Aabb::new(Vec3::ZERO, Vec3::ONE);

        // Ray hitting the box
        let ray = Ray::new(Vec3::new(-1.0, 0.5, 0.5), Vec3::X);
        let (t_near, t_far) = aabb.intersect_ray(&ray).expect("ray should hit");
        assert_relative_eq!(t_near, 1.0, epsilon = 0.001);
        assert_relative_eq!(t_far, 2.0, epsilon = 0.001);

        // Ray missing the box
        let ray = Ray::new(Vec3::new(-1.0, 2.0, 0.5), Vec3::X);
        assert!(aabb.intersect_ray(&ray).is_none());

        // Same test through the reciprocal-direction path, clipped by t_max
        let inv = Vec3::ONE / Vec3::X;
        let origin = Vec3::new(-1.0, 0.5, 0.5);
        assert!(aabb.intersect_ray_inv(origin, inv, 10.0).is_some());
        assert!(aabb.intersect_ray_inv(origin, inv, 0.5).is_none());
    }
}
