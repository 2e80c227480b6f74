//! Geometry primitives shared by the spatial index, visibility and combat code.
//!
//! Conventions: `y` is up, the battlefield plane is `x`/`z`. Facing angles are
//! radians measured so that angle `0` looks down `+z` and `PI / 2` looks down
//! `+x` (see [`facing_direction`]).

use glam::{Mat4, Vec3, Vec4};
use serde::{Deserialize, Serialize};

/// A ray with a normalized direction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
}

impl Ray {
    /// Create a ray. `direction` is normalized; a zero direction yields `+z`.
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self {
            origin,
            direction: direction.try_normalize().unwrap_or(Vec3::Z),
        }
    }

    /// Ray from `from` pointing at `to`.
    pub fn between(from: Vec3, to: Vec3) -> Self {
        Self::new(from, to - from)
    }

    /// Point at parameter `t` along the ray.
    #[inline]
    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }

    /// Parameter of the closest point on the ray to `point` (may be negative).
    #[inline]
    pub fn project(&self, point: Vec3) -> f32 {
        (point - self.origin).dot(self.direction)
    }

    /// Distance from `point` to the infinite line through the ray.
    pub fn perpendicular_distance(&self, point: Vec3) -> f32 {
        let t = self.project(point);
        (point - self.at(t)).length()
    }
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self {
            min: min.min(max),
            max: min.max(max),
        }
    }

    /// Creates a box from a center and half-extents.
    pub fn from_center(center: Vec3, half_extents: Vec3) -> Self {
        Self::new(center - half_extents, center + half_extents)
    }

    /// Cube of half-extent `half` centred on the origin.
    pub fn cube(half: f32) -> Self {
        Self::from_center(Vec3::ZERO, Vec3::splat(half))
    }

    #[inline]
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    #[inline]
    pub fn half_extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    #[inline]
    pub fn contains(&self, p: Vec3) -> bool {
        p.cmpge(self.min).all() && p.cmple(self.max).all()
    }

    /// Clamp a point into the box.
    #[inline]
    pub fn clamp_point(&self, p: Vec3) -> Vec3 {
        p.clamp(self.min, self.max)
    }

    /// Squared distance from a point to the box (0 if inside).
    pub fn distance_sq_to_point(&self, p: Vec3) -> f32 {
        let closest = self.clamp_point(p);
        (p - closest).length_squared()
    }

    /// Sphere/box overlap test.
    #[inline]
    pub fn intersects_sphere(&self, center: Vec3, radius: f32) -> bool {
        self.distance_sq_to_point(center) <= radius * radius
    }

    /// Box grown by `margin` on every side.
    pub fn expanded(&self, margin: f32) -> Self {
        Self::new(self.min - Vec3::splat(margin), self.max + Vec3::splat(margin))
    }

    /// Bounds of child octant `index` (bit 0 = +x, bit 1 = +y, bit 2 = +z).
    pub fn octant(&self, index: usize) -> Self {
        let c = self.center();
        let pick = |bit: usize, lo: f32, mid: f32, hi: f32| {
            if index & bit != 0 {
                (mid, hi)
            } else {
                (lo, mid)
            }
        };
        let (x0, x1) = pick(1, self.min.x, c.x, self.max.x);
        let (y0, y1) = pick(2, self.min.y, c.y, self.max.y);
        let (z0, z1) = pick(4, self.min.z, c.z, self.max.z);
        Self::new(Vec3::new(x0, y0, z0), Vec3::new(x1, y1, z1))
    }

    /// Entry distance of a ray into the box within `[0, max_dist]`.
    /// Returns `Some(0.0)` when the origin is inside.
    pub fn ray_intersection(&self, ray: &Ray, max_dist: f32) -> Option<f32> {
        let origin = ray.origin.to_array();
        let dir = ray.direction.to_array();
        let min = self.min.to_array();
        let max = self.max.to_array();

        let mut t_enter = 0.0_f32;
        let mut t_exit = max_dist;

        for axis in 0..3 {
            if dir[axis].abs() < 1e-8 {
                if origin[axis] < min[axis] || origin[axis] > max[axis] {
                    return None;
                }
                continue;
            }
            let inv = 1.0 / dir[axis];
            let mut t0 = (min[axis] - origin[axis]) * inv;
            let mut t1 = (max[axis] - origin[axis]) * inv;
            if t0 > t1 {
                std::mem::swap(&mut t0, &mut t1);
            }
            t_enter = t_enter.max(t0);
            t_exit = t_exit.min(t1);
            if t_enter > t_exit {
                return None;
            }
        }
        Some(t_enter)
    }
}

/// View frustum as six inward-facing planes (`ax + by + cz + d >= 0` inside).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frustum {
    planes: [Vec4; 6],
}

impl Frustum {
    /// Extract planes from an OpenGL-convention view-projection matrix
    /// (clip-space depth in `[-1, 1]`).
    pub fn from_view_projection(m: Mat4) -> Self {
        let r0 = m.row(0);
        let r1 = m.row(1);
        let r2 = m.row(2);
        let r3 = m.row(3);
        let normalize = |p: Vec4| {
            let len = p.truncate().length();
            if len > 0.0 {
                p / len
            } else {
                p
            }
        };
        Self {
            planes: [
                normalize(r3 + r0),
                normalize(r3 - r0),
                normalize(r3 + r1),
                normalize(r3 - r1),
                normalize(r3 + r2),
                normalize(r3 - r2),
            ],
        }
    }

    /// Perspective frustum for a camera at `eye` looking at `target`.
    pub fn perspective(eye: Vec3, target: Vec3, fov_y: f32, aspect: f32, near: f32, far: f32) -> Self {
        let view = Mat4::look_at_rh(eye, target, Vec3::Y);
        let proj = Mat4::perspective_rh_gl(fov_y, aspect, near, far);
        Self::from_view_projection(proj * view)
    }

    #[inline]
    fn signed_distance(plane: Vec4, p: Vec3) -> f32 {
        plane.truncate().dot(p) + plane.w
    }

    pub fn contains_point(&self, p: Vec3) -> bool {
        self.planes.iter().all(|&plane| Self::signed_distance(plane, p) >= 0.0)
    }

    /// Conservative box test: false only when the box is fully outside a plane.
    pub fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        self.planes.iter().all(|&plane| {
            let n = plane.truncate();
            let positive = Vec3::new(
                if n.x >= 0.0 { aabb.max.x } else { aabb.min.x },
                if n.y >= 0.0 { aabb.max.y } else { aabb.min.y },
                if n.z >= 0.0 { aabb.max.z } else { aabb.min.z },
            );
            Self::signed_distance(plane, positive) >= 0.0
        })
    }
}

/// Nearest intersection distance of a ray with a sphere, within `max_dist`.
pub fn ray_sphere(ray: &Ray, center: Vec3, radius: f32, max_dist: f32) -> Option<f32> {
    let oc = ray.origin - center;
    let b = oc.dot(ray.direction);
    let c = oc.length_squared() - radius * radius;
    let disc = b * b - c;
    if disc < 0.0 {
        return None;
    }
    let sqrt_disc = disc.sqrt();
    let t = if -b - sqrt_disc >= 0.0 {
        -b - sqrt_disc
    } else {
        -b + sqrt_disc
    };
    (t >= 0.0 && t <= max_dist).then_some(t)
}

/// Unit direction on the ground plane for a facing angle.
#[inline]
pub fn facing_direction(angle: f32) -> Vec3 {
    Vec3::new(angle.sin(), 0.0, angle.cos())
}

/// Facing angle that looks from `from` toward `to` on the ground plane.
#[inline]
pub fn facing_toward(from: Vec3, to: Vec3) -> f32 {
    let d = to - from;
    d.x.atan2(d.z)
}

/// Wrap an angle into `(-PI, PI]`.
pub fn wrap_angle(angle: f32) -> f32 {
    use std::f32::consts::{PI, TAU};
    let mut a = angle % TAU;
    if a > PI {
        a -= TAU;
    } else if a <= -PI {
        a += TAU;
    }
    a
}

/// Projection of `v` onto the ground plane.
#[inline]
pub fn horizontal(v: Vec3) -> Vec3 {
    Vec3::new(v.x, 0.0, v.z)
}

/// Horizontal (x/z) squared distance.
#[inline]
pub fn horizontal_distance_sq(a: Vec3, b: Vec3) -> f32 {
    horizontal(a - b).length_squared()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    #[test]
    fn test_ray_aabb_hit_and_miss() {
        let aabb = Aabb::from_center(Vec3::new(0.0, 0.0, 10.0), Vec3::splat(1.0));
        let ray = Ray::new(Vec3::ZERO, Vec3::Z);
        let t = aabb.ray_intersection(&ray, 100.0).unwrap();
        assert!((t - 9.0).abs() < 1e-4);

        let away = Ray::new(Vec3::ZERO, -Vec3::Z);
        assert!(aabb.ray_intersection(&away, 100.0).is_none());

        // Too short to reach the box
        assert!(aabb.ray_intersection(&ray, 5.0).is_none());
    }

    #[test]
    fn test_ray_aabb_axis_parallel_outside_slab() {
        let aabb = Aabb::from_center(Vec3::new(0.0, 0.0, 10.0), Vec3::splat(1.0));
        let ray = Ray::new(Vec3::new(5.0, 0.0, 0.0), Vec3::Z);
        assert!(aabb.ray_intersection(&ray, 100.0).is_none());
    }

    #[test]
    fn test_ray_sphere() {
        let ray = Ray::new(Vec3::ZERO, Vec3::X);
        let t = ray_sphere(&ray, Vec3::new(10.0, 0.0, 0.0), 1.0, 100.0).unwrap();
        assert!((t - 9.0).abs() < 1e-4);
        assert!(ray_sphere(&ray, Vec3::new(10.0, 3.0, 0.0), 1.0, 100.0).is_none());
    }

    #[test]
    fn test_octants_cover_parent() {
        let parent = Aabb::cube(8.0);
        let total: f32 = (0..8)
            .map(|i| {
                let e = parent.octant(i).half_extents() * 2.0;
                e.x * e.y * e.z
            })
            .sum();
        assert!((total - 16.0_f32.powi(3)).abs() < 1e-2);
        assert!(parent.octant(7).contains(Vec3::splat(4.0)));
        assert!(parent.octant(0).contains(Vec3::splat(-4.0)));
    }

    #[test]
    fn test_frustum_contains_points_in_front() {
        let frustum = Frustum::perspective(
            Vec3::ZERO,
            Vec3::new(0.0, 0.0, -1.0),
            PI / 2.0,
            1.0,
            0.1,
            100.0,
        );
        assert!(frustum.contains_point(Vec3::new(0.0, 0.0, -10.0)));
        assert!(!frustum.contains_point(Vec3::new(0.0, 0.0, 10.0)));
        assert!(!frustum.contains_point(Vec3::new(0.0, 0.0, -200.0)));
        assert!(!frustum.contains_point(Vec3::new(50.0, 0.0, -10.0)));

        let behind = Aabb::from_center(Vec3::new(0.0, 0.0, 20.0), Vec3::splat(1.0));
        assert!(!frustum.intersects_aabb(&behind));
        let ahead = Aabb::from_center(Vec3::new(0.0, 0.0, -20.0), Vec3::splat(1.0));
        assert!(frustum.intersects_aabb(&ahead));
    }

    #[test]
    fn test_facing_roundtrip() {
        let from = Vec3::ZERO;
        let to = Vec3::new(3.0, 0.0, 4.0);
        let angle = facing_toward(from, to);
        let dir = facing_direction(angle);
        assert!((dir - to.normalize()).length() < 1e-5);
    }

    #[test]
    fn test_wrap_angle() {
        assert!((wrap_angle(2.5 * PI) - PI / 2.0).abs() < 1e-4);
        assert!((wrap_angle(-3.0 * PI / 2.0) - PI / 2.0).abs() < 1e-4);
        assert_eq!(wrap_angle(0.5), 0.5);
    }
}
