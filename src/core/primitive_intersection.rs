//! Ray intersection for the parametric primitive records.

use std::f32::consts::PI;

use glam::Vec3;

use crate::math::Ray;
use crate::scene::{ConeRecord, CylinderRecord, SphereRecord};

/// Closest-hit data for a parametric primitive
#[derive(Debug, Clone, Copy)]
pub struct SurfaceHit {
    pub t: f32,
    pub normal: Vec3,
    pub uv: [f32; 2],
}

pub trait RayIntersect {
    /// Nearest hit with `t` in `(t_min, t_max)`
    fn intersect(&self, ray: &Ray, t_min: f32, t_max: f32) -> Option<SurfaceHit>;
}

impl RayIntersect for SphereRecord {
    fn intersect(&self, ray: &Ray, t_min: f32, t_max: f32) -> Option<SurfaceHit> {
        let center = Vec3::from_array(self.center);
        let oc = ray.origin - center;
        let a = ray.direction.dot(ray.direction);
        let half_b = oc.dot(ray.direction);
        let c = oc.dot(oc) - self.radius * self.radius;

        let discriminant = half_b * half_b - a * c;
        if discriminant < 0.0 {
            return None;
        }

        let sqrt_d = discriminant.sqrt();
        let t = [(-half_b - sqrt_d) / a, (-half_b + sqrt_d) / a]
            .into_iter()
            .find(|&t| t > t_min && t < t_max)?;

        let normal = (ray.at(t) - center).normalize_or_zero();
        let u = 0.5 + normal.z.atan2(normal.x) / (2.0 * PI);
        let v = 0.5 - normal.y.clamp(-1.0, 1.0).asin() / PI;
        Some(SurfaceHit { t, normal, uv: [u, v] })
    }
}

impl RayIntersect for CylinderRecord {
    fn intersect(&self, ray: &Ray, t_min: f32, t_max: f32) -> Option<SurfaceHit> {
        intersect_cone(
            ray,
            Vec3::from_array(self.center),
            self.radius,
            Vec3::from_array(self.up),
            self.radius,
            t_min,
            t_max,
        )
    }
}

impl RayIntersect for ConeRecord {
    fn intersect(&self, ray: &Ray, t_min: f32, t_max: f32) -> Option<SurfaceHit> {
        intersect_cone(
            ray,
            Vec3::from_array(self.center),
            self.center_radius,
            Vec3::from_array(self.up),
            self.up_radius,
            t_min,
            t_max,
        )
    }
}

/// Open truncated cone from `p0` (radius `r0`) to `p1` (radius `r1`).
/// A cylinder is the `r0 == r1` case.
fn intersect_cone(ray: &Ray, p0: Vec3, r0: f32, p1: Vec3, r1: f32, t_min: f32, t_max: f32) -> Option<SurfaceHit> {
    let axis = p1 - p0;
    let height = axis.length();
    if height < 1e-6 {
        return None;
    }
    let k = axis / height;
    let slope = (r1 - r0) / height;

    let w = ray.origin - p0;
    let (wk, dk) = (w.dot(k), ray.direction.dot(k));
    let wp = w - k * wk;
    let dp = ray.direction - k * dk;
    let base = r0 + slope * wk;

    let a = dp.dot(dp) - slope * slope * dk * dk;
    let b = 2.0 * (wp.dot(dp) - slope * base * dk);
    let c = wp.dot(wp) - base * base;
    if a.abs() < 1e-9 {
        return None;
    }

    let discriminant = b * b - 4.0 * a * c;
    if discriminant < 0.0 {
        return None;
    }
    let sqrt_d = discriminant.sqrt();
    let (t0, t1) = ((-b - sqrt_d) / (2.0 * a), (-b + sqrt_d) / (2.0 * a));

    for t in [t0.min(t1), t0.max(t1)] {
        if t <= t_min || t >= t_max {
            continue;
        }
        let s = wk + t * dk;
        if !(0.0..=height).contains(&s) || base + slope * t * dk < 0.0 {
            continue;
        }
        let radial = (w + ray.direction * t - k * s).normalize_or_zero();
        let normal = (radial - k * slope).normalize_or_zero();
        let (x, y) = any_orthonormal(k);
        let u = 0.5 + radial.dot(y).atan2(radial.dot(x)) / (2.0 * PI);
        return Some(SurfaceHit {
            t,
            normal,
            uv: [u, s / height],
        });
    }
    None
}

fn any_orthonormal(k: Vec3) -> (Vec3, Vec3) {
    let helper = if k.x.abs() < 0.9 { Vec3::X } else { Vec3::Y };
    let x = k.cross(helper).normalize();
    (x, k.cross(x))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sphere(center: [f32; 3], radius: f32) -> SphereRecord {
        SphereRecord {
            center,
            radius,
            timestamp: 0.0,
            _pad: [0.0; 3],
        }
    }

    #[test]
    fn test_sphere_hit_and_normal() {
        let ray = Ray::new(Vec3::new(0.0, 0.0, -5.0), Vec3::Z);
        let hit = sphere([0.0; 3], 1.0).intersect(&ray, 1e-4, f32::INFINITY).unwrap();
        assert!((hit.t - 4.0).abs() < 1e-5);
        assert!((hit.normal + Vec3::Z).length() < 1e-5);
    }

    #[test]
    fn test_sphere_respects_t_max() {
        let ray = Ray::new(Vec3::new(0.0, 0.0, -5.0), Vec3::Z);
        assert!(sphere([0.0; 3], 1.0).intersect(&ray, 1e-4, 3.0).is_none());
    }

    #[test]
    fn test_cylinder_side_hit() {
        let cylinder = CylinderRecord {
            center: [0.0, 0.0, 0.0],
            radius: 1.0,
            up: [0.0, 4.0, 0.0],
            timestamp: 0.0,
        };
        let ray = Ray::new(Vec3::new(-5.0, 2.0, 0.0), Vec3::X);
        let hit = cylinder.intersect(&ray, 1e-4, f32::INFINITY).unwrap();
        assert!((hit.t - 4.0).abs() < 1e-4);
        assert!((hit.normal + Vec3::X).length() < 1e-4);
        assert!((hit.uv[1] - 0.5).abs() < 1e-4);

        // Beyond the top end
        let above = Ray::new(Vec3::new(-5.0, 5.0, 0.0), Vec3::X);
        assert!(cylinder.intersect(&above, 1e-4, f32::INFINITY).is_none());
    }

    #[test]
    fn test_cone_radius_shrinks_along_axis() {
        let cone = ConeRecord {
            center: [0.0, 0.0, 0.0],
            center_radius: 2.0,
            up: [0.0, 4.0, 0.0],
            up_radius: 0.0,
            timestamp: 0.0,
            _pad: [0.0; 3],
        };
        // Radius is 1 at half height
        let ray = Ray::new(Vec3::new(-5.0, 2.0, 0.0), Vec3::X);
        let hit = cone.intersect(&ray, 1e-4, f32::INFINITY).unwrap();
        assert!((hit.t - 4.0).abs() < 1e-4);
        assert!(hit.normal.y > 0.0);
        assert!(hit.normal.x < 0.0);
    }
}
