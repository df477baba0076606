use glam::Vec3;

/// Result of triangle intersection test
#[derive(Debug, Clone, Copy)]
pub struct TriangleIntersection {
    pub t: f32,           // Distance along ray
    pub u: f32,           // Barycentric coordinate u
    pub v: f32,           // Barycentric coordinate v
    pub normal: Vec3,     // Geometric normal (counter-clockwise winding)
}

impl TriangleIntersection {
    /// Get barycentric coordinates (u, v, w) where w = 1 - u - v
    pub fn barycentric(&self) -> (f32, f32, f32) {
        (self.u, self.v, 1.0 - self.u - self.v)
    }

    /// Interpolate a per-vertex attribute
    pub fn interpolate(&self, a0: Vec3, a1: Vec3, a2: Vec3) -> Vec3 {
        let (u, v, w) = self.barycentric();
        a0 * w + a1 * u + a2 * v
    }

    /// Interpolate UV coordinates using barycentric coordinates
    pub fn interpolate_uv(&self, uv0: [f32; 2], uv1: [f32; 2], uv2: [f32; 2]) -> [f32; 2] {
        let (u, v, w) = self.barycentric();
        [
            w * uv0[0] + u * uv1[0] + v * uv2[0],
            w * uv0[1] + u * uv1[1] + v * uv2[1],
        ]
    }
}

/// Möller-Trumbore ray-triangle intersection
pub fn moller_trumbore_intersect(
    ray_origin: Vec3,
    ray_dir: Vec3,
    v0: Vec3,
    v1: Vec3,
    v2: Vec3,
) -> Option<TriangleIntersection> {
    const EPSILON: f32 = 1e-7;

    let edge1 = v1 - v0;
    let edge2 = v2 - v0;

    let h = ray_dir.cross(edge2);
    let a = edge1.dot(h);

    // Parallel to the triangle plane
    if a.abs() < EPSILON {
        return None;
    }

    let f = 1.0 / a;
    let s = ray_origin - v0;
    let u = f * s.dot(h);
    if !(0.0..=1.0).contains(&u) {
        return None;
    }

    let q = s.cross(edge1);
    let v = f * ray_dir.dot(q);
    if v < 0.0 || u + v > 1.0 {
        return None;
    }

    let t = f * edge2.dot(q);
    if t < 1e-4 {
        return None;
    }

    let normal = edge1.cross(edge2).normalize_or_zero();

    Some(TriangleIntersection { t, u, v, normal })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_moller_trumbore_hit() {
        let v0 = Vec3::new(-1.0, -1.0, 0.0);
        let v1 = Vec3::new(1.0, -1.0, 0.0);
        let v2 = Vec3::new(0.0, 1.0, 0.0);

        let hit = moller_trumbore_intersect(Vec3::new(0.0, 0.0, -5.0), Vec3::Z, v0, v1, v2)
            .expect("ray through the centre must hit");
        assert!((hit.t - 5.0).abs() < 1e-5);
        let (u, v, w) = hit.barycentric();
        assert!((u + v + w - 1.0).abs() < 1e-6);
        assert!((hit.normal - Vec3::Z).length() < 1e-6);
    }

    #[test]
    fn test_moller_trumbore_miss_and_parallel() {
        let v0 = Vec3::new(-1.0, -1.0, 0.0);
        let v1 = Vec3::new(1.0, -1.0, 0.0);
        let v2 = Vec3::new(0.0, 1.0, 0.0);

        assert!(moller_trumbore_intersect(Vec3::new(5.0, 5.0, -5.0), Vec3::Z, v0, v1, v2).is_none());
        assert!(moller_trumbore_intersect(Vec3::new(0.0, 0.0, -5.0), Vec3::X, v0, v1, v2).is_none());
        // Behind the origin
        assert!(moller_trumbore_intersect(Vec3::new(0.0, 0.0, 5.0), Vec3::Z, v0, v1, v2).is_none());
    }

    #[test]
    fn test_uv_interpolation_at_vertex() {
        let hit = TriangleIntersection {
            t: 1.0,
            u: 1.0,
            v: 0.0,
            normal: Vec3::Z,
        };
        assert_eq!(hit.interpolate_uv([0.0, 0.0], [1.0, 0.5], [0.0, 1.0]), [1.0, 0.5]);
    }
}
