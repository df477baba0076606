use glam::{UVec3, Vec3};

use crate::error::{SceneError, SceneResult};
use crate::math::AABB;

/// Number of entries in the colour map derived from a transfer function.
pub const COLOR_MAP_SIZE: usize = 256;

/// Single 8-bit scalar field.
#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
    pub dimensions: UVec3,
    pub spacing: Vec3,
    pub offset: Vec3,
    pub data: Vec<u8>,
}

impl Volume {
    pub fn new(dimensions: UVec3, spacing: Vec3, data: Vec<u8>) -> SceneResult<Self> {
        let expected = dimensions.x as usize * dimensions.y as usize * dimensions.z as usize;
        if data.len() != expected {
            return Err(SceneError::MalformedGeometry(format!(
                "volume {}x{}x{} needs {} voxels, got {}",
                dimensions.x,
                dimensions.y,
                dimensions.z,
                expected,
                data.len()
            )));
        }
        Ok(Self {
            dimensions,
            spacing,
            offset: Vec3::ZERO,
            data,
        })
    }

    pub fn with_offset(mut self, offset: Vec3) -> Self {
        self.offset = offset;
        self
    }

    pub fn voxel_count(&self) -> usize {
        self.data.len()
    }

    pub fn bounds(&self) -> AABB {
        AABB::new(
            self.offset,
            self.offset + self.dimensions.as_vec3() * self.spacing,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlPoint {
    /// Normalised scalar value in [0, 1].
    pub value: f32,
    pub color: [f32; 3],
    pub opacity: f32,
}

impl ControlPoint {
    pub fn new(value: f32, color: [f32; 3], opacity: f32) -> Self {
        Self {
            value,
            color,
            opacity,
        }
    }

    fn rgba(&self) -> [f32; 4] {
        [self.color[0], self.color[1], self.color[2], self.opacity]
    }
}

/// Scalar value → colour/opacity mapping defined by ordered control points.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransferFunction {
    points: Vec<ControlPoint>,
}

impl TransferFunction {
    pub fn new(mut points: Vec<ControlPoint>) -> Self {
        points.sort_by(|a, b| a.value.total_cmp(&b.value));
        Self { points }
    }

    pub fn points(&self) -> &[ControlPoint] {
        &self.points
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Piecewise-linear lookup, clamped to the first and last points. An
    /// empty function is a grey ramp.
    pub fn sample(&self, value: f32) -> [f32; 4] {
        let value = value.clamp(0.0, 1.0);
        let (first, last) = match (self.points.first(), self.points.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return [value; 4],
        };
        if value <= first.value {
            return first.rgba();
        }
        if value >= last.value {
            return last.rgba();
        }
        let upper = self.points.partition_point(|p| p.value <= value);
        let (a, b) = (&self.points[upper - 1], &self.points[upper]);
        let span = b.value - a.value;
        let t = if span > 0.0 { (value - a.value) / span } else { 0.0 };
        let (ca, cb) = (a.rgba(), b.rgba());
        std::array::from_fn(|i| ca[i] + (cb[i] - ca[i]) * t)
    }

    pub fn to_color_map(&self, size: usize) -> Vec<[f32; 4]> {
        let denominator = size.saturating_sub(1).max(1) as f32;
        (0..size)
            .map(|i| self.sample(i as f32 / denominator))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_size_is_validated() {
        assert!(Volume::new(UVec3::new(2, 2, 2), Vec3::ONE, vec![0; 8]).is_ok());
        assert!(Volume::new(UVec3::new(2, 2, 2), Vec3::ONE, vec![0; 7]).is_err());
    }

    #[test]
    fn test_volume_bounds() {
        let volume = Volume::new(UVec3::new(4, 2, 1), Vec3::splat(0.5), vec![0; 8])
            .unwrap()
            .with_offset(Vec3::ONE);
        let bounds = volume.bounds();
        assert_eq!(bounds.min, Vec3::ONE);
        assert_eq!(bounds.max, Vec3::new(3.0, 2.0, 1.5));
    }

    #[test]
    fn test_transfer_function_interpolates_between_sorted_points() {
        let tf = TransferFunction::new(vec![
            ControlPoint::new(1.0, [1.0, 1.0, 1.0], 1.0),
            ControlPoint::new(0.0, [0.0, 0.0, 0.0], 0.0),
        ]);
        assert_eq!(tf.points()[0].value, 0.0);
        let mid = tf.sample(0.5);
        for channel in mid {
            assert!((channel - 0.5).abs() < 1e-6);
        }
        assert_eq!(tf.sample(-3.0), [0.0; 4]);
        assert_eq!(tf.sample(3.0), [1.0; 4]);
    }

    #[test]
    fn test_color_map_endpoints() {
        let tf = TransferFunction::new(vec![
            ControlPoint::new(0.2, [1.0, 0.0, 0.0], 0.1),
            ControlPoint::new(0.8, [0.0, 0.0, 1.0], 0.9),
        ]);
        let map = tf.to_color_map(COLOR_MAP_SIZE);
        assert_eq!(map.len(), COLOR_MAP_SIZE);
        assert_eq!(map[0], [1.0, 0.0, 0.0, 0.1]);
        assert_eq!(map[COLOR_MAP_SIZE - 1], [0.0, 0.0, 1.0, 0.9]);
    }

    #[test]
    fn test_empty_transfer_function_is_grey_ramp() {
        let tf = TransferFunction::default();
        assert_eq!(tf.sample(0.25), [0.25; 4]);
    }
}
