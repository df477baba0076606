use glam::Vec3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LightKind {
    Point { position: Vec3 },
    Directional { direction: Vec3 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Light {
    pub kind: LightKind,
    pub color: [f32; 3],
    pub intensity: f32,
    pub casts_shadow: bool,
}

impl Light {
    pub fn point(position: Vec3, color: [f32; 3], intensity: f32) -> Self {
        Self {
            kind: LightKind::Point { position },
            color,
            intensity,
            casts_shadow: true,
        }
    }

    pub fn directional(direction: Vec3, color: [f32; 3], intensity: f32) -> Self {
        Self {
            kind: LightKind::Directional {
                direction: direction.normalize_or_zero(),
            },
            color,
            intensity,
            casts_shadow: true,
        }
    }

    /// Colour scaled by intensity.
    pub fn radiance(&self) -> Vec3 {
        Vec3::from_array(self.color) * self.intensity
    }

    /// Unit vector from `point` towards the light and the distance to it.
    pub fn incidence(&self, point: Vec3) -> (Vec3, f32) {
        match self.kind {
            LightKind::Point { position } => {
                let to_light = position - point;
                let distance = to_light.length();
                (to_light / distance.max(f32::EPSILON), distance)
            }
            LightKind::Directional { direction } => (-direction, f32::INFINITY),
        }
    }
}
