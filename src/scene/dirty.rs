use bitflags::bitflags;

bitflags! {
    /// Scene subsystems whose canonical data can change between commits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Subsystems: u8 {
        const GEOMETRY = 1 << 0;
        const SIMULATION = 1 << 1;
        const MATERIALS = 1 << 2;
        const TEXTURES = 1 << 3;
        const LIGHTS = 1 << 4;
        const VOLUME = 1 << 5;
        const TRANSFER_FUNCTION = 1 << 6;
    }
}

/// Order in which a commit services the subsystems. Textures are serviced
/// together with materials.
pub const COMMIT_ORDER: [Subsystems; 6] = [
    Subsystems::GEOMETRY,
    Subsystems::SIMULATION,
    Subsystems::MATERIALS,
    Subsystems::LIGHTS,
    Subsystems::VOLUME,
    Subsystems::TRANSFER_FUNCTION,
];

/// One independent flag per subsystem.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirtyState {
    flags: Subsystems,
}

impl DirtyState {
    /// Everything dirty, the state of a freshly created scene.
    pub fn all() -> Self {
        Self {
            flags: Subsystems::all(),
        }
    }

    pub fn mark(&mut self, subsystems: Subsystems) {
        self.flags |= subsystems;
    }

    pub fn clear(&mut self, subsystems: Subsystems) {
        self.flags &= !subsystems;
    }

    pub fn is_dirty(&self, subsystems: Subsystems) -> bool {
        self.flags.intersects(subsystems)
    }

    pub fn flags(&self) -> Subsystems {
        self.flags
    }
}
