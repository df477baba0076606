use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::math::AABB;
use crate::scene::MaterialId;

/// Simulation frame index. Records with a timestamp lower or equal to the
/// current one are visible.
pub type Timestamp = u64;

/// Parametric primitive families with their own serialized buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimitiveKind {
    Sphere,
    Cylinder,
    Cone,
}

impl PrimitiveKind {
    pub const ALL: [PrimitiveKind; 3] = [
        PrimitiveKind::Sphere,
        PrimitiveKind::Cylinder,
        PrimitiveKind::Cone,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            PrimitiveKind::Sphere => "sphere",
            PrimitiveKind::Cylinder => "cylinder",
            PrimitiveKind::Cone => "cone",
        }
    }

    /// Position of the kind in [`PrimitiveKind::ALL`].
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Size in bytes of one serialized record of this kind.
    pub fn record_size(&self) -> usize {
        match self {
            PrimitiveKind::Sphere => std::mem::size_of::<SphereRecord>(),
            PrimitiveKind::Cylinder => std::mem::size_of::<CylinderRecord>(),
            PrimitiveKind::Cone => std::mem::size_of::<ConeRecord>(),
        }
    }
}

impl fmt::Display for PrimitiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PrimitiveKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sphere" | "spheres" => Ok(PrimitiveKind::Sphere),
            "cylinder" | "cylinders" => Ok(PrimitiveKind::Cylinder),
            "cone" | "cones" => Ok(PrimitiveKind::Cone),
            other => Err(format!("unknown primitive kind '{}'", other)),
        }
    }
}

/// Serialized sphere, laid out for direct device upload.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SphereRecord {
    pub center: [f32; 3],
    pub radius: f32,
    pub timestamp: f32,
    pub _pad: [f32; 3],
}

/// Serialized cylinder running from `center` to `up`.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CylinderRecord {
    pub center: [f32; 3],
    pub radius: f32,
    pub up: [f32; 3],
    pub timestamp: f32,
}

/// Serialized truncated cone with one radius per end.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ConeRecord {
    pub center: [f32; 3],
    pub center_radius: f32,
    pub up: [f32; 3],
    pub up_radius: f32,
    pub timestamp: f32,
    pub _pad: [f32; 3],
}

/// Common behaviour of the serialized record types.
pub trait PrimitiveRecord: bytemuck::Pod + Send + Sync + fmt::Debug {
    const KIND: PrimitiveKind;

    fn bounds(&self) -> AABB;
}

impl PrimitiveRecord for SphereRecord {
    const KIND: PrimitiveKind = PrimitiveKind::Sphere;

    fn bounds(&self) -> AABB {
        AABB::from_center_radius(Vec3::from_array(self.center), self.radius)
    }
}

impl PrimitiveRecord for CylinderRecord {
    const KIND: PrimitiveKind = PrimitiveKind::Cylinder;

    fn bounds(&self) -> AABB {
        AABB::from_center_radius(Vec3::from_array(self.center), self.radius)
            .union(&AABB::from_center_radius(Vec3::from_array(self.up), self.radius))
    }
}

impl PrimitiveRecord for ConeRecord {
    const KIND: PrimitiveKind = PrimitiveKind::Cone;

    fn bounds(&self) -> AABB {
        AABB::from_center_radius(Vec3::from_array(self.center), self.center_radius).union(
            &AABB::from_center_radius(Vec3::from_array(self.up), self.up_radius),
        )
    }
}

/// A primitive as handed over by a loader.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Primitive {
    Sphere {
        center: Vec3,
        radius: f32,
    },
    Cylinder {
        center: Vec3,
        up: Vec3,
        radius: f32,
    },
    Cone {
        center: Vec3,
        up: Vec3,
        center_radius: f32,
        up_radius: f32,
    },
}

impl Primitive {
    pub fn kind(&self) -> PrimitiveKind {
        match self {
            Primitive::Sphere { .. } => PrimitiveKind::Sphere,
            Primitive::Cylinder { .. } => PrimitiveKind::Cylinder,
            Primitive::Cone { .. } => PrimitiveKind::Cone,
        }
    }
}

/// Stable address of an appended record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PrimitiveIndex {
    pub kind: PrimitiveKind,
    pub material: MaterialId,
    pub index: usize,
}

/// Growable record array for one (kind, material) pair plus an index table
/// from timestamp to the number of records appended at that timestamp.
///
/// The exact timestamp of every record is kept next to the record; the f32
/// copy inside the record is only what devices see.
#[derive(Debug, Clone)]
pub struct PrimitiveBuffer<R> {
    records: Vec<R>,
    timestamps: Vec<Timestamp>,
    timestamp_counts: BTreeMap<Timestamp, usize>,
    bounds: AABB,
}

impl<R> Default for PrimitiveBuffer<R> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            timestamps: Vec::new(),
            timestamp_counts: BTreeMap::new(),
            bounds: AABB::EMPTY,
        }
    }
}

impl<R: PrimitiveRecord> PrimitiveBuffer<R> {
    /// Rebuilds a buffer from records and their exact timestamps. Returns
    /// `None` when the two arrays disagree in length.
    pub(crate) fn from_parts(records: Vec<R>, timestamps: Vec<Timestamp>) -> Option<Self> {
        if records.len() != timestamps.len() {
            return None;
        }
        let mut buffer = Self::default();
        for (record, timestamp) in records.into_iter().zip(timestamps) {
            buffer.push(record, timestamp);
        }
        Some(buffer)
    }

    fn push(&mut self, record: R, timestamp: Timestamp) -> usize {
        let index = self.records.len();
        self.bounds.grow(&record.bounds());
        self.records.push(record);
        self.timestamps.push(timestamp);
        *self.timestamp_counts.entry(timestamp).or_insert(0) += 1;
        index
    }

    pub fn records(&self) -> &[R] {
        &self.records
    }

    /// Exact timestamp of every record, in append order.
    pub fn timestamps(&self) -> &[Timestamp] {
        &self.timestamps
    }

    /// Records stably ordered by timestamp, so the ones visible at any
    /// timestamp form a prefix of length [`Self::size_for_timestamp`].
    pub fn records_by_timestamp(&self) -> Vec<R> {
        let mut order: Vec<usize> = (0..self.records.len()).collect();
        order.sort_by_key(|&i| self.timestamps[i]);
        order.into_iter().map(|i| self.records[i]).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn bounds(&self) -> AABB {
        self.bounds
    }

    /// Number of records whose timestamp is lower or equal to `timestamp`.
    pub fn size_for_timestamp(&self, timestamp: Timestamp) -> usize {
        self.timestamp_counts
            .range(..=timestamp)
            .map(|(_, count)| count)
            .sum()
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.records)
    }
}

/// Per-kind, per-material serialized primitive buffers.
#[derive(Debug, Clone, Default)]
pub struct PrimitiveStore {
    spheres: BTreeMap<MaterialId, PrimitiveBuffer<SphereRecord>>,
    cylinders: BTreeMap<MaterialId, PrimitiveBuffer<CylinderRecord>>,
    cones: BTreeMap<MaterialId, PrimitiveBuffer<ConeRecord>>,
}

impl PrimitiveStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a primitive and returns its stable index. Existing indices are
    /// never moved.
    pub fn add(
        &mut self,
        material: MaterialId,
        timestamp: Timestamp,
        primitive: Primitive,
    ) -> PrimitiveIndex {
        let ts = timestamp as f32;
        let index = match primitive {
            Primitive::Sphere { center, radius } => self.spheres.entry(material).or_default().push(
                SphereRecord {
                    center: center.to_array(),
                    radius,
                    timestamp: ts,
                    _pad: [0.0; 3],
                },
                timestamp,
            ),
            Primitive::Cylinder { center, up, radius } => {
                self.cylinders.entry(material).or_default().push(
                    CylinderRecord {
                        center: center.to_array(),
                        radius,
                        up: up.to_array(),
                        timestamp: ts,
                    },
                    timestamp,
                )
            }
            Primitive::Cone {
                center,
                up,
                center_radius,
                up_radius,
            } => self.cones.entry(material).or_default().push(
                ConeRecord {
                    center: center.to_array(),
                    center_radius,
                    up: up.to_array(),
                    up_radius,
                    timestamp: ts,
                    _pad: [0.0; 3],
                },
                timestamp,
            ),
        };
        PrimitiveIndex {
            kind: primitive.kind(),
            material,
            index,
        }
    }

    pub fn spheres(&self) -> &BTreeMap<MaterialId, PrimitiveBuffer<SphereRecord>> {
        &self.spheres
    }

    pub fn cylinders(&self) -> &BTreeMap<MaterialId, PrimitiveBuffer<CylinderRecord>> {
        &self.cylinders
    }

    pub fn cones(&self) -> &BTreeMap<MaterialId, PrimitiveBuffer<ConeRecord>> {
        &self.cones
    }

    pub(crate) fn insert_spheres(&mut self, material: MaterialId, buffer: PrimitiveBuffer<SphereRecord>) {
        self.spheres.insert(material, buffer);
    }

    pub(crate) fn insert_cylinders(&mut self, material: MaterialId, buffer: PrimitiveBuffer<CylinderRecord>) {
        self.cylinders.insert(material, buffer);
    }

    pub(crate) fn insert_cones(&mut self, material: MaterialId, buffer: PrimitiveBuffer<ConeRecord>) {
        self.cones.insert(material, buffer);
    }

    /// Total record count for `kind` across all materials.
    pub fn count(&self, kind: PrimitiveKind) -> usize {
        match kind {
            PrimitiveKind::Sphere => self.spheres.values().map(PrimitiveBuffer::len).sum(),
            PrimitiveKind::Cylinder => self.cylinders.values().map(PrimitiveBuffer::len).sum(),
            PrimitiveKind::Cone => self.cones.values().map(PrimitiveBuffer::len).sum(),
        }
    }

    /// Cumulative record count for `kind` up to and including `timestamp`.
    pub fn serialized_size_for_timestamp(&self, kind: PrimitiveKind, timestamp: Timestamp) -> usize {
        match kind {
            PrimitiveKind::Sphere => self
                .spheres
                .values()
                .map(|b| b.size_for_timestamp(timestamp))
                .sum(),
            PrimitiveKind::Cylinder => self
                .cylinders
                .values()
                .map(|b| b.size_for_timestamp(timestamp))
                .sum(),
            PrimitiveKind::Cone => self
                .cones
                .values()
                .map(|b| b.size_for_timestamp(timestamp))
                .sum(),
        }
    }

    /// Visible record count of one (kind, material) buffer.
    pub fn size_for_timestamp(
        &self,
        kind: PrimitiveKind,
        material: MaterialId,
        timestamp: Timestamp,
    ) -> usize {
        match kind {
            PrimitiveKind::Sphere => self.spheres.get(&material).map(|b| b.size_for_timestamp(timestamp)),
            PrimitiveKind::Cylinder => self.cylinders.get(&material).map(|b| b.size_for_timestamp(timestamp)),
            PrimitiveKind::Cone => self.cones.get(&material).map(|b| b.size_for_timestamp(timestamp)),
        }
        .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        PrimitiveKind::ALL.iter().all(|&kind| self.count(kind) == 0)
    }

    pub fn bounds(&self) -> AABB {
        let spheres = self.spheres.values().map(PrimitiveBuffer::bounds);
        let cylinders = self.cylinders.values().map(PrimitiveBuffer::bounds);
        let cones = self.cones.values().map(PrimitiveBuffer::bounds);
        spheres
            .chain(cylinders)
            .chain(cones)
            .fold(AABB::EMPTY, |acc, b| acc.union(&b))
    }

    pub fn clear(&mut self) {
        self.spheres.clear();
        self.cylinders.clear();
        self.cones.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sphere(x: f32) -> Primitive {
        Primitive::Sphere {
            center: Vec3::new(x, 0.0, 0.0),
            radius: 1.0,
        }
    }

    #[test]
    fn test_record_sizes_are_16_byte_aligned() {
        for kind in PrimitiveKind::ALL {
            assert_eq!(kind.record_size() % 16, 0, "{} record", kind);
        }
    }

    #[test]
    fn test_indices_are_dense_per_material() {
        let mut store = PrimitiveStore::new();
        assert_eq!(store.add(0, 0, sphere(0.0)).index, 0);
        assert_eq!(store.add(0, 0, sphere(1.0)).index, 1);
        assert_eq!(store.add(3, 0, sphere(2.0)).index, 0);
        assert_eq!(store.count(PrimitiveKind::Sphere), 3);
        assert_eq!(store.spheres()[&0].len(), 2);
    }

    #[test]
    fn test_serialized_size_for_timestamp_is_cumulative() {
        let mut store = PrimitiveStore::new();
        for ts in 0..5u64 {
            for _ in 0..2 {
                store.add(1, ts, sphere(ts as f32));
            }
        }
        assert_eq!(store.serialized_size_for_timestamp(PrimitiveKind::Sphere, 0), 2);
        assert_eq!(store.serialized_size_for_timestamp(PrimitiveKind::Sphere, 2), 6);
        assert_eq!(store.serialized_size_for_timestamp(PrimitiveKind::Sphere, 100), 10);
        assert_eq!(store.serialized_size_for_timestamp(PrimitiveKind::Cone, 100), 0);
        assert_eq!(store.size_for_timestamp(PrimitiveKind::Sphere, 7, 4), 0);
    }

    #[test]
    fn test_cone_bounds_cover_both_ends() {
        let mut store = PrimitiveStore::new();
        store.add(
            0,
            0,
            Primitive::Cone {
                center: Vec3::ZERO,
                up: Vec3::new(0.0, 10.0, 0.0),
                center_radius: 2.0,
                up_radius: 0.5,
            },
        );
        let bounds = store.bounds();
        assert_eq!(bounds.min, Vec3::new(-2.0, -2.0, -2.0));
        assert_eq!(bounds.max, Vec3::new(2.0, 10.5, 2.0));
    }

    #[test]
    fn test_out_of_order_appends_sort_into_visible_prefix() {
        let mut store = PrimitiveStore::new();
        store.add(0, 5, sphere(5.0));
        store.add(0, 0, sphere(0.0));
        store.add(0, 2, sphere(2.0));

        let buffer = &store.spheres()[&0];
        assert_eq!(buffer.timestamps(), &[5, 0, 2]);
        let ordered: Vec<f32> = buffer.records_by_timestamp().iter().map(|r| r.center[0]).collect();
        assert_eq!(ordered, vec![0.0, 2.0, 5.0]);
        assert_eq!(buffer.size_for_timestamp(0), 1);
        assert_eq!(buffer.size_for_timestamp(4), 2);
    }

    #[test]
    fn test_kind_from_str() {
        assert_eq!("Spheres".parse::<PrimitiveKind>(), Ok(PrimitiveKind::Sphere));
        assert!("torus".parse::<PrimitiveKind>().is_err());
    }
}
