pub mod bvh;
pub mod gpu_context;
pub mod primitive_intersection;
pub mod triangle_intersection;

pub use bvh::{BvhConfig, FlatBvh, SplitMethod};
pub use gpu_context::GpuContext;
