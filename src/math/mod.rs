mod aabb;
mod color;
mod ray;

pub use aabb::AABB;
pub use color::{hsv_to_rgb, palette_color};
pub use ray::{intersect_aabb, Ray};
