//! Small geometry kernel shared by the data set, the locators and the
//! extraction algorithms.

mod core;
mod plane;

pub use core::{BBox, Point3, Transform, Vec3};
pub use plane::Plane;
