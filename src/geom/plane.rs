use serde::{Deserialize, Serialize};

use super::core::{Point3, Transform, Vec3};

/// Oriented plane in Hessian normal form: `normal · p = offset`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Plane {
    normal: Vec3,
    offset: f64,
}

impl Plane {
    /// Plane through `point` with the given normal. The normal is normalized;
    /// `None` for a degenerate normal.
    #[must_use]
    pub fn from_normal_and_point(normal: Vec3, point: Point3) -> Option<Self> {
        let normal = normal.normalized()?;
        Some(Self {
            normal,
            offset: normal.dot(point.to_vec3()),
        })
    }

    /// Plane spanned by a device's local XZ plane: normal is the device's
    /// local +Y axis in world space, passing through the device origin.
    #[must_use]
    pub fn from_device(transform: &Transform) -> Option<Self> {
        Self::from_normal_and_point(transform.apply_vec(Vec3::Y), transform.origin())
    }

    #[must_use]
    pub const fn normal(&self) -> Vec3 {
        self.normal
    }

    #[must_use]
    pub const fn offset(&self) -> f64 {
        self.offset
    }

    #[must_use]
    pub fn signed_distance(&self, p: Point3) -> f64 {
        self.normal.dot(p.to_vec3()) - self.offset
    }

    /// Plane equation coefficients `(a, b, c, d)` with `ax + by + cz + d = 0`.
    #[must_use]
    pub fn equation(&self) -> [f64; 4] {
        [self.normal.x, self.normal.y, self.normal.z, -self.offset]
    }
}

impl Default for Plane {
    fn default() -> Self {
        Self {
            normal: Vec3::Y,
            offset: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_plane_uses_local_up_axis() {
        let pose = Transform::translate(Vec3::new(0.0, 0.0, 2.0))
            * Transform::rotate_x(std::f64::consts::FRAC_PI_2);
        let plane = Plane::from_device(&pose).expect("valid pose");
        assert!((plane.normal() - Vec3::Z).length() < 1e-12);
        assert!((plane.offset() - 2.0).abs() < 1e-12);
        assert!(plane.signed_distance(Point3::new(5.0, -3.0, 2.0)).abs() < 1e-12);
    }

    #[test]
    fn degenerate_normal_is_rejected() {
        assert!(Plane::from_normal_and_point(Vec3::ZERO, Point3::ORIGIN).is_none());
    }

    #[test]
    fn equation_negates_offset() {
        let plane = Plane::from_normal_and_point(Vec3::new(0.0, 2.0, 0.0), Point3::new(0.0, 3.0, 0.0))
            .expect("valid plane");
        assert_eq!(plane.equation(), [0.0, 1.0, 0.0, -3.0]);
    }
}
