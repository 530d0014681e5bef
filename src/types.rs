use nalgebra as na;

/// Rigid transform (orthonormal rotation + translation).
///
/// Used both for the object pose (object frame -> world) and the camera pose
/// (world -> camera). The rotation is an isometry by construction, so no
/// shear or scale can creep in through solver round trips.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Pose {
    iso: na::Isometry3<f64>,
}

impl Pose {
    pub fn identity() -> Pose {
        Pose {
            iso: na::Isometry3::identity(),
        }
    }

    /// Build from a scaled axis-angle rotation vector and a translation.
    pub fn from_rvec_tvec(rvec: na::Vector3<f64>, tvec: na::Vector3<f64>) -> Pose {
        Pose {
            iso: na::Isometry3::new(tvec, rvec),
        }
    }

    /// Conventional acquisition seed: model facing the camera at a 0.4 m
    /// standoff. Used when no previous pose is available.
    pub fn canonical_seed() -> Pose {
        Pose::from_rvec_tvec(
            na::Vector3::new(0.0, std::f64::consts::PI, 0.0),
            na::Vector3::new(0.0, 0.0, 0.4),
        )
    }

    pub fn rvec(&self) -> na::Vector3<f64> {
        self.iso.rotation.scaled_axis()
    }

    pub fn tvec(&self) -> na::Vector3<f64> {
        self.iso.translation.vector
    }

    pub fn rotation(&self) -> na::Rotation3<f64> {
        self.iso.rotation.to_rotation_matrix()
    }

    pub fn inverse(&self) -> Pose {
        Pose {
            iso: self.iso.inverse(),
        }
    }

    /// Compose two poses: `self` applied after `rhs`.
    pub fn compose(&self, rhs: &Pose) -> Pose {
        Pose {
            iso: self.iso * rhs.iso,
        }
    }

    pub fn transform_point(&self, p: glam::Vec3) -> na::Vector3<f64> {
        let q = self.iso * na::Point3::new(p.x as f64, p.y as f64, p.z as f64);
        q.coords
    }

    pub fn transform_vector(&self, v: glam::Vec3) -> na::Vector3<f64> {
        self.iso * na::Vector3::new(v.x as f64, v.y as f64, v.z as f64)
    }

    /// Angle in radians between the two rotations.
    pub fn rotation_angle_to(&self, other: &Pose) -> f64 {
        self.iso.rotation.angle_to(&other.iso.rotation)
    }

    pub fn translation_distance_to(&self, other: &Pose) -> f64 {
        (self.tvec() - other.tvec()).norm()
    }
}

/// Angle between the camera viewing direction and the orientation the
/// association front end was trained on (model frontoparallel to the image
/// plane). Candidate poses beyond 45 degrees of this are outside the
/// detector's training domain.
pub fn rotation_vs_frontoparallel(rvec: &na::Vector3<f64>) -> f64 {
    let rot = na::Rotation3::new(*rvec);
    let fronto_perp = na::Vector3::new(0.0, 0.0, -1.0);
    let v = rot * fronto_perp;
    v.z.clamp(-1.0, 1.0).acos()
}
