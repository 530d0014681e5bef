use nalgebra as na;
use num_dual::DualDVec64;
use tiny_solver::factors::Factor;

use crate::calibration::PinholeCamera;

/// Reprojection factor over all 3D-2D correspondences of one pose estimate.
///
/// Parameters are `rvec` (scaled axis-angle, 3) and `tvec` (3); the residual
/// stacks the per-point pixel errors, each scaled by its confidence weight.
pub struct ReprojectionFactor {
    camera: PinholeCamera<DualDVec64>,
    p3ds: Vec<na::Point3<DualDVec64>>,
    p2ds: Vec<na::Vector2<DualDVec64>>,
    weights: Vec<DualDVec64>,
}

impl ReprojectionFactor {
    pub fn new(
        camera: &PinholeCamera<f64>,
        p3ds: &[glam::Vec3],
        p2ds: &[glam::Vec2],
    ) -> ReprojectionFactor {
        ReprojectionFactor::new_weighted(camera, p3ds, p2ds, &vec![1.0; p3ds.len()])
    }

    pub fn new_weighted(
        camera: &PinholeCamera<f64>,
        p3ds: &[glam::Vec3],
        p2ds: &[glam::Vec2],
        weights: &[f64],
    ) -> ReprojectionFactor {
        ReprojectionFactor {
            camera: camera.cast(),
            p3ds: p3ds
                .iter()
                .map(|p| na::Point3::new(p.x as f64, p.y as f64, p.z as f64).cast())
                .collect(),
            p2ds: p2ds
                .iter()
                .map(|p| na::Vector2::new(p.x as f64, p.y as f64).cast())
                .collect(),
            weights: weights.iter().map(|&w| DualDVec64::from_re(w)).collect(),
        }
    }

    pub fn residual_len(&self) -> usize {
        self.p3ds.len() * 2
    }
}

impl Factor for ReprojectionFactor {
    fn residual_func(
        &self,
        params: &[nalgebra::DVector<num_dual::DualDVec64>],
    ) -> nalgebra::DVector<num_dual::DualDVec64> {
        let rvec = na::Vector3::new(
            params[0][0].clone(),
            params[0][1].clone(),
            params[0][2].clone(),
        );
        let tvec = na::Vector3::new(
            params[1][0].clone(),
            params[1][1].clone(),
            params[1][2].clone(),
        );
        let transform = na::Isometry3::new(tvec, rvec);

        let mut residual = na::DVector::zeros(self.residual_len());
        for (i, (p3d, p2d)) in self.p3ds.iter().zip(self.p2ds.iter()).enumerate() {
            let p3d_t = transform.clone() * p3d.clone();
            let p3d_t = na::Vector3::new(p3d_t.x.clone(), p3d_t.y.clone(), p3d_t.z.clone());
            let p2d_p = self.camera.project_one(&p3d_t);
            residual[i * 2] =
                self.weights[i].clone() * (p2d_p[0].clone() - p2d[0].clone());
            residual[i * 2 + 1] =
                self.weights[i].clone() * (p2d_p[1].clone() - p2d[1].clone());
        }
        residual
    }
}
