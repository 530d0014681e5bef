use std::collections::HashMap;

use nalgebra as na;
use sqpnp_simple::sqpnp_solve_glam;
use tiny_solver::Optimizer;

use crate::calibration::PinholeCamera;
use crate::optimization::factors::ReprojectionFactor;
use crate::types::Pose;

#[derive(Debug)]
pub enum PnpError {
    NotEnoughPoints { required: usize, actual: usize },
    Degenerate { message: String },
}

impl std::fmt::Display for PnpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PnpError::NotEnoughPoints { required, actual } => {
                write!(f, "pnp needs at least {required} points, got {actual}")
            }
            PnpError::Degenerate { message } => {
                write!(f, "degenerate pnp configuration: {message}")
            }
        }
    }
}

impl std::error::Error for PnpError {}

const MIN_PNP_POINTS: usize = 4;

/// Estimate the camera pose from 3D-2D correspondences.
///
/// With `use_guess` the Gauss-Newton refinement starts from `seed`;
/// otherwise a closed-form SQPnP solve on undistorted rays provides the
/// starting point and `seed` is ignored.
pub fn solve_pnp(
    camera: &PinholeCamera<f64>,
    p3ds: &[glam::Vec3],
    p2ds: &[glam::Vec2],
    seed: &Pose,
    use_guess: bool,
) -> Result<Pose, PnpError> {
    let weights = vec![1.0; p3ds.len()];
    solve_pnp_weighted(camera, p3ds, p2ds, &weights, seed, use_guess)
}

/// [`solve_pnp`] with a per-point confidence weight applied to each
/// reprojection residual.
pub fn solve_pnp_weighted(
    camera: &PinholeCamera<f64>,
    p3ds: &[glam::Vec3],
    p2ds: &[glam::Vec2],
    weights: &[f64],
    seed: &Pose,
    use_guess: bool,
) -> Result<Pose, PnpError> {
    // A seeded refinement stays well posed with one point fewer than the
    // closed-form solver needs.
    let required = if use_guess { 3 } else { MIN_PNP_POINTS };
    if p3ds.len() < required || p3ds.len() != p2ds.len() {
        return Err(PnpError::NotEnoughPoints {
            required,
            actual: p3ds.len().min(p2ds.len()),
        });
    }

    let init = if use_guess {
        *seed
    } else {
        let p2ds_undist: Vec<glam::Vec2> = p2ds
            .iter()
            .map(|p| {
                let ray = camera.unproject_one(&na::Vector2::new(p.x as f64, p.y as f64));
                glam::Vec2::new(ray[0] as f32, ray[1] as f32)
            })
            .collect();
        let (rvec, tvec) =
            sqpnp_solve_glam(p3ds, &p2ds_undist).ok_or_else(|| PnpError::Degenerate {
                message: "sqpnp found no solution".to_string(),
            })?;
        Pose::from_rvec_tvec(
            na::Vector3::new(rvec.0, rvec.1, rvec.2),
            na::Vector3::new(tvec.0, tvec.1, tvec.2),
        )
    };

    let mut problem = tiny_solver::Problem::new();
    let cost = ReprojectionFactor::new_weighted(camera, p3ds, p2ds, weights);
    problem.add_residual_block(
        cost.residual_len(),
        vec![("rvec".to_string(), 3), ("tvec".to_string(), 3)],
        Box::new(cost),
        None,
    );

    let initial_values = HashMap::<String, na::DVector<f64>>::from([
        ("rvec".to_string(), init.rvec().as_slice().to_vec().into()),
        ("tvec".to_string(), init.tvec().as_slice().to_vec().into()),
    ]);

    let optimizer = tiny_solver::GaussNewtonOptimizer {};
    let result = optimizer.optimize(&problem, &initial_values, None);

    let rvec = result
        .as_ref()
        .and_then(|values| values.get("rvec"))
        .ok_or_else(|| PnpError::Degenerate {
            message: "optimizer returned no rotation".to_string(),
        })?;
    let tvec = result
        .as_ref()
        .and_then(|values| values.get("tvec"))
        .ok_or_else(|| PnpError::Degenerate {
            message: "optimizer returned no translation".to_string(),
        })?;
    Ok(Pose::from_rvec_tvec(
        na::Vector3::new(rvec[0], rvec[1], rvec[2]),
        na::Vector3::new(tvec[0], tvec[1], tvec[2]),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_camera() -> PinholeCamera<f64> {
        PinholeCamera {
            fx: 430.0,
            fy: 430.0,
            cx: 320.0,
            cy: 240.0,
            dist: [0.0; 5],
        }
    }

    fn project_all(
        camera: &PinholeCamera<f64>,
        pose: &Pose,
        p3ds: &[glam::Vec3],
    ) -> Vec<glam::Vec2> {
        p3ds.iter()
            .map(|p| {
                let pc = pose.transform_point(*p);
                let uv = camera.project_one(&pc);
                glam::Vec2::new(uv[0] as f32, uv[1] as f32)
            })
            .collect()
    }

    #[test]
    fn recovers_pose_without_guess() {
        let camera = test_camera();
        let truth = Pose::from_rvec_tvec(
            na::Vector3::new(0.1, 3.0, -0.05),
            na::Vector3::new(0.02, -0.01, 0.35),
        );
        let p3ds = vec![
            glam::Vec3::new(0.044, 0.036, 0.0305),
            glam::Vec3::new(0.044, -0.02, 0.0305),
            glam::Vec3::new(-0.044, 0.036, 0.0305),
            glam::Vec3::new(-0.036, -0.012, 0.0305),
            glam::Vec3::new(0.036, 0.028, 0.0305),
        ];
        let p2ds = project_all(&camera, &truth, &p3ds);
        let est = solve_pnp(&camera, &p3ds, &p2ds, &Pose::identity(), false).unwrap();
        assert!(est.rotation_angle_to(&truth) < 1e-3);
        assert!(est.translation_distance_to(&truth) < 1e-4);
    }

    #[test]
    fn refines_from_guess() {
        let camera = test_camera();
        let truth = Pose::from_rvec_tvec(
            na::Vector3::new(0.0, 3.1, 0.0),
            na::Vector3::new(0.0, 0.0, 0.4),
        );
        let seed = Pose::from_rvec_tvec(
            na::Vector3::new(0.02, 3.05, 0.01),
            na::Vector3::new(0.005, -0.005, 0.42),
        );
        let p3ds = vec![
            glam::Vec3::new(0.044, 0.036, 0.0305),
            glam::Vec3::new(0.044, -0.02, 0.0305),
            glam::Vec3::new(-0.044, 0.028, 0.0305),
            glam::Vec3::new(-0.036, -0.02, 0.0305),
        ];
        let p2ds = project_all(&camera, &truth, &p3ds);
        let est = solve_pnp(&camera, &p3ds, &p2ds, &seed, true).unwrap();
        assert!(est.rotation_angle_to(&truth) < 1e-3);
        assert!(est.translation_distance_to(&truth) < 1e-4);
    }

    #[test]
    fn rejects_underdetermined_input() {
        let camera = test_camera();
        let p3ds = vec![glam::Vec3::ZERO; 3];
        let p2ds = vec![glam::Vec2::ZERO; 3];
        let r = solve_pnp(&camera, &p3ds, &p2ds, &Pose::identity(), false);
        assert!(matches!(r, Err(PnpError::NotEnoughPoints { .. })));
    }
}
