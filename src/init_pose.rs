use log::warn;

use crate::calibration::Calibration;
use crate::combinations::SubsetIter;
use crate::detection::{sort_by_discriminative_power, Correspondence};
use crate::model::ObjectModel;
use crate::optimization::{solve_pnp, PnpError};
use crate::types::{rotation_vs_frontoparallel, Pose};

/// Pose hypotheses evaluated before acquisition gives up on a frame.
const MAX_TRIALS: usize = 20;
/// Landmarks in each minimal pose hypothesis.
const SUBSET_SIZE: usize = 4;
/// Reprojection gate for counting a detection as an inlier, pixels.
const INLIER_THRESHOLD_PX: f32 = 2.0;
/// Fraction of detections that must agree for a hypothesis to be accepted.
const CONSENSUS_RATIO: f32 = 0.75;
/// Hypotheses tilted more than this from frontoparallel are outside the
/// detector's training domain and are discarded unevaluated.
const MAX_FRONTOPARALLEL_ANGLE: f64 = std::f64::consts::FRAC_PI_4;

#[derive(Debug)]
pub enum InitPoseError {
    InsufficientData { required: usize, actual: usize },
    NoConsensus { trials: usize },
}

impl std::fmt::Display for InitPoseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InitPoseError::InsufficientData { required, actual } => {
                write!(
                    f,
                    "pose acquisition needs {required} labeled detections, got {actual}"
                )
            }
            InitPoseError::NoConsensus { trials } => {
                write!(f, "no pose hypothesis reached consensus in {trials} trials")
            }
        }
    }
}

impl std::error::Error for InitPoseError {}

/// Accepted acquisition result: the pose, which detections supported it and
/// how many labeled detections were considered.
#[derive(Debug)]
pub struct InitOutcome {
    pub pose: Pose,
    pub inliers: Vec<usize>,
    pub total: usize,
}

/// Acquire the camera pose from labeled landmark detections.
///
/// Detections are sorted most-discriminative first and minimal 4-subsets
/// tried in lexicographic order, so the reliable labels drive the first
/// hypotheses. Each minimal solve is seeded from the previous pose, or from
/// the canonical frontal seed on a first acquisition. A hypothesis is
/// accepted as soon as 75% of all detections reproject within the inlier
/// gate; the pose is then refit on the inliers.
pub fn estimate_pose(
    model: &ObjectModel,
    calib: &Calibration,
    correspondences: &[Correspondence],
    prev_pose: Option<&Pose>,
) -> Result<InitOutcome, InitPoseError> {
    let camera = calib.camera();

    let mut known: Vec<Correspondence> = correspondences
        .iter()
        .filter(|c| {
            let ok = model.landmark(c.id).is_some();
            if !ok {
                warn!("dropping detection with unknown landmark id {}", c.id);
            }
            ok
        })
        .copied()
        .collect();
    if known.len() < SUBSET_SIZE {
        return Err(InitPoseError::InsufficientData {
            required: SUBSET_SIZE,
            actual: known.len(),
        });
    }
    sort_by_discriminative_power(&mut known);

    let p3ds: Vec<glam::Vec3> = known
        .iter()
        .map(|c| model.landmark(c.id).unwrap_or_default())
        .collect();
    let p2ds: Vec<glam::Vec2> = known.iter().map(|c| c.position).collect();

    // Every minimal solve refines from the current guess: the previous pose
    // when re-acquiring, else the canonical frontal seed.
    let seed = prev_pose.copied().unwrap_or_else(Pose::canonical_seed);
    // strictly more than 75% of the detections must agree
    let needed = ((known.len() as f32 * CONSENSUS_RATIO).floor() as usize + 1).max(SUBSET_SIZE);

    let mut subsets = SubsetIter::new(known.len(), SUBSET_SIZE);
    let mut trials = 0;
    while trials < MAX_TRIALS {
        let subset = match subsets.next_subset() {
            Some(s) => s.to_vec(),
            None => break,
        };
        trials += 1;

        let sub_p3ds: Vec<glam::Vec3> = subset.iter().map(|&i| p3ds[i]).collect();
        let sub_p2ds: Vec<glam::Vec2> = subset.iter().map(|&i| p2ds[i]).collect();
        let hypothesis = match solve_pnp(&camera, &sub_p3ds, &sub_p2ds, &seed, true) {
            Ok(p) => p,
            Err(PnpError::Degenerate { .. }) => continue,
            Err(e @ PnpError::NotEnoughPoints { .. }) => {
                warn!("pose hypothesis failed: {e}");
                continue;
            }
        };
        if rotation_vs_frontoparallel(&hypothesis.rvec()) >= MAX_FRONTOPARALLEL_ANGLE {
            continue;
        }

        let inliers: Vec<usize> = (0..known.len())
            .filter(|&i| {
                let pc = hypothesis.transform_point(p3ds[i]);
                let uv = camera.project_one(&pc);
                let proj = glam::Vec2::new(uv[0] as f32, uv[1] as f32);
                (proj - p2ds[i]).length() < INLIER_THRESHOLD_PX
            })
            .collect();

        if inliers.len() >= needed {
            let in_p3ds: Vec<glam::Vec3> = inliers.iter().map(|&i| p3ds[i]).collect();
            let in_p2ds: Vec<glam::Vec2> = inliers.iter().map(|&i| p2ds[i]).collect();
            let refined = solve_pnp(&camera, &in_p3ds, &in_p2ds, &hypothesis, true)
                .unwrap_or(hypothesis);
            return Ok(InitOutcome {
                pose: refined,
                inliers,
                total: known.len(),
            });
        }
    }

    Err(InitPoseError::NoConsensus { trials })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::robot_model;
    use nalgebra as na;

    fn test_calibration() -> Calibration {
        Calibration {
            image_width: 640,
            image_height: 480,
            camera_matrix: [[430.0, 0.0, 320.0], [0.0, 430.0, 240.0], [0.0, 0.0, 1.0]],
            distortion_coefficients: vec![0.0; 5],
        }
    }

    fn detections_for_pose(model: &ObjectModel, calib: &Calibration, pose: &Pose) -> Vec<Correspondence> {
        let camera = calib.camera();
        model
            .vertices
            .iter()
            .enumerate()
            .map(|(id, &p)| {
                let pc = pose.transform_point(p);
                let uv = camera.project_one(&pc);
                Correspondence {
                    position: glam::Vec2::new(uv[0] as f32, uv[1] as f32),
                    id,
                    nb_votes: 10.0,
                    discriminative_power: 10,
                }
            })
            .collect()
    }

    #[test]
    fn recovers_pose_from_clean_detections() {
        let model = robot_model();
        let calib = test_calibration();
        let truth = Pose::from_rvec_tvec(
            na::Vector3::new(0.05, std::f64::consts::PI, 0.0),
            na::Vector3::new(0.01, -0.02, 0.4),
        );
        let detections = detections_for_pose(&model, &calib, &truth);
        let out = estimate_pose(&model, &calib, &detections, None).unwrap();
        assert!(out.pose.rotation_angle_to(&truth) < 1e-2);
        assert!(out.pose.translation_distance_to(&truth) < 1e-3);
        assert_eq!(out.inliers.len(), out.total);
    }

    #[test]
    fn survives_minority_of_mislabeled_detections() {
        let model = robot_model();
        let calib = test_calibration();
        let truth = Pose::from_rvec_tvec(
            na::Vector3::new(0.0, std::f64::consts::PI, 0.05),
            na::Vector3::new(0.0, 0.0, 0.35),
        );
        let mut detections = detections_for_pose(&model, &calib, &truth);
        // corrupt three of fourteen detections and mark them least trustworthy
        for d in detections.iter_mut().take(3) {
            d.position += glam::Vec2::new(45.0, -30.0);
            d.discriminative_power = 0;
        }
        let out = estimate_pose(&model, &calib, &detections, None).unwrap();
        assert!(out.pose.rotation_angle_to(&truth) < 1e-2);
        assert_eq!(out.inliers.len(), detections.len() - 3);
    }

    #[test]
    fn first_acquisition_is_seeded_from_the_canonical_pose() {
        let model = robot_model();
        let calib = test_calibration();
        let truth = Pose::from_rvec_tvec(
            na::Vector3::new(0.03, std::f64::consts::PI, -0.02),
            na::Vector3::new(0.01, 0.005, 0.42),
        );
        // a minimal set of coplanar landmarks: the pose is ambiguous without
        // a guess, so recovery requires the canonical seed to drive the solve
        let detections: Vec<_> = detections_for_pose(&model, &calib, &truth)
            .into_iter()
            .filter(|d| [0, 3, 10, 13].contains(&d.id))
            .collect();
        assert_eq!(detections.len(), 4);
        let out = estimate_pose(&model, &calib, &detections, None).unwrap();
        assert!(out.pose.rotation_angle_to(&truth) < 1e-2);
        assert!(out.pose.translation_distance_to(&truth) < 1e-3);
    }

    #[test]
    fn too_few_detections_is_an_error() {
        let model = robot_model();
        let calib = test_calibration();
        let truth = Pose::canonical_seed();
        let detections: Vec<_> = detections_for_pose(&model, &calib, &truth)
            .into_iter()
            .take(3)
            .collect();
        let r = estimate_pose(&model, &calib, &detections, None);
        assert!(matches!(r, Err(InitPoseError::InsufficientData { .. })));
    }

    #[test]
    fn unknown_ids_are_ignored() {
        let model = robot_model();
        let calib = test_calibration();
        let truth = Pose::canonical_seed();
        let mut detections = detections_for_pose(&model, &calib, &truth);
        detections.push(Correspondence {
            position: glam::Vec2::new(10.0, 10.0),
            id: 999,
            nb_votes: 1.0,
            discriminative_power: 1,
        });
        let out = estimate_pose(&model, &calib, &detections, None).unwrap();
        assert_eq!(out.total, model.vertices.len());
    }
}
