use nalgebra as na;
use robot_pose_tracker::calibration::Calibration;
use robot_pose_tracker::detection::Correspondence;
use robot_pose_tracker::init_pose::{estimate_pose, InitPoseError};
use robot_pose_tracker::model::{robot_model, ObjectModel};
use robot_pose_tracker::types::Pose;

fn test_calibration() -> Calibration {
    Calibration {
        image_width: 640,
        image_height: 480,
        camera_matrix: [[430.0, 0.0, 320.0], [0.0, 430.0, 240.0], [0.0, 0.0, 1.0]],
        distortion_coefficients: vec![0.01, -0.005, 0.0, 0.0, 0.0],
    }
}

fn detections_for_pose(
    model: &ObjectModel,
    calib: &Calibration,
    pose: &Pose,
) -> Vec<Correspondence> {
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
fn test_acquisition_with_distortion() {
    let model = robot_model();
    let calib = test_calibration();
    let truth = Pose::from_rvec_tvec(
        na::Vector3::new(0.1, 3.1, -0.05),
        na::Vector3::new(0.02, -0.03, 0.45),
    );
    let detections = detections_for_pose(&model, &calib, &truth);
    let out = estimate_pose(&model, &calib, &detections, None).unwrap();
    assert!(out.pose.rotation_angle_to(&truth) < 1e-2);
    assert!(out.pose.translation_distance_to(&truth) < 1e-3);
}

#[test]
fn test_acquisition_seeded_by_previous_pose() {
    let model = robot_model();
    let calib = test_calibration();
    let prev = Pose::from_rvec_tvec(
        na::Vector3::new(0.0, std::f64::consts::PI, 0.0),
        na::Vector3::new(0.0, 0.0, 0.4),
    );
    let truth = Pose::from_rvec_tvec(
        na::Vector3::new(0.02, std::f64::consts::PI, 0.01),
        na::Vector3::new(0.003, -0.002, 0.41),
    );
    let detections = detections_for_pose(&model, &calib, &truth);
    let out = estimate_pose(&model, &calib, &detections, Some(&prev)).unwrap();
    assert!(out.pose.rotation_angle_to(&truth) < 1e-2);
    assert!(out.pose.translation_distance_to(&truth) < 1e-3);
}

#[test]
fn test_majority_of_outliers_gives_no_consensus() {
    let model = robot_model();
    let calib = test_calibration();
    let truth = Pose::canonical_seed();
    let mut detections = detections_for_pose(&model, &calib, &truth);
    // shuffle half of the labels so no hypothesis can reach 75% agreement
    let n = detections.len();
    for i in 0..n / 2 {
        detections[i].position += glam::Vec2::new(60.0 + i as f32 * 7.0, -40.0);
    }
    let r = estimate_pose(&model, &calib, &detections, None);
    assert!(matches!(r, Err(InitPoseError::NoConsensus { .. })));
}

#[test]
fn test_tilted_pose_outside_detector_domain_is_rejected() {
    let model = robot_model();
    let calib = test_calibration();
    // 80 degrees from frontoparallel: detections are geometrically
    // consistent but the hypothesis gate must refuse the pose
    let rot = na::Rotation3::new(na::Vector3::new(1.4, 0.0, 0.0))
        * na::Rotation3::new(na::Vector3::new(0.0, std::f64::consts::PI, 0.0));
    let tilted = Pose::from_rvec_tvec(rot.scaled_axis(), na::Vector3::new(0.0, 0.0, 0.4));
    let detections = detections_for_pose(&model, &calib, &tilted);
    let r = estimate_pose(&model, &calib, &detections, None);
    assert!(r.is_err());
}
