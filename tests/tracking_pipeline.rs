use image::GrayImage;
use nalgebra as na;
use robot_pose_tracker::appearance::{allocate_learning, finalize_learning, learn_appearance};
use robot_pose_tracker::calibration::Calibration;
use robot_pose_tracker::model::{robot_model, TextureState};
use robot_pose_tracker::store::{load_appearance, write_appearance};
use robot_pose_tracker::tracker::{track, TrackError};
use robot_pose_tracker::types::Pose;

fn test_calibration() -> Calibration {
    Calibration {
        image_width: 640,
        image_height: 480,
        camera_matrix: [[430.0, 0.0, 320.0], [0.0, 430.0, 240.0], [0.0, 0.0, 1.0]],
        distortion_coefficients: vec![0.0; 5],
    }
}

/// Deterministic high-frequency pattern standing in for a textured scene.
/// Symmetric about the image center column, like the robot itself is about
/// its longitudinal plane, so mirrored surfaces see consistent content.
fn pattern_frame() -> GrayImage {
    GrayImage::from_fn(640, 480, |x, y| {
        let d = (x as i64 - 320).unsigned_abs() as u32;
        image::Luma([((d * 31 + y * 17 + (d * y) / 7) % 256) as u8])
    })
}

/// Integer-pixel translation with border replication.
fn shift_frame(img: &GrayImage, dx: i64, dy: i64) -> GrayImage {
    GrayImage::from_fn(img.width(), img.height(), |x, y| {
        let sx = (x as i64 - dx).clamp(0, img.width() as i64 - 1) as u32;
        let sy = (y as i64 - dy).clamp(0, img.height() as i64 - 1) as u32;
        *img.get_pixel(sx, sy)
    })
}

#[test]
fn test_learn_store_track_round_trip() {
    let calib = test_calibration();
    let frame1 = pattern_frame();
    let pose1 = Pose::canonical_seed();

    // learn from one frontal frame and persist the appearance
    let mut model = robot_model();
    allocate_learning(&mut model);
    learn_appearance(&mut model, &frame1, &calib, &pose1);
    finalize_learning(&mut model);

    let dir = std::env::temp_dir().join("tracking-pipeline-test");
    std::fs::create_dir_all(&dir).unwrap();
    let store_path = dir.join("appearance.json");
    let store_path = store_path.to_str().unwrap();
    write_appearance(store_path, &model).unwrap();

    let mut tracked_model = robot_model();
    load_appearance(store_path, &mut tracked_model).unwrap();
    let learned = tracked_model
        .owned_surface_indices()
        .iter()
        .filter(|&&i| matches!(tracked_model.surfaces[i].texture, TextureState::Finalized(_)))
        .count();
    assert!(learned >= 2, "top patches must have been learned");

    // the top plate sits 0.031 m above the origin, i.e. 0.369 m from the
    // camera under the canonical seed; a camera-frame translation of
    // (-6, 2) * z / f pixels shifts every top-plate point by exactly
    // (-6, 2) pixels
    let z = 0.4 - 0.031;
    let (dx, dy) = (-6i64, 2i64);
    let delta = na::Vector3::new(dx as f64 * z / 430.0, dy as f64 * z / 430.0, 0.0);
    let pose2 = Pose::from_rvec_tvec(pose1.rvec(), pose1.tvec() + delta);
    let frame2 = shift_frame(&frame1, dx, dy);

    let out = track(&tracked_model, &frame2, &frame1, &calib, &pose1).unwrap();
    assert!(out.matches.len() >= 4);
    assert!(out.score > 0.4);
    assert!(
        out.pose.translation_distance_to(&pose2) < 0.005,
        "translation error {}",
        out.pose.translation_distance_to(&pose2)
    );
    assert!(
        out.pose.rotation_angle_to(&pose2) < 0.1,
        "rotation error {}",
        out.pose.rotation_angle_to(&pose2)
    );
}

#[test]
fn test_static_scene_tracks_to_same_pose() {
    let calib = test_calibration();
    let frame = pattern_frame();
    let pose = Pose::canonical_seed();

    let mut model = robot_model();
    allocate_learning(&mut model);
    learn_appearance(&mut model, &frame, &calib, &pose);
    finalize_learning(&mut model);

    let out = track(&model, &frame, &frame, &calib, &pose).unwrap();
    assert!(out.pose.translation_distance_to(&pose) < 0.003);
    assert!(out.pose.rotation_angle_to(&pose) < 0.05);
}

#[test]
fn test_textureless_frame_loses_track() {
    let calib = test_calibration();
    let frame1 = pattern_frame();
    let pose1 = Pose::canonical_seed();

    let mut model = robot_model();
    allocate_learning(&mut model);
    learn_appearance(&mut model, &frame1, &calib, &pose1);
    finalize_learning(&mut model);

    // a flat frame carries no mutual information with any texture
    let blank = GrayImage::from_pixel(640, 480, image::Luma([128]));
    let r = track(&model, &blank, &frame1, &calib, &pose1);
    assert!(matches!(r, Err(TrackError::InsufficientData { .. })));
}

#[test]
fn test_object_out_of_view_is_untrackable() {
    let calib = test_calibration();
    let frame = pattern_frame();
    let pose1 = Pose::canonical_seed();

    let mut model = robot_model();
    allocate_learning(&mut model);
    learn_appearance(&mut model, &frame, &calib, &pose1);
    finalize_learning(&mut model);

    // previous pose far off to the side: every patch projects outside
    let off_screen = Pose::from_rvec_tvec(pose1.rvec(), na::Vector3::new(0.5, 0.0, 0.4));
    let r = track(&model, &frame, &frame, &calib, &off_screen);
    assert!(matches!(r, Err(TrackError::InsufficientData { .. })));
}
