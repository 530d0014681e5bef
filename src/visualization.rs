use image::DynamicImage;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use rerun::RecordingStream;
use std::io::Cursor;

use crate::calibration::Calibration;
use crate::model::ObjectModel;
use crate::tracker::TrackOutcome;
use crate::types::Pose;

pub fn log_image_as_compressed(
    recording: &RecordingStream,
    topic: &str,
    img: &DynamicImage,
    format: image::ImageFormat,
) {
    let mut bytes: Vec<u8> = Vec::new();

    img.to_luma8()
        .write_to(&mut Cursor::new(&mut bytes), format)
        .unwrap();

    recording
        .log(
            format!("{}/image", topic),
            &rerun::Image::from_file_contents(bytes, None),
        )
        .unwrap();
}

pub fn id_to_color(id: usize) -> (u8, u8, u8, u8) {
    let mut rng = ChaCha8Rng::seed_from_u64(id as u64);
    let color_num = rng.gen_range(0..2u32.pow(24));
    (
        ((color_num >> 16) % 256) as u8,
        ((color_num >> 8) % 256) as u8,
        (color_num % 256) as u8,
        255,
    )
}

/// rerun use top left corner as (0, 0)
pub fn rerun_shift(p2ds: &[(f32, f32)]) -> Vec<(f32, f32)> {
    p2ds.iter().map(|(x, y)| (*x + 0.5, *y + 0.5)).collect()
}

/// Logs the projected silhouette of the model under a pose.
pub fn log_silhouette(
    recording: &RecordingStream,
    topic: &str,
    model: &ObjectModel,
    calib: &Calibration,
    cam_pose: &Pose,
) {
    let camera = calib.camera();
    let strips: Vec<Vec<(f32, f32)>> = model
        .silhouette_segments(cam_pose, &camera)
        .iter()
        .map(|(a, b)| rerun_shift(&[(a.x, a.y), (b.x, b.y)]))
        .collect();
    recording
        .log(
            format!("{}/silhouette", topic),
            &rerun::LineStrips2D::new(strips)
                .with_colors([(50, 255, 50, 255)])
                .with_radii([rerun::Radius::new_ui_points(1.5)]),
        )
        .unwrap();
}

/// Logs the surface matches of one tracked frame, inliers and outliers in
/// different colors.
pub fn log_track_outcome(recording: &RecordingStream, topic: &str, outcome: &TrackOutcome) {
    let (pts, colors): (Vec<_>, Vec<_>) = outcome
        .matches
        .iter()
        .zip(outcome.inlier_mask.iter())
        .map(|(m, &inlier)| {
            let color = if inlier {
                (50, 255, 50, 255)
            } else {
                (255, 70, 70, 255)
            };
            ((m.image_point.x, m.image_point.y), color)
        })
        .unzip();
    let pts = rerun_shift(&pts);
    recording
        .log(
            format!("{}/matches", topic),
            &rerun::Points2D::new(pts)
                .with_colors(colors)
                .with_radii([rerun::Radius::new_ui_points(5.0)]),
        )
        .unwrap();
}

/// Logs labeled landmark detections.
pub fn log_detections(
    recording: &RecordingStream,
    topic: &str,
    detections: &[crate::detection::Correspondence],
) {
    let (pts, colors_labels): (Vec<_>, Vec<_>) = detections
        .iter()
        .map(|d| {
            (
                (d.position.x, d.position.y),
                (id_to_color(d.id), format!("{}", d.id)),
            )
        })
        .unzip();
    let (colors, labels): (Vec<_>, Vec<_>) = colors_labels.iter().cloned().unzip();
    let pts = rerun_shift(&pts);
    recording
        .log(
            format!("{}/detections", topic),
            &rerun::Points2D::new(pts)
                .with_colors(colors)
                .with_labels(labels)
                .with_radii([rerun::Radius::new_ui_points(5.0)]),
        )
        .unwrap();
}
