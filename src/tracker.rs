use image::GrayImage;
use log::debug;

use crate::calibration::Calibration;
use crate::combinations::SubsetIter;
use crate::matching::{
    crop_to_matrix, match_template_mi, match_template_ssd, parabolic_refine, quad_mask,
    warp_texture,
};
use crate::model::ObjectModel;
use crate::optimization::{homography_from_4pt, solve_pnp, solve_pnp_weighted};
use crate::types::Pose;

/// Surfaces seen flatter than this are not searched at all.
const MIN_VIEW_SCORE: f32 = 0.2;
/// Half extent of the frame-to-frame translation search, pixels.
const SEARCH_HALF_WINDOW: i64 = 16;
/// Half extent of the drift-correction search around the relocated patch.
const DRIFT_HALF_WINDOW: i64 = 3;
/// Projected patches larger than this are too close to the camera for the
/// small-translation assumption and are skipped.
const MAX_PATCH_SIDE: i64 = 100;
/// Reprojection gate for a surface match to support a pose hypothesis.
const INLIER_THRESHOLD_PX: f32 = 5.0;
/// Pose hypotheses evaluated before tracking reports a loss.
const MAX_TRIALS: usize = 30;
/// Surfaces in each minimal pose hypothesis.
const SUBSET_SIZE: usize = 4;
/// Minimum summed inlier score for a tracked pose to be trusted.
const MIN_TRACK_SCORE: f32 = 0.4;

/// One tracked surface observation: where the surface center sits in the
/// object frame, where it was found in the image, and how much the match is
/// trusted (viewing score times mutual-information peak).
#[derive(Clone, Copy, Debug)]
pub struct SurfaceMatch {
    pub center: glam::Vec3,
    pub image_point: glam::Vec2,
    pub score: f32,
}

#[derive(Debug)]
pub enum TrackError {
    InsufficientData { required: usize, actual: usize },
    NoConsensus { best_score: f32 },
}

impl std::fmt::Display for TrackError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackError::InsufficientData { required, actual } => {
                write!(f, "tracking needs {required} surface matches, got {actual}")
            }
            TrackError::NoConsensus { best_score } => {
                write!(
                    f,
                    "no tracked pose reached the score threshold (best {best_score:.3})"
                )
            }
        }
    }
}

impl std::error::Error for TrackError {}

#[derive(Debug)]
pub struct TrackOutcome {
    pub pose: Pose,
    pub matches: Vec<SurfaceMatch>,
    pub inlier_mask: Vec<bool>,
    pub score: f32,
}

/// Track the pose from the previous frame into the current one.
///
/// Every sufficiently visible textured surface is searched in two stages: a
/// masked SSD search against its previous-frame appearance absorbs the
/// frame-to-frame motion, then a mutual-information search against the
/// learned canonical texture removes accumulated drift. The surviving
/// matches vote on the pose through a bounded subset search.
pub fn track(
    model: &ObjectModel,
    img: &GrayImage,
    prev_img: &GrayImage,
    calib: &Calibration,
    prev_pose: &Pose,
) -> Result<TrackOutcome, TrackError> {
    let mut matches = Vec::new();
    for idx in 0..model.surfaces.len() {
        if let Some(m) = match_surface(model, idx, img, prev_img, calib, prev_pose) {
            matches.push(m);
        }
    }
    matches.sort_by(|a, b| b.score.total_cmp(&a.score));

    if matches.len() < SUBSET_SIZE {
        return Err(TrackError::InsufficientData {
            required: SUBSET_SIZE,
            actual: matches.len(),
        });
    }

    let camera = calib.camera();
    let p3ds: Vec<glam::Vec3> = matches.iter().map(|m| m.center).collect();
    let p2ds: Vec<glam::Vec2> = matches.iter().map(|m| m.image_point).collect();

    let mut best_score = 0.0f32;
    let mut best_inliers: Vec<usize> = Vec::new();
    let mut best_count = 0usize;

    let mut subsets = SubsetIter::new(matches.len(), SUBSET_SIZE);
    let mut trials = 0;
    while trials < MAX_TRIALS {
        let subset = match subsets.next_subset() {
            Some(s) => s.to_vec(),
            None => break,
        };
        trials += 1;

        let sub_p3ds: Vec<glam::Vec3> = subset.iter().map(|&i| p3ds[i]).collect();
        let sub_p2ds: Vec<glam::Vec2> = subset.iter().map(|&i| p2ds[i]).collect();
        let Ok(hypothesis) = solve_pnp(&camera, &sub_p3ds, &sub_p2ds, prev_pose, true) else {
            continue;
        };

        let inliers: Vec<usize> = (0..matches.len())
            .filter(|&i| {
                let pc = hypothesis.transform_point(p3ds[i]);
                if pc[2] <= 0.0 {
                    return false;
                }
                let uv = camera.project_one(&pc);
                let proj = glam::Vec2::new(uv[0] as f32, uv[1] as f32);
                (proj - p2ds[i]).length() < INLIER_THRESHOLD_PX
            })
            .collect();

        if inliers.len() > best_count {
            best_count = inliers.len();
            best_score = inliers.iter().map(|&i| matches[i].score).sum();
            best_inliers = inliers;
        }
    }

    if best_score <= MIN_TRACK_SCORE {
        return Err(TrackError::NoConsensus { best_score });
    }

    let in_p3ds: Vec<glam::Vec3> = best_inliers.iter().map(|&i| p3ds[i]).collect();
    let in_p2ds: Vec<glam::Vec2> = best_inliers.iter().map(|&i| p2ds[i]).collect();
    let weights: Vec<f64> = best_inliers
        .iter()
        .map(|&i| (matches[i].score as f64).sqrt())
        .collect();
    let pose = solve_pnp_weighted(&camera, &in_p3ds, &in_p2ds, &weights, prev_pose, true)
        .map_err(|e| {
            debug!("weighted refit failed: {e}");
            TrackError::NoConsensus { best_score }
        })?;

    let inlier_mask: Vec<bool> = (0..matches.len())
        .map(|i| best_inliers.contains(&i))
        .collect();
    Ok(TrackOutcome {
        pose,
        matches,
        inlier_mask,
        score: best_score,
    })
}

/// Search one surface in the current frame. None when the surface is not
/// trackable from this viewpoint (no texture, too flat, projected patch out
/// of bounds or oversized, or the search windows do not fit).
fn match_surface(
    model: &ObjectModel,
    idx: usize,
    img: &GrayImage,
    prev_img: &GrayImage,
    calib: &Calibration,
    prev_pose: &Pose,
) -> Option<SurfaceMatch> {
    let surf = &model.surfaces[idx];
    let view_score = model.view_score(surf, prev_pose);
    if view_score <= MIN_VIEW_SCORE {
        return None;
    }
    let texture = model.texture_of(idx)?;

    let camera = calib.camera();
    for &corner in surf.corners().iter() {
        if model.point_in_camera(corner, prev_pose)[2] <= 0.0 {
            return None;
        }
    }
    let projected: Vec<glam::Vec2> = surf
        .corners()
        .iter()
        .map(|&c| model.project_point(c, prev_pose, &camera))
        .collect();
    let center_px = model.project_point(surf.center, prev_pose, &camera);

    // Integer bounding box of the projected patch.
    let min_x = projected.iter().map(|p| p.x).fold(f32::MAX, f32::min);
    let min_y = projected.iter().map(|p| p.y).fold(f32::MAX, f32::min);
    let max_x = projected.iter().map(|p| p.x).fold(f32::MIN, f32::max);
    let max_y = projected.iter().map(|p| p.y).fold(f32::MIN, f32::max);
    let bx0 = min_x.floor() as i64;
    let by0 = min_y.floor() as i64;
    let bw = (max_x.ceil() as i64 - bx0).max(1);
    let bh = (max_y.ceil() as i64 - by0).max(1);

    let img_w = img.width() as i64;
    let img_h = img.height() as i64;
    if bx0 < 0 || by0 < 0 || bx0 + bw > img_w || by0 + bh > img_h {
        return None;
    }
    if bw > MAX_PATCH_SIDE || bh > MAX_PATCH_SIDE {
        return None;
    }

    // Stage one: find the previous-frame appearance in the current frame.
    let quad_in_box = [
        projected[0] - glam::Vec2::new(bx0 as f32, by0 as f32),
        projected[1] - glam::Vec2::new(bx0 as f32, by0 as f32),
        projected[2] - glam::Vec2::new(bx0 as f32, by0 as f32),
        projected[3] - glam::Vec2::new(bx0 as f32, by0 as f32),
    ];
    let mask = quad_mask(&quad_in_box, bw as u32, bh as u32);
    let template_prev = crop_to_matrix(prev_img, bx0 as u32, by0 as u32, bw as u32, bh as u32);

    let rx0 = (bx0 - SEARCH_HALF_WINDOW).max(0);
    let ry0 = (by0 - SEARCH_HALF_WINDOW).max(0);
    let rx1 = (bx0 + bw + SEARCH_HALF_WINDOW).min(img_w);
    let ry1 = (by0 + bh + SEARCH_HALF_WINDOW).min(img_h);
    let roi = crop_to_matrix(
        img,
        rx0 as u32,
        ry0 as u32,
        (rx1 - rx0) as u32,
        (ry1 - ry0) as u32,
    );
    let (ssd_response, ssd_loc) = match_template_ssd(&roi, &template_prev, &mask)?;
    if ssd_response.ncols() as i64 <= SEARCH_HALF_WINDOW
        || ssd_response.nrows() as i64 <= SEARCH_HALF_WINDOW
    {
        return None;
    }

    // Relocated patch origin in image coordinates.
    let nx0 = rx0 + ssd_loc.1 as i64;
    let ny0 = ry0 + ssd_loc.0 as i64;

    // Stage two: drift correction against the learned canonical texture.
    let canonical = surf.canonical_corners();
    let h_mat = homography_from_4pt(&quad_in_box, &canonical)?;
    let template_tex = warp_texture(texture, &h_mat, bw as u32, bh as u32);

    let dx0 = (nx0 - DRIFT_HALF_WINDOW).max(0);
    let dy0 = (ny0 - DRIFT_HALF_WINDOW).max(0);
    let dx1 = (nx0 + bw + DRIFT_HALF_WINDOW).min(img_w);
    let dy1 = (ny0 + bh + DRIFT_HALF_WINDOW).min(img_h);
    let drift_roi = crop_to_matrix(
        img,
        dx0 as u32,
        dy0 as u32,
        (dx1 - dx0) as u32,
        (dy1 - dy0) as u32,
    );
    let (mi_response, mi_loc) = match_template_mi(&drift_roi, &template_tex, &mask)?;
    if mi_response.ncols() as i64 <= DRIFT_HALF_WINDOW
        || mi_response.nrows() as i64 <= DRIFT_HALF_WINDOW
    {
        return None;
    }
    let mi_peak = mi_response[mi_loc];
    if mi_peak <= 0.0 {
        return None;
    }
    let (fx, fy) = parabolic_refine(&mi_response, mi_loc);

    // The surface center keeps its offset within the patch.
    let center_offset = center_px - glam::Vec2::new(bx0 as f32, by0 as f32);
    let image_point = glam::Vec2::new(dx0 as f32 + fx, dy0 as f32 + fy) + center_offset;

    Some(SurfaceMatch {
        center: surf.center,
        image_point,
        score: view_score * mi_peak,
    })
}
