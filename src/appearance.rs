use image::GrayImage;
use log::debug;
use nalgebra as na;

use crate::calibration::Calibration;
use crate::matching::rectify_patch;
use crate::model::{ObjectModel, TextureState};
use crate::optimization::homography_from_4pt;
use crate::types::Pose;

/// Surfaces seen flatter than this contribute nothing to the appearance
/// accumulator.
const MIN_LEARNING_SCORE: f32 = 0.0;

/// Switch every texture-owning surface into accumulation. Already finalized
/// textures are reset; learning always starts from an empty accumulator.
pub fn allocate_learning(model: &mut ObjectModel) {
    for surf in model.surfaces.iter_mut().filter(|s| !s.is_mirror()) {
        surf.texture = TextureState::Accumulating {
            buf: na::DMatrix::zeros(surf.tex_h as usize, surf.tex_w as usize),
            weight: 0.0,
        };
    }
}

/// Blend one frame into the appearance accumulators.
///
/// Each texture-owning surface visible under `cam_pose` is rectified into
/// its canonical rectangle and added with the viewing score as weight, so
/// frontal observations dominate grazing ones.
pub fn learn_appearance(
    model: &mut ObjectModel,
    img: &GrayImage,
    calib: &Calibration,
    cam_pose: &Pose,
) {
    let camera = calib.camera();
    let indices = model.owned_surface_indices();
    for idx in indices {
        let score = model.view_score(&model.surfaces[idx], cam_pose);
        if score <= MIN_LEARNING_SCORE {
            continue;
        }

        let corners = model.surfaces[idx].corners();
        let projected: Vec<glam::Vec2> = corners
            .iter()
            .map(|&c| model.project_point(c, cam_pose, &camera))
            .collect();
        let canonical = model.surfaces[idx].canonical_corners();
        let dst = [projected[0], projected[1], projected[2], projected[3]];
        let Some(h_mat) = homography_from_4pt(&canonical, &dst) else {
            debug!("skipping surface {idx}: degenerate projection");
            continue;
        };

        let surf = &mut model.surfaces[idx];
        let patch = rectify_patch(img, &h_mat, surf.tex_w, surf.tex_h);
        if let TextureState::Accumulating { buf, weight } = &mut surf.texture {
            *buf += patch * score;
            *weight += score;
        }
    }
}

/// Quantize the accumulators into trackable textures. Surfaces that were
/// never observed stay empty.
pub fn finalize_learning(model: &mut ObjectModel) {
    for surf in model.surfaces.iter_mut().filter(|s| !s.is_mirror()) {
        if let TextureState::Accumulating { buf, weight } = &surf.texture {
            if *weight <= 0.0 {
                debug!("surface never observed during learning");
                surf.texture = TextureState::Empty;
                continue;
            }
            let w = surf.tex_w;
            let h = surf.tex_h;
            let inv = 1.0 / *weight;
            let img = GrayImage::from_fn(w, h, |x, y| {
                let v = buf[(y as usize, x as usize)] * inv;
                image::Luma([v.round().clamp(0.0, 255.0) as u8])
            });
            surf.texture = TextureState::Finalized(img);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::robot_model;

    fn test_calibration() -> Calibration {
        Calibration {
            image_width: 640,
            image_height: 480,
            camera_matrix: [[430.0, 0.0, 320.0], [0.0, 430.0, 240.0], [0.0, 0.0, 1.0]],
            distortion_coefficients: vec![0.0; 5],
        }
    }

    fn textured_frame() -> GrayImage {
        GrayImage::from_fn(640, 480, |x, y| image::Luma([((x * 3 + y * 7) % 256) as u8]))
    }

    #[test]
    fn accumulation_averages_identical_frames() {
        let mut model = robot_model();
        let calib = test_calibration();
        let pose = Pose::canonical_seed();
        let frame = textured_frame();

        allocate_learning(&mut model);
        learn_appearance(&mut model, &frame, &calib, &pose);
        let single: Vec<_> = model
            .surfaces
            .iter()
            .map(|s| match &s.texture {
                TextureState::Accumulating { buf, weight } => Some((buf.clone(), *weight)),
                _ => None,
            })
            .collect();

        for _ in 0..3 {
            learn_appearance(&mut model, &frame, &calib, &pose);
        }
        finalize_learning(&mut model);

        for (s, first) in model.surfaces.iter().zip(single) {
            let Some((buf, weight)) = first else { continue };
            if weight <= 0.0 {
                continue;
            }
            let TextureState::Finalized(img) = &s.texture else {
                panic!("observed surface not finalized");
            };
            // averaging identical frames must reproduce the single frame
            let expected = &buf / weight;
            for y in 0..s.tex_h {
                for x in 0..s.tex_w {
                    let got = img.get_pixel(x, y)[0] as f32;
                    assert!((got - expected[(y as usize, x as usize)]).abs() <= 1.0);
                }
            }
        }
    }

    #[test]
    fn unobserved_surfaces_stay_empty() {
        let mut model = robot_model();
        allocate_learning(&mut model);
        finalize_learning(&mut model);
        for s in model.surfaces.iter().filter(|s| !s.is_mirror()) {
            assert!(matches!(s.texture, TextureState::Empty));
        }
    }

    #[test]
    fn canonical_seed_observes_top_surfaces() {
        let mut model = robot_model();
        let calib = test_calibration();
        let pose = Pose::canonical_seed();
        allocate_learning(&mut model);
        learn_appearance(&mut model, &textured_frame(), &calib, &pose);
        finalize_learning(&mut model);
        // top blob patches face the camera under the canonical seed
        assert!(matches!(
            model.surfaces[2].texture,
            TextureState::Finalized(_)
        ));
        assert!(matches!(
            model.surfaces[3].texture,
            TextureState::Finalized(_)
        ));
    }
}
