use image::GrayImage;
use nalgebra as na;

use crate::optimization::apply_homography;

const MI_BINS: usize = 32;

/// Bilinear intensity lookup with border replication. Coordinates are in
/// pixels, origin at the top-left pixel center.
pub fn bilinear_sample(img: &GrayImage, x: f32, y: f32) -> f32 {
    let w = img.width() as i64;
    let h = img.height() as i64;
    let x0 = (x.floor() as i64).clamp(0, w - 1);
    let y0 = (y.floor() as i64).clamp(0, h - 1);
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let fx = (x - x0 as f32).clamp(0.0, 1.0);
    let fy = (y - y0 as f32).clamp(0.0, 1.0);

    let at = |xx: i64, yy: i64| img.get_pixel(xx as u32, yy as u32)[0] as f32;
    let top = at(x0, y0) * (1.0 - fx) + at(x1, y0) * fx;
    let bottom = at(x0, y1) * (1.0 - fx) + at(x1, y1) * fx;
    top * (1.0 - fy) + bottom * fy
}

/// Resample `img` into a `w x h` canonical patch. `h_mat` maps canonical
/// pixel coordinates into image coordinates.
pub fn rectify_patch(img: &GrayImage, h_mat: &na::Matrix3<f64>, w: u32, h: u32) -> na::DMatrix<f32> {
    let mut out = na::DMatrix::zeros(h as usize, w as usize);
    for r in 0..h {
        for c in 0..w {
            let p = apply_homography(h_mat, glam::Vec2::new(c as f32, r as f32));
            out[(r as usize, c as usize)] = bilinear_sample(img, p.x, p.y);
        }
    }
    out
}

/// Warp a finalized texture into a `w x h` buffer. `h_mat` maps output pixel
/// coordinates into texture coordinates; samples outside the texture
/// replicate the border.
pub fn warp_texture(
    texture: &GrayImage,
    h_mat: &na::Matrix3<f64>,
    w: u32,
    h: u32,
) -> na::DMatrix<f32> {
    let mut out = na::DMatrix::zeros(h as usize, w as usize);
    for r in 0..h {
        for c in 0..w {
            let p = apply_homography(h_mat, glam::Vec2::new(c as f32, r as f32));
            out[(r as usize, c as usize)] = bilinear_sample(texture, p.x, p.y);
        }
    }
    out
}

/// Grayscale crop as a float matrix. The rectangle must be inside the image.
pub fn crop_to_matrix(img: &GrayImage, x0: u32, y0: u32, w: u32, h: u32) -> na::DMatrix<f32> {
    let mut out = na::DMatrix::zeros(h as usize, w as usize);
    for r in 0..h {
        for c in 0..w {
            out[(r as usize, c as usize)] = img.get_pixel(x0 + c, y0 + r)[0] as f32;
        }
    }
    out
}

/// Binary coverage mask of a convex quad rasterized into a `w x h` buffer.
/// Quad vertices are in buffer coordinates, either winding order.
pub fn quad_mask(quad: &[glam::Vec2; 4], w: u32, h: u32) -> na::DMatrix<f32> {
    let mut out = na::DMatrix::zeros(h as usize, w as usize);
    for r in 0..h {
        for c in 0..w {
            let p = glam::Vec2::new(c as f32, r as f32);
            if point_in_convex_quad(quad, p) {
                out[(r as usize, c as usize)] = 1.0;
            }
        }
    }
    out
}

fn point_in_convex_quad(quad: &[glam::Vec2; 4], p: glam::Vec2) -> bool {
    let mut sign = 0.0f32;
    for i in 0..4 {
        let a = quad[i];
        let b = quad[(i + 1) % 4];
        let cross = (b - a).perp_dot(p - a);
        if cross != 0.0 {
            if sign == 0.0 {
                sign = cross.signum();
            } else if sign != cross.signum() {
                return false;
            }
        }
    }
    true
}

/// Slide `template` over `roi` and score each placement by masked SSD.
/// Returns the response surface and the location of its minimum, or None
/// when the template does not fit inside the ROI.
pub fn match_template_ssd(
    roi: &na::DMatrix<f32>,
    template: &na::DMatrix<f32>,
    mask: &na::DMatrix<f32>,
) -> Option<(na::DMatrix<f32>, (usize, usize))> {
    let (th, tw) = template.shape();
    let (rh, rw) = roi.shape();
    if th > rh || tw > rw {
        return None;
    }
    let out_h = rh - th + 1;
    let out_w = rw - tw + 1;
    let mut response = na::DMatrix::zeros(out_h, out_w);
    let mut best = (0usize, 0usize);
    let mut best_v = f32::MAX;
    for r in 0..out_h {
        for c in 0..out_w {
            let mut acc = 0.0f32;
            for tr in 0..th {
                for tc in 0..tw {
                    let d = roi[(r + tr, c + tc)] - template[(tr, tc)];
                    acc += mask[(tr, tc)] * d * d;
                }
            }
            response[(r, c)] = acc;
            if acc < best_v {
                best_v = acc;
                best = (r, c);
            }
        }
    }
    Some((response, best))
}

/// Mutual information between two equally sized patches over the masked
/// pixels, from a 32x32-bin joint intensity histogram, in nats.
pub fn mutual_information(
    a: &na::DMatrix<f32>,
    b: &na::DMatrix<f32>,
    mask: &na::DMatrix<f32>,
) -> f32 {
    debug_assert_eq!(a.shape(), b.shape());
    let mut joint = [[0.0f64; MI_BINS]; MI_BINS];
    let mut count = 0.0f64;
    for (idx, &m) in mask.iter().enumerate() {
        if m <= 0.0 {
            continue;
        }
        let ba = bin_of(a[idx]);
        let bb = bin_of(b[idx]);
        joint[ba][bb] += 1.0;
        count += 1.0;
    }
    if count == 0.0 {
        return 0.0;
    }

    let mut pa = [0.0f64; MI_BINS];
    let mut pb = [0.0f64; MI_BINS];
    for i in 0..MI_BINS {
        for j in 0..MI_BINS {
            joint[i][j] /= count;
            pa[i] += joint[i][j];
            pb[j] += joint[i][j];
        }
    }
    let mut mi = 0.0f64;
    for i in 0..MI_BINS {
        for j in 0..MI_BINS {
            let p = joint[i][j];
            if p > 0.0 {
                mi += p * (p / (pa[i] * pb[j])).ln();
            }
        }
    }
    mi as f32
}

fn bin_of(v: f32) -> usize {
    ((v / 256.0 * MI_BINS as f32) as usize).min(MI_BINS - 1)
}

/// Slide `template` over `roi` and score each placement by masked mutual
/// information. Returns the response surface and the location of its
/// maximum.
pub fn match_template_mi(
    roi: &na::DMatrix<f32>,
    template: &na::DMatrix<f32>,
    mask: &na::DMatrix<f32>,
) -> Option<(na::DMatrix<f32>, (usize, usize))> {
    let (th, tw) = template.shape();
    let (rh, rw) = roi.shape();
    if th > rh || tw > rw {
        return None;
    }
    let out_h = rh - th + 1;
    let out_w = rw - tw + 1;
    let mut response = na::DMatrix::zeros(out_h, out_w);
    let mut best = (0usize, 0usize);
    let mut best_v = f32::MIN;
    for r in 0..out_h {
        for c in 0..out_w {
            let window = roi.view((r, c), (th, tw)).into_owned();
            let v = mutual_information(&window, template, mask);
            response[(r, c)] = v;
            if v > best_v {
                best_v = v;
                best = (r, c);
            }
        }
    }
    Some((response, best))
}

/// Sub-pixel refinement of an extremum by fitting a 1D parabola per axis
/// through the extremum and its two neighbors. Returns (col, row) in
/// response coordinates; at the response border the integer location is
/// kept.
pub fn parabolic_refine(response: &na::DMatrix<f32>, peak: (usize, usize)) -> (f32, f32) {
    let (r, c) = peak;
    let (h, w) = response.shape();
    let mut x = c as f32;
    let mut y = r as f32;
    if c > 0 && c + 1 < w {
        let denom = response[(r, c - 1)] - 2.0 * response[(r, c)] + response[(r, c + 1)];
        if denom.abs() > f32::EPSILON {
            let d = 0.5 * (response[(r, c - 1)] - response[(r, c + 1)]) / denom;
            x += d.clamp(-0.5, 0.5);
        }
    }
    if r > 0 && r + 1 < h {
        let denom = response[(r - 1, c)] - 2.0 * response[(r, c)] + response[(r + 1, c)];
        if denom.abs() > f32::EPSILON {
            let d = 0.5 * (response[(r - 1, c)] - response[(r + 1, c)]) / denom;
            y += d.clamp(-0.5, 0.5);
        }
    }
    (x, y)
}
