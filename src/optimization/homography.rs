use faer::linalg::solvers::SolveLstsqCore;
use nalgebra as na;

/// Homography from exactly four point pairs, h33 fixed to 1.
///
/// Stacks the eight DLT equations and solves the 8x8 system by QR. Returns
/// None when the four source points are (nearly) collinear and the system
/// has no stable solution.
pub fn homography_from_4pt(
    src: &[glam::Vec2; 4],
    dst: &[glam::Vec2; 4],
) -> Option<na::Matrix3<f64>> {
    let mut a: faer::Mat<f64> = faer::Mat::zeros(8, 8);
    let mut b: faer::Mat<f64> = faer::Mat::zeros(8, 1);
    for (i, (s, d)) in src.iter().zip(dst.iter()).enumerate() {
        let (x, y) = (s.x as f64, s.y as f64);
        let (u, v) = (d.x as f64, d.y as f64);
        unsafe {
            *a.get_mut_unchecked(i * 2, 0) = x;
            *a.get_mut_unchecked(i * 2, 1) = y;
            *a.get_mut_unchecked(i * 2, 2) = 1.0;
            *a.get_mut_unchecked(i * 2, 6) = -u * x;
            *a.get_mut_unchecked(i * 2, 7) = -u * y;
            *b.get_mut_unchecked(i * 2, 0) = u;

            *a.get_mut_unchecked(i * 2 + 1, 3) = x;
            *a.get_mut_unchecked(i * 2 + 1, 4) = y;
            *a.get_mut_unchecked(i * 2 + 1, 5) = 1.0;
            *a.get_mut_unchecked(i * 2 + 1, 6) = -v * x;
            *a.get_mut_unchecked(i * 2 + 1, 7) = -v * y;
            *b.get_mut_unchecked(i * 2 + 1, 0) = v;
        }
    }

    let mut x = b;
    a.qr()
        .solve_lstsq_in_place_with_conj(faer::Conj::No, x.as_mut());

    let h = na::Matrix3::new(
        *x.get(0, 0),
        *x.get(1, 0),
        *x.get(2, 0),
        *x.get(3, 0),
        *x.get(4, 0),
        *x.get(5, 0),
        *x.get(6, 0),
        *x.get(7, 0),
        1.0,
    );
    if h.iter().any(|v| !v.is_finite()) {
        return None;
    }

    // Collinear inputs leave the lstsq solution meaningless even when it is
    // finite; check that it actually maps the inputs.
    for (s, d) in src.iter().zip(dst.iter()) {
        let p = apply_homography(&h, *s);
        if (p - *d).length() > 1e-2 {
            return None;
        }
    }
    Some(h)
}

pub fn apply_homography(h: &na::Matrix3<f64>, pt: glam::Vec2) -> glam::Vec2 {
    let v = h * na::Vector3::new(pt.x as f64, pt.y as f64, 1.0);
    glam::Vec2::new((v[0] / v[2]) as f32, (v[1] / v[2]) as f32)
}
