use nalgebra as na;
use num_dual::DualDVec64;
use serde::{Deserialize, Serialize};

/// Pinhole projection with the 5-coefficient radial/tangential distortion
/// model (k1, k2, p1, p2, k3). Generic over the scalar so the same projection
/// code runs on dual numbers inside the solver factors.
#[derive(Clone, Debug)]
pub struct PinholeCamera<T: na::RealField + Clone> {
    pub fx: T,
    pub fy: T,
    pub cx: T,
    pub cy: T,
    pub dist: [T; 5],
}

impl<T: na::RealField + Clone> PinholeCamera<T> {
    /// Project a camera-frame point to pixel coordinates. Total function; the
    /// caller is responsible for cheirality checks where they matter.
    pub fn project_one(&self, pt: &na::Vector3<T>) -> na::Vector2<T> {
        let x = pt[0].clone() / pt[2].clone();
        let y = pt[1].clone() / pt[2].clone();

        let k1 = &self.dist[0];
        let k2 = &self.dist[1];
        let p1 = &self.dist[2];
        let p2 = &self.dist[3];
        let k3 = &self.dist[4];
        let two = T::from_f64(2.0).unwrap();

        let r2 = x.clone() * x.clone() + y.clone() * y.clone();
        let r4 = r2.clone() * r2.clone();
        let r6 = r4.clone() * r2.clone();
        let radial = T::from_f64(1.0).unwrap()
            + k1.clone() * r2.clone()
            + k2.clone() * r4
            + k3.clone() * r6;

        let xd = x.clone() * radial.clone()
            + two.clone() * p1.clone() * x.clone() * y.clone()
            + p2.clone() * (r2.clone() + two.clone() * x.clone() * x.clone());
        let yd = y.clone() * radial
            + p1.clone() * (r2 + two.clone() * y.clone() * y.clone())
            + two * p2.clone() * x * y;

        na::Vector2::new(
            self.fx.clone() * xd + self.cx.clone(),
            self.fy.clone() * yd + self.cy.clone(),
        )
    }
}

impl PinholeCamera<f64> {
    pub fn cast(&self) -> PinholeCamera<DualDVec64> {
        PinholeCamera {
            fx: DualDVec64::from_re(self.fx),
            fy: DualDVec64::from_re(self.fy),
            cx: DualDVec64::from_re(self.cx),
            cy: DualDVec64::from_re(self.cy),
            dist: [
                DualDVec64::from_re(self.dist[0]),
                DualDVec64::from_re(self.dist[1]),
                DualDVec64::from_re(self.dist[2]),
                DualDVec64::from_re(self.dist[3]),
                DualDVec64::from_re(self.dist[4]),
            ],
        }
    }

    /// Undistort a pixel into normalized image-plane coordinates (z = 1).
    /// Fixed-point iteration on the distortion model; converges in a handful
    /// of steps for moderate distortion.
    pub fn unproject_one(&self, p2d: &na::Vector2<f64>) -> na::Vector3<f64> {
        let u = (p2d[0] - self.cx) / self.fx;
        let v = (p2d[1] - self.cy) / self.fy;
        let (k1, k2, p1, p2, k3) = (
            self.dist[0],
            self.dist[1],
            self.dist[2],
            self.dist[3],
            self.dist[4],
        );

        let mut x = u;
        let mut y = v;
        for _ in 0..8 {
            let r2 = x * x + y * y;
            let radial = 1.0 + k1 * r2 + k2 * r2 * r2 + k3 * r2 * r2 * r2;
            let dx = 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x);
            let dy = p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y;
            x = (u - dx) / radial;
            y = (v - dy) / radial;
        }
        na::Vector3::new(x, y, 1.0)
    }
}

/// Intrinsic calibration as read from the configuration file. Read-only
/// during tracking; rescaled when the input resolution changes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Calibration {
    pub image_width: u32,
    pub image_height: u32,
    pub camera_matrix: [[f64; 3]; 3],
    pub distortion_coefficients: Vec<f64>,
}

#[derive(Debug)]
pub enum CalibrationError {
    Io { path: String, source: std::io::Error },
    Parse { path: String, source: serde_json::Error },
    BadDistortion { len: usize },
}

impl std::fmt::Display for CalibrationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CalibrationError::Io { path, source } => {
                write!(f, "failed to open calibration file {path}: {source}")
            }
            CalibrationError::Parse { path, source } => {
                write!(f, "failed to parse calibration file {path}: {source}")
            }
            CalibrationError::BadDistortion { len } => {
                write!(f, "expected at most 5 distortion coefficients, got {len}")
            }
        }
    }
}

impl std::error::Error for CalibrationError {}

impl Calibration {
    /// Load the calibration from a JSON file. A missing or malformed file is
    /// a configuration error; there is no silent default.
    pub fn from_file(path: &str) -> Result<Calibration, CalibrationError> {
        let contents = std::fs::read_to_string(path).map_err(|source| CalibrationError::Io {
            path: path.to_string(),
            source,
        })?;
        let calib: Calibration =
            serde_json::from_str(&contents).map_err(|source| CalibrationError::Parse {
                path: path.to_string(),
                source,
            })?;
        if calib.distortion_coefficients.len() > 5 {
            return Err(CalibrationError::BadDistortion {
                len: calib.distortion_coefficients.len(),
            });
        }
        Ok(calib)
    }

    pub fn to_file(&self, path: &str) -> Result<(), CalibrationError> {
        let j = serde_json::to_string_pretty(self).map_err(|source| CalibrationError::Parse {
            path: path.to_string(),
            source,
        })?;
        std::fs::write(path, j).map_err(|source| CalibrationError::Io {
            path: path.to_string(),
            source,
        })
    }

    pub fn image_size(&self) -> (u32, u32) {
        (self.image_width, self.image_height)
    }

    pub fn camera(&self) -> PinholeCamera<f64> {
        let mut dist = [0.0; 5];
        for (d, &c) in dist.iter_mut().zip(self.distortion_coefficients.iter()) {
            *d = c;
        }
        PinholeCamera {
            fx: self.camera_matrix[0][0],
            fy: self.camera_matrix[1][1],
            cx: self.camera_matrix[0][2],
            cy: self.camera_matrix[1][2],
            dist,
        }
    }

    /// Scale the intrinsics for a new input resolution.
    pub fn rescale(&mut self, new_width: u32, new_height: u32) {
        let sx = new_width as f64 / self.image_width as f64;
        let sy = new_height as f64 / self.image_height as f64;
        self.camera_matrix[0][0] *= sx;
        self.camera_matrix[0][2] *= sx;
        self.camera_matrix[1][1] *= sy;
        self.camera_matrix[1][2] *= sy;
        self.image_width = new_width;
        self.image_height = new_height;
    }
}
