//! Camera models and distortion handling for PnP solvers.
use thiserror::Error;

/// Error types for camera operations.
#[derive(Debug, Error)]
pub enum CameraError {
    /// Invalid camera intrinsics matrix
    #[error("Invalid camera intrinsics matrix: {0}")]
    InvalidIntrinsics(String),

    /// Invalid distortion parameters
    #[error("Invalid distortion parameters: {0}")]
    InvalidDistortion(String),
}

/// Result type for camera operations.
pub type CameraResult<T> = Result<T, CameraError>;

/// Represents the intrinsic parameters of a pinhole camera.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraIntrinsics {
    /// Focal length in x direction
    pub fx: f32,
    /// Focal length in y direction
    pub fy: f32,
    /// Principal point x coordinate
    pub cx: f32,
    /// Principal point y coordinate
    pub cy: f32,
}

impl CameraIntrinsics {
    /// Create camera intrinsics from focal lengths and principal point.
    pub fn new(fx: f32, fy: f32, cx: f32, cy: f32) -> Self {
        Self { fx, fy, cx, cy }
    }

    /// Synthetic intrinsics for a video frame of the given pixel size.
    ///
    /// Assumes square pixels and no skew: both focal lengths are set to the
    /// frame width and the principal point sits at the frame center.
    ///
    /// ```
    /// use headpose_pnp::CameraIntrinsics;
    ///
    /// let k = CameraIntrinsics::from_frame_size(640.0, 480.0);
    /// assert_eq!(k.fx, 640.0);
    /// assert_eq!(k.fy, 640.0);
    /// assert_eq!(k.cx, 320.0);
    /// assert_eq!(k.cy, 240.0);
    /// ```
    pub fn from_frame_size(width: f32, height: f32) -> Self {
        Self {
            fx: width,
            fy: width,
            cx: width * 0.5,
            cy: height * 0.5,
        }
    }

    /// Create camera intrinsics from a 3x3 intrinsics matrix.
    pub fn from_matrix(k: &[[f32; 3]; 3]) -> CameraResult<Self> {
        // Check that the matrix has the expected form
        if k[0][1] != 0.0 || k[1][0] != 0.0 || k[2][0] != 0.0 || k[2][1] != 0.0 || k[2][2] != 1.0 {
            return Err(CameraError::InvalidIntrinsics(
                "Intrinsics matrix must have form [[fx, 0, cx], [0, fy, cy], [0, 0, 1]]".to_string(),
            ));
        }

        Ok(Self {
            fx: k[0][0],
            fy: k[1][1],
            cx: k[0][2],
            cy: k[1][2],
        })
    }

    /// Convert to 3x3 intrinsics matrix.
    pub fn to_matrix(&self) -> [[f32; 3]; 3] {
        [
            [self.fx, 0.0, self.cx],
            [0.0, self.fy, self.cy],
            [0.0, 0.0, 1.0],
        ]
    }
}

/// Radial-tangential distortion coefficients in the 4-parameter
/// `[k1, k2, p1, p2]` layout.
#[derive(Debug, Clone, PartialEq)]
pub struct DistortionCoeffs {
    /// First radial distortion coefficient
    pub k1: f32,
    /// Second radial distortion coefficient
    pub k2: f32,
    /// First tangential distortion coefficient
    pub p1: f32,
    /// Second tangential distortion coefficient
    pub p2: f32,
}

impl DistortionCoeffs {
    /// All coefficients set to zero (no distortion).
    pub fn none() -> Self {
        Self {
            k1: 0.0,
            k2: 0.0,
            p1: 0.0,
            p2: 0.0,
        }
    }

    /// Distortion with only the two radial coefficients.
    pub fn radial(k1: f32, k2: f32) -> Self {
        Self {
            k1,
            k2,
            p1: 0.0,
            p2: 0.0,
        }
    }

    /// Coefficients as a `[k1, k2, p1, p2]` array.
    pub fn as_array(&self) -> [f32; 4] {
        [self.k1, self.k2, self.p1, self.p2]
    }

    /// Check if there is any distortion.
    pub fn has_distortion(&self) -> bool {
        self.k1 != 0.0 || self.k2 != 0.0 || self.p1 != 0.0 || self.p2 != 0.0
    }
}

/// A complete camera model with intrinsics and optional distortion.
#[derive(Debug, Clone)]
pub struct CameraModel {
    /// Camera intrinsics
    pub intrinsics: CameraIntrinsics,
    /// Distortion parameters (None for no distortion)
    pub distortion: Option<DistortionCoeffs>,
}

impl CameraModel {
    /// Create a camera model without distortion.
    pub fn pinhole(intrinsics: CameraIntrinsics) -> Self {
        Self {
            intrinsics,
            distortion: None,
        }
    }

    /// Create a camera model with distortion.
    pub fn with_distortion(intrinsics: CameraIntrinsics, distortion: DistortionCoeffs) -> Self {
        Self {
            intrinsics,
            distortion: Some(distortion),
        }
    }

    /// Check if the camera has distortion.
    pub fn has_distortion(&self) -> bool {
        self.distortion.as_ref().is_some_and(|d| d.has_distortion())
    }

    /// Undistort a pixel coordinate using the iterative method.
    pub fn undistort_point(&self, x: f32, y: f32) -> (f32, f32) {
        match &self.distortion {
            Some(distortion) if distortion.has_distortion() => {
                self.undistort_point_iterative(x, y, distortion)
            }
            _ => (x, y),
        }
    }

    /// Undistort multiple pixel coordinates.
    pub fn undistort_points(&self, points: &[[f32; 2]]) -> Vec<[f32; 2]> {
        points
            .iter()
            .map(|&[x, y]| {
                let (ux, uy) = self.undistort_point(x, y);
                [ux, uy]
            })
            .collect()
    }

    /// Apply distortion to a pixel coordinate.
    pub fn distort_point(&self, x: f32, y: f32) -> (f32, f32) {
        match &self.distortion {
            Some(distortion) if distortion.has_distortion() => {
                self.distort_point_polynomial(x, y, distortion)
            }
            _ => (x, y),
        }
    }

    /// Get the intrinsics matrix for use with the PnP solvers.
    pub fn intrinsics_matrix(&self) -> [[f32; 3]; 3] {
        self.intrinsics.to_matrix()
    }

    /// Iterative undistortion for the radial-tangential model.
    fn undistort_point_iterative(
        &self,
        x_distorted: f32,
        y_distorted: f32,
        distortion: &DistortionCoeffs,
    ) -> (f32, f32) {
        let fx = self.intrinsics.fx;
        let fy = self.intrinsics.fy;
        let cx = self.intrinsics.cx;
        let cy = self.intrinsics.cy;

        // Normalize coordinates
        let x = (x_distorted - cx) / fx;
        let y = (y_distorted - cy) / fy;

        // Initial guess: assume no distortion
        let mut xu = x;
        let mut yu = y;

        const MAX_ITERATIONS: usize = 10;
        const EPSILON: f32 = 1e-6;

        for _ in 0..MAX_ITERATIONS {
            let (xd, yd) = distort_normalized(xu, yu, distortion);

            let dx = x - xd;
            let dy = y - yd;

            xu += dx;
            yu += dy;

            if dx.abs() < EPSILON && dy.abs() < EPSILON {
                break;
            }
        }

        (fx * xu + cx, fy * yu + cy)
    }

    /// Apply radial-tangential distortion to a pixel coordinate.
    fn distort_point_polynomial(
        &self,
        x: f32,
        y: f32,
        distortion: &DistortionCoeffs,
    ) -> (f32, f32) {
        let fx = self.intrinsics.fx;
        let fy = self.intrinsics.fy;
        let cx = self.intrinsics.cx;
        let cy = self.intrinsics.cy;

        let xn = (x - cx) / fx;
        let yn = (y - cy) / fy;

        let (xd, yd) = distort_normalized(xn, yn, distortion);

        (fx * xd + cx, fy * yd + cy)
    }
}

/// Distort a normalized image coordinate with the `[k1, k2, p1, p2]` model.
fn distort_normalized(x: f32, y: f32, distortion: &DistortionCoeffs) -> (f32, f32) {
    let r2 = x * x + y * y;
    let r4 = r2 * r2;

    let kr = 1.0 + distortion.k1 * r2 + distortion.k2 * r4;

    let x_2 = 2.0 * x;
    let y_2 = 2.0 * y;
    let xy_2 = x_2 * y;

    let xd = x * kr + xy_2 * distortion.p1 + distortion.p2 * (r2 + x_2 * x);
    let yd = y * kr + distortion.p1 * (r2 + y_2 * y) + xy_2 * distortion.p2;

    (xd, yd)
}

impl Default for CameraModel {
    fn default() -> Self {
        Self::pinhole(CameraIntrinsics::new(1000.0, 1000.0, 640.0, 480.0))
    }
}
