#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! # Head-pose PnP
//!
//! Camera pose estimation from 2D-3D facial-landmark correspondences.
//!
//! ## Key Features
//!
//! - **EPnP Algorithm**: Efficient Perspective-n-Point solver for the initial pose
//! - **LM Refinement**: Levenberg–Marquardt polish and warm-started tracking
//! - **Face-mesh entry point**: fixed 468-landmark contract with synthetic
//!   frame-size intrinsics
//! - **Pluggable solvers**: extensible framework for different PnP methods
//!
//! ## Example: Basic EPnP
//!
//! ```rust
//! use headpose_pnp::{solve_pnp, PnPMethod};
//!
//! // 3D model points
//! let world = vec![
//!     [0.0315, 0.03333, -0.10409],
//!     [-0.0315, 0.03333, -0.10409],
//!     [0.0, -0.00102, -0.12977],
//!     [0.02646, -0.03167, -0.1053],
//!     [-0.02646, -0.031667, -0.1053],
//!     [0.0, 0.04515, -0.11033],
//! ];
//!
//! // Corresponding 2D image points
//! let image = vec![
//!     [722.96466, 502.0828],
//!     [669.88837, 498.61877],
//!     [707.0025, 478.48975],
//!     [728.05634, 447.56918],
//!     [682.6069, 443.91776],
//!     [696.4414, 511.96442],
//! ];
//!
//! // Camera intrinsics (3x3 matrix)
//! let k = [
//!     [800.0, 0.0, 640.0],
//!     [0.0, 800.0, 480.0],
//!     [0.0, 0.0, 1.0],
//! ];
//!
//! // Solve for camera pose
//! let result = solve_pnp(&world, &image, &k, None, PnPMethod::EPnPDefault)?;
//!
//! assert!(result.translation[2] > 0.0);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Example: Head pose from a landmark frame
//!
//! The face-mesh entry point derives the intrinsics from the frame size and
//! enforces the fixed landmark count:
//!
//! ```rust
//! use headpose_pnp::{estimate_head_pose, HeadPoseParams, FACE_MESH_LANDMARKS};
//!
//! let world = vec![[0.0f32; 3]; 10];
//! let image = vec![[0.0f32; 2]; 10];
//!
//! // 10 landmarks is not a face-mesh frame.
//! let result = estimate_head_pose(640.0, 480.0, &world, &image, None, &HeadPoseParams::default());
//! assert!(result.is_err());
//! ```

/// Camera intrinsics, distortion coefficients, and the camera model.
///
/// Includes the synthetic frame-size intrinsics used for head-pose frames.
pub mod camera;

/// Efficient Perspective-n-Point (EPnP) solver implementation.
///
/// A fast and accurate method for computing camera pose from 2D-3D correspondences.
pub mod epnp;

/// Head-pose estimation over the fixed face-mesh landmark topology.
pub mod face;

/// Common data types and traits for PnP solvers.
///
/// Defines the interface and result types shared across different PnP algorithms.
pub mod pnp;

/// Levenberg–Marquardt pose refinement.
pub mod refine;

/// Rigid alignment (Kabsch / Umeyama) between point sets.
pub mod rigid;

/// SO(3) helpers for Rodrigues-vector conversions.
pub mod so3;

mod ops;

pub use camera::{CameraError, CameraIntrinsics, CameraModel, DistortionCoeffs};
pub use epnp::{EPnP, EPnPParams};
pub use face::{
    estimate_head_pose, HeadPoseError, HeadPoseParams, PoseGuess, FACE_MESH_LANDMARKS,
};
pub use pnp::{NumericTol, PnPError, PnPResult, PnPSolver};
pub use refine::{refine_pose_lm, LMParams};
pub use so3::SO3;

/// Enumeration of the Perspective-n-Point algorithms available in this crate.
#[derive(Debug, Clone)]
pub enum PnPMethod {
    /// Efficient PnP solver with a user-supplied parameter object.
    EPnP(EPnPParams),
    /// Efficient PnP solver with the crate's default parameters.
    EPnPDefault,
    // Placeholder for future solvers such as P3P, DLS, etc.
}

/// Dispatch function that routes to the chosen PnP solver.
///
/// When `distortion` carries nonzero coefficients the image points are
/// undistorted before the solve; `k` must then have the plain pinhole form.
pub fn solve_pnp(
    world: &[[f32; 3]],
    image: &[[f32; 2]],
    k: &[[f32; 3]; 3],
    distortion: Option<&DistortionCoeffs>,
    method: PnPMethod,
) -> Result<PnPResult, PnPError> {
    let image_obs = match distortion {
        Some(d) if d.has_distortion() => {
            let intrinsics = CameraIntrinsics::from_matrix(k)
                .map_err(|e| PnPError::CameraError(e.to_string()))?;
            CameraModel::with_distortion(intrinsics, d.clone()).undistort_points(image)
        }
        _ => image.to_vec(),
    };

    match method {
        PnPMethod::EPnP(params) => EPnP::solve(world, &image_obs, k, &params),
        PnPMethod::EPnPDefault => EPnP::solve(world, &image_obs, k, &EPnPParams::default()),
    }
}
