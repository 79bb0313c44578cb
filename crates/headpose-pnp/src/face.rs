//! Head-pose estimation from a fixed face-mesh landmark set.
//!
//! The landmark detector feeding this crate emits a fixed topology of
//! [`FACE_MESH_LANDMARKS`] points per frame. This module pins that contract
//! down: it validates the landmark count, derives synthetic pinhole
//! intrinsics from the frame size, and hands the correspondences to the
//! configured PnP solver.

use glam::Vec3;
use thiserror::Error;

use crate::camera::{CameraIntrinsics, DistortionCoeffs};
use crate::epnp::EPnPParams;
use crate::ops::mat3_to_rows;
use crate::pnp::{PnPError, PnPResult};
use crate::refine::{refine_pose_lm, LMParams};
use crate::so3::SO3;
use crate::{solve_pnp, PnPMethod};

/// Number of landmarks in the face-mesh topology this crate consumes.
///
/// The value is a contract with the upstream landmark detector; the solver
/// itself attaches no meaning to individual indices.
pub const FACE_MESH_LANDMARKS: usize = 468;

/// Error types for the head-pose entry point.
#[derive(Debug, Error)]
pub enum HeadPoseError {
    /// The landmark slices do not match the face-mesh topology.
    #[error("expected {expected} facial landmarks, got {actual}")]
    LandmarkCount {
        /// Landmark count required by the face-mesh contract
        expected: usize,
        /// Landmark count actually supplied
        actual: usize,
    },

    /// Frame dimensions unusable for deriving intrinsics.
    #[error("frame dimensions must be positive and finite, got {width}x{height}")]
    InvalidFrameSize {
        /// Supplied frame width in pixels
        width: f32,
        /// Supplied frame height in pixels
        height: f32,
    },

    /// The underlying PnP solve failed.
    #[error(transparent)]
    Solver(#[from] PnPError),
}

/// Initial pose estimate used to seed iterative refinement.
#[derive(Debug, Clone, Copy)]
pub struct PoseGuess {
    /// Rodrigues axis-angle rotation.
    pub rvec: [f32; 3],
    /// Translation vector.
    pub tvec: [f32; 3],
}

/// Parameters for [`estimate_head_pose`].
#[derive(Debug, Clone)]
pub struct HeadPoseParams {
    /// PnP method used when solving from scratch.
    pub method: PnPMethod,
    /// Levenberg–Marquardt settings for the refinement stage.
    pub refine: LMParams,
    /// Reprojection RMSE (pixels) above which the solve is reported as
    /// diverged. Real landmark tracks sit well below this; the threshold only
    /// catches blown-up solutions.
    pub max_rmse_px: f32,
}

impl Default for HeadPoseParams {
    fn default() -> Self {
        Self {
            method: PnPMethod::EPnPDefault,
            refine: LMParams::default(),
            max_rmse_px: 1e3,
        }
    }
}

/// Estimate head pose from one frame of face-mesh landmarks.
///
/// Builds synthetic intrinsics from the frame size (focal length equal to
/// the frame width, principal point at the frame center, zero distortion)
/// and solves for the rotation/translation that maps the canonical face
/// model onto the observed pixel coordinates.
///
/// With a `guess`, the supplied pose is refined iteratively instead of
/// solving from scratch; without one, the configured method produces the
/// initial pose which is then refined.
///
/// Each call is independent and touches no shared state, so concurrent
/// calls from multiple threads are safe.
///
/// ```
/// use headpose_pnp::{estimate_head_pose, HeadPoseError, HeadPoseParams};
///
/// let world = vec![[0.0f32; 3]; 10];
/// let image = vec![[0.0f32; 2]; 10];
/// let result = estimate_head_pose(640.0, 480.0, &world, &image, None, &HeadPoseParams::default());
/// assert!(matches!(result, Err(HeadPoseError::LandmarkCount { actual: 10, .. })));
/// ```
pub fn estimate_head_pose(
    width: f32,
    height: f32,
    landmarks_world: &[[f32; 3]],
    landmarks_image: &[[f32; 2]],
    guess: Option<PoseGuess>,
    params: &HeadPoseParams,
) -> Result<PnPResult, HeadPoseError> {
    if landmarks_world.len() != FACE_MESH_LANDMARKS {
        return Err(HeadPoseError::LandmarkCount {
            expected: FACE_MESH_LANDMARKS,
            actual: landmarks_world.len(),
        });
    }
    if landmarks_image.len() != FACE_MESH_LANDMARKS {
        return Err(HeadPoseError::LandmarkCount {
            expected: FACE_MESH_LANDMARKS,
            actual: landmarks_image.len(),
        });
    }
    if !(width.is_finite() && height.is_finite() && width > 0.0 && height > 0.0) {
        return Err(HeadPoseError::InvalidFrameSize { width, height });
    }

    let k = CameraIntrinsics::from_frame_size(width, height).to_matrix();
    let distortion = DistortionCoeffs::none();

    let result = match guess {
        Some(g) => {
            let mut rvec = g.rvec;
            let mut tvec = g.tvec;
            let (rmse, iters, converged) = refine_pose_lm(
                landmarks_world,
                landmarks_image,
                &k,
                &mut rvec,
                &mut tvec,
                &params.refine,
            )?;
            PnPResult {
                rotation: mat3_to_rows(&SO3::exp(Vec3::from_array(rvec)).matrix()),
                translation: tvec,
                rvec,
                reproj_rmse: Some(rmse),
                num_iterations: Some(iters),
                converged: Some(converged),
            }
        }
        None => {
            let method = match &params.method {
                PnPMethod::EPnP(p) => PnPMethod::EPnP(EPnPParams {
                    refine_lm: Some(params.refine.clone()),
                    ..p.clone()
                }),
                PnPMethod::EPnPDefault => PnPMethod::EPnP(EPnPParams {
                    refine_lm: Some(params.refine.clone()),
                    ..EPnPParams::default()
                }),
            };
            solve_pnp(
                landmarks_world,
                landmarks_image,
                &k,
                Some(&distortion),
                method,
            )?
        }
    };

    check_usable(&result, params.max_rmse_px)?;
    Ok(result)
}

/// Reject blown-up solutions instead of handing them back to the caller.
fn check_usable(result: &PnPResult, max_rmse_px: f32) -> Result<(), PnPError> {
    let rmse = result.reproj_rmse.unwrap_or(f32::INFINITY);
    let finite = result.rvec.iter().all(|v| v.is_finite())
        && result.translation.iter().all(|v| v.is_finite());

    if !finite || !rmse.is_finite() || rmse > max_rmse_px {
        return Err(PnPError::Diverged {
            rmse,
            iterations: result.num_iterations.unwrap_or(0),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_short_landmark_slices() {
        let world = vec![[0.0f32; 3]; 10];
        let image = vec![[0.0f32; 2]; 10];
        let res = estimate_head_pose(
            640.0,
            480.0,
            &world,
            &image,
            None,
            &HeadPoseParams::default(),
        );
        assert!(matches!(
            res,
            Err(HeadPoseError::LandmarkCount {
                expected: FACE_MESH_LANDMARKS,
                actual: 10
            })
        ));
    }

    #[test]
    fn rejects_bad_frame_sizes() {
        let world = vec![[0.0f32; 3]; FACE_MESH_LANDMARKS];
        let image = vec![[0.0f32; 2]; FACE_MESH_LANDMARKS];
        for (w, h) in [(0.0, 480.0), (-640.0, 480.0), (640.0, f32::NAN)] {
            let res = estimate_head_pose(w, h, &world, &image, None, &HeadPoseParams::default());
            assert!(matches!(res, Err(HeadPoseError::InvalidFrameSize { .. })));
        }
    }

    #[test]
    fn mismatched_slice_lengths_are_rejected() {
        let world = vec![[0.0f32; 3]; FACE_MESH_LANDMARKS];
        let image = vec![[0.0f32; 2]; FACE_MESH_LANDMARKS - 1];
        let res = estimate_head_pose(
            640.0,
            480.0,
            &world,
            &image,
            None,
            &HeadPoseParams::default(),
        );
        assert!(matches!(res, Err(HeadPoseError::LandmarkCount { .. })));
    }
}
