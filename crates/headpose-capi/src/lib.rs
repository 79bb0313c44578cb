//! C ABI for the head-pose PnP solver.
//!
//! The exported `solvePnP` symbol keeps the parameter list of the original
//! native plugin so managed hosts can P/Invoke it unchanged. All buffers are
//! caller-owned; the library allocates nothing the caller has to manage and
//! holds no global state, so concurrent calls from multiple threads are safe
//! as long as each call uses distinct buffers — no internal locking is
//! performed.

use std::slice;

use headpose_pnp::{
    estimate_head_pose, CameraIntrinsics, DistortionCoeffs, HeadPoseError, HeadPoseParams,
    PnPError, PoseGuess, FACE_MESH_LANDMARKS,
};
use log::debug;

/// Outcome of a [`solvePnP`] call.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PoseStatus {
    /// Pose written to the output buffers.
    Ok = 0,
    /// Null pointer, wrong landmark count, or unusable frame dimensions.
    InvalidInput = 1,
    /// The optimization failed to converge to a usable pose.
    SolverDivergence = 2,
    /// Scratch state could not be constructed. All scratch buffers in this
    /// implementation are stack-allocated, so this status is never produced;
    /// it stays in the enum so the numeric contract has a slot for it.
    AllocationFailure = 3,
}

impl From<&HeadPoseError> for PoseStatus {
    fn from(err: &HeadPoseError) -> Self {
        match err {
            HeadPoseError::LandmarkCount { .. } | HeadPoseError::InvalidFrameSize { .. } => {
                PoseStatus::InvalidInput
            }
            HeadPoseError::Solver(e) => match e {
                PnPError::InsufficientCorrespondences { .. }
                | PnPError::MismatchedArrayLengths { .. } => PoseStatus::InvalidInput,
                PnPError::SvdFailed(_) | PnPError::CameraError(_) | PnPError::Diverged { .. } => {
                    PoseStatus::SolverDivergence
                }
            },
        }
    }
}

/// Install an `env_logger` backend for the library's `log` output.
///
/// Optional; hosts that want solver diagnostics call this once at startup and
/// control verbosity through `RUST_LOG`. Safe to call more than once.
#[no_mangle]
pub extern "C" fn headpose_init_logging() {
    let _ = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info"),
    )
    .try_init();
}

/// Estimate head pose from one frame of face-mesh landmarks.
///
/// * `object_points` — 468 landmarks of the canonical face model, row-major
///   `[x, y, z]` triples.
/// * `image_points` — the corresponding detections in pixels, row-major
///   `[u, v]` pairs.
/// * `camera_matrix_out` — receives the intrinsics derived from the frame
///   size (9 floats, row-major).
/// * `dist_coeffs_out` — receives the 4 distortion coefficients (all zero;
///   lens distortion is unmodeled).
/// * `rvec` / `tvec` — pose output. When `use_extrinsic_guess` is set they
///   must hold an initial pose on entry, which is refined instead of solving
///   from scratch. On any non-`Ok` status they are left untouched.
///
/// # Safety
///
/// Pointers must either be null (rejected with `InvalidInput`) or valid for
/// the stated number of floats. `object_points` and `image_points` must hold
/// exactly 468 entries; shorter buffers are undefined behavior the library
/// cannot detect through the fixed-size ABI.
#[no_mangle]
#[allow(non_snake_case)]
pub unsafe extern "C" fn solvePnP(
    width: f32,
    height: f32,
    object_points: *const f32,
    image_points: *const f32,
    camera_matrix_out: *mut f32,
    dist_coeffs_out: *mut f32,
    rvec: *mut f32,
    tvec: *mut f32,
    use_extrinsic_guess: bool,
) -> PoseStatus {
    if object_points.is_null()
        || image_points.is_null()
        || camera_matrix_out.is_null()
        || dist_coeffs_out.is_null()
        || rvec.is_null()
        || tvec.is_null()
    {
        return PoseStatus::InvalidInput;
    }
    if !(width.is_finite() && height.is_finite() && width > 0.0 && height > 0.0) {
        return PoseStatus::InvalidInput;
    }

    let world =
        unsafe { slice::from_raw_parts(object_points as *const [f32; 3], FACE_MESH_LANDMARKS) };
    let image =
        unsafe { slice::from_raw_parts(image_points as *const [f32; 2], FACE_MESH_LANDMARKS) };

    // The derived intrinsics and the zero distortion vector are observable
    // through the out-slots the ABI reserves for them.
    let k = CameraIntrinsics::from_frame_size(width, height).to_matrix();
    let cam_out = unsafe { slice::from_raw_parts_mut(camera_matrix_out, 9) };
    for (row, chunk) in k.iter().zip(cam_out.chunks_exact_mut(3)) {
        chunk.copy_from_slice(row);
    }
    let dist_out = unsafe { slice::from_raw_parts_mut(dist_coeffs_out, 4) };
    dist_out.copy_from_slice(&DistortionCoeffs::none().as_array());

    let guess = if use_extrinsic_guess {
        let r = unsafe { slice::from_raw_parts(rvec as *const f32, 3) };
        let t = unsafe { slice::from_raw_parts(tvec as *const f32, 3) };
        Some(PoseGuess {
            rvec: [r[0], r[1], r[2]],
            tvec: [t[0], t[1], t[2]],
        })
    } else {
        None
    };

    match estimate_head_pose(width, height, world, image, guess, &HeadPoseParams::default()) {
        Ok(pose) => {
            unsafe {
                slice::from_raw_parts_mut(rvec, 3).copy_from_slice(&pose.rvec);
                slice::from_raw_parts_mut(tvec, 3).copy_from_slice(&pose.translation);
            }
            PoseStatus::Ok
        }
        Err(err) => {
            debug!("solvePnP failed: {err}");
            PoseStatus::from(&err)
        }
    }
}
