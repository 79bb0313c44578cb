//! Rigid alignment utilities (Kabsch / Umeyama)

// Accumulate in f64 for a stable decomposition, then cast back to f32.
use glam::Vec3;
use nalgebra::{Matrix3, Vector3};
use thiserror::Error;

/// Rotation (R), translation (t), and scale (s) output of Umeyama without scaling (s = 1).
pub type UmeyamaOutput = ([[f32; 3]; 3], [f32; 3], f32);

/// Error type for Umeyama rigid alignment operations.
#[derive(Debug, Error)]
pub enum UmeyamaError {
    /// Source and destination arrays must have the same length
    #[error("Source and destination arrays must have the same length")]
    MismatchedInputLengths,

    /// The covariance decomposition did not produce both factor matrices
    #[error("SVD of the cross-covariance matrix failed")]
    SvdFailed,
}

/// Result type alias for Umeyama.
pub type UmeyamaResult = Result<UmeyamaOutput, UmeyamaError>;

/// Umeyama/Kabsch algorithm without scale.
/// Returns (R, t, s) where s == 1.0 and `dst ≈ R * src + t`.
pub fn umeyama(src: &[Vec3], dst: &[Vec3]) -> UmeyamaResult {
    if src.len() != dst.len() {
        return Err(UmeyamaError::MismatchedInputLengths);
    }
    let n = src.len() as f64;

    let mut mu_s = Vector3::<f64>::zeros();
    let mut mu_d = Vector3::<f64>::zeros();
    for (s, d) in src.iter().zip(dst.iter()) {
        mu_s += Vector3::new(s.x as f64, s.y as f64, s.z as f64);
        mu_d += Vector3::new(d.x as f64, d.y as f64, d.z as f64);
    }
    mu_s /= n;
    mu_d /= n;

    // Cross-covariance H = sum (dst_i - mu_d)(src_i - mu_s)^T / n
    let mut h = Matrix3::<f64>::zeros();
    for (s, d) in src.iter().zip(dst.iter()) {
        let sc = Vector3::new(s.x as f64, s.y as f64, s.z as f64) - mu_s;
        let dc = Vector3::new(d.x as f64, d.y as f64, d.z as f64) - mu_d;
        h += dc * sc.transpose();
    }
    h /= n;

    let svd = h.svd(true, true);
    let u = svd.u.ok_or(UmeyamaError::SvdFailed)?;
    let v_t = svd.v_t.ok_or(UmeyamaError::SvdFailed)?;

    // Standard Kabsch: R = U V^T, with a reflection fix when det < 0.
    let d = (u * v_t).determinant();
    let r = if d < 0.0 {
        u * Matrix3::from_diagonal(&Vector3::new(1.0, 1.0, -1.0)) * v_t
    } else {
        u * v_t
    };

    let t = mu_d - r * mu_s;

    let mut r_arr = [[0.0f32; 3]; 3];
    for (row, out) in r_arr.iter_mut().enumerate() {
        for (col, val) in out.iter_mut().enumerate() {
            *val = r[(row, col)] as f32;
        }
    }

    Ok((r_arr, [t.x as f32, t.y as f32, t.z as f32], 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn recovers_known_rigid_transform() {
        // Rotation of 90 degrees around z plus a translation.
        let r = [[0.0f32, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]];
        let t = [0.5f32, -0.25, 1.0];

        let src = [
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
            Vec3::new(0.0, 0.0, 1.0),
            Vec3::new(0.3, 0.7, -0.2),
        ];
        let dst: Vec<Vec3> = src
            .iter()
            .map(|p| {
                Vec3::new(
                    r[0][0] * p.x + r[0][1] * p.y + r[0][2] * p.z + t[0],
                    r[1][0] * p.x + r[1][1] * p.y + r[1][2] * p.z + t[1],
                    r[2][0] * p.x + r[2][1] * p.y + r[2][2] * p.z + t[2],
                )
            })
            .collect();

        let (r_est, t_est, s) = umeyama(&src, &dst).unwrap();
        assert_relative_eq!(s, 1.0);
        for i in 0..3 {
            for j in 0..3 {
                assert_relative_eq!(r_est[i][j], r[i][j], epsilon = 1e-5);
            }
            assert_relative_eq!(t_est[i], t[i], epsilon = 1e-5);
        }
    }

    #[test]
    fn reflection_is_fixed_to_proper_rotation() {
        // Mirror across the xy-plane. The closest orthogonal matrix to a
        // reflection has negative determinant, so this exercises the det < 0
        // branch.
        let src = [
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
            Vec3::new(0.0, 0.0, 1.0),
        ];
        let dst: Vec<Vec3> = src.iter().map(|p| Vec3::new(p.x, p.y, -p.z)).collect();

        let (r, _t, _s) = umeyama(&src, &dst).unwrap();
        let det = r[0][0] * (r[1][1] * r[2][2] - r[1][2] * r[2][1])
            - r[0][1] * (r[1][0] * r[2][2] - r[1][2] * r[2][0])
            + r[0][2] * (r[1][0] * r[2][1] - r[1][1] * r[2][0]);
        assert_relative_eq!(det, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn rejects_mismatched_lengths() {
        let src = [Vec3::ZERO];
        let dst = [Vec3::ZERO, Vec3::ONE];
        assert!(matches!(
            umeyama(&src, &dst),
            Err(UmeyamaError::MismatchedInputLengths)
        ));
    }
}
