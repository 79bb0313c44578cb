//! Efficient Perspective-n-Point (EPnP) solver
//! Paper: https://www.tugraz.at/fileadmin/user_upload/Institute/ICG/Images/team_lepetit/publications/lepetit_ijcv08.pdf

use glam::Vec3;
use nalgebra::{DMatrix, DVector, Matrix3, SymmetricEigen, Vector3, Vector4};

use crate::ops::{compute_centroid, gauss_newton, mat3_to_rows, rows_to_mat3};
use crate::pnp::{NumericTol, PnPError, PnPResult, PnPSolver};
use crate::refine::{refine_pose_lm, LMParams};
use crate::rigid::umeyama;
use crate::so3::SO3;

/// Marker type representing the Efficient PnP algorithm.
pub struct EPnP;

impl PnPSolver for EPnP {
    type Param = EPnPParams;

    fn solve(
        points_world: &[[f32; 3]],
        points_image: &[[f32; 2]],
        k: &[[f32; 3]; 3],
        params: &Self::Param,
    ) -> Result<PnPResult, PnPError> {
        solve_epnp(points_world, points_image, k, params)
    }
}

/// Parameters controlling the EPnP solver.
#[derive(Debug, Clone, Default)]
pub struct EPnPParams {
    /// Shared numeric tolerances.
    pub tol: NumericTol,
    /// Optional Levenberg–Marquardt polish of the closed-form solution.
    pub refine_lm: Option<LMParams>,
}

/// Solve Perspective-n-Point (EPnP).
///
/// # Arguments
/// * `points_world` – 3-D coordinates in the world frame, shape *(N,3)* with `N≥4`.
/// * `points_image` – Corresponding pixel coordinates, shape *(N,2)*.
/// * `k` – Camera intrinsics matrix.
/// * `params` – Solver parameters; with `refine_lm` set, the closed-form pose
///   is polished by minimizing pixel reprojection error.
pub fn solve_epnp(
    points_world: &[[f32; 3]],
    points_image: &[[f32; 2]],
    k: &[[f32; 3]; 3],
    params: &EPnPParams,
) -> Result<PnPResult, PnPError> {
    let n = points_world.len();
    if n != points_image.len() {
        return Err(PnPError::MismatchedArrayLengths {
            left_name: "world points",
            left_len: n,
            right_name: "image points",
            right_len: points_image.len(),
        });
    }
    if n < 4 {
        return Err(PnPError::InsufficientCorrespondences {
            required: 4,
            actual: n,
        });
    }

    let cw = select_control_points(points_world);

    let alphas = compute_barycentric(points_world, &cw, params.tol.eps)?;

    // Build the 2N×12 design matrix M
    let m_rows = build_m(&alphas, points_image, k);

    let m_flat: Vec<f32> = m_rows.iter().flat_map(|row| row.iter()).copied().collect();
    let m_mat = DMatrix::<f32>::from_row_slice(2 * n, 12, &m_flat);

    // Null-space of M (4 right-singular vectors associated with smallest singular values)
    let svd = m_mat.svd(true, true);
    let v_t = match svd.v_t {
        Some(v) => v,
        None => return Err(PnPError::SvdFailed("Failed to compute V^T".to_string())),
    };
    let cols = 12;
    let start_col = cols - 4;
    let null4 = v_t.rows(start_col, 4).transpose(); // shape 12×4

    // Build helper matrices for beta initialisation
    let l = build_l6x10(&null4);
    let rho = rho_ctrlpts(&cw);

    let rho_vec = DVector::<f32>::from_column_slice(&rho);

    let mut betas: Vec<[f32; 4]> = Vec::new();

    betas.extend(
        [
            estimate_beta([0, 1, 3, 6], &l, &rho_vec, params.tol.svd),
            estimate_beta([0, 1, 2], &l, &rho_vec, params.tol.svd),
            estimate_beta([0, 1, 2, 3, 4], &l, &rho_vec, params.tol.svd),
        ]
        .into_iter()
        .flatten(),
    );

    let mut best_err = f32::INFINITY;
    let mut best_pose: Option<([[f32; 3]; 3], [f32; 3])> = None;

    for bet in betas.iter().map(|&b| gauss_newton(b, &null4, &rho)) {
        let (r_c, t_c) = pose_from_betas(&bet, &null4, &cw, &alphas)?;
        let err = rmse_px(points_world, points_image, &r_c, &t_c, k);
        if err < best_err {
            best_err = err;
            best_pose = Some((r_c, t_c));
        }
    }

    let (best_r, best_t) =
        best_pose.ok_or_else(|| PnPError::SvdFailed("no usable beta candidate".to_string()))?;

    let rvec_v = SO3::from_matrix(&rows_to_mat3(&best_r)).log();

    let mut result = PnPResult {
        rotation: best_r,
        translation: best_t,
        rvec: [rvec_v.x, rvec_v.y, rvec_v.z],
        reproj_rmse: Some(best_err),
        num_iterations: None,
        converged: Some(true),
    };

    if let Some(lm) = &params.refine_lm {
        let mut rvec = result.rvec;
        let mut t = result.translation;
        let (rmse, iters, converged) =
            refine_pose_lm(points_world, points_image, k, &mut rvec, &mut t, lm)?;
        result.rotation = mat3_to_rows(&SO3::exp(Vec3::from_array(rvec)).matrix());
        result.rvec = rvec;
        result.translation = t;
        result.reproj_rmse = Some(rmse);
        result.num_iterations = Some(iters);
        result.converged = Some(converged);
    }

    Ok(result)
}

/// Compute pose (R, t) from a set of betas using the null-space vectors.
fn pose_from_betas(
    betas: &[f32; 4],
    null4: &DMatrix<f32>, // 12×4 matrix (V)
    cw: &[[f32; 3]; 4],   // control points in world frame
    alphas: &[[f32; 4]],  // barycentric coordinates for each world point
) -> Result<([[f32; 3]; 3], [f32; 3]), PnPError> {
    let beta_vec = Vector4::from_column_slice(betas);
    let cc_flat = null4 * beta_vec; // 12×1 vector

    let mut cc: [[f32; 3]; 4] = [[0.0; 3]; 4];
    for (i, pt) in cc.iter_mut().enumerate() {
        pt[0] = cc_flat[3 * i];
        pt[1] = cc_flat[3 * i + 1];
        pt[2] = cc_flat[3 * i + 2];
    }

    // The first reconstructed point must sit in front of the camera; flip the
    // control points when the null-space vector came out mirrored.
    let a0 = alphas[0];
    let mut pc0 = [0.0; 3];
    for j in 0..4 {
        pc0[0] += a0[j] * cc[j][0];
        pc0[1] += a0[j] * cc[j][1];
        pc0[2] += a0[j] * cc[j][2];
    }

    if pc0[2] < 0.0 {
        for pt in &mut cc {
            pt[0] *= -1.0;
            pt[1] *= -1.0;
            pt[2] *= -1.0;
        }
    }

    let cw_vec3: Vec<Vec3> = cw.iter().map(|p| Vec3::from_array(*p)).collect();
    let cc_vec3: Vec<Vec3> = cc.iter().map(|p| Vec3::from_array(*p)).collect();

    let (r, t, _s) =
        umeyama(&cw_vec3, &cc_vec3).map_err(|e| PnPError::SvdFailed(e.to_string()))?;

    Ok((r, t))
}

/// Root-mean-square reprojection error in pixels.
fn rmse_px(
    points_world: &[[f32; 3]],
    points_image: &[[f32; 2]],
    r: &[[f32; 3]; 3],
    t: &[f32; 3],
    k: &[[f32; 3]; 3],
) -> f32 {
    let fx = k[0][0];
    let fy = k[1][1];
    let cx = k[0][2];
    let cy = k[1][2];

    let mut sum_sq = 0.0;
    let n = points_world.len() as f32;

    for (p, &img) in points_world.iter().zip(points_image.iter()) {
        // Camera-frame coordinates: Pc = R * Pw + t
        let x_c = r[0][0] * p[0] + r[0][1] * p[1] + r[0][2] * p[2] + t[0];
        let y_c = r[1][0] * p[0] + r[1][1] * p[1] + r[1][2] * p[2] + t[1];
        let z_c = r[2][0] * p[0] + r[2][1] * p[1] + r[2][2] * p[2] + t[2];

        let inv_z = 1.0 / z_c;
        let u_hat = fx * x_c * inv_z + cx;
        let v_hat = fy * y_c * inv_z + cy;

        let du = u_hat - img[0];
        let dv = v_hat - img[1];
        sum_sq += du * du + dv * dv;
    }

    (sum_sq / n).sqrt()
}

/// Pick the four control points: cloud centroid plus one displacement along
/// each principal axis, scaled by the standard deviation along that axis.
fn select_control_points(points_world: &[[f32; 3]]) -> [[f32; 3]; 4] {
    let n = points_world.len() as f64;
    let c = compute_centroid(points_world);

    // Covariance of the cloud, accumulated in f64.
    let mut cov = Matrix3::<f64>::zeros();
    for p in points_world {
        let d = Vector3::new(
            (p[0] - c[0]) as f64,
            (p[1] - c[1]) as f64,
            (p[2] - c[2]) as f64,
        );
        cov += d * d.transpose();
    }
    cov /= n;

    let eig = SymmetricEigen::new(cov);
    let mut axes: Vec<(f64, Vector3<f64>)> = (0..3)
        .map(|i| {
            (
                eig.eigenvalues[i].max(0.0).sqrt(),
                eig.eigenvectors.column(i).into_owned(),
            )
        })
        .collect();
    axes.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap());

    let mut cw = [[0.0f32; 3]; 4];
    cw[0] = c;

    for (i, (sigma, axis)) in axes.iter().enumerate() {
        cw[i + 1][0] = c[0] + (sigma * axis[0]) as f32;
        cw[i + 1][1] = c[1] + (sigma * axis[1]) as f32;
        cw[i + 1][2] = c[2] + (sigma * axis[2]) as f32;
    }

    cw
}

/// Compute barycentric coordinates of world-space points with respect to the
/// 4 control points returned by `select_control_points`.
///
/// # Arguments
/// * `points_world` – World points *(N,3)*.
/// * `cw` – Control points *(4,3)*.
/// * `eps` – Threshold that decides whether the control-point tetrahedron is
///   degenerate. If the determinant of the 3-by-3 matrix built from `cw` is
///   smaller than `eps`, a Moore–Penrose pseudo-inverse is used instead of the exact inverse.
///
/// # Returns
/// Vector of length *N* where each element is `[α0, α1, α2, α3]` such that
/// `α0 + α1 + α2 + α3 = 1` and `pw_i = Σ αj Cw_j`.
fn compute_barycentric(
    points_world: &[[f32; 3]],
    cw: &[[f32; 3]; 4],
    eps: f32,
) -> Result<Vec<[f32; 4]>, PnPError> {
    // Build B = [C1 - C0, C2 - C0, C3 - C0].
    let c0 = Vector3::new(cw[0][0], cw[0][1], cw[0][2]);
    let d1 = Vector3::new(cw[1][0], cw[1][1], cw[1][2]) - c0;
    let d2 = Vector3::new(cw[2][0], cw[2][1], cw[2][2]) - c0;
    let d3 = Vector3::new(cw[3][0], cw[3][1], cw[3][2]) - c0;

    let b = Matrix3::from_columns(&[d1, d2, d3]);

    // Invert, or pseudo-invert when the tetrahedron is near-degenerate.
    let b_inv = match b.try_inverse() {
        Some(inv) if b.determinant().abs() > eps => inv,
        _ => b
            .pseudo_inverse(eps)
            .map_err(|e| PnPError::SvdFailed(e.to_string()))?,
    };

    Ok(points_world
        .iter()
        .map(|p| {
            let diff = Vector3::new(p[0], p[1], p[2]) - c0;
            let lamb = b_inv * diff;
            [1.0 - (lamb[0] + lamb[1] + lamb[2]), lamb[0], lamb[1], lamb[2]]
        })
        .collect())
}

/// Construct the 2N×12 design matrix **M** used by EPnP.
///
/// * `alphas` – Barycentric coordinates for each world point, produced by
///   [`compute_barycentric`]; shape *(N,4)*.
/// * `points_image` – Pixel coordinates for each correspondence; shape *(N,2)*.
/// * `k` – Camera intrinsics 3×3 matrix.
///
/// The output is a vector of length `2*N` where each element is the 12-vector
/// corresponding to a row of **M**.
fn build_m(alphas: &[[f32; 4]], points_image: &[[f32; 2]], k: &[[f32; 3]; 3]) -> Vec<[f32; 12]> {
    let n = alphas.len();

    let fu = k[0][0];
    let fv = k[1][1];
    let uc = k[0][2];
    let vc = k[1][2];

    // Pre-allocate 2N rows of zeros.
    let mut m = vec![[0.0f32; 12]; 2 * n];

    for (i, (a, &points_image_i)) in alphas.iter().zip(points_image.iter()).enumerate() {
        let u = points_image_i[0];
        let v = points_image_i[1];

        let row_x = 2 * i;
        let row_y = row_x + 1;

        for (j, &alpha) in a.iter().enumerate() {
            let base = 3 * j;
            m[row_x][base] = alpha * fu;
            m[row_x][base + 2] = alpha * (uc - u);
            m[row_y][base + 1] = alpha * fv;
            m[row_y][base + 2] = alpha * (vc - v);
        }
    }

    m
}

/// Build the 6×10 matrix **L** used in EPnP from the 4-dimensional null-space matrix `V` (shape 12×4).
fn build_l6x10(null4: &DMatrix<f32>) -> [[f32; 10]; 6] {
    // Re-ordered column indices (reverse order).
    let col_order = [3usize, 2, 1, 0];

    // v[i] is a 4-block of control-point vectors per null-space component.
    let mut v_cp: Vec<[Vec3; 4]> = Vec::with_capacity(4);

    for &c in &col_order {
        let col = null4.column(c);
        let mut blocks = [Vec3::ZERO; 4];
        for (k, block) in blocks.iter_mut().enumerate() {
            *block = Vec3::new(col[3 * k], col[3 * k + 1], col[3 * k + 2]);
        }
        v_cp.push(blocks);
    }

    // Differences between control-point vectors for each null-space component.
    let dv_arr: Vec<Vec<Vec3>> = (0..4)
        .map(|i| {
            CP_PAIRS
                .iter()
                .map(|&(a, b)| v_cp[i][a] - v_cp[i][b])
                .collect::<Vec<_>>()
        })
        .collect();

    let mut l = [[0.0f32; 10]; 6];
    for (j, _) in dv_arr[0].iter().enumerate() {
        l[j][0] = dv_arr[0][j].dot(dv_arr[0][j]);
        l[j][1] = 2.0 * dv_arr[0][j].dot(dv_arr[1][j]);
        l[j][2] = dv_arr[1][j].dot(dv_arr[1][j]);
        l[j][3] = 2.0 * dv_arr[0][j].dot(dv_arr[2][j]);
        l[j][4] = 2.0 * dv_arr[1][j].dot(dv_arr[2][j]);
        l[j][5] = dv_arr[2][j].dot(dv_arr[2][j]);
        l[j][6] = 2.0 * dv_arr[0][j].dot(dv_arr[3][j]);
        l[j][7] = 2.0 * dv_arr[1][j].dot(dv_arr[3][j]);
        l[j][8] = 2.0 * dv_arr[2][j].dot(dv_arr[3][j]);
        l[j][9] = dv_arr[3][j].dot(dv_arr[3][j]);
    }

    l
}

/// Extracts a 6×k `DMatrix` by picking the specified columns from the 6×10 `L` matrix.
fn l_submatrix(l: &[[f32; 10]; 6], cols: &[usize]) -> DMatrix<f32> {
    let data: Vec<f32> = cols
        .iter()
        .flat_map(|&c| (0..6).map(move |r| l[r][c]))
        .collect();
    DMatrix::<f32>::from_column_slice(6, cols.len(), &data)
}

/// Solve for a beta vector given a column subset of the 6×10 L matrix.
/// Returns `None` if the least-squares solve fails.
fn estimate_beta<const K: usize>(
    cols: [usize; K],
    l: &[[f32; 10]; 6],
    rho: &DVector<f32>,
    tol_svd: f32,
) -> Option<[f32; 4]> {
    let l_sub = l_submatrix(l, &cols);
    let sol = l_sub.svd(true, true).solve(rho, tol_svd).ok()?;
    let x = sol.column(0);

    match K {
        4 => Some([
            x[0].abs().sqrt(),
            x[1] / x[0].abs().sqrt(),
            x[2] / x[0].abs().sqrt(),
            x[3] / x[0].abs().sqrt(),
        ])
        .map(|mut b| {
            if x[0] < 0.0 {
                for v in &mut b {
                    *v = -*v;
                }
            }
            b
        }),
        3 => {
            let mut beta = [0.0; 4];
            if x[0] < 0.0 {
                beta[0] = (-x[0]).sqrt();
                beta[2] = if x[2] > 0.0 { 0.0 } else { (-x[2]).sqrt() };
            } else {
                beta[0] = x[0].sqrt();
                beta[2] = if x[2] < 0.0 { 0.0 } else { x[2].sqrt() };
            }
            if x[1] < 0.0 {
                beta[0] = -beta[0];
            }
            Some(beta)
        }
        5 => {
            let mut beta = [0.0; 4];
            if x[0] < 0.0 {
                beta[0] = (-x[0]).sqrt();
                beta[1] = if x[2] > 0.0 { 0.0 } else { (-x[2]).sqrt() };
                beta[2] = x[3] / (-x[0]).sqrt();
            } else {
                beta[0] = x[0].sqrt();
                beta[1] = if x[2] < 0.0 { 0.0 } else { x[2].sqrt() };
                beta[2] = x[3] / x[0].sqrt();
            }
            if x[1] < 0.0 {
                beta[0] = -beta[0];
            }
            Some(beta)
        }
        _ => None,
    }
}

const CP_PAIRS: [(usize, usize); 6] = [(0, 1), (0, 2), (0, 3), (1, 2), (1, 3), (2, 3)];

/// Compute the six squared distances (ρ vector) between the 4 control points.
fn rho_ctrlpts(cw: &[[f32; 3]; 4]) -> [f32; 6] {
    CP_PAIRS.map(|(i, j)| {
        cw[i]
            .iter()
            .zip(cw[j].iter())
            .map(|(&a, &b)| (a - b).powi(2))
            .sum::<f32>()
    })
}

#[cfg(test)]
mod solve_epnp_tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_solve_epnp() {
        // Hardcoded test data verified with OpenCV
        let points_world: [[f32; 3]; 6] = [
            [0.0315, 0.03333, -0.10409],
            [-0.0315, 0.03333, -0.10409],
            [0.0, -0.00102, -0.12977],
            [0.02646, -0.03167, -0.1053],
            [-0.02646, -0.031667, -0.1053],
            [0.0, 0.04515, -0.11033],
        ];

        // Image points (uv)
        let points_image: [[f32; 2]; 6] = [
            [722.96466, 502.0828],
            [669.88837, 498.61877],
            [707.0025, 478.48975],
            [728.05634, 447.56918],
            [682.6069, 443.91776],
            [696.4414, 511.96442],
        ];

        let k: [[f32; 3]; 3] = [[800.0, 0.0, 640.0], [0.0, 800.0, 480.0], [0.0, 0.0, 1.0]];

        let cw = select_control_points(&points_world);

        let alphas =
            compute_barycentric(&points_world, &cw, EPnPParams::default().tol.eps).unwrap();

        for (p, alpha) in points_world.iter().zip(alphas.iter()) {
            let mut recon = [0.0; 3];
            for j in 0..4 {
                recon[0] += alpha[j] * cw[j][0];
                recon[1] += alpha[j] * cw[j][1];
                recon[2] += alpha[j] * cw[j][2];
            }
            for k in 0..3 {
                assert_relative_eq!(recon[k], p[k], epsilon = 1e-6);
            }

            assert_relative_eq!(alpha.iter().sum::<f32>(), 1.0, epsilon = 1e-9);
        }

        let m = build_m(&alphas, &points_image, &k);
        assert_eq!(m.len(), 2 * points_world.len());

        let fu = k[0][0];
        let fv = k[1][1];
        let uc = k[0][2];
        let vc = k[1][2];

        let u0 = points_image[0][0];
        let v0 = points_image[0][1];

        let mut expected_x = [0.0; 12];
        let mut expected_y = [0.0; 12];
        for j in 0..4 {
            let base = 3 * j;
            expected_x[base] = alphas[0][j] * fu;
            expected_x[base + 2] = alphas[0][j] * (uc - u0);
            expected_y[base + 1] = alphas[0][j] * fv;
            expected_y[base + 2] = alphas[0][j] * (vc - v0);
        }

        for k in 0..12 {
            assert_relative_eq!(m[0][k], expected_x[k], epsilon = 1e-9);
            assert_relative_eq!(m[1][k], expected_y[k], epsilon = 1e-9);
        }

        let result = EPnP::solve(&points_world, &points_image, &k, &EPnPParams::default())
            .expect("EPnP::solve should succeed");
        let r = result.rotation;
        let t = result.translation;
        let rvec = result.rvec;

        assert_relative_eq!(r[0][0], 0.6965054, epsilon = 1e-2);
        assert_relative_eq!(r[0][1], 0.07230615, epsilon = 1e-2);
        assert_relative_eq!(r[0][2], -0.71389916, epsilon = 1e-2);
        assert_relative_eq!(r[1][0], 0.2240602, epsilon = 1e-2);
        assert_relative_eq!(r[1][1], 0.92324643, epsilon = 1e-2);
        assert_relative_eq!(r[1][2], 0.31211066, epsilon = 1e-2);
        assert_relative_eq!(r[2][0], 0.6816724, epsilon = 1e-2);

        assert_relative_eq!(t[0], -0.00861299, epsilon = 1e-2);
        assert_relative_eq!(t[1], 0.02666388, epsilon = 1e-2);
        assert_relative_eq!(t[2], 1.014955, epsilon = 1e-2);

        assert_relative_eq!(rvec[0], -0.39580156, epsilon = 1e-2);
        assert_relative_eq!(rvec[1], -0.8011695, epsilon = 1e-2);
        assert_relative_eq!(rvec[2], 0.08711894, epsilon = 1e-2);
    }

    #[test]
    fn test_rejects_insufficient_points() {
        let world = [[0.0f32, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
        let image = [[0.0f32, 0.0], [1.0, 0.0], [0.0, 1.0]];
        let k = [[800.0, 0.0, 640.0], [0.0, 800.0, 480.0], [0.0, 0.0, 1.0]];

        let res = EPnP::solve(&world, &image, &k, &EPnPParams::default());
        assert!(matches!(
            res,
            Err(PnPError::InsufficientCorrespondences {
                required: 4,
                actual: 3
            })
        ));
    }
}
