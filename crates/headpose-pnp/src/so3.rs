//! Quaternion-backed SO(3) element for Rodrigues-vector conversions.

use glam::{Mat3, Quat, Vec3};

const SMALL_ANGLE: f32 = 1e-8;

/// Rotation on the SO(3) manifold.
#[derive(Debug, Clone, Copy)]
pub struct SO3 {
    /// Unit quaternion backing the rotation.
    pub q: Quat,
}

impl SO3 {
    /// Identity rotation.
    pub const IDENTITY: Self = Self { q: Quat::IDENTITY };

    /// Build from a rotation matrix.
    pub fn from_matrix(mat: &Mat3) -> Self {
        Self {
            q: Quat::from_mat3(mat).normalize(),
        }
    }

    /// Rotation matrix of this element.
    pub fn matrix(&self) -> Mat3 {
        Mat3::from_quat(self.q)
    }

    /// Inverse rotation.
    pub fn inverse(&self) -> Self {
        Self {
            q: self.q.inverse(),
        }
    }

    /// Lie algebra -> Lie group: axis-angle (Rodrigues) vector to rotation.
    pub fn exp(v: Vec3) -> Self {
        let theta = v.length();
        let (w, b) = if theta > SMALL_ANGLE {
            let half = 0.5 * theta;
            (half.cos(), half.sin() / theta)
        } else {
            // sin(theta/2)/theta -> 1/2 as theta -> 0
            (1.0, 0.5)
        };
        let xyz = b * v;
        Self {
            q: Quat::from_xyzw(xyz.x, xyz.y, xyz.z, w),
        }
    }

    /// Lie group -> Lie algebra: rotation to axis-angle (Rodrigues) vector.
    pub fn log(&self) -> Vec3 {
        // Pick the short arc: the quaternions q and -q encode the same
        // rotation, so force a non-negative scalar part first.
        let q = if self.q.w < 0.0 { -self.q } else { self.q };
        let vec = Vec3::new(q.x, q.y, q.z);
        let sin_half = vec.length();
        if sin_half < SMALL_ANGLE {
            return vec * 2.0;
        }
        let theta = 2.0 * sin_half.atan2(q.w);
        vec * (theta / sin_half)
    }
}
