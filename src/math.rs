//! 数学辅助 - MMD 语义的四元数与向量运算
//!
//! 内部统一使用 glam 双精度类型，坐标系为 MMD 标准左手系。

use glam::{DMat3, DMat4, DQuat, DVec3};

/// 万向锁回避阈值（88°）
pub const GIMBAL1_RAD: f64 = 88.0 / 180.0 * std::f64::consts::PI;

/// 单位四元数判定容差
pub const IDENT_EPSILON: f64 = 1e-6;

/// 两向量夹角（弧度）
pub fn vector_to_radian(a: DVec3, b: DVec3) -> f64 {
    let len = a.length() * b.length();
    if len == 0.0 {
        return 0.0;
    }
    (a.dot(b) / len).clamp(-1.0, 1.0).acos()
}

/// 轴角构造四元数；零轴视为无旋转
pub fn quat_from_axis_angle(axis: DVec3, angle: f64) -> DQuat {
    let axis = axis.normalize_or_zero();
    if axis == DVec3::ZERO || !angle.is_finite() {
        return DQuat::IDENTITY;
    }
    DQuat::from_axis_angle(axis, angle)
}

/// 从 from 方向转到 to 方向的最短旋转
pub fn quat_rotate_between(from: DVec3, to: DVec3) -> DQuat {
    if from.length() == 0.0 || to.length() == 0.0 || from.abs_diff_eq(to, 1e-6) {
        return DQuat::IDENTITY;
    }
    let v0 = from.normalize();
    let v1 = to.normalize();
    let dot = v0.dot(v1);
    if dot >= 1.0 {
        return DQuat::IDENTITY;
    }
    if dot <= -1.0 {
        let helper = if v0.x.abs() > 0.9 { DVec3::Y } else { DVec3::X };
        return quat_from_axis_angle(v0.cross(helper), std::f64::consts::PI);
    }
    let cross = v0.cross(v1);
    let s = ((1.0 + dot) * 2.0).sqrt();
    DQuat::from_xyzw(cross.x / s, cross.y / s, cross.z / s, s * 0.5).normalize()
}

/// MMD 欧拉角（度）转四元数
pub fn quat_from_degrees(degrees: DVec3) -> DQuat {
    let (sx, cx) = (degrees.x.to_radians() * 0.5).sin_cos();
    let (sy, cy) = (degrees.y.to_radians() * 0.5).sin_cos();
    let (sz, cz) = (degrees.z.to_radians() * 0.5).sin_cos();

    let w = cx * cy * cz - sx * sy * sz;
    let x = sx * cy * cz + cx * sy * sz;
    let y = cx * sy * cz - sx * cy * sz;
    let z = cx * cy * sz + sx * sy * cz;
    DQuat::from_xyzw(x, y, z, w).normalize()
}

/// 四元数转 MMD 欧拉角（度），与 quat_from_degrees 互逆
pub fn quat_to_degrees(q: DQuat) -> DVec3 {
    let m = DMat3::from_quat(q.normalize());
    let sy = m.z_axis.x.clamp(-1.0, 1.0);
    let y = sy.asin();
    let (x, z) = if sy.abs() < 1.0 - 1e-9 {
        (
            (-m.z_axis.y).atan2(m.z_axis.z),
            (-m.y_axis.x).atan2(m.x_axis.x),
        )
    } else {
        // 万向锁：Z 归零
        (m.y_axis.z.atan2(m.y_axis.y), 0.0)
    };
    DVec3::new(x.to_degrees(), y.to_degrees(), z.to_degrees())
}

/// MMD 左手系坐标转右手系（Z 取反）
pub fn mmd_to_right_handed(v: DVec3) -> DVec3 {
    DVec3::new(v.x, v.y, -v.z)
}

/// 矩阵各分量是否有限
pub fn is_finite_mat4(m: &DMat4) -> bool {
    m.to_cols_array().iter().all(|v| v.is_finite())
}

/// MMD 语义的四元数扩展
pub trait QuatExt: Sized {
    /// 是否近似单位四元数
    fn is_ident(&self) -> bool;
    /// 分量近似相等
    fn near_equals(&self, other: &Self, epsilon: f64) -> bool;
    /// 旋转角（弧度）
    fn to_radian(&self) -> f64;
    /// 旋转量缩放（factor 可为负或大于 1）
    fn muled_scalar(&self, factor: f64) -> Self;
    /// 允许 t 超出 [0,1] 的球面插值
    fn slerp_extended(&self, other: &Self, t: f64) -> Self;
    /// 最短弧球面插值（t 钳制到端点）
    fn slerp_mmd(&self, other: &Self, t: f64) -> Self;
    /// 投影到固定轴上的旋转
    fn to_fixed_axis_rotation(&self, fixed_axis: DVec3) -> Self;
    /// 按轴拆分为 (扭转, 摆动)
    fn separate_twist_by_axis(&self, axis: DVec3) -> (Self, Self);
}

impl QuatExt for DQuat {
    fn is_ident(&self) -> bool {
        self.near_equals(&DQuat::IDENTITY, IDENT_EPSILON)
    }

    fn near_equals(&self, other: &Self, epsilon: f64) -> bool {
        (self.x - other.x).abs() <= epsilon
            && (self.y - other.y).abs() <= epsilon
            && (self.z - other.z).abs() <= epsilon
            && (self.w - other.w).abs() <= epsilon
    }

    fn to_radian(&self) -> f64 {
        2.0 * self.w.clamp(-1.0, 1.0).acos()
    }

    fn muled_scalar(&self, factor: f64) -> Self {
        if factor == 0.0 {
            return DQuat::IDENTITY;
        }
        if factor == 1.0 {
            return *self;
        }
        if factor == -1.0 {
            return self.inverse();
        }
        DQuat::IDENTITY.slerp_extended(self, factor)
    }

    fn slerp_extended(&self, other: &Self, t: f64) -> Self {
        if self.near_equals(other, 1e-8) {
            return *self;
        }
        let mut cos_omega = self.dot(*other);
        let mut q2 = *other;
        if cos_omega < 0.0 {
            cos_omega = -cos_omega;
            q2 = -q2;
        }
        let result = if cos_omega > 0.9999 {
            *self * (1.0 - t) + q2 * t
        } else {
            let omega = cos_omega.acos();
            let sin_omega = omega.sin();
            let s1 = (omega - t * omega).sin() / sin_omega;
            let s2 = (t * omega).sin() / sin_omega;
            *self * s1 + q2 * s2
        };
        result.normalize()
    }

    fn slerp_mmd(&self, other: &Self, t: f64) -> Self {
        if t <= 0.0 {
            return *self;
        }
        if t >= 1.0 {
            return *other;
        }
        if self.near_equals(other, 1e-8) {
            return *self;
        }
        let mut cos_omega = self.dot(*other);
        let mut q2 = *other;
        if cos_omega < 0.0 {
            cos_omega = -cos_omega;
            q2 = -q2;
        }
        let (k1, k2) = if cos_omega > 0.9999 {
            (1.0 - t, t)
        } else {
            let sin_omega = (1.0 - cos_omega * cos_omega).sqrt();
            let omega = sin_omega.atan2(cos_omega);
            (
                ((1.0 - t) * omega).sin() / sin_omega,
                (t * omega).sin() / sin_omega,
            )
        };
        *self * k1 + q2 * k2
    }

    fn to_fixed_axis_rotation(&self, fixed_axis: DVec3) -> Self {
        let axis = fixed_axis.normalize_or_zero();
        if axis == DVec3::ZERO {
            return *self;
        }
        let quat_axis = self.xyz().normalize_or_zero();
        let mut rad = self.to_radian();
        if axis.dot(quat_axis) < 0.0 {
            rad = -rad;
        }
        quat_from_axis_angle(axis, rad)
    }

    fn separate_twist_by_axis(&self, axis: DVec3) -> (Self, Self) {
        let axis = axis.normalize_or_zero();
        if axis == DVec3::ZERO {
            return (*self, DQuat::IDENTITY);
        }
        let rotated = (*self * axis).normalize_or_zero();
        let swing = quat_rotate_between(axis, rotated);
        let twist = swing.inverse() * *self;
        (twist, swing)
    }
}
