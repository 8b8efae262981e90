//! IK 求解器（CCD）
//!
//! 每次迭代从最靠近末端的链接开始，把末端方向转向目标方向；
//! 单步角度不超过 `unit_rotation × (链接序号 + 1)`，
//! 再按角度限制分解为欧拉角并钳制。

use std::f64::consts::FRAC_PI_2;

use glam::{DMat3, DQuat, DVec3};

use super::{AngleLimit, Bone, BoneDeltas, BoneManager, Ik, IkLink};
use super::assembler::{apply_global_matrix, update_unit_matrix};
use crate::math::{quat_from_axis_angle, vector_to_radian, QuatExt, GIMBAL1_RAD};
use crate::MmdError;

/// 到达判定距离
const IK_TOLERANCE: f64 = 1e-5;

/// 连续多少次距离不减少时输出未收敛日志
const STALL_LIMIT: usize = 3;

/// IK 求解器
#[derive(Clone, Debug)]
pub struct IkSolver<'a> {
    pub bone_index: usize,
    bones: &'a BoneManager,
    ik: &'a Ik,
    loop_count: usize,
    target_before_ik: bool,
    remove_twist: bool,
    verbose: bool,
}

impl<'a> IkSolver<'a> {
    /// 为 IK 骨骼创建求解器；`deform_indexes` 为本次变形的骨骼顺序
    ///
    /// 非 IK 骨骼、无链接或目标越界时返回 None。
    pub fn new(
        bones: &'a BoneManager,
        bone_index: usize,
        deform_indexes: &[usize],
        remove_twist: bool,
    ) -> Option<Self> {
        let bone = bones.get_bone(bone_index)?;
        let ik = bone.ik.as_ref()?;
        if ik.links.is_empty() {
            return None;
        }
        if bones.get_bone(ik.target_index).is_none() {
            log::warn!("IK 目标骨骼越界: {} -> {}", bone.name, ik.target_index);
            return None;
        }

        let position = |index: usize| deform_indexes.iter().position(|&i| i == index);
        let target_before_ik = matches!(
            (position(ik.target_index), position(bone_index)),
            (Some(target), Some(ik_bone)) if target < ik_bone
        );
        // 目标先于 IK 骨骼变形时多迭代一次
        let loop_count = ik.loop_count.max(1) + usize::from(target_before_ik);

        Some(Self {
            bone_index,
            bones,
            ik,
            loop_count,
            target_before_ik,
            remove_twist,
            verbose: crate::config::ik_verbose(),
        })
    }

    /// 实际迭代次数
    pub fn loop_count(&self) -> usize {
        self.loop_count
    }

    pub fn target_index(&self) -> usize {
        self.ik.target_index
    }

    /// 是否需要先以 IK 关闭的末端位置作为初始目标
    ///
    /// つま先 IK 这类单链接且目标先于 IK 骨骼变形的情况，
    /// 或显式指定 `use_ik_off_goal` 时成立。
    pub fn needs_ik_off_goal(&self) -> bool {
        if self.ik.use_ik_off_goal {
            return true;
        }
        let is_toe = self.bones.get_bone(self.bone_index).map_or(false, Bone::is_toe_ik);
        self.target_before_ik && self.ik.links.len() == 1 && is_toe
    }

    /// 求解；`ik_off_goal` 为第一轮迭代使用的临时目标
    ///
    /// 结果写回各链接骨骼的关键帧旋转，并刷新受影响骨骼的矩阵。
    pub fn solve(&self, deltas: &mut BoneDeltas, ik_off_goal: Option<DVec3>) {
        let Some(ik_position) = deltas.global_position(self.bone_index) else {
            return;
        };
        let mut use_off_goal = ik_off_goal.is_some();
        let mut goal = ik_off_goal.unwrap_or(ik_position);
        let single = self.ik.links.len() == 1;

        let affected: Vec<(Vec<usize>, Vec<usize>)> = self
            .ik
            .links
            .iter()
            .map(|link| self.bones.affected_indexes(link.bone_index))
            .collect();

        let mut best_distance = f64::MAX;
        let mut stalled = 0;

        'iteration: for loop_index in 0..self.loop_count {
            for (link_index, link) in self.ik.links.iter().enumerate() {
                let Some(link_bone) = self.bones.get_bone(link.bone_index) else {
                    let error = MmdError::MalformedChain {
                        bone: self.bone_index,
                        reason: format!("link bone {} out of range", link.bone_index),
                    };
                    log::warn!("{}", error);
                    continue;
                };
                if link.is_locked() {
                    continue;
                }
                // 临时目标只用于第一轮
                if use_off_goal && loop_index == 1 && link_index == 0 {
                    goal = ik_position;
                    use_off_goal = false;
                }
                let Some(link_delta) = deltas.get(link.bone_index) else {
                    continue;
                };
                let Some(target_position) = deltas.global_position(self.ik.target_index) else {
                    continue;
                };

                let link_quat = link_delta
                    .total_rotation(link_bone.normalized_fixed_axis())
                    .unwrap_or(DQuat::IDENTITY);
                let inverse = link_delta.global_matrix.inverse();
                let target_local = inverse.transform_point3(target_position).normalize_or_zero();
                let goal_local = inverse.transform_point3(goal).normalize_or_zero();
                // 链接看来末端已朝向目标：整个 IK 结束
                if target_local.distance(goal_local) < IK_TOLERANCE {
                    break 'iteration;
                }
                if target_local == DVec3::ZERO || goal_local == DVec3::ZERO {
                    continue;
                }

                let unit_rad = self.ik.unit_rotation * (link_index + 1) as f64;
                let link_angle = vector_to_radian(target_local, goal_local).min(unit_rad);
                let mut axis = target_local.cross(goal_local).normalize_or_zero();
                if (!single || link_angle > GIMBAL1_RAD) && link.has_limits() {
                    axis = limited_axis(link, axis);
                }

                let mut result =
                    self.step_rotation(link, link_bone, link_quat, axis, link_angle, loop_index);
                // Morph 旋转只在首轮追加
                if loop_index == 0 {
                    if let Some(morph) = link_delta.frame_morph_rotation.filter(|q| !q.is_ident()) {
                        result *= morph;
                    }
                }
                if let Some(fixed) = link_bone.normalized_fixed_axis() {
                    result = result.to_fixed_axis_rotation(fixed);
                }

                if self.verbose {
                    log::trace!(
                        "IK {} loop {} link {}: angle {:.6} axis {:?} -> {:?}",
                        self.bone_index,
                        loop_index,
                        link_bone.name,
                        link_angle,
                        axis,
                        result
                    );
                }

                if let Some(delta) = deltas.get_mut(link.bone_index) {
                    delta.frame_rotation = Some(result);
                }
                let (units, globals) = &affected[link_index];
                for &index in units {
                    update_unit_matrix(self.bones, deltas, index);
                }
                for &index in globals {
                    apply_global_matrix(self.bones, deltas, index);
                }
            }

            let (Some(ik_position), Some(target_position)) = (
                deltas.global_position(self.bone_index),
                deltas.global_position(self.ik.target_index),
            ) else {
                break;
            };
            let distance = ik_position.distance(target_position);
            if distance < best_distance {
                best_distance = distance;
                stalled = 0;
            } else {
                stalled += 1;
                if stalled == STALL_LIMIT {
                    log::debug!(
                        "IK 未收敛: bone {} loop {} distance {:.6}",
                        self.bone_index,
                        loop_index,
                        distance
                    );
                }
            }
        }
    }

    /// 单个链接的一步旋转（含角度限制）
    fn step_rotation(
        &self,
        link: &IkLink,
        link_bone: &Bone,
        link_quat: DQuat,
        axis: DVec3,
        angle: f64,
        loop_index: usize,
    ) -> DQuat {
        if !angle.is_finite() || angle == 0.0 || !axis.is_finite() || axis == DVec3::ZERO {
            return link_quat;
        }

        let ik_quat = match link_bone.normalized_fixed_axis() {
            Some(fixed) if !link.has_limits() => {
                quat_from_axis_angle(axis, angle).separate_twist_by_axis(fixed).0
            }
            Some(fixed) => {
                let angle = if axis.dot(fixed) < 0.0 { -angle } else { angle };
                quat_from_axis_angle(fixed, angle)
            }
            None => {
                let quat = quat_from_axis_angle(axis, angle);
                if self.remove_twist {
                    quat.separate_twist_by_axis(self.bones.child_direction(link_bone.index)).1
                } else {
                    quat
                }
            }
        };
        let total = link_quat * ik_quat;

        if let Some(limit) = &link.angle_limit {
            solve_ik_limits(total, limit, loop_index, self.loop_count)
        } else if let Some(limit) = &link.local_angle_limit {
            let basis = local_basis(self.bones.local_axes(link_bone.index));
            let local = basis.inverse() * total * basis;
            basis * solve_ik_limits(local, limit, loop_index, self.loop_count) * basis.inverse()
        } else {
            total
        }
    }
}

/// 只允许单轴旋转的链接把旋转轴投影到该轴
fn limited_axis(link: &IkLink, axis: DVec3) -> DVec3 {
    let Some(limit) = link.axis_limit() else {
        return axis;
    };
    let sign = |v: f64| if v >= 0.0 { 1.0 } else { -1.0 };
    if limit.is_only_x() {
        DVec3::new(sign(axis.x), 0.0, 0.0)
    } else if limit.is_only_y() {
        DVec3::new(0.0, sign(axis.y), 0.0)
    } else if limit.is_only_z() {
        DVec3::new(0.0, 0.0, sign(axis.z))
    } else {
        axis
    }
}

/// 局部轴构成的正交基
fn local_basis((x_axis, y_axis, _): (DVec3, DVec3, DVec3)) -> DQuat {
    let x_axis = x_axis.try_normalize().unwrap_or(DVec3::X);
    let y_axis = y_axis.try_normalize().unwrap_or(DVec3::Y);
    let z_axis = x_axis.cross(y_axis).normalize_or_zero();
    if z_axis == DVec3::ZERO {
        return DQuat::IDENTITY;
    }
    let y_axis = z_axis.cross(x_axis);
    DQuat::from_mat3(&DMat3::from_cols(x_axis, y_axis, z_axis)).normalize()
}

/// 按角度限制分解并钳制旋转
///
/// X 轴范围在 ±90° 内时按 Y·X·Z 分解，其次 Y 轴按 Z·Y·X，否则 Z 轴按 X·Z·Y；
/// 主轴角度超过 88° 时钳制以回避万向锁。
pub fn solve_ik_limits(
    total: DQuat,
    limit: &AngleLimit,
    loop_index: usize,
    loop_count: usize,
) -> DQuat {
    let m = DMat3::from_quat(total);
    let clamp = |v: f64, axis: usize| {
        ik_axis_value(v, limit.min[axis], limit.max[axis], loop_index, loop_count)
    };
    let gimbal = |v: f64| v.clamp(-1.0, 1.0).asin().clamp(-GIMBAL1_RAD, GIMBAL1_RAD);

    if limit.min.x > -FRAC_PI_2 && limit.max.x < FRAC_PI_2 {
        let fx = gimbal(-m.z_axis.y);
        let cx = fx.cos();
        let fy = (m.z_axis.x / cx).atan2(m.z_axis.z / cx);
        let fz = (m.x_axis.y / cx).atan2(m.y_axis.y / cx);
        let (fx, fy, fz) = (clamp(fx, 0), clamp(fy, 1), clamp(fz, 2));
        DQuat::from_rotation_y(fy) * DQuat::from_rotation_x(fx) * DQuat::from_rotation_z(fz)
    } else if limit.min.y > -FRAC_PI_2 && limit.max.y < FRAC_PI_2 {
        let fy = gimbal(-m.x_axis.z);
        let cy = fy.cos();
        let fx = (m.y_axis.z / cy).atan2(m.z_axis.z / cy);
        let fz = (m.x_axis.y / cy).atan2(m.x_axis.x / cy);
        let (fx, fy, fz) = (clamp(fx, 0), clamp(fy, 1), clamp(fz, 2));
        DQuat::from_rotation_z(fz) * DQuat::from_rotation_y(fy) * DQuat::from_rotation_x(fx)
    } else {
        let fz = gimbal(-m.y_axis.x);
        let cz = fz.cos();
        let fx = (m.y_axis.z / cz).atan2(m.y_axis.y / cz);
        let fy = (m.z_axis.x / cz).atan2(m.x_axis.x / cz);
        let (fx, fy, fz) = (clamp(fx, 0), clamp(fy, 1), clamp(fz, 2));
        DQuat::from_rotation_x(fx) * DQuat::from_rotation_z(fz) * DQuat::from_rotation_y(fy)
    }
}

/// 单轴角度钳制
///
/// 前半迭代中越界值按边界反射（仍在范围内时），之后直接钳到边界。
pub fn ik_axis_value(value: f64, min: f64, max: f64, loop_index: usize, loop_count: usize) -> f64 {
    let in_loop = loop_index < loop_count / 2;
    if value < min {
        let reflected = 2.0 * min - value;
        if reflected <= max && in_loop {
            reflected
        } else {
            min
        }
    } else if value > max {
        let reflected = 2.0 * max - value;
        if reflected >= min && in_loop {
            reflected
        } else {
            max
        }
    } else {
        value
    }
}
