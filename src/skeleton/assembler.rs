//! 骨骼局部矩阵组装与层级累积
//!
//! 单位矩阵 = 父相对偏移 × L × T × R × S，其中
//! - L：关键帧与 Morph 的局部矩阵
//! - T：移动（自身 + 付与 × 系数，含取消移动）
//! - R：旋转（自身 × 付与^系数，固定轴投影，含取消旋转）
//! - S：缩放（自身 ⊙ Morph，含取消缩放）
//!
//! 全局矩阵 = 父全局 × 单位矩阵；父骨骼是 IK 骨骼且有 IK 前快照时改用快照。

use glam::{DMat4, DQuat, DVec3};

use super::{BoneDeltas, BoneManager};
use crate::config::MAX_EFFECTOR_RECURSION;
use crate::math::QuatExt;

/// 依次重算单位矩阵与全局矩阵（索引需按变形顺序）
pub fn apply_bone_matrices(bones: &BoneManager, deltas: &mut BoneDeltas, indexes: &[usize]) {
    for &index in indexes {
        update_unit_matrix(bones, deltas, index);
        apply_global_matrix(bones, deltas, index);
    }
}

/// 重算单位矩阵
pub fn update_unit_matrix(bones: &BoneManager, deltas: &mut BoneDeltas, index: usize) {
    let Some(bone) = bones.get_bone(index) else {
        return;
    };
    if !deltas.contains(index) {
        return;
    }

    let mut unit = DMat4::IDENTITY;
    if let Some(local) = deltas.get(index).and_then(|d| d.total_local_mat()) {
        unit *= local;
    }
    if let Some(position) = total_position(bones, deltas, index) {
        unit *= DMat4::from_translation(position);
    }
    if let Some(rotation) = total_rotation(bones, deltas, index) {
        unit *= DMat4::from_quat(rotation);
    }
    if let Some(scale) = total_scale(bones, deltas, index) {
        unit *= DMat4::from_scale(scale);
    }

    let parent_position = bone
        .parent_index
        .and_then(|p| bones.get_bone(p))
        .map_or(DVec3::ZERO, |parent| parent.position);
    let unit = DMat4::from_translation(bone.position - parent_position) * unit;

    if let Some(delta) = deltas.get_mut(index) {
        delta.unit_matrix = unit;
    }
}

/// 父全局 × 单位矩阵
pub fn apply_global_matrix(bones: &BoneManager, deltas: &mut BoneDeltas, index: usize) {
    let Some(bone) = bones.get_bone(index) else {
        return;
    };
    let Some(unit) = deltas.get(index).map(|d| d.unit_matrix) else {
        return;
    };

    let parent_global = bone.parent_index.and_then(|p| {
        let parent = deltas.get(p)?;
        let parent_is_ik = bones.get_bone(p).map_or(false, |b| b.is_ik());
        match parent.global_ik_off_matrix {
            Some(ik_off) if parent_is_ik => Some(ik_off),
            _ => Some(parent.global_matrix),
        }
    });
    let global = match parent_global {
        Some(parent_global) => parent_global * unit,
        None => unit,
    };

    if let Some(delta) = deltas.get_mut(index) {
        delta.global_matrix = global;
        delta.local_matrix = global * DMat4::from_translation(-bone.position);
        delta.global_position = global.w_axis.truncate();
    }
}

/// 含付与与取消旋转的最终旋转；单位旋转时为 None
pub fn total_rotation(bones: &BoneManager, deltas: &BoneDeltas, index: usize) -> Option<DQuat> {
    let accumulated = accumulate_rotation(bones, deltas, index, 0, 1.0);
    let has_rotation = accumulated.map_or(false, |q| !q.is_ident());
    let mut rotation = accumulated.unwrap_or(DQuat::IDENTITY);

    let delta = deltas.get(index)?;
    let parent_cancel = bones
        .get_bone(index)
        .and_then(|b| b.parent_index)
        .and_then(|p| deltas.get(p))
        .and_then(|p| p.cancelable_rotation());

    match (delta.cancelable_rotation(), parent_cancel) {
        (None, None) => {
            if !has_rotation {
                return None;
            }
        }
        (own, parent) => {
            if let Some(own) = own {
                rotation *= own;
            }
            if let Some(parent) = parent {
                rotation *= parent.inverse();
            }
        }
    }
    Some(rotation)
}

/// 含付与与取消移动的最终移动；零移动时为 None
pub fn total_position(bones: &BoneManager, deltas: &BoneDeltas, index: usize) -> Option<DVec3> {
    let mut position = accumulate_position(bones, deltas, index, 0).unwrap_or(DVec3::ZERO);
    let delta = deltas.get(index)?;
    if let Some(own) = delta.cancelable_position() {
        position += own;
    }
    let parent_cancel = bones
        .get_bone(index)
        .and_then(|b| b.parent_index)
        .and_then(|p| deltas.get(p))
        .and_then(|p| p.cancelable_position());
    if let Some(parent) = parent_cancel {
        position -= parent;
    }
    (position != DVec3::ZERO).then_some(position)
}

/// 含取消缩放的最终缩放；单位缩放时为 None
pub fn total_scale(bones: &BoneManager, deltas: &BoneDeltas, index: usize) -> Option<DVec3> {
    let accumulated = accumulate_scale(deltas, index);
    let has_scale = accumulated.map_or(false, |s| s != DVec3::ONE);
    let mut scale = accumulated.unwrap_or(DVec3::ONE);

    let delta = deltas.get(index)?;
    let parent_cancel = bones
        .get_bone(index)
        .and_then(|b| b.parent_index)
        .and_then(|p| deltas.get(p))
        .and_then(|p| p.cancelable_scale());

    match (delta.cancelable_scale(), parent_cancel) {
        (None, None) => {
            if !has_scale {
                return None;
            }
        }
        (own, parent) => {
            if let Some(own) = own {
                scale *= own;
            }
            if let Some(parent) = parent {
                scale /= parent;
            }
        }
    }
    Some(scale)
}

/// 递归合成付与旋转：自身 × 付与源^系数，整体再乘以 `factor`
///
/// 超过递归上限时视为无旋转。
pub fn accumulate_rotation(
    bones: &BoneManager,
    deltas: &BoneDeltas,
    index: usize,
    recursion: usize,
    factor: f64,
) -> Option<DQuat> {
    if recursion > MAX_EFFECTOR_RECURSION {
        log::debug!("付与旋转递归超过上限: bone {}", index);
        return None;
    }
    let bone = bones.get_bone(index)?;
    let delta = deltas.get(index)?;

    let mut rotation = delta.total_rotation(bone.normalized_fixed_axis());
    if bone.is_effector_rotation() {
        let effector = bone.effect_index.and_then(|effect_index| {
            accumulate_rotation(bones, deltas, effect_index, recursion + 1, bone.effect_factor)
        });
        if let Some(effector) = effector {
            rotation = Some(rotation.map_or(effector, |r| r * effector));
        }
    }
    rotation.map(|r| r.muled_scalar(factor))
}

/// 递归合成付与移动：自身 + 付与源 × 系数
pub fn accumulate_position(
    bones: &BoneManager,
    deltas: &BoneDeltas,
    index: usize,
    recursion: usize,
) -> Option<DVec3> {
    if recursion > MAX_EFFECTOR_RECURSION {
        log::debug!("付与移动递归超过上限: bone {}", index);
        return None;
    }
    let bone = bones.get_bone(index)?;
    let delta = deltas.get(index)?;

    let position = delta.total_position();
    if bone.is_effector_translation() {
        let effector = bone
            .effect_index
            .and_then(|effect_index| accumulate_position(bones, deltas, effect_index, recursion + 1));
        if let Some(effector) = effector {
            let effector = effector * bone.effect_factor;
            return Some(position.map_or(effector, |p| p + effector));
        }
    }
    position
}

/// 缩放不参与付与
pub fn accumulate_scale(deltas: &BoneDeltas, index: usize) -> Option<DVec3> {
    deltas.get(index).and_then(|d| d.total_scale())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::FrameIndex;
    use crate::skeleton::{Bone, BoneDelta};
    use pretty_assertions::assert_eq;
    use std::f64::consts::FRAC_PI_3;

    fn fill_all(bones: &BoneManager) -> BoneDeltas {
        let mut deltas = BoneDeltas::new(bones, FrameIndex(0.0));
        for index in 0..bones.bone_count() {
            deltas.update(BoneDelta::new(index, FrameIndex(0.0)));
        }
        deltas
    }

    fn assert_vec_eq(a: DVec3, b: DVec3) {
        assert!(a.abs_diff_eq(b, 1e-9), "{a:?} != {b:?}");
    }

    #[test]
    fn test_rest_pose_global_position() {
        let mut bones = BoneManager::new();
        bones.add_bone(Bone::new("全ての親", DVec3::ZERO));
        bones.add_bone(Bone::new("センター", DVec3::new(0.0, 8.0, 0.0)).with_parent(0));
        bones.add_bone(Bone::new("上半身", DVec3::new(0.0, 12.0, 1.0)).with_parent(1));
        assert!(bones.build_hierarchy().is_ok());

        let mut deltas = fill_all(&bones);
        apply_bone_matrices(&bones, &mut deltas, bones.sorted_indices());
        for bone in bones.bones() {
            assert_vec_eq(deltas.global_position(bone.index).unwrap_or_default(), bone.position);
            assert_eq!(deltas.get(bone.index).map(|d| d.local_matrix), Some(DMat4::IDENTITY));
        }
    }

    #[test]
    fn test_child_follows_parent_rotation() {
        let mut bones = BoneManager::new();
        bones.add_bone(Bone::new("腕", DVec3::ZERO));
        bones.add_bone(Bone::new("ひじ", DVec3::new(2.0, 0.0, 0.0)).with_parent(0));
        assert!(bones.build_hierarchy().is_ok());

        let mut deltas = fill_all(&bones);
        if let Some(d) = deltas.get_mut(0) {
            d.frame_rotation = Some(DQuat::from_rotation_z(std::f64::consts::FRAC_PI_2));
        }
        apply_bone_matrices(&bones, &mut deltas, bones.sorted_indices());
        assert_vec_eq(deltas.global_position(1).unwrap_or_default(), DVec3::new(0.0, 2.0, 0.0));
    }

    #[test]
    fn test_effector_rotation_half() {
        let mut bones = BoneManager::new();
        bones.add_bone(Bone::new("A", DVec3::ZERO));
        bones.add_bone(Bone::new("B", DVec3::ZERO).with_effector(0, 0.5, true, false));
        assert!(bones.build_hierarchy().is_ok());

        let mut deltas = fill_all(&bones);
        if let Some(d) = deltas.get_mut(0) {
            d.frame_rotation = Some(DQuat::from_rotation_z(FRAC_PI_3));
        }
        let rotation = total_rotation(&bones, &deltas, 1).unwrap_or_default();
        assert!(rotation.abs_diff_eq(DQuat::from_rotation_z(FRAC_PI_3 / 2.0), 1e-9));
    }

    #[test]
    fn test_effector_position_negative_factor() {
        let mut bones = BoneManager::new();
        bones.add_bone(Bone::new("A", DVec3::ZERO));
        bones.add_bone(Bone::new("B", DVec3::ZERO).with_effector(0, -2.0, false, true));
        assert!(bones.build_hierarchy().is_ok());

        let mut deltas = fill_all(&bones);
        if let Some(d) = deltas.get_mut(0) {
            d.frame_position = Some(DVec3::new(1.0, 0.0, 0.0));
        }
        if let Some(d) = deltas.get_mut(1) {
            d.frame_position = Some(DVec3::new(0.0, 1.0, 0.0));
        }
        assert_eq!(total_position(&bones, &deltas, 1), Some(DVec3::new(-2.0, 1.0, 0.0)));
    }

    #[test]
    fn test_effector_cycle_is_capped() {
        let mut bones = BoneManager::new();
        bones.add_bone(Bone::new("A", DVec3::ZERO).with_effector(1, 1.0, true, true));
        bones.add_bone(Bone::new("B", DVec3::ZERO).with_effector(0, 1.0, true, true));
        assert!(bones.build_hierarchy().is_ok());

        let deltas = fill_all(&bones);
        assert_eq!(accumulate_rotation(&bones, &deltas, 0, 0, 1.0), None);
        assert_eq!(accumulate_position(&bones, &deltas, 0, 0), None);
    }

    #[test]
    fn test_cancelable_rotation_restores_grandparent() {
        let mut bones = BoneManager::new();
        bones.add_bone(Bone::new("祖父", DVec3::ZERO));
        bones.add_bone(Bone::new("親", DVec3::new(0.0, 1.0, 0.0)).with_parent(0));
        bones.add_bone(Bone::new("子", DVec3::new(0.0, 2.0, 0.0)).with_parent(1));
        assert!(bones.build_hierarchy().is_ok());

        let mut deltas = fill_all(&bones);
        let grandparent_rotation = DQuat::from_rotation_y(0.4);
        let cancel = DQuat::from_rotation_x(0.7);
        if let Some(d) = deltas.get_mut(0) {
            d.frame_rotation = Some(grandparent_rotation);
        }
        if let Some(d) = deltas.get_mut(1) {
            d.frame_cancelable_rotation = Some(cancel);
        }
        apply_bone_matrices(&bones, &mut deltas, bones.sorted_indices());

        // 取消旋转计入自身旋转，只由子骨骼抵消
        let parent = deltas.get(1).map(|d| d.global_rotation()).unwrap_or_default();
        let expected_parent = grandparent_rotation * cancel;
        assert!(
            parent.abs_diff_eq(expected_parent, 1e-9) || parent.abs_diff_eq(-expected_parent, 1e-9)
        );

        let child = deltas.get(2).map(|d| d.global_rotation()).unwrap_or_default();
        let grandparent = deltas.get(0).map(|d| d.global_rotation()).unwrap_or_default();
        assert!(child.abs_diff_eq(grandparent, 1e-9) || child.abs_diff_eq(-grandparent, 1e-9));
    }

    #[test]
    fn test_ik_parent_uses_snapshot() {
        let mut bones = BoneManager::new();
        bones.add_bone(Bone::new("IK", DVec3::ZERO).with_ik(crate::skeleton::Ik::new(1, 1, 0.1)));
        bones.add_bone(Bone::new("子", DVec3::new(0.0, 1.0, 0.0)).with_parent(0));
        assert!(bones.build_hierarchy().is_ok());

        let mut deltas = fill_all(&bones);
        if let Some(d) = deltas.get_mut(0) {
            d.global_matrix = DMat4::from_translation(DVec3::new(5.0, 0.0, 0.0));
            d.global_ik_off_matrix = Some(DMat4::from_translation(DVec3::new(0.0, 0.0, 3.0)));
        }
        update_unit_matrix(&bones, &mut deltas, 1);
        apply_global_matrix(&bones, &mut deltas, 1);
        assert_vec_eq(deltas.global_position(1).unwrap_or_default(), DVec3::new(0.0, 1.0, 3.0));
    }
}
