//! 骨骼差分（每帧每骨骼的求值结果）

use std::collections::HashMap;

use glam::{DMat4, DQuat, DVec3};

use super::{Bone, BoneManager};
use crate::animation::{BoneFrame, FrameIndex};
use crate::math::{mmd_to_right_handed, QuatExt};
use crate::morph::BoneMorphDelta;

/// 缩放近似为 1 的容差
const SCALE_EPSILON: f64 = 1e-9;

fn is_one(v: DVec3) -> bool {
    v.abs_diff_eq(DVec3::ONE, SCALE_EPSILON)
}

fn is_zero(v: DVec3) -> bool {
    v == DVec3::ZERO
}

/// 骨骼差分
#[derive(Clone, Debug, PartialEq)]
pub struct BoneDelta {
    pub bone_index: usize,
    pub frame: FrameIndex,

    // ========== 关键帧 ==========
    pub frame_position: Option<DVec3>,
    pub frame_rotation: Option<DQuat>,
    pub frame_scale: Option<DVec3>,
    pub frame_cancelable_position: Option<DVec3>,
    pub frame_cancelable_rotation: Option<DQuat>,
    pub frame_cancelable_scale: Option<DVec3>,
    pub frame_local_mat: Option<DMat4>,

    // ========== Morph ==========
    pub frame_morph_position: Option<DVec3>,
    pub frame_morph_rotation: Option<DQuat>,
    pub frame_morph_scale: Option<DVec3>,
    pub frame_morph_cancelable_position: Option<DVec3>,
    pub frame_morph_cancelable_rotation: Option<DQuat>,
    pub frame_morph_cancelable_scale: Option<DVec3>,
    pub frame_morph_local_mat: Option<DMat4>,

    // ========== 派生矩阵 ==========
    /// 相对父骨骼的单位矩阵
    pub unit_matrix: DMat4,
    pub global_matrix: DMat4,
    /// 蒙皮用：global × 初始位置的逆
    pub local_matrix: DMat4,
    /// IK 求解前的全局矩阵快照
    pub global_ik_off_matrix: Option<DMat4>,
    pub global_position: DVec3,
}

impl BoneDelta {
    pub fn new(bone_index: usize, frame: FrameIndex) -> Self {
        Self {
            bone_index,
            frame,
            frame_position: None,
            frame_rotation: None,
            frame_scale: None,
            frame_cancelable_position: None,
            frame_cancelable_rotation: None,
            frame_cancelable_scale: None,
            frame_local_mat: None,
            frame_morph_position: None,
            frame_morph_rotation: None,
            frame_morph_scale: None,
            frame_morph_cancelable_position: None,
            frame_morph_cancelable_rotation: None,
            frame_morph_cancelable_scale: None,
            frame_morph_local_mat: None,
            unit_matrix: DMat4::IDENTITY,
            global_matrix: DMat4::IDENTITY,
            local_matrix: DMat4::IDENTITY,
            global_ik_off_matrix: None,
            global_position: DVec3::ZERO,
        }
    }

    /// 从物理等外部给出的全局矩阵反推关键帧位置与旋转
    pub fn from_global_matrix(
        bone: &Bone,
        frame: FrameIndex,
        global: DMat4,
        parent_global: DMat4,
        parent_position: DVec3,
    ) -> Self {
        let unit = parent_global.inverse() * global;
        let (_, rotation, translation) = unit.to_scale_rotation_translation();
        let mut delta = Self::new(bone.index, frame);
        delta.frame_position = Some(translation - (bone.position - parent_position));
        delta.frame_rotation = Some(rotation);
        delta.unit_matrix = unit;
        delta.global_matrix = global;
        delta.local_matrix = global * DMat4::from_translation(-bone.position);
        delta.global_position = global.w_axis.truncate();
        delta
    }

    /// 写入关键帧值
    pub fn fill_frame(&mut self, frame: &BoneFrame) {
        self.frame_position = frame.position;
        self.frame_rotation = frame.rotation;
        self.frame_scale = frame.scale;
        self.frame_cancelable_position = frame.cancelable_position;
        self.frame_cancelable_rotation = frame.cancelable_rotation;
        self.frame_cancelable_scale = frame.cancelable_scale;
    }

    /// 写入 Morph 合成值
    pub fn fill_morph(&mut self, morph: &BoneMorphDelta) {
        self.frame_morph_position = morph.position;
        self.frame_morph_rotation = morph.rotation;
        self.frame_morph_scale = morph.scale;
        self.frame_morph_cancelable_position = morph.cancelable_position;
        self.frame_morph_cancelable_rotation = morph.cancelable_rotation;
        self.frame_morph_cancelable_scale = morph.cancelable_scale;
        self.frame_morph_local_mat = morph.local_mat;
    }

    /// 关键帧 × Morph 旋转；固定轴骨骼投影到轴上
    pub fn total_rotation(&self, fixed_axis: Option<DVec3>) -> Option<DQuat> {
        let morph = self.frame_morph_rotation.filter(|q| !q.is_ident());
        let rot = match (self.frame_rotation, morph) {
            (Some(frame), Some(morph)) => frame * morph,
            (Some(frame), None) => frame,
            (None, Some(morph)) => morph,
            (None, None) => return None,
        };
        Some(match fixed_axis {
            Some(axis) => rot.to_fixed_axis_rotation(axis),
            None => rot,
        })
    }

    /// 关键帧 + Morph 移动
    pub fn total_position(&self) -> Option<DVec3> {
        let morph = self.frame_morph_position.filter(|v| !is_zero(*v));
        match (self.frame_position, morph) {
            (Some(frame), Some(morph)) => Some(frame + morph),
            (frame, morph) => frame.or(morph),
        }
    }

    /// 关键帧 ⊙ Morph 缩放
    pub fn total_scale(&self) -> Option<DVec3> {
        let morph = self.frame_morph_scale.filter(|v| !is_one(*v));
        match (self.frame_scale, morph) {
            (Some(frame), Some(morph)) => Some(frame * morph),
            (frame, morph) => frame.or(morph),
        }
    }

    /// 关键帧局部矩阵 × Morph 局部矩阵
    pub fn total_local_mat(&self) -> Option<DMat4> {
        let frame = self.frame_local_mat.filter(|m| *m != DMat4::IDENTITY);
        let morph = self.frame_morph_local_mat.filter(|m| *m != DMat4::IDENTITY);
        match (frame, morph) {
            (Some(frame), Some(morph)) => Some(frame * morph),
            (frame, morph) => frame.or(morph),
        }
    }

    /// 自身取消旋转（关键帧 × Morph）；都为单位时为 None
    pub fn cancelable_rotation(&self) -> Option<DQuat> {
        let frame = self.frame_cancelable_rotation.filter(|q| !q.is_ident());
        let morph = self.frame_morph_cancelable_rotation.filter(|q| !q.is_ident());
        match (frame, morph) {
            (Some(frame), Some(morph)) => Some(frame * morph),
            (frame, morph) => frame.or(morph),
        }
    }

    /// 自身取消移动（关键帧 + Morph）
    pub fn cancelable_position(&self) -> Option<DVec3> {
        let frame = self.frame_cancelable_position.filter(|v| !is_zero(*v));
        let morph = self.frame_morph_cancelable_position.filter(|v| !is_zero(*v));
        match (frame, morph) {
            (Some(frame), Some(morph)) => Some(frame + morph),
            (frame, morph) => frame.or(morph),
        }
    }

    /// 自身取消缩放（关键帧 ⊙ Morph）
    pub fn cancelable_scale(&self) -> Option<DVec3> {
        let frame = self.frame_cancelable_scale.filter(|v| !is_one(*v));
        let morph = self.frame_morph_cancelable_scale.filter(|v| !is_one(*v));
        match (frame, morph) {
            (Some(frame), Some(morph)) => Some(frame * morph),
            (frame, morph) => frame.or(morph),
        }
    }

    /// 全局旋转
    pub fn global_rotation(&self) -> DQuat {
        self.global_matrix.to_scale_rotation_translation().1
    }

    /// 右手系全局位置（Z 取反）
    pub fn global_position_right_handed(&self) -> DVec3 {
        mmd_to_right_handed(self.global_position)
    }
}

/// 一帧的骨骼差分集合（按骨骼索引）
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BoneDeltas {
    frame: FrameIndex,
    deltas: Vec<Option<BoneDelta>>,
    name_to_index: HashMap<String, usize>,
}

impl BoneDeltas {
    pub fn new(bones: &BoneManager, frame: FrameIndex) -> Self {
        Self {
            frame,
            deltas: vec![None; bones.bone_count()],
            name_to_index: bones
                .bones()
                .iter()
                .map(|bone| (bone.name.clone(), bone.index))
                .collect(),
        }
    }

    pub fn frame(&self) -> FrameIndex {
        self.frame
    }

    pub fn get(&self, index: usize) -> Option<&BoneDelta> {
        self.deltas.get(index).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut BoneDelta> {
        self.deltas.get_mut(index).and_then(Option::as_mut)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&BoneDelta> {
        self.name_to_index.get(name).and_then(|&index| self.get(index))
    }

    pub fn contains(&self, index: usize) -> bool {
        self.get(index).is_some()
    }

    /// 插入或替换
    pub fn update(&mut self, delta: BoneDelta) {
        let index = delta.bone_index;
        if index >= self.deltas.len() {
            self.deltas.resize(index + 1, None);
        }
        self.deltas[index] = Some(delta);
    }

    /// 取出已有差分，没有则新建
    pub fn get_or_insert(&mut self, index: usize) -> &mut BoneDelta {
        if index >= self.deltas.len() {
            self.deltas.resize(index + 1, None);
        }
        let frame = self.frame;
        self.deltas[index].get_or_insert_with(|| BoneDelta::new(index, frame))
    }

    /// 全局矩阵；没有差分时为单位矩阵
    pub fn global_matrix(&self, index: usize) -> DMat4 {
        self.get(index).map_or(DMat4::IDENTITY, |d| d.global_matrix)
    }

    pub fn global_position(&self, index: usize) -> Option<DVec3> {
        self.get(index).map(|d| d.global_position)
    }

    pub fn iter(&self) -> impl Iterator<Item = &BoneDelta> {
        self.deltas.iter().filter_map(Option::as_ref)
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
