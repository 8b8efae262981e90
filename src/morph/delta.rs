//! Morph 差分

use std::collections::BTreeMap;

use glam::{DMat4, DQuat, DVec3};

use super::BoneMorphOffset;
use crate::math::QuatExt;

/// 单个骨骼的 Morph 合成结果
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BoneMorphDelta {
    pub bone_index: usize,
    pub position: Option<DVec3>,
    pub rotation: Option<DQuat>,
    pub scale: Option<DVec3>,
    pub cancelable_position: Option<DVec3>,
    pub cancelable_rotation: Option<DQuat>,
    pub cancelable_scale: Option<DVec3>,
    pub local_mat: Option<DMat4>,
}

impl BoneMorphDelta {
    pub fn new(bone_index: usize) -> Self {
        Self {
            bone_index,
            ..Default::default()
        }
    }

    /// 按权重叠加一个骨骼偏移
    pub fn accumulate(&mut self, offset: &BoneMorphOffset, ratio: f64) {
        if offset.position != DVec3::ZERO {
            let pos = offset.position * ratio;
            self.position = Some(self.position.map_or(pos, |p| p + pos));
        }
        if !offset.rotation.is_ident() {
            let rot = offset.rotation.muled_scalar(ratio).normalize();
            self.rotation = Some(self.rotation.map_or(rot, |r| rot * r));
        }
        if let Some(scale) = offset.scale {
            let base = self.scale.unwrap_or(DVec3::ONE);
            self.scale = Some(base + scale * ratio);
        }
        if let Some(pos) = offset.cancelable_position {
            let pos = pos * ratio;
            self.cancelable_position = Some(self.cancelable_position.map_or(pos, |p| p + pos));
        }
        if let Some(rot) = offset.cancelable_rotation.filter(|q| !q.is_ident()) {
            let rot = rot.muled_scalar(ratio).normalize();
            self.cancelable_rotation = Some(self.cancelable_rotation.map_or(rot, |r| rot * r));
        }
        if let Some(scale) = offset.cancelable_scale {
            let base = self.cancelable_scale.unwrap_or(DVec3::ONE);
            self.cancelable_scale = Some(base + scale * ratio);
        }
        if let Some(mat) = offset.local_mat {
            // 局部矩阵不按权重插值，权重非零即整体生效
            self.local_mat = Some(self.local_mat.map_or(mat, |m| m * mat));
        }
    }
}

/// 一帧的 Morph 差分集合（只含骨骼部分）
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MorphDeltas {
    pub bones: BTreeMap<usize, BoneMorphDelta>,
}

impl MorphDeltas {
    pub fn new() -> Self {
        Self {
            bones: BTreeMap::new(),
        }
    }

    pub fn bone(&self, bone_index: usize) -> Option<&BoneMorphDelta> {
        self.bones.get(&bone_index)
    }

    pub fn bone_mut(&mut self, bone_index: usize) -> &mut BoneMorphDelta {
        self.bones
            .entry(bone_index)
            .or_insert_with(|| BoneMorphDelta::new(bone_index))
    }

    pub fn is_empty(&self) -> bool {
        self.bones.is_empty()
    }
}
