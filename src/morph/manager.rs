//! Morph 管理器
//!
//! 按帧解析骨骼 Morph：读取动作中的 Morph 权重，把骨骼偏移与组 Morph
//! 合成为每骨骼的 [`BoneMorphDelta`]。

use std::collections::{HashMap, HashSet};

use super::{Morph, MorphDeltas, MorphType};
use crate::animation::{FrameIndex, Motion};

/// 忽略的权重阈值
const RATIO_EPSILON: f64 = 1e-12;

/// Morph 管理器
#[derive(Clone, Debug, Default)]
pub struct MorphManager {
    morphs: Vec<Morph>,
    name_to_index: HashMap<String, usize>,
}

impl MorphManager {
    pub fn new() -> Self {
        Self {
            morphs: Vec::new(),
            name_to_index: HashMap::new(),
        }
    }

    /// 添加 Morph，返回其索引
    pub fn add_morph(&mut self, mut morph: Morph) -> usize {
        let index = self.morphs.len();
        morph.index = index;
        self.name_to_index.insert(morph.name.clone(), index);
        self.morphs.push(morph);
        index
    }

    /// 通过名称查找 Morph
    pub fn find_morph_by_name(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(name).copied()
    }

    pub fn morph_count(&self) -> usize {
        self.morphs.len()
    }

    pub fn get_morph(&self, index: usize) -> Option<&Morph> {
        self.morphs.get(index)
    }

    /// 解析指定帧的骨骼 Morph
    pub fn resolve_bone_morphs(&self, motion: &Motion, frame: impl Into<FrameIndex>) -> MorphDeltas {
        let frame = frame.into();
        let mut deltas = MorphDeltas::new();
        for name in motion.morph_track_names() {
            let Some(index) = self.find_morph_by_name(name) else {
                continue;
            };
            let ratio = motion.morph_ratio(name, frame);
            self.apply_with_ratio(&mut deltas, index, ratio);
        }
        deltas
    }

    /// 以指定权重叠加单个 Morph（组 Morph 递归展开）
    pub fn apply_with_ratio(&self, deltas: &mut MorphDeltas, morph_index: usize, ratio: f64) {
        let mut visited = HashSet::new();
        self.apply_morph(deltas, morph_index, ratio, &mut visited);
    }

    fn apply_morph(
        &self,
        deltas: &mut MorphDeltas,
        morph_index: usize,
        ratio: f64,
        visited: &mut HashSet<usize>,
    ) {
        if ratio.abs() < RATIO_EPSILON {
            return;
        }
        let Some(morph) = self.morphs.get(morph_index) else {
            return;
        };
        // 组 Morph 成环时跳过
        if !visited.insert(morph_index) {
            log::debug!("Morph 循环引用已跳过: {}", morph.name);
            return;
        }

        match morph.morph_type {
            MorphType::Bone => {
                for offset in &morph.bone_offsets {
                    deltas.bone_mut(offset.bone_index).accumulate(offset, ratio);
                }
            }
            MorphType::Group => {
                for group in &morph.group_offsets {
                    self.apply_morph(deltas, group.morph_index, ratio * group.factor, visited);
                }
            }
            MorphType::Vertex | MorphType::Uv | MorphType::Material => {}
        }

        visited.remove(&morph_index);
    }
}
