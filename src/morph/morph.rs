//! Morph 定义

use super::{BoneMorphOffset, GroupMorphOffset, MorphType};

/// Morph 变形
#[derive(Clone, Debug, PartialEq)]
pub struct Morph {
    pub index: usize,
    pub name: String,
    pub morph_type: MorphType,

    // 骨骼 Morph
    pub bone_offsets: Vec<BoneMorphOffset>,

    // 组 Morph（引用其他 Morph）
    pub group_offsets: Vec<GroupMorphOffset>,
}

impl Morph {
    pub fn new(name: &str, morph_type: MorphType) -> Self {
        Self {
            index: 0,
            name: name.to_string(),
            morph_type,
            bone_offsets: Vec::new(),
            group_offsets: Vec::new(),
        }
    }

    pub fn with_bone_offset(mut self, offset: BoneMorphOffset) -> Self {
        self.bone_offsets.push(offset);
        self
    }

    pub fn with_group_offset(mut self, morph_index: usize, factor: f64) -> Self {
        self.group_offsets.push(GroupMorphOffset { morph_index, factor });
        self
    }
}

impl Default for Morph {
    fn default() -> Self {
        Self::new("", MorphType::Vertex)
    }
}
