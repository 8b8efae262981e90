//! Morph 变形系统
//!
//! 骨骼变形只消费骨骼 Morph 的结果：按帧解析 Morph 权重，
//! 把骨骼偏移（含组 Morph 递归）合成为 [`MorphDeltas`]。

mod delta;
mod manager;
mod morph;

pub use delta::{BoneMorphDelta, MorphDeltas};
pub use manager::MorphManager;
pub use morph::Morph;

use glam::{DMat4, DQuat, DVec3};

/// Morph 类型
///
/// 顶点 / UV / 材质 Morph 只登记，不参与骨骼变形。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MorphType {
    Group,
    Vertex,
    Bone,
    Uv,
    Material,
}

/// 骨骼 Morph 偏移
#[derive(Clone, Debug, PartialEq)]
pub struct BoneMorphOffset {
    pub bone_index: usize,
    pub position: DVec3,
    pub rotation: DQuat,
    /// 相对 1 的缩放增量
    pub scale: Option<DVec3>,
    pub cancelable_position: Option<DVec3>,
    pub cancelable_rotation: Option<DQuat>,
    pub cancelable_scale: Option<DVec3>,
    pub local_mat: Option<DMat4>,
}

impl BoneMorphOffset {
    pub fn new(bone_index: usize, position: DVec3, rotation: DQuat) -> Self {
        Self {
            bone_index,
            position,
            rotation,
            scale: None,
            cancelable_position: None,
            cancelable_rotation: None,
            cancelable_scale: None,
            local_mat: None,
        }
    }

    pub fn with_scale(mut self, scale: DVec3) -> Self {
        self.scale = Some(scale);
        self
    }

    pub fn with_cancelable_position(mut self, position: DVec3) -> Self {
        self.cancelable_position = Some(position);
        self
    }

    pub fn with_cancelable_rotation(mut self, rotation: DQuat) -> Self {
        self.cancelable_rotation = Some(rotation);
        self
    }

    pub fn with_local_mat(mut self, mat: DMat4) -> Self {
        self.local_mat = Some(mat);
        self
    }
}

/// 组 Morph 偏移（引用其他 Morph）
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GroupMorphOffset {
    pub morph_index: usize,
    pub factor: f64,
}
