//! 物理协作接口
//!
//! 变形引擎本身不做刚体模拟，只在物理前/物理后两段之间
//! 把骨骼姿势交给协作方、推进一步、再取回受物理驱动的骨骼矩阵。
//!
//! 协作方需要 `Send + Sync`：刚体同步按分块并行调用。

mod rigid_body;

pub use rigid_body::{PhysicsType, RigidBody};

use glam::DMat4;

use crate::skeleton::Bone;

/// 物理协作方
pub trait PhysicsCollaborator: Send + Sync {
    /// 把骨骼的全局矩阵同步给刚体
    fn update_transform(
        &self,
        model_index: usize,
        bone: &Bone,
        global: DMat4,
        rigid_body: &RigidBody,
    );

    /// 推进模拟
    fn step_simulation(&self, time_step: f64);

    /// 刚体驱动后的骨骼全局矩阵；没有结果时为 None
    fn rigid_body_bone_matrix(&self, model_index: usize, rigid_body: &RigidBody) -> Option<DMat4>;
}
