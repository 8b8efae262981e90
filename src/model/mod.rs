//! MMD 模型
//!
//! 变形所需的模型数据：骨骼、Morph 与刚体绑定。

use crate::morph::MorphManager;
use crate::physics::RigidBody;
use crate::skeleton::BoneManager;
use crate::{MmdError, Result};

/// MMD 模型
#[derive(Clone, Debug, Default)]
pub struct MmdModel {
    /// 多模型场景中的序号，传给物理协作方
    pub index: usize,
    pub name: String,
    pub bone_manager: BoneManager,
    pub morph_manager: MorphManager,
    pub rigid_bodies: Vec<RigidBody>,
    /// 骨骼索引 -> 刚体索引
    bone_rigid_bodies: Vec<Option<usize>>,
}

impl MmdModel {
    /// 创建空模型
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_index(mut self, index: usize) -> Self {
        self.index = index;
        self
    }

    /// 添加刚体，返回其索引
    pub fn add_rigid_body(&mut self, mut rigid_body: RigidBody) -> usize {
        let index = self.rigid_bodies.len();
        rigid_body.index = index;
        self.rigid_bodies.push(rigid_body);
        index
    }

    /// 建立骨骼层级与刚体映射；添加完骨骼和刚体后调用一次
    pub fn setup(&mut self) -> Result<()> {
        self.bone_manager.build_hierarchy()?;

        let bone_count = self.bone_manager.bone_count();
        self.bone_rigid_bodies = vec![None; bone_count];
        for rigid_body in &self.rigid_bodies {
            let Some(bone_index) = rigid_body.bone_index else {
                continue;
            };
            if bone_index >= bone_count {
                return Err(MmdError::InvalidModel(format!(
                    "rigid body {} references bone {} (bone count {})",
                    rigid_body.name, bone_index, bone_count
                )));
            }
            // 同一骨骼有多个刚体时以第一个为准
            if self.bone_rigid_bodies[bone_index].is_none() {
                self.bone_rigid_bodies[bone_index] = Some(rigid_body.index);
            }
        }

        log::debug!(
            "模型 {} 初始化完成: {} 骨骼, {} Morph, {} 刚体",
            self.name,
            bone_count,
            self.morph_manager.morph_count(),
            self.rigid_bodies.len()
        );
        Ok(())
    }

    /// 骨骼绑定的刚体
    pub fn rigid_body_for_bone(&self, bone_index: usize) -> Option<&RigidBody> {
        self.bone_rigid_bodies
            .get(bone_index)
            .copied()
            .flatten()
            .and_then(|i| self.rigid_bodies.get(i))
    }

    pub fn bone_count(&self) -> usize {
        self.bone_manager.bone_count()
    }

    pub fn has_physics(&self) -> bool {
        !self.rigid_bodies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::PhysicsType;
    use crate::skeleton::Bone;
    use glam::DVec3;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_rigid_body_lookup() {
        let mut model = MmdModel::new("テスト");
        model.bone_manager.add_bone(Bone::new("頭", DVec3::ZERO));
        model.bone_manager.add_bone(Bone::new("髪", DVec3::Y).with_parent(0));
        model.add_rigid_body(RigidBody::new("頭", PhysicsType::Static).with_bone(0));
        model.add_rigid_body(RigidBody::new("髪", PhysicsType::Dynamic).with_bone(1));
        assert_eq!(model.setup(), Ok(()));

        assert_eq!(model.rigid_body_for_bone(1).map(|rb| rb.index), Some(1));
        assert_eq!(model.rigid_body_for_bone(5), None);
        assert!(model.has_physics());
    }

    #[test]
    fn test_rigid_body_bone_out_of_range() {
        let mut model = MmdModel::new("テスト");
        model.bone_manager.add_bone(Bone::new("頭", DVec3::ZERO));
        model.add_rigid_body(RigidBody::new("髪", PhysicsType::Dynamic).with_bone(4));
        assert!(matches!(model.setup(), Err(MmdError::InvalidModel(_))));
    }
}
