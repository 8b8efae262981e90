//! 刚体绑定信息
//!
//! 只记录变形需要的部分：名称、关联骨骼与物理类型。
//! 形状、质量、关节等由物理协作方自行持有。

/// 刚体类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PhysicsType {
    /// 跟随骨骼
    #[default]
    Static,
    /// 完全由物理驱动
    Dynamic,
    /// 由物理驱动，但位置跟随骨骼
    DynamicBone,
}

impl PhysicsType {
    /// 物理结果是否写回骨骼
    pub fn drives_bone(self) -> bool {
        self != PhysicsType::Static
    }

    /// 是否需要把骨骼姿势同步给物理
    pub fn follows_bone(self) -> bool {
        self != PhysicsType::Dynamic
    }
}

/// MMD 刚体
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RigidBody {
    pub index: usize,
    pub name: String,
    /// 关联的骨骼索引
    pub bone_index: Option<usize>,
    pub physics_type: PhysicsType,
}

impl RigidBody {
    pub fn new(name: &str, physics_type: PhysicsType) -> Self {
        Self {
            index: 0,
            name: name.to_string(),
            bone_index: None,
            physics_type,
        }
    }

    pub fn with_bone(mut self, bone_index: usize) -> Self {
        self.bone_index = Some(bone_index);
        self
    }
}
