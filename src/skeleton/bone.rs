//! 骨骼节点
//!
//! 模型加载时创建，动画期间只读。各种骨骼类型（普通、付与、固定轴、
//! 局部轴、IK）用同一结构上的能力字段表达。

use glam::DVec3;

/// 判断向量是否只有指定分量非零
const ONLY_AXIS_EPSILON: f64 = 1e-10;

/// 角度限制（弧度，按轴）
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AngleLimit {
    pub min: DVec3,
    pub max: DVec3,
}

impl AngleLimit {
    pub fn new(min: DVec3, max: DVec3) -> Self {
        Self { min, max }
    }

    /// 角度制（度）构造
    pub fn from_degrees(min: DVec3, max: DVec3) -> Self {
        Self {
            min: min * std::f64::consts::PI / 180.0,
            max: max * std::f64::consts::PI / 180.0,
        }
    }

    /// 只限制 X 轴（min 或 max 只有 X 分量非零）
    pub fn is_only_x(&self) -> bool {
        only_x(self.min) || only_x(self.max)
    }

    pub fn is_only_y(&self) -> bool {
        only_y(self.min) || only_y(self.max)
    }

    pub fn is_only_z(&self) -> bool {
        only_z(self.min) || only_z(self.max)
    }
}

fn near_zero(v: f64) -> bool {
    v.abs() <= ONLY_AXIS_EPSILON
}

fn only_x(v: DVec3) -> bool {
    !near_zero(v.x) && near_zero(v.y) && near_zero(v.z)
}

fn only_y(v: DVec3) -> bool {
    near_zero(v.x) && !near_zero(v.y) && near_zero(v.z)
}

fn only_z(v: DVec3) -> bool {
    near_zero(v.x) && near_zero(v.y) && !near_zero(v.z)
}

/// IK 链接信息
#[derive(Clone, Debug, PartialEq)]
pub struct IkLink {
    pub bone_index: usize,
    /// 全局轴角度限制
    pub angle_limit: Option<AngleLimit>,
    /// 局部轴角度限制
    pub local_angle_limit: Option<AngleLimit>,
}

impl IkLink {
    pub fn new(bone_index: usize) -> Self {
        Self {
            bone_index,
            angle_limit: None,
            local_angle_limit: None,
        }
    }

    pub fn with_angle_limit(mut self, min: DVec3, max: DVec3) -> Self {
        self.angle_limit = Some(AngleLimit::new(min, max));
        self
    }

    pub fn with_local_angle_limit(mut self, min: DVec3, max: DVec3) -> Self {
        self.local_angle_limit = Some(AngleLimit::new(min, max));
        self
    }

    pub fn has_limits(&self) -> bool {
        self.angle_limit.is_some() || self.local_angle_limit.is_some()
    }

    /// 角度限制上下限全为 0，完全不允许转动
    pub fn is_locked(&self) -> bool {
        let zero = |limit: &AngleLimit| limit.min == DVec3::ZERO && limit.max == DVec3::ZERO;
        self.angle_limit.as_ref().map_or(false, zero)
            || self.local_angle_limit.as_ref().map_or(false, zero)
    }

    /// 轴投影使用的限制：局部限制优先
    pub fn axis_limit(&self) -> Option<&AngleLimit> {
        self.local_angle_limit.as_ref().or(self.angle_limit.as_ref())
    }
}

/// IK 配置
#[derive(Clone, Debug, PartialEq)]
pub struct Ik {
    /// IK 目标（末端）骨骼
    pub target_index: usize,
    /// 链接列表，第一个最靠近末端
    pub links: Vec<IkLink>,
    /// 迭代次数
    pub loop_count: usize,
    /// 每次迭代每个链接的单位角（弧度）
    pub unit_rotation: f64,
    /// 强制使用 IK 关闭时的目标位置作为初始目标
    pub use_ik_off_goal: bool,
}

impl Ik {
    pub fn new(target_index: usize, loop_count: usize, unit_rotation: f64) -> Self {
        Self {
            target_index,
            links: Vec::new(),
            loop_count,
            unit_rotation,
            use_ik_off_goal: false,
        }
    }

    pub fn with_link(mut self, link: IkLink) -> Self {
        self.links.push(link);
        self
    }

    pub fn with_ik_off_goal(mut self) -> Self {
        self.use_ik_off_goal = true;
        self
    }
}

/// 骨骼节点
#[derive(Clone, Debug, PartialEq)]
pub struct Bone {
    pub index: usize,
    pub name: String,
    /// 初始位置（世界空间）
    pub position: DVec3,
    pub parent_index: Option<usize>,
    /// 变形阶层
    pub layer: i32,
    pub deform_after_physics: bool,

    // 付与
    pub effect_index: Option<usize>,
    pub effect_factor: f64,
    pub is_effector_rotation: bool,
    pub is_effector_translation: bool,

    // 轴
    pub fixed_axis: Option<DVec3>,
    pub local_axis_x: Option<DVec3>,

    // 尾端（表示先）
    pub tail_index: Option<usize>,
    pub tail_position: DVec3,

    pub ik: Option<Ik>,
}

impl Bone {
    pub fn new(name: &str, position: DVec3) -> Self {
        Self {
            index: 0,
            name: name.to_string(),
            position,
            parent_index: None,
            layer: 0,
            deform_after_physics: false,
            effect_index: None,
            effect_factor: 1.0,
            is_effector_rotation: false,
            is_effector_translation: false,
            fixed_axis: None,
            local_axis_x: None,
            tail_index: None,
            tail_position: DVec3::ZERO,
            ik: None,
        }
    }

    pub fn with_parent(mut self, parent_index: usize) -> Self {
        self.parent_index = Some(parent_index);
        self
    }

    pub fn with_layer(mut self, layer: i32) -> Self {
        self.layer = layer;
        self
    }

    pub fn after_physics(mut self) -> Self {
        self.deform_after_physics = true;
        self
    }

    /// 付与：从 `effect_index` 继承 `factor` 倍的旋转和/或移动
    pub fn with_effector(
        mut self,
        effect_index: usize,
        factor: f64,
        rotation: bool,
        translation: bool,
    ) -> Self {
        self.effect_index = Some(effect_index);
        self.effect_factor = factor;
        self.is_effector_rotation = rotation;
        self.is_effector_translation = translation;
        self
    }

    pub fn with_fixed_axis(mut self, axis: DVec3) -> Self {
        self.fixed_axis = Some(axis);
        self
    }

    pub fn with_local_axis_x(mut self, axis: DVec3) -> Self {
        self.local_axis_x = Some(axis);
        self
    }

    pub fn with_tail_index(mut self, tail_index: usize) -> Self {
        self.tail_index = Some(tail_index);
        self
    }

    pub fn with_tail_position(mut self, offset: DVec3) -> Self {
        self.tail_position = offset;
        self
    }

    pub fn with_ik(mut self, ik: Ik) -> Self {
        self.ik = Some(ik);
        self
    }

    pub fn is_ik(&self) -> bool {
        self.ik.is_some()
    }

    pub fn has_effector(&self) -> bool {
        self.effect_index.is_some() && (self.is_effector_rotation || self.is_effector_translation)
    }

    pub fn is_effector_rotation(&self) -> bool {
        self.effect_index.is_some() && self.is_effector_rotation
    }

    pub fn is_effector_translation(&self) -> bool {
        self.effect_index.is_some() && self.is_effector_translation
    }

    /// 归一化后的固定轴；零向量视为未设置
    pub fn normalized_fixed_axis(&self) -> Option<DVec3> {
        self.fixed_axis.and_then(|axis| axis.try_normalize())
    }

    /// つま先 IK（名称判断）
    pub fn is_toe_ik(&self) -> bool {
        self.is_ik() && (self.name.contains("つま先ＩＫ") || self.name.contains("つま先IK"))
    }
}
