//! 骨骼变形求值
//!
//! 读取关键帧与 Morph，组装矩阵，按需解 IK。

use glam::DVec3;

use super::assembler::apply_bone_matrices;
use super::{BoneDeltas, BoneManager, IkSolver};
use crate::animation::{FrameIndex, Motion};
use crate::morph::{BoneMorphDelta, MorphDeltas};

/// 一次变形请求
#[derive(Clone, Debug, PartialEq)]
pub struct DeformRequest {
    pub frame: FrameIndex,
    /// 只求这些骨骼（及其相关骨骼）；为空时求全部
    pub bone_names: Vec<String>,
    /// 是否解 IK
    pub calc_ik: bool,
    /// 物理后变形段
    pub after_physics: bool,
    /// IK 结果去除沿子方向的扭转
    pub remove_twist: bool,
}

impl Default for DeformRequest {
    fn default() -> Self {
        Self {
            frame: FrameIndex::default(),
            bone_names: Vec::new(),
            calc_ik: true,
            after_physics: false,
            remove_twist: false,
        }
    }
}

impl DeformRequest {
    pub fn new(frame: impl Into<FrameIndex>) -> Self {
        Self {
            frame: frame.into(),
            ..Default::default()
        }
    }

    pub fn with_bone_names(mut self, bone_names: Vec<String>) -> Self {
        self.bone_names = bone_names;
        self
    }

    pub fn without_ik(mut self) -> Self {
        self.calc_ik = false;
        self
    }

    pub fn after_physics(mut self) -> Self {
        self.after_physics = true;
        self
    }

    pub fn remove_twist(mut self) -> Self {
        self.remove_twist = true;
        self
    }
}

/// 求一帧的骨骼差分
///
/// 传入 `deltas` 时在其基础上更新（物理后段沿用物理前与物理的结果）。
/// 无论是否解 IK，返回前都会重算所涉骨骼的矩阵。
pub fn compute_bone_deltas(
    bones: &BoneManager,
    motion: &Motion,
    morphs: Option<&MorphDeltas>,
    request: &DeformRequest,
    deltas: Option<BoneDeltas>,
) -> BoneDeltas {
    let indexes =
        bones.collect_bone_indexes(&request.bone_names, request.calc_ik, request.after_physics);
    let mut deltas = deltas.unwrap_or_else(|| BoneDeltas::new(bones, request.frame));
    let empty = BoneMorphDelta::default();

    for &index in &indexes {
        let Some(bone) = bones.get_bone(index) else {
            continue;
        };
        let frame = motion.bone_frame(&bone.name, request.frame);
        let delta = deltas.get_or_insert(index);
        delta.frame = request.frame;
        delta.fill_frame(&frame);
        delta.fill_morph(morphs.and_then(|m| m.bone(index)).unwrap_or(&empty));
        delta.global_ik_off_matrix = None;
    }

    if request.calc_ik {
        apply_bone_matrices(bones, &mut deltas, &indexes);
        apply_ik_deltas(bones, motion, morphs, request, &mut deltas, &indexes);
    }
    apply_bone_matrices(bones, &mut deltas, &indexes);

    deltas
}

/// 依变形顺序对启用中的 IK 骨骼求解
fn apply_ik_deltas(
    bones: &BoneManager,
    motion: &Motion,
    morphs: Option<&MorphDeltas>,
    request: &DeformRequest,
    deltas: &mut BoneDeltas,
    indexes: &[usize],
) {
    for &index in indexes {
        let Some(bone) = bones.get_bone(index).filter(|b| b.is_ik()) else {
            continue;
        };
        if !motion.is_ik_enabled(&bone.name, request.frame) {
            continue;
        }
        let Some(solver) = IkSolver::new(bones, index, indexes, request.remove_twist) else {
            continue;
        };

        // 记录 IK 前的全局矩阵，IK 骨骼的子骨骼以此为父
        for chain_index in bones.ik_chain_indexes(index) {
            if let Some(delta) = deltas.get_mut(chain_index) {
                delta.global_ik_off_matrix = Some(delta.global_matrix);
            }
        }

        let ik_off_goal = if solver.needs_ik_off_goal() {
            ik_off_target_position(bones, motion, morphs, request, solver.target_index())
        } else {
            None
        };
        solver.solve(deltas, ik_off_goal);
    }
}

/// IK 关闭时目标骨骼的位置
fn ik_off_target_position(
    bones: &BoneManager,
    motion: &Motion,
    morphs: Option<&MorphDeltas>,
    request: &DeformRequest,
    target_index: usize,
) -> Option<DVec3> {
    let target = bones.get_bone(target_index)?;
    let off_request = DeformRequest {
        frame: request.frame,
        bone_names: vec![target.name.clone()],
        calc_ik: false,
        after_physics: false,
        remove_twist: request.remove_twist,
    };
    compute_bone_deltas(bones, motion, morphs, &off_request, None).global_position(target_index)
}
