//! 帧驱动
//!
//! 一帧的完整变形流程：
//! 1. 解析 Morph
//! 2. 物理前变形（含 IK）
//! 3. 物理协作：同步刚体、推进模拟、取回物理骨骼
//! 4. 物理后变形（含 IK）
//!
//! 多模型时物理只推进一次，其余阶段按模型并行。

use std::collections::HashSet;

use glam::{DMat4, DVec3};
use rayon::prelude::*;

use crate::animation::{FrameIndex, Motion};
use crate::config::{get_config, physics_verbose};
use crate::math::is_finite_mat4;
use crate::model::MmdModel;
use crate::morph::MorphDeltas;
use crate::physics::PhysicsCollaborator;
use crate::skeleton::{
    apply_global_matrix, compute_bone_deltas, BoneDelta, BoneDeltas, DeformRequest,
};
use crate::{MmdError, Result};

/// 物理步进参数
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PhysicsStep {
    pub enabled: bool,
    /// 重置中：所有刚体跟随骨骼，不取回结果
    pub reset: bool,
    /// 步长（秒）
    pub time_step: f64,
    /// 刚体同步的并行分块大小
    pub chunk_size: usize,
}

impl Default for PhysicsStep {
    fn default() -> Self {
        Self::from_config()
    }
}

impl PhysicsStep {
    /// 取自全局配置
    pub fn from_config() -> Self {
        let config = get_config();
        Self {
            enabled: config.physics_enabled,
            reset: config.physics_reset,
            time_step: config.time_step,
            chunk_size: config.rigid_body_chunk_size,
        }
    }

    pub fn with_time_step(mut self, time_step: f64) -> Self {
        self.time_step = time_step;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_reset(mut self, reset: bool) -> Self {
        self.reset = reset;
        self
    }

    fn is_active(&self) -> bool {
        self.enabled || self.reset
    }

    fn pulls_results(&self) -> bool {
        self.enabled && !self.reset
    }
}

/// 物理前阶段的结果
struct PrePhysics {
    morphs: MorphDeltas,
    deltas: BoneDeltas,
}

/// 单模型一帧变形
pub fn deform_model(
    model: &MmdModel,
    motion: &Motion,
    frame: impl Into<FrameIndex>,
    physics: Option<&dyn PhysicsCollaborator>,
    step: &PhysicsStep,
) -> Result<BoneDeltas> {
    let frame = frame.into();
    let mut state = deform_before_physics(model, motion, frame);

    if let Some(physics) = physics.filter(|_| step.is_active()) {
        sync_rigid_bodies(model, &state.deltas, physics, step);
        physics.step_simulation(step.time_step);
        pull_rigid_bodies(model, &mut state.deltas, physics, step, frame)?;
    }

    Ok(deform_after_physics(model, motion, frame, state))
}

/// 多模型同一帧变形，结果与输入顺序一致
///
/// 物理世界由所有模型共享，只推进一次。
pub fn deform_models(
    scenes: &[(&MmdModel, &Motion)],
    frame: impl Into<FrameIndex>,
    physics: Option<&dyn PhysicsCollaborator>,
    step: &PhysicsStep,
) -> Result<Vec<BoneDeltas>> {
    let frame = frame.into();
    let mut states: Vec<PrePhysics> = scenes
        .par_iter()
        .map(|(model, motion)| deform_before_physics(model, motion, frame))
        .collect();

    if let Some(physics) = physics.filter(|_| step.is_active()) {
        for ((model, _), state) in scenes.iter().zip(&states) {
            sync_rigid_bodies(model, &state.deltas, physics, step);
        }
        physics.step_simulation(step.time_step);
        states
            .par_iter_mut()
            .zip(scenes.par_iter())
            .map(|(state, (model, _))| {
                pull_rigid_bodies(model, &mut state.deltas, physics, step, frame)
            })
            .collect::<Result<Vec<()>>>()?;
    }

    let results = states
        .into_par_iter()
        .zip(scenes.par_iter())
        .map(|(state, (model, motion))| deform_after_physics(model, motion, frame, state))
        .collect();
    Ok(results)
}

fn deform_before_physics(model: &MmdModel, motion: &Motion, frame: FrameIndex) -> PrePhysics {
    let morphs = model.morph_manager.resolve_bone_morphs(motion, frame);
    let request = DeformRequest::new(frame);
    let deltas = compute_bone_deltas(&model.bone_manager, motion, Some(&morphs), &request, None);
    PrePhysics { morphs, deltas }
}

fn deform_after_physics(
    model: &MmdModel,
    motion: &Motion,
    frame: FrameIndex,
    state: PrePhysics,
) -> BoneDeltas {
    let request = DeformRequest::new(frame).after_physics();
    compute_bone_deltas(
        &model.bone_manager,
        motion,
        Some(&state.morphs),
        &request,
        Some(state.deltas),
    )
}

/// 把骨骼姿势推给刚体
///
/// 跟随骨骼的刚体总是同步；重置中所有刚体都同步。
fn sync_rigid_bodies(
    model: &MmdModel,
    deltas: &BoneDeltas,
    physics: &dyn PhysicsCollaborator,
    step: &PhysicsStep,
) {
    let bones = &model.bone_manager;
    model
        .rigid_bodies
        .par_chunks(step.chunk_size.max(1))
        .for_each(|chunk| {
            for rigid_body in chunk {
                if !(step.enabled && rigid_body.physics_type.follows_bone()) && !step.reset {
                    continue;
                }
                let Some(bone) = rigid_body.bone_index.and_then(|i| bones.get_bone(i)) else {
                    continue;
                };
                let global = deltas.global_matrix(bone.index);
                physics.update_transform(model.index, bone, global, rigid_body);
            }
        });
}

/// 取回物理驱动的骨骼矩阵
///
/// 物理骨骼之下没有刚体的子骨骼随之重算全局矩阵。
fn pull_rigid_bodies(
    model: &MmdModel,
    deltas: &mut BoneDeltas,
    physics: &dyn PhysicsCollaborator,
    step: &PhysicsStep,
    frame: FrameIndex,
) -> Result<()> {
    if !step.pulls_results() {
        return Ok(());
    }
    let bones = &model.bone_manager;
    let verbose = physics_verbose();
    let mut changed = HashSet::new();

    for &index in bones.sorted_indices() {
        let Some(bone) = bones.get_bone(index) else {
            continue;
        };
        let driven = model
            .rigid_body_for_bone(index)
            .filter(|rb| rb.physics_type.drives_bone());

        match driven {
            Some(rigid_body) => {
                let Some(matrix) = physics.rigid_body_bone_matrix(model.index, rigid_body) else {
                    continue;
                };
                if !is_finite_mat4(&matrix) {
                    return Err(MmdError::PhysicsDivergence {
                        model_index: model.index,
                        rigid_body: rigid_body.index,
                    });
                }
                let (parent_global, parent_position) = match bone.parent_index {
                    Some(parent) => (
                        deltas.global_matrix(parent),
                        bones.get_bone(parent).map_or(DVec3::ZERO, |p| p.position),
                    ),
                    None => (DMat4::IDENTITY, DVec3::ZERO),
                };
                if verbose {
                    log::debug!(
                        "物理骨骼 {} <- 刚体 {}: {:?}",
                        bone.name,
                        rigid_body.name,
                        matrix.w_axis.truncate()
                    );
                }
                deltas.update(BoneDelta::from_global_matrix(
                    bone,
                    frame,
                    matrix,
                    parent_global,
                    parent_position,
                ));
                changed.insert(index);
            }
            None => {
                if bone.parent_index.map_or(false, |p| changed.contains(&p)) {
                    apply_global_matrix(bones, deltas, index);
                    changed.insert(index);
                }
            }
        }
    }
    Ok(())
}
