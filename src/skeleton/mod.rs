//! 骨骼系统和 IK 求解器

mod assembler;
mod bone;
mod delta;
mod evaluator;
mod ik_solver;
mod manager;

pub use assembler::{
    apply_bone_matrices, apply_global_matrix, total_position, total_rotation, total_scale,
};
pub use bone::{AngleLimit, Bone, Ik, IkLink};
pub use delta::{BoneDelta, BoneDeltas};
pub use evaluator::{compute_bone_deltas, DeformRequest};
pub use ik_solver::{ik_axis_value, solve_ik_limits, IkSolver};
pub use manager::BoneManager;
