//! MMD Deform - Rust 实现的 MMD 骨骼变形引擎
//!
//! 给定模型与动作，求出任意帧所有骨骼的世界空间姿势：
//! - 关键帧存储与贝塞尔插值
//! - 骨骼层级、付与（追加变换）、固定轴
//! - CCD-IK 求解（角度限制、万向锁回避）
//! - 物理前/物理后分段变形与物理协作接口

pub mod animation;
pub mod config;
pub mod deform;
pub mod math;
pub mod model;
pub mod morph;
pub mod physics;
pub mod skeleton;

pub use animation::{BezierCurve, BoneFrame, FrameIndex, Motion, MotionTrack};
pub use config::DeformConfig;
pub use deform::{deform_model, deform_models, PhysicsStep};
pub use model::MmdModel;
pub use morph::{Morph, MorphDeltas};
pub use physics::{PhysicsCollaborator, PhysicsType, RigidBody};
pub use skeleton::{compute_bone_deltas, Bone, BoneDelta, BoneDeltas, BoneManager, DeformRequest};

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MmdError {
    #[error("Missing bone: {0}")]
    MissingBone(String),

    #[error("Missing keyframes: {0}")]
    MissingKeyframes(String),

    #[error("Malformed chain at bone {bone}: {reason}")]
    MalformedChain { bone: usize, reason: String },

    #[error("Degenerate curve: ({0}, {1}) - ({2}, {3})")]
    DegenerateCurve(f64, f64, f64, f64),

    #[error("Physics divergence: model {model_index}, rigid body {rigid_body}")]
    PhysicsDivergence { model_index: usize, rigid_body: usize },

    #[error("Invalid model: {0}")]
    InvalidModel(String),
}

pub type Result<T> = std::result::Result<T, MmdError>;
