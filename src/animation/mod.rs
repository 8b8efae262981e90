//! 动画系统
//!
//! 关键帧存储、贝塞尔插值与动画数据容器。

mod bezier;
mod keyframe;
mod motion;
mod motion_track;

pub use bezier::{BezierCurve, BoneCurves, CameraCurves, LINEAR_END, LINEAR_START};
pub use keyframe::{BoneFrame, CameraFrame, FrameIndex, IkEnabled, IkFrame, Keyframe, MorphFrame};
pub use motion::Motion;
pub use motion_track::{
    BoneMotionTrack, CameraMotionTrack, IkMotionTrack, MorphMotionTrack, MotionTrack,
};
