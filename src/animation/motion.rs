//! Motion 核心数据结构
//!
//! 存储完整的动画数据：骨骼轨道、Morph 轨道、IK 开关轨道与相机轨道。

use std::collections::HashMap;

use super::keyframe::{BoneFrame, CameraFrame, FrameIndex, IkFrame, MorphFrame};
use super::motion_track::{BoneMotionTrack, CameraMotionTrack, IkMotionTrack, MorphMotionTrack};
use crate::{MmdError, Result};

/// 动画数据
#[derive(Debug, Clone, Default)]
pub struct Motion {
    pub name: String,
    /// 骨骼动画轨道（骨骼名称 -> 轨道）
    pub bone_tracks: HashMap<String, BoneMotionTrack>,
    /// Morph 动画轨道（Morph 名称 -> 轨道）
    pub morph_tracks: HashMap<String, MorphMotionTrack>,
    /// IK 开关轨道（单一轨道，每帧列出各 IK 骨骼的开关）
    pub ik_track: IkMotionTrack,
    /// 相机动画轨道
    pub camera_track: CameraMotionTrack,
}

impl Motion {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// 最大登录帧索引
    pub fn max_frame(&self) -> FrameIndex {
        let bone_max = self.bone_tracks.values().filter_map(|t| t.max_frame());
        let morph_max = self.morph_tracks.values().filter_map(|t| t.max_frame());
        bone_max
            .chain(morph_max)
            .chain(self.ik_track.max_frame())
            .chain(self.camera_track.max_frame())
            .max()
            .unwrap_or_default()
    }

    /// 插入骨骼关键帧（可能分割曲线）
    pub fn insert_bone_frame(&mut self, name: &str, frame: BoneFrame) {
        self.bone_tracks
            .entry(name.to_string())
            .or_default()
            .insert(frame);
    }

    /// 插入 Morph 关键帧
    pub fn insert_morph_frame(&mut self, name: &str, frame: MorphFrame) {
        self.morph_tracks
            .entry(name.to_string())
            .or_default()
            .insert(frame);
    }

    pub fn insert_ik_frame(&mut self, frame: IkFrame) {
        self.ik_track.insert(frame);
    }

    pub fn insert_camera_frame(&mut self, frame: CameraFrame) {
        self.camera_track.insert(frame);
    }

    /// 骨骼轨道
    pub fn bone_track(&self, name: &str) -> Result<&BoneMotionTrack> {
        self.bone_tracks
            .get(name)
            .ok_or_else(|| MmdError::MissingKeyframes(name.to_string()))
    }

    /// 指定骨骼在指定帧的值；没有轨道时为单位帧
    pub fn bone_frame(&self, name: &str, frame: impl Into<FrameIndex>) -> BoneFrame {
        let frame = frame.into();
        match self.bone_track(name) {
            Ok(track) => track.get(frame),
            Err(_) => BoneFrame::new(frame),
        }
    }

    /// 指定 Morph 在指定帧的权重；没有轨道时为 0
    pub fn morph_ratio(&self, name: &str, frame: impl Into<FrameIndex>) -> f64 {
        self.morph_tracks
            .get(name)
            .map_or(0.0, |track| track.get(frame).ratio)
    }

    /// IK 骨骼在指定帧是否启用
    ///
    /// 没有 IK 开关帧、或早于第一个登录帧时默认启用。
    pub fn is_ik_enabled(&self, name: &str, frame: impl Into<FrameIndex>) -> bool {
        let frame = frame.into();
        match self.ik_track.min_frame() {
            Some(min) if frame >= min => self.ik_track.get(frame).is_enable(name),
            _ => true,
        }
    }

    pub fn camera_frame(&self, frame: impl Into<FrameIndex>) -> CameraFrame {
        self.camera_track.get(frame)
    }

    pub fn has_camera_data(&self) -> bool {
        !self.camera_track.is_empty()
    }

    /// 骨骼轨道名称列表
    pub fn bone_track_names(&self) -> impl Iterator<Item = &String> {
        self.bone_tracks.keys()
    }

    /// Morph 轨道名称列表
    pub fn morph_track_names(&self) -> impl Iterator<Item = &String> {
        self.morph_tracks.keys()
    }

    pub fn contains_bone_track(&self, name: &str) -> bool {
        self.bone_tracks.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::DVec3;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_motion_duration() {
        let mut motion = Motion::new("test");
        assert_eq!(motion.max_frame(), FrameIndex(0.0));
        motion.insert_bone_frame("センター", BoneFrame::registered(30u32));
        motion.insert_morph_frame("あ", MorphFrame::new(45u32, 1.0));
        motion.insert_ik_frame(IkFrame::new(12u32));
        assert_eq!(motion.max_frame(), FrameIndex(45.0));
    }

    #[test]
    fn test_missing_track() {
        let motion = Motion::new("test");
        assert_eq!(
            motion.bone_track("上半身").err(),
            Some(MmdError::MissingKeyframes("上半身".to_string()))
        );
        assert!(motion.bone_frame("上半身", 10u32).is_identity());
        assert_eq!(motion.morph_ratio("あ", 10u32), 0.0);
    }

    #[test]
    fn test_bone_frame_lookup() {
        let mut motion = Motion::new("test");
        motion.insert_bone_frame("センター", BoneFrame::registered(0u32));
        motion.insert_bone_frame(
            "センター",
            BoneFrame::registered(10u32).with_position(DVec3::new(0.0, 10.0, 0.0)),
        );
        let frame = motion.bone_frame("センター", 5u32);
        assert!(frame.position.unwrap_or_default().abs_diff_eq(DVec3::new(0.0, 5.0, 0.0), 1e-9));
    }

    #[test]
    fn test_ik_enabled_defaults() {
        let mut motion = Motion::new("test");
        assert!(motion.is_ik_enabled("左足ＩＫ", 0u32));
        motion.insert_ik_frame(IkFrame::new(100u32).with_ik("左足ＩＫ", false));
        assert!(motion.is_ik_enabled("左足ＩＫ", 99u32));
        assert!(!motion.is_ik_enabled("左足ＩＫ", 100u32));
        assert!(motion.is_ik_enabled("右足ＩＫ", 100u32));
    }
}
