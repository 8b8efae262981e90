//! 动画轨道
//!
//! 单个通道（骨骼、Morph、IK 开关、相机）的有序关键帧存储。
//! 两组索引：全部帧与登录帧；只有登录帧作为插值端点。

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound::{Excluded, Unbounded};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::keyframe::{BoneFrame, CameraFrame, FrameIndex, IkFrame, Keyframe, MorphFrame};

#[derive(Debug, Clone)]
struct TrackData<F> {
    values: BTreeMap<FrameIndex, F>,
    registered: BTreeSet<FrameIndex>,
}

/// 关键帧轨道（读共享锁，写独占锁）
#[derive(Debug)]
pub struct MotionTrack<F: Keyframe> {
    data: RwLock<TrackData<F>>,
}

pub type BoneMotionTrack = MotionTrack<BoneFrame>;
pub type MorphMotionTrack = MotionTrack<MorphFrame>;
pub type IkMotionTrack = MotionTrack<IkFrame>;
pub type CameraMotionTrack = MotionTrack<CameraFrame>;

impl<F: Keyframe> MotionTrack<F> {
    pub fn new() -> Self {
        Self {
            data: RwLock::new(TrackData {
                values: BTreeMap::new(),
                registered: BTreeSet::new(),
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, TrackData<F>> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, TrackData<F>> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// 求指定帧的值
    ///
    /// 命中已有帧原样返回；区间外钳制到端点；区间内由前后登录帧插值。
    pub fn get(&self, frame: impl Into<FrameIndex>) -> F {
        let frame = frame.into();
        let data = self.read();

        if let Some(value) = data.values.get(&frame) {
            return value.clone();
        }

        let (Some(&min), Some(&max)) = (data.registered.first(), data.registered.last()) else {
            return F::identity(frame);
        };

        let stored = |index: FrameIndex| data.values.get(&index);

        if frame < min {
            return stored(min).map_or_else(|| F::identity(frame), |f| f.copy_with_index(frame));
        }
        if frame > max {
            return stored(max).map_or_else(|| F::identity(frame), |f| f.copy_with_index(frame));
        }

        let prev = data.registered.range(..frame).next_back().copied().unwrap_or(min);
        let next = data
            .registered
            .range((Excluded(frame), Unbounded))
            .next()
            .copied()
            .unwrap_or(max);

        match (stored(prev), stored(next)) {
            (Some(p), Some(n)) => n.lerp_frame(p, frame),
            (Some(p), None) => p.copy_with_index(frame),
            (None, Some(n)) => n.copy_with_index(frame),
            (None, None) => F::identity(frame),
        }
    }

    /// 是否存在精确帧
    pub fn contains(&self, frame: impl Into<FrameIndex>) -> bool {
        self.read().values.contains_key(&frame.into())
    }

    /// 是否存在登录帧
    pub fn contains_registered(&self, frame: impl Into<FrameIndex>) -> bool {
        self.read().registered.contains(&frame.into())
    }

    /// 插入关键帧；落在两个登录帧之间时分割后帧的曲线
    pub fn insert(&self, mut frame: F) {
        let mut data = self.write();
        let index = frame.index();

        if frame.is_registered() && !data.values.contains_key(&index) {
            let prev = data.registered.range(..index).next_back().copied();
            let next = data.registered.range((Excluded(index), Unbounded)).next().copied();
            if let (Some(prev), Some(next)) = (prev, next) {
                let prev_frame = data.values.get(&prev).cloned();
                if let (Some(prev_frame), Some(next_frame)) = (prev_frame, data.values.get_mut(&next)) {
                    frame.split_curve(&prev_frame, next_frame, index);
                }
            }
        }

        Self::store(&mut data, frame);
    }

    /// 追加关键帧（不分割曲线）
    pub fn append(&self, frame: F) {
        let mut data = self.write();
        Self::store(&mut data, frame);
    }

    /// 替换已有关键帧；不存在时等同 append
    pub fn update(&self, frame: F) {
        let mut data = self.write();
        let index = frame.index();
        data.registered.remove(&index);
        Self::store(&mut data, frame);
    }

    /// 删除关键帧
    pub fn delete(&self, frame: impl Into<FrameIndex>) -> Option<F> {
        let frame = frame.into();
        let mut data = self.write();
        data.registered.remove(&frame);
        data.values.remove(&frame)
    }

    fn store(data: &mut TrackData<F>, frame: F) {
        let index = frame.index();
        if frame.is_registered() {
            data.registered.insert(index);
        } else {
            data.registered.remove(&index);
        }
        data.values.insert(index, frame);
    }

    /// 严格小于 frame 的最大登录帧；没有时返回最小登录帧
    pub fn prev_frame(&self, frame: impl Into<FrameIndex>) -> Option<FrameIndex> {
        let frame = frame.into();
        let data = self.read();
        data.registered
            .range(..frame)
            .next_back()
            .or_else(|| data.registered.first())
            .copied()
    }

    /// 严格大于 frame 的最小登录帧；没有时返回最大登录帧
    pub fn next_frame(&self, frame: impl Into<FrameIndex>) -> Option<FrameIndex> {
        let frame = frame.into();
        let data = self.read();
        data.registered
            .range((Excluded(frame), Unbounded))
            .next()
            .or_else(|| data.registered.last())
            .copied()
    }

    pub fn min_frame(&self) -> Option<FrameIndex> {
        self.read().registered.first().copied()
    }

    pub fn max_frame(&self) -> Option<FrameIndex> {
        self.read().registered.last().copied()
    }

    /// 全部帧索引
    pub fn indexes(&self) -> Vec<FrameIndex> {
        self.read().values.keys().copied().collect()
    }

    /// 登录帧索引
    pub fn registered_indexes(&self) -> Vec<FrameIndex> {
        self.read().registered.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.read().values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().values.is_empty()
    }

    /// 登录帧数量
    pub fn registered_len(&self) -> usize {
        self.read().registered.len()
    }
}

impl<F: Keyframe> Default for MotionTrack<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: Keyframe> Clone for MotionTrack<F> {
    fn clone(&self) -> Self {
        Self {
            data: RwLock::new(self.read().clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::bezier::{BezierCurve, BoneCurves};
    use glam::{DVec2, DVec3};
    use pretty_assertions::assert_eq;

    fn pos(track: &BoneMotionTrack, frame: f32) -> DVec3 {
        track.get(frame).position.unwrap_or_default()
    }

    #[test]
    fn test_empty_track_returns_identity() {
        let track = BoneMotionTrack::new();
        let frame = track.get(12u32);
        assert_eq!(frame.index, FrameIndex(12.0));
        assert!(frame.is_identity());
        assert!(!frame.registered);
    }

    #[test]
    fn test_exact_hit_returns_stored() {
        let track = BoneMotionTrack::new();
        let stored = BoneFrame::registered(3u32).with_position(DVec3::new(1.0, 2.0, 3.0));
        track.insert(stored.clone());
        assert_eq!(track.get(3u32), stored);
    }

    #[test]
    fn test_clamps_outside_range() {
        let track = BoneMotionTrack::new();
        track.insert(BoneFrame::registered(10u32).with_position(DVec3::X));
        track.insert(BoneFrame::registered(20u32).with_position(DVec3::Y));

        let before = track.get(0u32);
        assert_eq!(before.index, FrameIndex(0.0));
        assert_eq!(before.position, Some(DVec3::X));
        assert_eq!(pos(&track, 25.0), DVec3::Y);
    }

    #[test]
    fn test_single_frame_copies() {
        let track = BoneMotionTrack::new();
        track.insert(BoneFrame::registered(5u32).with_position(DVec3::Z));
        assert_eq!(pos(&track, 0.0), DVec3::Z);
        assert_eq!(pos(&track, 50.0), DVec3::Z);
    }

    #[test]
    fn test_linear_interpolation() {
        let track = BoneMotionTrack::new();
        track.insert(BoneFrame::registered(0u32).with_position(DVec3::ZERO));
        track.insert(BoneFrame::registered(10u32).with_position(DVec3::new(10.0, 0.0, 0.0)));
        assert!(pos(&track, 5.0).abs_diff_eq(DVec3::new(5.0, 0.0, 0.0), 1e-9));
        assert!(pos(&track, 2.5).abs_diff_eq(DVec3::new(2.5, 0.0, 0.0), 1e-9));
    }

    #[test]
    fn test_unregistered_frames_are_not_endpoints() {
        let track = BoneMotionTrack::new();
        track.insert(BoneFrame::registered(0u32));
        track.insert(BoneFrame::new(5u32).with_position(DVec3::splat(100.0)));
        track.insert(BoneFrame::registered(10u32).with_position(DVec3::new(10.0, 0.0, 0.0)));
        assert!(pos(&track, 4.0).abs_diff_eq(DVec3::new(4.0, 0.0, 0.0), 1e-9));
        // 精确命中仍返回存储值
        assert_eq!(pos(&track, 5.0), DVec3::splat(100.0));
        assert_eq!(track.registered_len(), 2);
        assert_eq!(track.len(), 3);
    }

    #[test]
    fn test_prev_next_queries() {
        let track = BoneMotionTrack::new();
        for i in [0u32, 10, 20] {
            track.insert(BoneFrame::registered(i));
        }
        assert_eq!(track.prev_frame(10u32), Some(FrameIndex(0.0)));
        assert_eq!(track.next_frame(10u32), Some(FrameIndex(20.0)));
        assert_eq!(track.prev_frame(0u32), Some(FrameIndex(0.0)));
        assert_eq!(track.next_frame(30u32), Some(FrameIndex(20.0)));
        assert_eq!(track.prev_frame(10.5f32), Some(FrameIndex(10.0)));
    }

    #[test]
    fn test_fractional_frames() {
        let track = BoneMotionTrack::new();
        track.insert(BoneFrame::registered(0.5f32));
        track.insert(BoneFrame::registered(1.5f32).with_position(DVec3::X));
        assert!(track.contains(0.5f32));
        assert!(!track.contains(1.0f32));
        assert!(pos(&track, 1.0).abs_diff_eq(DVec3::new(0.5, 0.0, 0.0), 1e-9));
    }

    #[test]
    fn test_insert_splits_curves_and_preserves_shape() {
        let ease = BezierCurve::new(DVec2::new(63.5, 0.0), DVec2::new(63.5, 127.0));
        let curves = BoneCurves {
            translate_x: ease,
            translate_y: ease,
            translate_z: ease,
            rotate: ease,
        };

        let reference = BoneMotionTrack::new();
        reference.insert(BoneFrame::registered(0u32));
        reference.insert(
            BoneFrame::registered(10u32)
                .with_position(DVec3::new(10.0, 0.0, 0.0))
                .with_curves(curves),
        );

        let split = reference.clone();
        let middle = reference.get(4u32);
        let mut key = BoneFrame::registered(4u32);
        key.position = middle.position;
        key.rotation = middle.rotation;
        split.insert(key);

        assert!(split.get(10u32).curves != Some(curves));
        for f in [1.0f32, 2.0, 3.0, 5.0, 7.0, 9.0] {
            let a = pos(&reference, f);
            let b = pos(&split, f);
            assert!((a.x - b.x).abs() < 1e-4, "frame {}: {} vs {}", f, a.x, b.x);
        }
    }

    #[test]
    fn test_append_does_not_split() {
        let ease = BezierCurve::new(DVec2::new(63.5, 0.0), DVec2::new(63.5, 127.0));
        let curves = BoneCurves {
            rotate: ease,
            ..BoneCurves::new()
        };
        let track = BoneMotionTrack::new();
        track.insert(BoneFrame::registered(0u32));
        track.insert(BoneFrame::registered(10u32).with_curves(curves));
        track.append(BoneFrame::registered(5u32));
        assert_eq!(track.get(10u32).curves, Some(curves));
    }

    #[test]
    fn test_update_and_delete() {
        let track = MorphMotionTrack::new();
        track.insert(MorphFrame::new(0u32, 0.0));
        track.insert(MorphFrame::new(10u32, 1.0));
        track.update(MorphFrame::new(10u32, 0.5));
        assert!((track.get(10u32).ratio - 0.5).abs() < 1e-12);
        assert!((track.get(5u32).ratio - 0.25).abs() < 1e-12);

        let removed = track.delete(10u32);
        assert_eq!(removed.map(|f| f.ratio), Some(0.5));
        assert!(!track.contains_registered(10u32));
        assert_eq!(track.max_frame(), Some(FrameIndex(0.0)));
        assert_eq!(track.delete(99u32), None);
    }

    #[test]
    fn test_ik_track_step() {
        let track = IkMotionTrack::new();
        track.insert(IkFrame::new(0u32).with_ik("右足ＩＫ", true));
        track.insert(IkFrame::new(100u32).with_ik("右足ＩＫ", false));
        assert!(track.get(99u32).is_enable("右足ＩＫ"));
        assert!(!track.get(100u32).is_enable("右足ＩＫ"));
        assert!(!track.get(150u32).is_enable("右足ＩＫ"));
    }
}
