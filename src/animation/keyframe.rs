//! 动画关键帧
//!
//! 骨骼、Morph、IK 开关、相机四类关键帧及其帧间插值。

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use glam::{DQuat, DVec3, DVec4};

use super::bezier::{BoneCurves, CameraCurves};
use crate::math::{quat_from_degrees, quat_to_degrees, QuatExt};

/// 帧索引（允许小数帧，按 IEEE 值全序比较）
#[derive(Clone, Copy, Debug, Default)]
pub struct FrameIndex(pub f32);

impl FrameIndex {
    pub fn new(value: f32) -> Self {
        Self(value)
    }

    pub fn value(self) -> f32 {
        self.0
    }
}

impl PartialEq for FrameIndex {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for FrameIndex {}

impl PartialOrd for FrameIndex {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FrameIndex {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl Hash for FrameIndex {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

impl From<f32> for FrameIndex {
    fn from(value: f32) -> Self {
        Self(value)
    }
}

impl From<u32> for FrameIndex {
    fn from(value: u32) -> Self {
        Self(value as f32)
    }
}

/// 关键帧公共行为
pub trait Keyframe: Clone + Send + Sync {
    /// 指定帧的单位（无变换）关键帧
    fn identity(index: FrameIndex) -> Self;

    fn index(&self) -> FrameIndex;

    fn set_index(&mut self, index: FrameIndex);

    /// 是否为登录帧（参与插值区间查找）
    fn is_registered(&self) -> bool;

    fn set_registered(&mut self, registered: bool);

    /// 以 self 为后帧、prev 为前帧求 index 处的插值帧
    fn lerp_frame(&self, prev: &Self, index: FrameIndex) -> Self;

    /// 在 prev 与 next 之间插入 self 时分割 next 的曲线
    fn split_curve(&mut self, _prev: &Self, _next: &mut Self, _index: FrameIndex) {}

    /// 复制并替换帧索引（结果为未登录帧）
    fn copy_with_index(&self, index: FrameIndex) -> Self {
        let mut frame = self.clone();
        frame.set_index(index);
        frame.set_registered(false);
        frame
    }
}

/// 骨骼关键帧
#[derive(Clone, Debug, PartialEq)]
pub struct BoneFrame {
    pub index: FrameIndex,
    pub registered: bool,
    /// 是否来自文件
    pub read: bool,
    pub position: Option<DVec3>,
    pub rotation: Option<DQuat>,
    pub scale: Option<DVec3>,
    pub cancelable_position: Option<DVec3>,
    pub cancelable_rotation: Option<DQuat>,
    pub cancelable_scale: Option<DVec3>,
    pub curves: Option<BoneCurves>,
}

impl BoneFrame {
    pub fn new(index: impl Into<FrameIndex>) -> Self {
        Self {
            index: index.into(),
            registered: false,
            read: false,
            position: None,
            rotation: None,
            scale: None,
            cancelable_position: None,
            cancelable_rotation: None,
            cancelable_scale: None,
            curves: None,
        }
    }

    /// 登录帧（作为插值端点）
    pub fn registered(index: impl Into<FrameIndex>) -> Self {
        Self {
            registered: true,
            ..Self::new(index)
        }
    }

    pub fn with_position(mut self, position: DVec3) -> Self {
        self.position = Some(position);
        self
    }

    pub fn with_rotation(mut self, rotation: DQuat) -> Self {
        self.rotation = Some(rotation);
        self
    }

    pub fn with_scale(mut self, scale: DVec3) -> Self {
        self.scale = Some(scale);
        self
    }

    pub fn with_curves(mut self, curves: BoneCurves) -> Self {
        self.curves = Some(curves);
        self
    }

    /// 是否没有任何变换
    pub fn is_identity(&self) -> bool {
        self.position.map_or(true, |v| v.abs_diff_eq(DVec3::ZERO, 1e-12))
            && self.rotation.map_or(true, |q| q.is_ident())
            && self.scale.map_or(true, |v| v.abs_diff_eq(DVec3::ONE, 1e-12))
            && self.cancelable_position.map_or(true, |v| v.abs_diff_eq(DVec3::ZERO, 1e-12))
            && self.cancelable_rotation.map_or(true, |q| q.is_ident())
            && self.cancelable_scale.map_or(true, |v| v.abs_diff_eq(DVec3::ONE, 1e-12))
    }
}

impl Keyframe for BoneFrame {
    fn identity(index: FrameIndex) -> Self {
        BoneFrame::new(index)
    }

    fn index(&self) -> FrameIndex {
        self.index
    }

    fn set_index(&mut self, index: FrameIndex) {
        self.index = index;
    }

    fn is_registered(&self) -> bool {
        self.registered
    }

    fn set_registered(&mut self, registered: bool) {
        self.registered = registered;
    }

    fn lerp_frame(&self, prev: &Self, index: FrameIndex) -> Self {
        let next = self;
        let curves = next.curves.unwrap_or_default();
        let (xy, yy, zy, ry) = curves.evaluate(prev.index.0, index.0, next.index.0);

        let slerp = |a: Option<DQuat>, b: Option<DQuat>| {
            a.unwrap_or(DQuat::IDENTITY)
                .slerp_mmd(&b.unwrap_or(DQuat::IDENTITY), ry)
        };

        let prev_pos = prev.position.unwrap_or(DVec3::ZERO);
        let next_pos = next.position.unwrap_or(DVec3::ZERO);
        let prev_cancel_pos = prev.cancelable_position.unwrap_or(DVec3::ZERO);
        let next_cancel_pos = next.cancelable_position.unwrap_or(DVec3::ZERO);
        let prev_scale = prev.scale.unwrap_or(DVec3::ONE);
        let next_scale = next.scale.unwrap_or(DVec3::ONE);
        let prev_cancel_scale = prev.cancelable_scale.unwrap_or(DVec3::ONE);
        let next_cancel_scale = next.cancelable_scale.unwrap_or(DVec3::ONE);

        // 每个轴的四个通道打包成一个 4 维向量，由同一权重驱动
        let pack = |axis: usize, pos: DVec3, cancel_pos: DVec3, scale: DVec3, cancel_scale: DVec3| {
            DVec4::new(pos[axis], cancel_pos[axis], scale[axis], cancel_scale[axis])
        };
        let now = |axis: usize, t: f64| {
            pack(axis, prev_pos, prev_cancel_pos, prev_scale, prev_cancel_scale).lerp(
                pack(axis, next_pos, next_cancel_pos, next_scale, next_cancel_scale),
                t,
            )
        };
        let now_x = now(0, xy);
        let now_y = now(1, yy);
        let now_z = now(2, zy);

        Self {
            position: Some(DVec3::new(now_x.x, now_y.x, now_z.x)),
            rotation: Some(slerp(prev.rotation, next.rotation)),
            scale: Some(DVec3::new(now_x.z, now_y.z, now_z.z)),
            cancelable_position: Some(DVec3::new(now_x.y, now_y.y, now_z.y)),
            cancelable_rotation: Some(slerp(prev.cancelable_rotation, next.cancelable_rotation)),
            cancelable_scale: Some(DVec3::new(now_x.w, now_y.w, now_z.w)),
            ..Self::new(index)
        }
    }

    fn split_curve(&mut self, prev: &Self, next: &mut Self, index: FrameIndex) {
        let Some(next_curves) = next.curves.as_mut() else {
            self.curves = Some(BoneCurves::new());
            return;
        };
        self.curves = Some(next_curves.split(prev.index.0, index.0, next.index.0));
    }
}

/// Morph 关键帧
#[derive(Clone, Debug, PartialEq)]
pub struct MorphFrame {
    pub index: FrameIndex,
    pub registered: bool,
    pub read: bool,
    pub ratio: f64,
}

impl MorphFrame {
    pub fn new(index: impl Into<FrameIndex>, ratio: f64) -> Self {
        Self {
            index: index.into(),
            registered: true,
            read: false,
            ratio,
        }
    }
}

impl Keyframe for MorphFrame {
    fn identity(index: FrameIndex) -> Self {
        Self {
            registered: false,
            ..MorphFrame::new(index, 0.0)
        }
    }

    fn index(&self) -> FrameIndex {
        self.index
    }

    fn set_index(&mut self, index: FrameIndex) {
        self.index = index;
    }

    fn is_registered(&self) -> bool {
        self.registered
    }

    fn set_registered(&mut self, registered: bool) {
        self.registered = registered;
    }

    fn lerp_frame(&self, prev: &Self, index: FrameIndex) -> Self {
        let span = self.index.0 as f64 - prev.index.0 as f64;
        let t = if span <= 0.0 {
            0.0
        } else {
            ((index.0 as f64 - prev.index.0 as f64) / span).clamp(0.0, 1.0)
        };
        let ratio = prev.ratio + (self.ratio - prev.ratio) * t;
        Self {
            registered: false,
            ..MorphFrame::new(index, if ratio.is_finite() { ratio } else { 0.0 })
        }
    }
}

/// 单个 IK 骨骼的开关
#[derive(Clone, Debug, PartialEq)]
pub struct IkEnabled {
    pub bone_name: String,
    pub enabled: bool,
}

impl IkEnabled {
    pub fn new(bone_name: &str, enabled: bool) -> Self {
        Self {
            bone_name: bone_name.to_string(),
            enabled,
        }
    }
}

/// IK 开关关键帧（阶跃插值：前帧生效）
#[derive(Clone, Debug, PartialEq)]
pub struct IkFrame {
    pub index: FrameIndex,
    pub registered: bool,
    pub read: bool,
    pub visible: bool,
    pub ik_list: Vec<IkEnabled>,
}

impl IkFrame {
    pub fn new(index: impl Into<FrameIndex>) -> Self {
        Self {
            index: index.into(),
            registered: true,
            read: false,
            visible: true,
            ik_list: Vec::new(),
        }
    }

    pub fn with_ik(mut self, bone_name: &str, enabled: bool) -> Self {
        self.ik_list.push(IkEnabled::new(bone_name, enabled));
        self
    }

    /// 指定 IK 骨骼是否启用（未列出时默认启用）
    pub fn is_enable(&self, bone_name: &str) -> bool {
        self.ik_list
            .iter()
            .find(|ik| ik.bone_name == bone_name)
            .map_or(true, |ik| ik.enabled)
    }
}

impl Keyframe for IkFrame {
    fn identity(index: FrameIndex) -> Self {
        Self {
            registered: false,
            ..IkFrame::new(index)
        }
    }

    fn index(&self) -> FrameIndex {
        self.index
    }

    fn set_index(&mut self, index: FrameIndex) {
        self.index = index;
    }

    fn is_registered(&self) -> bool {
        self.registered
    }

    fn set_registered(&mut self, registered: bool) {
        self.registered = registered;
    }

    fn lerp_frame(&self, prev: &Self, index: FrameIndex) -> Self {
        prev.copy_with_index(index)
    }
}

/// 相机关键帧
#[derive(Clone, Debug, PartialEq)]
pub struct CameraFrame {
    pub index: FrameIndex,
    pub registered: bool,
    pub read: bool,
    pub position: DVec3,
    /// MMD 欧拉角（度）
    pub degrees: DVec3,
    pub distance: f64,
    pub view_of_angle: u32,
    pub perspective: bool,
    pub curves: CameraCurves,
}

impl CameraFrame {
    pub fn new(index: impl Into<FrameIndex>) -> Self {
        Self {
            index: index.into(),
            registered: true,
            read: false,
            position: DVec3::ZERO,
            degrees: DVec3::ZERO,
            distance: 0.0,
            view_of_angle: 30,
            perspective: true,
            curves: CameraCurves::new(),
        }
    }

    /// 由欧拉角得到的旋转
    pub fn rotation(&self) -> DQuat {
        quat_from_degrees(self.degrees)
    }
}

impl Keyframe for CameraFrame {
    fn identity(index: FrameIndex) -> Self {
        Self {
            registered: false,
            ..CameraFrame::new(index)
        }
    }

    fn index(&self) -> FrameIndex {
        self.index
    }

    fn set_index(&mut self, index: FrameIndex) {
        self.index = index;
    }

    fn is_registered(&self) -> bool {
        self.registered
    }

    fn set_registered(&mut self, registered: bool) {
        self.registered = registered;
    }

    fn lerp_frame(&self, prev: &Self, index: FrameIndex) -> Self {
        let next = self;
        let [xy, yy, zy, ry, dy, vy] = next.curves.evaluate(prev.index.0, index.0, next.index.0);
        let lerp = |a: f64, b: f64, t: f64| a + (b - a) * t;

        let rotation = prev.rotation().slerp_mmd(&next.rotation(), ry);
        let view_of_angle = lerp(prev.view_of_angle as f64, next.view_of_angle as f64, vy);

        Self {
            registered: false,
            position: DVec3::new(
                lerp(prev.position.x, next.position.x, xy),
                lerp(prev.position.y, next.position.y, yy),
                lerp(prev.position.z, next.position.z, zy),
            ),
            degrees: quat_to_degrees(rotation),
            distance: lerp(prev.distance, next.distance, dy),
            view_of_angle: view_of_angle.max(0.0) as u32,
            perspective: next.perspective,
            ..CameraFrame::new(index)
        }
    }

    fn split_curve(&mut self, prev: &Self, next: &mut Self, index: FrameIndex) {
        self.curves = next.curves.split(prev.index.0, index.0, next.index.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::DVec2;
    use pretty_assertions::assert_eq;
    use std::f64::consts::FRAC_PI_2;

    use crate::animation::bezier::BezierCurve;

    #[test]
    fn test_frame_index_ordering() {
        let mut indexes = vec![FrameIndex(10.0), FrameIndex(0.5), FrameIndex(3.0)];
        indexes.sort();
        assert_eq!(indexes, vec![FrameIndex(0.5), FrameIndex(3.0), FrameIndex(10.0)]);
        assert_eq!(FrameIndex::from(7u32), FrameIndex(7.0));
    }

    #[test]
    fn test_bone_lerp_linear() {
        let prev = BoneFrame::registered(0u32).with_position(DVec3::ZERO);
        let next = BoneFrame::registered(10u32).with_position(DVec3::new(10.0, -4.0, 2.0));
        let now = next.lerp_frame(&prev, FrameIndex(5.0));
        assert!(!now.registered);
        assert!(now.position.unwrap_or_default().abs_diff_eq(DVec3::new(5.0, -2.0, 1.0), 1e-9));
        assert!(now.scale.unwrap_or_default().abs_diff_eq(DVec3::ONE, 1e-12));
        assert!(now.rotation.unwrap_or_default().is_ident());
    }

    #[test]
    fn test_bone_lerp_rotation_slerp() {
        let prev = BoneFrame::registered(0u32);
        let next = BoneFrame::registered(30u32).with_rotation(DQuat::from_rotation_y(FRAC_PI_2));
        let now = next.lerp_frame(&prev, FrameIndex(15.0));
        let v = now.rotation.unwrap_or_default() * DVec3::X;
        let h = std::f64::consts::FRAC_1_SQRT_2;
        assert!(v.abs_diff_eq(DVec3::new(h, 0.0, -h), 1e-9), "{:?}", v);
    }

    #[test]
    fn test_bone_lerp_axes_use_own_curves() {
        let ease = BezierCurve::new(DVec2::new(63.5, 0.0), DVec2::new(63.5, 127.0));
        let curves = BoneCurves {
            translate_x: ease,
            ..BoneCurves::new()
        };
        let prev = BoneFrame::registered(0u32);
        let next = BoneFrame::registered(10u32)
            .with_position(DVec3::new(10.0, 10.0, 0.0))
            .with_curves(curves);
        let now = next.lerp_frame(&prev, FrameIndex(2.0));
        let pos = now.position.unwrap_or_default();
        // X 走缓动曲线，Y 保持线性
        assert!(pos.x < 2.0);
        assert!((pos.y - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_bone_split_curve_keeps_right_half_on_next() {
        let ease = BezierCurve::new(DVec2::new(63.5, 0.0), DVec2::new(63.5, 127.0));
        let prev = BoneFrame::registered(0u32);
        let mut next = BoneFrame::registered(10u32).with_curves(BoneCurves {
            rotate: ease,
            ..BoneCurves::new()
        });
        let mut middle = BoneFrame::registered(4u32);
        middle.split_curve(&prev, &mut next, FrameIndex(4.0));
        let left = middle.curves.unwrap_or_default().rotate;
        let right = next.curves.unwrap_or_default().rotate;
        assert!(!left.is_linear());
        assert!(!right.is_linear());
        assert!(left != ease && right != ease);
    }

    #[test]
    fn test_morph_lerp_is_linear() {
        let prev = MorphFrame::new(0u32, 0.0);
        let next = MorphFrame::new(4u32, 1.0);
        let now = next.lerp_frame(&prev, FrameIndex(1.0));
        assert!((now.ratio - 0.25).abs() < 1e-12);
        assert!(!now.registered);
    }

    #[test]
    fn test_ik_frame_step_interpolation() {
        let prev = IkFrame::new(0u32).with_ik("左足ＩＫ", false);
        let next = IkFrame::new(10u32).with_ik("左足ＩＫ", true);
        let now = next.lerp_frame(&prev, FrameIndex(9.0));
        assert!(!now.is_enable("左足ＩＫ"));
        assert!(now.is_enable("右足ＩＫ"));
        assert_eq!(now.index, FrameIndex(9.0));
    }

    #[test]
    fn test_camera_lerp() {
        let prev = CameraFrame::new(0u32);
        let mut next = CameraFrame::new(10u32);
        next.position = DVec3::new(10.0, 0.0, -20.0);
        next.degrees = DVec3::new(0.0, 90.0, 0.0);
        next.distance = -40.0;
        next.view_of_angle = 50;
        next.perspective = false;

        let now = next.lerp_frame(&prev, FrameIndex(5.0));
        assert!(now.position.abs_diff_eq(DVec3::new(5.0, 0.0, -10.0), 1e-9));
        assert!(now.degrees.abs_diff_eq(DVec3::new(0.0, 45.0, 0.0), 1e-6), "{:?}", now.degrees);
        assert!((now.distance + 20.0).abs() < 1e-9);
        assert_eq!(now.view_of_angle, 40);
        assert!(!now.perspective);
    }
}
