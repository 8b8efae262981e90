//! 贝塞尔曲线插值
//!
//! 控制点保存在 [0,127] 空间的双精度值中，只在字节边界取整。

use glam::DVec2;

use crate::MmdError;

/// 控制点空间上限
pub const CURVE_MAX: f64 = 127.0;

/// 线性曲线的控制点
pub const LINEAR_START: DVec2 = DVec2::new(20.0, 20.0);
pub const LINEAR_END: DVec2 = DVec2::new(107.0, 107.0);

const NEWTON_ITERATIONS: usize = 20;
const BISECTION_ITERATIONS: usize = 64;
const SOLVE_TOLERANCE: f64 = 1e-12;

/// 贝塞尔曲线（用于 VMD 动画插值）
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BezierCurve {
    pub start: DVec2,
    pub end: DVec2,
}

impl Default for BezierCurve {
    fn default() -> Self {
        Self::linear()
    }
}

impl BezierCurve {
    pub fn new(start: DVec2, end: DVec2) -> Self {
        Self { start, end }
    }

    /// 线性插值
    pub fn linear() -> Self {
        Self::new(LINEAR_START, LINEAR_END)
    }

    /// 从 VMD 插值数据创建（x1, y1, x2, y2）
    pub fn from_vmd_data(data: &[u8; 4]) -> Self {
        Self::new(
            DVec2::new(data[0] as f64, data[1] as f64),
            DVec2::new(data[2] as f64, data[3] as f64),
        )
    }

    /// 写回 VMD 插值数据（取整并钳制到 [0,127]）
    pub fn to_vmd_data(&self) -> [u8; 4] {
        [
            curve_byte(self.start.x),
            curve_byte(self.start.y),
            curve_byte(self.end.x),
            curve_byte(self.end.y),
        ]
    }

    /// 是否为线性曲线
    pub fn is_linear(&self) -> bool {
        (self.start.x - self.start.y).abs() <= 1e-6 && (self.end.x - self.end.y).abs() <= 1e-6
    }

    /// 求值：返回 (x, y, t)，y 为插值权重
    pub fn evaluate(&self, start: f32, now: f32, end: f32) -> (f64, f64, f64) {
        if now == start || end == start {
            return (0.0, 0.0, 0.0);
        }
        let x = (now as f64 - start as f64) / (end as f64 - start as f64);
        if x >= 1.0 {
            return (1.0, 1.0, 1.0);
        }
        if x <= 0.0 {
            return (0.0, 0.0, 0.0);
        }
        let (y, t) = self.evaluate_x(x);
        (x, y, t)
    }

    /// 对归一化的 x 求 (y, t)
    pub fn evaluate_x(&self, x: f64) -> (f64, f64) {
        if self.is_linear() {
            return (x, x);
        }
        let t = self.solve_t(x);
        (self.bezier_y(t), t)
    }

    /// 在 now 处分割为左右两条曲线，两者端点重新归一化为 (0,0)-(1,1)
    pub fn split(&self, start: f32, now: f32, end: f32) -> (BezierCurve, BezierCurve) {
        let (x, _, t) = self.evaluate(start, now, end);
        if x <= 0.0 || x >= 1.0 || self.is_linear() {
            return (Self::linear(), Self::linear());
        }

        let a = DVec2::ZERO;
        let b = self.start / CURVE_MAX;
        let c = self.end / CURVE_MAX;
        let d = DVec2::ONE;

        let e = a.lerp(b, t);
        let f = b.lerp(c, t);
        let g = c.lerp(d, t);
        let h = e.lerp(f, t);
        let i = f.lerp(g, t);
        let j = h.lerp(i, t);

        (
            Self::normalized(e, h, a, j),
            Self::normalized(i, g, j, d),
        )
    }

    /// 以 [begin, finish] 为单位区间重新归一化
    fn normalized(start: DVec2, end: DVec2, begin: DVec2, finish: DVec2) -> Self {
        let range = finish - begin;
        if range.x.abs() < f64::EPSILON || range.y.abs() < f64::EPSILON {
            return Self::linear();
        }
        let s = (start - begin) / range;
        let e = (end - begin) / range;
        if (s.x - s.y).abs() <= 1e-6 && (e.x - e.y).abs() <= 1e-6 {
            return Self::linear();
        }
        Self::new(s * CURVE_MAX, e * CURVE_MAX)
    }

    /// 求解 x(t) = x 的参数 t：牛顿法，失败时退回二分法
    fn solve_t(&self, x: f64) -> f64 {
        let p1 = self.start.x / CURVE_MAX;
        let p2 = self.end.x / CURVE_MAX;
        let a = 3.0 * p1 - 3.0 * p2 + 1.0;
        let b = -6.0 * p1 + 3.0 * p2;
        let c = 3.0 * p1;

        let mut t = x;
        for _ in 0..NEWTON_ITERATIONS {
            let value = ((a * t + b) * t + c) * t - x;
            let mut derivative = (3.0 * a * t + 2.0 * b) * t + c;
            if derivative.abs() < 1e-15 {
                derivative = 1.0;
            }
            let delta = value / derivative;
            t -= delta;
            if delta.abs() <= 1e-20 {
                break;
            }
        }

        if t.is_finite() && (0.0..=1.0).contains(&t) && (self.bezier_x(t) - x).abs() <= SOLVE_TOLERANCE {
            return t;
        }

        if crate::config::ik_verbose() {
            let err = MmdError::DegenerateCurve(self.start.x, self.start.y, self.end.x, self.end.y);
            log::debug!("{}: x={:.8}, newton t={:.8}", err, x, t);
        }
        self.bisect_t(x)
    }

    fn bisect_t(&self, x: f64) -> f64 {
        let mut lo = 0.0;
        let mut hi = 1.0;
        for _ in 0..BISECTION_ITERATIONS {
            let t = (lo + hi) * 0.5;
            let value = self.bezier_x(t);
            if (value - x).abs() <= SOLVE_TOLERANCE {
                return t;
            }
            if value < x {
                lo = t;
            } else {
                hi = t;
            }
        }
        (lo + hi) * 0.5
    }

    fn bezier_x(&self, t: f64) -> f64 {
        bezier(self.start.x / CURVE_MAX, self.end.x / CURVE_MAX, t)
    }

    fn bezier_y(&self, t: f64) -> f64 {
        bezier(self.start.y / CURVE_MAX, self.end.y / CURVE_MAX, t)
    }
}

/// 端点固定为 0 与 1 的三次贝塞尔
fn bezier(p1: f64, p2: f64, t: f64) -> f64 {
    let s = 1.0 - t;
    3.0 * s * s * t * p1 + 3.0 * s * t * t * p2 + t * t * t
}

fn curve_byte(v: f64) -> u8 {
    v.round().clamp(0.0, CURVE_MAX) as u8
}

/// 骨骼关键帧的四条插值曲线
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BoneCurves {
    pub translate_x: BezierCurve,
    pub translate_y: BezierCurve,
    pub translate_z: BezierCurve,
    pub rotate: BezierCurve,
}

impl BoneCurves {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从 VMD 的 64 字节插值块读取
    pub fn from_bytes(values: &[u8; 64]) -> Self {
        let curve = |o: usize| BezierCurve::from_vmd_data(&[values[o], values[o + 4], values[o + 8], values[o + 12]]);
        Self {
            translate_x: curve(0),
            translate_y: curve(16),
            translate_z: curve(32),
            rotate: curve(48),
        }
    }

    /// 写成 VMD 的 64 字节插值块（四行错位排列）
    pub fn to_bytes(&self) -> [u8; 64] {
        let curves = [
            self.translate_x.to_vmd_data(),
            self.translate_y.to_vmd_data(),
            self.translate_z.to_vmd_data(),
            self.rotate.to_vmd_data(),
        ];
        // 基础行：x1[XYZR], y1[XYZR], x2[XYZR], y2[XYZR]
        let mut base = [0u8; 16];
        for (axis, data) in curves.iter().enumerate() {
            for (component, value) in data.iter().enumerate() {
                base[component * 4 + axis] = *value;
            }
        }
        let mut out = [0u8; 64];
        for row in 0..4 {
            out[row * 16..row * 16 + 16 - row].copy_from_slice(&base[row..]);
        }
        out
    }

    /// 四条曲线的插值权重 (x, y, z, r)
    pub fn evaluate(&self, start: f32, now: f32, end: f32) -> (f64, f64, f64, f64) {
        let (_, xy, _) = self.translate_x.evaluate(start, now, end);
        let (_, yy, _) = self.translate_y.evaluate(start, now, end);
        let (_, zy, _) = self.translate_z.evaluate(start, now, end);
        let (_, ry, _) = self.rotate.evaluate(start, now, end);
        (xy, yy, zy, ry)
    }

    /// 分割全部曲线，返回左半；self 保留右半
    pub fn split(&mut self, start: f32, now: f32, end: f32) -> Self {
        let (lx, rx) = self.translate_x.split(start, now, end);
        let (ly, ry) = self.translate_y.split(start, now, end);
        let (lz, rz) = self.translate_z.split(start, now, end);
        let (lr, rr) = self.rotate.split(start, now, end);
        *self = Self { translate_x: rx, translate_y: ry, translate_z: rz, rotate: rr };
        Self { translate_x: lx, translate_y: ly, translate_z: lz, rotate: lr }
    }
}

/// 相机关键帧的六条插值曲线
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CameraCurves {
    pub translate_x: BezierCurve,
    pub translate_y: BezierCurve,
    pub translate_z: BezierCurve,
    pub rotate: BezierCurve,
    pub distance: BezierCurve,
    pub view_of_angle: BezierCurve,
}

impl CameraCurves {
    pub fn new() -> Self {
        Self::default()
    }

    fn curves(&self) -> [BezierCurve; 6] {
        [
            self.translate_x,
            self.translate_y,
            self.translate_z,
            self.rotate,
            self.distance,
            self.view_of_angle,
        ]
    }

    fn from_curves(c: [BezierCurve; 6]) -> Self {
        Self {
            translate_x: c[0],
            translate_y: c[1],
            translate_z: c[2],
            rotate: c[3],
            distance: c[4],
            view_of_angle: c[5],
        }
    }

    /// 从 VMD 的 24 字节插值块读取：第 i 条曲线取 i, i+6, i+12, i+18
    pub fn from_bytes(values: &[u8; 24]) -> Self {
        let mut curves = [BezierCurve::linear(); 6];
        for (i, curve) in curves.iter_mut().enumerate() {
            *curve = BezierCurve::from_vmd_data(&[values[i], values[i + 6], values[i + 12], values[i + 18]]);
        }
        Self::from_curves(curves)
    }

    /// 写成 VMD 的 24 字节插值块
    pub fn to_bytes(&self) -> [u8; 24] {
        let mut out = [0u8; 24];
        for (i, curve) in self.curves().iter().enumerate() {
            let data = curve.to_vmd_data();
            for (component, value) in data.iter().enumerate() {
                out[i + component * 6] = *value;
            }
        }
        out
    }

    /// 六条曲线的插值权重 (x, y, z, r, distance, view_of_angle)
    pub fn evaluate(&self, start: f32, now: f32, end: f32) -> [f64; 6] {
        let mut out = [0.0; 6];
        for (weight, curve) in out.iter_mut().zip(self.curves().iter()) {
            *weight = curve.evaluate(start, now, end).1;
        }
        out
    }

    /// 分割全部曲线，返回左半；self 保留右半
    pub fn split(&mut self, start: f32, now: f32, end: f32) -> Self {
        let mut left = [BezierCurve::linear(); 6];
        let mut right = [BezierCurve::linear(); 6];
        for (i, curve) in self.curves().iter().enumerate() {
            let (l, r) = curve.split(start, now, end);
            left[i] = l;
            right[i] = r;
        }
        *self = Self::from_curves(right);
        Self::from_curves(left)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ease() -> BezierCurve {
        BezierCurve::new(DVec2::new(63.5, 0.0), DVec2::new(63.5, 127.0))
    }

    #[test]
    fn test_linear_curve() {
        let curve = BezierCurve::linear();
        let (x, y, t) = curve.evaluate(0.0, 5.0, 10.0);
        assert!((x - 0.5).abs() < 1e-12);
        assert!((y - 0.5).abs() < 1e-12);
        assert!((t - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_degenerate_ranges() {
        let curve = ease();
        assert_eq!(curve.evaluate(3.0, 3.0, 10.0), (0.0, 0.0, 0.0));
        assert_eq!(curve.evaluate(3.0, 5.0, 3.0), (0.0, 0.0, 0.0));
        assert_eq!(curve.evaluate(0.0, 12.0, 10.0), (1.0, 1.0, 1.0));
    }

    #[test]
    fn test_ease_curve_is_symmetric() {
        let curve = ease();
        let (_, y, _) = curve.evaluate(0.0, 5.0, 10.0);
        assert!((y - 0.5).abs() < 1e-9);
        let (_, y_low, _) = curve.evaluate(0.0, 2.0, 10.0);
        let (_, y_high, _) = curve.evaluate(0.0, 8.0, 10.0);
        assert!(y_low < 0.2);
        assert!((y_low + y_high - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_steep_curve_converges() {
        // 接近退化：x 方向先快后慢
        let curve = BezierCurve::new(DVec2::new(127.0, 0.0), DVec2::new(0.0, 127.0));
        for i in 1..128 {
            let x = i as f64 / 128.0;
            let (_, t) = curve.evaluate_x(x);
            assert!((0.0..=1.0).contains(&t));
            assert!((curve.bezier_x(t) - x).abs() < 1e-6);
        }
    }

    fn assert_split_round_trip(curve: BezierCurve, now: f32) {
        let (start, end) = (0.0_f32, 10.0_f32);
        let (left, right) = curve.split(start, now, end);
        let (xs, ys, _) = curve.evaluate(start, now, end);
        for i in 0..=128 {
            let x = i as f64 / 128.0;
            let (expected, _) = curve.evaluate_x(x);
            let actual = if x <= xs {
                ys * left.evaluate_x(x / xs).0
            } else {
                ys + (1.0 - ys) * right.evaluate_x((x - xs) / (1.0 - xs)).0
            };
            assert!(
                (expected - actual).abs() < 1e-5,
                "x={} expected={} actual={}",
                x,
                expected,
                actual
            );
        }
    }

    #[test]
    fn test_split_round_trip() {
        assert_split_round_trip(ease(), 3.0);
        assert_split_round_trip(ease(), 7.5);
        assert_split_round_trip(BezierCurve::new(DVec2::new(40.0, 10.0), DVec2::new(90.0, 120.0)), 4.0);
        assert_split_round_trip(BezierCurve::new(DVec2::new(10.0, 100.0), DVec2::new(30.0, 127.0)), 2.0);
    }

    #[test]
    fn test_split_linear_stays_linear() {
        let (left, right) = BezierCurve::linear().split(0.0, 4.0, 10.0);
        assert_eq!(left, BezierCurve::linear());
        assert_eq!(right, BezierCurve::linear());
    }

    #[test]
    fn test_bone_curves_bytes() {
        let curves = BoneCurves {
            translate_x: BezierCurve::from_vmd_data(&[1, 2, 3, 4]),
            translate_y: BezierCurve::from_vmd_data(&[5, 6, 7, 8]),
            translate_z: BezierCurve::from_vmd_data(&[9, 10, 11, 12]),
            rotate: BezierCurve::from_vmd_data(&[13, 14, 15, 16]),
        };
        let bytes = curves.to_bytes();
        assert_eq!(&bytes[0..4], &[1, 5, 9, 13]);
        assert_eq!(bytes[4], 2);
        assert_eq!(bytes[16], 5);
        assert_eq!(BoneCurves::from_bytes(&bytes), curves);
    }

    #[test]
    fn test_camera_curves_bytes() {
        let mut values = [0u8; 24];
        for (i, v) in values.iter_mut().enumerate() {
            *v = i as u8 + 20;
        }
        let curves = CameraCurves::from_bytes(&values);
        assert_eq!(curves.translate_x.to_vmd_data(), [20, 26, 32, 38]);
        assert_eq!(curves.view_of_angle.to_vmd_data(), [25, 31, 37, 43]);
        assert_eq!(curves.to_bytes(), values);
    }

    #[test]
    fn test_to_vmd_data_rounds_and_clamps() {
        let curve = BezierCurve::new(DVec2::new(20.4, 20.6), DVec2::new(130.0, -3.0));
        assert_eq!(curve.to_vmd_data(), [20, 21, 127, 0]);
    }

    #[test]
    fn test_bone_curves_split_keeps_right_half() {
        let mut curves = BoneCurves {
            rotate: ease(),
            ..BoneCurves::default()
        };
        let left = curves.split(0.0, 5.0, 10.0);
        assert_eq!(left.translate_x, BezierCurve::linear());
        assert!(left.rotate != ease());
        assert!(curves.rotate != ease());
    }
}
