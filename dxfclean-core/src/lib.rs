pub mod drawing;

pub mod geometry {
    use glam::{DAffine2, DMat2, DVec2};
    use serde::{Deserialize, Serialize};

    /// 二维点，内部以 `glam::DVec2` 表示，保持 DXF 的双精度坐标。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Point2(pub DVec2);

    impl Point2 {
        #[inline]
        pub fn new(x: f64, y: f64) -> Self {
            Self(DVec2::new(x, y))
        }

        #[inline]
        pub fn from_vec(vec: DVec2) -> Self {
            Self(vec)
        }

        #[inline]
        pub fn x(self) -> f64 {
            self.0.x
        }

        #[inline]
        pub fn y(self) -> f64 {
            self.0.y
        }

        #[inline]
        pub fn translate(self, offset: Vector2) -> Self {
            Self(self.0 + offset.0)
        }

        #[inline]
        pub fn as_vec2(self) -> DVec2 {
            self.0
        }

        #[inline]
        pub fn is_finite(self) -> bool {
            self.0.is_finite()
        }
    }

    impl From<DVec2> for Point2 {
        fn from(value: DVec2) -> Self {
            Self::from_vec(value)
        }
    }

    /// 二维向量。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Vector2(pub DVec2);

    impl Vector2 {
        #[inline]
        pub fn new(x: f64, y: f64) -> Self {
            Self(DVec2::new(x, y))
        }

        #[inline]
        pub fn from_points(start: Point2, end: Point2) -> Self {
            Self(end.0 - start.0)
        }

        #[inline]
        pub fn from_angle(angle: f64) -> Self {
            Self(DVec2::new(angle.cos(), angle.sin()))
        }

        #[inline]
        pub fn length(self) -> f64 {
            self.0.length()
        }

        #[inline]
        pub fn length_squared(self) -> f64 {
            self.0.length_squared()
        }

        #[inline]
        pub fn angle(self) -> f64 {
            self.0.y.atan2(self.0.x)
        }

        /// 逆时针旋转 90° 得到的垂直向量。
        #[inline]
        pub fn perp(self) -> Self {
            Self(self.0.perp())
        }

        #[inline]
        pub fn as_vec2(self) -> DVec2 {
            self.0
        }

        #[inline]
        pub fn x(self) -> f64 {
            self.0.x
        }

        #[inline]
        pub fn y(self) -> f64 {
            self.0.y
        }
    }

    impl From<DVec2> for Vector2 {
        fn from(value: DVec2) -> Self {
            Self(value)
        }
    }

    /// 轴对齐边界框，用于计算图纸范围与 SVG 画布尺寸。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Bounds2D {
        min: Point2,
        max: Point2,
    }

    impl Bounds2D {
        #[inline]
        pub fn new(min: Point2, max: Point2) -> Self {
            Self { min, max }
        }

        #[inline]
        pub fn empty() -> Self {
            Self {
                min: Point2::new(f64::INFINITY, f64::INFINITY),
                max: Point2::new(f64::NEG_INFINITY, f64::NEG_INFINITY),
            }
        }

        #[inline]
        pub fn is_empty(&self) -> bool {
            self.min.x() > self.max.x() || self.min.y() > self.max.y()
        }

        #[inline]
        pub fn min(&self) -> Point2 {
            self.min
        }

        #[inline]
        pub fn max(&self) -> Point2 {
            self.max
        }

        #[inline]
        pub fn width(&self) -> f64 {
            (self.max.x() - self.min.x()).abs()
        }

        #[inline]
        pub fn height(&self) -> f64 {
            (self.max.y() - self.min.y()).abs()
        }

        pub fn include_point(&mut self, point: Point2) {
            if self.is_empty() {
                self.min = point;
                self.max = point;
                return;
            }
            let min_vec = self.min.as_vec2().min(point.as_vec2());
            let max_vec = self.max.as_vec2().max(point.as_vec2());
            self.min = Point2::from_vec(min_vec);
            self.max = Point2::from_vec(max_vec);
        }

        pub fn include_bounds(&mut self, other: &Bounds2D) {
            if other.is_empty() {
                return;
            }
            self.include_point(other.min);
            self.include_point(other.max);
        }

        #[inline]
        pub fn center(&self) -> Point2 {
            debug_assert!(!self.is_empty());
            let center = (self.min.as_vec2() + self.max.as_vec2()) * 0.5;
            Point2::from_vec(center)
        }

        #[inline]
        /// 端点与宽高均为有限值。端点相距过远时宽高会溢出为无穷大。
        pub fn is_finite(&self) -> bool {
            self.min.is_finite()
                && self.max.is_finite()
                && self.width().is_finite()
                && self.height().is_finite()
        }
    }

    /// 二维仿射变换，块参照展开时逐层叠加。
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct Transform2D(pub DAffine2);

    impl Transform2D {
        #[inline]
        pub fn identity() -> Self {
            Self(DAffine2::IDENTITY)
        }

        /// INSERT 变换：先减去块基点，再缩放、旋转，最后平移到插入点。
        pub fn from_insert(insert: Point2, scale: Vector2, rotation: f64, base_point: Point2) -> Self {
            let placement =
                DAffine2::from_scale_angle_translation(scale.as_vec2(), rotation, insert.as_vec2());
            Self(placement * DAffine2::from_translation(-base_point.as_vec2()))
        }

        /// 先应用 `self`，再应用 `outer`。
        #[inline]
        pub fn then(self, outer: Transform2D) -> Self {
            Self(outer.0 * self.0)
        }

        #[inline]
        pub fn apply_point(&self, point: Point2) -> Point2 {
            Point2::from_vec(self.0.transform_point2(point.as_vec2()))
        }

        #[inline]
        pub fn apply_vector(&self, vector: Vector2) -> Vector2 {
            Vector2(self.0.transform_vector2(vector.as_vec2()))
        }

        /// 角度方向经变换后的新角度。
        #[inline]
        pub fn apply_angle(&self, angle: f64) -> f64 {
            self.apply_vector(Vector2::from_angle(angle)).angle()
        }

        #[inline]
        pub fn determinant(&self) -> f64 {
            self.matrix().determinant()
        }

        #[inline]
        pub fn is_mirrored(&self) -> bool {
            self.determinant() < 0.0
        }

        /// 相似变换（等比缩放 + 旋转 + 可选镜像）时返回缩放系数。
        pub fn uniform_scale(&self) -> Option<f64> {
            let m = self.matrix();
            let sx = m.x_axis.length();
            let sy = m.y_axis.length();
            let tolerance = 1e-9 * sx.max(sy).max(1.0);
            if (sx - sy).abs() > tolerance || m.x_axis.dot(m.y_axis).abs() > tolerance * sx.max(1.0) {
                None
            } else {
                Some(sx)
            }
        }

        /// 面积缩放的平方根，用于文字高度。
        #[inline]
        pub fn mean_scale(&self) -> f64 {
            self.determinant().abs().sqrt()
        }

        #[inline]
        fn matrix(&self) -> DMat2 {
            self.0.matrix2
        }
    }

    impl Default for Transform2D {
        fn default() -> Self {
            Self::identity()
        }
    }
}

pub mod color {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Rgb {
        pub r: u8,
        pub g: u8,
        pub b: u8,
    }

    impl Rgb {
        pub const BLACK: Rgb = Rgb::new(0, 0, 0);
        pub const WHITE: Rgb = Rgb::new(255, 255, 255);

        #[inline]
        pub const fn new(r: u8, g: u8, b: u8) -> Self {
            Self { r, g, b }
        }

        /// DXF 组码 420 的 24 位真彩色值（0x00RRGGBB）。
        #[inline]
        pub fn from_true_color(raw: i32) -> Self {
            Self::new(
                ((raw >> 16) & 0xff) as u8,
                ((raw >> 8) & 0xff) as u8,
                (raw & 0xff) as u8,
            )
        }

        pub fn to_hex(self) -> String {
            format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
        }

        /// 相对亮度的粗略估计，用于判断背景是否为浅色。
        #[inline]
        pub fn is_light(self) -> bool {
            let luma = 0.299 * self.r as f64 + 0.587 * self.g as f64 + 0.114 * self.b as f64;
            luma >= 128.0
        }
    }

    /// 实体颜色：随层、随块、ACI 索引或真彩色。
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
    pub enum EntityColor {
        #[default]
        ByLayer,
        ByBlock,
        Index(u8),
        Rgb(Rgb),
    }

    impl EntityColor {
        /// ACI 7 在浅色背景上绘制为黑色，深色背景上为白色。
        pub const FOREGROUND: EntityColor = EntityColor::Index(7);

        /// 按 DXF 组码 62 的取值构造。0 为随块，256 为随层，负值表示图层关闭，取绝对值。
        pub fn from_aci_code(code: i32) -> Self {
            match code.unsigned_abs() {
                0 => EntityColor::ByBlock,
                256 => EntityColor::ByLayer,
                index @ 1..=255 => EntityColor::Index(index as u8),
                _ => EntityColor::ByLayer,
            }
        }

        #[inline]
        pub fn is_foreground(&self) -> bool {
            matches!(self, EntityColor::Index(7))
        }

        /// 将已解析的颜色转换为 RGB；随层/随块返回 `None`。
        pub fn to_rgb(self) -> Option<Rgb> {
            match self {
                EntityColor::Index(index) => Some(aci_to_rgb(index)),
                EntityColor::Rgb(rgb) => Some(rgb),
                EntityColor::ByLayer | EntityColor::ByBlock => None,
            }
        }
    }

    const STANDARD_COLORS: [Rgb; 9] = [
        Rgb::new(255, 0, 0),
        Rgb::new(255, 255, 0),
        Rgb::new(0, 255, 0),
        Rgb::new(0, 255, 255),
        Rgb::new(0, 0, 255),
        Rgb::new(255, 0, 255),
        Rgb::new(255, 255, 255),
        Rgb::new(128, 128, 128),
        Rgb::new(192, 192, 192),
    ];

    const GREYS: [u8; 6] = [51, 91, 132, 173, 214, 255];

    /// AutoCAD 颜色索引转换为 RGB。
    ///
    /// 1–9 为标准色；10–249 按色相环排列，每 10 个一组（偶数为全饱和、奇数为半饱和，
    /// 组内依次变暗）；250–255 为灰阶。
    pub fn aci_to_rgb(index: u8) -> Rgb {
        match index {
            0 => Rgb::BLACK,
            1..=9 => STANDARD_COLORS[index as usize - 1],
            10..=249 => {
                let hue = f64::from(index / 10 - 1) * 15.0;
                let variant = index % 10;
                let value = match variant / 2 {
                    0 => 1.0,
                    1 => 0.8,
                    2 => 0.6,
                    3 => 0.5,
                    _ => 0.3,
                };
                let saturation = if variant % 2 == 0 { 1.0 } else { 0.5 };
                hsv_to_rgb(hue, saturation, value)
            }
            250..=255 => {
                let grey = GREYS[index as usize - 250];
                Rgb::new(grey, grey, grey)
            }
        }
    }

    fn hsv_to_rgb(hue: f64, saturation: f64, value: f64) -> Rgb {
        let c = value * saturation;
        let h = (hue % 360.0) / 60.0;
        let x = c * (1.0 - (h % 2.0 - 1.0).abs());
        let (r, g, b) = match h as u32 {
            0 => (c, x, 0.0),
            1 => (x, c, 0.0),
            2 => (0.0, c, x),
            3 => (0.0, x, c),
            4 => (x, 0.0, c),
            _ => (c, 0.0, x),
        };
        let m = value - c;
        let to_byte = |channel: f64| ((channel + m) * 255.0).round().clamp(0.0, 255.0) as u8;
        Rgb::new(to_byte(r), to_byte(g), to_byte(b))
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn standard_aci_colors() {
            assert_eq!(aci_to_rgb(1), Rgb::new(255, 0, 0));
            assert_eq!(aci_to_rgb(5), Rgb::new(0, 0, 255));
            assert_eq!(aci_to_rgb(7), Rgb::WHITE);
            assert_eq!(aci_to_rgb(250), Rgb::new(51, 51, 51));
        }

        #[test]
        fn hue_wheel_starts_at_red() {
            assert_eq!(aci_to_rgb(10), Rgb::new(255, 0, 0));
            let half = aci_to_rgb(11);
            assert_eq!(half.r, 255);
            assert!(half.g > 0 && half.g == half.b);
            // 色相 120° 为绿色
            assert_eq!(aci_to_rgb(90), Rgb::new(0, 255, 0));
        }

        #[test]
        fn color_codes_map_to_variants() {
            assert_eq!(EntityColor::from_aci_code(0), EntityColor::ByBlock);
            assert_eq!(EntityColor::from_aci_code(256), EntityColor::ByLayer);
            assert_eq!(EntityColor::from_aci_code(-3), EntityColor::Index(3));
            assert_eq!(Rgb::from_true_color(0x00ff8000), Rgb::new(255, 128, 0));
            assert_eq!(Rgb::new(255, 128, 0).to_hex(), "#ff8000");
        }
    }
}

pub mod units {
    use std::fmt;
    use std::str::FromStr;

    use serde::{Deserialize, Serialize};
    use thiserror::Error;

    pub const MM_PER_INCH: f64 = 25.4;

    /// 图纸的原始单位，由用户选择。
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
    #[serde(rename_all = "lowercase")]
    pub enum Unit {
        Inches,
        #[default]
        Millimeters,
    }

    impl Unit {
        /// 渲染时使用的缩放系数，保证输出 1 个用户单位 = 1 mm。
        #[inline]
        pub fn scale_factor(self) -> f64 {
            match self {
                Unit::Inches => MM_PER_INCH,
                Unit::Millimeters => 1.0,
            }
        }

        #[inline]
        pub fn suffix(self) -> &'static str {
            match self {
                Unit::Inches => "in",
                Unit::Millimeters => "mm",
            }
        }

        /// 将毫米值换算为当前显示单位。
        #[inline]
        pub fn from_mm(self, value_mm: f64) -> f64 {
            match self {
                Unit::Inches => value_mm / MM_PER_INCH,
                Unit::Millimeters => value_mm,
            }
        }
    }

    impl fmt::Display for Unit {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                Unit::Inches => f.write_str("Inches"),
                Unit::Millimeters => f.write_str("Millimeters"),
            }
        }
    }

    #[derive(Debug, Error, PartialEq, Eq)]
    #[error("unknown unit {0:?}, expected inches or millimeters")]
    pub struct ParseUnitError(pub String);

    impl FromStr for Unit {
        type Err = ParseUnitError;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            match s.trim().to_ascii_lowercase().as_str() {
                "in" | "inch" | "inches" => Ok(Unit::Inches),
                "mm" | "millimeter" | "millimeters" | "millimetre" | "millimetres" => {
                    Ok(Unit::Millimeters)
                }
                other => Err(ParseUnitError(other.to_string())),
            }
        }
    }

    /// 图纸的物理尺寸，已换算为显示单位。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Dimensions {
        pub width: f64,
        pub height: f64,
        pub unit: Unit,
    }

    impl Dimensions {
        /// 原生坐标按 1:1 约定视为毫米。
        pub fn from_native_mm(width: f64, height: f64, unit: Unit) -> Self {
            Self {
                width: unit.from_mm(width.abs()),
                height: unit.from_mm(height.abs()),
                unit,
            }
        }
    }

    impl fmt::Display for Dimensions {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(
                f,
                "{:.2} × {:.2} {}",
                self.width,
                self.height,
                self.unit.suffix()
            )
        }
    }

}
