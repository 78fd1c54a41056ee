use std::collections::HashMap;
use std::f64::consts::{FRAC_PI_2, PI, TAU};

use serde::{Deserialize, Serialize};

use crate::color::EntityColor;
use crate::geometry::{Bounds2D, Point2, Transform2D, Vector2};

/// 块参照嵌套的最大深度，超过后停止展开。
pub const MAX_BLOCK_DEPTH: usize = 16;

/// 曲线在非相似变换下离散化时，每整圈使用的线段数。
const SEGMENTS_PER_TURN: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityId(u64);

impl EntityId {
    #[inline]
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub fn get(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Layer {
    pub name: String,
    pub color: EntityColor,
    pub is_visible: bool,
}

impl Layer {
    #[inline]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            color: EntityColor::FOREGROUND,
            is_visible: true,
        }
    }

    #[inline]
    pub fn with_color(mut self, color: EntityColor) -> Self {
        self.color = color;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Entity {
    Line(Line),
    Circle(Circle),
    Arc(Arc),
    Ellipse(Ellipse),
    Polyline(Polyline),
    Spline(Spline),
    Text(Text),
    MText(MText),
    Point(PointEntity),
    BlockReference(BlockReference),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Line {
    pub start: Point2,
    pub end: Point2,
    pub layer: String,
    pub color: EntityColor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Circle {
    pub center: Point2,
    pub radius: f64,
    pub layer: String,
    pub color: EntityColor,
}

/// 圆弧实体，角度以弧度储存，从起始角逆时针到终止角。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Arc {
    pub center: Point2,
    pub radius: f64,
    pub start_angle: f64,
    pub end_angle: f64,
    pub layer: String,
    pub color: EntityColor,
}

/// 椭圆实体，记录主轴向量、短长轴比与参数范围（弧度）。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ellipse {
    pub center: Point2,
    pub major_axis: Vector2,
    pub ratio: f64,
    pub start_parameter: f64,
    pub end_parameter: f64,
    pub layer: String,
    pub color: EntityColor,
}

impl Ellipse {
    #[inline]
    pub fn minor_axis(&self) -> Vector2 {
        Vector2(self.major_axis.perp().as_vec2() * self.ratio)
    }

    #[inline]
    pub fn point_at(&self, parameter: f64) -> Point2 {
        let offset =
            self.major_axis.as_vec2() * parameter.cos() + self.minor_axis().as_vec2() * parameter.sin();
        self.center.translate(Vector2(offset))
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        let span = (self.end_parameter - self.start_parameter).abs();
        span < 1e-9 || (span - TAU).abs() < 1e-9
    }

    /// 参数区间规范为 `start ∈ [0, 2π)`、`start < end <= start + 2π`。
    pub fn parameter_interval(&self) -> (f64, f64) {
        if self.is_full() {
            let start = normalize_angle(self.start_parameter);
            (start, start + TAU)
        } else {
            canonical_interval(self.start_parameter, self.end_parameter)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Polyline {
    pub vertices: Vec<PolylineVertex>,
    pub is_closed: bool,
    pub layer: String,
    pub color: EntityColor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolylineVertex {
    pub position: Point2,
    pub bulge: f64,
}

impl PolylineVertex {
    #[inline]
    pub fn new(position: Point2) -> Self {
        Self {
            position,
            bulge: 0.0,
        }
    }

    #[inline]
    pub fn with_bulge(position: Point2, bulge: f64) -> Self {
        Self { position, bulge }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Spline {
    pub degree: i32,
    pub is_closed: bool,
    pub control_points: Vec<Point2>,
    pub fit_points: Vec<Point2>,
    pub knot_values: Vec<f64>,
    pub weights: Vec<f64>,
    pub layer: String,
    pub color: EntityColor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Text {
    pub insert: Point2,
    pub content: String,
    pub height: f64,
    pub rotation: f64,
    /// DXF 组码 72：0 左对齐，1 居中，2 右对齐。
    pub horizontal_align: i16,
    pub layer: String,
    pub color: EntityColor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MText {
    pub insert: Point2,
    pub content: String,
    pub height: f64,
    pub rotation: f64,
    pub reference_width: Option<f64>,
    pub attachment_point: i16,
    pub layer: String,
    pub color: EntityColor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointEntity {
    pub location: Point2,
    pub layer: String,
    pub color: EntityColor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockReference {
    pub name: String,
    pub insert: Point2,
    pub scale: Vector2,
    pub rotation: f64,
    pub layer: String,
    pub color: EntityColor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockDefinition {
    pub name: String,
    pub base_point: Point2,
    pub entities: Vec<Entity>,
}

/// HEADER 段中与单位、版本相关的变量。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DrawingHeader {
    pub acad_version: Option<String>,
    pub insunits: Option<i16>,
}

/// 展开块参照并解析颜色后的实体，坐标已位于模型空间。
#[derive(Debug, Clone)]
pub struct ResolvedEntity {
    pub entity: Entity,
    pub layer: String,
    pub color: EntityColor,
}

impl Entity {
    pub fn layer_name(&self) -> &str {
        match self {
            Entity::Line(line) => &line.layer,
            Entity::Circle(circle) => &circle.layer,
            Entity::Arc(arc) => &arc.layer,
            Entity::Ellipse(ellipse) => &ellipse.layer,
            Entity::Polyline(polyline) => &polyline.layer,
            Entity::Spline(spline) => &spline.layer,
            Entity::Text(text) => &text.layer,
            Entity::MText(mtext) => &mtext.layer,
            Entity::Point(point) => &point.layer,
            Entity::BlockReference(reference) => &reference.layer,
        }
    }

    pub fn color(&self) -> EntityColor {
        match self {
            Entity::Line(line) => line.color,
            Entity::Circle(circle) => circle.color,
            Entity::Arc(arc) => arc.color,
            Entity::Ellipse(ellipse) => ellipse.color,
            Entity::Polyline(polyline) => polyline.color,
            Entity::Spline(spline) => spline.color,
            Entity::Text(text) => text.color,
            Entity::MText(mtext) => mtext.color,
            Entity::Point(point) => point.color,
            Entity::BlockReference(reference) => reference.color,
        }
    }

    /// 实体类型名称，与 DXF 中的记录名一致。
    pub fn kind(&self) -> &'static str {
        match self {
            Entity::Line(_) => "LINE",
            Entity::Circle(_) => "CIRCLE",
            Entity::Arc(_) => "ARC",
            Entity::Ellipse(_) => "ELLIPSE",
            Entity::Polyline(_) => "LWPOLYLINE",
            Entity::Spline(_) => "SPLINE",
            Entity::Text(_) => "TEXT",
            Entity::MText(_) => "MTEXT",
            Entity::Point(_) => "POINT",
            Entity::BlockReference(_) => "INSERT",
        }
    }

    /// 计算实体的 2D 轴对齐范围。文字与块参照退化为插入点。
    pub fn bounds(&self) -> Option<Bounds2D> {
        let mut bounds = Bounds2D::empty();
        match self {
            Entity::Line(line) => {
                bounds.include_point(line.start);
                bounds.include_point(line.end);
            }
            Entity::Circle(circle) => {
                let radius = circle.radius.abs();
                let center = circle.center;
                bounds.include_point(Point2::new(center.x() - radius, center.y() - radius));
                bounds.include_point(Point2::new(center.x() + radius, center.y() + radius));
            }
            Entity::Arc(arc) => arc_bounds(arc.center, arc.radius, arc.start_angle, arc.end_angle, &mut bounds),
            Entity::Ellipse(ellipse) => ellipse_bounds(ellipse, &mut bounds),
            Entity::Polyline(polyline) => {
                for vertex in &polyline.vertices {
                    bounds.include_point(vertex.position);
                }
                for (start, end, bulge) in polyline.segments() {
                    polyline_segment_bounds(start, end, bulge, &mut bounds);
                }
            }
            Entity::Spline(spline) => {
                for point in spline.sample(64) {
                    bounds.include_point(point);
                }
            }
            Entity::Text(text) => bounds.include_point(text.insert),
            Entity::MText(mtext) => bounds.include_point(mtext.insert),
            Entity::Point(point) => bounds.include_point(point.location),
            Entity::BlockReference(reference) => bounds.include_point(reference.insert),
        }
        if bounds.is_empty() { None } else { Some(bounds) }
    }

    /// 将实体变换到新坐标系。相似变换下保持解析曲线，否则离散为多段线。
    pub fn transformed(&self, transform: &Transform2D) -> Entity {
        let similarity = transform.uniform_scale();
        match self {
            Entity::Line(line) => Entity::Line(Line {
                start: transform.apply_point(line.start),
                end: transform.apply_point(line.end),
                ..line.clone()
            }),
            Entity::Point(point) => Entity::Point(PointEntity {
                location: transform.apply_point(point.location),
                ..point.clone()
            }),
            Entity::Circle(circle) => match similarity {
                Some(scale) => Entity::Circle(Circle {
                    center: transform.apply_point(circle.center),
                    radius: circle.radius * scale,
                    ..circle.clone()
                }),
                None => {
                    let points = arc_points(circle.center, circle.radius, 0.0, TAU);
                    flattened(points, true, &circle.layer, circle.color, transform)
                }
            },
            Entity::Arc(arc) => match similarity {
                Some(scale) => {
                    let (start, end) = if transform.is_mirrored() {
                        (
                            transform.apply_angle(arc.end_angle),
                            transform.apply_angle(arc.start_angle),
                        )
                    } else {
                        (
                            transform.apply_angle(arc.start_angle),
                            transform.apply_angle(arc.end_angle),
                        )
                    };
                    Entity::Arc(Arc {
                        center: transform.apply_point(arc.center),
                        radius: arc.radius * scale,
                        start_angle: start,
                        end_angle: end,
                        ..arc.clone()
                    })
                }
                None => {
                    let (start, end) = canonical_interval(arc.start_angle, arc.end_angle);
                    let points = arc_points(arc.center, arc.radius, start, end);
                    flattened(points, false, &arc.layer, arc.color, transform)
                }
            },
            Entity::Ellipse(ellipse) => match similarity {
                Some(_) => {
                    let (start, end) = if transform.is_mirrored() {
                        (-ellipse.end_parameter, -ellipse.start_parameter)
                    } else {
                        (ellipse.start_parameter, ellipse.end_parameter)
                    };
                    Entity::Ellipse(Ellipse {
                        center: transform.apply_point(ellipse.center),
                        major_axis: transform.apply_vector(ellipse.major_axis),
                        start_parameter: start,
                        end_parameter: end,
                        ..ellipse.clone()
                    })
                }
                None => {
                    let points = ellipse_points(ellipse);
                    flattened(points, ellipse.is_full(), &ellipse.layer, ellipse.color, transform)
                }
            },
            Entity::Polyline(polyline) => {
                if similarity.is_some() {
                    let flip = if transform.is_mirrored() { -1.0 } else { 1.0 };
                    Entity::Polyline(Polyline {
                        vertices: polyline
                            .vertices
                            .iter()
                            .map(|vertex| {
                                PolylineVertex::with_bulge(
                                    transform.apply_point(vertex.position),
                                    vertex.bulge * flip,
                                )
                            })
                            .collect(),
                        ..polyline.clone()
                    })
                } else {
                    let points = polyline.flatten();
                    flattened(points, polyline.is_closed, &polyline.layer, polyline.color, transform)
                }
            }
            Entity::Spline(spline) => Entity::Spline(Spline {
                control_points: spline
                    .control_points
                    .iter()
                    .map(|point| transform.apply_point(*point))
                    .collect(),
                fit_points: spline
                    .fit_points
                    .iter()
                    .map(|point| transform.apply_point(*point))
                    .collect(),
                ..spline.clone()
            }),
            Entity::Text(text) => Entity::Text(Text {
                insert: transform.apply_point(text.insert),
                height: text.height * transform.mean_scale(),
                rotation: transform.apply_angle(text.rotation),
                ..text.clone()
            }),
            Entity::MText(mtext) => Entity::MText(MText {
                insert: transform.apply_point(mtext.insert),
                height: mtext.height * transform.mean_scale(),
                rotation: transform.apply_angle(mtext.rotation),
                reference_width: mtext.reference_width.map(|w| w * transform.mean_scale()),
                ..mtext.clone()
            }),
            Entity::BlockReference(reference) => Entity::BlockReference(BlockReference {
                insert: transform.apply_point(reference.insert),
                rotation: transform.apply_angle(reference.rotation),
                ..reference.clone()
            }),
        }
    }
}

fn flattened(
    points: Vec<Point2>,
    is_closed: bool,
    layer: &str,
    color: EntityColor,
    transform: &Transform2D,
) -> Entity {
    Entity::Polyline(Polyline {
        vertices: points
            .into_iter()
            .map(|point| PolylineVertex::new(transform.apply_point(point)))
            .collect(),
        is_closed,
        layer: layer.to_string(),
        color,
    })
}

impl Polyline {
    /// 依次返回每段的起点、终点与 bulge；闭合多段线包含首尾相连的一段。
    pub fn segments(&self) -> impl Iterator<Item = (Point2, Point2, f64)> + '_ {
        let count = self.vertices.len();
        let segment_count = if self.is_closed && count > 1 {
            count
        } else {
            count.saturating_sub(1)
        };
        (0..segment_count).map(move |index| {
            let start = &self.vertices[index];
            let end = &self.vertices[(index + 1) % count];
            (start.position, end.position, start.bulge)
        })
    }

    /// 把 bulge 段离散为直线段后的点序列（闭合时不重复首点）。
    pub fn flatten(&self) -> Vec<Point2> {
        let mut points = Vec::with_capacity(self.vertices.len());
        if let Some(first) = self.vertices.first() {
            points.push(first.position);
        }
        let segment_count = self.segments().count();
        for (index, (start, end, bulge)) in self.segments().enumerate() {
            if bulge.abs() > 1e-9 {
                if let Some((center, radius, start_angle, sweep)) = bulge_arc(start, end, bulge) {
                    let steps = segments_for_sweep(sweep);
                    for step in 1..steps {
                        let angle = start_angle + sweep * (step as f64 / steps as f64);
                        points.push(polar(center, radius, angle));
                    }
                }
            }
            let is_closing_segment = self.is_closed && index + 1 == segment_count;
            if !is_closing_segment {
                points.push(end);
            }
        }
        points
    }
}

/// 由 bulge 段求出圆心、半径、起始角与带符号的扫掠角（正值为逆时针）。
pub fn bulge_arc(start: Point2, end: Point2, bulge: f64) -> Option<(Point2, f64, f64, f64)> {
    let chord = end.as_vec2() - start.as_vec2();
    let chord_len = chord.length();
    if chord_len <= f64::EPSILON || bulge.abs() <= 1e-9 {
        return None;
    }
    let sweep = 4.0 * bulge.atan();
    let radius = chord_len / (2.0 * (sweep / 2.0).sin()).abs();
    let midpoint = (start.as_vec2() + end.as_vec2()) * 0.5;
    let perp_dir = chord.perp() / chord_len;
    // 圆心到弦中点的有向距离
    let offset = (radius * radius - chord_len * chord_len / 4.0).max(0.0).sqrt();
    let side = if bulge.abs() > 1.0 { -1.0 } else { 1.0 };
    let sign = side * bulge.signum();
    let center = midpoint + perp_dir * offset * sign;
    let start_dir = start.as_vec2() - center;
    let start_angle = start_dir.y.atan2(start_dir.x);
    Some((Point2::from_vec(center), radius, start_angle, sweep))
}

impl Spline {
    /// 采样样条曲线。没有控制点时直接返回拟合点。
    pub fn sample(&self, segments: usize) -> Vec<Point2> {
        let count = self.control_points.len();
        if count < 2 {
            if self.fit_points.is_empty() {
                return self.control_points.clone();
            }
            return self.fit_points.clone();
        }
        let degree = (self.degree.max(1) as usize).min(count - 1);
        let knots = if self.knot_values.len() == count + degree + 1 {
            self.knot_values.clone()
        } else {
            clamped_uniform_knots(count, degree)
        };
        let weights: Vec<f64> = if self.weights.len() == count {
            self.weights.clone()
        } else {
            vec![1.0; count]
        };

        let t_start = knots[degree];
        let t_end = knots[count];
        if t_end <= t_start || !t_end.is_finite() {
            return self.control_points.clone();
        }
        let segments = segments.max(1);
        (0..=segments)
            .map(|step| {
                let t = t_start + (t_end - t_start) * (step as f64 / segments as f64);
                de_boor(&self.control_points, &weights, &knots, degree, t)
            })
            .collect()
    }
}

fn clamped_uniform_knots(count: usize, degree: usize) -> Vec<f64> {
    let spans = count - degree;
    let mut knots = Vec::with_capacity(count + degree + 1);
    knots.extend(std::iter::repeat(0.0).take(degree + 1));
    for index in 1..spans {
        knots.push(index as f64 / spans as f64);
    }
    knots.extend(std::iter::repeat(1.0).take(degree + 1));
    knots
}

fn de_boor(points: &[Point2], weights: &[f64], knots: &[f64], degree: usize, t: f64) -> Point2 {
    let count = points.len();
    let mut span = degree;
    while span < count - 1 && t >= knots[span + 1] {
        span += 1;
    }

    let mut d: Vec<(f64, f64, f64)> = (0..=degree)
        .map(|j| {
            let index = j + span - degree;
            let w = weights[index];
            (points[index].x() * w, points[index].y() * w, w)
        })
        .collect();

    for r in 1..=degree {
        for j in (r..=degree).rev() {
            let left = knots[j + span - degree];
            let right = knots[j + 1 + span - r];
            let alpha = if (right - left).abs() <= f64::EPSILON {
                0.0
            } else {
                (t - left) / (right - left)
            };
            let prev = d[j - 1];
            let cur = d[j];
            d[j] = (
                (1.0 - alpha) * prev.0 + alpha * cur.0,
                (1.0 - alpha) * prev.1 + alpha * cur.1,
                (1.0 - alpha) * prev.2 + alpha * cur.2,
            );
        }
    }

    let (x, y, w) = d[degree];
    if w.abs() <= f64::EPSILON {
        Point2::new(x, y)
    } else {
        Point2::new(x / w, y / w)
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Drawing {
    header: DrawingHeader,
    layers: HashMap<String, Layer>,
    entities: Vec<(EntityId, Entity)>,
    next_entity_id: u64,
    blocks: HashMap<String, BlockDefinition>,
}

impl Drawing {
    pub fn new() -> Self {
        let mut drawing = Self::default();
        drawing.ensure_layer("0");
        drawing
    }

    #[inline]
    pub fn header(&self) -> &DrawingHeader {
        &self.header
    }

    #[inline]
    pub fn header_mut(&mut self) -> &mut DrawingHeader {
        &mut self.header
    }

    pub fn ensure_layer(&mut self, name: impl AsRef<str>) {
        let key = name.as_ref();
        self.layers
            .entry(key.to_string())
            .or_insert_with(|| Layer::new(key));
    }

    /// 写入图层表记录，覆盖同名的隐式图层。
    pub fn add_layer(&mut self, layer: Layer) {
        self.layers.insert(layer.name.clone(), layer);
    }

    #[inline]
    pub fn layer(&self, name: &str) -> Option<&Layer> {
        self.layers.get(name)
    }

    pub fn layers(&self) -> impl Iterator<Item = &Layer> {
        self.layers.values()
    }

    pub fn add_entity(&mut self, entity: Entity) -> EntityId {
        self.ensure_layer(entity.layer_name().to_string());
        let id = self.next_id();
        self.entities.push((id, entity));
        id
    }

    pub fn add_line(&mut self, start: Point2, end: Point2, layer: impl Into<String>) -> EntityId {
        self.add_entity(Entity::Line(Line {
            start,
            end,
            layer: layer.into(),
            color: EntityColor::ByLayer,
        }))
    }

    pub fn add_circle(&mut self, center: Point2, radius: f64, layer: impl Into<String>) -> EntityId {
        self.add_entity(Entity::Circle(Circle {
            center,
            radius,
            layer: layer.into(),
            color: EntityColor::ByLayer,
        }))
    }

    pub fn add_arc(
        &mut self,
        center: Point2,
        radius: f64,
        start_angle: f64,
        end_angle: f64,
        layer: impl Into<String>,
    ) -> EntityId {
        self.add_entity(Entity::Arc(Arc {
            center,
            radius,
            start_angle,
            end_angle,
            layer: layer.into(),
            color: EntityColor::ByLayer,
        }))
    }

    pub fn add_polyline<I>(&mut self, points: I, is_closed: bool, layer: impl Into<String>) -> EntityId
    where
        I: IntoIterator<Item = Point2>,
    {
        self.add_entity(Entity::Polyline(Polyline {
            vertices: points.into_iter().map(PolylineVertex::new).collect(),
            is_closed,
            layer: layer.into(),
            color: EntityColor::ByLayer,
        }))
    }

    pub fn entities(&self) -> impl Iterator<Item = &(EntityId, Entity)> {
        self.entities.iter()
    }

    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities
            .iter()
            .find_map(|(entity_id, entity)| (*entity_id == id).then_some(entity))
    }

    #[inline]
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn add_block_definition(&mut self, definition: BlockDefinition) {
        self.blocks.insert(definition.name.clone(), definition);
    }

    #[inline]
    pub fn block(&self, name: &str) -> Option<&BlockDefinition> {
        self.blocks.get(name)
    }

    pub fn blocks(&self) -> impl Iterator<Item = &BlockDefinition> {
        self.blocks.values()
    }

    /// 展开模型空间：递归展开块参照、应用插入变换、解析随层/随块颜色，
    /// 并丢弃位于关闭图层上的实体。
    pub fn resolve(&self) -> Vec<ResolvedEntity> {
        let mut resolved = Vec::with_capacity(self.entities.len());
        let mut stack: Vec<&str> = Vec::new();
        let context = InsertContext {
            transform: Transform2D::identity(),
            layer: None,
            color: EntityColor::FOREGROUND,
        };
        self.resolve_into(
            self.entities.iter().map(|(_, entity)| entity),
            &context,
            &mut stack,
            &mut resolved,
        );
        resolved
    }

    /// 模型空间内所有可见实体的范围。
    pub fn bounds(&self) -> Option<Bounds2D> {
        let mut bounds = Bounds2D::empty();
        let mut has = false;
        for item in self.resolve() {
            if let Some(entity_bounds) = item.entity.bounds() {
                bounds.include_bounds(&entity_bounds);
                has = true;
            }
        }
        if has { Some(bounds) } else { None }
    }

    fn resolve_into<'a, I>(
        &'a self,
        entities: I,
        context: &InsertContext<'_>,
        stack: &mut Vec<&'a str>,
        out: &mut Vec<ResolvedEntity>,
    ) where
        I: Iterator<Item = &'a Entity>,
    {
        for entity in entities {
            let layer = context.effective_layer(entity.layer_name());
            if self.layer(layer).is_some_and(|l| !l.is_visible) {
                continue;
            }
            let color = self.resolve_color(entity.color(), layer, context);

            if let Entity::BlockReference(reference) = entity {
                let Some(block) = self.block(&reference.name) else {
                    continue;
                };
                if stack.len() >= MAX_BLOCK_DEPTH || stack.contains(&block.name.as_str()) {
                    continue;
                }
                let local = Transform2D::from_insert(
                    reference.insert,
                    reference.scale,
                    reference.rotation,
                    block.base_point,
                );
                let child = InsertContext {
                    transform: local.then(context.transform),
                    layer: Some(layer),
                    color,
                };
                stack.push(block.name.as_str());
                self.resolve_into(block.entities.iter(), &child, stack, out);
                stack.pop();
                continue;
            }

            out.push(ResolvedEntity {
                entity: entity.transformed(&context.transform),
                layer: layer.to_string(),
                color,
            });
        }
    }

    fn resolve_color(&self, color: EntityColor, layer: &str, context: &InsertContext<'_>) -> EntityColor {
        match color {
            EntityColor::ByLayer => self
                .layer(layer)
                .map(|l| l.color)
                .filter(|c| !matches!(c, EntityColor::ByLayer | EntityColor::ByBlock))
                .unwrap_or(EntityColor::FOREGROUND),
            EntityColor::ByBlock => context.color,
            other => other,
        }
    }

    #[inline]
    fn next_id(&mut self) -> EntityId {
        let id = self.next_entity_id;
        self.next_entity_id += 1;
        EntityId(id)
    }
}

struct InsertContext<'a> {
    transform: Transform2D,
    /// 块内位于图层 "0" 的实体继承插入所在图层。
    layer: Option<&'a str>,
    color: EntityColor,
}

impl<'a> InsertContext<'a> {
    fn effective_layer<'b>(&self, layer: &'b str) -> &'b str
    where
        'a: 'b,
    {
        match self.layer {
            Some(parent) if layer == "0" => parent,
            _ => layer,
        }
    }
}

fn normalize_angle(angle: f64) -> f64 {
    let result = angle.rem_euclid(TAU);
    if result >= TAU { 0.0 } else { result }
}

/// `base` 在 `[start, start + 2π)` 内的等价角。
#[inline]
fn angle_at_or_after(base: f64, start: f64) -> f64 {
    start + normalize_angle(base - start)
}

/// 把角度区间规范为 `start ∈ [0, 2π)`、`end > start`，相等时视为整圆。
pub fn canonical_interval(start: f64, end: f64) -> (f64, f64) {
    let start = normalize_angle(start);
    let mut end = normalize_angle(end);
    if (end - start).abs() < 1e-9 {
        end = start + TAU;
    } else if end < start {
        end += TAU;
    }
    (start, end)
}

#[inline]
fn polar(center: Point2, radius: f64, angle: f64) -> Point2 {
    center.translate(Vector2::new(radius * angle.cos(), radius * angle.sin()))
}

#[inline]
fn segments_for_sweep(sweep: f64) -> usize {
    ((sweep.abs() / TAU * SEGMENTS_PER_TURN as f64).ceil() as usize).max(4)
}

fn arc_points(center: Point2, radius: f64, start: f64, end: f64) -> Vec<Point2> {
    let steps = segments_for_sweep(end - start);
    (0..=steps)
        .map(|step| polar(center, radius, start + (end - start) * (step as f64 / steps as f64)))
        .collect()
}

fn ellipse_points(ellipse: &Ellipse) -> Vec<Point2> {
    let (start, end) = ellipse.parameter_interval();
    let steps = segments_for_sweep(end - start);
    (0..=steps)
        .map(|step| ellipse.point_at(start + (end - start) * (step as f64 / steps as f64)))
        .collect()
}

fn arc_bounds(center: Point2, radius: f64, start_angle: f64, end_angle: f64, bounds: &mut Bounds2D) {
    let radius = radius.abs();
    if radius <= f64::EPSILON {
        bounds.include_point(center);
        return;
    }

    let (start, end) = canonical_interval(start_angle, end_angle);
    bounds.include_point(polar(center, radius, start));
    bounds.include_point(polar(center, radius, end));

    const QUADRANTS: [f64; 4] = [0.0, FRAC_PI_2, PI, FRAC_PI_2 * 3.0];
    for base in QUADRANTS {
        let candidate = angle_at_or_after(base, start);
        if candidate <= end {
            bounds.include_point(polar(center, radius, candidate));
        }
    }
}

/// 椭圆的解析范围：x、y 分量的极值点位于 `atan2(b, a)` 及其对径处。
fn ellipse_bounds(ellipse: &Ellipse, bounds: &mut Bounds2D) {
    let major = ellipse.major_axis.as_vec2();
    if major.length() <= f64::EPSILON {
        bounds.include_point(ellipse.center);
        return;
    }
    let minor = ellipse.minor_axis().as_vec2();

    let (start, end) = ellipse.parameter_interval();
    bounds.include_point(ellipse.point_at(start));
    bounds.include_point(ellipse.point_at(end));

    let tx = minor.x.atan2(major.x);
    let ty = minor.y.atan2(major.y);
    for base in [tx, tx + PI, ty, ty + PI] {
        let candidate = angle_at_or_after(base, start);
        if candidate <= end {
            bounds.include_point(ellipse.point_at(candidate));
        }
    }
}

fn polyline_segment_bounds(start: Point2, end: Point2, bulge: f64, bounds: &mut Bounds2D) {
    let Some((center, radius, start_angle, sweep)) = bulge_arc(start, end, bulge) else {
        return;
    };
    let (from, to) = if sweep >= 0.0 {
        (start_angle, start_angle + sweep)
    } else {
        (start_angle + sweep, start_angle)
    };
    arc_bounds(center, radius, from, to, bounds);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::Rgb;
    use std::f64::consts::FRAC_PI_2;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn drawing_stores_entities_and_layers() {
        let mut drawing = Drawing::new();
        let line = drawing.add_line(Point2::new(0.0, 0.0), Point2::new(10.0, 0.0), "0");
        let circle = drawing.add_circle(Point2::new(5.0, 5.0), 2.0, "CUT");
        assert_eq!(line.get(), 0);
        assert_eq!(circle.get(), 1);
        assert_eq!(drawing.entity_count(), 2);
        assert!(drawing.layer("CUT").is_some());
        match drawing.entity(circle) {
            Some(Entity::Circle(c)) => assert!(approx(c.radius, 2.0)),
            other => panic!("unexpected entity lookup result: {other:?}"),
        }
    }

    #[test]
    fn rectangle_bounds_match_extents() {
        let mut drawing = Drawing::new();
        drawing.add_polyline(
            [
                Point2::new(0.0, 0.0),
                Point2::new(10.0, 0.0),
                Point2::new(10.0, 5.0),
                Point2::new(0.0, 5.0),
            ],
            true,
            "0",
        );
        let bounds = drawing.bounds().expect("bounds");
        assert!(approx(bounds.width(), 10.0));
        assert!(approx(bounds.height(), 5.0));
    }

    #[test]
    fn empty_drawing_has_no_bounds() {
        assert!(Drawing::new().bounds().is_none());
    }

    #[test]
    fn arc_bounds_include_quadrant_points() {
        let mut drawing = Drawing::new();
        drawing.add_arc(Point2::new(0.0, 0.0), 2.0, 0.0, PI, "0");
        let bounds = drawing.bounds().expect("bounds");
        assert!(approx(bounds.min().x(), -2.0));
        assert!(approx(bounds.max().x(), 2.0));
        assert!(approx(bounds.min().y(), 0.0));
        assert!(approx(bounds.max().y(), 2.0));
    }

    #[test]
    fn bulge_segment_extends_bounds() {
        // bulge = 1 为半圆，弦长 10，向右侧（顺时针方向为负）凸出
        let polyline = Entity::Polyline(Polyline {
            vertices: vec![
                PolylineVertex::with_bulge(Point2::new(0.0, 0.0), 1.0),
                PolylineVertex::new(Point2::new(10.0, 0.0)),
            ],
            is_closed: false,
            layer: "0".into(),
            color: EntityColor::ByLayer,
        });
        let bounds = polyline.bounds().expect("bounds");
        assert!(approx(bounds.min().y(), -5.0));
        assert!(approx(bounds.max().y(), 0.0));
    }

    #[test]
    fn rotated_ellipse_bounds_are_exact() {
        let ellipse = Entity::Ellipse(Ellipse {
            center: Point2::new(0.0, 0.0),
            major_axis: Vector2::new(0.0, 4.0),
            ratio: 0.5,
            start_parameter: 0.0,
            end_parameter: TAU,
            layer: "0".into(),
            color: EntityColor::ByLayer,
        });
        let bounds = ellipse.bounds().expect("bounds");
        assert!(approx(bounds.width(), 4.0));
        assert!(approx(bounds.height(), 8.0));
    }

    #[test]
    fn ellipse_interval_is_normalized_in_closed_form() {
        let mut ellipse = Ellipse {
            center: Point2::new(0.0, 0.0),
            major_axis: Vector2::new(10.0, 0.0),
            ratio: 0.5,
            start_parameter: 1e20,
            end_parameter: -1e300,
            layer: "0".into(),
            color: EntityColor::ByLayer,
        };
        let (start, end) = ellipse.parameter_interval();
        assert!((0.0..TAU).contains(&start));
        assert!(end > start && end <= start + TAU);
        let bounds = Entity::Ellipse(ellipse.clone()).bounds().expect("bounds");
        assert!(bounds.width() <= 20.0 + 1e-9 && bounds.height() <= 10.0 + 1e-9);

        ellipse.start_parameter = -FRAC_PI_2;
        ellipse.end_parameter = FRAC_PI_2;
        let (start, end) = ellipse.parameter_interval();
        assert!(approx(start, FRAC_PI_2 * 3.0));
        assert!(approx(end - start, PI));
        let bounds = Entity::Ellipse(ellipse).bounds().expect("bounds");
        assert!(approx(bounds.min().x(), 0.0) && approx(bounds.max().x(), 10.0));
        assert!(approx(bounds.height(), 10.0));
    }

    #[test]
    fn block_reference_is_expanded_with_transform() {
        let mut drawing = Drawing::new();
        drawing.add_block_definition(BlockDefinition {
            name: "TAB".into(),
            base_point: Point2::new(0.0, 0.0),
            entities: vec![Entity::Line(Line {
                start: Point2::new(0.0, 0.0),
                end: Point2::new(1.0, 0.0),
                layer: "0".into(),
                color: EntityColor::ByBlock,
            })],
        });
        drawing.add_entity(Entity::BlockReference(BlockReference {
            name: "TAB".into(),
            insert: Point2::new(5.0, 5.0),
            scale: Vector2::new(2.0, 2.0),
            rotation: FRAC_PI_2,
            layer: "CUT".into(),
            color: EntityColor::Index(1),
        }));

        let resolved = drawing.resolve();
        assert_eq!(resolved.len(), 1);
        let item = &resolved[0];
        assert_eq!(item.layer, "CUT");
        assert_eq!(item.color, EntityColor::Index(1));
        match &item.entity {
            Entity::Line(line) => {
                assert!(approx(line.start.x(), 5.0) && approx(line.start.y(), 5.0));
                assert!(approx(line.end.x(), 5.0) && approx(line.end.y(), 7.0));
            }
            other => panic!("expected line, got {other:?}"),
        }
    }

    #[test]
    fn recursive_block_does_not_loop() {
        let mut drawing = Drawing::new();
        let self_ref = Entity::BlockReference(BlockReference {
            name: "LOOP".into(),
            insert: Point2::new(1.0, 0.0),
            scale: Vector2::new(1.0, 1.0),
            rotation: 0.0,
            layer: "0".into(),
            color: EntityColor::ByLayer,
        });
        drawing.add_block_definition(BlockDefinition {
            name: "LOOP".into(),
            base_point: Point2::new(0.0, 0.0),
            entities: vec![
                self_ref.clone(),
                Entity::Point(PointEntity {
                    location: Point2::new(0.0, 0.0),
                    layer: "0".into(),
                    color: EntityColor::ByLayer,
                }),
            ],
        });
        drawing.add_entity(self_ref);
        assert_eq!(drawing.resolve().len(), 1);
    }

    #[test]
    fn hidden_layers_and_layer_colors_are_resolved() {
        let mut drawing = Drawing::new();
        drawing.add_layer(Layer::new("ENGRAVE").with_color(EntityColor::Rgb(Rgb::new(0, 0, 255))));
        let mut hidden = Layer::new("NOTES");
        hidden.is_visible = false;
        drawing.add_layer(hidden);
        drawing.add_line(Point2::new(0.0, 0.0), Point2::new(1.0, 1.0), "ENGRAVE");
        drawing.add_line(Point2::new(0.0, 0.0), Point2::new(50.0, 50.0), "NOTES");

        let resolved = drawing.resolve();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].color, EntityColor::Rgb(Rgb::new(0, 0, 255)));
        let bounds = drawing.bounds().expect("bounds");
        assert!(approx(bounds.width(), 1.0));
    }

    #[test]
    fn mirrored_arc_keeps_counter_clockwise_orientation() {
        let arc = Entity::Arc(Arc {
            center: Point2::new(0.0, 0.0),
            radius: 1.0,
            start_angle: 0.0,
            end_angle: FRAC_PI_2,
            layer: "0".into(),
            color: EntityColor::ByLayer,
        });
        let mirror = Transform2D::from_insert(
            Point2::new(0.0, 0.0),
            Vector2::new(-1.0, 1.0),
            0.0,
            Point2::new(0.0, 0.0),
        );
        match arc.transformed(&mirror) {
            Entity::Arc(mirrored) => {
                let (start, end) = canonical_interval(mirrored.start_angle, mirrored.end_angle);
                assert!(approx(start, FRAC_PI_2));
                assert!(approx(end, PI));
            }
            other => panic!("expected arc, got {other:?}"),
        }
    }

    #[test]
    fn non_uniform_scale_flattens_circle() {
        let circle = Entity::Circle(Circle {
            center: Point2::new(0.0, 0.0),
            radius: 1.0,
            layer: "0".into(),
            color: EntityColor::ByLayer,
        });
        let stretch = Transform2D::from_insert(
            Point2::new(0.0, 0.0),
            Vector2::new(3.0, 1.0),
            0.0,
            Point2::new(0.0, 0.0),
        );
        let flattened = circle.transformed(&stretch);
        assert!(matches!(flattened, Entity::Polyline(ref p) if p.is_closed));
        let bounds = flattened.bounds().expect("bounds");
        assert!(approx(bounds.width(), 6.0));
        assert!(approx(bounds.height(), 2.0));
    }

    #[test]
    fn spline_sampling_passes_through_clamped_ends() {
        let spline = Spline {
            degree: 2,
            is_closed: false,
            control_points: vec![
                Point2::new(0.0, 0.0),
                Point2::new(5.0, 10.0),
                Point2::new(10.0, 0.0),
            ],
            fit_points: vec![],
            knot_values: vec![],
            weights: vec![],
            layer: "0".into(),
            color: EntityColor::ByLayer,
        };
        let samples = spline.sample(10);
        assert_eq!(samples.len(), 11);
        assert!(approx(samples[0].x(), 0.0) && approx(samples[0].y(), 0.0));
        assert!(approx(samples[10].x(), 10.0) && approx(samples[10].y(), 0.0));
        // 二次 Bézier 中点
        assert!(approx(samples[5].x(), 5.0) && approx(samples[5].y(), 5.0));
    }

    #[test]
    fn polyline_flatten_expands_bulges() {
        let polyline = Polyline {
            vertices: vec![
                PolylineVertex::with_bulge(Point2::new(0.0, 0.0), 1.0),
                PolylineVertex::new(Point2::new(2.0, 0.0)),
            ],
            is_closed: false,
            layer: "0".into(),
            color: EntityColor::ByLayer,
        };
        let points = polyline.flatten();
        assert!(points.len() > 2);
        for point in &points {
            let distance = point.as_vec2().distance(glam::DVec2::new(1.0, 0.0));
            assert!(approx(distance, 1.0));
        }
        let last = points.last().expect("points");
        assert!(approx(last.x(), 2.0) && approx(last.y(), 0.0));
    }
}
