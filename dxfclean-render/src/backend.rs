use std::f64::consts::{PI, TAU};

use dxfclean_core::{
    color::{EntityColor, Rgb},
    drawing::{
        Arc, Circle, Drawing, Ellipse, Entity, MText, Polyline, ResolvedEntity, Spline, Text,
        bulge_arc, canonical_interval,
    },
    geometry::{Bounds2D, Point2, Vector2},
};
use svg::Document;
use svg::node::element::{
    Circle as SvgCircle, Ellipse as SvgEllipse, Group, Path, Rectangle, Text as SvgText, path::Data,
};
use tracing::{debug, info};

use crate::{BackgroundPolicy, ColorPolicy, Page, PageSettings, RenderConfig, RenderError, RenderedSvg};

/// MTEXT 行距与字高之比。
const MTEXT_LINE_SPACING: f64 = 5.0 / 3.0;
/// 输出坐标保留的小数位（0.1 µm）。
const COORDINATE_PRECISION: f64 = 1e4;

/// 把模型空间渲染为 SVG 文档。输出坐标单位为毫米，Y 轴向下。
pub struct SvgBackend;

impl SvgBackend {
    pub fn render(
        drawing: &Drawing,
        config: &RenderConfig,
        page: &Page,
        settings: &PageSettings,
    ) -> Result<RenderedSvg, RenderError> {
        if !config.line_width.is_finite() || config.line_width <= 0.0 {
            return Err(RenderError::InvalidLineWidth(config.line_width));
        }
        let resolved = drawing.resolve();
        let bounds = content_bounds(&resolved)?;
        let (viewport, width, height) = layout(bounds, page, settings)?;
        let palette = Palette::new(config);

        let canvas_fill = match config.background {
            BackgroundPolicy::Off => "none".to_string(),
            BackgroundPolicy::On => config.background_color.to_hex(),
        };
        let canvas = Rectangle::new()
            .set("x", 0)
            .set("y", 0)
            .set("width", width)
            .set("height", height)
            .set("fill", canvas_fill);

        let mut group = Group::new()
            .set("fill", "none")
            .set("stroke-width", round(config.line_width))
            .set("stroke-linecap", "round")
            .set("stroke-linejoin", "round");
        for item in &resolved {
            group = draw_entity(group, item, &viewport, &palette, config);
        }

        let document = Document::new()
            .set("width", format!("{width}mm"))
            .set("height", format!("{height}mm"))
            .set("viewBox", format!("0 0 {width} {height}"))
            .add(canvas)
            .add(group);

        debug!(entities = resolved.len(), scale = viewport.scale, "模型空间渲染完成");
        info!(width, height, "SVG 输出尺寸（毫米）");

        Ok(RenderedSvg {
            markup: document.to_string(),
            width,
            height,
        })
    }
}

fn content_bounds(resolved: &[ResolvedEntity]) -> Result<Option<Bounds2D>, RenderError> {
    let mut bounds = Bounds2D::empty();
    for item in resolved {
        if let Some(entity_bounds) = item.entity.bounds() {
            bounds.include_bounds(&entity_bounds);
        }
    }
    if bounds.is_empty() {
        return Ok(None);
    }
    if !bounds.is_finite() {
        return Err(RenderError::NonFiniteGeometry);
    }
    Ok(Some(bounds))
}

/// 图纸坐标到 SVG 用户坐标（毫米）的映射，包含 Y 轴翻转。
#[derive(Debug, Clone, Copy)]
struct Viewport {
    min_x: f64,
    max_y: f64,
    scale: f64,
    offset_x: f64,
    offset_y: f64,
}

impl Viewport {
    fn map(&self, point: Point2) -> (f64, f64) {
        (
            round((point.x() - self.min_x) * self.scale + self.offset_x),
            round((self.max_y - point.y()) * self.scale + self.offset_y),
        )
    }

    #[inline]
    fn length(&self, value: f64) -> f64 {
        round(value * self.scale)
    }
}

fn layout(
    bounds: Option<Bounds2D>,
    page: &Page,
    settings: &PageSettings,
) -> Result<(Viewport, f64, f64), RenderError> {
    if !settings.scale.is_finite() || settings.scale <= 0.0 {
        return Err(RenderError::InvalidScale(settings.scale));
    }
    let margin = settings.margin;
    let invalid_page = || RenderError::InvalidPage {
        width: page.width,
        height: page.height,
    };
    if !page.width.is_finite() || !page.height.is_finite() || !margin.is_finite() || margin < 0.0 {
        return Err(invalid_page());
    }

    let (min_x, max_y, content_w, content_h) = match bounds {
        Some(bounds) => (bounds.min().x(), bounds.max().y(), bounds.width(), bounds.height()),
        None => (0.0, 0.0, 0.0, 0.0),
    };

    if page.is_auto() {
        let scale = settings.scale;
        let width = round(content_w * scale + 2.0 * margin);
        let height = round(content_h * scale + 2.0 * margin);
        if !width.is_finite() || !height.is_finite() {
            return Err(RenderError::NonFiniteGeometry);
        }
        let viewport = Viewport {
            min_x,
            max_y,
            scale,
            offset_x: margin,
            offset_y: margin,
        };
        return Ok((viewport, width, height));
    }

    let available_w = page.width - 2.0 * margin;
    let available_h = page.height - 2.0 * margin;
    if available_w <= 0.0 || available_h <= 0.0 {
        return Err(invalid_page());
    }

    let scale = if settings.fit_page {
        let fit_w = (content_w > f64::EPSILON).then(|| available_w / content_w);
        let fit_h = (content_h > f64::EPSILON).then(|| available_h / content_h);
        match (fit_w, fit_h) {
            (Some(w), Some(h)) => w.min(h),
            (Some(w), None) => w,
            (None, Some(h)) => h,
            (None, None) => settings.scale,
        }
    } else {
        settings.scale
    };
    if !(content_w * scale).is_finite() || !(content_h * scale).is_finite() {
        return Err(RenderError::NonFiniteGeometry);
    }

    // 固定页面时内容居中
    let viewport = Viewport {
        min_x,
        max_y,
        scale,
        offset_x: margin + (available_w - content_w * scale) / 2.0,
        offset_y: margin + (available_h - content_h * scale) / 2.0,
    };
    Ok((viewport, round(page.width), round(page.height)))
}

/// 颜色解析：ACI 7 随纸面明暗取黑或白。
struct Palette {
    policy: ColorPolicy,
    foreground: Rgb,
}

impl Palette {
    fn new(config: &RenderConfig) -> Self {
        let foreground = if config.background_color.is_light() {
            Rgb::BLACK
        } else {
            Rgb::WHITE
        };
        Self {
            policy: config.color_policy,
            foreground,
        }
    }

    fn resolve(&self, color: EntityColor) -> String {
        if self.policy == ColorPolicy::Black {
            return Rgb::BLACK.to_hex();
        }
        if color.is_foreground() {
            return self.foreground.to_hex();
        }
        color.to_rgb().unwrap_or(self.foreground).to_hex()
    }
}

fn draw_entity(
    group: Group,
    item: &ResolvedEntity,
    viewport: &Viewport,
    palette: &Palette,
    config: &RenderConfig,
) -> Group {
    let stroke = palette.resolve(item.color);
    match &item.entity {
        Entity::Line(line) => {
            let data = Data::new()
                .move_to(viewport.map(line.start))
                .line_to(viewport.map(line.end));
            group.add(stroked_path(data, &stroke))
        }
        Entity::Circle(circle) => group.add(draw_circle(circle, viewport, &stroke)),
        Entity::Arc(arc) => draw_arc(group, arc, viewport, &stroke),
        Entity::Ellipse(ellipse) => draw_ellipse(group, ellipse, viewport, &stroke),
        Entity::Polyline(polyline) => draw_polyline(group, polyline, viewport, &stroke),
        Entity::Spline(spline) => draw_spline(group, spline, viewport, &stroke),
        Entity::Text(text) => draw_text(group, text, viewport, &stroke),
        Entity::MText(mtext) => draw_mtext(group, mtext, viewport, &stroke),
        Entity::Point(point) => {
            let (cx, cy) = viewport.map(point.location);
            group.add(
                SvgCircle::new()
                    .set("cx", cx)
                    .set("cy", cy)
                    .set("r", round(config.line_width / 2.0))
                    .set("fill", stroke)
                    .set("stroke", "none"),
            )
        }
        Entity::BlockReference(reference) => {
            debug!(block = %reference.name, "块参照未展开，跳过");
            group
        }
    }
}

fn stroked_path(data: Data, stroke: &str) -> Path {
    Path::new().set("stroke", stroke).set("d", data)
}

fn draw_circle(circle: &Circle, viewport: &Viewport, stroke: &str) -> SvgCircle {
    let (cx, cy) = viewport.map(circle.center);
    SvgCircle::new()
        .set("cx", cx)
        .set("cy", cy)
        .set("r", viewport.length(circle.radius.abs()))
        .set("stroke", stroke)
}

fn draw_arc(group: Group, arc: &Arc, viewport: &Viewport, stroke: &str) -> Group {
    let (start, end) = canonical_interval(arc.start_angle, arc.end_angle);
    let sweep = end - start;
    if (sweep - TAU).abs() < 1e-9 {
        let circle = Circle {
            center: arc.center,
            radius: arc.radius,
            layer: arc.layer.clone(),
            color: arc.color,
        };
        return group.add(draw_circle(&circle, viewport, stroke));
    }

    let radius = viewport.length(arc.radius.abs());
    let large_arc = if sweep > PI { 1 } else { 0 };
    // 翻转 Y 轴后逆时针弧在 SVG 中 sweep-flag 为 0
    let data = Data::new()
        .move_to(viewport.map(polar(arc.center, arc.radius, start)))
        .elliptical_arc_to(arc_parameters(
            radius,
            radius,
            0.0,
            large_arc,
            0,
            viewport.map(polar(arc.center, arc.radius, end)),
        ));
    group.add(stroked_path(data, stroke))
}

fn draw_ellipse(group: Group, ellipse: &Ellipse, viewport: &Viewport, stroke: &str) -> Group {
    let rx = viewport.length(ellipse.major_axis.length());
    let ry = viewport.length(ellipse.major_axis.length() * ellipse.ratio);
    let rotation = round(-ellipse.major_axis.angle().to_degrees());
    let (cx, cy) = viewport.map(ellipse.center);

    if ellipse.is_full() {
        return group.add(
            SvgEllipse::new()
                .set("cx", cx)
                .set("cy", cy)
                .set("rx", rx)
                .set("ry", ry)
                .set("transform", format!("rotate({rotation} {cx} {cy})"))
                .set("stroke", stroke),
        );
    }

    let (start, end) = ellipse.parameter_interval();
    let large_arc = if end - start > PI { 1 } else { 0 };
    let data = Data::new()
        .move_to(viewport.map(ellipse.point_at(start)))
        .elliptical_arc_to(arc_parameters(
            rx,
            ry,
            rotation,
            large_arc,
            0,
            viewport.map(ellipse.point_at(end)),
        ));
    group.add(stroked_path(data, stroke))
}

fn draw_polyline(group: Group, polyline: &Polyline, viewport: &Viewport, stroke: &str) -> Group {
    let Some(first) = polyline.vertices.first() else {
        return group;
    };
    if polyline.vertices.len() < 2 {
        return group;
    }

    let mut data = Data::new().move_to(viewport.map(first.position));
    for (start, end, bulge) in polyline.segments() {
        data = match bulge_arc(start, end, bulge) {
            Some((_, radius, _, sweep)) => {
                let radius = viewport.length(radius);
                let large_arc = if sweep.abs() > PI { 1 } else { 0 };
                let sweep_flag = if bulge > 0.0 { 0 } else { 1 };
                data.elliptical_arc_to(arc_parameters(
                    radius,
                    radius,
                    0.0,
                    large_arc,
                    sweep_flag,
                    viewport.map(end),
                ))
            }
            None => data.line_to(viewport.map(end)),
        };
    }
    if polyline.is_closed {
        data = data.close();
    }
    group.add(stroked_path(data, stroke))
}

fn draw_spline(group: Group, spline: &Spline, viewport: &Viewport, stroke: &str) -> Group {
    let density = spline.control_points.len().max(spline.fit_points.len());
    let points = spline.sample((density * 16).clamp(16, 512));
    let mut iter = points.into_iter();
    let Some(first) = iter.next() else {
        return group;
    };
    let mut data = Data::new().move_to(viewport.map(first));
    for point in iter {
        data = data.line_to(viewport.map(point));
    }
    if spline.is_closed {
        data = data.close();
    }
    group.add(stroked_path(data, stroke))
}

fn draw_text(group: Group, text: &Text, viewport: &Viewport, fill: &str) -> Group {
    let anchor = match text.horizontal_align {
        1 => "middle",
        2 => "end",
        _ => "start",
    };
    group.add(text_element(
        &text.content,
        text.insert,
        text.height,
        text.rotation,
        anchor,
        viewport,
        fill,
    ))
}

/// 多行文字逐行输出；附着点决定水平锚点与整体的垂直位置。
fn draw_mtext(mut group: Group, mtext: &MText, viewport: &Viewport, fill: &str) -> Group {
    let attachment = mtext.attachment_point.clamp(1, 9) - 1;
    let anchor = match attachment % 3 {
        1 => "middle",
        2 => "end",
        _ => "start",
    };
    let lines: Vec<&str> = mtext.content.lines().collect();
    let spacing = mtext.height * MTEXT_LINE_SPACING;
    let block_height = mtext.height + spacing * lines.len().saturating_sub(1) as f64;
    let shift = match attachment / 3 {
        0 => 0.0,
        1 => block_height / 2.0,
        _ => block_height,
    };
    let down = Vector2::from_angle(mtext.rotation - PI / 2.0);

    for (index, line) in lines.iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let depth = mtext.height + spacing * index as f64 - shift;
        let baseline = mtext.insert.translate(Vector2(down.as_vec2() * depth));
        group = group.add(text_element(
            line,
            baseline,
            mtext.height,
            mtext.rotation,
            anchor,
            viewport,
            fill,
        ));
    }
    group
}

fn text_element(
    content: &str,
    insert: Point2,
    height: f64,
    rotation: f64,
    anchor: &str,
    viewport: &Viewport,
    fill: &str,
) -> SvgText {
    let (x, y) = viewport.map(insert);
    let mut element = SvgText::new(content)
        .set("x", x)
        .set("y", y)
        .set("font-size", viewport.length(height))
        .set("font-family", "sans-serif")
        .set("text-anchor", anchor)
        .set("fill", fill)
        .set("stroke", "none");
    let degrees = round(-rotation.to_degrees());
    if degrees.abs() > 1e-9 {
        element = element.set("transform", format!("rotate({degrees} {x} {y})"));
    }
    element
}

fn arc_parameters(
    rx: f64,
    ry: f64,
    rotation: f64,
    large_arc: u8,
    sweep: u8,
    end: (f64, f64),
) -> (f64, f64, f64, u8, u8, f64, f64) {
    (rx, ry, rotation, large_arc, sweep, end.0, end.1)
}

#[inline]
fn polar(center: Point2, radius: f64, angle: f64) -> Point2 {
    Point2::new(center.x() + radius * angle.cos(), center.y() + radius * angle.sin())
}

/// 截断到输出精度，并把 -0 规范为 0。
#[inline]
fn round(value: f64) -> f64 {
    (value * COORDINATE_PRECISION).round() / COORDINATE_PRECISION + 0.0
}

#[cfg(test)]
mod tests {
    use dxfclean_core::drawing::{PolylineVertex, Text};
    use super::*;

    fn rectangle_10x5() -> Drawing {
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
        drawing
    }

    #[test]
    fn auto_page_uses_content_extents_in_mm() {
        let rendered = SvgBackend::render(
            &rectangle_10x5(),
            &RenderConfig::default(),
            &Page::auto(),
            &PageSettings::default(),
        )
        .expect("渲染失败");

        assert!((rendered.width - 10.0).abs() < 1e-9);
        assert!((rendered.height - 5.0).abs() < 1e-9);
        assert!(rendered.markup.contains("width=\"10mm\""));
        assert!(rendered.markup.contains("height=\"5mm\""));
        assert!(rendered.markup.contains("viewBox=\"0 0 10 5\""));
    }

    #[test]
    fn scale_multiplies_output_size() {
        let rendered = SvgBackend::render(
            &rectangle_10x5(),
            &RenderConfig::default(),
            &Page::auto(),
            &PageSettings::with_scale(25.4),
        )
        .expect("渲染失败");

        assert!((rendered.width - 254.0).abs() < 1e-9);
        assert!((rendered.height - 127.0).abs() < 1e-9);
    }

    #[test]
    fn canvas_rect_precedes_geometry() {
        let rendered = SvgBackend::render(
            &rectangle_10x5(),
            &RenderConfig::default(),
            &Page::auto(),
            &PageSettings::default(),
        )
        .expect("渲染失败");

        let rect = rendered.markup.find("<rect").expect("缺少画布矩形");
        let group = rendered.markup.find("<g").expect("缺少图元分组");
        assert!(rect < group);
        assert_eq!(rendered.markup.matches("<rect").count(), 1);
        assert!(rendered.markup.contains("fill=\"none\""));
    }

    #[test]
    fn background_on_fills_canvas() {
        let config = RenderConfig {
            background: BackgroundPolicy::On,
            ..RenderConfig::default()
        };
        let rendered =
            SvgBackend::render(&rectangle_10x5(), &config, &Page::auto(), &PageSettings::default())
                .expect("渲染失败");
        assert!(rendered.markup.contains("fill=\"#ffffff\""));
    }

    #[test]
    fn foreground_color_follows_background_and_black_policy() {
        let mut drawing = rectangle_10x5();
        drawing.add_entity(Entity::Line(dxfclean_core::drawing::Line {
            start: Point2::new(0.0, 0.0),
            end: Point2::new(10.0, 5.0),
            layer: "0".to_string(),
            color: EntityColor::Index(1),
        }));

        let rendered = SvgBackend::render(
            &drawing,
            &RenderConfig::default(),
            &Page::auto(),
            &PageSettings::default(),
        )
        .expect("渲染失败");
        assert!(rendered.markup.contains("stroke=\"#000000\""));
        assert!(rendered.markup.contains("stroke=\"#ff0000\""));

        let black = RenderConfig {
            color_policy: ColorPolicy::Black,
            ..RenderConfig::default()
        };
        let rendered =
            SvgBackend::render(&drawing, &black, &Page::auto(), &PageSettings::default())
                .expect("渲染失败");
        assert!(!rendered.markup.contains("#ff0000"));

        let dark = RenderConfig {
            background_color: Rgb::BLACK,
            ..RenderConfig::default()
        };
        let rendered = SvgBackend::render(&drawing, &dark, &Page::auto(), &PageSettings::default())
            .expect("渲染失败");
        assert!(rendered.markup.contains("stroke=\"#ffffff\""));
    }

    #[test]
    fn empty_drawing_renders_blank_document() {
        let rendered = SvgBackend::render(
            &Drawing::new(),
            &RenderConfig::default(),
            &Page::auto(),
            &PageSettings::default(),
        )
        .expect("空图纸也应能渲染");
        assert!(rendered.markup.contains("<svg"));
        assert!(rendered.width.abs() < 1e-9);
    }

    #[test]
    fn invalid_scale_is_rejected() {
        for scale in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let result = SvgBackend::render(
                &rectangle_10x5(),
                &RenderConfig::default(),
                &Page::auto(),
                &PageSettings::with_scale(scale),
            );
            assert!(matches!(result, Err(RenderError::InvalidScale(_))));
        }
    }

    #[test]
    fn invalid_line_width_is_rejected() {
        for line_width in [0.0, -2.0, f64::NAN] {
            let config = RenderConfig {
                line_width,
                ..RenderConfig::default()
            };
            let result = SvgBackend::render(
                &rectangle_10x5(),
                &config,
                &Page::auto(),
                &PageSettings::default(),
            );
            assert!(matches!(result, Err(RenderError::InvalidLineWidth(_))));
        }
    }

    #[test]
    fn overflowing_page_size_is_rejected() {
        let result = layout(
            rectangle_10x5().bounds(),
            &Page::auto(),
            &PageSettings::with_scale(1e308),
        );
        assert!(matches!(result, Err(RenderError::NonFiniteGeometry)));
    }

    #[test]
    fn fit_page_scales_into_margins() {
        let settings = PageSettings {
            scale: 1.0,
            fit_page: true,
            margin: 5.0,
        };
        let (viewport, width, height) = layout(
            rectangle_10x5().bounds(),
            &Page::fixed(110.0, 100.0),
            &settings,
        )
        .expect("布局失败");
        assert!((width - 110.0).abs() < 1e-9);
        assert!((height - 100.0).abs() < 1e-9);
        assert!((viewport.scale - 10.0).abs() < 1e-9);

        let (x, y) = viewport.map(Point2::new(0.0, 5.0));
        assert!((x - 5.0).abs() < 1e-9);
        assert!((y - 25.0).abs() < 1e-9);

        let tiny = layout(None, &Page::fixed(8.0, 8.0), &settings);
        assert!(matches!(tiny, Err(RenderError::InvalidPage { .. })));
    }

    #[test]
    fn viewport_flips_y_axis() {
        let (viewport, _, _) =
            layout(rectangle_10x5().bounds(), &Page::auto(), &PageSettings::default())
                .expect("布局失败");
        assert_eq!(viewport.map(Point2::new(0.0, 0.0)), (0.0, 5.0));
        assert_eq!(viewport.map(Point2::new(10.0, 5.0)), (10.0, 0.0));
    }

    #[test]
    fn curves_and_text_are_emitted() {
        let mut drawing = Drawing::new();
        drawing.add_arc(Point2::new(0.0, 0.0), 2.0, 0.0, PI / 2.0, "0");
        drawing.add_entity(Entity::Polyline(Polyline {
            vertices: vec![
                PolylineVertex::with_bulge(Point2::new(0.0, 0.0), 1.0),
                PolylineVertex::new(Point2::new(4.0, 0.0)),
            ],
            is_closed: false,
            layer: "0".to_string(),
            color: EntityColor::ByLayer,
        }));
        drawing.add_entity(Entity::Text(Text {
            insert: Point2::new(1.0, 1.0),
            content: "PART-7".to_string(),
            height: 2.0,
            rotation: PI / 2.0,
            horizontal_align: 1,
            layer: "0".to_string(),
            color: EntityColor::ByLayer,
        }));

        let rendered = SvgBackend::render(
            &drawing,
            &RenderConfig::default(),
            &Page::auto(),
            &PageSettings::default(),
        )
        .expect("渲染失败");
        assert!(rendered.markup.contains("<path"));
        assert!(rendered.markup.contains("A"));
        assert!(rendered.markup.contains("PART-7"));
        assert!(rendered.markup.contains("text-anchor=\"middle\""));
        assert!(rendered.markup.contains("rotate(-90"));
    }
}
