use dxfclean_core::{color::EntityColor, drawing::Drawing, geometry::Point2};
use dxfclean_render::{
    BackgroundPolicy, CleanupPolicy, Page, PageSettings, RenderConfig, SvgBackend, clean,
    cleanup::{WHITE_BACKGROUND, count_rects},
};

fn sample_drawing() -> Drawing {
    let mut drawing = Drawing::new();
    drawing.add_line(Point2::new(0.0, 0.0), Point2::new(30.0, 0.0), "CUT");
    drawing.add_circle(Point2::new(15.0, 10.0), 4.0, "CUT");
    drawing.add_polyline(
        [
            Point2::new(0.0, 0.0),
            Point2::new(30.0, 0.0),
            Point2::new(30.0, 20.0),
            Point2::new(0.0, 20.0),
        ],
        true,
        "ENGRAVE",
    );
    drawing
}

#[test]
fn rendered_output_always_carries_canvas_rect() {
    for background in [BackgroundPolicy::Off, BackgroundPolicy::On] {
        let config = RenderConfig {
            background,
            ..RenderConfig::default()
        };
        let rendered = SvgBackend::render(
            &sample_drawing(),
            &config,
            &Page::auto(),
            &PageSettings::default(),
        )
        .expect("渲染失败");
        assert_eq!(count_rects(&rendered.markup), 1);
    }
}

#[test]
fn strip_leaves_no_rect_behind() {
    let rendered = SvgBackend::render(
        &sample_drawing(),
        &RenderConfig::default(),
        &Page::auto(),
        &PageSettings::default(),
    )
    .expect("渲染失败");

    let cleaned = clean(&rendered, CleanupPolicy::Strip);
    assert_eq!(count_rects(cleaned.as_str()), 0);
    assert!(cleaned.as_str().contains("<circle"));
    assert!(cleaned.as_str().contains("<path"));
}

#[test]
fn replace_keeps_exactly_one_white_background() {
    let rendered = SvgBackend::render(
        &sample_drawing(),
        &RenderConfig::default(),
        &Page::auto(),
        &PageSettings::with_scale(25.4),
    )
    .expect("渲染失败");

    let cleaned = clean(&rendered, CleanupPolicy::Replace);
    assert_eq!(cleaned.as_str().matches(WHITE_BACKGROUND).count(), 1);
    assert_eq!(count_rects(cleaned.as_str()), 1);

    let again = dxfclean_render::cleanup::clean_markup(cleaned.as_str(), CleanupPolicy::Replace);
    assert_eq!(again, cleaned.markup);
}

#[test]
fn layer_colors_survive_cleanup() {
    let mut drawing = sample_drawing();
    drawing.add_layer(dxfclean_core::drawing::Layer::new("CUT").with_color(EntityColor::Index(1)));

    let rendered = SvgBackend::render(
        &drawing,
        &RenderConfig::default(),
        &Page::auto(),
        &PageSettings::default(),
    )
    .expect("渲染失败");
    let cleaned = clean(&rendered, CleanupPolicy::Strip);
    assert!(cleaned.as_str().contains("#ff0000"));
}
