//! Stateless item rasterization.
//!
//! `draw_item` is the single entry point shared by tile generation, in-place
//! tile updates and the selection imposter. It holds no state and draws
//! deterministically, so two tiles sharing a seam render identically on both
//! sides of it.

mod background;

pub use background::draw_background;

use std::sync::Arc;

use kurbo::{Affine, Rect};
use model::{Color, ImageSource, Item, ItemPayload, StrokeData, StrokeStyle, TextData};
use tiny_skia::{
    FillRule, LineCap, LineJoin, Paint, PathBuilder, Pixmap, PixmapPaint, Stroke, Transform,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderError {
    /// Item geometry could not be turned into a paintable path.
    InvalidGeometry,
}

impl std::fmt::Display for RenderError {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RenderError::InvalidGeometry => {
                write!(formatter, "item geometry is not paintable")
            }
        }
    }
}

impl std::error::Error for RenderError {}

/// Paints one item onto `pixmap`. `world_to_pixels` maps world coordinates
/// into the pixmap's pixel space. With `debug` set, the item's bounds are
/// outlined as well.
pub fn draw_item(
    pixmap: &mut Pixmap,
    world_to_pixels: Affine,
    item: &Item,
    images: &dyn ImageSource,
    debug: bool,
) -> Result<(), RenderError> {
    match &item.payload {
        ItemPayload::Stroke(stroke) => draw_stroke(pixmap, world_to_pixels, stroke)?,
        ItemPayload::Image(image) => draw_image(pixmap, world_to_pixels, image, images),
        ItemPayload::Text(text) => draw_text(pixmap, world_to_pixels, text)?,
    }
    if debug {
        draw_bounds_outline(pixmap, world_to_pixels, item.bounds);
    }
    Ok(())
}

/// Paints a scaled-to-fit overview of `items` covering `world_rect`, for the
/// minimap. Items that fail to paint are skipped; an overview with a hole
/// beats no overview.
pub fn draw_overview(
    pixmap: &mut Pixmap,
    items: &[Arc<Item>],
    world_rect: Rect,
    images: &dyn ImageSource,
) {
    if world_rect.width() <= 0.0 || world_rect.height() <= 0.0 {
        return;
    }
    pixmap.fill(to_skia_color(Color::WHITE));
    let scale = (f64::from(pixmap.width()) / world_rect.width())
        .min(f64::from(pixmap.height()) / world_rect.height());
    let world_to_pixels =
        Affine::scale(scale) * Affine::translate((-world_rect.x0, -world_rect.y0));
    for item in items {
        if let Err(error) = draw_item(pixmap, world_to_pixels, item, images, false) {
            tracing::warn!(%error, "overview skipped an unpaintable item");
        }
    }
}

/// Clears pixels along a polyline, used by the standard (pixel) eraser. The
/// brush writes fully-transparent pixels of the given width.
pub fn clear_along_path(
    pixmap: &mut Pixmap,
    world_to_pixels: Affine,
    path: &[kurbo::Point],
    width: f64,
) -> Result<(), RenderError> {
    let Some(skia_path) = polyline_path(path.iter().map(|point| (point.x, point.y))) else {
        return Err(RenderError::InvalidGeometry);
    };
    let mut paint = Paint::default();
    paint.set_color_rgba8(0, 0, 0, 255);
    paint.blend_mode = tiny_skia::BlendMode::Clear;
    paint.anti_alias = false;

    pixmap.stroke_path(
        &skia_path,
        &paint,
        &Stroke {
            width: width as f32,
            line_cap: LineCap::Round,
            line_join: LineJoin::Round,
            ..Stroke::default()
        },
        affine_to_transform(world_to_pixels),
        None,
    );
    Ok(())
}

pub fn affine_to_transform(affine: Affine) -> Transform {
    let [a, b, c, d, e, f] = affine.as_coeffs();
    Transform::from_row(a as f32, b as f32, c as f32, d as f32, e as f32, f as f32)
}

pub fn to_skia_color(color: Color) -> tiny_skia::Color {
    tiny_skia::Color::from_rgba8(color.red, color.green, color.blue, color.alpha)
}

fn draw_stroke(
    pixmap: &mut Pixmap,
    world_to_pixels: Affine,
    stroke: &StrokeData,
) -> Result<(), RenderError> {
    if stroke.points.is_empty() {
        return Err(RenderError::InvalidGeometry);
    }

    let mut paint = Paint::default();
    paint.anti_alias = true;
    let color = match stroke.style {
        StrokeStyle::Highlighter => stroke.color.with_alpha(stroke.color.alpha / 2),
        StrokeStyle::Pen | StrokeStyle::Marker => stroke.color,
    };
    paint.set_color(to_skia_color(color));

    let transform = affine_to_transform(world_to_pixels);
    if stroke.points.len() == 1 {
        // A dot: stroke caps never show for zero-length paths, so paint the
        // disc directly.
        let point = stroke.points[0];
        let Some(circle) =
            PathBuilder::from_circle(point.x as f32, point.y as f32, (stroke.width / 2.0) as f32)
        else {
            return Err(RenderError::InvalidGeometry);
        };
        pixmap.fill_path(&circle, &paint, FillRule::Winding, transform, None);
        return Ok(());
    }

    let Some(path) = polyline_path(stroke.points.iter().map(|point| (point.x, point.y))) else {
        return Err(RenderError::InvalidGeometry);
    };
    let (line_cap, line_join) = match stroke.style {
        StrokeStyle::Pen | StrokeStyle::Highlighter => (LineCap::Round, LineJoin::Round),
        StrokeStyle::Marker => (LineCap::Square, LineJoin::Miter),
    };
    pixmap.stroke_path(
        &path,
        &paint,
        &Stroke {
            width: stroke.width as f32,
            line_cap,
            line_join,
            ..Stroke::default()
        },
        transform,
        None,
    );
    Ok(())
}

fn draw_image(
    pixmap: &mut Pixmap,
    world_to_pixels: Affine,
    image: &model::ImageData,
    images: &dyn ImageSource,
) {
    let Some(bitmap) = images.image_bitmap(image.source) else {
        tracing::warn!(source = ?image.source, "image handle did not resolve, skipping item");
        return;
    };
    let Some(source) = bitmap_to_pixmap(&bitmap) else {
        tracing::warn!(
            width = bitmap.width,
            height = bitmap.height,
            "image bitmap is malformed, skipping item"
        );
        return;
    };

    let placement = world_to_pixels
        * Affine::rotate_about(image.rotation, image.rect.center())
        * Affine::translate((image.rect.x0, image.rect.y0))
        * Affine::scale_non_uniform(
            image.rect.width() / f64::from(bitmap.width),
            image.rect.height() / f64::from(bitmap.height),
        );
    pixmap.draw_pixmap(
        0,
        0,
        source.as_ref(),
        &PixmapPaint::default(),
        affine_to_transform(placement),
        None,
    );
}

fn draw_text(
    pixmap: &mut Pixmap,
    world_to_pixels: Affine,
    text: &TextData,
) -> Result<(), RenderError> {
    // TODO: shape and rasterize the string with a text stack (cosmic-text);
    // until then the layout rect and baseline stand in so text items stay
    // visible and selectable.
    let placement = world_to_pixels * Affine::rotate_about(text.rotation, text.rect.center());
    let transform = affine_to_transform(placement);

    let mut paint = Paint::default();
    paint.anti_alias = true;
    paint.set_color(to_skia_color(text.color));

    let rect = text.rect;
    let Some(outline) = rect_path(rect) else {
        return Err(RenderError::InvalidGeometry);
    };
    let baseline_y = rect.y0 + text.font_size.min(rect.height()) * 0.8;
    let Some(baseline) =
        polyline_path([(rect.x0, baseline_y), (rect.x1, baseline_y)].into_iter())
    else {
        return Err(RenderError::InvalidGeometry);
    };

    let hairline = Stroke {
        width: 1.0,
        ..Stroke::default()
    };
    pixmap.stroke_path(&outline, &paint, &hairline, transform, None);
    pixmap.stroke_path(&baseline, &paint, &hairline, transform, None);
    Ok(())
}

fn draw_bounds_outline(pixmap: &mut Pixmap, world_to_pixels: Affine, bounds: Rect) {
    let Some(outline) = rect_path(bounds) else {
        return;
    };
    let mut paint = Paint::default();
    paint.set_color_rgba8(255, 0, 0, 128);
    pixmap.stroke_path(
        &outline,
        &paint,
        &Stroke {
            width: 1.0,
            ..Stroke::default()
        },
        affine_to_transform(world_to_pixels),
        None,
    );
}

fn polyline_path(points: impl Iterator<Item = (f64, f64)>) -> Option<tiny_skia::Path> {
    let mut builder = PathBuilder::new();
    let mut first = true;
    for (x, y) in points {
        if first {
            builder.move_to(x as f32, y as f32);
            first = false;
        } else {
            builder.line_to(x as f32, y as f32);
        }
    }
    builder.finish()
}

fn rect_path(rect: Rect) -> Option<tiny_skia::Path> {
    let skia_rect = tiny_skia::Rect::from_ltrb(
        rect.x0 as f32,
        rect.y0 as f32,
        rect.x1 as f32,
        rect.y1 as f32,
    )?;
    Some(PathBuilder::from_rect(skia_rect))
}

/// Converts straight-alpha RGBA8 into a premultiplied pixmap.
fn bitmap_to_pixmap(bitmap: &model::ImageBitmap) -> Option<Pixmap> {
    let expected_len = bitmap.width as usize * bitmap.height as usize * 4;
    if bitmap.rgba.len() != expected_len || bitmap.width == 0 || bitmap.height == 0 {
        return None;
    }
    let mut pixmap = Pixmap::new(bitmap.width, bitmap.height)?;
    let data = pixmap.data_mut();
    for (destination, source) in data.chunks_exact_mut(4).zip(bitmap.rgba.chunks_exact(4)) {
        let alpha = source[3] as u16;
        destination[0] = ((source[0] as u16 * alpha) / 255) as u8;
        destination[1] = ((source[1] as u16 * alpha) / 255) as u8;
        destination[2] = ((source[2] as u16 * alpha) / 255) as u8;
        destination[3] = source[3];
    }
    Some(pixmap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::{InputPoint, ItemOrder, NoImages, ZBucket};

    fn stroke_item(points: &[(f64, f64)], width: f64) -> Item {
        Item::new(
            ItemOrder(1),
            ZBucket::Normal,
            ItemPayload::Stroke(StrokeData {
                color: Color::BLACK,
                width,
                style: StrokeStyle::Pen,
                points: points
                    .iter()
                    .map(|&(x, y)| InputPoint {
                        x,
                        y,
                        pressure: 1.0,
                        timestamp_ms: 0,
                    })
                    .collect(),
            }),
        )
        .expect("valid stroke")
    }

    fn painted_pixels(pixmap: &Pixmap) -> usize {
        pixmap
            .pixels()
            .iter()
            .filter(|pixel| pixel.alpha() != 0)
            .count()
    }

    #[test]
    fn stroke_paints_pixels_along_its_path() {
        let mut pixmap = Pixmap::new(64, 64).expect("pixmap");
        let item = stroke_item(&[(8.0, 32.0), (56.0, 32.0)], 4.0);
        draw_item(&mut pixmap, Affine::IDENTITY, &item, &NoImages, false).expect("draw");

        assert!(pixmap.pixel(32, 32).expect("in bounds").alpha() > 0);
        assert_eq!(pixmap.pixel(32, 8).expect("in bounds").alpha(), 0);
    }

    #[test]
    fn single_point_stroke_paints_a_dot() {
        let mut pixmap = Pixmap::new(32, 32).expect("pixmap");
        let item = stroke_item(&[(16.0, 16.0)], 8.0);
        draw_item(&mut pixmap, Affine::IDENTITY, &item, &NoImages, false).expect("draw");
        assert!(pixmap.pixel(16, 16).expect("in bounds").alpha() > 0);
    }

    #[test]
    fn identical_world_geometry_renders_identically_across_a_seam() {
        // Two 32px-wide targets covering adjacent world windows; the stroke
        // crosses the shared seam at x = 32.
        let item = stroke_item(&[(8.0, 16.0), (56.0, 16.0)], 6.0);

        let mut left = Pixmap::new(32, 32).expect("pixmap");
        draw_item(&mut left, Affine::IDENTITY, &item, &NoImages, false).expect("draw");
        let mut right = Pixmap::new(32, 32).expect("pixmap");
        draw_item(
            &mut right,
            Affine::translate((-32.0, 0.0)),
            &item,
            &NoImages,
            false,
        )
        .expect("draw");

        // A full-width render is the reference for both sides of the seam.
        let mut full = Pixmap::new(64, 32).expect("pixmap");
        draw_item(&mut full, Affine::IDENTITY, &item, &NoImages, false).expect("draw");
        for y in 0..32 {
            let left_edge = left.pixel(31, y).expect("in bounds");
            assert_eq!(left_edge, full.pixel(31, y).expect("in bounds"));
            assert_eq!(
                right.pixel(0, y).expect("in bounds"),
                full.pixel(32, y).expect("in bounds")
            );
        }
    }

    #[test]
    fn clear_along_path_erases_previously_painted_pixels() {
        let mut pixmap = Pixmap::new(64, 64).expect("pixmap");
        let item = stroke_item(&[(8.0, 32.0), (56.0, 32.0)], 6.0);
        draw_item(&mut pixmap, Affine::IDENTITY, &item, &NoImages, false).expect("draw");
        assert!(painted_pixels(&pixmap) > 0);

        clear_along_path(
            &mut pixmap,
            Affine::IDENTITY,
            &[kurbo::Point::new(0.0, 32.0), kurbo::Point::new(64.0, 32.0)],
            12.0,
        )
        .expect("clear");
        assert_eq!(painted_pixels(&pixmap), 0);
    }

    #[test]
    fn overview_fits_distant_content_into_a_small_target() {
        let mut pixmap = Pixmap::new(64, 64).expect("pixmap");
        let items = vec![
            Arc::new(stroke_item(&[(0.0, 0.0), (1000.0, 0.0)], 40.0)),
            Arc::new(stroke_item(&[(0.0, 1000.0), (1000.0, 1000.0)], 40.0)),
        ];
        draw_overview(
            &mut pixmap,
            &items,
            Rect::new(0.0, 0.0, 1024.0, 1024.0),
            &NoImages,
        );

        // Both strokes land inside the 64px target after scaling.
        assert!(pixmap.pixel(30, 0).expect("in bounds").red() < 255);
        assert!(pixmap.pixel(30, 62).expect("in bounds").red() < 255);
        // Unpainted regions are the white base.
        assert_eq!(pixmap.pixel(30, 30).expect("in bounds").red(), 255);
    }

    #[test]
    fn empty_stroke_reports_invalid_geometry() {
        let mut pixmap = Pixmap::new(8, 8).expect("pixmap");
        let item = Item {
            order: ItemOrder(1),
            z_bucket: ZBucket::Normal,
            bounds: Rect::new(0.0, 0.0, 1.0, 1.0),
            payload: ItemPayload::Stroke(StrokeData {
                color: Color::BLACK,
                width: 1.0,
                style: StrokeStyle::Pen,
                points: Vec::new(),
            }),
        };
        let error =
            draw_item(&mut pixmap, Affine::IDENTITY, &item, &NoImages, false).unwrap_err();
        assert_eq!(error, RenderError::InvalidGeometry);
    }

    #[test]
    fn missing_image_handle_is_skipped_without_error() {
        let mut pixmap = Pixmap::new(8, 8).expect("pixmap");
        let item = Item {
            order: ItemOrder(1),
            z_bucket: ZBucket::Normal,
            bounds: Rect::new(0.0, 0.0, 4.0, 4.0),
            payload: ItemPayload::Image(model::ImageData {
                source: model::ImageHandle::default(),
                rect: Rect::new(0.0, 0.0, 4.0, 4.0),
                rotation: 0.0,
            }),
        };
        draw_item(&mut pixmap, Affine::IDENTITY, &item, &NoImages, false)
            .expect("missing images are skipped");
        assert_eq!(painted_pixels(&pixmap), 0);
    }
}
