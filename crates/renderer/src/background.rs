//! Background pattern painting.
//!
//! Patterns are phase-locked to world coordinates (or to the page origin in
//! fixed-page mode), so whichever tile renders first, neighbouring tiles line
//! up into one seamless grid.

use kurbo::{Affine, Point, Rect};
use model::geom::rects_intersect;
use model::{Background, CanvasKind, PAGE_SPACING, PatternSpec};
use tiny_skia::{FillRule, Paint, PathBuilder, Pixmap};

use crate::{affine_to_transform, to_skia_color};

const PAGE_GAP_COLOR: model::Color = model::Color::opaque(208, 208, 208);

/// Fills the base surface and paints the background pattern for the world
/// window `world_rect` onto `pixmap`.
pub fn draw_background(
    pixmap: &mut Pixmap,
    world_to_pixels: Affine,
    background: &Background,
    canvas_kind: &CanvasKind,
    world_rect: Rect,
) {
    match canvas_kind {
        CanvasKind::Infinite => {
            pixmap.fill(to_skia_color(model::Color::WHITE));
            // Phase-anchor on the world square, not the tile window, so every
            // tile derives the same grid positions.
            draw_pattern(
                pixmap,
                world_to_pixels,
                background,
                world_rect,
                model::world_rect(),
                0.0,
            );
        }
        CanvasKind::FixedPages {
            page_width,
            page_height,
        } => {
            pixmap.fill(to_skia_color(PAGE_GAP_COLOR));
            for page_rect in pages_intersecting(*page_width, *page_height, world_rect) {
                fill_world_rect(pixmap, world_to_pixels, page_rect, model::Color::WHITE);
                let pattern_clip = match page_rect.intersect(world_rect) {
                    clip if clip.width() > 0.0 && clip.height() > 0.0 => clip,
                    _ => continue,
                };
                let centering = centering_offset(background, *page_width);
                draw_pattern(
                    pixmap,
                    world_to_pixels,
                    background,
                    pattern_clip,
                    pattern_rect(page_rect, background),
                    centering,
                );
            }
        }
    }
}

/// Page `n` sits below page `n - 1` with a fixed gap; pages only extend
/// downward from the origin.
fn pages_intersecting(page_width: f64, page_height: f64, world_rect: Rect) -> Vec<Rect> {
    let stride = page_height + PAGE_SPACING;
    let first = (world_rect.y0 / stride).floor().max(0.0) as i64;
    let last = (world_rect.y1 / stride).floor().max(0.0) as i64;
    (first..=last)
        .map(|page| {
            let top = page as f64 * stride;
            Rect::new(0.0, top, page_width, top + page_height)
        })
        .filter(|page_rect| rects_intersect(*page_rect, world_rect))
        .collect()
}

fn pattern_rect(page_rect: Rect, background: &Background) -> Rect {
    let padding = match background {
        Background::Blank => 0.0,
        Background::Dots(spec) | Background::Lines(spec) | Background::Grid(spec) => spec.padding,
    };
    page_rect.inflate(-padding, -padding)
}

fn centering_offset(background: &Background, page_width: f64) -> f64 {
    let spec = match background {
        Background::Blank => return 0.0,
        Background::Dots(spec) | Background::Lines(spec) | Background::Grid(spec) => spec,
    };
    if !spec.centered || spec.spacing <= 0.0 {
        return 0.0;
    }
    let usable = page_width - 2.0 * spec.padding;
    if usable <= 0.0 {
        return 0.0;
    }
    (usable % spec.spacing) / 2.0
}

/// Draws the pattern inside `clip`, with grid positions derived from
/// `anchor_rect.origin` so the phase is identical for every tile.
fn draw_pattern(
    pixmap: &mut Pixmap,
    world_to_pixels: Affine,
    background: &Background,
    clip: Rect,
    anchor_rect: Rect,
    centering: f64,
) {
    match background {
        Background::Blank => {}
        Background::Dots(spec) => {
            draw_dots(pixmap, world_to_pixels, spec, clip, anchor_rect, centering);
        }
        Background::Lines(spec) => {
            draw_lines(pixmap, world_to_pixels, spec, clip, anchor_rect);
        }
        Background::Grid(spec) => {
            draw_lines(pixmap, world_to_pixels, spec, clip, anchor_rect);
            draw_columns(pixmap, world_to_pixels, spec, clip, anchor_rect, centering);
        }
    }
}

fn draw_dots(
    pixmap: &mut Pixmap,
    world_to_pixels: Affine,
    spec: &PatternSpec,
    clip: Rect,
    anchor_rect: Rect,
    centering: f64,
) {
    if spec.spacing <= 0.0 || spec.weight <= 0.0 {
        return;
    }
    let mut paint = pattern_paint(spec);
    paint.anti_alias = true;
    let transform = affine_to_transform(world_to_pixels);
    let radius = spec.weight as f32;

    for x in grid_positions(anchor_rect.x0 + centering, spec.spacing, clip.x0, clip.x1) {
        for y in grid_positions(anchor_rect.y0, spec.spacing, clip.y0, clip.y1) {
            if !anchor_rect.contains(Point::new(x, y)) {
                continue;
            }
            if let Some(dot) = PathBuilder::from_circle(x as f32, y as f32, radius) {
                pixmap.fill_path(&dot, &paint, FillRule::Winding, transform, None);
            }
        }
    }
}

fn draw_lines(
    pixmap: &mut Pixmap,
    world_to_pixels: Affine,
    spec: &PatternSpec,
    clip: Rect,
    anchor_rect: Rect,
) {
    if spec.spacing <= 0.0 || spec.weight <= 0.0 {
        return;
    }
    for y in grid_positions(anchor_rect.y0, spec.spacing, clip.y0, clip.y1) {
        let line = Rect::new(
            clip.x0.max(anchor_rect.x0),
            y - spec.weight / 2.0,
            clip.x1.min(anchor_rect.x1),
            y + spec.weight / 2.0,
        );
        fill_world_rect_with(pixmap, world_to_pixels, line, spec);
    }
}

fn draw_columns(
    pixmap: &mut Pixmap,
    world_to_pixels: Affine,
    spec: &PatternSpec,
    clip: Rect,
    anchor_rect: Rect,
    centering: f64,
) {
    if spec.spacing <= 0.0 || spec.weight <= 0.0 {
        return;
    }
    for x in grid_positions(anchor_rect.x0 + centering, spec.spacing, clip.x0, clip.x1) {
        let column = Rect::new(
            x - spec.weight / 2.0,
            clip.y0.max(anchor_rect.y0),
            x + spec.weight / 2.0,
            clip.y1.min(anchor_rect.y1),
        );
        fill_world_rect_with(pixmap, world_to_pixels, column, spec);
    }
}

/// World-space grid positions `origin + k * spacing` within `[from, to]`,
/// padded by one step so shapes straddling the clip edge still paint their
/// visible part.
fn grid_positions(origin: f64, spacing: f64, from: f64, to: f64) -> impl Iterator<Item = f64> {
    let first = ((from - origin) / spacing).floor() as i64 - 1;
    let last = ((to - origin) / spacing).ceil() as i64 + 1;
    (first..=last).map(move |step| origin + step as f64 * spacing)
}

fn pattern_paint(spec: &PatternSpec) -> Paint<'static> {
    let mut paint = Paint::default();
    paint.set_color(to_skia_color(spec.color));
    paint
}

fn fill_world_rect(pixmap: &mut Pixmap, world_to_pixels: Affine, rect: Rect, color: model::Color) {
    let Some(skia_rect) = tiny_skia::Rect::from_ltrb(
        rect.x0 as f32,
        rect.y0 as f32,
        rect.x1 as f32,
        rect.y1 as f32,
    ) else {
        return;
    };
    let mut paint = Paint::default();
    paint.set_color(to_skia_color(color));
    pixmap.fill_rect(skia_rect, &paint, affine_to_transform(world_to_pixels), None);
}

fn fill_world_rect_with(
    pixmap: &mut Pixmap,
    world_to_pixels: Affine,
    rect: Rect,
    spec: &PatternSpec,
) {
    if rect.width() <= 0.0 || rect.height() <= 0.0 {
        return;
    }
    let Some(skia_rect) = tiny_skia::Rect::from_ltrb(
        rect.x0 as f32,
        rect.y0 as f32,
        rect.x1 as f32,
        rect.y1 as f32,
    ) else {
        return;
    };
    pixmap.fill_rect(
        skia_rect,
        &pattern_paint(spec),
        affine_to_transform(world_to_pixels),
        None,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dots(spacing: f64, padding: f64, centered: bool) -> Background {
        Background::Dots(PatternSpec {
            spacing,
            weight: 2.0,
            color: model::Color::BLACK,
            padding,
            centered,
        })
    }

    fn render_window(world_rect: Rect, size: u32, background: &Background) -> Pixmap {
        let mut pixmap = Pixmap::new(size, size).expect("pixmap");
        let world_to_pixels = Affine::translate((-world_rect.x0, -world_rect.y0));
        draw_background(
            &mut pixmap,
            world_to_pixels,
            background,
            &CanvasKind::Infinite,
            world_rect,
        );
        pixmap
    }

    #[test]
    fn infinite_dots_line_up_across_adjacent_windows() {
        let background = dots(16.0, 0.0, false);
        let left = render_window(Rect::new(0.0, 0.0, 64.0, 64.0), 64, &background);
        let right = render_window(Rect::new(64.0, 0.0, 128.0, 64.0), 64, &background);
        let full = render_window(Rect::new(0.0, 0.0, 128.0, 128.0), 128, &background);

        for y in 0..64 {
            for x in 0..64 {
                assert_eq!(
                    left.pixel(x, y).expect("in bounds"),
                    full.pixel(x, y).expect("in bounds"),
                    "left window mismatch at ({x}, {y})"
                );
                assert_eq!(
                    right.pixel(x, y).expect("in bounds"),
                    full.pixel(x + 64, y).expect("in bounds"),
                    "right window mismatch at ({x}, {y})"
                );
            }
        }
    }

    #[test]
    fn blank_background_fills_white_only() {
        let pixmap = render_window(Rect::new(0.0, 0.0, 32.0, 32.0), 32, &Background::Blank);
        assert!(
            pixmap
                .pixels()
                .iter()
                .all(|pixel| pixel.red() == 255 && pixel.green() == 255 && pixel.blue() == 255)
        );
    }

    #[test]
    fn fixed_pages_fill_the_gap_between_pages_differently() {
        let mut pixmap = Pixmap::new(64, 64).expect("pixmap");
        // Window straddling the bottom of page 0 and the gap below it.
        let world_rect = Rect::new(0.0, 90.0, 64.0, 154.0);
        draw_background(
            &mut pixmap,
            Affine::translate((0.0, -90.0)),
            &Background::Blank,
            &CanvasKind::FixedPages {
                page_width: 200.0,
                page_height: 100.0,
            },
            world_rect,
        );

        let on_page = pixmap.pixel(10, 5).expect("in bounds"); // world y = 95
        let in_gap = pixmap.pixel(10, 20).expect("in bounds"); // world y = 110
        assert_eq!(on_page.red(), 255);
        assert!(in_gap.red() < 255);
    }

    #[test]
    fn padding_insets_the_pattern_from_page_edges() {
        let mut pixmap = Pixmap::new(128, 128).expect("pixmap");
        let world_rect = Rect::new(0.0, 0.0, 128.0, 128.0);
        draw_background(
            &mut pixmap,
            Affine::IDENTITY,
            &dots(16.0, 24.0, false),
            &CanvasKind::FixedPages {
                page_width: 128.0,
                page_height: 128.0,
            },
            world_rect,
        );

        // Everything within the padding band stays plain white.
        for x in 0..128 {
            for y in 0..12 {
                let pixel = pixmap.pixel(x, y).expect("in bounds");
                assert_eq!((pixel.red(), pixel.green(), pixel.blue()), (255, 255, 255));
            }
        }
    }
}
