use ab_glyph::{Font, FontVec, ScaleFont};
use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use shared::Detection;

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const LABEL_TEXT_COLOR: Rgb<u8> = Rgb([0, 0, 0]);
const LABEL_BACKGROUND_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const LABEL_PADDING: i32 = 2;

/// Styling for rendered detection overlays. Without a font, boxes are drawn
/// but labels are skipped.
pub struct OverlayStyle {
    pub font: Option<FontVec>,
    pub font_scale: f32,
    pub box_thickness: i32,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            font: None,
            font_scale: 16.0,
            box_thickness: 2,
        }
    }
}

impl OverlayStyle {
    /// Tries a handful of common system font locations; falls back to the
    /// label-less default when none loads.
    pub fn with_system_font() -> Self {
        let font_paths = [
            "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
            "/usr/share/fonts/TTF/DejaVuSans.ttf",
            "/System/Library/Fonts/Helvetica.ttc",
            "C:\\Windows\\Fonts\\arial.ttf",
        ];

        for path in &font_paths {
            if let Ok(font_data) = std::fs::read(path) {
                if let Ok(font) = FontVec::try_from_vec(font_data) {
                    log::debug!("Loaded overlay font from {}", path);
                    return Self {
                        font: Some(font),
                        ..Self::default()
                    };
                }
            }
        }

        log::debug!("No system font found; overlays will omit labels");
        Self::default()
    }
}

/// Draws bounding boxes and class labels onto a copy of the source image.
/// Detections below `confidence_threshold` and boxes that degenerate after
/// clamping to the image bounds are skipped.
pub fn render(
    source: &DynamicImage,
    detections: &[Detection],
    confidence_threshold: f32,
    style: &OverlayStyle,
) -> RgbImage {
    let mut canvas = source.to_rgb8();
    let bounds = (canvas.width() as i32, canvas.height() as i32);

    for detection in detections {
        if detection.confidence < confidence_threshold {
            continue;
        }
        let Some(rect) = detection_rect(detection, bounds) else {
            continue;
        };
        draw_box(&mut canvas, &rect, style, bounds);
        draw_label(&mut canvas, detection, &rect, style, bounds);
    }

    canvas
}

/// Clamps a detection box into the image and converts it to a draw rect.
/// Returns `None` when nothing of the box remains inside the image.
fn detection_rect(detection: &Detection, bounds: (i32, i32)) -> Option<Rect> {
    let (img_w, img_h) = bounds;
    let bbox = &detection.bbox;
    let left = (bbox.x1 as i32).clamp(0, img_w - 1);
    let top = (bbox.y1 as i32).clamp(0, img_h - 1);
    let right = (bbox.x2 as i32).clamp(0, img_w - 1);
    let bottom = (bbox.y2 as i32).clamp(0, img_h - 1);

    let width = (right - left) as u32;
    let height = (bottom - top) as u32;
    (width > 0 && height > 0).then(|| Rect::at(left, top).of_size(width, height))
}

fn draw_box(canvas: &mut RgbImage, rect: &Rect, style: &OverlayStyle, bounds: (i32, i32)) {
    let (img_w, img_h) = bounds;
    for thickness in 0..style.box_thickness {
        let expanded = Rect::at(rect.left() - thickness, rect.top() - thickness).of_size(
            rect.width() + (2 * thickness) as u32,
            rect.height() + (2 * thickness) as u32,
        );
        if is_rect_in_bounds(&expanded, img_w, img_h) {
            draw_hollow_rect_mut(canvas, expanded, BOX_COLOR);
        }
    }
}

fn draw_label(
    canvas: &mut RgbImage,
    detection: &Detection,
    rect: &Rect,
    style: &OverlayStyle,
    bounds: (i32, i32),
) {
    let Some(ref font) = style.font else {
        return;
    };

    let label = format!("{} {:.2}", detection.class, detection.confidence);
    let text_width = measure_text_width(&label, font, style.font_scale);
    let tag_width = (text_width.ceil() as i32 + 2 * LABEL_PADDING).max(1) as u32;
    let tag_height = (style.font_scale.ceil() as i32 + 2 * LABEL_PADDING) as u32;

    // Place the tag above the box; inside the box when there is no room.
    let mut tag_top = rect.top() - tag_height as i32;
    if tag_top < 0 {
        tag_top = rect.top();
    }

    let tag = Rect::at(rect.left(), tag_top).of_size(tag_width, tag_height);
    let (img_w, img_h) = bounds;
    if !is_rect_in_bounds(&tag, img_w, img_h) {
        return;
    }

    draw_filled_rect_mut(canvas, tag, LABEL_BACKGROUND_COLOR);
    draw_text_mut(
        canvas,
        LABEL_TEXT_COLOR,
        rect.left() + LABEL_PADDING,
        tag_top + LABEL_PADDING,
        style.font_scale,
        font,
        &label,
    );
}

fn is_rect_in_bounds(rect: &Rect, img_width: i32, img_height: i32) -> bool {
    rect.left() >= 0
        && rect.top() >= 0
        && rect.left() + rect.width() as i32 <= img_width
        && rect.top() + rect.height() as i32 <= img_height
}

fn measure_text_width(text: &str, font: &FontVec, scale: f32) -> f32 {
    let scaled_font = font.as_scaled(scale);
    text.chars()
        .map(|ch| scaled_font.h_advance(scaled_font.scaled_glyph(ch).id))
        .sum()
}
