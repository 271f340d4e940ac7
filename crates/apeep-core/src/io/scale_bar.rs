//! Scale bar drawn under exported particle images, EcoTaxa style.

use ndarray::{concatenate, s, Array2, Axis};

/// Height of the scale area under the image.
const SCALE_HEIGHT: usize = 29;
/// Thickness of the bar itself.
const BAR_THICKNESS: usize = 2;
/// White border around the final image.
const BORDER: usize = 2;
/// Gap between the bottom of the label and the bottom of the scale area.
const LABEL_BOTTOM: usize = 4;

/// Available bar lengths, in mm.
const BREAKS_MM: [f64; 2] = [1.0, 10.0];

// Seven-row glyphs, '#' is ink.
const GLYPH_1: [&str; 7] = ["  # ", " ## ", "  # ", "  # ", "  # ", "  # ", "  # "];
const GLYPH_0: [&str; 7] = [" ##  ", "#  # ", "#  # ", "#  # ", "#  # ", "#  # ", " ##  "];
const GLYPH_M: [&str; 7] = [
    "      ", "      ", "      ", " ## # ", " # # #", " # # #", " # # #",
];

fn glyph(rows: &[&str; 7]) -> Array2<f32> {
    let w = rows.iter().map(|r| r.len()).max().unwrap_or(0);
    let mut g = Array2::from_elem((rows.len(), w), 1.0f32);
    for (r, line) in rows.iter().enumerate() {
        for (c, ch) in line.chars().enumerate() {
            if ch == '#' {
                g[[r, c]] = 0.0;
            }
        }
    }
    g
}

/// Rendered label ("1mm" or "10mm").
fn label(ten: bool) -> Array2<f32> {
    let mut parts = vec![glyph(&GLYPH_1)];
    if ten {
        parts.push(glyph(&GLYPH_0));
    }
    parts.push(glyph(&GLYPH_M));
    parts.push(glyph(&GLYPH_M));
    let views: Vec<_> = parts.iter().map(|p| p.view()).collect();
    concatenate(Axis(1), &views).unwrap_or_else(|_| Array2::from_elem((7, 1), 1.0))
}

/// Add a scale bar under `image`, for pixels of `px2mm` millimetres.
///
/// The 10 mm bar is used once the image is at least that wide, the 1 mm
/// bar otherwise. The image is widened with white when the bar or its
/// label is wider, then everything gets a white border.
pub fn add_scale_bar(image: &Array2<f32>, px2mm: f64) -> Array2<f32> {
    let (h, img_w) = image.dim();
    let breaks_px: Vec<usize> = BREAKS_MM
        .iter()
        .map(|mm| (mm / px2mm).round().max(1.0) as usize)
        .collect();
    let ten = img_w >= breaks_px[1];
    let bar_w = breaks_px[usize::from(ten)];
    let text = label(ten);
    let (text_h, text_w) = text.dim();

    let w = img_w.max(bar_w).max(text_w);
    let total_h = h + SCALE_HEIGHT + 2 * BORDER;
    let mut out = Array2::from_elem((total_h, w + 2 * BORDER), 1.0f32);

    out.slice_mut(s![BORDER..BORDER + h, BORDER..BORDER + img_w])
        .assign(image);

    let scale_top = BORDER + h;
    let bar_top = scale_top + SCALE_HEIGHT - BAR_THICKNESS;
    out.slice_mut(s![bar_top..bar_top + BAR_THICKNESS, BORDER..BORDER + bar_w])
        .fill(0.0);

    let text_top = scale_top + SCALE_HEIGHT - LABEL_BOTTOM - text_h;
    out.slice_mut(s![text_top..text_top + text_h, BORDER..BORDER + text_w])
        .assign(&text);

    out
}
