//! Terminal QR rendering for display tokens.
use anyhow::{Context, Result};
use qrcode::{Color, EcLevel, QrCode};

const UPPER: char = '▀';
const LOWER: char = '▄';
const FULL: char = '█';

/// Render `data` with error correction level M and `margin` light modules
/// around it. Two module rows share one text line via half-block glyphs,
/// drawn dark-on-light so the code scans from a dark terminal.
pub fn render(data: &str, margin: u32) -> Result<String> {
    let code = QrCode::with_error_correction_level(data.as_bytes(), EcLevel::M)
        .context("value does not fit in a QR code")?;
    let width = code.width();
    let colors = code.to_colors();
    let margin = margin as usize;
    let side = width + 2 * margin;

    // light modules are drawn, dark ones left blank
    let is_light = |x: usize, y: usize| -> bool {
        if x < margin || y < margin || x >= margin + width || y >= margin + width {
            return true;
        }
        colors[(y - margin) * width + (x - margin)] == Color::Light
    };

    let mut out = String::with_capacity(side * (side / 2 + 1) * 3);
    let mut y = 0;
    while y < side {
        for x in 0..side {
            let top = is_light(x, y);
            let bottom = y + 1 < side && is_light(x, y + 1);
            out.push(match (top, bottom) {
                (true, true) => FULL,
                (true, false) => UPPER,
                (false, true) => LOWER,
                (false, false) => ' ',
            });
        }
        out.push('\n');
        y += 2;
    }
    Ok(out)
}

/// Fixed-width countdown bar, e.g. `[#######   ]`.
pub fn progress_bar(percent: f64, cells: usize) -> String {
    let filled = ((percent.clamp(0.0, 100.0) / 100.0) * cells as f64).round() as usize;
    format!("[{}{}]", "#".repeat(filled), " ".repeat(cells - filled))
}
