//! The drawing surface and pixel helpers.

use clipforge_common::error::{ClipforgeError, ClipforgeResult};
use resvg::tiny_skia::{Color, IntSize, Pixmap};

/// An RGBA canvas the compositor draws into.
///
/// Pixels are stored premultiplied; [`Surface::write_rgba`] produces the
/// straight-alpha bytes encoders expect.
pub struct Surface {
    pixmap: Pixmap,
}

impl Surface {
    pub fn new(width: u32, height: u32) -> ClipforgeResult<Self> {
        let pixmap = Pixmap::new(width, height).ok_or_else(|| {
            ClipforgeError::render(format!("Cannot allocate a {width}x{height} surface"))
        })?;
        Ok(Self { pixmap })
    }

    pub fn width(&self) -> u32 {
        self.pixmap.width()
    }

    pub fn height(&self) -> u32 {
        self.pixmap.height()
    }

    pub fn clear(&mut self, color: Color) {
        self.pixmap.fill(color);
    }

    pub fn pixmap(&self) -> &Pixmap {
        &self.pixmap
    }

    pub fn pixmap_mut(&mut self) -> &mut Pixmap {
        &mut self.pixmap
    }

    /// Premultiplied pixel bytes.
    pub fn data(&self) -> &[u8] {
        self.pixmap.data()
    }

    /// Straight-alpha RGBA of pixel `(x, y)`.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        let px = self.pixmap.pixel(x, y)?.demultiply();
        Some([px.red(), px.green(), px.blue(), px.alpha()])
    }

    /// Copy the surface into `out` as straight-alpha RGBA.
    pub fn write_rgba(&self, out: &mut Vec<u8>) {
        out.clear();
        out.extend_from_slice(self.pixmap.data());
        for px in out.chunks_exact_mut(4) {
            let a = px[3] as u16;
            if a == 0 || a == 255 {
                continue;
            }
            px[0] = ((px[0] as u16 * 255 + a / 2) / a).min(255) as u8;
            px[1] = ((px[1] as u16 * 255 + a / 2) / a).min(255) as u8;
            px[2] = ((px[2] as u16 * 255 + a / 2) / a).min(255) as u8;
        }
    }
}

/// Parse `#rgb`, `#rrggbb`, `#rrggbbaa` or `transparent`.
pub fn parse_color(value: &str) -> Option<Color> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("transparent") {
        return Some(Color::TRANSPARENT);
    }
    let hex = value.strip_prefix('#')?;
    let byte = |i: usize| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok();
    match hex.len() {
        3 => {
            let nibble = |i: usize| {
                let v = u8::from_str_radix(hex.get(i..i + 1)?, 16).ok()?;
                Some(v * 17)
            };
            Some(Color::from_rgba8(nibble(0)?, nibble(1)?, nibble(2)?, 255))
        }
        6 => Some(Color::from_rgba8(byte(0)?, byte(2)?, byte(4)?, 255)),
        8 => Some(Color::from_rgba8(byte(0)?, byte(2)?, byte(4)?, byte(6)?)),
        _ => None,
    }
}

/// Wrap straight-alpha RGBA bytes in a pixmap, premultiplying in place.
pub fn pixmap_from_rgba(width: u32, height: u32, mut rgba: Vec<u8>) -> ClipforgeResult<Pixmap> {
    if rgba.len() != width as usize * height as usize * 4 {
        return Err(ClipforgeError::render(format!(
            "Pixel buffer is {} bytes, expected {} for {width}x{height}",
            rgba.len(),
            width as usize * height as usize * 4
        )));
    }
    premultiply_rgba8_in_place(&mut rgba);
    let size = IntSize::from_wh(width, height)
        .ok_or_else(|| ClipforgeError::render(format!("Invalid image size {width}x{height}")))?;
    Pixmap::from_vec(rgba, size).ok_or_else(|| ClipforgeError::render("Failed to wrap pixel buffer"))
}

fn premultiply_rgba8_in_place(rgba: &mut [u8]) {
    for px in rgba.chunks_exact_mut(4) {
        let a = px[3] as u16;
        if a == 0 {
            px[0] = 0;
            px[1] = 0;
            px[2] = 0;
            continue;
        }
        px[0] = ((px[0] as u16 * a + 127) / 255) as u8;
        px[1] = ((px[1] as u16 * a + 127) / 255) as u8;
        px[2] = ((px[2] as u16 * a + 127) / 255) as u8;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_color_forms() {
        let red = parse_color("#ff0000").unwrap().to_color_u8();
        assert_eq!((red.red(), red.green(), red.blue(), red.alpha()), (255, 0, 0, 255));
        let half = parse_color("#00000080").unwrap().to_color_u8();
        assert_eq!(half.alpha(), 128);
        let short = parse_color("#fff").unwrap().to_color_u8();
        assert_eq!(short.red(), 255);
        assert_eq!(parse_color("transparent").unwrap().alpha(), 0.0);
        assert!(parse_color("red").is_none());
        assert!(parse_color("#12345").is_none());
        assert!(parse_color("#gg0000").is_none());
    }

    #[test]
    fn test_clear_and_read_back() {
        let mut surface = Surface::new(4, 2).unwrap();
        surface.clear(Color::from_rgba8(10, 20, 30, 255));
        let mut out = Vec::new();
        surface.write_rgba(&mut out);
        assert_eq!(out.len(), 4 * 2 * 4);
        assert_eq!(&out[..4], &[10, 20, 30, 255]);
        assert_eq!(surface.pixel(3, 1), Some([10, 20, 30, 255]));
    }

    #[test]
    fn test_write_rgba_demultiplies() {
        let mut surface = Surface::new(1, 1).unwrap();
        surface.clear(Color::from_rgba8(200, 100, 0, 128));
        let mut out = Vec::new();
        surface.write_rgba(&mut out);
        assert_eq!(out[3], 128);
        assert!((out[0] as i32 - 200).abs() <= 2);
        assert!((out[1] as i32 - 100).abs() <= 2);
    }

    #[test]
    fn test_zero_size_surface_is_error() {
        assert!(Surface::new(0, 10).is_err());
    }

    #[test]
    fn test_pixmap_from_rgba_checks_length() {
        assert!(pixmap_from_rgba(2, 2, vec![0; 15]).is_err());
        let pixmap = pixmap_from_rgba(1, 1, vec![100, 50, 200, 128]).unwrap();
        assert_eq!(pixmap.data(), &[((100u16 * 128 + 127) / 255) as u8, ((50u16 * 128 + 127) / 255) as u8, ((200u16 * 128 + 127) / 255) as u8, 128]);
    }
}
