//! Text overlay rasterization.
//!
//! Text is laid out as SVG `<text>` and rasterized with resvg, so font
//! matching and shaping come from usvg's fontdb.

use std::fmt::Write as _;
use std::sync::Arc;

use clipforge_common::error::{ClipforgeError, ClipforgeResult};
use clipforge_timeline_model::{FontStyle, FontWeight, TextAlign, TextContent, TextDecoration};
use resvg::tiny_skia::{Color, Pixmap, Transform};

use crate::surface::parse_color;

/// Space kept around the glyphs, and inside the background box.
const PADDING: f32 = 4.0;

/// Line height as a multiple of the font size.
const LINE_HEIGHT: f64 = 1.2;

/// Rasterizes [`TextContent`] into standalone pixmaps.
#[derive(Clone)]
pub struct TextRenderer {
    fontdb: Arc<usvg::fontdb::Database>,
}

impl std::fmt::Debug for TextRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextRenderer")
            .field("faces", &self.fontdb.len())
            .finish()
    }
}

impl Default for TextRenderer {
    fn default() -> Self {
        Self::with_system_fonts()
    }
}

impl TextRenderer {
    /// Load every font installed on the system.
    pub fn with_system_fonts() -> Self {
        let mut db = usvg::fontdb::Database::new();
        db.load_system_fonts();
        tracing::debug!(faces = db.len(), "Loaded system fonts");
        Self { fontdb: Arc::new(db) }
    }

    pub fn with_fontdb(fontdb: Arc<usvg::fontdb::Database>) -> Self {
        Self { fontdb }
    }

    pub fn face_count(&self) -> usize {
        self.fontdb.len()
    }

    /// Rasterize `text` at its natural size.
    ///
    /// The pixmap is the tight glyph box plus padding, filled with the
    /// background colour first.
    pub fn render(&self, text: &TextContent) -> ClipforgeResult<Pixmap> {
        if text.content.trim().is_empty() {
            return Err(ClipforgeError::render("Text is empty"));
        }
        if !text.font_size.is_finite() || text.font_size <= 0.0 {
            return Err(ClipforgeError::render(format!(
                "Invalid font size {}",
                text.font_size
            )));
        }

        let svg = text_svg(text);
        let opts = usvg::Options {
            fontdb: Arc::clone(&self.fontdb),
            ..Default::default()
        };
        let tree = usvg::Tree::from_str(&svg, &opts)
            .map_err(|e| ClipforgeError::render(format!("Failed to lay out text: {e}")))?;

        let bbox = tree.root().abs_bounding_box();
        if count_text_nodes(tree.root()) == 0 || bbox.width() < 1.0 || bbox.height() < 1.0 {
            return Err(ClipforgeError::render(format!(
                "No glyphs rendered for font '{}'",
                text.font_family
            )));
        }

        let width = (bbox.width() + 2.0 * PADDING).ceil() as u32;
        let height = (bbox.height() + 2.0 * PADDING).ceil() as u32;
        let mut pixmap = Pixmap::new(width, height).ok_or_else(|| {
            ClipforgeError::render(format!("Cannot allocate {width}x{height} text pixmap"))
        })?;

        if let Some(background) = parse_color(&text.background_color) {
            if background.alpha() > 0.0 {
                pixmap.fill(background);
            }
        }

        let xform = Transform::from_translate(PADDING - bbox.x(), PADDING - bbox.y());
        resvg::render(&tree, xform, &mut pixmap.as_mut());
        Ok(pixmap)
    }
}

/// SVG markup for `text`. Lines are anchored at `x = 0` according to the
/// alignment.
pub fn text_svg(text: &TextContent) -> String {
    let fill = parse_color(&text.color).unwrap_or(Color::BLACK);
    let anchor = match text.text_align {
        TextAlign::Left => "start",
        TextAlign::Center => "middle",
        TextAlign::Right => "end",
    };
    let weight = match text.font_weight {
        FontWeight::Normal => "normal",
        FontWeight::Bold => "bold",
    };
    let style = match text.font_style {
        FontStyle::Normal => "normal",
        FontStyle::Italic => "italic",
    };

    let mut svg = String::from(r#"<svg xmlns="http://www.w3.org/2000/svg" width="1" height="1">"#);
    let _ = write!(
        svg,
        r#"<text font-family="{}" font-size="{}" font-weight="{weight}" font-style="{style}" text-anchor="{anchor}" fill="{}" fill-opacity="{}""#,
        escape_xml(&text.font_family),
        text.font_size,
        rgb(fill),
        fill.alpha(),
    );
    match text.text_decoration {
        TextDecoration::None => {}
        TextDecoration::Underline => svg.push_str(r#" text-decoration="underline""#),
        TextDecoration::LineThrough => svg.push_str(r#" text-decoration="line-through""#),
    }
    svg.push('>');

    for (i, line) in text.content.lines().enumerate() {
        let y = text.font_size * (1.0 + LINE_HEIGHT * i as f64);
        let _ = write!(
            svg,
            r#"<tspan x="0" y="{y}" xml:space="preserve">{}</tspan>"#,
            escape_xml(line)
        );
    }
    svg.push_str("</text></svg>");
    svg
}

fn count_text_nodes(group: &usvg::Group) -> usize {
    let mut n = 0;
    for node in group.children() {
        match node {
            usvg::Node::Group(g) => n += count_text_nodes(g.as_ref()),
            usvg::Node::Text(_) => n += 1,
            usvg::Node::Path(_) | usvg::Node::Image(_) => {}
        }
    }
    n
}

fn rgb(color: Color) -> String {
    let c = color.to_color_u8();
    format!("rgb({},{},{})", c.red(), c.green(), c.blue())
}

fn escape_xml(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content(s: &str) -> TextContent {
        TextContent {
            content: s.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_svg_escapes_content_and_family() {
        let mut text = content("a < b & \"c\"");
        text.font_family = "Q&A Sans".to_string();
        let svg = text_svg(&text);
        assert!(svg.contains("a &lt; b &amp; &quot;c&quot;"));
        assert!(svg.contains(r#"font-family="Q&amp;A Sans""#));
        assert!(usvg::Tree::from_str(&svg, &usvg::Options::default()).is_ok());
    }

    #[test]
    fn test_svg_style_attributes() {
        let mut text = content("Title");
        text.text_align = TextAlign::Right;
        text.font_weight = FontWeight::Bold;
        text.font_style = FontStyle::Italic;
        text.text_decoration = TextDecoration::Underline;
        text.color = "#ff000080".to_string();
        let svg = text_svg(&text);
        assert!(svg.contains(r#"text-anchor="end""#));
        assert!(svg.contains(r#"font-weight="bold""#));
        assert!(svg.contains(r#"font-style="italic""#));
        assert!(svg.contains(r#"text-decoration="underline""#));
        assert!(svg.contains("rgb(255,0,0)"));
    }

    #[test]
    fn test_svg_one_tspan_per_line() {
        let svg = text_svg(&content("one\ntwo\nthree"));
        assert_eq!(svg.matches("<tspan").count(), 3);
    }

    #[test]
    fn test_bad_color_falls_back_to_black() {
        let mut text = content("x");
        text.color = "not-a-color".to_string();
        assert!(text_svg(&text).contains("rgb(0,0,0)"));
    }

    #[test]
    fn test_empty_text_is_error() {
        let renderer = TextRenderer::with_fontdb(Arc::new(usvg::fontdb::Database::new()));
        assert!(renderer.render(&content("   ")).is_err());
    }

    #[test]
    fn test_invalid_font_size_is_error() {
        let renderer = TextRenderer::with_fontdb(Arc::new(usvg::fontdb::Database::new()));
        let mut text = content("x");
        text.font_size = 0.0;
        assert!(renderer.render(&text).is_err());
    }

    #[test]
    fn test_no_fonts_is_error_not_panic() {
        let renderer = TextRenderer::with_fontdb(Arc::new(usvg::fontdb::Database::new()));
        assert!(renderer.render(&content("Hello")).is_err());
    }

    #[test]
    fn test_render_with_system_fonts() {
        let renderer = TextRenderer::with_system_fonts();
        if renderer.face_count() == 0 {
            return;
        }
        let mut text = content("Hello");
        text.font_family = "sans-serif".to_string();
        text.font_size = 32.0;
        text.background_color = "#0000ff".to_string();
        let pixmap = renderer.render(&text).unwrap();
        assert!(pixmap.width() > 32);
        assert!(pixmap.height() > 16);
        let corner = pixmap.pixel(0, 0).unwrap();
        assert_eq!((corner.blue(), corner.alpha()), (255, 255));
    }
}
