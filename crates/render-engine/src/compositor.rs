//! Frame compositor: draws a snapshot's elements onto the surface.
//!
//! Elements are drawn bottom to top. Video and images are fit (contain)
//! into the canvas before their own transform is applied; text keeps its
//! natural size. A failing element is logged and skipped so the rest of
//! the frame still renders.

use std::collections::HashMap;
use std::sync::Arc;

use clipforge_common::error::{ClipforgeError, ClipforgeResult};
use clipforge_timeline_model::{Element, ElementKind, TextAlign, TextContent};
use resvg::tiny_skia::{BlendMode, Color, FilterQuality, IntRect, Pixmap, PixmapPaint, Transform};
use serde::Serialize;

use crate::capture::{FrameSnapshot, ResolvedElement};
use crate::media::VisualSource;
use crate::surface::Surface;
use crate::text::TextRenderer;

/// An element that could not be drawn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedElement {
    pub id: String,
    pub reason: String,
}

/// Outcome of compositing one frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RenderReport {
    /// Visual elements drawn.
    pub drawn: usize,
    pub skipped: Vec<SkippedElement>,
}

impl RenderReport {
    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty()
    }
}

/// Drawing state saved around each element.
#[derive(Debug, Clone, Copy, PartialEq)]
struct DrawState {
    transform: Transform,
    opacity: f32,
}

impl Default for DrawState {
    fn default() -> Self {
        Self {
            transform: Transform::identity(),
            opacity: 1.0,
        }
    }
}

/// A visual source resolved and ready to draw.
struct Placed {
    pixmap: Arc<Pixmap>,
    fit_to_canvas: bool,
    align: Option<TextAlign>,
}

/// Composites frame snapshots onto a [`Surface`].
pub struct CanvasCompositor {
    visuals: Arc<dyn VisualSource>,
    text: Option<TextRenderer>,
    text_cache: HashMap<String, (TextContent, Arc<Pixmap>)>,
    background: Color,
    state: DrawState,
    saved: Vec<DrawState>,
}

impl CanvasCompositor {
    pub fn new(visuals: Arc<dyn VisualSource>) -> Self {
        Self {
            visuals,
            text: None,
            text_cache: HashMap::new(),
            background: Color::WHITE,
            state: DrawState::default(),
            saved: Vec::new(),
        }
    }

    pub fn with_background(mut self, background: Color) -> Self {
        self.background = background;
        self
    }

    /// Use `renderer` for text instead of loading system fonts on first use.
    pub fn with_text_renderer(mut self, renderer: TextRenderer) -> Self {
        self.text = Some(renderer);
        self
    }

    pub fn background(&self) -> Color {
        self.background
    }

    /// Clear `surface` and draw every visual element of `snapshot`.
    pub fn render(&mut self, snapshot: &FrameSnapshot, surface: &mut Surface) -> RenderReport {
        surface.clear(self.background);
        let mut report = RenderReport::default();

        for resolved in &snapshot.elements {
            self.save();
            let result = self.draw_element(resolved, surface);
            self.restore();

            match result {
                Ok(true) => report.drawn += 1,
                Ok(false) => {}
                Err(e) => {
                    let err = ClipforgeError::element(&resolved.element.id, e.to_string());
                    tracing::warn!(
                        element = %resolved.element.id,
                        kind = resolved.element.kind_name(),
                        time = snapshot.time,
                        error = %err,
                        "Skipping element"
                    );
                    report.skipped.push(SkippedElement {
                        id: resolved.element.id.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        report
    }

    /// Drop cached text rasters.
    pub fn release(&mut self) {
        self.text_cache.clear();
    }

    fn save(&mut self) {
        self.saved.push(self.state);
    }

    fn restore(&mut self) {
        self.state = self.saved.pop().unwrap_or_default();
    }

    /// Returns whether anything was drawn.
    fn draw_element(&mut self, resolved: &ResolvedElement, surface: &mut Surface) -> ClipforgeResult<bool> {
        let Some(placed) = self.resolve_source(resolved)? else {
            return Ok(false);
        };
        let el = &resolved.element;

        let source = crop(&placed.pixmap, el)?;
        let (sw, sh) = (source.width() as f32, source.height() as f32);
        let (cw, ch) = (surface.width() as f32, surface.height() as f32);

        let fit = if placed.fit_to_canvas {
            (cw / sw).min(ch / sh)
        } else {
            1.0
        };
        let scale = fit * el.transform.effective_scale() as f32;
        if scale <= 0.0 {
            return Ok(true);
        }

        let half_width = sw * scale / 2.0;
        let anchor_offset = match placed.align {
            Some(TextAlign::Left) => half_width,
            Some(TextAlign::Right) => -half_width,
            Some(TextAlign::Center) | None => 0.0,
        };
        let rotation = if el.transform.rotation.is_finite() {
            el.transform.rotation as f32
        } else {
            0.0
        };

        self.state.transform = Transform::from_translate(-sw / 2.0, -sh / 2.0)
            .post_scale(scale, scale)
            .post_rotate(rotation)
            .post_translate(
                cw / 2.0 + el.transform.x as f32 + anchor_offset,
                ch / 2.0 + el.transform.y as f32,
            );
        self.state.opacity = if el.opacity.is_finite() {
            el.opacity.clamp(0.0, 1.0) as f32
        } else {
            1.0
        };
        if self.state.opacity <= 0.0 {
            return Ok(true);
        }

        let paint = PixmapPaint {
            opacity: self.state.opacity,
            blend_mode: BlendMode::SourceOver,
            quality: FilterQuality::Bilinear,
        };
        surface
            .pixmap_mut()
            .draw_pixmap(0, 0, Pixmap::as_ref(&source), &paint, self.state.transform, None);
        Ok(true)
    }

    fn resolve_source(&mut self, resolved: &ResolvedElement) -> ClipforgeResult<Option<Placed>> {
        let el = &resolved.element;
        match &el.kind {
            ElementKind::Video { media_id, .. } => Ok(Some(Placed {
                pixmap: self.visuals.video_frame(media_id, resolved.source_time)?,
                fit_to_canvas: true,
                align: None,
            })),
            ElementKind::Image { media_id } => Ok(Some(Placed {
                pixmap: self.visuals.image(media_id)?,
                fit_to_canvas: true,
                align: None,
            })),
            ElementKind::Text(text) => Ok(Some(Placed {
                pixmap: self.text_pixmap(&el.id, text)?,
                fit_to_canvas: false,
                align: Some(text.text_align),
            })),
            ElementKind::Audio { .. } => Ok(None),
        }
    }

    fn text_pixmap(&mut self, element_id: &str, text: &TextContent) -> ClipforgeResult<Arc<Pixmap>> {
        if let Some((cached, pixmap)) = self.text_cache.get(element_id) {
            if cached == text {
                return Ok(Arc::clone(pixmap));
            }
        }
        let renderer = self.text.get_or_insert_with(TextRenderer::with_system_fonts);
        let pixmap = Arc::new(renderer.render(text)?);
        self.text_cache
            .insert(element_id.to_string(), (text.clone(), Arc::clone(&pixmap)));
        Ok(pixmap)
    }
}

/// The element's crop of `source`, or `source` itself when uncropped.
fn crop(source: &Arc<Pixmap>, el: &Element) -> ClipforgeResult<Arc<Pixmap>> {
    if el.crop.is_full() {
        return Ok(Arc::clone(source));
    }
    let rect = el
        .crop
        .to_pixels(source.width(), source.height())
        .ok_or_else(|| ClipforgeError::render("Crop selects no pixels"))?;
    let int_rect = IntRect::from_xywh(rect.x as i32, rect.y as i32, rect.width, rect.height)
        .ok_or_else(|| ClipforgeError::render("Invalid crop rectangle"))?;
    source
        .clone_rect(int_rect)
        .map(Arc::new)
        .ok_or_else(|| ClipforgeError::render("Crop outside source bounds"))
}
