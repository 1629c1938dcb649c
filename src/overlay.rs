use egui::Color32;
use egui::CursorIcon;
use egui::FontFamily;
use egui::FontId;
use egui::Pos2;
use egui::Rect;
use egui::Sense;
use egui::Stroke;
use egui::StrokeKind;
use egui::Vec2;
use egui::pos2;
use egui::vec2;
use tracing::debug;
use uuid::Uuid;

use crate::annotation::Annotation;
use crate::annotation::VideoBounds;
use crate::error::BoxfishError;
use crate::settings::DEFAULT_CAPTION_BACKGROUND_COLOUR;
use crate::settings::DEFAULT_CAPTION_TEXT_COLOUR;
use crate::settings::DEFAULT_DISPLAY_BORDER_COLOUR;
use crate::settings::DEFAULT_SELECTION_BORDER_COLOUR;
use crate::settings::Settings;
use crate::util::parse_hex_colour;

/// Inner padding of the caption box, in view pixels.
const CAPTION_INNER_PAD: f32 = 3.0;
/// Gap between the caption box and the annotation rectangle, in view pixels.
const CAPTION_GAP: f32 = 2.0;
/// Half-size of the corner resize handles drawn on a selected visual.
const HANDLE_RADIUS: f32 = 4.0;

/// Affine mapping `M : video -> view`, a uniform scale plus a translation.
///
/// Derived from the view-space rectangle where the decoded image is rendered
/// (excluding letterbox bars) and the intrinsic video size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageTransform {
    pub scale: f32,
    pub origin: Pos2,
}

impl ImageTransform {
    pub fn identity() -> Self {
        Self { scale: 1.0, origin: Pos2::ZERO }
    }

    pub fn new(image_bounds: Rect, video_size: (u32, u32)) -> Self {
        let scale = if video_size.0 > 0 { image_bounds.width() / video_size.0 as f32 } else { 1.0 };
        Self {
            scale,
            origin: image_bounds.min,
        }
    }

    /// Map video-space bounds to a view-space rectangle.
    pub fn to_view(&self, bounds: VideoBounds) -> Rect {
        Rect::from_min_size(
            self.origin + vec2(bounds.x as f32, bounds.y as f32) * self.scale,
            vec2(bounds.width as f32, bounds.height as f32) * self.scale,
        )
    }

    /// Map a view-space position to (fractional) video-space coordinates.
    pub fn to_video(&self, pos: Pos2) -> Pos2 {
        ((pos - self.origin) / self.scale).to_pos2()
    }
}

/// Compute the letterboxed view-space rectangle for a video image of `video_size`
/// rendered inside `viewport` with its aspect ratio preserved.
pub fn fit_image_rect(viewport: Rect, video_size: (u32, u32)) -> Rect {
    let (vw, vh) = (video_size.0 as f32, video_size.1 as f32);
    if vw <= 0.0 || vh <= 0.0 || viewport.width() <= 0.0 || viewport.height() <= 0.0 {
        return viewport;
    }

    let scale = (viewport.width() / vw).min(viewport.height() / vh);
    let size = vec2(vw * scale, vh * scale);
    Rect::from_center_size(viewport.center(), size)
}

/// Choose the caption's layout position in the annotation visual's local frame.
///
/// `layout_pos` is the visual's position relative to the video image origin (the
/// mapped rectangle origin offset by `-border` on each axis), `rect_size` the
/// view-space rectangle size, and `caption_natural` the measured caption size
/// before horizontal padding is added. Left-aligned above the rectangle when it
/// fits, right-aligned and/or below otherwise. A caption wider than the image
/// fits neither way and is left to the clipping parent.
pub fn caption_offset(layout_pos: Vec2, rect_size: Vec2, image_width: f32, border: f32, caption_natural: Vec2) -> Vec2 {
    let caption_width = caption_natural.x + 2.0 * CAPTION_INNER_PAD;
    let caption_height = caption_natural.y;

    // Optimal position is to left-align
    let mut x = -border;
    if layout_pos.x + caption_width > image_width {
        // Optimal position for the caption does not fit, so right-align instead
        x = rect_size.x - caption_width + 2.0 * border;
    }

    // Optimal position is to place above the annotation
    let mut y = -border - caption_height - CAPTION_INNER_PAD - CAPTION_GAP;
    if layout_pos.y + y < 0.0 {
        // Optimal position for the caption does not fit, so place below the annotation instead
        y = rect_size.y + 2.0 * border + CAPTION_GAP - 1.0;
    }

    vec2(x, y)
}

/// A visual for one annotation: the bounding rectangle plus an optional caption box.
#[derive(Debug, Clone)]
pub struct AnnotationVisual {
    annotation: Annotation,
    selected: bool,
}

impl AnnotationVisual {
    pub fn annotation(&self) -> &Annotation {
        &self.annotation
    }

    pub fn is_selected(&self) -> bool {
        self.selected
    }

    /// The caption box is hidden when the annotation has no caption.
    pub fn caption_visible(&self) -> bool {
        self.annotation.caption().is_some()
    }
}

/// Pointer drag state machine for annotation gestures.
#[derive(Debug, Clone, Copy)]
enum DragState {
    Idle,
    /// Rubber-banding a new annotation from a view-space start position.
    Creating { start: Pos2 },
    /// Moving a visual; the grab offset is in video space from the bounds origin.
    Moving { id: Uuid, grab_offset: Vec2 },
    /// Resizing a visual around a fixed opposite corner, in video space.
    Resizing { id: Uuid, anchor: Pos2 },
}

/// A model mutation performed by an overlay gesture, reported to the owning
/// player so its annotation set stays in sync.
#[derive(Debug, Clone, PartialEq)]
pub enum OverlayEvent {
    Created(Annotation),
    BoundsChanged { id: Uuid, bounds: VideoBounds },
    Deleted(Vec<Uuid>),
}

/// The overlay layer for one player: renders annotation visuals over the video
/// image and handles the gestures that create, select, move, resize, and delete
/// annotations.
///
/// All state is UI-thread only. The current image bounds are pushed in by the
/// host each frame; the overlay never inspects its surroundings.
pub struct AnnotationOverlay {
    visuals: Vec<AnnotationVisual>,
    image_bounds: Rect,
    video_size: Option<(u32, u32)>,
    transform: ImageTransform,
    drag: DragState,
}

impl AnnotationOverlay {
    pub fn new() -> Self {
        Self {
            visuals: Vec::new(),
            image_bounds: Rect::ZERO,
            video_size: None,
            transform: ImageTransform::identity(),
            drag: DragState::Idle,
        }
    }

    /// Add a visual for `annotation`. Idempotent by identifier: re-adding leaves
    /// the existing visual unchanged.
    pub fn add_annotation(&mut self, annotation: Annotation) -> &AnnotationVisual {
        if let Some(index) = self.index_of(annotation.id()) {
            return &self.visuals[index];
        }
        debug!("add_annotation(id={})", annotation.id());
        self.visuals.push(AnnotationVisual { annotation, selected: false });
        self.visuals.last().expect("just pushed")
    }

    /// Remove and destroy the visual for `id`; no effect if absent.
    pub fn remove_annotation(&mut self, id: Uuid) -> bool {
        match self.index_of(id) {
            Some(index) => {
                self.visuals.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.visuals.clear();
        self.drag = DragState::Idle;
    }

    /// Mark the visual for `id` as selected or unselected. Idempotent.
    pub fn select(&mut self, id: Uuid, on: bool) {
        if let Some(index) = self.index_of(id) {
            self.visuals[index].selected = on;
        }
    }

    fn select_exclusively(&mut self, id: Uuid) {
        for visual in &mut self.visuals {
            visual.selected = visual.annotation.id() == id;
        }
    }

    fn clear_selection(&mut self) {
        for visual in &mut self.visuals {
            visual.selected = false;
        }
    }

    pub fn selected_ids(&self) -> Vec<Uuid> {
        self.visuals.iter().filter(|visual| visual.selected).map(|visual| visual.annotation.id()).collect()
    }

    pub fn visual(&self, id: Uuid) -> Option<&AnnotationVisual> {
        self.index_of(id).map(|index| &self.visuals[index])
    }

    pub fn len(&self) -> usize {
        self.visuals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.visuals.is_empty()
    }

    pub fn set_annotation_bounds(&mut self, id: Uuid, bounds: VideoBounds) -> Result<(), BoxfishError> {
        let index = self.index_of(id).ok_or(BoxfishError::AnnotationNotFound(id))?;
        self.visuals[index].annotation.set_bounds(bounds)
    }

    pub fn set_annotation_caption(&mut self, id: Uuid, caption: Option<&str>) -> Result<(), BoxfishError> {
        let index = self.index_of(id).ok_or(BoxfishError::AnnotationNotFound(id))?;
        self.visuals[index].annotation.set_caption(caption);
        Ok(())
    }

    /// The current view-space rectangle where the decoded image is rendered,
    /// excluding letterbox bars.
    pub fn video_image_bounds(&self) -> Rect {
        self.image_bounds
    }

    pub fn transform(&self) -> ImageTransform {
        self.transform
    }

    /// Recompute `M` from the viewport the host laid out for the video. Every
    /// visual is repositioned implicitly since painting maps through `M`.
    pub fn on_resize(&mut self, viewport: Rect, video_size: Option<(u32, u32)>) {
        self.video_size = video_size;
        match video_size {
            Some(size) => {
                self.image_bounds = fit_image_rect(viewport, size);
                self.transform = ImageTransform::new(self.image_bounds, size);
            }
            None => {
                self.image_bounds = viewport;
                self.transform = ImageTransform::identity();
            }
        }
    }

    fn index_of(&self, id: Uuid) -> Option<usize> {
        self.visuals.iter().position(|visual| visual.annotation.id() == id)
    }

    /// Topmost visual whose rectangle (including the outside stroke) contains `pos`.
    fn hit_test(&self, pos: Pos2, border: f32) -> Option<Uuid> {
        self.visuals
            .iter()
            .rev()
            .find(|visual| self.transform.to_view(visual.annotation.bounds()).expand(border).contains(pos))
            .map(|visual| visual.annotation.id())
    }

    /// Corner of the selected visual's rectangle near `pos`, as the video-space
    /// anchor of the opposite corner.
    fn hit_test_corner(&self, id: Uuid, pos: Pos2) -> Option<Pos2> {
        let visual = self.visual(id)?;
        let bounds = visual.annotation.bounds();
        let rect = self.transform.to_view(bounds);
        let corners = [
            (rect.min, (bounds.x + bounds.width as i32, bounds.y + bounds.height as i32)),
            (pos2(rect.max.x, rect.min.y), (bounds.x, bounds.y + bounds.height as i32)),
            (pos2(rect.min.x, rect.max.y), (bounds.x + bounds.width as i32, bounds.y)),
            (rect.max, (bounds.x, bounds.y)),
        ];
        corners
            .into_iter()
            .find(|(corner, _)| corner.distance(pos) <= HANDLE_RADIUS * 2.0)
            .map(|(_, anchor)| pos2(anchor.0 as f32, anchor.1 as f32))
    }

    /// Clamp a video-space rectangle into the video frame, keeping positive size.
    fn clamp_to_frame(&self, x: f32, y: f32, width: f32, height: f32) -> VideoBounds {
        let (vw, vh) = self.video_size.unwrap_or((u32::MAX, u32::MAX));
        let width = (width.round() as i64).clamp(1, vw as i64) as u32;
        let height = (height.round() as i64).clamp(1, vh as i64) as u32;
        let x = (x.round() as i64).clamp(0, (vw.saturating_sub(width)) as i64) as i32;
        let y = (y.round() as i64).clamp(0, (vh.saturating_sub(height)) as i64) as i32;
        VideoBounds { x, y, width, height }
    }

    /// Paint the overlay and process pointer/keyboard input for it. Returns the
    /// model mutations performed by gestures this frame.
    pub fn ui(&mut self, ui: &mut egui::Ui, settings: &Settings, current_time_ms: u64) -> Vec<OverlayEvent> {
        let mut events = Vec::new();
        let display_border = settings.annotations.display.border_size as f32;

        let response = ui.interact(self.image_bounds, ui.id().with("annotation_overlay"), Sense::click_and_drag());

        if self.video_size.is_some() {
            self.handle_pointer(&response, settings, current_time_ms, &mut events);
        }

        // Delete all selected annotations
        if ui.input(|i| i.key_pressed(egui::Key::Delete)) {
            let selected = self.selected_ids();
            if !selected.is_empty() {
                for id in &selected {
                    self.remove_annotation(*id);
                }
                events.push(OverlayEvent::Deleted(selected));
            }
        }

        let painter = ui.painter().with_clip_rect(self.image_bounds);
        for visual in &self.visuals {
            paint_visual(&painter, visual, self.transform, self.image_bounds, settings);
        }

        // Rubber band for an in-progress creation gesture
        if let DragState::Creating { start } = self.drag
            && let Some(pos) = response.interact_pointer_pos()
        {
            let colour = settings.annotations.display.colour(DEFAULT_DISPLAY_BORDER_COLOUR);
            painter.rect_stroke(Rect::from_two_pos(start, pos), 0.0, Stroke::new(display_border.max(1.0), colour), StrokeKind::Outside);
        }

        if response.hovered() && matches!(self.drag, DragState::Resizing { .. }) {
            ui.ctx().set_cursor_icon(CursorIcon::Crosshair);
        }

        events
    }

    fn handle_pointer(&mut self, response: &egui::Response, settings: &Settings, current_time_ms: u64, events: &mut Vec<OverlayEvent>) {
        let display_border = settings.annotations.display.border_size as f32;

        if response.drag_started()
            && let Some(pos) = response.interact_pointer_pos()
        {
            self.drag = match self.hit_test(pos, display_border) {
                Some(id) => {
                    let was_selected = self.visual(id).is_some_and(AnnotationVisual::is_selected);
                    self.select_exclusively(id);
                    match self.hit_test_corner(id, pos).filter(|_| was_selected) {
                        Some(anchor) => DragState::Resizing { id, anchor },
                        None => {
                            let bounds = self.visual(id).expect("hit visual exists").annotation.bounds();
                            let video_pos = self.transform.to_video(pos);
                            DragState::Moving {
                                id,
                                grab_offset: video_pos - pos2(bounds.x as f32, bounds.y as f32),
                            }
                        }
                    }
                }
                None => {
                    self.clear_selection();
                    DragState::Creating { start: pos }
                }
            };
        }

        if response.dragged()
            && let Some(pos) = response.interact_pointer_pos()
        {
            match self.drag {
                DragState::Moving { id, grab_offset } => {
                    if let Some(index) = self.index_of(id) {
                        let bounds = self.visuals[index].annotation.bounds();
                        let video_pos = self.transform.to_video(pos) - grab_offset;
                        let clamped = self.clamp_to_frame(video_pos.x, video_pos.y, bounds.width as f32, bounds.height as f32);
                        let _ = self.visuals[index].annotation.set_bounds(clamped);
                    }
                }
                DragState::Resizing { id, anchor } => {
                    if let Some(index) = self.index_of(id) {
                        let video_pos = self.transform.to_video(pos);
                        let min = pos2(anchor.x.min(video_pos.x), anchor.y.min(video_pos.y));
                        let max = pos2(anchor.x.max(video_pos.x), anchor.y.max(video_pos.y));
                        let clamped = self.clamp_to_frame(min.x, min.y, max.x - min.x, max.y - min.y);
                        let _ = self.visuals[index].annotation.set_bounds(clamped);
                    }
                }
                _ => {}
            }
        }

        if response.drag_stopped() {
            match self.drag {
                DragState::Creating { start } => {
                    if let Some(pos) = response.interact_pointer_pos()
                        && start.distance(pos) >= settings.annotations.creation.minimum_drag_distance as f32
                    {
                        let rect = Rect::from_two_pos(start, pos);
                        let min = self.transform.to_video(rect.min);
                        let max = self.transform.to_video(rect.max);
                        let bounds = self.clamp_to_frame(min.x, min.y, max.x - min.x, max.y - min.y);
                        let caption = settings.annotations.creation.default_caption.as_str();
                        let annotation = Annotation::new(bounds, Some(caption), current_time_ms);
                        debug!("creating annotation {} at {:?}", annotation.id(), bounds);
                        events.push(OverlayEvent::Created(annotation.clone()));
                        let id = annotation.id();
                        self.add_annotation(annotation);
                        self.select_exclusively(id);
                    }
                }
                DragState::Moving { id, .. } | DragState::Resizing { id, .. } => {
                    if let Some(visual) = self.visual(id) {
                        events.push(OverlayEvent::BoundsChanged { id, bounds: visual.annotation.bounds() });
                    }
                }
                DragState::Idle => {}
            }
            self.drag = DragState::Idle;
        }

        // A plain click selects exclusively, or clears the selection on empty area
        if response.clicked()
            && let Some(pos) = response.interact_pointer_pos()
        {
            match self.hit_test(pos, display_border) {
                Some(id) => self.select_exclusively(id),
                None => self.clear_selection(),
            }
        }

    }
}

impl Default for AnnotationOverlay {
    fn default() -> Self {
        Self::new()
    }
}

fn caption_font(settings: &Settings) -> FontId {
    let family = if settings.captions.font_family.to_ascii_lowercase().contains("mono") {
        FontFamily::Monospace
    } else {
        FontFamily::Proportional
    };
    FontId::new(settings.captions.font_size as f32, family)
}

fn paint_visual(painter: &egui::Painter, visual: &AnnotationVisual, transform: ImageTransform, image_bounds: Rect, settings: &Settings) {
    let (style, fallback) = if visual.is_selected() {
        (&settings.annotations.selection, DEFAULT_SELECTION_BORDER_COLOUR)
    } else {
        (&settings.annotations.display, DEFAULT_DISPLAY_BORDER_COLOUR)
    };
    let border = style.border_size as f32;
    let colour = style.colour(fallback);

    let rect = transform.to_view(visual.annotation().bounds());
    painter.rect_stroke(rect, 0.0, Stroke::new(border.max(1.0), colour), StrokeKind::Outside);

    if visual.is_selected() {
        for corner in [rect.min, pos2(rect.max.x, rect.min.y), pos2(rect.min.x, rect.max.y), rect.max] {
            painter.rect_filled(Rect::from_center_size(corner, Vec2::splat(HANDLE_RADIUS * 2.0)), 0.0, colour);
        }
    }

    if !visual.caption_visible() {
        return;
    }
    let Some(text) = visual.annotation().caption() else {
        return;
    };

    let text_colour = parse_hex_colour(&settings.captions.text_colour, parse_hex_colour(DEFAULT_CAPTION_TEXT_COLOUR, Color32::BLACK));
    let background = parse_hex_colour(&settings.captions.background_colour, parse_hex_colour(DEFAULT_CAPTION_BACKGROUND_COLOUR, Color32::WHITE));

    // Measure the caption without committing layout
    let galley = painter.layout_no_wrap(text.to_string(), caption_font(settings), text_colour);
    let box_size = galley.size() + Vec2::splat(2.0 * CAPTION_INNER_PAD);
    let natural = vec2(galley.size().x, box_size.y);

    // The visual's layout origin is the mapped rectangle origin offset by -border
    let layout_pos = (rect.min - image_bounds.min) - Vec2::splat(border);
    let offset = caption_offset(layout_pos, rect.size(), image_bounds.width(), border, natural);

    let caption_origin = image_bounds.min + layout_pos + offset;
    painter.rect_filled(Rect::from_min_size(caption_origin, box_size), 0.0, background);
    painter.galley(caption_origin + Vec2::splat(CAPTION_INNER_PAD), galley, text_colour);
}
