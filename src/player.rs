use std::collections::HashMap;

use tracing::debug;
use uuid::Uuid;

use crate::annotation::Annotation;
use crate::annotation::VideoBounds;
use crate::engine::EngineEvent;
use crate::engine::MediaEngine;
use crate::error::BoxfishError;
use crate::overlay::AnnotationOverlay;
use crate::overlay::OverlayEvent;

/// A player component: a media-engine instance bound to an annotation overlay
/// and the player's current set of annotations.
///
/// The annotation map is the model; the overlay renders it. Both are kept in
/// sync here: programmatic mutation flows model -> overlay, gesture mutation
/// flows overlay -> model through [`OverlayEvent`]s.
pub struct PlayerComponent {
    id: Uuid,
    engine: Box<dyn MediaEngine>,
    overlay: AnnotationOverlay,
    annotations: HashMap<Uuid, Annotation>,
    media_url: Option<String>,
    title: String,
}

impl PlayerComponent {
    pub fn new(id: Uuid, engine: Box<dyn MediaEngine>) -> Self {
        Self {
            id,
            engine,
            overlay: AnnotationOverlay::new(),
            annotations: HashMap::new(),
            media_url: None,
            title: "New Player".to_string(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn media_url(&self) -> Option<&str> {
        self.media_url.as_deref()
    }

    /// Instruct the media engine to load a source URI. Returns once the engine
    /// accepts the request; readiness arrives through engine events.
    pub fn open(&mut self, url: &str) -> Result<(), BoxfishError> {
        debug!("open(url={})", url);
        self.engine.open(url)?;
        self.media_url = Some(url.to_string());
        self.title = url.rsplit('/').next().filter(|name| !name.is_empty()).unwrap_or(url).to_string();
        self.annotations.clear();
        self.overlay.clear();
        Ok(())
    }

    pub fn play(&mut self) {
        self.engine.play();
    }

    pub fn pause(&mut self) {
        self.engine.pause();
    }

    pub fn toggle_play(&mut self) {
        if self.engine.is_playing() {
            self.engine.pause();
        } else {
            self.engine.play();
        }
    }

    pub fn is_playing(&self) -> bool {
        self.engine.is_playing()
    }

    /// Seek, clamped to `[0, duration]`. No upper clamp while the duration is unknown.
    pub fn seek(&mut self, time_ms: u64) {
        let time = match self.engine.duration() {
            Some(duration) => time_ms.min(duration),
            None => time_ms,
        };
        self.engine.seek(time);
    }

    pub fn current_time(&self) -> u64 {
        self.engine.current_time()
    }

    pub fn duration(&self) -> Option<u64> {
        self.engine.duration()
    }

    pub fn video_size(&self) -> Option<(u32, u32)> {
        self.engine.video_size()
    }

    /// Pause, then advance one nominal frame period.
    pub fn frame_advance(&mut self) {
        self.engine.pause();
        let frame_ms = (1000.0 / self.engine.frame_rate().max(1.0)).round() as u64;
        self.seek(self.engine.current_time() + frame_ms.max(1));
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.engine.set_volume(volume);
    }

    pub fn volume(&self) -> f32 {
        self.engine.volume()
    }

    /// Add an annotation to the model and its visual to the overlay. Idempotent
    /// by identifier.
    pub fn add_annotation(&mut self, annotation: Annotation) {
        self.overlay.add_annotation(annotation.clone());
        self.annotations.entry(annotation.id()).or_insert(annotation);
    }

    /// Remove an annotation and its visual. No effect when absent.
    pub fn remove_annotation(&mut self, id: Uuid) -> bool {
        self.overlay.remove_annotation(id);
        self.annotations.remove(&id).is_some()
    }

    /// Update an annotation's bounds and caption in place.
    pub fn update_annotation(&mut self, id: Uuid, bounds: VideoBounds, caption: Option<&str>) -> Result<(), BoxfishError> {
        let annotation = self.annotations.get_mut(&id).ok_or(BoxfishError::AnnotationNotFound(id))?;
        annotation.set_bounds(bounds)?;
        annotation.set_caption(caption);
        self.overlay.set_annotation_bounds(id, bounds)?;
        self.overlay.set_annotation_caption(id, caption)?;
        Ok(())
    }

    pub fn clear_annotations(&mut self) {
        self.annotations.clear();
        self.overlay.clear();
    }

    pub fn annotation(&self, id: Uuid) -> Option<&Annotation> {
        self.annotations.get(&id)
    }

    pub fn annotation_count(&self) -> usize {
        self.annotations.len()
    }

    pub fn overlay(&self) -> &AnnotationOverlay {
        &self.overlay
    }

    pub fn overlay_mut(&mut self) -> &mut AnnotationOverlay {
        &mut self.overlay
    }

    /// Fold gesture mutations from the overlay back into the annotation model.
    pub fn apply_overlay_events(&mut self, events: &[OverlayEvent]) {
        for event in events {
            match event {
                OverlayEvent::Created(annotation) => {
                    self.annotations.insert(annotation.id(), annotation.clone());
                }
                OverlayEvent::BoundsChanged { id, bounds } => {
                    if let Some(annotation) = self.annotations.get_mut(id) {
                        let _ = annotation.set_bounds(*bounds);
                    }
                }
                OverlayEvent::Deleted(ids) => {
                    for id in ids {
                        self.annotations.remove(id);
                    }
                }
            }
        }
    }

    /// Drain pending engine events. `Opened` and `EndReached` are handled by the
    /// engine state itself; everything is returned so the shell can surface it.
    pub fn poll_engine(&mut self) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.engine.poll_event() {
            events.push(event);
        }
        events
    }

    /// Release the media-engine resources.
    pub fn release(&mut self) {
        debug!("release() player {}", self.id);
        self.engine.release();
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;
    use std::time::Instant;

    use super::*;
    use crate::engine::SimulatedEngine;

    fn player() -> PlayerComponent {
        PlayerComponent::new(Uuid::new_v4(), Box::new(SimulatedEngine::new()))
    }

    fn open_and_wait(player: &mut PlayerComponent, url: &str) {
        player.open(url).unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while player.duration().is_none() {
            let _ = player.poll_engine();
            assert!(Instant::now() < deadline, "media never became ready");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn seek_clamps_to_duration() {
        let mut player = player();
        open_and_wait(&mut player, "file:///clip.mov");
        let duration = player.duration().unwrap();

        player.seek(duration + 100_000);
        assert_eq!(player.current_time(), duration);

        player.seek(1_000);
        assert_eq!(player.current_time(), 1_000);
    }

    #[test]
    fn seek_is_unclamped_before_readiness() {
        let mut player = player();
        player.seek(10_000);
        assert_eq!(player.current_time(), 10_000);
    }

    #[test]
    fn toggle_play_flips_state() {
        let mut player = player();
        assert!(!player.is_playing());
        player.toggle_play();
        assert!(player.is_playing());
        player.toggle_play();
        assert!(!player.is_playing());
    }

    #[test]
    fn frame_advance_pauses_then_steps() {
        let mut player = player();
        open_and_wait(&mut player, "file:///clip.mov");
        player.seek(1_000);
        player.play();
        player.frame_advance();
        assert!(!player.is_playing());
        // One nominal 25 fps frame period is 40 ms
        assert!(player.current_time() >= 1_040);
    }

    #[test]
    fn add_annotation_is_idempotent_across_model_and_overlay() {
        let mut player = player();
        let annotation = Annotation::new(VideoBounds { x: 0, y: 0, width: 10, height: 10 }, Some("fish"), 0);
        player.add_annotation(annotation.clone());
        player.add_annotation(annotation.clone());

        assert_eq!(player.annotation_count(), 1);
        assert_eq!(player.overlay().len(), 1);
    }

    #[test]
    fn update_annotation_requires_a_known_id() {
        let mut player = player();
        let bounds = VideoBounds { x: 0, y: 0, width: 10, height: 10 };
        let result = player.update_annotation(Uuid::new_v4(), bounds, None);
        assert!(matches!(result, Err(BoxfishError::AnnotationNotFound(_))));

        let annotation = Annotation::new(bounds, Some("fish"), 0);
        let id = annotation.id();
        player.add_annotation(annotation);

        let new_bounds = VideoBounds { x: 5, y: 5, width: 20, height: 20 };
        player.update_annotation(id, new_bounds, Some("shark")).unwrap();
        assert_eq!(player.annotation(id).unwrap().bounds(), new_bounds);
        assert_eq!(player.annotation(id).unwrap().caption(), Some("shark"));
        assert_eq!(player.overlay().visual(id).unwrap().annotation().bounds(), new_bounds);
    }

    #[test]
    fn overlay_events_keep_the_model_in_sync() {
        let mut player = player();
        let created = Annotation::new(VideoBounds { x: 1, y: 2, width: 3, height: 4 }, None, 0);
        let id = created.id();

        player.apply_overlay_events(&[OverlayEvent::Created(created)]);
        assert_eq!(player.annotation_count(), 1);

        let bounds = VideoBounds { x: 9, y: 9, width: 9, height: 9 };
        player.apply_overlay_events(&[OverlayEvent::BoundsChanged { id, bounds }]);
        assert_eq!(player.annotation(id).unwrap().bounds(), bounds);

        player.apply_overlay_events(&[OverlayEvent::Deleted(vec![id])]);
        assert_eq!(player.annotation_count(), 0);
    }

    #[test]
    fn opening_new_media_clears_annotations() {
        let mut player = player();
        player.add_annotation(Annotation::new(VideoBounds { x: 0, y: 0, width: 5, height: 5 }, None, 0));
        player.open("file:///other.mov").unwrap();
        assert_eq!(player.annotation_count(), 0);
        assert!(player.overlay().is_empty());
        assert_eq!(player.title(), "other.mov");
    }
}
