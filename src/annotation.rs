use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

use crate::error::BoxfishError;

/// A rectangle in video space: integer pixel coordinates with the origin at the
/// top-left of the decoded image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoBounds {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl VideoBounds {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Result<Self, BoxfishError> {
        if width == 0 || height == 0 {
            return Err(BoxfishError::invalid_argument(format!("bounds must have positive dimensions, got {width}x{height}")));
        }
        Ok(Self { x, y, width, height })
    }
}

/// A user-created rectangular region of interest over a video frame, optionally labelled.
///
/// The identifier is fixed at creation and stable across all mutation. Bounds are
/// stored in video space; mapping to view space is the overlay's concern.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    id: Uuid,
    bounds: VideoBounds,
    caption: Option<String>,
    /// Playback position at creation, in milliseconds.
    elapsed_time_ms: u64,
}

impl Annotation {
    pub fn new(bounds: VideoBounds, caption: Option<&str>, elapsed_time_ms: u64) -> Self {
        Self::with_id(Uuid::new_v4(), bounds, caption, elapsed_time_ms)
    }

    pub fn with_id(id: Uuid, bounds: VideoBounds, caption: Option<&str>, elapsed_time_ms: u64) -> Self {
        Self {
            id,
            bounds,
            caption: normalize_caption(caption),
            elapsed_time_ms,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn bounds(&self) -> VideoBounds {
        self.bounds
    }

    pub fn caption(&self) -> Option<&str> {
        self.caption.as_deref()
    }

    pub fn elapsed_time_ms(&self) -> u64 {
        self.elapsed_time_ms
    }

    pub fn set_bounds(&mut self, bounds: VideoBounds) -> Result<(), BoxfishError> {
        if bounds.width == 0 || bounds.height == 0 {
            return Err(BoxfishError::invalid_argument(format!(
                "bounds must have positive dimensions, got {}x{}",
                bounds.width, bounds.height
            )));
        }
        self.bounds = bounds;
        Ok(())
    }

    /// Set the caption. An absent caption and a caption that is empty after trimming
    /// are equivalent and both mean "no caption".
    pub fn set_caption(&mut self, caption: Option<&str>) {
        self.caption = normalize_caption(caption);
    }
}

fn normalize_caption(caption: Option<&str>) -> Option<String> {
    caption.map(str::trim).filter(|trimmed| !trimmed.is_empty()).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_require_positive_dimensions() {
        assert!(VideoBounds::new(0, 0, 0, 10).is_err());
        assert!(VideoBounds::new(0, 0, 10, 0).is_err());
        assert!(VideoBounds::new(-5, -5, 1, 1).is_ok());
    }

    #[test]
    fn set_bounds_updates_and_validates() {
        let mut annotation = Annotation::new(VideoBounds::new(0, 0, 10, 10).unwrap(), None, 0);
        let new_bounds = VideoBounds { x: 5, y: 6, width: 20, height: 30 };
        annotation.set_bounds(new_bounds).unwrap();
        assert_eq!(annotation.bounds(), new_bounds);

        let bad = VideoBounds { x: 0, y: 0, width: 0, height: 30 };
        assert!(annotation.set_bounds(bad).is_err());
        assert_eq!(annotation.bounds(), new_bounds);
    }

    #[test]
    fn caption_normalization() {
        let bounds = VideoBounds::new(0, 0, 10, 10).unwrap();
        assert_eq!(Annotation::new(bounds, None, 0).caption(), None);
        assert_eq!(Annotation::new(bounds, Some(""), 0).caption(), None);
        assert_eq!(Annotation::new(bounds, Some("   "), 0).caption(), None);
        assert_eq!(Annotation::new(bounds, Some(" fish "), 0).caption(), Some("fish"));

        let mut annotation = Annotation::new(bounds, Some("fish"), 0);
        annotation.set_caption(Some("  "));
        assert_eq!(annotation.caption(), None);
    }

    #[test]
    fn identifier_is_stable_across_mutation() {
        let mut annotation = Annotation::new(VideoBounds::new(0, 0, 10, 10).unwrap(), Some("fish"), 100);
        let id = annotation.id();
        annotation.set_caption(Some("shark"));
        annotation.set_bounds(VideoBounds { x: 1, y: 2, width: 3, height: 4 }).unwrap();
        assert_eq!(annotation.id(), id);
    }
}
