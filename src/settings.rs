use std::cell::Cell;
use std::cell::RefCell;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::rc::Rc;
use std::rc::Weak;
use std::sync::Arc;

use egui::Color32;
use parking_lot::RwLock;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::error;
use tracing::warn;

use crate::error::BoxfishError;
use crate::util::parse_hex_colour;

pub const DEFAULT_DISPLAY_BORDER_COLOUR: &str = "#FFFF00";
pub const DEFAULT_SELECTION_BORDER_COLOUR: &str = "#00FFFF";
pub const DEFAULT_CAPTION_TEXT_COLOUR: &str = "#000000";
pub const DEFAULT_CAPTION_BACKGROUND_COLOUR: &str = "#FFFFFF";
pub const DEFAULT_CONTROL_PORT: u16 = 5005;

fn default_minimum_drag() -> u32 {
    8
}

fn default_caption_font_size() -> u32 {
    16
}

fn default_caption_font_family() -> String {
    "Sans".to_string()
}

fn default_control_port() -> u16 {
    DEFAULT_CONTROL_PORT
}

/// Stroke styling shared by the annotation display and selection groups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BorderStyle {
    pub border_colour: String,
    pub border_size: u32,
}

impl BorderStyle {
    /// Parse the configured colour, falling back to the group default when malformed.
    pub fn colour(&self, fallback: &str) -> Color32 {
        parse_hex_colour(&self.border_colour, parse_hex_colour(fallback, Color32::WHITE))
    }
}

/// Settings governing annotation creation gestures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreationSettings {
    /// Caption given to newly created annotations; empty means no caption.
    #[serde(default)]
    pub default_caption: String,
    /// Minimum drag distance, in view pixels, before a drag commits a new annotation.
    #[serde(default = "default_minimum_drag")]
    pub minimum_drag_distance: u32,
}

impl Default for CreationSettings {
    fn default() -> Self {
        Self {
            default_caption: String::new(),
            minimum_drag_distance: default_minimum_drag(),
        }
    }
}

/// Settings for video annotations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationSettings {
    #[serde(default)]
    pub creation: CreationSettings,
    #[serde(default = "default_display_style")]
    pub display: BorderStyle,
    #[serde(default = "default_selection_style")]
    pub selection: BorderStyle,
}

fn default_display_style() -> BorderStyle {
    BorderStyle {
        border_colour: DEFAULT_DISPLAY_BORDER_COLOUR.to_string(),
        border_size: 2,
    }
}

fn default_selection_style() -> BorderStyle {
    BorderStyle {
        border_colour: DEFAULT_SELECTION_BORDER_COLOUR.to_string(),
        border_size: 3,
    }
}

impl Default for AnnotationSettings {
    fn default() -> Self {
        Self {
            creation: CreationSettings::default(),
            display: default_display_style(),
            selection: default_selection_style(),
        }
    }
}

/// Settings for annotation captions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptionSettings {
    #[serde(default = "default_caption_font_family")]
    pub font_family: String,
    #[serde(default = "default_caption_font_size")]
    pub font_size: u32,
    #[serde(default = "default_caption_text_colour")]
    pub text_colour: String,
    #[serde(default = "default_caption_background_colour")]
    pub background_colour: String,
}

fn default_caption_text_colour() -> String {
    DEFAULT_CAPTION_TEXT_COLOUR.to_string()
}

fn default_caption_background_colour() -> String {
    DEFAULT_CAPTION_BACKGROUND_COLOUR.to_string()
}

impl Default for CaptionSettings {
    fn default() -> Self {
        Self {
            font_family: default_caption_font_family(),
            font_size: default_caption_font_size(),
            text_colour: default_caption_text_colour(),
            background_colour: default_caption_background_colour(),
        }
    }
}

/// Network settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSettings {
    #[serde(default = "default_control_port")]
    pub control_port: u16,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self { control_port: default_control_port() }
    }
}

/// Global application settings.
///
/// A value of this type is an immutable snapshot; mutation goes through
/// [`SettingsStore::apply`], which swaps the whole snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub annotations: AnnotationSettings,
    #[serde(default)]
    pub captions: CaptionSettings,
    #[serde(default)]
    pub network: NetworkSettings,
}

/// Path of the persisted settings file.
pub fn settings_path() -> PathBuf {
    let mut path = PathBuf::from("settings.json");
    if let Some(storage_dir) = eframe::storage_dir(crate::APP_NAME) {
        path = storage_dir.join(path)
    }
    path
}

/// Read settings from `path`, returning defaults when the file is missing or malformed.
pub fn read_settings(path: &Path) -> Settings {
    match fs::read_to_string(path) {
        Ok(data) => match serde_json::from_str(&data) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("malformed settings file {:?}, using defaults: {}", path, e);
                Settings::default()
            }
        },
        Err(_) => {
            debug!("no settings file at {:?}, using defaults", path);
            Settings::default()
        }
    }
}

/// Write settings to `path`, creating parent directories as needed.
pub fn write_settings(path: &Path, settings: &Settings) -> Result<(), BoxfishError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string_pretty(settings)?)?;
    Ok(())
}

type Observer = Rc<RefCell<dyn FnMut(&Arc<Settings>)>>;
type ObserverList = Rc<RefCell<Vec<(u64, Observer)>>>;

/// Detaches its observer from the [`SettingsStore`] when dropped.
pub struct SettingsSubscription {
    token: u64,
    observers: Weak<RefCell<Vec<(u64, Observer)>>>,
}

impl Drop for SettingsSubscription {
    fn drop(&mut self) {
        if let Some(observers) = self.observers.upgrade() {
            observers.borrow_mut().retain(|(token, _)| *token != self.token);
        }
    }
}

/// Cloneable cross-thread handle for reading the current settings snapshot.
#[derive(Clone)]
pub struct SettingsReader {
    current: Arc<RwLock<Arc<Settings>>>,
}

impl SettingsReader {
    pub fn current(&self) -> Arc<Settings> {
        Arc::clone(&self.current.read())
    }
}

/// Process-wide settings store with change broadcast.
///
/// The store itself lives on the UI thread; background threads read snapshots
/// through a [`SettingsReader`]. `apply` swaps the snapshot, persists it, and
/// notifies observers synchronously in subscription order. A late observer does
/// not receive the current snapshot on subscription; it must read `current()`.
pub struct SettingsStore {
    current: Arc<RwLock<Arc<Settings>>>,
    observers: ObserverList,
    next_token: Cell<u64>,
    path: PathBuf,
}

impl SettingsStore {
    /// Create a store backed by the settings file at `path`, reading the initial snapshot from it.
    pub fn new(path: PathBuf) -> Self {
        let settings = read_settings(&path);
        debug!("settings={:?}", settings);
        Self {
            current: Arc::new(RwLock::new(Arc::new(settings))),
            observers: Rc::new(RefCell::new(Vec::new())),
            next_token: Cell::new(0),
            path,
        }
    }

    pub fn current(&self) -> Arc<Settings> {
        Arc::clone(&self.current.read())
    }

    pub fn reader(&self) -> SettingsReader {
        SettingsReader { current: Arc::clone(&self.current) }
    }

    /// Replace the current snapshot, persist it, and notify all observers.
    ///
    /// Must be called on the UI thread; observers may mutate overlay state directly.
    pub fn apply(&self, new: Settings) {
        debug!("apply(new={:?})", new);
        let snapshot = Arc::new(new);
        *self.current.write() = Arc::clone(&snapshot);

        // Persistence failures do not abort the apply
        if let Err(e) = write_settings(&self.path, &snapshot) {
            error!("failed to persist settings to {:?}: {}", self.path, e);
        }

        // The list borrow is released before any observer runs, so an observer
        // may subscribe or drop a subscription re-entrantly. One unsubscribed
        // mid-notification still receives this snapshot; one subscribed
        // mid-notification first hears about the next apply.
        let observers: Vec<Observer> = self.observers.borrow().iter().map(|(_, observer)| Rc::clone(observer)).collect();
        for observer in observers {
            (observer.borrow_mut())(&snapshot);
        }
    }

    /// Register an observer invoked with every subsequent snapshot.
    pub fn subscribe(&self, observer: impl FnMut(&Arc<Settings>) + 'static) -> SettingsSubscription {
        let token = self.next_token.get();
        self.next_token.set(token + 1);
        let observer: Observer = Rc::new(RefCell::new(observer));
        self.observers.borrow_mut().push((token, observer));
        SettingsSubscription {
            token,
            observers: Rc::downgrade(&self.observers),
        }
    }
}
