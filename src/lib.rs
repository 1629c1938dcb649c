#![warn(clippy::all, rust_2018_idioms)]
mod annotation;
mod app;
mod engine;
mod error;
mod overlay;
mod player;
mod registry;
mod remote;
mod settings;
mod ui;
mod util;
pub use app::BoxfishApp;
pub const APP_NAME: &str = "Boxfish";
pub(crate) use egui_phosphor::regular as icons;

/// Concatenate an icon const with a string literal at compile time (zero allocation).
/// Usage: `icon_str!(icons::GEAR_FINE, "Settings")` => `&'static str`
macro_rules! icon_str {
    ($icon:expr, $text:expr) => {
        const_format::concatcp!($icon, " ", $text)
    };
}
pub(crate) use icon_str;
