use egui::Color32;
use egui::Context;
use egui::Slider;

use crate::settings::Settings;
use crate::settings::SettingsStore;
use crate::util::parse_hex_colour;

/// Outcome of showing the dialog for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsDialogAction {
    None,
    Applied,
}

/// Modal-ish settings editor. Edits a working copy; nothing touches the live
/// snapshot until Apply.
#[derive(Default)]
pub struct SettingsDialog {
    open: bool,
    working: Settings,
}

impl SettingsDialog {
    pub fn open(&mut self, current: &Settings) {
        self.working = current.clone();
        self.open = true;
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn show(&mut self, ctx: &Context, store: &SettingsStore) -> SettingsDialogAction {
        if !self.open {
            return SettingsDialogAction::None;
        }

        let mut action = SettingsDialogAction::None;
        let mut open = self.open;
        egui::Window::new("Settings").open(&mut open).resizable(false).show(ctx, |ui| {
            ui.label("Annotation Display");
            ui.group(|ui| {
                colour_field(ui, "Border Colour", &mut self.working.annotations.display.border_colour);
                ui.add(Slider::new(&mut self.working.annotations.display.border_size, 1..=10).text("Border Size"));
            });

            ui.label("Annotation Selection");
            ui.group(|ui| {
                colour_field(ui, "Border Colour", &mut self.working.annotations.selection.border_colour);
                ui.add(Slider::new(&mut self.working.annotations.selection.border_size, 1..=10).text("Border Size"));
            });

            ui.label("Annotation Creation");
            ui.group(|ui| {
                ui.horizontal(|ui| {
                    ui.label("Default Caption");
                    ui.text_edit_singleline(&mut self.working.annotations.creation.default_caption);
                });
                ui.add(Slider::new(&mut self.working.annotations.creation.minimum_drag_distance, 1..=64).text("Minimum Drag Distance (px)"));
            });

            ui.label("Captions");
            ui.group(|ui| {
                ui.horizontal(|ui| {
                    ui.label("Font Family");
                    ui.text_edit_singleline(&mut self.working.captions.font_family);
                });
                ui.add(Slider::new(&mut self.working.captions.font_size, 8..=72).text("Font Size"));
                colour_field(ui, "Text Colour", &mut self.working.captions.text_colour);
                colour_field(ui, "Background Colour", &mut self.working.captions.background_colour);
            });

            ui.label("Remote Control");
            ui.group(|ui| {
                ui.horizontal(|ui| {
                    ui.label("UDP Port");
                    ui.add(egui::DragValue::new(&mut self.working.network.control_port).range(1..=u16::MAX));
                });
                ui.label("Port changes take effect the next time the application starts.");
            });

            ui.separator();
            ui.horizontal(|ui| {
                if ui.button("Apply").clicked() {
                    store.apply(self.working.clone());
                    action = SettingsDialogAction::Applied;
                    self.open = false;
                }
                if ui.button("Cancel").clicked() {
                    self.open = false;
                }
            });
        });

        // The window's close button
        if !open {
            self.open = false;
        }

        action
    }
}

fn colour_field(ui: &mut egui::Ui, label: &str, value: &mut String) {
    ui.horizontal(|ui| {
        ui.label(label);
        let valid = is_valid_colour(value);
        ui.add(
            egui::TextEdit::singleline(value)
                .desired_width(80.0)
                .hint_text("#RRGGBB")
                .text_color_opt((!valid).then_some(Color32::LIGHT_RED)),
        );
        if valid {
            let colour = parse_hex_colour(value, Color32::WHITE);
            let (rect, _) = ui.allocate_exact_size(egui::Vec2::splat(14.0), egui::Sense::hover());
            ui.painter().rect_filled(rect, 2.0, colour);
        }
    });
}

fn is_valid_colour(value: &str) -> bool {
    value.len() == 7 && value.starts_with('#') && value[1..].chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn colour_validation() {
        assert!(is_valid_colour("#FFFF00"));
        assert!(is_valid_colour("#00ffcc"));
        assert!(!is_valid_colour("FFFF00"));
        assert!(!is_valid_colour("#FFF"));
        assert!(!is_valid_colour("#GGGGGG"));
    }
}
