use egui::Align2;
use egui::Color32;
use egui::Sense;
use egui::Slider;
use egui::Stroke;
use egui::StrokeKind;
use egui::TextStyle;
use egui::Vec2;
use uuid::Uuid;

use crate::app::PlayerTabViewer;
use crate::icons;
use crate::overlay::fit_image_rect;
use crate::util::format_timecode;

const CONTROLS_HEIGHT: f32 = 56.0;
const LETTERBOX_COLOUR: Color32 = Color32::BLACK;
const SURFACE_COLOUR: Color32 = Color32::from_gray(24);

impl PlayerTabViewer<'_> {
    pub fn build_player_tab(&mut self, ui: &mut egui::Ui, id: Uuid) {
        if self.registry.get(id).is_err() {
            // The tab outlived its player by a frame; the shell removes it next pass
            ui.label("Player closed");
            return;
        }

        ui.vertical(|ui| {
            self.build_video_surface(ui, id);
            self.build_controls(ui, id);
        });
    }

    fn build_video_surface(&mut self, ui: &mut egui::Ui, id: Uuid) {
        let settings = self.settings.clone();
        let Ok(player) = self.registry.get_mut(id) else {
            return;
        };

        let surface_height = (ui.available_height() - CONTROLS_HEIGHT).max(0.0);
        let (viewport, _response) = ui.allocate_exact_size(Vec2::new(ui.available_width(), surface_height), Sense::hover());

        let painter = ui.painter_at(viewport);
        painter.rect_filled(viewport, 0.0, LETTERBOX_COLOUR);

        match player.video_size() {
            Some(video_size) => {
                let image_rect = fit_image_rect(viewport, video_size);
                painter.rect_filled(image_rect, 0.0, SURFACE_COLOUR);
                painter.rect_stroke(image_rect, 0.0, Stroke::new(1.0, Color32::from_gray(48)), StrokeKind::Inside);
            }
            None => {
                let message = match player.media_url() {
                    Some(_) => format!("{} Opening media\u{2026}", icons::FILM_STRIP),
                    None => format!("{} No media loaded", icons::FILM_STRIP),
                };
                painter.text(
                    viewport.center(),
                    Align2::CENTER_CENTER,
                    message,
                    TextStyle::Heading.resolve(ui.style()),
                    Color32::from_gray(128),
                );
            }
        }

        let current_time = player.current_time();
        let video_size = player.video_size();
        let overlay = player.overlay_mut();
        overlay.on_resize(viewport, video_size);
        let events = overlay.ui(ui, &settings, current_time);
        player.apply_overlay_events(&events);
    }

    fn build_controls(&mut self, ui: &mut egui::Ui, id: Uuid) {
        let Ok(player) = self.registry.get_mut(id) else {
            return;
        };

        ui.horizontal(|ui| {
            let current_time = player.current_time();
            ui.label(format_timecode(current_time));

            let duration = player.duration();
            let mut position = current_time;
            let slider_enabled = duration.is_some();
            let range = 0..=duration.unwrap_or(0).max(1);
            ui.spacing_mut().slider_width = (ui.available_width() - 120.0).max(40.0);
            let slider = Slider::new(&mut position, range).show_value(false);
            if ui.add_enabled(slider_enabled, slider).changed() {
                player.seek(position);
            }

            ui.label(format_timecode(duration.unwrap_or(0)));
        });

        ui.horizontal(|ui| {
            let play_icon = if player.is_playing() { icons::PAUSE } else { icons::PLAY };
            if ui.button(play_icon).on_hover_text("Play/Pause (Space)").clicked() {
                player.toggle_play();
            }
            if ui.button(icons::SKIP_FORWARD).on_hover_text("Frame Advance").clicked() {
                player.frame_advance();
            }

            if ui.input(|i| i.key_pressed(egui::Key::Space)) && !ui.ctx().wants_keyboard_input() {
                player.toggle_play();
            }

            ui.separator();
            ui.label(icons::SPEAKER_HIGH);
            let mut volume = player.volume();
            if ui.add(Slider::new(&mut volume, 0.0..=1.0).show_value(false)).changed() {
                player.set_volume(volume);
            }

            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                let count = player.annotation_count();
                let label = if count == 1 { "1 annotation".to_string() } else { format!("{count} annotations") };
                ui.label(label);
            });
        });
    }
}
