use std::sync::Arc;
use std::sync::mpsc;
use std::sync::mpsc::Receiver;
use std::time::Duration;
use std::time::Instant;

use egui::Context;
use egui::RichText;
use egui::Ui;
use egui::UiKind;
use egui::WidgetText;
use egui_dock::DockArea;
use egui_dock::DockState;
use egui_dock::Style;
use egui_dock::TabViewer;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;
use uuid::Uuid;

use crate::engine::EngineEvent;
use crate::engine::SimulatedEngine;
use crate::icon_str;
use crate::icons;
use crate::registry::PlayerRegistry;
use crate::remote;
use crate::remote::InboundCommand;
use crate::remote::RemoteEndpoint;
use crate::remote::ReplySender;
use crate::remote::UiAction;
use crate::settings::Settings;
use crate::settings::SettingsStore;
use crate::settings::SettingsSubscription;
use crate::settings::settings_path;
use crate::ui::settings_dialog::SettingsDialog;
use crate::ui::settings_dialog::SettingsDialogAction;
use crate::util::format_timecode;

/// Status-bar message that disappears on its own.
#[derive(Clone)]
pub struct TimedMessage {
    pub message: String,
    pub expiration: Instant,
}

impl TimedMessage {
    pub fn new(message: String) -> Self {
        TimedMessage { message, expiration: Instant::now() + Duration::from_secs(10) }
    }

    pub fn is_expired(&self) -> bool {
        self.expiration < Instant::now()
    }
}

pub struct PlayerTabViewer<'a> {
    pub registry: &'a mut PlayerRegistry,
    pub settings: Arc<Settings>,
}

impl TabViewer for PlayerTabViewer<'_> {
    type Tab = Uuid;

    fn title(&mut self, tab: &mut Self::Tab) -> WidgetText {
        match self.registry.get(*tab) {
            Ok(player) => format!("{} {}", icons::FILM_STRIP, player.title()).into(),
            Err(_) => icon_str!(icons::FILM_STRIP, "Player").into(),
        }
    }

    fn ui(&mut self, ui: &mut egui::Ui, tab: &mut Self::Tab) {
        self.build_player_tab(ui, *tab);
    }
}

pub struct BoxfishApp {
    settings: SettingsStore,
    registry: PlayerRegistry,
    dock_state: DockState<Uuid>,

    endpoint: Option<RemoteEndpoint>,
    reply_sender: Option<ReplySender>,
    command_rx: Receiver<InboundCommand>,

    settings_dialog: SettingsDialog,
    show_about_window: bool,
    url_input: Option<String>,

    toasts: egui_notify::Toasts,
    timed_message: Option<TimedMessage>,
    shutting_down: bool,

    _settings_subscription: SettingsSubscription,
}

impl BoxfishApp {
    /// Called once before the first frame. Brings the application up in
    /// dependency order: settings, player registry, remote endpoint, then the
    /// initial player window.
    pub fn new(cc: &eframe::CreationContext<'_>) -> Self {
        let mut fonts = egui::FontDefinitions::default();
        egui_phosphor::add_to_fonts(&mut fonts, egui_phosphor::Variant::Regular);
        cc.egui_ctx.set_fonts(fonts);
        cc.egui_ctx.set_theme(egui::Theme::Dark);

        let settings = SettingsStore::new(settings_path());
        let mut registry = PlayerRegistry::new(SimulatedEngine::factory());

        let (command_tx, command_rx) = mpsc::channel();
        let port = remote::control_port(settings.current().network.control_port);
        let repaint_ctx = cc.egui_ctx.clone();
        let endpoint = match RemoteEndpoint::bind(port, command_tx, move || repaint_ctx.request_repaint()) {
            Ok(endpoint) => Some(endpoint),
            Err(e) => {
                error!("failed to bind remote control port {}: {}", port, e);
                None
            }
        };
        let reply_sender = endpoint.as_ref().and_then(RemoteEndpoint::reply_sender);

        let initial_player = registry.open();
        let dock_state = DockState::new(vec![initial_player]);

        let mut toasts = egui_notify::Toasts::default();
        if endpoint.is_none() {
            toasts.error(format!("Remote control disabled: UDP port {port} could not be bound"));
        }

        let _settings_subscription = settings.subscribe(|_settings| {
            debug!("settings snapshot applied");
        });

        Self {
            settings,
            registry,
            dock_state,
            endpoint,
            reply_sender,
            command_rx,
            settings_dialog: SettingsDialog::default(),
            show_about_window: false,
            url_input: None,
            toasts,
            timed_message: None,
            shutting_down: false,
            _settings_subscription,
        }
    }

    fn update_impl(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.drain_remote_commands();
        self.drain_engine_events();

        egui::TopBottomPanel::top("menu_panel").show(ctx, |ui| {
            self.build_menu_bar(ui, ctx);
        });

        egui::TopBottomPanel::bottom("status_panel").show(ctx, |ui| {
            self.build_status_bar(ui);
        });

        egui::CentralPanel::default().show(ctx, |ui| {
            DockArea::new(&mut self.dock_state)
                .style(Style::from_egui(ui.style().as_ref()))
                .show_leaf_collapse_buttons(false)
                .show_leaf_close_all_buttons(false)
                .show_inside(ui, &mut PlayerTabViewer {
                    registry: &mut self.registry,
                    settings: self.settings.current(),
                });
        });

        self.reap_closed_tabs(ctx);

        if self.settings_dialog.show(ctx, &self.settings) == SettingsDialogAction::Applied {
            self.timed_message = Some(TimedMessage::new(icon_str!(icons::CHECK_CIRCLE, "Settings applied").to_string()));
        }

        if self.show_about_window {
            egui::Window::new("About").open(&mut self.show_about_window).show(ctx, |ui| {
                build_about_window(ui);
            });
        }

        self.show_url_window(ctx);
        self.toasts.show(ctx);

        // The simulated clock only advances when we repaint
        if self.registry.iter().any(|player| player.is_playing()) {
            ctx.request_repaint_after(Duration::from_millis(33));
        } else {
            ctx.request_repaint_after_secs(1.0);
        }
    }

    /// Apply every pending remote command in arrival order and queue replies.
    fn drain_remote_commands(&mut self) {
        while let Ok(inbound) = self.command_rx.try_recv() {
            let (reply, action) = remote::execute_command(&mut self.registry, &inbound.command);
            if let Some(sender) = self.reply_sender.as_ref() {
                sender.send(inbound.source, reply);
            }

            match action {
                Some(UiAction::PlayerOpened(id)) => {
                    self.focus_or_add_tab(id);
                    self.timed_message = Some(TimedMessage::new(format!("{} Remote opened a video", icons::BROADCAST)));
                }
                Some(UiAction::FocusPlayer(id)) => self.focus_or_add_tab(id),
                None => {}
            }
        }
    }

    fn drain_engine_events(&mut self) {
        let mut messages = Vec::new();
        for player in self.registry.iter_mut() {
            let title = player.title().to_string();
            for event in player.poll_engine() {
                match event {
                    EngineEvent::Opened { duration_ms, video_size, frame_rate } => {
                        info!("media opened: {} ({}x{} @ {:.2} fps, {})", title, video_size.0, video_size.1, frame_rate, format_timecode(duration_ms));
                        messages.push(format!("{} Opened {title}", icons::CHECK_CIRCLE));
                    }
                    EngineEvent::EndReached => {
                        debug!("end of media: {}", title);
                    }
                    EngineEvent::Error(reason) => {
                        warn!("media error in {}: {}", title, reason);
                        self.toasts.error(format!("Playback error: {reason}"));
                    }
                }
            }
        }
        if let Some(message) = messages.pop() {
            self.timed_message = Some(TimedMessage::new(message));
        }
    }

    fn build_menu_bar(&mut self, ui: &mut Ui, ctx: &Context) {
        egui::MenuBar::new().ui(ui, |ui| {
            ui.menu_button("File", |ui| {
                if ui.button(icon_str!(icons::FOLDER_OPEN, "Open Video File\u{2026}")).clicked() {
                    ui.close_kind(UiKind::Menu);
                    if let Some(path) = rfd::FileDialog::new().add_filter("Video", &["mp4", "mov", "mkv", "avi", "webm"]).pick_file() {
                        let url = format!("file://{}", path.display());
                        self.open_in_new_player(&url);
                    }
                }
                if ui.button(icon_str!(icons::LINK, "Open URL\u{2026}")).clicked() {
                    self.url_input = Some(String::new());
                    ui.close_kind(UiKind::Menu);
                }
                if ui.button(icon_str!(icons::PLUS, "New Player")).clicked() {
                    let id = self.registry.open();
                    self.focus_or_add_tab(id);
                    ui.close_kind(UiKind::Menu);
                }
                ui.separator();
                if ui.button(icon_str!(icons::GEAR_FINE, "Settings\u{2026}")).clicked() {
                    self.settings_dialog.open(&self.settings.current());
                    ui.close_kind(UiKind::Menu);
                }
                if ui.button("About").clicked() {
                    self.show_about_window = true;
                    ui.close_kind(UiKind::Menu);
                }
                ui.separator();
                if ui.button("Quit").clicked() {
                    self.shutdown(ctx);
                }
            });
        });
    }

    fn build_status_bar(&mut self, ui: &mut Ui) {
        ui.horizontal(|ui| {
            let reset_message = match &self.timed_message {
                Some(timed_message) if !timed_message.is_expired() => {
                    ui.label(timed_message.message.as_str());
                    false
                }
                Some(_) => true,
                None => false,
            };
            if reset_message {
                self.timed_message = None;
            }

            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                match self.endpoint.as_ref() {
                    Some(endpoint) => {
                        ui.label(format!("{} UDP {}", icons::BROADCAST, endpoint.port()));
                    }
                    None => {
                        ui.label(RichText::new(icon_str!(icons::WARNING, "remote control disabled")).color(ui.visuals().warn_fg_color));
                    }
                }
            });
        });
    }

    fn show_url_window(&mut self, ctx: &Context) {
        let Some(url) = self.url_input.as_mut() else {
            return;
        };

        let mut open = true;
        let mut submitted = None;
        let mut cancelled = false;
        egui::Window::new("Open URL").open(&mut open).resizable(false).show(ctx, |ui| {
            let response = ui.add(egui::TextEdit::singleline(url).hint_text("https://\u{2026} or file://\u{2026}").desired_width(320.0));
            let enter = response.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter));
            ui.horizontal(|ui| {
                if (ui.button("Open").clicked() || enter) && !url.trim().is_empty() {
                    submitted = Some(url.trim().to_string());
                }
                if ui.button("Cancel").clicked() {
                    cancelled = true;
                }
            });
        });

        if let Some(url) = submitted {
            self.open_in_new_player(&url);
            self.url_input = None;
        } else if cancelled || !open {
            self.url_input = None;
        }
    }

    fn open_in_new_player(&mut self, url: &str) {
        let id = self.registry.open();
        match self.registry.get_mut(id).and_then(|player| player.open(url)) {
            Ok(()) => {
                self.focus_or_add_tab(id);
            }
            Err(e) => {
                error!("failed to open {}: {}", url, e);
                self.toasts.error(format!("Could not open {url}: {e}"));
                let _ = self.registry.close(id);
            }
        }
    }

    fn focus_or_add_tab(&mut self, id: Uuid) {
        match self.dock_state.find_tab(&id) {
            Some(location) => self.dock_state.set_active_tab(location),
            None => self.dock_state.push_to_focused_leaf(id),
        }
    }

    /// Close registry players whose tabs were closed this frame. Closing the
    /// last one shuts the application down.
    fn reap_closed_tabs(&mut self, ctx: &Context) {
        let open_tabs: Vec<Uuid> = self.dock_state.iter_all_tabs().map(|(_, tab)| *tab).collect();
        let closed: Vec<Uuid> = self.registry.ids().iter().copied().filter(|id| !open_tabs.contains(id)).collect();

        for id in closed {
            debug!("player tab closed: {}", id);
            match self.registry.close(id) {
                Ok(true) => self.shutdown(ctx),
                Ok(false) => {}
                Err(e) => warn!("closing player {}: {}", id, e),
            }
        }
    }

    /// Ordered teardown: stop remote IO first so no command races a released
    /// engine, then release engines, then ask the toolkit to exit.
    fn shutdown(&mut self, ctx: &Context) {
        if self.shutting_down {
            return;
        }
        self.shutting_down = true;
        info!("shutting down");

        self.reply_sender = None;
        if let Some(mut endpoint) = self.endpoint.take() {
            endpoint.close();
        }
        self.registry.release_all();
        ctx.send_viewport_cmd(egui::ViewportCommand::Close);
    }
}

impl eframe::App for BoxfishApp {
    fn update(&mut self, ctx: &egui::Context, frame: &mut eframe::Frame) {
        self.update_impl(ctx, frame);
    }

    fn on_exit(&mut self) {
        // A window-manager close skips the menu path; tear down here too
        self.reply_sender = None;
        if let Some(mut endpoint) = self.endpoint.take() {
            endpoint.close();
        }
        self.registry.release_all();
    }
}

fn build_about_window(ui: &mut egui::Ui) {
    ui.vertical(|ui| {
        ui.label(format!("Boxfish v{}", env!("CARGO_PKG_VERSION")));
        ui.label("A video annotation workstation with UDP remote control.");

        ui.horizontal(|ui| {
            ui.spacing_mut().item_spacing.x = 0.0;
            ui.label("Powered by ");
            ui.hyperlink_to("egui", "https://github.com/emilk/egui");
            ui.label(" and ");
            ui.hyperlink_to("eframe", "https://github.com/emilk/egui/tree/master/crates/eframe");
            ui.label(".");
        });
    });
}
