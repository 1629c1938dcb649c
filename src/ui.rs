pub mod player_tab;
pub mod settings_dialog;
