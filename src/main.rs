#![warn(clippy::all, rust_2018_idioms)]
#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")] // hide console window on Windows in release

fn main() -> eframe::Result<()> {
    #[cfg(feature = "logging")]
    let _log_guard = init_logging();

    let native_options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1024.0, 720.0])
            .with_min_inner_size([640.0, 480.0])
            .with_title(format!("{} v{}", boxfish::APP_NAME, env!("CARGO_PKG_VERSION")))
            .with_drag_and_drop(true),
        ..Default::default()
    };

    eframe::run_native(boxfish::APP_NAME, native_options, Box::new(|cc| Ok(Box::new(boxfish::BoxfishApp::new(cc)))))
}

#[cfg(feature = "logging")]
fn init_logging() -> tracing_appender::non_blocking::WorkerGuard {
    use tracing_appender::rolling::Rotation;
    use tracing_subscriber::Layer;
    use tracing_subscriber::filter::LevelFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::fmt::time::LocalTime;
    use tracing_subscriber::layer::SubscriberExt;

    let log_dir = eframe::storage_dir(boxfish::APP_NAME).unwrap_or_else(|| std::path::PathBuf::from("."));
    let file_appender = tracing_appender::rolling::Builder::new()
        .rotation(Rotation::HOURLY)
        .max_log_files(2)
        .filename_prefix("boxfish.log")
        .build(log_dir)
        .expect("failed to build file appender");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let subscriber = tracing_subscriber::registry()
        .with(fmt::Layer::new().with_ansi(true).with_filter(LevelFilter::DEBUG))
        .with(
            fmt::Layer::new()
                .with_writer(non_blocking)
                .with_timer(LocalTime::rfc_3339())
                .with_ansi(false)
                .with_filter(LevelFilter::DEBUG),
        );
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    guard
}
