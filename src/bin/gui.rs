use eframe::egui;
use receipe_editor::{config::CONFIG_FILE, EditorConfig, ReceipeEditorApp};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() -> eframe::Result<()> {
    let (config, config_error) = EditorConfig::load_or_default(CONFIG_FILE);

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_filter)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Receipe Editor");
    if let Some(e) = config_error {
        tracing::warn!("Failed to load config, using defaults: {:#}", e);
    }

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1280.0, 800.0])
            .with_title("Receipe Editor")
            .with_drag_and_drop(true),
        ..Default::default()
    };

    eframe::run_native(
        "Receipe Editor",
        options,
        Box::new(|_cc| {
            let app = ReceipeEditorApp::new(config)?;
            Ok(Box::new(app))
        }),
    )
}
