//! Assembler host
//!
//! Loads every plugin from the configured directory, reports what was
//! published and, with hot-reload enabled, keeps reloading changed plugins
//! until interrupted.
//!
//! Run with: cargo run --bin assembler -- plugins/

use ae_runtime::{Engine, RuntimeConfig};

fn main() {
    let (config, warnings) = RuntimeConfig::load();

    // Initialize logging
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.log_level.as_str())
    ).init();

    log::info!("Assembler runtime v{}", env!("CARGO_PKG_VERSION"));
    if let Some(path) = &config.config_path {
        log::info!("Loaded config from {}", path.display());
    }
    for warning in &warnings {
        log::warn!("Configuration: {}", warning);
    }

    let mut engine = match Engine::new(&config) {
        Ok(engine) => engine,
        Err(e) => {
            log::error!("Failed to create engine: {}", e);
            std::process::exit(1);
        }
    };

    let report = engine.load_plugins(&config.plugin_dir);
    for (path, error) in &report.failed {
        log::warn!("Skipped {}: {}", path.display(), error);
    }
    log::info!(
        "{} plugin(s) loaded, {} interface(s) published: {}",
        report.loaded.len(),
        engine.api().api_names().len(),
        engine.api().api_names().join(", ")
    );

    if config.hot_reload.enabled {
        run_until_interrupted(&mut engine, &config);
    }

    log::info!("Shutting down...");
    engine.shutdown();
}

#[cfg(feature = "hot-reload")]
fn run_until_interrupted(engine: &mut Engine, config: &RuntimeConfig) {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    if let Err(e) = engine.enable_hot_reload(config) {
        log::error!("Failed to enable hot-reload: {}", e);
        return;
    }

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        log::info!("Received Ctrl+C, shutting down...");
        r.store(false, Ordering::SeqCst);
    }) {
        log::warn!("Failed to set Ctrl+C handler: {}", e);
    }

    log::info!("Watching plugins. Press Ctrl+C to exit.");

    while running.load(Ordering::SeqCst) {
        for report in engine.update() {
            log::info!(
                "Reloaded '{}' (generation {}), re-fetch: {}",
                report.name,
                report.generation,
                report.stale_apis.join(", ")
            );
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}

#[cfg(not(feature = "hot-reload"))]
fn run_until_interrupted(_engine: &mut Engine, _config: &RuntimeConfig) {
    log::warn!("Hot-reload requested but this build has no hot-reload support");
}
