//! Host runner
//!
//! Loads a device configuration, builds the preferences backend and drives
//! the application loop until Ctrl-C.

use anyhow::{Context, Result};
use esph_config::{BackendKind, DeviceConfig, PreferencesConfig};
use esph_core::{Application, SystemClock};
use esph_preferences::flash::MemoryFlash;
use esph_preferences::{
    FilePreferences, FlashSectorPreferences, IntervalSyncer, MemoryNvs, MemoryPreferences,
    NvsPreferences, Preferences, RtcFlashPreferences, RtcMemory,
};
use std::rc::Rc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

fn build_preferences(config: &PreferencesConfig) -> Result<Rc<dyn Preferences>> {
    let preferences: Rc<dyn Preferences> = match config.backend {
        BackendKind::Memory => Rc::new(MemoryPreferences::new()),
        BackendKind::File => {
            let path = config
                .path
                .as_ref()
                .context("preferences.path is required for the file backend")?;
            let store = FilePreferences::open(path)
                .with_context(|| format!("failed to open preferences file {}", path.display()))?;
            Rc::new(store)
        }
        BackendKind::Nvs => {
            warn!("NVS backend is simulated in memory on the host");
            Rc::new(NvsPreferences::new(MemoryNvs::new()))
        }
        BackendKind::RtcFlash => {
            warn!("RTC+flash backend is simulated in memory on the host");
            Rc::new(RtcFlashPreferences::new(RtcMemory::new(), MemoryFlash::new(1), 0))
        }
        BackendKind::FlashSector => {
            warn!("Flash sector backend is simulated in memory on the host");
            Rc::new(FlashSectorPreferences::new(MemoryFlash::new(1), 0))
        }
    };
    Ok(preferences)
}

fn build_application(config: &DeviceConfig) -> Result<Application> {
    let app = Application::new(config.name.clone(), Rc::new(SystemClock::new()));
    let preferences = build_preferences(&config.preferences)?;
    app.register_component(Rc::new(IntervalSyncer::new(
        preferences,
        config.preferences.flash_write_interval,
        app.scheduler(),
    )));
    Ok(app)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => DeviceConfig::load(&path)
            .with_context(|| format!("failed to load configuration from {}", path))?,
        None => DeviceConfig::default(),
    };

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!(
        "Starting '{}' with {} preferences",
        config.name, config.preferences.backend
    );

    let app = build_application(&config)?;
    app.setup();

    let mut ticker = tokio::time::interval(Duration::from_millis(u64::from(config.loop_interval)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => app.loop_once(),
            result = &mut shutdown => {
                result?;
                break;
            }
        }
    }

    app.shutdown();
    info!("Stopped after {} loop iterations", app.loop_count());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use esph_preferences::PreferencesExt;
    use tempfile::TempDir;

    fn prefs_config(backend: BackendKind) -> PreferencesConfig {
        PreferencesConfig {
            backend,
            ..PreferencesConfig::default()
        }
    }

    #[test]
    fn test_every_backend_builds() {
        for backend in [
            BackendKind::Memory,
            BackendKind::Nvs,
            BackendKind::RtcFlash,
            BackendKind::FlashSector,
        ] {
            let preferences = build_preferences(&prefs_config(backend)).unwrap();
            let pref = preferences.make_preference::<u32>(7);
            assert!(pref.save(&42u32), "{}", backend);
            assert!(preferences.sync(), "{}", backend);
        }
    }

    #[test]
    fn test_file_backend_requires_path() {
        assert!(build_preferences(&prefs_config(BackendKind::File)).is_err());
    }

    #[test]
    fn test_shutdown_flushes_file_preferences() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("device.prefs");
        let config = DeviceConfig {
            preferences: PreferencesConfig {
                backend: BackendKind::File,
                path: Some(path.clone()),
                flash_write_interval: None,
            },
            ..DeviceConfig::default()
        };

        let app = build_application(&config).unwrap();
        app.setup();
        app.loop_once();
        assert_eq!(app.component_count(), 1);
        app.shutdown();

        // Nothing was saved, so the syncer had nothing to write
        assert!(!path.exists());

        let store = FilePreferences::open(&path).unwrap();
        let pref = store.make_preference::<u16>(1);
        assert!(pref.save(&9u16));
        assert!(store.sync());
        assert!(path.exists());
    }
}
