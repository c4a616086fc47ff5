use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use log::{debug, error, info, warn};

use netspeedtray::config::{self, AppConfig};
use netspeedtray::net::{
    ControllerConfig, CounterSampler, DisplaySpeed, InterfaceSelector, SamplerMessage,
    SpeedController, interface_addrs,
};
use netspeedtray::{HistoryStore, SessionRing, SessionSample, StoreEvent, app_dirs, logging};

/// How often the primary interface is re-resolved in `auto` mode.
const PRIMARY_REFRESH_TICKS: u64 = 60;
/// Maintenance cadence once the startup pass completed.
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(3_600);

fn main() {
    let exit_code = match run() {
        Ok(()) => 0,
        Err(err) => {
            // The logger may not exist yet; stderr is the fallback.
            eprintln!("netspeedtray: {err:#}");
            error!("fatal: {err:#}");
            1
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<()> {
    let data_dir = app_dirs::ensure_data_dir()?;
    let _logger = logging::init(&data_dir)?;

    match netspeedtray::single_instance::acquire()? {
        netspeedtray::single_instance::InstanceOutcome::Primary(_guard) => {
            info!("starting NetSpeedTray (data dir: {})", data_dir.display());
            run_primary(&data_dir, _guard)
        }
        netspeedtray::single_instance::InstanceOutcome::AlreadyRunning => {
            anyhow::bail!("another NetSpeedTray instance is already running");
        }
    }
}

fn run_primary(
    data_dir: &std::path::Path,
    _instance_guard: netspeedtray::single_instance::InstanceGuard,
) -> Result<()> {
    let config_path = data_dir.join(app_dirs::CONFIG_FILENAME);
    let config = config::load_config(&config_path);
    config::save_config(&config_path, &config)
        .with_context(|| format!("failed to persist config to {}", config_path.display()))?;

    let (store_events_tx, store_events_rx) = mpsc::channel();
    let store = Arc::new(HistoryStore::open(
        data_dir.join(app_dirs::DB_FILENAME),
        Some(store_events_tx),
    ));
    thread::Builder::new()
        .name("nst-store-events".to_string())
        .spawn(move || {
            for event in store_events_rx {
                match event {
                    StoreEvent::DatabaseUpdated => debug!("history database updated"),
                    StoreEvent::Degraded(reason) => {
                        warn!("history store degraded: {reason}");
                    }
                }
            }
        })
        .ok();

    let session = Arc::new(SessionRing::with_settings(
        config.history_minutes,
        config.update_rate,
    ));

    let stop = Arc::new(AtomicBool::new(false));

    // Sampler -> controller pipeline.
    let (sampler_tx, sampler_rx) = mpsc::sync_channel(8);
    let sampler = CounterSampler::start(config.update_rate, sampler_tx);

    let controller_handle = {
        let store = store.clone();
        let session = session.clone();
        let config = config.clone();
        let stop = stop.clone();
        thread::Builder::new()
            .name("nst-controller".to_string())
            .spawn(move || controller_loop(&sampler_rx, &store, &session, &config, &stop))
            .context("failed to spawn controller thread")?
    };

    // Periodic maintenance, with one pass right after startup.
    let maintenance_handle = {
        let store = store.clone();
        let retention_days = config.keep_data;
        let stop = stop.clone();
        thread::Builder::new()
            .name("nst-maintenance".to_string())
            .spawn(move || {
                store.run_maintenance(retention_days);
                let mut last_run = Instant::now();
                while !stop.load(Ordering::SeqCst) {
                    thread::sleep(Duration::from_millis(500));
                    if last_run.elapsed() >= MAINTENANCE_INTERVAL {
                        last_run = Instant::now();
                        store.run_maintenance(retention_days);
                    }
                }
            })
            .context("failed to spawn maintenance thread")?
    };

    #[cfg(windows)]
    run_widget_shell(&config, &stop)?;

    #[cfg(not(windows))]
    {
        // Headless: the pipeline runs until the process is terminated.
        info!("running headless (non-Windows host); pipeline active");
        while !stop.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_secs(1));
        }
    }

    // Shutdown: stop the producers first, then flush.
    stop.store(true, Ordering::SeqCst);
    sampler.stop();
    let _ = controller_handle.join();
    let _ = maintenance_handle.join();
    match Arc::try_unwrap(store) {
        Ok(store) => store.shutdown(),
        Err(_) => warn!("history store still shared at shutdown"),
    }
    info!("shutdown complete");
    Ok(())
}

fn controller_loop(
    sampler_rx: &mpsc::Receiver<SamplerMessage>,
    store: &HistoryStore,
    session: &SessionRing,
    config: &AppConfig,
    stop: &AtomicBool,
) {
    let selector = InterfaceSelector::new(
        config.interface_mode,
        config.selected_interfaces.clone(),
        config.excluded_interfaces.clone(),
    );
    let mut controller = SpeedController::new(
        ControllerConfig {
            interval_s: config.update_rate,
            ..ControllerConfig::default()
        },
        selector,
    );
    let display_config = config.clone();
    let mut tick = 0u64;

    while !stop.load(Ordering::SeqCst) {
        let message = match sampler_rx.recv_timeout(Duration::from_millis(200)) {
            Ok(message) => message,
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        };
        let snapshot = match message {
            SamplerMessage::Snapshot(snapshot) => snapshot,
            SamplerMessage::Fatal(reason) => {
                error!("sampler died: {reason}");
                break;
            }
        };

        tick += 1;
        if tick == 1 || tick % PRIMARY_REFRESH_TICKS == 0 {
            let networks = sysinfo::Networks::new_with_refreshed_list();
            let addrs = interface_addrs(&networks);
            controller.selector_mut().refresh_primary(&addrs);
        }

        if config.paused {
            continue;
        }

        let epoch = snapshot.epoch_seconds;
        let session_sink = |speed: DisplaySpeed| {
            session.push(SessionSample {
                epoch_seconds: epoch,
                upload_bps: speed.upload_mbps * 1e6 / 8.0,
                download_bps: speed.download_mbps * 1e6 / 8.0,
            });
            let (up_text, down_text) =
                netspeedtray::display::format_speeds(speed, &display_config);
            push_display_text(&up_text, &down_text);
        };
        controller.process(&snapshot, &session_sink);

        for batch in controller.take_due_batches(snapshot.monotonic_s) {
            if !store.enqueue_persist(batch.clone()) {
                controller.requeue_refused(batch);
            }
        }
    }

    // Final flush so a clean exit loses nothing.
    for batch in controller.drain_all() {
        let _ = store.enqueue_persist(batch);
    }
}

#[cfg(windows)]
fn push_display_text(up_text: &str, down_text: &str) {
    widget_shell::update_speed_text(up_text, down_text);
}

#[cfg(not(windows))]
fn push_display_text(up_text: &str, down_text: &str) {
    debug!("speeds: up {up_text}, down {down_text}");
}

#[cfg(windows)]
fn run_widget_shell(config: &AppConfig, stop: &Arc<AtomicBool>) -> Result<()> {
    widget_shell::run(config, stop)
}

#[cfg(windows)]
mod widget_shell {
    //! Minimal widget window plus the integrator and event-pump threads.

    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;
    use std::sync::mpsc;
    use std::thread;

    use anyhow::Result;

    use netspeedtray::config::AppConfig;
    use netspeedtray::taskbar::integrator::IntegratorLoop;
    use netspeedtray::taskbar::position::PositionConfig;
    use netspeedtray::taskbar::visibility::{RefreshEngine, RefreshSettings};
    use netspeedtray::taskbar::widget_window::{self, SpeedWindow, WindowSurface};
    use netspeedtray::taskbar::{events, win};

    pub(super) fn update_speed_text(up_text: &str, down_text: &str) {
        widget_window::update_speed_text(up_text, down_text);
    }

    pub(super) fn run(config: &AppConfig, stop: &Arc<AtomicBool>) -> Result<()> {
        let window = SpeedWindow::create()?;
        let widget_hwnd = window.hwnd();

        let (trigger_tx, trigger_rx) = mpsc::channel();
        let (pump_id_tx, pump_id_rx) = mpsc::channel();
        let pump_handle = thread::Builder::new()
            .name("nst-events".to_string())
            .spawn(move || {
                let _ = pump_id_tx.send(events::current_thread_id());
                events::run_event_pump(trigger_tx, widget_hwnd);
            })?;
        let pump_thread_id = pump_id_rx.recv().ok();

        let settings = RefreshSettings {
            free_move: config.free_move,
            keep_visible_fullscreen: config.keep_visible_fullscreen,
            position: PositionConfig {
                tray_offset_x: config.tray_offset_x,
                tray_offset_y: config.tray_offset_y,
            },
        };
        let integrator_stop = stop.clone();
        let integrator_handle = thread::Builder::new()
            .name("nst-integrator".to_string())
            .spawn(move || {
                let mut looper = IntegratorLoop::new(RefreshEngine::new(settings));
                let mut probe = win::ShellProbe { widget_hwnd };
                let mut surface = WindowSurface::new(widget_hwnd);
                looper.run(&trigger_rx, &mut probe, &mut surface, &integrator_stop);
            })?;

        // Blocks until the window receives WM_QUIT (tray exit / session end).
        window.run_message_loop();

        stop.store(true, std::sync::atomic::Ordering::SeqCst);
        if let Some(thread_id) = pump_thread_id {
            events::post_quit(thread_id);
        }
        let _ = integrator_handle.join();
        let _ = pump_handle.join();
        Ok(())
    }
}
