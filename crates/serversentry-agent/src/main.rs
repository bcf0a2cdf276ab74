//! ServerSentry monitoring agent: loads configuration, wires the store,
//! scheduler, rule evaluators and notification dispatcher together, and
//! runs until a shutdown signal.

mod composite_rules;
mod config_adapter;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serversentry_bus::EventBus;
use serversentry_core::{init_tracing, ConfigLoader};
use serversentry_notify::NotificationDispatcher;
use serversentry_scheduler::{SamplerRegistry, Scheduler};
use tokio::sync::watch;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = match ConfigLoader::load(config_path.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("failed to load configuration: {err}");
            std::process::exit(1);
        }
    };

    init_tracing(&config.system.log_level);
    info!(plugins = ?config.plugins.enabled, "starting serversentry agent");

    let store = serversentry_store::Store::new(config.store.data_directory.clone(), config.store.max_points);
    if let Err(err) = store.init().await {
        error!(error = %err, "failed to initialize time-series store");
        std::process::exit(1);
    }

    let samplers = SamplerRegistry::with_builtins();
    let plugins = config_adapter::build_plugin_specs(&config);
    let anomaly_config = config_adapter::build_anomaly_config(&config);

    let composite_rules = if config.composite_checks.enabled {
        composite_rules::load(&config.composite_checks.config_directory)
    } else {
        Vec::new()
    };

    let bus = EventBus::default();
    let hostname = hostname();

    let channels = config_adapter::build_channel_map(&config);
    let dispatcher = Arc::new(NotificationDispatcher::new(hostname, channels));
    if config.notifications.enabled {
        if let Err(err) = dispatcher.validate_channels() {
            error!(error = %err, "invalid notification channel configuration");
            std::process::exit(1);
        }
    }

    let scheduler = Arc::new(Scheduler::new(
        store,
        samplers,
        anomaly_config,
        config.anomaly_detection.enabled,
        composite_rules.clone(),
        bus.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let check_timeout = Duration::from_secs(config.system.check_timeout);

    let scheduler_handle = {
        let scheduler = Arc::clone(&scheduler);
        let shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move { scheduler.run(plugins, check_timeout, shutdown_rx).await })
    };

    let dispatch_handle = {
        let dispatcher = Arc::clone(&dispatcher);
        let bus = bus.clone();
        let channel_names = config.notifications.channels.clone();
        let notifications_enabled = config.notifications.enabled;
        let default_cooldown = config.composite_checks.cooldown_default;
        let composite_rules = composite_rules.clone();
        let mut shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = bus.recv() => {
                        if !notifications_enabled {
                            continue;
                        }
                        let now = event.timestamp();
                        for channel_name in &channel_names {
                            let cooldown = config_adapter::cooldown_for(&event, default_cooldown, &composite_rules);
                            dispatcher.dispatch(&event, channel_name, now, cooldown).await;
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    };

    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to install ctrl-c handler, shutting down immediately");
    }
    info!("shutdown signal received, draining workers");
    let _ = shutdown_tx.send(true);

    let _ = scheduler_handle.await;
    let _ = dispatch_handle.await;
    info!("serversentry agent shut down cleanly");
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "unknown-host".to_string())
}
