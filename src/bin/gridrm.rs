// Copyright 2025 The NativeLink Authors. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::sync::Arc;

use clap::Parser;
use futures::StreamExt;
use gridrm_config::rm_server::RmConfig;
use gridrm_core::event_bus::spawn_event_listener;
use gridrm_core::events::{EventFilter, EventListener, EventType, InitialState, RmEvent};
use gridrm_core::node_source_manager::NodeSourceManager;
use gridrm_core::ping_monitor::TcpNodeProber;
use gridrm_core::registry::Registry;
use gridrm_core::statistics::RmStatistics;
use gridrm_error::{Code, Error, ResultExt, make_err};
use gridrm_util::init_tracing;
use gridrm_util::shutdown_guard::ShutdownGuard;
use mimalloc::MiMalloc;
#[cfg(target_family = "unix")]
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::oneshot;
use tracing::{Level, event};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Resource manager that keeps track of compute nodes and hands them out
/// to clients.
#[derive(Parser, Debug)]
#[clap(version, about, long_about = None)]
struct Args {
    /// Config file to use.
    #[clap(value_parser)]
    config_file: String,
}

/// Writes every resource manager event to the log.
#[derive(Debug)]
struct EventLogger;

impl EventListener for EventLogger {
    fn initial_state(&mut self, state: &InitialState) {
        event!(
            Level::INFO,
            sequence = state.sequence,
            nodes = state.nodes.len(),
            node_sources = state.sources.len(),
            "Subscribed to resource manager events"
        );
    }

    fn handle(&mut self, rm_event: &RmEvent) {
        event!(Level::INFO, %rm_event, "Resource manager event");
    }
}

async fn inner_main(
    cfg: RmConfig,
    shutdown_rx: oneshot::Receiver<ShutdownGuard>,
) -> Result<(), Error> {
    let global_cfg = cfg.global.unwrap_or_default();
    let registry = Arc::new(Registry::new(&global_cfg));
    let statistics = RmStatistics::new();
    let _event_logger = spawn_event_listener(&registry, EventFilter::all(), EventLogger).await;
    let _statistics_listener =
        spawn_event_listener(&registry, EventFilter::all(), statistics.clone()).await;
    let (_, mut shutdown_events) = registry
        .subscribe(EventFilter::only([EventType::RmShutdown]))
        .await;

    let manager =
        NodeSourceManager::new(registry.clone(), Arc::new(TcpNodeProber), &global_cfg).await;
    for source_cfg in &cfg.node_sources {
        let info = manager
            .create_source(source_cfg)
            .await
            .err_tip(|| format!("Could not create node source {}", source_cfg.name))?;
        event!(
            Level::INFO,
            name = %info.name,
            infrastructure = %info.infrastructure,
            policy = %info.policy,
            ping_frequency = ?info.ping_frequency,
            "Node source created"
        );
    }

    let shutdown_guard = shutdown_rx
        .await
        .map_err(|err| make_err!(Code::Internal, "Shutdown channel failed: {err}"))?;
    event!(Level::WARN, "Shutting down resource manager");
    manager
        .shutdown(false)
        .await
        .err_tip(|| "While shutting down the resource manager")?;
    while let Some(rm_event) = shutdown_events.next().await {
        if rm_event.event_type == EventType::RmShutdown {
            break;
        }
    }
    event!(Level::INFO, statistics = ?statistics.snapshot(), "Resource manager stopped");
    drop(shutdown_guard);
    Ok(())
}

fn get_config(config_file: &str) -> Result<RmConfig, Error> {
    let json_contents = String::from_utf8(
        std::fs::read(config_file).err_tip(|| format!("Could not open config file {config_file}"))?,
    )?;
    Ok(serde_json5::from_str(&json_contents)?)
}

/// Resolves once the process was asked to stop, naming the signal.
#[cfg(target_family = "unix")]
async fn shutdown_signal() -> &'static str {
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(terminate) => terminate,
        Err(err) => {
            event!(Level::ERROR, ?err, "Failed to listen to SIGTERM");
            drop(tokio::signal::ctrl_c().await);
            return "SIGINT";
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => "SIGINT",
        _ = terminate.recv() => "SIGTERM",
    }
}

#[cfg(not(target_family = "unix"))]
async fn shutdown_signal() -> &'static str {
    drop(tokio::signal::ctrl_c().await);
    "SIGINT"
}

fn main() -> Result<(), Box<dyn core::error::Error>> {
    init_tracing()?;

    let args = Args::parse();
    let cfg = get_config(&args.config_file)?;

    #[expect(clippy::disallowed_methods, reason = "starting main runtime")]
    {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;

        // The signal task hands a guard clone to `inner_main`, which drops it
        // once every node source is removed. The task exits after that.
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<ShutdownGuard>();
        let mut shutdown_guard = ShutdownGuard::default();

        let signal_task = runtime.spawn(async move {
            let signal_name = shutdown_signal().await;
            event!(Level::WARN, signal = signal_name, "Process terminated via signal");
            if shutdown_tx.send(shutdown_guard.clone()).is_err() {
                event!(Level::ERROR, "Resource manager was not running");
            }
            shutdown_guard.wait_for_clones().await;
            event!(Level::WARN, "Successfully shut down gridrm.");
            std::process::exit(if signal_name == "SIGINT" { 130 } else { 143 });
        });

        runtime
            .block_on(inner_main(cfg, shutdown_rx))
            .err_tip(|| "main() function failed")?;
        // `inner_main` only returns once shutdown completed, the signal task
        // exits the process with the signal's code.
        runtime
            .block_on(signal_task)
            .err_tip(|| "Signal handler failed")?;
    }
    Ok(())
}
