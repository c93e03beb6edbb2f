#![forbid(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::todo)]
#![warn(clippy::panic)]
#![warn(clippy::dbg_macro)]
#![warn(clippy::print_stdout)]
#![warn(clippy::print_stderr)]
#![warn(clippy::clone_on_ref_ptr)]
#![warn(unreachable_pub)]
#![warn(missing_debug_implementations)]
#![warn(unused_qualifications)]
#![deny(unused_must_use)]

pub mod api;
pub mod config;
pub mod error;
pub mod services;
pub mod telemetry;

use crate::api::{HookChain, RequestHook, ServiceContainer};
use crate::config::Config;
use axum::Router;
use tokio::sync::watch;

/// Wires configuration, services and instrumentation into a router.
#[derive(Debug)]
pub struct AppBuilder {
    config: Config,
    hooks: HookChain,
}

impl AppBuilder {
    /// Starts from the standard instrumentation chain.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self { config, hooks: HookChain::standard() }
    }

    /// Replaces the instrumentation chain entirely.
    #[must_use]
    pub fn with_hooks(mut self, hooks: HookChain) -> Self {
        self.hooks = hooks;
        self
    }

    /// Appends a hook after the ones already configured.
    #[must_use]
    pub fn with_hook(mut self, hook: impl RequestHook + 'static) -> Self {
        self.hooks = self.hooks.with(hook);
        self
    }

    #[must_use]
    pub fn build(self) -> Router {
        let services = ServiceContainer::new(&self.config);
        api::app_router(&self.config, services, self.hooks)
    }
}

/// Flips `shutdown_tx` to `true` on Ctrl+C or SIGTERM.
pub fn spawn_signal_handler(shutdown_tx: watch::Sender<bool>) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            () = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating graceful shutdown");
            }
            () = terminate => {
                tracing::info!("Received SIGTERM, initiating graceful shutdown");
            }
        }

        let _ = shutdown_tx.send(true);
    });
}

/// Routes panics through tracing so they reach the log pipeline.
pub fn setup_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        let location = info.location().map(|l| format!("{}:{}", l.file(), l.line())).unwrap_or_default();
        let payload = info
            .payload()
            .downcast_ref::<&str>()
            .map(ToString::to_string)
            .or_else(|| info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_default();

        tracing::error!(panic.location = %location, panic.message = %payload, "Panic occurred");
    }));
}
