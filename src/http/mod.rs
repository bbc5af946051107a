//! Debug HTTP server surfaced only in `debug_http` feature builds.
//!
//! This module spawns a lightweight Axum server that exposes health,
//! Prometheus metrics, the latest feature frame and an SSE telemetry stream.
//! It reads published frames through its own `Subscriber`; it never touches
//! producer state.

#[cfg(feature = "debug_http")]
mod metrics;
#[cfg(feature = "debug_http")]
mod routes;
#[cfg(feature = "debug_http")]
mod sse;

use crate::publish::Subscriber;

#[cfg(feature = "debug_http")]
pub use routes::{build_router, run_http_server, DebugHttpState};

#[cfg(feature = "debug_http")]
use log::{error, info, warn};
#[cfg(feature = "debug_http")]
use std::net::SocketAddr;
#[cfg(feature = "debug_http")]
use std::sync::atomic::{AtomicBool, Ordering};
#[cfg(feature = "debug_http")]
use std::thread;

#[cfg(feature = "debug_http")]
static SERVER_STARTED: AtomicBool = AtomicBool::new(false);

#[cfg(feature = "debug_http")]
const DEFAULT_ADDR: &str = "127.0.0.1:8787";

/// Spawn the debug HTTP server when the feature flag is enabled.
///
/// Binds `LIGHTWAVE_DEBUG_HTTP_ADDR` (default 127.0.0.1:8787) on a dedicated
/// thread with its own tokio runtime. Returns false when the server was not
/// started.
pub fn spawn_if_enabled(frames: Option<Subscriber>) -> bool {
    #[cfg(feature = "debug_http")]
    {
        if SERVER_STARTED
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("[DebugHttp] Server already running");
            return false;
        }

        let addr: SocketAddr = std::env::var("LIGHTWAVE_DEBUG_HTTP_ADDR")
            .unwrap_or_else(|_| DEFAULT_ADDR.to_string())
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], 8787)));

        let spawned = thread::Builder::new()
            .name("lightwave-debug-http".into())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_multi_thread()
                    .worker_threads(2)
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(err) => {
                        error!("[DebugHttp] Failed to build tokio runtime: {}", err);
                        return;
                    }
                };

                info!("[DebugHttp] Binding {}", addr);
                runtime.block_on(async move {
                    let state = DebugHttpState::new(frames);
                    if let Err(err) = run_http_server(state, addr).await {
                        error!("[DebugHttp] Server stopped: {:#}", err);
                    }
                });
            });

        if let Err(err) = spawned {
            error!("[DebugHttp] Failed to spawn server thread: {}", err);
            SERVER_STARTED.store(false, Ordering::SeqCst);
            return false;
        }
        true
    }

    #[cfg(not(feature = "debug_http"))]
    {
        // Debug HTTP server disabled in this build.
        drop(frames);
        false
    }
}
