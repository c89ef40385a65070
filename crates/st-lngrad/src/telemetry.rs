// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use std::io::IsTerminal;
use std::sync::OnceLock;

use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

static INIT_GUARD: OnceLock<Result<(), InitError>> = OnceLock::new();

/// Errors emitted when configuring the tracing subscriber.
#[derive(Clone, Debug, thiserror::Error)]
pub enum InitError {
    #[error("a global tracing subscriber is already installed")]
    AlreadyInstalled,
}

/// Installs a `RUST_LOG`-filtered fmt subscriber (default `info`).
///
/// Safe to call repeatedly; a subscriber installed by the host application
/// wins and is left in place.
pub fn init_tracing() {
    let result = INIT_GUARD.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_ansi(std::io::stderr().is_terminal())
            .with_writer(std::io::stderr);
        Registry::default()
            .with(filter)
            .with(fmt_layer)
            .try_init()
            .map_err(|_| InitError::AlreadyInstalled)
    });

    if let Err(err) = result {
        warn!("st-lngrad tracing not installed: {err}");
    }
}
