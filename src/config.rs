use anyhow::Context;
use clap::Args;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::risk::{RiskWindows, DEFAULT_ATTENDANCE_WINDOW_DAYS, DEFAULT_RESULT_WINDOW_DAYS};

/// Window lengths shared by every scoring command.
#[derive(Args, Debug, Clone)]
pub struct WindowArgs {
    /// Calendar days of attendance that count towards the attendance rate
    #[arg(
        long,
        global = true,
        env = "ACADEMIC_RISK_ATTENDANCE_WINDOW_DAYS",
        default_value_t = DEFAULT_ATTENDANCE_WINDOW_DAYS
    )]
    pub attendance_window_days: i64,
    /// Calendar days an exam stays recent after it was created
    #[arg(
        long,
        global = true,
        env = "ACADEMIC_RISK_RESULT_WINDOW_DAYS",
        default_value_t = DEFAULT_RESULT_WINDOW_DAYS
    )]
    pub result_window_days: i64,
}

impl WindowArgs {
    pub fn windows(&self) -> anyhow::Result<RiskWindows> {
        RiskWindows::new(self.attendance_window_days, self.result_window_days)
            .context("invalid scoring window")
    }
}

pub fn database_url() -> anyhow::Result<String> {
    std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")
}

/// Logs go to stderr so JSON printed on stdout stays parseable. `RUST_LOG`
/// overrides `default_level`.
pub fn init_logging(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();
}
