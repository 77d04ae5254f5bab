use color_eyre::eyre;
use color_eyre::eyre::WrapErr;
pub use color_eyre::eyre::{Error, Result};

use crate::args::LogFormat;

pub mod args;
pub mod cli;
pub mod config;
pub mod gateway;
pub mod mqtt;
pub mod policy;

pub fn bootstrap(log_format: LogFormat) -> Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        // Don't die if the file doesn't exist.
        if !e.not_found() {
            return Err(e).context("error reading `.env` file");
        }
    }

    // Enables capturing backtraces on stable
    color_eyre::install()?;

    // `try_init()` returns a boxed error that `eyre::Report` has no `From` impl for.
    let res = match log_format {
        LogFormat::Full => tracing_subscriber::fmt::try_init(),
        LogFormat::Compact => tracing_subscriber::fmt().compact().try_init(),
        LogFormat::Pretty => tracing_subscriber::fmt().pretty().try_init(),
        LogFormat::Json => tracing_subscriber::fmt().json().try_init(),
    };

    res.map_err(|e| eyre::eyre!(e))
        .wrap_err("error initializing tracing subscriber")?;

    Ok(())
}
