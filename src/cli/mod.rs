use std::sync::Arc;

use clap::Parser;
use color_eyre::eyre::WrapErr;

use crate::args::Args;
use crate::config;
use crate::gateway::{Gateway, GatewayConfig};
use crate::policy::Policy;

pub fn main() -> crate::Result<()> {
    let args = Args::parse();

    crate::bootstrap(args.log)?;

    tracing::debug!("Parsed arguments: {args:?}");

    // File I/O isn't truly async in Tokio so we might as well do that before we even start the runtime
    let permissions = config::permissions::read(&args.config_dir.join("permissions.toml"))?;

    let policy = permissions.map(|permissions| Arc::new(permissions) as Arc<dyn Policy>);

    let mut runtime = tokio::runtime::Builder::new_multi_thread();

    if let Some(workers) = args.workers {
        runtime.worker_threads(workers.get());
    }

    runtime
        .enable_all()
        .build()
        .wrap_err("error building Tokio runtime")?
        .block_on(main_async(args, policy))
}

async fn main_async(args: Args, policy: Option<Arc<dyn Policy>>) -> crate::Result<()> {
    let mut gateway = Gateway::bind(
        GatewayConfig {
            listen_addr: args.listen_addr,
            broker_addr: args.broker_addr,
            ws_path: args.ws_path,
        },
        policy,
    )
    .await?;

    tokio::select! {
        res = gateway.run() => {
            res?;
        }

        res = tokio::signal::ctrl_c() => {
            res.wrap_err("error from ctrl_c() handler")?;
        }
    }

    tracing::info!(
        "Ctrl-C received; waiting for {} connections to close",
        gateway.connections()
    );

    gateway.shutdown().await
}
