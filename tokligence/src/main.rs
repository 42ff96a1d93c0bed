use args::Args;
use clap::Parser;
use tokio_util::sync::CancellationToken;

mod args;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = config::Config::load(&args.config)?;

    let listen_address = args
        .listen_address
        .or(config.server.listen_address)
        .unwrap_or_else(|| "127.0.0.1:8080".parse().expect("valid default address"));

    let shutdown_signal = CancellationToken::new();

    {
        let shutdown_signal = shutdown_signal.clone();

        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                shutdown_signal.cancel();
            }
        });
    }

    server::serve(server::ServeConfig {
        listen_address,
        config,
        shutdown_signal,
        log_filter: args.log_filter,
        version: VERSION.to_string(),
        bound_addr_sender: None,
    })
    .await
}
