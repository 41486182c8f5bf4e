use clap::Parser;
use secrecy::SecretString;

use args::Args;

mod args;
mod logger;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    logger::init(&args.log);

    let settings = server::Settings {
        upstream_url: args.upstream_url,
        upstream_api_key: args.upstream_api_key.map(SecretString::from),
        source: args.source,
        client_dialect: args.provider,
    };

    let router = server::router(settings)?;

    let address = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    log::info!(
        "transllm proxy listening on {address} ({} clients -> {} upstream)",
        args.provider,
        args.source
    );

    axum::serve(listener, router).await?;

    Ok(())
}
