use std::sync::Arc;

use mailbell::bot::BotApp;
use mailbell::config::Config;
use mailbell::mail::ImapConnector;
use mailbell::redirect;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = Config::from_env()?;

    eprintln!("📬 mailbell v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Poll interval: {:?}", config.poll_interval);
    eprintln!("   OAuth redirect: {}", config.redirect_uri);
    eprintln!("   Callback server: http://{}/oauth2callback\n", config.oauth_listen_addr);

    let _redirect_handle = redirect::spawn(config.oauth_listen_addr).await?;

    let app = BotApp::new(config, Arc::new(ImapConnector));
    app.run().await?;

    Ok(())
}
