use std::{net::SocketAddr, sync::Arc};

use tokio::{net::TcpListener, sync::watch};
use tracing::{info, warn};

use cvb_core::{
    bot::{BotSettings, ConvertBot, Ports},
    config::Config,
    errors::Error,
};
use cvb_http::AppState;
use cvb_kick::{KickClient, KickOAuth, OAuthSettings};
use cvb_rates::ExchangeRateClient;
use cvb_store::SqliteCredentialStore;

#[tokio::main]
async fn main() -> Result<(), cvb_core::Error> {
    cvb_core::logging::init("cvb")?;

    let cfg = Config::load()?;

    let store = Arc::new(SqliteCredentialStore::open(&cfg.database_url)?);
    let oauth = Arc::new(KickOAuth::new(
        OAuthSettings::new(
            cfg.kick_client_id.clone(),
            cfg.kick_client_secret.clone(),
            cfg.kick_redirect_uri.clone(),
            cfg.kick_auth_base.clone(),
        ),
        cfg.http_timeout,
    )?);
    let kick = Arc::new(KickClient::new(cfg.kick_api_base.clone(), cfg.http_timeout)?);
    let rates = Arc::new(ExchangeRateClient::new(
        cfg.rates_api_base.clone(),
        cfg.http_timeout,
    )?);

    let bot = Arc::new(ConvertBot::new(
        Ports {
            store,
            auth: oauth.clone(),
            platform: kick,
            rates,
        },
        BotSettings {
            refresh_buffer: cfg.token_refresh_buffer,
            refresh_interval: cfg.token_refresh_interval,
            dedup_ttl: cfg.dedup_ttl,
            dedup_sweep_interval: cfg.dedup_sweep_interval,
        },
    ));

    bot.bootstrap().await?;
    let tasks = bot.start_background_tasks();

    let web_listener = TcpListener::bind(SocketAddr::new(cfg.bind_address, cfg.web_port)).await?;
    let webhook_listener =
        TcpListener::bind(SocketAddr::new(cfg.bind_address, cfg.webhook_port)).await?;

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutdown requested"),
            Err(e) => warn!(error = %e, "cannot listen for ctrl-c, shutting down"),
        }
        let _ = stop_tx.send(true);
    });

    let web = cvb_http::serve(
        "web",
        web_listener,
        cvb_http::web_router(AppState::new(bot.clone(), oauth)),
        stopped(stop_rx.clone()),
    );
    let webhook = cvb_http::serve(
        "webhook",
        webhook_listener,
        cvb_http::webhook_router(bot.clone()),
        stopped(stop_rx),
    );

    let served = tokio::try_join!(web, webhook);
    tasks.stop().await;
    served.map_err(|e| Error::External(format!("http server failed: {e}")))?;

    info!("convert bot stopped");
    Ok(())
}

async fn stopped(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}
