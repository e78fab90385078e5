//! Standalone confirmation endpoint. Checkout sessions live in the storefront process
//! that embeds the library; this binary holds none, so every confirmation it receives
//! is applied to the commerce backend directly.

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use tokio::signal;
use tracing::info;

use storefront_checkout as checkout;
use checkout::clients::{HttpCommerceClient, HttpPaymentGateway};
use checkout::services::checkout::{CheckoutBackends, CheckoutServices, CheckoutSettings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = checkout::config::load_config().context("failed to load configuration")?;
    checkout::config::init_tracing(&cfg.log_level, cfg.log_json);

    let commerce = Arc::new(
        HttpCommerceClient::new(
            &cfg.commerce_api_url,
            cfg.commerce_api_key.clone(),
            cfg.http_timeout(),
        )
        .context("failed to build commerce client")?,
    );
    let gateway = Arc::new(
        HttpPaymentGateway::new(
            &cfg.payment_api_url,
            cfg.payment_api_key.clone(),
            cfg.http_timeout(),
        )
        .context("failed to build payment gateway client")?,
    );

    let (event_sender, event_rx) = checkout::events::EventSender::channel(cfg.event_channel_capacity);
    tokio::spawn(checkout::events::process_events(event_rx));

    let services = CheckoutServices::new(
        CheckoutSettings::from_config(&cfg),
        CheckoutBackends {
            coupons: commerce.clone(),
            zones: commerce.clone(),
            orders: commerce,
            payments: gateway,
        },
        event_sender,
    );

    if cfg.webhook_secret().is_none() {
        info!("Payment webhook secret not configured; signature verification disabled");
    }
    let state = checkout::webhooks::WebhookState::from_config(services.registry(), &cfg);
    let app = checkout::webhooks::router(state);

    let host: std::net::IpAddr = cfg
        .host
        .parse()
        .with_context(|| format!("invalid host {}", cfg.host))?;
    let addr = SocketAddr::new(host, cfg.port);
    info!("checkout-server listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
