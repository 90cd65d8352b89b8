use std::sync::Arc;

use axum::{Extension, Json, Router, routing::get};
use url::Url;

use l402_core::types::Secret;
use l402_toll::axum::{dashboard, prometheus};
use l402_toll::wallet::RemoteWalletClient;
use l402_toll::{Price, RouteConfig, TollBooth, TollConfig, TollReceipt};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let wallet_url: Url = std::env::var("WALLET_URL")
        .expect("WALLET_URL not set")
        .parse()
        .expect("Invalid WALLET_URL");
    let secret = match std::env::var("TOLL_SECRET") {
        Ok(hex) => Secret::from_hex(&hex).expect("Invalid TOLL_SECRET"),
        Err(_) => Secret::generate(),
    };

    let booth = TollBooth::new(
        TollConfig::builder()
            .secret(secret)
            .on_payment(Arc::new(|event| {
                tracing::info!(
                    payment_hash = %event.payment_hash,
                    amount_sats = event.amount_sats,
                    endpoint = %event.endpoint,
                    "invoice settled"
                );
            }))
            .build(),
        RemoteWalletClient::from_url(wallet_url),
    );

    let app = Router::new()
        .route(
            "/api/joke",
            get(joke).layer(booth.toll(
                RouteConfig::builder()
                    .price(Price::Fixed(5))
                    .free_requests(3)
                    .free_window("1h")
                    .build(),
            )),
        )
        .route("/toll/dashboard", get(dashboard::<RemoteWalletClient>))
        .route("/toll/metrics", get(prometheus::<RemoteWalletClient>))
        .with_state(booth.clone());

    tracing::info!("Listening on http://0.0.0.0:3020");
    let listener = tokio::net::TcpListener::bind("0.0.0.0:3020").await.unwrap();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await
    .unwrap();

    booth.close();
}

async fn joke(Extension(receipt): Extension<TollReceipt>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "joke": "Why did the node close the channel? Too many hops.",
        "paid": receipt.paid,
    }))
}
