//! cadence-sync: keep a realtime session open and log what it synchronizes.

use cadence_client::error::ClientError;
use cadence_client::telemetry::init_tracing;
use cadence_client::{CadenceClient, ClientConfig, ConnectionState};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

const EMAIL_ENV: &str = "CADENCE_EMAIL";
const PASSWORD_ENV: &str = "CADENCE_PASSWORD";

#[tokio::main]
async fn main() -> Result<(), ClientError> {
    let config = ClientConfig::load()?;
    init_tracing(&config.log)?;

    let client = CadenceClient::new(config)?;
    info!(
        product = ?client.config().product,
        endpoint = %client.config().ws_endpoint,
        "Starting cadence-sync"
    );

    if client.rest().auth().reader().usable_access_token().is_none() {
        match (std::env::var(EMAIL_ENV), std::env::var(PASSWORD_ENV)) {
            (Ok(email), Ok(password)) => client.login(&email, &password).await?,
            _ => warn!("No usable session; set {EMAIL_ENV} and {PASSWORD_ENV} to sign in"),
        }
    }

    client.connection().on_event(|event| {
        info!(kind = %event.kind, "Event");
    });

    let mut toasts = client.notifications().subscribe();
    tokio::spawn(async move {
        loop {
            match toasts.recv().await {
                Ok(toast) => info!(level = ?toast.level, message = %toast.message, "Toast"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Toast log lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut state = client.connection().watch_state();
    tokio::spawn(async move {
        while state.changed().await.is_ok() {
            let current = state.borrow_and_update().clone();
            match current {
                ConnectionState::AuthRejected | ConnectionState::Unauthenticated => {
                    warn!(state = ?current, "Session needs re-authentication")
                }
                other => info!(state = ?other, "Connection state"),
            }
        }
    });

    client.connect();

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    client.close().await;
    let stats = client.cache().stats();
    info!(
        hits = stats.hits,
        misses = stats.misses,
        invalidations = stats.invalidations,
        "Cache stats"
    );
    Ok(())
}
