use std::error::Error;
use std::sync::Arc;

use env_logger::Env;
use log::{info, warn};
use melanoma_serve::{
    MongoStore, PredictionService, ResultStore, SavedModelClassifier, Settings,
};

mod error;
mod routes;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let settings = Settings::from_env();

    // No model, no service: a missing artifact aborts startup.
    let classifier =
        SavedModelClassifier::from_candidates(&settings.model_paths, settings.signature.clone())?;

    let store = MongoStore::connect(&settings.mongodb_uri, &settings.mongodb_db).await?;
    if let Err(e) = store.ensure_collection().await {
        warn!(
            "Could not prepare collection in '{}', predictions will not be saved until the store is reachable: {}",
            settings.mongodb_db, e
        );
    }

    let service = Arc::new(PredictionService::new(Arc::new(classifier), Arc::new(store)));
    let app = routes::create_router(service);

    let addr = format!("{}:{}", settings.host, settings.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Melanoma detection API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Could not listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
