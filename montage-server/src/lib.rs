pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

use std::sync::Arc;

use montage_core::{
    HttpMediaHost, MediaHost, MediaStore, MemorySessionStore, MongoStore, Result, ServerConfig,
    SessionStore,
};

pub use error::ApiError;
pub use routes::build_router;
pub use state::ApiState;

/// Wires up the injected collaborators from configuration. With no
/// database configured the endpoint still hosts files: sessions fall
/// back to process memory and metadata persistence is skipped.
pub async fn bootstrap(config: &ServerConfig) -> Result<ApiState> {
    let media_host: Arc<dyn MediaHost> = Arc::new(HttpMediaHost::new(
        config.media_host_url.as_str(),
        config.media_host_key.clone(),
    ));

    let (records, sessions): (Option<Arc<dyn MediaStore>>, Arc<dyn SessionStore>) =
        match &config.mongo_uri {
            Some(uri) => {
                let store = MongoStore::new(uri).await?;
                (Some(Arc::new(store.clone())), Arc::new(store))
            }
            None => {
                log::warn!(
                    "no MONGO_URI configured; metadata persistence disabled, upload sessions in memory"
                );
                (None, Arc::new(MemorySessionStore::new()))
            }
        };

    Ok(ApiState {
        media_host,
        records,
        sessions,
        folder_root: config.folder_root.clone(),
    })
}

pub async fn serve(config: ServerConfig) -> Result<()> {
    let state = bootstrap(&config).await?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind).await?;
    log::info!("upload endpoint listening on {}", config.bind);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    Ok(())
}
