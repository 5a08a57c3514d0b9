use anyhow::Context;
use dotenv::dotenv;
use montage_core::ServerConfig;
use std::env;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init();

    let media_host_url = env::var("MEDIA_HOST_URL").context("MEDIA_HOST_URL must be set")?;
    let media_host_key = env::var("MEDIA_HOST_KEY").ok();
    let mongo_uri = env::var("MONGO_URI").ok();
    let bind = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8787".to_string());
    let folder_root = env::var("MEDIA_FOLDER_ROOT").unwrap_or_else(|_| "montage".to_string());

    let config = ServerConfig {
        bind,
        media_host_url,
        media_host_key,
        mongo_uri,
        folder_root,
    };

    montage_server::serve(config)
        .await
        .context("upload endpoint failed")?;

    Ok(())
}
