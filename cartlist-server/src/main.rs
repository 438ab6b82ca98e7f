//! cartlist server — the single writer of record for the shared list.
//!
//! Configuration comes from the environment (a `.env` file is honored):
//!
//! - `CARTLIST_BIND_ADDR` — listen address (default `127.0.0.1:9090`)
//! - `CARTLIST_DATA_DIR`  — RocksDB directory (default `cartlist_data`)
//! - `RUST_LOG`           — log filter (env_logger)

use log::info;

use cartlist_sync::{ServerConfig, SyncServer};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    env_logger::init();

    let mut config = ServerConfig::default();
    if let Ok(addr) = std::env::var("CARTLIST_BIND_ADDR") {
        config.bind_addr = addr;
    }
    if let Ok(dir) = std::env::var("CARTLIST_DATA_DIR") {
        config.storage_path = dir.into();
    }

    info!(
        "starting cartlist server on {} (data: {})",
        config.bind_addr,
        config.storage_path.display()
    );

    let server = SyncServer::new(config)?;
    server.run().await
}
