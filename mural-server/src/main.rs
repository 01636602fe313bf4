//! Mural server — standalone room server binary.
//!
//! Usage: `mural-server [BIND_ADDR] [DATA_DIR]`
//!
//! With no arguments the server listens on 127.0.0.1:9090 and keeps all
//! state in memory. Passing a data directory enables RocksDB persistence
//! for room records and chat history.

use log::info;

use mural_collab::server::{RoomServer, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let bind_addr = args
        .next()
        .unwrap_or_else(|| "127.0.0.1:9090".to_string());
    let data_dir = args.next();

    let server = match data_dir {
        Some(path) => {
            info!("Starting with persistence at {path}");
            RoomServer::with_storage(bind_addr, path)
        }
        None => {
            info!("Starting in-memory (no persistence)");
            RoomServer::new(ServerConfig {
                bind_addr,
                ..ServerConfig::default()
            })
        }
    };

    server.run().await
}
