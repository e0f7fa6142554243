//! HTTP control surface command (`appforge serve`).

use anyhow::Result;

use appforge::config::AppforgeConfig;
use appforge::server::{ServerConfig, start_server};

pub async fn cmd_serve(config: AppforgeConfig, port: Option<u16>, dev: bool) -> Result<()> {
    let server = ServerConfig {
        port: port.unwrap_or(config.server.port),
        dev_mode: dev,
    };
    start_server(config, server).await
}
