mod cloud;
mod config;
mod cube_map;
mod filter;
mod geometry;
mod mapper;
mod matcher;
mod ws;

use std::future::IntoFuture;
use std::path::Path;
use std::sync::Arc;
use std::thread;

use log::{error, info};
use socketioxide::SocketIo;
use tokio::net::TcpListener;

use crate::config::MapperConfig;
use crate::mapper::{Core, Mapper};
use crate::ws::{ChannelSink, WebsocketState};

#[tokio::main]
async fn main() {
    env_logger::init();

    let config = match std::env::args().nth(1) {
        Some(path) => match MapperConfig::load(Path::new(&path)) {
            Ok(config) => config,
            Err(err) => {
                error!("{err}");
                std::process::exit(1);
            }
        },
        None => MapperConfig::default(),
    };
    info!("starting with {config:?}");

    let core = Arc::new(Core::new());
    let (output_tx, output_rx) = tokio::sync::mpsc::unbounded_channel();

    let (layer, io) = SocketIo::builder()
        .with_state(WebsocketState { core: core.clone() })
        .build_layer();
    io.ns("/", ws::handler);
    tokio::spawn(ws::broadcast_outputs(io, output_rx));

    let driver_core = core.clone();
    let driver_config = config.clone();
    let driver = thread::spawn(move || {
        let mut sink = ChannelSink::new(output_tx);
        Mapper::new(driver_config).run(&driver_core, &mut sink);
    });

    let app = axum::Router::new().layer(layer);
    let listener = match TcpListener::bind(&config.bind_addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!("failed to bind {}: {err}", config.bind_addr);
            std::process::exit(1);
        }
    };
    info!("listening on {}", config.bind_addr);

    tokio::select! {
        result = axum::serve(listener, app).into_future() => {
            if let Err(err) = result {
                error!("server error: {err}");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
        }
    }

    core.request_shutdown();
    // the driver finishes its frame and writes the map out
    if driver.join().is_err() {
        error!("driver thread panicked");
    }
}
