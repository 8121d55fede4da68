use std::sync::Arc;
use std::thread;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use hub_rtc::config::Settings;
use hub_rtc::router::Router;
use hub_rtc::transport::rtc::RtcEngine;
use hub_rtc::util::select_host_address;
use hub_rtc::{signaling, task_loop};

fn init_log(settings: &Settings) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| settings.log_filter().into()),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::parse();
    init_log(&settings);

    let host_addr =
        select_host_address().ok_or_else(|| anyhow!("found no usable network interface"))?;
    let engine = RtcEngine::bind(host_addr, settings.rtc_port, settings.public_ip)
        .context("binding the media socket")?;
    info!("Media on udp://{}", engine.advertised_addr());

    let (tasks, task_loop) = task_loop::channel();
    let router = Router::new(settings.router_config(), Arc::new(engine), tasks.clone());
    thread::Builder::new()
        .name("task-loop".into())
        .spawn(move || task_loop.run(router))
        .context("spawning the task loop")?;

    let addr = settings.signaling_addr();
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding signaling listener on {addr}"))?;
    info!("Signaling on ws://{}", addr);

    tokio::select! {
        _ = signaling::serve(listener, tasks) => {}
        result = tokio::signal::ctrl_c() => {
            result.context("waiting for shutdown signal")?;
            info!("Shutting down");
        }
    }

    Ok(())
}
