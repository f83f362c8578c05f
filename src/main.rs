use anyhow::{Context, Result};
use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use tokio::signal;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

use rtsp_relay::config;
use rtsp_relay::server::rtsp_server::{RtspServer, RtspServerConfig};

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::fmt()
        .with_env_filter(filter)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_file(true)
        .init();
}

#[derive(Parser, Debug)]
#[command(name = "rtsp-relay", version = "0.1.0", about = "RTSP rendezvous server")]
struct Cli {
    #[arg(long, default_value = "config.toml", help = "配置文件路径")]
    config: String,

    #[arg(long, help = "监听IP")]
    ip: Option<String>,

    #[arg(long, help = "RTSP控制端口")]
    port: Option<u16>,

    #[arg(long, help = "最大连接数")]
    max_connections: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let args = Cli::parse();
    let settings = config::init(Some(&args.config))?;

    let server_cfg = &settings.server;
    let bind_ip: IpAddr = args
        .ip
        .as_deref()
        .unwrap_or(&server_cfg.bind_ip)
        .parse()
        .context("invalid bind IP")?;
    let rtsp_port = args.port.unwrap_or(server_cfg.rtsp_port);

    let config = RtspServerConfig {
        rtsp_addr: SocketAddr::new(bind_ip, rtsp_port),
        rtp_addr: SocketAddr::new(bind_ip, server_cfg.rtp_port),
        rtcp_addr: SocketAddr::new(bind_ip, server_cfg.rtcp_port),
        max_connections: args.max_connections.unwrap_or(server_cfg.max_connections),
    };

    let server = RtspServer::new(config);

    tokio::select! {
        res = server.run() => {
            res?;
        }
        _ = signal::ctrl_c() => {
            info!("shutting down server");
            server.shutdown();
        }
    }

    Ok(())
}
