use anyhow::{Context, Result};
use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use crate::registry::Registry;
use crate::session::track::TrackFlow;

/// UDP接收缓冲区, 与RTP最大报文同量级
const RECV_BUF_LEN: usize = 2048;

/// UDP中继入口
///
/// 启动时在固定端口绑定RTP/RTCP两个监听socket; 入流按来源地址解复用
/// 到推流连接的track, 出流由注册表从同一对socket发出。
pub struct UdpRelay {
    rtp: Arc<UdpSocket>,
    rtcp: Arc<UdpSocket>,
}

impl UdpRelay {
    pub async fn bind(rtp_addr: SocketAddr, rtcp_addr: SocketAddr) -> Result<Self> {
        let rtp = Arc::new(
            UdpSocket::bind(rtp_addr)
                .await
                .with_context(|| format!("failed to bind RTP listener on {}", rtp_addr))?,
        );
        let rtcp = Arc::new(
            UdpSocket::bind(rtcp_addr)
                .await
                .with_context(|| format!("failed to bind RTCP listener on {}", rtcp_addr))?,
        );
        info!("UDP relay listening on {} (RTP) / {} (RTCP)", rtp_addr, rtcp_addr);
        Ok(Self { rtp, rtcp })
    }

    /// 把socket对装入注册表并启动两个监听任务
    pub fn spawn(&self, registry: Arc<Registry>, shutdown: CancellationToken) {
        registry.install_udp(self.rtp.clone(), self.rtcp.clone());

        for (socket, flow) in [
            (self.rtp.clone(), TrackFlow::Rtp),
            (self.rtcp.clone(), TrackFlow::Rtcp),
        ] {
            let registry = registry.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                listen_loop(socket, flow, registry, shutdown).await;
            });
        }
    }
}

/// 单个UDP监听循环
///
/// 任务串行处理报文, 同一track同一流向的转发顺序与到达顺序一致。
async fn listen_loop(
    socket: Arc<UdpSocket>,
    flow: TrackFlow,
    registry: Arc<Registry>,
    shutdown: CancellationToken,
) {
    let mut buf = BytesMut::with_capacity(RECV_BUF_LEN);

    loop {
        buf.resize(RECV_BUF_LEN, 0);

        let (len, source) = tokio::select! {
            _ = shutdown.cancelled() => {
                debug!(?flow, "udp listener stopped");
                break;
            }
            received = socket.recv_from(&mut buf[..]) => match received {
                Ok(pair) => pair,
                Err(err) => {
                    error!(?flow, "udp recv error: {}", err);
                    break;
                }
            },
        };

        if len == 0 {
            buf.clear();
            continue;
        }

        buf.truncate(len);
        let payload = buf.split().freeze();

        match registry.locate_udp_source(flow, source) {
            Some((path, track_id)) => {
                registry.forward(&path, track_id, flow, &payload);
            }
            None => {
                // 未知来源, 静默丢弃
                trace!(?flow, %source, len, "dropping datagram from unknown source");
            }
        }
    }
}
