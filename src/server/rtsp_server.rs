use anyhow::{Context, Result};
use bytes::BytesMut;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config;
use crate::registry::{Registry, RelayFrame};
use crate::rtsp::{RtspMessage, RtspParser, RtspResponse, RtspSplitter};
use crate::server::udp_relay::UdpRelay;
use crate::session::io::{SharedTcpWriter, TcpWriter};
use crate::session::rtsp_session::{Outcome, RtspSession, error_response};
use crate::session::state::{RtspError, SessionState};
use crate::session::track::{StreamProtocol, channel_to_track};

#[derive(Debug, Clone)]
pub struct RtspServerConfig {
    pub rtsp_addr: SocketAddr,
    pub rtp_addr: SocketAddr,
    pub rtcp_addr: SocketAddr,
    pub max_connections: usize,
}

impl Default for RtspServerConfig {
    fn default() -> Self {
        let cfg = config::get();
        let bind_ip: IpAddr = cfg
            .server
            .bind_ip
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        Self {
            rtsp_addr: SocketAddr::new(bind_ip, cfg.server.rtsp_port),
            rtp_addr: SocketAddr::new(bind_ip, cfg.server.rtp_port),
            rtcp_addr: SocketAddr::new(bind_ip, cfg.server.rtcp_port),
            max_connections: cfg.server.max_connections,
        }
    }
}

/// RTSP 服务
///
/// 负责监听与接入: TCP accept循环 + UDP中继监听, 每个连接一个任务。
pub struct RtspServer {
    config: RtspServerConfig,
    registry: Arc<Registry>,
    /// 活跃连接计数器
    connection_counter: Arc<AtomicUsize>,
    shutdown: CancellationToken,
}

impl RtspServer {
    pub fn new(config: RtspServerConfig) -> Self {
        Self {
            config,
            registry: Arc::new(Registry::new()),
            connection_counter: Arc::new(AtomicUsize::new(0)),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    /// 服务初始化并启动
    pub async fn run(&self) -> Result<()> {
        info!("starting RTSP server on {}", self.config.rtsp_addr);

        let listener = TcpListener::bind(self.config.rtsp_addr)
            .await
            .with_context(|| format!("failed to bind to {}", self.config.rtsp_addr))?;

        let relay = UdpRelay::bind(self.config.rtp_addr, self.config.rtcp_addr).await?;
        relay.spawn(self.registry.clone(), self.shutdown.clone());

        info!("RTSP server listening on {}", self.config.rtsp_addr);

        loop {
            let accepted = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            let (mut socket, addr) = match accepted {
                Ok(pair) => pair,
                Err(err) => {
                    error!("accept error: {}", err);
                    continue;
                }
            };

            let current = self.connection_counter.fetch_add(1, Ordering::Relaxed) + 1;
            if current > self.config.max_connections {
                warn!(
                    "max connections reached: {}. rejecting {}",
                    self.config.max_connections, addr
                );
                let response = b"RTSP/1.0 503 Service Unavailable\r\n\r\n";
                if let Err(err) = socket.write_all(response).await {
                    debug!("failed to send 503 to {}: {}", addr, err);
                }
                self.connection_counter.fetch_sub(1, Ordering::Relaxed);
                continue;
            }

            let registry = self.registry.clone();
            let counter = self.connection_counter.clone();
            tokio::spawn(async move {
                handle_connection(socket, addr, registry).await;
                let remaining = counter.fetch_sub(1, Ordering::Relaxed).saturating_sub(1);
                debug!("connection {} closed, {} active", addr, remaining);
            });
        }

        // 停机: 广播关闭信号, 每个连接在下一个挂起点退出并走各自的关闭路径
        self.registry.close_all();
        info!("RTSP server stopped");
        Ok(())
    }

    /// 停止accept并关闭所有连接
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.registry.close_all();
    }
}

/// 连接的中继阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RelayMode {
    /// 收发RTSP请求
    Command,
    /// PLAY后的TCP读端: 入流(RTCP回执等)照单丢弃
    DiscardTcp,
    /// RECORD后的TCP推端: 交错帧入流转发
    RecordTcp,
}

/// 单连接驱动循环
///
/// 读请求 -> 状态机 -> 写响应 -> 按Outcome切换中继阶段。
/// 握手阶段读写超时致命; 进入PLAY/RECORD后控制面允许静默,
/// 读超时只用来复查关闭信号。
async fn handle_connection(socket: TcpStream, addr: SocketAddr, registry: Arc<Registry>) {
    let cfg = config::get();
    let read_timeout = Duration::from_secs(cfg.session.read_timeout_secs);
    let write_timeout = Duration::from_secs(cfg.session.write_timeout_secs);

    let peer_ip = addr.ip();
    let (mut read_half, write_half) = socket.into_split();
    let writer = SharedTcpWriter::new(TcpWriter::new(write_half, write_timeout));

    let (client_id, close_token) = registry.register(peer_ip);
    let mut session = RtspSession::new(client_id, registry.clone());
    let mut splitter = RtspSplitter::new();
    let mut buf = BytesMut::with_capacity(4096);
    let mut mode = RelayMode::Command;

    info!(client = %client_id, %addr, "connected");

    'conn: loop {
        // 先排空缓冲里已经完整的消息
        loop {
            let message = match splitter.decode_message(&mut buf) {
                Ok(Some(message)) => message,
                Ok(None) => break,
                Err(err) => match mode {
                    RelayMode::Command => {
                        warn!(client = %client_id, "malformed message: {:?}", err);
                        let response =
                            error_response(RtspError::MalformedMessage, session.last_cseq());
                        let _ = write_response(&writer, &response).await;
                        break 'conn;
                    }
                    RelayMode::RecordTcp => {
                        // 帧边界失步后无法继续安全转发
                        warn!(client = %client_id, "interleaved stream desynced: {:?}", err);
                        break 'conn;
                    }
                    RelayMode::DiscardTcp => {
                        // 入流本来就被忽略, 丢掉重来
                        buf.clear();
                        break;
                    }
                },
            };

            match (mode, message) {
                (RelayMode::Command, RtspMessage::Request(request)) => {
                    debug!(client = %client_id, method = %request.method, uri = %request.uri, "request");

                    match session.handle_request(&request) {
                        Ok(Outcome::Respond(response)) => {
                            if write_response(&writer, &response).await.is_err() {
                                break 'conn;
                            }
                        }
                        Ok(Outcome::RespondThenPlay(response)) => {
                            // 先写200, 再进PLAY; 任何媒体字节都不会跑到响应前面
                            if write_response(&writer, &response).await.is_err() {
                                break 'conn;
                            }
                            let egress = if session.protocol() == Some(StreamProtocol::Tcp) {
                                let (tx, rx) = mpsc::channel(cfg.session.send_queue_capacity);
                                tokio::spawn(egress_loop(
                                    writer.clone(),
                                    rx,
                                    close_token.clone(),
                                ));
                                Some(tx)
                            } else {
                                None
                            };
                            if session.begin_play(egress).is_err() {
                                break 'conn;
                            }
                            info!(
                                client = %client_id,
                                path = session.path().unwrap_or(""),
                                tracks = session.track_count(),
                                protocol = %session.protocol().map(|p| p.to_string()).unwrap_or_default(),
                                "is receiving"
                            );
                            if session.protocol() == Some(StreamProtocol::Tcp) {
                                mode = RelayMode::DiscardTcp;
                            }
                        }
                        Ok(Outcome::RespondThenRecord(response)) => {
                            if write_response(&writer, &response).await.is_err() {
                                break 'conn;
                            }
                            if session.begin_record().is_err() {
                                break 'conn;
                            }
                            info!(
                                client = %client_id,
                                path = session.path().unwrap_or(""),
                                tracks = session.track_count(),
                                protocol = %session.protocol().map(|p| p.to_string()).unwrap_or_default(),
                                "is publishing"
                            );
                            if session.protocol() == Some(StreamProtocol::Tcp) {
                                mode = RelayMode::RecordTcp;
                            }
                        }
                        Ok(Outcome::RespondAuthFailure(response)) => {
                            let _ = write_response(&writer, &response).await;
                            break 'conn;
                        }
                        Ok(Outcome::Close) => {
                            debug!(client = %client_id, "teardown");
                            break 'conn;
                        }
                        Err(err) => {
                            debug!(client = %client_id, ?err, "request rejected");
                            let response = error_response(err, session.last_cseq());
                            let _ = write_response(&writer, &response).await;
                            break 'conn;
                        }
                    }
                }

                (RelayMode::Command, RtspMessage::Interleaved { .. }) => {
                    warn!(client = %client_id, "interleaved frame outside RECORD");
                    break 'conn;
                }

                (RelayMode::Command, RtspMessage::Response(_)) => {
                    warn!(client = %client_id, "unexpected RTSP response from client");
                }

                (RelayMode::RecordTcp, RtspMessage::Interleaved { channel, payload }) => {
                    let (track_id, flow) = channel_to_track(channel);
                    if track_id >= session.track_count() {
                        warn!(client = %client_id, channel, "invalid interleaved channel");
                        break 'conn;
                    }
                    if let Some(path) = session.path() {
                        registry.forward(path, track_id, flow, &payload);
                    }
                }

                (RelayMode::RecordTcp, _) => {
                    // RECORD期间混入的控制消息按帧边界消费后丢弃
                }

                (RelayMode::DiscardTcp, _) => {
                    // PLAY之后的TCP连接只用于出流, 入流全部忽略
                }
            }
        }

        tokio::select! {
            _ = close_token.cancelled() => {
                debug!(client = %client_id, "close signal");
                break;
            }
            read = timeout(read_timeout, read_half.read_buf(&mut buf)) => match read {
                Err(_) => {
                    if matches!(session.state(), SessionState::Play | SessionState::Record) {
                        continue;
                    }
                    debug!(client = %client_id, "read timeout");
                    break;
                }
                Ok(Ok(0)) => {
                    debug!(client = %client_id, "peer closed");
                    break;
                }
                Ok(Ok(_)) => {}
                Ok(Err(err)) => {
                    debug!(client = %client_id, "read error: {}", err);
                    break;
                }
            }
        }
    }

    registry.close(client_id);
    {
        let mut guard = writer.acquire().await;
        if let Err(err) = guard.shutdown().await {
            debug!(client = %client_id, "tcp shutdown error: {}", err);
        }
    }
    info!(client = %client_id, %addr, "disconnected");
}

/// 把响应头与报文体串行写到socket
async fn write_response(writer: &SharedTcpWriter, response: &RtspResponse) -> io::Result<()> {
    let head = RtspParser::build_response(response);
    let mut guard = writer.acquire().await;
    guard.write(head.as_bytes()).await?;
    if !response.body.is_empty() {
        guard.write(&response.body).await?;
    }
    Ok(())
}

/// TCP读端出流任务: 串行消费队列并写交错帧
///
/// 写失败时通知连接关闭; 队列发送端随注册表条目移除而掉落, 任务随之退出。
async fn egress_loop(
    writer: SharedTcpWriter,
    mut frames: mpsc::Receiver<RelayFrame>,
    close: CancellationToken,
) {
    while let Some(frame) = frames.recv().await {
        let mut guard = writer.acquire().await;
        if let Err(err) = guard.write_interleaved(frame.channel, &frame.payload).await {
            debug!("egress write failed: {}", err);
            close.cancel();
            break;
        }
    }
}
