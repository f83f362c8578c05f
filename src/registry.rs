use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use bytes::Bytes;
use once_cell::sync::OnceCell;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::session::state::{RtspError, RtspResult, SessionState};
use crate::session::track::{StreamProtocol, Track, TrackFlow, track_to_channel};

/// 发往TCP读端的交错帧
#[derive(Debug, Clone)]
pub struct RelayFrame {
    pub channel: u8,
    pub payload: Bytes,
}

/// 连接标识, 进程内唯一
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 注册表中每个连接的共享可见状态
///
/// 所有字段都在注册表的读写锁之下; 连接任务自己持有一份镜像用于
/// 方法合法性判断, 每次状态迁移都经由注册表操作在写锁内复核。
struct ClientEntry {
    peer_ip: IpAddr,
    state: SessionState,
    path: Option<String>,
    protocol: Option<StreamProtocol>,
    tracks: Vec<Track>,
    /// 推流端的SDP原始字节, DESCRIBE时原样转发
    sdp_text: Option<Bytes>,
    /// 推流端SDP中的media条目数, track数量上限
    media_count: usize,
    /// PLAY状态TCP读端的发送队列
    egress: Option<mpsc::Sender<RelayFrame>>,
    /// 关闭信号, 推流端掉线级联或服务停机时触发
    close: CancellationToken,
    /// 发送队列溢出丢帧计数
    dropped_frames: AtomicU64,
}

#[derive(Default)]
struct Inner {
    clients: HashMap<ClientId, ClientEntry>,
    publishers: HashMap<String, ClientId>,
}

struct UdpEgress {
    rtp: Arc<UdpSocket>,
    rtcp: Arc<UdpSocket>,
}

/// 进程级注册表 (路径 -> 推流端, 连接集合) 与转发扇出
///
/// 单把读写锁覆盖全部共享状态: 查找与扇出走读锁, 状态迁移走写锁。
/// 扇出在读锁内只做非阻塞发送 (UDP try_send_to / 有界队列 try_send),
/// 写锁内不做任何IO。
pub struct Registry {
    inner: RwLock<Inner>,
    /// 服务端UDP监听socket对, 启动时装入, 读端UDP出流从对应监听socket发出
    udp: OnceCell<UdpEgress>,
    next_id: AtomicU64,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            udp: OnceCell::new(),
            next_id: AtomicU64::new(0),
        }
    }

    /// 装入UDP监听socket对 (RTP, RTCP), 只生效一次
    pub fn install_udp(&self, rtp: Arc<UdpSocket>, rtcp: Arc<UdpSocket>) {
        let _ = self.udp.set(UdpEgress { rtp, rtcp });
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// 新连接注册, 返回连接ID与关闭信号
    pub fn register(&self, peer_ip: IpAddr) -> (ClientId, CancellationToken) {
        let id = ClientId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let close = CancellationToken::new();
        let entry = ClientEntry {
            peer_ip,
            state: SessionState::Starting,
            path: None,
            protocol: None,
            tracks: Vec::new(),
            sdp_text: None,
            media_count: 0,
            egress: None,
            close: close.clone(),
            dropped_frames: AtomicU64::new(0),
        };
        self.write().clients.insert(id, entry);
        (id, close)
    }

    /// 连接关闭, 幂等
    ///
    /// 若该连接是其路径上的推流端, 同时解除推流绑定, 并向同路径上的
    /// 其余连接广播关闭信号。信号在释放写锁之后触发, 避免在持锁状态
    /// 下重入关闭逻辑。
    pub fn close(&self, id: ClientId) -> bool {
        let cascade: Vec<CancellationToken>;
        {
            let mut inner = self.write();
            let Some(entry) = inner.clients.remove(&id) else {
                return false;
            };

            let mut tokens = Vec::new();
            if let Some(path) = entry.path.as_deref() {
                if inner.publishers.get(path) == Some(&id) {
                    inner.publishers.remove(path);
                    for other in inner.clients.values() {
                        if other.path.as_deref() == Some(path) {
                            tokens.push(other.close.clone());
                        }
                    }
                }
            }
            cascade = tokens;
        }

        if !cascade.is_empty() {
            debug!(client = %id, readers = cascade.len(), "publisher gone, closing readers");
        }
        for token in cascade {
            token.cancel();
        }
        true
    }

    /// 停机: 向所有连接广播关闭信号
    pub fn close_all(&self) {
        let tokens: Vec<CancellationToken> = {
            let inner = self.read();
            inner.clients.values().map(|c| c.close.clone()).collect()
        };
        for token in tokens {
            token.cancel();
        }
    }

    /// DESCRIBE查询: 路径上推流端的SDP快照
    pub fn describe(&self, path: &str) -> Option<Bytes> {
        let inner = self.read();
        let publisher = inner.publishers.get(path)?;
        inner.clients.get(publisher)?.sdp_text.clone()
    }

    /// ANNOUNCE: 竞争推流权
    pub fn announce(
        &self,
        id: ClientId,
        path: &str,
        sdp_text: Bytes,
        media_count: usize,
    ) -> RtspResult<()> {
        let mut inner = self.write();
        if inner.publishers.contains_key(path) {
            return Err(RtspError::PathTaken);
        }

        let entry = inner.clients.get_mut(&id).ok_or(RtspError::Closed)?;
        if entry.state != SessionState::Starting {
            return Err(RtspError::WrongState);
        }

        entry.path = Some(path.to_string());
        entry.sdp_text = Some(sdp_text);
        entry.media_count = media_count;
        entry.state = SessionState::Announce;
        inner.publishers.insert(path.to_string(), id);
        Ok(())
    }

    /// 拉流SETUP: 追加track并进入PRE_PLAY
    ///
    /// 要求路径上存在推流端; 同一连接协议不可混用, track数量不得超过
    /// 推流端SDP的media数, 路径绑定后不可更换。
    pub fn setup_reader(
        &self,
        id: ClientId,
        path: &str,
        protocol: StreamProtocol,
        track: Track,
    ) -> RtspResult<usize> {
        let mut inner = self.write();

        let publisher = *inner.publishers.get(path).ok_or(RtspError::NoPublisher)?;
        let media_count = inner
            .clients
            .get(&publisher)
            .map(|p| p.media_count)
            .ok_or(RtspError::NoPublisher)?;

        let entry = inner.clients.get_mut(&id).ok_or(RtspError::Closed)?;
        if !matches!(entry.state, SessionState::Starting | SessionState::PrePlay) {
            return Err(RtspError::WrongState);
        }
        if let Some(bound) = entry.path.as_deref() {
            if bound != path {
                return Err(RtspError::PathChanged);
            }
        }
        if entry.protocol.is_some_and(|p| p != protocol) {
            return Err(RtspError::ProtocolMismatch);
        }
        if entry.tracks.len() >= media_count {
            return Err(RtspError::TracksExhausted);
        }

        entry.path = Some(path.to_string());
        entry.protocol = Some(protocol);
        entry.tracks.push(track);
        entry.state = SessionState::PrePlay;
        Ok(entry.tracks.len() - 1)
    }

    /// 推流SETUP: 追加track并进入PRE_RECORD
    ///
    /// TCP时客户端可以提案interleaved通道对, 提案必须等于新track的
    /// 期望值 (2k, 2k+1)。
    pub fn setup_publisher(
        &self,
        id: ClientId,
        path: &str,
        protocol: StreamProtocol,
        track: Track,
        proposed_interleaved: Option<(u8, u8)>,
    ) -> RtspResult<usize> {
        let mut inner = self.write();

        let entry = inner.clients.get_mut(&id).ok_or(RtspError::Closed)?;
        if !matches!(entry.state, SessionState::Announce | SessionState::PreRecord) {
            return Err(RtspError::WrongState);
        }
        if entry.path.as_deref() != Some(path) {
            return Err(RtspError::PathChanged);
        }
        if entry.protocol.is_some_and(|p| p != protocol) {
            return Err(RtspError::ProtocolMismatch);
        }
        if entry.tracks.len() >= entry.media_count {
            return Err(RtspError::TracksExhausted);
        }

        if protocol == StreamProtocol::Tcp {
            let expected = (
                track_to_channel(entry.tracks.len(), TrackFlow::Rtp),
                track_to_channel(entry.tracks.len(), TrackFlow::Rtcp),
            );
            if proposed_interleaved.is_some_and(|p| p != expected) {
                return Err(RtspError::InvalidInterleaved);
            }
        }

        entry.protocol = Some(protocol);
        entry.tracks.push(track);
        entry.state = SessionState::PreRecord;
        Ok(entry.tracks.len() - 1)
    }

    /// PLAY前置校验: 推流端仍在且所有track已SETUP
    pub fn check_play(&self, id: ClientId) -> RtspResult<()> {
        let inner = self.read();
        let entry = inner.clients.get(&id).ok_or(RtspError::Closed)?;
        if entry.state != SessionState::PrePlay {
            return Err(RtspError::WrongState);
        }

        let path = entry.path.as_deref().ok_or(RtspError::WrongState)?;
        let publisher = inner.publishers.get(path).ok_or(RtspError::NoPublisher)?;
        let media_count = inner
            .clients
            .get(publisher)
            .map(|p| p.media_count)
            .ok_or(RtspError::NoPublisher)?;

        if entry.tracks.len() != media_count {
            return Err(RtspError::TracksNotReady);
        }
        Ok(())
    }

    /// 进入PLAY
    ///
    /// 在PLAY响应写出之后才调用, 保证读端在200 OK之前收不到任何媒体字节。
    pub fn begin_play(
        &self,
        id: ClientId,
        egress: Option<mpsc::Sender<RelayFrame>>,
    ) -> RtspResult<()> {
        let mut inner = self.write();
        let entry = inner.clients.get_mut(&id).ok_or(RtspError::Closed)?;
        if entry.state != SessionState::PrePlay {
            return Err(RtspError::WrongState);
        }
        entry.state = SessionState::Play;
        entry.egress = egress;
        Ok(())
    }

    /// PAUSE: PLAY回退到PRE_PLAY, 摘除出流队列
    pub fn pause(&self, id: ClientId) -> RtspResult<()> {
        let mut inner = self.write();
        let entry = inner.clients.get_mut(&id).ok_or(RtspError::Closed)?;
        if entry.state != SessionState::Play {
            return Err(RtspError::WrongState);
        }
        entry.state = SessionState::PrePlay;
        entry.egress = None;
        Ok(())
    }

    /// RECORD前置校验: 所有track已SETUP
    pub fn check_record(&self, id: ClientId) -> RtspResult<()> {
        let inner = self.read();
        let entry = inner.clients.get(&id).ok_or(RtspError::Closed)?;
        if entry.state != SessionState::PreRecord {
            return Err(RtspError::WrongState);
        }
        if entry.tracks.len() != entry.media_count {
            return Err(RtspError::TracksNotReady);
        }
        Ok(())
    }

    /// 进入RECORD, RECORD响应写出后调用
    pub fn begin_record(&self, id: ClientId) -> RtspResult<()> {
        let mut inner = self.write();
        let entry = inner.clients.get_mut(&id).ok_or(RtspError::Closed)?;
        if entry.state != SessionState::PreRecord {
            return Err(RtspError::WrongState);
        }
        entry.state = SessionState::Record;
        Ok(())
    }

    /// UDP入流解复用: 按来源地址定位推流连接与track
    ///
    /// 匹配条件: RECORD状态的UDP推流端, peer IP等于来源IP, 且对应流向
    /// 的track端口等于来源端口。匹配不到的报文由调用方静默丢弃。
    pub fn locate_udp_source(
        &self,
        flow: TrackFlow,
        source: SocketAddr,
    ) -> Option<(String, usize)> {
        let inner = self.read();
        for entry in inner.clients.values() {
            if entry.state != SessionState::Record
                || entry.protocol != Some(StreamProtocol::Udp)
                || entry.peer_ip != source.ip()
            {
                continue;
            }
            let Some(path) = entry.path.as_deref() else {
                continue;
            };
            for (track_id, track) in entry.tracks.iter().enumerate() {
                let port = match flow {
                    TrackFlow::Rtp => track.rtp_port,
                    TrackFlow::Rtcp => track.rtcp_port,
                };
                if port == source.port() {
                    return Some((path.to_string(), track_id));
                }
            }
        }
        None
    }

    /// 向路径上所有PLAY状态的读端转发一帧
    ///
    /// 只持读锁, 全部发送都是非阻塞的: UDP走对应监听socket的
    /// try_send_to, TCP走有界队列try_send, 队列满则丢帧并计数。
    pub fn forward(&self, path: &str, track_id: usize, flow: TrackFlow, payload: &Bytes) {
        let inner = self.read();
        let channel = track_to_channel(track_id, flow);

        for (id, entry) in inner.clients.iter() {
            if entry.state != SessionState::Play
                || entry.path.as_deref() != Some(path)
                || track_id >= entry.tracks.len()
            {
                continue;
            }

            match entry.protocol {
                Some(StreamProtocol::Udp) => {
                    let Some(udp) = self.udp.get() else {
                        continue;
                    };
                    let track = &entry.tracks[track_id];
                    let (socket, port) = match flow {
                        TrackFlow::Rtp => (&udp.rtp, track.rtp_port),
                        TrackFlow::Rtcp => (&udp.rtcp, track.rtcp_port),
                    };
                    let dest = SocketAddr::new(entry.peer_ip, port);
                    if let Err(err) = socket.try_send_to(payload, dest) {
                        debug!(client = %id, %dest, "udp egress failed: {}", err);
                    }
                }
                Some(StreamProtocol::Tcp) => {
                    let Some(egress) = &entry.egress else {
                        continue;
                    };
                    let frame = RelayFrame {
                        channel,
                        payload: payload.clone(),
                    };
                    if egress.try_send(frame).is_err() {
                        let dropped = entry.dropped_frames.fetch_add(1, Ordering::Relaxed) + 1;
                        trace!(client = %id, dropped, "egress queue full, frame dropped");
                    }
                }
                None => {}
            }
        }
    }

    pub fn client_count(&self) -> usize {
        self.read().clients.len()
    }

    pub fn publisher_count(&self) -> usize {
        self.read().publishers.len()
    }

    /// 指定连接的累计丢帧数
    pub fn dropped_frames(&self, id: ClientId) -> Option<u64> {
        self.read()
            .clients
            .get(&id)
            .map(|c| c.dropped_frames.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    const SDP: &[u8] = b"v=0\r\nm=video 0 RTP/AVP 96\r\n";

    fn localhost() -> IpAddr {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    }

    fn udp_track(rtp_port: u16) -> Track {
        Track {
            rtp_port,
            rtcp_port: rtp_port + 1,
        }
    }

    /// 完整走完推流握手: ANNOUNCE + SETUP*n + RECORD
    fn add_publisher(
        registry: &Registry,
        path: &str,
        protocol: StreamProtocol,
        tracks: &[Track],
    ) -> (ClientId, CancellationToken) {
        let (id, close) = registry.register(localhost());
        registry
            .announce(id, path, Bytes::from_static(SDP), tracks.len())
            .expect("announce");
        for track in tracks {
            registry
                .setup_publisher(id, path, protocol, *track, None)
                .expect("setup");
        }
        registry.check_record(id).expect("check record");
        registry.begin_record(id).expect("begin record");
        (id, close)
    }

    fn add_reader(
        registry: &Registry,
        path: &str,
        protocol: StreamProtocol,
        tracks: &[Track],
        egress: Option<mpsc::Sender<RelayFrame>>,
    ) -> (ClientId, CancellationToken) {
        let (id, close) = registry.register(localhost());
        for track in tracks {
            registry
                .setup_reader(id, path, protocol, *track)
                .expect("setup");
        }
        registry.check_play(id).expect("check play");
        registry.begin_play(id, egress).expect("begin play");
        (id, close)
    }

    #[test]
    fn at_most_one_publisher_per_path() {
        let registry = Registry::new();
        let (first, _) = registry.register(localhost());
        registry
            .announce(first, "cam", Bytes::from_static(SDP), 1)
            .expect("first announce");

        let (second, _) = registry.register(localhost());
        assert_eq!(
            registry.announce(second, "cam", Bytes::from_static(SDP), 1),
            Err(RtspError::PathTaken)
        );
        assert_eq!(registry.publisher_count(), 1);

        // 其他路径不受影响
        registry
            .announce(second, "other", Bytes::from_static(SDP), 1)
            .expect("other path");
    }

    #[test]
    fn describe_returns_publisher_sdp() {
        let registry = Registry::new();
        assert!(registry.describe("cam").is_none());

        add_publisher(&registry, "cam", StreamProtocol::Udp, &[udp_track(5000)]);
        assert_eq!(registry.describe("cam"), Some(Bytes::from_static(SDP)));
    }

    #[test]
    fn reader_setup_requires_publisher() {
        let registry = Registry::new();
        let (id, _) = registry.register(localhost());
        assert_eq!(
            registry.setup_reader(id, "cam", StreamProtocol::Udp, udp_track(6000)),
            Err(RtspError::NoPublisher)
        );
    }

    #[test]
    fn protocol_cannot_change_between_setups() {
        let registry = Registry::new();
        add_publisher(
            &registry,
            "cam",
            StreamProtocol::Udp,
            &[udp_track(5000), udp_track(5002)],
        );

        let (id, _) = registry.register(localhost());
        registry
            .setup_reader(id, "cam", StreamProtocol::Tcp, Track::default())
            .expect("tcp setup");
        assert_eq!(
            registry.setup_reader(id, "cam", StreamProtocol::Udp, udp_track(6000)),
            Err(RtspError::ProtocolMismatch)
        );
    }

    #[test]
    fn track_count_is_bounded_by_publisher_medias() {
        let registry = Registry::new();
        add_publisher(&registry, "cam", StreamProtocol::Udp, &[udp_track(5000)]);

        let (id, _) = registry.register(localhost());
        registry
            .setup_reader(id, "cam", StreamProtocol::Udp, udp_track(6000))
            .expect("first setup");
        assert_eq!(
            registry.setup_reader(id, "cam", StreamProtocol::Udp, udp_track(6002)),
            Err(RtspError::TracksExhausted)
        );
    }

    #[test]
    fn partial_setup_blocks_play() {
        let registry = Registry::new();
        add_publisher(
            &registry,
            "cam",
            StreamProtocol::Udp,
            &[udp_track(5000), udp_track(5002)],
        );

        let (id, _) = registry.register(localhost());
        registry
            .setup_reader(id, "cam", StreamProtocol::Udp, udp_track(6000))
            .expect("setup");
        assert_eq!(registry.check_play(id), Err(RtspError::TracksNotReady));
    }

    #[test]
    fn publisher_interleaved_proposal_must_match() {
        let registry = Registry::new();
        let (id, _) = registry.register(localhost());
        registry
            .announce(id, "cam", Bytes::from_static(SDP), 2)
            .expect("announce");

        registry
            .setup_publisher(id, "cam", StreamProtocol::Tcp, Track::default(), Some((0, 1)))
            .expect("first track");
        // 第二条track期望2-3
        assert_eq!(
            registry.setup_publisher(
                id,
                "cam",
                StreamProtocol::Tcp,
                Track::default(),
                Some((2, 4))
            ),
            Err(RtspError::InvalidInterleaved)
        );
        registry
            .setup_publisher(id, "cam", StreamProtocol::Tcp, Track::default(), Some((2, 3)))
            .expect("second track");
    }

    #[test]
    fn close_is_idempotent() {
        let registry = Registry::new();
        let (id, _) = registry.register(localhost());
        assert!(registry.close(id));
        assert!(!registry.close(id));
        assert_eq!(registry.client_count(), 0);
    }

    #[test]
    fn publisher_close_cascades_to_readers() {
        let registry = Registry::new();
        let (publisher, _) =
            add_publisher(&registry, "cam", StreamProtocol::Udp, &[udp_track(5000)]);
        let (_, reader_close) = add_reader(
            &registry,
            "cam",
            StreamProtocol::Udp,
            &[udp_track(6000)],
            None,
        );

        let (_, other_close) = registry.register(localhost());

        assert!(!reader_close.is_cancelled());
        registry.close(publisher);
        assert!(reader_close.is_cancelled());
        // 无关连接不受级联影响
        assert!(!other_close.is_cancelled());
        assert_eq!(registry.publisher_count(), 0);
    }

    #[test]
    fn reader_close_does_not_cascade() {
        let registry = Registry::new();
        let (_, publisher_close) =
            add_publisher(&registry, "cam", StreamProtocol::Udp, &[udp_track(5000)]);
        let (reader, _) = add_reader(
            &registry,
            "cam",
            StreamProtocol::Udp,
            &[udp_track(6000)],
            None,
        );

        registry.close(reader);
        assert!(!publisher_close.is_cancelled());
        assert_eq!(registry.publisher_count(), 1);
    }

    #[tokio::test]
    async fn locates_udp_source_by_address_and_port() {
        let registry = Registry::new();
        add_publisher(
            &registry,
            "cam",
            StreamProtocol::Udp,
            &[udp_track(5000), udp_track(5002)],
        );

        let rtp_src: SocketAddr = "127.0.0.1:5002".parse().expect("addr");
        assert_eq!(
            registry.locate_udp_source(TrackFlow::Rtp, rtp_src),
            Some(("cam".to_string(), 1))
        );

        let rtcp_src: SocketAddr = "127.0.0.1:5001".parse().expect("addr");
        assert_eq!(
            registry.locate_udp_source(TrackFlow::Rtcp, rtcp_src),
            Some(("cam".to_string(), 0))
        );

        // 未知端口与未知IP都丢弃
        let unknown_port: SocketAddr = "127.0.0.1:9999".parse().expect("addr");
        assert_eq!(registry.locate_udp_source(TrackFlow::Rtp, unknown_port), None);
        let unknown_ip: SocketAddr = "10.0.0.1:5000".parse().expect("addr");
        assert_eq!(registry.locate_udp_source(TrackFlow::Rtp, unknown_ip), None);
    }

    #[tokio::test]
    async fn forwards_to_tcp_reader_queue() {
        let registry = Registry::new();
        add_publisher(&registry, "cam", StreamProtocol::Tcp, &[Track::default()]);

        let (tx, mut rx) = mpsc::channel(4);
        add_reader(
            &registry,
            "cam",
            StreamProtocol::Tcp,
            &[Track::default()],
            Some(tx),
        );

        let payload = Bytes::from_static(&[1, 2, 3]);
        registry.forward("cam", 0, TrackFlow::Rtp, &payload);
        registry.forward("cam", 0, TrackFlow::Rtcp, &payload);

        let frame = rx.recv().await.expect("rtp frame");
        assert_eq!(frame.channel, 0);
        assert_eq!(frame.payload, payload);
        let frame = rx.recv().await.expect("rtcp frame");
        assert_eq!(frame.channel, 1);
    }

    #[tokio::test]
    async fn overflow_drops_frames_and_counts() {
        let registry = Registry::new();
        add_publisher(&registry, "cam", StreamProtocol::Tcp, &[Track::default()]);

        let (tx, _rx) = mpsc::channel(1);
        let (reader, _) = add_reader(
            &registry,
            "cam",
            StreamProtocol::Tcp,
            &[Track::default()],
            Some(tx),
        );

        let payload = Bytes::from_static(&[0u8; 16]);
        registry.forward("cam", 0, TrackFlow::Rtp, &payload);
        registry.forward("cam", 0, TrackFlow::Rtp, &payload);
        registry.forward("cam", 0, TrackFlow::Rtp, &payload);

        assert_eq!(registry.dropped_frames(reader), Some(2));
    }

    #[tokio::test]
    async fn forwards_to_udp_reader_socket() {
        let registry = Registry::new();

        let rtp_listener = Arc::new(UdpSocket::bind("127.0.0.1:0").await.expect("bind rtp"));
        let rtcp_listener = Arc::new(UdpSocket::bind("127.0.0.1:0").await.expect("bind rtcp"));
        registry.install_udp(rtp_listener.clone(), rtcp_listener);

        // 读端客户端socket
        let client = UdpSocket::bind("127.0.0.1:0").await.expect("bind client");
        let client_port = client.local_addr().expect("addr").port();

        add_publisher(&registry, "cam", StreamProtocol::Udp, &[udp_track(5000)]);
        add_reader(
            &registry,
            "cam",
            StreamProtocol::Udp,
            &[Track {
                rtp_port: client_port,
                rtcp_port: client_port,
            }],
            None,
        );

        let payload = Bytes::from_static(b"0123456789abcdef");
        registry.forward("cam", 0, TrackFlow::Rtp, &payload);

        let mut buf = [0u8; 64];
        let (n, from) = tokio::time::timeout(Duration::from_secs(1), client.recv_from(&mut buf))
            .await
            .expect("timely")
            .expect("recv");
        assert_eq!(&buf[..n], &payload[..]);
        assert_eq!(
            from,
            rtp_listener.local_addr().expect("listener addr"),
            "egress must originate from the server RTP listener"
        );
    }

    #[test]
    fn paused_reader_receives_nothing() {
        let registry = Registry::new();
        add_publisher(&registry, "cam", StreamProtocol::Tcp, &[Track::default()]);

        let (tx, mut rx) = mpsc::channel(4);
        let (reader, _) = add_reader(
            &registry,
            "cam",
            StreamProtocol::Tcp,
            &[Track::default()],
            Some(tx),
        );
        registry.pause(reader).expect("pause");

        registry.forward("cam", 0, TrackFlow::Rtp, &Bytes::from_static(&[1]));
        assert!(rx.try_recv().is_err());
    }
}
