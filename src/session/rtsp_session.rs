use bytes::Bytes;
use std::sync::Arc;
use tracing::{info, warn};

use crate::{
    config,
    registry::{ClientId, Registry, RelayFrame},
    rtsp::{
        HeaderMap, RTSP_VERSION, RequestPath, RtspRequest, RtspResponse, SdpParser,
        TransportHeader,
    },
    session::{
        state::{RtspError, RtspResult, SessionState},
        track::{StreamProtocol, Track, TrackFlow, track_to_channel},
    },
};

/// 固定的Session令牌; 连接按TCP身份区分, 不按Session区分
pub const SESSION_TOKEN: &str = "12345678";
/// 对外通告的固定SSRC
pub const SSRC: &str = "1234ABCD";

const PUBLIC_METHODS: &str = "DESCRIBE, ANNOUNCE, SETUP, PLAY, PAUSE, RECORD, TEARDOWN";

/// 请求处理结果
///
/// 响应写出之后需要驱动循环执行的副作用用变体区分:
/// PLAY/RECORD的200必须先于任何媒体字节落到socket上。
#[derive(Debug)]
pub enum Outcome {
    /// 普通响应, 连接继续收请求
    Respond(RtspResponse),
    /// 写出响应后进入PLAY
    RespondThenPlay(RtspResponse),
    /// 写出响应后进入RECORD
    RespondThenRecord(RtspResponse),
    /// 鉴权失败: 写出401后关闭连接
    RespondAuthFailure(RtspResponse),
    /// 静默关闭 (TEARDOWN)
    Close,
}

/// 单个RTSP连接的状态机
///
/// 共享可见状态的权威副本在注册表里; 这里的镜像只用于按当前状态
/// 分派方法, 每次迁移都经注册表在写锁内复核后回写镜像。
pub struct RtspSession {
    id: ClientId,
    registry: Arc<Registry>,

    state: SessionState,
    path: Option<String>,
    protocol: Option<StreamProtocol>,
    track_count: usize,
    /// 推流端自己SDP的media数
    media_count: usize,

    /// 最近一条请求的CSeq原文, 响应与错误应答原样回显
    cseq: Option<String>,

    server_header: String,
    server_rtp_port: u16,
    server_rtcp_port: u16,
    allow_udp: bool,
    allow_tcp: bool,
    publish_key: Option<String>,
}

impl RtspSession {
    pub fn new(id: ClientId, registry: Arc<Registry>) -> Self {
        let cfg = config::get();
        Self {
            id,
            registry,
            state: SessionState::Starting,
            path: None,
            protocol: None,
            track_count: 0,
            media_count: 0,
            cseq: None,
            server_header: cfg.session.server_header.clone(),
            server_rtp_port: cfg.server.rtp_port,
            server_rtcp_port: cfg.server.rtcp_port,
            allow_udp: cfg.relay.allow_udp(),
            allow_tcp: cfg.relay.allow_tcp(),
            publish_key: cfg.relay.publish_key().map(str::to_string),
        }
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn protocol(&self) -> Option<StreamProtocol> {
        self.protocol
    }

    pub fn track_count(&self) -> usize {
        self.track_count
    }

    /// 最近一条请求的CSeq, 驱动循环构造错误应答时回显
    pub fn last_cseq(&self) -> Option<&str> {
        self.cseq.as_deref()
    }

    /// 处理一条请求, 返回响应与后续动作
    pub fn handle_request(&mut self, request: &RtspRequest) -> RtspResult<Outcome> {
        self.cseq = request.headers.get("CSeq").map(str::to_string);

        if request.method != "OPTIONS" && self.cseq.is_none() {
            return Err(RtspError::MissingCSeq);
        }

        match request.method.as_str() {
            "OPTIONS" => self.handle_options(),
            "DESCRIBE" => self.handle_describe(request),
            "ANNOUNCE" => self.handle_announce(request),
            "SETUP" => self.handle_setup(request),
            "PLAY" => self.handle_play(request),
            "PAUSE" => self.handle_pause(request),
            "RECORD" => self.handle_record(request),
            "TEARDOWN" => Ok(Outcome::Close),
            _ => Err(RtspError::MethodNotAllowed),
        }
    }

    /// PLAY响应写出后进入PLAY状态; TCP读端在此挂上出流队列
    pub fn begin_play(&mut self, egress: Option<tokio::sync::mpsc::Sender<RelayFrame>>) -> RtspResult<()> {
        self.registry.begin_play(self.id, egress)?;
        self.state = SessionState::Play;
        Ok(())
    }

    /// RECORD响应写出后进入RECORD状态
    pub fn begin_record(&mut self) -> RtspResult<()> {
        self.registry.begin_record(self.id)?;
        self.state = SessionState::Record;
        Ok(())
    }

    fn handle_options(&self) -> RtspResult<Outcome> {
        let mut response = self.base_response(200, "OK");
        response.headers.insert("Public", PUBLIC_METHODS);
        Ok(Outcome::Respond(response))
    }

    fn handle_describe(&mut self, request: &RtspRequest) -> RtspResult<Outcome> {
        if self.state != SessionState::Starting {
            return Err(RtspError::WrongState);
        }

        let path = self.parse_path(request)?;
        let sdp = self
            .registry
            .describe(&path.name)
            .ok_or(RtspError::StreamNotFound)?;

        info!(client = %self.id, path = %path.name, "serving SDP");

        let mut response = self.base_response(200, "OK");
        response.headers.insert("Content-Base", request.uri.clone());
        response.headers.insert("Content-Type", "application/sdp");
        set_body(&mut response, sdp);
        Ok(Outcome::Respond(response))
    }

    fn handle_announce(&mut self, request: &RtspRequest) -> RtspResult<Outcome> {
        if self.state != SessionState::Starting {
            return Err(RtspError::WrongState);
        }

        let content_type = request
            .headers
            .get("Content-Type")
            .ok_or(RtspError::MissingContentType)?;
        if content_type != "application/sdp" {
            return Err(RtspError::UnsupportedContentType);
        }

        let sdp_text =
            std::str::from_utf8(&request.body).map_err(|_| RtspError::InvalidSdp)?;
        let sdp = SdpParser::parse(sdp_text).map_err(|err| {
            warn!(client = %self.id, "ANNOUNCE SDP解析失败: {:?}", err);
            RtspError::InvalidSdp
        })?;

        let path = self.parse_path(request)?;

        if let Some(expected) = self.publish_key.as_deref() {
            let key = path.key.as_deref().ok_or(RtspError::MissingKey)?;
            if key != expected {
                warn!(client = %self.id, path = %path.name, "wrong publish key");
                return Ok(Outcome::RespondAuthFailure(
                    self.base_response(401, "Unauthorized"),
                ));
            }
        }

        self.registry.announce(
            self.id,
            &path.name,
            request.body.clone(),
            sdp.medias.len(),
        )?;
        self.path = Some(path.name.clone());
        self.media_count = sdp.medias.len();
        self.state = SessionState::Announce;

        info!(
            client = %self.id,
            path = %path.name,
            medias = sdp.medias.len(),
            "publisher announced"
        );
        Ok(Outcome::Respond(self.base_response(200, "OK")))
    }

    fn handle_setup(&mut self, request: &RtspRequest) -> RtspResult<Outcome> {
        let transport_value = request
            .headers
            .get("Transport")
            .ok_or(RtspError::MissingTransport)?;
        let transport = TransportHeader::parse(transport_value);

        if !transport.has("unicast") {
            return Err(RtspError::InvalidTransport);
        }

        let protocol = if transport.is_tcp() {
            StreamProtocol::Tcp
        } else if transport.is_udp() {
            StreamProtocol::Udp
        } else {
            return Err(RtspError::InvalidTransport);
        };
        match protocol {
            StreamProtocol::Udp if !self.allow_udp => return Err(RtspError::TransportNotAllowed),
            StreamProtocol::Tcp if !self.allow_tcp => return Err(RtspError::TransportNotAllowed),
            _ => {}
        }

        let path = self.parse_path(request)?;

        match self.state {
            // 拉流分支
            SessionState::Starting | SessionState::PrePlay => {
                let track = match protocol {
                    StreamProtocol::Udp => {
                        let (rtp_port, rtcp_port) = transport
                            .client_ports()
                            .ok_or(RtspError::InvalidClientPort)?;
                        Track {
                            rtp_port,
                            rtcp_port,
                        }
                    }
                    StreamProtocol::Tcp => Track::default(),
                };

                let track_id =
                    self.registry
                        .setup_reader(self.id, &path.name, protocol, track)?;
                self.note_setup(&path.name, protocol, SessionState::PrePlay);

                let response = self.setup_response(protocol, track, track_id);
                Ok(Outcome::Respond(response))
            }

            // 推流分支
            SessionState::Announce | SessionState::PreRecord => {
                if !transport.has("mode=record") {
                    return Err(RtspError::MissingRecordMode);
                }

                let (track, proposed) = match protocol {
                    StreamProtocol::Udp => {
                        let (rtp_port, rtcp_port) = transport
                            .client_ports()
                            .ok_or(RtspError::InvalidClientPort)?;
                        (
                            Track {
                                rtp_port,
                                rtcp_port,
                            },
                            None,
                        )
                    }
                    StreamProtocol::Tcp => (Track::default(), transport.interleaved()),
                };

                let track_id = self.registry.setup_publisher(
                    self.id,
                    &path.name,
                    protocol,
                    track,
                    proposed,
                )?;
                self.note_setup(&path.name, protocol, SessionState::PreRecord);

                let response = self.setup_response(protocol, track, track_id);
                Ok(Outcome::Respond(response))
            }

            _ => Err(RtspError::WrongState),
        }
    }

    fn handle_play(&mut self, request: &RtspRequest) -> RtspResult<Outcome> {
        if self.state != SessionState::PrePlay {
            return Err(RtspError::WrongState);
        }
        self.check_bound_path(request)?;

        self.registry.check_play(self.id)?;

        let mut response = self.base_response(200, "OK");
        response.headers.insert("Session", SESSION_TOKEN);
        Ok(Outcome::RespondThenPlay(response))
    }

    fn handle_pause(&mut self, request: &RtspRequest) -> RtspResult<Outcome> {
        if self.state != SessionState::Play {
            return Err(RtspError::WrongState);
        }
        self.check_bound_path(request)?;

        self.registry.pause(self.id)?;
        self.state = SessionState::PrePlay;
        info!(client = %self.id, "paused");

        let mut response = self.base_response(200, "OK");
        response.headers.insert("Session", SESSION_TOKEN);
        Ok(Outcome::Respond(response))
    }

    fn handle_record(&mut self, request: &RtspRequest) -> RtspResult<Outcome> {
        if self.state != SessionState::PreRecord {
            return Err(RtspError::WrongState);
        }
        self.check_bound_path(request)?;

        self.registry.check_record(self.id)?;

        let mut response = self.base_response(200, "OK");
        response.headers.insert("Session", SESSION_TOKEN);
        Ok(Outcome::RespondThenRecord(response))
    }

    fn parse_path(&self, request: &RtspRequest) -> RtspResult<RequestPath> {
        RequestPath::parse(&request.uri).map_err(|err| {
            warn!(client = %self.id, uri = %request.uri, "无法解析请求URL: {:?}", err);
            RtspError::InvalidUrl
        })
    }

    /// 路径绑定后, 后续请求的路径必须一致
    fn check_bound_path(&self, request: &RtspRequest) -> RtspResult<()> {
        let path = self.parse_path(request)?;
        if self.path.as_deref() != Some(path.name.as_str()) {
            return Err(RtspError::PathChanged);
        }
        Ok(())
    }

    fn note_setup(&mut self, path: &str, protocol: StreamProtocol, state: SessionState) {
        self.path = Some(path.to_string());
        self.protocol = Some(protocol);
        self.track_count += 1;
        self.state = state;
        info!(
            client = %self.id,
            path,
            %protocol,
            track = self.track_count - 1,
            "track setup"
        );
    }

    fn setup_response(
        &self,
        protocol: StreamProtocol,
        track: Track,
        track_id: usize,
    ) -> RtspResponse {
        let transport = match protocol {
            StreamProtocol::Udp => format!(
                "RTP/AVP;unicast;client_port={}-{};server_port={}-{};ssrc={}",
                track.rtp_port, track.rtcp_port, self.server_rtp_port, self.server_rtcp_port, SSRC
            ),
            StreamProtocol::Tcp => {
                let rtp_channel = track_to_channel(track_id, TrackFlow::Rtp);
                let rtcp_channel = track_to_channel(track_id, TrackFlow::Rtcp);
                format!(
                    "RTP/AVP/TCP;unicast;interleaved={}-{}",
                    rtp_channel, rtcp_channel
                )
            }
        };

        let mut response = self.base_response(200, "OK");
        response.headers.insert("Transport", transport);
        response.headers.insert("Session", SESSION_TOKEN);
        response
    }

    fn base_response(&self, status_code: u16, reason_phrase: &str) -> RtspResponse {
        let mut headers = HeaderMap::new();
        if let Some(cseq) = &self.cseq {
            headers.insert("CSeq", cseq.clone());
        }
        headers.insert("Server", self.server_header.clone());
        headers.insert(
            "Date",
            chrono::Utc::now()
                .format("%a, %d %b %Y %H:%M:%S GMT")
                .to_string(),
        );

        RtspResponse {
            version: RTSP_VERSION.to_string(),
            status_code,
            reason_phrase: reason_phrase.to_string(),
            headers,
            body: Bytes::new(),
        }
    }
}

fn set_body(response: &mut RtspResponse, body: Bytes) {
    response
        .headers
        .insert("Content-Length", body.len().to_string());
    response.body = body;
}

/// 通用错误应答: 状态码来自错误枚举, CSeq存在时回显
pub fn error_response(error: RtspError, cseq: Option<&str>) -> RtspResponse {
    let (status_code, reason_phrase) = error.into_response();
    let mut headers = HeaderMap::new();
    if let Some(cseq) = cseq {
        headers.insert("CSeq", cseq);
    }
    RtspResponse {
        version: RTSP_VERSION.to_string(),
        status_code,
        reason_phrase: reason_phrase.to_string(),
        headers,
        body: Bytes::new(),
    }
}
