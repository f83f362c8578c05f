use std::fmt;

/// 连接状态机的状态
///
/// STARTING -> ANNOUNCE -> PRE_RECORD -> RECORD  (推流)
/// STARTING -> PRE_PLAY -> PLAY                  (拉流, PAUSE回退到PRE_PLAY)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Starting,
    Announce,
    PrePlay,
    Play,
    PreRecord,
    Record,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Starting => "STARTING",
            SessionState::Announce => "ANNOUNCE",
            SessionState::PrePlay => "PRE_PLAY",
            SessionState::Play => "PLAY",
            SessionState::PreRecord => "PRE_RECORD",
            SessionState::Record => "RECORD",
        };
        f.write_str(name)
    }
}

/// 统一的 RTSP 错误码枚举（控制面使用）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtspError {
    MalformedMessage,
    MissingCSeq,
    MissingTransport,
    MissingContentType,
    UnsupportedContentType,
    MissingRecordMode,
    MissingKey,
    InvalidUrl,
    InvalidSdp,
    InvalidTransport,
    TransportNotAllowed,
    InvalidClientPort,
    InvalidInterleaved,
    PathChanged,
    WrongState,
    MethodNotAllowed,
    StreamNotFound,
    NoPublisher,
    PathTaken,
    ProtocolMismatch,
    TracksExhausted,
    TracksNotReady,
    Closed,
}

pub type RtspResult<T> = Result<T, RtspError>;

impl RtspError {
    pub fn into_response(self) -> (u16, &'static str) {
        match self {
            RtspError::MalformedMessage => (400, "Bad Request - Malformed Message"),
            RtspError::MissingCSeq => (400, "Bad Request - Missing CSeq"),
            RtspError::MissingTransport => (400, "Bad Request - Missing Transport"),
            RtspError::MissingContentType => (400, "Bad Request - Missing Content-Type"),
            RtspError::UnsupportedContentType => (400, "Bad Request - Unsupported Content-Type"),
            RtspError::MissingRecordMode => (400, "Bad Request - Missing mode=record"),
            RtspError::MissingKey => (400, "Bad Request - Missing key"),
            RtspError::InvalidUrl => (400, "Bad Request - Invalid URL"),
            RtspError::InvalidSdp => (400, "Bad Request - Invalid SDP"),
            RtspError::InvalidTransport => (400, "Bad Request - Invalid Transport"),
            RtspError::TransportNotAllowed => (400, "Bad Request - Transport Not Allowed"),
            RtspError::InvalidClientPort => (400, "Bad Request - Invalid client_port"),
            RtspError::InvalidInterleaved => (400, "Bad Request - Invalid interleaved"),
            RtspError::PathChanged => (400, "Bad Request - Path Has Changed"),
            RtspError::WrongState => (400, "Bad Request - Wrong State"),
            RtspError::MethodNotAllowed => (400, "Bad Request - Unhandled Method"),
            RtspError::StreamNotFound => (404, "Not Found"),
            RtspError::NoPublisher => (400, "Bad Request - No One Is Publishing"),
            RtspError::PathTaken => (400, "Bad Request - Path Already In Use"),
            RtspError::ProtocolMismatch => (400, "Bad Request - Mixed Track Protocols"),
            RtspError::TracksExhausted => (400, "Bad Request - All Tracks Already Setup"),
            RtspError::TracksNotReady => (400, "Bad Request - Not All Tracks Setup"),
            RtspError::Closed => (400, "Bad Request - Connection Closed"),
        }
    }
}
