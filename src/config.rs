use anyhow::Result;
use once_cell::sync::OnceCell;
use serde::Deserialize;

static SETTINGS: OnceCell<AppConfig> = OnceCell::new();

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub session: SessionConfig,
    pub relay: RelayConfig,
}

impl AppConfig {
    fn normalize(mut self) -> Self {
        self.server.max_connections = self.server.max_connections.max(1);
        self.session.read_timeout_secs = self.session.read_timeout_secs.max(1);
        self.session.write_timeout_secs = self.session.write_timeout_secs.max(1);
        self.session.send_queue_capacity = self.session.send_queue_capacity.max(1);
        if self.relay.protocols.is_empty() {
            self.relay.protocols = vec!["udp".to_string(), "tcp".to_string()];
        }
        self
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// 监听IP
    pub bind_ip: String,
    /// RTSP控制端口 (TCP)
    pub rtsp_port: u16,
    /// RTP监听端口 (UDP)
    pub rtp_port: u16,
    /// RTCP监听端口 (UDP)
    pub rtcp_port: u16,
    /// 最大连接数, 超出时回复503
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_ip: "0.0.0.0".to_string(),
            rtsp_port: 8554,
            rtp_port: 8000,
            rtcp_port: 8001,
            max_connections: 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub read_timeout_secs: u64,
    pub write_timeout_secs: u64,
    /// 每个TCP读端的发送队列容量, 队列满时丢帧
    pub send_queue_capacity: usize,
    pub server_header: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            read_timeout_secs: 10,
            write_timeout_secs: 10,
            send_queue_capacity: 512,
            server_header: "rtsp-relay/0.1".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// 允许的SETUP传输协议, "udp" 和/或 "tcp"
    pub protocols: Vec<String>,
    /// 推流鉴权key, 空字符串表示不鉴权
    pub publish_key: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            protocols: vec!["udp".to_string(), "tcp".to_string()],
            publish_key: String::new(),
        }
    }
}

impl RelayConfig {
    pub fn allow_udp(&self) -> bool {
        self.protocols.iter().any(|p| p.eq_ignore_ascii_case("udp"))
    }

    pub fn allow_tcp(&self) -> bool {
        self.protocols.iter().any(|p| p.eq_ignore_ascii_case("tcp"))
    }

    /// 配置的推流key, 未配置时返回None
    pub fn publish_key(&self) -> Option<&str> {
        if self.publish_key.is_empty() {
            None
        } else {
            Some(&self.publish_key)
        }
    }
}

pub fn init(config_path: Option<&str>) -> Result<&'static AppConfig> {
    SETTINGS.get_or_try_init(|| load_config(config_path))
}

pub fn get() -> &'static AppConfig {
    SETTINGS.get_or_init(AppConfig::default)
}

fn load_config(config_path: Option<&str>) -> Result<AppConfig> {
    let mut builder = ::config::Config::builder()
        .add_source(::config::Environment::with_prefix("RTSP_RELAY").separator("__"));

    if let Some(path) = config_path {
        builder = builder.add_source(::config::File::with_name(path).required(false));
    } else {
        builder = builder.add_source(::config::File::with_name("config").required(false));
    }

    let cfg = builder.build()?;
    let settings: AppConfig = cfg.try_deserialize().unwrap_or_default();
    Ok(settings.normalize())
}
