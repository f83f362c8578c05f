pub mod rtsp_server;
pub mod udp_relay;

pub use rtsp_server::RtspServer;
pub use udp_relay::UdpRelay;
