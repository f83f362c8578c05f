/// Transport头解析结果
///
/// 按 `;` 切分为token; token要么是标志位 (`unicast`, `RTP/AVP`,
/// `RTP/AVP/TCP`, `RTP/AVP/UDP`, `mode=record`), 要么是 `key=value`。
/// 对顺序与空白宽容, 重复key保留先出现的一个。
#[derive(Debug, Clone, Default)]
pub struct TransportHeader {
    tokens: Vec<String>,
}

impl TransportHeader {
    pub fn parse(value: &str) -> Self {
        let tokens = value
            .split(';')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();
        Self { tokens }
    }

    /// 标志位是否存在 (完整token匹配)
    pub fn has(&self, flag: &str) -> bool {
        self.tokens.iter().any(|t| t == flag)
    }

    /// `key=value` 取值
    pub fn value(&self, key: &str) -> Option<&str> {
        self.tokens
            .iter()
            .find_map(|t| t.strip_prefix(key).and_then(|rest| rest.strip_prefix('=')))
    }

    /// UDP传输; 客户端有的发 `RTP/AVP`, 有的发 `RTP/AVP/UDP`, 两种拼法都接受
    pub fn is_udp(&self) -> bool {
        self.has("RTP/AVP") || self.has("RTP/AVP/UDP")
    }

    pub fn is_tcp(&self) -> bool {
        self.has("RTP/AVP/TCP")
    }

    /// `client_port=lo-hi`; 两个端口都必须可解析且非零
    pub fn client_ports(&self) -> Option<(u16, u16)> {
        let (lo, hi) = split_pair(self.value("client_port")?)?;
        let rtp_port: u16 = lo.parse().ok().filter(|p| *p > 0)?;
        let rtcp_port: u16 = hi.parse().ok().filter(|p| *p > 0)?;
        Some((rtp_port, rtcp_port))
    }

    /// `interleaved=lo-hi` 通道对
    pub fn interleaved(&self) -> Option<(u8, u8)> {
        let (lo, hi) = split_pair(self.value("interleaved")?)?;
        Some((lo.parse().ok()?, hi.parse().ok()?))
    }
}

fn split_pair(value: &str) -> Option<(&str, &str)> {
    let mut parts = value.splitn(2, '-');
    let lo = parts.next()?.trim();
    let hi = parts.next()?.trim();
    Some((lo, hi))
}
