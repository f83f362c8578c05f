use anyhow::{Context, Result};
use std::collections::HashMap;

/// SDP会话描述
///
/// 中继不触碰媒体内容, 只关心media条目数量; SDP字节原样转发,
/// 这里只保留定位media所需的结构。
#[derive(Debug, Clone, Default)]
pub struct SdpSession {
    pub version: u8,
    pub session_name: String,
    pub attributes: HashMap<String, String>,
    pub medias: Vec<SdpMedia>,
}

#[derive(Debug, Clone)]
pub struct SdpMedia {
    pub media_type: String,
    pub port: u16,
    pub protocol: String,
    pub formats: Vec<String>,
    pub attributes: HashMap<String, String>,
}

pub struct SdpParser;

impl SdpParser {
    pub fn parse(sdp: &str) -> Result<SdpSession> {
        let mut session = SdpSession::default();
        let mut current_media: Option<SdpMedia> = None;

        for line in sdp.lines() {
            let line = line.trim();
            if line.len() < 2 || line.as_bytes()[1] != b'=' {
                continue;
            }

            let type_char = line.as_bytes()[0] as char;
            let value = &line[2..];

            match type_char {
                'v' => {
                    session.version = value
                        .parse()
                        .with_context(|| format!("invalid SDP version: {}", value))?;
                }
                's' => session.session_name = value.to_string(),
                'a' => {
                    let (attr_name, attr_value) = parse_attribute(value);
                    if let Some(ref mut media) = current_media {
                        media.attributes.insert(attr_name, attr_value);
                    } else {
                        session.attributes.insert(attr_name, attr_value);
                    }
                }
                'm' => {
                    if let Some(media) = current_media.take() {
                        session.medias.push(media);
                    }
                    current_media =
                        Some(parse_media(value).context("failed to parse SDP media line")?);
                }
                _ => {
                    // o=/t=/c=/b= 等行对中继无意义
                }
            }
        }

        if let Some(media) = current_media {
            session.medias.push(media);
        }

        Ok(session)
    }
}

fn parse_attribute(value: &str) -> (String, String) {
    if let Some(pos) = value.find(':') {
        (value[..pos].to_string(), value[pos + 1..].to_string())
    } else {
        (value.to_string(), String::new())
    }
}

fn parse_media(value: &str) -> Result<SdpMedia> {
    let parts: Vec<&str> = value.split_whitespace().collect();
    if parts.len() < 4 {
        anyhow::bail!(
            "invalid media line, expected at least 4 parts, got {}",
            parts.len()
        );
    }

    // 端口可能写成 port/count, 只取port
    let port_part = parts[1].split('/').next().unwrap_or(parts[1]);
    let port = port_part
        .parse()
        .with_context(|| format!("invalid media port: {}", parts[1]))?;

    Ok(SdpMedia {
        media_type: parts[0].to_string(),
        port,
        protocol: parts[2].to_string(),
        formats: parts[3..].iter().map(|s| s.to_string()).collect(),
        attributes: HashMap::new(),
    })
}
