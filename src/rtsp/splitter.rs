use anyhow::{Context, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::rtsp::{RtspParser, RtspRequest, RtspResponse};

/// 交错帧前缀字节 '$'
pub const INTERLEAVED_MARKER: u8 = 0x24;

/// 头部上限, 超出仍未见到空行视为协议错误
const MAX_HEAD_LEN: usize = 64 * 1024;

/// 同一TCP字节流上的三类RTSP消息
#[derive(Debug, Clone)]
pub enum RtspMessage {
    /// RTSP请求
    Request(RtspRequest),
    /// RTSP响应
    Response(RtspResponse),
    /// RTP/RTCP交错封装帧
    Interleaved { channel: u8, payload: Bytes },
}

/// RTSP协议分割器
///
/// 按帧边界区分交错帧(0x24开头)与文本消息, 文本消息按
/// Content-Length切出完整报文后交给RtspParser。
#[derive(Debug, Default)]
pub struct RtspSplitter;

impl RtspSplitter {
    pub fn new() -> Self {
        Self
    }

    /// 从 src 解码一条消息; 数据不足时返回 Ok(None)
    pub fn decode_message(&mut self, src: &mut BytesMut) -> Result<Option<RtspMessage>> {
        if src.is_empty() {
            return Ok(None);
        }

        if src[0] == INTERLEAVED_MARKER {
            return Ok(decode_interleaved(src));
        }

        let Some(head_end) = find_header_end(src) else {
            if src.len() > MAX_HEAD_LEN {
                anyhow::bail!("RTSP head exceeds {} bytes without terminator", MAX_HEAD_LEN);
            }
            return Ok(None);
        };

        let head_len = head_end + 4; // 含 \r\n\r\n
        let content_length = {
            let head_str =
                std::str::from_utf8(&src[..head_len]).context("invalid UTF-8 in RTSP head")?;
            extract_content_length(head_str)?
        };

        let total_len = head_len + content_length;
        if src.len() < total_len {
            // 等待报文体
            return Ok(None);
        }

        let message = {
            let head_str =
                std::str::from_utf8(&src[..head_len]).context("invalid UTF-8 in RTSP head")?;
            if head_str.starts_with("RTSP/") {
                RtspMessage::Response(RtspParser::parse_response(head_str)?)
            } else {
                RtspMessage::Request(RtspParser::parse_request(head_str)?)
            }
        };

        let frame = src.split_to(total_len).freeze();
        let body = frame.slice(head_len..);

        Ok(Some(match message {
            RtspMessage::Request(mut request) => {
                request.body = body;
                RtspMessage::Request(request)
            }
            RtspMessage::Response(mut response) => {
                response.body = body;
                RtspMessage::Response(response)
            }
            other => other,
        }))
    }
}

/// 解码交错帧
///
/// # 格式
/// - Byte 0: '$' (0x24)
/// - Byte 1: channel id
/// - Byte 2-3: length (big-endian u16)
/// - Byte 4+: RTP/RTCP数据
fn decode_interleaved(src: &mut BytesMut) -> Option<RtspMessage> {
    if src.len() < 4 {
        return None;
    }

    let channel = src[1];
    let length = u16::from_be_bytes([src[2], src[3]]) as usize;
    let total_len = 4 + length;

    if src.len() < total_len {
        return None;
    }

    src.advance(4);
    let payload = src.split_to(length).freeze();
    Some(RtspMessage::Interleaved { channel, payload })
}

/// 查找头部结束位置 (\r\n\r\n)
fn find_header_end(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|w| w == b"\r\n\r\n")
}

/// 从头部提取Content-Length, 缺失视为0
fn extract_content_length(head: &str) -> Result<usize> {
    for line in head.lines() {
        let Some((prefix, rest)) = line.split_at_checked(15) else {
            continue;
        };
        if prefix.eq_ignore_ascii_case("content-length:") {
            let value = rest.trim();
            return value
                .parse()
                .with_context(|| format!("invalid Content-Length value: {}", value));
        }
    }
    Ok(0)
}

impl Decoder for RtspSplitter {
    type Item = RtspMessage;
    type Error = anyhow::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.decode_message(src)
    }
}

impl Encoder<RtspMessage> for RtspSplitter {
    type Error = anyhow::Error;

    fn encode(&mut self, item: RtspMessage, dst: &mut BytesMut) -> Result<()> {
        match item {
            RtspMessage::Request(request) => {
                dst.put(RtspParser::build_request(&request).as_bytes());
                dst.put(request.body);
            }
            RtspMessage::Response(response) => {
                dst.put(RtspParser::build_response(&response).as_bytes());
                dst.put(response.body);
            }
            RtspMessage::Interleaved { channel, payload } => {
                if payload.len() > u16::MAX as usize {
                    anyhow::bail!("interleaved payload too large: {} bytes", payload.len());
                }
                dst.put_u8(INTERLEAVED_MARKER);
                dst.put_u8(channel);
                dst.put_u16(payload.len() as u16);
                dst.put(payload);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(splitter: &mut RtspSplitter, buf: &mut BytesMut) -> Vec<RtspMessage> {
        let mut out = Vec::new();
        while let Some(msg) = splitter.decode_message(buf).expect("decode") {
            out.push(msg);
        }
        out
    }

    #[test]
    fn decodes_request_with_body() {
        let mut splitter = RtspSplitter::new();
        let mut buf = BytesMut::new();
        buf.put(
            &b"ANNOUNCE rtsp://h/cam RTSP/1.0\r\n\
               CSeq: 2\r\n\
               Content-Type: application/sdp\r\n\
               Content-Length: 5\r\n\
               \r\n\
               v=0\r\n"[..],
        );

        let msgs = decode_all(&mut splitter, &mut buf);
        assert_eq!(msgs.len(), 1);
        let RtspMessage::Request(req) = &msgs[0] else {
            panic!("expected request");
        };
        assert_eq!(req.method, "ANNOUNCE");
        assert_eq!(&req.body[..], b"v=0\r\n");
        assert!(buf.is_empty());
    }

    #[test]
    fn waits_for_partial_input() {
        let mut splitter = RtspSplitter::new();
        let mut buf = BytesMut::new();

        buf.put(&b"OPTIONS rtsp://h/cam RTSP/1.0\r\nCSeq"[..]);
        assert!(splitter.decode_message(&mut buf).expect("decode").is_none());

        buf.put(&b": 1\r\n\r\n"[..]);
        let msgs = decode_all(&mut splitter, &mut buf);
        assert_eq!(msgs.len(), 1);
        assert!(matches!(&msgs[0], RtspMessage::Request(r) if r.method == "OPTIONS"));
    }

    #[test]
    fn waits_for_full_body() {
        let mut splitter = RtspSplitter::new();
        let mut buf = BytesMut::new();
        buf.put(&b"ANNOUNCE rtsp://h/cam RTSP/1.0\r\nCSeq: 2\r\nContent-Length: 4\r\n\r\nv="[..]);
        assert!(splitter.decode_message(&mut buf).expect("decode").is_none());
        buf.put(&b"0\n"[..]);
        let msgs = decode_all(&mut splitter, &mut buf);
        assert_eq!(msgs.len(), 1);
    }

    #[test]
    fn decodes_interleaved_frame() {
        let mut splitter = RtspSplitter::new();
        let mut buf = BytesMut::new();
        buf.put(&[0x24, 0x02, 0x00, 0x03, 0xaa, 0xbb, 0xcc][..]);

        let msgs = decode_all(&mut splitter, &mut buf);
        assert_eq!(msgs.len(), 1);
        let RtspMessage::Interleaved { channel, payload } = &msgs[0] else {
            panic!("expected interleaved frame");
        };
        assert_eq!(*channel, 2);
        assert_eq!(&payload[..], &[0xaa, 0xbb, 0xcc]);
    }

    #[test]
    fn distinguishes_frames_from_requests_at_boundary() {
        let mut splitter = RtspSplitter::new();
        let mut buf = BytesMut::new();
        buf.put(&[0x24, 0x00, 0x00, 0x02, 0x01, 0x02][..]);
        buf.put(&b"TEARDOWN rtsp://h/cam RTSP/1.0\r\nCSeq: 8\r\n\r\n"[..]);
        buf.put(&[0x24, 0x01, 0x00, 0x01, 0xff][..]);

        let msgs = decode_all(&mut splitter, &mut buf);
        assert_eq!(msgs.len(), 3);
        assert!(matches!(msgs[0], RtspMessage::Interleaved { channel: 0, .. }));
        assert!(matches!(&msgs[1], RtspMessage::Request(r) if r.method == "TEARDOWN"));
        assert!(matches!(msgs[2], RtspMessage::Interleaved { channel: 1, .. }));
    }

    #[test]
    fn malformed_head_is_an_error_not_eof() {
        let mut splitter = RtspSplitter::new();
        let mut buf = BytesMut::new();
        buf.put(&b"\x01\x02garbage\r\n\r\n"[..]);
        assert!(splitter.decode_message(&mut buf).is_err());
    }

    #[test]
    fn roundtrips_interleaved_encoding() {
        let mut splitter = RtspSplitter::new();
        let mut buf = BytesMut::new();
        splitter
            .encode(
                RtspMessage::Interleaved {
                    channel: 3,
                    payload: Bytes::from_static(&[1, 2, 3, 4]),
                },
                &mut buf,
            )
            .expect("encode");

        let msgs = decode_all(&mut splitter, &mut buf);
        assert_eq!(msgs.len(), 1);
        let RtspMessage::Interleaved { channel, payload } = &msgs[0] else {
            panic!("expected interleaved frame");
        };
        assert_eq!(*channel, 3);
        assert_eq!(&payload[..], &[1, 2, 3, 4]);
    }
}
