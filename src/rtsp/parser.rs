use anyhow::Result;
use bytes::Bytes;
use nom::{
    IResult,
    bytes::complete::take_while1,
    character::complete::{char, digit1, line_ending, not_line_ending, space0, space1},
    combinator::map_res,
    sequence::tuple,
};

pub const RTSP_VERSION: &str = "RTSP/1.0";

/// 报文头集合
///
/// 头名保留原始大小写, 查找时忽略大小写, 保持插入顺序。
#[derive(Debug, Clone, Default)]
pub struct HeaderMap {
    entries: Vec<(String, String)>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入头, 已存在同名头(忽略大小写)时覆盖其值
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        if let Some(slot) = self
            .entries
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(&name))
        {
            slot.1 = value;
        } else {
            self.entries.push((name, value));
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct RtspRequest {
    pub method: String,
    pub uri: String,
    pub version: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Debug, Clone)]
pub struct RtspResponse {
    pub version: String,
    pub status_code: u16,
    pub reason_phrase: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// RTSP报文头解析器
///
/// 只处理报文头部分; 报文体由splitter按Content-Length切出后挂到消息上。
pub struct RtspParser;

impl RtspParser {
    /// 解析请求头
    ///
    /// # Arguments
    /// * `head` - 请求行 + 头部行 + 空行 (含结尾CRLF)
    pub fn parse_request(head: &str) -> Result<RtspRequest> {
        let request = match request_head(head) {
            Ok((_, request)) => request,
            Err(e) => anyhow::bail!("failed to parse RTSP request: {}", e),
        };
        if request.version != RTSP_VERSION {
            anyhow::bail!("unsupported RTSP version '{}'", request.version);
        }
        Ok(request)
    }

    /// 解析响应头
    pub fn parse_response(head: &str) -> Result<RtspResponse> {
        match response_head(head) {
            Ok((_, response)) => Ok(response),
            Err(e) => anyhow::bail!("failed to parse RTSP response: {}", e),
        }
    }

    pub fn build_request(request: &RtspRequest) -> String {
        let mut out = format!("{} {} {}\r\n", request.method, request.uri, RTSP_VERSION);
        for (name, value) in request.headers.iter() {
            out.push_str(&format!("{}: {}\r\n", name, value));
        }
        out.push_str("\r\n");
        out
    }

    pub fn build_response(response: &RtspResponse) -> String {
        let mut out = format!(
            "{} {} {}\r\n",
            RTSP_VERSION, response.status_code, response.reason_phrase
        );
        for (name, value) in response.headers.iter() {
            out.push_str(&format!("{}: {}\r\n", name, value));
        }
        out.push_str("\r\n");
        out
    }
}

fn request_head(input: &str) -> IResult<&str, RtspRequest> {
    let (input, (method, _, uri, _, version, _)) = tuple((
        take_while1(|c: char| c.is_ascii_alphabetic()),
        space1,
        take_while1(|c: char| !c.is_whitespace()),
        space1,
        take_while1(|c: char| !c.is_whitespace()),
        line_ending,
    ))(input)?;

    let (input, headers) = header_lines(input)?;
    let (input, _) = line_ending(input)?;

    Ok((
        input,
        RtspRequest {
            method: method.to_string(),
            uri: uri.to_string(),
            version: version.to_string(),
            headers,
            body: Bytes::new(),
        },
    ))
}

fn response_head(input: &str) -> IResult<&str, RtspResponse> {
    let (input, (version, _, status_code, _, reason_phrase, _)) = tuple((
        take_while1(|c: char| !c.is_whitespace()),
        space1,
        map_res(digit1, str::parse::<u16>),
        space1,
        not_line_ending,
        line_ending,
    ))(input)?;

    let (input, headers) = header_lines(input)?;
    let (input, _) = line_ending(input)?;

    Ok((
        input,
        RtspResponse {
            version: version.to_string(),
            status_code,
            reason_phrase: reason_phrase.to_string(),
            headers,
            body: Bytes::new(),
        },
    ))
}

fn header_lines(input: &str) -> IResult<&str, HeaderMap> {
    let mut headers = HeaderMap::new();
    let mut remaining = input;

    loop {
        // 空行表示头部结束
        if remaining.starts_with("\r\n") || remaining.starts_with('\n') {
            break;
        }

        match header_line(remaining) {
            Ok((rest, (name, value))) => {
                headers.insert(name, value.trim());
                remaining = rest;
            }
            Err(_) => break,
        }
    }

    Ok((remaining, headers))
}

fn header_line(input: &str) -> IResult<&str, (&str, &str)> {
    let (input, name) = take_while1(|c: char| c != ':' && c != '\r' && c != '\n')(input)?;
    let (input, _) = char(':')(input)?;
    let (input, _) = space0(input)?;
    let (input, value) = not_line_ending(input)?;
    let (input, _) = line_ending(input)?;

    Ok((input, (name, value)))
}
