use anyhow::{Context, Result};
use url::Url;

/// 请求URL中提取出的流路径
///
/// 取URL的path部分, 去掉一个前导 `/`, 在下一个 `/` 处截断;
/// 同一连接绑定路径后, 后续请求必须使用同一路径。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestPath {
    /// 流名称 (非空)
    pub name: String,
    /// 查询参数中的推流鉴权key
    pub key: Option<String>,
}

impl RequestPath {
    pub fn parse(raw_url: &str) -> Result<Self> {
        let url =
            Url::parse(raw_url).with_context(|| format!("failed to parse URL: {}", raw_url))?;

        let path = url.path();
        let path = path.strip_prefix('/').unwrap_or(path);
        let name = match path.find('/') {
            Some(pos) => &path[..pos],
            None => path,
        };

        if name.is_empty() {
            anyhow::bail!("empty stream path in URL: {}", raw_url);
        }

        let key = url
            .query_pairs()
            .find(|(k, _)| k == "key")
            .map(|(_, v)| v.into_owned());

        Ok(Self {
            name: name.to_string(),
            key,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_leading_slash() {
        let path = RequestPath::parse("rtsp://127.0.0.1:8554/cam").expect("parse");
        assert_eq!(path.name, "cam");
        assert_eq!(path.key, None);
    }

    #[test]
    fn truncates_at_subpath() {
        let path = RequestPath::parse("rtsp://host/cam/trackID=1").expect("parse");
        assert_eq!(path.name, "cam");
    }

    #[test]
    fn extracts_key_query_parameter() {
        let path = RequestPath::parse("rtsp://host/cam?key=secret").expect("parse");
        assert_eq!(path.name, "cam");
        assert_eq!(path.key.as_deref(), Some("secret"));
    }

    #[test]
    fn rejects_empty_path() {
        assert!(RequestPath::parse("rtsp://host/").is_err());
        assert!(RequestPath::parse("rtsp://host").is_err());
    }

    #[test]
    fn rejects_unparsable_url() {
        assert!(RequestPath::parse("not a url").is_err());
    }
}
