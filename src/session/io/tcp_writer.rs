use bytes::Bytes;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::timeout;

use crate::rtsp::splitter::INTERLEAVED_MARKER;

/// 持有 OwnedWriteHalf 的写入器
///
/// 每次写都受写超时约束; 超时视为连接级错误。
pub struct TcpWriter {
    writer: OwnedWriteHalf,
    write_timeout: Duration,
}

impl TcpWriter {
    pub fn new(writer: OwnedWriteHalf, write_timeout: Duration) -> Self {
        Self {
            writer,
            write_timeout,
        }
    }

    /// 发送单个数据块
    pub async fn write(&mut self, data: &[u8]) -> io::Result<()> {
        timeout(self.write_timeout, self.writer.write_all(data))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "tcp write timed out"))?
    }

    /// 发送一个交错帧: '$' + channel + 长度 + 载荷
    ///
    /// 写入器被独占持有, 帧边界由此保证。
    pub async fn write_interleaved(&mut self, channel: u8, payload: &Bytes) -> io::Result<()> {
        let header = [
            INTERLEAVED_MARKER,
            channel,
            (payload.len() >> 8) as u8,
            (payload.len() & 0xff) as u8,
        ];

        timeout(self.write_timeout, async {
            self.writer.write_all(&header).await?;
            self.writer.write_all(payload).await
        })
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "tcp write timed out"))?
    }

    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.writer.shutdown().await
    }
}

/// 共享 TCP 写入器
///
/// RTSP响应与交错帧出流共用同一个socket, 通过异步互斥串行化,
/// 同一socket上绝不并发write。
#[derive(Clone)]
pub struct SharedTcpWriter {
    inner: Arc<Mutex<TcpWriter>>,
}

impl SharedTcpWriter {
    pub fn new(writer: TcpWriter) -> Self {
        Self {
            inner: Arc::new(Mutex::new(writer)),
        }
    }

    /// 获取写入器的独占访问权
    pub async fn acquire(&self) -> MutexGuard<'_, TcpWriter> {
        self.inner.lock().await
    }
}
