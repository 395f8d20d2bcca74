//! 바이트 스트림 타입
//!
//! 모든 전송은 수신 결과를 [`ByteStream`] 하나로 돌려준다.
//! 세션 태스크가 채우는 채널은 [`channel_reader`]로 `AsyncRead`가 된다.

use std::io;
use std::pin::Pin;

use bytes::Bytes;
use futures::stream;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::io::StreamReader;

/// 읽기 전용 바이트 스트림 (드롭 시 세션 자원 해제)
pub type ByteStream = Pin<Box<dyn AsyncRead + Send>>;

/// 세션 태스크 → 리더 방향 채널 송신기
pub type ChunkSender = mpsc::Sender<io::Result<Bytes>>;

/// 양방향 연결 (RFCOMM 백엔드 등)
pub trait Duplex: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Duplex for T {}

/// 박싱된 양방향 연결
pub type DuplexStream = Box<dyn Duplex>;

/// AsyncRead를 ByteStream으로
pub fn boxed<R>(reader: R) -> ByteStream
where
    R: AsyncRead + Send + 'static,
{
    Box::pin(reader)
}

/// 바운드 채널 생성 → (세션 태스크용 송신기, 호출자용 스트림)
pub fn channel_reader(capacity: usize) -> (ChunkSender, ByteStream) {
    let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(capacity.max(1));
    let chunks = stream::unfold(rx, |mut rx| async move {
        let item = rx.recv().await?;
        Some((item, rx))
    });
    (tx, Box::pin(StreamReader::new(chunks)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_channel_reader_concatenates_chunks() {
        let (tx, mut reader) = channel_reader(4);
        tokio::spawn(async move {
            for part in [&b"abc"[..], b"", b"123"] {
                tx.send(Ok(Bytes::copy_from_slice(part))).await.unwrap();
            }
        });

        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"abc123");
    }

    #[tokio::test]
    async fn test_channel_reader_surfaces_error() {
        let (tx, mut reader) = channel_reader(4);
        tx.send(Ok(Bytes::from_static(b"partial"))).await.unwrap();
        tx.send(Err(io::Error::new(io::ErrorKind::TimedOut, "idle")))
            .await
            .unwrap();
        drop(tx);

        let mut out = Vec::new();
        let err = reader.read_to_end(&mut out).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }
}
