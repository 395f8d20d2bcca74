//! 외부 협력자 (HTTP/FTP/SFTP/file 클라이언트, Bluetooth RFCOMM 소켓)
//!
//! 실제 프로토콜 구현은 이 크레이트의 책임이 아니다. 전송 계층은 스킴별로 등록된
//! 백엔드에 요청을 넘기고 결과 스트림만 받는다.

use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, ReadBuf};
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::debug;

use crate::headers::{is_header_option, HeaderMap};
use crate::stream::{boxed, ByteStream, DuplexStream};
use crate::transport::Scheme;
use crate::url::ParsedUrl;
use crate::{Error, Result};

/// URL 기반 원격 클라이언트
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// URL 내용을 스트림으로 가져오기
    async fn fetch(&self, url: &ParsedUrl, headers: &HeaderMap, timeout: Duration) -> Result<ByteStream>;

    /// 스트림을 URL에 저장 → 알 수 있으면 전송 바이트 수
    async fn store(
        &self,
        url: &ParsedUrl,
        body: ByteStream,
        headers: &HeaderMap,
        timeout: Duration,
    ) -> Result<Option<u64>>;
}

/// Bluetooth RFCOMM 소켓 제공자
#[async_trait]
pub trait RfcommBackend: Send + Sync {
    /// `addr`의 `channel`로 접속
    async fn connect(&self, addr: &str, channel: u8) -> Result<DuplexStream>;

    /// 로컬 어댑터에 바인드 (`channel`이 None이면 임의 채널)
    async fn listen(&self, addr: &str, channel: Option<u8>) -> Result<Box<dyn RfcommListener>>;
}

/// 바인드된 RFCOMM 리스너
#[async_trait]
pub trait RfcommListener: Send {
    /// (어댑터 주소, 채널)
    fn local_addr(&self) -> Result<(String, u8)>;

    async fn accept(&mut self) -> Result<DuplexStream>;
}

/// 스킴별 백엔드 등록부
#[derive(Clone)]
pub struct Backends {
    remote: HashMap<Scheme, Arc<dyn RemoteBackend>>,
    rfcomm: Option<Arc<dyn RfcommBackend>>,
}

impl Default for Backends {
    /// http, https, file 기본 등록
    fn default() -> Self {
        let http: Arc<dyn RemoteBackend> = Arc::new(HttpBackend::default());
        let mut remote = HashMap::new();
        remote.insert(Scheme::Http, http.clone());
        remote.insert(Scheme::Https, http);
        remote.insert(Scheme::File, Arc::new(FileBackend) as Arc<dyn RemoteBackend>);
        Self {
            remote,
            rfcomm: None,
        }
    }
}

impl Backends {
    /// 아무것도 등록되지 않은 상태
    pub fn empty() -> Self {
        Self {
            remote: HashMap::new(),
            rfcomm: None,
        }
    }

    /// 스킴 백엔드 등록 (기존 등록 교체)
    pub fn with_remote(mut self, scheme: Scheme, backend: Arc<dyn RemoteBackend>) -> Self {
        self.remote.insert(scheme, backend);
        self
    }

    pub fn with_rfcomm(mut self, backend: Arc<dyn RfcommBackend>) -> Self {
        self.rfcomm = Some(backend);
        self
    }

    pub fn remote(&self, scheme: Scheme) -> Result<&Arc<dyn RemoteBackend>> {
        self.remote.get(&scheme).ok_or_else(|| Error::BackendUnavailable {
            scheme: scheme.to_string(),
        })
    }

    pub fn rfcomm(&self) -> Result<&Arc<dyn RfcommBackend>> {
        self.rfcomm.as_ref().ok_or_else(|| Error::BackendUnavailable {
            scheme: Scheme::Bt.to_string(),
        })
    }
}

/// reqwest 기반 HTTP(S) 클라이언트 (GET으로 수신, PUT으로 송신)
#[derive(Clone, Default)]
pub struct HttpBackend {
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn request(
        &self,
        method: reqwest::Method,
        url: &ParsedUrl,
        headers: &HeaderMap,
    ) -> Result<reqwest::RequestBuilder> {
        let mut request = self.client.request(method, request_url(url)?);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }
        Ok(request)
    }

    fn check_status(response: reqwest::Response, url: &ParsedUrl) -> Result<reqwest::Response> {
        let status = response.status();
        debug!("HTTP {} {}", status, url.raw);
        if !status.is_success() {
            return Err(Error::Http(format!("{} {}", status, url.raw)));
        }
        Ok(response)
    }

    /// 업로드 요청 전송
    ///
    /// 본문을 읽은 바이트 수가 `timeout` 동안 그대로이고 응답도 없을 때만 실패한다.
    async fn send_upload(
        request: reqwest::RequestBuilder,
        uploaded: &AtomicU64,
        url: &ParsedUrl,
        timeout: Duration,
    ) -> Result<reqwest::Response> {
        let send = request.send();
        tokio::pin!(send);
        let mut seen = uploaded.load(Ordering::Relaxed);

        loop {
            tokio::select! {
                result = &mut send => return result.map_err(|e| map_reqwest(e, url)),
                _ = tokio::time::sleep(timeout) => {
                    let now = uploaded.load(Ordering::Relaxed);
                    if now == seen {
                        return Err(Error::TransportTimeout(format!(
                            "{:?} 동안 업로드 진행 없음 ({} bytes): {}",
                            timeout, now, url.raw
                        )));
                    }
                    seen = now;
                }
            }
        }
    }
}

/// 요청 URL (`hdr_*` 옵션은 헤더로 보내므로 쿼리에서 뺌)
fn request_url(url: &ParsedUrl) -> Result<reqwest::Url> {
    let mut target = reqwest::Url::parse(&url.raw).map_err(|e| Error::malformed(&url.raw, e.to_string()))?;
    if !target.query_pairs().any(|(key, _)| is_header_option(&key)) {
        return Ok(target);
    }

    let kept: Vec<(String, String)> = target
        .query_pairs()
        .filter(|(key, _)| !is_header_option(key))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    if kept.is_empty() {
        target.set_query(None);
    } else {
        target.query_pairs_mut().clear().extend_pairs(&kept);
    }
    Ok(target)
}

fn map_reqwest(e: reqwest::Error, url: &ParsedUrl) -> Error {
    if e.is_timeout() {
        Error::TransportTimeout(format!("{}: {}", url.raw, e))
    } else if e.is_connect() {
        Error::ConnectionRefused(format!("{}: {}", url.raw, e))
    } else {
        Error::Http(format!("{}: {}", url.raw, e))
    }
}

#[async_trait]
impl RemoteBackend for HttpBackend {
    async fn fetch(&self, url: &ParsedUrl, headers: &HeaderMap, timeout: Duration) -> Result<ByteStream> {
        let request = self.request(reqwest::Method::GET, url, headers)?;
        let response = tokio::time::timeout(timeout, request.send())
            .await
            .map_err(|_| Error::TransportTimeout(format!("{:?} 동안 응답 없음: {}", timeout, url.raw)))?
            .map_err(|e| map_reqwest(e, url))?;
        let response = Self::check_status(response, url)?;
        let body = response
            .bytes_stream()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e));
        Ok(boxed(StreamReader::new(body)))
    }

    async fn store(
        &self,
        url: &ParsedUrl,
        body: ByteStream,
        headers: &HeaderMap,
        timeout: Duration,
    ) -> Result<Option<u64>> {
        let uploaded = Arc::new(AtomicU64::new(0));
        let reader = UploadReader {
            inner: Mutex::new(body),
            uploaded: uploaded.clone(),
        };
        let request = self
            .request(reqwest::Method::PUT, url, headers)?
            .body(reqwest::Body::wrap_stream(ReaderStream::new(reader)));
        let response = Self::send_upload(request, &uploaded, url, timeout).await?;
        Self::check_status(response, url)?;
        Ok(Some(uploaded.load(Ordering::Relaxed)))
    }
}

/// 업로드 본문 (reqwest 본문 스트림은 Sync를 요구), 읽은 바이트 수 기록
struct UploadReader {
    inner: Mutex<ByteStream>,
    uploaded: Arc<AtomicU64>,
}

impl AsyncRead for UploadReader {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let result = this.inner.get_mut().as_mut().poll_read(cx, buf);
        let read = buf.filled().len() - before;
        if read > 0 {
            this.uploaded.fetch_add(read as u64, Ordering::Relaxed);
        }
        result
    }
}

/// 로컬 파일 (`file:///path`)
#[derive(Debug, Clone, Copy, Default)]
pub struct FileBackend;

impl FileBackend {
    fn local_path(url: &ParsedUrl) -> Result<&str> {
        if !url.host.is_empty() && !url.host.eq_ignore_ascii_case("localhost") {
            return Err(Error::malformed(&url.raw, "file URL은 로컬 호스트만 지원"));
        }
        if url.path.is_empty() {
            return Err(Error::malformed(&url.raw, "파일 경로 없음"));
        }
        Ok(url.path.as_str())
    }
}

#[async_trait]
impl RemoteBackend for FileBackend {
    async fn fetch(&self, url: &ParsedUrl, _headers: &HeaderMap, _timeout: Duration) -> Result<ByteStream> {
        let file = tokio::fs::File::open(Self::local_path(url)?).await?;
        Ok(boxed(file))
    }

    async fn store(
        &self,
        url: &ParsedUrl,
        mut body: ByteStream,
        _headers: &HeaderMap,
        _timeout: Duration,
    ) -> Result<Option<u64>> {
        let path = std::path::Path::new(Self::local_path(url)?);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(path).await?;
        let written = tokio::io::copy(&mut body, &mut file).await?;
        tokio::io::AsyncWriteExt::flush(&mut file).await?;
        Ok(Some(written))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::url::parse;
    use tokio::io::AsyncReadExt;

    #[test]
    fn test_default_registry() {
        let backends = Backends::default();
        assert!(backends.remote(Scheme::Http).is_ok());
        assert!(backends.remote(Scheme::File).is_ok());
        assert!(matches!(
            backends.remote(Scheme::Sftp),
            Err(Error::BackendUnavailable { scheme }) if scheme == "sftp"
        ));
        assert!(matches!(backends.rfcomm(), Err(Error::BackendUnavailable { .. })));
        assert!(Backends::empty().remote(Scheme::Http).is_err());
    }

    #[tokio::test]
    async fn test_file_backend_store_then_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("out.bin");
        let url = parse(&format!("file://{}", path.display())).unwrap();
        let headers = HeaderMap::new();

        let body = boxed(std::io::Cursor::new(b"file payload".to_vec()));
        let written = FileBackend
            .store(&url, body, &headers, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(written, Some(12));

        let mut stream = FileBackend.fetch(&url, &headers, Duration::from_secs(1)).await.unwrap();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"file payload");
    }

    #[test]
    fn test_request_url_drops_header_options() {
        let url = parse("http://example.com/file?hdr_x_token=t1&page=2&HDR_Accept=x").unwrap();
        assert_eq!(request_url(&url).unwrap().as_str(), "http://example.com/file?page=2");

        let url = parse("http://example.com/file?hdr_x_token=t1").unwrap();
        assert_eq!(request_url(&url).unwrap().as_str(), "http://example.com/file");

        let url = parse("http://example.com/a%20b?q=x%2By").unwrap();
        assert_eq!(request_url(&url).unwrap().as_str(), "http://example.com/a%20b?q=x%2By");
    }

    #[test]
    fn test_file_backend_rejects_remote_host() {
        let url = parse("file://example.com/etc/hosts").unwrap();
        assert!(matches!(
            FileBackend::local_path(&url),
            Err(Error::MalformedUrl { .. })
        ));
    }
}
