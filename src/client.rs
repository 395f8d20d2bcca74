//! 전송 조율자
//!
//! URL 하나를 받아 스킴을 고르고, 옵션을 해석하고, 전송에 넘긴다.
//! 호출자는 항상 바이트 스트림만 본다.
//!
//! ```no_run
//! # async fn demo() -> wwwget::Result<()> {
//! let client = wwwget::Client::default();
//! let bytes = client.receive_bytes("data:text/plain;base64,aGk=").await?;
//! assert_eq!(bytes, b"hi");
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{info, info_span, warn, Instrument};

use crate::archive::{default_extract_dir, ArchiveFormat, Archiver, FileArchiver};
use crate::backend::Backends;
use crate::headers::{map_headers, merge_headers, HeaderMap};
use crate::options::parse_net_url;
use crate::role::Announcer;
use crate::stream::{boxed, ByteStream};
use crate::transport::{Scheme, SendOutcome, TransferContext};
use crate::{Config, Error, Result};

/// 파일로 받을 때의 옵션
#[derive(Debug, Clone)]
pub struct ReceiveOptions {
    /// 받은 파일을 아카이브로 보고 풀기
    pub extract: bool,

    /// 풀 위치 (None이면 파일 이름에서 확장자를 뺀 디렉터리)
    pub extract_dir: Option<PathBuf>,

    /// 푼 뒤 아카이브 파일 유지
    pub keep_archive: bool,

    /// 실패 시 `<path>.part` 로 남기기
    pub keep_partial: bool,
}

impl Default for ReceiveOptions {
    fn default() -> Self {
        Self {
            extract: false,
            extract_dir: None,
            keep_archive: true,
            keep_partial: false,
        }
    }
}

/// 파일 수신 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveOutcome {
    pub path: PathBuf,
    pub bytes: u64,
    pub extracted_to: Option<PathBuf>,
}

/// URL 송수신 클라이언트
#[derive(Clone)]
pub struct Client {
    config: Config,
    backends: Backends,
    archiver: Arc<dyn Archiver>,
    archive_format: ArchiveFormat,
    announcer: Option<Announcer>,
    headers: HeaderMap,
}

impl Default for Client {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl Client {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            backends: Backends::default(),
            archiver: Arc::new(FileArchiver),
            archive_format: ArchiveFormat::default(),
            announcer: None,
            headers: HeaderMap::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn with_backends(mut self, backends: Backends) -> Self {
        self.backends = backends;
        self
    }

    pub fn with_archiver(mut self, archiver: Arc<dyn Archiver>) -> Self {
        self.archiver = archiver;
        self
    }

    /// 디렉터리 송신 시 묶을 형식
    pub fn with_archive_format(mut self, format: ArchiveFormat) -> Self {
        self.archive_format = format;
        self
    }

    /// listen 역할의 재접속 URL 콜백
    pub fn with_announcer<F>(mut self, announcer: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.announcer = Some(Arc::new(announcer));
        self
    }

    /// 모든 요청에 붙일 헤더 (URL의 `hdr_*` 옵션이 우선)
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        self
    }

    pub fn with_user_agent(self, user_agent: &str) -> Self {
        self.with_header("user-agent", user_agent)
    }

    fn context(&self, url: &str) -> Result<TransferContext<'_>> {
        let (parsed, opts) = parse_net_url(url)?;
        let scheme = Scheme::lookup(&parsed.scheme)?;
        let config = opts.session_config(&self.config);
        let headers = merge_headers(&self.headers, &map_headers(&parsed.options));

        Ok(TransferContext {
            url: parsed,
            scheme,
            opts,
            config,
            headers,
            announcer: self.announcer.as_ref(),
            backends: &self.backends,
        })
    }

    /// URL에서 수신 → 읽기 스트림
    pub async fn receive(&self, url: &str) -> Result<ByteStream> {
        let ctx = self.context(url)?;
        let span = info_span!("receive", scheme = %ctx.scheme);
        async move {
            info!("수신 시작: {}", ctx.url.raw);
            ctx.scheme.transport().receive(&ctx).await
        }
        .instrument(span)
        .await
    }

    /// URL로 송신
    pub async fn send(&self, source: ByteStream, url: &str) -> Result<SendOutcome> {
        let ctx = self.context(url)?;
        let span = info_span!("send", scheme = %ctx.scheme);
        async move {
            info!("송신 시작: {}", ctx.url.raw);
            let outcome = ctx.scheme.transport().send(source, &ctx).await?;
            info!("송신 완료: {:?} bytes", outcome.bytes);
            Ok(outcome)
        }
        .instrument(span)
        .await
    }

    /// 전체를 메모리로 수신
    pub async fn receive_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let mut stream = self.receive(url).await?;
        let mut data = Vec::new();
        stream.read_to_end(&mut data).await?;
        Ok(data)
    }

    /// writer로 복사 → 복사한 바이트 수
    pub async fn receive_to_writer<W>(&self, url: &str, writer: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut stream = self.receive(url).await?;
        let copied = tokio::io::copy(&mut stream, writer).await?;
        writer.flush().await?;
        Ok(copied)
    }

    /// 파일로 수신
    ///
    /// 같은 디렉터리의 임시 파일에 받은 뒤 성공하면 `path`로 옮긴다.
    /// 실패하면 임시 파일을 지운다 (`keep_partial`이면 `<path>.part`로 남김).
    pub async fn receive_to_path(
        &self,
        url: &str,
        path: &Path,
        options: &ReceiveOptions,
    ) -> Result<ReceiveOutcome> {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        tokio::fs::create_dir_all(&dir).await?;

        let staging = tempfile::Builder::new()
            .prefix(".wwwget-")
            .suffix(".part")
            .tempfile_in(&dir)?;
        let mut file = tokio::fs::File::from_std(staging.reopen()?);

        let received = async {
            let copied = self.receive_to_writer(url, &mut file).await?;
            file.sync_all().await?;
            Ok::<_, Error>(copied)
        }
        .await;
        drop(file);

        let bytes = match received {
            Ok(bytes) => bytes,
            Err(e) => {
                if options.keep_partial || self.config.keep_partial {
                    let mut partial = path.as_os_str().to_owned();
                    partial.push(".part");
                    let partial = PathBuf::from(partial);
                    match staging.persist(&partial) {
                        Ok(_) => warn!("수신 실패, 부분 파일 유지: {}", partial.display()),
                        Err(pe) => warn!("부분 파일 유지 실패: {}", pe.error),
                    }
                }
                return Err(e);
            }
        };

        staging.persist(path).map_err(|e| Error::from(e.error))?;
        info!("파일 수신 완료: {} ({} bytes)", path.display(), bytes);

        let extracted_to = if options.extract {
            let dest = options
                .extract_dir
                .clone()
                .unwrap_or_else(|| default_extract_dir(path));
            self.archiver.extract(path, &dest).await?;
            if !options.keep_archive {
                tokio::fs::remove_file(path).await?;
            }
            info!("압축 해제: {}", dest.display());
            Some(dest)
        } else {
            None
        };

        Ok(ReceiveOutcome {
            path: path.to_path_buf(),
            bytes,
            extracted_to,
        })
    }

    /// 메모리 데이터 송신
    pub async fn send_bytes(&self, data: impl Into<Bytes>, url: &str) -> Result<SendOutcome> {
        let source = boxed(std::io::Cursor::new(data.into()));
        self.send(source, url).await
    }

    /// 파일 송신, 디렉터리는 `archive_format`으로 묶어서 송신
    pub async fn send_path(&self, path: &Path, url: &str) -> Result<SendOutcome> {
        let meta = tokio::fs::metadata(path).await?;
        if !meta.is_dir() {
            let file = tokio::fs::File::open(path).await?;
            return self.send(boxed(file), url).await;
        }

        let bundle = tempfile::Builder::new()
            .prefix(".wwwget-")
            .suffix(&format!(".{}", self.archive_format.extension()))
            .tempfile()?;
        self.archiver
            .pack_dir(path, bundle.path(), self.archive_format)
            .await?;
        let file = tokio::fs::File::open(bundle.path()).await?;
        let outcome = self.send(boxed(file), url).await;
        drop(bundle);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unsupported_scheme() {
        let client = Client::default();
        let err = client.receive("gopher://example.com/").await.err().unwrap();
        assert!(matches!(err, Error::UnsupportedScheme { scheme } if scheme == "gopher"));
    }

    #[tokio::test]
    async fn test_unregistered_backend() {
        let client = Client::default();
        for url in ["ftp://example.com/a", "sftp://example.com/a", "bt://00:11:22:33:44:55:3"] {
            let err = client.receive(url).await.err().unwrap();
            assert!(matches!(err, Error::BackendUnavailable { .. }), "{}: {:?}", url, err);
        }
    }

    #[tokio::test]
    async fn test_malformed_bt_address_checked_before_backend() {
        let client = Client::default();
        let err = client.receive("bt://00:11:22:33:44:ZZ/").await.err().unwrap();
        assert!(matches!(err, Error::MalformedUrl { .. }));
    }

    #[tokio::test]
    async fn test_data_roundtrip_through_client() {
        let client = Client::default();
        let outcome = client.send_bytes(&b"payload"[..], "data:").await.unwrap();
        let url = outcome.data_url.unwrap();
        assert_eq!(client.receive_bytes(&url).await.unwrap(), b"payload");
    }

    #[tokio::test]
    async fn test_receive_to_path_with_extract() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("tree");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("inner.txt"), b"inside").unwrap();

        let archive = tmp.path().join("tree.tar");
        FileArchiver.pack_dir(&src, &archive, ArchiveFormat::Tar).await.unwrap();
        let url = format!("file://{}", archive.display());

        let client = Client::default();
        let target = tmp.path().join("dl").join("copy.tar");
        let options = ReceiveOptions {
            extract: true,
            keep_archive: false,
            ..Default::default()
        };
        let outcome = client.receive_to_path(&url, &target, &options).await.unwrap();

        let dest = outcome.extracted_to.unwrap();
        assert_eq!(dest, tmp.path().join("dl").join("copy"));
        assert_eq!(std::fs::read(dest.join("inner.txt")).unwrap(), b"inside");
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn test_send_dir_in_each_format_then_extract() {
        for format in [ArchiveFormat::TarGz, ArchiveFormat::Zip] {
            let tmp = tempfile::tempdir().unwrap();
            let src = tmp.path().join("tree");
            std::fs::create_dir_all(src.join("sub")).unwrap();
            std::fs::write(src.join("sub").join("inner.txt"), b"inside").unwrap();

            let stored = tmp.path().join(format!("stored.{}", format.extension()));
            let url = format!("file://{}", stored.display());
            Client::default()
                .with_archive_format(format)
                .send_path(&src, &url)
                .await
                .unwrap();

            let options = ReceiveOptions {
                extract: true,
                ..Default::default()
            };
            let target = tmp.path().join(format!("copy.{}", format.extension()));
            let outcome = Client::default()
                .receive_to_path(&url, &target, &options)
                .await
                .unwrap();

            let dest = outcome.extracted_to.unwrap();
            assert_eq!(dest, tmp.path().join("copy"));
            assert_eq!(std::fs::read(dest.join("sub").join("inner.txt")).unwrap(), b"inside");
            assert!(target.exists());
        }
    }
}
