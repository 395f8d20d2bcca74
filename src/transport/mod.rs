//! 스킴 → 전송 선택
//!
//! 스킴 문자열은 고정 테이블에서 [`Scheme`]으로 바뀌고, 각 스킴은 하나의 [`Transport`]
//! 변형에 대응한다. 스킴을 추가하려면 테이블과 변형만 늘리면 된다.

pub mod inline;
pub mod remote;
pub mod socket;
pub mod udp;

use std::fmt;
use std::net::SocketAddr;

use tokio::net::lookup_host;

use crate::backend::Backends;
use crate::headers::HeaderMap;
use crate::options::NetOptions;
use crate::role::Announcer;
use crate::stream::ByteStream;
use crate::url::ParsedUrl;
use crate::{Config, Error, Result};

/// 지원 스킴
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Http,
    Https,
    Ftp,
    Ftps,
    Sftp,
    File,
    Data,
    Tcp,
    Udp,
    Bt,
}

/// 스킴 조회 테이블
const SCHEMES: &[(&str, Scheme)] = &[
    ("http", Scheme::Http),
    ("https", Scheme::Https),
    ("ftp", Scheme::Ftp),
    ("ftps", Scheme::Ftps),
    ("sftp", Scheme::Sftp),
    ("file", Scheme::File),
    ("data", Scheme::Data),
    ("tcp", Scheme::Tcp),
    ("udp", Scheme::Udp),
    ("bt", Scheme::Bt),
];

impl Scheme {
    /// 스킴 문자열 조회 (대소문자 무시)
    pub fn lookup(scheme: &str) -> Result<Self> {
        SCHEMES
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(scheme))
            .map(|(_, s)| *s)
            .ok_or_else(|| Error::UnsupportedScheme {
                scheme: scheme.to_string(),
            })
    }

    pub fn as_str(&self) -> &'static str {
        SCHEMES
            .iter()
            .find(|(_, s)| s == self)
            .map(|(name, _)| *name)
            .unwrap_or("unknown")
    }

    /// 스킴이 사용하는 전송
    pub fn transport(&self) -> Transport {
        match self {
            Scheme::Http | Scheme::Https | Scheme::Ftp | Scheme::Ftps | Scheme::Sftp | Scheme::File => {
                Transport::Remote
            }
            Scheme::Data => Transport::Inline,
            Scheme::Tcp => Transport::Stream,
            Scheme::Bt => Transport::Rfcomm,
            Scheme::Udp => Transport::Datagram,
        }
    }

    /// 소켓 역할 결정이 필요한 스킴
    pub fn is_socket(&self) -> bool {
        matches!(self, Scheme::Tcp | Scheme::Udp | Scheme::Bt)
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 전송 변형
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// 외부 클라이언트 위임 (HTTP/FTP/SFTP/file)
    Remote,

    /// data: URL 코덱
    Inline,

    /// TCP 스트림 중계
    Stream,

    /// Bluetooth RFCOMM 스트림 중계
    Rfcomm,

    /// UDP (raw / seq)
    Datagram,
}

/// 송신 결과
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendOutcome {
    /// 전송한 바이트 (백엔드가 알려주지 않으면 None)
    pub bytes: Option<u64>,

    /// `data:` 송신 시 생성된 URL
    pub data_url: Option<String>,
}

/// 전송 1회 동안 쓰는 값들
pub struct TransferContext<'a> {
    pub url: ParsedUrl,
    pub scheme: Scheme,
    pub opts: NetOptions,

    /// URL 옵션이 반영된 세션 설정
    pub config: Config,

    /// 호출자 헤더 + `hdr_*` 헤더
    pub headers: HeaderMap,

    pub announcer: Option<&'a Announcer>,
    pub backends: &'a Backends,
}

impl Transport {
    /// URL에서 스트림 수신
    pub async fn receive(&self, ctx: &TransferContext<'_>) -> Result<ByteStream> {
        match self {
            Transport::Remote => remote::receive(ctx).await,
            Transport::Inline => inline::receive(ctx),
            Transport::Stream => socket::receive_tcp(ctx).await,
            Transport::Rfcomm => socket::receive_rfcomm(ctx).await,
            Transport::Datagram => udp::receive(ctx).await,
        }
    }

    /// URL로 스트림 송신
    pub async fn send(&self, source: ByteStream, ctx: &TransferContext<'_>) -> Result<SendOutcome> {
        match self {
            Transport::Remote => remote::send(source, ctx).await,
            Transport::Inline => inline::send(source, ctx).await,
            Transport::Stream => socket::send_tcp(source, ctx).await,
            Transport::Rfcomm => socket::send_rfcomm(source, ctx).await,
            Transport::Datagram => udp::send(source, ctx).await,
        }
    }
}

/// listen 역할 바인드 주소 (`bind` 옵션 > URL host, 포트 없으면 0)
pub(crate) async fn listen_addr(ctx: &TransferContext<'_>) -> Result<SocketAddr> {
    let port = ctx.url.port.unwrap_or(0);

    if let Some(bind) = ctx.opts.bind.as_deref() {
        if let Ok(addr) = bind.parse::<SocketAddr>() {
            return Ok(addr);
        }
        let host = bind.trim_start_matches('[').trim_end_matches(']');
        return resolve(&ctx.url.raw, host, port).await;
    }

    let host = if ctx.url.host.is_empty() {
        "0.0.0.0"
    } else {
        ctx.url.host.as_str()
    };
    resolve(&ctx.url.raw, host, port).await
}

/// connect 역할 대상 주소 (host, port 필수)
pub(crate) async fn connect_addr(ctx: &TransferContext<'_>) -> Result<SocketAddr> {
    if ctx.url.host.is_empty() {
        return Err(Error::malformed(&ctx.url.raw, "connect 역할에는 호스트가 필요함"));
    }
    let port = ctx
        .url
        .port
        .filter(|p| *p != 0)
        .ok_or_else(|| Error::malformed(&ctx.url.raw, "connect 역할에는 포트가 필요함"))?;
    resolve(&ctx.url.raw, &ctx.url.host, port).await
}

async fn resolve(url: &str, host: &str, port: u16) -> Result<SocketAddr> {
    lookup_host((host, port))
        .await
        .map_err(|e| Error::malformed(url, format!("주소 해석 실패 {}: {}", host, e)))?
        .next()
        .ok_or_else(|| Error::malformed(url, format!("주소 해석 결과 없음: {}", host)))
}
