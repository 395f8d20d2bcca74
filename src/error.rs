//! 에러 타입 정의

use std::io;

use thiserror::Error;

/// wwwget 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(io::Error),

    #[error("직렬화 에러: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("잘못된 URL: {url} ({reason})")]
    MalformedUrl { url: String, reason: String },

    #[error("지원하지 않는 스킴: {scheme}")]
    UnsupportedScheme { scheme: String },

    #[error("유효하지 않은 data URL: {reason}")]
    InvalidDataUrl { reason: String },

    #[error("전송 타임아웃: {0}")]
    TransportTimeout(String),

    #[error("연결 거부: {0}")]
    ConnectionRefused(String),

    #[error("연결 리셋: {0}")]
    ConnectionReset(String),

    #[error("프로토콜 위반: {0}")]
    ProtocolViolation(String),

    #[error("아카이브 해제 실패: {0}")]
    ArchiveExtractionFailed(String),

    #[error("'{scheme}' 스킴을 처리할 백엔드가 등록되지 않음")]
    BackendUnavailable { scheme: String },

    #[error("HTTP 에러: {0}")]
    Http(String),

    #[error("알 수 없는 에러: {0}")]
    Unknown(String),
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn malformed(url: &str, reason: impl Into<String>) -> Self {
        Error::MalformedUrl {
            url: url.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_data_url(reason: impl Into<String>) -> Self {
        Error::InvalidDataUrl {
            reason: reason.into(),
        }
    }

    /// io::Error로 전달될 때 사용할 ErrorKind
    fn io_kind(&self) -> io::ErrorKind {
        match self {
            Error::Io(e) => e.kind(),
            Error::TransportTimeout(_) => io::ErrorKind::TimedOut,
            Error::ConnectionRefused(_) => io::ErrorKind::ConnectionRefused,
            Error::ConnectionReset(_) => io::ErrorKind::ConnectionReset,
            Error::ProtocolViolation(_) | Error::Serialization(_) => io::ErrorKind::InvalidData,
            Error::MalformedUrl { .. } | Error::InvalidDataUrl { .. } => {
                io::ErrorKind::InvalidInput
            }
            Error::UnsupportedScheme { .. } | Error::BackendUnavailable { .. } => {
                io::ErrorKind::Unsupported
            }
            Error::ArchiveExtractionFailed(_) | Error::Http(_) | Error::Unknown(_) => {
                io::ErrorKind::Other
            }
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        // 스트림 리더를 거쳐 io::Error로 포장된 전송 에러는 원래 값으로 복원
        if e.get_ref().is_some_and(|inner| inner.is::<Error>()) {
            if let Some(inner) = e.into_inner() {
                if let Ok(err) = inner.downcast::<Error>() {
                    return *err;
                }
            }
            return Error::Unknown("io 에러 복원 실패".into());
        }

        match e.kind() {
            io::ErrorKind::ConnectionRefused => Error::ConnectionRefused(e.to_string()),
            io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted => {
                Error::ConnectionReset(e.to_string())
            }
            io::ErrorKind::TimedOut => Error::TransportTimeout(e.to_string()),
            _ => Error::Io(e),
        }
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Io(inner) => inner,
            other => io::Error::new(other.io_kind(), other),
        }
    }
}
