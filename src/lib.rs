//! # wwwget
//!
//! URL 스킴으로 전송을 고르는 바이트 스트림 송수신 도구
//!
//! ## 핵심 특징
//! - **스킴 디스패치**: `http(s)`, `ftp(s)`, `sftp`, `file`, `data`, `tcp`, `udp`, `bt`
//! - **역할 결정**: 수신은 기본 listen, 송신은 기본 connect, 옵션으로 변경
//! - **재접속 URL 알림**: listen 측이 실제 바인드 주소로 URL을 만들어 알림
//! - **UDP seq 모드**: 슬라이딩 윈도우 + 누적 ACK + RTO 재전송으로 순서/무손실 보장
//! - **UDP raw 모드**: 데이터그램 그대로 전달 (best-effort)
//! - **data: URL**: 네트워크 없이 인라인 인코딩/디코딩

pub mod archive;
pub mod backend;
pub mod client;
pub mod config;
pub mod data_url;
pub mod error;
pub mod frame;
pub mod headers;
pub mod options;
pub mod receiver;
pub mod role;
pub mod sender;
pub mod stream;
pub mod transport;
pub mod url;
pub mod window;

pub use archive::{ArchiveFormat, Archiver, FileArchiver};
pub use backend::{Backends, FileBackend, HttpBackend, RemoteBackend, RfcommBackend, RfcommListener};
pub use client::{Client, ReceiveOptions, ReceiveOutcome};
pub use config::Config;
pub use error::{Error, Result};
pub use frame::{Frame, FrameHeader, FrameKind};
pub use options::{parse_net_url, DatagramMode, NetOptions};
pub use role::{Announcer, Operation, Role};
pub use stream::ByteStream;
pub use transport::{Scheme, SendOutcome, Transport};
pub use url::{parse as parse_url, split_bt_netloc, BtAddress, ParsedUrl};

/// 프로토콜 버전
pub const PROTOCOL_VERSION: u8 = 1;

/// 매직 넘버 (패킷 식별용)
pub const MAGIC_NUMBER: u32 = 0x57574745; // "WWGE"

/// 기본 프레임 payload 크기 (바이트)
pub const DEFAULT_MTU_PAYLOAD: usize = 1200;

/// 최대 프레임 payload 크기 (헤더 포함 데이터그램이 64KB를 넘지 않도록)
pub const MAX_MTU_PAYLOAD: usize = 60000;

/// 기본 송신 윈도우 (프레임 수)
pub const DEFAULT_WINDOW_SIZE: usize = 32;

/// 수신 버퍼 크기
pub const MAX_DATAGRAM_SIZE: usize = 65535;
