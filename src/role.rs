//! 소켓 역할 결정 + 재접속 URL 알림

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;

use tracing::info;

use crate::options::{DatagramMode, NetOptions};
use crate::url::ParsedUrl;

/// 전송 방향
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Receive,
    Send,
}

/// 로컬 엔드포인트 역할
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// 바인드 후 상대 접속 대기
    Listen,

    /// 상대에게 직접 접속
    Connect,
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "listen" | "server" => Ok(Role::Listen),
            "connect" | "client" => Ok(Role::Connect),
            other => Err(format!("알 수 없는 role: {}", other)),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Listen => write!(f, "listen"),
            Role::Connect => write!(f, "connect"),
        }
    }
}

/// 역할 결정
///
/// 기본값: 수신은 listen, 송신은 connect. 옵션으로 덮어쓸 수 있다.
pub fn resolve_role(operation: Operation, opts: &NetOptions) -> Role {
    opts.role.unwrap_or(match operation {
        Operation::Receive => Role::Listen,
        Operation::Send => Role::Connect,
    })
}

/// 재접속 URL 콜백
///
/// listen 역할에서 `print_url`이 켜져 있으면 accept 전에 한 번 호출된다.
pub type Announcer = Arc<dyn Fn(&str) + Send + Sync>;

/// 알림 전달 (콜백이 없으면 로그만)
pub(crate) fn announce(announcer: Option<&Announcer>, url: &str) {
    info!("재접속 URL: {}", url);
    if let Some(callback) = announcer {
        callback(url);
    }
}

/// 바인드된 소켓 주소로 재접속 URL 생성
///
/// 0.0.0.0 / :: 로 바인드된 경우 외부로 나가는 인터페이스 주소로 바꾼다.
pub fn reconnect_url(parsed: &ParsedUrl, opts: &NetOptions, local: SocketAddr) -> String {
    let ip = announce_ip(local.ip());
    let host = match ip {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => format!("[{}]", v6),
    };

    let mut query = Vec::new();
    if parsed.scheme == "udp" && opts.mode == DatagramMode::Raw {
        query.push("mode=raw");
    }
    // 명시적으로 listen 하는 쪽(송신 등)의 상대는 기본 역할이 listen일 수 있음
    if opts.role == Some(Role::Listen) {
        query.push("role=connect");
    }

    let mut url = format!("{}://{}:{}{}", parsed.scheme, host, local.port(), parsed.path);
    if !query.is_empty() {
        url.push('?');
        url.push_str(&query.join("&"));
    }
    url
}

/// Bluetooth 재접속 URL
pub fn bt_reconnect_url(parsed: &ParsedUrl, adapter_addr: &str, channel: u8) -> String {
    format!("bt://{}:{}{}", adapter_addr, channel, parsed.path)
}

fn announce_ip(ip: IpAddr) -> IpAddr {
    if !ip.is_unspecified() {
        return ip;
    }
    outbound_ip(ip.is_ipv6()).unwrap_or(match ip {
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::LOCALHOST),
    })
}

/// 기본 경로 인터페이스 주소 (UDP connect는 패킷을 보내지 않음)
fn outbound_ip(v6: bool) -> Option<IpAddr> {
    let (bind, probe) = if v6 {
        ("[::]:0", "[2001:db8::1]:9")
    } else {
        ("0.0.0.0:0", "192.0.2.1:9")
    };
    let socket = std::net::UdpSocket::bind(bind).ok()?;
    socket.connect(probe).ok()?;
    let ip = socket.local_addr().ok()?.ip();
    (!ip.is_unspecified()).then_some(ip)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::parse_net_url;

    #[test]
    fn test_default_roles() {
        let opts = NetOptions::default();
        assert_eq!(resolve_role(Operation::Receive, &opts), Role::Listen);
        assert_eq!(resolve_role(Operation::Send, &opts), Role::Connect);
    }

    #[test]
    fn test_role_override() {
        let (_, opts) = parse_net_url("tcp://127.0.0.1:9000/?role=connect").unwrap();
        assert_eq!(resolve_role(Operation::Receive, &opts), Role::Connect);

        let (_, opts) = parse_net_url("tcp://0.0.0.0:9000/?role=listen").unwrap();
        assert_eq!(resolve_role(Operation::Send, &opts), Role::Listen);
    }

    #[test]
    fn test_reconnect_url_uses_bound_port() {
        let (parsed, opts) = parse_net_url("udp://127.0.0.1:0/out.bin?mode=raw").unwrap();
        let url = reconnect_url(&parsed, &opts, "127.0.0.1:40123".parse().unwrap());
        assert_eq!(url, "udp://127.0.0.1:40123/out.bin?mode=raw");
    }

    #[test]
    fn test_reconnect_url_for_listening_sender_asks_peer_to_connect() {
        let (parsed, opts) = parse_net_url("udp://127.0.0.1:0/?mode=raw&role=listen").unwrap();
        let url = reconnect_url(&parsed, &opts, "127.0.0.1:40123".parse().unwrap());
        assert_eq!(url, "udp://127.0.0.1:40123/?mode=raw&role=connect");

        let (parsed, opts) = parse_net_url("tcp://127.0.0.1:0?listen=1").unwrap();
        let url = reconnect_url(&parsed, &opts, "127.0.0.1:7000".parse().unwrap());
        assert_eq!(url, "tcp://127.0.0.1:7000?role=connect");
    }

    #[test]
    fn test_reconnect_url_replaces_unspecified_host() {
        let (parsed, opts) = parse_net_url("tcp://0.0.0.0:0/").unwrap();
        let url = reconnect_url(&parsed, &opts, "0.0.0.0:5555".parse().unwrap());
        assert!(url.starts_with("tcp://"));
        assert!(url.ends_with(":5555/"));
        assert!(!url.contains("0.0.0.0"));
    }

    #[test]
    fn test_bt_reconnect_url() {
        let (parsed, _) = parse_net_url("bt://00:00:00:00:00:00:3/out.bin?print_url=1").unwrap();
        assert_eq!(
            bt_reconnect_url(&parsed, "AA:BB:CC:DD:EE:FF", 3),
            "bt://AA:BB:CC:DD:EE:FF:3/out.bin"
        );
    }
}
