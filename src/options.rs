//! 전송 옵션 해석
//!
//! URL 쿼리에서 전송 계층이 소비하는 옵션(`mode`, `bind`, `print_url`, `channel` 등)을
//! 타입이 있는 값으로 바꾼다. `hdr_*` 옵션은 [`crate::headers`]가 처리한다.

use std::str::FromStr;
use std::time::Duration;

use crate::role::Role;
use crate::url::{parse, parse_bt_channel, BtAddress, ParsedUrl};
use crate::{Config, Error, Result};

/// UDP 전달 모드
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DatagramMode {
    /// write 한 번 = 데이터그램 하나, ACK/재조립 없음
    Raw,

    /// 순서 보장 + 재전송 (기본값)
    #[default]
    Seq,
}

impl DatagramMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatagramMode::Raw => "raw",
            DatagramMode::Seq => "seq",
        }
    }
}

impl FromStr for DatagramMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "raw" => Ok(DatagramMode::Raw),
            "seq" | "" => Ok(DatagramMode::Seq),
            other => Err(format!("알 수 없는 mode: {}", other)),
        }
    }
}

/// 해석된 네트워크 옵션
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NetOptions {
    pub mode: DatagramMode,

    /// listen 역할의 로컬 바인드 주소
    pub bind: Option<String>,

    /// 바인드 후 재접속 URL 알림
    pub print_url: bool,

    /// `channel` 쿼리 (netloc 채널보다 우선순위 낮음)
    pub channel: Option<u8>,

    /// 명시적 역할 지정 (`role=listen|connect`, `listen=1|0`)
    pub role: Option<Role>,

    pub timeout: Option<Duration>,
    pub window: Option<usize>,
    pub rto_ms: Option<u64>,
    pub mtu: Option<usize>,

    /// `data:` 송신 시 헤더가 없을 때 사용할 MIME
    pub mime: Option<String>,
    pub text: Option<bool>,
}

impl NetOptions {
    /// ParsedUrl의 옵션 맵에서 생성
    pub fn from_url(parsed: &ParsedUrl) -> Result<Self> {
        let url = parsed.raw.as_str();
        let mut opts = NetOptions::default();

        if let Some(mode) = parsed.option("mode") {
            opts.mode = mode.parse().map_err(|e: String| Error::malformed(url, e))?;
        }

        opts.bind = parsed
            .option("bind")
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .map(str::to_string);

        if let Some(flag) = parsed.option("print_url") {
            opts.print_url = parse_flag(url, "print_url", flag)?;
        }

        if let Some(ch) = parsed.option("channel") {
            opts.channel = parse_bt_channel(url, ch)?;
        }

        if let Some(role) = parsed.option("role") {
            opts.role = Some(role.parse().map_err(|e: String| Error::malformed(url, e))?);
        } else if let Some(listen) = parsed.option("listen") {
            opts.role = Some(if parse_flag(url, "listen", listen)? {
                Role::Listen
            } else {
                Role::Connect
            });
        }

        if let Some(secs) = parsed.option("timeout") {
            let secs: f64 = secs
                .trim()
                .parse()
                .ok()
                .filter(|s: &f64| s.is_finite() && *s > 0.0)
                .ok_or_else(|| Error::malformed(url, format!("잘못된 timeout: {}", secs)))?;
            opts.timeout = Some(Duration::from_secs_f64(secs));
        }

        opts.window = parse_number(url, parsed, "window")?;
        opts.rto_ms = parse_number(url, parsed, "rto_ms")?;
        opts.mtu = parse_number(url, parsed, "mtu")?;

        opts.mime = parsed.option("mime").map(str::to_string);
        if let Some(flag) = parsed.option("text") {
            opts.text = Some(parse_flag(url, "text", flag)?);
        }

        Ok(opts)
    }

    /// 옵션을 반영한 세션 설정
    pub fn session_config(&self, base: &Config) -> Config {
        let mut config = base.clone();
        if let Some(timeout) = self.timeout {
            config.io_timeout = timeout;
            config.idle_timeout_ms = timeout.as_millis().max(1) as u64;
        }
        if let Some(window) = self.window {
            config.window_size = window.max(1);
        }
        if let Some(rto_ms) = self.rto_ms {
            config.rto_ms = rto_ms.max(1);
        }
        if let Some(mtu) = self.mtu {
            config.mtu_payload = mtu.clamp(1, crate::MAX_MTU_PAYLOAD);
        }
        // 미확인 프레임이 상대 재정렬 범위를 넘지 않도록
        config.window_size = config.window_size.clamp(1, config.reorder_limit.max(1) as usize);
        config
    }
}

/// URL을 분해하고 네트워크 옵션까지 해석
pub fn parse_net_url(url: &str) -> Result<(ParsedUrl, NetOptions)> {
    let parsed = parse(url)?;
    let opts = NetOptions::from_url(&parsed)?;
    Ok((parsed, opts))
}

/// bt 대상 주소/채널 결정
///
/// netloc에 포함된 채널이 `channel` 쿼리보다 우선한다.
pub fn bt_target(parsed: &ParsedUrl, opts: &NetOptions) -> BtAddress {
    let netloc_channel = parsed.port.and_then(|p| u8::try_from(p).ok());
    BtAddress {
        addr: parsed.host.clone(),
        channel: netloc_channel.or(opts.channel),
    }
}

/// `1/true/yes/on`, `0/false/no/off`
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_flag(url: &str, key: &str, value: &str) -> Result<bool> {
    parse_bool(value).ok_or_else(|| Error::malformed(url, format!("{} 값이 불리언이 아님: {}", key, value)))
}

fn parse_number<T: FromStr>(url: &str, parsed: &ParsedUrl, key: &str) -> Result<Option<T>> {
    match parsed.option(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| Error::malformed(url, format!("{} 값이 숫자가 아님: {}", key, raw))),
        None => Ok(None),
    }
}
