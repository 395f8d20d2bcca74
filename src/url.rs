//! URL 분해
//!
//! - `scheme://[user[:pass]@]host[:port]/path?key=value` 형태를 분해
//! - `data:` 는 authority 없이 나머지를 통째로 path로 보관
//! - `bt://` 는 netloc이 `주소[:채널]` 이므로 일반 host:port 파싱을 쓰지 않음

use std::collections::BTreeMap;

use crate::{Error, Result};

/// 모든 바이트가 0인 Bluetooth 주소 (어댑터 기본값)
pub const BT_ANY_ADDR: &str = "00:00:00:00:00:00";

/// RFCOMM 채널 최대값
pub const BT_MAX_CHANNEL: u8 = 30;

/// 분해된 URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedUrl {
    /// 원본 URL 문자열
    pub raw: String,

    /// 소문자 스킴
    pub scheme: String,

    /// 호스트 (bt 스킴은 정규화된 장치 주소)
    pub host: String,

    /// 포트 (bt 스킴은 netloc에 포함된 채널)
    pub port: Option<u16>,

    /// 퍼센트 디코딩된 경로
    pub path: String,

    /// 쿼리 옵션 (키는 소문자, 중복 키는 마지막 값)
    pub options: BTreeMap<String, String>,

    pub user: Option<String>,
    pub password: Option<String>,
}

impl ParsedUrl {
    /// 옵션 값 조회
    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    /// `host:port` 문자열 (IPv6는 대괄호로 감쌈)
    pub fn host_port(&self) -> Option<String> {
        let port = self.port?;
        if self.host.contains(':') {
            Some(format!("[{}]:{}", self.host, port))
        } else {
            Some(format!("{}:{}", self.host, port))
        }
    }
}

/// URL 분해
pub fn parse(url: &str) -> Result<ParsedUrl> {
    let trimmed = url.trim();
    let (scheme, rest) = trimmed
        .split_once(':')
        .ok_or_else(|| Error::malformed(url, "스킴 없음"))?;

    if !is_valid_scheme(scheme) {
        return Err(Error::malformed(url, "스킴 없음"));
    }
    let scheme = scheme.to_ascii_lowercase();

    if scheme == "data" {
        // data URL의 페이로드에는 '?'/'#'이 그대로 들어갈 수 있으므로 건드리지 않음.
        // 헤더 없이 `data:?mime=...` 형태인 송신 템플릿만 옵션으로 읽는다.
        let options = match rest.strip_prefix('?') {
            Some(query) if !query.contains(',') => parse_query(url, query)?,
            _ => BTreeMap::new(),
        };
        return Ok(ParsedUrl {
            raw: trimmed.to_string(),
            scheme,
            host: String::new(),
            port: None,
            path: rest.to_string(),
            options,
            user: None,
            password: None,
        });
    }

    let rest = rest
        .strip_prefix("//")
        .ok_or_else(|| Error::malformed(url, "'//' authority 구분자 없음"))?;
    let rest = rest.split('#').next().unwrap_or_default();

    let netloc_end = rest.find(['/', '?']).unwrap_or(rest.len());
    let (netloc, remainder) = rest.split_at(netloc_end);
    let (path, query) = match remainder.split_once('?') {
        Some((p, q)) => (p, q),
        None => (remainder, ""),
    };

    let (userinfo, hostport) = match netloc.rsplit_once('@') {
        Some((u, h)) => (Some(u), h),
        None => (None, netloc),
    };
    let (user, password) = match userinfo {
        Some(info) => match info.split_once(':') {
            Some((u, p)) => (
                Some(percent_decode_str(url, u)?),
                Some(percent_decode_str(url, p)?),
            ),
            None => (Some(percent_decode_str(url, info)?), None),
        },
        None => (None, None),
    };

    let (host, port) = if scheme == "bt" {
        let addr = split_bt_netloc(hostport).map_err(|e| match e {
            Error::MalformedUrl { reason, .. } => Error::malformed(url, reason),
            other => other,
        })?;
        (addr.addr, addr.channel.map(u16::from))
    } else {
        split_host_port(url, hostport)?
    };

    Ok(ParsedUrl {
        raw: trimmed.to_string(),
        scheme,
        host,
        port,
        path: percent_decode_str(url, path)?,
        options: parse_query(url, query)?,
        user,
        password,
    })
}

fn is_valid_scheme(scheme: &str) -> bool {
    let mut chars = scheme.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

fn split_host_port(url: &str, hostport: &str) -> Result<(String, Option<u16>)> {
    if let Some(v6) = hostport.strip_prefix('[') {
        let (host, after) = v6
            .split_once(']')
            .ok_or_else(|| Error::malformed(url, "닫히지 않은 IPv6 리터럴"))?;
        let port = match after {
            "" => None,
            p => {
                let p = p
                    .strip_prefix(':')
                    .ok_or_else(|| Error::malformed(url, "IPv6 리터럴 뒤 잘못된 문자"))?;
                parse_port(url, p)?
            }
        };
        return Ok((host.to_string(), port));
    }

    match hostport.split_once(':') {
        Some((_, p)) if p.contains(':') => {
            Err(Error::malformed(url, "IPv6 주소는 대괄호로 감싸야 함"))
        }
        Some((h, p)) => Ok((h.to_string(), parse_port(url, p)?)),
        None => Ok((hostport.to_string(), None)),
    }
}

fn parse_port(url: &str, port: &str) -> Result<Option<u16>> {
    if port.is_empty() {
        return Ok(None);
    }
    port.parse::<u16>()
        .map(Some)
        .map_err(|_| Error::malformed(url, format!("잘못된 포트: {}", port)))
}

fn parse_query(url: &str, query: &str) -> Result<BTreeMap<String, String>> {
    let mut options = BTreeMap::new();
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
        let key = percent_decode_str(url, &k.replace('+', " "))?.to_ascii_lowercase();
        let value = percent_decode_str(url, &v.replace('+', " "))?;
        options.insert(key, value);
    }
    Ok(options)
}

fn percent_decode_str(url: &str, s: &str) -> Result<String> {
    let bytes = percent_decode(s.as_bytes())
        .ok_or_else(|| Error::malformed(url, format!("잘못된 퍼센트 인코딩: {}", s)))?;
    String::from_utf8(bytes).map_err(|_| Error::malformed(url, "UTF-8이 아닌 구성요소"))
}

/// `%XX` 이스케이프 디코딩 (잘못된 이스케이프면 None)
pub(crate) fn percent_decode(input: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;
    while i < input.len() {
        if input[i] == b'%' {
            let hi = hex_value(*input.get(i + 1)?)?;
            let lo = hex_value(*input.get(i + 2)?)?;
            out.push(hi << 4 | lo);
            i += 3;
        } else {
            out.push(input[i]);
            i += 1;
        }
    }
    Some(out)
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Bluetooth 주소 + 채널
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BtAddress {
    /// `AA:BB:CC:DD:EE:FF` 형태 (대문자)
    pub addr: String,

    /// RFCOMM 채널 (0 ~ 30)
    pub channel: Option<u8>,
}

impl BtAddress {
    pub fn any() -> Self {
        Self {
            addr: BT_ANY_ADDR.to_string(),
            channel: None,
        }
    }

    pub fn is_any(&self) -> bool {
        self.addr == BT_ANY_ADDR
    }
}

/// bt netloc 분해
///
/// `:` 와 `-` 구분자를 모두 허용하고, 앞의 6그룹은 주소, 7번째 그룹은 채널.
/// 빈 netloc은 `00:00:00:00:00:00`, 채널 없음.
pub fn split_bt_netloc(netloc: &str) -> Result<BtAddress> {
    let netloc = netloc.trim();
    if netloc.is_empty() {
        return Ok(BtAddress::any());
    }

    let normalized = netloc.replace('-', ":");
    let groups: Vec<&str> = normalized.split(':').collect();

    // ":3" 처럼 주소 없이 채널만 준 경우
    if groups.len() == 2 && groups[0].is_empty() {
        return Ok(BtAddress {
            addr: BT_ANY_ADDR.to_string(),
            channel: parse_bt_channel(netloc, groups[1])?,
        });
    }

    if groups.len() != 6 && groups.len() != 7 {
        return Err(Error::malformed(
            netloc,
            format!("Bluetooth 주소는 6그룹이어야 함 (got {})", groups.len()),
        ));
    }

    let mut octets = Vec::with_capacity(6);
    for group in &groups[..6] {
        if group.is_empty() || group.len() > 2 {
            return Err(Error::malformed(netloc, format!("잘못된 주소 그룹: {:?}", group)));
        }
        let value = u8::from_str_radix(group, 16)
            .map_err(|_| Error::malformed(netloc, format!("잘못된 주소 그룹: {:?}", group)))?;
        octets.push(format!("{:02X}", value));
    }

    let channel = match groups.get(6) {
        Some(ch) => parse_bt_channel(netloc, ch)?,
        None => None,
    };

    Ok(BtAddress {
        addr: octets.join(":"),
        channel,
    })
}

/// 채널 문자열 파싱 (빈 문자열은 None)
pub(crate) fn parse_bt_channel(context: &str, value: &str) -> Result<Option<u8>> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    match value.parse::<u8>() {
        Ok(ch) if ch <= BT_MAX_CHANNEL => Ok(Some(ch)),
        _ => Err(Error::malformed(
            context,
            format!("RFCOMM 채널은 0~{} 범위여야 함: {}", BT_MAX_CHANNEL, value),
        )),
    }
}
