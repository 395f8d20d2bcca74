//! `data:` URL 인코딩/디코딩
//!
//! 형식: `data:<mime>[;charset=utf-8][;base64],<payload>`
//!
//! - `charset` 파라미터가 텍스트 표시 (없으면 바이너리)
//! - raw 인코딩은 unreserved 문자 외 모든 바이트를 `%XX`로 이스케이프

use std::io::Cursor;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::url::percent_decode;
use crate::{Error, Result};

/// 텍스트 표시 파라미터
const TEXT_MARKER: &str = "charset=utf-8";

/// payload 인코딩 방식
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataEncoding {
    Raw,
    Base64,
}

/// 디코딩된 data URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUrl {
    pub mime: String,
    pub is_text: bool,
    pub encoding: DataEncoding,
    pub payload: Bytes,
}

impl DataUrl {
    /// 메모리 스트림으로 변환 (오프셋 0)
    pub fn into_reader(self) -> Cursor<Bytes> {
        Cursor::new(self.payload)
    }
}

/// 바이트를 data URL로 인코딩
pub fn encode_bytes(data: &[u8], mime: &str, is_text: bool, base64: bool) -> String {
    let mime = if mime.trim().is_empty() {
        "application/octet-stream"
    } else {
        mime.trim()
    };

    let mut url = String::with_capacity(data.len() * 2 + mime.len() + 32);
    url.push_str("data:");
    url.push_str(mime);
    if is_text {
        url.push(';');
        url.push_str(TEXT_MARKER);
    }
    if base64 {
        url.push_str(";base64,");
        url.push_str(&STANDARD.encode(data));
    } else {
        url.push(',');
        for &b in data {
            if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~') {
                url.push(b as char);
            } else {
                url.push_str(&format!("%{:02X}", b));
            }
        }
    }
    url
}

/// 스트림 전체를 읽어 data URL로 인코딩 → (URL, 읽은 바이트 수)
pub async fn encode<R>(reader: &mut R, mime: &str, is_text: bool, base64: bool) -> Result<(String, u64)>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut data = Vec::new();
    let read = reader.read_to_end(&mut data).await?;
    Ok((encode_bytes(&data, mime, is_text, base64), read as u64))
}

/// data URL 파싱
pub fn parse(url: &str) -> Result<DataUrl> {
    let url = url.trim();
    let rest = match url.get(..5) {
        Some(prefix) if prefix.eq_ignore_ascii_case("data:") => &url[5..],
        _ => return Err(Error::invalid_data_url("'data:' 접두사 없음")),
    };

    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| Error::invalid_data_url("헤더 구분자 ',' 없음"))?;

    let mut segments = header.split(';');
    let mime = segments.next().unwrap_or_default().trim();
    match mime.split_once('/') {
        Some((kind, sub)) if !kind.is_empty() && !sub.is_empty() && !sub.contains('/') => {}
        _ => {
            return Err(Error::invalid_data_url(format!(
                "MIME 세그먼트가 없거나 손상됨: {:?}",
                mime
            )))
        }
    }

    let params: Vec<&str> = segments.map(str::trim).collect();
    let mut is_text = false;
    let mut encoding = DataEncoding::Raw;
    for (idx, param) in params.iter().enumerate() {
        if param.eq_ignore_ascii_case("base64") {
            if idx + 1 != params.len() {
                return Err(Error::invalid_data_url("base64 표시는 헤더 마지막에 와야 함"));
            }
            encoding = DataEncoding::Base64;
            continue;
        }
        match param.split_once('=') {
            Some((key, _)) if key.trim().eq_ignore_ascii_case("charset") => is_text = true,
            Some((key, _)) if !key.trim().is_empty() => {}
            _ => {
                return Err(Error::invalid_data_url(format!(
                    "알 수 없는 인코딩 표시: {:?}",
                    param
                )))
            }
        }
    }

    let unescaped = percent_decode(payload.as_bytes())
        .ok_or_else(|| Error::invalid_data_url("잘못된 퍼센트 이스케이프"))?;
    let bytes = match encoding {
        DataEncoding::Raw => unescaped,
        DataEncoding::Base64 => {
            let compact: Vec<u8> = unescaped
                .into_iter()
                .filter(|b| !b.is_ascii_whitespace())
                .collect();
            STANDARD
                .decode(&compact)
                .map_err(|e| Error::invalid_data_url(format!("base64 디코딩 실패: {}", e)))?
        }
    };

    Ok(DataUrl {
        mime: mime.to_string(),
        is_text,
        encoding,
        payload: Bytes::from(bytes),
    })
}

/// data URL 디코딩 → (메모리 스트림, MIME, 텍스트 여부)
pub fn decode(url: &str) -> Result<(Cursor<Bytes>, String, bool)> {
    let data = parse(url)?;
    let mime = data.mime.clone();
    let is_text = data.is_text;
    Ok((data.into_reader(), mime, is_text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_url_roundtrip() {
        let payload = b"hello world\n\x00\x01\x02";
        let url = encode_bytes(payload, "application/octet-stream", false, true);

        let (reader, mime, is_text) = decode(&url).unwrap();
        assert_eq!(reader.into_inner().as_ref(), payload);
        assert_eq!(mime, "application/octet-stream");
        assert!(!is_text);
    }

    #[test]
    fn test_raw_encoding_roundtrip_non_utf8() {
        let payload: Vec<u8> = (0u8..=255).chain([0xFF, 0xFE, 0x00, b'%']).collect();
        let url = encode_bytes(&payload, "application/x-test", false, false);
        assert!(url.starts_with("data:application/x-test,"));

        let data = parse(&url).unwrap();
        assert_eq!(data.encoding, DataEncoding::Raw);
        assert_eq!(data.payload.as_ref(), payload.as_slice());
    }

    #[test]
    fn test_text_marker() {
        let url = encode_bytes("안녕".as_bytes(), "text/plain", true, false);
        assert!(url.starts_with("data:text/plain;charset=utf-8,"));

        let data = parse(&url).unwrap();
        assert!(data.is_text);
        assert_eq!(data.payload.as_ref(), "안녕".as_bytes());

        // text/* MIME이라도 표시가 없으면 바이너리 취급
        assert!(!parse("data:text/plain,abc").unwrap().is_text);
    }

    #[test]
    fn test_invalid_data_urls() {
        for bad in [
            "http://x/",
            "data:text/plain",
            "data:,abc",
            "data:plain;base64,YQ==",
            "data:text/plain;base64;x=y,YQ==",
            "data:text/plain;bogus,abc",
            "data:text/plain;base64,@@@",
            "data:text/plain,%G1",
        ] {
            assert!(
                matches!(parse(bad), Err(Error::InvalidDataUrl { .. })),
                "accepted {:?}",
                bad
            );
        }
    }

    #[tokio::test]
    async fn test_encode_from_stream() {
        let mut reader: &[u8] = b"abc\x00";
        let (url, read) = encode(&mut reader, "", false, true).await.unwrap();
        assert_eq!(url, "data:application/octet-stream;base64,YWJjAA==");
        assert_eq!(read, 4);
    }
}
