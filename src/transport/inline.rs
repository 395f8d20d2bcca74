//! `data:` 전송 (네트워크 없음)

use tracing::debug;

use super::{SendOutcome, TransferContext};
use crate::data_url;
use crate::stream::{boxed, ByteStream};
use crate::Result;

const DEFAULT_MIME: &str = "application/octet-stream";

pub fn receive(ctx: &TransferContext<'_>) -> Result<ByteStream> {
    let data = data_url::parse(&ctx.url.raw)?;
    debug!(
        "data URL 디코딩: {} bytes, mime={}, text={}",
        data.payload.len(),
        data.mime,
        data.is_text
    );
    Ok(boxed(data.into_reader()))
}

/// 스트림 전체를 data URL로 인코딩
///
/// 대상 URL은 템플릿이다. `data:text/plain;charset=utf-8,` 처럼 헤더가 있으면 그대로 쓰고,
/// `data:` / `data:?mime=..&text=1` 이면 옵션과 기본값을 쓴다.
pub async fn send(mut source: ByteStream, ctx: &TransferContext<'_>) -> Result<SendOutcome> {
    let (mime, is_text, base64) = template(ctx);
    let (url, bytes) = data_url::encode(&mut source, &mime, is_text, base64).await?;
    debug!(
        "data URL 인코딩: {} bytes, mime={}, text={}, base64={}",
        bytes, mime, is_text, base64
    );

    Ok(SendOutcome {
        bytes: Some(bytes),
        data_url: Some(url),
    })
}

/// (mime, 텍스트 여부, base64 여부)
fn template(ctx: &TransferContext<'_>) -> (String, bool, bool) {
    let header = ctx.url.path.split(',').next().unwrap_or_default();
    if header.is_empty() || header.starts_with('?') {
        let mime = ctx.opts.mime.clone().unwrap_or_else(|| DEFAULT_MIME.to_string());
        let is_text = ctx.opts.text.unwrap_or(false);
        return (mime, is_text, !is_text);
    }

    let mut segments = header.split(';').map(str::trim);
    let mime = segments.next().unwrap_or_default().to_string();
    let mut is_text = false;
    let mut base64 = false;
    for param in segments {
        if param.eq_ignore_ascii_case("base64") {
            base64 = true;
        } else if param
            .split_once('=')
            .is_some_and(|(k, _)| k.trim().eq_ignore_ascii_case("charset"))
        {
            is_text = true;
        }
    }
    (mime, is_text, base64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Backends;
    use crate::options::parse_net_url;
    use crate::transport::Scheme;
    use crate::Config;
    use tokio::io::AsyncReadExt;

    fn context<'a>(url: &str, backends: &'a Backends) -> TransferContext<'a> {
        let (parsed, opts) = parse_net_url(url).unwrap();
        TransferContext {
            url: parsed,
            scheme: Scheme::Data,
            opts,
            config: Config::default(),
            headers: Default::default(),
            announcer: None,
            backends,
        }
    }

    #[tokio::test]
    async fn test_send_uses_header_template() {
        let backends = Backends::empty();
        let ctx = context("data:text/plain;charset=utf-8,", &backends);
        let outcome = send(boxed(std::io::Cursor::new(b"a b".to_vec())), &ctx).await.unwrap();
        assert_eq!(outcome.data_url.as_deref(), Some("data:text/plain;charset=utf-8,a%20b"));
        assert_eq!(outcome.bytes, Some(3));
    }

    #[tokio::test]
    async fn test_send_bare_template_defaults_to_base64() {
        let backends = Backends::empty();
        let ctx = context("data:", &backends);
        let outcome = send(boxed(std::io::Cursor::new(vec![0u8, 255])), &ctx).await.unwrap();
        assert_eq!(
            outcome.data_url.as_deref(),
            Some("data:application/octet-stream;base64,AP8=")
        );
        assert_eq!(outcome.bytes, Some(2));

        let ctx = context("data:?mime=text/csv&text=yes", &backends);
        let outcome = send(boxed(std::io::Cursor::new(b"x,y".to_vec())), &ctx).await.unwrap();
        assert_eq!(outcome.data_url.as_deref(), Some("data:text/csv;charset=utf-8,x%2Cy"));
    }

    #[tokio::test]
    async fn test_receive_decodes_payload() {
        let backends = Backends::empty();
        let ctx = context("data:text/plain;base64,aGVsbG8=", &backends);
        let mut stream = receive(&ctx).unwrap();
        let mut out = String::new();
        stream.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "hello");
    }
}
