//! 외부 클라이언트 위임 (http, https, ftp, ftps, sftp, file)

use tracing::debug;

use super::{SendOutcome, TransferContext};
use crate::stream::ByteStream;
use crate::Result;

pub async fn receive(ctx: &TransferContext<'_>) -> Result<ByteStream> {
    let backend = ctx.backends.remote(ctx.scheme)?;
    debug!("{} 백엔드 수신: {}", ctx.scheme, ctx.url.raw);
    backend.fetch(&ctx.url, &ctx.headers, ctx.config.io_timeout).await
}

pub async fn send(source: ByteStream, ctx: &TransferContext<'_>) -> Result<SendOutcome> {
    let backend = ctx.backends.remote(ctx.scheme)?;
    debug!("{} 백엔드 송신: {}", ctx.scheme, ctx.url.raw);
    let bytes = backend
        .store(&ctx.url, source, &ctx.headers, ctx.config.io_timeout)
        .await?;
    Ok(SendOutcome {
        bytes,
        data_url: None,
    })
}
