//! 스트림 소켓 전송 (TCP, Bluetooth RFCOMM)
//!
//! 바이트를 그대로 중계한다. 송신 끝은 쓰기 방향 shutdown으로 알린다.

use std::future::Future;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, info};

use super::{connect_addr, listen_addr, SendOutcome, TransferContext};
use crate::options::bt_target;
use crate::role::{announce, bt_reconnect_url, reconnect_url, resolve_role, Operation, Role};
use crate::stream::{boxed, ByteStream, DuplexStream};
use crate::{Error, Result};

pub async fn receive_tcp(ctx: &TransferContext<'_>) -> Result<ByteStream> {
    let conn = open_tcp(ctx, Operation::Receive).await?;
    Ok(boxed(conn))
}

pub async fn send_tcp(source: ByteStream, ctx: &TransferContext<'_>) -> Result<SendOutcome> {
    let conn = open_tcp(ctx, Operation::Send).await?;
    relay(source, conn).await
}

pub async fn receive_rfcomm(ctx: &TransferContext<'_>) -> Result<ByteStream> {
    let conn = open_rfcomm(ctx, Operation::Receive).await?;
    Ok(boxed(conn))
}

pub async fn send_rfcomm(source: ByteStream, ctx: &TransferContext<'_>) -> Result<SendOutcome> {
    let conn = open_rfcomm(ctx, Operation::Send).await?;
    relay(source, conn).await
}

/// io_timeout 안에 끝나지 않으면 TransportTimeout
async fn within<T, F>(ctx: &TransferContext<'_>, what: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    timeout(ctx.config.io_timeout, fut)
        .await
        .map_err(|_| Error::TransportTimeout(format!("{:?} 동안 {} 실패", ctx.config.io_timeout, what)))?
}

async fn open_tcp(ctx: &TransferContext<'_>, operation: Operation) -> Result<DuplexStream> {
    match resolve_role(operation, &ctx.opts) {
        Role::Listen => {
            let listener = TcpListener::bind(listen_addr(ctx).await?).await?;
            let local = listener.local_addr()?;
            info!("tcp 대기: {}", local);
            if ctx.opts.print_url {
                announce(ctx.announcer, &reconnect_url(&ctx.url, &ctx.opts, local));
            }

            let (stream, peer) = within(ctx, "접속 대기", async { Ok(listener.accept().await?) }).await?;
            info!("tcp 접속: {}", peer);
            Ok(Box::new(stream))
        }
        Role::Connect => {
            let target = connect_addr(ctx).await?;
            let stream = within(ctx, "tcp 연결", async { Ok(TcpStream::connect(target).await?) }).await?;
            debug!("tcp 연결: {}", target);
            Ok(Box::new(stream))
        }
    }
}

async fn open_rfcomm(ctx: &TransferContext<'_>, operation: Operation) -> Result<DuplexStream> {
    let backend = ctx.backends.rfcomm()?;
    let target = bt_target(&ctx.url, &ctx.opts);

    match resolve_role(operation, &ctx.opts) {
        Role::Listen => {
            let mut listener = backend.listen(&target.addr, target.channel).await?;
            let (adapter, channel) = listener.local_addr()?;
            info!("rfcomm 대기: {} 채널 {}", adapter, channel);
            if ctx.opts.print_url {
                announce(ctx.announcer, &bt_reconnect_url(&ctx.url, &adapter, channel));
            }
            within(ctx, "rfcomm 접속 대기", listener.accept()).await
        }
        Role::Connect => {
            if target.is_any() {
                return Err(Error::malformed(&ctx.url.raw, "connect 역할에는 장치 주소가 필요함"));
            }
            let channel = target
                .channel
                .ok_or_else(|| Error::malformed(&ctx.url.raw, "connect 역할에는 채널이 필요함"))?;
            debug!("rfcomm 연결: {} 채널 {}", target.addr, channel);
            within(ctx, "rfcomm 연결", backend.connect(&target.addr, channel)).await
        }
    }
}

async fn relay(mut source: ByteStream, mut conn: DuplexStream) -> Result<SendOutcome> {
    let bytes = tokio::io::copy(&mut source, &mut conn).await?;
    conn.shutdown().await?;
    info!("스트림 송신 완료: {} bytes", bytes);
    Ok(SendOutcome {
        bytes: Some(bytes),
        data_url: None,
    })
}
