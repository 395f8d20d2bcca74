//! UDP 전송
//!
//! - `seq` 모드: SYN 핸드셰이크 후 [`Sender`] / [`receiver::start`] 세션
//! - `raw` 모드: 데이터그램을 그대로 전달, 빈 데이터그램이 EOF

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio::net::UdpSocket;
use tokio::time::{sleep_until, timeout_at};
use tracing::{debug, info, warn};

use super::{connect_addr, listen_addr, SendOutcome, TransferContext};
use crate::frame::{Frame, FrameKind};
use crate::options::DatagramMode;
use crate::receiver;
use crate::role::{announce, reconnect_url, resolve_role, Operation, Role};
use crate::sender::Sender;
use crate::stream::{channel_reader, ByteStream, ChunkSender};
use crate::{Error, Result, MAX_DATAGRAM_SIZE};

/// raw 송신 시 EOF 표시 반복 횟수
const RAW_EOF_REPEAT: usize = 3;

/// URL에서 수신
pub async fn receive(ctx: &TransferContext<'_>) -> Result<ByteStream> {
    let role = resolve_role(Operation::Receive, &ctx.opts);
    debug!("udp 수신: role={}, mode={}", role, ctx.opts.mode.as_str());

    match ctx.opts.mode {
        DatagramMode::Seq => {
            let (socket, first) = match role {
                Role::Listen => (listen_handshake(ctx).await?, None),
                Role::Connect => connect_handshake(ctx, Operation::Receive).await?,
            };
            Ok(receiver::start(socket, ctx.config.clone(), first))
        }
        DatagramMode::Raw => receive_raw(ctx, role).await,
    }
}

/// URL로 송신
pub async fn send(source: ByteStream, ctx: &TransferContext<'_>) -> Result<SendOutcome> {
    let role = resolve_role(Operation::Send, &ctx.opts);
    debug!("udp 송신: role={}, mode={}", role, ctx.opts.mode.as_str());

    let bytes = match ctx.opts.mode {
        DatagramMode::Seq => {
            let socket = match role {
                Role::Listen => listen_handshake(ctx).await?,
                Role::Connect => connect_handshake(ctx, Operation::Send).await?.0,
            };
            send_seq(socket, source, ctx).await?
        }
        DatagramMode::Raw => send_raw(source, ctx, role).await?,
    };

    Ok(SendOutcome {
        bytes: Some(bytes),
        data_url: None,
    })
}

async fn bind_listener(ctx: &TransferContext<'_>) -> Result<UdpSocket> {
    let addr = listen_addr(ctx).await?;
    let socket = UdpSocket::bind(addr).await?;
    let local = socket.local_addr()?;
    info!("udp 바인드: {}", local);

    if ctx.opts.print_url {
        announce(ctx.announcer, &reconnect_url(&ctx.url, &ctx.opts, local));
    }
    Ok(socket)
}

async fn bind_connector(ctx: &TransferContext<'_>) -> Result<UdpSocket> {
    let target = connect_addr(ctx).await?;
    let local = if ctx.opts.bind.is_some() {
        let mut addr = listen_addr(ctx).await?;
        // bind 옵션의 포트만 사용 (URL 포트는 상대 포트)
        if ctx.opts.bind.as_deref().and_then(|b| b.parse::<SocketAddr>().ok()).is_none() {
            addr.set_port(0);
        }
        addr
    } else if target.is_ipv6() {
        SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
    } else {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
    };

    let socket = UdpSocket::bind(local).await?;
    socket.connect(target).await?;
    debug!("udp 연결: {} -> {}", socket.local_addr()?, target);
    Ok(socket)
}

/// listen 측 핸드셰이크: 첫 SYN의 송신자를 상대로 고정
async fn listen_handshake(ctx: &TransferContext<'_>) -> Result<Arc<UdpSocket>> {
    let socket = bind_listener(ctx).await?;
    let deadline = Instant::now() + ctx.config.io_timeout;
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

    loop {
        let (len, peer) = match timeout_at(deadline.into(), socket.recv_from(&mut buf)).await {
            Ok(Ok(received)) => received,
            Ok(Err(e)) => {
                debug!("핸드셰이크 수신 에러: {}", e);
                continue;
            }
            Err(_) => {
                return Err(Error::TransportTimeout(format!(
                    "{:?} 동안 접속 없음",
                    ctx.config.io_timeout
                )))
            }
        };

        match Frame::from_bytes(&buf[..len]).and_then(|f| f.kind()) {
            Ok(FrameKind::Syn) => {
                socket.connect(peer).await?;
                socket.send(&Frame::syn_ack().to_bytes()?).await?;
                info!("udp 상대 연결: {}", peer);
                return Ok(Arc::new(socket));
            }
            Ok(kind) => debug!("핸드셰이크 전 {:?} 프레임 무시 ({})", kind, peer),
            Err(e) => debug!("핸드셰이크 전 데이터그램 무시 ({}): {}", peer, e),
        }
    }
}

/// connect 측 핸드셰이크: SYN+ACK까지 RTO마다 SYN 재전송
///
/// 수신 쪽이면 SYN+ACK가 유실된 채 도착한 DATA/FIN도 연결 성립으로 보고 돌려준다.
async fn connect_handshake(
    ctx: &TransferContext<'_>,
    operation: Operation,
) -> Result<(Arc<UdpSocket>, Option<Frame>)> {
    let socket = bind_connector(ctx).await?;
    let config = &ctx.config;
    let deadline = Instant::now() + config.io_timeout;
    let syn = Frame::syn().to_bytes()?;
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    let mut rto = config.rto();

    while Instant::now() < deadline {
        if let Err(e) = socket.send(&syn).await {
            debug!("SYN 전송 에러: {}", e);
        }
        let attempt_deadline = (Instant::now() + rto).min(deadline);

        loop {
            let len = match timeout_at(attempt_deadline.into(), socket.recv(&mut buf)).await {
                Ok(Ok(len)) => len,
                Ok(Err(e)) => {
                    // 상대가 아직 바인드 전이면 ICMP port unreachable
                    debug!("핸드셰이크 수신 에러: {}", e);
                    sleep_until(attempt_deadline.into()).await;
                    break;
                }
                Err(_) => break,
            };

            let frame = match Frame::from_bytes(&buf[..len]) {
                Ok(frame) => frame,
                Err(e) => {
                    debug!("손상된 데이터그램 무시: {}", e);
                    continue;
                }
            };
            match (frame.kind()?, operation) {
                (FrameKind::SynAck, _) => {
                    debug!("핸드셰이크 완료");
                    return Ok((Arc::new(socket), None));
                }
                (FrameKind::Data | FrameKind::Fin, Operation::Receive) => {
                    debug!("SYN+ACK 없이 데이터 도착, 핸드셰이크 완료로 처리");
                    return Ok((Arc::new(socket), Some(frame)));
                }
                (kind, _) => debug!("핸드셰이크 중 {:?} 프레임 무시", kind),
            }
        }

        rto = config.next_rto(rto);
    }

    warn!("핸드셰이크 실패: {:?} 동안 응답 없음", config.io_timeout);
    Err(Error::TransportTimeout(format!(
        "{:?} 동안 SYN+ACK 없음",
        config.io_timeout
    )))
}

async fn send_seq(socket: Arc<UdpSocket>, mut source: ByteStream, ctx: &TransferContext<'_>) -> Result<u64> {
    let sender = Sender::start(socket, ctx.config.clone());
    let mut buf = vec![0u8; ctx.config.read_chunk_size.max(1)];

    loop {
        let n = match source.read(&mut buf).await {
            Ok(n) => n,
            Err(e) => {
                // 잘린 데이터를 완료로 오인하지 않도록 FIN 없이 중단
                sender.abort();
                return Err(e.into());
            }
        };
        if n == 0 {
            break;
        }
        if sender.write(Bytes::copy_from_slice(&buf[..n])).await.is_err() {
            // 세션이 먼저 끝남: 실제 원인은 finish가 돌려준다
            break;
        }
    }

    let stats = sender.finish().await?;
    Ok(stats.bytes)
}

async fn send_raw(mut source: ByteStream, ctx: &TransferContext<'_>, role: Role) -> Result<u64> {
    let socket = match role {
        Role::Connect => bind_connector(ctx).await?,
        Role::Listen => {
            let socket = bind_listener(ctx).await?;
            let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
            let (_, peer) = tokio::time::timeout(ctx.config.io_timeout, socket.recv_from(&mut buf))
                .await
                .map_err(|_| {
                    Error::TransportTimeout(format!("{:?} 동안 접속 없음", ctx.config.io_timeout))
                })??;
            socket.connect(peer).await?;
            info!("udp raw 상대: {}", peer);
            socket
        }
    };

    let mut buf = vec![0u8; ctx.config.mtu_payload.max(1)];
    let mut total = 0u64;
    loop {
        let n = source.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        socket.send(&buf[..n]).await?;
        total += n as u64;
    }

    for _ in 0..RAW_EOF_REPEAT {
        socket.send(&[]).await?;
    }
    info!("udp raw 송신 완료: {} bytes", total);
    Ok(total)
}

async fn receive_raw(ctx: &TransferContext<'_>, role: Role) -> Result<ByteStream> {
    let (socket, hello) = match role {
        Role::Listen => (bind_listener(ctx).await?, false),
        Role::Connect => (bind_connector(ctx).await?, true),
    };
    let (tx, reader) = channel_reader(ctx.config.queue_capacity);
    let idle = ctx.config.idle_timeout();
    let rto = ctx.config.rto();

    tokio::spawn(async move {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let mut peer: Option<SocketAddr> = None;
        let mut received = 0u64;
        let mut last_heard = Instant::now();

        loop {
            // connect 측은 첫 데이터 전까지 빈 데이터그램으로 존재를 알림
            let waiting_hello = hello && peer.is_none();
            if waiting_hello {
                let _ = socket.send(&[]).await;
            }
            let deadline = if waiting_hello {
                (Instant::now() + rto).min(last_heard + idle)
            } else {
                last_heard + idle
            };

            let (len, from) = match timeout_at(deadline.into(), socket.recv_from(&mut buf)).await {
                Ok(Ok(received)) => received,
                Ok(Err(e)) => {
                    debug!("raw 수신 에러: {}", e);
                    sleep_until((Instant::now() + rto).min(deadline).into()).await;
                    if Instant::now() < last_heard + idle {
                        continue;
                    }
                    finish_idle(&tx, received, idle).await;
                    return;
                }
                Err(_) => {
                    if Instant::now() < last_heard + idle {
                        continue;
                    }
                    finish_idle(&tx, received, idle).await;
                    return;
                }
            };

            match peer {
                None => {
                    peer = Some(from);
                    debug!("udp raw 상대: {}", from);
                }
                Some(p) if p != from => {
                    debug!("다른 주소의 데이터그램 무시: {}", from);
                    continue;
                }
                Some(_) => {}
            }
            last_heard = Instant::now();

            if len == 0 {
                info!("udp raw 수신 완료: {} bytes", received);
                return;
            }
            received += len as u64;
            if tx.send(Ok(Bytes::copy_from_slice(&buf[..len]))).await.is_err() {
                debug!("수신 스트림이 닫힘");
                return;
            }
        }
    });

    Ok(reader)
}

/// idle 만료 처리: 받은 데이터가 있으면 정상 종료, 없으면 타임아웃 에러
async fn finish_idle(tx: &ChunkSender, received: u64, idle: Duration) {
    if received > 0 {
        info!("udp raw idle 종료: {} bytes", received);
        return;
    }
    warn!("udp raw: {:?} 동안 데이터 없음", idle);
    let err = Error::TransportTimeout(format!("{:?} 동안 데이터 없음", idle));
    let _ = tx.send(Err(io::Error::from(err))).await;
}
