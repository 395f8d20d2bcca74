//! seq 모드 수신자
//!
//! - 재정렬 버퍼로 순서 맞춰 전달
//! - DATA마다 누적 ACK
//! - FIN까지 전달 후 스트림 종료, 잠시 남아서 재전송된 FIN에 다시 ACK
//!
//! 리더가 읽지 않아도 소켓은 계속 비우고 ACK한다. 전달 대기열이 차면 새 DATA는
//! 버리고 현재 ACK만 다시 보내서 송신측은 재전송으로 기다린다.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::time::sleep_until;
use tracing::{debug, info, warn};

use crate::frame::{Frame, FrameKind};
use crate::stream::{channel_reader, ByteStream, ChunkSender};
use crate::window::ReorderBuffer;
use crate::{Config, Error, Result, MAX_DATAGRAM_SIZE};

/// 수신자 내부 상태 (세션 태스크에서만 접근)
struct ReceiverInner {
    socket: Arc<UdpSocket>,
    config: Config,
    buffer: ReorderBuffer,
    out_tx: ChunkSender,

    /// 순서는 맞았지만 리더에 아직 넘기지 못한 payload
    ready: VecDeque<Bytes>,
}

impl ReceiverInner {
    /// 리더가 밀려 있어서 새 DATA를 받지 않는 상태
    fn stalled(&self) -> bool {
        self.ready.len() >= self.config.queue_capacity.max(1)
    }

    /// 수신 루프 → FIN까지 받으면 마지막 ACK 값 반환
    ///
    /// 호출자가 스트림을 버리면 `Ok(None)`.
    async fn run(&mut self, first: Option<Frame>) -> Result<Option<u32>> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let idle = self.config.idle_timeout();
        let mut last_heard = Instant::now();

        if let Some(frame) = first {
            self.handle_frame(frame).await?;
        }

        while !self.buffer.is_complete() {
            let deadline = last_heard + idle;
            tokio::select! {
                open = deliver(&self.out_tx, &mut self.ready), if !self.ready.is_empty() => {
                    if !open {
                        debug!("수신 스트림이 닫힘, 세션 종료");
                        return Ok(None);
                    }
                }

                _ = self.out_tx.closed() => {
                    debug!("수신 스트림이 닫힘, 세션 종료");
                    return Ok(None);
                }

                result = self.socket.recv(&mut buf) => {
                    let len = match result {
                        Ok(len) => len,
                        Err(e) => {
                            debug!("수신 에러: {}", e);
                            continue;
                        }
                    };
                    last_heard = Instant::now();

                    match Frame::from_bytes(&buf[..len]) {
                        Ok(frame) => self.handle_frame(frame).await?,
                        Err(e) => debug!("손상된 데이터그램 무시: {}", e),
                    }
                }

                _ = sleep_until(deadline.into()) => {
                    warn!(
                        "데이터 없음: {:?} 동안 응답 없음 (expected={}, buffered={})",
                        idle,
                        self.buffer.next_expected(),
                        self.buffer.buffered()
                    );
                    return Err(Error::TransportTimeout(format!(
                        "{:?} 동안 데이터 없음 (seq {} 대기)",
                        idle,
                        self.buffer.next_expected()
                    )));
                }
            }
        }

        info!(
            "수신 완료: {} bytes, 중복 {}",
            self.buffer.delivered_bytes, self.buffer.duplicates
        );
        Ok(Some(self.buffer.ack_value()))
    }

    async fn handle_frame(&mut self, frame: Frame) -> Result<()> {
        match frame.kind()? {
            FrameKind::Data => {
                let seq = frame.seq();
                if self.stalled() && seq >= self.buffer.next_expected() {
                    debug!("전달 대기열 가득 참, seq={} 버림", seq);
                } else {
                    let ready = self.buffer.insert_data(seq, frame.payload)?;
                    self.ready.extend(ready);
                }
                self.send_ack().await?;
            }
            FrameKind::Fin => {
                self.buffer.insert_fin(frame.seq())?;
                debug!("FIN 수신: seq={}", frame.seq());
                self.send_ack().await?;
            }
            FrameKind::Syn => {
                self.socket.send(&Frame::syn_ack().to_bytes()?).await?;
            }
            FrameKind::SynAck => {}
            FrameKind::Ack => {
                return Err(Error::ProtocolViolation("수신측이 ACK 프레임을 수신".into()));
            }
        }
        Ok(())
    }

    async fn send_ack(&self) -> Result<()> {
        self.socket
            .send(&Frame::ack(self.buffer.ack_value()).to_bytes()?)
            .await?;
        Ok(())
    }

    /// FIN 이후: 남은 payload를 리더에 넘기고 EOF, 이어서 잠시 남아 재전송된 FIN/DATA에 마지막 ACK
    async fn finish(self, final_ack: u32) -> Result<()> {
        let ReceiverInner {
            socket,
            config,
            out_tx,
            mut ready,
            ..
        } = self;
        let deadline = Instant::now() + config.fin_linger();
        let ack = Frame::ack(final_ack).to_bytes()?;
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        while !ready.is_empty() {
            tokio::select! {
                open = deliver(&out_tx, &mut ready) => {
                    if !open {
                        ready.clear();
                    }
                }
                result = socket.recv(&mut buf) => {
                    if let Ok(len) = result {
                        reack(&socket, &buf[..len], &ack).await;
                    }
                }
            }
        }
        drop(out_tx);

        loop {
            tokio::select! {
                result = socket.recv(&mut buf) => {
                    if let Ok(len) = result {
                        reack(&socket, &buf[..len], &ack).await;
                    }
                }
                _ = sleep_until(deadline.into()) => break,
            }
        }
        Ok(())
    }
}

/// 대기 중인 payload 하나를 리더에 넘김 → 리더가 닫혔으면 false
async fn deliver(out_tx: &ChunkSender, ready: &mut VecDeque<Bytes>) -> bool {
    let Ok(permit) = out_tx.reserve().await else {
        return false;
    };
    if let Some(payload) = ready.pop_front() {
        permit.send(Ok(payload));
    }
    true
}

/// 재전송된 DATA/FIN이면 마지막 ACK 다시 보냄
async fn reack(socket: &UdpSocket, datagram: &[u8], ack: &[u8]) {
    let resend = Frame::from_bytes(datagram)
        .map(|f| matches!(f.kind(), Ok(FrameKind::Data | FrameKind::Fin)))
        .unwrap_or(false);
    if resend {
        let _ = socket.send(ack).await;
    }
}

/// 수신 세션 시작 (소켓은 이미 상대에게 connect 된 상태)
///
/// `first`는 핸드셰이크 중 먼저 도착한 프레임.
pub fn start(socket: Arc<UdpSocket>, config: Config, first: Option<Frame>) -> ByteStream {
    let (out_tx, reader) = channel_reader(config.queue_capacity);

    tokio::spawn(async move {
        let mut inner = ReceiverInner {
            buffer: ReorderBuffer::new(config.reorder_limit),
            socket,
            config,
            out_tx,
            ready: VecDeque::new(),
        };

        match inner.run(first).await {
            Ok(Some(final_ack)) => {
                if let Err(e) = inner.finish(final_ack).await {
                    warn!("FIN 이후 정리 실패: {}", e);
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!("수신 세션 실패: {}", e);
                let _ = inner.out_tx.send(Err(e.into())).await;
            }
        }
    });

    reader
}
