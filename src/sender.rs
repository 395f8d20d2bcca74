//! seq 모드 송신자
//!
//! - 호출자는 바운드 큐에 데이터를 넣고, 세션 태스크가 프레임 분할/전송/재전송을 담당
//! - 누적 ACK로 윈도우 앞부분 제거
//! - RTO 만료 시 해당 프레임 재전송 + 백오프
//! - 미확인 데이터가 있는데 idle timeout 동안 아무것도 못 받으면 실패

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep_until;
use tracing::{debug, info, warn};

use crate::frame::{Frame, FrameKind};
use crate::window::{split_payload, SendWindow};
use crate::{Config, Error, Result, MAX_DATAGRAM_SIZE};

/// 송신 결과 통계
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendStats {
    pub bytes: u64,
    pub frames: u64,
    pub retransmissions: u64,
}

/// 송신자 핸들
pub struct Sender {
    data_tx: mpsc::Sender<Bytes>,
    task: JoinHandle<Result<SendStats>>,
}

impl Sender {
    /// 세션 태스크 시작 (소켓은 이미 상대에게 connect 된 상태)
    pub fn start(socket: Arc<UdpSocket>, config: Config) -> Self {
        let (data_tx, data_rx) = mpsc::channel::<Bytes>(config.queue_capacity.max(1));
        let task = tokio::spawn(async move {
            let mut inner = SenderInner::new(socket, config);
            inner.run(data_rx).await
        });
        Self { data_tx, task }
    }

    /// 데이터 전달 (큐가 차면 대기)
    ///
    /// 세션이 이미 끝났으면 에러. 실제 원인은 [`Sender::finish`]가 돌려준다.
    pub async fn write(&self, data: Bytes) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        self.data_tx
            .send(data)
            .await
            .map_err(|_| Error::ConnectionReset("송신 세션이 종료됨".into()))
    }

    /// FIN 없이 세션 중단 (입력 읽기 실패 시)
    pub fn abort(self) {
        self.task.abort();
    }

    /// 입력 종료 → FIN 확인까지 대기
    pub async fn finish(self) -> Result<SendStats> {
        drop(self.data_tx);
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(Error::Unknown(format!("송신 태스크 실패: {}", e))),
        }
    }
}

/// 송신자 내부 상태 (세션 태스크에서만 접근)
struct SenderInner {
    socket: Arc<UdpSocket>,
    config: Config,
    window: SendWindow,
    pending: VecDeque<Bytes>,
    stats: SendStats,
    input_done: bool,
    fin_sent: bool,
}

impl SenderInner {
    fn new(socket: Arc<UdpSocket>, config: Config) -> Self {
        Self {
            window: SendWindow::new(config.window_size),
            socket,
            config,
            pending: VecDeque::new(),
            stats: SendStats::default(),
            input_done: false,
            fin_sent: false,
        }
    }

    async fn run(&mut self, mut data_rx: mpsc::Receiver<Bytes>) -> Result<SendStats> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let mut rto = self.config.rto();
        let mut last_heard = Instant::now();
        let idle = self.config.idle_timeout();

        loop {
            // 윈도우 채우기
            while self.window.can_send() {
                let frame = if let Some(piece) = self.pending.pop_front() {
                    Frame::data(self.window.next_seq(), piece)
                } else if self.input_done && !self.fin_sent {
                    self.fin_sent = true;
                    debug!("FIN 전송: seq={}", self.window.next_seq());
                    Frame::fin(self.window.next_seq())
                } else {
                    break;
                };

                if !self.window.has_unacked() {
                    last_heard = Instant::now();
                }
                self.socket.send(&frame.to_bytes()?).await?;
                self.stats.frames += 1;
                self.window.record_sent(frame);
            }

            if self.fin_sent && !self.window.has_unacked() {
                info!(
                    "송신 완료: {} bytes, {} 프레임, 재전송 {}",
                    self.stats.bytes, self.stats.frames, self.stats.retransmissions
                );
                return Ok(self.stats.clone());
            }

            let want_input = !self.input_done && self.pending.is_empty() && self.window.can_send();
            let retransmit_at = self.window.next_deadline(rto);
            let idle_deadline = last_heard + idle;

            tokio::select! {
                msg = data_rx.recv(), if want_input => {
                    match msg {
                        Some(data) => {
                            self.stats.bytes += data.len() as u64;
                            self.pending.extend(split_payload(data, self.config.mtu_payload));
                        }
                        None => self.input_done = true,
                    }
                }

                result = self.socket.recv(&mut buf) => {
                    match result {
                        Ok(len) => {
                            last_heard = Instant::now();
                            if self.handle_datagram(&buf[..len]).await? {
                                rto = self.config.rto();
                            }
                        }
                        Err(e) => {
                            // 상대가 아직/더 이상 없을 때의 ICMP 에러는 idle timeout으로 처리
                            debug!("수신 에러: {}", e);
                        }
                    }
                }

                _ = sleep_until(retransmit_at.unwrap_or(idle_deadline).into()), if retransmit_at.is_some() => {
                    let now = Instant::now();
                    let expired = self.window.take_expired(now, rto);
                    for frame in &expired {
                        self.socket.send(&frame.to_bytes()?).await?;
                    }
                    if !expired.is_empty() {
                        self.stats.retransmissions += expired.len() as u64;
                        debug!(
                            "재전송: {} 프레임 (base={}, rto={:?})",
                            expired.len(),
                            self.window.base(),
                            rto
                        );
                        rto = self.config.next_rto(rto);
                    }
                }

                _ = sleep_until(idle_deadline.into()), if self.window.has_unacked() => {
                    warn!(
                        "ACK 없음: {:?} 동안 응답 없음 (base={}, in-flight={})",
                        idle,
                        self.window.base(),
                        self.window.in_flight()
                    );
                    return Err(Error::TransportTimeout(format!(
                        "{:?} 동안 ACK 없음 (seq {} 미확인)",
                        idle,
                        self.window.base()
                    )));
                }
            }
        }
    }

    /// 수신 데이터그램 처리 → 윈도우가 전진했으면 true
    async fn handle_datagram(&mut self, data: &[u8]) -> Result<bool> {
        let frame = match Frame::from_bytes(data) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("손상된 데이터그램 무시: {}", e);
                return Ok(false);
            }
        };

        match frame.kind()? {
            FrameKind::Ack => {
                let acked = self.window.on_ack(frame.seq())?;
                Ok(acked > 0)
            }
            FrameKind::Syn => {
                // listen 측: 상대가 SYN+ACK를 못 받고 재전송한 경우
                self.socket.send(&Frame::syn_ack().to_bytes()?).await?;
                Ok(false)
            }
            FrameKind::SynAck => Ok(false),
            kind @ (FrameKind::Data | FrameKind::Fin) => Err(Error::ProtocolViolation(format!(
                "송신측이 {:?} 프레임을 수신",
                kind
            ))),
        }
    }
}
