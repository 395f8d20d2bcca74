//! seq 모드 상태 기계
//!
//! - `SendWindow`: 송신측 in-flight 프레임 윈도우 (누적 ACK로 앞부분 제거)
//! - `ReorderBuffer`: 수신측 재정렬 버퍼 (순서가 맞는 앞부분만 전달)
//!
//! 소켓 I/O는 하지 않는다. 호출자가 프레임을 보내고 받아서 넘긴다.

use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::frame::Frame;
use crate::{Error, Result};

/// payload를 MTU 단위로 분할 (복사 없음)
pub fn split_payload(mut data: Bytes, mtu_payload: usize) -> Vec<Bytes> {
    let mtu_payload = mtu_payload.max(1);
    let mut pieces = Vec::with_capacity(data.len() / mtu_payload + 1);
    while data.len() > mtu_payload {
        pieces.push(data.split_to(mtu_payload));
    }
    if !data.is_empty() {
        pieces.push(data);
    }
    pieces
}

/// 전송 후 확인 대기 중인 프레임
#[derive(Debug, Clone)]
pub struct InFlight {
    pub frame: Frame,

    /// 마지막 전송 시각
    pub sent_at: Instant,

    /// 전송 횟수
    pub tx_count: u32,
}

/// 송신 윈도우
///
/// ```text
///  base               next_seq
///   │                    │
/// ──┼────────────────────┼──────────▶ seq
///   │ <── in flight ───▶ │
/// ```
#[derive(Debug)]
pub struct SendWindow {
    /// 가장 오래된 미확인 시퀀스
    base: u32,

    /// 다음 프레임에 부여할 시퀀스
    next_seq: u32,

    capacity: usize,
    entries: VecDeque<InFlight>,
}

impl SendWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            base: 0,
            next_seq: 0,
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn next_seq(&self) -> u32 {
        self.next_seq
    }

    pub fn can_send(&self) -> bool {
        self.entries.len() < self.capacity
    }

    pub fn in_flight(&self) -> usize {
        self.entries.len()
    }

    pub fn has_unacked(&self) -> bool {
        !self.entries.is_empty()
    }

    /// 방금 보낸 프레임을 윈도우에 추가
    pub fn record_sent(&mut self, frame: Frame) {
        debug_assert_eq!(frame.seq(), self.next_seq);
        debug_assert!(self.can_send());
        self.entries.push_back(InFlight {
            frame,
            sent_at: Instant::now(),
            tx_count: 1,
        });
        self.next_seq = self.next_seq.wrapping_add(1);
    }

    /// 누적 ACK 처리 → 새로 확인된 프레임 수
    ///
    /// `next_expected`가 아직 보내지 않은 시퀀스를 넘으면 프로토콜 위반.
    pub fn on_ack(&mut self, next_expected: u32) -> Result<usize> {
        if next_expected > self.next_seq {
            return Err(Error::ProtocolViolation(format!(
                "보내지 않은 시퀀스에 대한 ACK: ack={}, next_seq={}",
                next_expected, self.next_seq
            )));
        }
        if next_expected <= self.base {
            return Ok(0);
        }

        let mut acked = 0;
        while let Some(front) = self.entries.front() {
            if front.frame.seq() < next_expected {
                self.entries.pop_front();
                acked += 1;
            } else {
                break;
            }
        }
        self.base = next_expected;
        Ok(acked)
    }

    /// 가장 이른 재전송 시각
    pub fn next_deadline(&self, rto: Duration) -> Option<Instant> {
        self.entries.iter().map(|e| e.sent_at + rto).min()
    }

    /// RTO가 지난 프레임들을 재전송 대상으로 표시하고 반환
    pub fn take_expired(&mut self, now: Instant, rto: Duration) -> Vec<Frame> {
        self.entries
            .iter_mut()
            .filter(|e| e.sent_at + rto <= now)
            .map(|e| {
                e.sent_at = now;
                e.tx_count += 1;
                e.frame.clone()
            })
            .collect()
    }
}

/// 재정렬 버퍼
#[derive(Debug)]
pub struct ReorderBuffer {
    /// 다음으로 전달할 시퀀스
    next_expected: u32,

    /// 순서가 앞서 도착한 프레임
    pending: BTreeMap<u32, Bytes>,

    /// 허용하는 최대 선행 거리
    limit: u32,

    /// FIN 시퀀스 (수신한 경우)
    fin_seq: Option<u32>,

    /// 이미 받은 프레임 재수신 횟수
    pub duplicates: u64,

    /// 전달한 총 바이트
    pub delivered_bytes: u64,
}

impl ReorderBuffer {
    pub fn new(limit: u32) -> Self {
        Self {
            next_expected: 0,
            pending: BTreeMap::new(),
            limit: limit.max(1),
            fin_seq: None,
            duplicates: 0,
            delivered_bytes: 0,
        }
    }

    pub fn next_expected(&self) -> u32 {
        self.next_expected
    }

    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    /// DATA 프레임 삽입 → 순서대로 전달 가능해진 payload 목록
    pub fn insert_data(&mut self, seq: u32, payload: Bytes) -> Result<Vec<Bytes>> {
        if seq < self.next_expected {
            self.duplicates += 1;
            return Ok(Vec::new());
        }
        if seq - self.next_expected >= self.limit {
            return Err(Error::ProtocolViolation(format!(
                "재정렬 범위를 벗어난 시퀀스: seq={}, expected={}, limit={}",
                seq, self.next_expected, self.limit
            )));
        }
        if let Some(fin) = self.fin_seq {
            if seq >= fin {
                return Err(Error::ProtocolViolation(format!(
                    "FIN 이후 데이터: seq={}, fin={}",
                    seq, fin
                )));
            }
        }
        if self.pending.insert(seq, payload).is_some() {
            self.duplicates += 1;
        }

        let mut ready = Vec::new();
        while let Some(payload) = self.pending.remove(&self.next_expected) {
            self.delivered_bytes += payload.len() as u64;
            ready.push(payload);
            self.next_expected += 1;
        }
        Ok(ready)
    }

    /// FIN 프레임 기록
    pub fn insert_fin(&mut self, seq: u32) -> Result<()> {
        match self.fin_seq {
            Some(fin) if fin != seq => Err(Error::ProtocolViolation(format!(
                "FIN 시퀀스 변경: {} → {}",
                fin, seq
            ))),
            Some(_) => {
                self.duplicates += 1;
                Ok(())
            }
            None => {
                let beyond = self.pending.keys().next_back().is_some_and(|&last| last >= seq);
                if seq < self.next_expected || beyond {
                    return Err(Error::ProtocolViolation(format!(
                        "이미 받은 데이터 앞의 FIN: fin={}, expected={}",
                        seq, self.next_expected
                    )));
                }
                self.fin_seq = Some(seq);
                Ok(())
            }
        }
    }

    /// FIN까지 모두 전달됨
    pub fn is_complete(&self) -> bool {
        self.fin_seq == Some(self.next_expected)
    }

    /// 현재 보낼 누적 ACK 값 (FIN까지 받았으면 FIN 다음)
    pub fn ack_value(&self) -> u32 {
        if self.is_complete() {
            self.next_expected + 1
        } else {
            self.next_expected
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::{Rng, SeedableRng};

    fn data_frame(seq: u32) -> Frame {
        Frame::data(seq, Bytes::from(vec![seq as u8; 4]))
    }

    #[test]
    fn test_split_payload() {
        let pieces = split_payload(Bytes::from(vec![7u8; 250]), 100);
        let sizes: Vec<usize> = pieces.iter().map(Bytes::len).collect();
        assert_eq!(sizes, vec![100, 100, 50]);
        assert!(split_payload(Bytes::new(), 100).is_empty());
    }

    #[test]
    fn test_window_fills_and_blocks() {
        let mut window = SendWindow::new(2);
        window.record_sent(data_frame(0));
        window.record_sent(data_frame(1));
        assert!(!window.can_send());
        assert_eq!(window.in_flight(), 2);
        assert_eq!(window.next_seq(), 2);
    }

    #[test]
    fn test_cumulative_ack_retires_prefix() {
        let mut window = SendWindow::new(8);
        for seq in 0..5 {
            window.record_sent(data_frame(seq));
        }

        assert_eq!(window.on_ack(3).unwrap(), 3);
        assert_eq!(window.base(), 3);
        assert_eq!(window.in_flight(), 2);

        // 중복/지난 ACK
        assert_eq!(window.on_ack(2).unwrap(), 0);
        assert_eq!(window.on_ack(3).unwrap(), 0);

        assert_eq!(window.on_ack(5).unwrap(), 2);
        assert!(!window.has_unacked());
    }

    #[test]
    fn test_ack_beyond_sent_is_violation() {
        let mut window = SendWindow::new(4);
        window.record_sent(data_frame(0));
        assert!(matches!(window.on_ack(5), Err(Error::ProtocolViolation(_))));
    }

    #[test]
    fn test_expired_frames_are_rearmed() {
        let mut window = SendWindow::new(4);
        window.record_sent(data_frame(0));
        window.record_sent(data_frame(1));

        let rto = Duration::from_millis(100);
        let later = Instant::now() + Duration::from_millis(150);
        let expired = window.take_expired(later, rto);
        assert_eq!(expired.len(), 2);
        assert!(window.take_expired(later, rto).is_empty());
        assert_eq!(window.next_deadline(rto), Some(later + rto));
    }

    #[test]
    fn test_reorder_delivers_in_order() {
        let mut buffer = ReorderBuffer::new(16);
        assert!(buffer.insert_data(1, Bytes::from_static(b"b")).unwrap().is_empty());
        assert!(buffer.insert_data(2, Bytes::from_static(b"c")).unwrap().is_empty());
        assert_eq!(buffer.ack_value(), 0);

        let ready = buffer.insert_data(0, Bytes::from_static(b"a")).unwrap();
        assert_eq!(ready, vec![Bytes::from_static(b"a"), Bytes::from_static(b"b"), Bytes::from_static(b"c")]);
        assert_eq!(buffer.ack_value(), 3);

        // 재전송된 중복은 다시 전달하지 않음
        assert!(buffer.insert_data(1, Bytes::from_static(b"b")).unwrap().is_empty());
        assert_eq!(buffer.duplicates, 1);
    }

    #[test]
    fn test_fin_completes_only_after_all_data() {
        let mut buffer = ReorderBuffer::new(16);
        buffer.insert_fin(2).unwrap();
        assert!(!buffer.is_complete());

        buffer.insert_data(1, Bytes::from_static(b"y")).unwrap();
        assert!(!buffer.is_complete());
        buffer.insert_data(0, Bytes::from_static(b"x")).unwrap();
        assert!(buffer.is_complete());
        assert_eq!(buffer.ack_value(), 3);

        // FIN 재전송은 허용, 다른 시퀀스의 FIN은 위반
        buffer.insert_fin(2).unwrap();
        assert!(buffer.insert_fin(7).is_err());
    }

    #[test]
    fn test_out_of_range_sequence_is_violation() {
        let mut buffer = ReorderBuffer::new(4);
        assert!(matches!(
            buffer.insert_data(4, Bytes::new()),
            Err(Error::ProtocolViolation(_))
        ));

        let mut buffer = ReorderBuffer::new(16);
        buffer.insert_fin(1).unwrap();
        assert!(buffer.insert_data(1, Bytes::new()).is_err());
    }

    #[test]
    fn test_shuffled_with_duplicates_delivers_exactly_once() {
        const FRAMES: u32 = 500;
        let mut rng = StdRng::seed_from_u64(0x5eed);

        let original: Vec<Bytes> = (0..FRAMES)
            .map(|i| Bytes::from(format!("frame-{:04}|", i)))
            .collect();

        // 각 프레임 최대 1회 중복 + 무작위 순서
        let mut arrivals: Vec<u32> = Vec::new();
        for seq in 0..FRAMES {
            arrivals.push(seq);
            if rng.gen_bool(0.5) {
                arrivals.push(seq);
            }
        }
        arrivals.shuffle(&mut rng);

        let mut buffer = ReorderBuffer::new(FRAMES + 1);
        let mut delivered = Vec::new();
        for seq in arrivals {
            for payload in buffer.insert_data(seq, original[seq as usize].clone()).unwrap() {
                delivered.extend_from_slice(&payload);
            }
        }
        buffer.insert_fin(FRAMES).unwrap();

        let expected: Vec<u8> = original.iter().flat_map(|b| b.iter().copied()).collect();
        assert_eq!(delivered, expected);
        assert!(buffer.is_complete());
        assert_eq!(buffer.buffered(), 0);
    }
}
