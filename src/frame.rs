//! seq 모드 프레임 정의
//!
//! 데이터그램 하나 = 프레임 하나:
//! `u16 LE 헤더 길이` + bincode(`FrameHeader`) + payload
//!
//! ACK 프레임의 `seq`는 다음으로 기대하는 시퀀스 번호(그보다 작은 프레임은 모두 수신됨).

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{Error, Result, MAGIC_NUMBER, PROTOCOL_VERSION};

/// 프레임 플래그
pub mod flags {
    /// 세션 시작 (connect → listen)
    pub const SYN: u8 = 0b0000_0001;
    /// 데이터
    pub const DATA: u8 = 0b0000_0010;
    /// 누적 확인응답
    pub const ACK: u8 = 0b0000_0100;
    /// 스트림 종료
    pub const FIN: u8 = 0b0000_1000;
}

/// 프레임 헤더
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameHeader {
    /// 매직 넘버
    pub magic: u32,

    /// 프로토콜 버전
    pub version: u8,

    /// 플래그 조합
    pub flags: u8,

    /// 시퀀스 번호 (ACK는 다음 기대 번호)
    pub seq: u32,

    /// payload 길이
    pub payload_len: u16,

    /// payload CRC32
    pub crc32: u32,
}

/// 프레임
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Bytes,
}

/// 프레임 종류 (유효한 플래그 조합)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Syn,
    SynAck,
    Data,
    Ack,
    Fin,
}

impl Frame {
    fn new(flags: u8, seq: u32, payload: Bytes) -> Self {
        Self {
            header: FrameHeader {
                magic: MAGIC_NUMBER,
                version: PROTOCOL_VERSION,
                flags,
                seq,
                payload_len: payload.len() as u16,
                crc32: crc32fast::hash(&payload),
            },
            payload,
        }
    }

    pub fn syn() -> Self {
        Self::new(flags::SYN, 0, Bytes::new())
    }

    pub fn syn_ack() -> Self {
        Self::new(flags::SYN | flags::ACK, 0, Bytes::new())
    }

    pub fn data(seq: u32, payload: Bytes) -> Self {
        debug_assert!(payload.len() <= u16::MAX as usize);
        Self::new(flags::DATA, seq, payload)
    }

    /// 누적 ACK (`next_expected` 미만 모두 수신)
    pub fn ack(next_expected: u32) -> Self {
        Self::new(flags::ACK, next_expected, Bytes::new())
    }

    pub fn fin(seq: u32) -> Self {
        Self::new(flags::FIN, seq, Bytes::new())
    }

    pub fn seq(&self) -> u32 {
        self.header.seq
    }

    /// 플래그 조합 검증
    pub fn kind(&self) -> Result<FrameKind> {
        let kind = match self.header.flags {
            f if f == flags::SYN => FrameKind::Syn,
            f if f == flags::SYN | flags::ACK => FrameKind::SynAck,
            f if f == flags::DATA => FrameKind::Data,
            f if f == flags::ACK => FrameKind::Ack,
            f if f == flags::FIN => FrameKind::Fin,
            other => {
                return Err(Error::ProtocolViolation(format!(
                    "허용되지 않는 플래그 조합: {:#04x}",
                    other
                )))
            }
        };

        if kind != FrameKind::Data && !self.payload.is_empty() {
            return Err(Error::ProtocolViolation(format!(
                "{:?} 프레임에 payload 존재 ({} bytes)",
                kind,
                self.payload.len()
            )));
        }
        Ok(kind)
    }

    /// 바이트로 직렬화
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let header_bytes = bincode::serialize(&self.header)?;
        let header_len = u16::try_from(header_bytes.len())
            .map_err(|_| Error::ProtocolViolation("헤더가 너무 큼".into()))?;

        let mut buf = Vec::with_capacity(2 + header_bytes.len() + self.payload.len());
        buf.extend_from_slice(&header_len.to_le_bytes());
        buf.extend_from_slice(&header_bytes);
        buf.extend_from_slice(&self.payload);
        Ok(buf)
    }

    /// 바이트에서 역직렬화
    ///
    /// 매직/버전/길이/CRC가 맞지 않으면 에러. 플래그 검증은 [`Frame::kind`]에서.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 2 {
            return Err(Error::ProtocolViolation("프레임이 너무 짧음".into()));
        }

        let header_len = u16::from_le_bytes([bytes[0], bytes[1]]) as usize;
        if bytes.len() < 2 + header_len {
            return Err(Error::ProtocolViolation("헤더가 잘림".into()));
        }

        let header: FrameHeader = bincode::deserialize(&bytes[2..2 + header_len])?;
        if header.magic != MAGIC_NUMBER {
            return Err(Error::ProtocolViolation(format!(
                "유효하지 않은 매직 넘버: expected {:08X}, got {:08X}",
                MAGIC_NUMBER, header.magic
            )));
        }
        if header.version != PROTOCOL_VERSION {
            return Err(Error::ProtocolViolation(format!(
                "유효하지 않은 프로토콜 버전: expected {}, got {}",
                PROTOCOL_VERSION, header.version
            )));
        }

        let payload = &bytes[2 + header_len..];
        if payload.len() != header.payload_len as usize {
            return Err(Error::ProtocolViolation(format!(
                "payload 길이 불일치: header {}, actual {}",
                header.payload_len,
                payload.len()
            )));
        }
        if crc32fast::hash(payload) != header.crc32 {
            return Err(Error::ProtocolViolation("CRC 불일치".into()));
        }

        Ok(Self {
            header,
            payload: Bytes::copy_from_slice(payload),
        })
    }

    /// 직렬화된 헤더 크기 (길이 접두사 포함)
    pub fn overhead() -> usize {
        let header = Frame::syn().header;
        2 + bincode::serialized_size(&header).unwrap_or(16) as usize
    }
}
