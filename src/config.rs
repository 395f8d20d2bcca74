//! 전송 설정

use std::time::Duration;

use crate::{DEFAULT_MTU_PAYLOAD, DEFAULT_WINDOW_SIZE};

/// 전송 설정
///
/// 모든 연산은 `Client`가 들고 있는 설정의 복사본을 사용하며,
/// URL 옵션(`timeout`, `window`, `rto_ms`, `mtu`)이 있으면 세션 단위로 덮어쓴다.
#[derive(Debug, Clone)]
pub struct Config {
    /// 연결/accept/HTTP 요청 타임아웃
    pub io_timeout: Duration,

    /// 데이터그램당 최대 페이로드 (바이트, 프레임 헤더 제외)
    pub mtu_payload: usize,

    /// seq 모드 송신 윈도우 (in-flight 프레임 수)
    pub window_size: usize,

    /// 초기 재전송 타임아웃 (밀리초)
    pub rto_ms: u64,

    /// 재전송마다 RTO에 곱할 배수
    pub rto_backoff: f64,

    /// 최대 RTO (밀리초)
    pub max_rto_ms: u64,

    /// 미확인 데이터가 있는 상태에서 아무 데이터그램도 없으면 실패하는 시간 (밀리초)
    pub idle_timeout_ms: u64,

    /// 수신측 재정렬 버퍼가 허용하는 최대 선행 시퀀스 거리
    pub reorder_limit: u32,

    /// FIN 확인 후 재전송된 FIN에 다시 ACK하기 위해 머무는 시간 (밀리초)
    pub fin_linger_ms: u64,

    /// 호출자와 세션 태스크 사이 큐 크기
    pub queue_capacity: usize,

    /// 입력 스트림을 읽는 단위 (바이트)
    pub read_chunk_size: usize,

    /// 실패 시 부분 수신 파일을 남길지 여부
    pub keep_partial: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            io_timeout: Duration::from_secs(60),
            mtu_payload: DEFAULT_MTU_PAYLOAD,
            window_size: DEFAULT_WINDOW_SIZE,
            rto_ms: 200,
            rto_backoff: 2.0,
            max_rto_ms: 2000,
            idle_timeout_ms: 10_000,
            reorder_limit: 1024,
            fin_linger_ms: 1000,
            queue_capacity: 64,
            read_chunk_size: 64 * 1024,
            keep_partial: false,
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rto(&self) -> Duration {
        Duration::from_millis(self.rto_ms)
    }

    pub fn max_rto(&self) -> Duration {
        Duration::from_millis(self.max_rto_ms.max(self.rto_ms))
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn fin_linger(&self) -> Duration {
        Duration::from_millis(self.fin_linger_ms)
    }

    /// 백오프 적용된 다음 RTO
    pub fn next_rto(&self, current: Duration) -> Duration {
        let next = current.mul_f64(self.rto_backoff.max(1.0));
        next.min(self.max_rto())
    }

    /// 루프백/LAN용 설정
    pub fn low_latency() -> Self {
        Self {
            io_timeout: Duration::from_secs(10),
            window_size: 64,
            rto_ms: 50,
            rto_backoff: 1.5,
            max_rto_ms: 500,
            idle_timeout_ms: 3000,
            fin_linger_ms: 300,
            ..Self::default()
        }
    }

    /// 불안정한 네트워크용 설정
    pub fn lossy_network() -> Self {
        Self {
            mtu_payload: 1000, // 작은 데이터그램
            window_size: 16,
            rto_ms: 400,
            rto_backoff: 2.0,
            max_rto_ms: 5000,
            idle_timeout_ms: 30_000,
            fin_linger_ms: 3000,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rto_backoff_is_capped() {
        let config = Config::default();
        let mut rto = config.rto();
        for _ in 0..10 {
            rto = config.next_rto(rto);
        }
        assert_eq!(rto, config.max_rto());
    }
}
