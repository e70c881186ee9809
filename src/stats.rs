//! 전송 통계
//!
//! 한 번의 전송 동안 전송 엔진과 RTT 프로버가 갱신하고,
//! 마지막에 리포트 쪽에서 한 번 읽는다.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::rtt::RttEstimate;

/// 시점 스냅샷 (벽시계 + 자원 사용량 + 사이클 카운터)
#[derive(Debug, Clone, Copy)]
pub struct UsageSnapshot {
    /// 벽시계 시각
    pub wall: SystemTime,

    /// 단조 시계
    pub instant: Instant,

    /// 사용자 모드 CPU 시간
    pub user_time: Duration,

    /// 커널 모드 CPU 시간
    pub system_time: Duration,

    /// 최대 RSS (KB)
    pub max_rss_kb: i64,

    pub minor_faults: i64,
    pub major_faults: i64,
    pub voluntary_switches: i64,
    pub involuntary_switches: i64,

    /// TSC (x86_64만)
    pub cycles: Option<u64>,
}

impl UsageSnapshot {
    /// 현재 시점 측정
    pub fn take() -> Self {
        let cycles = read_cycle_counter();
        let wall = SystemTime::now();
        let instant = Instant::now();

        // SAFETY: getrusage는 넘겨준 구조체만 채운다
        let mut ru: libc::rusage = unsafe { std::mem::zeroed() };
        let ok = unsafe { libc::getrusage(libc::RUSAGE_SELF, &mut ru) } == 0;
        if !ok {
            tracing::warn!("getrusage 실패: {}", std::io::Error::last_os_error());
        }

        Self {
            wall,
            instant,
            user_time: timeval_to_duration(ru.ru_utime),
            system_time: timeval_to_duration(ru.ru_stime),
            max_rss_kb: ru.ru_maxrss as i64,
            minor_faults: ru.ru_minflt as i64,
            major_faults: ru.ru_majflt as i64,
            voluntary_switches: ru.ru_nvcsw as i64,
            involuntary_switches: ru.ru_nivcsw as i64,
            cycles,
        }
    }
}

fn timeval_to_duration(tv: libc::timeval) -> Duration {
    Duration::from_secs(tv.tv_sec.max(0) as u64) + Duration::from_micros(tv.tv_usec.max(0) as u64)
}

#[cfg(target_arch = "x86_64")]
fn read_cycle_counter() -> Option<u64> {
    // SAFETY: rdtsc는 모든 x86_64 CPU에서 사용 가능
    Some(unsafe { std::arch::x86_64::_rdtsc() })
}

#[cfg(not(target_arch = "x86_64"))]
fn read_cycle_counter() -> Option<u64> {
    None
}

/// 전체 전송 통계
#[derive(Debug, Clone, Default)]
pub struct TransferStats {
    /// 성공한 송신 호출 수
    pub total_tx_calls: u64,

    /// 송신 바이트 (벌크 데이터만)
    pub total_tx_bytes: u64,

    /// 성공한 수신 호출 수
    pub total_rx_calls: u64,

    /// 수신 바이트
    pub total_rx_bytes: u64,

    /// 첫 I/O 직전
    pub start: Option<UsageSnapshot>,

    /// 마지막 I/O 직후
    pub end: Option<UsageSnapshot>,

    /// RTT 추정치
    pub rtt: Option<RttEstimate>,

    /// 프로브 왕복 수 (워밍업 포함)
    pub probe_round_trips: u32,
}

impl TransferStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// 시작 스냅샷
    pub fn mark_start(&mut self) {
        self.start = Some(UsageSnapshot::take());
    }

    /// 종료 스냅샷
    pub fn mark_end(&mut self) {
        self.end = Some(UsageSnapshot::take());
    }

    /// 송신 기록
    pub fn record_tx(&mut self, calls: u64, bytes: u64) {
        self.total_tx_calls += calls;
        self.total_tx_bytes += bytes;
    }

    /// 수신 기록
    pub fn record_rx(&mut self, calls: u64, bytes: u64) {
        self.total_rx_calls += calls;
        self.total_rx_bytes += bytes;
    }

    /// 경과 시간 (스냅샷이 없으면 0)
    pub fn elapsed(&self) -> Duration {
        match (self.start, self.end) {
            (Some(start), Some(end)) => end.instant.saturating_duration_since(start.instant),
            _ => Duration::ZERO,
        }
    }

    /// 처리율 (bytes/sec), 송신/수신 중 큰 쪽 기준
    pub fn throughput(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }
        self.total_tx_bytes.max(self.total_rx_bytes) as f64 / elapsed
    }

    /// 전송 구간 CPU 시간 (user, system)
    pub fn cpu_time(&self) -> (Duration, Duration) {
        match (self.start, self.end) {
            (Some(start), Some(end)) => (
                end.user_time.saturating_sub(start.user_time),
                end.system_time.saturating_sub(start.system_time),
            ),
            _ => (Duration::ZERO, Duration::ZERO),
        }
    }

    /// 전송 구간 사이클 수
    pub fn cycles(&self) -> Option<u64> {
        let start = self.start?.cycles?;
        let end = self.end?.cycles?;
        Some(end.wrapping_sub(start))
    }

    /// 다른 스트림 통계 합산
    ///
    /// 카운터는 더하고, 시작은 가장 이른 것, 종료는 가장 늦은 것을 쓴다.
    pub fn merge(&mut self, other: &TransferStats) {
        self.total_tx_calls += other.total_tx_calls;
        self.total_tx_bytes += other.total_tx_bytes;
        self.total_rx_calls += other.total_rx_calls;
        self.total_rx_bytes += other.total_rx_bytes;
        self.probe_round_trips += other.probe_round_trips;

        self.start = match (self.start, other.start) {
            (Some(a), Some(b)) => Some(if b.instant < a.instant { b } else { a }),
            (a, b) => a.or(b),
        };
        self.end = match (self.end, other.end) {
            (Some(a), Some(b)) => Some(if b.instant > a.instant { b } else { a }),
            (a, b) => a.or(b),
        };
        if self.rtt.is_none() {
            self.rtt = other.rtt.clone();
        }
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        let (user, system) = self.cpu_time();
        let rtt = self
            .rtt
            .as_ref()
            .map(|r| format!("{:.3}ms", r.rtt.as_secs_f64() * 1000.0))
            .unwrap_or_else(|| "-".into());

        format!(
            "Elapsed: {:.3}s | TX: {} bytes / {} calls | RX: {} bytes / {} calls | Throughput: {:.2} MB/s | CPU: {:.3}s usr {:.3}s sys | RTT: {}",
            self.elapsed().as_secs_f64(),
            self.total_tx_bytes,
            self.total_tx_calls,
            self.total_rx_bytes,
            self.total_rx_calls,
            self.throughput() / 1_000_000.0,
            user.as_secs_f64(),
            system.as_secs_f64(),
            rtt,
        )
    }

    /// 기계 판독용 리포트
    pub fn report(&self) -> StatsReport {
        let (user, system) = self.cpu_time();
        StatsReport {
            total_tx_calls: self.total_tx_calls,
            total_tx_bytes: self.total_tx_bytes,
            total_rx_calls: self.total_rx_calls,
            total_rx_bytes: self.total_rx_bytes,
            start_epoch_us: self.start.map(|s| epoch_micros(s.wall)),
            end_epoch_us: self.end.map(|s| epoch_micros(s.wall)),
            elapsed_us: self.elapsed().as_micros() as u64,
            throughput_bps: self.throughput(),
            user_time_us: user.as_micros() as u64,
            system_time_us: system.as_micros() as u64,
            max_rss_kb: self.end.map(|s| s.max_rss_kb),
            cycles: self.cycles(),
            probe_round_trips: self.probe_round_trips,
            rtt_ms: self.rtt.as_ref().map(|r| r.rtt.as_secs_f64() * 1000.0),
            rtt_mean_ms: self.rtt.as_ref().map(|r| r.mean_ms),
            rtt_deviation_ms: self.rtt.as_ref().map(|r| r.deviation_ms),
        }
    }
}

fn epoch_micros(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH).unwrap_or_default().as_micros() as u64
}

/// 직렬화 가능한 통계 리포트
#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    pub total_tx_calls: u64,
    pub total_tx_bytes: u64,
    pub total_rx_calls: u64,
    pub total_rx_bytes: u64,
    pub start_epoch_us: Option<u64>,
    pub end_epoch_us: Option<u64>,
    pub elapsed_us: u64,
    pub throughput_bps: f64,
    pub user_time_us: u64,
    pub system_time_us: u64,
    pub max_rss_kb: Option<i64>,
    pub cycles: Option<u64>,
    pub probe_round_trips: u32,
    pub rtt_ms: Option<f64>,
    pub rtt_mean_ms: Option<f64>,
    pub rtt_deviation_ms: Option<f64>,
}
