//! 전송 설정

use std::str::FromStr;
use std::time::Duration;

use crate::transfer::Strategy;
use crate::transport::Transport;
use crate::{Error, Result, DEFAULT_BUFFER_SIZE};

/// 기본 RTT 프로브 반복 횟수
pub const DEFAULT_RTT_ITERATIONS: u16 = 10;

/// 기본 RTT 프로브 채움 데이터 크기 (바이트)
pub const DEFAULT_RTT_PAYLOAD: usize = 500;

/// 기본 편차 필터 배수
pub const DEFAULT_RTT_FILTER: u32 = 4;

/// 최대 RTT 프로브 반복 횟수
pub const MAX_RTT_ITERATIONS: u16 = 100;

/// 최대 편차 필터 배수
pub const MAX_RTT_FILTER: u32 = 50;

/// 최대 RTT 프로브 채움 데이터 크기 (확장 헤더 `length_words` 한도)
pub const MAX_RTT_PAYLOAD: usize = crate::header::MAX_RTT_FILLER;

/// 메모리/파일 접근 힌트 (posix_madvise / posix_fadvise)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemAdvice {
    Normal,
    Random,
    Sequential,
    WillNeed,
    DontNeed,
    /// fadvise 전용, madvise에서는 WillNeed로 대체
    NoReuse,
}

impl MemAdvice {
    /// posix_fadvise 값
    pub fn fadvise_flag(self) -> libc::c_int {
        match self {
            MemAdvice::Normal => libc::POSIX_FADV_NORMAL,
            MemAdvice::Random => libc::POSIX_FADV_RANDOM,
            MemAdvice::Sequential => libc::POSIX_FADV_SEQUENTIAL,
            MemAdvice::WillNeed => libc::POSIX_FADV_WILLNEED,
            MemAdvice::DontNeed => libc::POSIX_FADV_DONTNEED,
            MemAdvice::NoReuse => libc::POSIX_FADV_NOREUSE,
        }
    }

    /// posix_madvise 값
    pub fn madvise_flag(self) -> libc::c_int {
        match self {
            MemAdvice::Normal => libc::POSIX_MADV_NORMAL,
            MemAdvice::Random => libc::POSIX_MADV_RANDOM,
            MemAdvice::Sequential => libc::POSIX_MADV_SEQUENTIAL,
            MemAdvice::WillNeed | MemAdvice::NoReuse => libc::POSIX_MADV_WILLNEED,
            MemAdvice::DontNeed => libc::POSIX_MADV_DONTNEED,
        }
    }
}

impl FromStr for MemAdvice {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "normal" => Ok(MemAdvice::Normal),
            "random" => Ok(MemAdvice::Random),
            "sequential" => Ok(MemAdvice::Sequential),
            "willneed" => Ok(MemAdvice::WillNeed),
            "dontneed" => Ok(MemAdvice::DontNeed),
            "noreuse" => Ok(MemAdvice::NoReuse),
            other => Err(Error::InvalidConfig(format!("알 수 없는 메모리 힌트: {}", other))),
        }
    }
}

/// 식별자가 맞지 않는 프로브 응답 처리 방식
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MismatchPolicy {
    /// 경고 후 샘플 기록
    #[default]
    Record,

    /// 샘플 버림
    Discard,
}

/// RTT 프로브 설정
#[derive(Debug, Clone, PartialEq)]
pub struct RttProbeConfig {
    /// 프로브 수행 여부
    pub enabled: bool,

    /// 측정 반복 횟수 (워밍업 1회 별도)
    pub iterations: u16,

    /// 프로브당 채움 데이터 크기 (4의 배수로 내림)
    pub payload_size: usize,

    /// 평균 ± (편차 × 배수) 밖의 샘플을 버린다
    pub deviation_filter: u32,

    /// 측정 대신 이 값을 RTT로 사용
    pub forced: Option<Duration>,

    /// 계산한 RTT를 RTT_INFO 확장으로 수신측에 알림
    pub announce: bool,

    /// 프로브 세션 전체 타임아웃
    pub timeout: Duration,

    pub mismatch: MismatchPolicy,
}

impl Default for RttProbeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            iterations: DEFAULT_RTT_ITERATIONS,
            payload_size: DEFAULT_RTT_PAYLOAD,
            deviation_filter: DEFAULT_RTT_FILTER,
            forced: None,
            announce: true,
            timeout: Duration::from_secs(10),
            mismatch: MismatchPolicy::Record,
        }
    }
}

impl RttProbeConfig {
    /// 프로브 비활성 설정
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.iterations == 0 || self.iterations > MAX_RTT_ITERATIONS {
            return Err(Error::InvalidConfig(format!(
                "RTT 프로브 반복 {}회는 허용 범위(1~{}) 밖",
                self.iterations, MAX_RTT_ITERATIONS
            )));
        }
        if self.deviation_filter > MAX_RTT_FILTER {
            return Err(Error::InvalidConfig(format!(
                "편차 필터 배수 {}는 허용 범위(0~{}) 밖",
                self.deviation_filter, MAX_RTT_FILTER
            )));
        }
        if self.payload_size > MAX_RTT_PAYLOAD {
            return Err(Error::InvalidConfig(format!(
                "RTT 프로브 데이터 {} bytes는 최대 {} bytes 초과",
                self.payload_size, MAX_RTT_PAYLOAD
            )));
        }
        if self.timeout.is_zero() {
            return Err(Error::InvalidConfig("RTT 타임아웃은 0일 수 없음".into()));
        }
        Ok(())
    }
}

/// `"10n,64d,4m,0f"` 형식 파싱
///
/// - `n`: 반복 횟수 (1~100)
/// - `d`: 채움 데이터 크기 (1~`MAX_RTT_PAYLOAD`)
/// - `m`: 편차 필터 배수 (0~50)
/// - `f`: 강제 RTT (ms, >=0)
impl FromStr for RttProbeConfig {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut config = RttProbeConfig::default();

        for token in s.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let split = token
                .find(|c: char| !c.is_ascii_digit() && c != '-')
                .ok_or_else(|| Error::InvalidConfig(format!("RTT 옵션 단위 누락: {}", token)))?;
            let (number, unit) = token.split_at(split);
            let value: i64 = number
                .parse()
                .map_err(|_| Error::InvalidConfig(format!("RTT 옵션 숫자 오류: {}", token)))?;

            match unit {
                "n" => {
                    if value <= 0 || value > MAX_RTT_ITERATIONS as i64 {
                        return Err(Error::InvalidConfig(format!(
                            "RTT 프로브 반복 {}회는 허용 범위(1~{}) 밖",
                            value, MAX_RTT_ITERATIONS
                        )));
                    }
                    config.iterations = value as u16;
                }
                "d" => {
                    if value <= 0 || value > MAX_RTT_PAYLOAD as i64 {
                        return Err(Error::InvalidConfig(format!(
                            "{}는 RTT 프로브 데이터 크기로 유효하지 않음 (1~{})",
                            value, MAX_RTT_PAYLOAD
                        )));
                    }
                    config.payload_size = value as usize;
                }
                "m" => {
                    if value < 0 || value > MAX_RTT_FILTER as i64 {
                        return Err(Error::InvalidConfig(format!(
                            "편차 필터 배수 {} (기본값 {})",
                            value, DEFAULT_RTT_FILTER
                        )));
                    }
                    config.deviation_filter = value as u32;
                }
                "f" => {
                    if value < 0 {
                        return Err(Error::InvalidConfig(format!("{}ms는 RTT로 유효하지 않음", value)));
                    }
                    config.forced = Some(Duration::from_millis(value as u64));
                }
                other => {
                    return Err(Error::InvalidConfig(format!(
                        "RTT 옵션 {}의 단위 '{}'를 알 수 없음",
                        token, other
                    )));
                }
            }
        }

        Ok(config)
    }
}

/// 벌크 전송 옵션
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransferOptions {
    /// 청크 크기 (0이면 전략별 기본값)
    pub chunk_size: usize,

    /// 청크 단위 전송 제한 (0이면 무제한)
    pub limit_chunks: u64,

    /// 메모리/파일 접근 힌트
    pub advice: Option<MemAdvice>,
}

impl TransferOptions {
    /// read/write 루프 버퍼 크기
    pub fn buffer_size(&self) -> usize {
        if self.chunk_size == 0 {
            DEFAULT_BUFFER_SIZE
        } else {
            self.chunk_size
        }
    }

    /// 바이트 단위 전송 제한
    ///
    /// `chunk_size`가 0이면 `auto_chunk`(전략의 기본 청크)를 곱한다.
    pub fn limit_bytes(&self, auto_chunk: u64) -> Option<u64> {
        if self.limit_chunks == 0 {
            return None;
        }
        let chunk = if self.chunk_size == 0 {
            auto_chunk
        } else {
            self.chunk_size as u64
        };
        Some(chunk.saturating_mul(self.limit_chunks))
    }
}

/// netsend 설정
#[derive(Debug, Clone)]
pub struct Config {
    /// 벌크 전송 방식
    pub strategy: Strategy,

    pub transfer: TransferOptions,

    pub rtt: RttProbeConfig,

    /// 트랜스포트 종류
    pub transport: Transport,

    /// 독립 스트림 수
    pub streams: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            strategy: Strategy::ReadWriteLoop,
            transfer: TransferOptions::default(),
            rtt: RttProbeConfig::default(),
            transport: Transport::Tcp,
            streams: 1,
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.rtt.enabled {
            self.rtt.validate()?;
        }
        if self.streams == 0 {
            return Err(Error::InvalidConfig("스트림 수는 1 이상이어야 함".into()));
        }
        if self.streams > 1 && !self.transport.is_reliable_stream() {
            return Err(Error::InvalidConfig(format!(
                "{} 트랜스포트는 멀티 스트림을 지원하지 않음",
                self.transport
            )));
        }
        if !self.transport.is_supported() {
            return Err(Error::UnsupportedTransport {
                transport: self.transport,
            });
        }
        if self.transfer.limit_chunks > 0 && self.transfer.chunk_size == 0 {
            tracing::debug!("청크 크기 미지정 + 전송 제한: 전략 기본 청크 기준으로 제한");
        }
        Ok(())
    }

    /// 지연 측정 위주 설정 (짧은 프로브)
    pub fn low_latency_probe() -> Self {
        Self {
            rtt: RttProbeConfig {
                iterations: 5,
                payload_size: 64,
                timeout: Duration::from_secs(3),
                ..RttProbeConfig::default()
            },
            ..Self::default()
        }
    }

    /// 대용량 전송 설정 (sendfile, 프로브 없음)
    pub fn bulk() -> Self {
        Self {
            strategy: Strategy::WholeFileZeroCopy,
            transfer: TransferOptions {
                advice: Some(MemAdvice::Sequential),
                ..TransferOptions::default()
            },
            rtt: RttProbeConfig::disabled(),
            ..Self::default()
        }
    }
}
