//! 에러 타입 정의

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::transfer::Strategy;
use crate::transport::Transport;

/// netsend 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("헤더 잘림: expected {expected} bytes, got {got}")]
    HeaderTruncated { expected: usize, got: usize },

    #[error("손상된 헤더: magic expected {expected:#06X}, got {got:#06X}")]
    HeaderCorrupt { expected: u16, got: u16 },

    #[error("알 수 없는 확장 헤더가 너무 많음: {count}개 (마지막 kind={last_kind})")]
    TooManyUnknownExtensions { count: u32, last_kind: u16 },

    #[error("확장 헤더가 너무 큼: {len} bytes (최대 {max})")]
    ExtensionTooLarge { len: usize, max: usize },

    #[error("RTT 프로브 잘림: expected {expected} bytes, got {got}")]
    ProbeTruncated { expected: usize, got: usize },

    #[error("RTT 프로브 타임아웃: {elapsed:?} 경과")]
    ProbeTimeout { elapsed: Duration },

    #[error("RTT 샘플 부족: 전체 {total}개 중 필터 통과 {kept}개")]
    InsufficientSamples { total: usize, kept: usize },

    #[error("불완전한 전송: expected {expected} bytes, transferred {actual}")]
    TransferIncomplete { expected: u64, actual: u64 },

    #[error("IO 에러 ({op}): {source}")]
    Io {
        op: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("소스 파일 에러 ({}): {source}", path.display())]
    Source {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("지원하지 않는 전송 방식 {strategy}: {reason}")]
    UnsupportedStrategy {
        strategy: Strategy,
        reason: &'static str,
    },

    #[error("지원하지 않는 트랜스포트: {transport}")]
    UnsupportedTransport { transport: Transport },

    #[error("설정 에러: {0}")]
    InvalidConfig(String),

    #[error("메모리 할당 실패: {size} bytes")]
    OutOfMemory { size: usize },

    #[error("내부 에러: {0}")]
    Internal(String),
}

/// 에러 분류 (CLI 종료 코드 결정용)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorCategory {
    /// 메모리 부족
    Memory = 1,

    /// 잘못된 설정/옵션
    Config = 2,

    /// 로컬 파일 등 기타
    Misc = 3,

    /// 네트워크/프로토콜
    Network = 4,

    /// 프로그래밍 오류
    Internal = 5,
}

impl ErrorCategory {
    /// 프로세스 종료 코드
    pub fn exit_code(self) -> u8 {
        self as u8
    }
}

impl Error {
    /// 에러 분류
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::OutOfMemory { .. } => ErrorCategory::Memory,
            Error::InvalidConfig(_)
            | Error::ExtensionTooLarge { .. }
            | Error::UnsupportedStrategy { .. }
            | Error::UnsupportedTransport { .. } => ErrorCategory::Config,
            Error::Source { .. } => ErrorCategory::Misc,
            Error::Internal(_) => ErrorCategory::Internal,
            Error::HeaderTruncated { .. }
            | Error::HeaderCorrupt { .. }
            | Error::TooManyUnknownExtensions { .. }
            | Error::ProbeTruncated { .. }
            | Error::ProbeTimeout { .. }
            | Error::InsufficientSamples { .. }
            | Error::TransferIncomplete { .. }
            | Error::Io { .. } => ErrorCategory::Network,
        }
    }
}

/// `io::Result`에 작업 이름을 붙이는 헬퍼
pub trait IoContext<T> {
    fn op(self, op: &'static str) -> Result<T>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn op(self, op: &'static str) -> Result<T> {
        self.map_err(|source| Error::Io { op, source })
    }
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
