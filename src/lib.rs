//! # netsend
//!
//! 커널 전송 경로별 성능을 비교하는 파일 전송 및 네트워크 진단 도구
//!
//! ## 핵심 특징
//! - **헤더 체인**: 고정 헤더 + IPv6식 확장 헤더 체인
//! - **RTT 프로브**: 데이터 전송 전 왕복 시간 측정, 편차 필터로 이상치 제거
//! - **전송 방식 선택**: sendfile / splice / mmap / read-write 루프
//! - **자원 통계**: 호출 수, 바이트, CPU 시간, rusage, 사이클 카운터
//! - **멀티 스트림**: 독립 스트림 병렬 실행 후 통계 합산

pub mod config;
pub mod error;
pub mod header;
pub mod io;
pub mod multistream;
pub mod protocol;
pub mod receiver;
pub mod rtt;
pub mod sender;
pub mod source;
pub mod stats;
pub mod transfer;
pub mod transport;

pub use config::{Config, MemAdvice, MismatchPolicy, RttProbeConfig, TransferOptions};
pub use error::{Error, ErrorCategory, Result};
pub use header::{ExtensionPrefix, NextHeader, NsHeader, RttInfo, RttProbePacket};
pub use protocol::HeaderInfo;
pub use receiver::{ReceiveOutcome, Receiver};
pub use rtt::{RttEstimate, RttSamples};
pub use sender::Sender;
pub use source::{Source, SourceKind};
pub use stats::{StatsReport, TransferStats};
pub use transfer::{transfer, Strategy};
pub use transport::{Channel, DatagramChannel, Transport};

/// 프로토콜 버전 (정보용)
pub const PROTOCOL_VERSION: u16 = 1;

/// 매직 넘버 (헤더 식별용)
pub const MAGIC_NUMBER: u16 = 0x0067;

/// read/write 루프 기본 버퍼 크기 (바이트)
pub const DEFAULT_BUFFER_SIZE: usize = 8192; // 8KB

/// splice 한 번에 옮기는 최대 크기 (파이프 버퍼)
pub const SPLICE_MAX_CHUNK: usize = 65536; // 64KB

/// 허용하는 알 수 없는 확장 헤더 수
pub const MAX_UNKNOWN_EXTENSIONS: u32 = 8;
