//! RTT 프로브
//!
//! 송신측은 고정 크기 프로브를 보내고 에코된 응답으로 왕복 시간을 잰다.
//! 한 번에 패킷 하나만 오가며(파이프라이닝 없음) 첫 왕복은 워밍업으로 버린다.
//!
//! 샘플 집합에서 평균/분산/표준편차를 구한 뒤
//! `평균 ± 편차 × 필터배수` 안의 샘플만으로 다시 평균을 내어 최종 RTT로 쓴다.

use std::io::{self, ErrorKind, Read, Write};
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use crate::config::{MismatchPolicy, RttProbeConfig};
use crate::error::IoContext;
use crate::header::{ExtensionPrefix, NextHeader, RttProbePacket, RttType};
use crate::io::{read_exact, write_all};
use crate::stats::TransferStats;
use crate::transport::Channel;
use crate::{Error, Result};

static SESSION_COUNTER: AtomicU16 = AtomicU16::new(0);

/// 프로세스 기반 16비트 프로브 식별자
fn probe_ident() -> u16 {
    (std::process::id() as u16) ^ SESSION_COUNTER.fetch_add(1, Ordering::Relaxed).rotate_left(8)
}

/// RTT 추정 결과
#[derive(Debug, Clone, PartialEq)]
pub struct RttEstimate {
    /// 필터링된 평균 RTT
    pub rtt: Duration,

    /// 필터 전 평균 (ms)
    pub mean_ms: f64,

    /// 필터 전 분산 (ms²)
    pub variance_ms2: f64,

    /// 필터 전 표준편차 (ms)
    pub deviation_ms: f64,

    /// 전체 샘플 수
    pub samples: usize,

    /// 필터를 통과한 샘플 수
    pub kept: usize,

    /// 측정 없이 강제 지정된 값인지
    pub forced: bool,
}

impl RttEstimate {
    /// 강제 지정 RTT
    pub fn forced(rtt: Duration) -> Self {
        let ms = rtt.as_secs_f64() * 1000.0;
        Self {
            rtt,
            mean_ms: ms,
            variance_ms2: 0.0,
            deviation_ms: 0.0,
            samples: 0,
            kept: 0,
            forced: true,
        }
    }

    /// 필터링된 RTT (ms)
    pub fn rtt_ms(&self) -> f64 {
        self.rtt.as_secs_f64() * 1000.0
    }
}

/// RTT 샘플 집합 (ms)
#[derive(Debug, Clone, Default)]
pub struct RttSamples {
    samples: Vec<f64>,
}

impl RttSamples {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, rtt_ms: f64) {
        self.samples.push(rtt_ms);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.samples
    }

    /// 산술 평균
    pub fn mean(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
    }

    /// 분산 (편차 제곱의 평균)
    pub fn variance(&self) -> Option<f64> {
        let mean = self.mean()?;
        let sum: f64 = self.samples.iter().map(|s| (s - mean).powi(2)).sum();
        Some(sum / self.samples.len() as f64)
    }

    /// 편차 필터를 적용한 추정치 계산
    ///
    /// 필터를 통과한 샘플이 없으면 `InsufficientSamples`.
    pub fn summarize(&self, filter: f64) -> Result<RttEstimate> {
        let (mean, variance) = match (self.mean(), self.variance()) {
            (Some(mean), Some(variance)) => (mean, variance),
            _ => {
                return Err(Error::InsufficientSamples { total: 0, kept: 0 });
            }
        };
        let deviation = variance.sqrt();
        let low = mean - deviation * filter;
        let high = mean + deviation * filter;

        let (sum, kept) = self
            .samples
            .iter()
            .filter(|&&s| s >= low && s <= high)
            .fold((0.0f64, 0usize), |(sum, n), &s| (sum + s, n + 1));

        if kept == 0 {
            return Err(Error::InsufficientSamples {
                total: self.samples.len(),
                kept,
            });
        }

        let filtered = sum / kept as f64;
        Ok(RttEstimate {
            rtt: Duration::from_secs_f64(filtered.max(0.0) / 1000.0),
            mean_ms: mean,
            variance_ms2: variance,
            deviation_ms: deviation,
            samples: self.samples.len(),
            kept,
            forced: false,
        })
    }
}

/// 프로브 세션 전체 시간 예산
struct Deadline {
    started: Instant,
    budget: Duration,
}

impl Deadline {
    fn new(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget,
        }
    }

    fn remaining(&self) -> Result<Duration> {
        let elapsed = self.started.elapsed();
        match self.budget.checked_sub(elapsed) {
            Some(rest) if !rest.is_zero() => Ok(rest),
            _ => Err(Error::ProbeTimeout { elapsed }),
        }
    }

    /// 남은 예산을 소켓 타임아웃으로 건다
    fn arm<C: Channel + ?Sized>(&self, channel: &C) -> Result<()> {
        let rest = self.remaining()?;
        channel.set_io_timeout(Some(rest)).op("set probe timeout")
    }

    /// 타임아웃으로 끝난 I/O는 ProbeTimeout으로 바꾼다
    fn classify(&self, err: io::Error, op: &'static str) -> Error {
        match err.kind() {
            ErrorKind::WouldBlock | ErrorKind::TimedOut => Error::ProbeTimeout {
                elapsed: self.started.elapsed(),
            },
            _ => Error::Io { op, source: err },
        }
    }
}

/// 수신 시각과 에코된 송신 시각의 차 (ms)
fn elapsed_ms(received_at: SystemTime, sent: Duration) -> f64 {
    let received = received_at.duration_since(UNIX_EPOCH).unwrap_or_default();
    (received.as_secs_f64() - sent.as_secs_f64()).max(0.0) * 1000.0
}

/// 송신측 RTT 측정
///
/// `iterations + 1`번 왕복하며 첫 왕복은 버린다. 마지막 프로브의
/// `next_header`는 `follow`로 설정되어 체인의 다음 확장(또는 데이터)을 가리킨다.
pub fn probe_rtt<C: Channel + ?Sized>(
    channel: &mut C,
    config: &RttProbeConfig,
    follow: NextHeader,
    stats: &mut TransferStats,
) -> Result<RttEstimate> {
    config.validate()?;

    let deadline = Deadline::new(config.timeout);
    let result = run_rounds(channel, config, follow, stats, &deadline);

    if let Err(e) = channel.set_io_timeout(None) {
        warn!("프로브 타임아웃 해제 실패: {}", e);
    }

    let samples = result?;
    let estimate = samples.summarize(config.deviation_filter as f64)?;

    info!(
        "RTT: {:.3}ms (mean {:.3}ms, deviation {:.3}ms, {}/{} samples)",
        estimate.rtt_ms(),
        estimate.mean_ms,
        estimate.deviation_ms,
        estimate.kept,
        estimate.samples
    );

    stats.rtt = Some(estimate.clone());
    Ok(estimate)
}

fn run_rounds<C: Channel + ?Sized>(
    channel: &mut C,
    config: &RttProbeConfig,
    follow: NextHeader,
    stats: &mut TransferStats,
    deadline: &Deadline,
) -> Result<RttSamples> {
    let ident = probe_ident();
    let mut packet = RttProbePacket::request(ident, config.payload_size)?;
    let wire_len = packet.wire_len();
    let mut reply_buf = vec![0u8; wire_len];
    let mut samples = RttSamples::with_capacity(config.iterations as usize);
    let rounds = config.iterations as u32 + 1;

    debug!(
        "RTT 프로브 시작: ident={:#06x}, {}회 + 워밍업, 패킷 {} bytes",
        ident, config.iterations, wire_len
    );

    for round in 0..rounds {
        packet.seq_no = round as u16;
        packet.next_header = if round + 1 == rounds {
            follow
        } else {
            NextHeader::RttProbe
        };
        packet.stamp(SystemTime::now());
        let request = packet.to_bytes()?;

        deadline.arm(channel)?;
        write_all(channel, &request).map_err(|e| deadline.classify(e, "rtt probe write"))?;

        deadline.arm(channel)?;
        let got =
            read_exact(channel, &mut reply_buf).map_err(|e| deadline.classify(e, "rtt probe read"))?;
        let received_at = SystemTime::now();

        if got != wire_len {
            return Err(Error::ProbeTruncated {
                expected: wire_len,
                got,
            });
        }
        stats.probe_round_trips += 1;

        let reply = RttProbePacket::decode(&reply_buf)?;
        if reply.probe_type != RttType::Reply {
            warn!("프로브 응답 타입 이상: {:?} (seq {})", reply.probe_type, round);
        }
        if reply.ident != ident {
            warn!(
                "프로브 식별자 불일치: expected {:#06x}, got {:#06x} (seq {})",
                ident, reply.ident, reply.seq_no
            );
            if config.mismatch == MismatchPolicy::Discard {
                continue;
            }
        }

        let rtt_ms = elapsed_ms(received_at, reply.timestamp());
        if round == 0 {
            debug!("워밍업 왕복 {:.3}ms (버림)", rtt_ms);
            continue;
        }
        debug!("프로브 seq={} rtt={:.3}ms", round, rtt_ms);
        samples.push(rtt_ms);
    }

    Ok(samples)
}

/// 수신측 프로브 응답
///
/// prefix는 이미 읽힌 상태. 나머지 페이로드를 읽어 응답으로 바꿔 되돌려 보낸다.
/// 반환값은 받은 요청이며, 그 `next_header`가 체인의 다음 종류다.
pub fn respond_to_probe<C: Read + Write + ?Sized>(
    channel: &mut C,
    prefix: ExtensionPrefix,
) -> Result<RttProbePacket> {
    let len = prefix.payload_len();
    let mut payload = vec![0u8; len];
    let got = read_exact(channel, &mut payload).op("rtt probe read")?;
    if got != len {
        return Err(Error::ProbeTruncated { expected: len, got });
    }

    let request = RttProbePacket::decode_payload(prefix, &payload)?;
    if request.probe_type != RttType::Request {
        warn!("요청이 아닌 프로브 수신: {:?}", request.probe_type);
    }

    let reply = request.clone().into_reply();
    write_all(channel, &reply.to_bytes()?).op("rtt probe reply write")?;

    debug!("프로브 응답: seq={}, {} bytes", request.seq_no, reply.wire_len());
    Ok(request)
}
