//! 송신자
//!
//! 한 연결에서의 순서:
//! 1. 고정 헤더 (선언 크기, 첫 확장 종류)
//! 2. RTT 프로브 또는 강제 RTT
//! 3. RTT_INFO 통지
//! 4. 벌크 데이터
//! 5. 데이터그램이면 빈 데이터그램으로 끝 표시

use tracing::{debug, info};

use crate::error::IoContext;
use crate::header::{NextHeader, NsHeader};
use crate::protocol::{announce_rtt, send_header};
use crate::rtt::{probe_rtt, RttEstimate};
use crate::source::Source;
use crate::stats::TransferStats;
use crate::transfer::{planned_size, transfer};
use crate::transport::Channel;
use crate::{Config, Result};

/// 헤더 교환 계획
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ExchangePlan {
    probe: bool,
    announce: bool,
}

impl ExchangePlan {
    fn new(config: &Config, reliable: bool) -> Self {
        let rtt = &config.rtt;
        let active = rtt.enabled && reliable;
        let probe = active && rtt.forced.is_none();
        Self {
            probe,
            announce: active && rtt.announce && (probe || rtt.forced.is_some()),
        }
    }

    /// 고정 헤더가 가리킬 첫 확장
    fn first(&self) -> NextHeader {
        if self.probe {
            NextHeader::RttProbe
        } else {
            self.after_probe()
        }
    }

    /// 마지막 프로브 다음
    fn after_probe(&self) -> NextHeader {
        if self.announce {
            NextHeader::RttInfo
        } else {
            NextHeader::Data
        }
    }
}

/// 송신자
pub struct Sender {
    /// 설정
    config: Config,
}

impl Sender {
    /// 새 송신자 생성
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// 소스 전체를 채널로 보낸다
    pub fn transmit<C: Channel + ?Sized>(
        &self,
        source: &mut Source,
        channel: &mut C,
    ) -> Result<TransferStats> {
        let strategy = self.config.strategy;
        let options = &self.config.transfer;
        // 헤더를 보낸 뒤에는 되돌릴 수 없으므로 먼저 확인
        self.config.validate()?;
        strategy.ensure_supported(source.kind())?;

        let mut stats = TransferStats::new();
        let reliable = channel.is_reliable_stream();

        if reliable {
            let plan = ExchangePlan::new(&self.config, reliable);
            let declared = planned_size(strategy, source.kind(), options).unwrap_or(0);

            let mut header = NsHeader::for_transfer(declared, plan.probe);
            header.next_header = plan.first();
            send_header(channel, &header)?;

            if plan.probe {
                probe_rtt(channel, &self.config.rtt, plan.after_probe(), &mut stats)?;
            } else if let Some(forced) = self.config.rtt.forced.filter(|_| self.config.rtt.enabled) {
                info!("강제 RTT 사용: {:?}", forced);
                stats.rtt = Some(RttEstimate::forced(forced));
            }

            if plan.announce {
                if let Some(estimate) = &stats.rtt {
                    announce_rtt(channel, estimate.rtt)?;
                }
            }
        } else {
            debug!("{}: 헤더 교환 없이 데이터 전송", channel.transport());
        }

        let sent = transfer(source, channel, strategy, options, &mut stats)?;
        channel.finish().op("transfer terminator")?;

        debug!("송신 완료: {} bytes", sent);
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RttProbeConfig, TransferOptions};
    use crate::receiver::Receiver;
    use crate::transfer::Strategy;
    use std::io::Write;
    use std::os::unix::net::UnixStream;
    use std::thread;
    use std::time::Duration;

    fn source_with(data: &[u8]) -> (tempfile::NamedTempFile, Source) {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(data).unwrap();
        let source = Source::open(tmp.path()).unwrap();
        (tmp, source)
    }

    fn config(rtt: RttProbeConfig, chunk_size: usize) -> Config {
        Config {
            strategy: Strategy::ReadWriteLoop,
            transfer: TransferOptions {
                chunk_size,
                ..TransferOptions::default()
            },
            rtt,
            ..Config::default()
        }
    }

    #[test]
    fn test_plan() {
        let mut cfg = Config::default();
        let plan = ExchangePlan::new(&cfg, true);
        assert_eq!(plan.first(), NextHeader::RttProbe);
        assert_eq!(plan.after_probe(), NextHeader::RttInfo);

        assert_eq!(ExchangePlan::new(&cfg, false).first(), NextHeader::Data);

        cfg.rtt.forced = Some(Duration::from_millis(7));
        let plan = ExchangePlan::new(&cfg, true);
        assert!(!plan.probe);
        assert_eq!(plan.first(), NextHeader::RttInfo);

        cfg.rtt.announce = false;
        assert_eq!(ExchangePlan::new(&cfg, true).first(), NextHeader::Data);

        assert_eq!(
            ExchangePlan::new(&Config::bulk(), true).first(),
            NextHeader::Data
        );
    }

    #[test]
    fn test_plain_transfer_end_to_end() {
        let data: Vec<u8> = (0..1024u32).map(|i| (i % 253) as u8).collect();
        let (_tmp, mut source) = source_with(&data);
        let (mut tx, mut rx) = UnixStream::pair().unwrap();

        let receiver = thread::spawn(move || {
            let mut sink: Vec<u8> = Vec::new();
            let outcome = Receiver::new(Config::default())
                .receive(&mut rx, &mut sink)
                .unwrap();
            (outcome, sink)
        });

        let sender = Sender::new(config(RttProbeConfig::disabled(), 256));
        let stats = sender.transmit(&mut source, &mut tx).unwrap();
        drop(tx);

        let (outcome, sink) = receiver.join().unwrap();
        assert_eq!(stats.total_tx_calls, 4);
        assert_eq!(stats.total_tx_bytes, 1024);
        assert_eq!(outcome.header.data_size, 1024);
        assert!(!outcome.header.probe_requested);
        assert_eq!(outcome.stats.total_rx_bytes, 1024);
        assert_eq!(sink, data);
        assert_eq!(outcome.crc32, crc32fast::hash(&data));
    }

    #[test]
    fn test_probe_then_transfer() {
        let data = vec![0x5Au8; 50_000];
        let (_tmp, mut source) = source_with(&data);
        let (mut tx, mut rx) = UnixStream::pair().unwrap();

        let receiver = thread::spawn(move || {
            let mut sink: Vec<u8> = Vec::new();
            let outcome = Receiver::new(Config::default())
                .receive(&mut rx, &mut sink)
                .unwrap();
            (outcome, sink)
        });

        let rtt = RttProbeConfig {
            iterations: 5,
            payload_size: 64,
            ..RttProbeConfig::default()
        };
        let stats = Sender::new(config(rtt, 0)).transmit(&mut source, &mut tx).unwrap();
        drop(tx);

        let (outcome, sink) = receiver.join().unwrap();
        assert_eq!(stats.probe_round_trips, 6);
        assert_eq!(stats.total_tx_bytes, 50_000);
        let estimate = stats.rtt.expect("rtt measured");
        assert_eq!(estimate.samples, 5);

        assert!(outcome.header.probe_requested);
        assert_eq!(outcome.header.probes_answered, 6);
        let peer_rtt = outcome.header.peer_rtt.expect("rtt announced");
        assert!(peer_rtt <= estimate.rtt);
        assert!(estimate.rtt - peer_rtt < Duration::from_micros(1));
        assert_eq!(sink, data);
    }

    #[test]
    fn test_forced_rtt_announced() {
        let data = b"forced rtt payload".to_vec();
        let (_tmp, mut source) = source_with(&data);
        let (mut tx, mut rx) = UnixStream::pair().unwrap();

        let receiver = thread::spawn(move || {
            let mut sink: Vec<u8> = Vec::new();
            let outcome = Receiver::new(Config::default())
                .receive(&mut rx, &mut sink)
                .unwrap();
            (outcome, sink)
        });

        let rtt = RttProbeConfig {
            forced: Some(Duration::from_millis(12)),
            ..RttProbeConfig::default()
        };
        let stats = Sender::new(config(rtt, 0)).transmit(&mut source, &mut tx).unwrap();
        drop(tx);

        let (outcome, sink) = receiver.join().unwrap();
        assert_eq!(stats.probe_round_trips, 0);
        assert!(stats.rtt.unwrap().forced);
        assert_eq!(outcome.header.probes_answered, 0);
        assert_eq!(outcome.header.peer_rtt, Some(Duration::from_millis(12)));
        assert_eq!(sink, data);
    }

    #[test]
    fn test_invalid_probe_config_sends_nothing() {
        let bad_configs = [
            RttProbeConfig {
                iterations: 0,
                ..RttProbeConfig::default()
            },
            RttProbeConfig {
                iterations: 101,
                ..RttProbeConfig::default()
            },
            RttProbeConfig {
                timeout: Duration::ZERO,
                ..RttProbeConfig::default()
            },
        ];

        for rtt in bad_configs {
            let (_tmp, mut source) = source_with(b"never sent");
            let (mut tx, mut rx) = UnixStream::pair().unwrap();

            let result = Sender::new(config(rtt, 0)).transmit(&mut source, &mut tx);
            drop(tx);

            assert!(matches!(result, Err(crate::Error::InvalidConfig(_))));
            let mut rest = Vec::new();
            std::io::Read::read_to_end(&mut rx, &mut rest).unwrap();
            assert!(rest.is_empty());
        }
    }

    #[test]
    fn test_unsupported_strategy_sends_nothing() {
        let mut source = Source::command("printf abc").unwrap();
        let (mut tx, mut rx) = UnixStream::pair().unwrap();
        let mut cfg = config(RttProbeConfig::disabled(), 0);
        cfg.strategy = Strategy::MemoryMappedWrite;

        let result = Sender::new(cfg).transmit(&mut source, &mut tx);
        drop(tx);

        assert!(matches!(result, Err(crate::Error::UnsupportedStrategy { .. })));
        let mut rest = Vec::new();
        std::io::Read::read_to_end(&mut rx, &mut rest).unwrap();
        assert!(rest.is_empty());
        source.finish().unwrap();
    }
}
