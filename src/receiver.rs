//! 수신자
//!
//! 헤더 교환(프로브 응답 포함) 후 받은 바이트를 그대로 sink에 쓴다.
//! 받은 데이터의 CRC-32를 함께 계산한다.

use std::io::Write;

use tracing::{debug, info, warn};

use crate::error::IoContext;
use crate::io::{read_once, write_all};
use crate::protocol::{receive_header, HeaderInfo};
use crate::stats::TransferStats;
use crate::transport::Channel;
use crate::{Config, Error, Result};

/// 데이터그램 수신 버퍼 (최대 UDP 페이로드를 담을 수 있는 크기)
pub const DATAGRAM_BUFFER_SIZE: usize = 65536;

/// 수신 결과
#[derive(Debug, Clone)]
pub struct ReceiveOutcome {
    /// 헤더 교환 결과
    pub header: HeaderInfo,

    /// 수신 통계
    pub stats: TransferStats,

    /// 받은 데이터의 CRC-32
    pub crc32: u32,
}

/// 수신자
pub struct Receiver {
    /// 설정
    config: Config,
}

impl Receiver {
    /// 새 수신자 생성
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// 한 전송을 끝까지 받는다
    pub fn receive<C, W>(&self, channel: &mut C, sink: &mut W) -> Result<ReceiveOutcome>
    where
        C: Channel + ?Sized,
        W: Write + ?Sized,
    {
        let reliable = channel.is_reliable_stream();
        let header = receive_header(channel, reliable)?;
        let mut stats = TransferStats::new();
        let mut hasher = crc32fast::Hasher::new();

        if header.data_follows {
            let buf_size = if reliable {
                self.config.transfer.buffer_size()
            } else {
                DATAGRAM_BUFFER_SIZE
            };
            let mut buf = Vec::new();
            buf.try_reserve_exact(buf_size)
                .map_err(|_| Error::OutOfMemory { size: buf_size })?;
            buf.resize(buf_size, 0);

            stats.mark_start();
            let result = copy_loop(channel, sink, &mut buf, &mut hasher, &mut stats);
            stats.mark_end();
            result?;
        }

        let received = stats.total_rx_bytes;
        let declared = header.data_size as u64;
        if declared > 0 {
            if received < declared {
                return Err(Error::TransferIncomplete {
                    expected: declared,
                    actual: received,
                });
            }
            if received > declared {
                warn!("선언보다 많이 받음: declared {}, received {}", declared, received);
            }
        }

        let crc32 = hasher.finalize();
        info!(
            "수신 완료: {} bytes, {} calls, crc32 {:08x}",
            received, stats.total_rx_calls, crc32
        );
        Ok(ReceiveOutcome {
            header,
            stats,
            crc32,
        })
    }
}

/// EOF(데이터그램이면 빈 데이터그램)까지 복사
fn copy_loop<C, W>(
    channel: &mut C,
    sink: &mut W,
    buf: &mut [u8],
    hasher: &mut crc32fast::Hasher,
    stats: &mut TransferStats,
) -> Result<()>
where
    C: Channel + ?Sized,
    W: Write + ?Sized,
{
    loop {
        let n = read_once(channel, buf).op("receive")?;
        if n == 0 {
            debug!("전송 끝");
            return Ok(());
        }
        stats.record_rx(1, n as u64);
        hasher.update(&buf[..n]);
        write_all(sink, &buf[..n]).op("sink write")?;
    }
}
