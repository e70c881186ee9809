//! 벌크 전송 엔진
//!
//! 네 가지 전송 방식이 같은 계약을 따른다:
//! - 성공한 쓰기 호출마다 `total_tx_calls` 1 증가, 실제 바이트만큼 `total_tx_bytes` 증가
//! - 전송 제한(`chunk × limit_chunks`)은 넘지 않는다
//! - 첫 I/O 직전과 마지막 I/O 직후에 스냅샷

use std::fmt;
use std::io::Write;
use std::os::unix::io::AsRawFd;
use std::str::FromStr;

use tracing::{debug, info, warn};

use crate::config::TransferOptions;
use crate::error::IoContext;
use crate::io::{read_once, write_all};
use crate::source::{Source, SourceKind};
use crate::stats::TransferStats;
use crate::{Error, Result};

/// 전송 방식
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Strategy {
    /// sendfile: 커널이 파일을 소켓으로 바로 복사
    WholeFileZeroCopy,

    /// splice: 파일 → 파이프 → 소켓
    SplicePipeline,

    /// mmap 후 write
    MemoryMappedWrite,

    /// 버퍼 하나로 read/write 반복
    #[default]
    ReadWriteLoop,
}

impl Strategy {
    pub const ALL: [Strategy; 4] = [
        Strategy::WholeFileZeroCopy,
        Strategy::SplicePipeline,
        Strategy::MemoryMappedWrite,
        Strategy::ReadWriteLoop,
    ];

    /// 일반 파일 소스가 필요한지
    pub fn requires_regular_file(self) -> bool {
        matches!(self, Strategy::WholeFileZeroCopy | Strategy::MemoryMappedWrite)
    }

    /// 이 소스와 플랫폼에서 쓸 수 있는지 (헤더를 보내기 전에 확인)
    pub fn ensure_supported(self, kind: SourceKind) -> Result<()> {
        if cfg!(not(target_os = "linux"))
            && matches!(self, Strategy::WholeFileZeroCopy | Strategy::SplicePipeline)
        {
            return Err(Error::UnsupportedStrategy {
                strategy: self,
                reason: "리눅스 커널에서만 사용 가능",
            });
        }
        if self.requires_regular_file() && !kind.is_regular() {
            return Err(Error::UnsupportedStrategy {
                strategy: self,
                reason: "일반 파일 소스에서만 사용 가능",
            });
        }
        Ok(())
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Strategy::WholeFileZeroCopy => "sendfile",
            Strategy::SplicePipeline => "splice",
            Strategy::MemoryMappedWrite => "mmap",
            Strategy::ReadWriteLoop => "rw",
        };
        f.write_str(name)
    }
}

impl FromStr for Strategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sendfile" => Ok(Strategy::WholeFileZeroCopy),
            "splice" => Ok(Strategy::SplicePipeline),
            "mmap" => Ok(Strategy::MemoryMappedWrite),
            "rw" | "read" => Ok(Strategy::ReadWriteLoop),
            other => Err(Error::InvalidConfig(format!("알 수 없는 전송 방식: {}", other))),
        }
    }
}

/// 소스를 목적지로 전송, 전송한 바이트 수 반환
pub fn transfer<D: Write + AsRawFd + ?Sized>(
    source: &mut Source,
    dest: &mut D,
    strategy: Strategy,
    options: &TransferOptions,
    stats: &mut TransferStats,
) -> Result<u64> {
    let kind = source.kind();
    strategy.ensure_supported(kind)?;

    debug!(
        "전송 시작: {} ({:?}, chunk {}, limit {} chunks)",
        strategy, kind, options.chunk_size, options.limit_chunks
    );

    stats.mark_start();
    let result = match strategy {
        Strategy::WholeFileZeroCopy => send_whole_file(source, dest, options, stats),
        Strategy::SplicePipeline => splice_pipeline(source, dest, options, stats),
        Strategy::MemoryMappedWrite => memory_mapped_write(source, dest, options, stats),
        Strategy::ReadWriteLoop => read_write_loop(source, dest, options, stats),
    };
    stats.mark_end();

    let sent = result?;
    info!(
        "{} 전송 완료: {} bytes, {} calls, {:.3}s",
        strategy,
        sent,
        stats.total_tx_calls,
        stats.elapsed().as_secs_f64()
    );
    Ok(sent)
}

/// 일반 파일에서 실제로 보낼 바이트 수 (헤더 선언용)
///
/// 파이프 등 크기를 모르는 소스는 None.
pub fn planned_size(strategy: Strategy, kind: SourceKind, options: &TransferOptions) -> Option<u64> {
    let size = kind.size()?;
    let auto_chunk = match strategy {
        Strategy::ReadWriteLoop => options.buffer_size() as u64,
        _ => size,
    };
    Some(options.limit_bytes(auto_chunk).map_or(size, |limit| limit.min(size)))
}

/// 일반 파일 크기에 제한을 적용한 실제 전송량
fn bounded_size(size: u64, options: &TransferOptions) -> u64 {
    options.limit_bytes(size).map_or(size, |limit| limit.min(size))
}

#[cfg(target_os = "linux")]
fn send_whole_file<D: AsRawFd + ?Sized>(
    source: &mut Source,
    dest: &mut D,
    options: &TransferOptions,
    stats: &mut TransferStats,
) -> Result<u64> {
    let size = source.kind().size().unwrap_or(0);
    if size == 0 {
        warn!("{}: 빈 파일, 보낼 데이터 없음", source.path().display());
        return Ok(0);
    }

    let total = bounded_size(size, options);
    let chunk = match options.chunk_size {
        0 => total,
        n => n as u64,
    };
    let src_fd = source.as_raw_fd();
    let dst_fd = dest.as_raw_fd();
    let mut offset: libc::off_t = 0;

    while (offset as u64) < total {
        let want = chunk.min(total - offset as u64) as usize;
        // SAFETY: 두 fd는 호출 동안 살아 있고 offset은 지역 변수
        let ret = unsafe { libc::sendfile(dst_fd, src_fd, &mut offset, want) };
        if ret < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            return Err(Error::Io {
                op: "sendfile",
                source: err,
            });
        }
        if ret == 0 {
            return Err(Error::TransferIncomplete {
                expected: total,
                actual: offset as u64,
            });
        }
        stats.record_tx(1, ret as u64);
    }

    if offset as u64 != total {
        return Err(Error::TransferIncomplete {
            expected: total,
            actual: offset as u64,
        });
    }
    Ok(total)
}

#[cfg(target_os = "linux")]
fn splice_pipeline<D: AsRawFd + ?Sized>(
    source: &mut Source,
    dest: &mut D,
    options: &TransferOptions,
    stats: &mut TransferStats,
) -> Result<u64> {
    let kind = source.kind();
    let auto_chunk = kind.size().unwrap_or(crate::SPLICE_MAX_CHUNK as u64);
    let chunk = splice_chunk(options.chunk_size, auto_chunk);
    let limit = options.limit_bytes(auto_chunk);
    let src_fd = source.as_raw_fd();
    let dst_fd = dest.as_raw_fd();

    match kind {
        SourceKind::Fifo => {
            // 소스가 이미 파이프
            let mut moved = 0u64;
            loop {
                let want = match limit {
                    Some(l) if moved >= l => break,
                    Some(l) => chunk.min(l - moved),
                    None => chunk,
                };
                let n = splice::once(src_fd, None, dst_fd, want as usize, splice::MOVE_MORE)
                    .op("splice from pipe")?;
                if n == 0 {
                    break;
                }
                stats.record_tx(1, n as u64);
                moved += n as u64;
            }
            Ok(moved)
        }
        SourceKind::Regular { size } => {
            let total = limit.map_or(size, |l| l.min(size));
            let pipe = splice::Pipe::new().op("pipe2")?;
            let mut offset: libc::loff_t = 0;

            while (offset as u64) < total {
                let want = chunk.min(total - offset as u64) as usize;
                let filled = splice::once(
                    src_fd,
                    Some(&mut offset),
                    pipe.write_fd(),
                    want,
                    libc::SPLICE_F_MOVE,
                )
                .op("splice to pipe")?;
                if filled == 0 {
                    break;
                }
                pipe.drain_to(dst_fd, filled, stats)?;
            }

            if offset as u64 != total {
                return Err(Error::TransferIncomplete {
                    expected: total,
                    actual: offset as u64,
                });
            }
            Ok(total)
        }
        SourceKind::Other => {
            let pipe = splice::Pipe::new().op("pipe2")?;
            let mut moved = 0u64;
            loop {
                let want = match limit {
                    Some(l) if moved >= l => break,
                    Some(l) => chunk.min(l - moved),
                    None => chunk,
                };
                let filled =
                    splice::once(src_fd, None, pipe.write_fd(), want as usize, libc::SPLICE_F_MOVE)
                        .op("splice to pipe")?;
                if filled == 0 {
                    break;
                }
                pipe.drain_to(dst_fd, filled, stats)?;
                moved += filled as u64;
            }
            Ok(moved)
        }
    }
}

/// splice 한 번에 옮길 크기 (0이면 `auto_chunk`, 최대 `SPLICE_MAX_CHUNK`)
#[cfg(target_os = "linux")]
fn splice_chunk(requested: usize, auto_chunk: u64) -> u64 {
    use crate::SPLICE_MAX_CHUNK;

    let chunk = match requested {
        0 => auto_chunk.max(1),
        n => n as u64,
    };
    if chunk > SPLICE_MAX_CHUNK as u64 {
        debug!("splice 청크 {} → {} bytes로 제한", chunk, SPLICE_MAX_CHUNK);
        return SPLICE_MAX_CHUNK as u64;
    }
    chunk
}

#[cfg(target_os = "linux")]
mod splice {
    use std::io;
    use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
    use std::ptr;

    use crate::error::IoContext;
    use crate::stats::TransferStats;
    use crate::Result;

    pub const MOVE_MORE: libc::c_uint = libc::SPLICE_F_MOVE | libc::SPLICE_F_MORE;

    /// splice 한 번 (EINTR 재시도)
    pub fn once(
        fd_in: RawFd,
        off_in: Option<&mut libc::loff_t>,
        fd_out: RawFd,
        len: usize,
        flags: libc::c_uint,
    ) -> io::Result<usize> {
        let off_ptr = off_in.map_or(ptr::null_mut(), |o| o as *mut libc::loff_t);
        loop {
            // SAFETY: off_ptr는 null이거나 호출자의 살아 있는 loff_t
            let ret = unsafe { libc::splice(fd_in, off_ptr, fd_out, ptr::null_mut(), len, flags) };
            if ret >= 0 {
                return Ok(ret as usize);
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }

    /// 중간 파이프 (drop 시 양쪽 닫힘)
    pub struct Pipe {
        read: OwnedFd,
        write: OwnedFd,
    }

    impl Pipe {
        pub fn new() -> io::Result<Self> {
            let mut fds = [0 as libc::c_int; 2];
            // SAFETY: fds는 정수 두 개 크기
            if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) } == -1 {
                return Err(io::Error::last_os_error());
            }
            // SAFETY: pipe2가 방금 돌려준 fd, 소유권은 여기서만 가진다
            let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
            Ok(Self { read, write })
        }

        pub fn write_fd(&self) -> RawFd {
            self.write.as_raw_fd()
        }

        /// 파이프에 든 `len` 바이트를 모두 목적지로 보낸다
        pub fn drain_to(&self, dst_fd: RawFd, mut len: usize, stats: &mut TransferStats) -> Result<()> {
            while len > 0 {
                let n = once(self.read.as_raw_fd(), None, dst_fd, len, MOVE_MORE)
                    .op("splice from pipe")?;
                if n == 0 {
                    return Err(crate::Error::Io {
                        op: "splice from pipe",
                        source: io::Error::from(io::ErrorKind::WriteZero),
                    });
                }
                stats.record_tx(1, n as u64);
                len -= n;
            }
            Ok(())
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn send_whole_file<D: AsRawFd + ?Sized>(
    _source: &mut Source,
    _dest: &mut D,
    _options: &TransferOptions,
    _stats: &mut TransferStats,
) -> Result<u64> {
    Err(Error::UnsupportedStrategy {
        strategy: Strategy::WholeFileZeroCopy,
        reason: "이 플랫폼에는 sendfile이 없음",
    })
}

#[cfg(not(target_os = "linux"))]
fn splice_pipeline<D: AsRawFd + ?Sized>(
    _source: &mut Source,
    _dest: &mut D,
    _options: &TransferOptions,
    _stats: &mut TransferStats,
) -> Result<u64> {
    Err(Error::UnsupportedStrategy {
        strategy: Strategy::SplicePipeline,
        reason: "이 플랫폼에는 splice가 없음",
    })
}

/// 파일 전체를 매핑해 청크 단위로 쓴다 (매핑은 drop 시 해제)
fn memory_mapped_write<D: Write + ?Sized>(
    source: &mut Source,
    dest: &mut D,
    options: &TransferOptions,
    stats: &mut TransferStats,
) -> Result<u64> {
    if source.kind().size().unwrap_or(0) == 0 {
        debug!("빈 파일, 매핑 생략");
        return Ok(0);
    }

    // SAFETY: 전송 중에 다른 프로세스가 파일을 줄이면 SIGBUS, 읽기 전용 매핑
    let map = unsafe { memmap2::Mmap::map(source.file()) }.op("mmap")?;

    if let Some(advice) = options.advice {
        // SAFETY: 매핑 범위 그대로
        let ret = unsafe {
            libc::posix_madvise(
                map.as_ptr() as *mut libc::c_void,
                map.len(),
                advice.madvise_flag(),
            )
        };
        if ret != 0 {
            warn!("posix_madvise({:?}) 실패: {}", advice, std::io::Error::from_raw_os_error(ret));
        }
    }

    let total = bounded_size(map.len() as u64, options) as usize;
    let chunk = match options.chunk_size {
        0 => total,
        n => n,
    };

    let mut written = 0usize;
    while written < total {
        let end = (written + chunk).min(total);
        let report = write_all(dest, &map[written..end]).op("mmap write")?;
        stats.record_tx(report.calls, report.bytes as u64);
        written = end;
    }
    Ok(written as u64)
}

/// 재사용 버퍼 하나로 read/write 반복
fn read_write_loop<D: Write + ?Sized>(
    source: &mut Source,
    dest: &mut D,
    options: &TransferOptions,
    stats: &mut TransferStats,
) -> Result<u64> {
    let buf_size = options.buffer_size();
    let mut buf = Vec::new();
    buf.try_reserve_exact(buf_size)
        .map_err(|_| Error::OutOfMemory { size: buf_size })?;
    buf.resize(buf_size, 0);

    if let Some(advice) = options.advice {
        apply_fadvise(source, advice);
    }

    let limit = options.limit_bytes(buf_size as u64);
    let mut total = 0u64;
    loop {
        let want = match limit {
            Some(l) if total >= l => break,
            Some(l) => (l - total).min(buf_size as u64) as usize,
            None => buf_size,
        };
        let n = read_once(source.file_mut(), &mut buf[..want]).op("read")?;
        if n == 0 {
            break;
        }
        let report = write_all(dest, &buf[..n]).op("write")?;
        stats.record_tx(report.calls, report.bytes as u64);
        total += n as u64;
    }
    Ok(total)
}

#[cfg(target_os = "linux")]
fn apply_fadvise(source: &Source, advice: crate::config::MemAdvice) {
    // SAFETY: 파일 전체 범위(0, 0)에 대한 힌트
    let ret = unsafe { libc::posix_fadvise(source.as_raw_fd(), 0, 0, advice.fadvise_flag()) };
    if ret != 0 {
        warn!(
            "posix_fadvise({:?}) 실패: {}",
            advice,
            std::io::Error::from_raw_os_error(ret)
        );
    }
}

#[cfg(not(target_os = "linux"))]
fn apply_fadvise(_source: &Source, advice: crate::config::MemAdvice) {
    debug!("posix_fadvise 미지원, {:?} 무시", advice);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemAdvice;
    use crate::io::testutil::TrickleWriter;
    use std::io::{Read, Seek, SeekFrom};
    use tempfile::NamedTempFile;

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    fn source_with(data: &[u8]) -> (NamedTempFile, Source) {
        let mut tmp = NamedTempFile::new().unwrap();
        tmp.write_all(data).unwrap();
        tmp.flush().unwrap();
        let source = Source::open(tmp.path()).unwrap();
        (tmp, source)
    }

    fn run(strategy: Strategy, data: &[u8], options: TransferOptions) -> (Vec<u8>, TransferStats, u64) {
        let (_tmp, mut source) = source_with(data);
        let mut dest = tempfile::tempfile().unwrap();
        let mut stats = TransferStats::new();

        let sent = transfer(&mut source, &mut dest, strategy, &options, &mut stats)
            .unwrap_or_else(|e| panic!("{} failed: {}", strategy, e));

        dest.seek(SeekFrom::Start(0)).unwrap();
        let mut out = Vec::new();
        dest.read_to_end(&mut out).unwrap();
        (out, stats, sent)
    }

    #[test]
    fn test_strategy_names() {
        for strategy in Strategy::ALL {
            assert_eq!(strategy.to_string().parse::<Strategy>().unwrap(), strategy);
        }
        assert!("zerocopy".parse::<Strategy>().is_err());
        assert_eq!(Strategy::default(), Strategy::ReadWriteLoop);
    }

    /// 청크 하나에 쓰기 한 번일 때의 호출 수
    ///
    /// 파일 목적지라면 splice를 뺀 전략은 정확히 이 값이다. splice는 파이프
    /// 용량에 따라 더 잘게 나뉠 수 있어 하한으로만 쓴다.
    fn calls_per_chunk(strategy: Strategy, sent: u64, chunk: usize) -> u64 {
        if sent == 0 {
            return 0;
        }
        let per_call = match (strategy, chunk) {
            (Strategy::ReadWriteLoop, 0) => crate::DEFAULT_BUFFER_SIZE as u64,
            (_, 0) => sent,
            (_, n) => n as u64,
        };
        (sent + per_call - 1) / per_call
    }

    fn assert_calls(strategy: Strategy, stats: &TransferStats, sent: u64, chunk: usize, case: &str) {
        let calls = calls_per_chunk(strategy, sent, chunk);
        if strategy == Strategy::SplicePipeline {
            assert!(stats.total_tx_calls >= calls, "{}: {} calls", case, stats.total_tx_calls);
        } else {
            assert_eq!(stats.total_tx_calls, calls, "{}", case);
        }
    }

    #[test]
    fn test_all_strategies_byte_identical() {
        for strategy in Strategy::ALL {
            for size in [0usize, 1, 3333, 10_100] {
                for chunk in [0, 1, (size + 1) / 3, size, size + 100] {
                    let data = pattern(size);
                    let options = TransferOptions {
                        chunk_size: chunk,
                        ..TransferOptions::default()
                    };

                    let (out, stats, sent) = run(strategy, &data, options);
                    let case = format!("{} size {} chunk {}", strategy, size, chunk);

                    assert_eq!(sent, size as u64, "{}", case);
                    assert_eq!(out, data, "{}", case);
                    assert_eq!(stats.total_tx_bytes, size as u64, "{}", case);
                    assert!(stats.start.is_some() && stats.end.is_some());
                    assert_calls(strategy, &stats, sent, chunk, &case);
                }
            }
        }
    }

    #[test]
    fn test_limited_grid() {
        let size = 10_100usize;
        let data = pattern(size);
        for strategy in Strategy::ALL {
            for chunk in [1, size / 3, size, size + 100] {
                let options = TransferOptions {
                    chunk_size: chunk,
                    limit_chunks: 2,
                    advice: None,
                };
                let expected = (chunk * 2).min(size);

                let (out, stats, sent) = run(strategy, &data, options);
                let case = format!("{} chunk {}", strategy, chunk);

                assert_eq!(sent, expected as u64, "{}", case);
                assert_eq!(out, &data[..expected], "{}", case);
                assert_eq!(stats.total_tx_bytes, expected as u64, "{}", case);
                assert_calls(strategy, &stats, sent, chunk, &case);
            }
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_splice_chunk_clamped() {
        assert_eq!(splice_chunk(0, 10_000), 10_000);
        assert_eq!(splice_chunk(0, 0), 1);
        assert_eq!(splice_chunk(4096, 10_000), 4096);
        assert_eq!(splice_chunk(100_000, 10_000), crate::SPLICE_MAX_CHUNK as u64);
        assert_eq!(splice_chunk(0, 1 << 20), crate::SPLICE_MAX_CHUNK as u64);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_splice_large_chunk_on_large_file() {
        let data = pattern(200_000);

        let options = TransferOptions {
            chunk_size: 100_000,
            ..TransferOptions::default()
        };
        let (out, stats, sent) = run(Strategy::SplicePipeline, &data, options);
        assert_eq!(sent, 200_000);
        assert_eq!(out, data);
        assert_eq!(stats.total_tx_bytes, 200_000);
        assert!(stats.total_tx_calls >= 4);

        // 제한은 요청한 청크 기준
        let options = TransferOptions {
            chunk_size: 100_000,
            limit_chunks: 1,
            advice: None,
        };
        let (out, stats, sent) = run(Strategy::SplicePipeline, &data, options);
        assert_eq!(sent, 100_000);
        assert_eq!(out, &data[..100_000]);
        assert!(stats.total_tx_calls >= 2);
    }

    #[test]
    fn test_limit_applies_to_every_strategy() {
        let data = pattern(10_000);
        for strategy in Strategy::ALL {
            let options = TransferOptions {
                chunk_size: 1000,
                limit_chunks: 3,
                advice: None,
            };

            let (out, stats, sent) = run(strategy, &data, options);

            assert_eq!(sent, 3000, "{}", strategy);
            assert_eq!(out, &data[..3000]);
            assert_eq!(stats.total_tx_bytes, 3000);
        }

        let small = pattern(10);
        for strategy in Strategy::ALL {
            let options = TransferOptions {
                chunk_size: 1000,
                limit_chunks: 3,
                advice: None,
            };
            let (out, _, sent) = run(strategy, &small, options);
            assert_eq!(sent, 10);
            assert_eq!(out, small);
        }
    }

    #[test]
    fn test_planned_size() {
        let kind = SourceKind::Regular { size: 100_000 };
        let auto = TransferOptions {
            limit_chunks: 2,
            ..TransferOptions::default()
        };

        assert_eq!(planned_size(Strategy::ReadWriteLoop, kind, &auto), Some(16_384));
        assert_eq!(planned_size(Strategy::WholeFileZeroCopy, kind, &auto), Some(100_000));
        assert_eq!(
            planned_size(Strategy::MemoryMappedWrite, kind, &TransferOptions::default()),
            Some(100_000)
        );
        assert_eq!(planned_size(Strategy::SplicePipeline, SourceKind::Fifo, &auto), None);
    }

    #[test]
    fn test_read_write_counts_calls() {
        let data = pattern(1024);
        let options = TransferOptions {
            chunk_size: 256,
            ..TransferOptions::default()
        };

        let (out, stats, _) = run(Strategy::ReadWriteLoop, &data, options);

        assert_eq!(out, data);
        assert_eq!(stats.total_tx_calls, 4);
        assert_eq!(stats.total_tx_bytes, 1024);
    }

    #[test]
    fn test_read_write_partial_writes() {
        let data = pattern(600);
        let (_tmp, mut source) = source_with(&data);
        let mut writer = TrickleWriter {
            interrupt_on: vec![2, 50],
            ..Default::default()
        };
        let mut stats = TransferStats::new();
        let options = TransferOptions {
            chunk_size: 128,
            ..TransferOptions::default()
        };

        let sent = read_write_loop(&mut source, &mut writer, &options, &mut stats).unwrap();

        assert_eq!(sent, 600);
        assert_eq!(writer.data, data);
        assert_eq!(stats.total_tx_calls, 600);
        assert_eq!(stats.total_tx_calls, writer.calls);
    }

    #[test]
    fn test_mmap_partial_writes() {
        let data = pattern(300);
        let (_tmp, mut source) = source_with(&data);
        let mut writer = TrickleWriter::default();
        let mut stats = TransferStats::new();
        let options = TransferOptions {
            advice: Some(MemAdvice::Sequential),
            ..TransferOptions::default()
        };

        memory_mapped_write(&mut source, &mut writer, &options, &mut stats).unwrap();

        assert_eq!(writer.data, data);
        assert_eq!(stats.total_tx_calls, 300);
    }

    #[test]
    fn test_advice_does_not_change_bytes() {
        let data = pattern(5000);
        for advice in [MemAdvice::Sequential, MemAdvice::NoReuse, MemAdvice::DontNeed] {
            for strategy in [Strategy::MemoryMappedWrite, Strategy::ReadWriteLoop] {
                let options = TransferOptions {
                    chunk_size: 1024,
                    limit_chunks: 0,
                    advice: Some(advice),
                };
                let (out, _, _) = run(strategy, &data, options);
                assert_eq!(out, data);
            }
        }
    }

    #[test]
    fn test_regular_file_required() {
        for strategy in [Strategy::WholeFileZeroCopy, Strategy::MemoryMappedWrite] {
            let mut source = Source::command("printf abc").unwrap();
            let mut dest = tempfile::tempfile().unwrap();

            let result = transfer(
                &mut source,
                &mut dest,
                strategy,
                &TransferOptions::default(),
                &mut TransferStats::new(),
            );

            assert!(matches!(result, Err(Error::UnsupportedStrategy { .. })));
            source.finish().unwrap();
        }
    }

    #[test]
    fn test_pipe_sources() {
        let expected: Vec<u8> = b"abc\n".iter().copied().cycle().take(20_000).collect();

        for strategy in [Strategy::SplicePipeline, Strategy::ReadWriteLoop] {
            let mut source = Source::command("yes abc | head -c 20000").unwrap();
            let mut dest = tempfile::tempfile().unwrap();
            let mut stats = TransferStats::new();

            let sent = transfer(
                &mut source,
                &mut dest,
                strategy,
                &TransferOptions::default(),
                &mut stats,
            )
            .unwrap();
            source.finish().unwrap();

            dest.seek(SeekFrom::Start(0)).unwrap();
            let mut out = Vec::new();
            dest.read_to_end(&mut out).unwrap();
            assert_eq!(sent, 20_000, "{}", strategy);
            assert_eq!(out, expected);
        }
    }

    #[test]
    fn test_pipe_source_with_limit() {
        let mut source = Source::command("yes abc | head -c 20000").unwrap();
        let mut dest = tempfile::tempfile().unwrap();
        let options = TransferOptions {
            chunk_size: 1000,
            limit_chunks: 2,
            advice: None,
        };

        let sent = transfer(
            &mut source,
            &mut dest,
            Strategy::SplicePipeline,
            &options,
            &mut TransferStats::new(),
        )
        .unwrap();
        source.finish().unwrap();

        assert_eq!(sent, 2000);
        assert_eq!(dest.metadata().unwrap().len(), 2000);
    }
}
