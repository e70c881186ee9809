//! 블로킹 I/O 기본 연산
//!
//! 모든 바이트 스트림 읽기/쓰기는 같은 규칙을 따른다:
//! - `Interrupted`는 즉시 재시도
//! - 그 외 에러는 호출자에게 전달
//! - 부분 쓰기는 남은 부분을 끝까지 다시 쓴다

use std::io::{self, ErrorKind, Read, Write};

/// `write_all` 결과
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteReport {
    /// 쓴 바이트 수
    pub bytes: usize,

    /// 성공한 write 호출 수 (부분 쓰기도 1회)
    pub calls: u64,
}

/// 정확히 `buf.len()` 바이트를 읽는다
///
/// 상대가 먼저 닫으면 그때까지 읽은 바이트 수를 돌려준다.
/// 호출자는 반환값을 `buf.len()`과 비교해 잘림을 판단해야 한다.
pub fn read_exact<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match reader.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}

/// 한 번의 read (Interrupted만 재시도)
pub fn read_once<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match reader.read(buf) {
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

/// 버퍼 전체를 쓸 때까지 반복한다
pub fn write_all<W: Write + ?Sized>(writer: &mut W, buf: &[u8]) -> io::Result<WriteReport> {
    let mut report = WriteReport::default();
    while report.bytes < buf.len() {
        match writer.write(&buf[report.bytes..]) {
            Ok(0) => {
                return Err(io::Error::new(
                    ErrorKind::WriteZero,
                    format!("{} of {} bytes written", report.bytes, buf.len()),
                ));
            }
            Ok(n) => {
                report.calls += 1;
                report.bytes += n;
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(report)
}

/// `len` 바이트를 읽어서 버린다, 실제로 버린 바이트 수 반환
pub fn drain<R: Read + ?Sized>(reader: &mut R, len: usize) -> io::Result<usize> {
    let mut scratch = [0u8; 512];
    let mut drained = 0;
    while drained < len {
        let want = (len - drained).min(scratch.len());
        let n = read_exact(reader, &mut scratch[..want])?;
        drained += n;
        if n < want {
            break;
        }
    }
    Ok(drained)
}

#[cfg(test)]
pub(crate) mod testutil {
    use std::io::{self, Cursor, ErrorKind, Read, Write};

    /// 한 번에 1바이트만 받아들이는 writer
    #[derive(Default)]
    pub struct TrickleWriter {
        pub data: Vec<u8>,
        pub calls: u64,
        /// 이 호출 번호들에서 `Interrupted`를 돌려준다
        pub interrupt_on: Vec<u64>,
        pub attempts: u64,
    }

    impl Write for TrickleWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.attempts += 1;
            if self.interrupt_on.contains(&self.attempts) {
                return Err(io::Error::from(ErrorKind::Interrupted));
            }
            if buf.is_empty() {
                return Ok(0);
            }
            self.calls += 1;
            self.data.push(buf[0]);
            Ok(1)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// 미리 정해진 입력을 읽고 쓰기를 기록하는 양방향 채널
    pub struct ScriptedChannel {
        pub input: Cursor<Vec<u8>>,
        pub output: Vec<u8>,
    }

    impl ScriptedChannel {
        pub fn new(input: Vec<u8>) -> Self {
            Self {
                input: Cursor::new(input),
                output: Vec::new(),
            }
        }

        /// 아직 읽지 않은 입력 바이트 수
        pub fn remaining(&self) -> usize {
            self.input.get_ref().len() - self.input.position() as usize
        }
    }

    impl Read for ScriptedChannel {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for ScriptedChannel {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.output.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }
}
