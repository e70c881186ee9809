//! 전송 데이터 소스
//!
//! 일반 파일, 표준 입력(FIFO 포함), 외부 명령의 stdout 중 하나.
//! 전송 엔진은 fd와 `SourceKind`만 본다.

use std::fs::File;
use std::os::fd::{AsFd, OwnedFd};
use std::os::unix::fs::FileTypeExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};

use tracing::{debug, warn};

use crate::{Error, Result};

/// 소스 종류 (fstat 기준)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// 크기를 아는 일반 파일
    Regular { size: u64 },

    /// 파이프/FIFO
    Fifo,

    /// 소켓, 문자 장치 등
    Other,
}

impl SourceKind {
    /// 파일 메타데이터로 판별
    pub fn detect(file: &File) -> std::io::Result<Self> {
        let meta = file.metadata()?;
        let file_type = meta.file_type();
        Ok(if file_type.is_file() {
            SourceKind::Regular { size: meta.len() }
        } else if file_type.is_fifo() {
            SourceKind::Fifo
        } else {
            SourceKind::Other
        })
    }

    pub fn is_regular(&self) -> bool {
        matches!(self, SourceKind::Regular { .. })
    }

    /// 일반 파일 크기
    pub fn size(&self) -> Option<u64> {
        match self {
            SourceKind::Regular { size } => Some(*size),
            _ => None,
        }
    }
}

/// 명령 소스의 자식 프로세스
///
/// `wait` 없이 drop 되면 아직 살아 있는 경우 kill 후 회수한다.
#[derive(Debug)]
struct ChildProcess {
    child: Child,
    reaped: bool,
}

impl ChildProcess {
    fn new(child: Child) -> Self {
        Self {
            child,
            reaped: false,
        }
    }

    fn wait(&mut self) -> std::io::Result<ExitStatus> {
        let status = self.child.wait()?;
        self.reaped = true;
        Ok(status)
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        if self.reaped {
            return;
        }
        let pid = self.child.id();
        match self.child.try_wait() {
            Ok(Some(status)) => debug!("자식 프로세스 {} 회수: {}", pid, status),
            Ok(None) => {
                debug!("자식 프로세스 {} 종료시킴", pid);
                if let Err(e) = self.child.kill() {
                    warn!("자식 프로세스 {} kill 실패: {}", pid, e);
                }
                if let Err(e) = self.child.wait() {
                    warn!("자식 프로세스 {} 회수 실패: {}", pid, e);
                }
            }
            Err(e) => warn!("자식 프로세스 {} 상태 확인 실패: {}", pid, e),
        }
    }
}

/// 전송할 데이터 소스
#[derive(Debug)]
pub struct Source {
    // child보다 먼저 닫혀야 자식이 쓰기에서 풀려난다
    file: File,
    kind: SourceKind,
    path: PathBuf,
    child: Option<ChildProcess>,
}

impl Source {
    /// 파일 열기
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|source| Error::Source {
            path: path.clone(),
            source,
        })?;
        Self::from_file(file, path)
    }

    /// 표준 입력 (fd 복제)
    pub fn stdin() -> Result<Self> {
        let path = PathBuf::from("<stdin>");
        let fd = std::io::stdin()
            .as_fd()
            .try_clone_to_owned()
            .map_err(|source| Error::Source {
                path: path.clone(),
                source,
            })?;
        Self::from_file(File::from(fd), path)
    }

    /// `sh -c <command>`의 stdout
    pub fn command(command: &str) -> Result<Self> {
        let path = PathBuf::from(format!("<{}>", command));
        let spawned = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|source| Error::Source {
                path: path.clone(),
                source,
            })?;
        // 여기부터 에러로 빠져나가면 drop에서 회수
        let mut child = ChildProcess::new(spawned);

        let stdout = child
            .child
            .stdout
            .take()
            .ok_or_else(|| Error::Internal("자식 프로세스 stdout 없음".into()))?;
        let file = File::from(OwnedFd::from(stdout));
        debug!("명령 실행: {} (pid {})", command, child.child.id());

        let mut source = Self::from_file(file, path)?;
        source.child = Some(child);
        Ok(source)
    }

    /// 이미 열린 파일 감싸기
    pub fn from_file(file: File, path: PathBuf) -> Result<Self> {
        let kind = SourceKind::detect(&file).map_err(|source| Error::Source {
            path: path.clone(),
            source,
        })?;
        debug!("소스 {}: {:?}", path.display(), kind);
        Ok(Self {
            file,
            kind,
            path,
            child: None,
        })
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file(&self) -> &File {
        &self.file
    }

    pub fn file_mut(&mut self) -> &mut File {
        &mut self.file
    }

    /// 자식 프로세스 정리
    ///
    /// 비정상 종료 코드는 경고만 남긴다.
    pub fn finish(self) -> Result<()> {
        let Source {
            file, path, child, ..
        } = self;
        if let Some(mut child) = child {
            drop(file);
            let status = child.wait().map_err(|source| Error::Source {
                path: path.clone(),
                source,
            })?;
            if !status.success() {
                warn!("{} 종료 상태: {}", path.display(), status);
            }
        }
        Ok(())
    }
}

impl AsRawFd for Source {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    #[test]
    fn test_regular_file() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&[7u8; 300]).unwrap();

        let source = Source::open(tmp.path()).unwrap();

        assert_eq!(source.kind(), SourceKind::Regular { size: 300 });
        assert_eq!(source.kind().size(), Some(300));
        source.finish().unwrap();
    }

    #[test]
    fn test_missing_file() {
        match Source::open("/nonexistent/netsend-source") {
            Err(Error::Source { path, .. }) => {
                assert_eq!(path, PathBuf::from("/nonexistent/netsend-source"))
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_command_stdout_is_fifo() {
        let mut source = Source::command("printf hello").unwrap();
        assert_eq!(source.kind(), SourceKind::Fifo);

        let mut out = String::new();
        source.file_mut().read_to_string(&mut out).unwrap();
        assert_eq!(out, "hello");
        source.finish().unwrap();
    }

    /// pid가 아직 프로세스 테이블에 있는지 (좀비 포함)
    fn pid_exists(pid: u32) -> bool {
        // SAFETY: 시그널 0은 존재 확인만 한다
        unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
    }

    #[test]
    fn test_dropped_command_is_reaped() {
        let source = Source::command("sleep 30").unwrap();
        let pid = source.child.as_ref().unwrap().child.id();
        assert!(pid_exists(pid));

        let started = std::time::Instant::now();
        drop(source);

        assert!(started.elapsed() < std::time::Duration::from_secs(5));
        assert!(!pid_exists(pid));
    }

    #[test]
    fn test_exited_command_reaped_on_drop() {
        let mut source = Source::command("printf done").unwrap();
        let pid = source.child.as_ref().unwrap().child.id();
        let mut out = String::new();
        source.file_mut().read_to_string(&mut out).unwrap();
        assert_eq!(out, "done");

        drop(source);
        assert!(!pid_exists(pid));
    }
}
