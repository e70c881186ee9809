//! 트랜스포트 채널
//!
//! 코어(헤더 교환, RTT 프로브, 전송 엔진)는 `Channel`만 본다.
//! 트랜스포트 종류는 연결 시점에 한 번 정해지고 그 뒤로는 불투명하다.

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs, UdpSocket};
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::{UnixListener, UnixStream};
use std::str::FromStr;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, info, warn};

use crate::error::IoContext;
use crate::{Error, Result};

/// MSS를 알 수 없을 때 쓰는 세그먼트 크기
pub const FALLBACK_SEGMENT_SIZE: usize = 1500;

/// IPPROTO_UDPLITE
const UDPLITE_PROTOCOL: i32 = 136;

/// 트랜스포트 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    Tcp,
    Udp,
    UdpLite,
    Unix,
    Sctp,
    Dccp,
    Tipc,
}

impl Transport {
    /// 신뢰성 있는 바이트 스트림인지 (헤더 교환은 이 경우에만)
    pub fn is_reliable_stream(self) -> bool {
        matches!(
            self,
            Transport::Tcp | Transport::Unix | Transport::Sctp | Transport::Tipc
        )
    }

    /// 이 빌드에서 연결 가능한지
    pub fn is_supported(self) -> bool {
        matches!(
            self,
            Transport::Tcp | Transport::Udp | Transport::UdpLite | Transport::Unix
        )
    }
}

impl Default for Transport {
    fn default() -> Self {
        Transport::Tcp
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Transport::Tcp => "tcp",
            Transport::Udp => "udp",
            Transport::UdpLite => "udplite",
            Transport::Unix => "unix",
            Transport::Sctp => "sctp",
            Transport::Dccp => "dccp",
            Transport::Tipc => "tipc",
        };
        f.write_str(name)
    }
}

impl FromStr for Transport {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Transport::Tcp),
            "udp" => Ok(Transport::Udp),
            "udplite" | "udp-lite" => Ok(Transport::UdpLite),
            "unix" => Ok(Transport::Unix),
            "sctp" => Ok(Transport::Sctp),
            "dccp" => Ok(Transport::Dccp),
            "tipc" => Ok(Transport::Tipc),
            other => Err(Error::InvalidConfig(format!("알 수 없는 트랜스포트: {}", other))),
        }
    }
}

/// 연결된 양방향 채널
pub trait Channel: Read + Write + AsRawFd {
    fn transport(&self) -> Transport;

    fn is_reliable_stream(&self) -> bool {
        self.transport().is_reliable_stream()
    }

    /// 읽기/쓰기 타임아웃 설정 (None이면 해제)
    fn set_io_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;

    /// 한 세그먼트 크기 추정 (통계/로그용)
    fn segment_hint(&self) -> usize {
        FALLBACK_SEGMENT_SIZE
    }

    /// 송신 끝 표시 (스트림은 닫기만 하면 되므로 기본은 아무것도 안 함)
    fn finish(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Channel for TcpStream {
    fn transport(&self) -> Transport {
        Transport::Tcp
    }

    fn set_io_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.set_read_timeout(timeout)?;
        self.set_write_timeout(timeout)
    }

    fn segment_hint(&self) -> usize {
        match tcp_max_segment(self.as_raw_fd()) {
            Ok(mss) => mss,
            Err(e) => {
                warn!("MSS 확인 실패 ({}), {} bytes로 대체", e, FALLBACK_SEGMENT_SIZE);
                FALLBACK_SEGMENT_SIZE
            }
        }
    }
}

impl Channel for UnixStream {
    fn transport(&self) -> Transport {
        Transport::Unix
    }

    fn set_io_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.set_read_timeout(timeout)?;
        self.set_write_timeout(timeout)
    }
}

/// TCP_MAXSEG 조회
fn tcp_max_segment(fd: RawFd) -> io::Result<usize> {
    let mut mss: libc::c_int = 0;
    let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
    // SAFETY: mss/len은 유효한 지역 변수
    let ret = unsafe {
        libc::getsockopt(
            fd,
            libc::IPPROTO_TCP,
            libc::TCP_MAXSEG,
            &mut mss as *mut _ as *mut libc::c_void,
            &mut len,
        )
    };
    if ret == -1 {
        return Err(io::Error::last_os_error());
    }
    if mss <= 0 {
        return Err(io::Error::new(io::ErrorKind::Other, format!("mss {}", mss)));
    }
    Ok(mss as usize)
}

/// 연결된 데이터그램 소켓 (UDP, UDP-Lite)
///
/// 데이터그램에는 EOF가 없으므로 빈 데이터그램 하나가 전송 끝을 뜻한다.
#[derive(Debug)]
pub struct DatagramChannel {
    socket: UdpSocket,
    transport: Transport,
}

impl DatagramChannel {
    pub fn new(socket: UdpSocket) -> Self {
        Self::with_transport(socket, Transport::Udp)
    }

    pub fn with_transport(socket: UdpSocket, transport: Transport) -> Self {
        Self { socket, transport }
    }

    pub fn socket(&self) -> &UdpSocket {
        &self.socket
    }
}

impl Read for DatagramChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.socket.recv(buf)
    }
}

impl Write for DatagramChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.socket.send(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl AsRawFd for DatagramChannel {
    fn as_raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }
}

impl Channel for DatagramChannel {
    fn transport(&self) -> Transport {
        self.transport
    }

    fn set_io_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.socket.set_read_timeout(timeout)?;
        self.socket.set_write_timeout(timeout)
    }

    /// 빈 데이터그램
    fn finish(&mut self) -> io::Result<()> {
        self.socket.send(&[]).map(|_| ())
    }
}

/// `host:port`의 첫 주소
fn resolve(target: &str) -> Result<SocketAddr> {
    target
        .to_socket_addrs()
        .op("resolve")?
        .next()
        .ok_or_else(|| Error::InvalidConfig(format!("주소를 찾을 수 없음: {}", target)))
}

/// UDP-Lite 소켓 생성 (체크섬 범위는 커널 기본값, 전체)
fn udplite_socket(addr: SocketAddr) -> Result<Socket> {
    Socket::new(
        Domain::for_address(addr),
        Type::DGRAM,
        Some(Protocol::from(UDPLITE_PROTOCOL)),
    )
    .map_err(|source| match source.raw_os_error() {
        Some(libc::EPROTONOSUPPORT) | Some(libc::EAFNOSUPPORT) => {
            warn!("커널이 UDP-Lite를 지원하지 않음: {}", source);
            Error::UnsupportedTransport {
                transport: Transport::UdpLite,
            }
        }
        _ => Error::Io {
            op: "udplite socket",
            source,
        },
    })
}

/// 원격지에 연결
///
/// `target`은 TCP/UDP면 `host:port`, Unix면 소켓 경로.
pub fn connect(transport: Transport, target: &str) -> Result<Box<dyn Channel + Send>> {
    let channel: Box<dyn Channel + Send> = match transport {
        Transport::Tcp => {
            let stream = TcpStream::connect(target).op("tcp connect")?;
            stream.set_nodelay(true).op("set TCP_NODELAY")?;
            Box::new(stream)
        }
        Transport::Udp => {
            let socket = UdpSocket::bind(("0.0.0.0", 0)).op("udp bind")?;
            socket.connect(target).op("udp connect")?;
            Box::new(DatagramChannel::new(socket))
        }
        Transport::UdpLite => {
            let addr = resolve(target)?;
            let socket = udplite_socket(addr)?;
            socket.connect(&addr.into()).op("udplite connect")?;
            Box::new(DatagramChannel::with_transport(socket.into(), Transport::UdpLite))
        }
        Transport::Unix => Box::new(UnixStream::connect(target).op("unix connect")?),
        other => return Err(Error::UnsupportedTransport { transport: other }),
    };

    info!(
        "{} 연결: {} (segment {} bytes)",
        transport,
        target,
        channel.segment_hint()
    );
    Ok(channel)
}

/// 수신 대기 소켓
#[derive(Debug)]
pub enum Listener {
    Tcp(TcpListener),
    /// UDP 또는 UDP-Lite
    Datagram(UdpSocket, Transport),
    Unix(UnixListener),
}

impl Listener {
    /// `target`에 바인드
    pub fn bind(transport: Transport, target: &str) -> Result<Self> {
        let listener = match transport {
            Transport::Tcp => Listener::Tcp(TcpListener::bind(target).op("tcp bind")?),
            Transport::Udp => {
                Listener::Datagram(UdpSocket::bind(target).op("udp bind")?, Transport::Udp)
            }
            Transport::UdpLite => {
                let addr = resolve(target)?;
                let socket = udplite_socket(addr)?;
                socket.bind(&addr.into()).op("udplite bind")?;
                Listener::Datagram(socket.into(), Transport::UdpLite)
            }
            Transport::Unix => Listener::Unix(UnixListener::bind(target).op("unix bind")?),
            other => return Err(Error::UnsupportedTransport { transport: other }),
        };
        info!("{} 수신 대기: {}", transport, target);
        Ok(listener)
    }

    pub fn transport(&self) -> Transport {
        match self {
            Listener::Tcp(_) => Transport::Tcp,
            Listener::Datagram(_, transport) => *transport,
            Listener::Unix(_) => Transport::Unix,
        }
    }

    /// 다음 연결 수락
    ///
    /// 데이터그램 소켓은 첫 데이터그램의 송신자에게 connect 한다.
    pub fn accept(&self) -> Result<Box<dyn Channel + Send>> {
        match self {
            Listener::Tcp(listener) => {
                let (stream, peer) = listener.accept().op("tcp accept")?;
                debug!("연결 수락: {}", peer);
                Ok(Box::new(stream))
            }
            Listener::Datagram(socket, transport) => {
                let mut first = [0u8; 1];
                let (_, peer) = socket.peek_from(&mut first).op("datagram peek")?;
                let socket = socket.try_clone().op("datagram socket clone")?;
                socket.connect(peer).op("datagram connect")?;
                debug!("{} 송신자: {}", transport, peer);
                Ok(Box::new(DatagramChannel::with_transport(socket, *transport)))
            }
            Listener::Unix(listener) => {
                let (stream, _) = listener.accept().op("unix accept")?;
                debug!("unix 연결 수락");
                Ok(Box::new(stream))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_reliability() {
        assert_eq!("tcp".parse::<Transport>().unwrap(), Transport::Tcp);
        assert_eq!("UDP-Lite".parse::<Transport>().unwrap(), Transport::UdpLite);
        assert!("quic".parse::<Transport>().is_err());

        assert!(Transport::Tcp.is_reliable_stream());
        assert!(Transport::Tipc.is_reliable_stream());
        assert!(!Transport::Udp.is_reliable_stream());
        assert!(!Transport::Dccp.is_reliable_stream());
        assert_eq!(Transport::Sctp.to_string(), "sctp");
    }

    #[test]
    fn test_unsupported_transport() {
        for transport in [Transport::Sctp, Transport::Dccp, Transport::Tipc] {
            assert!(!transport.is_supported());
            assert!(matches!(
                connect(transport, "127.0.0.1:1"),
                Err(Error::UnsupportedTransport { .. })
            ));
        }
    }

    #[test]
    fn test_udplite_round_trip() {
        // 커널에서 UDP-Lite가 빠졌으면 UnsupportedTransport
        let listener = match Listener::bind(Transport::UdpLite, "127.0.0.1:0") {
            Ok(listener) => listener,
            Err(Error::UnsupportedTransport { transport }) => {
                assert_eq!(transport, Transport::UdpLite);
                return;
            }
            Err(e) => panic!("udplite bind: {}", e),
        };
        assert_eq!(listener.transport(), Transport::UdpLite);
        let addr = match &listener {
            Listener::Datagram(s, _) => s.local_addr().unwrap(),
            _ => unreachable!(),
        };

        let mut client = connect(Transport::UdpLite, &addr.to_string()).unwrap();
        assert_eq!(client.transport(), Transport::UdpLite);
        assert!(!client.is_reliable_stream());
        client.write_all(b"lite").unwrap();

        let mut server = listener.accept().unwrap();
        assert_eq!(server.transport(), Transport::UdpLite);
        let mut buf = [0u8; 16];
        assert_eq!(server.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf[..4], b"lite");

        client.finish().unwrap();
        assert_eq!(server.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_tcp_loopback_segment_hint() {
        let listener = Listener::bind(Transport::Tcp, "127.0.0.1:0").unwrap();
        let addr = match &listener {
            Listener::Tcp(l) => l.local_addr().unwrap(),
            _ => unreachable!(),
        };

        let client = connect(Transport::Tcp, &addr.to_string()).unwrap();
        let server = listener.accept().unwrap();

        assert!(client.segment_hint() > 0);
        assert!(server.is_reliable_stream());
        client.set_io_timeout(Some(Duration::from_millis(50))).unwrap();
        client.set_io_timeout(None).unwrap();
    }

    #[test]
    fn test_udp_terminator() {
        let listener = Listener::bind(Transport::Udp, "127.0.0.1:0").unwrap();
        let addr = match &listener {
            Listener::Datagram(s, _) => s.local_addr().unwrap(),
            _ => unreachable!(),
        };

        let mut client = connect(Transport::Udp, &addr.to_string()).unwrap();
        assert!(!client.is_reliable_stream());
        client.write_all(b"datagram").unwrap();

        let mut server = listener.accept().unwrap();
        let mut buf = [0u8; 64];
        assert_eq!(server.read(&mut buf).unwrap(), 8);
        assert_eq!(&buf[..8], b"datagram");

        client.finish().unwrap();
        assert_eq!(server.read(&mut buf).unwrap(), 0);
    }
}
