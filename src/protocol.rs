//! 헤더 교환
//!
//! 송신측: 고정 헤더 → (RTT 프로브) → (RTT_INFO) → 데이터
//! 수신측: 고정 헤더를 읽고 `next_header`가 가리키는 대로 확장 체인을 따라간다.
//! 각 단계의 다음 종류는 항상 직전에 읽은 prefix에서 가져온다.

use std::io::{Read, Write};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::IoContext;
use crate::header::{
    ExtensionPrefix, NextHeader, NsHeader, RttInfo, EXTENSION_PREFIX_LEN, HEADER_LEN,
};
use crate::io::{drain, read_exact, write_all};
use crate::rtt::respond_to_probe;
use crate::{Error, Result, MAX_UNKNOWN_EXTENSIONS};

/// 수신측이 헤더 교환으로 알게 된 정보
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderInfo {
    /// 송신측 버전 (교환하지 않았으면 None)
    pub version: Option<u16>,

    /// 선언된 데이터 크기 (0이면 알 수 없음)
    pub data_size: u32,

    /// 송신측이 RTT 프로브를 요청했는지
    pub probe_requested: bool,

    /// 응답한 프로브 수
    pub probes_answered: u32,

    /// 송신측이 알려준 RTT
    pub peer_rtt: Option<Duration>,

    /// 건너뛴 알 수 없는 확장 수
    pub unknown_extensions: u32,

    /// 다이제스트 확장을 봤는지
    pub digest_seen: bool,

    /// 체인 뒤에 데이터가 따라오는지 (NO_NEXT면 false)
    pub data_follows: bool,
}

impl HeaderInfo {
    /// 헤더 교환이 없는 트랜스포트용
    pub fn unannounced() -> Self {
        Self {
            version: None,
            data_size: 0,
            probe_requested: false,
            probes_answered: 0,
            peer_rtt: None,
            unknown_extensions: 0,
            digest_seen: false,
            data_follows: true,
        }
    }

    fn from_header(header: &NsHeader) -> Self {
        Self {
            version: Some(header.version),
            data_size: header.data_size,
            probe_requested: header.probe_requested(),
            ..Self::unannounced()
        }
    }
}

/// 고정 헤더 송신
pub fn send_header<W: Write + ?Sized>(channel: &mut W, header: &NsHeader) -> Result<()> {
    write_all(channel, &header.to_bytes()).op("header write")?;
    debug!(
        "헤더 송신: data_size={}, next={:?}",
        header.data_size, header.next_header
    );
    Ok(())
}

/// RTT_INFO 확장 송신 (체인의 다음은 데이터)
pub fn announce_rtt<W: Write + ?Sized>(channel: &mut W, rtt: Duration) -> Result<()> {
    let info = RttInfo::new(NextHeader::Data, rtt);
    write_all(channel, &info.to_bytes()).op("rtt info write")?;
    debug!("RTT 통지: {:?}", rtt);
    Ok(())
}

/// 수신측 헤더 교환
///
/// 신뢰성 있는 스트림이 아니면 아무것도 읽지 않고 바로 돌아온다.
/// 선언된 길이보다 많이 읽는 일은 없다.
pub fn receive_header<C: Read + Write + ?Sized>(channel: &mut C, reliable: bool) -> Result<HeaderInfo> {
    if !reliable {
        debug!("데이터그램 트랜스포트, 헤더 교환 생략");
        return Ok(HeaderInfo::unannounced());
    }

    let mut raw = [0u8; HEADER_LEN];
    let got = read_exact(channel, &mut raw).op("header read")?;
    if got != HEADER_LEN {
        return Err(Error::HeaderTruncated {
            expected: HEADER_LEN,
            got,
        });
    }
    let header = NsHeader::decode(&raw)?;
    let mut info = HeaderInfo::from_header(&header);

    let mut current = header.next_header;
    while current != NextHeader::Data {
        let prefix = read_prefix(channel)?;

        match current {
            NextHeader::NoNext => {
                skip_payload(channel, prefix)?;
                info.data_follows = false;
                debug!("NO_NEXT: 데이터 없음");
                break;
            }
            NextHeader::Digest => {
                warn!("다이제스트 확장은 지원하지 않음, {} bytes 건너뜀", prefix.payload_len());
                skip_payload(channel, prefix)?;
                info.digest_seen = true;
            }
            NextHeader::RttProbe => {
                respond_to_probe(channel, prefix)?;
                info.probes_answered += 1;
            }
            NextHeader::RttInfo => {
                let len = prefix.payload_len();
                let mut payload = vec![0u8; len];
                let got = read_exact(channel, &mut payload).op("rtt info read")?;
                if got != len {
                    return Err(Error::HeaderTruncated { expected: len, got });
                }
                match RttInfo::decode_payload(prefix, &payload) {
                    Some(rtt_info) => {
                        info!("송신측 RTT: {:.3}ms", rtt_info.rtt().as_secs_f64() * 1000.0);
                        info.peer_rtt = Some(rtt_info.rtt());
                    }
                    None => warn!("RTT_INFO 페이로드가 짧음: {} bytes", len),
                }
            }
            NextHeader::Unknown(kind) => {
                info.unknown_extensions += 1;
                warn!(
                    "알 수 없는 확장 kind={} ({}번째), {} bytes 건너뜀",
                    kind,
                    info.unknown_extensions,
                    prefix.payload_len()
                );
                if info.unknown_extensions > MAX_UNKNOWN_EXTENSIONS {
                    return Err(Error::TooManyUnknownExtensions {
                        count: info.unknown_extensions,
                        last_kind: kind,
                    });
                }
                skip_payload(channel, prefix)?;
            }
            NextHeader::Data => break,
        }

        current = prefix.next_header;
    }

    if info.probes_answered > 0 {
        debug!("프로브 {}회 응답", info.probes_answered);
    }
    Ok(info)
}

fn read_prefix<R: Read + ?Sized>(channel: &mut R) -> Result<ExtensionPrefix> {
    let mut raw = [0u8; EXTENSION_PREFIX_LEN];
    let got = read_exact(channel, &mut raw).op("extension read")?;
    if got != EXTENSION_PREFIX_LEN {
        return Err(Error::HeaderTruncated {
            expected: EXTENSION_PREFIX_LEN,
            got,
        });
    }
    Ok(ExtensionPrefix::decode(&raw))
}

fn skip_payload<R: Read + ?Sized>(channel: &mut R, prefix: ExtensionPrefix) -> Result<()> {
    let len = prefix.payload_len();
    let drained = drain(channel, len).op("extension drain")?;
    if drained != len {
        return Err(Error::HeaderTruncated {
            expected: len,
            got: drained,
        });
    }
    Ok(())
}
