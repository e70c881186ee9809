//! 와이어 헤더 코덱
//!
//! 전송 앞부분에 오가는 메타데이터 형식:
//! - 고정 헤더 (12바이트): magic, version, data_size, next_header, reserved
//! - 확장 헤더: IPv6 확장 헤더처럼 `next_header`로 체인됨
//!
//! 모든 정수는 네트워크 바이트 순서(big endian)

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use rand::RngCore;
use tracing::warn;

use crate::{Error, Result, MAGIC_NUMBER, PROTOCOL_VERSION};

/// 고정 헤더 크기
pub const HEADER_LEN: usize = 12;

/// 확장 헤더 공통 prefix 크기 (next_header + length_words)
pub const EXTENSION_PREFIX_LEN: usize = 4;

/// RTT 프로브 페이로드의 고정부 (filler 제외)
pub const RTT_PROBE_FIXED_LEN: usize = 16;

/// RTT 정보 페이로드 크기
pub const RTT_INFO_LEN: usize = 8;

/// 확장 헤더 페이로드 최대 크기 (`length_words`가 u16)
pub const MAX_EXTENSION_PAYLOAD: usize = u16::MAX as usize * 4;

/// RTT 프로브 채움 데이터 최대 크기
pub const MAX_RTT_FILLER: usize = MAX_EXTENSION_PAYLOAD - RTT_PROBE_FIXED_LEN;

/// 확장 헤더 종류
///
/// 각 확장 헤더의 `next_header`는 자기 자신이 아니라 *다음* 확장의 종류를 담는다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NextHeader {
    /// 확장 없음, 바로 데이터가 따라옴
    Data,

    /// 다이제스트 (미구현, 건너뜀)
    Digest,

    /// RTT 프로브 요청/응답
    RttProbe,

    /// 마지막 확장이며 데이터도 없음
    NoNext,

    /// 송신측이 계산한 RTT 통지
    RttInfo,

    /// 알 수 없는 종류
    Unknown(u16),
}

impl From<u16> for NextHeader {
    fn from(value: u16) -> Self {
        match value {
            0 => NextHeader::Data,
            1 => NextHeader::Digest,
            2 => NextHeader::RttProbe,
            3 => NextHeader::NoNext,
            4 => NextHeader::RttInfo,
            other => NextHeader::Unknown(other),
        }
    }
}

impl From<NextHeader> for u16 {
    fn from(value: NextHeader) -> Self {
        match value {
            NextHeader::Data => 0,
            NextHeader::Digest => 1,
            NextHeader::RttProbe => 2,
            NextHeader::NoNext => 3,
            NextHeader::RttInfo => 4,
            NextHeader::Unknown(other) => other,
        }
    }
}

/// 고정 헤더
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NsHeader {
    /// 매직 넘버
    pub magic: u16,

    /// 도구 버전 (정보용)
    pub version: u16,

    /// 선언된 페이로드 크기, 0이면 알 수 없음
    pub data_size: u32,

    /// 첫 번째 확장 헤더 종류
    pub next_header: NextHeader,

    pub reserved: u16,
}

impl NsHeader {
    pub fn new(data_size: u32, next_header: NextHeader) -> Self {
        Self {
            magic: MAGIC_NUMBER,
            version: PROTOCOL_VERSION,
            data_size,
            next_header,
            reserved: 0,
        }
    }

    /// 송신용 헤더 생성
    ///
    /// `u32`에 담기지 않는 크기는 0(알 수 없음)으로 선언한다.
    pub fn for_transfer(data_size: u64, perform_rtt: bool) -> Self {
        let declared = u32::try_from(data_size).unwrap_or_else(|_| {
            warn!("데이터 크기 {} bytes는 헤더에 담을 수 없음, 0으로 선언", data_size);
            0
        });
        let next = if perform_rtt {
            NextHeader::RttProbe
        } else {
            NextHeader::Data
        };
        Self::new(declared, next)
    }

    /// RTT 프로브 요청 여부
    pub fn probe_requested(&self) -> bool {
        self.next_header == NextHeader::RttProbe
    }

    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u16(self.magic);
        buf.put_u16(self.version);
        buf.put_u32(self.data_size);
        buf.put_u16(self.next_header.into());
        buf.put_u16(self.reserved);
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        self.encode(&mut &mut out[..]);
        out
    }

    /// 바이트에서 역직렬화 (magic 검증 포함)
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::HeaderTruncated {
                expected: HEADER_LEN,
                got: bytes.len(),
            });
        }

        let mut buf = &bytes[..HEADER_LEN];
        let magic = buf.get_u16();
        if magic != MAGIC_NUMBER {
            return Err(Error::HeaderCorrupt {
                expected: MAGIC_NUMBER,
                got: magic,
            });
        }

        Ok(Self {
            magic,
            version: buf.get_u16(),
            data_size: buf.get_u32(),
            next_header: NextHeader::from(buf.get_u16()),
            reserved: buf.get_u16(),
        })
    }
}

/// 확장 헤더 공통 prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtensionPrefix {
    /// 다음 확장 헤더 종류
    pub next_header: NextHeader,

    /// prefix를 제외한 페이로드 길이 (4바이트 단위)
    pub length_words: u16,
}

impl ExtensionPrefix {
    /// 페이로드 바이트 길이로 생성 (4의 배수로 내림)
    ///
    /// `length_words`에 담기지 않는 길이는 `ExtensionTooLarge`.
    pub fn new(next_header: NextHeader, payload_len: usize) -> Result<Self> {
        let length_words = u16::try_from(payload_len / 4).map_err(|_| Error::ExtensionTooLarge {
            len: payload_len,
            max: MAX_EXTENSION_PAYLOAD,
        })?;
        Ok(Self {
            next_header,
            length_words,
        })
    }

    /// 페이로드 바이트 길이
    pub fn payload_len(&self) -> usize {
        self.length_words as usize * 4
    }

    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u16(self.next_header.into());
        buf.put_u16(self.length_words);
    }

    pub fn to_bytes(&self) -> [u8; EXTENSION_PREFIX_LEN] {
        let mut out = [0u8; EXTENSION_PREFIX_LEN];
        self.encode(&mut &mut out[..]);
        out
    }

    pub fn decode(bytes: &[u8; EXTENSION_PREFIX_LEN]) -> Self {
        let mut buf = &bytes[..];
        Self {
            next_header: NextHeader::from(buf.get_u16()),
            length_words: buf.get_u16(),
        }
    }
}

/// RTT 프로브 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RttType {
    Request,
    Reply,
    Unknown(u16),
}

impl From<u16> for RttType {
    fn from(value: u16) -> Self {
        match value {
            0 => RttType::Request,
            1 => RttType::Reply,
            other => RttType::Unknown(other),
        }
    }
}

impl From<RttType> for u16 {
    fn from(value: RttType) -> Self {
        match value {
            RttType::Request => 0,
            RttType::Reply => 1,
            RttType::Unknown(other) => other,
        }
    }
}

/// RTT 프로브 패킷 (prefix 포함)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RttProbePacket {
    /// 다음 확장 헤더 종류
    pub next_header: NextHeader,

    pub probe_type: RttType,

    /// 예약 (체크섬 자리)
    pub checksum: u16,

    /// 프로브 스트림 식별자 (엉뚱한/오래된 응답 구분용)
    pub ident: u16,

    pub seq_no: u16,

    /// 송신 시각 (epoch 초)
    pub sec: u32,

    /// 송신 시각 (마이크로초)
    pub usec: u32,

    /// 채움 데이터 (4바이트 배수)
    pub filler: Bytes,
}

impl RttProbePacket {
    /// 요청 패킷 템플릿 생성
    ///
    /// filler 크기는 4의 배수로 내림된다. `MAX_RTT_FILLER`를 넘으면 에러.
    pub fn request(ident: u16, filler_len: usize) -> Result<Self> {
        let filler_len = filler_len - filler_len % 4;
        if filler_len > MAX_RTT_FILLER {
            return Err(Error::ExtensionTooLarge {
                len: RTT_PROBE_FIXED_LEN + filler_len,
                max: MAX_EXTENSION_PAYLOAD,
            });
        }
        let mut filler = BytesMut::zeroed(filler_len);
        rand::thread_rng().fill_bytes(&mut filler);

        Ok(Self {
            next_header: NextHeader::RttProbe,
            probe_type: RttType::Request,
            checksum: 0,
            ident,
            seq_no: 0,
            sec: 0,
            usec: 0,
            filler: filler.freeze(),
        })
    }

    /// 와이어 상의 전체 크기 (prefix 포함)
    pub fn wire_len(&self) -> usize {
        EXTENSION_PREFIX_LEN + RTT_PROBE_FIXED_LEN + self.filler.len()
    }

    pub fn prefix(&self) -> Result<ExtensionPrefix> {
        ExtensionPrefix::new(self.next_header, RTT_PROBE_FIXED_LEN + self.filler.len())
    }

    /// 송신 시각 기록
    pub fn stamp(&mut self, at: SystemTime) {
        let since = at.duration_since(UNIX_EPOCH).unwrap_or_default();
        self.sec = since.as_secs() as u32;
        self.usec = since.subsec_micros();
    }

    /// 기록된 송신 시각 (epoch 기준)
    pub fn timestamp(&self) -> Duration {
        Duration::from_secs(self.sec as u64) + Duration::from_micros(self.usec as u64)
    }

    pub fn encode(&self, buf: &mut impl BufMut) -> Result<()> {
        self.prefix()?.encode(buf);
        buf.put_u16(self.probe_type.into());
        buf.put_u16(self.checksum);
        buf.put_u16(self.ident);
        buf.put_u16(self.seq_no);
        buf.put_u32(self.sec);
        buf.put_u32(self.usec);
        buf.put_slice(&self.filler);
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<BytesMut> {
        let mut buf = BytesMut::with_capacity(self.wire_len());
        self.encode(&mut buf)?;
        Ok(buf)
    }

    /// prefix를 이미 읽은 상태에서 나머지 페이로드 역직렬화
    pub fn decode_payload(prefix: ExtensionPrefix, payload: &[u8]) -> Result<Self> {
        if prefix.payload_len() < RTT_PROBE_FIXED_LEN || payload.len() < prefix.payload_len() {
            return Err(Error::ProbeTruncated {
                expected: prefix.payload_len().max(RTT_PROBE_FIXED_LEN),
                got: payload.len(),
            });
        }

        let mut buf = &payload[..prefix.payload_len()];
        Ok(Self {
            next_header: prefix.next_header,
            probe_type: RttType::from(buf.get_u16()),
            checksum: buf.get_u16(),
            ident: buf.get_u16(),
            seq_no: buf.get_u16(),
            sec: buf.get_u32(),
            usec: buf.get_u32(),
            filler: Bytes::copy_from_slice(buf),
        })
    }

    /// prefix 포함 전체 패킷 역직렬화
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < EXTENSION_PREFIX_LEN {
            return Err(Error::ProbeTruncated {
                expected: EXTENSION_PREFIX_LEN + RTT_PROBE_FIXED_LEN,
                got: bytes.len(),
            });
        }
        let mut raw = [0u8; EXTENSION_PREFIX_LEN];
        raw.copy_from_slice(&bytes[..EXTENSION_PREFIX_LEN]);
        let prefix = ExtensionPrefix::decode(&raw);
        Self::decode_payload(prefix, &bytes[EXTENSION_PREFIX_LEN..])
    }

    /// 응답 패킷으로 변환
    ///
    /// 응답 뒤에는 더 이상 체인이 없으므로 next_header는 0(Data)이 된다.
    pub fn into_reply(mut self) -> Self {
        self.probe_type = RttType::Reply;
        self.next_header = NextHeader::Data;
        self
    }
}

/// RTT 정보 확장 (송신측 추정치 통지)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RttInfo {
    pub next_header: NextHeader,
    pub sec: u32,
    pub usec: u32,
}

impl RttInfo {
    pub fn new(next_header: NextHeader, rtt: Duration) -> Self {
        Self {
            next_header,
            sec: rtt.as_secs() as u32,
            usec: rtt.subsec_micros(),
        }
    }

    pub fn rtt(&self) -> Duration {
        Duration::from_secs(self.sec as u64) + Duration::from_micros(self.usec as u64)
    }

    pub fn wire_len(&self) -> usize {
        EXTENSION_PREFIX_LEN + RTT_INFO_LEN
    }

    pub fn encode(&self, buf: &mut impl BufMut) {
        let prefix = ExtensionPrefix {
            next_header: self.next_header,
            length_words: (RTT_INFO_LEN / 4) as u16,
        };
        prefix.encode(buf);
        buf.put_u32(self.sec);
        buf.put_u32(self.usec);
    }

    pub fn to_bytes(&self) -> [u8; EXTENSION_PREFIX_LEN + RTT_INFO_LEN] {
        let mut out = [0u8; EXTENSION_PREFIX_LEN + RTT_INFO_LEN];
        self.encode(&mut &mut out[..]);
        out
    }

    /// 페이로드가 8바이트보다 짧으면 None
    pub fn decode_payload(prefix: ExtensionPrefix, payload: &[u8]) -> Option<Self> {
        if payload.len() < RTT_INFO_LEN {
            return None;
        }
        let mut buf = payload;
        Some(Self {
            next_header: prefix.next_header,
            sec: buf.get_u32(),
            usec: buf.get_u32(),
        })
    }
}
