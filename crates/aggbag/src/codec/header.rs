//! 파일 헤더 -- 8바이트 preamble과 헤더 엔트리
//!
//! # 레이아웃 (빅엔디언)
//! ```text
//! preamble : magic(u32) format(u8) version(u8) compression(u8) reserved(u8)
//! entry    : id(u32) length(u32) payload[length]
//! ...        id 0(length 0)이 나올 때까지 반복
//! ```
//!
//! 모르는 엔트리 ID는 건너뜁니다.

use std::io::{self, Read};

use bytes::{Buf, BufMut, BytesMut};

use crate::error::AggBagError;

/// 파일 magic
pub const MAGIC: u32 = 0xDEAD_BEEF;
/// preamble 길이
pub const PREAMBLE_LEN: usize = 8;
/// Aggregate Bag 파일 형식 바이트
pub const FORMAT_AGGBAG: u8 = 0x09;
/// 레거시 Bag 파일 형식 바이트
pub const FORMAT_BAG: u8 = 0x21;
/// 압축 없음
pub const COMPRESSION_NONE: u8 = 0;

const ENTRY_TERMINATOR: u32 = 0;
const ENTRY_INVOCATION: u32 = 2;
const ENTRY_ANNOTATION: u32 = 3;
const ENTRY_BAG: u32 = 6;
const ENTRY_AGGBAG: u32 = 8;

/// 헤더 엔트리 하나의 최대 길이
const MAX_ENTRY_LEN: u32 = 16 * 1024 * 1024;

/// 파일 앞 8바이트
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preamble {
    /// 파일 형식 ([`FORMAT_AGGBAG`] / [`FORMAT_BAG`])
    pub format: u8,
    /// 레코드 버전
    pub version: u8,
    /// 압축 방식
    pub compression: u8,
}

impl Preamble {
    /// 압축 없는 preamble
    pub fn new(format: u8, version: u8) -> Self {
        Self {
            format,
            version,
            compression: COMPRESSION_NONE,
        }
    }

    /// 버퍼에 인코딩합니다.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(MAGIC);
        buf.put_u8(self.format);
        buf.put_u8(self.version);
        buf.put_u8(self.compression);
        buf.put_u8(0);
    }

    /// 8바이트에서 복원합니다. magic이 다르면 `Corrupt`.
    pub fn decode(bytes: &[u8; PREAMBLE_LEN]) -> Result<Self, AggBagError> {
        let mut buf = &bytes[..];
        let magic = buf.get_u32();
        if magic != MAGIC {
            return Err(AggBagError::corrupt(format!(
                "bad magic number 0x{:08x}",
                magic
            )));
        }
        Ok(Self {
            format: buf.get_u8(),
            version: buf.get_u8(),
            compression: buf.get_u8(),
        })
    }

    /// 압축 방식이 없음인지 확인합니다.
    pub fn check_compression(&self) -> Result<(), AggBagError> {
        if self.compression != COMPRESSION_NONE {
            return Err(AggBagError::UnsupportedCompression {
                method: self.compression,
            });
        }
        Ok(())
    }
}

/// 레거시 Bag 필드 기술자
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BagDescriptor {
    /// 레거시 키 타입 ID
    pub key_type: u16,
    /// 디스크 키 폭
    pub key_width: u16,
    /// 레거시 카운터 타입 ID
    pub counter_type: u16,
    /// 디스크 카운터 폭
    pub counter_width: u16,
}

/// 해석된 헤더 엔트리
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderEntry {
    /// 명령 이력 (엔트리 하나에 여러 개가 이어질 수 있음)
    Invocation(Vec<String>),
    /// 주석
    Annotation(String),
    /// 레거시 Bag 기술자
    Bag(BagDescriptor),
    /// Aggregate Bag 스키마 ((필드 ID, 폭) 목록)
    AggBagSchema {
        /// 키 필드
        keys: Vec<(u16, u16)>,
        /// 카운터 필드
        counters: Vec<(u16, u16)>,
    },
}

/// preamble을 읽습니다.
pub fn read_preamble<R: Read>(src: &mut R) -> Result<Preamble, AggBagError> {
    let mut bytes = [0u8; PREAMBLE_LEN];
    src.read_exact(&mut bytes).map_err(truncated("preamble"))?;
    Preamble::decode(&bytes)
}

/// 종료 엔트리까지 헤더 엔트리를 읽습니다.
pub fn read_entries<R: Read>(src: &mut R) -> Result<Vec<HeaderEntry>, AggBagError> {
    let mut entries = Vec::new();
    loop {
        let mut frame = [0u8; 8];
        src.read_exact(&mut frame).map_err(truncated("header"))?;
        let mut frame = &frame[..];
        let id = frame.get_u32();
        let len = frame.get_u32();

        if id == ENTRY_TERMINATOR {
            if len != 0 {
                return Err(AggBagError::corrupt("header terminator has a payload"));
            }
            return Ok(entries);
        }
        if len > MAX_ENTRY_LEN {
            return Err(AggBagError::corrupt(format!(
                "header entry {} is {} bytes long",
                id, len
            )));
        }

        let mut payload = vec![0u8; len as usize];
        src.read_exact(&mut payload).map_err(truncated("header entry"))?;

        match id {
            ENTRY_INVOCATION => entries.push(HeaderEntry::Invocation(parse_invocations(&payload)?)),
            ENTRY_ANNOTATION => entries.push(HeaderEntry::Annotation(utf8(payload, "annotation")?)),
            ENTRY_BAG => entries.push(HeaderEntry::Bag(parse_bag_descriptor(&payload)?)),
            ENTRY_AGGBAG => entries.push(parse_aggbag_schema(&payload)?),
            other => tracing::debug!(id = other, len, "skipping unknown header entry"),
        }
    }
}

/// 엔트리 목록과 종료 엔트리를 버퍼에 인코딩합니다.
pub fn encode_entries(entries: &[HeaderEntry], buf: &mut BytesMut) {
    for entry in entries {
        let mut payload = BytesMut::new();
        let id = match entry {
            HeaderEntry::Invocation(lines) => {
                for line in lines {
                    payload.put_u32(line.len() as u32);
                    payload.put_slice(line.as_bytes());
                }
                ENTRY_INVOCATION
            }
            HeaderEntry::Annotation(note) => {
                payload.put_slice(note.as_bytes());
                ENTRY_ANNOTATION
            }
            HeaderEntry::Bag(desc) => {
                payload.put_u16(desc.key_type);
                payload.put_u16(desc.key_width);
                payload.put_u16(desc.counter_type);
                payload.put_u16(desc.counter_width);
                ENTRY_BAG
            }
            HeaderEntry::AggBagSchema { keys, counters } => {
                payload.put_u16(keys.len() as u16);
                payload.put_u16(counters.len() as u16);
                for (id, width) in keys.iter().chain(counters) {
                    payload.put_u16(*id);
                    payload.put_u16(*width);
                }
                ENTRY_AGGBAG
            }
        };
        buf.put_u32(id);
        buf.put_u32(payload.len() as u32);
        buf.put_slice(&payload);
    }
    buf.put_u32(ENTRY_TERMINATOR);
    buf.put_u32(0);
}

fn parse_invocations(mut payload: &[u8]) -> Result<Vec<String>, AggBagError> {
    let mut lines = Vec::new();
    while payload.has_remaining() {
        if payload.remaining() < 4 {
            return Err(AggBagError::corrupt("truncated invocation length"));
        }
        let len = payload.get_u32() as usize;
        if payload.remaining() < len {
            return Err(AggBagError::corrupt("truncated invocation text"));
        }
        lines.push(utf8(payload[..len].to_vec(), "invocation")?);
        payload.advance(len);
    }
    Ok(lines)
}

fn parse_bag_descriptor(mut payload: &[u8]) -> Result<BagDescriptor, AggBagError> {
    if payload.remaining() < 8 {
        return Err(AggBagError::corrupt("truncated Bag descriptor"));
    }
    Ok(BagDescriptor {
        key_type: payload.get_u16(),
        key_width: payload.get_u16(),
        counter_type: payload.get_u16(),
        counter_width: payload.get_u16(),
    })
}

fn parse_aggbag_schema(mut payload: &[u8]) -> Result<HeaderEntry, AggBagError> {
    if payload.remaining() < 4 {
        return Err(AggBagError::corrupt("truncated schema entry"));
    }
    let key_count = usize::from(payload.get_u16());
    let counter_count = usize::from(payload.get_u16());
    if payload.remaining() != 4 * (key_count + counter_count) {
        return Err(AggBagError::corrupt(format!(
            "schema entry declares {} key and {} counter fields but carries {} bytes",
            key_count,
            counter_count,
            payload.remaining()
        )));
    }
    let mut take = |n: usize| -> Vec<(u16, u16)> {
        (0..n)
            .map(|_| (payload.get_u16(), payload.get_u16()))
            .collect()
    };
    let keys = take(key_count);
    let counters = take(counter_count);
    Ok(HeaderEntry::AggBagSchema { keys, counters })
}

fn utf8(bytes: Vec<u8>, what: &str) -> Result<String, AggBagError> {
    String::from_utf8(bytes)
        .map_err(|_| AggBagError::corrupt(format!("{} is not valid UTF-8", what)))
}

/// `read_exact`의 EOF를 `Corrupt`로 바꾸는 헬퍼
fn truncated(what: &'static str) -> impl Fn(io::Error) -> AggBagError {
    move |e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            AggBagError::corrupt(format!("truncated {}", what))
        } else {
            AggBagError::Io(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(entries: &[HeaderEntry]) -> Vec<HeaderEntry> {
        let mut buf = BytesMut::new();
        encode_entries(entries, &mut buf);
        let mut src = &buf[..];
        let decoded = read_entries(&mut src).unwrap();
        assert!(src.is_empty());
        decoded
    }

    #[test]
    fn preamble_layout() {
        let mut buf = BytesMut::new();
        Preamble::new(FORMAT_AGGBAG, 1).encode(&mut buf);
        assert_eq!(&buf[..], &[0xDE, 0xAD, 0xBE, 0xEF, 0x09, 0x01, 0x00, 0x00]);

        let mut bytes = [0u8; PREAMBLE_LEN];
        bytes.copy_from_slice(&buf);
        let preamble = Preamble::decode(&bytes).unwrap();
        assert_eq!(preamble.format, FORMAT_AGGBAG);
        assert!(preamble.check_compression().is_ok());
    }

    #[test]
    fn bad_magic_is_corrupt() {
        let bytes = [0u8; PREAMBLE_LEN];
        assert!(matches!(
            Preamble::decode(&bytes),
            Err(AggBagError::Corrupt { .. })
        ));
    }

    #[test]
    fn compression_is_rejected() {
        let preamble = Preamble {
            format: FORMAT_BAG,
            version: 3,
            compression: 2,
        };
        assert!(matches!(
            preamble.check_compression(),
            Err(AggBagError::UnsupportedCompression { method: 2 })
        ));
    }

    #[test]
    fn entries_round_trip() {
        let entries = vec![
            HeaderEntry::AggBagSchema {
                keys: vec![(0, 4), (2, 2)],
                counters: vec![(0xC000, 8)],
            },
            HeaderEntry::Annotation("alpha".to_owned()),
            HeaderEntry::Invocation(vec!["flowbag tool".to_owned()]),
            HeaderEntry::Bag(BagDescriptor {
                key_type: 0,
                key_width: 4,
                counter_type: 28,
                counter_width: 8,
            }),
        ];
        assert_eq!(round_trip(&entries), entries);
    }

    #[test]
    fn concatenated_invocations_are_split() {
        let mut buf = BytesMut::new();
        buf.put_u32(ENTRY_INVOCATION);
        buf.put_u32(4 + 1 + 4 + 2);
        buf.put_u32(1);
        buf.put_slice(b"a");
        buf.put_u32(2);
        buf.put_slice(b"bc");
        encode_entries(&[], &mut buf);
        let mut src = &buf[..];
        assert_eq!(
            read_entries(&mut src).unwrap(),
            vec![HeaderEntry::Invocation(vec!["a".to_owned(), "bc".to_owned()])]
        );
    }

    #[test]
    fn unknown_entries_are_skipped() {
        let mut buf = BytesMut::new();
        buf.put_u32(42);
        buf.put_u32(3);
        buf.put_slice(b"xyz");
        encode_entries(&[HeaderEntry::Annotation("n".to_owned())], &mut buf);
        let mut src = &buf[..];
        assert_eq!(
            read_entries(&mut src).unwrap(),
            vec![HeaderEntry::Annotation("n".to_owned())]
        );
    }

    #[test]
    fn truncated_header_is_corrupt() {
        let mut buf = BytesMut::new();
        buf.put_u32(ENTRY_ANNOTATION);
        buf.put_u32(10);
        buf.put_slice(b"short");
        let mut src = &buf[..];
        assert!(matches!(
            read_entries(&mut src),
            Err(AggBagError::Corrupt { .. })
        ));
    }

    #[test]
    fn schema_length_mismatch_is_corrupt() {
        let mut buf = BytesMut::new();
        buf.put_u32(ENTRY_AGGBAG);
        buf.put_u32(8);
        buf.put_u16(2);
        buf.put_u16(1);
        buf.put_u32(0);
        let mut src = &buf[..];
        assert!(matches!(
            read_entries(&mut src),
            Err(AggBagError::Corrupt { .. })
        ));
    }
}
