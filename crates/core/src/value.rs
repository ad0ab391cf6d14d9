//! 필드 값 — 정수 / IPv4 / IPv6 태그드 유니온
//!
//! 메모리 표현([`FieldValue`])과 와이어 표현(빅엔디언 고정 폭 바이트)을 분리합니다.
//! 와이어 바이트의 memcmp 순서는 같은 필드 안에서 값의 수치 순서와 같습니다.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::catalog::{FieldKind, ValueType};
use crate::error::FieldError;

/// 필드 하나의 값
///
/// 타입 간 순서는 `Unsigned < Ipv4 < Ipv6` 입니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FieldValue {
    /// 부호 없는 정수 (시간 필드는 epoch 초)
    Unsigned(u64),
    /// IPv4 주소
    Ipv4(Ipv4Addr),
    /// IPv6 주소
    Ipv6(Ipv6Addr),
}

impl FieldValue {
    /// IPv4 바이트로 생성
    pub fn from_ipv4_bytes(octets: [u8; 4]) -> Self {
        Self::Ipv4(Ipv4Addr::from(octets))
    }

    /// IPv6 바이트로 생성
    pub fn from_ipv6_bytes(octets: [u8; 16]) -> Self {
        Self::Ipv6(Ipv6Addr::from(octets))
    }

    /// 정수 값 (IP이면 None)
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Unsigned(v) => Some(*v),
            _ => None,
        }
    }

    /// IP 값 (정수이면 None)
    pub fn as_ip(&self) -> Option<IpAddr> {
        match self {
            Self::Unsigned(_) => None,
            Self::Ipv4(addr) => Some(IpAddr::V4(*addr)),
            Self::Ipv6(addr) => Some(IpAddr::V6(*addr)),
        }
    }

    /// IPv4를 `::ffff:0:0/96`로 매핑해 IPv6로 승격합니다. 그 외 값은 그대로입니다.
    pub fn promote_to_v6(self) -> Self {
        match self {
            Self::Ipv4(addr) => Self::Ipv6(addr.to_ipv6_mapped()),
            other => other,
        }
    }

    /// `::ffff:0:0/96` 범위의 IPv6를 IPv4로 강등합니다.
    ///
    /// 범위 밖의 IPv6이거나 정수 값이면 None을 반환합니다.
    pub fn demote_to_v4(self) -> Option<Self> {
        match self {
            Self::Ipv4(_) => Some(self),
            Self::Ipv6(addr) => addr.to_ipv4_mapped().map(Self::Ipv4),
            Self::Unsigned(_) => None,
        }
    }

    /// 값을 필드 종류에 맞게 정규화합니다.
    ///
    /// IPv4 필드에는 IPv4(또는 강등 가능한 IPv6), IPv6 필드에는 IP(IPv4는 승격),
    /// 정수/시간 필드에는 폭 안에 들어가는 정수만 허용됩니다.
    pub fn conform(self, kind: FieldKind) -> Result<Self, FieldError> {
        let mismatch = |reason: &str| FieldError::SchemaMismatch {
            reason: format!("{} for field {}: {}", reason, kind, self),
        };
        match kind.value_type() {
            ValueType::Ipv4 => self
                .demote_to_v4()
                .ok_or_else(|| mismatch("expected an IPv4 address")),
            ValueType::Ipv6 => match self {
                Self::Unsigned(_) => Err(mismatch("expected an IP address")),
                ip => Ok(ip.promote_to_v6()),
            },
            ValueType::Unsigned | ValueType::Seconds => match self {
                Self::Unsigned(v) => {
                    let max = kind.max_unsigned().unwrap_or(u64::MAX);
                    if v > max {
                        Err(mismatch(&format!("value exceeds {}", max)))
                    } else {
                        Ok(self)
                    }
                }
                _ => Err(mismatch("expected an integer")),
            },
        }
    }

    /// 정규화된 값을 와이어 바이트로 덧붙입니다.
    ///
    /// `conform`을 통과한 값이어야 합니다. 정수는 필드 폭에 맞춰 빅엔디언 하위 바이트만 기록됩니다.
    pub fn encode_into(&self, kind: FieldKind, out: &mut Vec<u8>) {
        match self {
            Self::Unsigned(v) => {
                let bytes = v.to_be_bytes();
                out.extend_from_slice(&bytes[8 - kind.width()..]);
            }
            Self::Ipv4(addr) => out.extend_from_slice(&addr.octets()),
            Self::Ipv6(addr) => out.extend_from_slice(&addr.octets()),
        }
    }

    /// 와이어 바이트에서 값을 복원합니다.
    ///
    /// `bytes`는 정확히 `kind.width()` 길이여야 합니다.
    pub fn decode(kind: FieldKind, bytes: &[u8]) -> Self {
        match kind.value_type() {
            ValueType::Ipv4 => {
                let mut octets = [0u8; 4];
                octets.copy_from_slice(&bytes[..4]);
                Self::from_ipv4_bytes(octets)
            }
            ValueType::Ipv6 => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&bytes[..16]);
                Self::from_ipv6_bytes(octets)
            }
            ValueType::Unsigned | ValueType::Seconds => {
                let mut buf = [0u8; 8];
                let width = bytes.len().min(8);
                buf[8 - width..].copy_from_slice(&bytes[..width]);
                Self::Unsigned(u64::from_be_bytes(buf))
            }
        }
    }
}

impl From<u64> for FieldValue {
    fn from(v: u64) -> Self {
        Self::Unsigned(v)
    }
}

impl From<Ipv4Addr> for FieldValue {
    fn from(addr: Ipv4Addr) -> Self {
        Self::Ipv4(addr)
    }
}

impl From<Ipv6Addr> for FieldValue {
    fn from(addr: Ipv6Addr) -> Self {
        Self::Ipv6(addr)
    }
}

impl From<IpAddr> for FieldValue {
    fn from(addr: IpAddr) -> Self {
        match addr {
            IpAddr::V4(v4) => Self::Ipv4(v4),
            IpAddr::V6(v6) => Self::Ipv6(v6),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsigned(v) => write!(f, "{}", v),
            Self::Ipv4(addr) => write!(f, "{}", addr),
            Self::Ipv6(addr) => write!(f, "{}", addr),
        }
    }
}
