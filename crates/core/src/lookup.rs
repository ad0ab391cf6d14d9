//! 외부 협력자 trait — IP 집합, 프리픽스 맵, 국가 코드, 사이트 설정
//!
//! 엔진은 이 trait만 알고, 실제 구현(파일 로더 등)은 상위 크레이트가 제공합니다.

use std::net::IpAddr;

/// IP 집합 조회
///
/// 필터 엔진의 set-intersect / set-complement 에 사용됩니다.
pub trait IpSetLookup: Send + Sync {
    /// 주소가 집합에 포함되는지 여부
    fn contains(&self, addr: &IpAddr) -> bool;
}

/// 프리픽스 맵이 다루는 키 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PmapContent {
    /// IP 주소 키
    Ip,
    /// (프로토콜, 포트) 키
    ProtoPort,
}

impl PmapContent {
    /// 설정/진단용 이름
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ip => "ip",
            Self::ProtoPort => "proto-port",
        }
    }
}

/// 프리픽스 맵 조회 키
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PmapKey {
    /// IP 주소
    Ip(IpAddr),
    /// 프로토콜과 포트
    ProtoPort {
        /// 프로토콜 번호
        protocol: u8,
        /// 포트 번호
        port: u16,
    },
}

/// 프리픽스 맵 조회
pub trait PrefixMap: Send + Sync {
    /// 맵 이름 (레지스트리 키)
    fn name(&self) -> &str;

    /// 맵이 다루는 키 종류
    fn content(&self) -> PmapContent;

    /// 키에 대응하는 라벨 값
    fn lookup(&self, key: &PmapKey) -> u32;
}

/// 국가 코드 조회
pub trait CountryLookup: Send + Sync {
    /// 주소의 국가 코드 ([`encode_country_code`] 형식)
    fn country_code(&self, addr: &IpAddr) -> u16;
}

/// 사이트 설정 조회 (센서 / flowtype 클래스 / flowtype 타입 이름)
pub trait SiteLookup: Send + Sync {
    /// 센서 이름 → ID
    fn sensor_id(&self, name: &str) -> Option<u16>;
    /// 센서 ID → 이름
    fn sensor_name(&self, id: u16) -> Option<&str>;
    /// 클래스 이름 → ID
    fn class_id(&self, name: &str) -> Option<u8>;
    /// 클래스 ID → 이름
    fn class_name(&self, id: u8) -> Option<&str>;
    /// flowtype 이름 → ID
    fn flowtype_id(&self, name: &str) -> Option<u8>;
    /// flowtype ID → 이름
    fn flowtype_name(&self, id: u8) -> Option<&str>;
}

/// 알 수 없는 국가 코드 (`--`)
pub const UNKNOWN_COUNTRY: u16 = ((b'-' as u16) << 8) | b'-' as u16;

/// 2글자 국가 코드를 16비트 값으로 인코딩합니다 (소문자 정규화).
///
/// 두 글자가 아니거나 알파벳이 아니면 None. `--`는 [`UNKNOWN_COUNTRY`].
pub fn encode_country_code(name: &str) -> Option<u16> {
    let bytes = name.as_bytes();
    if bytes.len() != 2 {
        return None;
    }
    if bytes == b"--" {
        return Some(UNKNOWN_COUNTRY);
    }
    if !bytes.iter().all(u8::is_ascii_alphabetic) {
        return None;
    }
    let hi = bytes[0].to_ascii_lowercase();
    let lo = bytes[1].to_ascii_lowercase();
    Some((u16::from(hi) << 8) | u16::from(lo))
}

/// 16비트 국가 코드 값을 2글자 문자열로 복원합니다.
pub fn decode_country_code(code: u16) -> String {
    let hi = (code >> 8) as u8;
    let lo = (code & 0xFF) as u8;
    if hi.is_ascii_graphic() && lo.is_ascii_graphic() {
        format!("{}{}", hi as char, lo as char)
    } else {
        "??".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn country_code_round_trip() {
        let code = encode_country_code("US").unwrap();
        assert_eq!(code, (u16::from(b'u') << 8) | u16::from(b's'));
        assert_eq!(decode_country_code(code), "us");
    }

    #[test]
    fn country_code_unknown_marker() {
        assert_eq!(encode_country_code("--"), Some(UNKNOWN_COUNTRY));
        assert_eq!(decode_country_code(UNKNOWN_COUNTRY), "--");
    }

    #[test]
    fn country_code_rejects_bad_input() {
        assert_eq!(encode_country_code("usa"), None);
        assert_eq!(encode_country_code("1a"), None);
        assert_eq!(encode_country_code(""), None);
    }

    #[test]
    fn undecodable_country_value() {
        assert_eq!(decode_country_code(0), "??");
    }
}
