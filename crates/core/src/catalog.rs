//! 필드 카탈로그 — 키/카운터 필드 종류의 닫힌 열거
//!
//! 모든 필드 종류는 빌드 시점에 고정되며, 각각 다음 속성을 가집니다.
//!
//! # 속성
//! - 와이어 포맷에 기록되는 16비트 ID
//! - 정규 이름 (대소문자 무시 조회)
//! - 의미 타입 ([`ValueType`])
//! - 역할 ([`FieldRole`]: 키 전용 / 카운터 전용)
//! - 와이어 폭 (1, 2, 4, 8, 16 바이트)
//! - 텍스트 표현 방식 ([`TextFormat`])

use std::fmt;

use crate::error::FieldError;

/// 필드 종류
///
/// 선언 순서는 카탈로그 ID 순서와 같습니다 (키 필드 다음 카운터 필드).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FieldKind {
    SIpv4,
    DIpv4,
    SPort,
    DPort,
    Protocol,
    Packets,
    Bytes,
    Flags,
    STime,
    Duration,
    ETime,
    Sensor,
    Input,
    Output,
    NhIpv4,
    InitialFlags,
    SessionFlags,
    Attributes,
    Application,
    Class,
    Type,
    IcmpType,
    IcmpCode,
    SIpv6,
    DIpv6,
    NhIpv6,
    AnyIpv4,
    AnyIpv6,
    AnyPort,
    AnySnmp,
    AnyTime,
    CustomKey,
    SipCountry,
    DipCountry,
    AnyCountry,
    SipPmap,
    DipPmap,
    AnyIpPmap,
    SportPmap,
    DportPmap,
    AnyPortPmap,
    Records,
    SumPackets,
    SumBytes,
    SumDuration,
    CustomCounter,
}

/// 필드 값의 의미 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// 부호 없는 정수
    Unsigned,
    /// IPv4 주소
    Ipv4,
    /// IPv6 주소
    Ipv6,
    /// epoch 기준 초
    Seconds,
}

/// 컨테이너에서 필드가 차지하는 쪽
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FieldRole {
    /// 복합 키
    Key,
    /// 복합 카운터
    Counter,
}

impl FieldRole {
    /// 진단 메시지용 이름
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Key => "key",
            Self::Counter => "counter",
        }
    }
}

impl fmt::Display for FieldRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 텍스트 파싱/표시 방식
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextFormat {
    /// 10진 정수
    Integer,
    /// IP 주소
    Ip,
    /// 날짜/시간
    Time,
    /// TCP 플래그 문자 (FSRPAUEC)
    TcpFlags,
    /// TCP 상태 속성 문자 (TCFS)
    TcpState,
    /// 센서 이름
    Sensor,
    /// flowtype 클래스 이름
    FlowClass,
    /// flowtype 타입 이름
    FlowType,
    /// 2글자 국가 코드
    Country,
}

struct FieldInfo {
    kind: FieldKind,
    id: u16,
    name: &'static str,
    width: u8,
    value_type: ValueType,
    format: TextFormat,
}

macro_rules! field {
    ($kind:ident, $id:expr, $name:expr, $width:expr, $vt:ident, $fmt:ident) => {
        FieldInfo {
            kind: FieldKind::$kind,
            id: $id,
            name: $name,
            width: $width,
            value_type: ValueType::$vt,
            format: TextFormat::$fmt,
        }
    };
}

// FieldKind 선언 순서와 일치해야 함 (인덱스 = discriminant)
static CATALOG: [FieldInfo; 46] = [
    field!(SIpv4, 0, "sIPv4", 4, Ipv4, Ip),
    field!(DIpv4, 1, "dIPv4", 4, Ipv4, Ip),
    field!(SPort, 2, "sPort", 2, Unsigned, Integer),
    field!(DPort, 3, "dPort", 2, Unsigned, Integer),
    field!(Protocol, 4, "protocol", 1, Unsigned, Integer),
    field!(Packets, 5, "packets", 4, Unsigned, Integer),
    field!(Bytes, 6, "bytes", 4, Unsigned, Integer),
    field!(Flags, 7, "flags", 1, Unsigned, TcpFlags),
    field!(STime, 8, "sTime", 4, Seconds, Time),
    field!(Duration, 9, "duration", 4, Unsigned, Integer),
    field!(ETime, 10, "eTime", 4, Seconds, Time),
    field!(Sensor, 11, "sensor", 2, Unsigned, Sensor),
    field!(Input, 12, "input", 2, Unsigned, Integer),
    field!(Output, 13, "output", 2, Unsigned, Integer),
    field!(NhIpv4, 14, "nhIPv4", 4, Ipv4, Ip),
    field!(InitialFlags, 15, "initialFlags", 1, Unsigned, TcpFlags),
    field!(SessionFlags, 16, "sessionFlags", 1, Unsigned, TcpFlags),
    field!(Attributes, 17, "attributes", 1, Unsigned, TcpState),
    field!(Application, 18, "application", 2, Unsigned, Integer),
    field!(Class, 19, "class", 1, Unsigned, FlowClass),
    field!(Type, 20, "type", 1, Unsigned, FlowType),
    field!(IcmpType, 24, "icmpType", 1, Unsigned, Integer),
    field!(IcmpCode, 25, "icmpCode", 1, Unsigned, Integer),
    field!(SIpv6, 26, "sIPv6", 16, Ipv6, Ip),
    field!(DIpv6, 27, "dIPv6", 16, Ipv6, Ip),
    field!(NhIpv6, 28, "nhIPv6", 16, Ipv6, Ip),
    field!(AnyIpv4, 29, "any-IPv4", 4, Ipv4, Ip),
    field!(AnyIpv6, 30, "any-IPv6", 16, Ipv6, Ip),
    field!(AnyPort, 31, "any-port", 2, Unsigned, Integer),
    field!(AnySnmp, 32, "any-snmp", 2, Unsigned, Integer),
    field!(AnyTime, 33, "any-time", 4, Seconds, Time),
    field!(CustomKey, 34, "custom-key", 8, Unsigned, Integer),
    field!(SipCountry, 35, "scc", 2, Unsigned, Country),
    field!(DipCountry, 36, "dcc", 2, Unsigned, Country),
    field!(AnyCountry, 37, "any-cc", 2, Unsigned, Country),
    field!(SipPmap, 38, "sip-pmap", 4, Unsigned, Integer),
    field!(DipPmap, 39, "dip-pmap", 4, Unsigned, Integer),
    field!(AnyIpPmap, 40, "any-ip-pmap", 4, Unsigned, Integer),
    field!(SportPmap, 41, "sport-pmap", 4, Unsigned, Integer),
    field!(DportPmap, 42, "dport-pmap", 4, Unsigned, Integer),
    field!(AnyPortPmap, 43, "any-port-pmap", 4, Unsigned, Integer),
    field!(Records, 0xC000, "records", 8, Unsigned, Integer),
    field!(SumPackets, 0xC001, "sum-packets", 8, Unsigned, Integer),
    field!(SumBytes, 0xC002, "sum-bytes", 8, Unsigned, Integer),
    field!(SumDuration, 0xC003, "sum-duration", 8, Unsigned, Integer),
    field!(CustomCounter, 0xC004, "custom-counter", 8, Unsigned, Integer),
];

/// 카운터 필드 ID의 시작값
const FIRST_COUNTER_ID: u16 = 0xC000;

/// 별칭 — 정규 이름 다음으로 조회됨
const ALIASES: &[(&str, FieldKind)] = &[
    ("flows", FieldKind::Records),
    ("bytes", FieldKind::SumBytes),
    ("packets", FieldKind::SumPackets),
    ("sip-country", FieldKind::SipCountry),
    ("dip-country", FieldKind::DipCountry),
    ("any-country", FieldKind::AnyCountry),
];

impl FieldKind {
    fn info(self) -> &'static FieldInfo {
        &CATALOG[self as usize]
    }

    /// 와이어 포맷 ID
    pub fn id(self) -> u16 {
        self.info().id
    }

    /// 정규 이름
    pub fn name(self) -> &'static str {
        self.info().name
    }

    /// 와이어 폭 (바이트)
    pub fn width(self) -> usize {
        usize::from(self.info().width)
    }

    /// 의미 타입
    pub fn value_type(self) -> ValueType {
        self.info().value_type
    }

    /// 텍스트 표현 방식
    pub fn text_format(self) -> TextFormat {
        self.info().format
    }

    /// 키 / 카운터 역할
    pub fn role(self) -> FieldRole {
        if self.id() >= FIRST_COUNTER_ID {
            FieldRole::Counter
        } else {
            FieldRole::Key
        }
    }

    /// IP 주소 타입 필드인지 여부
    pub fn is_ip(self) -> bool {
        matches!(self.value_type(), ValueType::Ipv4 | ValueType::Ipv6)
    }

    /// 정수 필드가 표현할 수 있는 최대값 (IP 필드는 None)
    pub fn max_unsigned(self) -> Option<u64> {
        if self.is_ip() {
            return None;
        }
        Some(match self.width() {
            1 => u64::from(u8::MAX),
            2 => u64::from(u16::MAX),
            4 => u64::from(u32::MAX),
            _ => u64::MAX,
        })
    }

    /// 와이어 ID로 필드를 찾습니다.
    pub fn from_id(id: u16) -> Option<Self> {
        CATALOG.iter().find(|info| info.id == id).map(|info| info.kind)
    }

    /// 전체 카탈로그 (키 다음 카운터, 카탈로그 순서)
    pub fn all() -> impl Iterator<Item = FieldKind> {
        CATALOG.iter().map(|info| info.kind)
    }

    /// 키 필드만 카탈로그 순서로
    pub fn keys() -> impl Iterator<Item = FieldKind> {
        Self::all().filter(|k| k.role() == FieldRole::Key)
    }

    /// 카운터 필드만 카탈로그 순서로
    pub fn counters() -> impl Iterator<Item = FieldKind> {
        Self::all().filter(|k| k.role() == FieldRole::Counter)
    }

    /// 이름으로 필드를 찾습니다 (역할 제한 없음).
    pub fn lookup(name: &str) -> Result<Self, FieldError> {
        lookup_name(name, None)
    }

    /// 지정한 역할의 필드 중에서 이름으로 찾습니다.
    ///
    /// 카운터 쪽에서는 `bytes`, `packets`가 `sum-bytes`, `sum-packets`로 해석됩니다.
    pub fn lookup_in(name: &str, role: FieldRole) -> Result<Self, FieldError> {
        lookup_name(name, Some(role))
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 정규 이름 → 별칭 → 고유 접두어 순서로 조회
fn lookup_name(name: &str, role: Option<FieldRole>) -> Result<FieldKind, FieldError> {
    let name = name.trim();
    let unknown = || FieldError::UnknownField {
        name: name.to_owned(),
    };
    if name.is_empty() {
        return Err(unknown());
    }
    let in_role = |kind: &FieldKind| role.is_none_or(|r| kind.role() == r);

    if let Some(kind) = FieldKind::all()
        .filter(in_role)
        .find(|k| k.name().eq_ignore_ascii_case(name))
    {
        return Ok(kind);
    }

    if let Some(&(_, kind)) = ALIASES
        .iter()
        .filter(|(_, k)| in_role(k))
        .find(|(alias, _)| alias.eq_ignore_ascii_case(name))
    {
        return Ok(kind);
    }

    let lowered = name.to_ascii_lowercase();
    let mut matches: Vec<FieldKind> = FieldKind::all()
        .filter(in_role)
        .filter(|k| k.name().to_ascii_lowercase().starts_with(&lowered))
        .chain(
            ALIASES
                .iter()
                .filter(|(alias, k)| in_role(k) && alias.starts_with(&lowered))
                .map(|&(_, k)| k),
        )
        .collect();
    matches.sort();
    matches.dedup();

    match matches.as_slice() {
        [] => Err(unknown()),
        [kind] => Ok(*kind),
        many => Err(FieldError::AmbiguousField {
            name: name.to_owned(),
            candidates: many
                .iter()
                .map(|k| k.name())
                .collect::<Vec<_>>()
                .join(", "),
        }),
    }
}
