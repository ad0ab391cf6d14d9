//! 필드 텍스트 변환 — `FIELD=VALUE` 값 파싱과 사람이 읽는 표시
//!
//! # 값 형식
//! - 정수: 10진수, 필드 폭 범위 검사
//! - IP: 일반 표기. IPv4 필드는 IPv6 입력을 강등하고, IPv6 필드는 IPv4 입력을 승격
//! - 시간: epoch 초 또는 `YYYY/MM/DD[:HH[:MM[:SS[.sss]]]]` (소수 초는 버림)
//! - TCP 플래그 / 상태: 문자 또는 정수
//! - 센서 / 클래스 / 타입: 정수 또는 사이트 설정의 이름
//! - 국가: 2글자 코드

use std::net::{IpAddr, Ipv4Addr};
use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate};
use regex::Regex;

use crate::catalog::{FieldKind, TextFormat, ValueType};
use crate::error::FieldError;
use crate::lookup::{SiteLookup, decode_country_code, encode_country_code};
use crate::types::{TCP_STATE_ATTRIBUTE_MASK, TcpFlags, TcpState};
use crate::value::FieldValue;

const DATETIME_PATTERN: &str =
    r"^(\d{4})/(\d{1,2})/(\d{1,2})(?:[:T](\d{1,2})(?::(\d{1,2})(?::(\d{1,2})(?:\.\d*)?)?)?)?$";

/// 날짜/시간 정규식 (최초 사용 시 컴파일)
fn datetime_regex() -> Option<&'static Regex> {
    static DATETIME: OnceLock<Option<Regex>> = OnceLock::new();
    DATETIME
        .get_or_init(|| Regex::new(DATETIME_PATTERN).ok())
        .as_ref()
}

fn invalid(kind: FieldKind, input: &str, reason: impl Into<String>) -> FieldError {
    FieldError::InvalidValue {
        field: kind.name().to_owned(),
        input: input.to_owned(),
        reason: reason.into(),
    }
}

/// 필드 종류에 맞게 텍스트 값을 파싱합니다.
///
/// `site`가 없으면 센서/클래스/타입은 정수만 허용됩니다.
pub fn parse_field_value(
    kind: FieldKind,
    text: &str,
    site: Option<&dyn SiteLookup>,
) -> Result<FieldValue, FieldError> {
    let input = text.trim();
    if input.is_empty() {
        return Err(invalid(kind, text, "empty value"));
    }

    let value = match kind.text_format() {
        TextFormat::Integer => FieldValue::Unsigned(parse_unsigned(kind, input)?),
        TextFormat::Ip => parse_ip(kind, input)?,
        TextFormat::Time => FieldValue::Unsigned(
            parse_time(input).map_err(|reason| invalid(kind, input, reason))?,
        ),
        TextFormat::TcpFlags => {
            if is_digits(input) {
                FieldValue::Unsigned(parse_unsigned(kind, input)?)
            } else {
                let flags = TcpFlags::parse_letters(input).map_err(|c| {
                    invalid(kind, input, format!("unexpected TCP flag character '{}'", c))
                })?;
                FieldValue::Unsigned(u64::from(flags.bits()))
            }
        }
        TextFormat::TcpState => {
            if is_digits(input) {
                let raw = parse_unsigned(kind, input)?;
                FieldValue::Unsigned(raw & u64::from(TCP_STATE_ATTRIBUTE_MASK))
            } else {
                let state = TcpState::parse_letters(input).map_err(|c| {
                    invalid(kind, input, format!("unexpected attribute character '{}'", c))
                })?;
                FieldValue::Unsigned(u64::from(state.bits()))
            }
        }
        TextFormat::Sensor => {
            site_value(kind, input, site.and_then(|s| s.sensor_id(input)).map(u64::from))?
        }
        TextFormat::FlowClass => {
            site_value(kind, input, site.and_then(|s| s.class_id(input)).map(u64::from))?
        }
        TextFormat::FlowType => {
            site_value(kind, input, site.and_then(|s| s.flowtype_id(input)).map(u64::from))?
        }
        TextFormat::Country => {
            let code = encode_country_code(input)
                .ok_or_else(|| invalid(kind, input, "expected a two-letter country code"))?;
            FieldValue::Unsigned(u64::from(code))
        }
    };

    value
        .conform(kind)
        .map_err(|e| invalid(kind, input, e.to_string()))
}

fn is_digits(text: &str) -> bool {
    !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit())
}

fn parse_unsigned(kind: FieldKind, input: &str) -> Result<u64, FieldError> {
    let value: u64 = input
        .parse()
        .map_err(|e: std::num::ParseIntError| invalid(kind, input, e.to_string()))?;
    let max = kind.max_unsigned().unwrap_or(u64::MAX);
    if value > max {
        return Err(invalid(kind, input, format!("value exceeds {}", max)));
    }
    Ok(value)
}

fn parse_ip(kind: FieldKind, input: &str) -> Result<FieldValue, FieldError> {
    if let Ok(addr) = input.parse::<IpAddr>() {
        let value = FieldValue::from(addr);
        return match kind.value_type() {
            ValueType::Ipv4 => value
                .demote_to_v4()
                .ok_or_else(|| invalid(kind, input, "IPv6 address is not representable as IPv4")),
            _ => Ok(value.promote_to_v6()),
        };
    }
    // IPv4 필드는 정수 표기도 허용
    if kind.value_type() == ValueType::Ipv4 && is_digits(input) {
        let raw: u32 = input
            .parse()
            .map_err(|e: std::num::ParseIntError| invalid(kind, input, e.to_string()))?;
        return Ok(FieldValue::Ipv4(Ipv4Addr::from(raw)));
    }
    Err(invalid(kind, input, "invalid IP address"))
}

fn site_value(kind: FieldKind, input: &str, by_name: Option<u64>) -> Result<FieldValue, FieldError> {
    if is_digits(input) {
        return parse_unsigned(kind, input).map(FieldValue::Unsigned);
    }
    by_name
        .map(FieldValue::Unsigned)
        .ok_or_else(|| invalid(kind, input, format!("unknown {} name", kind)))
}

/// 시간 문자열을 epoch 초로 파싱합니다.
///
/// 숫자만 있으면 epoch 초, 아니면 `YYYY/MM/DD[:HH[:MM[:SS[.sss]]]]` (UTC).
/// 소수 초는 반올림하지 않고 버립니다.
pub fn parse_time(input: &str) -> Result<u64, String> {
    if is_digits(input) {
        return input.parse::<u64>().map_err(|e| e.to_string());
    }
    let re = datetime_regex().ok_or_else(|| "datetime parser unavailable".to_owned())?;
    let caps = re
        .captures(input)
        .ok_or_else(|| "expected epoch seconds or YYYY/MM/DD[:HH[:MM[:SS]]]".to_owned())?;

    let num = |idx: usize| -> Result<u32, String> {
        match caps.get(idx) {
            Some(m) => m.as_str().parse::<u32>().map_err(|e| e.to_string()),
            None => Ok(0),
        }
    };
    let year = i32::try_from(num(1)?).map_err(|e| e.to_string())?;
    let date = NaiveDate::from_ymd_opt(year, num(2)?, num(3)?)
        .ok_or_else(|| "invalid calendar date".to_owned())?;
    let datetime = date
        .and_hms_opt(num(4)?, num(5)?, num(6)?)
        .ok_or_else(|| "invalid time of day".to_owned())?;
    let secs = datetime.and_utc().timestamp();
    u64::try_from(secs).map_err(|_| "time before the epoch".to_owned())
}

/// epoch 초를 `YYYY/MM/DDTHH:MM:SS` (UTC)로 표시합니다.
pub fn format_time(secs: u64) -> String {
    i64::try_from(secs)
        .ok()
        .and_then(|s| DateTime::from_timestamp(s, 0))
        .map(|dt| dt.format("%Y/%m/%dT%H:%M:%S").to_string())
        .unwrap_or_else(|| secs.to_string())
}

/// 표시 옵션
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderOptions {
    /// 센서를 이름 대신 정수로 표시
    pub integer_sensors: bool,
    /// TCP 플래그를 문자 대신 정수로 표시
    pub integer_tcp_flags: bool,
    /// 시간을 epoch 초로 표시
    pub epoch_time: bool,
}

/// 필드 값을 사람이 읽는 문자열로 표시합니다.
pub fn render_field_value(
    kind: FieldKind,
    value: &FieldValue,
    opts: &RenderOptions,
    site: Option<&dyn SiteLookup>,
) -> String {
    let raw = match value {
        FieldValue::Unsigned(v) => *v,
        ip => return ip.to_string(),
    };
    match kind.text_format() {
        TextFormat::Integer | TextFormat::Ip => raw.to_string(),
        TextFormat::Time if opts.epoch_time => raw.to_string(),
        TextFormat::Time => format_time(raw),
        TextFormat::TcpFlags if opts.integer_tcp_flags => raw.to_string(),
        TextFormat::TcpFlags => TcpFlags::from_bits_retain(raw as u8).to_string(),
        TextFormat::TcpState => TcpState::from_bits_retain(raw as u8).to_string(),
        TextFormat::Sensor if opts.integer_sensors => raw.to_string(),
        TextFormat::Sensor => u16::try_from(raw)
            .ok()
            .and_then(|id| site.and_then(|s| s.sensor_name(id)))
            .map_or_else(|| raw.to_string(), str::to_owned),
        TextFormat::FlowClass => u8::try_from(raw)
            .ok()
            .and_then(|id| site.and_then(|s| s.class_name(id)))
            .map_or_else(|| raw.to_string(), str::to_owned),
        TextFormat::FlowType => u8::try_from(raw)
            .ok()
            .and_then(|id| site.and_then(|s| s.flowtype_name(id)))
            .map_or_else(|| raw.to_string(), str::to_owned),
        TextFormat::Country => decode_country_code(raw as u16),
    }
}

/// 열 정렬용 표시 폭
pub fn text_width(kind: FieldKind, opts: &RenderOptions) -> usize {
    match kind.text_format() {
        TextFormat::Ip if kind.value_type() == ValueType::Ipv4 => 15,
        TextFormat::Ip => 39,
        TextFormat::Time if opts.epoch_time => 10,
        TextFormat::Time => 19,
        TextFormat::TcpFlags if opts.integer_tcp_flags => 3,
        TextFormat::TcpFlags => 8,
        TextFormat::TcpState => 4,
        TextFormat::Country => 2,
        TextFormat::Integer | TextFormat::Sensor | TextFormat::FlowClass | TextFormat::FlowType => {
            kind.max_unsigned().unwrap_or(u64::MAX).to_string().len()
        }
    }
}
