#![doc = include_str!("../README.md")]

pub mod catalog;
pub mod config;
pub mod error;
pub mod field_text;
pub mod lookup;
pub mod metrics;
pub mod schema;
pub mod types;
pub mod value;

// --- 주요 타입 re-export ---
// 각 모듈의 핵심 타입을 크레이트 루트에서 바로 사용할 수 있도록 합니다.

// 에러
pub use error::{ConfigError, FieldError, FlowbagError};

// 설정
pub use config::FlowbagConfig;

// 필드 카탈로그 / 값 / 스키마
pub use catalog::{FieldKind, FieldRole, TextFormat, ValueType};
pub use schema::Schema;
pub use value::FieldValue;

// 텍스트 변환
pub use field_text::{RenderOptions, parse_field_value, render_field_value};

// 외부 협력자 trait
pub use lookup::{CountryLookup, IpSetLookup, PmapContent, PmapKey, PrefixMap, SiteLookup};

// 도메인 타입
pub use types::{FlowRecord, TcpFlags, TcpState};
