//! 컨테이너 엔진 에러 타입
//!
//! [`AggBagError`]는 컨테이너, 투영, 필터, 코덱에서 발생하는 모든 에러를 표현합니다.
//! `From<FieldError>`로 카탈로그 에러를 같은 이름의 변형으로 옮기고,
//! `From<AggBagError> for FlowbagError` 변환으로 상위 레이어에서 `?`로 전파할 수 있습니다.
//!
//! 카운터 포화(오버플로)는 에러가 아니라 컨테이너 플래그입니다.

use flowbag_core::error::{FieldError, FlowbagError};

/// 컨테이너 엔진 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum AggBagError {
    /// 튜플 길이나 필드 구성이 스키마와 맞지 않음
    #[error("schema mismatch: {reason}")]
    SchemaMismatch {
        /// 불일치 사유
        reason: String,
    },

    /// 키 또는 카운터 필드가 하나도 남지 않음
    #[error("empty {side} schema")]
    EmptySchema {
        /// 비어 있는 쪽 (key / counter)
        side: String,
    },

    /// 카탈로그에 없는 필드 이름
    #[error("unknown field '{name}'")]
    UnknownField {
        /// 입력된 이름
        name: String,
    },

    /// 둘 이상의 필드와 일치하는 이름
    #[error("ambiguous field '{name}': matches {candidates}")]
    AmbiguousField {
        /// 입력된 이름
        name: String,
        /// 일치한 필드 목록
        candidates: String,
    },

    /// 로컬 카탈로그가 모르는 필드 ID
    #[error("unsupported field id {id}")]
    UnsupportedField {
        /// 파일에 기록된 ID
        id: u16,
    },

    /// 필드 값 파싱 실패
    #[error("invalid value '{input}' for {field}: {reason}")]
    InvalidValue {
        /// 필드 이름
        field: String,
        /// 입력 텍스트
        input: String,
        /// 실패 사유
        reason: String,
    },

    /// 직렬화된 입력의 구조 불변식 위반
    #[error("corrupt input: {reason}")]
    Corrupt {
        /// 위반 내용
        reason: String,
    },

    /// magic은 맞지만 모르는 레코드 버전
    #[error("unsupported {format} version {version}")]
    UnsupportedVersion {
        /// 파일 형식 이름
        format: String,
        /// 파일에 기록된 버전
        version: u8,
    },

    /// 지원하지 않는 압축 방식
    #[error("unsupported compression method {method}")]
    UnsupportedCompression {
        /// 파일에 기록된 압축 방식
        method: u8,
    },

    /// 컨테이너가 변경된 뒤 커서를 사용함
    #[error("cursor invalidated by container mutation")]
    Invalidated,

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// 협력적 취소
    #[error("operation cancelled")]
    Cancelled,

    /// 잘못된 구성 (필드 역할, 필터 대상, 출력 중복 등)
    #[error("configuration error: {reason}")]
    Configuration {
        /// 에러 사유
        reason: String,
    },
}

impl AggBagError {
    /// 구조 위반 에러 생성 헬퍼
    pub(crate) fn corrupt(reason: impl Into<String>) -> Self {
        Self::Corrupt {
            reason: reason.into(),
        }
    }

    /// 구성 에러 생성 헬퍼
    pub(crate) fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }
}

impl From<FieldError> for AggBagError {
    fn from(err: FieldError) -> Self {
        match err {
            FieldError::UnknownField { name } => Self::UnknownField { name },
            FieldError::AmbiguousField { name, candidates } => {
                Self::AmbiguousField { name, candidates }
            }
            FieldError::UnsupportedField { id } => Self::UnsupportedField { id },
            FieldError::InvalidValue {
                field,
                input,
                reason,
            } => Self::InvalidValue {
                field,
                input,
                reason,
            },
            FieldError::SchemaMismatch { reason } => Self::SchemaMismatch { reason },
            FieldError::EmptySchema { side } => Self::EmptySchema { side },
        }
    }
}

impl From<AggBagError> for FlowbagError {
    fn from(err: AggBagError) -> Self {
        match err {
            AggBagError::Io(e) => FlowbagError::Io(e),
            other => FlowbagError::Engine(other.to_string()),
        }
    }
}
