//! 에러 타입 — 도메인별 에러 정의

/// flowbag 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum FlowbagError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 필드 카탈로그 / 값 / 스키마 에러
    #[error("field error: {0}")]
    Field(#[from] FieldError),

    /// 컨테이너 엔진 에러 (하위 크레이트에서 변환됨)
    #[error("engine error: {0}")]
    Engine(String),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 필드 카탈로그, 값 파싱, 스키마 검증 에러
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FieldError {
    /// 카탈로그에 없는 필드 이름
    #[error("unknown field '{name}'")]
    UnknownField {
        /// 입력된 이름
        name: String,
    },

    /// 둘 이상의 필드와 일치하는 접두어
    #[error("ambiguous field '{name}': matches {candidates}")]
    AmbiguousField {
        /// 입력된 이름
        name: String,
        /// 일치한 필드 이름 목록 (쉼표 구분)
        candidates: String,
    },

    /// 로컬 카탈로그가 모르는 필드 ID
    #[error("unsupported field id {id}")]
    UnsupportedField {
        /// 와이어 포맷의 필드 ID
        id: u16,
    },

    /// 필드 값 파싱 / 범위 검사 실패
    #[error("invalid value '{input}' for field {field}: {reason}")]
    InvalidValue {
        /// 필드 이름
        field: String,
        /// 입력 문자열 (또는 값 표현)
        input: String,
        /// 실패 사유
        reason: String,
    },

    /// 튜플 길이 / 필드 종류 불일치
    #[error("schema mismatch: {reason}")]
    SchemaMismatch {
        /// 불일치 사유
        reason: String,
    },

    /// 키 또는 카운터 필드가 하나도 없음
    #[error("empty {side} schema")]
    EmptySchema {
        /// "key" 또는 "counter"
        side: String,
    },
}
