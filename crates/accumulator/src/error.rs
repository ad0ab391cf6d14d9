//! 레코드 누산기 에러 타입
//!
//! [`AccumulatorError`]는 출력 구성, 참조 파일(프리픽스 맵, 국가 코드) 로딩,
//! 레코드 읽기, 텍스트 빌드에서 발생하는 에러를 표현합니다.
//! 컨테이너 엔진 에러는 [`AccumulatorError::Engine`]으로 감쌉니다.

use flowbag_aggbag::AggBagError;
use flowbag_core::error::{FieldError, FlowbagError};

/// 레코드 누산기 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum AccumulatorError {
    /// 컨테이너 엔진 에러
    #[error(transparent)]
    Engine(#[from] AggBagError),

    /// 잘못된 구성 (stdout 중복, 프리픽스 맵 없음/타입 불일치, 봉인된 컨테이너 변경 등)
    #[error("configuration error: {reason}")]
    Configuration {
        /// 에러 사유
        reason: String,
    },

    /// 입력 레코드/텍스트 줄 처리 실패
    #[error("bad input at line {line}: {reason}")]
    Record {
        /// 1부터 시작하는 줄 번호
        line: u64,
        /// 실패 사유
        reason: String,
    },

    /// 참조 파일(프리픽스 맵, 국가 코드 테이블) 파싱 실패
    #[error("{source_name} line {line}: {reason}")]
    Lookup {
        /// 파일 또는 맵 이름
        source_name: String,
        /// 1부터 시작하는 줄 번호
        line: usize,
        /// 실패 사유
        reason: String,
    },

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// 협력적 취소
    #[error("operation cancelled")]
    Cancelled,
}

impl AccumulatorError {
    /// 구성 에러 생성 헬퍼
    pub(crate) fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }
}

impl From<FieldError> for AccumulatorError {
    fn from(err: FieldError) -> Self {
        Self::Engine(err.into())
    }
}

impl From<AccumulatorError> for FlowbagError {
    fn from(err: AccumulatorError) -> Self {
        match err {
            AccumulatorError::Engine(e) => e.into(),
            AccumulatorError::Io(e) => FlowbagError::Io(e),
            other => FlowbagError::Engine(other.to_string()),
        }
    }
}
