//! 설정 관리 — flowbag.toml 파싱 및 런타임 설정
//!
//! [`FlowbagConfig`]는 CLI와 누산기가 공유하는 최상위 설정 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`FLOWBAG_GENERAL_LOG_LEVEL=debug` 형식)
//! 3. 설정 파일 (`flowbag.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), flowbag_core::error::FlowbagError> {
//! use flowbag_core::config::FlowbagConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = FlowbagConfig::load("flowbag.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = FlowbagConfig::parse("[general]\nlog_level = \"debug\"")?;
//! # Ok(())
//! # }
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, FlowbagError};
use crate::lookup::SiteLookup;

/// 표준 출력을 뜻하는 출력 경로
pub const STDOUT_PATH: &str = "-";

/// flowbag 통합 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowbagConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 출력 헤더 기본값
    #[serde(default)]
    pub output: OutputConfig,
    /// 사이트 설정 (센서 / 클래스 / 타입 이름)
    #[serde(default)]
    pub site: SiteConfig,
    /// 레코드 누산기 설정
    #[serde(default)]
    pub accumulator: AccumulatorSection,
}

impl FlowbagConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, FlowbagError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, FlowbagError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                FlowbagError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                FlowbagError::Io(e)
            }
        })?;
        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, FlowbagError> {
        toml::from_str(toml_str).map_err(|e| {
            FlowbagError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `FLOWBAG_{SECTION}_{FIELD}`
    /// 예: `FLOWBAG_ACCUMULATOR_COUNTRY_CODES=/etc/flowbag/cc.txt`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "FLOWBAG_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "FLOWBAG_GENERAL_LOG_FORMAT");

        // Output
        override_bool(
            &mut self.output.invocation_strip,
            "FLOWBAG_OUTPUT_INVOCATION_STRIP",
        );
        override_bool(&mut self.output.notes_strip, "FLOWBAG_OUTPUT_NOTES_STRIP");

        // Accumulator
        override_csv(&mut self.accumulator.pmaps, "FLOWBAG_ACCUMULATOR_PMAPS");
        override_string(
            &mut self.accumulator.country_codes,
            "FLOWBAG_ACCUMULATOR_COUNTRY_CODES",
        );
        override_string(
            &mut self.accumulator.input_format,
            "FLOWBAG_ACCUMULATOR_INPUT_FORMAT",
        );
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), FlowbagError> {
        // log_level 검증
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "general.log_level".to_owned(),
                reason: format!("must be one of: {}", valid_levels.join(", ")),
            }
            .into());
        }

        // log_format 검증
        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "general.log_format".to_owned(),
                reason: format!("must be one of: {}", valid_formats.join(", ")),
            }
            .into());
        }

        // 입력 형식 검증
        if self.accumulator.input_format != "json" {
            return Err(ConfigError::InvalidValue {
                field: "accumulator.input_format".to_owned(),
                reason: "must be one of: json".to_owned(),
            }
            .into());
        }

        // pmap 항목 검증 (형식 + 이름 중복)
        self.accumulator.pmap_entries()?;

        // 출력 검증
        let mut stdout_outputs = 0;
        for (idx, output) in self.accumulator.outputs.iter().enumerate() {
            if output.keys.trim().is_empty() || output.counters.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: format!("accumulator.outputs[{}]", idx),
                    reason: "keys and counters must not be empty".to_owned(),
                }
                .into());
            }
            if output.path.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: format!("accumulator.outputs[{}].path", idx),
                    reason: "path must not be empty".to_owned(),
                }
                .into());
            }
            if output.path == STDOUT_PATH {
                stdout_outputs += 1;
            }
        }
        if stdout_outputs > 1 {
            return Err(ConfigError::InvalidValue {
                field: "accumulator.outputs".to_owned(),
                reason: "at most one output may write to stdout".to_owned(),
            }
            .into());
        }

        Ok(())
    }
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "pretty".to_owned(),
        }
    }
}

/// 출력 파일 헤더 기본값
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// 입력에서 물려받은 명령 이력을 기록하지 않음
    pub invocation_strip: bool,
    /// 입력에서 물려받은 주석을 기록하지 않음
    pub notes_strip: bool,
}

/// 사이트 설정
///
/// 센서 / flowtype 클래스 / flowtype 타입의 이름과 ID 대응표입니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    /// 센서 이름 → ID
    pub sensors: BTreeMap<String, u16>,
    /// 클래스 이름 → ID
    pub classes: BTreeMap<String, u8>,
    /// 타입 이름 → ID
    pub types: BTreeMap<String, u8>,
}

impl SiteLookup for SiteConfig {
    fn sensor_id(&self, name: &str) -> Option<u16> {
        self.sensors.get(name).copied()
    }

    fn sensor_name(&self, id: u16) -> Option<&str> {
        reverse(&self.sensors, id)
    }

    fn class_id(&self, name: &str) -> Option<u8> {
        self.classes.get(name).copied()
    }

    fn class_name(&self, id: u8) -> Option<&str> {
        reverse(&self.classes, id)
    }

    fn flowtype_id(&self, name: &str) -> Option<u8> {
        self.types.get(name).copied()
    }

    fn flowtype_name(&self, id: u8) -> Option<&str> {
        reverse(&self.types, id)
    }
}

fn reverse<T: PartialEq + Copy>(table: &BTreeMap<String, T>, id: T) -> Option<&str> {
    table
        .iter()
        .find(|(_, v)| **v == id)
        .map(|(name, _)| name.as_str())
}

/// 레코드 누산기 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccumulatorSection {
    /// 프리픽스 맵 목록 (`NAME=PATH`)
    pub pmaps: Vec<String>,
    /// 국가 코드 테이블 경로 (비어 있으면 국가 필드 사용 불가)
    pub country_codes: String,
    /// 출력 목록
    pub outputs: Vec<OutputSection>,
    /// 레코드 입력 형식 (json)
    pub input_format: String,
}

impl Default for AccumulatorSection {
    fn default() -> Self {
        Self {
            pmaps: Vec::new(),
            country_codes: String::new(),
            outputs: Vec::new(),
            input_format: "json".to_owned(),
        }
    }
}

impl AccumulatorSection {
    /// `NAME=PATH` 항목을 분해합니다.
    ///
    /// 형식이 잘못되었거나 이름이 비었거나 중복되면 에러를 반환합니다.
    pub fn pmap_entries(&self) -> Result<Vec<(String, PathBuf)>, ConfigError> {
        let mut seen = HashSet::new();
        let mut entries = Vec::with_capacity(self.pmaps.len());
        for raw in &self.pmaps {
            let (name, path) = parse_pmap_entry(raw)?;
            if !seen.insert(name.clone()) {
                return Err(ConfigError::InvalidValue {
                    field: "accumulator.pmaps".to_owned(),
                    reason: format!("duplicate prefix map name '{}'", name),
                });
            }
            entries.push((name, path));
        }
        Ok(entries)
    }
}

/// `NAME=PATH` 문자열 하나를 분해합니다.
pub fn parse_pmap_entry(raw: &str) -> Result<(String, PathBuf), ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidValue {
        field: "accumulator.pmaps".to_owned(),
        reason: format!("'{}': {}", raw, reason),
    };
    let (name, path) = raw
        .split_once('=')
        .ok_or_else(|| invalid("expected NAME=PATH"))?;
    let name = name.trim();
    let path = path.trim();
    if name.is_empty() {
        return Err(invalid("prefix map name must not be empty"));
    }
    if path.is_empty() {
        return Err(invalid("prefix map path must not be empty"));
    }
    Ok((name.to_owned(), PathBuf::from(path)))
}

/// 출력 하나의 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSection {
    /// 키 필드 목록 (쉼표 구분, `NAME[MAP]` 허용)
    pub keys: String,
    /// 카운터 필드 목록 (쉼표 구분)
    pub counters: String,
    /// 출력 경로 (`-`는 표준 출력)
    pub path: String,
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<bool>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse bool from env var, ignoring"
            ),
        }
    }
}

fn override_csv(target: &mut Vec<String>, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val
            .split(',')
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty())
            .collect();
    }
}
