//! 국가 코드 테이블
//!
//! `CIDR CC` 형식의 텍스트 파일을 읽어 IP → 국가 코드 조회를 제공합니다.
//! 일치하는 구간이 없으면 `--`(알 수 없음)를 돌려줍니다.
//!
//! 프로세스 전체에서 한 번만 로드되며, 국가 필드를 처음 사용할 때 [`shared`]로 초기화합니다.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use flowbag_core::CountryLookup;
use flowbag_core::lookup::{UNKNOWN_COUNTRY, encode_country_code};
use ipnetwork::IpNetwork;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::error::AccumulatorError;
use crate::range_map::{RangeMap, ip_key, network_range};

/// IP 구간 → 국가 코드 테이블
#[derive(Debug, Clone, Default)]
pub struct CountryTable {
    /// 구간 → 인코딩된 국가 코드
    ranges: RangeMap<u16>,
}

impl CountryTable {
    /// 텍스트에서 테이블을 파싱합니다.
    pub fn from_text(source: &str, text: &str) -> Result<Self, AccumulatorError> {
        let mut ranges = RangeMap::new();
        for (idx, raw) in text.lines().enumerate() {
            let fail = |reason: String| AccumulatorError::Lookup {
                source_name: source.to_owned(),
                line: idx + 1,
                reason,
            };
            let line = raw.split('#').next().unwrap_or_default().trim();
            if line.is_empty() {
                continue;
            }
            let mut parts = line.split_whitespace();
            let (Some(cidr), Some(cc), None) = (parts.next(), parts.next(), parts.next()) else {
                return Err(fail(format!("expected 'CIDR CC', got '{}'", line)));
            };
            let net: IpNetwork = cidr
                .parse()
                .map_err(|e| fail(format!("invalid network '{}': {}", cidr, e)))?;
            let code = encode_country_code(cc)
                .ok_or_else(|| fail(format!("invalid country code '{}'", cc)))?;
            let (lo, hi) = network_range(&net);
            ranges.assign(lo, hi, code);
        }
        Ok(Self { ranges })
    }

    /// 파일에서 테이블을 읽습니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, AccumulatorError> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path).await?;
        let table = Self::from_text(&path.display().to_string(), &text)?;
        info!(
            path = %path.display(),
            ranges = table.ranges.len(),
            "country code table loaded"
        );
        Ok(table)
    }
}

impl CountryLookup for CountryTable {
    fn country_code(&self, addr: &IpAddr) -> u16 {
        self.ranges.get(ip_key(addr)).unwrap_or(UNKNOWN_COUNTRY)
    }
}

struct SharedTable {
    path: PathBuf,
    table: Arc<CountryTable>,
}

static SHARED: OnceCell<SharedTable> = OnceCell::const_new();

/// 프로세스 공용 국가 코드 테이블
///
/// 첫 호출에서 `path`를 로드하고, 이후 호출은 같은 테이블을 돌려줍니다.
/// 다른 경로로 다시 호출하면 경고만 남기고 처음 로드한 테이블을 사용합니다.
pub async fn shared(path: &Path) -> Result<Arc<CountryTable>, AccumulatorError> {
    let entry = SHARED
        .get_or_try_init(|| async {
            let table = CountryTable::load(path).await?;
            Ok::<_, AccumulatorError>(SharedTable {
                path: path.to_path_buf(),
                table: Arc::new(table),
            })
        })
        .await?;
    if entry.path != path {
        warn!(
            loaded = %entry.path.display(),
            requested = %path.display(),
            "country code table already loaded from another path"
        );
    }
    Ok(Arc::clone(&entry.table))
}
