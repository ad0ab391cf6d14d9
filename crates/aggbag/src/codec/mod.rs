//! 바이너리 코덱 -- Aggregate Bag / 레거시 Bag 파일
//!
//! 두 형식 모두 8바이트 preamble과 헤더 엔트리 목록으로 시작합니다 ([`header`] 참조).
//! [`read_container`]는 preamble의 형식 바이트를 보고 알맞은 리더로 분기합니다.
//!
//! # 경로 쓰기
//! [`write_to_path`]는 대상 디렉토리에 임시 파일을 만들고 쓰기가 끝까지 성공했을 때만
//! 대상 경로로 옮깁니다. 실패하면 기존 파일은 그대로 남습니다.

pub mod aggbag_file;
pub mod bag_file;
pub mod header;

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use flowbag_core::metrics as fb_metrics;
use tempfile::NamedTempFile;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub use aggbag_file::{read_aggbag, write_aggbag};
pub use bag_file::{read_bag, write_bag};
pub use header::{FORMAT_AGGBAG, FORMAT_BAG, Preamble};

use crate::aggbag::AggBag;
use crate::bag::Bag;
use crate::error::AggBagError;
use header::HeaderEntry;

/// 현재 Aggregate Bag 레코드 버전
pub const AGGBAG_VERSION: u8 = 1;

/// 쓰기 시 헤더 정보 처리 옵션
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// 이번 실행의 명령줄 (명령 이력에 덧붙임)
    pub invocation: Option<String>,
    /// 명령 이력을 기록하지 않음
    pub invocation_strip: bool,
    /// 주석을 기록하지 않음
    pub notes_strip: bool,
}

/// 형식을 모르는 채로 읽은 컨테이너
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Container {
    /// Aggregate Bag 파일
    AggBag(AggBag),
    /// 레거시 Bag 파일
    Bag(Bag),
}

impl Container {
    /// [`AggBag`]으로 바꿉니다 (Bag은 1×1 스키마가 됨).
    pub fn into_aggbag(self) -> AggBag {
        match self {
            Self::AggBag(bag) => bag,
            Self::Bag(bag) => bag.into_aggbag(),
        }
    }

    /// 형식 이름 (`aggbag` / `bag`)
    pub fn format_name(&self) -> &'static str {
        match self {
            Self::AggBag(_) => "aggbag",
            Self::Bag(_) => "bag",
        }
    }
}

/// preamble을 보고 Aggregate Bag 또는 Bag으로 읽습니다.
pub fn read_container<R: Read>(
    mut src: R,
    cancel: Option<&CancellationToken>,
) -> Result<Container, AggBagError> {
    let preamble = header::read_preamble(&mut src)?;
    let container = match preamble.format {
        FORMAT_AGGBAG => Container::AggBag(aggbag_file::read_aggbag_body(preamble, src, cancel)?),
        FORMAT_BAG => Container::Bag(bag_file::read_bag_body(preamble, src, cancel)?),
        other => {
            return Err(AggBagError::corrupt(format!(
                "unknown file format 0x{:02x}",
                other
            )));
        }
    };
    metrics::counter!(
        fb_metrics::CODEC_FILES_READ_TOTAL,
        fb_metrics::LABEL_FORMAT => container.format_name()
    )
    .increment(1);
    Ok(container)
}

/// 파일 경로에서 컨테이너를 읽습니다.
pub fn read_from_path(
    path: &Path,
    cancel: Option<&CancellationToken>,
) -> Result<Container, AggBagError> {
    let file = File::open(path)?;
    let container = read_container(BufReader::new(file), cancel)?;
    info!(path = %path.display(), format = container.format_name(), "loaded container");
    Ok(container)
}

/// 임시 파일에 쓴 뒤 성공하면 `path`로 옮깁니다.
pub fn write_to_path<F>(path: &Path, write: F) -> Result<(), AggBagError>
where
    F: FnOnce(&mut dyn Write) -> Result<(), AggBagError>,
{
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let tmp = NamedTempFile::new_in(dir)?;
    let mut writer = BufWriter::new(tmp);
    write(&mut writer)?;
    let tmp = writer
        .into_inner()
        .map_err(|e| AggBagError::Io(e.into_error()))?;
    tmp.persist(path).map_err(|e| AggBagError::Io(e.error))?;
    Ok(())
}

/// Aggregate Bag을 파일 경로에 씁니다.
pub fn write_aggbag_to_path(
    bag: &AggBag,
    path: &Path,
    opts: &WriteOptions,
) -> Result<(), AggBagError> {
    write_to_path(path, |w| write_aggbag(bag, w, opts))?;
    record_file_written("aggbag", path);
    Ok(())
}

/// Bag을 파일 경로에 씁니다.
pub fn write_bag_to_path(bag: &Bag, path: &Path, opts: &WriteOptions) -> Result<(), AggBagError> {
    write_to_path(path, |w| write_bag(bag, w, opts))?;
    record_file_written("bag", path);
    Ok(())
}

fn record_file_written(format: &'static str, path: &Path) {
    metrics::counter!(fb_metrics::CODEC_FILES_WRITTEN_TOTAL, fb_metrics::LABEL_FORMAT => format)
        .increment(1);
    info!(path = %path.display(), format, "wrote container");
}

/// 컨테이너의 주석/명령 이력을 옵션에 맞춰 헤더 엔트리로 만듭니다.
pub(crate) fn provenance_entries(bag: &AggBag, opts: &WriteOptions) -> Vec<HeaderEntry> {
    let mut entries = Vec::new();
    if !opts.notes_strip {
        entries.extend(
            bag.annotations()
                .iter()
                .map(|note| HeaderEntry::Annotation(note.clone())),
        );
    }
    if !opts.invocation_strip {
        let lines: Vec<String> = bag
            .invocations()
            .iter()
            .cloned()
            .chain(opts.invocation.clone())
            .collect();
        entries.extend(lines.into_iter().map(|line| HeaderEntry::Invocation(vec![line])));
    }
    entries
}

/// 고정 폭 행 하나를 읽습니다.
///
/// 깔끔한 EOF면 `false`, 행 중간에서 끝나면 `Corrupt`.
pub(crate) fn read_row<R: Read>(src: &mut R, row: &mut [u8]) -> Result<bool, AggBagError> {
    let mut filled = 0;
    while filled < row.len() {
        match src.read(&mut row[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(AggBagError::Io(e)),
        }
    }
    match filled {
        0 => Ok(false),
        n if n == row.len() => Ok(true),
        n => Err(AggBagError::corrupt(format!(
            "partial row: {} of {} bytes",
            n,
            row.len()
        ))),
    }
}

/// 1~8바이트 빅엔디언 정수
pub(crate) fn be_uint(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .take(8)
        .fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
}

pub(crate) fn is_cancelled(cancel: Option<&CancellationToken>) -> bool {
    cancel.is_some_and(|token| token.is_cancelled())
}
