//! 텍스트 빌더 -- 구분자 텍스트나 Bag 파일로 Aggregate Bag 만들기
//!
//! # 입력 형식
//! - 한 줄에 행 하나, 열은 구분자(기본 `|`)로 나눔. 줄 끝의 구분자 하나는 허용
//! - `#` 이후는 주석, 빈 줄은 무시
//! - 열 이름은 필드 목록 옵션 또는 파일의 첫 줄(제목 줄)로 지정. `ignore` 열은 버림
//! - 필드 목록이 있어도 첫 줄이 제목처럼 보이면 건너뜀
//! - 상수 필드(`FIELD=VALUE`)는 모든 행에 더해지고, 같은 이름의 열은 무시됨
//!
//! 파싱할 수 없는 줄은 경고 후 건너뛰고 개수를 셉니다 (`stop_on_error`면 중단).
//! 여러 입력은 모두 같은 스키마여야 합니다.

use std::path::Path;
use std::sync::Arc;

use flowbag_aggbag::{AggBag, AggBagError, Container, read_container};
use flowbag_core::config::STDOUT_PATH;
use flowbag_core::metrics as fb_metrics;
use flowbag_core::{FieldKind, FieldRole, FieldValue, Schema, SiteLookup, parse_field_value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::AccumulatorError;

/// 열 이름으로 쓰이는 무시 표시
pub const IGNORE_COLUMN: &str = "ignore";

/// 텍스트 빌더 옵션
#[derive(Debug, Clone)]
pub struct TextBuildOptions {
    /// 열 이름 목록 (없으면 각 파일의 제목 줄 사용)
    pub fields: Option<Vec<String>>,
    /// 첫 줄을 항상 데이터로 취급 (필드 목록 필요)
    pub no_titles: bool,
    /// 열 구분자
    pub separator: char,
    /// 상수 필드 (`FIELD=VALUE`)
    pub constants: Vec<String>,
    /// 잘못된 줄에서 중단
    pub stop_on_error: bool,
}

impl Default for TextBuildOptions {
    fn default() -> Self {
        Self {
            fields: None,
            no_titles: false,
            separator: '|',
            constants: Vec::new(),
            stop_on_error: false,
        }
    }
}

/// 열 하나의 용도
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Column {
    Field(FieldKind),
    Ignore,
}

/// 입력 하나의 열 배치
#[derive(Debug, Clone)]
struct Layout {
    columns: Vec<Column>,
}

/// 텍스트/Bag 입력을 하나의 Aggregate Bag으로 모으는 빌더
pub struct TextBuilder {
    opts: TextBuildOptions,
    /// 센서/클래스/타입 이름 해석
    site: Option<Arc<dyn SiteLookup>>,
    /// 상수 필드 값
    constants: Vec<(FieldKind, FieldValue)>,
    /// 옵션으로 받은 열 배치
    fixed_layout: Option<Layout>,
    /// 결과 컨테이너 (첫 입력에서 스키마 결정)
    bag: Option<AggBag>,
    /// 건너뛴 줄 수
    bad_lines: u64,
    /// 추가한 행 수
    rows: u64,
}

impl TextBuilder {
    /// 옵션을 검증하고 빌더를 만듭니다.
    pub fn new(
        opts: TextBuildOptions,
        site: Option<Arc<dyn SiteLookup>>,
    ) -> Result<Self, AccumulatorError> {
        if opts.no_titles && opts.fields.is_none() {
            return Err(AccumulatorError::configuration(
                "a field list is required when titles are disabled",
            ));
        }
        if opts.separator == '#' || opts.separator == '\n' {
            return Err(AccumulatorError::configuration(format!(
                "'{}' cannot be used as the column separator",
                opts.separator.escape_default()
            )));
        }

        let mut constants: Vec<(FieldKind, FieldValue)> = Vec::new();
        for raw in &opts.constants {
            let (name, value) = raw.split_once('=').ok_or_else(|| {
                AccumulatorError::configuration(format!(
                    "constant field '{}' must have the form FIELD=VALUE",
                    raw
                ))
            })?;
            let kind = FieldKind::lookup(name)?;
            if constants.iter().any(|(k, _)| *k == kind) {
                return Err(AccumulatorError::configuration(format!(
                    "constant field {} given more than once",
                    kind
                )));
            }
            let value = parse_field_value(kind, value, site.as_deref())?;
            constants.push((kind, value));
        }

        let mut builder = Self {
            opts,
            site,
            constants,
            fixed_layout: None,
            bag: None,
            bad_lines: 0,
            rows: 0,
        };
        if let Some(names) = builder.opts.fields.clone() {
            let layout = builder.layout_from_names(names.iter().map(String::as_str))?;
            builder.fixed_layout = Some(layout);
        }
        Ok(builder)
    }

    /// 건너뛴 줄 수
    pub fn bad_lines(&self) -> u64 {
        self.bad_lines
    }

    /// 추가한 행 수
    pub fn rows(&self) -> u64 {
        self.rows
    }

    fn is_constant(&self, kind: FieldKind) -> bool {
        self.constants.iter().any(|(k, _)| *k == kind)
    }

    fn layout_from_names<'a>(
        &self,
        names: impl Iterator<Item = &'a str>,
    ) -> Result<Layout, AccumulatorError> {
        let mut columns = Vec::new();
        let mut seen = Vec::new();
        for name in names {
            let name = name.trim();
            if name.eq_ignore_ascii_case(IGNORE_COLUMN) {
                columns.push(Column::Ignore);
                continue;
            }
            let kind = FieldKind::lookup(name)?;
            if seen.contains(&kind) {
                return Err(AccumulatorError::configuration(format!(
                    "field {} appears more than once",
                    kind
                )));
            }
            seen.push(kind);
            // 상수로 준 필드의 열은 읽지 않음
            columns.push(if self.is_constant(kind) {
                Column::Ignore
            } else {
                Column::Field(kind)
            });
        }
        Ok(Layout { columns })
    }

    /// 열 배치와 상수 필드로 스키마를 만듭니다.
    fn schemas(&self, layout: &Layout) -> Result<(Schema, Schema), AccumulatorError> {
        let kinds = layout
            .columns
            .iter()
            .filter_map(|c| match c {
                Column::Field(kind) => Some(*kind),
                Column::Ignore => None,
            })
            .chain(self.constants.iter().map(|(k, _)| *k));
        let (keys, counters): (Vec<FieldKind>, Vec<FieldKind>) =
            kinds.partition(|k| k.role() == FieldRole::Key);
        if keys.is_empty() || counters.is_empty() {
            return Err(AccumulatorError::configuration(
                "at least one key field and one counter field are required",
            ));
        }
        Ok((Schema::keys(keys)?, Schema::counters(counters)?))
    }

    /// 결과 컨테이너를 준비하거나 스키마가 같은지 확인합니다.
    fn target(&mut self, keys: Schema, counters: Schema) -> Result<&mut AggBag, AccumulatorError> {
        match &self.bag {
            Some(bag) if *bag.key_schema() != keys || *bag.counter_schema() != counters => {
                return Err(AggBagError::SchemaMismatch {
                    reason: format!(
                        "input fields {} / {} differ from earlier input {} / {}",
                        keys,
                        counters,
                        bag.key_schema(),
                        bag.counter_schema()
                    ),
                }
                .into());
            }
            Some(_) => {}
            None => self.bag = Some(AggBag::new(keys, counters)?),
        }
        self.bag
            .as_mut()
            .ok_or_else(|| AccumulatorError::configuration("no schema established"))
    }

    /// 첫 줄이 제목 줄인지 판단합니다.
    ///
    /// 무시하지 않는 열 중 첫 번째 비어 있지 않은 값이 숫자로 시작하지 않고
    /// 필드 이름으로 해석되면 제목 줄입니다.
    fn looks_like_title(&self, layout: &Layout, line: &str) -> bool {
        line.split(self.opts.separator)
            .zip(layout.columns.iter())
            .filter(|(_, c)| **c != Column::Ignore)
            .map(|(v, _)| v.trim())
            .find(|v| !v.is_empty())
            .is_some_and(|v| {
                !v.starts_with(|c: char| c.is_ascii_digit()) && FieldKind::lookup(v).is_ok()
            })
    }

    fn bad_line(
        &mut self,
        source: &str,
        line: u64,
        reason: String,
    ) -> Result<(), AccumulatorError> {
        if self.opts.stop_on_error {
            return Err(AccumulatorError::Record { line, reason });
        }
        self.bad_lines += 1;
        metrics::counter!(
            fb_metrics::ACCUMULATOR_RECORDS_SKIPPED_TOTAL,
            fb_metrics::LABEL_REASON => "text"
        )
        .increment(1);
        warn!(source, line, reason = %reason, "skipping bad input line");
        Ok(())
    }

    /// 데이터 줄 하나를 처리합니다. 잘못된 줄이면 사유를 돌려줍니다.
    fn process_line(
        &mut self,
        layout: &Layout,
        line: &str,
    ) -> Result<Option<String>, AccumulatorError> {
        let mut values: Vec<&str> = line.split(self.opts.separator).collect();
        if values.len() == layout.columns.len() + 1
            && values.last().is_some_and(|v| v.trim().is_empty())
        {
            values.pop();
        }
        if values.len() < layout.columns.len() {
            return Ok(Some(format!(
                "too few fields: found {} of {} expected",
                values.len(),
                layout.columns.len()
            )));
        }
        if values.len() > layout.columns.len() {
            return Ok(Some(format!(
                "too many fields: text follows delimiter number {}",
                layout.columns.len()
            )));
        }

        let mut key_pairs = Vec::new();
        let mut counter_pairs = Vec::new();
        for (column, text) in layout.columns.iter().zip(values) {
            let Column::Field(kind) = *column else {
                continue;
            };
            let value = match parse_field_value(kind, text, self.site.as_deref()) {
                Ok(value) => value,
                Err(e) => return Ok(Some(e.to_string())),
            };
            match kind.role() {
                FieldRole::Key => key_pairs.push((kind, value)),
                FieldRole::Counter => counter_pairs.push((kind, value)),
            }
        }
        for (kind, value) in &self.constants {
            match kind.role() {
                FieldRole::Key => key_pairs.push((*kind, *value)),
                FieldRole::Counter => counter_pairs.push((*kind, *value)),
            }
        }

        let Some(bag) = self.bag.as_mut() else {
            return Err(AccumulatorError::configuration("no schema established"));
        };
        let key = bag.key_schema().arrange(&key_pairs)?;
        let counters: Vec<u64> = bag
            .counter_schema()
            .arrange(&counter_pairs)?
            .iter()
            .map(|v| v.as_u64().unwrap_or(0))
            .collect();
        bag.add(&key, &counters)?;
        self.rows += 1;
        Ok(None)
    }

    /// 텍스트 입력 하나를 읽어 더합니다. 추가한 행 수를 반환합니다.
    pub async fn add_text<R>(
        &mut self,
        reader: R,
        source: &str,
        cancel: &CancellationToken,
    ) -> Result<u64, AccumulatorError>
    where
        R: AsyncBufRead + Unpin,
    {
        let before = self.rows;
        let mut lines = reader.lines();
        let mut layout = self.fixed_layout.clone();
        let mut line_no = 0u64;
        let mut first = true;

        while let Some(raw) = lines.next_line().await? {
            if cancel.is_cancelled() {
                return Err(AccumulatorError::Cancelled);
            }
            line_no += 1;
            let line = raw.split('#').next().unwrap_or_default();
            if line.trim().is_empty() {
                continue;
            }

            if first {
                first = false;
                match &layout {
                    Some(fixed) => {
                        if !self.opts.no_titles && self.looks_like_title(fixed, line) {
                            debug!(source, line = line_no, "skipping title line");
                            self.ensure_target(fixed)?;
                            continue;
                        }
                        self.ensure_target(fixed)?;
                    }
                    None => {
                        let names = line
                            .split(self.opts.separator)
                            .filter(|n| !n.trim().is_empty());
                        let parsed = self.layout_from_names(names)?;
                        self.ensure_target(&parsed)?;
                        layout = Some(parsed);
                        continue;
                    }
                }
            }

            let Some(current) = layout.as_ref() else {
                continue;
            };
            if let Some(reason) = self.process_line(current, line)? {
                self.bad_line(source, line_no, reason)?;
            }
        }

        let added = self.rows - before;
        info!(source, rows = added, bad_lines = self.bad_lines, "text input consumed");
        Ok(added)
    }

    fn ensure_target(&mut self, layout: &Layout) -> Result<(), AccumulatorError> {
        let (keys, counters) = self.schemas(layout)?;
        self.target(keys, counters)?;
        Ok(())
    }

    /// 텍스트 파일 하나를 더합니다. 경로가 `-`이면 표준 입력을 읽습니다.
    pub async fn add_text_path(
        &mut self,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64, AccumulatorError> {
        if path.as_os_str() == STDOUT_PATH {
            let stdin = BufReader::new(tokio::io::stdin());
            return self.add_text(stdin, "stdin", cancel).await;
        }
        let file = tokio::fs::File::open(path).await?;
        let source = path.display().to_string();
        self.add_text(BufReader::new(file), &source, cancel).await
    }

    /// 이미 읽은 컨테이너(레거시 Bag 포함)를 더합니다.
    ///
    /// 상수 필드와 열 배치는 적용되지 않으며 스키마가 이전 입력과 같아야 합니다.
    pub fn add_container(&mut self, container: Container) -> Result<u64, AccumulatorError> {
        let other = container.into_aggbag();
        let rows = other.len() as u64;
        let target = self.target(other.key_schema().clone(), other.counter_schema().clone())?;
        target.merge_add(&other)?;
        target.extend_provenance(&other);
        self.rows += rows;
        Ok(rows)
    }

    /// 바이너리 컨테이너 파일 하나를 더합니다.
    pub async fn add_binary_path(
        &mut self,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64, AccumulatorError> {
        let mut data = Vec::new();
        if path.as_os_str() == STDOUT_PATH {
            tokio::io::stdin().read_to_end(&mut data).await?;
        } else {
            data = tokio::fs::read(path).await?;
        }
        let container = read_container(&data[..], Some(cancel))?;
        info!(
            path = %path.display(),
            format = container.format_name(),
            "binary input consumed"
        );
        self.add_container(container)
    }

    /// 결과 컨테이너를 돌려줍니다. 입력이 하나도 없었으면 상수 필드만으로 빈 컨테이너를 만듭니다.
    pub fn finish(mut self) -> Result<AggBag, AccumulatorError> {
        if self.bag.is_none() {
            let layout = self
                .fixed_layout
                .clone()
                .unwrap_or(Layout { columns: Vec::new() });
            self.ensure_target(&layout)?;
        }
        self.bag
            .take()
            .ok_or_else(|| AccumulatorError::configuration("no input was processed"))
    }
}

impl std::fmt::Debug for TextBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextBuilder")
            .field("opts", &self.opts)
            .field("constants", &self.constants)
            .field("rows", &self.rows)
            .field("bad_lines", &self.bad_lines)
            .finish()
    }
}
