//! 플로우 레코드 리더 -- JSON lines 입력
//!
//! 한 줄에 레코드 하나를 JSON 객체로 읽습니다. 빈 줄은 건너뛰고,
//! 파싱할 수 없는 줄은 경고를 남기고 건너뛴 뒤 개수를 셉니다.
//! 취소 토큰은 레코드 사이에서 확인합니다.

use std::path::Path;
use std::pin::Pin;

use flowbag_core::FlowRecord;
use flowbag_core::config::STDOUT_PATH;
use flowbag_core::metrics as fb_metrics;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::AccumulatorError;

type BoxedReader = Pin<Box<dyn AsyncBufRead + Send>>;

/// JSON lines 플로우 레코드 리더
pub struct FlowReader {
    /// 입력 줄 스트림
    lines: Lines<BoxedReader>,
    /// 진단용 입력 이름
    source: String,
    /// 지금까지 읽은 줄 수
    line_no: u64,
    /// 파싱 실패로 건너뛴 줄 수
    skipped: u64,
}

impl FlowReader {
    /// 임의의 비동기 버퍼 리더로 만듭니다.
    pub fn new<R>(reader: R, source: impl Into<String>) -> Self
    where
        R: AsyncBufRead + Send + 'static,
    {
        let boxed: BoxedReader = Box::pin(reader);
        Self {
            lines: boxed.lines(),
            source: source.into(),
            line_no: 0,
            skipped: 0,
        }
    }

    /// 파일을 엽니다. 경로가 `-`이면 표준 입력을 읽습니다.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, AccumulatorError> {
        let path = path.as_ref();
        if path.as_os_str() == STDOUT_PATH {
            return Ok(Self::new(BufReader::new(tokio::io::stdin()), "stdin"));
        }
        let file = tokio::fs::File::open(path).await?;
        debug!(path = %path.display(), "opened flow input");
        Ok(Self::new(
            BufReader::new(file),
            path.display().to_string(),
        ))
    }

    /// 입력 이름
    pub fn source(&self) -> &str {
        &self.source
    }

    /// 파싱 실패로 건너뛴 줄 수
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// 다음 레코드를 읽습니다. 입력이 끝나면 `None`.
    pub async fn next_record(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Option<FlowRecord>, AccumulatorError> {
        loop {
            if cancel.is_cancelled() {
                return Err(AccumulatorError::Cancelled);
            }
            let Some(line) = self.lines.next_line().await? else {
                return Ok(None);
            };
            self.line_no += 1;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<FlowRecord>(trimmed) {
                Ok(record) => return Ok(Some(record)),
                Err(e) => {
                    self.skipped += 1;
                    metrics::counter!(
                        fb_metrics::ACCUMULATOR_RECORDS_SKIPPED_TOTAL,
                        fb_metrics::LABEL_REASON => "parse"
                    )
                    .increment(1);
                    warn!(
                        source = %self.source,
                        line = self.line_no,
                        error = %e,
                        "skipping unparseable flow record"
                    );
                }
            }
        }
    }
}

impl std::fmt::Debug for FlowReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowReader")
            .field("source", &self.source)
            .field("line_no", &self.line_no)
            .field("skipped", &self.skipped)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;

    fn reader(text: &'static str) -> FlowReader {
        FlowReader::new(BufReader::new(text.as_bytes()), "test")
    }

    #[tokio::test]
    async fn reads_records_and_skips_bad_lines() {
        let mut r = reader(
            "{\"sip\":\"10.0.0.1\",\"bytes\":40}\n\nnot json\n{\"sip\":\"10.0.0.2\"}\n",
        );
        let cancel = CancellationToken::new();

        let first = r.next_record(&cancel).await.unwrap().unwrap();
        assert_eq!(first.sip, "10.0.0.1".parse::<IpAddr>().unwrap());
        assert_eq!(first.bytes, 40);
        let second = r.next_record(&cancel).await.unwrap().unwrap();
        assert_eq!(second.sip, "10.0.0.2".parse::<IpAddr>().unwrap());
        assert!(r.next_record(&cancel).await.unwrap().is_none());
        assert_eq!(r.skipped(), 1);
    }

    #[tokio::test]
    async fn observes_cancellation() {
        let mut r = reader("{}\n{}\n");
        let cancel = CancellationToken::new();
        assert!(r.next_record(&cancel).await.unwrap().is_some());
        cancel.cancel();
        assert!(matches!(
            r.next_record(&cancel).await,
            Err(AccumulatorError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn open_missing_file_fails() {
        let err = FlowReader::open("/nonexistent/flowbag/input.json")
            .await
            .unwrap_err();
        assert!(matches!(err, AccumulatorError::Io(_)));
    }

    #[tokio::test]
    async fn open_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flows.json");
        tokio::fs::write(&path, "{\"protocol\":6}\n").await.unwrap();
        let mut r = FlowReader::open(&path).await.unwrap();
        let rec = r
            .next_record(&CancellationToken::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rec.protocol, 6);
        assert!(r.source().ends_with("flows.json"));
    }
}
