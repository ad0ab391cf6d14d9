//! 메트릭 상수 및 설명 등록
//!
//! flowbag이 기록하는 모든 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 각 크레이트는 이 상수로 `metrics::counter!()` 매크로를 호출합니다.
//! 익스포터는 설치하지 않으므로 레코더가 없으면 기록은 무시됩니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `flowbag_`
//! - 영역: `accumulator_`, `codec_`, `filter_`, `container_`
//! - 접미어: `_total` (counter)
//!
//! # 사용 예시
//!
//! ```ignore
//! use metrics::counter;
//!
//! counter!(flowbag_core::metrics::ACCUMULATOR_RECORDS_PROCESSED_TOTAL).increment(1);
//! ```

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 파일 형식 레이블 키 (aggbag, bag)
pub const LABEL_FORMAT: &str = "format";

/// 건너뛴 이유 레이블 키 (ipv6, parse)
pub const LABEL_REASON: &str = "reason";

// ─── Accumulator 메트릭 ────────────────────────────────────────────

/// Accumulator: 처리된 플로우 레코드 수 (counter)
pub const ACCUMULATOR_RECORDS_PROCESSED_TOTAL: &str =
    "flowbag_accumulator_records_processed_total";

/// Accumulator: 출력별로 건너뛴 레코드 수 (counter, label: reason)
pub const ACCUMULATOR_RECORDS_SKIPPED_TOTAL: &str = "flowbag_accumulator_records_skipped_total";

// ─── Codec 메트릭 ──────────────────────────────────────────────────

/// Codec: 기록한 행 수 (counter, label: format)
pub const CODEC_ROWS_WRITTEN_TOTAL: &str = "flowbag_codec_rows_written_total";

/// Codec: 읽은 행 수 (counter, label: format)
pub const CODEC_ROWS_READ_TOTAL: &str = "flowbag_codec_rows_read_total";

/// Codec: 읽은 파일 수 (counter, label: format)
pub const CODEC_FILES_READ_TOTAL: &str = "flowbag_codec_files_read_total";

/// Codec: 기록한 파일 수 (counter, label: format)
pub const CODEC_FILES_WRITTEN_TOTAL: &str = "flowbag_codec_files_written_total";

// ─── Filter / Container 메트릭 ─────────────────────────────────────

/// Filter: 조건을 통과하지 못해 제거된 행 수 (counter)
pub const FILTER_ROWS_DROPPED_TOTAL: &str = "flowbag_filter_rows_dropped_total";

/// Container: 카운터 포화(오버플로) 발생 수 (counter)
pub const CONTAINER_COUNTER_OVERFLOWS_TOTAL: &str = "flowbag_container_counter_overflows_total";

// ─── 설명 등록 함수 ─────────────────────────────────────────────────

/// 모든 메트릭의 설명(description)을 등록합니다.
///
/// 레코더를 설치한 뒤 한 번만 호출합니다.
pub fn describe_all() {
    use metrics::describe_counter;

    // Accumulator
    describe_counter!(
        ACCUMULATOR_RECORDS_PROCESSED_TOTAL,
        "Total number of flow records fed to the accumulator"
    );
    describe_counter!(
        ACCUMULATOR_RECORDS_SKIPPED_TOTAL,
        "Flow records skipped for one output (non-demotable IPv6, unparsable line)"
    );

    // Codec
    describe_counter!(
        CODEC_ROWS_WRITTEN_TOTAL,
        "Total number of rows serialized"
    );
    describe_counter!(CODEC_ROWS_READ_TOTAL, "Total number of rows deserialized");
    describe_counter!(CODEC_FILES_READ_TOTAL, "Total number of container files read");
    describe_counter!(
        CODEC_FILES_WRITTEN_TOTAL,
        "Total number of container files written"
    );

    // Filter / Container
    describe_counter!(
        FILTER_ROWS_DROPPED_TOTAL,
        "Total number of rows removed by min/max/set filters"
    );
    describe_counter!(
        CONTAINER_COUNTER_OVERFLOWS_TOTAL,
        "Total number of counter additions that saturated at u64::MAX"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_METRIC_NAMES: &[&str] = &[
        ACCUMULATOR_RECORDS_PROCESSED_TOTAL,
        ACCUMULATOR_RECORDS_SKIPPED_TOTAL,
        CODEC_ROWS_WRITTEN_TOTAL,
        CODEC_ROWS_READ_TOTAL,
        CODEC_FILES_READ_TOTAL,
        CODEC_FILES_WRITTEN_TOTAL,
        FILTER_ROWS_DROPPED_TOTAL,
        CONTAINER_COUNTER_OVERFLOWS_TOTAL,
    ];

    #[test]
    fn all_metrics_start_with_flowbag_prefix() {
        for name in ALL_METRIC_NAMES {
            assert!(
                name.starts_with("flowbag_"),
                "Metric '{}' does not start with 'flowbag_' prefix",
                name
            );
        }
    }

    #[test]
    fn all_counters_end_with_total() {
        for name in ALL_METRIC_NAMES {
            assert!(name.ends_with("_total"), "Counter '{}' lacks _total", name);
        }
    }

    #[test]
    fn describe_all_does_not_panic() {
        // 레코더가 없어도 패닉하지 않아야 함
        describe_all();
    }

    #[test]
    fn label_keys_are_lowercase() {
        for label in [LABEL_FORMAT, LABEL_REASON] {
            assert_eq!(label.to_lowercase(), label);
        }
    }
}
