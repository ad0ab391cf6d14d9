//! 레코드 누산기 -- 플로우 레코드를 출력 컨테이너들에 집계
//!
//! # 처리 흐름
//! 1. [`AccumulatorBuilder`]로 출력 구성, 프리픽스 맵, 국가 코드 조회를 모아 검증
//! 2. 레코드마다 각 출력의 키/카운터 튜플을 만들어 `add`
//! 3. 입력이 끝나면 [`Accumulator::write_all`]로 주석/명령 이력과 함께 직렬화
//!
//! # 컨테이너 상태
//! `Empty` → (첫 add) → `Populated` → (write) → `Sealed`.
//! `Sealed` 컨테이너는 더 이상 변경할 수 없습니다.

use std::fmt;
use std::io::Write;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use flowbag_aggbag::{
    AggBag, Bag, WriteOptions, write_aggbag, write_aggbag_to_path, write_bag, write_bag_to_path,
};
use flowbag_core::metrics as fb_metrics;
use flowbag_core::{
    CountryLookup, FieldKind, FieldValue, FlowRecord, PmapContent, PmapKey, PrefixMap, ValueType,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::country;
use crate::error::AccumulatorError;
use crate::output::{OutputSpec, OutputTarget, validate_outputs};
use crate::pmap::PmapRegistry;
use crate::reader::FlowReader;

/// 출력 컨테이너 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    /// 아직 행이 추가되지 않음
    Empty,
    /// 행이 추가됨
    Populated,
    /// 직렬화 완료 (변경 불가)
    Sealed,
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "empty"),
            Self::Populated => write!(f, "populated"),
            Self::Sealed => write!(f, "sealed"),
        }
    }
}

/// 국가 코드 조회 출처
#[derive(Clone, Default)]
enum CountrySource {
    #[default]
    None,
    /// 처음 필요할 때 프로세스 공용 테이블로 로드
    Path(PathBuf),
    /// 이미 준비된 조회
    Lookup(Arc<dyn CountryLookup>),
}

/// 레코드에서 키 값 하나를 얻는 방법
#[derive(Clone)]
enum KeySource {
    /// 레코드 필드에서 직접 추출
    Record(FieldKind),
    /// 국가 코드 조회
    Country {
        kind: FieldKind,
        lookup: Arc<dyn CountryLookup>,
    },
    /// 프리픽스 맵 조회
    Pmap {
        kind: FieldKind,
        map: Arc<dyn PrefixMap>,
    },
}

/// 출력 하나의 실행 상태
struct OutputState {
    /// 구성
    spec: OutputSpec,
    /// 키 스키마 순서의 값 추출기
    keys: Vec<KeySource>,
    /// 카운터 스키마 순서의 필드
    counters: Vec<FieldKind>,
    /// 집계 컨테이너
    bag: AggBag,
    /// 상태
    state: ContainerState,
    /// 오버플로 경고를 이미 남겼는지
    overflow_warned: bool,
    /// IPv4 필드에 담을 수 없어 건너뛴 레코드 수
    skipped: u64,
}

/// [`Accumulator`] 빌더
#[derive(Default)]
pub struct AccumulatorBuilder {
    outputs: Vec<OutputSpec>,
    pmaps: PmapRegistry,
    country: CountrySource,
    notes: Vec<String>,
}

impl AccumulatorBuilder {
    /// 빈 빌더
    pub fn new() -> Self {
        Self::default()
    }

    /// 출력 구성을 추가합니다.
    pub fn output(mut self, spec: OutputSpec) -> Self {
        self.outputs.push(spec);
        self
    }

    /// 출력 구성을 여러 개 추가합니다.
    pub fn outputs(mut self, specs: impl IntoIterator<Item = OutputSpec>) -> Self {
        self.outputs.extend(specs);
        self
    }

    /// 프리픽스 맵 레지스트리를 지정합니다.
    pub fn pmaps(mut self, registry: PmapRegistry) -> Self {
        self.pmaps = registry;
        self
    }

    /// 국가 코드 테이블 경로를 지정합니다. 국가 필드를 쓰는 출력이 있을 때만 로드됩니다.
    pub fn country_codes(mut self, path: impl Into<PathBuf>) -> Self {
        self.country = CountrySource::Path(path.into());
        self
    }

    /// 준비된 국가 코드 조회를 지정합니다.
    pub fn country_lookup(mut self, lookup: Arc<dyn CountryLookup>) -> Self {
        self.country = CountrySource::Lookup(lookup);
        self
    }

    /// 모든 출력에 붙일 주석을 추가합니다.
    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    /// 구성을 검증하고 누산기를 만듭니다.
    pub async fn build(self) -> Result<Accumulator, AccumulatorError> {
        validate_outputs(&self.outputs)?;

        let needs_country = self
            .outputs
            .iter()
            .flat_map(|o| o.keys.iter())
            .any(|f| matches!(f.kind, FieldKind::SipCountry | FieldKind::DipCountry));
        let country: Option<Arc<dyn CountryLookup>> = match (&self.country, needs_country) {
            (_, false) => None,
            (CountrySource::Lookup(lookup), true) => Some(Arc::clone(lookup)),
            (CountrySource::Path(path), true) => {
                let table: Arc<dyn CountryLookup> = country::shared(path).await?;
                Some(table)
            }
            (CountrySource::None, true) => {
                return Err(AccumulatorError::configuration(
                    "country code fields need a country code table",
                ));
            }
        };

        let mut outputs = Vec::with_capacity(self.outputs.len());
        for spec in self.outputs {
            outputs.push(OutputState::new(spec, &self.pmaps, country.as_ref())?);
        }
        info!(
            outputs = outputs.len(),
            pmaps = self.pmaps.len(),
            "accumulator configured"
        );
        Ok(Accumulator {
            outputs,
            notes: self.notes,
            records: 0,
        })
    }
}

impl OutputState {
    fn new(
        spec: OutputSpec,
        pmaps: &PmapRegistry,
        country: Option<&Arc<dyn CountryLookup>>,
    ) -> Result<Self, AccumulatorError> {
        let key_schema = spec.key_schema()?;
        let counter_schema = spec.counter_schema()?;

        let mut keys = Vec::with_capacity(key_schema.len());
        for kind in key_schema.iter() {
            let field = spec
                .keys
                .iter()
                .find(|f| f.kind == kind)
                .ok_or_else(|| AccumulatorError::configuration(format!("missing key {}", kind)))?;
            keys.push(key_source(kind, field.pmap.as_deref(), pmaps, country)?);
        }

        let mut counters = Vec::with_capacity(counter_schema.len());
        for kind in counter_schema.iter() {
            if kind == FieldKind::CustomCounter {
                return Err(AccumulatorError::configuration(format!(
                    "counter {} cannot be derived from flow records",
                    kind
                )));
            }
            counters.push(kind);
        }

        let bag = AggBag::new(key_schema, counter_schema)?;
        debug!(output = %spec, legacy = spec.is_legacy_bag(), "output configured");
        Ok(Self {
            spec,
            keys,
            counters,
            bag,
            state: ContainerState::Empty,
            overflow_warned: false,
            skipped: 0,
        })
    }

    fn add_record(&mut self, rec: &FlowRecord) -> Result<(), AccumulatorError> {
        if self.state == ContainerState::Sealed {
            return Err(AccumulatorError::configuration(format!(
                "output {} has already been written",
                self.spec.target
            )));
        }

        let mut key = Vec::with_capacity(self.keys.len());
        for source in &self.keys {
            match source.extract(rec) {
                Some(value) => key.push(value),
                None => {
                    self.skipped += 1;
                    metrics::counter!(
                        fb_metrics::ACCUMULATOR_RECORDS_SKIPPED_TOTAL,
                        fb_metrics::LABEL_REASON => "ipv6"
                    )
                    .increment(1);
                    return Ok(());
                }
            }
        }
        let counters: Vec<u64> = self.counters.iter().map(|k| counter_value(*k, rec)).collect();

        self.bag.add(&key, &counters)?;
        self.state = ContainerState::Populated;
        if self.bag.overflowed() && !self.overflow_warned {
            self.overflow_warned = true;
            warn!(output = %self.spec, "counter overflow, values saturated at maximum");
        }
        Ok(())
    }

    fn write(&mut self, notes: &[String], opts: &WriteOptions) -> Result<(), AccumulatorError> {
        if self.state == ContainerState::Sealed {
            return Err(AccumulatorError::configuration(format!(
                "output {} has already been written",
                self.spec.target
            )));
        }
        for note in notes {
            self.bag.add_annotation(note.clone());
        }

        if self.spec.is_legacy_bag() {
            let bag = Bag::from_aggbag(self.bag.clone())?;
            match &self.spec.target {
                OutputTarget::Stdout => {
                    let mut out = std::io::stdout().lock();
                    write_bag(&bag, &mut out, opts)?;
                    out.flush()?;
                }
                OutputTarget::File(path) => write_bag_to_path(&bag, path, opts)?,
            }
        } else {
            match &self.spec.target {
                OutputTarget::Stdout => {
                    let mut out = std::io::stdout().lock();
                    write_aggbag(&self.bag, &mut out, opts)?;
                    out.flush()?;
                }
                OutputTarget::File(path) => write_aggbag_to_path(&self.bag, path, opts)?,
            }
        }

        self.state = ContainerState::Sealed;
        info!(
            output = %self.spec,
            rows = self.bag.len(),
            skipped = self.skipped,
            "output written"
        );
        Ok(())
    }
}

fn key_source(
    kind: FieldKind,
    pmap: Option<&str>,
    pmaps: &PmapRegistry,
    country: Option<&Arc<dyn CountryLookup>>,
) -> Result<KeySource, AccumulatorError> {
    use FieldKind::*;
    let required_content = match kind {
        SipPmap | DipPmap => Some(PmapContent::Ip),
        SportPmap | DportPmap => Some(PmapContent::ProtoPort),
        _ => None,
    };

    match kind {
        AnyIpv4 | AnyIpv6 | AnyPort | AnySnmp | AnyTime | AnyCountry | AnyIpPmap
        | AnyPortPmap | CustomKey => Err(AccumulatorError::configuration(format!(
            "key {} cannot be derived from flow records",
            kind
        ))),
        SipCountry | DipCountry => {
            let lookup = country.ok_or_else(|| {
                AccumulatorError::configuration("country code fields need a country code table")
            })?;
            Ok(KeySource::Country {
                kind,
                lookup: Arc::clone(lookup),
            })
        }
        SipPmap | DipPmap | SportPmap | DportPmap => {
            let name = pmap.ok_or_else(|| {
                AccumulatorError::configuration(format!("field {} requires a prefix map", kind))
            })?;
            let map = pmaps.get(name).ok_or_else(|| {
                AccumulatorError::configuration(format!("prefix map '{}' is not loaded", name))
            })?;
            if Some(map.content()) != required_content {
                return Err(AccumulatorError::configuration(format!(
                    "prefix map '{}' holds {} keys and cannot feed {}",
                    name,
                    map.content().as_str(),
                    kind
                )));
            }
            Ok(KeySource::Pmap {
                kind,
                map: Arc::clone(map),
            })
        }
        _ => Ok(KeySource::Record(kind)),
    }
}

impl KeySource {
    /// 레코드에서 키 값을 얻습니다. IPv4 필드에 담을 수 없는 IPv6 주소면 None.
    fn extract(&self, rec: &FlowRecord) -> Option<FieldValue> {
        match self {
            Self::Record(kind) => record_value(*kind, rec),
            Self::Country { kind, lookup } => {
                let addr = if *kind == FieldKind::SipCountry {
                    rec.sip
                } else {
                    rec.dip
                };
                Some(FieldValue::Unsigned(u64::from(lookup.country_code(&addr))))
            }
            Self::Pmap { kind, map } => {
                let key = match kind {
                    FieldKind::SipPmap => PmapKey::Ip(rec.sip),
                    FieldKind::DipPmap => PmapKey::Ip(rec.dip),
                    FieldKind::SportPmap => PmapKey::ProtoPort {
                        protocol: rec.protocol,
                        port: rec.sport,
                    },
                    _ => PmapKey::ProtoPort {
                        protocol: rec.protocol,
                        port: rec.dport,
                    },
                };
                Some(FieldValue::Unsigned(u64::from(map.lookup(&key))))
            }
        }
    }
}

fn ip_value(kind: FieldKind, addr: IpAddr) -> Option<FieldValue> {
    let value = FieldValue::from(addr);
    match kind.value_type() {
        ValueType::Ipv4 => value.demote_to_v4(),
        _ => Some(value.promote_to_v6()),
    }
}

/// 필드 폭을 넘는 값은 최대값으로 자릅니다.
fn clamped(kind: FieldKind, value: u64) -> FieldValue {
    FieldValue::Unsigned(value.min(kind.max_unsigned().unwrap_or(u64::MAX)))
}

fn record_value(kind: FieldKind, rec: &FlowRecord) -> Option<FieldValue> {
    use FieldKind::*;
    let value = match kind {
        SIpv4 | SIpv6 => return ip_value(kind, rec.sip),
        DIpv4 | DIpv6 => return ip_value(kind, rec.dip),
        NhIpv4 | NhIpv6 => return ip_value(kind, rec.nhip),
        SPort => u64::from(rec.sport),
        DPort => u64::from(rec.dport),
        Protocol => u64::from(rec.protocol),
        Packets => rec.packets,
        Bytes => rec.bytes,
        Flags => u64::from(rec.flags),
        InitialFlags => u64::from(rec.initial_flags),
        SessionFlags => u64::from(rec.session_flags),
        Attributes => u64::from(rec.attributes()),
        Application => u64::from(rec.application),
        Sensor => u64::from(rec.sensor),
        Input => u64::from(rec.input),
        Output => u64::from(rec.output),
        Class => u64::from(rec.class),
        Type => u64::from(rec.flowtype),
        STime => rec.stime,
        ETime => rec.etime(),
        Duration => u64::from(rec.elapsed),
        IcmpType if rec.is_icmp() => u64::from(rec.icmp_type()),
        IcmpCode if rec.is_icmp() => u64::from(rec.icmp_code()),
        _ => 0,
    };
    Some(clamped(kind, value))
}

fn counter_value(kind: FieldKind, rec: &FlowRecord) -> u64 {
    match kind {
        FieldKind::Records => 1,
        FieldKind::SumPackets => rec.packets,
        FieldKind::SumBytes => rec.bytes,
        FieldKind::SumDuration => u64::from(rec.elapsed),
        _ => 0,
    }
}

/// 플로우 레코드 누산기
pub struct Accumulator {
    /// 출력별 상태 (구성 순서)
    outputs: Vec<OutputState>,
    /// 쓰기 직전에 붙일 주석
    notes: Vec<String>,
    /// 처리한 레코드 수
    records: u64,
}

impl Accumulator {
    /// 빌더를 만듭니다.
    pub fn builder() -> AccumulatorBuilder {
        AccumulatorBuilder::new()
    }

    /// 레코드 하나를 모든 출력에 더합니다.
    ///
    /// IPv4 키 필드에 담을 수 없는 IPv6 주소를 가진 레코드는 해당 출력에서만 건너뜁니다.
    pub fn add_record(&mut self, rec: &FlowRecord) -> Result<(), AccumulatorError> {
        for output in &mut self.outputs {
            output.add_record(rec)?;
        }
        self.records += 1;
        metrics::counter!(fb_metrics::ACCUMULATOR_RECORDS_PROCESSED_TOTAL).increment(1);
        Ok(())
    }

    /// 리더가 끝날 때까지 레코드를 더합니다. 처리한 레코드 수를 반환합니다.
    pub async fn run(
        &mut self,
        reader: &mut FlowReader,
        cancel: &CancellationToken,
    ) -> Result<u64, AccumulatorError> {
        let mut count = 0u64;
        while let Some(rec) = reader.next_record(cancel).await? {
            self.add_record(&rec)?;
            count += 1;
        }
        info!(
            source = reader.source(),
            records = count,
            skipped = reader.skipped(),
            "flow input consumed"
        );
        Ok(count)
    }

    /// 지금까지 처리한 레코드 수
    pub fn records(&self) -> u64 {
        self.records
    }

    /// 출력 구성, 컨테이너, 상태
    pub fn containers(&self) -> impl Iterator<Item = (&OutputSpec, &AggBag, ContainerState)> {
        self.outputs.iter().map(|o| (&o.spec, &o.bag, o.state))
    }

    /// 출력별로 IPv4 변환 불가로 건너뛴 레코드 수
    pub fn skipped(&self) -> impl Iterator<Item = (&OutputSpec, u64)> {
        self.outputs.iter().map(|o| (&o.spec, o.skipped))
    }

    /// 모든 출력을 직렬화하고 봉인합니다.
    ///
    /// 키 하나, 카운터 하나이고 레거시 타입으로 표현 가능한 출력은 Bag 파일로,
    /// 나머지는 Aggregate Bag 파일로 씁니다.
    pub fn write_all(&mut self, opts: &WriteOptions) -> Result<(), AccumulatorError> {
        for output in &mut self.outputs {
            output.write(&self.notes, opts)?;
        }
        debug!(outputs = self.outputs.len(), "all outputs sealed");
        Ok(())
    }

    /// 컨테이너를 꺼냅니다 (구성 순서).
    pub fn into_containers(self) -> Vec<(OutputSpec, AggBag)> {
        self.outputs.into_iter().map(|o| (o.spec, o.bag)).collect()
    }
}

impl fmt::Debug for Accumulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Accumulator")
            .field(
                "outputs",
                &self.outputs.iter().map(|o| o.spec.to_string()).collect::<Vec<_>>(),
            )
            .field("records", &self.records)
            .finish()
    }
}
