//! 프리픽스 맵 -- 텍스트 파일 로딩과 프로세스 공용 레지스트리
//!
//! # 파일 형식
//! ```text
//! # 주석
//! mode ip            # 또는 proto-port
//! default 0
//! 10.0.0.0/8 1
//! 2001:db8::/32 2
//! ```
//! `proto-port` 모드의 항목은 `PROTO`, `PROTO/PORT`, `PROTO/PORT-PORT` 형식입니다.
//! 값은 부호 없는 32비트 정수이며, 뒤에 나온 항목이 겹치는 구간을 덮어씁니다.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use flowbag_core::{PmapContent, PmapKey, PrefixMap};
use ipnetwork::IpNetwork;
use tracing::{debug, info};

use crate::error::AccumulatorError;
use crate::range_map::{RangeMap, ip_key, network_range};

/// 텍스트 파일에서 읽은 프리픽스 맵
#[derive(Debug, Clone)]
pub struct PrefixMapFile {
    /// 맵 이름
    name: String,
    /// 키 종류
    content: PmapContent,
    /// 일치하는 구간이 없을 때의 값
    default: u32,
    /// 구간 → 값
    ranges: RangeMap<u32>,
}

impl PrefixMapFile {
    /// 텍스트에서 맵을 파싱합니다.
    ///
    /// `mode` 줄이 없으면 `ip` 모드로 간주합니다. `mode`는 첫 항목보다 먼저 와야 합니다.
    pub fn from_text(name: impl Into<String>, text: &str) -> Result<Self, AccumulatorError> {
        let name = name.into();
        let mut content = None;
        let mut default = 0u32;
        let mut ranges = RangeMap::new();

        for (idx, raw) in text.lines().enumerate() {
            let line_no = idx + 1;
            let fail = |reason: String| AccumulatorError::Lookup {
                source_name: name.clone(),
                line: line_no,
                reason,
            };
            let line = raw.split('#').next().unwrap_or_default().trim();
            if line.is_empty() {
                continue;
            }
            let mut parts = line.split_whitespace();
            let (Some(head), Some(tail), None) = (parts.next(), parts.next(), parts.next()) else {
                return Err(fail(format!("expected two columns, got '{}'", line)));
            };

            match head {
                "mode" => {
                    if content.is_some() {
                        return Err(fail("mode must appear once, before any entry".to_owned()));
                    }
                    content = Some(match tail {
                        "ip" | "ipv4" | "ipv6" => PmapContent::Ip,
                        "proto-port" | "proto_port" => PmapContent::ProtoPort,
                        other => return Err(fail(format!("unknown mode '{}'", other))),
                    });
                }
                "default" => {
                    default = parse_label(tail).map_err(fail)?;
                }
                _ => {
                    let mode = *content.get_or_insert(PmapContent::Ip);
                    let label = parse_label(tail).map_err(fail)?;
                    let (lo, hi) = match mode {
                        PmapContent::Ip => parse_network(head).map_err(fail)?,
                        PmapContent::ProtoPort => parse_proto_port(head).map_err(fail)?,
                    };
                    ranges.assign(lo, hi, label);
                }
            }
        }

        let content = content.unwrap_or(PmapContent::Ip);
        debug!(
            map = %name,
            content = content.as_str(),
            ranges = ranges.len(),
            "prefix map parsed"
        );
        Ok(Self {
            name,
            content,
            default,
            ranges,
        })
    }

    /// 파일에서 맵을 읽습니다.
    pub async fn load(name: impl Into<String>, path: impl AsRef<Path>) -> Result<Self, AccumulatorError> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path).await?;
        let map = Self::from_text(name, &text)?;
        info!(
            map = %map.name,
            path = %path.display(),
            content = map.content.as_str(),
            "prefix map loaded"
        );
        Ok(map)
    }

    /// 기본값
    pub fn default_value(&self) -> u32 {
        self.default
    }
}

impl PrefixMap for PrefixMapFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn content(&self) -> PmapContent {
        self.content
    }

    fn lookup(&self, key: &PmapKey) -> u32 {
        let k = match (self.content, key) {
            (PmapContent::Ip, PmapKey::Ip(addr)) => ip_key(addr),
            (PmapContent::ProtoPort, PmapKey::ProtoPort { protocol, port }) => {
                proto_port_key(*protocol, *port)
            }
            _ => return self.default,
        };
        self.ranges.get(k).unwrap_or(self.default)
    }
}

fn proto_port_key(protocol: u8, port: u16) -> u128 {
    (u128::from(protocol) << 16) | u128::from(port)
}

fn parse_label(text: &str) -> Result<u32, String> {
    text.parse::<u32>()
        .map_err(|_| format!("invalid value '{}': expected an unsigned 32-bit integer", text))
}

fn parse_network(text: &str) -> Result<(u128, u128), String> {
    let net: IpNetwork = text
        .parse()
        .map_err(|e| format!("invalid network '{}': {}", text, e))?;
    Ok(network_range(&net))
}

fn parse_proto_port(text: &str) -> Result<(u128, u128), String> {
    let bad = |what: &str| format!("invalid {} in '{}'", what, text);
    let (proto, ports) = match text.split_once('/') {
        Some((p, rest)) => (p, Some(rest)),
        None => (text, None),
    };
    let proto: u8 = proto.parse().map_err(|_| bad("protocol"))?;
    let (lo, hi) = match ports {
        None => (0u16, u16::MAX),
        Some(range) => match range.split_once('-') {
            Some((a, b)) => (
                a.parse().map_err(|_| bad("port"))?,
                b.parse().map_err(|_| bad("port"))?,
            ),
            None => {
                let port = range.parse().map_err(|_| bad("port"))?;
                (port, port)
            }
        },
    };
    if lo > hi {
        return Err(format!("port range '{}' is reversed", text));
    }
    Ok((proto_port_key(proto, lo), proto_port_key(proto, hi)))
}

/// 이름 → 프리픽스 맵 레지스트리
///
/// 맵은 한 번 로드되어 여러 누산기가 읽기 전용으로 공유합니다.
#[derive(Clone, Default)]
pub struct PmapRegistry {
    maps: BTreeMap<String, Arc<dyn PrefixMap>>,
}

impl PmapRegistry {
    /// 빈 레지스트리
    pub fn new() -> Self {
        Self::default()
    }

    /// 맵을 등록합니다. 같은 이름이 이미 있으면 구성 에러입니다.
    pub fn register(&mut self, map: Arc<dyn PrefixMap>) -> Result<(), AccumulatorError> {
        let name = map.name().to_owned();
        if self.maps.contains_key(&name) {
            return Err(AccumulatorError::configuration(format!(
                "prefix map '{}' is already registered",
                name
            )));
        }
        self.maps.insert(name, map);
        Ok(())
    }

    /// 이름으로 맵을 찾습니다.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn PrefixMap>> {
        self.maps.get(name)
    }

    /// 등록된 맵 이름 (정렬 순)
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.maps.keys().map(String::as_str)
    }

    /// 등록된 맵 수
    pub fn len(&self) -> usize {
        self.maps.len()
    }

    /// 비어 있는지 여부
    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    /// `(이름, 경로)` 목록을 모두 로드해 레지스트리를 만듭니다.
    pub async fn load(entries: &[(String, PathBuf)]) -> Result<Self, AccumulatorError> {
        let mut registry = Self::new();
        for (name, path) in entries {
            let map = PrefixMapFile::load(name.clone(), path).await?;
            registry.register(Arc::new(map))?;
        }
        Ok(registry)
    }
}

impl std::fmt::Debug for PmapRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PmapRegistry")
            .field("maps", &self.maps.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;

    fn ip(text: &str) -> PmapKey {
        PmapKey::Ip(text.parse::<IpAddr>().unwrap())
    }

    #[test]
    fn ip_map_lookup_with_override() {
        let map = PrefixMapFile::from_text(
            "nets",
            "# internal networks\nmode ip\ndefault 9\n10.0.0.0/8 1\n10.1.0.0/16 2\n",
        )
        .unwrap();
        assert_eq!(map.content(), PmapContent::Ip);
        assert_eq!(map.lookup(&ip("10.0.0.1")), 1);
        assert_eq!(map.lookup(&ip("10.1.2.3")), 2);
        assert_eq!(map.lookup(&ip("192.168.0.1")), 9);
        assert_eq!(map.lookup(&ip("::ffff:10.1.2.3")), 2);
    }

    #[test]
    fn proto_port_map_lookup() {
        let map = PrefixMapFile::from_text(
            "svc",
            "mode proto-port\n6/80 80\n6/8000-8099 8000\n17 17\n",
        )
        .unwrap();
        let key = |protocol, port| PmapKey::ProtoPort { protocol, port };
        assert_eq!(map.lookup(&key(6, 80)), 80);
        assert_eq!(map.lookup(&key(6, 8050)), 8000);
        assert_eq!(map.lookup(&key(17, 53)), 17);
        assert_eq!(map.lookup(&key(6, 81)), 0);
        assert_eq!(map.lookup(&ip("10.0.0.1")), 0);
    }

    #[test]
    fn missing_mode_defaults_to_ip() {
        let map = PrefixMapFile::from_text("m", "192.168.0.0/24 5\n").unwrap();
        assert_eq!(map.content(), PmapContent::Ip);
        assert_eq!(map.lookup(&ip("192.168.0.77")), 5);
    }

    #[test]
    fn parse_errors_carry_line_numbers() {
        let err = PrefixMapFile::from_text("m", "mode ip\n\n10.0.0.0/33 1\n").unwrap_err();
        assert!(matches!(err, AccumulatorError::Lookup { line: 3, .. }));

        let err = PrefixMapFile::from_text("m", "mode proto-port\n6/90-80 1\n").unwrap_err();
        assert!(err.to_string().contains("reversed"));

        let err = PrefixMapFile::from_text("m", "10.0.0.0/8 1\nmode ip\n").unwrap_err();
        assert!(matches!(err, AccumulatorError::Lookup { line: 2, .. }));

        let err = PrefixMapFile::from_text("m", "10.0.0.0/8 -1\n").unwrap_err();
        assert!(err.to_string().contains("unsigned"));
    }

    #[test]
    fn registry_rejects_duplicate_names() {
        let mut registry = PmapRegistry::new();
        let map = Arc::new(PrefixMapFile::from_text("dup", "").unwrap());
        registry.register(map.clone()).unwrap();
        assert!(matches!(
            registry.register(map),
            Err(AccumulatorError::Configuration { .. })
        ));
        assert_eq!(registry.names().collect::<Vec<_>>(), ["dup"]);
    }

    #[tokio::test]
    async fn registry_loads_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("svc.pmap");
        tokio::fs::write(&path, "mode proto-port\n6/22 1\n").await.unwrap();

        let registry = PmapRegistry::load(&[("svc".to_owned(), path)]).await.unwrap();
        let map = registry.get("svc").unwrap();
        assert_eq!(map.content(), PmapContent::ProtoPort);
        assert!(registry.get("other").is_none());
    }

    #[tokio::test]
    async fn load_missing_file_is_io_error() {
        let err = PrefixMapFile::load("gone", "/nonexistent/flowbag/map.pmap")
            .await
            .unwrap_err();
        assert!(matches!(err, AccumulatorError::Io(_)));
    }
}
