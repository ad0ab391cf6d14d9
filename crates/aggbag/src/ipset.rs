//! 메모리 IP 집합 -- 병합된 주소 범위
//!
//! IPv4와 IPv6 범위를 각각 정렬·병합된 포함 구간 목록으로 보관하고 이진 탐색으로 조회합니다.
//! `::ffff:0:0/96` 주소는 IPv4 범위와 서로 매칭됩니다.
//!
//! # 텍스트 형식
//! ```text
//! # 주석
//! 10.0.0.0/8
//! 192.168.1.7
//! 2001:db8::/32
//! ```

use std::fmt::Write as _;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::Path;

use flowbag_core::lookup::IpSetLookup;
use ipnetwork::IpNetwork;
use tracing::info;

use crate::error::AggBagError;

/// 병합된 IP 범위 집합
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IpSet {
    /// IPv4 포함 구간 (오름차순, 서로 겹치거나 붙어 있지 않음)
    v4: Vec<(u32, u32)>,
    /// IPv6 포함 구간
    v6: Vec<(u128, u128)>,
}

/// 구간 병합에 필요한 정수 연산
trait RangeInt: Copy + Ord {
    fn succ(self) -> Option<Self>;
}

impl RangeInt for u32 {
    fn succ(self) -> Option<Self> {
        self.checked_add(1)
    }
}

impl RangeInt for u128 {
    fn succ(self) -> Option<Self> {
        self.checked_add(1)
    }
}

impl IpSet {
    /// 빈 집합
    pub fn new() -> Self {
        Self::default()
    }

    /// 주소가 하나도 없는지 여부
    pub fn is_empty(&self) -> bool {
        self.v4.is_empty() && self.v6.is_empty()
    }

    /// 병합된 구간 수
    pub fn len_ranges(&self) -> usize {
        self.v4.len() + self.v6.len()
    }

    /// 주소 하나를 추가합니다.
    pub fn insert(&mut self, addr: IpAddr) {
        match addr {
            IpAddr::V4(v4) => {
                let n = u32::from(v4);
                insert_range(&mut self.v4, n, n);
            }
            IpAddr::V6(v6) => {
                let n = u128::from(v6);
                insert_range(&mut self.v6, n, n);
            }
        }
    }

    /// CIDR 블록을 추가합니다. 호스트 비트는 무시됩니다.
    pub fn insert_network(&mut self, net: IpNetwork) {
        match net.ip() {
            IpAddr::V4(addr) => {
                let host_bits = 32 - u32::from(net.prefix().min(32));
                let mask = u32::MAX.checked_shl(host_bits).unwrap_or(0);
                let lo = u32::from(addr) & mask;
                insert_range(&mut self.v4, lo, lo | !mask);
            }
            IpAddr::V6(addr) => {
                let host_bits = 128 - u32::from(net.prefix().min(128));
                let mask = u128::MAX.checked_shl(host_bits).unwrap_or(0);
                let lo = u128::from(addr) & mask;
                insert_range(&mut self.v6, lo, lo | !mask);
            }
        }
    }

    /// 주소 포함 여부
    pub fn contains(&self, addr: &IpAddr) -> bool {
        match addr {
            IpAddr::V4(v4) => {
                in_ranges(&self.v4, u32::from(*v4))
                    || in_ranges(&self.v6, u128::from(v4.to_ipv6_mapped()))
            }
            IpAddr::V6(v6) => {
                in_ranges(&self.v6, u128::from(*v6))
                    || v6
                        .to_ipv4_mapped()
                        .is_some_and(|v4| in_ranges(&self.v4, u32::from(v4)))
            }
        }
    }

    /// 집합을 덮는 최소 CIDR 목록 (IPv4 먼저)
    pub fn cidrs(&self) -> Vec<IpNetwork> {
        let mut blocks = Vec::new();
        for &(lo, hi) in &self.v4 {
            let mut raw = Vec::new();
            cover(u128::from(lo), u128::from(hi), 32, &mut raw);
            blocks.extend(raw.into_iter().filter_map(|(start, prefix)| {
                IpNetwork::new(IpAddr::V4(Ipv4Addr::from(start as u32)), prefix).ok()
            }));
        }
        for &(lo, hi) in &self.v6 {
            let mut raw = Vec::new();
            cover(lo, hi, 128, &mut raw);
            blocks.extend(raw.into_iter().filter_map(|(start, prefix)| {
                IpNetwork::new(IpAddr::V6(Ipv6Addr::from(start)), prefix).ok()
            }));
        }
        blocks
    }

    /// 텍스트에서 집합을 만듭니다. 줄 하나에 주소 또는 CIDR 하나.
    pub fn from_text(text: &str) -> Result<Self, AggBagError> {
        let mut set = Self::new();
        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let invalid = |reason: String| AggBagError::InvalidValue {
                field: "ipset".to_owned(),
                input: line.to_owned(),
                reason: format!("line {}: {}", lineno + 1, reason),
            };
            if line.contains('/') {
                let net: IpNetwork = line.parse().map_err(|e| invalid(format!("{}", e)))?;
                set.insert_network(net);
            } else {
                let addr: IpAddr = line.parse().map_err(|e| invalid(format!("{}", e)))?;
                set.insert(addr);
            }
        }
        Ok(set)
    }

    /// 최소 CIDR 목록을 한 줄에 하나씩 씁니다.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for net in self.cidrs() {
            let _ = writeln!(out, "{}", net);
        }
        out
    }

    /// 파일에서 집합을 읽습니다.
    pub async fn load(path: &Path) -> Result<Self, AggBagError> {
        let text = tokio::fs::read_to_string(path).await?;
        let set = Self::from_text(&text)?;
        info!(path = %path.display(), ranges = set.len_ranges(), "loaded IP set");
        Ok(set)
    }
}

impl IpSetLookup for IpSet {
    fn contains(&self, addr: &IpAddr) -> bool {
        IpSet::contains(self, addr)
    }
}

fn insert_range<T: RangeInt>(ranges: &mut Vec<(T, T)>, mut lo: T, mut hi: T) {
    // lo 바로 앞까지 끝나는 구간은 건드리지 않음
    let start = ranges.partition_point(|r| r.1.succ().is_some_and(|next| next < lo));
    // hi 바로 뒤 이후에 시작하는 구간도 건드리지 않음
    let end = ranges.partition_point(|r| hi.succ().is_none_or(|next| r.0 <= next));
    if start < end {
        lo = lo.min(ranges[start].0);
        hi = hi.max(ranges[end - 1].1);
    }
    ranges.splice(start..end, [(lo, hi)]);
}

fn in_ranges<T: RangeInt>(ranges: &[(T, T)], value: T) -> bool {
    let idx = ranges.partition_point(|r| r.1 < value);
    ranges.get(idx).is_some_and(|r| r.0 <= value)
}

/// `[lo, hi]`를 정렬된 최소 블록 (시작, 프리픽스)으로 분해합니다.
fn cover(mut lo: u128, hi: u128, bits: u32, out: &mut Vec<(u128, u8)>) {
    loop {
        let align = if lo == 0 {
            bits
        } else {
            lo.trailing_zeros().min(bits)
        };
        let span = hi - lo;
        let fit = match span.checked_add(1) {
            Some(count) => 127 - count.leading_zeros(),
            None => 128,
        };
        let k = align.min(fit);
        out.push((lo, (bits - k) as u8));
        let last = if k >= 128 {
            u128::MAX
        } else {
            lo + ((1u128 << k) - 1)
        };
        if last >= hi {
            break;
        }
        lo = last + 1;
    }
}
