//! 구간 → 값 맵
//!
//! 정렬되고 서로 겹치지 않는 포함 구간 목록입니다. 나중에 지정한 구간이
//! 겹치는 부분을 덮어씁니다. 프리픽스 맵과 국가 코드 테이블이 공유합니다.
//!
//! IP 키는 IPv4를 `::ffff:0:0/96`로 매핑한 128비트 값으로 저장합니다.

use std::net::IpAddr;

use ipnetwork::IpNetwork;

/// 포함 구간 → 값
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct RangeMap<V> {
    entries: Vec<(u128, u128, V)>,
}

impl<V: Copy> RangeMap<V> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// `[lo, hi]`에 값을 지정합니다. 겹치는 기존 구간은 잘려 나갑니다.
    pub(crate) fn assign(&mut self, lo: u128, hi: u128, value: V) {
        let start = self.entries.partition_point(|e| e.1 < lo);
        let end = self.entries.partition_point(|e| e.0 <= hi);
        let mut replacement = Vec::with_capacity(3);
        if start < end {
            let first = self.entries[start];
            if first.0 < lo {
                replacement.push((first.0, lo - 1, first.2));
            }
            replacement.push((lo, hi, value));
            let last = self.entries[end - 1];
            if last.1 > hi {
                replacement.push((hi + 1, last.1, last.2));
            }
        } else {
            replacement.push((lo, hi, value));
        }
        self.entries.splice(start..end, replacement);
    }

    pub(crate) fn get(&self, key: u128) -> Option<V> {
        let idx = self.entries.partition_point(|e| e.1 < key);
        self.entries
            .get(idx)
            .filter(|e| e.0 <= key)
            .map(|e| e.2)
    }
}

/// IP 주소의 128비트 키
pub(crate) fn ip_key(addr: &IpAddr) -> u128 {
    match addr {
        IpAddr::V4(v4) => u128::from(v4.to_ipv6_mapped()),
        IpAddr::V6(v6) => u128::from(*v6),
    }
}

/// CIDR 블록의 128비트 키 구간
pub(crate) fn network_range(net: &IpNetwork) -> (u128, u128) {
    match net {
        IpNetwork::V4(v4) => {
            let host_bits = 32 - u32::from(v4.prefix());
            let mask = u32::MAX.checked_shl(host_bits).unwrap_or(0);
            let lo = u32::from(v4.ip()) & mask;
            let hi = lo | !mask;
            let base = 0xffff_u128 << 32;
            (base | u128::from(lo), base | u128::from(hi))
        }
        IpNetwork::V6(v6) => {
            let host_bits = 128 - u32::from(v6.prefix());
            let mask = u128::MAX.checked_shl(host_bits).unwrap_or(0);
            let lo = u128::from(v6.ip()) & mask;
            (lo, lo | !mask)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_assignments_split_earlier_ones() {
        let mut map = RangeMap::new();
        map.assign(0, 99, 'a');
        map.assign(10, 19, 'b');
        assert_eq!(map.len(), 3);
        assert_eq!(map.get(5), Some('a'));
        assert_eq!(map.get(10), Some('b'));
        assert_eq!(map.get(19), Some('b'));
        assert_eq!(map.get(20), Some('a'));
        assert_eq!(map.get(100), None);
    }

    #[test]
    fn covering_assignment_replaces() {
        let mut map = RangeMap::new();
        map.assign(10, 19, 1);
        map.assign(30, 39, 2);
        map.assign(0, 50, 3);
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(35), Some(3));
    }

    #[test]
    fn edges_of_key_space() {
        let mut map = RangeMap::new();
        map.assign(0, u128::MAX, 0u8);
        map.assign(0, 0, 1);
        map.assign(u128::MAX, u128::MAX, 2);
        assert_eq!(map.get(0), Some(1));
        assert_eq!(map.get(1), Some(0));
        assert_eq!(map.get(u128::MAX), Some(2));
    }

    #[test]
    fn ipv4_networks_use_mapped_keys() {
        let net: IpNetwork = "10.0.0.0/8".parse().unwrap();
        let (lo, hi) = network_range(&net);
        let inside: IpAddr = "10.200.0.1".parse().unwrap();
        let mapped: IpAddr = "::ffff:10.200.0.1".parse().unwrap();
        assert!(lo <= ip_key(&inside) && ip_key(&inside) <= hi);
        assert_eq!(ip_key(&inside), ip_key(&mapped));
    }
}
