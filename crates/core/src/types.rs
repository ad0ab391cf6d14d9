//! 도메인 타입 — 플로우 레코드와 TCP 비트필드
//!
//! 레코드 누산기가 소비하는 플로우 레코드와, 플래그 필드를 집합처럼 다루기 위한
//! 비트필드 타입을 정의합니다.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// ICMP 프로토콜 번호
pub const PROTO_ICMP: u8 = 1;
/// ICMPv6 프로토콜 번호
pub const PROTO_ICMPV6: u8 = 58;

bitflags! {
    /// TCP 플래그 (FIN, SYN, RST, PSH, ACK, URG, ECE, CWR)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TcpFlags: u8 {
        const FIN = 0x01;
        const SYN = 0x02;
        const RST = 0x04;
        const PSH = 0x08;
        const ACK = 0x10;
        const URG = 0x20;
        const ECE = 0x40;
        const CWR = 0x80;
    }
}

/// 표시 순서의 (문자, 플래그) 목록
const TCP_FLAG_CHARS: [(char, TcpFlags); 8] = [
    ('F', TcpFlags::FIN),
    ('S', TcpFlags::SYN),
    ('R', TcpFlags::RST),
    ('P', TcpFlags::PSH),
    ('A', TcpFlags::ACK),
    ('U', TcpFlags::URG),
    ('E', TcpFlags::ECE),
    ('C', TcpFlags::CWR),
];

impl TcpFlags {
    /// `FSRPAUEC` 문자열을 파싱합니다 (대소문자 무시, 공백 무시).
    ///
    /// 알 수 없는 문자가 있으면 그 문자를 반환합니다.
    pub fn parse_letters(text: &str) -> Result<Self, char> {
        let mut flags = Self::empty();
        for c in text.chars() {
            if c == ' ' {
                continue;
            }
            let upper = c.to_ascii_uppercase();
            match TCP_FLAG_CHARS.iter().find(|(letter, _)| *letter == upper) {
                Some((_, flag)) => flags |= *flag,
                None => return Err(c),
            }
        }
        Ok(flags)
    }

    /// 8칸 고정 폭 표현 (없는 플래그는 공백)
    pub fn padded(self) -> String {
        TCP_FLAG_CHARS
            .iter()
            .map(|(letter, flag)| if self.contains(*flag) { *letter } else { ' ' })
            .collect()
    }
}

impl fmt::Display for TcpFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (letter, flag) in TCP_FLAG_CHARS {
            if self.contains(flag) {
                write!(f, "{}", letter)?;
            }
        }
        Ok(())
    }
}

bitflags! {
    /// TCP 상태 속성 비트
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TcpState: u8 {
        /// init/session 플래그가 유효함
        const EXPANDED = 0x01;
        /// FIN 뒤에 ACK/RST 아닌 패킷이 있음
        const FIN_FOLLOWED_NOT_ACK = 0x08;
        /// 모든 패킷 크기가 같음
        const UNIFORM_PACKET_SIZE = 0x10;
        /// 수집기 타임아웃으로 조기 종료됨
        const TIMEOUT_KILLED = 0x20;
        /// 타임아웃으로 끊긴 플로우의 연속
        const TIMEOUT_STARTED = 0x40;
    }
}

/// attributes 필드에 기록되는 비트
pub const TCP_STATE_ATTRIBUTE_MASK: u8 = 0x78;

const TCP_STATE_CHARS: [(char, TcpState); 4] = [
    ('T', TcpState::TIMEOUT_KILLED),
    ('C', TcpState::TIMEOUT_STARTED),
    ('F', TcpState::FIN_FOLLOWED_NOT_ACK),
    ('S', TcpState::UNIFORM_PACKET_SIZE),
];

impl TcpState {
    /// `TCFS` 문자열을 파싱합니다 (대소문자 무시, 공백 무시).
    pub fn parse_letters(text: &str) -> Result<Self, char> {
        let mut state = Self::empty();
        for c in text.chars() {
            if c == ' ' {
                continue;
            }
            let upper = c.to_ascii_uppercase();
            match TCP_STATE_CHARS.iter().find(|(letter, _)| *letter == upper) {
                Some((_, bit)) => state |= *bit,
                None => return Err(c),
            }
        }
        Ok(state)
    }

    /// 4칸 고정 폭 표현
    pub fn padded(self) -> String {
        TCP_STATE_CHARS
            .iter()
            .map(|(letter, bit)| if self.contains(*bit) { *letter } else { ' ' })
            .collect()
    }
}

impl fmt::Display for TcpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (letter, bit) in TCP_STATE_CHARS {
            if self.contains(bit) {
                write!(f, "{}", letter)?;
            }
        }
        Ok(())
    }
}

/// 플로우 레코드
///
/// 레코드 리더(JSON lines)가 생성하고 레코드 누산기가 소비합니다.
/// 시간 값은 모두 epoch 기준 초입니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowRecord {
    /// 출발지 IP
    pub sip: IpAddr,
    /// 목적지 IP
    pub dip: IpAddr,
    /// 넥스트홉 IP
    pub nhip: IpAddr,
    /// 출발지 포트
    pub sport: u16,
    /// 목적지 포트 (ICMP이면 type/code)
    pub dport: u16,
    /// 프로토콜 (TCP=6, UDP=17 등)
    pub protocol: u8,
    /// 전체 TCP 플래그 OR
    pub flags: u8,
    /// 첫 패킷의 TCP 플래그
    pub initial_flags: u8,
    /// 나머지 패킷의 TCP 플래그 OR
    pub session_flags: u8,
    /// TCP 상태 비트
    pub tcp_state: u8,
    /// 애플리케이션 라벨 (포트 번호)
    pub application: u16,
    /// 입력 SNMP 인터페이스
    pub input: u32,
    /// 출력 SNMP 인터페이스
    pub output: u32,
    /// 시작 시각 (epoch 초)
    pub stime: u64,
    /// 지속 시간 (초)
    pub elapsed: u32,
    /// 패킷 수
    pub packets: u64,
    /// 바이트 수
    pub bytes: u64,
    /// 센서 ID
    pub sensor: u16,
    /// flowtype 클래스 ID
    pub class: u8,
    /// flowtype 타입 ID
    pub flowtype: u8,
}

impl Default for FlowRecord {
    fn default() -> Self {
        Self {
            sip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            dip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            nhip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            sport: 0,
            dport: 0,
            protocol: 0,
            flags: 0,
            initial_flags: 0,
            session_flags: 0,
            tcp_state: 0,
            application: 0,
            input: 0,
            output: 0,
            stime: 0,
            elapsed: 0,
            packets: 0,
            bytes: 0,
            sensor: 0,
            class: 0,
            flowtype: 0,
        }
    }
}

impl FlowRecord {
    /// 종료 시각 (시작 + 지속)
    pub fn etime(&self) -> u64 {
        self.stime.saturating_add(u64::from(self.elapsed))
    }

    /// ICMP(v4) 또는 IPv6 위의 ICMPv6 레코드인지 여부
    pub fn is_icmp(&self) -> bool {
        self.protocol == PROTO_ICMP || (self.protocol == PROTO_ICMPV6 && self.sip.is_ipv6())
    }

    /// ICMP type (목적지 포트 상위 바이트)
    pub fn icmp_type(&self) -> u8 {
        (self.dport >> 8) as u8
    }

    /// ICMP code (목적지 포트 하위 바이트)
    pub fn icmp_code(&self) -> u8 {
        (self.dport & 0xFF) as u8
    }

    /// 전체 TCP 플래그
    pub fn tcp_flags(&self) -> TcpFlags {
        TcpFlags::from_bits_retain(self.flags)
    }

    /// attributes 필드 값 (정의된 상태 비트만)
    pub fn attributes(&self) -> u8 {
        self.tcp_state & TCP_STATE_ATTRIBUTE_MASK
    }
}

impl fmt::Display for FlowRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{} proto={} packets={} bytes={}",
            self.sip, self.sport, self.dip, self.dport, self.protocol, self.packets, self.bytes,
        )
    }
}
