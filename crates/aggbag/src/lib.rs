#![doc = include_str!("../README.md")]

pub mod aggbag;
pub mod bag;
pub mod codec;
pub mod convert;
pub mod error;
pub mod filter;
pub mod ipset;
pub mod projection;

// --- 주요 타입 re-export ---

// 컨테이너
pub use aggbag::{AggBag, Cursor};
pub use bag::Bag;

// 에러
pub use error::AggBagError;

// 투영 / 필터 / 변환
pub use convert::{to_bag, to_ipset};
pub use filter::{Filter, RangeBound, SetPolarity};
pub use ipset::IpSet;
pub use projection::{FieldSelection, InsertSpec, Projection};

// 코덱
pub use codec::{
    Container, WriteOptions, read_aggbag, read_bag, read_container, read_from_path, write_aggbag,
    write_aggbag_to_path, write_bag, write_bag_to_path,
};
