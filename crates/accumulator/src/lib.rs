#![doc = include_str!("../README.md")]

pub mod accumulator;
pub mod country;
pub mod error;
pub mod output;
pub mod pmap;
mod range_map;
pub mod reader;
pub mod text_build;

// --- 주요 타입 re-export ---

// 누산기
pub use accumulator::{Accumulator, AccumulatorBuilder, ContainerState};
pub use output::{FieldSpec, OutputSpec, OutputTarget, validate_outputs};
pub use reader::FlowReader;

// 참조 데이터
pub use country::CountryTable;
pub use pmap::{PmapRegistry, PrefixMapFile};

// 텍스트 빌더
pub use text_build::{TextBuildOptions, TextBuilder};

// 에러
pub use error::AccumulatorError;
