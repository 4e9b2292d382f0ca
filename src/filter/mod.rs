//! Filter Module - Video-Filterkette
//!
//! Pro Typ höchstens ein Filter, feste Verarbeitungsreihenfolge
//! beauty → color → background → ar → custom.

mod chain;
mod effects;
mod error;
mod manager;
mod types;

pub use chain::{FilterChain, FilterEntry};
pub use error::FilterError;
pub use manager::{ArRenderer, FilterManager, SegmentationModel};
pub use types::{
    validate_filter_config, ArParams, BackgroundMode, BackgroundParams, BeautyParams,
    ColorParams, CustomFilter, FilterConfig, FilterType,
};
