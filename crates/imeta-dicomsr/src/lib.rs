//! # IMeta 结构化报告模块
//!
//! 提供DICOM结构化报告的发现与读写功能，包括：
//! - 在一组规范检查对象中定位最近的结构化报告系列
//! - 测量/标注数据模型及其报告文档编解码
//! - 报告的读取与存储交换，存储成功后使相关检查缓存失效

pub mod document;
pub mod exchange;
pub mod locator;
pub mod measurements;

pub use document::{decode_measurements, encode_measurements, ENHANCED_SR_SOP_CLASS_UID};
pub use exchange::{StoreOutcome, StructuredReportExchange};
pub use locator::{find_most_recent_structured_report, SUPPORTED_SR_SOP_CLASS_UIDS};
pub use measurements::{Measurement, MeasurementSet};
