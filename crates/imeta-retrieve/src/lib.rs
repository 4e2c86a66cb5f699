//! # IMeta 检索模块
//!
//! 提供检查元数据的获取、缓存与合并功能，包括：
//! - 按检查UID去重的元数据请求缓存，支持显式失效
//! - 多服务器并发扇出检索，支持按系列过滤拆分请求
//! - 有界并发的懒加载系列拉取循环
//! - 多来源片段到规范检查对象的归并
//! - 会话级编排器，串起检索、懒加载与合并

pub mod cache;
pub mod client;
pub mod lazy;
pub mod loader;
pub mod merge;
pub mod retrieve;
pub mod session;

#[cfg(test)]
pub(crate) mod testutil;

pub use cache::{FailurePolicy, MetadataRequestCache};
pub use client::{ArchiveClient, DicomWebClient, SeriesSummary};
pub use lazy::{LazySeriesLoader, LoadReport, StudyUpdate};
pub use loader::{loader_for_server, EagerMetadataLoader, LazyMetadataLoader, MetadataLoader};
pub use merge::{FilterStrategy, MergedStudy, StudyMerger};
pub use retrieve::MultiServerRetriever;
pub use session::{SessionConfig, StudyDataSession};
