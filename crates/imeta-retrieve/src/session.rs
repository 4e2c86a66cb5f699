//! 会话级检索编排
//!
//! 串起完整的检索管线：多服务器检索 → 片段归并 → 懒加载续载驱动。
//! 规范检查对象在会话存续期间有效，切换当前检查选择时整体清空。

use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::{error, info};

use imeta_core::{MetaError, Result, RetrieveFilters, Server};

use crate::cache::{FailurePolicy, MetadataRequestCache};
use crate::client::ArchiveClient;
use crate::lazy::{LazySeriesLoader, StudyUpdate};
use crate::merge::{FilterStrategy, MergedStudy, StudyMerger};
use crate::retrieve::MultiServerRetriever;

/// 会话配置
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// 系列过滤策略：提升重排或严格过滤
    pub filter_strategy: FilterStrategy,
    /// 懒加载拉取循环的并发上限；未设置时回退为各检查的已知系列数
    pub max_concurrent_metadata_requests: Option<usize>,
    /// 是否将多值系列过滤拆分为独立请求
    pub separate_filter_calls: bool,
    /// 检索失败结果的缓存策略
    pub failure_policy: FailurePolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            filter_strategy: FilterStrategy::Promote,
            max_concurrent_metadata_requests: None,
            separate_filter_calls: false,
            failure_policy: FailurePolicy::KeepFailures,
        }
    }
}

/// 检查数据会话
///
/// 每个规范检查对象同一时刻只归一个会话管线所有；
/// 懒加载期间的并发追加由管线内部的读写锁保护。
pub struct StudyDataSession {
    retriever: MultiServerRetriever,
    merger: StudyMerger,
    lazy_loader: LazySeriesLoader,
    config: SessionConfig,
    updates: Option<mpsc::UnboundedSender<StudyUpdate>>,
}

impl StudyDataSession {
    pub fn new(client: Arc<dyn ArchiveClient>, config: SessionConfig) -> Self {
        let cache = Arc::new(MetadataRequestCache::with_policy(config.failure_policy));
        Self {
            retriever: MultiServerRetriever::new(client, cache),
            merger: StudyMerger::new(config.filter_strategy),
            lazy_loader: LazySeriesLoader::new(config.max_concurrent_metadata_requests),
            config,
            updates: None,
        }
    }

    /// 注册系列追加通知通道（如UI重渲染触发器）
    pub fn with_updates(mut self, updates: mpsc::UnboundedSender<StudyUpdate>) -> Self {
        self.updates = Some(updates);
        self
    }

    pub fn retriever(&self) -> &MultiServerRetriever {
        &self.retriever
    }

    /// 加载一批检查并归并为规范检查对象
    ///
    /// 懒加载片段的剩余系列在归并后继续流式追加；懒加载失败只记录
    /// 日志并保留已取得的部分系列（宁缺毋无）。
    pub async fn load_studies(
        &self,
        servers: &[Server],
        study_uids: &[String],
        filters: Option<&RetrieveFilters>,
    ) -> Result<Vec<MergedStudy>> {
        let per_study = self
            .retriever
            .retrieve_studies(
                servers,
                study_uids,
                filters,
                self.config.separate_filter_calls,
            )
            .await?;

        let mut loaded = Vec::new();
        for fragments in per_study {
            let mut merged = self.merger.merge(&fragments, filters);

            // 驱动各片段的续载句柄，将剩余系列追加进已归并的检查
            for entry in &mut merged {
                let continuations: Vec<_> = fragments
                    .iter()
                    .filter(|f| f.study_instance_uid == entry.study.study_instance_uid)
                    .filter_map(|f| {
                        f.continuation
                            .clone()
                            .map(|c| (c, f.series_extra.len().saturating_sub(f.series_count())))
                    })
                    .collect();
                if continuations.is_empty() {
                    continue;
                }

                let study_uid = entry.study.study_instance_uid.clone();
                let shared = Arc::new(RwLock::new(std::mem::take(&mut entry.study)));
                for (continuation, remaining_hint) in continuations {
                    let report = self
                        .lazy_loader
                        .load_remaining(
                            shared.clone(),
                            continuation.clone(),
                            remaining_hint,
                            self.updates.clone(),
                        )
                        .await;
                    if let Some(failure) = report.first_failure() {
                        error!(
                            "Lazy series load for study {} left {} failure(s): {}",
                            study_uid,
                            report.failures.len(),
                            failure
                        );
                    }
                    // 缓存命中时句柄已耗尽，用快照补齐先前流走的系列
                    let drained = continuation.drained().await;
                    let mut study = shared.write().await;
                    for series in drained {
                        study.push_series(series);
                    }
                }
                entry.study = Arc::try_unwrap(shared)
                    .map_err(|_| {
                        MetaError::Internal("canonical study still shared after load".to_string())
                    })?
                    .into_inner();
            }

            loaded.extend(merged);
        }

        info!("Loaded {} canonical study(ies)", loaded.len());
        Ok(loaded)
    }

    /// 使单个检查的缓存失效
    pub async fn invalidate_study(&self, study_uid: &str) -> bool {
        self.retriever.invalidate_study(study_uid).await
    }

    /// 切换当前检查选择时清空会话缓存
    pub async fn purge(&self) {
        self.retriever.cache().purge_all().await;
    }
}
