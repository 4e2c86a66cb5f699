//! 元数据请求缓存
//!
//! 以StudyInstanceUID为键缓存检索结果，保证同一检查在任意时刻
//! 至多只有一个底层检索在途：并发调用方等待同一个缓存单元。
//! 条目只能通过显式失效或整体清空移除，不设TTL。

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Mutex, OnceCell};
use tracing::debug;

use imeta_core::{MetaError, Result, StudyFragment};

/// 缓存的检索结果；错误结果同样占据条目
type CachedStudies = std::result::Result<Arc<Vec<StudyFragment>>, MetaError>;

/// 检索失败后的缓存策略
///
/// 原始实现中失败的检索会永久留在缓存里，需手动失效后才能重试；
/// 此处将两种策略都暴露为配置项。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// 保留失败结果，直到显式失效（原始行为，默认）
    KeepFailures,
    /// 失败后自动移除条目，后续请求可直接重试
    EvictFailures,
}

/// 按检查UID去重的请求缓存
///
/// 作为显式持有的对象传递给调用方，而非模块级单例，
/// 便于测试隔离和多会话并存。
pub struct MetadataRequestCache {
    entries: Mutex<HashMap<String, Arc<OnceCell<CachedStudies>>>>,
    failure_policy: FailurePolicy,
}

impl MetadataRequestCache {
    pub fn new() -> Self {
        Self::with_policy(FailurePolicy::KeepFailures)
    }

    pub fn with_policy(failure_policy: FailurePolicy) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            failure_policy,
        }
    }

    /// 返回指定检查的缓存结果，在途检索会被等待至完成；
    /// 无条目时返回 None，不会发起新的检索
    pub async fn get(&self, study_uid: &str) -> Option<CachedStudies> {
        let cell = {
            let entries = self.entries.lock().await;
            entries.get(study_uid).cloned()
        }?;
        // 哨兵错误：单元为空且无人初始化时立即返回，不占据条目
        struct NotStarted;
        match cell
            .get_or_try_init(|| async { Err::<CachedStudies, _>(NotStarted) })
            .await
        {
            Ok(outcome) => Some(outcome.clone()),
            Err(NotStarted) => None,
        }
    }

    /// 是否存在条目（含在途请求）
    pub async fn contains(&self, study_uid: &str) -> bool {
        self.entries.lock().await.contains_key(study_uid)
    }

    /// 取出已有结果，否则执行 `factory` 发起一次检索
    ///
    /// 同一键上的并发调用共享同一个在途检索，`factory` 至多执行一次。
    pub async fn get_or_create<F, Fut>(
        &self,
        study_uid: &str,
        factory: F,
    ) -> Result<Arc<Vec<StudyFragment>>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<StudyFragment>>>,
    {
        let cell = {
            let mut entries = self.entries.lock().await;
            entries
                .entry(study_uid.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let outcome = cell
            .get_or_init(|| async move { factory().await.map(Arc::new) })
            .await
            .clone();

        if outcome.is_err() && self.failure_policy == FailurePolicy::EvictFailures {
            // 仅当条目仍指向同一单元时移除，避免误删并发期间新建的条目
            let mut entries = self.entries.lock().await;
            if let Some(current) = entries.get(study_uid) {
                if Arc::ptr_eq(current, &cell) {
                    entries.remove(study_uid);
                    debug!("Evicted failed cache entry for study {}", study_uid);
                }
            }
        }

        outcome
    }

    /// 无条件移除指定检查的缓存条目
    ///
    /// 在途检索不会被取消，其结果会落入已脱离缓存的单元。
    pub async fn invalidate(&self, study_uid: &str) -> bool {
        let removed = self.entries.lock().await.remove(study_uid).is_some();
        if removed {
            debug!("Invalidated cache entry for study {}", study_uid);
        }
        removed
    }

    /// 清空所有条目
    pub async fn purge_all(&self) {
        self.entries.lock().await.clear();
        debug!("Purged all cache entries");
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

impl Default for MetadataRequestCache {
    fn default() -> Self {
        Self::new()
    }
}
