//! 服务器加载策略
//!
//! 按服务器能力在两种加载器间选择：
//! - 同步加载器：等待完整系列列表后才返回
//! - 懒加载器：仅取首个系列即返回，其余系列通过续载句柄按需拉取

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info};

use imeta_core::{
    MetaError, Result, RetrieveFilters, SeriesContinuation, SeriesFragment, Server, StudyFragment,
};

use crate::client::{ArchiveClient, SeriesSummary};

/// 元数据加载器接口
#[async_trait]
pub trait MetadataLoader: Send + Sync {
    /// 执行加载，返回该服务器的检查元数据片段
    async fn exec_load(&self) -> Result<StudyFragment>;
}

/// 按服务器的懒加载能力选择加载器
pub fn loader_for_server(
    client: Arc<dyn ArchiveClient>,
    server: Server,
    study_uid: impl Into<String>,
    filters: RetrieveFilters,
) -> Box<dyn MetadataLoader> {
    let study_uid = study_uid.into();
    if server.enable_study_lazy_load {
        Box::new(LazyMetadataLoader::new(client, server, study_uid, filters))
    } else {
        Box::new(EagerMetadataLoader::new(client, server, study_uid, filters))
    }
}

/// 将系列摘要记录到片段的辅助映射中
fn record_series_extra(fragment: &mut StudyFragment, summary: &SeriesSummary) {
    fragment.series_extra.insert(
        summary.series_instance_uid.clone(),
        json!({
            "Modality": summary.modality,
            "SeriesDate": summary.series_date,
            "SeriesTime": summary.series_time,
            "NumberOfSeriesRelatedInstances": summary.instance_count,
        }),
    );
}

/// 同步（完整）加载器
///
/// 适用于不支持或不宜增量返回的服务器。
pub struct EagerMetadataLoader {
    client: Arc<dyn ArchiveClient>,
    server: Server,
    study_uid: String,
    filters: RetrieveFilters,
}

impl EagerMetadataLoader {
    pub fn new(
        client: Arc<dyn ArchiveClient>,
        server: Server,
        study_uid: String,
        filters: RetrieveFilters,
    ) -> Self {
        Self {
            client,
            server,
            study_uid,
            filters,
        }
    }
}

#[async_trait]
impl MetadataLoader for EagerMetadataLoader {
    async fn exec_load(&self) -> Result<StudyFragment> {
        let summaries = self
            .client
            .query_series(&self.server, &self.study_uid, &self.filters)
            .await?;
        debug!(
            "Eager load of study {} from {}: {} series",
            self.study_uid,
            self.server.id,
            summaries.len()
        );

        let mut fragment = StudyFragment::new(&self.study_uid, self.server.clone());

        // 并发获取全部系列元数据，按索引顺序回收保持系列次序
        let mut handles = Vec::new();
        for summary in &summaries {
            record_series_extra(&mut fragment, summary);
            let client = self.client.clone();
            let server = self.server.clone();
            let study_uid = self.study_uid.clone();
            let series_uid = summary.series_instance_uid.clone();
            handles.push(tokio::spawn(async move {
                client.fetch_series(&server, &study_uid, &series_uid).await
            }));
        }

        for handle in handles {
            let series = handle
                .await
                .map_err(|e| MetaError::Internal(format!("series fetch task failed: {}", e)))??;
            fragment.series.push(series);
        }

        Ok(fragment)
    }
}

/// 懒加载器
///
/// 仅拉取首个系列的完整元数据，其余系列UID交给续载句柄。
pub struct LazyMetadataLoader {
    client: Arc<dyn ArchiveClient>,
    server: Server,
    study_uid: String,
    filters: RetrieveFilters,
}

impl LazyMetadataLoader {
    pub fn new(
        client: Arc<dyn ArchiveClient>,
        server: Server,
        study_uid: String,
        filters: RetrieveFilters,
    ) -> Self {
        Self {
            client,
            server,
            study_uid,
            filters,
        }
    }
}

#[async_trait]
impl MetadataLoader for LazyMetadataLoader {
    async fn exec_load(&self) -> Result<StudyFragment> {
        let summaries = self
            .client
            .query_series(&self.server, &self.study_uid, &self.filters)
            .await?;
        info!(
            "Lazy load of study {} from {}: {} series indexed",
            self.study_uid,
            self.server.id,
            summaries.len()
        );

        let mut fragment = StudyFragment::new(&self.study_uid, self.server.clone());
        for summary in &summaries {
            record_series_extra(&mut fragment, summary);
        }

        let mut remaining: VecDeque<String> = summaries
            .iter()
            .map(|s| s.series_instance_uid.clone())
            .collect();

        if let Some(first_uid) = remaining.pop_front() {
            let first = self
                .client
                .fetch_series(&self.server, &self.study_uid, &first_uid)
                .await?;
            fragment.series.push(first);
        }

        if !remaining.is_empty() {
            fragment.continuation = Some(Arc::new(WadoSeriesContinuation::new(
                self.client.clone(),
                self.server.clone(),
                self.study_uid.clone(),
                remaining,
            )));
        }

        Ok(fragment)
    }
}

/// 基于待取系列UID队列的续载句柄
///
/// 拉取失败时将系列UID放回队首，由其他拉取循环重试。
pub struct WadoSeriesContinuation {
    client: Arc<dyn ArchiveClient>,
    server: Server,
    study_uid: String,
    pending: Mutex<VecDeque<String>>,
    fetched: Mutex<Vec<SeriesFragment>>,
}

impl WadoSeriesContinuation {
    pub fn new(
        client: Arc<dyn ArchiveClient>,
        server: Server,
        study_uid: String,
        pending: VecDeque<String>,
    ) -> Self {
        Self {
            client,
            server,
            study_uid,
            pending: Mutex::new(pending),
            fetched: Mutex::new(Vec::new()),
        }
    }
}

impl fmt::Debug for WadoSeriesContinuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WadoSeriesContinuation")
            .field("server", &self.server.id)
            .field("study_uid", &self.study_uid)
            .finish()
    }
}

#[async_trait]
impl SeriesContinuation for WadoSeriesContinuation {
    async fn has_next(&self) -> bool {
        !self.pending.lock().await.is_empty()
    }

    async fn next(&self) -> Result<SeriesFragment> {
        let series_uid = {
            let mut pending = self.pending.lock().await;
            pending.pop_front().ok_or(MetaError::Exhausted)?
        };

        match self
            .client
            .fetch_series(&self.server, &self.study_uid, &series_uid)
            .await
        {
            Ok(series) => {
                self.fetched.lock().await.push(series.clone());
                Ok(series)
            }
            Err(e) => {
                // 放回队首供重试
                self.pending.lock().await.push_front(series_uid);
                Err(e)
            }
        }
    }

    async fn drained(&self) -> Vec<SeriesFragment> {
        self.fetched.lock().await.clone()
    }
}
