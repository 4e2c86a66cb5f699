//! 多服务器元数据检索
//!
//! 对一组配置服务器按检查UID扇出检索请求，经请求缓存去重。
//! 所有子请求并发执行，任一服务器失败即令本次聚合失败；
//! 部分容错由调用方自行处理。

use std::sync::Arc;

use tracing::{debug, info};

use imeta_core::{MetaError, Result, RetrieveFilters, Server, StudyFragment};

use crate::cache::MetadataRequestCache;
use crate::client::ArchiveClient;
use crate::loader::loader_for_server;

/// 多服务器检索器
pub struct MultiServerRetriever {
    client: Arc<dyn ArchiveClient>,
    cache: Arc<MetadataRequestCache>,
}

impl MultiServerRetriever {
    pub fn new(client: Arc<dyn ArchiveClient>, cache: Arc<MetadataRequestCache>) -> Self {
        Self { client, cache }
    }

    pub fn cache(&self) -> &Arc<MetadataRequestCache> {
        &self.cache
    }

    /// 检索多个检查的元数据
    ///
    /// 外层每个检查一项，内层为各服务器（及各拆分过滤调用）的片段。
    pub async fn retrieve_studies(
        &self,
        servers: &[Server],
        study_uids: &[String],
        filters: Option<&RetrieveFilters>,
        separate_filter_calls: bool,
    ) -> Result<Vec<Arc<Vec<StudyFragment>>>> {
        let mut results = Vec::with_capacity(study_uids.len());
        for study_uid in study_uids {
            results.push(
                self.retrieve_study(servers, study_uid, filters, separate_filter_calls)
                    .await?,
            );
        }
        Ok(results)
    }

    /// 检索单个检查的元数据，经缓存去重
    ///
    /// 同一检查的重复请求直接命中缓存中的在途或已完成结果。
    pub async fn retrieve_study(
        &self,
        servers: &[Server],
        study_uid: &str,
        filters: Option<&RetrieveFilters>,
        separate_filter_calls: bool,
    ) -> Result<Arc<Vec<StudyFragment>>> {
        if servers.is_empty() {
            return Err(MetaError::Config(
                "required 'servers' parameter not provided".to_string(),
            ));
        }
        if study_uid.is_empty() {
            return Err(MetaError::Config(
                "required 'StudyInstanceUID' parameter not provided".to_string(),
            ));
        }

        let filters = filters.cloned().unwrap_or_default();
        let client = self.client.clone();
        let servers = servers.to_vec();
        let uid = study_uid.to_string();

        self.cache
            .get_or_create(study_uid, move || async move {
                if separate_filter_calls && !filters.is_empty() {
                    separate_filter_requests(client, servers, uid, filters).await
                } else {
                    fan_out(client, servers, uid, filters).await
                }
            })
            .await
    }

    /// 使指定检查的缓存条目失效，下次检索将重新发起请求
    pub async fn invalidate_study(&self, study_uid: &str) -> bool {
        info!("Invalidating study metadata for {}", study_uid);
        self.cache.invalidate(study_uid).await
    }
}

/// 对每个服务器发起一次加载，全部成功才返回
async fn fan_out(
    client: Arc<dyn ArchiveClient>,
    servers: Vec<Server>,
    study_uid: String,
    filters: RetrieveFilters,
) -> Result<Vec<StudyFragment>> {
    debug!(
        "Fanning out study {} retrieval to {} server(s)",
        study_uid,
        servers.len()
    );

    let mut handles = Vec::with_capacity(servers.len());
    for server in servers {
        let loader = loader_for_server(client.clone(), server, study_uid.clone(), filters.clone());
        handles.push(tokio::spawn(async move { loader.exec_load().await }));
    }

    let mut fragments = Vec::with_capacity(handles.len());
    for handle in handles {
        let fragment = handle
            .await
            .map_err(|e| MetaError::Internal(format!("retrieval task failed: {}", e)))??;
        fragments.push(fragment);
    }
    Ok(fragments)
}

/// 按系列UID拆分过滤请求
///
/// 不接受多值过滤的服务器按 (系列UID, 服务器) 逐对发起请求，
/// 其余服务器一次携带完整过滤集；结果平铺聚合，不保证跨服务器顺序。
async fn separate_filter_requests(
    client: Arc<dyn ArchiveClient>,
    servers: Vec<Server>,
    study_uid: String,
    filters: RetrieveFilters,
) -> Result<Vec<StudyFragment>> {
    let series_uids = filters.series_uid_list();
    let (single_filter, multi_filter): (Vec<Server>, Vec<Server>) = servers
        .into_iter()
        .partition(|server| !server.supports_filtered_query);

    let mut handles = Vec::new();
    for series_uid in &series_uids {
        for server in &single_filter {
            let client = client.clone();
            let server = server.clone();
            let study_uid = study_uid.clone();
            let single = RetrieveFilters::single(series_uid.clone());
            handles.push(tokio::spawn(async move {
                fan_out(client, vec![server], study_uid, single).await
            }));
        }
    }
    if !multi_filter.is_empty() {
        let client = client.clone();
        let study_uid = study_uid.clone();
        let filters = filters.clone();
        handles.push(tokio::spawn(async move {
            fan_out(client, multi_filter, study_uid, filters).await
        }));
    }

    let mut fragments = Vec::new();
    for handle in handles {
        let batch = handle
            .await
            .map_err(|e| MetaError::Internal(format!("retrieval task failed: {}", e)))??;
        fragments.extend(batch);
    }
    Ok(fragments)
}
