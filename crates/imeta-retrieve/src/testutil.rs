//! 测试辅助：以内存数据应答的归档客户端

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::Value;

use imeta_core::{
    InstanceDescriptor, MetaError, Result, RetrieveFilters, SeriesFragment, Server,
};

use crate::client::{ArchiveClient, SeriesSummary};

/// 内存归档客户端，记录系列索引查询次数
pub(crate) struct FakeArchiveClient {
    pub series: HashMap<String, Vec<SeriesSummary>>,
    pub fragments: HashMap<String, SeriesFragment>,
    pub query_calls: AtomicUsize,
}

impl FakeArchiveClient {
    pub fn new() -> Self {
        Self {
            series: HashMap::new(),
            fragments: HashMap::new(),
            query_calls: AtomicUsize::new(0),
        }
    }

    /// 为指定检查准备一组单实例CT系列
    pub fn with_series(study_uid: &str, uids: &[&str]) -> Self {
        let mut client = Self::new();
        client.add_study(study_uid, uids);
        client
    }

    pub fn add_study(&mut self, study_uid: &str, uids: &[&str]) {
        let summaries = uids
            .iter()
            .map(|uid| SeriesSummary {
                series_instance_uid: uid.to_string(),
                series_date: Some("20240101".to_string()),
                series_time: Some("090000".to_string()),
                modality: Some("CT".to_string()),
                instance_count: Some(1),
            })
            .collect();
        self.series.insert(study_uid.to_string(), summaries);
        for uid in uids {
            self.fragments
                .insert(uid.to_string(), ct_series(uid, "20240101", "090000"));
        }
    }

    pub fn query_count(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }
}

/// 构造带单个CT实例的系列片段
pub(crate) fn ct_series(uid: &str, date: &str, time: &str) -> SeriesFragment {
    SeriesFragment {
        series_instance_uid: uid.to_string(),
        series_date: Some(date.to_string()),
        series_time: Some(time.to_string()),
        modality: Some("CT".to_string()),
        description: None,
        instances: vec![InstanceDescriptor {
            sop_instance_uid: format!("{}.1", uid),
            sop_class_uid: "1.2.840.10008.5.1.4.1.1.2".to_string(),
            instance_number: Some(1),
        }],
    }
}

#[async_trait]
impl ArchiveClient for FakeArchiveClient {
    async fn query_series(
        &self,
        _server: &Server,
        study_uid: &str,
        filters: &RetrieveFilters,
    ) -> Result<Vec<SeriesSummary>> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        let all = self
            .series
            .get(study_uid)
            .cloned()
            .ok_or_else(|| MetaError::NotFound(study_uid.to_string()))?;
        let wanted = filters.series_uid_list();
        if wanted.is_empty() {
            return Ok(all);
        }
        Ok(all
            .into_iter()
            .filter(|s| wanted.contains(&s.series_instance_uid))
            .collect())
    }

    async fn fetch_series(
        &self,
        _server: &Server,
        _study_uid: &str,
        series_uid: &str,
    ) -> Result<SeriesFragment> {
        self.fragments
            .get(series_uid)
            .cloned()
            .ok_or_else(|| MetaError::NotFound(series_uid.to_string()))
    }

    async fn fetch_instance_content(
        &self,
        _server: &Server,
        _study_uid: &str,
        _series_uid: &str,
        sop_instance_uid: &str,
    ) -> Result<Value> {
        Err(MetaError::NotFound(sop_instance_uid.to_string()))
    }

    async fn store_instances(
        &self,
        _server: &Server,
        _study_uid: Option<&str>,
        _payload: &Value,
    ) -> Result<()> {
        Ok(())
    }
}
