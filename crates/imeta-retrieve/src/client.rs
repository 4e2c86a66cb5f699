//! 影像归档服务器客户端
//!
//! 定义出站检索接口 `ArchiveClient`，并提供基于DICOMweb
//! (QIDO-RS/WADO-RS/STOW-RS) 的reqwest实现。线上格式对本系统不透明，
//! 仅抽取检查/系列/实例标识、日期时间与格式标识等字段。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use imeta_core::utils::normalize_wado_root;
use imeta_core::{
    InstanceDescriptor, MetaError, Result, RetrieveFilters, SeriesFragment, Server,
};

// DICOM JSON属性标签
const TAG_SOP_CLASS_UID: &str = "00080016";
const TAG_SOP_INSTANCE_UID: &str = "00080018";
const TAG_SERIES_DATE: &str = "00080021";
const TAG_SERIES_TIME: &str = "00080031";
const TAG_MODALITY: &str = "00080060";
const TAG_SERIES_DESCRIPTION: &str = "0008103E";
const TAG_SERIES_INSTANCE_UID: &str = "0020000E";
const TAG_INSTANCE_NUMBER: &str = "00200013";
const TAG_RELATED_INSTANCES: &str = "00201209";

/// 系列级查询返回的摘要信息
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SeriesSummary {
    pub series_instance_uid: String,
    pub series_date: Option<String>,
    pub series_time: Option<String>,
    pub modality: Option<String>,
    pub instance_count: Option<u32>,
}

/// 出站归档服务器接口
///
/// 检索管线只依赖该trait，便于在测试中以内存实现替换网络调用。
#[async_trait]
pub trait ArchiveClient: Send + Sync {
    /// 查询检查下的系列索引，可附带系列过滤
    async fn query_series(
        &self,
        server: &Server,
        study_uid: &str,
        filters: &RetrieveFilters,
    ) -> Result<Vec<SeriesSummary>>;

    /// 获取单个系列的完整元数据（含实例列表）
    async fn fetch_series(
        &self,
        server: &Server,
        study_uid: &str,
        series_uid: &str,
    ) -> Result<SeriesFragment>;

    /// 获取单个实例的内容数据集
    async fn fetch_instance_content(
        &self,
        server: &Server,
        study_uid: &str,
        series_uid: &str,
        sop_instance_uid: &str,
    ) -> Result<Value>;

    /// 向归档服务器提交新实例（结构化报告存储）
    async fn store_instances(
        &self,
        server: &Server,
        study_uid: Option<&str>,
        payload: &Value,
    ) -> Result<()>;
}

/// 基于reqwest的DICOMweb客户端实现
pub struct DicomWebClient {
    client: reqwest::Client,
}

impl DicomWebClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    async fn get_json(&self, url: &str, query: &[(String, String)]) -> Result<Value> {
        debug!("GET {}", url);
        let response = self
            .client
            .get(url)
            .query(query)
            .header("Accept", "application/dicom+json")
            .send()
            .await
            .map_err(|e| MetaError::Network(format!("request to {} failed: {}", url, e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(MetaError::NotFound(url.to_string()));
        }
        if !status.is_success() {
            return Err(MetaError::Network(format!(
                "request to {} failed with status {}",
                url, status
            )));
        }
        // 空响应体 (204) 视为空结果集
        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(Value::Array(Vec::new()));
        }

        response
            .json()
            .await
            .map_err(|e| MetaError::Network(format!("invalid response from {}: {}", url, e)))
    }
}

impl Default for DicomWebClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ArchiveClient for DicomWebClient {
    async fn query_series(
        &self,
        server: &Server,
        study_uid: &str,
        filters: &RetrieveFilters,
    ) -> Result<Vec<SeriesSummary>> {
        let root = normalize_wado_root(&server.wado_root);
        let url = format!("{}/studies/{}/series", root, study_uid);

        let query: Vec<(String, String)> = filters
            .series_uid_list()
            .into_iter()
            .map(|uid| ("SeriesInstanceUID".to_string(), uid))
            .collect();

        let body = self.get_json(&url, &query).await?;
        let datasets = body
            .as_array()
            .ok_or_else(|| MetaError::Network(format!("unexpected QIDO response from {}", url)))?;

        let mut summaries = Vec::new();
        for dataset in datasets {
            match parse_series_summary(dataset) {
                Some(summary) => summaries.push(summary),
                None => warn!("Skipping QIDO dataset without SeriesInstanceUID"),
            }
        }
        Ok(summaries)
    }

    async fn fetch_series(
        &self,
        server: &Server,
        study_uid: &str,
        series_uid: &str,
    ) -> Result<SeriesFragment> {
        let root = normalize_wado_root(&server.wado_root);
        let url = format!("{}/studies/{}/series/{}/metadata", root, study_uid, series_uid);

        let body = self.get_json(&url, &[]).await?;
        let datasets = body
            .as_array()
            .ok_or_else(|| MetaError::Network(format!("unexpected WADO response from {}", url)))?;

        Ok(parse_series_fragment(series_uid, datasets))
    }

    async fn fetch_instance_content(
        &self,
        server: &Server,
        study_uid: &str,
        series_uid: &str,
        sop_instance_uid: &str,
    ) -> Result<Value> {
        let root = normalize_wado_root(&server.wado_root);
        let url = format!(
            "{}/studies/{}/series/{}/instances/{}/metadata",
            root, study_uid, series_uid, sop_instance_uid
        );

        let body = self.get_json(&url, &[]).await?;
        // WADO元数据响应为数据集数组，取首个
        match body {
            Value::Array(mut datasets) if !datasets.is_empty() => Ok(datasets.remove(0)),
            other => Ok(other),
        }
    }

    async fn store_instances(
        &self,
        server: &Server,
        study_uid: Option<&str>,
        payload: &Value,
    ) -> Result<()> {
        let root = normalize_wado_root(&server.wado_root);
        let url = match study_uid {
            Some(uid) => format!("{}/studies/{}", root, uid),
            None => format!("{}/studies", root),
        };

        debug!("POST {}", url);
        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/dicom+json")
            .json(payload)
            .send()
            .await
            .map_err(|e| MetaError::Network(format!("request to {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(MetaError::Network(format!(
                "store to {} failed with status {}",
                url, status
            )));
        }
        Ok(())
    }
}

/// 提取DICOM JSON属性的首个字符串值
fn tag_str(dataset: &Value, tag: &str) -> Option<String> {
    dataset
        .get(tag)
        .and_then(|attr| attr.get("Value"))
        .and_then(|values| values.get(0))
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

/// 提取DICOM JSON属性的首个整数值；兼容字符串编码的数字
fn tag_i64(dataset: &Value, tag: &str) -> Option<i64> {
    let value = dataset
        .get(tag)
        .and_then(|attr| attr.get("Value"))
        .and_then(|values| values.get(0))?;
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn parse_series_summary(dataset: &Value) -> Option<SeriesSummary> {
    Some(SeriesSummary {
        series_instance_uid: tag_str(dataset, TAG_SERIES_INSTANCE_UID)?,
        series_date: tag_str(dataset, TAG_SERIES_DATE),
        series_time: tag_str(dataset, TAG_SERIES_TIME),
        modality: tag_str(dataset, TAG_MODALITY),
        instance_count: tag_i64(dataset, TAG_RELATED_INSTANCES).map(|n| n.max(0) as u32),
    })
}

/// 从实例数据集数组构建系列片段，系列级属性取自首个实例
fn parse_series_fragment(series_uid: &str, datasets: &[Value]) -> SeriesFragment {
    let first = datasets.first();
    let instances = datasets
        .iter()
        .filter_map(|dataset| {
            Some(InstanceDescriptor {
                sop_instance_uid: tag_str(dataset, TAG_SOP_INSTANCE_UID)?,
                sop_class_uid: tag_str(dataset, TAG_SOP_CLASS_UID).unwrap_or_default(),
                instance_number: tag_i64(dataset, TAG_INSTANCE_NUMBER).map(|n| n as i32),
            })
        })
        .collect();

    SeriesFragment {
        series_instance_uid: series_uid.to_string(),
        series_date: first.and_then(|d| tag_str(d, TAG_SERIES_DATE)),
        series_time: first.and_then(|d| tag_str(d, TAG_SERIES_TIME)),
        modality: first.and_then(|d| tag_str(d, TAG_MODALITY)),
        description: first.and_then(|d| tag_str(d, TAG_SERIES_DESCRIPTION)),
        instances,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_series_summary() {
        let dataset = json!({
            "0020000E": { "vr": "UI", "Value": ["1.2.3.4"] },
            "00080021": { "vr": "DA", "Value": ["20240101"] },
            "00080031": { "vr": "TM", "Value": ["101530"] },
            "00080060": { "vr": "CS", "Value": ["CT"] },
            "00201209": { "vr": "IS", "Value": [42] }
        });

        let summary = parse_series_summary(&dataset).unwrap();
        assert_eq!(summary.series_instance_uid, "1.2.3.4");
        assert_eq!(summary.series_date.as_deref(), Some("20240101"));
        assert_eq!(summary.series_time.as_deref(), Some("101530"));
        assert_eq!(summary.modality.as_deref(), Some("CT"));
        assert_eq!(summary.instance_count, Some(42));
    }

    #[test]
    fn test_parse_series_summary_requires_uid() {
        let dataset = json!({
            "00080060": { "vr": "CS", "Value": ["CT"] }
        });
        assert!(parse_series_summary(&dataset).is_none());
    }

    #[test]
    fn test_parse_instance_count_from_string() {
        let dataset = json!({
            "0020000E": { "vr": "UI", "Value": ["1.2.3.4"] },
            "00201209": { "vr": "IS", "Value": ["17"] }
        });
        let summary = parse_series_summary(&dataset).unwrap();
        assert_eq!(summary.instance_count, Some(17));
    }

    #[test]
    fn test_parse_series_fragment() {
        let datasets = vec![
            json!({
                "00080016": { "vr": "UI", "Value": ["1.2.840.10008.5.1.4.1.1.2"] },
                "00080018": { "vr": "UI", "Value": ["1.2.3.4.1"] },
                "00080021": { "vr": "DA", "Value": ["20240101"] },
                "00200013": { "vr": "IS", "Value": [1] }
            }),
            json!({
                "00080016": { "vr": "UI", "Value": ["1.2.840.10008.5.1.4.1.1.2"] },
                "00080018": { "vr": "UI", "Value": ["1.2.3.4.2"] },
                "00200013": { "vr": "IS", "Value": [2] }
            }),
        ];

        let series = parse_series_fragment("1.2.3.4", &datasets);
        assert_eq!(series.series_instance_uid, "1.2.3.4");
        assert_eq!(series.series_date.as_deref(), Some("20240101"));
        assert_eq!(series.instances.len(), 2);
        assert_eq!(series.sop_class_uid(), Some("1.2.840.10008.5.1.4.1.1.2"));
        assert_eq!(series.instances[1].instance_number, Some(2));
    }

    #[test]
    fn test_parse_empty_series_fragment() {
        let series = parse_series_fragment("1.2.3.4", &[]);
        assert!(!series.has_instances());
        assert!(series.sop_class_uid().is_none());
    }
}
