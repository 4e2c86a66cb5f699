//! 核心数据模型定义
//!
//! 涵盖服务器配置、检查/系列元数据片段、合并后的规范检查对象，
//! 以及懒加载系列的续载接口。

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

/// 远程影像归档服务器类型
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ServerType {
    DicomWeb,
    Dimse,
    Other(String),
}

/// 远程影像归档服务器配置
///
/// 启动时加载一次，之后只读。同一检查可同时查询多个服务器。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Server {
    pub id: String,
    pub name: String,
    pub server_type: ServerType,
    /// 元数据检索根URL
    pub wado_root: String,
    /// 是否支持检查级懒加载（先返回首个系列，其余按需拉取）
    #[serde(default = "default_true")]
    pub enable_study_lazy_load: bool,
    /// 是否接受多值系列过滤；为 false 时需按单个系列UID逐一查询
    #[serde(default = "default_true")]
    pub supports_filtered_query: bool,
    /// 是否为主数据来源服务器
    #[serde(default)]
    pub is_primary_origin: bool,
}

fn default_true() -> bool {
    true
}

impl Server {
    pub fn dicom_web(id: impl Into<String>, wado_root: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            server_type: ServerType::DicomWeb,
            wado_root: wado_root.into(),
            enable_study_lazy_load: true,
            supports_filtered_query: true,
            is_primary_origin: false,
        }
    }
}

/// 元数据检索过滤条件
///
/// `series_instance_uid` 为逗号分隔的SeriesInstanceUID列表，与入站接口保持一致。
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetrieveFilters {
    pub series_instance_uid: Option<String>,
}

impl RetrieveFilters {
    /// 构造单系列过滤条件
    pub fn single(series_uid: impl Into<String>) -> Self {
        Self {
            series_instance_uid: Some(series_uid.into()),
        }
    }

    /// 拆分逗号分隔的系列UID列表，忽略空白项
    pub fn series_uid_list(&self) -> Vec<String> {
        self.series_instance_uid
            .as_deref()
            .unwrap_or("")
            .split(',')
            .map(str::trim)
            .filter(|uid| !uid.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.series_uid_list().is_empty()
    }
}

/// 单个影像实例描述
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstanceDescriptor {
    pub sop_instance_uid: String,
    /// 实例格式标识 (SOP Class UID)
    pub sop_class_uid: String,
    pub instance_number: Option<i32>,
}

/// 单次查询返回的系列元数据片段
///
/// `instances` 可能为空（仅系列级索引的占位片段），
/// 此类系列不参与结构化报告候选判定。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SeriesFragment {
    pub series_instance_uid: String,
    /// DICOM DA格式 (YYYYMMDD)，按字典序比较
    pub series_date: Option<String>,
    /// DICOM TM格式 (HHMMSS)，按字典序比较
    pub series_time: Option<String>,
    pub modality: Option<String>,
    pub description: Option<String>,
    pub instances: Vec<InstanceDescriptor>,
}

impl SeriesFragment {
    /// 首个实例的格式标识；空系列返回 None
    pub fn sop_class_uid(&self) -> Option<&str> {
        self.instances.first().map(|i| i.sop_class_uid.as_str())
    }

    pub fn has_instances(&self) -> bool {
        !self.instances.is_empty()
    }
}

/// 懒加载系列续载接口
///
/// 约定：`next()` 在全部系列取完后返回 `MetaError::Exhausted`；
/// 拉取失败时实现方必须将该系列放回待取队列，供其他拉取循环重试。
#[async_trait]
pub trait SeriesContinuation: Send + Sync + fmt::Debug {
    /// 是否还有待取系列
    async fn has_next(&self) -> bool;

    /// 拉取下一个系列的完整元数据
    async fn next(&self) -> Result<SeriesFragment>;

    /// 已成功取走系列的快照
    ///
    /// 缓存命中会复用同一续载句柄；句柄耗尽后，后续消费方通过该
    /// 快照补齐先前已流式取走的系列。
    async fn drained(&self) -> Vec<SeriesFragment> {
        Vec::new()
    }
}

/// 查询单个服务器得到的检查元数据片段
///
/// 由检索管线独占持有，合并为规范检查对象后丢弃。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudyFragment {
    pub study_instance_uid: String,
    pub series: Vec<SeriesFragment>,
    /// 系列UID到附加信息的辅助映射，合并时按首见优先取并集
    #[serde(default)]
    pub series_extra: HashMap<String, serde_json::Value>,
    /// 来源服务器
    pub origin: Server,
    /// 懒加载续载句柄；完整加载的片段为 None
    #[serde(skip)]
    pub continuation: Option<Arc<dyn SeriesContinuation>>,
}

impl StudyFragment {
    pub fn new(study_instance_uid: impl Into<String>, origin: Server) -> Self {
        Self {
            study_instance_uid: study_instance_uid.into(),
            series: Vec::new(),
            series_extra: HashMap::new(),
            origin,
            continuation: None,
        }
    }

    pub fn series_count(&self) -> usize {
        self.series.len()
    }
}

/// 由系列派生的可渲染单元
///
/// 渲染注册表本身由外部协作方实现，这里只维护派生记录。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplaySet {
    pub display_set_uid: String,
    pub series_instance_uid: String,
    pub modality: Option<String>,
    pub instance_count: usize,
}

impl DisplaySet {
    pub fn from_series(series: &SeriesFragment) -> Self {
        Self {
            display_set_uid: Uuid::new_v4().to_string(),
            series_instance_uid: series.series_instance_uid.clone(),
            modality: series.modality.clone(),
            instance_count: series.instances.len(),
        }
    }
}

/// 合并后的规范检查对象
///
/// 系列按首见顺序排列且UID唯一。仅由合并器和懒加载器修改，
/// 调用方不得直接变更。
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CanonicalStudy {
    pub study_instance_uid: String,
    pub series: Vec<SeriesFragment>,
    pub display_sets: Vec<DisplaySet>,
    pub series_extra: HashMap<String, serde_json::Value>,
}

impl CanonicalStudy {
    pub fn new(study_instance_uid: impl Into<String>) -> Self {
        Self {
            study_instance_uid: study_instance_uid.into(),
            ..Default::default()
        }
    }

    pub fn contains_series(&self, series_uid: &str) -> bool {
        self.series
            .iter()
            .any(|s| s.series_instance_uid == series_uid)
    }

    pub fn get_series(&self, series_uid: &str) -> Option<&SeriesFragment> {
        self.series
            .iter()
            .find(|s| s.series_instance_uid == series_uid)
    }

    /// 追加系列并派生对应的DisplaySet
    ///
    /// 首见优先：已存在同UID系列时丢弃新内容并返回 false。
    pub fn push_series(&mut self, series: SeriesFragment) -> bool {
        if self.contains_series(&series.series_instance_uid) {
            return false;
        }
        self.display_sets.push(DisplaySet::from_series(&series));
        self.series.push(series);
        true
    }

    /// 按当前系列顺序重建DisplaySet列表
    ///
    /// 过滤或提升重排系列后调用，保持两个列表顺序一致。
    pub fn rebuild_display_sets(&mut self) {
        self.display_sets = self.series.iter().map(DisplaySet::from_series).collect();
    }

    pub fn series_count(&self) -> usize {
        self.series.len()
    }
}
