//! 测量/标注数据模型

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 单条临床测量/标注
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Measurement {
    pub id: String,
    pub study_instance_uid: String,
    pub series_instance_uid: String,
    pub sop_instance_uid: String,
    /// 测量工具类型 (Length, Bidirectional, EllipticalRoi等)
    pub tool_type: String,
    pub label: Option<String>,
    pub value: Option<f64>,
    pub unit: Option<String>,
    /// 图像平面坐标点
    pub points: Vec<[f64; 2]>,
}

impl Measurement {
    pub fn new(
        study_instance_uid: impl Into<String>,
        series_instance_uid: impl Into<String>,
        sop_instance_uid: impl Into<String>,
        tool_type: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            study_instance_uid: study_instance_uid.into(),
            series_instance_uid: series_instance_uid.into(),
            sop_instance_uid: sop_instance_uid.into(),
            tool_type: tool_type.into(),
            label: None,
            value: None,
            unit: None,
            points: Vec::new(),
        }
    }
}

/// 按工具类型分组的测量集合
///
/// 使用BTreeMap保证"首条测量"的取值确定，用于推导报告归属的检查。
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MeasurementSet {
    pub measurements: BTreeMap<String, Vec<Measurement>>,
}

impl MeasurementSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, measurement: Measurement) {
        self.measurements
            .entry(measurement.tool_type.clone())
            .or_default()
            .push(measurement);
    }

    pub fn is_empty(&self) -> bool {
        self.measurements.values().all(|group| group.is_empty())
    }

    pub fn total_count(&self) -> usize {
        self.measurements.values().map(Vec::len).sum()
    }

    /// 首条测量所属的检查UID，存储报告后据此使缓存失效
    pub fn first_study_uid(&self) -> Option<&str> {
        self.measurements
            .values()
            .flat_map(|group| group.iter())
            .next()
            .map(|m| m.study_instance_uid.as_str())
    }
}
