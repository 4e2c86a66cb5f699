//! 结构化报告文档编解码
//!
//! 将测量集合序列化为DICOM JSON形式的Enhanced SR数据集，以及从
//! 已检索的报告数据集还原测量集合。内容序列采用简化编码，
//! 并非完整的TID 1500模板。

use chrono::Utc;
use serde_json::{json, Value};

use imeta_core::utils::generate_dicom_uid;
use imeta_core::{MetaError, Result};

use crate::measurements::MeasurementSet;

/// Enhanced SR存储SOP Class UID，新存储的报告使用该格式
pub const ENHANCED_SR_SOP_CLASS_UID: &str = "1.2.840.10008.5.1.4.1.1.88.22";

const TAG_SOP_CLASS_UID: &str = "00080016";
const TAG_SOP_INSTANCE_UID: &str = "00080018";
const TAG_SERIES_DATE: &str = "00080021";
const TAG_SERIES_TIME: &str = "00080031";
const TAG_MODALITY: &str = "00080060";
const TAG_STUDY_INSTANCE_UID: &str = "0020000D";
const TAG_SERIES_INSTANCE_UID: &str = "0020000E";
const CONTENT_KEY: &str = "ContentSequence";

fn uid_attr(uid: &str) -> Value {
    json!({ "vr": "UI", "Value": [uid] })
}

/// 将测量集合编码为新报告数据集
///
/// 生成新的Series/SOP Instance UID，并以当前时间作为系列日期时间，
/// 使该报告成为最近报告候选。
pub fn encode_measurements(set: &MeasurementSet) -> Result<Value> {
    let now = Utc::now();
    let study_uid = set.first_study_uid().unwrap_or_default();

    let content = serde_json::to_value(set)
        .map_err(|e| MetaError::Serialization(format!("encode measurements: {}", e)))?;

    Ok(json!({
        TAG_SOP_CLASS_UID: uid_attr(ENHANCED_SR_SOP_CLASS_UID),
        TAG_SOP_INSTANCE_UID: uid_attr(&generate_dicom_uid()),
        TAG_STUDY_INSTANCE_UID: uid_attr(study_uid),
        TAG_SERIES_INSTANCE_UID: uid_attr(&generate_dicom_uid()),
        TAG_SERIES_DATE: { "vr": "DA", "Value": [now.format("%Y%m%d").to_string()] },
        TAG_SERIES_TIME: { "vr": "TM", "Value": [now.format("%H%M%S").to_string()] },
        TAG_MODALITY: { "vr": "CS", "Value": ["SR"] },
        CONTENT_KEY: content,
    }))
}

/// 从报告数据集还原测量集合
pub fn decode_measurements(dataset: &Value) -> Result<MeasurementSet> {
    let content = match dataset.get(CONTENT_KEY) {
        Some(content) => content,
        // 缺少内容序列的报告按空测量集处理
        None => return Ok(MeasurementSet::new()),
    };

    serde_json::from_value(content.clone())
        .map_err(|e| MetaError::Serialization(format!("decode measurements: {}", e)))
}
