//! 结构化报告读写交换
//!
//! 从定位到的最近报告中读取既往测量，或将新测量集存为新报告。
//! 存储成功后使受影响检查的缓存条目失效，使后续检索能看到新报告；
//! 存储失败时缓存保持原样（宁可陈旧，不做无谓抖动）。

use std::sync::Arc;

use tracing::{error, info};

use imeta_core::{CanonicalStudy, MetaError, Result, Server, ServerType};
use imeta_retrieve::{ArchiveClient, MetadataRequestCache};

use crate::document::{decode_measurements, encode_measurements};
use crate::locator::find_most_recent_structured_report;
use crate::measurements::MeasurementSet;

/// 存储成功的回执
#[derive(Debug, Clone)]
pub struct StoreOutcome {
    pub message: String,
    /// 已失效缓存的检查UID（测量集为空时为 None）
    pub invalidated_study_uid: Option<String>,
}

/// 结构化报告交换器
pub struct StructuredReportExchange {
    client: Arc<dyn ArchiveClient>,
    cache: Arc<MetadataRequestCache>,
}

impl StructuredReportExchange {
    pub fn new(client: Arc<dyn ArchiveClient>, cache: Arc<MetadataRequestCache>) -> Self {
        Self { client, cache }
    }

    /// 读取最近结构化报告中的测量集合
    ///
    /// 无候选报告时返回空集合；服务器缺失或类型不符返回
    /// `InvalidServer`，仅该调用失败。
    pub async fn retrieve_measurements(
        &self,
        server: &Server,
        studies: &[CanonicalStudy],
    ) -> Result<MeasurementSet> {
        ensure_dicom_web(server)?;
        info!("Retrieving measurements from most recent structured report");

        // 所属检查由定位器一并给出，系列UID跨检查可能重复
        let (study, located) = match find_most_recent_structured_report(studies) {
            Some(found) => found,
            None => return Ok(MeasurementSet::new()),
        };
        // 候选系列保证至少有一个实例
        let instance = located.instances.first().ok_or_else(|| {
            MetaError::Internal("located report series has no instances".to_string())
        })?;

        let dataset = self
            .client
            .fetch_instance_content(
                server,
                &study.study_instance_uid,
                &located.series_instance_uid,
                &instance.sop_instance_uid,
            )
            .await?;
        decode_measurements(&dataset)
    }

    /// 将测量集合存为新的结构化报告
    ///
    /// 仅在提交成功后使受影响检查的缓存条目失效；
    /// 失败以 `Persistence` 包装底层原因返回，缓存不动。
    pub async fn store_measurements(
        &self,
        set: &MeasurementSet,
        server: &Server,
    ) -> Result<StoreOutcome> {
        ensure_dicom_web(server)?;
        info!("Storing {} measurement(s) as structured report", set.total_count());

        let study_uid = set.first_study_uid().map(str::to_string);
        let payload = encode_measurements(set)?;

        if let Err(e) = self
            .client
            .store_instances(server, study_uid.as_deref(), &payload)
            .await
        {
            error!("Error while saving the measurements: {}", e);
            return Err(MetaError::Persistence(format!(
                "error while saving the measurements: {}",
                e
            )));
        }

        if let Some(uid) = &study_uid {
            self.cache.invalidate(uid).await;
        }

        Ok(StoreOutcome {
            message: "Measurements saved successfully".to_string(),
            invalidated_study_uid: study_uid,
        })
    }
}

fn ensure_dicom_web(server: &Server) -> Result<()> {
    if server.server_type != ServerType::DicomWeb {
        return Err(MetaError::InvalidServer(format!(
            "DICOMweb server is required, got {:?}",
            server.server_type
        )));
    }
    Ok(())
}
