//! 结构化报告定位
//!
//! 在一组规范检查对象中扫描全部系列，从受支持报告格式的候选中
//! 选出日期时间最近的一个。

use tracing::debug;

use imeta_core::{CanonicalStudy, SeriesFragment};

/// 受支持的结构化报告SOP Class UID白名单
pub const SUPPORTED_SR_SOP_CLASS_UIDS: [&str; 3] = [
    "1.2.840.10008.5.1.4.1.1.88.22",
    "1.2.840.10008.5.1.4.1.1.11.1",
    "1.2.840.10008.5.1.4.1.1.88.34", // COMPREHENSIVE_3D_SR
];

/// 查找最近的结构化报告系列，返回其所属检查与系列
///
/// 候选需至少包含一个实例且首实例格式在白名单内；
/// 仅严格更晚的 (SeriesDate, SeriesTime) 才会替换当前选择，
/// 时间相同时保留先遇到的系列。无候选时返回 None。
/// 系列UID仅在检查内唯一，因此所属检查必须随系列一起返回，
/// 不能事后按UID反查。
pub fn find_most_recent_structured_report(
    studies: &[CanonicalStudy],
) -> Option<(&CanonicalStudy, &SeriesFragment)> {
    let mut most_recent: Option<(&CanonicalStudy, &SeriesFragment)> = None;

    for study in studies {
        for series in &study.series {
            // 跳过尚未取得实例列表的占位系列
            if !series.has_instances() {
                continue;
            }
            if !is_structured_report_series(series) {
                continue;
            }
            match most_recent {
                Some((_, current)) if !is_newer(series, current) => {}
                _ => most_recent = Some((study, series)),
            }
        }
    }

    if let Some((study, series)) = most_recent {
        debug!(
            "Most recent structured report: study {} series {}",
            study.study_instance_uid, series.series_instance_uid
        );
    }
    most_recent
}

/// 系列首实例的格式标识是否为受支持的报告格式
fn is_structured_report_series(series: &SeriesFragment) -> bool {
    series
        .sop_class_uid()
        .map(|uid| SUPPORTED_SR_SOP_CLASS_UIDS.contains(&uid))
        .unwrap_or(false)
}

/// a 是否严格晚于 b
fn is_newer(a: &SeriesFragment, b: &SeriesFragment) -> bool {
    let (a_date, b_date) = (
        a.series_date.as_deref().unwrap_or(""),
        b.series_date.as_deref().unwrap_or(""),
    );
    let (a_time, b_time) = (
        a.series_time.as_deref().unwrap_or(""),
        b.series_time.as_deref().unwrap_or(""),
    );
    a_date > b_date || (a_date == b_date && a_time > b_time)
}
