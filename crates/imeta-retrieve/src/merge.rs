//! 检查片段归并
//!
//! 将N个服务器返回的（可能重叠或互补的）检查片段按StudyInstanceUID
//! 归并为唯一的规范检查对象：系列按UID去重（首见优先），辅助映射取
//! 并集，并记录是否存在多来源合并。归并后按过滤策略对系列列表做
//! 提升重排或严格过滤。

use std::collections::HashMap;

use tracing::debug;

use imeta_core::{CanonicalStudy, RetrieveFilters, StudyFragment};

/// 系列过滤策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterStrategy {
    /// 命中的系列提升到列表前部，其余保留
    Promote,
    /// 仅保留命中的系列
    Strict,
}

/// 归并结果
#[derive(Debug, Clone)]
pub struct MergedStudy {
    pub study: CanonicalStudy,
    /// 过滤列表是否全部命中；调用方据此决定是否提示
    /// "过滤条件未完全生效"
    pub promoted: bool,
    /// 同一检查的片段是否来自多个不同服务器
    pub origin_mismatch: bool,
}

/// 检查片段归并器
pub struct StudyMerger {
    strategy: FilterStrategy,
}

impl StudyMerger {
    pub fn new(strategy: FilterStrategy) -> Self {
        Self { strategy }
    }

    /// 归并一批片段，返回按首见顺序排列的规范检查对象
    ///
    /// 归并是对有序片段序列的一次规约：首个片段确定系列基准顺序，
    /// 后续片段仅补充尚未出现的系列UID。重复归并同一批片段的结果
    /// 与单次归并一致。
    pub fn merge(
        &self,
        fragments: &[StudyFragment],
        filters: Option<&RetrieveFilters>,
    ) -> Vec<MergedStudy> {
        let mut merged: Vec<MergedStudy> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut first_origin: HashMap<String, String> = HashMap::new();

        for fragment in fragments {
            let study_uid = fragment.study_instance_uid.clone();
            let slot = *index.entry(study_uid.clone()).or_insert_with(|| {
                merged.push(MergedStudy {
                    study: CanonicalStudy::new(&study_uid),
                    promoted: false,
                    origin_mismatch: false,
                });
                first_origin.insert(study_uid.clone(), fragment.origin.id.clone());
                merged.len() - 1
            });
            let entry = &mut merged[slot];

            if first_origin.get(&study_uid) != Some(&fragment.origin.id) {
                entry.origin_mismatch = true;
            }

            for series in &fragment.series {
                if !entry.study.push_series(series.clone()) {
                    debug!(
                        "Discarding duplicate series {} from server {}",
                        series.series_instance_uid, fragment.origin.id
                    );
                }
            }
            // 辅助映射并集，键冲突首见优先
            for (key, value) in &fragment.series_extra {
                entry
                    .study
                    .series_extra
                    .entry(key.clone())
                    .or_insert_with(|| value.clone());
            }
        }

        let filter_uids = filters.map(|f| f.series_uid_list()).unwrap_or_default();
        for entry in &mut merged {
            if filter_uids.is_empty() {
                entry.promoted = true;
                continue;
            }
            match self.strategy {
                FilterStrategy::Promote => {
                    entry.promoted = promote_to_front(&mut entry.study, &filter_uids);
                }
                FilterStrategy::Strict => {
                    entry
                        .study
                        .series
                        .retain(|s| filter_uids.contains(&s.series_instance_uid));
                    entry.promoted = filter_uids
                        .iter()
                        .all(|uid| entry.study.contains_series(uid));
                }
            }
            entry.study.rebuild_display_sets();
        }

        merged
    }
}

/// 将命中过滤列表的系列按列表顺序提升到前部
///
/// 返回是否每个请求的UID都被命中。
fn promote_to_front(study: &mut CanonicalStudy, filter_uids: &[String]) -> bool {
    let mut rest = std::mem::take(&mut study.series);
    let mut promoted = Vec::with_capacity(rest.len());
    let mut matched = 0;

    for uid in filter_uids {
        if let Some(pos) = rest.iter().position(|s| &s.series_instance_uid == uid) {
            promoted.push(rest.remove(pos));
            matched += 1;
        }
    }
    promoted.append(&mut rest);
    study.series = promoted;

    matched == filter_uids.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::ct_series;
    use imeta_core::Server;
    use serde_json::json;

    fn fragment(study_uid: &str, server_id: &str, series_uids: &[&str]) -> StudyFragment {
        let mut fragment = StudyFragment::new(
            study_uid,
            Server::dicom_web(server_id, "http://pacs.local/dicomweb"),
        );
        fragment.series = series_uids
            .iter()
            .map(|uid| ct_series(uid, "20240101", "090000"))
            .collect();
        fragment
    }

    fn series_uids(study: &CanonicalStudy) -> Vec<&str> {
        study
            .series
            .iter()
            .map(|s| s.series_instance_uid.as_str())
            .collect()
    }

    #[test]
    fn test_duplicate_series_deduplicated() {
        let merger = StudyMerger::new(FilterStrategy::Promote);
        let fragments = vec![
            fragment("1.2.3", "s1", &["A", "B"]),
            fragment("1.2.3", "s2", &["B", "C"]),
        ];

        let merged = merger.merge(&fragments, None);
        assert_eq!(merged.len(), 1);
        // 去重后系列数等于不同UID数
        assert_eq!(series_uids(&merged[0].study), vec!["A", "B", "C"]);
        assert_eq!(merged[0].study.display_sets.len(), 3);
        assert!(merged[0].origin_mismatch);
    }

    #[test]
    fn test_first_seen_wins_on_conflicting_content() {
        let merger = StudyMerger::new(FilterStrategy::Promote);
        let mut first = fragment("1.2.3", "s1", &["A"]);
        first.series[0].description = Some("from s1".to_string());
        let mut second = fragment("1.2.3", "s2", &["A"]);
        second.series[0].description = Some("from s2".to_string());

        let merged = merger.merge(&[first, second], None);
        assert_eq!(
            merged[0].study.series[0].description.as_deref(),
            Some("from s1")
        );
    }

    #[test]
    fn test_merge_is_idempotent() {
        let merger = StudyMerger::new(FilterStrategy::Promote);
        let fragments = vec![
            fragment("1.2.3", "s1", &["A", "B"]),
            fragment("1.2.3", "s2", &["C", "A"]),
        ];

        let once = merger.merge(&fragments, None);
        let twice = merger.merge(&fragments, None);
        assert_eq!(
            series_uids(&once[0].study),
            series_uids(&twice[0].study)
        );
        assert_eq!(once[0].study.series, twice[0].study.series);
    }

    #[test]
    fn test_series_extra_union_first_seen_wins() {
        let merger = StudyMerger::new(FilterStrategy::Promote);
        let mut first = fragment("1.2.3", "s1", &["A"]);
        first.series_extra.insert("A".to_string(), json!({"Modality": "CT"}));
        let mut second = fragment("1.2.3", "s2", &["B"]);
        second.series_extra.insert("A".to_string(), json!({"Modality": "MR"}));
        second.series_extra.insert("B".to_string(), json!({"Modality": "MR"}));

        let merged = merger.merge(&[first, second], None);
        let extra = &merged[0].study.series_extra;
        assert_eq!(extra["A"]["Modality"], "CT");
        assert_eq!(extra["B"]["Modality"], "MR");
    }

    #[test]
    fn test_promotion_reorders_and_reports_full_match() {
        let merger = StudyMerger::new(FilterStrategy::Promote);
        let fragments = vec![fragment("1.2.3", "s1", &["A", "B", "C"])];
        let filters = RetrieveFilters::single("B,A");

        let merged = merger.merge(&fragments, Some(&filters));
        assert_eq!(series_uids(&merged[0].study), vec!["B", "A", "C"]);
        assert!(merged[0].promoted);
        // DisplaySet顺序跟随提升后的系列顺序
        assert_eq!(merged[0].study.display_sets[0].series_instance_uid, "B");
    }

    #[test]
    fn test_promotion_with_unknown_uid_reports_partial_match() {
        let merger = StudyMerger::new(FilterStrategy::Promote);
        let fragments = vec![fragment("1.2.3", "s1", &["A", "B", "C"])];
        let filters = RetrieveFilters::single("B,Z");

        let merged = merger.merge(&fragments, Some(&filters));
        assert_eq!(series_uids(&merged[0].study), vec!["B", "A", "C"]);
        assert!(!merged[0].promoted);
    }

    #[test]
    fn test_strict_filter_excludes_non_matching_series() {
        let merger = StudyMerger::new(FilterStrategy::Strict);
        let fragments = vec![fragment("1.2.3", "s1", &["A", "B", "C"])];
        let filters = RetrieveFilters::single("B,A");

        let merged = merger.merge(&fragments, Some(&filters));
        assert_eq!(series_uids(&merged[0].study), vec!["A", "B"]);
        assert!(merged[0].promoted);
        assert_eq!(merged[0].study.display_sets.len(), 2);
    }

    #[test]
    fn test_distinct_studies_stay_separate() {
        let merger = StudyMerger::new(FilterStrategy::Promote);
        let fragments = vec![
            fragment("1.2.3", "s1", &["A"]),
            fragment("4.5.6", "s1", &["A"]),
            fragment("1.2.3", "s1", &["B"]),
        ];

        let merged = merger.merge(&fragments, None);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].study.study_instance_uid, "1.2.3");
        assert_eq!(series_uids(&merged[0].study), vec!["A", "B"]);
        assert_eq!(merged[1].study.study_instance_uid, "4.5.6");
        assert!(!merged[0].origin_mismatch);
    }
}
