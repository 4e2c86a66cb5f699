//! 懒加载系列拉取循环
//!
//! 将检查片段的续载句柄驱动到耗尽：启动至多C个并发拉取循环，
//! 每取到一个系列即追加到规范检查对象并发出更新通知。
//! 单个循环的失败只记录不中断其余循环，尽量多取数据。

use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

use imeta_core::{CanonicalStudy, MetaError, SeriesContinuation};

/// 系列追加后的更新通知，供外部观察者（如UI重渲染）消费
#[derive(Debug, Clone)]
pub struct StudyUpdate {
    pub study_instance_uid: String,
    pub series_instance_uid: String,
}

/// 一次懒加载运行的结果
///
/// 失败在全部循环结束后统一上报；已取得的系列保留在检查对象中。
#[derive(Debug, Default)]
pub struct LoadReport {
    pub appended: usize,
    pub failures: Vec<MetaError>,
}

impl LoadReport {
    pub fn first_failure(&self) -> Option<&MetaError> {
        self.failures.first()
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// 有界并发的懒加载驱动器
pub struct LazySeriesLoader {
    max_concurrent: Option<usize>,
}

impl LazySeriesLoader {
    /// `max_concurrent` 未设置时回退为已知的剩余系列数
    pub fn new(max_concurrent: Option<usize>) -> Self {
        Self { max_concurrent }
    }

    /// 驱动续载句柄直至耗尽，将取得的系列追加到共享检查对象
    ///
    /// `remaining_hint` 为该检查已知的待取系列数，用作并发度回退值。
    /// 同一循环内系列追加与更新通知先于下一次拉取发生；
    /// 跨循环的系列到达顺序不作任何保证。
    pub async fn load_remaining(
        &self,
        study: Arc<RwLock<CanonicalStudy>>,
        continuation: Arc<dyn SeriesContinuation>,
        remaining_hint: usize,
        updates: Option<mpsc::UnboundedSender<StudyUpdate>>,
    ) -> LoadReport {
        let concurrency = self.max_concurrent.unwrap_or(remaining_hint).max(1);
        debug!("Starting {} series pull loops", concurrency);

        let mut handles = Vec::with_capacity(concurrency);
        for _ in 0..concurrency {
            let study = study.clone();
            let continuation = continuation.clone();
            let updates = updates.clone();
            handles.push(tokio::spawn(async move {
                pull_loop(study, continuation, updates).await
            }));
        }

        let mut report = LoadReport::default();
        for handle in handles {
            match handle.await {
                Ok((appended, failure)) => {
                    report.appended += appended;
                    report.failures.extend(failure);
                }
                Err(e) => report
                    .failures
                    .push(MetaError::Internal(format!("pull loop panicked: {}", e))),
            }
        }

        if let Some(failure) = report.first_failure() {
            warn!(
                "Lazy series load finished with {} appended, first failure: {}",
                report.appended, failure
            );
        } else {
            debug!("Lazy series load finished with {} appended", report.appended);
        }
        report
    }
}

/// 单个拉取循环
///
/// 兄弟循环竞争导致的 `Exhausted` 属于正常终止；其他错误记录后
/// 结束本循环，失败的系列已由续载句柄放回队列，由其余循环接手。
async fn pull_loop(
    study: Arc<RwLock<CanonicalStudy>>,
    continuation: Arc<dyn SeriesContinuation>,
    updates: Option<mpsc::UnboundedSender<StudyUpdate>>,
) -> (usize, Option<MetaError>) {
    let mut appended = 0;
    loop {
        if !continuation.has_next().await {
            return (appended, None);
        }
        match continuation.next().await {
            Ok(series) => {
                let series_uid = series.series_instance_uid.clone();
                let (study_uid, added) = {
                    let mut study = study.write().await;
                    (study.study_instance_uid.clone(), study.push_series(series))
                };
                if added {
                    appended += 1;
                    if let Some(tx) = &updates {
                        let _ = tx.send(StudyUpdate {
                            study_instance_uid: study_uid,
                            series_instance_uid: series_uid,
                        });
                    }
                }
            }
            Err(MetaError::Exhausted) => return (appended, None),
            Err(e) => return (appended, Some(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::ct_series;
    use async_trait::async_trait;
    use imeta_core::{Result, SeriesFragment};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Mutex;

    /// 可注入单次瞬时失败的内存续载句柄
    #[derive(Debug)]
    struct ScriptedContinuation {
        pending: Mutex<VecDeque<SeriesFragment>>,
        fail_once_on: Option<String>,
        failed: AtomicBool,
    }

    impl ScriptedContinuation {
        fn new(series: Vec<SeriesFragment>, fail_once_on: Option<&str>) -> Self {
            Self {
                pending: Mutex::new(series.into()),
                fail_once_on: fail_once_on.map(str::to_string),
                failed: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl SeriesContinuation for ScriptedContinuation {
        async fn has_next(&self) -> bool {
            !self.pending.lock().await.is_empty()
        }

        async fn next(&self) -> Result<SeriesFragment> {
            let series = {
                let mut pending = self.pending.lock().await;
                pending.pop_front().ok_or(MetaError::Exhausted)?
            };
            if Some(&series.series_instance_uid) == self.fail_once_on.as_ref()
                && !self.failed.swap(true, Ordering::SeqCst)
            {
                // 与真实续载句柄一致：失败的系列放回队列
                self.pending.lock().await.push_front(series);
                return Err(MetaError::Network("transient fetch failure".to_string()));
            }
            Ok(series)
        }
    }

    fn five_series() -> Vec<SeriesFragment> {
        (1..=5)
            .map(|i| ct_series(&format!("1.{}", i), "20240101", "090000"))
            .collect()
    }

    #[tokio::test]
    async fn test_loads_all_series_to_completion() {
        let study = Arc::new(RwLock::new(CanonicalStudy::new("1.2.3")));
        let continuation = Arc::new(ScriptedContinuation::new(five_series(), None));

        let loader = LazySeriesLoader::new(Some(2));
        let report = loader
            .load_remaining(study.clone(), continuation, 5, None)
            .await;

        assert_eq!(report.appended, 5);
        assert!(report.is_complete());
        assert_eq!(study.read().await.series_count(), 5);
    }

    #[tokio::test]
    async fn test_transient_failure_does_not_halt_siblings() {
        let study = Arc::new(RwLock::new(CanonicalStudy::new("1.2.3")));
        let continuation = Arc::new(ScriptedContinuation::new(five_series(), Some("1.3")));

        let loader = LazySeriesLoader::new(Some(2));
        let report = loader
            .load_remaining(study.clone(), continuation, 5, None)
            .await;

        // 一次瞬时失败被记录，但5个系列全部取齐
        assert_eq!(report.appended, 5);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(study.read().await.series_count(), 5);
    }

    #[tokio::test]
    async fn test_update_notifications_per_appended_series() {
        let study = Arc::new(RwLock::new(CanonicalStudy::new("1.2.3")));
        let continuation = Arc::new(ScriptedContinuation::new(five_series(), None));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let loader = LazySeriesLoader::new(None); // 回退为剩余系列数
        let report = loader
            .load_remaining(study, continuation, 5, Some(tx))
            .await;
        assert_eq!(report.appended, 5);

        let mut notified = 0;
        while let Ok(update) = rx.try_recv() {
            assert_eq!(update.study_instance_uid, "1.2.3");
            notified += 1;
        }
        assert_eq!(notified, 5);
    }

    #[tokio::test]
    async fn test_zero_hint_still_runs_one_loop() {
        let study = Arc::new(RwLock::new(CanonicalStudy::new("1.2.3")));
        let continuation = Arc::new(ScriptedContinuation::new(Vec::new(), None));

        let loader = LazySeriesLoader::new(None);
        let report = loader.load_remaining(study, continuation, 0, None).await;
        assert_eq!(report.appended, 0);
        assert!(report.is_complete());
    }
}
