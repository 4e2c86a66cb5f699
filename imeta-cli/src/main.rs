//! 检查元数据检索命令行工具
//!
//! 从一个或多个DICOMweb服务器拉取检查元数据，归并后输出规范
//! 检查摘要，并定位最近的结构化报告。

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use tracing::{info, warn};

use imeta_core::{RetrieveFilters, Server};
use imeta_dicomsr::find_most_recent_structured_report;
use imeta_retrieve::{
    DicomWebClient, FailurePolicy, FilterStrategy, SessionConfig, StudyDataSession,
};

/// 命令行参数
#[derive(Parser, Debug)]
#[command(name = "imeta-cli")]
#[command(about = "影像检查元数据检索工具")]
struct Args {
    /// 要检索的StudyInstanceUID，可指定多个
    #[arg(short = 'u', long = "study-uid", required = true)]
    study_uids: Vec<String>,

    /// DICOMweb服务器根URL，可指定多个；与 --config 二选一
    #[arg(short = 's', long = "server-url")]
    server_urls: Vec<String>,

    /// 服务器配置文件路径 (toml/json/yaml，含 servers 数组)
    #[arg(short, long)]
    config: Option<String>,

    /// 逗号分隔的SeriesInstanceUID过滤列表
    #[arg(long)]
    series_filter: Option<String>,

    /// 严格过滤（仅保留命中的系列），默认为提升重排
    #[arg(long, default_value_t = false)]
    strict_filter: bool,

    /// 将多值系列过滤拆分为独立请求
    #[arg(long, default_value_t = false)]
    separate_filter_calls: bool,

    /// 懒加载系列拉取的最大并发数
    #[arg(long)]
    max_concurrent: Option<usize>,

    /// 检索失败后自动移出缓存，允许直接重试
    #[arg(long, default_value_t = false)]
    evict_failures: bool,

    /// 日志级别
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

/// 配置文件结构
#[derive(Debug, Deserialize)]
struct FileConfig {
    servers: Vec<Server>,
}

fn load_servers(args: &Args) -> Result<Vec<Server>> {
    if let Some(path) = &args.config {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .build()
            .with_context(|| format!("无法读取配置文件 {}", path))?;
        let file_config: FileConfig = settings
            .try_deserialize()
            .context("配置文件缺少有效的 servers 数组")?;
        return Ok(file_config.servers);
    }

    Ok(args
        .server_urls
        .iter()
        .enumerate()
        .map(|(index, url)| Server::dicom_web(format!("server-{}", index + 1), url.as_str()))
        .collect())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(args.log_level.as_str())
        .init();

    let servers = load_servers(&args)?;
    if servers.is_empty() {
        anyhow::bail!("未配置任何服务器，请指定 --server-url 或 --config");
    }
    info!("Retrieving {} study(ies) from {} server(s)", args.study_uids.len(), servers.len());

    let session_config = SessionConfig {
        filter_strategy: if args.strict_filter {
            FilterStrategy::Strict
        } else {
            FilterStrategy::Promote
        },
        max_concurrent_metadata_requests: args.max_concurrent,
        separate_filter_calls: args.separate_filter_calls,
        failure_policy: if args.evict_failures {
            FailurePolicy::EvictFailures
        } else {
            FailurePolicy::KeepFailures
        },
    };
    let session = StudyDataSession::new(Arc::new(DicomWebClient::new()), session_config);

    let filters = args.series_filter.as_ref().map(|list| RetrieveFilters {
        series_instance_uid: Some(list.clone()),
    });

    let loaded = session
        .load_studies(&servers, &args.study_uids, filters.as_ref())
        .await
        .context("检查元数据检索失败")?;

    for entry in &loaded {
        if !entry.promoted {
            warn!(
                "Series filter was not fully applied for study {}",
                entry.study.study_instance_uid
            );
        }
        let summary = serde_json::json!({
            "StudyInstanceUID": entry.study.study_instance_uid,
            "seriesCount": entry.study.series_count(),
            "displaySetCount": entry.study.display_sets.len(),
            "originMismatch": entry.origin_mismatch,
            "series": entry.study.series.iter().map(|s| {
                serde_json::json!({
                    "SeriesInstanceUID": s.series_instance_uid,
                    "Modality": s.modality,
                    "instanceCount": s.instances.len(),
                })
            }).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }

    let studies: Vec<_> = loaded.into_iter().map(|entry| entry.study).collect();
    match find_most_recent_structured_report(&studies) {
        Some((study, series)) => info!(
            "Most recent structured report: study {} series {} ({} {})",
            study.study_instance_uid,
            series.series_instance_uid,
            series.series_date.as_deref().unwrap_or("-"),
            series.series_time.as_deref().unwrap_or("-")
        ),
        None => info!("No structured report found"),
    }

    Ok(())
}
