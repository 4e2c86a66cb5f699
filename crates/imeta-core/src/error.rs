//! 错误定义模块

use thiserror::Error;

/// 元数据检索系统统一错误类型
///
/// 所有变体均为字符串负载并实现 Clone，以便在请求缓存中存储失败结果。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetaError {
    #[error("配置错误: {0}")]
    Config(String),

    #[error("网络错误: {0}")]
    Network(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("系列加载器已耗尽")]
    Exhausted,

    #[error("无效的服务器: {0}")]
    InvalidServer(String),

    #[error("报告持久化失败: {0}")]
    Persistence(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("系统内部错误: {0}")]
    Internal(String),
}

impl MetaError {
    /// 是否为"资源未找到"类错误，供上层区分未找到与一般失败
    pub fn is_not_found(&self) -> bool {
        matches!(self, MetaError::NotFound(_))
    }
}

/// 元数据检索系统统一结果类型
pub type Result<T> = std::result::Result<T, MetaError>;
