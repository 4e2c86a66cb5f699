//! 通用工具函数

use chrono::Utc;
use uuid::Uuid;

/// 生成唯一的DICOM标识符
///
/// 用于新存储结构化报告的Series/SOP Instance UID。
pub fn generate_dicom_uid() -> String {
    // 取UUID低20位十进制，保证总长不超过64字符的DICOM UID上限
    let entropy = Uuid::new_v4().as_u128() % 100_000_000_000_000_000_000u128;
    format!(
        "{}.{}.{}",
        "1.2.826.0.1.3680043.9.7433", // 企业根标识符
        entropy,
        Utc::now().timestamp()
    )
}

/// 验证DICOM UID格式
pub fn is_valid_dicom_uid(uid: &str) -> bool {
    !uid.is_empty() && uid.len() <= 64 && uid.chars().all(|c| c.is_numeric() || c == '.')
}

/// 规整检索根URL，去除末尾斜杠
pub fn normalize_wado_root(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}
