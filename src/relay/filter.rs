//! 包名过滤策略

use crate::config::FilterConfig;

/// 是否考虑转发来自 `package` 的通知
///
/// 仅当过滤开启、白名单非空且包名不在白名单中时返回 `false`
pub fn should_consider(package: &str, config: &FilterConfig) -> bool {
    !(config.filter_enabled
        && !config.allowed_packages.is_empty()
        && !config.allowed_packages.contains(package))
}
