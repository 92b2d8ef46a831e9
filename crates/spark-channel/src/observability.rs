//! # observability 模块说明
//!
//! 通道核心只通过 `tracing` 宏输出结构化日志（字段 `channel_id`、`op`、`error`），
//! 不持有任何全局状态。宿主若没有自己的 Subscriber，可调用
//! [`install_fmt_subscriber`] 获得一个 `registry + EnvFilter + fmt` 的最小组合。

use thiserror::Error;
use tracing::dispatcher;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt};

/// 安装日志 Subscriber 时可能出现的错误。
#[derive(Debug, Error)]
pub enum ObservabilityError {
    /// 进程内已存在全局 Subscriber。
    #[error("a global tracing subscriber has already been installed")]
    SubscriberAlreadySet,

    /// `tracing` 拒绝设置全局 Subscriber。
    #[error("failed to set global subscriber: {0}")]
    SetGlobalSubscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// 安装全局 fmt Subscriber。
///
/// # 教案式说明
/// - **意图（Why）**：测试与示例程序需要一行代码即可看到通道生命周期日志；
/// - **逻辑（How）**：优先读取 `RUST_LOG`，缺省时使用 `default_directive`（如 `"spark_channel=debug"`），
///   再与 fmt Layer 组合后设置为全局默认；
/// - **契约（What）**：重复调用或外部已安装时返回 [`ObservabilityError::SubscriberAlreadySet`]，不会覆盖已有配置。
pub fn install_fmt_subscriber(default_directive: &str) -> Result<(), ObservabilityError> {
    if dispatcher::has_been_set() {
        return Err(ObservabilityError::SubscriberAlreadySet);
    }
    let subscriber = tracing_subscriber::registry()
        .with(build_env_filter(default_directive))
        .with(tracing_subscriber::fmt::layer().with_target(true));
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn build_env_filter(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_install_is_rejected() {
        // 同一测试二进制里的其他用例可能已安装过，因此第一次结果两种都接受。
        match install_fmt_subscriber("spark_channel=debug") {
            Ok(()) | Err(ObservabilityError::SubscriberAlreadySet) => {}
            Err(other) => panic!("unexpected install failure: {other}"),
        }
        assert!(matches!(
            install_fmt_subscriber("spark_channel=trace"),
            Err(ObservabilityError::SubscriberAlreadySet)
        ));
    }
}
