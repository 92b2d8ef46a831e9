//! # config 模块说明
//!
//! ## 角色定位（Why）
//! - 让部署方以 TOML 文档描述通道参数，而不必在代码里逐个 `set`；
//! - 服务端通道有两张表：作用于自身的 `[params]` 与下发给每个子通道的 `[child_params]`。
//!
//! ## 文档格式（What）
//! ```toml
//! [params]
//! auto_read = true
//!
//! [child_params]
//! accept_timeout_ms = 3000
//! auto_read = true
//! ```
//! 未知字段会被拒绝，避免拼写错误静默失效。

use serde::Deserialize;

use crate::params::{ACCEPT_TIMEOUT, AUTO_READ, Params};

/// 一张参数表的可序列化形式。
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParamsConfig {
    #[serde(default)]
    pub accept_timeout_ms: Option<u64>,
    #[serde(default)]
    pub auto_read: Option<bool>,
}

impl ParamsConfig {
    /// 把已配置的字段写入 `params`，未配置字段保持原值。
    pub fn apply_to(&self, params: &Params) {
        if let Some(ms) = self.accept_timeout_ms {
            params.set(ACCEPT_TIMEOUT, i64::try_from(ms).unwrap_or(i64::MAX));
        }
        if let Some(auto_read) = self.auto_read {
            params.set(AUTO_READ, auto_read);
        }
    }
}

/// 通道配置文档。
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelConfig {
    #[serde(default)]
    pub params: ParamsConfig,
    #[serde(default)]
    pub child_params: ParamsConfig,
}

impl ChannelConfig {
    /// 从 TOML 文本解析。
    pub fn from_toml_str(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::params::DEFAULT_ACCEPT_TIMEOUT;

    #[test]
    fn parses_both_tables() {
        let config = ChannelConfig::from_toml_str(
            r#"
            [params]
            auto_read = false

            [child_params]
            accept_timeout_ms = 1500
            auto_read = true
            "#,
        )
        .expect("valid document");

        assert_eq!(config.params.auto_read, Some(false));
        assert_eq!(config.params.accept_timeout_ms, None);
        assert_eq!(config.child_params.accept_timeout_ms, Some(1500));

        let child = Params::new();
        config.child_params.apply_to(&child);
        assert_eq!(child.accept_timeout(), Duration::from_millis(1500));
        assert_eq!(child.bool(AUTO_READ), Some(true));
    }

    #[test]
    fn empty_document_leaves_defaults() {
        let config = ChannelConfig::from_toml_str("").expect("empty is valid");
        let params = Params::new();
        config.params.apply_to(&params);
        assert!(params.is_empty());
        assert_eq!(params.accept_timeout(), DEFAULT_ACCEPT_TIMEOUT);
    }

    #[test]
    fn rejects_unknown_fields() {
        assert!(ChannelConfig::from_toml_str("[params]\naccept_timeout = 5\n").is_err());
    }
}
