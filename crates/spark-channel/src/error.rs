//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 通道核心的所有失败都经由 [`ChannelFuture`](crate::ChannelFuture) 报告，本模块集中定义这些失败的语义；
//! - 区分“未激活”与“已关闭”、区分前置条件错误与传输错误，使调用方能够精确决定是否重试。
//!
//! ## 设计要求（What）
//! - 错误类型必须 `Clone`：一个失败的 Future 可能被任意多个观察者读取；
//! - 每个变体携带稳定错误码（`spark.channel.*`），与日志字段、告警维度保持一致。

use std::{borrow::Cow, io, sync::Arc};

use thiserror::Error;

use crate::gate::OpKind;

/// 通道核心的统一结果别名。
pub type Result<T, E = ChannelError> = std::result::Result<T, E>;

/// 通道操作失败的错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：覆盖前置条件失败（缺地址）、状态失败（未激活/已关闭）、
///   接受超时以及传输层错误四类路径；
/// - **契约 (What)**：
///   - 前五个变体与外部约定的哨兵一一对应，`Display` 文案保持稳定；
///   - `Io` 以 `Arc` 包裹底层 [`io::Error`]，使整个枚举可廉价克隆；
///   - “暂无数据”不是错误，读能力通过 [`ReadOutcome`](crate::ReadOutcome) 表达，因此永远不会出现在这里。
/// - **风险 (Trade-offs)**：`Transport` 只保留文本，丢失了原始类型；需要精确匹配的实现应优先使用 `Io`。
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum ChannelError {
    /// 绑定时未提供本地地址。
    #[error("local addr is empty")]
    LocalAddrEmpty,

    /// 连接时未提供远端地址。
    #[error("remote addr is empty")]
    RemoteAddrEmpty,

    /// 通道当前未处于活跃状态。
    #[error("channel not active")]
    NotActive,

    /// 通道已经关闭（关闭 Future 已完成）。
    #[error("channel closed")]
    Closed,

    /// 子通道在超时前未完成注册。
    #[error("accept timeout")]
    AcceptTimeout,

    /// 传输未实现该操作所需的能力。
    #[error("{0} is not supported by the transport")]
    Unsupported(OpKind),

    /// 底层 I/O 失败。
    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: Arc<io::Error>,
    },

    /// 传输层自定义失败。
    #[error("transport failure: {0}")]
    Transport(Cow<'static, str>),

    /// 无可用的异步运行时。
    #[error("runtime unavailable: {0}")]
    Runtime(Cow<'static, str>),
}

impl ChannelError {
    /// 以操作上下文包装 I/O 错误。
    pub fn io(context: &'static str, source: io::Error) -> Self {
        Self::Io {
            context,
            source: Arc::new(source),
        }
    }

    /// 构造传输层自定义错误。
    pub fn transport(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Transport(message.into())
    }

    /// 返回稳定错误码，供日志与告警聚合使用。
    pub fn code(&self) -> &'static str {
        match self {
            Self::LocalAddrEmpty => "spark.channel.local_addr_empty",
            Self::RemoteAddrEmpty => "spark.channel.remote_addr_empty",
            Self::NotActive => "spark.channel.not_active",
            Self::Closed => "spark.channel.closed",
            Self::AcceptTimeout => "spark.channel.accept_timeout",
            Self::Unsupported(_) => "spark.channel.unsupported",
            Self::Io { .. } => "spark.channel.io",
            Self::Transport(_) => "spark.channel.transport",
            Self::Runtime(_) => "spark.channel.runtime",
        }
    }

    /// 是否属于“通道不可用”类错误（未激活或已关闭）。
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::NotActive | Self::Closed)
    }
}

impl From<io::Error> for ChannelError {
    fn from(source: io::Error) -> Self {
        Self::io("io", source)
    }
}
