//! # server 模块说明
//!
//! ## 角色定位（Why）
//! - 服务端通道（如监听套接字）负责派生子通道、登记它们、下发子参数与共享的子 Handler，
//!   并在关停时协调子通道的退出；
//! - 子通道表以 serial 为键，接受任务插入、子通道关闭回调删除，两者可以并发发生。
//!
//! ## 契约（What）
//! - 子通道在进入子通道表之前已完成组装并设置父引用；
//! - 子参数在派生时整体复制，之后服务端的参数变更只影响新派生的子通道；
//! - 服务端失活时在独立任务中关闭所有仍活跃的子通道，[`ServerChannel::wait_children`]
//!   是调用方等待它们全部退出的同步点。
//!
//! ## 实现策略（How）
//! - 子通道表使用 `DashMap`，遍历前先收集快照，避免在持有分片锁时调用通道操作。

use std::{fmt, ops::Deref, sync::Arc};

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::runtime::Handle;
use tracing::debug;

use crate::{
    channel::{Channel, resolve_runtime},
    config::ChannelConfig,
    error::Result,
    params::{ParamKey, ParamValue, Params},
    pipeline::Handler,
    transport::Transport,
};

/// 子 Handler 在子通道管线中的名字。
pub const ROOT_HANDLER: &str = "ROOT";

pub(crate) struct ServerState {
    children: DashMap<u64, Channel>,
    child_handler: RwLock<Option<Arc<dyn Handler>>>,
    child_params: Params,
}

impl ServerState {
    fn new(child_handler: Option<Arc<dyn Handler>>, child_params: Params) -> Self {
        Self {
            children: DashMap::new(),
            child_handler: RwLock::new(child_handler),
            child_params,
        }
    }
}

/// 服务端通道视图。
///
/// 通过 [`Deref`] 暴露全部 [`Channel`] 能力，额外提供子通道管理。
#[derive(Clone)]
pub struct ServerChannel {
    channel: Channel,
    state: Arc<ServerState>,
}

impl ServerChannel {
    pub(crate) fn from_parts(channel: Channel, state: Arc<ServerState>) -> Self {
        Self { channel, state }
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// 设置此后派生的子通道共享的子 Handler。
    pub fn set_child_handler(&self, handler: Arc<dyn Handler>) -> &Self {
        *self.state.child_handler.write() = Some(handler);
        self
    }

    /// 设置子参数；只影响此后派生的子通道。
    pub fn set_child_param(&self, key: ParamKey, value: impl Into<ParamValue>) -> &Self {
        self.state.child_params.set(key, value);
        self
    }

    pub fn child_params(&self) -> &Params {
        &self.state.child_params
    }

    /// 派生并登记一个子通道。
    ///
    /// # 教案式说明
    /// - **步骤（How）**：
    ///   1. 以服务端为父组装子通道（共享服务端的运行时）；
    ///   2. 以 serial 为键写入子通道表；
    ///   3. 复制当前全部子参数；
    ///   4. 调用传输的 `init` 钩子，失败时撤销登记并返回错误；
    ///   5. 若配置了子 Handler，以 [`ROOT_HANDLER`] 为名装入管线首位；
    ///   6. 关闭 Future 完成时把子通道从表中释放。
    /// - **契约（What）**：返回的子通道尚未激活，由接受循环负责注册与激活。
    pub fn derive_child_channel(&self, transport: impl Transport) -> Result<Channel> {
        self.derive_child_from_arc(Arc::new(transport))
    }

    pub fn derive_child_from_arc(&self, transport: Arc<dyn Transport>) -> Result<Channel> {
        let child = Channel::assemble(
            Arc::clone(&transport),
            Some(self.channel.downgrade()),
            None,
            Params::new(),
            self.channel.runtime().clone(),
        );
        self.state.children.insert(child.serial(), child.clone());
        child.params().copy_from(&self.state.child_params);

        if let Err(err) = transport.init(&child) {
            self.state.children.remove(&child.serial());
            return Err(err);
        }

        let handler = self.state.child_handler.read().clone();
        if let Some(handler) = handler {
            child.pipeline().add_first(ROOT_HANDLER, handler);
        }

        child.close_future().then(|closed| {
            if let Some(child) = closed.channel() {
                child.release();
            }
        });

        debug!(
            channel_id = %child.id(),
            parent_id = %self.channel.id(),
            "child channel derived"
        );
        Ok(child)
    }

    /// 从子通道表中移除；返回该子通道此前是否在表中。
    pub(crate) fn release_child(&self, child: &Channel) -> bool {
        let removed = self.state.children.remove(&child.serial()).is_some();
        if removed {
            debug!(
                channel_id = %child.id(),
                parent_id = %self.channel.id(),
                "child channel released"
            );
        }
        removed
    }

    /// 当前全部子通道的快照。
    pub fn children(&self) -> Vec<Channel> {
        self.state
            .children
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn child(&self, serial: u64) -> Option<Channel> {
        self.state
            .children
            .get(&serial)
            .map(|entry| entry.value().clone())
    }

    pub fn child_count(&self) -> usize {
        self.state.children.len()
    }

    /// 等待调用时刻登记在表中的每个子通道关闭完成。
    ///
    /// 本方法不会主动关闭子通道。
    pub async fn wait_children(&self) {
        for child in self.children() {
            child.close_future().wait().await;
        }
    }

    /// [`wait_children`](Self::wait_children) 的阻塞版本，不可在 Tokio 工作线程上调用。
    pub fn wait_children_blocking(&self) {
        for child in self.children() {
            child.close_future().sync();
        }
    }

    /// 关闭所有仍活跃的子通道，由服务端失活触发。
    pub(crate) fn deactivate_children(&self) {
        for child in self.children() {
            if child.is_active() {
                child.close();
            }
        }
    }
}

impl Deref for ServerChannel {
    type Target = Channel;

    fn deref(&self) -> &Channel {
        &self.channel
    }
}

impl fmt::Debug for ServerChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerChannel")
            .field("channel", &self.channel)
            .field("children", &self.child_count())
            .finish()
    }
}

/// 服务端通道构建器。
pub struct ServerChannelBuilder {
    transport: Arc<dyn Transport>,
    handlers: Vec<(String, Arc<dyn Handler>)>,
    params: Params,
    child_params: Params,
    child_handler: Option<Arc<dyn Handler>>,
    runtime: Option<Handle>,
}

impl ServerChannelBuilder {
    pub fn new(transport: impl Transport) -> Self {
        Self::from_arc(Arc::new(transport))
    }

    pub fn from_arc(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            handlers: Vec::new(),
            params: Params::new(),
            child_params: Params::new(),
            child_handler: None,
            runtime: None,
        }
    }

    pub fn handler(mut self, name: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        self.handlers.push((name.into(), handler));
        self
    }

    pub fn child_handler(mut self, handler: Arc<dyn Handler>) -> Self {
        self.child_handler = Some(handler);
        self
    }

    pub fn param(self, key: ParamKey, value: impl Into<ParamValue>) -> Self {
        self.params.set(key, value);
        self
    }

    pub fn child_param(self, key: ParamKey, value: impl Into<ParamValue>) -> Self {
        self.child_params.set(key, value);
        self
    }

    /// 应用配置文档中的 `[params]` 与 `[child_params]` 表。
    pub fn config(self, config: &ChannelConfig) -> Self {
        config.params.apply_to(&self.params);
        config.child_params.apply_to(&self.child_params);
        self
    }

    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    pub fn build(self) -> Result<ServerChannel> {
        let runtime = resolve_runtime(self.runtime)?;
        let state = Arc::new(ServerState::new(self.child_handler, self.child_params));
        let channel = Channel::assemble(
            Arc::clone(&self.transport),
            None,
            Some(Arc::clone(&state)),
            self.params,
            runtime,
        );
        self.transport.init(&channel)?;
        for (name, handler) in self.handlers {
            channel.pipeline().add_last(&name, handler);
        }
        Ok(ServerChannel::from_parts(channel, state))
    }
}
