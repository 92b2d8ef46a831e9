//! # pipeline 模块说明
//!
//! ## 角色定位（Why）
//! - 通道核心通过 `fire_*` 系列方法把生命周期事件与入站消息送入 Handler 链；
//! - 链路本身保持最小：有名字的有序 Handler、默认“原样转发”的事件回调，以及写/关闭两个出站入口。
//!
//! ## 实现策略（How）
//! - Handler 链保存在 `ArcSwap<Vec<Arc<HandlerEntry>>>` 中，事件分发读取无锁快照；
//! - 变更在 `mutation` 互斥锁下复制向量、插入或删除节点，再原子替换；
//! - 事件从下标 0 开始，由每个 Handler 决定是否调用 `ctx.fire_*` 继续向后传递，越过末尾即到达尾部。
//!
//! ## 风险与考量（Trade-offs）
//! - 分发期间读到的是调用开始时的快照，回调中增删 Handler 只影响后续事件。

use std::{any::Any, fmt, sync::Arc};

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::trace;

use crate::{
    channel::{Channel, WeakChannel},
    error::ChannelError,
    future::ChannelFuture,
};

/// 管线中流动的消息。
pub type Message = Box<dyn Any + Send>;

/// 入站 Handler。
///
/// 默认实现一律把事件原样转发给下一个 Handler，实现方只覆盖关心的回调。
/// Handler 以 `&self` 接收事件，需要状态时自行使用内部可变性。
pub trait Handler: Send + Sync + 'static {
    /// 被加入某条管线后调用一次。
    fn added(&self, _ctx: &HandlerContext<'_>) {}

    fn registered(&self, ctx: &HandlerContext<'_>) {
        ctx.fire_registered();
    }

    fn active(&self, ctx: &HandlerContext<'_>) {
        ctx.fire_active();
    }

    fn inactive(&self, ctx: &HandlerContext<'_>) {
        ctx.fire_inactive();
    }

    fn read(&self, ctx: &HandlerContext<'_>, message: Message) {
        ctx.fire_read(message);
    }

    fn read_completed(&self, ctx: &HandlerContext<'_>) {
        ctx.fire_read_completed();
    }

    fn error_caught(&self, ctx: &HandlerContext<'_>, error: &ChannelError) {
        ctx.fire_error_caught(error);
    }
}

struct HandlerEntry {
    name: Arc<str>,
    handler: Arc<dyn Handler>,
}

type Chain = Vec<Arc<HandlerEntry>>;

/// Handler 回调期间可见的上下文。
///
/// # 教案式说明
/// - **意图（Why）**：让 Handler 在不持有管线的情况下访问所属通道并继续传递事件；
/// - **契约（What）**：`fire_*` 把事件交给链上的下一个 Handler，到达末尾后事件被丢弃（记录 TRACE 日志）；
///   `write`/`close` 直接作用于通道，返回对应操作的 [`ChannelFuture`]。
pub struct HandlerContext<'a> {
    channel: &'a Channel,
    chain: &'a [Arc<HandlerEntry>],
    index: usize,
}

impl<'a> HandlerContext<'a> {
    pub fn channel(&self) -> &'a Channel {
        self.channel
    }

    /// 当前 Handler 的名字。
    pub fn name(&self) -> &'a str {
        self.chain
            .get(self.index)
            .map(|entry| &*entry.name)
            .unwrap_or_default()
    }

    pub fn pipeline(&self) -> &'a Pipeline {
        self.channel.pipeline()
    }

    pub fn write(&self, message: Message) -> ChannelFuture {
        self.channel.write(message)
    }

    pub fn close(&self) -> ChannelFuture {
        self.channel.close()
    }

    fn next(&self) -> Option<(&'a Arc<HandlerEntry>, HandlerContext<'a>)> {
        let index = self.index + 1;
        self.chain.get(index).map(|entry| {
            (
                entry,
                HandlerContext {
                    channel: self.channel,
                    chain: self.chain,
                    index,
                },
            )
        })
    }

    pub fn fire_registered(&self) {
        match self.next() {
            Some((entry, ctx)) => entry.handler.registered(&ctx),
            None => self.tail("registered"),
        }
    }

    pub fn fire_active(&self) {
        match self.next() {
            Some((entry, ctx)) => entry.handler.active(&ctx),
            None => self.tail("active"),
        }
    }

    pub fn fire_inactive(&self) {
        match self.next() {
            Some((entry, ctx)) => entry.handler.inactive(&ctx),
            None => self.tail("inactive"),
        }
    }

    pub fn fire_read(&self, message: Message) {
        match self.next() {
            Some((entry, ctx)) => entry.handler.read(&ctx, message),
            None => self.tail("read"),
        }
    }

    pub fn fire_read_completed(&self) {
        match self.next() {
            Some((entry, ctx)) => entry.handler.read_completed(&ctx),
            None => self.tail("read_completed"),
        }
    }

    pub fn fire_error_caught(&self, error: &ChannelError) {
        match self.next() {
            Some((entry, ctx)) => entry.handler.error_caught(&ctx, error),
            None => self.tail("error_caught"),
        }
    }

    fn tail(&self, event: &'static str) {
        trace!(channel_id = %self.channel.id(), event, "event reached pipeline tail");
    }
}

/// 通道的 Handler 链。
pub struct Pipeline {
    channel: WeakChannel,
    chain: ArcSwap<Chain>,
    mutation: Mutex<()>,
}

impl Pipeline {
    pub(crate) fn new(channel: WeakChannel) -> Self {
        Self {
            channel,
            chain: ArcSwap::from_pointee(Vec::new()),
            mutation: Mutex::new(()),
        }
    }

    /// 在链首插入 Handler。
    pub fn add_first(&self, name: &str, handler: Arc<dyn Handler>) -> &Self {
        self.insert(0, name, handler)
    }

    /// 在链尾追加 Handler。
    pub fn add_last(&self, name: &str, handler: Arc<dyn Handler>) -> &Self {
        self.insert(usize::MAX, name, handler)
    }

    fn insert(&self, at: usize, name: &str, handler: Arc<dyn Handler>) -> &Self {
        let (snapshot, index) = {
            let _guard = self.mutation.lock();
            let current = self.chain.load_full();
            let mut chain: Chain = current.iter().cloned().collect();
            let index = at.min(chain.len());
            chain.insert(
                index,
                Arc::new(HandlerEntry {
                    name: Arc::from(name),
                    handler: Arc::clone(&handler),
                }),
            );
            let snapshot = Arc::new(chain);
            self.chain.store(Arc::clone(&snapshot));
            (snapshot, index)
        };

        if let Some(channel) = self.channel.upgrade() {
            let ctx = HandlerContext {
                channel: &channel,
                chain: &snapshot,
                index,
            };
            handler.added(&ctx);
        }
        self
    }

    /// 按名字移除第一个匹配的 Handler。
    pub fn remove(&self, name: &str) -> Option<Arc<dyn Handler>> {
        let _guard = self.mutation.lock();
        let current = self.chain.load_full();
        let position = current.iter().position(|entry| &*entry.name == name)?;
        let mut chain: Chain = current.iter().cloned().collect();
        let removed = chain.remove(position);
        self.chain.store(Arc::new(chain));
        Some(Arc::clone(&removed.handler))
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.chain
            .load()
            .iter()
            .find(|entry| &*entry.name == name)
            .map(|entry| Arc::clone(&entry.handler))
    }

    /// 按链路顺序返回 Handler 名字。
    pub fn names(&self) -> Vec<String> {
        self.chain
            .load()
            .iter()
            .map(|entry| entry.name.to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.chain.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.load().is_empty()
    }

    /// 为所属通道创建新的 Future。
    pub fn new_future(&self) -> ChannelFuture {
        ChannelFuture::with_owner(Some(self.channel.clone()))
    }

    fn dispatch<F>(&self, event: &'static str, call: F)
    where
        F: FnOnce(&dyn Handler, &HandlerContext<'_>),
    {
        let Some(channel) = self.channel.upgrade() else {
            return;
        };
        let chain = self.chain.load_full();
        let ctx = HandlerContext {
            channel: &channel,
            chain: &chain,
            index: 0,
        };
        match chain.first() {
            Some(entry) => call(entry.handler.as_ref(), &ctx),
            None => ctx.tail(event),
        }
    }

    pub fn fire_registered(&self) {
        self.dispatch("registered", |handler, ctx| handler.registered(ctx));
    }

    pub fn fire_active(&self) {
        self.dispatch("active", |handler, ctx| handler.active(ctx));
    }

    pub fn fire_inactive(&self) {
        self.dispatch("inactive", |handler, ctx| handler.inactive(ctx));
    }

    pub fn fire_read(&self, message: Message) {
        self.dispatch("read", |handler, ctx| handler.read(ctx, message));
    }

    pub fn fire_read_completed(&self) {
        self.dispatch("read_completed", |handler, ctx| handler.read_completed(ctx));
    }

    pub fn fire_error_caught(&self, error: &ChannelError) {
        self.dispatch("error_caught", |handler, ctx| handler.error_caught(ctx, error));
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("handlers", &self.names())
            .finish()
    }
}

type InitFn = dyn Fn(&Channel) + Send + Sync + 'static;

/// 通道初始化器。
///
/// 加入管线时以所属通道调用闭包（通常用于 `add_last` 真正的业务 Handler），随后把自己从管线中移除。
/// 同一个 `Initializer` 可以作为服务端的子 Handler 被所有子通道共享。
pub struct Initializer {
    init: Box<InitFn>,
}

impl Initializer {
    pub fn new<F>(init: F) -> Arc<Self>
    where
        F: Fn(&Channel) + Send + Sync + 'static,
    {
        Arc::new(Self {
            init: Box::new(init),
        })
    }
}

impl Handler for Initializer {
    fn added(&self, ctx: &HandlerContext<'_>) {
        (self.init)(ctx.channel());
        ctx.pipeline().remove(ctx.name());
    }
}
