//! # channel 模块说明
//!
//! ## 角色定位（Why）
//! - [`Channel`] 是一个可寻址的 I/O 端点：持有管线、参数、活跃/关闭状态，
//!   并把真正的传输工作委托给 [`ChannelUnsafe`]；
//! - 用户侧操作（`bind`/`connect`/`write`/`read`/`close`/`disconnect`）立即返回
//!   [`ChannelFuture`]，调用方自行决定是否等待。
//!
//! ## 状态与生命周期（What）
//! - `active`：由驱动器在绑定/连接成功或子通道注册时置位，在传输失败、关闭或断开时清除；
//!   两个方向的切换各只触发一次管线事件；
//! - `close_future`：通道关闭完成的唯一信号，完成后通道不再接受绑定/连接/断开；
//! - 服务端通道额外持有子通道表，见 [`ServerChannel`]。
//!
//! ## 实现策略（How）
//! - `Channel` 是 `Arc<ChannelInner>` 的句柄，克隆廉价；管线与关闭 Future 持有弱引用回指通道，
//!   避免循环引用；
//! - 所有 worker 都派生到通道记录的 Tokio `Handle` 上，构建时确定，之后不再变化。

use std::{
    fmt,
    future::Future,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use parking_lot::RwLock;
use tokio::{runtime::Handle, task::JoinHandle};
use tracing::debug;

use crate::{
    addr::ChannelAddr,
    config::ChannelConfig,
    error::{ChannelError, Result},
    future::ChannelFuture,
    params::{AUTO_READ, ParamKey, ParamValue, Params},
    pipeline::{Handler, Message, Pipeline},
    server::{ServerChannel, ServerState},
    transport::Transport,
    unsafe_ops::{ChannelUnsafe, UnsafeState},
};

static NEXT_SERIAL: AtomicU64 = AtomicU64::new(1);

#[derive(Default)]
struct Addrs {
    local: Option<ChannelAddr>,
    remote: Option<ChannelAddr>,
}

pub(crate) struct ChannelInner {
    serial: u64,
    id: Arc<str>,
    transport: Arc<dyn Transport>,
    pipeline: Pipeline,
    params: Params,
    active: AtomicBool,
    close_future: ChannelFuture,
    unsafe_state: UnsafeState,
    parent: Option<WeakChannel>,
    server: Option<Arc<ServerState>>,
    runtime: Handle,
    addrs: RwLock<Addrs>,
}

/// 通道句柄。
///
/// # 教案式说明
/// - **意图（Why）**：为传输实现与 Handler 提供统一的通道视图；
/// - **契约（What）**：
///   - `serial` 在进程内唯一，是子通道表的键；
///   - 所有操作方法都不阻塞，结果通过返回的 [`ChannelFuture`] 报告；
///   - 相等性按身份比较（同一个底层通道）。
/// - **风险（Trade-offs）**：通道只要还有句柄就不会释放，子通道表中的条目在关闭后由释放逻辑移除。
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

/// 不持有所有权的通道引用。
#[derive(Clone, Default)]
pub struct WeakChannel {
    inner: Weak<ChannelInner>,
}

impl WeakChannel {
    pub fn upgrade(&self) -> Option<Channel> {
        self.inner.upgrade().map(|inner| Channel { inner })
    }
}

impl fmt::Debug for WeakChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(channel) => f.debug_tuple("WeakChannel").field(&channel.id()).finish(),
            None => f.write_str("WeakChannel(<dropped>)"),
        }
    }
}

impl Channel {
    pub(crate) fn assemble(
        transport: Arc<dyn Transport>,
        parent: Option<WeakChannel>,
        server: Option<Arc<ServerState>>,
        params: Params,
        runtime: Handle,
    ) -> Channel {
        let serial = NEXT_SERIAL.fetch_add(1, Ordering::Relaxed);
        let id: Arc<str> = Arc::from(format!("{}-{serial:08x}", transport.scheme()));
        let inner = Arc::new_cyclic(|weak: &Weak<ChannelInner>| {
            let handle = WeakChannel {
                inner: weak.clone(),
            };
            ChannelInner {
                serial,
                id,
                transport,
                pipeline: Pipeline::new(handle.clone()),
                params,
                active: AtomicBool::new(false),
                close_future: ChannelFuture::with_owner(Some(handle)),
                unsafe_state: UnsafeState::new(),
                parent,
                server,
                runtime,
                addrs: RwLock::new(Addrs::default()),
            }
        });
        let channel = Channel { inner };
        debug!(channel_id = %channel.id(), serial, "channel assembled");
        channel
    }

    pub fn serial(&self) -> u64 {
        self.inner.serial
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::Acquire)
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.inner.pipeline
    }

    pub fn params(&self) -> &Params {
        &self.inner.params
    }

    pub fn set_param(&self, key: ParamKey, value: impl Into<ParamValue>) -> &Self {
        self.inner.params.set(key, value);
        self
    }

    /// 派生本通道的服务端通道（若仍存活）。
    pub fn parent(&self) -> Option<Channel> {
        self.inner.parent.as_ref().and_then(WeakChannel::upgrade)
    }

    /// 关闭完成信号。
    pub fn close_future(&self) -> &ChannelFuture {
        &self.inner.close_future
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    pub fn runtime(&self) -> &Handle {
        &self.inner.runtime
    }

    /// 本地地址：传输观测值优先，其次是绑定/连接时请求的地址。
    pub fn local_addr(&self) -> Option<ChannelAddr> {
        self.inner
            .transport
            .local_addr()
            .or_else(|| self.inner.addrs.read().local.clone())
    }

    /// 远端地址：传输观测值优先，其次是连接时请求的地址。
    pub fn remote_addr(&self) -> Option<ChannelAddr> {
        self.inner
            .transport
            .remote_addr()
            .or_else(|| self.inner.addrs.read().remote.clone())
    }

    pub fn is_server(&self) -> bool {
        self.inner.server.is_some()
    }

    /// 以服务端视图访问本通道；非服务端通道返回 `None`。
    pub fn as_server(&self) -> Option<ServerChannel> {
        self.inner
            .server
            .as_ref()
            .map(|state| ServerChannel::from_parts(self.clone(), Arc::clone(state)))
    }

    /// 底层驱动器。
    pub fn unsafe_ops(&self) -> ChannelUnsafe<'_> {
        ChannelUnsafe::new(self)
    }

    pub fn new_future(&self) -> ChannelFuture {
        ChannelFuture::with_channel(self)
    }

    pub fn downgrade(&self) -> WeakChannel {
        WeakChannel {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn ptr_eq(&self, other: &Channel) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn bind(&self, local: impl Into<ChannelAddr>) -> ChannelFuture {
        let future = self.new_future();
        self.unsafe_ops().bind(Some(local.into()), future.clone());
        future
    }

    pub fn connect(&self, remote: impl Into<ChannelAddr>) -> ChannelFuture {
        self.connect_from(None, remote)
    }

    /// 以指定本地地址发起连接。
    pub fn connect_from(
        &self,
        local: Option<ChannelAddr>,
        remote: impl Into<ChannelAddr>,
    ) -> ChannelFuture {
        let future = self.new_future();
        self.unsafe_ops()
            .connect(local, Some(remote.into()), future.clone());
        future
    }

    pub fn write(&self, message: Message) -> ChannelFuture {
        let future = self.new_future();
        self.unsafe_ops().write(Some(message), future.clone());
        future
    }

    /// 触发一次读循环；自动读取的通道在激活时已经自行启动。
    pub fn read(&self) -> &Self {
        self.unsafe_ops().read();
        self
    }

    pub fn close(&self) -> ChannelFuture {
        let future = self.new_future();
        self.unsafe_ops().close(future.clone());
        future
    }

    pub fn disconnect(&self) -> ChannelFuture {
        let future = self.new_future();
        self.unsafe_ops().disconnect(future.clone());
        future
    }

    pub(crate) fn unsafe_state(&self) -> &UnsafeState {
        &self.inner.unsafe_state
    }

    pub(crate) fn server_state(&self) -> Option<&Arc<ServerState>> {
        self.inner.server.as_ref()
    }

    pub(crate) fn spawn<F>(&self, task: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.inner.runtime.spawn(task)
    }

    pub(crate) fn set_local_addr(&self, addr: ChannelAddr) {
        self.inner.addrs.write().local = Some(addr);
    }

    pub(crate) fn set_remote_addr(&self, addr: ChannelAddr) {
        self.inner.addrs.write().remote = Some(addr);
    }

    /// 读循环是否持续拉取：`AUTO_READ` 参数优先，否则取传输自身的偏好。
    pub(crate) fn is_auto_read(&self) -> bool {
        self.inner.params.bool(AUTO_READ).unwrap_or_else(|| {
            self.inner
                .transport
                .reader()
                .is_some_and(|reader| reader.is_auto_read())
        })
    }

    /// 非活跃 → 活跃；只有第一次切换会触发 `active` 事件与自动读取。
    pub(crate) fn active_channel(&self) {
        if self.inner.active.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(channel_id = %self.id(), "channel active");
        self.pipeline().fire_active();
        if self.is_auto_read() {
            self.unsafe_ops().read();
        }
    }

    /// 活跃 → 非活跃；返回的 Future 在切换处理完毕时已完成。
    ///
    /// 服务端通道会在独立任务中关闭所有仍活跃的子通道，此处不等待其结束。
    pub(crate) fn inactive_channel(&self) -> ChannelFuture {
        let done = self.new_future();
        if self.inner.active.swap(false, Ordering::AcqRel) {
            debug!(channel_id = %self.id(), "channel inactive");
            self.pipeline().fire_inactive();
            if let Some(server) = self.as_server() {
                self.spawn(async move { server.deactivate_children() });
            }
        }
        done.complete(Some(self));
        done
    }

    /// 从父通道的子通道表中移除自身，可重复调用。
    pub(crate) fn release(&self) {
        if let Some(server) = self.parent().and_then(|parent| parent.as_server()) {
            server.release_child(self);
        }
    }
}

impl PartialEq for Channel {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Channel {}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id())
            .field("serial", &self.serial())
            .field("active", &self.is_active())
            .field("closed", &self.close_future().is_done())
            .finish()
    }
}

pub(crate) fn resolve_runtime(runtime: Option<Handle>) -> Result<Handle> {
    match runtime {
        Some(handle) => Ok(handle),
        None => Handle::try_current().map_err(|err| ChannelError::Runtime(err.to_string().into())),
    }
}

/// 普通（非服务端）通道的构建器。
///
/// ```ignore
/// let channel = ChannelBuilder::new(transport)
///     .handler("codec", Arc::new(ByteToMessageDecoder::new(LineDecoder::new(1024))))
///     .param(AUTO_READ, true)
///     .build()?;
/// channel.connect(remote).wait().await;
/// ```
pub struct ChannelBuilder {
    transport: Arc<dyn Transport>,
    handlers: Vec<(String, Arc<dyn Handler>)>,
    params: Params,
    runtime: Option<Handle>,
}

impl ChannelBuilder {
    pub fn new(transport: impl Transport) -> Self {
        Self::from_arc(Arc::new(transport))
    }

    pub fn from_arc(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            handlers: Vec::new(),
            params: Params::new(),
            runtime: None,
        }
    }

    /// 按调用顺序追加到管线末尾。
    pub fn handler(mut self, name: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        self.handlers.push((name.into(), handler));
        self
    }

    pub fn param(self, key: ParamKey, value: impl Into<ParamValue>) -> Self {
        self.params.set(key, value);
        self
    }

    /// 应用配置文档中的 `[params]` 表。
    pub fn config(self, config: &ChannelConfig) -> Self {
        config.params.apply_to(&self.params);
        self
    }

    /// 指定运行时；缺省使用构建时所在的运行时。
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    pub fn build(self) -> Result<Channel> {
        let runtime = resolve_runtime(self.runtime)?;
        let channel = Channel::assemble(
            Arc::clone(&self.transport),
            None,
            None,
            self.params,
            runtime,
        );
        self.transport.init(&channel)?;
        for (name, handler) in self.handlers {
            channel.pipeline().add_last(&name, handler);
        }
        Ok(channel)
    }
}
