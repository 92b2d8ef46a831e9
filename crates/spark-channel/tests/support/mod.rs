//! 集成测试共享的脚本化内存传输与事件记录器。
//!
//! # 教案式说明
//! - **Why**：驱动器的竞态与失败路径依赖传输的精确行为（阻塞、报错、暂无数据），
//!   真实套接字难以稳定复现，因此以可编排的内存传输代替；
//! - **How**：每种能力都有调用计数、可选的“按住”闸门与结果队列；读与接受由无界通道喂入脚本；
//! - **What**：测试通过 [`MockTransport`] 的克隆句柄在通道运行期间继续编排与观察。

#![allow(dead_code)]

use std::{
    collections::{HashSet, VecDeque},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use spark_channel::{
    Accepted, Channel, ChannelAddr, ChannelError, ChannelFuture, Handler, HandlerContext,
    Message, ReadOutcome, Result, ServerChannel, Transport, TransportAccept, TransportBind,
    TransportClose, TransportConnect, TransportDisconnect, TransportRead, TransportWrite,
};
use tokio::sync::{Mutex as AsyncMutex, Notify, mpsc};

/// 可被按住或计数的操作。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Op {
    Read,
    Write,
    Bind,
    Accept,
    Connect,
    Close,
    Disconnect,
}

const OPS: usize = 7;

impl Op {
    fn index(self) -> usize {
        self as usize
    }
}

/// 读脚本的一步。
pub enum ReadStep {
    Message(String),
    Pending,
    Idle,
    Error,
}

/// 接受脚本的一步。
pub enum AcceptStep {
    Child(MockTransport),
    Nil,
}

struct Hold {
    armed: AtomicBool,
    notify: Notify,
}

struct MockState {
    disabled: Mutex<HashSet<Op>>,
    calls: [AtomicUsize; OPS],
    holds: [Hold; OPS],
    results: [Mutex<VecDeque<Result<()>>>; OPS],
    auto_read: AtomicBool,
    read_tx: mpsc::UnboundedSender<ReadStep>,
    read_rx: AsyncMutex<mpsc::UnboundedReceiver<ReadStep>>,
    accept_tx: mpsc::UnboundedSender<AcceptStep>,
    accept_rx: AsyncMutex<mpsc::UnboundedReceiver<AcceptStep>>,
    accepted: Mutex<Vec<ChannelFuture>>,
    written: Mutex<Vec<String>>,
    init_error: Mutex<Option<ChannelError>>,
}

/// 脚本化传输，克隆得到同一份状态的句柄。
#[derive(Clone)]
pub struct MockTransport {
    state: Arc<MockState>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        let (read_tx, read_rx) = mpsc::unbounded_channel();
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        Self {
            state: Arc::new(MockState {
                disabled: Mutex::new(HashSet::from([Op::Accept])),
                calls: std::array::from_fn(|_| AtomicUsize::new(0)),
                holds: std::array::from_fn(|_| Hold {
                    armed: AtomicBool::new(false),
                    notify: Notify::new(),
                }),
                results: std::array::from_fn(|_| Mutex::new(VecDeque::new())),
                auto_read: AtomicBool::new(false),
                read_tx,
                read_rx: AsyncMutex::new(read_rx),
                accept_tx,
                accept_rx: AsyncMutex::new(accept_rx),
                accepted: Mutex::new(Vec::new()),
                written: Mutex::new(Vec::new()),
                init_error: Mutex::new(None),
            }),
        }
    }

    /// 具备接受能力的服务端传输。
    pub fn server() -> Self {
        let transport = Self::new();
        transport.state.disabled.lock().remove(&Op::Accept);
        transport
    }

    pub fn without(self, op: Op) -> Self {
        self.state.disabled.lock().insert(op);
        self
    }

    pub fn auto_read(self, enabled: bool) -> Self {
        self.state.auto_read.store(enabled, Ordering::SeqCst);
        self
    }

    pub fn fail_init(self, error: ChannelError) -> Self {
        *self.state.init_error.lock() = Some(error);
        self
    }

    fn enabled(&self, op: Op) -> bool {
        !self.state.disabled.lock().contains(&op)
    }

    pub fn calls(&self, op: Op) -> usize {
        self.state.calls[op.index()].load(Ordering::SeqCst)
    }

    /// 让下一次及之后的 `op` 调用停在入口，直到 [`release`](Self::release)。
    pub fn hold(&self, op: Op) {
        self.state.holds[op.index()]
            .armed
            .store(true, Ordering::SeqCst);
    }

    pub fn release(&self, op: Op) {
        let hold = &self.state.holds[op.index()];
        hold.armed.store(false, Ordering::SeqCst);
        hold.notify.notify_waiters();
    }

    /// 排入 `op` 的下一次结果，未排入时默认成功。
    pub fn push_result(&self, op: Op, result: Result<()>) {
        self.state.results[op.index()].lock().push_back(result);
    }

    pub fn push_read(&self, step: ReadStep) {
        let _ = self.state.read_tx.send(step);
    }

    pub fn push_accept(&self, step: AcceptStep) {
        let _ = self.state.accept_tx.send(step);
    }

    /// 接受能力交出的注册 Future，按接受顺序排列。
    pub fn accepted(&self) -> Vec<ChannelFuture> {
        self.state.accepted.lock().clone()
    }

    pub fn written(&self) -> Vec<String> {
        self.state.written.lock().clone()
    }

    async fn enter(&self, op: Op) -> Result<()> {
        self.state.calls[op.index()].fetch_add(1, Ordering::SeqCst);
        let hold = &self.state.holds[op.index()];
        loop {
            let notified = hold.notify.notified();
            if !hold.armed.load(Ordering::SeqCst) {
                break;
            }
            notified.await;
        }
        self.state.results[op.index()]
            .lock()
            .pop_front()
            .unwrap_or(Ok(()))
    }
}

impl Transport for MockTransport {
    fn scheme(&self) -> &'static str {
        "mock"
    }

    fn init(&self, _channel: &Channel) -> Result<()> {
        match self.state.init_error.lock().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn reader(&self) -> Option<&dyn TransportRead> {
        self.enabled(Op::Read).then_some(self as &dyn TransportRead)
    }

    fn writer(&self) -> Option<&dyn TransportWrite> {
        self.enabled(Op::Write).then_some(self as &dyn TransportWrite)
    }

    fn binder(&self) -> Option<&dyn TransportBind> {
        self.enabled(Op::Bind).then_some(self as &dyn TransportBind)
    }

    fn acceptor(&self) -> Option<&dyn TransportAccept> {
        self.enabled(Op::Accept)
            .then_some(self as &dyn TransportAccept)
    }

    fn connector(&self) -> Option<&dyn TransportConnect> {
        self.enabled(Op::Connect)
            .then_some(self as &dyn TransportConnect)
    }

    fn closer(&self) -> Option<&dyn TransportClose> {
        self.enabled(Op::Close).then_some(self as &dyn TransportClose)
    }

    fn disconnector(&self) -> Option<&dyn TransportDisconnect> {
        self.enabled(Op::Disconnect)
            .then_some(self as &dyn TransportDisconnect)
    }
}

#[async_trait]
impl TransportRead for MockTransport {
    async fn read(&self) -> Result<ReadOutcome> {
        self.enter(Op::Read).await?;
        let step = self.state.read_rx.lock().await.recv().await;
        match step {
            Some(ReadStep::Message(text)) => Ok(ReadOutcome::Message(Box::new(text))),
            Some(ReadStep::Pending) => Ok(ReadOutcome::Pending),
            Some(ReadStep::Idle) => Ok(ReadOutcome::Idle),
            Some(ReadStep::Error) | None => Err(ChannelError::transport("read script ended")),
        }
    }

    fn is_auto_read(&self) -> bool {
        self.state.auto_read.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransportWrite for MockTransport {
    async fn write(&self, message: Message) -> Result<()> {
        let text = match message.downcast::<String>() {
            Ok(text) => *text,
            Err(_) => "<opaque>".to_owned(),
        };
        self.state.written.lock().push(text);
        self.enter(Op::Write).await
    }
}

#[async_trait]
impl TransportBind for MockTransport {
    async fn bind(&self, _local: &ChannelAddr) -> Result<()> {
        self.enter(Op::Bind).await
    }
}

#[async_trait]
impl TransportAccept for MockTransport {
    async fn accept(&self, server: &ServerChannel) -> Accepted {
        let _ = self.enter(Op::Accept).await;
        let step = self.state.accept_rx.lock().await.recv().await;
        let accepted = match step {
            Some(AcceptStep::Child(transport)) => match server.derive_child_channel(transport) {
                Ok(child) => Accepted::child(child),
                Err(_) => Accepted::failed(),
            },
            Some(AcceptStep::Nil) => Accepted::failed(),
            None => std::future::pending::<Accepted>().await,
        };
        self.state.accepted.lock().push(accepted.future.clone());
        accepted
    }
}

#[async_trait]
impl TransportConnect for MockTransport {
    async fn connect(&self, _local: Option<&ChannelAddr>, _remote: &ChannelAddr) -> Result<()> {
        self.enter(Op::Connect).await
    }
}

#[async_trait]
impl TransportClose for MockTransport {
    async fn close(&self) -> Result<()> {
        self.enter(Op::Close).await
    }
}

#[async_trait]
impl TransportDisconnect for MockTransport {
    async fn disconnect(&self) -> Result<()> {
        self.enter(Op::Disconnect).await
    }
}

/// 记录经过自身的入站事件并继续转发。
#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<String>>,
    registered_delay: Option<Duration>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// `registered` 回调阻塞当前线程 `delay`，用于拖慢子通道注册。
    pub fn slow_registration(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
            registered_delay: Some(delay),
        })
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.events.lock().iter().filter(|e| *e == event).count()
    }

    fn push(&self, event: impl Into<String>) {
        self.events.lock().push(event.into());
    }
}

impl Handler for Recorder {
    fn registered(&self, ctx: &HandlerContext<'_>) {
        if let Some(delay) = self.registered_delay {
            std::thread::sleep(delay);
        }
        self.push("registered");
        ctx.fire_registered();
    }

    fn active(&self, ctx: &HandlerContext<'_>) {
        self.push("active");
        ctx.fire_active();
    }

    fn inactive(&self, ctx: &HandlerContext<'_>) {
        self.push("inactive");
        ctx.fire_inactive();
    }

    fn read(&self, ctx: &HandlerContext<'_>, message: Message) {
        match message.downcast::<String>() {
            Ok(text) => {
                self.push(format!("read:{text}"));
                ctx.fire_read(text);
            }
            Err(other) => {
                self.push("read:<opaque>");
                ctx.fire_read(other);
            }
        }
    }

    fn read_completed(&self, ctx: &HandlerContext<'_>) {
        self.push("read_completed");
        ctx.fire_read_completed();
    }

    fn error_caught(&self, ctx: &HandlerContext<'_>, error: &ChannelError) {
        self.push(format!("error:{}", error.code()));
        ctx.fire_error_caught(error);
    }
}

/// 在 2 秒内轮询直到条件成立，否则 panic。
pub async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "条件在 2 秒内未成立：{what}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// 带超时地等待 Future 完成。
pub async fn settle(future: &ChannelFuture) -> &ChannelFuture {
    tokio::time::timeout(Duration::from_secs(2), future.wait())
        .await
        .expect("future 应在 2 秒内完成")
}

/// 以脚本化传输构建并连接一个活跃通道。
pub async fn connected(transport: &MockTransport, recorder: Arc<Recorder>) -> Channel {
    let channel = spark_channel::ChannelBuilder::new(transport.clone())
        .handler("recorder", recorder)
        .build()
        .expect("build channel");
    let connected = channel.connect(ChannelAddr::local("peer"));
    assert!(settle(&connected).await.is_success());
    channel
}
