//! # future 模块说明
//!
//! ## 角色定位（Why）
//! - 通道上的每一次异步操作都以一个 [`ChannelFuture`] 报告结果；
//! - 它同时是竞态的“仲裁者”：接受成功与接受超时对同一个 Future 发起两次完成，
//!   首个完成生效，落败方的调用被静默丢弃。
//!
//! ## 实现策略（How）
//! - 终态迁移通过一次原子 CAS（`PENDING → COMPLETING`）“认领”，认领者写入结果后
//!   在等待者锁内发布最终状态；
//! - 续体在完成线程上执行完毕之后才放行等待者：`wait`/`sync` 返回时，
//!   完成前注册的续体（例如子通道释放）一定已经生效；
//! - 阻塞等待走 `parking_lot::Condvar`，异步等待走 `Waker` 列表；
//! - 结果以带标签的 [`Outcome`] 表示，避免“既无值也无错误”的模糊状态。

use std::{
    fmt,
    future::poll_fn,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicBool, AtomicU8, Ordering},
    },
    task::{Poll, Waker},
};

use parking_lot::{Condvar, Mutex};

use crate::{
    channel::{Channel, WeakChannel},
    error::ChannelError,
};

const PENDING: u8 = 0;
const COMPLETING: u8 = 1;
const SUCCESS: u8 = 2;
const FAILURE: u8 = 3;
const CANCELLED: u8 = 4;

/// Future 的对外可见状态。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FutureState {
    Pending,
    Success,
    Failure,
    Cancelled,
}

enum Outcome {
    Success(Option<WeakChannel>),
    Failure(ChannelError),
    Cancelled,
}

type Callback = Box<dyn FnOnce(&ChannelFuture) + Send + 'static>;

#[derive(Default)]
struct Waiters {
    wakers: Vec<Waker>,
    callbacks: Vec<Callback>,
}

struct FutureInner {
    state: AtomicU8,
    released: AtomicBool,
    outcome: OnceLock<Outcome>,
    owner: Option<WeakChannel>,
    waiters: Mutex<Waiters>,
    cond: Condvar,
}

/// 一次写入的异步完成单元。
///
/// # 教案式说明
/// - **意图 (Why)**：为 bind/connect/write/close 等操作提供统一的结果通道，
///   同时作为竞争完成的幂等仲裁点；
/// - **契约 (What)**：
///   - `complete`/`fail`/`cancel` 只有第一次调用生效，返回值指示本次调用是否胜出；
///   - [`channel`](Self::channel) 仅在成功时返回所属通道，其余状态返回 `None`；
///   - [`then`](Self::then) 注册的续体在完成线程上执行，若已完成则立即内联执行；
///   - [`wait`](Self::wait)/[`sync`](Self::sync) 在完成前注册的续体全部执行之后才返回；
///   - 克隆得到的是同一个 Future 的另一个句柄。
/// - **风险 (Trade-offs)**：[`sync`](Self::sync) 会阻塞当前线程，不应在 Tokio 工作线程上调用，
///   异步上下文请使用 [`wait`](Self::wait)。
#[derive(Clone)]
pub struct ChannelFuture {
    inner: Arc<FutureInner>,
}

impl ChannelFuture {
    /// 创建一个不归属任何通道的 Future。
    pub fn new() -> Self {
        Self::with_owner(None)
    }

    /// 创建归属于 `channel` 的 Future；成功后 [`channel`](Self::channel) 返回该通道。
    pub fn with_channel(channel: &Channel) -> Self {
        Self::with_owner(Some(channel.downgrade()))
    }

    pub(crate) fn with_owner(owner: Option<WeakChannel>) -> Self {
        Self {
            inner: Arc::new(FutureInner {
                state: AtomicU8::new(PENDING),
                released: AtomicBool::new(false),
                outcome: OnceLock::new(),
                owner,
                waiters: Mutex::new(Waiters::default()),
                cond: Condvar::new(),
            }),
        }
    }

    /// 以成功结束，`value` 为结果通道（可为空）。
    pub fn complete(&self, value: Option<&Channel>) -> bool {
        self.settle(SUCCESS, || Outcome::Success(value.map(Channel::downgrade)))
    }

    /// 以失败结束。
    pub fn fail(&self, error: ChannelError) -> bool {
        self.settle(FAILURE, || Outcome::Failure(error))
    }

    /// 以取消结束。
    pub fn cancel(&self) -> bool {
        self.settle(CANCELLED, || Outcome::Cancelled)
    }

    fn settle(&self, terminal: u8, outcome: impl FnOnce() -> Outcome) -> bool {
        let inner = &self.inner;
        if inner
            .state
            .compare_exchange(PENDING, COMPLETING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        // 只有认领者能走到这里，OnceLock 不会被写两次。
        let _ = inner.outcome.set(outcome());

        let callbacks = {
            let mut waiters = inner.waiters.lock();
            inner.state.store(terminal, Ordering::Release);
            std::mem::take(&mut waiters.callbacks)
        };
        for callback in callbacks {
            callback(self);
        }

        let wakers = {
            let mut waiters = inner.waiters.lock();
            inner.released.store(true, Ordering::Release);
            std::mem::take(&mut waiters.wakers)
        };
        inner.cond.notify_all();
        for waker in wakers {
            waker.wake();
        }
        true
    }

    /// 终态已发布且续体已全部执行。
    fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::Acquire)
    }

    /// 当前状态；认领与发布之间的短暂窗口仍报告 `Pending`。
    pub fn state(&self) -> FutureState {
        match self.inner.state.load(Ordering::Acquire) {
            SUCCESS => FutureState::Success,
            FAILURE => FutureState::Failure,
            CANCELLED => FutureState::Cancelled,
            _ => FutureState::Pending,
        }
    }

    pub fn is_done(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) >= SUCCESS
    }

    pub fn is_success(&self) -> bool {
        self.state() == FutureState::Success
    }

    pub fn is_error(&self) -> bool {
        self.state() == FutureState::Failure
    }

    pub fn is_cancelled(&self) -> bool {
        self.state() == FutureState::Cancelled
    }

    /// 失败时返回错误副本。
    pub fn error(&self) -> Option<ChannelError> {
        if !self.is_done() {
            return None;
        }
        match self.inner.outcome.get() {
            Some(Outcome::Failure(err)) => Some(err.clone()),
            _ => None,
        }
    }

    /// 成功时返回结果通道（若仍存活）。
    pub fn get(&self) -> Option<Channel> {
        if !self.is_done() {
            return None;
        }
        match self.inner.outcome.get() {
            Some(Outcome::Success(Some(value))) => value.upgrade(),
            _ => None,
        }
    }

    /// 所属通道，仅在成功时可见。
    pub fn channel(&self) -> Option<Channel> {
        if !self.is_success() {
            return None;
        }
        self.inner.owner.as_ref().and_then(WeakChannel::upgrade)
    }

    /// 阻塞当前线程直到终态且续体执行完毕，返回自身以便链式调用。
    ///
    /// 不可在本 Future 的续体内调用。
    pub fn sync(&self) -> &Self {
        let mut waiters = self.inner.waiters.lock();
        while !self.is_released() {
            self.inner.cond.wait(&mut waiters);
        }
        self
    }

    /// 异步等待终态；返回时完成前注册的续体已经执行。
    pub async fn wait(&self) -> &Self {
        poll_fn(|cx| {
            if self.is_released() {
                return Poll::Ready(());
            }
            let mut waiters = self.inner.waiters.lock();
            if self.is_released() {
                return Poll::Ready(());
            }
            if !waiters.wakers.iter().any(|w| w.will_wake(cx.waker())) {
                waiters.wakers.push(cx.waker().clone());
            }
            Poll::Pending
        })
        .await;
        self
    }

    /// 注册续体；已完成时在当前线程立即执行。
    pub fn then<F>(&self, callback: F) -> &Self
    where
        F: FnOnce(&ChannelFuture) + Send + 'static,
    {
        {
            let mut waiters = self.inner.waiters.lock();
            if !self.is_done() {
                waiters.callbacks.push(Box::new(callback));
                return self;
            }
        }
        callback(self);
        self
    }

    /// 两个句柄是否指向同一个 Future。
    pub fn ptr_eq(&self, other: &ChannelFuture) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for ChannelFuture {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ChannelFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelFuture")
            .field("state", &self.state())
            .field("error", &self.error())
            .finish()
    }
}
