//! # unsafe_ops 模块说明
//!
//! ## 角色定位（Why）
//! - 把传输的单步阻塞动作（读、写、绑定、接受、连接、关闭、断开）编排成
//!   有序、可并发调用的异步操作；
//! - 名称沿用通道模型的惯例：这些入口绕过管线直接驱动传输，正常业务应通过
//!   [`Channel`] 上的同名方法调用。
//!
//! ## 核心规则（What）
//! - 每种操作一个单飞闸门：闸门被占用时新的调用是静默空操作，调用方传入的 Future 不会被完成；
//!   写操作例外，新消息会先入队，由正在运行的 worker 排空；
//! - 前置条件错误（缺地址、能力缺失、通道已关闭）在派生 worker 之前同步失败；
//! - 绑定/写入的传输错误使通道失活并以失败结束 Future；连接的传输错误使通道失活并**取消** Future；
//!   关闭/断开的传输错误只记录日志，Future 仍以成功结束；
//! - 接受循环对每个子通道发起“注册成功”与“接受超时”两个任务，竞争完成同一个 Future。
//!
//! ## 实现策略（How）
//! - 闸门守卫随 worker 任务移动，任务结束（包括提前返回）时自动复位；
//! - 写队列为 `crossbeam-channel` 无界通道，生产者任意多、消费者同一时刻至多一个。
//!
//! ## 风险与考量（Trade-offs）
//! - 写 worker 复位闸门后若发现队列非空会自我重触发；若此时另一位写入者先抢到闸门，
//!   重触发成为空操作，两条路径最终排空的是同一个队列。

use std::{sync::Arc, time::Duration};

use crossbeam_channel::{Receiver, Sender, unbounded};
use tracing::{debug, error, warn};

use crate::{
    addr::ChannelAddr,
    channel::Channel,
    error::ChannelError,
    future::ChannelFuture,
    gate::{OpGates, OpKind},
    pipeline::Message,
    server::ServerChannel,
    transport::{Accepted, ReadOutcome},
};

struct PendingWrite {
    message: Message,
    future: ChannelFuture,
}

/// 驱动器的每通道状态：六个闸门与写队列。
pub(crate) struct UnsafeState {
    gates: Arc<OpGates>,
    write_tx: Sender<PendingWrite>,
    write_rx: Receiver<PendingWrite>,
}

impl UnsafeState {
    pub(crate) fn new() -> Self {
        let (write_tx, write_rx) = unbounded();
        Self {
            gates: OpGates::new(),
            write_tx,
            write_rx,
        }
    }
}

/// 通道驱动器的借用视图，通过 [`Channel::unsafe_ops`] 获得。
pub struct ChannelUnsafe<'a> {
    channel: &'a Channel,
}

impl<'a> ChannelUnsafe<'a> {
    pub(crate) fn new(channel: &'a Channel) -> Self {
        Self { channel }
    }

    fn state(&self) -> &'a UnsafeState {
        self.channel.unsafe_state()
    }

    /// 指定种类的 worker 当前是否在运行。
    pub fn is_running(&self, kind: OpKind) -> bool {
        self.state().gates.is_running(kind)
    }

    /// 写队列中尚未被 worker 取走的条目数。
    pub fn pending_writes(&self) -> usize {
        self.state().write_rx.len()
    }

    /// 启动读循环。
    ///
    /// # 教案式说明
    /// - **前置条件**：传输具备读能力、读闸门空闲、通道活跃；任一不满足即直接返回；
    /// - **循环规则**：
    ///   - `Message`：送入管线并标记“本批已投递”；
    ///   - `Pending`：若本批已投递且通道仍活跃，发出一次 `read_completed` 并清除标记；
    ///   - 传输返回错误或通道失活：退出循环；
    ///   - 每轮末尾若通道不是自动读取模式，退出循环。
    pub fn read(&self) {
        let channel = self.channel;
        if channel.transport().reader().is_none() {
            return;
        }
        let Some(guard) = self.state().gates.try_enter(OpKind::Read) else {
            return;
        };
        if !channel.is_active() {
            return;
        }

        let channel = channel.clone();
        let task_channel = channel.clone();
        channel.spawn(async move {
            let _guard = guard;
            let channel = task_channel;
            let transport = Arc::clone(channel.transport());
            let Some(reader) = transport.reader() else {
                return;
            };

            let mut batch_delivered = false;
            while channel.is_active() {
                match reader.read().await {
                    Err(err) => {
                        debug!(channel_id = %channel.id(), op = "read", error = %err, "read loop stopped");
                        break;
                    }
                    Ok(ReadOutcome::Pending) => {
                        if batch_delivered && channel.is_active() {
                            batch_delivered = false;
                            channel.pipeline().fire_read_completed();
                        }
                    }
                    Ok(ReadOutcome::Message(message)) => {
                        channel.pipeline().fire_read(message);
                        batch_delivered = true;
                    }
                    Ok(ReadOutcome::Idle) => {}
                }

                if !channel.is_auto_read() {
                    break;
                }
            }
        });
    }

    /// 提交一次写入。
    ///
    /// # 教案式说明
    /// - **入队决策**：
    ///   - `None`：立即成功，随后仍尝试启动 worker（用于重触发排空）；
    ///   - 传输不具备写能力：以 `Unsupported(Write)` 失败；
    ///   - 通道未激活：以 `NotActive` 失败且不入队；
    ///   - 其余情况入队。
    /// - **排空规则**：worker 在通道活跃期间按 FIFO 逐条写出；传输错误使通道失活，
    ///   仅该条目失败；通道失活后剩余条目以 `Closed`（关闭 Future 已完成）或 `NotActive` 失败，
    ///   不会再调用传输写。
    pub fn write(&self, message: Option<Message>, future: ChannelFuture) {
        let channel = self.channel;
        if channel.transport().writer().is_none() {
            if message.is_some() {
                future.fail(ChannelError::Unsupported(OpKind::Write));
            } else {
                future.complete(Some(channel));
            }
            return;
        }

        match message {
            None => {
                future.complete(Some(channel));
            }
            Some(_) if !channel.is_active() => {
                future.fail(ChannelError::NotActive);
                return;
            }
            Some(message) => {
                // 接收端与发送端同属本结构，发送不会失败。
                let _ = self.state().write_tx.send(PendingWrite { message, future });
            }
        }

        self.drain_writes();
    }

    fn drain_writes(&self) {
        let Some(guard) = self.state().gates.try_enter(OpKind::Write) else {
            return;
        };

        let channel = self.channel.clone();
        let task_channel = channel.clone();
        channel.spawn(async move {
            let channel = task_channel;
            let transport = Arc::clone(channel.transport());
            let queue = channel.unsafe_state().write_rx.clone();

            if let Some(writer) = transport.writer() {
                while channel.is_active() {
                    let Ok(entry) = queue.try_recv() else {
                        break;
                    };
                    match writer.write(entry.message).await {
                        Ok(()) => {
                            entry.future.complete(Some(&channel));
                        }
                        Err(err) => {
                            warn!(channel_id = %channel.id(), op = "write", error = %err, "transport write failed");
                            channel.inactive_channel();
                            entry.future.fail(err);
                        }
                    }
                }
            }

            if !channel.is_active() {
                while let Ok(entry) = queue.try_recv() {
                    let err = if channel.close_future().is_done() {
                        ChannelError::Closed
                    } else {
                        ChannelError::NotActive
                    };
                    entry.future.fail(err);
                }
            }

            drop(guard);
            if !queue.is_empty() {
                channel.unsafe_ops().write(None, ChannelFuture::new());
            }
        });
    }

    /// 绑定本地地址；服务端传输成功后会启动接受循环。
    pub fn bind(&self, local: Option<ChannelAddr>, future: ChannelFuture) {
        let Some(local) = local else {
            future.fail(ChannelError::LocalAddrEmpty);
            return;
        };
        let channel = self.channel;
        if channel.transport().binder().is_none() {
            future.fail(ChannelError::Unsupported(OpKind::Bind));
            return;
        }
        if channel.close_future().is_done() {
            future.fail(ChannelError::Closed);
            return;
        }
        let Some(guard) = self.state().gates.try_enter(OpKind::Bind) else {
            return;
        };

        let channel = channel.clone();
        let task_channel = channel.clone();
        channel.spawn(async move {
            let _guard = guard;
            let channel = task_channel;
            let transport = Arc::clone(channel.transport());
            let Some(binder) = transport.binder() else {
                return;
            };

            match binder.bind(&local).await {
                Err(err) => {
                    warn!(channel_id = %channel.id(), op = "bind", local = %local, error = %err, "transport bind failed");
                    channel.inactive_channel();
                    future.fail(err);
                }
                Ok(()) => {
                    channel.set_local_addr(local);
                    channel.active_channel();
                    if transport.acceptor().is_some() {
                        if let Some(server) = channel.as_server() {
                            channel.spawn(accept_loop(server));
                        }
                    }
                    future.complete(Some(&channel));
                }
            }
        });
    }

    /// 关闭通道：先同步失活，再调用传输关闭，最后完成关闭 Future 与本次 Future。
    ///
    /// 传输关闭失败只记录日志；已关闭的通道再次关闭直接成功。
    pub fn close(&self, future: ChannelFuture) {
        let channel = self.channel;
        if channel.close_future().is_done() {
            future.complete(Some(channel));
            return;
        }
        let Some(guard) = self.state().gates.try_enter(OpKind::Close) else {
            return;
        };

        let channel = channel.clone();
        let task_channel = channel.clone();
        channel.spawn(async move {
            let _guard = guard;
            let channel = task_channel;
            channel.inactive_channel().wait().await;

            let transport = Arc::clone(channel.transport());
            if let Some(closer) = transport.closer() {
                if let Err(err) = closer.close().await {
                    warn!(channel_id = %channel.id(), op = "close", error = %err, "transport close failed");
                }
            }

            channel.close_future().complete(Some(&channel));
            future.complete(Some(&channel));
            debug!(channel_id = %channel.id(), "channel closed");
        });
    }

    /// 连接远端；失败时取消（而非失败）Future。
    pub fn connect(
        &self,
        local: Option<ChannelAddr>,
        remote: Option<ChannelAddr>,
        future: ChannelFuture,
    ) {
        let Some(remote) = remote else {
            future.fail(ChannelError::RemoteAddrEmpty);
            return;
        };
        let channel = self.channel;
        if channel.transport().connector().is_none() {
            future.fail(ChannelError::Unsupported(OpKind::Connect));
            return;
        }
        if channel.close_future().is_done() {
            future.fail(ChannelError::Closed);
            return;
        }
        let Some(guard) = self.state().gates.try_enter(OpKind::Connect) else {
            return;
        };

        let channel = channel.clone();
        let task_channel = channel.clone();
        channel.spawn(async move {
            let _guard = guard;
            let channel = task_channel;
            let transport = Arc::clone(channel.transport());
            let Some(connector) = transport.connector() else {
                return;
            };

            match connector.connect(local.as_ref(), &remote).await {
                Err(err) => {
                    warn!(channel_id = %channel.id(), op = "connect", remote = %remote, error = %err, "transport connect failed");
                    channel.inactive_channel();
                    future.cancel();
                }
                Ok(()) => {
                    if let Some(local) = local {
                        channel.set_local_addr(local);
                    }
                    channel.set_remote_addr(remote);
                    channel.active_channel();
                    future.complete(Some(&channel));
                }
            }
        });
    }

    /// 断开连接：失活、调用传输断开、从父通道释放，最后以成功结束。
    pub fn disconnect(&self, future: ChannelFuture) {
        let channel = self.channel;
        if channel.transport().disconnector().is_none() {
            future.fail(ChannelError::Unsupported(OpKind::Disconnect));
            return;
        }
        if channel.close_future().is_done() {
            future.fail(ChannelError::Closed);
            return;
        }
        let Some(guard) = self.state().gates.try_enter(OpKind::Disconnect) else {
            return;
        };

        let channel = channel.clone();
        let task_channel = channel.clone();
        channel.spawn(async move {
            let _guard = guard;
            let channel = task_channel;
            channel.inactive_channel();

            let transport = Arc::clone(channel.transport());
            let result = match transport.disconnector() {
                Some(disconnector) => disconnector.disconnect().await,
                None => Ok(()),
            };
            channel.release();
            if let Err(err) = result {
                warn!(channel_id = %channel.id(), op = "disconnect", error = %err, "transport disconnect failed");
            }

            future.complete(Some(&channel));
        });
    }
}

/// 服务端接受循环，在通道活跃期间持续运行。
async fn accept_loop(server: ServerChannel) {
    let transport = Arc::clone(server.transport());
    let Some(acceptor) = transport.acceptor() else {
        return;
    };
    debug!(channel_id = %server.id(), "accept loop started");

    while server.is_active() {
        let Accepted { child, future } = acceptor.accept(&server).await;
        let Some(child) = child else {
            if server.is_active() {
                warn!(channel_id = %server.id(), op = "accept", "accept yielded no child");
            }
            future.cancel();
            continue;
        };

        let registration = future.clone();
        let registered_child = child.clone();
        let parent = server.channel().clone();
        server.spawn(async move {
            registered_child.pipeline().fire_registered();
            registered_child.active_channel();
            registration.complete(Some(&parent));
        });

        let timeout = child.params().accept_timeout();
        let child_id: Arc<str> = Arc::from(child.id());
        server.spawn(accept_timeout(child_id, timeout, future));
    }

    debug!(channel_id = %server.id(), "accept loop stopped");
}

async fn accept_timeout(child_id: Arc<str>, timeout: Duration, future: ChannelFuture) {
    tokio::time::sleep(timeout).await;
    future.fail(ChannelError::AcceptTimeout);
    if let Some(err) = future.error() {
        error!(channel_id = %child_id, op = "accept", error = %err, "child registration failed");
    }
}
