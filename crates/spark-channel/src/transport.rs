//! # transport 模块说明
//!
//! ## 角色定位（Why）
//! - 传输实现（TCP 监听、TCP 流、UDP 等）只需实现少量“能力接口”，每个接口对应一次
//!   可阻塞的单步动作；调度、单飞、超时竞态与生命周期全部由 [`ChannelUnsafe`](crate::ChannelUnsafe) 负责；
//! - 能力是可选的：[`Transport`] 通过 `reader()`/`writer()` 等访问器声明自己支持什么，
//!   缺失的能力不会触发任何 worker。
//!
//! ## 契约（What）
//! - 所有能力方法都在通道派生的 Tokio 任务中被调用，可以安全地 `.await`；
//! - 读能力以 [`ReadOutcome`] 区分“有消息 / 暂无数据 / 空转”，暂无数据不是错误；
//! - 接受能力返回 [`Accepted`]：子通道须通过 [`ServerChannel::derive_child_channel`] 创建。
//!
//! ## 风险（Trade-offs）
//! - `async_trait` 会为每次调用分配一个 `Box<dyn Future>`，相对于 I/O 本身的成本可以忽略。

use async_trait::async_trait;

use crate::{
    addr::ChannelAddr, channel::Channel, error::Result, future::ChannelFuture,
    pipeline::Message, server::ServerChannel,
};

/// 一次读取的结果。
#[derive(Debug)]
pub enum ReadOutcome {
    /// 读到一个完整单元，将被送入管线。
    Message(Message),
    /// 当前没有更多数据；若本批已投递过消息，读循环会发出一次 `read_completed`。
    Pending,
    /// 本次读取没有产出（例如只消化了控制帧），读循环照常继续。
    Idle,
}

/// 一次接受的结果。
#[derive(Debug)]
pub struct Accepted {
    /// 新派生的子通道；`None` 表示接受失败。
    pub child: Option<Channel>,
    /// 子通道的注册 Future，由“注册成功”与“接受超时”竞争完成。
    pub future: ChannelFuture,
}

impl Accepted {
    pub fn child(child: Channel) -> Self {
        let future = ChannelFuture::with_channel(&child);
        Self {
            child: Some(child),
            future,
        }
    }

    pub fn failed() -> Self {
        Self {
            child: None,
            future: ChannelFuture::new(),
        }
    }
}

/// 读能力。
#[async_trait]
pub trait TransportRead: Send + Sync {
    async fn read(&self) -> Result<ReadOutcome>;

    /// 读到一个单元后是否继续拉取；`false` 表示单次读取模型。
    fn is_auto_read(&self) -> bool {
        false
    }
}

/// 写能力：一次完整写出一个消息。
#[async_trait]
pub trait TransportWrite: Send + Sync {
    async fn write(&self, message: Message) -> Result<()>;
}

/// 绑定能力。
#[async_trait]
pub trait TransportBind: Send + Sync {
    async fn bind(&self, local: &ChannelAddr) -> Result<()>;
}

/// 接受能力，仅服务端传输实现。
#[async_trait]
pub trait TransportAccept: Send + Sync {
    async fn accept(&self, server: &ServerChannel) -> Accepted;
}

/// 连接能力。
#[async_trait]
pub trait TransportConnect: Send + Sync {
    async fn connect(&self, local: Option<&ChannelAddr>, remote: &ChannelAddr) -> Result<()>;
}

/// 关闭能力：释放底层资源。
#[async_trait]
pub trait TransportClose: Send + Sync {
    async fn close(&self) -> Result<()>;
}

/// 断开能力：拆除连接但不做完整关闭。
#[async_trait]
pub trait TransportDisconnect: Send + Sync {
    async fn disconnect(&self) -> Result<()>;
}

/// 传输实现的入口。
///
/// # 教案式说明
/// - **意图（Why）**：把“传输支持哪些能力”的判定放在一个对象上，通道只持有
///   `Arc<dyn Transport>`，在 worker 中按需取出能力；
/// - **契约（What）**：
///   - 各访问器默认返回 `None`，实现方只覆盖自己支持的能力；
///   - [`init`](Self::init) 在通道组装完成、进入子通道表之后调用一次，可用于保存通道弱引用；
///   - `local_addr`/`remote_addr` 返回传输实际观测到的地址，优先于调用方请求的地址。
pub trait Transport: Send + Sync + 'static {
    /// 日志中使用的传输名称。
    fn scheme(&self) -> &'static str {
        "custom"
    }

    fn init(&self, _channel: &Channel) -> Result<()> {
        Ok(())
    }

    fn local_addr(&self) -> Option<ChannelAddr> {
        None
    }

    fn remote_addr(&self) -> Option<ChannelAddr> {
        None
    }

    fn reader(&self) -> Option<&dyn TransportRead> {
        None
    }

    fn writer(&self) -> Option<&dyn TransportWrite> {
        None
    }

    fn binder(&self) -> Option<&dyn TransportBind> {
        None
    }

    fn acceptor(&self) -> Option<&dyn TransportAccept> {
        None
    }

    fn connector(&self) -> Option<&dyn TransportConnect> {
        None
    }

    fn closer(&self) -> Option<&dyn TransportClose> {
        None
    }

    fn disconnector(&self) -> Option<&dyn TransportDisconnect> {
        None
    }
}
