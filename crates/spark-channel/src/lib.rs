#![deny(unsafe_code)]
#![allow(clippy::module_name_repetitions)]
#![doc = r#"
# spark-channel

## 设计动机（Why）
- **定位**：Spark 通道模型的异步 I/O 核心。传输实现只需暴露少量能力接口
  （读、写、绑定、接受、连接、关闭、断开），即可获得统一的异步语义：
  以 [`ChannelFuture`] 报告结果、按操作种类单飞执行、服务端父子通道层级以及
  有序地把事件送入 Handler 管线。
- **架构角色**：位于传输实现（如 `spark-channel-tcp`）与业务 Handler 之间；
  传输层只负责阻塞式的单次动作，本 crate 负责调度、竞态消解与生命周期。

## 核心契约（What）
- [`ChannelFuture`]：一次写入的完成单元，三种终态（成功/失败/取消），
  首次完成生效、后续完成被丢弃；
- [`ChannelUnsafe`]：每个通道六种操作的驱动器，同一种操作同一时刻最多一个 worker；
- [`ServerChannel`]：派生并登记子通道、下发子参数与子 Handler、协调关闭；
- [`Pipeline`]：按序分发入站事件，[`codec::ByteToMessageDecoder`] 为其字节解码适配器。

## 实现策略（How）
- 每次操作派生一个 Tokio 任务；单飞闸门基于原子 CAS；写队列为无锁 FIFO；
  子通道表为分片并发 Map；接受超时通过“同一 Future 的两次竞争完成”实现。

## 风险与考量（Trade-offs）
- 与闸门冲突的调用是静默空操作：调用方传入的 Future 不会被完成，
  这是单飞语义的一部分，调用方需避免对同一通道并发发起同类操作并等待全部结果。
"#]

pub mod addr;
pub mod channel;
pub mod codec;
pub mod config;
pub mod error;
pub mod future;
mod gate;
pub mod observability;
pub mod params;
pub mod pipeline;
pub mod server;
pub mod transport;
pub mod unsafe_ops;

pub use addr::ChannelAddr;
pub use channel::{Channel, ChannelBuilder, WeakChannel};
pub use config::{ChannelConfig, ParamsConfig};
pub use error::{ChannelError, Result};
pub use future::{ChannelFuture, FutureState};
pub use gate::OpKind;
pub use observability::{ObservabilityError, install_fmt_subscriber};
pub use params::{
    ACCEPT_TIMEOUT, AUTO_READ, DEFAULT_ACCEPT_TIMEOUT, ParamKey, ParamValue, Params,
};
pub use pipeline::{Handler, HandlerContext, Initializer, Message, Pipeline};
pub use server::{ROOT_HANDLER, ServerChannel, ServerChannelBuilder};
pub use transport::{
    Accepted, ReadOutcome, Transport, TransportAccept, TransportBind, TransportClose,
    TransportConnect, TransportDisconnect, TransportRead, TransportWrite,
};
pub use unsafe_ops::ChannelUnsafe;
