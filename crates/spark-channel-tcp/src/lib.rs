#![deny(unsafe_code)]
#![doc = r#"
# spark-channel-tcp

## 设计动机（Why）
- 为 `spark-channel` 提供基于 Tokio 的 TCP 参考传输：监听端实现绑定、接受与关闭，
  流端实现读、写、连接、关闭与断开；调度、单飞与生命周期全部交给通道核心。

## 核心契约（What）
- [`TcpServerTransport`]：装入 [`ServerChannelBuilder`]，绑定成功后由通道的接受循环
  驱动，每条连接派生一个以 [`TcpStreamTransport`] 为传输的子通道；
- [`TcpStreamTransport`]：读出的数据以 `Bytes` 交给管线，写入接受字节类消息；
- [`TcpSocketConfig`]：`TCP_NODELAY`、`SO_LINGER`、读缓冲容量与默认自动读偏好。

## 使用方式（How）
- [`server`] 与 [`client`] 返回预装传输的建造器，调用方继续追加 Handler、参数或运行时。
"#]

mod config;
mod error;
mod server;
mod stream;

pub use config::{DEFAULT_READ_BUFFER, TcpSocketConfig};
pub use server::TcpServerTransport;
pub use stream::TcpStreamTransport;

use spark_channel::{ChannelBuilder, ServerChannelBuilder};

/// 预装 TCP 监听传输的服务端通道建造器；`config` 应用到每条被接受的连接。
pub fn server(config: TcpSocketConfig) -> ServerChannelBuilder {
    ServerChannelBuilder::new(TcpServerTransport::new(config))
}

/// 预装未连接 TCP 流传输的客户端通道建造器。
pub fn client(config: TcpSocketConfig) -> ChannelBuilder {
    ChannelBuilder::new(TcpStreamTransport::new(config))
}
