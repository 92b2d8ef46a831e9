use std::{io, time::Duration};

use socket2::SockRef;
use tokio::net::TcpStream;

/// 每次读取预留的默认缓冲容量。
pub const DEFAULT_READ_BUFFER: usize = 8 * 1024;

/// TCP 套接字级别的配置项。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 统一描述监听端接受的子连接与客户端主动建立的连接所需的套接字选项，
///   避免在每个调用点重复操作 `TcpStream`；
/// - `SO_LINGER` 决定关闭时未发送完的数据如何处理，对端需要完整收到最后一批响应时
///   应显式配置。
///
/// ## 契约（What）
/// - `nodelay`：是否关闭 Nagle 算法，默认开启（即禁用合包）；
/// - `linger`：`None` 表示沿用操作系统默认值；`Some(Duration::ZERO)` 关闭时直接发送 RST；
/// - `read_buffer`：每次读取预留的容量，最小为 1；
/// - `auto_read`：读能力声明的默认自动读偏好，通道参数 `AUTO_READ` 可以覆盖它。
///
/// ## 注意事项（Trade-offs）
/// - 配置只在连接建立时应用一次，之后修改不会影响已有连接。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TcpSocketConfig {
    nodelay: bool,
    linger: Option<Duration>,
    read_buffer: usize,
    auto_read: bool,
}

impl TcpSocketConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    pub fn with_linger(mut self, linger: Option<Duration>) -> Self {
        self.linger = linger;
        self
    }

    pub fn with_read_buffer(mut self, capacity: usize) -> Self {
        self.read_buffer = capacity.max(1);
        self
    }

    pub fn with_auto_read(mut self, auto_read: bool) -> Self {
        self.auto_read = auto_read;
        self
    }

    pub fn nodelay(&self) -> bool {
        self.nodelay
    }

    pub fn linger(&self) -> Option<Duration> {
        self.linger
    }

    pub fn read_buffer(&self) -> usize {
        self.read_buffer
    }

    pub fn auto_read(&self) -> bool {
        self.auto_read
    }

    /// 把配置写入已经建立的连接。
    pub(crate) fn apply(&self, stream: &TcpStream) -> io::Result<()> {
        stream.set_nodelay(self.nodelay)?;
        SockRef::from(stream).set_linger(self.linger)
    }
}

impl Default for TcpSocketConfig {
    fn default() -> Self {
        Self {
            nodelay: true,
            linger: None,
            read_buffer: DEFAULT_READ_BUFFER,
            auto_read: true,
        }
    }
}
