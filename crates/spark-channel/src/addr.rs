//! 通道地址。

use std::{fmt, net::SocketAddr, str::FromStr, sync::Arc};

/// 通道的本地或远端地址。
///
/// - `Inet`：IP 套接字地址；
/// - `Local`：进程内或 Unix 路径等不可解析为 IP 的命名地址。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ChannelAddr {
    Inet(SocketAddr),
    Local(Arc<str>),
}

impl ChannelAddr {
    /// 构造命名地址。
    pub fn local(name: impl Into<Arc<str>>) -> Self {
        Self::Local(name.into())
    }

    pub fn as_socket_addr(&self) -> Option<SocketAddr> {
        match self {
            Self::Inet(addr) => Some(*addr),
            Self::Local(_) => None,
        }
    }
}

impl From<SocketAddr> for ChannelAddr {
    fn from(addr: SocketAddr) -> Self {
        Self::Inet(addr)
    }
}

impl FromStr for ChannelAddr {
    type Err = std::convert::Infallible;

    /// 能解析为 `ip:port` 的文本视为 `Inet`，其余视为 `Local`。
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(s.parse::<SocketAddr>()
            .map(Self::Inet)
            .unwrap_or_else(|_| Self::local(s)))
    }
}

impl fmt::Display for ChannelAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inet(addr) => write!(f, "{addr}"),
            Self::Local(name) => write!(f, "local:{name}"),
        }
    }
}
