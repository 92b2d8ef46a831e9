//! TCP 监听传输：绑定、接受子连接与关闭监听。

use std::{net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use parking_lot::RwLock;
use spark_channel::{
    Accepted, Channel, ChannelAddr, Result, ServerChannel, Transport, TransportAccept, TransportBind,
    TransportClose,
};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::watch,
};
use tracing::{debug, warn};

use crate::{
    config::TcpSocketConfig,
    error::{self, accept_backoff, map_io_error, not_inet},
    stream::TcpStreamTransport,
};

/// 基于 Tokio `TcpListener` 的监听传输。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 服务端通道绑定成功后由通道自己的接受循环反复调用 [`TransportAccept::accept`]，
///   本类型每次只负责“等到一条连接并派生子通道”；
/// - 关闭需要打断正在等待的 `accept`，因此用 `watch` 广播关闭信号，
///   等待中的接受会立即以空子通道返回。
///
/// ## 契约（What）
/// - `config` 应用到每一条被接受的连接；
/// - 接受失败按错误种类退避后返回空子通道，由接受循环记录并继续；
/// - 子通道通过 [`ServerChannel::derive_child_channel`] 创建，继承子参数与子 Handler。
pub struct TcpServerTransport {
    config: TcpSocketConfig,
    listener: RwLock<Option<Arc<TcpListener>>>,
    local: RwLock<Option<SocketAddr>>,
    shutdown: watch::Sender<bool>,
}

impl TcpServerTransport {
    pub fn new(config: TcpSocketConfig) -> Self {
        Self {
            config,
            listener: RwLock::new(None),
            local: RwLock::new(None),
            shutdown: watch::Sender::new(false),
        }
    }

    /// 接受的子连接所使用的套接字配置。
    pub fn child_config(&self) -> &TcpSocketConfig {
        &self.config
    }

    fn derive_child(&self, server: &ServerChannel, stream: TcpStream) -> Result<Channel> {
        let transport = TcpStreamTransport::from_stream(stream, self.config.clone())?;
        server.derive_child_channel(transport)
    }
}

impl Default for TcpServerTransport {
    fn default() -> Self {
        Self::new(TcpSocketConfig::default())
    }
}

impl Transport for TcpServerTransport {
    fn scheme(&self) -> &'static str {
        "tcp-listener"
    }

    fn local_addr(&self) -> Option<ChannelAddr> {
        self.local.read().map(ChannelAddr::from)
    }

    fn binder(&self) -> Option<&dyn TransportBind> {
        Some(self)
    }

    fn acceptor(&self) -> Option<&dyn TransportAccept> {
        Some(self)
    }

    fn closer(&self) -> Option<&dyn TransportClose> {
        Some(self)
    }
}

#[async_trait]
impl TransportBind for TcpServerTransport {
    async fn bind(&self, local: &ChannelAddr) -> Result<()> {
        let addr = local.as_socket_addr().ok_or_else(|| not_inet(error::BIND))?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|err| map_io_error(error::BIND, err))?;
        let bound = listener
            .local_addr()
            .map_err(|err| map_io_error(error::BIND, err))?;
        debug!(local = %bound, "tcp listener bound");
        *self.local.write() = Some(bound);
        *self.listener.write() = Some(Arc::new(listener));
        self.shutdown.send_replace(false);
        Ok(())
    }
}

#[async_trait]
impl TransportAccept for TcpServerTransport {
    async fn accept(&self, server: &ServerChannel) -> Accepted {
        let mut shutdown = self.shutdown.subscribe();
        let listener = self.listener.read().clone();
        let Some(listener) = listener else {
            let _ = shutdown.wait_for(|closed| *closed).await;
            return Accepted::failed();
        };
        if *shutdown.borrow_and_update() {
            return Accepted::failed();
        }

        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => match self.derive_child(server, stream) {
                    Ok(child) => {
                        debug!(server_id = %server.id(), child_id = %child.id(), %peer, "tcp connection accepted");
                        Accepted::child(child)
                    }
                    Err(err) => {
                        warn!(server_id = %server.id(), %peer, error = %err, "failed to derive tcp child channel");
                        Accepted::failed()
                    }
                },
                Err(err) => {
                    let backoff = accept_backoff(&err);
                    warn!(
                        server_id = %server.id(),
                        code = error::ACCEPT.code,
                        error = %err,
                        backoff_ms = backoff.as_millis() as u64,
                        "tcp accept failed"
                    );
                    tokio::time::sleep(backoff).await;
                    Accepted::failed()
                }
            },
            _ = async {
                let _ = shutdown.wait_for(|closed| *closed).await;
            } => Accepted::failed(),
        }
    }
}

#[async_trait]
impl TransportClose for TcpServerTransport {
    async fn close(&self) -> Result<()> {
        self.shutdown.send_replace(true);
        if let Some(listener) = self.listener.write().take() {
            debug!(local = ?listener.local_addr().ok(), "tcp listener closed");
        }
        Ok(())
    }
}
