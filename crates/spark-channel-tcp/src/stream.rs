//! TCP 流传输：客户端连接与监听端接受的子连接共用同一实现。

use std::{
    io,
    net::SocketAddr,
    sync::{
        OnceLock,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::RwLock;
use spark_channel::{
    Channel, ChannelAddr, ChannelError, Message, ReadOutcome, Result, Transport, TransportClose,
    TransportConnect, TransportDisconnect, TransportRead, TransportWrite, WeakChannel,
};
use tokio::{
    io::AsyncWriteExt,
    net::{
        TcpSocket, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::{Mutex as AsyncMutex, watch},
};
use tracing::{debug, trace};

use crate::{
    config::TcpSocketConfig,
    error::{self, is_peer_gone, map_io_error, not_inet},
};

#[derive(Default)]
struct Endpoints {
    local: Option<SocketAddr>,
    peer: Option<SocketAddr>,
}

/// 基于 Tokio `TcpStream` 的流式传输。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 读写两半分别加锁：读 worker 可能长时间停在“等待可读”上，不能阻塞写 worker；
/// - 读能力按“读到数据 → 套接字读空时报告一次 `Pending`”的节奏工作，
///   通道据此在每批数据之后触发一次 `read_completed`。
///
/// ## 契约（What）
/// - 写入接受 `Bytes`、`BytesMut`、`Vec<u8>` 与 `String` 消息，其余类型以传输错误拒绝；
/// - 对端关闭（EOF 或连接被重置）时主动关闭所属通道，读能力返回错误结束读循环；
/// - 关闭与断开都会半关闭写方向并释放两半，正在等待可读的读取与被对端背压卡住的写入
///   都会被唤醒并返回 `Closed`；
/// - 断开之后允许再次 `connect`。
///
/// ## 注意事项（Trade-offs）
/// - 每次读取都新分配 `read_buffer` 容量的缓冲，读出的数据以零拷贝 `Bytes` 交给管线。
pub struct TcpStreamTransport {
    config: TcpSocketConfig,
    reader: AsyncMutex<Option<OwnedReadHalf>>,
    writer: AsyncMutex<Option<OwnedWriteHalf>>,
    endpoints: RwLock<Endpoints>,
    drained: AtomicBool,
    shutdown: watch::Sender<bool>,
    channel: OnceLock<WeakChannel>,
}

impl TcpStreamTransport {
    /// 尚未建立连接的传输，等待 `connect`。
    pub fn new(config: TcpSocketConfig) -> Self {
        Self {
            config,
            reader: AsyncMutex::new(None),
            writer: AsyncMutex::new(None),
            endpoints: RwLock::new(Endpoints::default()),
            drained: AtomicBool::new(false),
            shutdown: watch::Sender::new(false),
            channel: OnceLock::new(),
        }
    }

    /// 包装一条已经建立的连接（监听端接受的子连接）。
    pub fn from_stream(stream: TcpStream, config: TcpSocketConfig) -> Result<Self> {
        let mut transport = Self::new(config);
        let (reader, writer) = transport.prepare(stream)?;
        *transport.reader.get_mut() = Some(reader);
        *transport.writer.get_mut() = Some(writer);
        Ok(transport)
    }

    pub fn config(&self) -> &TcpSocketConfig {
        &self.config
    }

    /// 应用套接字配置、记录两端地址并拆分读写两半。
    fn prepare(&self, stream: TcpStream) -> Result<(OwnedReadHalf, OwnedWriteHalf)> {
        self.config
            .apply(&stream)
            .map_err(|err| map_io_error(error::CONFIGURE, err))?;
        *self.endpoints.write() = Endpoints {
            local: stream.local_addr().ok(),
            peer: stream.peer_addr().ok(),
        };
        self.drained.store(false, Ordering::Release);
        self.shutdown.send_replace(false);
        Ok(stream.into_split())
    }

    async fn install(&self, stream: TcpStream) -> Result<()> {
        let (reader, writer) = self.prepare(stream)?;
        *self.reader.lock().await = Some(reader);
        *self.writer.lock().await = Some(writer);
        Ok(())
    }

    /// 对端已经离开：关闭所属通道，关闭流程会回调本传输的 `close`。
    fn peer_closed(&self) {
        if let Some(channel) = self.channel.get().and_then(WeakChannel::upgrade) {
            debug!(channel_id = %channel.id(), "tcp peer closed the connection");
            channel.close();
        }
    }

    /// 唤醒等待中的读取，半关闭写方向并释放两半。
    async fn teardown(&self) -> Result<()> {
        self.shutdown.send_replace(true);
        let writer = self.writer.lock().await.take();
        let result = match writer {
            Some(mut half) => match half.shutdown().await {
                Ok(()) => Ok(()),
                Err(err) if is_peer_gone(&err) => Ok(()),
                Err(err) => Err(map_io_error(error::SHUTDOWN, err)),
            },
            None => Ok(()),
        };
        self.reader.lock().await.take();
        result
    }
}

/// 把出站消息转换为连续字节。
fn into_bytes(message: Message) -> Result<Bytes> {
    let message = match message.downcast::<Bytes>() {
        Ok(bytes) => return Ok(*bytes),
        Err(message) => message,
    };
    let message = match message.downcast::<BytesMut>() {
        Ok(bytes) => return Ok((*bytes).freeze()),
        Err(message) => message,
    };
    let message = match message.downcast::<Vec<u8>>() {
        Ok(bytes) => return Ok(Bytes::from(*bytes)),
        Err(message) => message,
    };
    match message.downcast::<String>() {
        Ok(text) => Ok(Bytes::from(*text)),
        Err(_) => Err(ChannelError::transport(
            "tcp write expects Bytes, BytesMut, Vec<u8> or String",
        )),
    }
}

impl Transport for TcpStreamTransport {
    fn scheme(&self) -> &'static str {
        "tcp"
    }

    fn init(&self, channel: &Channel) -> Result<()> {
        self.channel
            .set(channel.downgrade())
            .map_err(|_| ChannelError::transport("tcp transport is already bound to a channel"))
    }

    fn local_addr(&self) -> Option<ChannelAddr> {
        self.endpoints.read().local.map(ChannelAddr::from)
    }

    fn remote_addr(&self) -> Option<ChannelAddr> {
        self.endpoints.read().peer.map(ChannelAddr::from)
    }

    fn reader(&self) -> Option<&dyn TransportRead> {
        Some(self)
    }

    fn writer(&self) -> Option<&dyn TransportWrite> {
        Some(self)
    }

    fn connector(&self) -> Option<&dyn TransportConnect> {
        Some(self)
    }

    fn closer(&self) -> Option<&dyn TransportClose> {
        Some(self)
    }

    fn disconnector(&self) -> Option<&dyn TransportDisconnect> {
        Some(self)
    }
}

#[async_trait]
impl TransportRead for TcpStreamTransport {
    async fn read(&self) -> Result<ReadOutcome> {
        let mut shutdown = self.shutdown.subscribe();
        let mut guard = self.reader.lock().await;
        loop {
            if *shutdown.borrow_and_update() {
                return Err(ChannelError::Closed);
            }
            let Some(half) = guard.as_mut() else {
                return Err(ChannelError::NotActive);
            };

            let mut buf = BytesMut::with_capacity(self.config.read_buffer());
            match half.try_read_buf(&mut buf) {
                Ok(0) => {
                    drop(guard);
                    self.peer_closed();
                    return Err(ChannelError::Closed);
                }
                Ok(read) => {
                    trace!(bytes = read, "tcp read");
                    self.drained.store(false, Ordering::Release);
                    return Ok(ReadOutcome::Message(Box::new(buf.freeze())));
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    if !self.drained.swap(true, Ordering::AcqRel) {
                        return Ok(ReadOutcome::Pending);
                    }
                    tokio::select! {
                        ready = half.readable() => {
                            ready.map_err(|err| map_io_error(error::READ, err))?;
                        }
                        _ = shutdown.changed() => {}
                    }
                }
                Err(err) if is_peer_gone(&err) => {
                    drop(guard);
                    self.peer_closed();
                    return Err(map_io_error(error::READ, err));
                }
                Err(err) => return Err(map_io_error(error::READ, err)),
            }
        }
    }

    fn is_auto_read(&self) -> bool {
        self.config.auto_read()
    }
}

#[async_trait]
impl TransportWrite for TcpStreamTransport {
    async fn write(&self, message: Message) -> Result<()> {
        let payload = into_bytes(message)?;
        let mut shutdown = self.shutdown.subscribe();
        let mut guard = self.writer.lock().await;
        if *shutdown.borrow_and_update() {
            return Err(ChannelError::Closed);
        }
        let half = guard.as_mut().ok_or(ChannelError::NotActive)?;
        // 对端停止读取时 `write_all` 可能无限期挂起，关闭信号必须能打断它并释放写半。
        tokio::select! {
            written = half.write_all(&payload) => {
                written.map_err(|err| map_io_error(error::WRITE, err))
            }
            _ = shutdown.changed() => Err(ChannelError::Closed),
        }
    }
}

#[async_trait]
impl TransportConnect for TcpStreamTransport {
    async fn connect(&self, local: Option<&ChannelAddr>, remote: &ChannelAddr) -> Result<()> {
        let remote = remote
            .as_socket_addr()
            .ok_or_else(|| not_inet(error::CONNECT))?;
        let stream = match local {
            Some(local) => {
                let local = local.as_socket_addr().ok_or_else(|| not_inet(error::BIND))?;
                let socket = if remote.is_ipv4() {
                    TcpSocket::new_v4()
                } else {
                    TcpSocket::new_v6()
                }
                .map_err(|err| map_io_error(error::CONNECT, err))?;
                socket
                    .bind(local)
                    .map_err(|err| map_io_error(error::BIND, err))?;
                socket
                    .connect(remote)
                    .await
                    .map_err(|err| map_io_error(error::CONNECT, err))?
            }
            None => TcpStream::connect(remote)
                .await
                .map_err(|err| map_io_error(error::CONNECT, err))?,
        };
        self.install(stream).await
    }
}

#[async_trait]
impl TransportClose for TcpStreamTransport {
    async fn close(&self) -> Result<()> {
        self.teardown().await
    }
}

#[async_trait]
impl TransportDisconnect for TcpStreamTransport {
    async fn disconnect(&self) -> Result<()> {
        self.teardown().await
    }
}
