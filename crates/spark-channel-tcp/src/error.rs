use std::{io, time::Duration};

use spark_channel::ChannelError;
use tracing::trace;

/// 描述一次底层操作对应的稳定错误码与默认文案。
#[derive(Clone, Copy, Debug)]
pub(crate) struct OperationKind {
    pub code: &'static str,
    pub message: &'static str,
}

pub(crate) const BIND: OperationKind = OperationKind {
    code: "spark.channel.tcp.bind_failed",
    message: "tcp bind",
};
pub(crate) const ACCEPT: OperationKind = OperationKind {
    code: "spark.channel.tcp.accept_failed",
    message: "tcp accept",
};
pub(crate) const CONNECT: OperationKind = OperationKind {
    code: "spark.channel.tcp.connect_failed",
    message: "tcp connect",
};
pub(crate) const READ: OperationKind = OperationKind {
    code: "spark.channel.tcp.read_failed",
    message: "tcp read",
};
pub(crate) const WRITE: OperationKind = OperationKind {
    code: "spark.channel.tcp.write_failed",
    message: "tcp write",
};
pub(crate) const SHUTDOWN: OperationKind = OperationKind {
    code: "spark.channel.tcp.shutdown_failed",
    message: "tcp shutdown",
};
pub(crate) const CONFIGURE: OperationKind = OperationKind {
    code: "spark.channel.tcp.configure_failed",
    message: "tcp configure",
};

/// 将 IO 错误映射为通道错误，操作文案作为上下文保留。
pub(crate) fn map_io_error(kind: OperationKind, error: io::Error) -> ChannelError {
    trace!(code = kind.code, kind = ?error.kind(), "tcp io error");
    ChannelError::io(kind.message, error)
}

/// 地址不是 `Inet` 时的统一错误。
pub(crate) fn not_inet(kind: OperationKind) -> ChannelError {
    ChannelError::transport(format!("{} requires an inet address", kind.message))
}

/// 对端已经离开：这类错误与 EOF 同等对待，直接关闭通道。
pub(crate) fn is_peer_gone(error: &io::Error) -> bool {
    use io::ErrorKind;
    matches!(
        error.kind(),
        ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::NotConnected
            | ErrorKind::UnexpectedEof
    )
}

/// 接受失败后的退避时长。
///
/// 瞬时错误（被中断、对端在握手期间放弃）几乎立刻重试；
/// 其余错误多为资源耗尽（如文件描述符上限），需要给系统留出回收时间。
pub(crate) fn accept_backoff(error: &io::Error) -> Duration {
    use io::ErrorKind;
    match error.kind() {
        ErrorKind::WouldBlock | ErrorKind::Interrupted => Duration::from_millis(5),
        ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted => Duration::from_millis(5),
        ErrorKind::TimedOut => Duration::from_millis(50),
        _ => Duration::from_millis(100),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_keep_the_operation_context() {
        let err = map_io_error(WRITE, io::Error::from(io::ErrorKind::BrokenPipe));
        assert_eq!(err.code(), "spark.channel.io");
        assert!(err.to_string().contains("tcp write"));
    }

    #[test]
    fn peer_departure_is_recognised() {
        assert!(is_peer_gone(&io::Error::from(io::ErrorKind::ConnectionReset)));
        assert!(!is_peer_gone(&io::Error::from(io::ErrorKind::PermissionDenied)));
        assert!(
            accept_backoff(&io::Error::from(io::ErrorKind::Interrupted))
                < accept_backoff(&io::Error::other("too many open files"))
        );
    }
}
