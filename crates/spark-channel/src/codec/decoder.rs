use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;

use crate::{
    error::Result,
    pipeline::{Handler, HandlerContext, Message},
};

/// 拆帧逻辑。
///
/// # 教案式说明
/// - **契约（What）**：
///   - `input` 是当前累积的全部未消费字节，实现方只消费完整帧，剩余字节留待下一次调用；
///   - 每拆出一个对象就推入 `out`，顺序即下游收到的顺序；
///   - 返回错误时累积缓冲会被清空，错误经 `error_caught` 送往下游。
pub trait MessageDecoder: Send + 'static {
    fn decode(
        &mut self,
        ctx: &HandlerContext<'_>,
        input: &mut BytesMut,
        out: &mut VecDeque<Message>,
    ) -> Result<()>;
}

/// 默认解码器：把当前累积的全部字节原样作为一个 `Bytes` 转发。
#[derive(Clone, Copy, Debug, Default)]
pub struct PassThroughDecoder;

impl MessageDecoder for PassThroughDecoder {
    fn decode(
        &mut self,
        _ctx: &HandlerContext<'_>,
        input: &mut BytesMut,
        out: &mut VecDeque<Message>,
    ) -> Result<()> {
        if !input.is_empty() {
            out.push_back(Box::new(input.split().freeze()));
        }
        Ok(())
    }
}

struct DecoderState<D> {
    decoder: D,
    cumulation: BytesMut,
}

/// 字节解码 Handler。
///
/// 收到字节类消息时累积并解码，依次 `fire_read` 每个结果后发出一次 `fire_read_completed`；
/// 非字节类消息原样转发。
pub struct ByteToMessageDecoder<D = PassThroughDecoder> {
    state: Mutex<DecoderState<D>>,
}

impl<D: MessageDecoder> ByteToMessageDecoder<D> {
    pub fn new(decoder: D) -> Self {
        Self {
            state: Mutex::new(DecoderState {
                decoder,
                cumulation: BytesMut::new(),
            }),
        }
    }

    /// 尚未被解码器消费的字节数。
    pub fn buffered(&self) -> usize {
        self.state.lock().cumulation.len()
    }
}

impl Default for ByteToMessageDecoder<PassThroughDecoder> {
    fn default() -> Self {
        Self::new(PassThroughDecoder)
    }
}

fn into_bytes(message: Message) -> std::result::Result<Bytes, Message> {
    let message = match message.downcast::<Bytes>() {
        Ok(bytes) => return Ok(*bytes),
        Err(other) => other,
    };
    let message = match message.downcast::<BytesMut>() {
        Ok(bytes) => return Ok(bytes.freeze()),
        Err(other) => other,
    };
    match message.downcast::<Vec<u8>>() {
        Ok(bytes) => Ok(Bytes::from(*bytes)),
        Err(other) => Err(other),
    }
}

impl<D: MessageDecoder> Handler for ByteToMessageDecoder<D> {
    fn read(&self, ctx: &HandlerContext<'_>, message: Message) {
        let bytes = match into_bytes(message) {
            Ok(bytes) => bytes,
            Err(other) => {
                ctx.fire_read(other);
                return;
            }
        };

        let mut out = VecDeque::new();
        let result = {
            let mut state = self.state.lock();
            let DecoderState {
                decoder,
                cumulation,
            } = &mut *state;
            cumulation.extend_from_slice(&bytes);
            let result = decoder.decode(ctx, cumulation, &mut out);
            if result.is_err() {
                cumulation.clear();
            }
            result
        };

        while let Some(decoded) = out.pop_front() {
            ctx.fire_read(decoded);
        }
        if let Err(err) = result {
            ctx.fire_error_caught(&err);
        }
        ctx.fire_read_completed();
    }

    fn inactive(&self, ctx: &HandlerContext<'_>) {
        self.state.lock().cumulation.clear();
        ctx.fire_inactive();
    }
}
