//! 字节到消息的解码适配器。
//!
//! 传输层读出的原始字节（`Bytes`/`BytesMut`/`Vec<u8>`）经 [`ByteToMessageDecoder`]
//! 累积后交给 [`MessageDecoder`] 拆帧，拆出的每个对象依次送入下游，
//! 随后发出一次 `read_completed`。

mod decoder;
mod line;

pub use decoder::{ByteToMessageDecoder, MessageDecoder, PassThroughDecoder};
pub use line::LineDecoder;
