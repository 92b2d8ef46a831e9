use std::collections::VecDeque;

use bytes::{Buf, BytesMut};

use super::MessageDecoder;
use crate::{
    error::{ChannelError, Result},
    pipeline::{HandlerContext, Message},
};

const NEWLINE: u8 = b'\n';

/// 按换行符拆帧，输出去掉行尾（`\n` 或 `\r\n`）的 `String`。
///
/// # 教案式说明
/// - **契约（What）**：
///   - 单行（不含行尾）超过 `max_length` 字节时返回错误，防止对端构造超长行耗尽内存；
///   - 非 UTF-8 内容返回错误；
///   - 不完整的尾部保留在缓冲中，等待后续字节。
#[derive(Clone, Copy, Debug)]
pub struct LineDecoder {
    max_length: usize,
}

impl LineDecoder {
    pub const DEFAULT_MAX_LENGTH: usize = 8 * 1024;

    pub fn new(max_length: usize) -> Self {
        Self { max_length }
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_LENGTH)
    }
}

impl MessageDecoder for LineDecoder {
    fn decode(
        &mut self,
        _ctx: &HandlerContext<'_>,
        input: &mut BytesMut,
        out: &mut VecDeque<Message>,
    ) -> Result<()> {
        while let Some(pos) = input.iter().position(|byte| *byte == NEWLINE) {
            let mut line = input.split_to(pos + 1);
            line.truncate(pos);
            if line.last() == Some(&b'\r') {
                line.truncate(pos - 1);
            }
            if line.len() > self.max_length {
                return Err(ChannelError::transport(format!(
                    "line length {} exceeds limit {}",
                    line.len(),
                    self.max_length
                )));
            }
            let text = String::from_utf8(line.to_vec()).map_err(|err| {
                ChannelError::transport(format!("line is not valid UTF-8: {err}"))
            })?;
            out.push_back(Box::new(text));
        }

        if input.len() > self.max_length {
            let len = input.len();
            input.advance(len);
            return Err(ChannelError::transport(format!(
                "unterminated line length {len} exceeds limit {}",
                self.max_length
            )));
        }
        Ok(())
    }
}
