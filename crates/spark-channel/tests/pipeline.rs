//! 管线与字节解码适配器测试。

mod support;

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use spark_channel::{
    Channel, ChannelBuilder, Handler, HandlerContext, Message,
    codec::{ByteToMessageDecoder, LineDecoder, PassThroughDecoder},
};
use support::{MockTransport, Recorder};

fn channel_with(handlers: Vec<(&str, Arc<dyn Handler>)>) -> Channel {
    handlers
        .into_iter()
        .fold(ChannelBuilder::new(MockTransport::new()), |builder, (name, handler)| {
            builder.handler(name, handler)
        })
        .build()
        .expect("build channel")
}

/// 吞掉 `read` 事件、不再向后传递。
struct Swallow;

impl Handler for Swallow {
    fn read(&self, _ctx: &HandlerContext<'_>, _message: Message) {}
}

#[tokio::test(flavor = "multi_thread")]
async fn handlers_keep_insertion_order() {
    let channel = channel_with(vec![("b", Recorder::new() as Arc<dyn Handler>)]);
    let pipeline = channel.pipeline();
    pipeline.add_first("a", Recorder::new());
    pipeline.add_last("c", Recorder::new());
    assert_eq!(pipeline.names(), ["a", "b", "c"]);

    assert!(pipeline.remove("b").is_some());
    assert!(pipeline.remove("missing").is_none());
    assert_eq!(pipeline.names(), ["a", "c"]);
    assert_eq!(pipeline.len(), 2);
    assert!(pipeline.get("c").is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn events_flow_until_a_handler_stops_them() {
    let head = Recorder::new();
    let tail = Recorder::new();
    let channel = channel_with(vec![
        ("head", head.clone() as Arc<dyn Handler>),
        ("swallow", Arc::new(Swallow) as Arc<dyn Handler>),
        ("tail", tail.clone() as Arc<dyn Handler>),
    ]);

    channel.pipeline().fire_read(Box::new("hello".to_owned()));
    channel.pipeline().fire_read_completed();

    assert_eq!(head.events(), ["read:hello", "read_completed"]);
    assert_eq!(tail.events(), ["read_completed"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn line_decoder_reassembles_frames_across_reads() {
    let recorder = Recorder::new();
    let channel = channel_with(vec![
        (
            "decoder",
            Arc::new(ByteToMessageDecoder::new(LineDecoder::default())) as Arc<dyn Handler>,
        ),
        ("recorder", recorder.clone() as Arc<dyn Handler>),
    ]);
    let pipeline = channel.pipeline();

    pipeline.fire_read(Box::new(Bytes::from_static(b"hel")));
    pipeline.fire_read(Box::new(BytesMut::from(&b"lo\r\nwor"[..])));
    pipeline.fire_read(Box::new(b"ld\nbye\n".to_vec()));

    assert_eq!(
        recorder.events(),
        [
            "read_completed",
            "read:hello",
            "read_completed",
            "read:world",
            "read:bye",
            "read_completed",
        ]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn decoder_passes_through_non_byte_messages() {
    let recorder = Recorder::new();
    let channel = channel_with(vec![
        ("decoder", Arc::new(ByteToMessageDecoder::new(PassThroughDecoder)) as Arc<dyn Handler>),
        ("recorder", recorder.clone() as Arc<dyn Handler>),
    ]);

    channel.pipeline().fire_read(Box::new("already decoded".to_owned()));
    channel.pipeline().fire_read(Box::new(Bytes::from_static(b"raw")));

    assert_eq!(
        recorder.events(),
        ["read:already decoded", "read:<opaque>", "read_completed"]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn oversized_line_is_reported_and_discarded() {
    let recorder = Recorder::new();
    let decoder = Arc::new(ByteToMessageDecoder::new(LineDecoder::new(4)));
    let channel = channel_with(vec![
        ("decoder", decoder.clone() as Arc<dyn Handler>),
        ("recorder", recorder.clone() as Arc<dyn Handler>),
    ]);

    channel
        .pipeline()
        .fire_read(Box::new(Bytes::from_static(b"way too long")));
    assert_eq!(decoder.buffered(), 0);
    assert_eq!(
        recorder.events(),
        ["error:spark.channel.transport", "read_completed"]
    );

    channel.pipeline().fire_read(Box::new(Bytes::from_static(b"ok\n")));
    assert_eq!(recorder.count("read:ok"), 1);
}
