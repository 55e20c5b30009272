//! End-to-end trunking scenarios: symbol streams through the frame
//! assembler into the protocol processor, checking the channel-assignment
//! events that come out the far side.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use skywave_common::metrics::NullSink;
use skywave_rx::trunking::smartnet::{channel_frequency, SmartnetAssembler, SmartnetProcessor};
use skywave_rx::trunking::testing::encode_stream;
use skywave_rx::trunking::ChannelUpdate;

/// Assemble the symbol stream and run the processor over the decoded words.
async fn decode_stream(words: &[(u16, bool, u16)]) -> Vec<ChannelUpdate> {
    let (packet_tx, packet_rx) = mpsc::channel(64);
    let (update_tx, mut update_rx) = mpsc::channel(64);
    let token = CancellationToken::new();

    let processor = SmartnetProcessor::new(1400, packet_rx, update_tx, Arc::new(NullSink));
    let handle = tokio::spawn(processor.run(token.clone()));

    let mut assembler = SmartnetAssembler::new(1400, packet_tx);
    assembler.receive(&encode_stream(words));
    drop(assembler); // closes the packet channel; the processor drains and exits

    handle.await.unwrap().unwrap();
    token.cancel();

    let mut updates = Vec::new();
    while let Ok(update) = update_rx.try_recv() {
        updates.push(update);
    }
    updates
}

#[tokio::test]
async fn test_crc_accept_single_frame() {
    // One hand-constructed frame with known contents decodes to exactly one
    // word, which alone produces no channel event.
    let updates = decode_stream(&[(0xBEEF, true, 0x308)]).await;
    assert!(updates.is_empty());
}

#[tokio::test]
async fn test_channel_grant_decodes_to_voice_event() {
    // A grant pair over the air: channel word first, source word second,
    // with an idle word ahead of them filling the dispatch window.
    let updates = decode_stream(&[
        (0x0001, false, 0x300),
        (0x1234, true, 0x200),
        (0x5678, false, 0x308),
    ])
    .await;

    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].tgid, 0x1230);
    assert_eq!(updates[0].source_id, 0x5678);
    assert_eq!(updates[0].frequency, channel_frequency(0x200).unwrap());
    assert_eq!(updates[0].system_id, 1400);
    assert!(updates[0].is_voice_grant());
}

#[tokio::test]
async fn test_control_broadcast_decodes_to_control_event() {
    let updates = decode_stream(&[
        (0x0001, false, 0x300),
        (0x1F3A, false, 0x180),
        (0xCAFE, false, 0x308),
    ])
    .await;

    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].tgid, 0);
    assert_eq!(updates[0].frequency, channel_frequency(0x180).unwrap());
    assert!(!updates[0].is_voice_grant());
}

#[tokio::test]
async fn test_corrupted_frames_produce_no_events() {
    let (packet_tx, packet_rx) = mpsc::channel(64);
    let (update_tx, mut update_rx) = mpsc::channel(64);
    let token = CancellationToken::new();

    let processor = SmartnetProcessor::new(1400, packet_rx, update_tx, Arc::new(NullSink));
    let handle = tokio::spawn(processor.run(token.clone()));

    let mut symbols = encode_stream(&[
        (0x0001, false, 0x300),
        (0x1234, true, 0x200),
        (0x5678, false, 0x308),
    ]);
    // Invert a stretch of the second frame's payload
    for s in symbols.iter_mut().skip(84 + 13).take(2) {
        *s ^= 1;
    }

    let mut assembler = SmartnetAssembler::new(1400, packet_tx);
    assembler.receive(&symbols);
    drop(assembler);

    handle.await.unwrap().unwrap();
    token.cancel();

    // The grant word was corrupted away, so no grant event can exist
    assert!(update_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_processor_exits_on_cancellation() {
    let (_packet_tx, packet_rx) = mpsc::channel(4);
    let (update_tx, _update_rx) = mpsc::channel(4);
    let token = CancellationToken::new();

    let processor = SmartnetProcessor::new(1400, packet_rx, update_tx, Arc::new(NullSink));
    let handle = tokio::spawn(processor.run(token.clone()));

    token.cancel();
    timeout(Duration::from_secs(1), handle)
        .await
        .expect("processor honors cancellation")
        .unwrap()
        .unwrap();
}
