//! End-to-end transfer tests over the in-process channel.

mod common;

use std::time::Duration;

use common::{channel_pair, drain_messages, random_bytes, GaugedChannel, Recorder};
use hyperdrop_core::channel::memory::MemoryChannel;
use hyperdrop_core::channel::{Channel, ChannelEvent};
use hyperdrop_core::file::{FileMetadata, OutgoingFile};
use hyperdrop_core::protocol::{control_frame, encode_chunk, ControlMessage, Frame, Message};
use hyperdrop_core::transfer::{Role, TransferConfig, TransferController, TransferStatus};
use hyperdrop_core::{Error, DEFAULT_CHUNK_SIZE};

type Receiver = TransferController<MemoryChannel, Recorder>;

/// Run a full sender/receiver session and return the receiving controller.
async fn transfer(files: Vec<OutgoingFile>, config: TransferConfig) -> (Receiver, Vec<u64>) {
    let ((tx, mut tx_events), (rx, mut rx_events)) = channel_pair();

    let mut receiver = TransferController::new(config.clone(), "Receiver", Recorder::default());
    let mut watcher = receiver.subscribe();

    let watch_task = tokio::spawn(async move {
        let mut seen = Vec::new();
        while watcher.changed().await.is_ok() {
            let snapshot = watcher.borrow_and_update().clone();
            seen.push(snapshot.progress.bytes_transferred);
            if snapshot.progress.status == TransferStatus::Complete {
                break;
            }
        }
        seen
    });

    let receiver_task = tokio::spawn(async move {
        receiver
            .connect(rx, &mut rx_events, Role::Receiver)
            .await
            .expect("receiver connects");
        receiver.run(&mut rx_events).await.expect("receiver runs");
        receiver
    });

    let mut sender = TransferController::new(config, "Sender", ());
    sender
        .connect(tx, &mut tx_events, Role::Sender)
        .await
        .expect("sender connects");
    sender.send_files(&files).await.expect("send succeeds");
    assert_eq!(sender.status(), TransferStatus::Complete);

    let mut receiver = receiver_task.await.unwrap();
    receiver.cleanup();

    sender.run(&mut tx_events).await.expect("sender sees clean close");
    assert_eq!(sender.snapshot().peer_name.as_deref(), Some("Receiver"));

    let seen = watch_task.await.unwrap();
    (receiver, seen)
}

/// Test that file contents survive the trip at chunk boundary sizes.
#[tokio::test]
async fn test_round_trip_boundary_sizes() {
    for size in [
        0,
        1,
        DEFAULT_CHUNK_SIZE,
        DEFAULT_CHUNK_SIZE + 1,
        3 * DEFAULT_CHUNK_SIZE,
    ] {
        let data = random_bytes(size);
        let (receiver, _) = transfer(
            vec![OutgoingFile::from_bytes("file.bin", data.clone())],
            TransferConfig::default(),
        )
        .await;

        let files = &receiver.observer().files;
        assert_eq!(files.len(), 1, "size {size}");
        assert_eq!(files[0].data, data, "size {size}");
        assert_eq!(files[0].metadata.size, size as u64);
        assert_eq!(
            u64::from(files[0].metadata.total_chunks),
            (size as u64).div_ceil(DEFAULT_CHUNK_SIZE as u64)
        );
        assert!(files[0].is_complete());
        assert_eq!(files[0].sender_name, "Sender");
    }
}

/// Test that several files arrive in order with their own metadata.
#[tokio::test]
async fn test_multiple_files_from_disk() {
    let dir = common::create_temp_dir();
    let first = random_bytes(1000);
    let second = random_bytes(DEFAULT_CHUNK_SIZE * 2 + 17);
    let first_path = common::create_test_file(dir.path(), "notes.txt", &first);
    let second_path = common::create_test_file(dir.path(), "photo.png", &second);

    let files = vec![
        OutgoingFile::from_path(&first_path).unwrap(),
        OutgoingFile::from_path(&second_path).unwrap(),
    ];
    let (receiver, _) = transfer(files, TransferConfig::default()).await;

    let received = &receiver.observer().files;
    assert_eq!(received.len(), 2);
    assert_eq!(received[0].metadata.name, "notes.txt");
    assert_eq!(received[0].metadata.mime_type, "text/plain");
    assert_eq!(received[0].data, first);
    assert_eq!(received[1].metadata.name, "photo.png");
    assert_eq!(received[1].metadata.mime_type, "image/png");
    assert_eq!(received[1].data, second);

    let snapshot = receiver.snapshot();
    assert_eq!(snapshot.files_completed, 2);
    assert_eq!(snapshot.total_files, 2);
    assert_eq!(snapshot.progress.status, TransferStatus::Complete);
}

/// Test that receive progress never goes backwards and ends at the file size.
#[tokio::test]
async fn test_progress_is_monotonic() {
    let size = DEFAULT_CHUNK_SIZE * 4 + 3;
    let (_receiver, seen) = transfer(
        vec![OutgoingFile::from_bytes("big.bin", random_bytes(size))],
        TransferConfig::default(),
    )
    .await;

    assert!(!seen.is_empty());
    assert!(seen.windows(2).all(|w| w[0] <= w[1]), "progress went backwards: {seen:?}");
    assert_eq!(*seen.last().unwrap(), size as u64);
}

/// Test the exact frame sequence for a 10 B file followed by a 600 KiB file.
#[tokio::test]
async fn test_two_file_wire_sequence() {
    let ((tx, mut tx_events), (_rx, mut rx_events)) = channel_pair();
    let mut sender = TransferController::new(TransferConfig::default(), "Laptop", ());
    sender
        .connect(tx, &mut tx_events, Role::Sender)
        .await
        .unwrap();

    let files = vec![
        OutgoingFile::from_bytes("a.txt", vec![b'a'; 10]),
        OutgoingFile::from_bytes("b.bin", random_bytes(600 * 1024)),
    ];
    sender.send_files(&files).await.unwrap();

    assert_eq!(rx_events.next().await, Some(ChannelEvent::Open));
    let messages = drain_messages(&mut rx_events);

    let shape: Vec<String> = messages
        .iter()
        .map(|m| match m {
            Message::Chunk(c) => format!("chunk {} {}", c.index, c.payload.len()),
            Message::Control(c) => c.kind().to_string(),
        })
        .collect();
    assert_eq!(
        shape,
        vec![
            "device-name",
            "total-files",
            "file-metadata",
            "chunk 0 10",
            "file-complete",
            "file-metadata",
            "chunk 0 262144",
            "chunk 1 262144",
            "chunk 2 90112",
            "file-complete",
            "all-complete",
        ]
    );

    assert_eq!(
        messages[1],
        Message::Control(ControlMessage::TotalFiles { count: 2 })
    );
    let Message::Control(ControlMessage::FileMetadata { metadata }) = &messages[5] else {
        panic!("expected file-metadata");
    };
    assert_eq!(metadata.name, "b.bin");
    assert_eq!(metadata.size, 614_400);
    assert_eq!(metadata.total_chunks, 3);

    let snapshot = sender.snapshot();
    assert_eq!(snapshot.progress.status, TransferStatus::Complete);
    assert_eq!(snapshot.progress.bytes_transferred, 614_400);
    assert_eq!(snapshot.files_completed, 2);
}

/// Test that a broken control frame mid-file is dropped without failing the session.
#[tokio::test]
async fn test_malformed_control_frame_mid_session() {
    let ((raw, _raw_events), (rx, mut rx_events)) = channel_pair();
    let mut receiver = TransferController::new(TransferConfig::default(), "Desk", Recorder::default());
    receiver
        .connect(rx, &mut rx_events, Role::Receiver)
        .await
        .unwrap();

    let metadata = FileMetadata::new("note.txt", 8, "text/plain", DEFAULT_CHUNK_SIZE).unwrap();
    raw.send(control_frame(&ControlMessage::TotalFiles { count: 1 }).unwrap())
        .await
        .unwrap();
    raw.send(control_frame(&ControlMessage::FileMetadata { metadata }).unwrap())
        .await
        .unwrap();
    raw.send(Frame::Text(r#"{"type":"file-metadata"}"#.to_string()))
        .await
        .unwrap();

    for _ in 0..3 {
        let event = rx_events.next().await.unwrap();
        receiver.handle_event(event).unwrap();
    }
    assert_eq!(receiver.status(), TransferStatus::Transferring);
    assert!(receiver.snapshot().connection_error.is_none());

    raw.send(Frame::Binary(encode_chunk(0, b"12345678")))
        .await
        .unwrap();
    raw.send(control_frame(&ControlMessage::FileComplete).unwrap())
        .await
        .unwrap();
    raw.send(control_frame(&ControlMessage::AllComplete).unwrap())
        .await
        .unwrap();
    receiver.run(&mut rx_events).await.unwrap();

    assert_eq!(receiver.status(), TransferStatus::Complete);
    assert_eq!(receiver.observer().files[0].data, b"12345678");
    assert!(receiver.observer().errors.is_empty());
}

/// Test that an oversize file is refused before anything is sent.
#[tokio::test]
async fn test_capacity_exceeded_sends_nothing() {
    let ((tx, mut tx_events), (_rx, mut rx_events)) = channel_pair();
    let config = TransferConfig {
        max_file_size: Some(5 * 1024 * 1024),
        ..TransferConfig::default()
    };
    let mut sender = TransferController::new(config, "Phone", Recorder::default());
    sender
        .connect(tx, &mut tx_events, Role::Sender)
        .await
        .unwrap();

    let files = vec![
        OutgoingFile::from_bytes("small.txt", vec![1; 10]),
        OutgoingFile::from_bytes("huge.bin", vec![0; 6 * 1024 * 1024]),
    ];
    let result = sender.send_files(&files).await;
    assert!(matches!(
        result,
        Err(Error::CapacityExceeded { ref name, .. }) if name == "huge.bin"
    ));

    let _ = rx_events.next().await;
    let messages = drain_messages(&mut rx_events);
    assert_eq!(messages.len(), 1, "only device-name should have been sent");

    let snapshot = sender.snapshot();
    assert_eq!(snapshot.progress.status, TransferStatus::Pending);
    assert!(snapshot.connection_error.unwrap().contains("too large"));
    assert_eq!(sender.observer().errors.len(), 1);

    sender.send_files(&files[..1]).await.unwrap();
    assert_eq!(sender.status(), TransferStatus::Complete);
}

/// Test that a channel that never opens times out and tears down.
#[tokio::test(start_paused = true)]
async fn test_connect_timeout() {
    let ((tx, mut tx_events), _peer) = channel_pair();
    assert_eq!(tx_events.next().await, Some(ChannelEvent::Open));

    let mut sender = TransferController::new(TransferConfig::default(), "Phone", Recorder::default());
    let started = tokio::time::Instant::now();
    let result = sender.connect(tx, &mut tx_events, Role::Sender).await;

    assert!(matches!(result, Err(Error::Timeout(15))));
    assert!(started.elapsed() >= Duration::from_secs(15));

    let snapshot = sender.snapshot();
    assert_eq!(snapshot.progress.status, TransferStatus::Error);
    assert_eq!(
        snapshot.connection_error.as_deref(),
        Some("Connection timeout - the other device may be offline")
    );
    assert!(!snapshot.connected);
}

/// Test that a transport failure mid-file ends the session with an error.
#[tokio::test]
async fn test_channel_fault_mid_transfer() {
    let ((raw, _raw_events), (rx, mut rx_events)) = channel_pair();
    let mut receiver = TransferController::new(TransferConfig::default(), "Desk", Recorder::default());
    receiver
        .connect(rx, &mut rx_events, Role::Receiver)
        .await
        .unwrap();

    let metadata = FileMetadata::new("movie.mp4", 1024, "video/mp4", 512).unwrap();
    raw.send(control_frame(&ControlMessage::FileMetadata { metadata }).unwrap())
        .await
        .unwrap();
    raw.send(Frame::Binary(encode_chunk(0, &[0; 512])))
        .await
        .unwrap();
    raw.fail("ice connection failed");

    let result = receiver.run(&mut rx_events).await;
    assert!(matches!(result, Err(Error::ChannelFault(_))));

    let snapshot = receiver.snapshot();
    assert_eq!(snapshot.progress.status, TransferStatus::Error);
    assert_eq!(snapshot.progress.bytes_transferred, 512);
    assert!(snapshot.connection_error.is_some());
    assert!(receiver.observer().files.is_empty());
    assert!(receiver.channel().is_none());
}

/// Test that the peer closing before the set completes is reported.
#[tokio::test]
async fn test_early_close_is_an_error() {
    let ((raw, _raw_events), (rx, mut rx_events)) = channel_pair();
    let mut receiver = TransferController::new(TransferConfig::default(), "Desk", Recorder::default());
    receiver
        .connect(rx, &mut rx_events, Role::Receiver)
        .await
        .unwrap();

    raw.close();
    let result = receiver.run(&mut rx_events).await;
    assert!(matches!(result, Err(Error::ChannelFault(_))));
    assert_eq!(receiver.status(), TransferStatus::Error);
}

/// Test that attaching a second channel replaces the first session.
#[tokio::test]
async fn test_attach_replaces_session() {
    let ((first, _first_events), (_first_peer, mut first_peer_events)) = channel_pair();
    let ((second, _second_events), (_second_peer, _second_peer_events)) = channel_pair();

    let mut controller = TransferController::new(TransferConfig::default(), "Desk", ());
    controller.attach(first, Role::Receiver).await.unwrap();
    controller.attach(second, Role::Sender).await.unwrap();

    assert_eq!(controller.session().unwrap().role, Role::Sender);
    assert_eq!(first_peer_events.next().await, Some(ChannelEvent::Open));
    let _ = first_peer_events.next().await;
    assert_eq!(first_peer_events.next().await, Some(ChannelEvent::Closed));
}

/// Test that the sender pauses between files and nowhere else.
#[tokio::test(start_paused = true)]
async fn test_inter_file_delay() {
    let channel = GaugedChannel::default();
    let config = TransferConfig::default();
    let mut sender = TransferController::new(config.clone(), "Laptop", ());
    sender.attach(channel.clone(), Role::Sender).await.unwrap();

    let files = vec![
        OutgoingFile::from_bytes("a.txt", vec![b'a'; 10]),
        OutgoingFile::from_bytes("b.txt", vec![b'b'; 10]),
    ];
    sender.send_files(&files).await.unwrap();

    let timeline = channel.timeline();
    let kinds: Vec<&str> = timeline
        .iter()
        .map(|(_, m)| match m {
            Message::Chunk(_) => "chunk",
            Message::Control(c) => c.kind(),
        })
        .collect();
    assert_eq!(
        kinds,
        vec![
            "device-name",
            "total-files",
            "file-metadata",
            "chunk",
            "file-complete",
            "file-metadata",
            "chunk",
            "file-complete",
            "all-complete",
        ]
    );

    let gap = timeline[5].0 - timeline[4].0;
    assert_eq!(gap, config.inter_file_delay);
    assert_eq!(config.inter_file_delay, Duration::from_millis(50));
    assert_eq!(timeline[4].0, timeline[0].0);
    assert_eq!(timeline[8].0, timeline[5].0);
}

/// Test that each delivered file reports its size over its own receive time.
#[tokio::test(start_paused = true)]
async fn test_final_speed_is_size_over_elapsed() {
    let ((tx, mut tx_events), (rx, mut rx_events)) = channel_pair();
    let config = TransferConfig {
        chunk_size: 1024,
        ..TransferConfig::default()
    };

    let receiver_task = {
        let config = config.clone();
        tokio::spawn(async move {
            let mut receiver = TransferController::new(config, "Receiver", Recorder::default());
            receiver
                .connect(rx, &mut rx_events, Role::Receiver)
                .await
                .unwrap();
            let mut speeds = Vec::new();
            while let Some(event) = rx_events.next().await {
                let is_chunk = matches!(event, ChannelEvent::Message(Frame::Binary(_)));
                let is_text = matches!(event, ChannelEvent::Message(Frame::Text(_)));
                receiver.handle_event(event).unwrap();
                if is_chunk {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                if is_text {
                    speeds.push(receiver.snapshot().progress.speed_bps);
                }
                if receiver.status() == TransferStatus::Complete {
                    break;
                }
            }
            (receiver, speeds)
        })
    };

    let mut sender = TransferController::new(config, "Sender", ());
    sender
        .connect(tx, &mut tx_events, Role::Sender)
        .await
        .unwrap();
    let files = vec![
        OutgoingFile::from_bytes("a.bin", random_bytes(3000)),
        OutgoingFile::from_bytes("b.bin", random_bytes(2048)),
    ];
    sender.send_files(&files).await.unwrap();

    let (receiver, speeds) = receiver_task.await.unwrap();
    let received = &receiver.observer().files;
    assert_eq!(received.len(), 2);

    assert_eq!(received[0].transfer_time, Duration::from_millis(30));
    assert_eq!(received[1].transfer_time, Duration::from_millis(20));
    for file in received {
        let expected = file.metadata.size as f64 / file.transfer_time.as_secs_f64();
        assert!((file.transfer_speed_bps - expected).abs() < expected * 1e-9);
        assert!(speeds.contains(&file.transfer_speed_bps));
    }
    assert_eq!(
        receiver.snapshot().progress.speed_bps,
        received[1].transfer_speed_bps
    );
}

/// Test that the sender learns the receiver's name while the set is going out.
#[tokio::test]
async fn test_sender_sees_peer_name_during_send() {
    let ((tx, mut tx_events), (rx, mut rx_events)) = channel_pair();

    let mut receiver = TransferController::new(TransferConfig::default(), "Receiver", Recorder::default());
    receiver
        .connect(rx, &mut rx_events, Role::Receiver)
        .await
        .unwrap();

    let mut sender = TransferController::new(TransferConfig::default(), "Sender", ());
    sender
        .connect(tx, &mut tx_events, Role::Sender)
        .await
        .unwrap();
    sender
        .send_files_with_events(
            &[OutgoingFile::from_bytes("a.txt", b"hello".to_vec())],
            &mut tx_events,
        )
        .await
        .unwrap();
    assert_eq!(sender.snapshot().peer_name.as_deref(), Some("Receiver"));

    receiver.run(&mut rx_events).await.unwrap();
    assert_eq!(receiver.observer().files[0].data, b"hello");
}

/// Test that a receiver hanging up between files stops the send.
#[tokio::test(start_paused = true)]
async fn test_close_between_files_stops_send() {
    let ((tx, mut tx_events), (rx, mut rx_events)) = channel_pair();
    let mut sender = TransferController::new(TransferConfig::default(), "Sender", Recorder::default());
    sender
        .connect(tx, &mut tx_events, Role::Sender)
        .await
        .unwrap();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        rx.close();
    });

    let files = vec![
        OutgoingFile::from_bytes("a.txt", vec![1]),
        OutgoingFile::from_bytes("b.txt", vec![2]),
    ];
    let result = sender.send_files_with_events(&files, &mut tx_events).await;
    assert!(matches!(result, Err(Error::ChannelFault(_))));
    assert_eq!(sender.observer().errors.len(), 1);
    assert_eq!(sender.status(), TransferStatus::Error);
    assert!(sender.session().is_none());

    let announced = drain_messages(&mut rx_events)
        .into_iter()
        .filter(|m| matches!(m, Message::Control(ControlMessage::FileMetadata { .. })))
        .count();
    assert_eq!(announced, 1);
}
