//! Retry policy of single transactions

mod common;

use bcmxcp_usb::error::{Error, FrameFault};
use bcmxcp_usb::protocol::{encode_read, encode_write};
use bcmxcp_usb::reassembly::ReplyAssembler;
use bcmxcp_usb::transaction::{Command, MAX_ATTEMPTS, TransactionManager, WRITE_SETTLE};
use common::*;
use std::time::Duration;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn test_read_command_sends_read_frame() {
    let device = MockDevice::new();
    device.push_data(frame(1, true, &[0x10, 0x20, 0x30]));
    let mut transport = MockTransport::new(device.clone());

    let reply = TransactionManager::default()
        .execute(&mut transport, &Command::read(0x01))
        .await
        .unwrap();

    assert_eq!(reply.as_ref(), &[0x10, 0x20, 0x30]);
    assert_eq!(device.sent(), vec![encode_read(0x01).to_vec()]);
}

#[tokio::test(start_paused = true)]
async fn test_fifth_attempt_success_is_returned() {
    let device = MockDevice::new();
    device.push_data(corrupt_frame(1, true, &[0x01]));
    device.push(Read::Silence);
    device.push_data(frame(2, true, &[0x01]));
    device.push_data(vec![0x11, 0x22, 0x33, 0x44, 0x55]);
    device.push_data(frame(1, true, &[0x42, 0x43]));
    let mut transport = MockTransport::new(device.clone());

    let reply = TransactionManager::default()
        .execute(&mut transport, &Command::read(0x33))
        .await
        .unwrap();

    assert_eq!(reply.as_ref(), &[0x42, 0x43]);
    assert_eq!(device.sent().len(), MAX_ATTEMPTS);
    assert!(device.sent().iter().all(|f| f == &encode_read(0x33).to_vec()));
}

#[tokio::test(start_paused = true)]
async fn test_empty_reply_counts_as_failed_attempt() {
    let device = MockDevice::new();
    device.push_data(frame(1, true, &[]));
    device.push_data(frame(1, true, &[0x07]));
    let mut transport = MockTransport::new(device.clone());

    let reply = TransactionManager::default()
        .execute(&mut transport, &Command::read(0x33))
        .await
        .unwrap();
    assert_eq!(reply.as_ref(), &[0x07]);
    assert_eq!(device.sent().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_all_attempts_failing_is_retry_exhausted() {
    let device = MockDevice::new();
    for _ in 0..MAX_ATTEMPTS {
        device.push_data(corrupt_frame(1, true, &[0x01, 0x02]));
    }
    let mut transport = MockTransport::new(device.clone());

    let err = TransactionManager::default()
        .execute(&mut transport, &Command::read(0x31))
        .await
        .unwrap_err();

    match err {
        Error::RetryExhausted { opcode, attempts, last } => {
            assert_eq!(opcode, 0x31);
            assert_eq!(attempts, MAX_ATTEMPTS);
            assert!(matches!(
                *last,
                Error::FrameCorrupt(FrameFault::ChecksumMismatch { .. })
            ));
        }
        other => panic!("expected RetryExhausted, got {other:?}"),
    }
    assert_eq!(device.sent().len(), MAX_ATTEMPTS);
}

#[tokio::test(start_paused = true)]
async fn test_write_command_waits_before_reading() {
    let device = MockDevice::new();
    device.push_data(frame(1, true, &[0x01]));
    let mut transport = MockTransport::new(device.clone());

    let start = Instant::now();
    let reply = TransactionManager::default()
        .execute(&mut transport, &Command::write(0xCF, vec![0x09, 0x00]))
        .await
        .unwrap();

    assert_eq!(reply.as_ref(), &[0x01]);
    assert!(start.elapsed() >= WRITE_SETTLE);
    assert_eq!(device.sent(), vec![encode_write(0xCF, &[0x09, 0x00]).unwrap().to_vec()]);
}

#[tokio::test(start_paused = true)]
async fn test_oversized_write_never_reaches_the_wire() {
    let device = MockDevice::new();
    let mut transport = MockTransport::new(device.clone());

    let err = TransactionManager::default()
        .execute(&mut transport, &Command::write(0xCF, vec![0u8; 130]))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::CommandTooLong { .. }));
    assert!(device.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_stops_retrying() {
    let device = MockDevice::new();
    device.push(Read::Fault(nusb::transfer::TransferError::Disconnected));
    let mut transport = MockTransport::new(device.clone());

    let manager = TransactionManager::new(ReplyAssembler::default(), MAX_ATTEMPTS, Duration::ZERO);
    let err = manager.execute(&mut transport, &Command::read(0x33)).await.unwrap_err();

    assert!(matches!(err, Error::RetryExhausted { attempts: 1, .. }));
    assert!(err.is_disconnect());
    assert_eq!(device.sent().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_exchange_lists_protocol_faults_only() {
    let device = MockDevice::new();
    device.push_data(corrupt_frame(1, true, &[0x01]));
    device.push(Read::Silence);
    device.push_data(frame(2, true, &[0x01]));
    device.push_data(frame(1, true, &[0x05]));
    let mut transport = MockTransport::new(device.clone());

    let exchange = TransactionManager::default()
        .exchange(&mut transport, &Command::read(0x33))
        .await;

    assert_eq!(exchange.reply.unwrap().as_ref(), &[0x05]);
    assert_eq!(exchange.protocol_faults.len(), 2);
    assert!(exchange.protocol_faults[0].contains("checksum"));
    assert!(exchange.protocol_faults[1].contains("Sequence desync"));
}
