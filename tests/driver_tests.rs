//! Driver tests against the in-memory mock transport.
//!
//! These cover the mode state machine, the configuration pass and both
//! pipelines with the passthrough protocol module.

use std::sync::Arc;
use std::time::Duration;

use rfm69_rs::radio::mock::MockRadio;
use rfm69_rs::radio::registers::{
    Mode, MODE_MASK, REG_AESKEY1, REG_BROADCASTADRS, REG_FRFMSB, REG_NODEADRS, REG_OCP,
    REG_OPMODE, REG_PACKETCONFIG2, REG_PALEVEL, REG_SYNCVALUE1,
};
use rfm69_rs::{ProtocolChoice, Rfm69Config, Rfm69Driver, RfmError};
use tokio_test::assert_ok;

fn driver_with(mock: &MockRadio, config: Rfm69Config) -> Rfm69Driver {
    Rfm69Driver::new(
        mock.bus(),
        mock.reset_line(),
        mock.interrupt_line(),
        config,
    )
}

#[tokio::test]
async fn standby_and_receive_modes_are_detectable() {
    let mock = MockRadio::new();
    let driver = driver_with(&mock, Rfm69Config::default());

    driver.standby_mode().await.unwrap();
    assert_eq!(
        driver.detect_mode().await.unwrap() & MODE_MASK,
        Mode::Standby.bits()
    );

    driver.receive_mode().await.unwrap();
    assert_eq!(
        driver.detect_mode().await.unwrap() & MODE_MASK,
        Mode::Receive.bits()
    );
}

#[tokio::test]
async fn mode_changes_preserve_unrelated_bits() {
    let mock = MockRadio::new();
    // sequencer-off plus reserved bits outside the mode field
    mock.set_register(REG_OPMODE, 0b1000_0011);
    let driver = driver_with(&mock, Rfm69Config::default());

    driver.standby_mode().await.unwrap();
    driver.receive_mode().await.unwrap();

    let value = driver.detect_mode().await.unwrap();
    assert_eq!(value & !MODE_MASK, 0b1000_0011);
    assert_eq!(value & MODE_MASK, Mode::Receive.bits());
}

#[tokio::test]
async fn initialize_applies_the_configuration_surface() {
    let mock = MockRadio::new();
    let config = Rfm69Config {
        encryption_key: Some("1234567890123456".into()),
        high_power: true,
        node_address: Some(1),
        broadcast_address: Some(155),
        frequency_mhz: Some(433),
        protocol: ProtocolChoice::LowPowerLab {
            local_id: 0x64,
            peer_id: 0x11,
        },
        ..Default::default()
    };
    let driver = driver_with(&mock, config);
    driver.initialize().await.unwrap();

    // reset pulse went out before configuration
    assert_eq!(mock.reset_writes(), vec![true, false]);

    // runtime overrides reached the device
    assert_eq!(mock.register(REG_FRFMSB), 0x6C); // 433 MHz beats the profile default
    assert_eq!(mock.register(REG_NODEADRS), 1);
    assert_eq!(mock.register(REG_BROADCASTADRS), 155);
    assert_eq!(mock.register(REG_AESKEY1), b'1');
    assert_eq!(mock.register(REG_PACKETCONFIG2), 0x01);
    assert_eq!(mock.register(REG_OCP), 0x0F);
    assert_eq!(mock.register(REG_PALEVEL), 0x60);

    // protocol defaults reached the device where nothing overrode them
    assert_eq!(mock.register(REG_SYNCVALUE1), 0x2D);

    // the readback snapshot kept what the device reported before the
    // configuration pass (the last sync handshake pattern)
    assert_eq!(driver.readback(REG_SYNCVALUE1), Some(0x55));
}

#[tokio::test]
async fn initialize_rejects_unknown_frequency() {
    let mock = MockRadio::new();
    let config = Rfm69Config {
        frequency_mhz: Some(900),
        ..Default::default()
    };
    let driver = driver_with(&mock, config);
    assert!(matches!(
        driver.initialize().await,
        Err(RfmError::Config(_))
    ));
}

#[tokio::test]
async fn register_overrides_win_over_protocol_defaults() {
    let mock = MockRadio::new();
    let config = Rfm69Config {
        protocol: ProtocolChoice::LowPowerLab {
            local_id: 0x64,
            peer_id: 0x11,
        },
        ..Default::default()
    };
    let driver = driver_with(&mock, config);

    assert_eq!(driver.register(REG_SYNCVALUE1), Some(0x2D));
    driver.set_register(REG_SYNCVALUE1, 0x55);
    assert_eq!(driver.register(REG_SYNCVALUE1), Some(0x55));
}

#[tokio::test(start_paused = true)]
async fn send_completes_once_packet_sent_fires() {
    let mock = MockRadio::new();
    mock.set_auto_packet_sent(true);
    let mut driver = driver_with(&mock, Rfm69Config::default());
    driver.start_listening().await.unwrap();

    assert_ok!(driver.send(b"hello").await);

    // one on-air burst: length byte then the raw payload
    assert_eq!(mock.sent_frames(), vec![b"\x05hello".to_vec()]);
    assert_eq!(driver.stats().packets_sent, 1);

    // the driver is listening again afterwards
    assert_eq!(
        driver.detect_mode().await.unwrap() & MODE_MASK,
        Mode::Receive.bits()
    );
}

#[tokio::test(start_paused = true)]
async fn send_times_out_without_packet_sent() {
    let mock = MockRadio::new();
    let mut driver = driver_with(&mock, Rfm69Config::default());
    driver.start_listening().await.unwrap();

    let err = driver.send(b"hello").await.unwrap_err();
    assert!(matches!(err, RfmError::SendTimeout));
    assert_eq!(driver.stats().send_timeouts, 1);

    // a late interrupt must not wake a stale listener
    mock.set_register(rfm69_rs::radio::registers::REG_IRQFLAGS2, 0x08);
    mock.pulse_interrupt();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(driver.stats().packets_sent, 0);
}

#[tokio::test(start_paused = true)]
async fn concurrent_send_attempts_are_rejected() {
    let mock = MockRadio::new();
    let mut driver = driver_with(&mock, Rfm69Config::default());
    driver.start_listening().await.unwrap();
    let driver = Arc::new(driver);

    let background = {
        let driver = Arc::clone(&driver);
        tokio::spawn(async move { driver.send(b"one").await })
    };
    tokio::task::yield_now().await; // let the first attempt claim the pipeline

    let err = driver.send(b"two").await.unwrap_err();
    assert!(matches!(err, RfmError::SendBusy));

    // the first attempt runs into its own deadline
    let first = background.await.unwrap();
    assert!(matches!(first, Err(RfmError::SendTimeout)));
}

#[tokio::test(start_paused = true)]
async fn inbound_payload_reaches_the_subscriber() {
    let mock = MockRadio::new();
    let mut driver = driver_with(&mock, Rfm69Config::default());
    let mut inbox = driver.subscribe();
    driver.start_listening().await.unwrap();

    mock.queue_inbound(b"ping");

    let message = inbox.recv().await.unwrap();
    assert_eq!(message.payload, b"ping");
    assert_eq!(message.sender_id, None);
    assert_eq!(driver.stats().packets_received, 1);

    // back to listening once the pipeline finishes
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(
        driver.detect_mode().await.unwrap() & MODE_MASK,
        Mode::Receive.bits()
    );
}

#[tokio::test(start_paused = true)]
async fn unexpected_interrupt_rearms_receive_mode() {
    let mock = MockRadio::new();
    let mut driver = driver_with(&mock, Rfm69Config::default());
    driver.start_listening().await.unwrap();
    driver.standby_mode().await.unwrap();

    mock.pulse_interrupt(); // no IRQ bit set

    for _ in 0..100 {
        if driver.stats().unexpected_interrupts == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    assert_eq!(driver.stats().unexpected_interrupts, 1);
    assert_eq!(
        driver.detect_mode().await.unwrap() & MODE_MASK,
        Mode::Receive.bits()
    );
}

#[tokio::test(start_paused = true)]
async fn shutdown_releases_the_interrupt_line() {
    let mock = MockRadio::new();
    let mut driver = driver_with(&mock, Rfm69Config::default());
    let mut inbox = driver.subscribe();
    driver.start_listening().await.unwrap();

    driver.shutdown();

    // edges no longer reach the dispatcher
    mock.queue_inbound(b"late");
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(inbox.try_recv().is_err());
    assert_eq!(driver.stats().packets_received, 0);
}

#[tokio::test]
async fn bus_errors_propagate_to_the_caller() {
    let mock = MockRadio::new();
    let driver = driver_with(&mock, Rfm69Config::default());

    mock.fail_next_transfer(rfm69_rs::BusError::Transfer("wire noise".into()));
    assert!(matches!(
        driver.standby_mode().await,
        Err(RfmError::Bus(_))
    ));
}
