mod common;

use std::sync::Arc;
use std::time::Duration;

use common::FakeOpener;
use flipctl::device::{ConnectOptions, DeviceError, DeviceSet};
use flipctl::serial::identify::identify;
use flipctl::serial::{LinkError, PeripheralRole};

fn fast_options() -> ConnectOptions {
    ConnectOptions {
        settle: Duration::ZERO,
        response_window: Duration::from_millis(60),
        attempts: 2,
        backoff: Duration::from_millis(10),
    }
}

#[tokio::test]
async fn test_connect_all_assigns_roles_by_response() {
    let opener = Arc::new(FakeOpener::new(&[
        ("/dev/ttyUSB0", "b"),
        ("/dev/ttyUSB1", "a"),
        ("/dev/ttyUSB2", "\r\nc"),
    ]));
    let mut devices = DeviceSet::new(opener.clone());

    assert!(devices.connect_all(&fast_options()).await);
    assert_eq!(devices.link(PeripheralRole::Ldu).map(|l| l.port()), Some("/dev/ttyUSB0"));
    assert_eq!(devices.link(PeripheralRole::SwitchMatrix).map(|l| l.port()), Some("/dev/ttyUSB1"));
    assert_eq!(devices.link(PeripheralRole::Sdu).map(|l| l.port()), Some("/dev/ttyUSB2"));
    assert!(devices.missing_roles().is_empty());

    let io = opener.io("/dev/ttyUSB0").unwrap();
    assert_eq!(io.written(), vec![b'|'], "identify request must be the only write");
}

#[tokio::test]
async fn test_unknown_device_is_closed_and_role_missing() {
    let opener = Arc::new(FakeOpener::new(&[
        ("/dev/ttyUSB0", "a"),
        ("/dev/ttyUSB1", "b"),
        ("/dev/ttyUSB2", "zz"),
    ]));
    let mut devices = DeviceSet::new(opener.clone());

    assert!(!devices.connect_all(&fast_options()).await);
    assert_eq!(devices.missing_roles(), vec![PeripheralRole::Sdu]);
    assert!(opener.io("/dev/ttyUSB2").unwrap().is_closed());
}

#[tokio::test]
async fn test_silent_port_times_out() {
    let opener = FakeOpener::new(&[("/dev/ttyUSB0", "")]);
    let mut io = flipctl::serial::LinkOpener::open(&opener, "/dev/ttyUSB0").await.unwrap();
    let result = identify(io.as_mut(), Duration::ZERO, Duration::from_millis(30)).await;
    assert!(matches!(result, Err(LinkError::Timeout)));
}

#[tokio::test]
async fn test_connect_with_retry_reports_missing_roles() {
    let opener = Arc::new(FakeOpener::new(&[("/dev/ttyUSB0", "a")]));
    let mut devices = DeviceSet::new(opener.clone());

    let result = devices.connect_with_retry(&fast_options()).await;
    match result {
        Err(DeviceError::MissingRoles(missing)) => {
            assert_eq!(missing, vec![PeripheralRole::Ldu, PeripheralRole::Sdu]);
        }
        other => panic!("expected missing roles, got {:?}", other.map(|_| ())),
    }
    assert_eq!(opener.open_count("/dev/ttyUSB0"), 2, "one identify per attempt");
}

#[tokio::test]
async fn test_disconnect_all_is_idempotent() {
    let opener = Arc::new(FakeOpener::new(&[
        ("/dev/ttyUSB0", "a"),
        ("/dev/ttyUSB1", "b"),
        ("/dev/ttyUSB2", "c"),
    ]));
    let mut devices = DeviceSet::new(opener.clone());
    assert!(devices.connect_all(&fast_options()).await);

    devices.disconnect_all().await;
    devices.disconnect_all().await;
    assert!(opener.io("/dev/ttyUSB1").unwrap().is_closed());
    assert_eq!(devices.missing_roles().len(), 3);
}

#[tokio::test]
async fn test_simulated_set_is_connected_without_ports() {
    let opener = Arc::new(FakeOpener::new(&[]));
    let mut devices = DeviceSet::simulated(opener);
    assert!(devices.missing_roles().is_empty());

    let link = devices.take(PeripheralRole::Sdu).unwrap();
    assert!(link.is_simulated());
    assert!(matches!(devices.take(PeripheralRole::Sdu), Err(DeviceError::NotConnected(_))));
    assert!(matches!(devices.take(PeripheralRole::Unknown), Err(DeviceError::NotConnected(_))));
}
