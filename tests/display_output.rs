mod common;

use std::convert::Infallible;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use common::{Emitted, RecordingBackend, RecordingServo};
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{ErrorType as PinErrorType, OutputPin};
use embedded_hal::i2c::{self, I2c, Operation};
use flipctl::display::{
    number_to_digits, DisplayBuffer, DisplayCommand, DisplayTarget, Frame, I2cDisplay, Multiplexer,
    OutputBackend, Pca9685Servo, ScanningDisplay, ServoOutput, ServoSettings, ShiftChain,
    ShiftRegisterDisplay, SoundLatch, SoundOutput, BLANK, DISPLAY_UNITS, NO_SOUND,
};
use flipctl::router::CommandRouter;
use flipctl::{Machine, MachineConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Line {
    Data,
    Clock,
    Latch,
}

type PinLog = Arc<Mutex<Vec<(Line, bool)>>>;

struct FakePin {
    line: Line,
    log: PinLog,
}

impl PinErrorType for FakePin {
    type Error = Infallible;
}

impl OutputPin for FakePin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.log.lock().unwrap().push((self.line, false));
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.log.lock().unwrap().push((self.line, true));
        Ok(())
    }
}

struct NoDelay;

impl DelayNs for NoDelay {
    fn delay_ns(&mut self, _ns: u32) {}
}

fn chain(log: &PinLog) -> ShiftChain<FakePin, FakePin, FakePin, NoDelay> {
    let pin = |line| FakePin { line, log: log.clone() };
    ShiftChain::new(pin(Line::Data), pin(Line::Clock), pin(Line::Latch), NoDelay)
}

/// Bytes clocked out, sampling data on every rising clock edge
fn shifted_bytes(log: &PinLog) -> Vec<u8> {
    let mut data = false;
    let mut bits = Vec::new();
    for (line, level) in log.lock().unwrap().iter() {
        match line {
            Line::Data => data = *level,
            Line::Clock if *level => bits.push(data),
            _ => {}
        }
    }
    bits.chunks(8)
        .map(|byte| byte.iter().fold(0u8, |acc, bit| (acc << 1) | u8::from(*bit)))
        .collect()
}

fn latch_rises(log: &PinLog) -> usize {
    log.lock().unwrap().iter().filter(|(line, level)| *line == Line::Latch && *level).count()
}

#[test]
fn test_shift_out_is_msb_first() {
    let log = PinLog::default();
    let mut chain = chain(&log);
    chain.shift_out(0xA5).unwrap();
    chain.shift_out(0x01).unwrap();
    assert_eq!(shifted_bytes(&log), vec![0xA5, 0x01]);
}

#[test]
fn test_scan_frame_layout() {
    let log = PinLog::default();
    let mut display = ShiftRegisterDisplay::new(chain(&log));
    let mut buffer = DisplayBuffer::new();
    buffer.apply(DisplayCommand { target: DisplayTarget::Credits, value: 7 });

    display.scan(&Frame::new(&buffer, 3)).unwrap();

    let bytes = shifted_bytes(&log);
    // 7 digit positions, 6 latch loads each, 2 phases of 3 bytes
    assert_eq!(bytes.len(), 7 * 6 * 6);
    assert_eq!(latch_rises(&log), 7 * 6 * 2);

    // unit 0, digit 0: sound 3 in the high nibble, credit digit 7, strobes off
    assert_eq!(&bytes[0..6], &[0x37, 0x00, 0x7F, 0x37, 0x01, 0x7F]);
    // last unit strobes digit 0 on (inverted bank)
    assert_eq!(&bytes[30..36], &[0x3F, 0x00, 0x7F, 0x3F, 0x10, 0x7E]);
    // digit 1 strobe
    assert_eq!(bytes[36 + 35], 0x7D);
}

#[test]
fn test_scanning_display_draws_on_its_own_thread() {
    let log = PinLog::default();
    let mut display =
        ScanningDisplay::spawn(ShiftRegisterDisplay::new(chain(&log)), Duration::from_millis(5)).unwrap();
    assert!(display.is_running());

    // both calls only publish a frame
    display.sound_changed(3).unwrap();
    display.unit_changed(0, &number_to_digits(7)).unwrap();
    assert_eq!(display.frame().sound, 3);
    assert_eq!(display.frame().units[0], number_to_digits(7));
    assert!(display.unit_changed(DISPLAY_UNITS, &number_to_digits(1)).is_err());

    let deadline = Instant::now() + Duration::from_secs(2);
    while !shifted_bytes(&log).windows(3).any(|w| w == [0x37, 0x00, 0x7F]) {
        assert!(Instant::now() < deadline, "scan thread never drew the published frame");
        std::thread::sleep(Duration::from_millis(5));
    }

    display.shutdown();
    let settled = log.lock().unwrap().len();
    std::thread::sleep(Duration::from_millis(30));
    assert_eq!(log.lock().unwrap().len(), settled, "no pin activity after shutdown");
}

#[test]
fn test_sound_latch_stages_one_byte() {
    let log = PinLog::default();
    let mut latch = SoundLatch::new(chain(&log));
    latch.stage(9).unwrap();
    assert_eq!(shifted_bytes(&log), vec![9]);
    assert_eq!(latch_rises(&log), 1);
}

#[derive(Debug)]
struct BusFault;

impl i2c::Error for BusFault {
    fn kind(&self) -> i2c::ErrorKind {
        i2c::ErrorKind::Other
    }
}

#[derive(Clone, Default)]
struct FakeBus {
    writes: Arc<Mutex<Vec<(u8, Vec<u8>)>>>,
    fail: bool,
}

impl i2c::ErrorType for FakeBus {
    type Error = BusFault;
}

impl I2c for FakeBus {
    fn transaction(&mut self, address: u8, operations: &mut [Operation<'_>]) -> Result<(), Self::Error> {
        if self.fail {
            return Err(BusFault);
        }
        for op in operations.iter() {
            if let Operation::Write(bytes) = op {
                self.writes.lock().unwrap().push((address, bytes.to_vec()));
            }
        }
        Ok(())
    }
}

#[test]
fn test_i2c_frame_is_unit_then_digits() {
    let bus = FakeBus::default();
    let mut display = I2cDisplay::new(bus.clone(), 0x11);
    display.unit_changed(2, &number_to_digits(42)).unwrap();

    let writes = bus.writes.lock().unwrap().clone();
    assert_eq!(writes, vec![(0x11, vec![2, 2, 4, BLANK, BLANK, BLANK, BLANK, BLANK])]);
}

#[test]
fn test_i2c_bus_failure_is_reported() {
    let bus = FakeBus { fail: true, ..Default::default() };
    let mut display = I2cDisplay::new(bus, 0x11);
    assert!(display.unit_changed(1, &number_to_digits(0)).is_err());
}

#[test]
fn test_pca9685_setup_and_angle() {
    let bus = FakeBus::default();
    let mut servo = Pca9685Servo::new(bus.clone(), ServoSettings::default()).unwrap();
    servo.set_angle(90).unwrap();

    let writes: Vec<Vec<u8>> = bus.writes.lock().unwrap().iter().map(|(_, b)| b.clone()).collect();
    assert_eq!(
        writes,
        vec![
            vec![0x00, 0x10],
            vec![0xFE, 121],
            vec![0x00, 0x20],
            vec![0x06, 0, 0, 0x33, 0x01],
        ]
    );
}

#[tokio::test]
async fn test_multiplexer_applies_commands_and_resets_sound() {
    let (router, rx) = CommandRouter::new(16);
    let backend = RecordingBackend::default();
    let servo = RecordingServo::default();

    let multiplexer = Multiplexer::new(
        Box::new(backend.clone()),
        rx.display_rx,
        rx.sound_rx,
        rx.servo_rx,
        router.sound_sender(),
    )
    .with_servo(Some(Box::new(servo.clone())))
    .with_refresh_interval(Duration::from_millis(2))
    .with_sound_dwell(Duration::from_millis(20));
    let handle = tokio::spawn(multiplexer.run());

    router.set_display(DisplayTarget::Player(1), 1234).await;
    router.set_credits(5).await;
    router.play_sound(3).await;
    router.servo_angle(45).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    router.quit().await;

    let buffer = handle.await.unwrap();
    assert_eq!(buffer.player_value(1), Some(1234));
    assert_eq!(buffer.credits(), Some(5));
    assert_eq!(buffer.ball_in_play(), None);

    let emitted = backend.emitted();
    assert!(emitted.contains(&Emitted::Unit(1, number_to_digits(1234))));
    let sounds: Vec<u8> = emitted
        .iter()
        .filter_map(|e| match e {
            Emitted::Sound(code) => Some(*code),
            _ => None,
        })
        .collect();
    assert_eq!(sounds, vec![3, NO_SOUND]);
    assert_eq!(*servo.angles.lock().unwrap(), vec![45]);
    assert!(backend.refreshes.load(Ordering::SeqCst) > 0);
}

#[tokio::test]
async fn test_retriggered_sound_keeps_its_full_dwell() {
    let (router, rx) = CommandRouter::new(16);
    let backend = RecordingBackend::default();
    let handle = tokio::spawn(
        Multiplexer::new(Box::new(backend.clone()), rx.display_rx, rx.sound_rx, rx.servo_rx, router.sound_sender())
            .with_sound_dwell(Duration::from_millis(200))
            .run(),
    );
    let sounds = || -> Vec<u8> {
        backend
            .emitted()
            .iter()
            .filter_map(|e| match e {
                Emitted::Sound(code) => Some(*code),
                _ => None,
            })
            .collect()
    };

    router.play_sound(3).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    router.play_sound(4).await;

    // the first play's reset fires at 200ms and must not cut the second short
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(sounds(), vec![3, 4]);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(sounds(), vec![3, 4, NO_SOUND]);

    router.quit().await;
    handle.await.unwrap();
}

#[tokio::test]
async fn test_builder_wires_configured_i2c_outputs() {
    let display_bus = FakeBus::default();
    let servo_bus = FakeBus::default();
    let config = MachineConfig {
        console_mode: true,
        simulated_switch_interval_ms: 60_000,
        ..MachineConfig::from_json_str(
            r#"{"display": {"i2c_address": 34}, "servo": {"address": 65, "channel": 1}}"#,
        )
        .unwrap()
    };

    let machine = Machine::builder(config)
        .i2c_display(display_bus.clone())
        .pca9685_servo(servo_bus.clone())
        .unwrap()
        .build()
        .unwrap();
    machine.start().await.unwrap();

    machine.set_credits(5).await;
    machine.router().servo_angle(90).await;
    let credit_frame = (34, vec![0, 5, BLANK, BLANK, BLANK, BLANK, BLANK, BLANK]);
    let servo_frame = (65, vec![0x0A, 0, 0, 0x33, 0x01]);
    assert!(
        common::wait_until(Duration::from_secs(1), || async {
            display_bus.writes.lock().unwrap().contains(&credit_frame)
                && servo_bus.writes.lock().unwrap().contains(&servo_frame)
        })
        .await
    );
    // chip setup went to the configured address as well
    assert_eq!(servo_bus.writes.lock().unwrap()[0], (65, vec![0x00, 0x10]));

    machine.quit().await;
}

#[tokio::test]
async fn test_multiplexer_ignores_display_without_hardware() {
    let (router, rx) = CommandRouter::new(4);
    let backend = RecordingBackend::default();
    let handle = tokio::spawn(
        Multiplexer::new(Box::new(backend.clone()), rx.display_rx, rx.sound_rx, rx.servo_rx, router.sound_sender()).run(),
    );

    router.set_display(DisplayTarget::Player(7), 10).await;
    router.quit().await;

    assert_eq!(handle.await.unwrap(), DisplayBuffer::new());
    assert!(backend.emitted().is_empty());
}
