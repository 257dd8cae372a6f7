use std::sync::Arc;

use parking_lot::Mutex;
use restpi::backend::{Direction, MockGpioBackend};
use restpi::{
    AppError, Broadcast, GpioBackend, Level, NewPin, NumberingMode, PinPatch, PinRegistry,
    PinState, STATE_UPDATE, StateUpdate,
};

#[derive(Default)]
struct Recorder {
    sent: Mutex<Vec<(String, StateUpdate)>>,
}

impl Recorder {
    fn take(&self) -> Vec<(String, StateUpdate)> {
        std::mem::take(&mut *self.sent.lock())
    }
}

impl Broadcast for Recorder {
    fn broadcast(&self, event: &str, payload: StateUpdate) {
        self.sent.lock().push((event.to_string(), payload));
    }
}

fn setup() -> (
    Arc<MockGpioBackend>,
    Arc<Recorder>,
    PinRegistry<MockGpioBackend>,
) {
    let backend = Arc::new(MockGpioBackend::with_mode(NumberingMode::Bcm));
    let recorder = Arc::new(Recorder::default());
    let registry = PinRegistry::new(backend.clone(), recorder.clone());
    (backend, recorder, registry)
}

fn relay(pin_num: u32, function: &str, state: PinState) -> NewPin {
    NewPin {
        pin_num,
        function: function.to_string(),
        state,
    }
}

fn sent(pin_num: u32, state: &str) -> (String, StateUpdate) {
    (
        STATE_UPDATE.to_string(),
        StateUpdate {
            pin_num,
            state: state.to_string(),
        },
    )
}

#[test]
fn create_assigns_id_and_drives_line() {
    let (backend, recorder, registry) = setup();

    let pin = registry
        .create(relay(5, "relay_1", PinState::High))
        .unwrap();

    assert_eq!(pin.id, 1);
    assert_eq!(pin.pin_num, 5);
    assert_eq!(pin.function, "relay_1");
    assert_eq!(pin.state, PinState::High);

    let line = backend.line(5).unwrap();
    assert_eq!(line.direction, Direction::Output);
    assert_eq!(line.level, Level::High);
    assert_eq!(recorder.take(), vec![sent(5, "high")]);
}

#[test]
fn create_low_writes_low() {
    let (backend, _, registry) = setup();
    backend.setup_output(6).unwrap();
    backend.write_line(6, Level::High).unwrap();

    registry.create(relay(6, "relay_2", PinState::Low)).unwrap();

    assert_eq!(backend.read_line(6).unwrap(), Level::Low);
}

#[test]
fn ids_are_unique_and_increasing() {
    let (_, _, registry) = setup();

    let mut last = 0;
    for line in [5, 6, 13, 16] {
        let pin = registry.create(relay(line, "relay", PinState::High)).unwrap();
        assert!(pin.id > last);
        last = pin.id;
    }

    registry.delete(4).unwrap();
    let pin = registry.create(relay(19, "relay", PinState::High)).unwrap();
    assert_eq!(pin.id, 5);

    let ids: Vec<u32> = registry.list_all().iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![1, 2, 3, 5]);
}

#[test]
fn update_merges_and_rewrites_level() {
    let (backend, recorder, registry) = setup();
    registry
        .create(relay(5, "relay_1", PinState::High))
        .unwrap();
    recorder.take();

    let pin = registry
        .update(
            1,
            PinPatch {
                state: Some(PinState::Low),
                ..Default::default()
            },
        )
        .unwrap();

    assert_eq!(pin.id, 1);
    assert_eq!(pin.pin_num, 5);
    assert_eq!(pin.function, "relay_1");
    assert_eq!(pin.state, PinState::Low);
    assert_eq!(backend.read_line(5).unwrap(), Level::Low);
    assert_eq!(recorder.take(), vec![sent(5, "low")]);
}

#[test]
fn update_can_move_pin_to_new_line() {
    let (backend, recorder, registry) = setup();
    registry.create(relay(5, "relay_1", PinState::High)).unwrap();
    recorder.take();

    let pin = registry
        .update(
            1,
            PinPatch {
                pin_num: Some(12),
                function: Some("fan".into()),
                ..Default::default()
            },
        )
        .unwrap();

    assert_eq!(pin.pin_num, 12);
    assert_eq!(pin.function, "fan");
    assert_eq!(pin.state, PinState::High);
    let line = backend.line(12).unwrap();
    assert_eq!(line.direction, Direction::Output);
    assert_eq!(line.level, Level::High);
    assert_eq!(recorder.take(), vec![sent(12, "high")]);
}

#[test]
fn delete_forces_line_low() {
    let (backend, recorder, registry) = setup();
    registry.create(relay(5, "relay_1", PinState::High)).unwrap();
    recorder.take();

    registry.delete(1).unwrap();

    assert_eq!(backend.read_line(5).unwrap(), Level::Low);
    assert!(registry.list_all().is_empty());
    assert_eq!(recorder.take(), vec![sent(5, "deleted")]);
    assert!(matches!(registry.get_by_id(1), Err(AppError::NotFoundPin(1))));
}

#[test]
fn get_by_id_reads_through_and_stores() {
    let (backend, recorder, registry) = setup();
    registry.create(relay(5, "relay_1", PinState::High)).unwrap();
    recorder.take();

    backend.set_external_level(5, Level::Low).unwrap();

    // listing reports the last written state until the pin is fetched
    assert_eq!(registry.list_all()[0].state, PinState::High);

    let pin = registry.get_by_id(1).unwrap();
    assert_eq!(pin.state, PinState::Low);
    assert_eq!(registry.list_all()[0].state, PinState::Low);

    let again = registry.get_by_id(1).unwrap();
    assert_eq!(again, pin);
    assert!(recorder.take().is_empty());
}

#[test]
fn missing_id_fails_without_side_effects() {
    let (backend, recorder, registry) = setup();
    registry.create(relay(5, "relay_1", PinState::High)).unwrap();
    recorder.take();
    let before = registry.list_all();

    assert!(matches!(
        registry.get_by_id(999),
        Err(AppError::NotFoundPin(999))
    ));
    assert!(matches!(
        registry.update(999, PinPatch::default()),
        Err(AppError::NotFoundPin(999))
    ));
    assert!(matches!(
        registry.delete(999),
        Err(AppError::NotFoundPin(999))
    ));

    assert_eq!(registry.list_all(), before);
    assert_eq!(backend.read_line(5).unwrap(), Level::High);
    assert!(recorder.take().is_empty());
}

#[test]
fn get_on_empty_registry_is_not_found() {
    let (_, _, registry) = setup();
    assert!(matches!(
        registry.get_by_id(999),
        Err(AppError::NotFoundPin(999))
    ));
}

#[test]
fn unrecognized_state_skips_write_but_still_broadcasts() {
    let (backend, recorder, registry) = setup();

    let pin = registry
        .create(relay(5, "relay_1", PinState::from("on".to_string())))
        .unwrap();

    assert_eq!(pin.state, PinState::Unrecognized("on".into()));
    let line = backend.line(5).unwrap();
    assert_eq!(line.direction, Direction::Output);
    assert_eq!(line.level, Level::Low);
    assert_eq!(recorder.take(), vec![sent(5, "on")]);

    // a fetch replaces the unrecognized value with the measured level
    assert_eq!(registry.get_by_id(1).unwrap().state, PinState::Low);
}

#[test]
fn driver_failure_on_create_leaves_registry_untouched() {
    let (_, recorder, registry) = setup();

    let err = registry
        .create(relay(99, "bogus", PinState::High))
        .unwrap_err();
    assert!(matches!(err, AppError::Gpio(_)));
    assert!(registry.list_all().is_empty());
    assert!(recorder.take().is_empty());

    let pin = registry.create(relay(5, "relay_1", PinState::High)).unwrap();
    assert_eq!(pin.id, 1);
}

#[test]
fn driver_failure_on_update_keeps_previous_record() {
    let (_, recorder, registry) = setup();
    registry.create(relay(5, "relay_1", PinState::High)).unwrap();
    recorder.take();

    let err = registry
        .update(
            1,
            PinPatch {
                pin_num: Some(99),
                ..Default::default()
            },
        )
        .unwrap_err();

    assert!(matches!(err, AppError::Gpio(_)));
    assert_eq!(registry.list_all()[0].pin_num, 5);
    assert!(recorder.take().is_empty());
}

#[test]
fn seed_creates_pins_in_order() {
    let (backend, recorder, registry) = setup();

    registry.seed(&restpi::config::default_relay_fleet()).unwrap();

    let pins = registry.list_all();
    assert_eq!(pins.len(), 8);
    assert_eq!(
        pins.iter().map(|p| p.id).collect::<Vec<_>>(),
        (1..=8).collect::<Vec<_>>()
    );
    assert_eq!(pins[2].pin_num, 13);
    assert_eq!(pins[2].function, "relay_3");
    for pin in &pins {
        assert_eq!(backend.read_line(pin.pin_num).unwrap(), Level::High);
    }
    assert_eq!(recorder.take().len(), 8);
}

#[test]
fn update_without_state_change_keeps_line_level() {
    let (backend, recorder, registry) = setup();
    registry.create(relay(5, "relay_1", PinState::High)).unwrap();
    recorder.take();

    let pin = registry
        .update(
            1,
            PinPatch {
                function: Some("heater".into()),
                ..Default::default()
            },
        )
        .unwrap();

    assert_eq!(pin.state, PinState::High);
    assert_eq!(backend.read_line(5).unwrap(), Level::High);
    assert_eq!(recorder.take(), vec![sent(5, "high")]);
}

#[test]
fn update_with_unrecognized_state_leaves_level_alone() {
    let (backend, recorder, registry) = setup();
    registry.create(relay(5, "relay_1", PinState::High)).unwrap();
    recorder.take();

    let pin = registry
        .update(
            1,
            PinPatch {
                state: Some(PinState::from("toggle".to_string())),
                ..Default::default()
            },
        )
        .unwrap();

    assert_eq!(pin.state, PinState::Unrecognized("toggle".into()));
    assert_eq!(backend.read_line(5).unwrap(), Level::High);
    assert_eq!(recorder.take(), vec![sent(5, "toggle")]);
}
