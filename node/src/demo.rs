use std::sync::{Arc, Mutex, PoisonError};

use akira_common::Field;
use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq)]
pub struct DemoState {
    pub led_on: bool,
    pub brightness: u8,
    pub temperature_c: f32,
    pub update_in_progress: bool,
}

impl Default for DemoState {
    fn default() -> Self {
        Self {
            led_on: false,
            brightness: 0,
            temperature_c: 21.0,
            update_in_progress: false,
        }
    }
}

pub type SharedDemo = Arc<Mutex<DemoState>>;

pub fn shared_demo() -> SharedDemo {
    Arc::new(Mutex::new(DemoState::default()))
}

fn with_state<R>(state: &SharedDemo, f: impl FnOnce(&mut DemoState) -> R) -> R {
    let mut guard = state.lock().unwrap_or_else(PoisonError::into_inner);
    f(&mut guard)
}

/// Fields exposed by the demo node: an on/off LED, a dimmer and a read-only
/// temperature sensor.
pub fn demo_fields(state: &SharedDemo) -> Vec<Field> {
    let led_read = state.clone();
    let led_write = state.clone();
    let dimmer_read = state.clone();
    let dimmer_write = state.clone();
    let sensor_read = state.clone();

    vec![
        Field::from_fns(
            "led1",
            "switch",
            move |out| {
                let on = with_state(&led_read, |s| s.led_on);
                out.insert("on".into(), json!(on));
            },
            move |value| match parse_switch(value) {
                Some(on) => {
                    with_state(&led_write, |s| s.led_on = on);
                    true
                }
                None => false,
            },
        ),
        Field::from_fns(
            "dimmer1",
            "level",
            move |out| {
                let level = with_state(&dimmer_read, |s| s.brightness);
                out.insert("level".into(), json!(level));
            },
            move |value| match parse_level(value) {
                Some(level) => {
                    with_state(&dimmer_write, |s| s.brightness = level);
                    true
                }
                None => false,
            },
        ),
        Field::from_fns(
            "temp1",
            "sensor",
            move |out| {
                let celsius = with_state(&sensor_read, |s| s.temperature_c);
                out.insert("celsius".into(), json!(celsius));
            },
            |_| false,
        ),
    ]
}

/// Pre/post hooks bracketing each state update.
pub fn demo_hooks(
    state: &SharedDemo,
) -> (
    impl FnMut() + Send + 'static,
    impl FnMut() + Send + 'static,
) {
    let pre_state = state.clone();
    let post_state = state.clone();
    (
        move || with_state(&pre_state, |s| s.update_in_progress = true),
        move || with_state(&post_state, |s| s.update_in_progress = false),
    )
}

/// Simulated sensor drift. Readings are held back while a state update is
/// being applied.
pub fn simulate_reading(state: &SharedDemo, tick: u64) {
    let celsius = 20.0 + ((tick % 8) as f32 * 0.2);
    with_state(state, |s| {
        if !s.update_in_progress {
            s.temperature_c = celsius;
        }
    });
}

fn parse_switch(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(on) => Some(*on),
        Value::Object(map) => map.get("on").and_then(Value::as_bool),
        _ => None,
    }
}

fn parse_level(value: &Value) -> Option<u8> {
    let raw = match value {
        Value::Object(map) => map.get("level")?,
        other => other,
    };
    raw.as_u64()
        .filter(|level| *level <= 100)
        .and_then(|level| u8::try_from(level).ok())
}
