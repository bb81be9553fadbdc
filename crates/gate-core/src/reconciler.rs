//! Applying decoded messages to the gate state.
//!
//! The [`Reconciler`] is the only writer of [`GateState`]. Each message is
//! applied to a working copy which is committed in one step, so observers see
//! either the state before a message or the state after it, never a mix.
//!
//! Timer expiry does not mutate the state directly: it feeds a synthetic close
//! report through [`Reconciler::apply`], the same path a hardware close takes.

use chrono::{DateTime, Utc};
use gate_protocol::{DecodedMessage, Direction, MalformedField, StatusFields, Trigger};
use serde::Deserialize;
use tracing::{debug, trace, warn};

use crate::error::CoreResult;
use crate::event_log::BoundedLog;
use crate::state::{AnimalEvent, GateState, DEFAULT_BATTERY_LEVEL, DEFAULT_LOG_CAPACITY};
use crate::timer::{AutoCloseTimer, TickOutcome, DEFAULT_TIMEOUT_SECS};

/// Something that happened as a result of reconciling a message or a tick.
#[derive(Debug, Clone, PartialEq)]
pub enum GateEvent {
    /// The gate state changed.
    StateChanged {
        previous: GateState,
        current: GateState,
    },
    /// An animal event was appended to the log.
    AnimalRecorded(AnimalEvent),
    /// The auto-close countdown expired and the gate was closed.
    AutoClosed,
    /// A status token was skipped. State was not affected by it.
    MalformedField(MalformedField),
    /// A line that is neither a status report nor an event.
    Unrecognized(String),
}

/// Reconciler settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    pub timeout_secs: u32,
    pub event_log_capacity: usize,
    pub initial_battery: f32,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        ReconcilerConfig {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            event_log_capacity: DEFAULT_LOG_CAPACITY,
            initial_battery: DEFAULT_BATTERY_LEVEL,
        }
    }
}

/// Owner of the gate state, the animal event log and the auto-close timer.
#[derive(Debug, Clone)]
pub struct Reconciler {
    state: GateState,
    events: BoundedLog<AnimalEvent>,
    timer: AutoCloseTimer,
    next_event_id: u64,
}

impl Reconciler {
    /// Create a reconciler for a closed gate.
    pub fn new(config: &ReconcilerConfig) -> CoreResult<Self> {
        Ok(Reconciler {
            state: GateState::with_battery(config.initial_battery),
            events: BoundedLog::new(config.event_log_capacity),
            timer: AutoCloseTimer::new(config.timeout_secs)?,
            next_event_id: 1,
        })
    }

    /// Get the current gate state.
    pub fn state(&self) -> &GateState {
        &self.state
    }

    /// Get the animal event log, oldest first.
    pub fn events(&self) -> &BoundedLog<AnimalEvent> {
        &self.events
    }

    pub fn timer(&self) -> &AutoCloseTimer {
        &self.timer
    }

    pub fn timeout_secs(&self) -> u32 {
        self.timer.timeout_secs()
    }

    /// Change the auto-close timeout used for the next opening.
    pub fn set_timeout(&mut self, timeout_secs: u32) -> CoreResult<()> {
        self.timer.set_timeout(timeout_secs)?;
        debug!("auto-close timeout set to {}s", timeout_secs);
        Ok(())
    }

    /// Apply one decoded message.
    pub fn apply(&mut self, msg: &DecodedMessage, now: DateTime<Utc>) -> Vec<GateEvent> {
        match msg {
            DecodedMessage::StatusUpdate(fields) => self.apply_status(fields, now),
            DecodedMessage::AnimalEvent { direction, trigger } => {
                vec![self.record_animal(*direction, *trigger, now)]
            }
            DecodedMessage::Unrecognized(line) => {
                debug!("unrecognized line: {:?}", line);
                vec![GateEvent::Unrecognized(line.clone())]
            }
        }
    }

    /// Advance the auto-close timer by one second.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<GateEvent> {
        match self.timer.tick() {
            TickOutcome::Idle => Vec::new(),
            TickOutcome::Remaining(remaining) => {
                let previous = self.state.clone();
                self.state.time_remaining = remaining;
                vec![GateEvent::StateChanged {
                    previous,
                    current: self.state.clone(),
                }]
            }
            TickOutcome::Expired => {
                debug!("auto-close timer expired, closing gate");
                let close = DecodedMessage::StatusUpdate(StatusFields::auto_close());
                let mut events = self.apply(&close, now);
                events.push(GateEvent::AutoClosed);
                events
            }
        }
    }

    fn apply_status(&mut self, fields: &StatusFields, now: DateTime<Utc>) -> Vec<GateEvent> {
        let mut events: Vec<GateEvent> = fields
            .malformed
            .iter()
            .map(|field| {
                warn!("skipped status field: {}", field);
                GateEvent::MalformedField(field.clone())
            })
            .collect();

        let previous = self.state.clone();
        let mut next = reconcile_status(&previous, fields, now);

        if !previous.is_open && next.is_open {
            self.timer.start();
            match fields.time_remaining {
                Some(reported) => self.timer.sync(reported),
                None => next.time_remaining = self.timer.remaining(),
            }
            debug!("gate opened, auto-close in {}s", self.timer.remaining());
        } else if next.is_open {
            match fields.time_remaining {
                Some(reported) => self.timer.sync(reported),
                None if fields.gate_open == Some(true) => {
                    // Opened again before the countdown ran out
                    self.timer.start();
                    next.time_remaining = self.timer.remaining();
                    debug!("gate re-opened, auto-close reset to {}s", self.timer.remaining());
                }
                None => {}
            }
        } else if self.timer.cancel() {
            debug!("gate closed, auto-close countdown cancelled");
        }

        if next != previous {
            trace!("gate state {:?} -> {:?}", previous, next);
            self.state = next.clone();
            events.push(GateEvent::StateChanged {
                previous,
                current: next,
            });
        }

        events
    }

    fn record_animal(
        &mut self,
        direction: Direction,
        trigger: Trigger,
        now: DateTime<Utc>,
    ) -> GateEvent {
        let event = AnimalEvent {
            id: self.next_event_id,
            timestamp: now,
            direction,
            sensor_triggered: trigger,
        };
        self.next_event_id += 1;

        if let Some(evicted) = self.events.push(event.clone()) {
            trace!("event log full, evicted event #{}", evicted.id);
        }
        debug!(
            "animal event #{}: {} via {}",
            event.id,
            direction.as_str(),
            trigger.as_str()
        );

        GateEvent::AnimalRecorded(event)
    }
}

/// Compute the state that results from applying a status report.
///
/// Present fields overwrite, absent fields are kept. The closed → open edge is
/// detected against `current` as it was before any field was applied, and
/// stamps `last_opened` with `now`. A closed gate always reports zero time
/// remaining.
pub fn reconcile_status(
    current: &GateState,
    fields: &StatusFields,
    now: DateTime<Utc>,
) -> GateState {
    let was_open = current.is_open;
    let mut next = current.clone();

    if let Some(open) = fields.gate_open {
        next.is_open = open;
    }
    if let Some(ir) = fields.ir_sensor {
        next.ir_sensor_state = ir;
    }
    if let Some(animal) = fields.animal_detected {
        next.animal_detected = animal;
    }
    if let Some(level) = fields.battery {
        next.battery_level = level.clamp(0.0, 100.0);
    }
    if let Some(secs) = fields.time_remaining {
        next.time_remaining = secs;
    }

    if !was_open && next.is_open {
        next.last_opened = Some(now);
    }
    if !next.is_open {
        next.time_remaining = 0;
    }

    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::TimerState;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 6, 0, 0).unwrap()
    }

    fn reconciler() -> Reconciler {
        Reconciler::new(&ReconcilerConfig::default()).unwrap()
    }

    fn apply_line(r: &mut Reconciler, line: &str, now: DateTime<Utc>) -> Vec<GateEvent> {
        r.apply(&DecodedMessage::parse(line), now)
    }

    #[test]
    fn test_full_status_from_closed() {
        let mut r = reconciler();
        let events = apply_line(&mut r, "STATUS:GATE:OPEN,IR:1,ANIMAL:1,BAT:85,TIME:8", t0());

        let state = r.state();
        assert!(state.is_open);
        assert!(state.ir_sensor_state);
        assert!(state.animal_detected);
        assert_eq!(state.battery_level, 85.0);
        assert_eq!(state.time_remaining, 8);
        assert_eq!(state.last_opened, Some(t0()));
        assert_eq!(r.timer().state(), TimerState::CountingDown { remaining: 8 });
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], GateEvent::StateChanged { .. }));
    }

    #[test]
    fn test_open_without_time_starts_full_countdown() {
        let mut r = reconciler();
        apply_line(&mut r, "STATUS:GATE:OPEN", t0());
        assert_eq!(r.timer().state(), TimerState::CountingDown { remaining: 10 });
        assert_eq!(r.state().time_remaining, 10);
    }

    #[test]
    fn test_reopen_while_open_resets_countdown() {
        let mut r = reconciler();
        apply_line(&mut r, "STATUS:GATE:OPEN", t0());
        r.tick(t0() + Duration::seconds(1));
        r.tick(t0() + Duration::seconds(2));
        assert_eq!(r.timer().remaining(), 8);

        let events = apply_line(&mut r, "STATUS:GATE:OPEN,IR:0", t0() + Duration::seconds(3));
        assert_eq!(r.state().last_opened, Some(t0()));
        assert_eq!(r.timer().remaining(), 10);
        assert_eq!(r.state().time_remaining, 10);
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_reopen_with_reported_time_follows_device() {
        let mut r = reconciler();
        apply_line(&mut r, "STATUS:GATE:OPEN", t0());
        r.tick(t0() + Duration::seconds(1));

        apply_line(&mut r, "STATUS:GATE:OPEN,TIME:6", t0() + Duration::seconds(2));
        assert_eq!(r.timer().remaining(), 6);
        assert_eq!(r.state().time_remaining, 6);
    }

    #[test]
    fn test_status_without_gate_field_keeps_countdown() {
        let mut r = reconciler();
        apply_line(&mut r, "STATUS:GATE:OPEN", t0());
        r.tick(t0() + Duration::seconds(1));

        apply_line(&mut r, "STATUS:BAT:70", t0() + Duration::seconds(2));
        assert_eq!(r.timer().remaining(), 9);
    }

    #[test]
    fn test_status_without_gate_field_leaves_gate_alone() {
        let mut r = reconciler();
        apply_line(&mut r, "STATUS:IR:1,BAT:60,TIME:5", t0());

        assert!(!r.state().is_open);
        assert_eq!(r.state().last_opened, None);
        assert_eq!(r.state().time_remaining, 0);
        assert_eq!(r.timer().state(), TimerState::Idle);
        assert!(r.state().ir_sensor_state);
        assert_eq!(r.state().battery_level, 60.0);
    }

    #[test]
    fn test_malformed_battery_is_skipped_and_reported() {
        let mut r = reconciler();
        let events = apply_line(&mut r, "STATUS:GATE:OPEN,BAT:abc", t0());

        assert!(r.state().is_open);
        assert_eq!(r.state().battery_level, DEFAULT_BATTERY_LEVEL);
        assert!(matches!(&events[0], GateEvent::MalformedField(f) if f.token == "BAT:abc"));
    }

    #[test]
    fn test_event_appends_without_touching_gate() {
        let mut r = reconciler();
        let events = apply_line(&mut r, "EVENT:IN,IR", t0());

        assert!(!r.state().is_open);
        assert_eq!(r.events().len(), 1);
        let recorded = r.events().latest().unwrap();
        assert_eq!(recorded.direction, Direction::In);
        assert_eq!(recorded.sensor_triggered, Trigger::Ir);
        assert_eq!(recorded.timestamp, t0());
        assert_eq!(events, vec![GateEvent::AnimalRecorded(recorded.clone())]);
    }

    #[test]
    fn test_event_ids_are_monotonic_and_log_is_bounded() {
        let mut r = reconciler();
        for i in 0..60 {
            apply_line(&mut r, "EVENT:OUT,MANUAL", t0() + Duration::seconds(i));
        }
        assert_eq!(r.events().len(), 50);
        let ids: Vec<u64> = r.events().iter().map(|e| e.id).collect();
        assert_eq!(ids.first(), Some(&11));
        assert_eq!(ids.last(), Some(&60));
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_unrecognized_changes_nothing() {
        let mut r = reconciler();
        let before = r.state().clone();
        let events = apply_line(&mut r, "hello", t0());
        assert_eq!(r.state(), &before);
        assert_eq!(events, vec![GateEvent::Unrecognized("hello".to_string())]);
    }

    #[test]
    fn test_timer_expiry_closes_gate() {
        let mut r = Reconciler::new(&ReconcilerConfig {
            timeout_secs: 3,
            ..Default::default()
        })
        .unwrap();
        apply_line(&mut r, "STATUS:GATE:OPEN,IR:1,ANIMAL:1", t0());

        r.tick(t0() + Duration::seconds(1));
        assert_eq!(r.state().time_remaining, 2);
        r.tick(t0() + Duration::seconds(2));
        let events = r.tick(t0() + Duration::seconds(3));

        let state = r.state();
        assert!(!state.is_open);
        assert_eq!(state.time_remaining, 0);
        assert!(!state.ir_sensor_state);
        assert!(!state.animal_detected);
        assert_eq!(state.last_opened, Some(t0()));
        assert_eq!(r.timer().state(), TimerState::Idle);
        assert_eq!(events.last(), Some(&GateEvent::AutoClosed));
    }

    #[test]
    fn test_hardware_close_cancels_countdown() {
        let mut r = reconciler();
        apply_line(&mut r, "STATUS:GATE:OPEN", t0());
        apply_line(&mut r, "STATUS:GATE:CLOSED,TIME:7", t0());

        assert!(!r.state().is_open);
        assert_eq!(r.state().time_remaining, 0);
        assert_eq!(r.timer().state(), TimerState::Idle);
        assert!(r.tick(t0()).is_empty());
    }

    #[test]
    fn test_reported_time_resyncs_countdown() {
        let mut r = reconciler();
        apply_line(&mut r, "STATUS:GATE:OPEN", t0());
        apply_line(&mut r, "STATUS:TIME:4", t0());
        assert_eq!(r.timer().remaining(), 4);
        assert_eq!(r.state().time_remaining, 4);
    }

    #[test]
    fn test_reopen_after_close_restamps_last_opened() {
        let mut r = reconciler();
        let later = t0() + Duration::minutes(5);
        apply_line(&mut r, "STATUS:GATE:OPEN", t0());
        apply_line(&mut r, "STATUS:GATE:CLOSED", t0());
        apply_line(&mut r, "STATUS:GATE:OPEN", later);
        assert_eq!(r.state().last_opened, Some(later));
    }

    #[test]
    fn test_identical_status_emits_no_state_change() {
        let mut r = reconciler();
        let events = apply_line(&mut r, "STATUS:GATE:CLOSED,IR:0", t0());
        assert!(events.is_empty());
    }

    #[test]
    fn test_reconcile_status_is_pure() {
        let current = GateState::default();
        let fields = StatusFields {
            gate_open: Some(true),
            ..Default::default()
        };
        let next = reconcile_status(&current, &fields, t0());
        assert!(next.is_open);
        assert_eq!(next.last_opened, Some(t0()));
        assert!(!current.is_open);
    }
}
