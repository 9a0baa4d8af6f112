//! Hygrostat humidifier controller
//!
//! Drives humidify/dehumidify outputs from a humidity sensor. The controller
//! never touches hardware itself: it fires action triggers (`humidify`,
//! `dehumidify`, `idle`) and mode triggers, and automations bound to them
//! switch the actual devices.
//!
//! Switching is hysteretic. Dehumidifying starts above `target + deadband`
//! and stops below `target - overrun`; humidifying mirrors that around the
//! low target. Minimum run, off and idle timers keep outputs from cycling
//! too quickly, and the controller always passes through idle between
//! humidifying and dehumidifying.

use bytemuck::{Pod, Zeroable};
use esph_automation::Trigger;
use esph_core::entity::Sensor;
use esph_core::helpers::object_id;
use esph_core::{CallbackManager, Component, ComponentId, Scheduler};
use esph_preferences::{preference_key, PreferenceObject, Preferences, PreferencesExt};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use tracing::{debug, info, trace};

/// Changing this invalidates previously stored state
const RESTORE_STATE_VERSION: u32 = 0x848E_A6AD;

/// Shortest configurable timer
const MIN_TIMER_DURATION_SECS: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HumidifierMode {
    Off = 0,
    HumidifyDehumidify = 1,
    Dehumidify = 2,
    Humidify = 3,
    Auto = 4,
}

impl HumidifierMode {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Off),
            1 => Some(Self::HumidifyDehumidify),
            2 => Some(Self::Dehumidify),
            3 => Some(Self::Humidify),
            4 => Some(Self::Auto),
            _ => None,
        }
    }
}

impl fmt::Display for HumidifierMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Off => "OFF",
            Self::HumidifyDehumidify => "HUMIDIFY_DEHUMIDIFY",
            Self::Dehumidify => "DEHUMIDIFY",
            Self::Humidify => "HUMIDIFY",
            Self::Auto => "AUTO",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HumidifierAction {
    /// Disabled by the user
    Off,
    /// Humidity is within the target range
    Idle,
    Humidifying,
    Dehumidifying,
}

impl fmt::Display for HumidifierAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Off => "OFF",
            Self::Idle => "IDLE",
            Self::Humidifying => "HUMIDIFYING",
            Self::Dehumidifying => "DEHUMIDIFYING",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HumidifierPreset {
    Home = 0,
    Away = 1,
}

/// Default targets for one preset
///
/// Single-point controllers use `humidity`, two-point controllers use
/// `low` and `high`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetHumidity {
    pub humidity: f32,
    pub low: f32,
    pub high: f32,
}

impl TargetHumidity {
    pub fn single(humidity: f32) -> Self {
        Self {
            humidity,
            low: f32::NAN,
            high: f32::NAN,
        }
    }

    pub fn range(low: f32, high: f32) -> Self {
        Self {
            humidity: f32::NAN,
            low,
            high,
        }
    }
}

impl Default for TargetHumidity {
    fn default() -> Self {
        Self {
            humidity: f32::NAN,
            low: f32::NAN,
            high: f32::NAN,
        }
    }
}

/// Static controller configuration
///
/// Timer durations are in seconds and are raised to at least one second;
/// `None` disables the timer.
#[derive(Debug, Clone)]
pub struct HygrostatConfig {
    pub default_mode: HumidifierMode,
    pub supports_auto: bool,
    pub supports_humidify_dehumidify: bool,
    pub supports_dehumidify: bool,
    pub supports_humidify: bool,
    pub supports_two_points: bool,
    pub set_point_minimum_differential: f32,
    pub dehumidify_deadband: f32,
    pub dehumidify_overrun: f32,
    pub humidify_deadband: f32,
    pub humidify_overrun: f32,
    pub dehumidifying_maximum_run_time: Option<u32>,
    pub dehumidifying_minimum_off_time: Option<u32>,
    pub dehumidifying_minimum_run_time: Option<u32>,
    pub humidifying_maximum_run_time: Option<u32>,
    pub humidifying_minimum_off_time: Option<u32>,
    pub humidifying_minimum_run_time: Option<u32>,
    pub idle_minimum_time: Option<u32>,
    /// Start the off timers at boot so nothing switches on right away
    pub use_startup_delay: bool,
    pub visual_min_humidity: f32,
    pub visual_max_humidity: f32,
    pub normal: TargetHumidity,
    /// Enables the away preset
    pub away: Option<TargetHumidity>,
}

impl Default for HygrostatConfig {
    fn default() -> Self {
        Self {
            default_mode: HumidifierMode::Off,
            supports_auto: false,
            supports_humidify_dehumidify: false,
            supports_dehumidify: false,
            supports_humidify: false,
            supports_two_points: false,
            set_point_minimum_differential: 0.0,
            dehumidify_deadband: 0.0,
            dehumidify_overrun: 0.0,
            humidify_deadband: 0.0,
            humidify_overrun: 0.0,
            dehumidifying_maximum_run_time: None,
            dehumidifying_minimum_off_time: None,
            dehumidifying_minimum_run_time: None,
            humidifying_maximum_run_time: None,
            humidifying_minimum_off_time: None,
            humidifying_minimum_run_time: None,
            idle_minimum_time: None,
            use_startup_delay: false,
            visual_min_humidity: 0.0,
            visual_max_humidity: 100.0,
            normal: TargetHumidity::default(),
            away: None,
        }
    }
}

/// A requested change of mode, preset or targets
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HumidifierCall {
    pub mode: Option<HumidifierMode>,
    pub preset: Option<HumidifierPreset>,
    pub target_humidity: Option<f32>,
    pub target_humidity_low: Option<f32>,
    pub target_humidity_high: Option<f32>,
}

/// Persisted controller state
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
struct RestoreState {
    mode: u8,
    preset: u8,
    reserved: [u8; 2],
    target_humidity: f32,
    target_humidity_low: f32,
    target_humidity_high: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Timer {
    DehumidifyingMaxRunTime,
    DehumidifyingOff,
    DehumidifyingOn,
    HumidifyingMaxRunTime,
    HumidifyingOff,
    HumidifyingOn,
    IdleOn,
}

impl Timer {
    const ALL: [Timer; 7] = [
        Timer::DehumidifyingMaxRunTime,
        Timer::DehumidifyingOff,
        Timer::DehumidifyingOn,
        Timer::HumidifyingMaxRunTime,
        Timer::HumidifyingOff,
        Timer::HumidifyingOn,
        Timer::IdleOn,
    ];

    fn name(self) -> &'static str {
        match self {
            Timer::DehumidifyingMaxRunTime => "dehumidify_run",
            Timer::DehumidifyingOff => "dehumidify_off",
            Timer::DehumidifyingOn => "dehumidify_on",
            Timer::HumidifyingMaxRunTime => "humidify_run",
            Timer::HumidifyingOff => "humidify_off",
            Timer::HumidifyingOn => "humidify_on",
            Timer::IdleOn => "idle_on",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

fn timer_ms(seconds: Option<u32>) -> u32 {
    seconds.map_or(0, |s| 1000 * s.max(MIN_TIMER_DURATION_SECS))
}

/// Hysteresis humidity controller
pub struct HygrostatHumidifier {
    id: ComponentId,
    this: Weak<Self>,
    name: String,
    object_id: String,
    config: HygrostatConfig,
    sensor: Rc<Sensor>,
    scheduler: Scheduler,
    preferences: Rc<dyn Preferences>,
    rtc: RefCell<PreferenceObject>,

    mode: Cell<HumidifierMode>,
    action: Cell<HumidifierAction>,
    preset: Cell<HumidifierPreset>,
    current_humidity: Cell<f32>,
    target_humidity: Cell<f32>,
    target_humidity_low: Cell<f32>,
    target_humidity_high: Cell<f32>,

    prev_mode: Cell<HumidifierMode>,
    prev_action_trigger: Cell<Option<HumidifierAction>>,
    prev_mode_trigger: Cell<Option<HumidifierMode>>,
    prev_target_humidity: Cell<f32>,
    prev_target_humidity_low: Cell<f32>,
    prev_target_humidity_high: Cell<f32>,
    dehumidifying_max_runtime_exceeded: Cell<bool>,
    humidifying_max_runtime_exceeded: Cell<bool>,
    setup_complete: Cell<bool>,

    timer_durations: [u32; 7],
    timer_active: [Cell<bool>; 7],

    dehumidify_action_trigger: Trigger<()>,
    humidify_action_trigger: Trigger<()>,
    idle_action_trigger: Trigger<()>,
    auto_mode_trigger: Trigger<()>,
    dehumidify_mode_trigger: Trigger<()>,
    humidify_mode_trigger: Trigger<()>,
    off_mode_trigger: Trigger<()>,
    humidity_change_trigger: Trigger<()>,
    state_callback: CallbackManager<()>,
}

impl HygrostatHumidifier {
    pub fn new(
        name: impl Into<String>,
        config: HygrostatConfig,
        sensor: Rc<Sensor>,
        scheduler: &Scheduler,
        preferences: Rc<dyn Preferences>,
    ) -> Rc<Self> {
        let name = name.into();
        let timer_durations = [
            timer_ms(config.dehumidifying_maximum_run_time),
            timer_ms(config.dehumidifying_minimum_off_time),
            timer_ms(config.dehumidifying_minimum_run_time),
            timer_ms(config.humidifying_maximum_run_time),
            timer_ms(config.humidifying_minimum_off_time),
            timer_ms(config.humidifying_minimum_run_time),
            timer_ms(config.idle_minimum_time),
        ];
        Rc::new_cyclic(|this| Self {
            id: ComponentId::next(),
            this: this.clone(),
            object_id: object_id(&name),
            name,
            sensor,
            scheduler: scheduler.clone(),
            preferences,
            rtc: RefCell::new(PreferenceObject::invalid()),
            mode: Cell::new(HumidifierMode::Off),
            action: Cell::new(HumidifierAction::Off),
            preset: Cell::new(HumidifierPreset::Home),
            current_humidity: Cell::new(f32::NAN),
            target_humidity: Cell::new(f32::NAN),
            target_humidity_low: Cell::new(f32::NAN),
            target_humidity_high: Cell::new(f32::NAN),
            prev_mode: Cell::new(HumidifierMode::Off),
            prev_action_trigger: Cell::new(None),
            prev_mode_trigger: Cell::new(None),
            prev_target_humidity: Cell::new(f32::NAN),
            prev_target_humidity_low: Cell::new(f32::NAN),
            prev_target_humidity_high: Cell::new(f32::NAN),
            dehumidifying_max_runtime_exceeded: Cell::new(false),
            humidifying_max_runtime_exceeded: Cell::new(false),
            setup_complete: Cell::new(false),
            timer_durations,
            timer_active: Default::default(),
            dehumidify_action_trigger: Trigger::new(),
            humidify_action_trigger: Trigger::new(),
            idle_action_trigger: Trigger::new(),
            auto_mode_trigger: Trigger::new(),
            dehumidify_mode_trigger: Trigger::new(),
            humidify_mode_trigger: Trigger::new(),
            off_mode_trigger: Trigger::new(),
            humidity_change_trigger: Trigger::new(),
            state_callback: CallbackManager::new(),
            config,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> HumidifierMode {
        self.mode.get()
    }

    pub fn action(&self) -> HumidifierAction {
        self.action.get()
    }

    pub fn preset(&self) -> HumidifierPreset {
        self.preset.get()
    }

    pub fn current_humidity(&self) -> f32 {
        self.current_humidity.get()
    }

    pub fn target_humidity(&self) -> f32 {
        self.target_humidity.get()
    }

    pub fn target_humidity_low(&self) -> f32 {
        self.target_humidity_low.get()
    }

    pub fn target_humidity_high(&self) -> f32 {
        self.target_humidity_high.get()
    }

    pub fn dehumidify_action_trigger(&self) -> &Trigger<()> {
        &self.dehumidify_action_trigger
    }

    pub fn humidify_action_trigger(&self) -> &Trigger<()> {
        &self.humidify_action_trigger
    }

    pub fn idle_action_trigger(&self) -> &Trigger<()> {
        &self.idle_action_trigger
    }

    pub fn auto_mode_trigger(&self) -> &Trigger<()> {
        &self.auto_mode_trigger
    }

    pub fn dehumidify_mode_trigger(&self) -> &Trigger<()> {
        &self.dehumidify_mode_trigger
    }

    pub fn humidify_mode_trigger(&self) -> &Trigger<()> {
        &self.humidify_mode_trigger
    }

    pub fn off_mode_trigger(&self) -> &Trigger<()> {
        &self.off_mode_trigger
    }

    pub fn humidity_change_trigger(&self) -> &Trigger<()> {
        &self.humidity_change_trigger
    }

    /// Called after every published state change
    pub fn add_on_state_callback(&self, callback: impl Fn(()) + 'static) {
        self.state_callback.add(callback);
    }

    /// Apply a mode, preset or target change and act on it
    pub fn control(&self, call: HumidifierCall) {
        if let Some(preset) = call.preset {
            // restored presets keep the restored targets
            if self.setup_complete.get() {
                self.change_away(preset == HumidifierPreset::Away);
            } else {
                self.preset.set(preset);
            }
        }
        if let Some(mode) = call.mode {
            self.mode.set(mode);
        }
        if self.config.supports_two_points {
            if let Some(low) = call.target_humidity_low {
                self.target_humidity_low.set(low);
                self.validate_target_humidity_low();
            }
            if let Some(high) = call.target_humidity_high {
                self.target_humidity_high.set(high);
                self.validate_target_humidity_high();
            }
        } else if let Some(target) = call.target_humidity {
            self.target_humidity.set(target);
            self.validate_target_humidity();
        }
        self.refresh();
    }

    /// Fire mode, action and target triggers for the current settings
    pub fn refresh(&self) {
        self.switch_to_mode(self.mode.get(), false);
        self.switch_to_action(self.compute_action(false), false);
        self.check_humidity_change_trigger();
        self.publish_state();
    }

    /// Whether a timer is holding back a pending action change
    pub fn action_change_delayed(&self) -> bool {
        let target = self.compute_action(true);
        let mismatch = self.action.get() != target;
        let ready = match target {
            HumidifierAction::Off | HumidifierAction::Idle => self.idle_action_ready(),
            HumidifierAction::Dehumidifying => self.dehumidifying_action_ready(),
            HumidifierAction::Humidifying => self.humidifying_action_ready(),
        };
        mismatch && !ready
    }

    /// The action the controller would switch to without timers
    pub fn delayed_action(&self) -> HumidifierAction {
        self.compute_action(true)
    }

    pub fn hysteresis_valid(&self) -> bool {
        let c = &self.config;
        if c.supports_dehumidify
            && (c.dehumidify_deadband.is_nan() || c.dehumidify_overrun.is_nan())
        {
            return false;
        }
        if c.supports_humidify && (c.humidify_deadband.is_nan() || c.humidify_overrun.is_nan()) {
            return false;
        }
        true
    }

    pub fn dehumidifying_max_runtime_exceeded(&self) -> bool {
        self.dehumidifying_max_runtime_exceeded.get()
    }

    pub fn humidifying_max_runtime_exceeded(&self) -> bool {
        self.humidifying_max_runtime_exceeded.get()
    }

    fn validate_target_humidity(&self) {
        let (min, max) = (self.config.visual_min_humidity, self.config.visual_max_humidity);
        let target = self.target_humidity.get();
        if target.is_nan() {
            self.target_humidity.set((max - min) / 2.0 + min);
        } else {
            self.target_humidity.set(target.clamp(min, max));
        }
    }

    fn validate_target_humidities(&self) {
        if self.config.supports_two_points {
            self.validate_target_humidity_low();
            self.validate_target_humidity_high();
        } else {
            self.validate_target_humidity();
        }
    }

    fn validate_target_humidity_low(&self) {
        let (min, max) = (self.config.visual_min_humidity, self.config.visual_max_humidity);
        let diff = self.config.set_point_minimum_differential;
        let mut low = self.target_humidity_low.get();
        if low.is_nan() {
            self.target_humidity_low.set(min);
            return;
        }
        if low < min {
            low = min;
        }
        if low > max - diff {
            low = max - diff;
        }
        self.target_humidity_low.set(low);
        // push high up to keep the differential
        if low > self.target_humidity_high.get() - diff {
            self.target_humidity_high.set(low + diff);
        }
    }

    fn validate_target_humidity_high(&self) {
        let (min, max) = (self.config.visual_min_humidity, self.config.visual_max_humidity);
        let diff = self.config.set_point_minimum_differential;
        let mut high = self.target_humidity_high.get();
        if high.is_nan() {
            self.target_humidity_high.set(max);
            return;
        }
        if high > max {
            high = max;
        }
        if high < min + diff {
            high = min + diff;
        }
        self.target_humidity_high.set(high);
        // push low down to keep the differential
        if high < self.target_humidity_low.get() + diff {
            self.target_humidity_low.set(high - diff);
        }
    }

    fn compute_action(&self, ignore_timers: bool) -> HumidifierAction {
        if self.current_humidity.get().is_nan() || !self.hysteresis_valid() {
            return HumidifierAction::Off;
        }
        // an "on" timer pins the current action
        if !ignore_timers
            && (self.timer_active(Timer::IdleOn)
                || self.timer_active(Timer::DehumidifyingOn)
                || self.timer_active(Timer::HumidifyingOn))
        {
            return self.action.get();
        }

        self.validate_target_humidities();
        let mut target = HumidifierAction::Idle;
        match self.mode.get() {
            HumidifierMode::Off => target = HumidifierAction::Off,
            HumidifierMode::HumidifyDehumidify => {
                let dehumidify = self.dehumidifying_required();
                let humidify = self.humidifying_required();
                // both at once means a broken configuration; stay idle
                if dehumidify && !humidify {
                    target = HumidifierAction::Dehumidifying;
                } else if humidify && !dehumidify {
                    target = HumidifierAction::Humidifying;
                }
            }
            HumidifierMode::Dehumidify => {
                if self.dehumidifying_required() {
                    target = HumidifierAction::Dehumidifying;
                }
            }
            HumidifierMode::Humidify => {
                if self.humidifying_required() {
                    target = HumidifierAction::Humidifying;
                }
            }
            HumidifierMode::Auto => {}
        }

        // never jump straight between humidifying and dehumidifying
        match (self.action.get(), target) {
            (HumidifierAction::Dehumidifying, HumidifierAction::Humidifying)
            | (HumidifierAction::Humidifying, HumidifierAction::Dehumidifying) => {
                HumidifierAction::Idle
            }
            _ => target,
        }
    }

    fn dehumidifying_required(&self) -> bool {
        if !self.config.supports_dehumidify {
            return false;
        }
        let target = if self.config.supports_two_points {
            self.target_humidity_high.get()
        } else {
            self.target_humidity.get()
        };
        let current = self.current_humidity.get();
        if current > target + self.config.dehumidify_deadband {
            true
        } else if current < target - self.config.dehumidify_overrun {
            false
        } else {
            self.action.get() == HumidifierAction::Dehumidifying
                && matches!(
                    self.mode.get(),
                    HumidifierMode::HumidifyDehumidify | HumidifierMode::Dehumidify
                )
        }
    }

    fn humidifying_required(&self) -> bool {
        if !self.config.supports_humidify {
            return false;
        }
        let target = if self.config.supports_two_points {
            self.target_humidity_low.get()
        } else {
            self.target_humidity.get()
        };
        let current = self.current_humidity.get();
        if current < target - self.config.humidify_deadband {
            true
        } else if current > target + self.config.humidify_overrun {
            false
        } else {
            self.action.get() == HumidifierAction::Humidifying
                && matches!(
                    self.mode.get(),
                    HumidifierMode::HumidifyDehumidify | HumidifierMode::Humidify
                )
        }
    }

    fn action_trigger(&self, action: HumidifierAction) -> &Trigger<()> {
        match action {
            HumidifierAction::Off | HumidifierAction::Idle => &self.idle_action_trigger,
            HumidifierAction::Dehumidifying => &self.dehumidify_action_trigger,
            HumidifierAction::Humidifying => &self.humidify_action_trigger,
        }
    }

    fn mode_trigger(&self, mode: HumidifierMode) -> &Trigger<()> {
        match mode {
            HumidifierMode::Off => &self.off_mode_trigger,
            HumidifierMode::Dehumidify => &self.dehumidify_mode_trigger,
            HumidifierMode::Humidify => &self.humidify_mode_trigger,
            HumidifierMode::HumidifyDehumidify | HumidifierMode::Auto => &self.auto_mode_trigger,
        }
    }

    fn switch_to_action(&self, action: HumidifierAction, publish: bool) {
        let setup_complete = self.setup_complete.get();
        let current = self.action.get();
        if action == current && setup_complete {
            return;
        }

        // off and idle only differ in how they are shown
        if setup_complete
            && matches!(
                (action, current),
                (HumidifierAction::Off, HumidifierAction::Idle)
                    | (HumidifierAction::Idle, HumidifierAction::Off)
            )
        {
            self.action.set(action);
            if publish {
                self.publish_state();
            }
            return;
        }

        let ready = match action {
            HumidifierAction::Off | HumidifierAction::Idle => {
                let ready = self.idle_action_ready();
                if ready {
                    self.start_timer(Timer::IdleOn);
                    if current == HumidifierAction::Dehumidifying {
                        self.start_timer(Timer::DehumidifyingOff);
                    }
                    if current == HumidifierAction::Humidifying {
                        self.start_timer(Timer::HumidifyingOff);
                    }
                    self.dehumidifying_max_runtime_exceeded.set(false);
                    self.humidifying_max_runtime_exceeded.set(false);
                }
                ready
            }
            HumidifierAction::Dehumidifying => {
                let ready = self.dehumidifying_action_ready();
                if ready {
                    self.start_timer(Timer::DehumidifyingOn);
                    self.start_timer(Timer::DehumidifyingMaxRunTime);
                }
                ready
            }
            HumidifierAction::Humidifying => {
                let ready = self.humidifying_action_ready();
                if ready {
                    self.start_timer(Timer::HumidifyingOn);
                    self.start_timer(Timer::HumidifyingMaxRunTime);
                }
                ready
            }
        };
        if !ready {
            trace!(requested = %action, "Action change held back by timers");
            return;
        }

        debug!(from = %current, to = %action, "Switching humidifier action");
        if let Some(prev) = self.prev_action_trigger.take() {
            self.action_trigger(prev).stop_action();
        }
        self.action.set(action);
        self.prev_action_trigger.set(Some(action));
        self.action_trigger(action).trigger(());
        if publish {
            self.publish_state();
        }
    }

    fn switch_to_mode(&self, mode: HumidifierMode, publish: bool) {
        if mode == self.prev_mode.get() && self.setup_complete.get() {
            return;
        }

        if let Some(prev) = self.prev_mode_trigger.take() {
            self.mode_trigger(prev).stop_action();
        }
        // auto is handled as humidify/dehumidify
        let mode = match mode {
            HumidifierMode::Auto => HumidifierMode::HumidifyDehumidify,
            other => other,
        };
        debug!(mode = %mode, "Switching humidifier mode");
        self.mode.set(mode);
        self.prev_mode.set(mode);
        self.prev_mode_trigger.set(Some(mode));
        self.mode_trigger(mode).trigger(());
        if publish {
            self.publish_state();
        }
    }

    fn check_humidity_change_trigger(&self) {
        let setup_complete = self.setup_complete.get();
        if self.config.supports_two_points {
            let (low, high) = (self.target_humidity_low.get(), self.target_humidity_high.get());
            if self.prev_target_humidity_low.get() == low
                && self.prev_target_humidity_high.get() == high
                && setup_complete
            {
                return;
            }
            self.prev_target_humidity_low.set(low);
            self.prev_target_humidity_high.set(high);
        } else {
            let target = self.target_humidity.get();
            if self.prev_target_humidity.get() == target && setup_complete {
                return;
            }
            self.prev_target_humidity.set(target);
        }
        self.humidity_change_trigger.trigger(());
    }

    fn change_away(&self, away: bool) {
        let targets = if away {
            self.config.away.unwrap_or(self.config.normal)
        } else {
            self.config.normal
        };
        if self.config.supports_two_points {
            self.target_humidity_low.set(targets.low);
            self.target_humidity_high.set(targets.high);
        } else {
            self.target_humidity.set(targets.humidity);
        }
        self.preset.set(if away {
            HumidifierPreset::Away
        } else {
            HumidifierPreset::Home
        });
    }

    fn idle_action_ready(&self) -> bool {
        !(self.timer_active(Timer::DehumidifyingOn) || self.timer_active(Timer::HumidifyingOn))
    }

    fn dehumidifying_action_ready(&self) -> bool {
        !(self.timer_active(Timer::IdleOn)
            || self.timer_active(Timer::DehumidifyingOff)
            || self.timer_active(Timer::HumidifyingOn))
    }

    fn humidifying_action_ready(&self) -> bool {
        !(self.timer_active(Timer::IdleOn)
            || self.timer_active(Timer::DehumidifyingOn)
            || self.timer_active(Timer::HumidifyingOff))
    }

    fn timer_active(&self, timer: Timer) -> bool {
        self.timer_active[timer.index()].get()
    }

    fn start_timer(&self, timer: Timer) {
        let duration = self.timer_durations[timer.index()];
        if duration == 0 {
            return;
        }
        let weak = self.this.clone();
        self.scheduler.set_timeout(self.id, timer.name(), duration, move || {
            if let Some(this) = weak.upgrade() {
                this.on_timer(timer);
            }
        });
        self.timer_active[timer.index()].set(true);
    }

    fn on_timer(&self, timer: Timer) {
        trace!(timer = timer.name(), "Humidifier timer expired");
        self.timer_active[timer.index()].set(false);
        match timer {
            Timer::DehumidifyingMaxRunTime => self.dehumidifying_max_runtime_exceeded.set(true),
            Timer::HumidifyingMaxRunTime => self.humidifying_max_runtime_exceeded.set(true),
            _ => self.switch_to_action(self.compute_action(false), true),
        }
    }

    fn on_humidity(&self, humidity: f32) {
        self.current_humidity.set(humidity);
        self.switch_to_action(self.compute_action(false), false);
        self.publish_state();
    }

    fn publish_state(&self) {
        debug!(
            name = %self.name,
            mode = %self.mode.get(),
            action = %self.action.get(),
            current = self.current_humidity.get(),
            "Sending humidifier state"
        );
        if self.config.supports_two_points {
            debug!(
                low = self.target_humidity_low.get(),
                high = self.target_humidity_high.get(),
                "  Target humidity"
            );
        } else {
            debug!(target = self.target_humidity.get(), "  Target humidity");
        }
        self.state_callback.call(());
        self.save_state();
    }

    fn save_state(&self) {
        let mut state = RestoreState::zeroed();
        state.mode = self.mode.get() as u8;
        state.preset = self.preset.get() as u8;
        if self.config.supports_two_points {
            state.target_humidity_low = self.target_humidity_low.get();
            state.target_humidity_high = self.target_humidity_high.get();
        } else {
            state.target_humidity = self.target_humidity.get();
        }
        self.rtc.borrow().save(&state);
    }

    fn restore_state(&self) -> Option<HumidifierCall> {
        let rtc = self
            .preferences
            .make_preference::<RestoreState>(preference_key(
                &self.object_id,
                RESTORE_STATE_VERSION,
            ));
        let mut state = RestoreState::zeroed();
        let loaded = rtc.load(&mut state);
        *self.rtc.borrow_mut() = rtc;
        if !loaded {
            return None;
        }

        let mode = HumidifierMode::from_u8(state.mode)?;
        let preset = if state.preset == HumidifierPreset::Away as u8 {
            HumidifierPreset::Away
        } else {
            HumidifierPreset::Home
        };
        let mut call = HumidifierCall {
            mode: Some(mode),
            preset: Some(preset),
            ..Default::default()
        };
        if self.config.supports_two_points {
            call.target_humidity_low = Some(state.target_humidity_low);
            call.target_humidity_high = Some(state.target_humidity_high);
        } else {
            call.target_humidity = Some(state.target_humidity);
        }
        Some(call)
    }
}

impl Component for HygrostatHumidifier {
    fn component_name(&self) -> &str {
        "hygrostat"
    }

    fn setup(&self) {
        if self.config.use_startup_delay {
            self.start_timer(Timer::DehumidifyingOff);
            self.start_timer(Timer::HumidifyingOff);
        }

        let weak = self.this.clone();
        self.sensor.add_on_state_callback(move |state| {
            if let Some(this) = weak.upgrade() {
                this.on_humidity(state);
            }
        });
        self.current_humidity.set(self.sensor.state());

        match self.restore_state() {
            Some(call) => {
                debug!("Restoring humidifier state");
                self.control(call);
            }
            None => {
                self.mode.set(self.config.default_mode);
                self.change_away(false);
            }
        }

        self.switch_to_action(self.compute_action(false), false);
        self.setup_complete.set(true);
        self.publish_state();
    }

    fn dump_config(&self) {
        let c = &self.config;
        info!("Hygrostat '{}'", self.name);
        if c.supports_two_points {
            info!("  Default Target Humidity Low: {:.1}%", c.normal.low);
            info!("  Default Target Humidity High: {:.1}%", c.normal.high);
            info!("  Minimum Set Point Differential: {:.1}%", c.set_point_minimum_differential);
        } else {
            info!("  Default Target Humidity: {:.1}%", c.normal.humidity);
        }
        info!("  Start-up Delay Enabled: {}", c.use_startup_delay);
        if c.supports_dehumidify {
            info!("  Dehumidifying Parameters:");
            info!("    Deadband: {:.1}%", c.dehumidify_deadband);
            info!("    Overrun: {:.1}%", c.dehumidify_overrun);
        }
        if c.supports_humidify {
            info!("  Humidifying Parameters:");
            info!("    Deadband: {:.1}%", c.humidify_deadband);
            info!("    Overrun: {:.1}%", c.humidify_overrun);
        }
        for timer in Timer::ALL {
            let duration = self.timer_durations[timer.index()];
            if duration > 0 {
                info!("  Timer {}: {}s", timer.name(), duration / 1000);
            }
        }
        info!("  Supports AUTO: {}", c.supports_auto);
        info!("  Supports HUMIDIFY/DEHUMIDIFY: {}", c.supports_humidify_dehumidify);
        info!("  Supports AWAY mode: {}", c.away.is_some());
    }
}
