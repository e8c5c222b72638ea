//! Indicator graph.
//!
//! An entity (session, service, communication, task) owns one
//! [`IndicatorSet`]: an arena of named indicators addressed by [`Slot`].
//! Basic indicators hold values copied from dispatch rows. Advanced
//! indicators carry a [`Rule`] computed from their input slots each time
//! one of the watched inputs notifies.
//!
//! Setting a value never calls back into the owning entity. Every
//! notification is recorded as a [`Notified`] entry, with the
//! indicator's `get()` snapshot taken at notification time; the entity
//! drains them with [`IndicatorSet::take_notified`] and routes them to its
//! own buffer and to the subscriptions attached to the slot.

pub mod call;
pub mod rules;
pub mod service;
pub mod session;

use indexmap::IndexMap;
use serde_json::{json, Map, Value};
use tracing::{error, warn};

use crate::listeners::daily::DailyListener;
use crate::observer::{ObserverList, SubscriptionId};
use crate::value::{as_i64, loose_eq, truthy, wrapped};

pub use rules::Rule;

/// Position of an indicator inside its set
pub type Slot = usize;

/// How `set()` interprets the incoming value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetPolicy {
    /// Store and notify only when the value changed
    Standard,
    /// Store and always notify
    AlwaysNotify,
    /// `""` becomes 0, numeric strings become integers; always notify
    IntCoerce,
    /// `""` becomes 0; always notify
    EmptyAsZero,
    /// 0, "0", "false" and "False" become `false`, anything else `true`; always notify
    Flag,
    /// Falsy values are ignored; state names are translated to modes
    Mode,
    /// The value must be `{"value": v}`; `v` is stored
    Unwrap,
    /// `{"value": v}` stores `v`, anything else is stored as-is
    UnwrapLenient,
    /// External writes are ignored
    Constant,
}

impl SetPolicy {
    fn always_notifies(self) -> bool {
        matches!(
            self,
            Self::AlwaysNotify | Self::IntCoerce | Self::EmptyAsZero | Self::Flag
        )
    }
}

/// Value restored by `reset()`
#[derive(Debug, Clone, PartialEq)]
pub enum ResetPolicy {
    ToZero,
    ToNull,
    /// Leave the value as it is
    Keep,
    To(Value),
}

impl ResetPolicy {
    fn initial_value(&self) -> Value {
        match self {
            Self::ToZero => json!(0),
            Self::ToNull | Self::Keep => Value::Null,
            Self::To(v) => v.clone(),
        }
    }
}

/// Shape of `get()`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GetShape {
    /// The bare value
    Raw,
    /// `{name: {"value": v}}`
    Wrapped,
    /// `{name: {"value": v, "details": {"numerator": n, "denominator": d}}}`
    Rate,
    /// `{name: v}`
    Named,
    /// `{"current": bool, "auto": bool}` decoded from a record flag
    RecordFlags,
    /// Wrapped, with the user part of a `scheme:user@host` URI
    NumberPart,
}

/// Declarative description of one indicator
#[derive(Debug, Clone)]
pub struct IndicatorSpec {
    name: String,
    advanced: bool,
    attached: bool,
    policy: SetPolicy,
    reset: ResetPolicy,
    silent_reset: bool,
    shape: GetShape,
    initial: Option<Value>,
    rule: Option<Rule>,
    inputs: Vec<String>,
    watched: Option<usize>,
}

impl IndicatorSpec {
    /// A raw field indicator: reset to 0, plain get, not observed by its entity
    pub fn basic(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            advanced: false,
            attached: false,
            policy: SetPolicy::Standard,
            reset: ResetPolicy::ToZero,
            silent_reset: false,
            shape: GetShape::Raw,
            initial: None,
            rule: None,
            inputs: Vec::new(),
            watched: None,
        }
    }

    /// A computed indicator observed by its entity, with a wrapped get
    pub fn advanced(name: impl Into<String>, rule: Rule, inputs: &[&str]) -> Self {
        Self {
            advanced: true,
            attached: true,
            shape: GetShape::Wrapped,
            rule: Some(rule),
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            ..Self::basic(name)
        }
    }

    /// An advanced indicator exposing numerator and denominator
    pub fn rate(name: impl Into<String>, rule: Rule, inputs: &[&str]) -> Self {
        Self::advanced(name, rule, inputs).shape(GetShape::Rate)
    }

    pub fn policy(mut self, policy: SetPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn reset(mut self, reset: ResetPolicy) -> Self {
        self.reset = reset;
        self
    }

    /// `reset()` does not notify
    pub fn silent_reset(mut self) -> Self {
        self.silent_reset = true;
        self
    }

    pub fn shape(mut self, shape: GetShape) -> Self {
        self.shape = shape;
        self
    }

    /// Value at construction, when it differs from the reset value
    pub fn initial(mut self, value: Value) -> Self {
        self.initial = Some(value);
        self
    }

    /// Only the first `count` inputs trigger a recompute
    pub fn watch_first(mut self, count: usize) -> Self {
        self.watched = Some(count);
        self
    }

    /// Not observed by the owning entity
    pub fn detached(mut self) -> Self {
        self.attached = false;
        self
    }
}

/// One indicator of a set
#[derive(Debug, Clone)]
pub struct Indicator {
    name: String,
    value: Value,
    advanced: bool,
    attached: bool,
    policy: SetPolicy,
    reset: ResetPolicy,
    silent_reset: bool,
    shape: GetShape,
    rule: Option<Rule>,
    inputs: Vec<Slot>,
    dependents: Vec<Slot>,
    numerator: Value,
    denominator: Value,
    initialized: bool,
    observers: ObserverList<SubscriptionId>,
}

impl Indicator {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn is_advanced(&self) -> bool {
        self.advanced
    }

    /// Observed by the owning entity
    pub fn is_attached(&self) -> bool {
        self.attached
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn observers(&self) -> &ObserverList<SubscriptionId> {
        &self.observers
    }

    pub fn inputs(&self) -> &[Slot] {
        &self.inputs
    }

    /// External representation of the indicator
    pub fn get(&self) -> Value {
        match self.shape {
            GetShape::Raw => self.value.clone(),
            GetShape::Wrapped => self.keyed(wrapped(self.value.clone())),
            GetShape::Rate => self.keyed(json!({
                "value": self.value,
                "details": {
                    "numerator": self.numerator,
                    "denominator": self.denominator,
                },
            })),
            GetShape::Named => self.keyed(self.value.clone()),
            GetShape::RecordFlags => record_flags(&self.value),
            GetShape::NumberPart => match number_part(&self.value) {
                Some(number) => self.keyed(wrapped(Value::String(number))),
                None => self.keyed(wrapped(self.value.clone())),
            },
        }
    }

    /// Value as read by dependent rules: raw, except for decoded record flags
    fn read(&self) -> Value {
        match self.shape {
            GetShape::RecordFlags => record_flags(&self.value),
            _ => self.value.clone(),
        }
    }

    fn keyed(&self, inner: Value) -> Value {
        let mut map = Map::new();
        map.insert(self.name.clone(), inner);
        Value::Object(map)
    }
}

fn record_flags(value: &Value) -> Value {
    if truthy(value) {
        let flag = as_i64(value).unwrap_or(0);
        json!({"current": flag.rem_euclid(2) == 1, "auto": flag > 1})
    } else {
        json!({"current": false, "auto": false})
    }
}

fn number_part(value: &Value) -> Option<String> {
    let raw = value.as_str()?;
    let after_scheme = raw.split(':').nth(1)?;
    after_scheme.split('@').next().map(str::to_string)
}

/// A notification recorded by [`IndicatorSet::set`] or [`IndicatorSet::reset`]
#[derive(Debug, Clone, PartialEq)]
pub struct Notified {
    pub slot: Slot,
    pub payload: Value,
}

/// Outside state some rules read while computing
#[derive(Debug, Clone, Copy, Default)]
pub struct ComputeCtx<'a> {
    pub daily: Option<&'a DailyListener>,
}

impl<'a> ComputeCtx<'a> {
    pub fn with_daily(daily: &'a DailyListener) -> Self {
        Self { daily: Some(daily) }
    }
}

/// Arena of the indicators of one entity, in construction order
#[derive(Debug, Clone, Default)]
pub struct IndicatorSet {
    indicators: Vec<Indicator>,
    by_name: IndexMap<String, Slot>,
    notified: Vec<Notified>,
}

impl IndicatorSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an indicator. Inputs must already exist; a duplicate name
    /// returns the existing slot.
    pub fn add(&mut self, spec: IndicatorSpec) -> Slot {
        if let Some(&slot) = self.by_name.get(&spec.name) {
            error!("Indicator {} already exists", spec.name);
            return slot;
        }

        let slot = self.indicators.len();
        let mut inputs = Vec::with_capacity(spec.inputs.len());
        for input in &spec.inputs {
            match self.by_name.get(input) {
                Some(&input_slot) => inputs.push(input_slot),
                None => error!("Indicator {} needs unknown input {}", spec.name, input),
            }
        }

        let watched = spec.watched.unwrap_or(inputs.len()).min(inputs.len());
        for &input_slot in &inputs[..watched] {
            let dependents = &mut self.indicators[input_slot].dependents;
            if !dependents.contains(&slot) {
                dependents.push(slot);
            }
        }

        let value = spec
            .initial
            .clone()
            .unwrap_or_else(|| spec.reset.initial_value());

        self.indicators.push(Indicator {
            name: spec.name.clone(),
            value,
            advanced: spec.advanced,
            attached: spec.attached,
            policy: spec.policy,
            reset: spec.reset,
            silent_reset: spec.silent_reset,
            shape: spec.shape,
            rule: spec.rule,
            inputs,
            dependents: Vec::new(),
            numerator: json!(0),
            denominator: json!(0),
            initialized: false,
            observers: ObserverList::new(),
        });
        self.by_name.insert(spec.name, slot);
        slot
    }

    pub fn len(&self) -> usize {
        self.indicators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indicators.is_empty()
    }

    pub fn slot(&self, name: &str) -> Option<Slot> {
        self.by_name.get(name).copied()
    }

    pub fn has(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn indicator(&self, slot: Slot) -> &Indicator {
        &self.indicators[slot]
    }

    pub fn by_name(&self, name: &str) -> Option<&Indicator> {
        self.slot(name).map(|slot| &self.indicators[slot])
    }

    /// Indicators in construction order
    pub fn iter(&self) -> impl Iterator<Item = (Slot, &Indicator)> {
        self.indicators.iter().enumerate()
    }

    pub fn get(&self, slot: Slot) -> Value {
        self.indicators[slot].get()
    }

    /// Raw value of the named indicator, null when unknown
    pub fn value_of(&self, name: &str) -> Value {
        self.by_name(name)
            .map(|i| i.value.clone())
            .unwrap_or(Value::Null)
    }

    pub fn read(&self, slot: Slot) -> Value {
        self.indicators[slot].read()
    }

    pub fn observers_mut(&mut self, slot: Slot) -> &mut ObserverList<SubscriptionId> {
        &mut self.indicators[slot].observers
    }

    pub fn set_initialized(&mut self, slot: Slot, initialized: bool) {
        self.indicators[slot].initialized = initialized;
    }

    pub(crate) fn set_rate_details(&mut self, slot: Slot, numerator: Option<Value>, denominator: Value) {
        let indicator = &mut self.indicators[slot];
        if let Some(numerator) = numerator {
            indicator.numerator = numerator;
        }
        indicator.denominator = denominator;
    }

    /// Drain the notifications recorded since the last call
    pub fn take_notified(&mut self) -> Vec<Notified> {
        std::mem::take(&mut self.notified)
    }

    /// Set every indicator whose name appears in `data`, in construction order.
    /// Unknown keys are ignored.
    pub fn apply_data(&mut self, data: &Map<String, Value>, ctx: &ComputeCtx<'_>) {
        for slot in 0..self.indicators.len() {
            if let Some(value) = data.get(&self.indicators[slot].name) {
                self.set(slot, value.clone(), ctx);
            }
        }
    }

    /// Set by name; returns whether the indicator exists
    pub fn set_by_name(&mut self, name: &str, value: Value, ctx: &ComputeCtx<'_>) -> bool {
        match self.slot(name) {
            Some(slot) => {
                self.set(slot, value, ctx);
                true
            }
            None => false,
        }
    }

    pub fn set(&mut self, slot: Slot, value: Value, ctx: &ComputeCtx<'_>) {
        let policy = self.indicators[slot].policy;
        let value = match coerce(policy, value, &self.indicators[slot].name) {
            Some(value) => value,
            None => return,
        };

        if value.is_null() {
            self.reset(slot, ctx);
            return;
        }

        let indicator = &mut self.indicators[slot];
        let changed = !loose_eq(&indicator.value, &value);
        if changed {
            indicator.value = value;
        }
        if changed || policy.always_notifies() {
            self.notify(slot, ctx);
        }
    }

    pub fn reset(&mut self, slot: Slot, ctx: &ComputeCtx<'_>) {
        let indicator = &mut self.indicators[slot];
        match &indicator.reset {
            ResetPolicy::ToZero => indicator.value = json!(0),
            ResetPolicy::ToNull => indicator.value = Value::Null,
            ResetPolicy::Keep => {}
            ResetPolicy::To(v) => indicator.value = v.clone(),
        }
        if indicator.shape == GetShape::Rate {
            indicator.numerator = json!(0);
            indicator.denominator = json!(0);
        }
        if indicator.rule.as_ref().is_some_and(Rule::clears_initialized_on_reset) {
            indicator.initialized = false;
        }
        if !indicator.silent_reset {
            self.notify(slot, ctx);
        }
    }

    /// Reset every indicator in construction order
    pub fn reset_all(&mut self, ctx: &ComputeCtx<'_>) {
        for slot in 0..self.indicators.len() {
            self.reset(slot, ctx);
        }
    }

    fn notify(&mut self, slot: Slot, ctx: &ComputeCtx<'_>) {
        let payload = self.indicators[slot].get();
        self.notified.push(Notified { slot, payload });

        let dependents = self.indicators[slot].dependents.clone();
        for dependent in dependents {
            self.compute(dependent, slot, ctx);
        }
    }

    fn compute(&mut self, slot: Slot, trigger: Slot, ctx: &ComputeCtx<'_>) {
        if let Some(rule) = self.indicators[slot].rule.clone() {
            let inputs = self.indicators[slot].inputs.clone();
            rule.compute(self, slot, &inputs, trigger, ctx);
        }
    }
}

fn coerce(policy: SetPolicy, value: Value, name: &str) -> Option<Value> {
    match policy {
        SetPolicy::Standard | SetPolicy::AlwaysNotify => Some(value),
        SetPolicy::IntCoerce => match value {
            Value::String(s) if s.is_empty() => Some(json!(0)),
            Value::String(s) => match as_i64(&Value::String(s.clone())) {
                Some(n) if s.trim().parse::<f64>().is_ok() => Some(json!(n)),
                _ => {
                    warn!("Indicator {} received a non numeric value: {:?}", name, s);
                    None
                }
            },
            other => Some(other),
        },
        SetPolicy::EmptyAsZero => match value {
            Value::String(s) if s.is_empty() => Some(json!(0)),
            other => Some(other),
        },
        SetPolicy::Flag => match &value {
            Value::Null => Some(Value::Null),
            Value::Bool(b) => Some(Value::Bool(*b)),
            Value::Number(n) if n.as_f64() == Some(0.0) => Some(Value::Bool(false)),
            Value::String(s) if s == "0" || s == "false" || s == "False" => Some(Value::Bool(false)),
            _ => Some(Value::Bool(true)),
        },
        SetPolicy::Mode => {
            if truthy(&value) {
                Some(translate_mode(value))
            } else {
                None
            }
        }
        SetPolicy::Unwrap => match value {
            Value::Null => Some(Value::Null),
            Value::Object(mut map) if map.contains_key("value") => map.remove("value"),
            other => {
                warn!("Indicator {} expects a {{value}} object, got {}", name, other);
                None
            }
        },
        SetPolicy::UnwrapLenient => match value {
            Value::Object(mut map) if map.contains_key("value") => map.remove("value"),
            other => Some(other),
        },
        SetPolicy::Constant => None,
    }
}

fn translate_mode(value: Value) -> Value {
    let Some(state) = value.as_str() else {
        return value;
    };
    let mode = if state.starts_with("pause") {
        "withdrawal"
    } else {
        match state {
            "traitement" => "inbound",
            "sortant" | "sortant2" => "outbound",
            "supervision" => "supervision",
            "disabled" => "disabled",
            _ => return value,
        }
    };
    Value::String(mode.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ctx() -> ComputeCtx<'static> {
        ComputeCtx::default()
    }

    #[test]
    fn test_unchanged_set_does_not_notify() {
        let mut set = IndicatorSet::new();
        let slot = set.add(IndicatorSpec::basic("busy_count"));
        set.set(slot, json!(1), &ctx());
        assert_eq!(set.take_notified().len(), 1);
        set.set(slot, json!(1), &ctx());
        set.set(slot, json!(1.0), &ctx());
        assert!(set.take_notified().is_empty());
    }

    #[test]
    fn test_always_notify_policy() {
        let mut set = IndicatorSet::new();
        let slot = set.add(IndicatorSpec::basic("transferred_inbound.count('0')").policy(SetPolicy::AlwaysNotify));
        set.set(slot, json!(2), &ctx());
        set.set(slot, json!(2), &ctx());
        assert_eq!(set.take_notified().len(), 2);
    }

    #[test]
    fn test_null_resets_and_notifies() {
        let mut set = IndicatorSet::new();
        let slot = set.add(IndicatorSpec::basic("busy_count"));
        set.set(slot, json!(3), &ctx());
        set.take_notified();
        set.set(slot, Value::Null, &ctx());
        assert_eq!(set.get(slot), json!(0));
        assert_eq!(set.take_notified(), vec![Notified { slot, payload: json!(0) }]);
    }

    #[test]
    fn test_silent_reset() {
        let mut set = IndicatorSet::new();
        let slot = set.add(IndicatorSpec::basic("x").reset(ResetPolicy::ToNull).silent_reset());
        set.set(slot, json!("a"), &ctx());
        set.take_notified();
        set.reset(slot, &ctx());
        assert_eq!(set.get(slot), Value::Null);
        assert!(set.take_notified().is_empty());
    }

    #[test]
    fn test_int_coercion() {
        let mut set = IndicatorSet::new();
        let slot = set.add(IndicatorSpec::basic("total_leg_count.value").policy(SetPolicy::IntCoerce));
        set.set(slot, json!("12"), &ctx());
        assert_eq!(set.get(slot), json!(12));
        set.set(slot, json!(""), &ctx());
        assert_eq!(set.get(slot), json!(0));
        set.set(slot, json!("abc"), &ctx());
        assert_eq!(set.get(slot), json!(0));
        assert_eq!(set.take_notified().len(), 2);
    }

    #[test]
    fn test_flag_policy() {
        let mut set = IndicatorSet::new();
        let slot = set.add(IndicatorSpec::basic("outbound_hold_flag.value").policy(SetPolicy::Flag));
        for (input, expected) in [
            (json!("false"), false),
            (json!("1"), true),
            (json!(0), false),
            (json!("False"), false),
            (json!("yes"), true),
        ] {
            set.set(slot, input, &ctx());
            assert_eq!(set.get(slot), json!(expected));
        }
    }

    #[test]
    fn test_mode_translation() {
        let mut set = IndicatorSet::new();
        let slot = set.add(
            IndicatorSpec::basic("last_state_name")
                .policy(SetPolicy::Mode)
                .reset(ResetPolicy::To(json!("disabled"))),
        );
        assert_eq!(set.get(slot), json!("disabled"));
        for (state, mode) in [
            ("traitement", "inbound"),
            ("sortant2", "outbound"),
            ("pause_dej", "withdrawal"),
            ("supervision", "supervision"),
            ("custom", "custom"),
        ] {
            set.set(slot, json!(state), &ctx());
            assert_eq!(set.get(slot), json!(mode));
        }
        set.set(slot, json!(""), &ctx());
        assert_eq!(set.get(slot), json!("custom"));
    }

    #[test]
    fn test_get_shapes() {
        let mut set = IndicatorSet::new();
        let flags = set.add(IndicatorSpec::basic("record_active").shape(GetShape::RecordFlags));
        let to = set.add(IndicatorSpec::basic("to").shape(GetShape::NumberPart));
        let named = set.add(IndicatorSpec::basic("previous_queue_name").shape(GetShape::Named));

        assert_eq!(set.get(flags), json!({"current": false, "auto": false}));
        set.set(flags, json!("3"), &ctx());
        assert_eq!(set.get(flags), json!({"current": true, "auto": true}));
        set.set(flags, json!(2), &ctx());
        assert_eq!(set.get(flags), json!({"current": false, "auto": true}));

        set.set(to, json!("sip:0102030405@pbx.local"), &ctx());
        assert_eq!(set.get(to), json!({"to": {"value": "0102030405"}}));
        set.set(to, json!("0102030405"), &ctx());
        assert_eq!(set.get(to), json!({"to": {"value": "0102030405"}}));

        set.set(named, json!("Q1"), &ctx());
        assert_eq!(set.get(named), json!({"previous_queue_name": "Q1"}));
    }

    #[test]
    fn test_apply_data_ignores_unknown_keys() {
        let mut set = IndicatorSet::new();
        let a = set.add(IndicatorSpec::basic("a"));
        let b = set.add(IndicatorSpec::basic("b"));
        let data = json!({"b": 2, "zzz": 9, "a": 1});
        set.apply_data(data.as_object().unwrap(), &ctx());
        assert_eq!(set.get(a), json!(1));
        assert_eq!(set.get(b), json!(2));
        let order: Vec<Slot> = set.take_notified().iter().map(|n| n.slot).collect();
        assert_eq!(order, vec![a, b]);
    }

    #[test]
    fn test_dependents_recompute_after_notification() {
        let mut set = IndicatorSet::new();
        let latent = set.add(IndicatorSpec::basic("latent_sessions_count"));
        let logged = set.add(IndicatorSpec::basic("logged_sessions_count"));
        let users = set.add(IndicatorSpec::advanced(
            "users_count",
            Rule::Sum,
            &["latent_sessions_count", "logged_sessions_count"],
        ));

        set.set(latent, json!(2), &ctx());
        set.set(logged, json!(5), &ctx());
        assert_eq!(set.get(users), json!({"users_count": {"value": 7}}));

        let slots: Vec<Slot> = set.take_notified().iter().map(|n| n.slot).collect();
        assert_eq!(slots, vec![latent, users, logged, users]);
    }
}
