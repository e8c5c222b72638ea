//! Compute rules of advanced indicators.
//!
//! A rule reads the current values of the indicator's inputs (in the order
//! they were declared) and writes the indicator through
//! [`IndicatorSet::set`], so the usual change filter and cascade apply.

use std::cmp::Ordering;

use serde_json::{json, Map, Value};
use tracing::warn;

use super::{ComputeCtx, IndicatorSet, Slot};
use crate::localtime::{compare, elapsed_seconds, started_after, to_iso};
use crate::value::{as_f64, as_i64, difference, float, float_string, sum, truthy, value_key};

/// How an advanced indicator derives its value from its inputs
#[derive(Debug, Clone, PartialEq)]
pub enum Rule {
    /// Copy of the first input
    Mirror,
    /// Copy of the first input, only when truthy
    MirrorIfTruthy,
    /// Sum of every input
    Sum,
    /// First input minus every other input
    Difference,
    /// `inputs[0] / sum(inputs[1..=denominators])`, stored with its details.
    /// `clamp` reads the numerator as a non negative float.
    Average { denominators: usize, clamp: bool },
    /// `managed / (managed + failed) * 100`, reset when nothing was handled
    ManagedRate,
    /// First input as a float rendered as a string, 0.0 when empty
    MaxAsFloatString,
    /// ISO date of the first input, "0" when empty
    IsoDateOrZero,
    /// ISO date of the first input, "stop" when empty
    IsoOrStop,
    /// Management date of the running task, "" once it ended
    CurrentTaskManagedDate,
    /// Start date of the running inbound task or outbound call
    CurrentTaskStartDate,
    /// Agent state shown to supervisors
    VocalState,
    /// Parse a JSON record document; `wrap` keys it by the indicator name
    RecordJson { wrap: bool },
    /// `{login, session_id, logged}` once login and session id are known
    AutoRecordWatcher,
    /// Logins of the users spying a session
    Spies,
    /// Interface mode of the session
    Interface,
    /// Live value plus the day's terminated sessions
    DailySum,
    /// Max of the live value and the day's terminated sessions
    DailyMax,
    /// Day's contact duration divided by the day's contacted legs
    DailyAverage,
    /// Last outgoing call or transfer, as an activity record
    Activity,
    /// Waiting time in seconds between two dates
    WaitingSeconds,
    /// `true` until the task stopped waiting
    IsWaiting,
    /// The first input when truthy, ISO when it is not a string
    DateOrRaw,
    /// Creation date of a communication, ignoring "stop"
    CreateDate,
    /// Start date of a task, captured once
    FirstStartDate,
    /// Terminate date when known, else end date, else ""
    EndDate,
    /// First agent that handled a task
    InitialAgent,
    /// Manager profile, remembering the previous one
    CallProfile,
    /// Queue or agent currently holding a task, remembering the previous one
    CurrentQueue,
    /// First queue or agent of a task
    InitialQueue,
    /// Never computed; written directly
    Idle,
}

const VOCAL_STATES: &[(&str, &str)] = &[
    ("assigning", "invite"),
    ("processing", "trying"),
    ("ringing", "ringing"),
    ("managing", "contact"),
    ("contact", "contact"),
    ("held", "hold"),
    ("post_managing", "postprocessing"),
    ("temporization", "postprocessing"),
];

const CANCELED_CAUSES: &[&str] = &["Canceled", "Temporarily Unavailable"];
const FAILED_CAUSES: &[&str] = &["Address Incomplete", "No response", "Busy Here"];

fn input(set: &IndicatorSet, inputs: &[Slot], i: usize) -> Value {
    inputs.get(i).map(|&slot| set.read(slot)).unwrap_or(Value::Null)
}

fn iso(value: &Value) -> Value {
    Value::String(to_iso(value))
}

fn is_stopped(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => s.is_empty() || s == "0" || s == "stop",
        other => as_f64(other) == 0.0,
    }
}

impl Rule {
    /// Rules whose one-shot latch is cleared by `reset()`
    pub fn clears_initialized_on_reset(&self) -> bool {
        matches!(self, Self::FirstStartDate | Self::InitialAgent | Self::InitialQueue)
    }

    pub(crate) fn compute(
        &self,
        set: &mut IndicatorSet,
        slot: Slot,
        inputs: &[Slot],
        trigger: Slot,
        ctx: &ComputeCtx<'_>,
    ) {
        match self {
            Self::Mirror => {
                let value = input(set, inputs, 0);
                set.set(slot, value, ctx);
            }
            Self::MirrorIfTruthy => {
                let value = input(set, inputs, 0);
                if truthy(&value) {
                    set.set(slot, value, ctx);
                }
            }
            Self::Sum => {
                let values: Vec<Value> = (0..inputs.len()).map(|i| input(set, inputs, i)).collect();
                set.set(slot, sum(values.iter()), ctx);
            }
            Self::Difference => {
                let first = input(set, inputs, 0);
                let rest: Vec<Value> = (1..inputs.len()).map(|i| input(set, inputs, i)).collect();
                set.set(slot, difference(&first, rest.iter()), ctx);
            }
            Self::Average { denominators, clamp } => {
                let parts: Vec<Value> = (1..=*denominators).map(|i| input(set, inputs, i)).collect();
                let denominator = sum(parts.iter());
                let d = as_f64(&denominator);
                if d > 0.0 {
                    let raw = input(set, inputs, 0);
                    let numerator = if *clamp {
                        float(as_f64(&raw).max(0.0))
                    } else {
                        raw
                    };
                    let value = float(as_f64(&numerator) / d);
                    set.set_rate_details(slot, Some(numerator), denominator);
                    set.set(slot, value, ctx);
                } else {
                    set.set_rate_details(slot, None, denominator);
                }
            }
            Self::ManagedRate => {
                let managed = input(set, inputs, 0);
                let failed = input(set, inputs, 1);
                let denominator = sum([&failed, &managed]);
                let d = as_f64(&denominator);
                set.set_rate_details(slot, Some(managed.clone()), denominator);
                if d > 0.0 {
                    set.set(slot, float(as_f64(&managed) / d * 100.0), ctx);
                } else {
                    set.set(slot, Value::Null, ctx);
                }
            }
            Self::MaxAsFloatString => {
                let value = input(set, inputs, 0);
                let inbound = if truthy(&value) { as_f64(&value) } else { 0.0 };
                set.set(slot, Value::String(float_string(inbound.max(0.0))), ctx);
            }
            Self::IsoDateOrZero => {
                let value = input(set, inputs, 0);
                let value = if truthy(&value) { iso(&value) } else { json!("0") };
                set.set(slot, value, ctx);
            }
            Self::IsoOrStop => {
                let value = input(set, inputs, 0);
                let value = if truthy(&value) { iso(&value) } else { json!("stop") };
                set.set(slot, value, ctx);
            }
            Self::CurrentTaskManagedDate => {
                let start = input(set, inputs, 0);
                let end = input(set, inputs, 1);
                if truthy(&start) {
                    let value = match started_after(&start, &end) {
                        Some(true) => iso(&start),
                        _ => json!(""),
                    };
                    set.set(slot, value, ctx);
                }
            }
            Self::CurrentTaskStartDate => {
                let start = input(set, inputs, 0);
                let end = input(set, inputs, 1);
                let outbound_start = input(set, inputs, 2);
                if is_stopped(&outbound_start) {
                    if truthy(&start) {
                        let value = match started_after(&start, &end) {
                            Some(true) => iso(&start),
                            _ => json!(""),
                        };
                        set.set(slot, value, ctx);
                    } else if outbound_start == json!("stop") {
                        set.set(slot, json!(""), ctx);
                    }
                } else {
                    set.set(slot, outbound_start, ctx);
                }
            }
            Self::VocalState => {
                let value = vocal_state(set, inputs);
                set.set(slot, value, ctx);
            }
            Self::RecordJson { wrap } => {
                let raw = input(set, inputs, 0);
                let Some(doc) = raw.as_str().filter(|s| s.starts_with('{')) else {
                    return;
                };
                match serde_json::from_str::<Value>(doc) {
                    Ok(record) => {
                        let value = if *wrap {
                            keyed(set.indicator(slot).name(), record)
                        } else {
                            record
                        };
                        set.set(slot, value, ctx);
                    }
                    Err(e) => warn!("Ignoring malformed record {:?}: {}", doc, e),
                }
            }
            Self::AutoRecordWatcher => {
                let session_id = input(set, inputs, 0);
                let login = input(set, inputs, 1);
                let logged = input(set, inputs, 2);
                if truthy(&login) && truthy(&session_id) {
                    let value = keyed(
                        set.indicator(slot).name(),
                        json!({"login": login, "session_id": session_id, "logged": logged}),
                    );
                    set.set(slot, value, ctx);
                }
            }
            Self::Spies => {
                let raw = input(set, inputs, 0);
                let value = match spies(&raw) {
                    Some(spies) => spies,
                    None => return,
                };
                set.set(slot, value, ctx);
            }
            Self::Interface => {
                let mode = input(set, inputs, 0);
                let value = match mode.as_str() {
                    Some("Scheduling agent") => "scheduled",
                    Some("phone login") => "phone",
                    Some("unplug") => "unplug",
                    _ => "interface",
                };
                set.set(slot, json!(value), ctx);
            }
            Self::DailySum | Self::DailyMax => {
                let field = inputs
                    .first()
                    .map(|&s| set.indicator(s).name().to_string())
                    .unwrap_or_default();
                let history = daily_values(set, inputs, &field, ctx);
                let mut value = as_f64(&input(set, inputs, 0)) as i64;
                for past in history.iter().filter(|v| truthy(v)) {
                    let past = as_f64(past) as i64;
                    if *self == Self::DailySum {
                        value += past;
                    } else if value < past {
                        value = past;
                    }
                }
                set.set(slot, json!(value), ctx);
            }
            Self::DailyAverage => {
                let duration_field = inputs
                    .first()
                    .map(|&s| set.indicator(s).name().to_string())
                    .unwrap_or_default();
                let count_field = inputs
                    .get(3)
                    .map(|&s| set.indicator(s).name().to_string())
                    .unwrap_or_default();

                let mut duration = as_f64(&input(set, inputs, 0));
                let mut count = as_i64(&input(set, inputs, 3)).unwrap_or(0);
                for past in daily_values(set, inputs, &duration_field, ctx).iter().filter(|v| truthy(v)) {
                    duration += as_f64(past);
                }
                for past in daily_values(set, inputs, &count_field, ctx).iter().filter(|v| truthy(v)) {
                    count += as_i64(past).unwrap_or(0);
                }
                if count == 0 {
                    count = 1;
                }
                set.set(slot, json!((duration / count as f64) as i64), ctx);
            }
            Self::Activity => {
                let transfer = inputs.get(1).copied() == Some(trigger);
                let activity = if transfer {
                    transfer_activity(set, inputs)
                } else {
                    outgoing_activity(set, inputs)
                };
                if let Some(activity) = activity {
                    set.set(slot, activity, ctx);
                }
            }
            Self::WaitingSeconds => {
                let start = input(set, inputs, 0);
                let end = input(set, inputs, 1);
                if truthy(&start) && truthy(&end) {
                    if let Some(seconds) = elapsed_seconds(&start, &end) {
                        set.set(slot, json!(seconds), ctx);
                    }
                }
            }
            Self::IsWaiting => {
                let end = input(set, inputs, 0);
                set.set(slot, json!(!truthy(&end) || end == json!("0")), ctx);
            }
            Self::DateOrRaw => {
                let start = input(set, inputs, 0);
                if truthy(&start) {
                    let value = if start.is_string() { start } else { iso(&start) };
                    set.set(slot, value, ctx);
                }
            }
            Self::CreateDate => {
                let created = input(set, inputs, 0);
                match &created {
                    Value::String(s) if s == "stop" => {}
                    Value::String(_) => set.set(slot, created, ctx),
                    other if truthy(other) => set.set(slot, iso(other), ctx),
                    _ => {}
                }
            }
            Self::FirstStartDate => {
                if set.indicator(slot).is_initialized() {
                    return;
                }
                let start = input(set, inputs, 0);
                let value = match &start {
                    Value::String(_) if truthy(&start) => start.clone(),
                    other if truthy(other) => iso(other),
                    _ => json!(""),
                };
                set.set(slot, value, ctx);
                set.set_initialized(slot, true);
            }
            Self::EndDate => {
                let end = input(set, inputs, 0);
                let terminate = input(set, inputs, 1);
                let value = if truthy(&terminate) {
                    iso(&terminate)
                } else if truthy(&end) {
                    if end.is_string() {
                        end
                    } else {
                        iso(&end)
                    }
                } else {
                    json!("")
                };
                set.set(slot, value, ctx);
            }
            Self::InitialAgent => {
                let login = input(set, inputs, 0);
                if !set.indicator(slot).is_initialized() && truthy(&login) {
                    set.set(slot, login, ctx);
                    set.set_initialized(slot, true);
                }
            }
            Self::CallProfile => {
                let profile = input(set, inputs, 0);
                track_previous(set, slot, inputs.get(1).copied(), &profile, ctx);
                set.set(slot, profile, ctx);
            }
            Self::CurrentQueue => {
                let queue_type = input(set, inputs, 0);
                let display = input(set, inputs, 1);
                let login = input(set, inputs, 2);
                let current = if queue_type == json!("queue") && truthy(&display) {
                    display
                } else if truthy(&login) {
                    login
                } else {
                    return;
                };
                track_previous(set, slot, inputs.get(3).copied(), &current, ctx);
                set.set(slot, current, ctx);
            }
            Self::InitialQueue => {
                if set.indicator(slot).is_initialized() {
                    return;
                }
                let display = input(set, inputs, 0);
                let queue_type = input(set, inputs, 1);
                let login = input(set, inputs, 2);
                let initial = if queue_type == json!("queue") && truthy(&display) {
                    display
                } else if truthy(&login) {
                    login
                } else {
                    return;
                };
                set.set(slot, initial, ctx);
                set.set_initialized(slot, true);
            }
            Self::Idle => {}
        }
    }
}

fn keyed(name: &str, value: Value) -> Value {
    let mut map = Map::new();
    map.insert(name.to_string(), value);
    Value::Object(map)
}

/// Latch the first truthy value, then push the replaced value into `previous`
fn track_previous(
    set: &mut IndicatorSet,
    slot: Slot,
    previous: Option<Slot>,
    next: &Value,
    ctx: &ComputeCtx<'_>,
) {
    if !set.indicator(slot).is_initialized() && truthy(next) {
        set.set_initialized(slot, true);
    } else if truthy(next) && !crate::value::loose_eq(set.indicator(slot).value(), next) {
        if let Some(previous) = previous {
            let old = set.indicator(slot).value().clone();
            set.set(previous, old, ctx);
        }
    }
}

fn daily_values(set: &IndicatorSet, inputs: &[Slot], field: &str, ctx: &ComputeCtx<'_>) -> Vec<Value> {
    let Some(daily) = ctx.daily else {
        return Vec::new();
    };
    let login = value_key(&input(set, inputs, 1));
    let profile = value_key(&input(set, inputs, 2));
    daily
        .indicator_values(&profile, &login, field)
        .into_iter()
        .cloned()
        .collect()
}

fn vocal_state(set: &IndicatorSet, inputs: &[Slot]) -> Value {
    let display_name = input(set, inputs, 0);
    let task_name = input(set, inputs, 1);
    let busy_count = input(set, inputs, 2);
    let outbound_state = input(set, inputs, 3);
    let outbound_hold = input(set, inputs, 4);

    if display_name == json!("appels sortants") {
        if outbound_state == json!(0) || outbound_state == json!("disconnected") {
            json!("outbound")
        } else if truthy(&outbound_hold) {
            json!("outbound_hold")
        } else {
            outbound_state
        }
    } else if value_key(&busy_count) == "1" {
        task_name
            .as_str()
            .and_then(|name| VOCAL_STATES.iter().find(|(k, _)| *k == name))
            .map(|(_, state)| json!(state))
            .unwrap_or(task_name)
    } else if display_name != json!("traitement d'appel") {
        display_name
    } else {
        json!("available")
    }
}

fn spies(raw: &Value) -> Option<Value> {
    if !truthy(raw) {
        return Some(json!([]));
    }
    let doc = raw.as_str()?;
    let entries: Vec<Value> = match serde_json::from_str(doc) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Ignoring malformed spy list {:?}: {}", doc, e);
            return None;
        }
    };
    let mut logins: Vec<String> = entries
        .iter()
        .filter_map(Value::as_str)
        .filter_map(|entry| match entry.split("AGENT").nth(1) {
            Some(login) => Some(login.to_string()),
            None => {
                warn!("Ignoring spy entry without agent: {}", entry);
                None
            }
        })
        .collect();
    logins.sort();
    logins.dedup();
    Some(json!(logins))
}

fn parse_activity(raw: &Value, kind: &str, login: &Value, session_id: &Value) -> Option<Map<String, Value>> {
    if raw == &json!("undefined") {
        warn!("[{}/{}] Received \"undefined\" {}.", value_key(login), value_key(session_id), kind);
        return None;
    }
    if !truthy(raw) {
        return None;
    }
    let doc = raw.as_str()?;
    match serde_json::from_str::<Value>(doc) {
        Ok(Value::Object(map)) => Some(map),
        Ok(other) => {
            warn!("[{}/{}] Ignoring {} that is not an object: {}", value_key(login), value_key(session_id), kind, other);
            None
        }
        Err(e) => {
            warn!("[{}/{}] Ignoring malformed {}: {}", value_key(login), value_key(session_id), kind, e);
            None
        }
    }
}

fn field<'a>(values: &'a Map<String, Value>, name: &str) -> &'a Value {
    values.get(name).unwrap_or(&Value::Null)
}

fn millis_to_secs(value: &Value) -> Value {
    float(as_f64(value) / 1000.0)
}

fn is_null_like(value: &Value) -> bool {
    value.is_null() || value == &json!("null")
}

fn transfer_activity(set: &IndicatorSet, inputs: &[Slot]) -> Option<Value> {
    let login = input(set, inputs, 2);
    let session_id = input(set, inputs, 4);
    let raw = input(set, inputs, 1);
    let values = parse_activity(&raw, "transfer_activity", &login, &session_id)?;

    let target = field(&values, "target").clone();
    if !truthy(&target) {
        warn!("[{}/{}] Can't have undefined target. values={}", value_key(&login), value_key(&session_id), value_key(&raw));
        return None;
    }

    let result = field(&values, "result");
    let reason = field(&values, "reason").clone();
    let failure_cause = if result == &json!("success") || is_null_like(result) {
        json!("success")
    } else {
        reason.clone()
    };
    let target_display = match values.get("target_display_name") {
        Some(display) if truthy(display) => display.clone(),
        _ => target.clone(),
    };

    Some(json!({
        "login": login,
        "communication_id": field(&values, "parent_call_id"),
        "history_id": field(&values, "transfer_id"),
        "call_type": "outbound",
        "is_transfer": true,
        "create": millis_to_secs(field(&values, "started")),
        "end": millis_to_secs(field(&values, "ended")),
        "failure_cause": failure_cause,
        "target_display": target_display,
        "media": "phone",
        "caller": values.get("caller").cloned().unwrap_or_else(|| login.clone()),
        "target": target,
        "vocal_session_id": session_id,
        "reason": if is_null_like(&reason) { json!("success") } else { reason },
        "communication_type": "vocal",
    }))
}

fn outgoing_activity(set: &IndicatorSet, inputs: &[Slot]) -> Option<Value> {
    let login = input(set, inputs, 2);
    let session_id = input(set, inputs, 4);
    let raw = input(set, inputs, 0);
    let values = parse_activity(&raw, "outgoing_activity", &login, &session_id)?;

    let context = field(&values, "context");
    let outbound = context == &json!("sortant");
    if outbound && field(&values, "target_display") == &json!("null") {
        return None;
    }

    let failure_cause = field(&values, "failureCause");
    let failure = if field(&values, "result") == &json!("success") {
        json!("success")
    } else {
        match failure_cause.as_str() {
            Some(cause) if CANCELED_CAUSES.contains(&cause) => json!("canceled"),
            Some(cause) if FAILED_CAUSES.contains(&cause) => json!("failed"),
            _ => failure_cause.clone(),
        }
    };

    let target = field(&values, "target").clone();
    let caller = field(&values, "caller").clone();
    if !truthy(&target) || !truthy(&caller) {
        warn!(
            "[{}/{}] Can't have undefined target or caller. values={}",
            value_key(&login),
            value_key(&session_id),
            value_key(&raw)
        );
        return None;
    }

    let call_type = match context.as_str() {
        Some("file") => json!("inbound"),
        Some("sortant") => json!("outbound"),
        _ => context.clone(),
    };
    let target_display = if outbound {
        match values.get("target_display") {
            Some(display) if truthy(display) => display.clone(),
            _ => target.clone(),
        }
    } else {
        values.get("caller").cloned().unwrap_or_else(|| json!("unknown"))
    };
    let chrono = field(&values, "connection_chrono");
    let call_id = field(&values, "call_id");

    Some(json!({
        "login": login,
        "communication_id": call_id,
        "history_id": call_id,
        "call_type": call_type,
        "is_transfer": field(&values, "transfert") == &json!("true"),
        "create": millis_to_secs(chrono.get("t_started").unwrap_or(&Value::Null)),
        "end": millis_to_secs(chrono.get("t_stopped").unwrap_or(&Value::Null)),
        "failure_cause": failure,
        "target_display": target_display,
        "media": "phone",
        "caller": caller,
        "target": target,
        "vocal_session_id": session_id,
        "reason": if is_null_like(failure_cause) { json!("success") } else { failure_cause.clone() },
        "communication_type": "vocal",
    }))
}

/// Ordering helper shared with the entities: whether `a` is strictly after `b`
pub fn is_after(a: &Value, b: &Value) -> bool {
    compare(a, b) == Some(Ordering::Greater)
}
