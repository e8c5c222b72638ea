//! A queue and its indicators.

use serde_json::{Map, Value};

use super::{route, Effects};
use crate::indicators::service::{self as catalogue, DISPLAY_NAME, NAME};
use crate::indicators::IndicatorSet;
use crate::value::value_key;

#[derive(Debug, Clone)]
pub struct Service {
    name: String,
    indicators: IndicatorSet,
}

impl Service {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            indicators: catalogue::build(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn indicators(&self) -> &IndicatorSet {
        &self.indicators
    }

    pub(crate) fn indicators_mut(&mut self) -> &mut IndicatorSet {
        &mut self.indicators
    }

    pub fn apply_data(&mut self, data: &Map<String, Value>, fx: &mut Effects<'_>) {
        self.indicators.apply_data(data, &fx.ctx);
        self.absorb(fx);
    }

    pub fn reset(&mut self, fx: &mut Effects<'_>) {
        self.indicators.reset_all(&fx.ctx);
        self.absorb(fx);
    }

    /// Technical name and display name, as reported by the queue view
    pub fn table_name(&self) -> (String, Value) {
        (
            value_key(&self.indicators.value_of(NAME)),
            self.indicators.value_of(DISPLAY_NAME),
        )
    }

    /// Queues are not buffered: only subscriptions on single indicators hear about changes
    fn absorb(&mut self, fx: &mut Effects<'_>) {
        route(&mut self.indicators, fx.notices);
    }
}
