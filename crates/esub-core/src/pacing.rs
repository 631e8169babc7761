//! Heat-based pacing for the ingestion worker.
//!
//! `interval = base * (1 + heat / 2)^2`
//!
//! Heat rises by one per processed request and falls by one (floor 0) per
//! idle tick, so bursts drain with growing spacing and an idle queue relaxes
//! back to the base interval.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Pacing {
    base: Duration,
    heat: u32,
}

impl Pacing {
    pub fn new(base: Duration) -> Self {
        Self { base, heat: 0 }
    }

    pub fn heat(&self) -> u32 {
        self.heat
    }

    pub fn on_request(&mut self) {
        self.heat = self.heat.saturating_add(1);
    }

    pub fn on_idle(&mut self) {
        self.heat = self.heat.saturating_sub(1);
    }

    pub fn interval(&self) -> Duration {
        Self::interval_for(self.base, self.heat)
    }

    pub fn interval_for(base: Duration, heat: u32) -> Duration {
        let factor = (1.0 + f64::from(heat) / 2.0).powi(2);
        base.mul_f64(factor)
    }
}
