use std::time::Duration;

/// Longest frame fed into the accumulator, so a stall does not turn into a
/// burst of catch-up ticks.
const DEFAULT_MAX_FRAME: f32 = 0.25;

/// Accumulates wall-clock time and releases it in fixed ticks.
#[derive(Debug, Clone)]
pub struct FixedTimestep {
    tick_rate: u32,
    dt: f32,
    accumulator: f32,
    max_frame: f32,
}

impl FixedTimestep {
    pub fn new(tick_rate: u32) -> Self {
        let tick_rate = tick_rate.max(1);
        Self {
            tick_rate,
            dt: 1.0 / tick_rate as f32,
            accumulator: 0.0,
            max_frame: DEFAULT_MAX_FRAME,
        }
    }

    pub fn with_max_frame(mut self, seconds: f32) -> Self {
        self.max_frame = seconds.max(self.dt);
        self
    }

    pub fn tick_rate(&self) -> u32 {
        self.tick_rate
    }

    pub fn dt(&self) -> f32 {
        self.dt
    }

    pub fn period(&self) -> Duration {
        Duration::from_secs_f32(self.dt)
    }

    pub fn accumulate(&mut self, delta: f32) {
        self.accumulator += delta.clamp(0.0, self.max_frame);
    }

    pub fn consume_tick(&mut self) -> bool {
        if self.accumulator >= self.dt {
            self.accumulator -= self.dt;
            true
        } else {
            false
        }
    }

    /// Consumes every tick that is due and returns how many there were.
    pub fn drain(&mut self) -> u32 {
        let mut ticks = 0;
        while self.consume_tick() {
            ticks += 1;
        }
        ticks
    }

    /// Fraction of the next tick already accumulated.
    pub fn alpha(&self) -> f32 {
        self.accumulator / self.dt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_timestep_accumulation() {
        let mut ts = FixedTimestep::new(4).with_max_frame(1.0);

        ts.accumulate(0.5);
        assert!(ts.consume_tick());
        assert!(ts.consume_tick());
        assert!(!ts.consume_tick());

        ts.accumulate(0.125);
        assert_eq!(ts.alpha(), 0.5);
    }

    #[test]
    fn fixed_timestep_default_clamp() {
        let mut ts = FixedTimestep::new(4);
        ts.accumulate(0.5);
        assert_eq!(ts.drain(), 1);
    }

    #[test]
    fn fixed_timestep_clamps_stalls() {
        let mut ts = FixedTimestep::new(4).with_max_frame(1.0);
        ts.accumulate(30.0);
        assert_eq!(ts.drain(), 4);

        ts.accumulate(-1.0);
        assert_eq!(ts.drain(), 0);
    }
}
