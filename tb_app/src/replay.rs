use std::sync::Arc;

use tb_throttle::Clock;
use tb_throttle::ManualClock;
use tb_throttle::RateLimiter;
use tb_throttle::SystemClock;
use tb_throttle::ThrottleConfig;
use tb_throttle::ThrottleManager;
use tb_throttle::ThrottleManagerBuilder;
use tb_throttle::Verdict;

use crate::cli::ReplayStep;

/// Outcome of one replayed step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayRecord {
    /// Replay clock offset in milliseconds from the start
    pub at_millis: u64,
    pub step: ReplayStep,
    /// `None` for steps that do not produce a verdict
    pub verdict: Option<Verdict>,
}

/// Runs admission steps against a throttle driven by a manual clock
pub struct Replayer {
    throttle: ThrottleManager,
    clock: Arc<ManualClock>,
    start: u64,
}

impl Replayer {
    pub fn new(config: ThrottleConfig) -> tb_throttle::Result<Self> {
        let start = SystemClock.now_millis();
        let clock = Arc::new(ManualClock::new(start));
        let throttle = ThrottleManagerBuilder::from_config(config).clock(clock.clone()).build()?;

        Ok(Self { throttle, clock, start })
    }

    pub fn step(&self, step: &ReplayStep) -> tb_throttle::Result<ReplayRecord> {
        let verdict = match step {
            ReplayStep::RateLimit(key) => Some(self.throttle.rate_limit(key)?),
            ReplayStep::Peek(key) => Some(self.throttle.peek_rate_limit(key)?),
            ReplayStep::Reset(key) => {
                self.throttle.reset(key)?;
                None
            }
            ReplayStep::Advance(by) => {
                self.clock.advance(*by);
                None
            }
        };

        Ok(ReplayRecord { at_millis: self.clock.now_millis() - self.start, step: step.clone(), verdict })
    }

    pub fn run(&self, steps: &[ReplayStep]) -> tb_throttle::Result<Vec<ReplayRecord>> {
        steps.iter().map(|step| self.step(step)).collect()
    }
}
