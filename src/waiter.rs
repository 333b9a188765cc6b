use std::{future::Future, time::Duration};

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::debug;

use crate::error::EksctlError;

type DelayFn = Box<dyn Fn(u32) -> Duration + Send + Sync>;

/// Polls a condition until it is satisfied, fails, or the timeout elapses
pub struct Waiter {
  operation: String,
  timeout: Duration,
  next_delay: DelayFn,
}

impl Waiter {
  /// Poll at a fixed interval
  pub fn fixed(operation: impl Into<String>, timeout: Duration, interval: Duration) -> Self {
    Self {
      operation: operation.into(),
      timeout,
      next_delay: Box::new(move |_| interval),
    }
  }

  /// Poll with a delay doubling on every attempt, capped at `max`
  pub fn exponential(operation: impl Into<String>, timeout: Duration, base: Duration, max: Duration) -> Self {
    Self {
      operation: operation.into(),
      timeout,
      next_delay: Box::new(move |attempt| {
        let factor = 2u32.saturating_pow(attempt.min(16));
        base.saturating_mul(factor).min(max)
      }),
    }
  }

  /// Run `condition` until it returns `Ok(true)`
  ///
  /// An error from the condition ends the wait immediately
  pub async fn wait<F, Fut>(&self, mut condition: F) -> Result<()>
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
  {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner());
    spinner.set_message(format!("waiting for {}", self.operation));
    spinner.enable_steady_tick(Duration::from_millis(120));

    let polling = async {
      let mut attempt = 0;
      loop {
        if condition().await? {
          return Ok(());
        }
        let delay = (self.next_delay)(attempt);
        debug!("{}: not done yet (attempt {attempt}), retrying in {delay:?}", self.operation);
        tokio::time::sleep(delay).await;
        attempt += 1;
      }
    };

    let result = match tokio::time::timeout(self.timeout, polling).await {
      Ok(result) => result,
      Err(_) => Err(
        EksctlError::Timeout {
          operation: self.operation.clone(),
          timeout: self.timeout,
        }
        .into(),
      ),
    };

    spinner.finish_and_clear();
    result
  }
}
