use crate::config::DEFAULT_MAX_ATTEMPTS;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RetryState {
    /// The given attempt failed, another one can be made.
    Retry(u8),

    /// The given attempt failed and was the last one.
    Exhausted(u8),
}

#[derive(Debug)]
pub struct Retry {
    pub attempts: u8,
    max_attempts: u8,
}

impl Default for Retry {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS)
    }
}

impl Retry {
    pub fn new(max_attempts: u8) -> Self {
        Self {
            attempts: 0,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u8 {
        self.max_attempts
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Register a failed attempt.
    pub fn next(&mut self) -> RetryState {
        self.attempts = self.attempts.saturating_add(1);

        if self.attempts < self.max_attempts {
            RetryState::Retry(self.attempts)
        } else {
            RetryState::Exhausted(self.attempts)
        }
    }
}
