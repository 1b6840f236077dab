//! Bounded-retry connection management for the upstream stream

use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use super::source::{ConnectError, ReadError, StreamSource};
use crate::RetryConfig;

/// Fatal capture failures. There is no other frame source, so these end the process.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Could not open stream {url} after {attempts} attempts: {last}")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        #[source]
        last: ConnectError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

/// Fixed-delay, bounded-attempt retry policy for opening a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 10,
            delay: Duration::from_secs(2),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            attempts: config.attempts.max(1),
            delay: Duration::from_millis(config.delay_ms),
        }
    }
}

/// Owns a `StreamSource` and opens connections to one address with retry
pub struct StreamConnector<S> {
    source: S,
    url: String,
    policy: RetryPolicy,
    state: ConnectorState,
    connects: u64,
    // Failed attempts in the current reconnect cycle
    attempt: u32,
}

impl<S: StreamSource> StreamConnector<S> {
    pub fn new(source: S, url: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            source,
            url: url.into(),
            policy,
            state: ConnectorState::Disconnected,
            connects: 0,
            attempt: 0,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> ConnectorState {
        self.state
    }

    /// Number of successful connections so far.
    pub fn connects(&self) -> u64 {
        self.connects
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Open the stream, sleeping `policy.delay` between failed attempts.
    ///
    /// Blocks the calling thread. Fails once `policy.attempts` consecutive
    /// attempts have failed and leaves the connector in `Failed`. An attempt
    /// whose connection never delivered a frame (see [`Self::no_frames`])
    /// counts against the same budget.
    pub fn connect(&mut self) -> Result<S::Connection, CaptureError> {
        self.state = ConnectorState::Connecting;
        let attempts = self.policy.attempts.max(1);

        loop {
            let attempt = self.attempt + 1;
            info!(url = %self.url, attempt, max = attempts, "Attempting to open stream");

            match self.source.open(&self.url) {
                Ok(connection) => {
                    self.state = ConnectorState::Connected;
                    self.connects += 1;
                    info!(url = %self.url, attempt, "Stream opened");
                    return Ok(connection);
                }
                Err(e) => self.attempt_failed(e)?,
            }
        }
    }

    /// The connection delivered a frame; the next cycle gets a fresh budget.
    pub fn streaming(&mut self) {
        self.attempt = 0;
    }

    /// The connection ended before its first frame. Counts as a failed attempt.
    pub fn no_frames(&mut self, reason: &ReadError) -> Result<(), CaptureError> {
        self.state = ConnectorState::Connecting;
        self.attempt_failed(ConnectError::NoFrames(reason.to_string()))?;
        self.state = ConnectorState::Disconnected;
        Ok(())
    }

    /// Record that the current connection was torn down.
    pub fn disconnected(&mut self) {
        self.state = ConnectorState::Disconnected;
    }

    fn attempt_failed(&mut self, error: ConnectError) -> Result<(), CaptureError> {
        let attempts = self.policy.attempts.max(1);
        self.attempt += 1;

        if self.attempt >= attempts {
            self.state = ConnectorState::Failed;
            return Err(CaptureError::RetriesExhausted {
                url: self.url.clone(),
                attempts,
                last: error,
            });
        }

        warn!(url = %self.url, attempt = self.attempt, error = %error, "Failed to open stream");
        std::thread::sleep(self.policy.delay);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::frame::RawFrame;
    use crate::capture::source::FrameReader;

    struct NoFrames;

    impl FrameReader for NoFrames {
        fn read_frame(&mut self, _frame: &mut RawFrame) -> Result<(), ReadError> {
            Err(ReadError::EndOfStream)
        }
    }

    /// Fails the first `failures` opens, then succeeds.
    struct Flaky {
        failures: u32,
        opens: u32,
    }

    impl StreamSource for Flaky {
        type Connection = NoFrames;

        fn open(&mut self, _url: &str) -> Result<NoFrames, ConnectError> {
            self.opens += 1;
            if self.opens <= self.failures {
                Err(ConnectError::Unavailable("warming up".into()))
            } else {
                Ok(NoFrames)
            }
        }
    }

    fn policy(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            delay: Duration::ZERO,
        }
    }

    #[test]
    fn starts_disconnected() {
        let connector = StreamConnector::new(Flaky { failures: 0, opens: 0 }, "x", policy(3));
        assert_eq!(connector.state(), ConnectorState::Disconnected);
    }

    #[test]
    fn retries_until_success() {
        let mut connector = StreamConnector::new(Flaky { failures: 4, opens: 0 }, "x", policy(5));

        assert!(connector.connect().is_ok());
        assert_eq!(connector.state(), ConnectorState::Connected);
        assert_eq!(connector.source().opens, 5);
        assert_eq!(connector.connects(), 1);
    }

    #[test]
    fn gives_up_after_exact_attempt_count() {
        let mut connector =
            StreamConnector::new(Flaky { failures: u32::MAX, opens: 0 }, "rtsp://cam", policy(10));

        let err = connector.connect().err().expect("connect must fail");
        assert_eq!(connector.source().opens, 10);
        assert_eq!(connector.state(), ConnectorState::Failed);
        match err {
            CaptureError::RetriesExhausted { url, attempts, .. } => {
                assert_eq!(url, "rtsp://cam");
                assert_eq!(attempts, 10);
            }
        }
    }

    #[test]
    fn disconnect_resets_state() {
        let mut connector = StreamConnector::new(Flaky { failures: 0, opens: 0 }, "x", policy(1));
        let _connection = connector.connect().unwrap();
        connector.disconnected();
        assert_eq!(connector.state(), ConnectorState::Disconnected);
    }

    #[test]
    fn frameless_connections_share_the_attempt_budget() {
        let mut connector = StreamConnector::new(Flaky { failures: 1, opens: 0 }, "x", policy(3));

        // attempt 1 fails to open, attempt 2 opens but yields nothing
        let _connection = connector.connect().unwrap();
        connector.no_frames(&ReadError::Timeout(Duration::from_secs(5))).unwrap();
        assert_eq!(connector.state(), ConnectorState::Disconnected);

        // attempt 3 opens, attempt budget spent once it yields nothing either
        let _connection = connector.connect().unwrap();
        let err = connector.no_frames(&ReadError::EndOfStream).unwrap_err();
        assert_eq!(connector.state(), ConnectorState::Failed);
        match err {
            CaptureError::RetriesExhausted { attempts, last, .. } => {
                assert_eq!(attempts, 3);
                assert!(matches!(last, ConnectError::NoFrames(_)));
            }
        }
    }

    #[test]
    fn streaming_restores_a_fresh_budget() {
        let mut connector = StreamConnector::new(Flaky { failures: 0, opens: 0 }, "x", policy(2));

        let _connection = connector.connect().unwrap();
        connector.no_frames(&ReadError::EndOfStream).unwrap();
        let _connection = connector.connect().unwrap();
        connector.streaming();
        connector.disconnected();

        let _connection = connector.connect().unwrap();
        assert!(connector.no_frames(&ReadError::EndOfStream).is_ok());
    }

    #[test]
    fn policy_from_config_never_zero_attempts() {
        let policy = RetryPolicy::from(&RetryConfig {
            attempts: 0,
            delay_ms: 250,
        });
        assert_eq!(policy.attempts, 1);
        assert_eq!(policy.delay, Duration::from_millis(250));
    }
}
