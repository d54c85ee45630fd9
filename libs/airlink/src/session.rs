//! Modbus session
//!
//! Serializes every request to the bridge over one shared transport. The RS485
//! link is half duplex, so only one request is ever outstanding; callers queue
//! on a fair mutex and are served in the order they asked. Transient faults are
//! retried with exponential backoff while the caller keeps its place, so a
//! retried request is never overtaken by a later one.

use rand::Rng;
use std::fmt;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, warn};

use crate::config::SessionConfig;
use crate::error::{AirlinkError, Result, TransportError};
use crate::protocol::constants::{
    FC_READ_HOLDING_REGISTERS, FC_WRITE_MULTIPLE_REGISTERS, FC_WRITE_SINGLE_REGISTER,
    MAX_READ_REGISTERS, MAX_SLAVE_ADDRESS, MAX_WRITE_REGISTERS, MIN_SLAVE_ADDRESS,
};
use crate::protocol::ModbusPdu;
use crate::transport::ModbusTransport;

/// Backoff schedule for transient failures
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt (0 disables retrying)
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&SessionConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_delay: config.initial_backoff,
            max_delay: config.max_backoff,
            backoff_multiplier: config.backoff_multiplier,
            jitter: config.jitter,
        }
    }

    /// Delay before retry number `retry` (counting from 1)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;

        // delay = initial_delay * multiplier ^ (retry - 1)
        let factor = self.backoff_multiplier.powi(exponent);
        let mut delay = if factor.is_finite() {
            self.initial_delay.mul_f64(factor.max(0.0)).min(self.max_delay)
        } else {
            self.max_delay
        };

        // ±25%
        if self.jitter && !delay.is_zero() {
            let range = delay.as_millis() as f64 * 0.25;
            let jitter = rand::thread_rng().gen_range(-range..range);
            let ms = (delay.as_millis() as f64 + jitter).max(0.0);
            delay = Duration::from_millis(ms as u64);
        }

        delay
    }
}

/// Request counters
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    /// Logical requests issued by callers
    pub requests: u64,
    /// Extra attempts caused by transient faults
    pub retries: u64,
    /// Requests that ended in an error
    pub failures: u64,
}

struct Link {
    transport: Box<dyn ModbusTransport>,
    last_command: Option<Instant>,
}

/// Sequenced access to the bridge's Modbus link
pub struct ModbusSession {
    link: Mutex<Link>,
    config: SessionConfig,
    policy: RetryPolicy,
    stats: parking_lot::Mutex<SessionStats>,
}

impl fmt::Debug for ModbusSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModbusSession")
            .field("request_timeout", &self.config.request_timeout)
            .field("policy", &self.policy)
            .field("stats", &*self.stats.lock())
            .finish()
    }
}

impl ModbusSession {
    pub fn new(transport: impl ModbusTransport + 'static, config: SessionConfig) -> Self {
        let policy = RetryPolicy::from_config(&config);
        Self {
            link: Mutex::new(Link {
                transport: Box::new(transport),
                last_command: None,
            }),
            config,
            policy,
            stats: parking_lot::Mutex::new(SessionStats::default()),
        }
    }

    pub fn with_defaults(transport: impl ModbusTransport + 'static) -> Self {
        Self::new(transport, SessionConfig::default())
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn stats(&self) -> SessionStats {
        *self.stats.lock()
    }

    /// Read `count` holding registers starting at `start`
    pub async fn read_registers(&self, slave: u8, start: u16, count: u16) -> Result<Vec<u16>> {
        check_slave(slave)?;
        if count == 0 || usize::from(count) > MAX_READ_REGISTERS {
            return Err(AirlinkError::invalid_value(
                "count",
                format!("{count} registers, allowed 1..={MAX_READ_REGISTERS}"),
            ));
        }

        let request = ModbusPdu::read_holding_registers(start, count)?;
        debug!(slave, start, count, "Read holding registers");
        self.execute(slave, &request, |response| {
            response.expect_function(FC_READ_HOLDING_REGISTERS)?;
            response.read_response_words(count)
        })
        .await
    }

    /// Write `words` to consecutive registers starting at `start`
    ///
    /// One word is written with FC06, several with FC16 so the device applies
    /// them together.
    pub async fn write_registers(&self, slave: u8, start: u16, words: &[u16]) -> Result<()> {
        check_slave(slave)?;
        let (request, function) = match words {
            [] => {
                return Err(AirlinkError::invalid_value("words", "nothing to write"));
            },
            [value] => (
                ModbusPdu::write_single_register(start, *value)?,
                FC_WRITE_SINGLE_REGISTER,
            ),
            _ if words.len() > MAX_WRITE_REGISTERS => {
                return Err(AirlinkError::invalid_value(
                    "words",
                    format!(
                        "{} registers, allowed 1..={MAX_WRITE_REGISTERS}",
                        words.len()
                    ),
                ));
            },
            _ => (
                ModbusPdu::write_multiple_registers(start, words)?,
                FC_WRITE_MULTIPLE_REGISTERS,
            ),
        };

        debug!(slave, start, count = words.len(), "Write registers");
        self.execute(slave, &request, |response| {
            response.expect_function(function)?;
            response.check_write_echo(&request)
        })
        .await
    }

    /// Send one request, retrying transient faults
    ///
    /// `accept` validates the response; its errors count as transport faults.
    async fn execute<T, F>(&self, slave: u8, request: &ModbusPdu, accept: F) -> Result<T>
    where
        F: Fn(&ModbusPdu) -> std::result::Result<T, TransportError>,
    {
        self.stats.lock().requests += 1;

        let mut link = self.link.lock().await;
        let mut attempt: u32 = 0;
        loop {
            let outcome = self.attempt(&mut link, slave, request).await;
            let error = match outcome.and_then(|response| accept(&response)) {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !error.is_transient() || attempt >= self.policy.max_retries {
                self.stats.lock().failures += 1;
                if error.is_transient() {
                    warn!(
                        "Request to slave {} failed after {} attempts: {}",
                        slave,
                        attempt + 1,
                        error
                    );
                } else {
                    debug!("Request to slave {} failed: {}", slave, error);
                }
                return Err(error.into());
            }

            attempt += 1;
            self.stats.lock().retries += 1;
            let delay = self.policy.delay_for(attempt);
            warn!(
                "Retrying request to slave {} in {:?} (attempt {}/{}): {}",
                slave, delay, attempt, self.policy.max_retries, error
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn attempt(
        &self,
        link: &mut Link,
        slave: u8,
        request: &ModbusPdu,
    ) -> std::result::Result<ModbusPdu, TransportError> {
        if let Some(last) = link.last_command {
            sleep_until(last + self.config.min_command_gap).await;
        }

        let deadline = self.config.request_timeout;
        let result = timeout(deadline, link.transport.request(slave, request)).await;
        link.last_command = Some(Instant::now());

        match result {
            Ok(response) => response,
            Err(_) => Err(TransportError::Timeout(deadline.as_millis() as u64)),
        }
    }
}

fn check_slave(slave: u8) -> Result<()> {
    if (MIN_SLAVE_ADDRESS..=MAX_SLAVE_ADDRESS).contains(&slave) {
        Ok(())
    } else {
        Err(AirlinkError::InvalidAddress(format!(
            "{slave} outside {MIN_SLAVE_ADDRESS}..={MAX_SLAVE_ADDRESS}"
        )))
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::transport::ScriptedTransport;

    fn session(transport: &ScriptedTransport, max_retries: u32) -> ModbusSession {
        ModbusSession::new(
            transport.clone(),
            SessionConfig {
                max_retries,
                ..SessionConfig::default()
            },
        )
    }

    #[test]
    fn test_exponential_backoff() {
        let policy = RetryPolicy {
            max_retries: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            jitter: false,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(4), Duration::from_millis(800));
        assert_eq!(policy.delay_for(5), Duration::from_secs(1));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy {
            jitter: true,
            initial_delay: Duration::from_millis(400),
            ..RetryPolicy::default()
        };
        for _ in 0..50 {
            let delay = policy.delay_for(1);
            assert!(delay >= Duration::from_millis(300) && delay <= Duration::from_millis(500));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_registers() {
        let transport = ScriptedTransport::new();
        transport.push_words(&[0x0001, 0xC849]);
        let session = session(&transport, 3);

        let words = session.read_registers(207, 40002, 2).await.unwrap();
        assert_eq!(words, vec![0x0001, 0xC849]);

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(
            requests[0].1,
            ModbusPdu::read_holding_registers(40002, 2).unwrap()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_uses_fc06_for_one_word_and_fc16_for_many() {
        let transport = ScriptedTransport::new();
        transport.push_echo();
        transport.push_response(
            crate::protocol::PduBuilder::new()
                .function_code(FC_WRITE_MULTIPLE_REGISTERS)
                .unwrap()
                .address(43000)
                .unwrap()
                .quantity(2)
                .unwrap()
                .build(),
        );
        let session = session(&transport, 0);

        session.write_registers(207, 41101, &[0x42]).await.unwrap();
        session.write_registers(207, 43000, &[0x0001, 0xC892]).await.unwrap();

        let requests = transport.requests();
        assert_eq!(requests[0].1.function_code(), Some(FC_WRITE_SINGLE_REGISTER));
        assert_eq!(requests[1].1.function_code(), Some(FC_WRITE_MULTIPLE_REGISTERS));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_failures_then_succeeds() {
        let transport = ScriptedTransport::new();
        transport.push_errors(TransportError::Timeout(1000), 2);
        transport.push_words(&[7]);
        let session = session(&transport, 3);

        assert_eq!(session.read_registers(2, 41000, 1).await.unwrap(), vec![7]);
        assert_eq!(transport.request_count(), 3);

        let stats = session.stats();
        assert_eq!(stats.requests, 1);
        assert_eq!(stats.retries, 2);
        assert_eq!(stats.failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_budget_exhausted() {
        let transport = ScriptedTransport::new();
        transport.push_errors(
            TransportError::Crc {
                expected: 1,
                actual: 2,
            },
            10,
        );
        let session = session(&transport, 2);

        let err = session.read_registers(2, 41000, 1).await.unwrap_err();
        assert!(matches!(
            err,
            AirlinkError::Transport(TransportError::Crc { .. })
        ));
        assert_eq!(transport.request_count(), 3);
        assert_eq!(session.stats().failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_illegal_address_is_not_retried() {
        let transport = ScriptedTransport::new();
        transport.push_exception(FC_READ_HOLDING_REGISTERS, 0x02);
        let session = session(&transport, 3);

        let err = session.read_registers(2, 49999, 1).await.unwrap_err();
        assert_eq!(
            err,
            AirlinkError::Transport(TransportError::Exception {
                function: 0x83,
                code: 0x02
            })
        );
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_exception_is_retried() {
        let transport = ScriptedTransport::new();
        transport.push_exception(FC_READ_HOLDING_REGISTERS, 0x06);
        transport.push_words(&[1]);
        let session = session(&transport, 3);

        assert!(session.read_registers(2, 41000, 1).await.is_ok());
        assert_eq!(transport.request_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wrong_word_count_is_transient() {
        let transport = ScriptedTransport::new();
        transport.push_words(&[1]);
        transport.push_words(&[1, 2]);
        let session = session(&transport, 1);

        assert_eq!(
            session.read_registers(2, 41000, 2).await.unwrap(),
            vec![1, 2]
        );
        assert_eq!(transport.request_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_transport_times_out() {
        let transport = ScriptedTransport::new().with_latency(Duration::from_secs(5));
        transport.push_words(&[1]);
        let session = session(&transport, 0);

        let err = session.read_registers(2, 41000, 1).await.unwrap_err();
        assert_eq!(err, AirlinkError::Transport(TransportError::Timeout(1000)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_minimum_gap_between_commands() {
        let transport = ScriptedTransport::new();
        transport.push_words(&[1]);
        transport.push_words(&[2]);
        let session = session(&transport, 0);

        let start = Instant::now();
        session.read_registers(2, 41000, 1).await.unwrap();
        session.read_registers(2, 41000, 1).await.unwrap();
        assert!(start.elapsed() >= session.config().min_command_gap);
    }

    #[tokio::test]
    async fn test_rejects_bad_arguments_without_io() {
        let transport = ScriptedTransport::new();
        let session = session(&transport, 0);

        assert!(matches!(
            session.read_registers(0, 41000, 1).await,
            Err(AirlinkError::InvalidAddress(_))
        ));
        assert!(session.read_registers(2, 41000, 126).await.is_err());
        assert!(session.write_registers(2, 41000, &[]).await.is_err());
        assert_eq!(transport.request_count(), 0);
    }
}
