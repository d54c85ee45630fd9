//! Scripted transport for tests
//!
//! Replays a queue of canned responses (or errors) and records every request.
//! Clones share state, so a test can keep a handle after giving the transport
//! to a session.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use super::ModbusTransport;
use crate::error::TransportError;
use crate::protocol::constants::FC_READ_HOLDING_REGISTERS;
use crate::protocol::ModbusPdu;

#[derive(Debug)]
enum Scripted {
    Response(ModbusPdu),
    /// Answer with the request itself, as a slave does for FC06/FC16
    Echo,
    Error(TransportError),
}

#[derive(Debug, Default)]
struct ScriptState {
    responses: VecDeque<Scripted>,
    requests: Vec<(u8, ModbusPdu)>,
    latency: Option<Duration>,
}

#[derive(Debug, Clone, Default)]
pub struct ScriptedTransport {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every answer by `latency` (uses the tokio clock)
    pub fn with_latency(self, latency: Duration) -> Self {
        self.state.lock().latency = Some(latency);
        self
    }

    pub fn push_response(&self, pdu: ModbusPdu) {
        self.state.lock().responses.push_back(Scripted::Response(pdu));
    }

    /// Queue a successful write acknowledgement
    pub fn push_echo(&self) {
        self.state.lock().responses.push_back(Scripted::Echo);
    }

    /// Queue a FC03 response carrying `words`
    pub fn push_words(&self, words: &[u16]) {
        let mut data = Vec::with_capacity(2 + words.len() * 2);
        data.push(FC_READ_HOLDING_REGISTERS);
        data.push((words.len() * 2) as u8);
        for word in words {
            data.extend_from_slice(&word.to_be_bytes());
        }
        match ModbusPdu::from_slice(&data) {
            Ok(pdu) => self.push_response(pdu),
            Err(e) => self.push_error(e),
        }
    }

    /// Queue a Modbus exception answer for `function`
    pub fn push_exception(&self, function: u8, code: u8) {
        match ModbusPdu::from_slice(&[function | 0x80, code]) {
            Ok(pdu) => self.push_response(pdu),
            Err(e) => self.push_error(e),
        }
    }

    pub fn push_error(&self, error: TransportError) {
        self.state.lock().responses.push_back(Scripted::Error(error));
    }

    /// Queue the same error `times` times
    pub fn push_errors(&self, error: TransportError, times: usize) {
        for _ in 0..times {
            self.push_error(error.clone());
        }
    }

    pub fn request_count(&self) -> usize {
        self.state.lock().requests.len()
    }

    pub fn requests(&self) -> Vec<(u8, ModbusPdu)> {
        self.state.lock().requests.clone()
    }

    pub fn pending_responses(&self) -> usize {
        self.state.lock().responses.len()
    }
}

#[async_trait]
impl ModbusTransport for ScriptedTransport {
    async fn request(
        &mut self,
        slave: u8,
        request: &ModbusPdu,
    ) -> Result<ModbusPdu, TransportError> {
        let (latency, next) = {
            let mut state = self.state.lock();
            state.requests.push((slave, request.clone()));
            (state.latency, state.responses.pop_front())
        };

        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        match next {
            Some(Scripted::Response(pdu)) => Ok(pdu),
            Some(Scripted::Echo) => Ok(request.clone()),
            Some(Scripted::Error(e)) => Err(e),
            None => Err(TransportError::Timeout(0)),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
