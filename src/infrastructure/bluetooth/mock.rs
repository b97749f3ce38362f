//! Scripted in-memory transport for tests.

use super::{TransportEvent, WandTransport};
use crate::error::WandError;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;

#[derive(Default)]
struct MockState {
    writes: Vec<(Instant, Vec<u8>)>,
    sink: Option<mpsc::UnboundedSender<TransportEvent>>,
    responses: HashMap<u8, Vec<u8>>,
    write_failures: VecDeque<WandError>,
    notify_failure: Option<WandError>,
    battery: u8,
    connected: bool,
    cache_clears: usize,
    disconnects: usize,
}

pub struct MockTransport {
    state: Mutex<MockState>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                battery: 100,
                connected: true,
                ..Default::default()
            }),
        }
    }

    /// Answer every write of `opcode` with `notification`.
    pub fn respond_to(&self, opcode: u8, notification: &[u8]) {
        self.state
            .lock()
            .unwrap()
            .responses
            .insert(opcode, notification.to_vec());
    }

    /// Fail the next `count` writes with `error`.
    pub fn fail_writes(&self, error: WandError, count: usize) {
        let mut state = self.state.lock().unwrap();
        state
            .write_failures
            .extend(std::iter::repeat(error).take(count));
    }

    pub fn fail_notify(&self, error: WandError) {
        self.state.lock().unwrap().notify_failure = Some(error);
    }

    pub fn set_battery(&self, level: u8) {
        self.state.lock().unwrap().battery = level;
    }

    /// Deliver raw notification bytes as if the wand sent them.
    pub fn inject(&self, bytes: &[u8]) -> bool {
        self.inject_event(TransportEvent::Notification(bytes.to_vec()))
    }

    pub fn inject_event(&self, event: TransportEvent) -> bool {
        match &self.state.lock().unwrap().sink {
            Some(sink) => sink.send(event).is_ok(),
            None => false,
        }
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        let state = self.state.lock().unwrap();
        state.writes.iter().map(|(_, bytes)| bytes.clone()).collect()
    }

    pub fn write_times(&self) -> Vec<Instant> {
        let state = self.state.lock().unwrap();
        state.writes.iter().map(|(at, _)| *at).collect()
    }

    pub fn is_notifying(&self) -> bool {
        self.state.lock().unwrap().sink.is_some()
    }

    pub fn cache_clears(&self) -> usize {
        self.state.lock().unwrap().cache_clears
    }

    pub fn disconnects(&self) -> usize {
        self.state.lock().unwrap().disconnects
    }
}

impl WandTransport for MockTransport {
    async fn write_command(&self, data: &[u8]) -> Result<(), WandError> {
        let mut state = self.state.lock().unwrap();
        state.writes.push((Instant::now(), data.to_vec()));

        if let Some(error) = state.write_failures.pop_front() {
            return Err(error);
        }
        if !state.connected {
            return Err(WandError::NotConnected);
        }

        let response = data.first().and_then(|op| state.responses.get(op)).cloned();
        if let (Some(response), Some(sink)) = (response, &state.sink) {
            let _ = sink.send(TransportEvent::Notification(response));
        }
        Ok(())
    }

    async fn start_notify(
        &self,
        sink: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<(), WandError> {
        let mut state = self.state.lock().unwrap();
        if let Some(error) = state.notify_failure.take() {
            return Err(error);
        }
        state.sink = Some(sink);
        Ok(())
    }

    async fn stop_notify(&self) -> Result<(), WandError> {
        self.state.lock().unwrap().sink = None;
        Ok(())
    }

    async fn read_battery(&self) -> Result<u8, WandError> {
        Ok(self.state.lock().unwrap().battery)
    }

    async fn clear_cache(&self) {
        self.state.lock().unwrap().cache_clears += 1;
    }

    async fn disconnect(&self) {
        let mut state = self.state.lock().unwrap();
        state.disconnects += 1;
        state.connected = false;
        state.sink = None;
    }

    fn is_connected(&self) -> bool {
        self.state.lock().unwrap().connected
    }
}
