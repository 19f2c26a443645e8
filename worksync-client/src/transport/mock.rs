//! Mock transport for testing.
//!
//! Allows queueing inbound frames, capturing sent frames, forcing connect
//! failures, and simulating a server-initiated close. Unlike a plain queue,
//! `recv()` suspends while nothing is queued, so a client reader task can sit
//! on it the way it sits on a real socket.

use super::{Transport, TransportError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Mock transport for testing.
#[derive(Debug, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockInner>>,
    inbound_notify: Arc<Notify>,
    sent_notify: Arc<Notify>,
    connect_notify: Arc<Notify>,
}

#[derive(Debug, Default)]
struct MockInner {
    connected: bool,
    server_closed: bool,
    attempts: usize,
    connect_count: usize,
    connected_url: Option<String>,
    sent: Vec<String>,
    inbound: VecDeque<String>,
    fail_connects: VecDeque<String>,
}

impl MockTransport {
    /// Create a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a frame to be delivered through `recv()`.
    pub fn queue_event(&self, frame: impl Into<String>) {
        self.inner.lock().unwrap().inbound.push_back(frame.into());
        self.inbound_notify.notify_waiters();
    }

    /// Simulate the server closing the connection: queued frames still
    /// deliver, after which `recv()` reports the close.
    pub fn close_from_server(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.server_closed = true;
        inner.connected = false;
        drop(inner);
        self.inbound_notify.notify_waiters();
    }

    /// Cause the next `connect()` to fail with the given error. Stackable:
    /// each call queues one more failure.
    pub fn fail_next_connect(&self, error: &str) {
        self.inner
            .lock()
            .unwrap()
            .fail_connects
            .push_back(error.to_string());
    }

    /// All frames sent so far.
    pub fn sent_frames(&self) -> Vec<String> {
        self.inner.lock().unwrap().sent.clone()
    }

    /// The most recently sent frame.
    pub fn last_sent(&self) -> Option<String> {
        self.inner.lock().unwrap().sent.last().cloned()
    }

    /// How many successful `connect()` calls have happened.
    pub fn connect_count(&self) -> usize {
        self.inner.lock().unwrap().connect_count
    }

    /// How many `connect()` calls have happened, successful or not.
    pub fn connect_attempts(&self) -> usize {
        self.inner.lock().unwrap().attempts
    }

    /// The URL of the most recent successful connection.
    pub fn connected_url(&self) -> Option<String> {
        self.inner.lock().unwrap().connected_url.clone()
    }

    /// Wait until at least `n` frames have been sent.
    pub async fn wait_for_frames(&self, n: usize) {
        loop {
            let notified = self.sent_notify.notified();
            if self.inner.lock().unwrap().sent.len() >= n {
                return;
            }
            notified.await;
        }
    }

    /// Wait until at least `n` successful connects have happened.
    pub async fn wait_for_connects(&self, n: usize) {
        loop {
            let notified = self.connect_notify.notified();
            if self.inner.lock().unwrap().connect_count >= n {
                return;
            }
            notified.await;
        }
    }

    /// Wait until at least `n` connect attempts (including failures) have
    /// happened.
    pub async fn wait_for_attempts(&self, n: usize) {
        loop {
            let notified = self.connect_notify.notified();
            if self.inner.lock().unwrap().attempts >= n {
                return;
            }
            notified.await;
        }
    }
}

impl Clone for MockTransport {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            inbound_notify: Arc::clone(&self.inbound_notify),
            sent_notify: Arc::clone(&self.sent_notify),
            connect_notify: Arc::clone(&self.connect_notify),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, url: &str) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();
        inner.attempts += 1;
        if let Some(error) = inner.fail_connects.pop_front() {
            drop(inner);
            self.connect_notify.notify_waiters();
            return Err(TransportError::ConnectionFailed(error));
        }
        inner.connected = true;
        inner.server_closed = false;
        inner.connect_count += 1;
        inner.connected_url = Some(url.to_string());
        drop(inner);
        self.connect_notify.notify_waiters();
        Ok(())
    }

    async fn send(&self, frame: String) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.connected {
            return Err(TransportError::NotConnected);
        }
        inner.sent.push(frame);
        drop(inner);
        self.sent_notify.notify_waiters();
        Ok(())
    }

    async fn recv(&self) -> Result<String, TransportError> {
        loop {
            let notified = self.inbound_notify.notified();
            {
                let mut inner = self.inner.lock().unwrap();
                if let Some(frame) = inner.inbound.pop_front() {
                    return Ok(frame);
                }
                if inner.server_closed || !inner.connected {
                    return Err(TransportError::ConnectionClosed);
                }
            }
            notified.await;
        }
    }

    fn is_connected(&self) -> bool {
        self.inner.lock().unwrap().connected
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.inner.lock().unwrap().connected = false;
        self.inbound_notify.notify_waiters();
        Ok(())
    }
}
