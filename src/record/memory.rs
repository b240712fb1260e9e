//! In-process record layer.
//!
//! [`pair`] returns two connected endpoints backed by shared byte queues. It
//! carries the canonical message framing unchanged and lets tests control
//! the transport through a [`Probe`]: block it, refuse new messages, limit
//! how many bytes get through, and see which messages an endpoint sent.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use nom::number::complete::be_u24;

use super::{RecordError, RecordLayer};
use crate::message::{Message, MessageType};

#[derive(Debug, Default)]
struct Pipe {
    bytes: VecDeque<u8>,
    closed: bool,
}

#[derive(Debug, Default)]
struct ProbeState {
    sent: Vec<MessageType>,
    received: Vec<MessageType>,
    blocked: bool,
    send_blocked: bool,
    budget: Option<usize>,
}

/// Controls and observes one [`MemoryRecord`] endpoint.
#[derive(Debug, Clone, Default)]
pub struct Probe(Arc<Mutex<ProbeState>>);

impl Probe {
    fn lock(&self) -> MutexGuard<'_, ProbeState> {
        // A panicking test thread must not hide the recorded state.
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Types of the messages the endpoint queued, in order.
    pub fn sent(&self) -> Vec<MessageType> {
        self.lock().sent.clone()
    }

    /// Types of the messages the endpoint received, in order.
    pub fn received(&self) -> Vec<MessageType> {
        self.lock().received.clone()
    }

    /// Forget the recorded message types.
    pub fn clear(&self) {
        let mut s = self.lock();
        s.sent.clear();
        s.received.clear();
    }

    /// While blocked, every flush and receive reports would-block.
    pub fn set_blocked(&self, blocked: bool) {
        self.lock().blocked = blocked;
    }

    /// While send-blocked, the endpoint refuses to queue new messages.
    pub fn set_send_blocked(&self, blocked: bool) {
        self.lock().send_blocked = blocked;
    }

    /// Limit the bytes the endpoint may still write. `None` is unlimited.
    pub fn set_budget(&self, budget: Option<usize>) {
        self.lock().budget = budget;
    }
}

/// One end of an in-process transport.
#[derive(Debug)]
pub struct MemoryRecord {
    outbox: VecDeque<u8>,
    tx: Arc<Mutex<Pipe>>,
    rx: Arc<Mutex<Pipe>>,
    probe: Probe,
}

/// Create two connected endpoints and their probes.
pub fn pair() -> ((MemoryRecord, Probe), (MemoryRecord, Probe)) {
    let a_to_b = Arc::new(Mutex::new(Pipe::default()));
    let b_to_a = Arc::new(Mutex::new(Pipe::default()));

    let a = MemoryRecord {
        outbox: VecDeque::new(),
        tx: a_to_b.clone(),
        rx: b_to_a.clone(),
        probe: Probe::default(),
    };
    let b = MemoryRecord {
        outbox: VecDeque::new(),
        tx: b_to_a,
        rx: a_to_b,
        probe: Probe::default(),
    };

    let (pa, pb) = (a.probe.clone(), b.probe.clone());
    ((a, pa), (b, pb))
}

fn lock(pipe: &Mutex<Pipe>) -> Result<MutexGuard<'_, Pipe>, RecordError> {
    pipe.lock()
        .map_err(|_| RecordError::Io("Pipe lock poisoned".into()))
}

impl RecordLayer for MemoryRecord {
    fn send_handshake_message(&mut self, message: &Message) -> Result<usize, RecordError> {
        if self.probe.lock().send_blocked {
            return Err(RecordError::WouldBlock);
        }

        let bytes = message
            .encode()
            .map_err(|e| RecordError::Io(e.to_string()))?;

        self.outbox.extend(bytes.iter());
        self.probe.lock().sent.push(message.message_type());

        Ok(bytes.len())
    }

    fn buffered_output(&self) -> usize {
        self.outbox.len()
    }

    fn flush(&mut self) -> Result<(), RecordError> {
        if self.outbox.is_empty() {
            return Ok(());
        }

        let mut probe = self.probe.lock();
        if probe.blocked {
            return Err(RecordError::WouldBlock);
        }

        let mut pipe = lock(&self.tx)?;
        if pipe.closed {
            return Err(RecordError::Closed);
        }

        let n = match probe.budget {
            Some(budget) => budget.min(self.outbox.len()),
            None => self.outbox.len(),
        };
        pipe.bytes.extend(self.outbox.drain(..n));
        if let Some(budget) = probe.budget.as_mut() {
            *budget -= n;
        }

        if self.outbox.is_empty() {
            Ok(())
        } else {
            Err(RecordError::WouldBlock)
        }
    }

    fn receive(&mut self) -> Result<Message, RecordError> {
        if self.probe.lock().blocked {
            return Err(RecordError::WouldBlock);
        }

        let mut pipe = lock(&self.rx)?;

        let mut header = [0u8; 4];
        if pipe.bytes.len() < 4 {
            return Err(if pipe.closed {
                RecordError::Closed
            } else {
                RecordError::WouldBlock
            });
        }
        for (i, b) in pipe.bytes.iter().take(4).enumerate() {
            header[i] = *b;
        }

        let (_, length) = be_u24::<_, nom::error::Error<&[u8]>>(&header[1..])
            .map_err(|_| RecordError::Decode("Bad header".into()))?;
        let total = 4 + length as usize;

        if pipe.bytes.len() < total {
            return Err(if pipe.closed {
                RecordError::Closed
            } else {
                RecordError::WouldBlock
            });
        }

        let framed: Vec<u8> = pipe.bytes.drain(..total).collect();
        drop(pipe);

        let message =
            Message::decode(&framed).map_err(|e| RecordError::Decode(e.to_string()))?;
        self.probe.lock().received.push(message.message_type());

        Ok(message)
    }
}

impl Drop for MemoryRecord {
    fn drop(&mut self) {
        if let Ok(mut pipe) = self.tx.lock() {
            pipe.closed = true;
        }
    }
}
