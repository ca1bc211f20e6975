//! Message transport between the gateway and its clients
//!
//! Two logical channels run over the wireless link: the ELM327 channel
//! (queries in, responses out) and the console channel (operator commands in,
//! notifications out). Each direction is a bounded FIFO that drops the oldest
//! message when full, so a stalled client can never block the bus loop.

use std::collections::VecDeque;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outbound {
    /// ELM327 responses
    Elm,
    /// Notifications, newline terminated
    Console,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Inbound {
    /// ELM327 queries
    Elm,
    /// Operator commands
    Console,
}

pub trait Transport {
    /// Queue a message, evicting the oldest when full
    fn enqueue(&mut self, channel: Outbound, text: String);

    /// Next inbound message, if any
    fn try_dequeue(&mut self, channel: Inbound) -> Option<String>;

    /// Messages evicted from an outbound channel so far
    fn dropped(&self, _channel: Outbound) -> u64 {
        0
    }
}

/// FIFO with a fixed capacity that evicts the oldest entry
#[derive(Debug, Clone)]
pub struct BoundedQueue<T> {
    items: VecDeque<T>,
    capacity: usize,
    dropped: u64,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
            dropped: 0,
        }
    }

    /// Append, returning the evicted entry if the queue was full
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() >= self.capacity {
            self.dropped += 1;
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    pub fn pop(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}

/// In-process transport backed by four bounded queues
#[derive(Debug, Clone)]
pub struct QueueTransport {
    elm_out: BoundedQueue<String>,
    console_out: BoundedQueue<String>,
    elm_in: BoundedQueue<String>,
    console_in: BoundedQueue<String>,
}

impl QueueTransport {
    pub fn new(capacity: usize) -> Self {
        Self {
            elm_out: BoundedQueue::new(capacity),
            console_out: BoundedQueue::new(capacity),
            elm_in: BoundedQueue::new(capacity),
            console_in: BoundedQueue::new(capacity),
        }
    }

    fn outbound(&mut self, channel: Outbound) -> &mut BoundedQueue<String> {
        match channel {
            Outbound::Elm => &mut self.elm_out,
            Outbound::Console => &mut self.console_out,
        }
    }

    fn inbound(&mut self, channel: Inbound) -> &mut BoundedQueue<String> {
        match channel {
            Inbound::Elm => &mut self.elm_in,
            Inbound::Console => &mut self.console_in,
        }
    }

    /// Deliver a message from a client
    pub fn push_inbound(&mut self, channel: Inbound, text: String) {
        let queue = self.inbound(channel);
        if queue.push(text).is_some() {
            debug!(
                "Inbound {:?} queue full ({}), oldest message dropped",
                channel,
                queue.capacity()
            );
        }
    }

    /// Take the next message for a client
    pub fn pop_outbound(&mut self, channel: Outbound) -> Option<String> {
        self.outbound(channel).pop()
    }

    /// Messages waiting for a client
    pub fn pending(&self, channel: Outbound) -> usize {
        match channel {
            Outbound::Elm => self.elm_out.len(),
            Outbound::Console => self.console_out.len(),
        }
    }

    /// Drain every waiting message for a client
    pub fn drain_outbound(&mut self, channel: Outbound) -> Vec<String> {
        let queue = self.outbound(channel);
        std::iter::from_fn(|| queue.pop()).collect()
    }
}

impl Transport for QueueTransport {
    fn enqueue(&mut self, channel: Outbound, mut text: String) {
        if channel == Outbound::Console && !text.ends_with('\n') {
            text.push('\n');
        }
        let queue = self.outbound(channel);
        if queue.push(text).is_some() {
            debug!(
                "Outbound {:?} queue full ({}), oldest message dropped",
                channel,
                queue.capacity()
            );
        }
    }

    fn try_dequeue(&mut self, channel: Inbound) -> Option<String> {
        self.inbound(channel).pop()
    }

    fn dropped(&self, channel: Outbound) -> u64 {
        match channel {
            Outbound::Elm => self.elm_out.dropped(),
            Outbound::Console => self.console_out.dropped(),
        }
    }
}
