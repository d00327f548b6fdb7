// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Pairing of device events with the receive buffers the guest posts on the event queue.

use std::collections::VecDeque;

use log::error;
use log::warn;

use crate::descriptor::DescriptorChain;
use crate::event::VideoEvt;
use crate::queue::VideoQueue;

/// Raised events and posted buffers, matched in FIFO order.
///
/// At any time at most one of the two queues is non-empty: an event arriving while buffers are
/// held consumes the oldest buffer, and a buffer arriving while events are pending carries the
/// oldest event.
#[derive(Default)]
pub struct EventDelivery {
    pending_events: VecDeque<VideoEvt>,
    buffers: VecDeque<DescriptorChain>,
}

impl EventDelivery {
    pub fn new() -> Self {
        Default::default()
    }

    /// Queues `event`, returning a filled buffer if one was waiting.
    pub fn raise(&mut self, event: VideoEvt) -> Option<DescriptorChain> {
        match self.buffers.pop_front() {
            Some(desc) => Some(Self::fill(desc, &event)),
            None => {
                self.pending_events.push_back(event);
                None
            }
        }
    }

    /// Accepts a guest buffer, returning it filled if an event was waiting.
    pub fn post_buffer(&mut self, desc: DescriptorChain) -> Option<DescriptorChain> {
        match self.pending_events.pop_front() {
            Some(event) => Some(Self::fill(desc, &event)),
            None => {
                self.buffers.push_back(desc);
                None
            }
        }
    }

    fn fill(mut desc: DescriptorChain, event: &VideoEvt) -> DescriptorChain {
        if let Err(e) = event.write(&mut desc.writer) {
            // The guest posted a buffer smaller than an event; the event is lost.
            error!("failed to write event {:?}: {}", event, e);
        }
        desc
    }

    /// Drops undelivered events of a stream that is going away.
    pub fn discard_stream(&mut self, stream_id: u32) {
        let before = self.pending_events.len();
        self.pending_events.retain(|e| e.stream_id != stream_id);
        let dropped = before - self.pending_events.len();
        if dropped > 0 {
            warn!("dropped {} undelivered events of stream {}", dropped, stream_id);
        }
    }

    /// Discards every pending event and hands back the held buffers unfilled.
    pub fn teardown(&mut self) -> Vec<DescriptorChain> {
        self.pending_events.clear();
        self.buffers.drain(..).collect()
    }

    #[cfg(test)]
    pub fn num_pending_events(&self) -> usize {
        self.pending_events.len()
    }

    #[cfg(test)]
    pub fn num_held_buffers(&self) -> usize {
        self.buffers.len()
    }
}

/// The event virtqueue together with its pairing state.
pub(crate) struct EventQueue {
    queue: Box<dyn VideoQueue>,
    delivery: EventDelivery,
}

impl EventQueue {
    pub fn new(queue: Box<dyn VideoQueue>) -> Self {
        EventQueue {
            queue,
            delivery: EventDelivery::new(),
        }
    }

    fn complete(&mut self, desc: DescriptorChain) {
        let len = desc.writer.bytes_written() as u32;
        self.queue.add_used(desc, len);
        self.queue.trigger_interrupt();
    }

    pub fn raise(&mut self, event: VideoEvt) {
        if let Some(desc) = self.delivery.raise(event) {
            self.complete(desc);
        }
    }

    /// Takes every buffer the guest has posted since the last call.
    pub fn handle_available(&mut self) {
        while let Some(desc) = self.queue.pop() {
            if let Some(desc) = self.delivery.post_buffer(desc) {
                self.complete(desc);
            }
        }
    }

    pub fn discard_stream(&mut self, stream_id: u32) {
        self.delivery.discard_stream(stream_id);
    }

    pub fn teardown(&mut self) {
        for desc in self.delivery.teardown() {
            self.queue.detach(desc);
        }
    }
}
