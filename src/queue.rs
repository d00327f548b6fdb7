// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The virtqueue seam between the device and its transport.

use log::error;

use crate::descriptor::DescriptorChain;

/// A guest-visible virtqueue as seen by the device.
pub trait VideoQueue: Send {
    /// Pops the next available chain, if any.
    fn pop(&mut self) -> Option<DescriptorChain>;

    /// Returns a chain to the guest as used, with `len` bytes written.
    fn add_used(&mut self, desc: DescriptorChain, len: u32);

    /// Gives a chain back to the guest without marking it used.
    fn detach(&mut self, desc: DescriptorChain);

    /// Notifies the guest that used buffers are available.
    fn trigger_interrupt(&mut self);
}

/// The command virtqueue together with its fatal-error state.
///
/// Once broken, the queue is left alone until the device is reset: malformed traffic from the
/// guest cannot be recovered from.
pub(crate) struct CommandQueue {
    queue: Box<dyn VideoQueue>,
    broken: bool,
}

impl CommandQueue {
    pub fn new(queue: Box<dyn VideoQueue>) -> Self {
        CommandQueue {
            queue,
            broken: false,
        }
    }

    pub fn mark_broken(&mut self, reason: &dyn std::fmt::Display) {
        if !self.broken {
            error!("command queue is broken: {}", reason);
            self.broken = true;
        }
    }

    pub fn pop(&mut self) -> Option<DescriptorChain> {
        if self.broken {
            return None;
        }
        self.queue.pop()
    }

    /// Returns a chain carrying a response to the guest. Once the queue is broken the chain is
    /// detached instead.
    pub fn complete(&mut self, desc: DescriptorChain) {
        if self.broken {
            self.queue.detach(desc);
            return;
        }
        let len = desc.writer.bytes_written() as u32;
        self.queue.add_used(desc, len);
    }

    pub fn detach(&mut self, desc: DescriptorChain) {
        self.queue.detach(desc);
    }

    pub fn trigger_interrupt(&mut self) {
        self.queue.trigger_interrupt();
    }
}
