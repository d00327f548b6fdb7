// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Tickets for commands whose response is sent after the command has been processed.

use std::io;
use std::thread;

use log::error;

use crate::descriptor::DescriptorChain;
use crate::response::CmdResponse;

/// Panics in debug builds when dropped armed, i.e. when a ticket was never answered.
struct ResolveGuard {
    stream_id: u32,
    index: u16,
    armed: bool,
}

impl Drop for ResolveGuard {
    fn drop(&mut self) {
        if self.armed {
            error!(
                "stream {}: descriptor {} dropped without a response",
                self.stream_id, self.index
            );
            if !thread::panicking() {
                debug_assert!(false, "unanswered command descriptor {}", self.index);
            }
        }
    }
}

/// The descriptor chain of a command that will be answered later.
///
/// A ticket is consumed by `complete`, so it can be answered only once. Dropping it unanswered is
/// a bug and is reported.
pub struct PendingReply {
    stream_id: u32,
    desc: DescriptorChain,
    guard: ResolveGuard,
}

impl PendingReply {
    pub fn new(stream_id: u32, desc: DescriptorChain) -> Self {
        PendingReply {
            stream_id,
            guard: ResolveGuard {
                stream_id,
                index: desc.index,
                armed: true,
            },
            desc,
        }
    }

    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }

    /// Writes `response` into the chain and hands the chain back for the used ring.
    ///
    /// A write error means the guest gave a chain too small for the response.
    pub fn complete(self, response: &CmdResponse) -> (DescriptorChain, io::Result<()>) {
        let PendingReply {
            stream_id,
            mut desc,
            mut guard,
        } = self;
        guard.armed = false;
        let res = response.write(stream_id, &mut desc.writer);
        (desc, res)
    }
}

impl std::fmt::Debug for PendingReply {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("PendingReply")
            .field("stream_id", &self.stream_id)
            .field("index", &self.desc.index)
            .finish()
    }
}

/// A response ready to be sent, with the ticket it answers.
pub type Reply = (PendingReply, CmdResponse);
