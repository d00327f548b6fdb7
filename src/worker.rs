// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The device's message thread. It always applies backend completions; with an I/O thread
//! configured it also serves the queue notifications.

use std::io;
use std::sync::mpsc::Receiver;
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread;
use std::thread::JoinHandle;

use log::info;

use crate::backend::BackendEvent;
use crate::device::DeviceShared;

/// Everything the device reacts to, funneled through one channel.
#[derive(Debug)]
pub(crate) enum WorkerMsg {
    /// The guest made command buffers available.
    CmdQueue,
    /// The guest posted event buffers.
    EventQueue,
    Backend(BackendEvent),
    /// Acknowledged once every message sent before it has been handled.
    Barrier(Sender<()>),
    Kill,
}

struct Worker {
    shared: Arc<DeviceShared>,
    receiver: Receiver<WorkerMsg>,
}

impl Worker {
    fn run(self) {
        while let Ok(msg) = self.receiver.recv() {
            if !self.shared.handle_msg(msg) {
                break;
            }
        }
        info!("video worker stopped");
    }
}

/// Starts the message thread. It runs until it receives `WorkerMsg::Kill`.
pub(crate) fn spawn(
    name: String,
    shared: Arc<DeviceShared>,
    receiver: Receiver<WorkerMsg>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(name)
        .spawn(move || Worker { shared, receiver }.run())
}
