// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Guest-facing control plane of a virtio video encoder or decoder.
//!
//! The device parses requests from the command virtqueue, keeps per-stream state and guest buffer
//! mappings, and hands the actual codec work to a [`VideoBackend`]. Asynchronous results come back
//! through a [`CompletionHandle`] and are answered on the command queue, or raised on the event
//! queue.

#[macro_use]
mod macros;

pub mod backend;
pub mod capability;
pub mod command;
pub mod config;
pub mod control;
pub mod descriptor;
mod device;
pub mod error;
pub mod event;
mod event_queue;
pub mod format;
pub mod params;
pub mod protocol;
pub mod queue;
mod reply;
pub mod resource;
pub mod response;
mod stream;
#[cfg(test)]
mod test_utils;
mod watchdog;
mod worker;

use std::io;

use remain::sorted;
use thiserror::Error as ThisError;

pub use crate::backend::BackendEvent;
pub use crate::backend::Completion;
pub use crate::backend::CompletionHandle;
pub use crate::backend::VideoBackend;
pub use crate::backend::WorkRequest;
pub use crate::command::QueueType;
use crate::command::ReadCmdError;
pub use crate::config::VideoBackendType;
pub use crate::config::VideoDeviceConfig;
pub use crate::config::VideoDeviceType;
pub use crate::descriptor::DescriptorChain;
pub use crate::device::VideoDevice;
pub use crate::error::VideoError;
pub use crate::error::VideoResult;
pub use crate::queue::VideoQueue;
pub use crate::resource::GuestMemoryMapper;

/// An error that leaves the command queue unusable until the device is reset.
#[sorted]
#[derive(Debug, ThisError)]
pub enum Error {
    /// Failed to read a command from the guest.
    #[error("failed to read a command from the guest: {0}")]
    ReadFailure(ReadCmdError),
    /// The response does not fit in the chain the guest provided.
    #[error("failed to write the response to descriptor {index}: {error}")]
    WriteResponse { index: u16, error: io::Error },
}

pub type Result<T> = std::result::Result<T, Error>;
