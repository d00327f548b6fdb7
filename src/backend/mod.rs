// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The interface that codec engines implement to provide encoding or decoding to the guest.
//!
//! The device calls into the backend from its command-processing context only, never while
//! holding a stream lock. The backend reports asynchronous results through a
//! [`CompletionHandle`], which posts them to the device's message channel; the device applies
//! them later on its own context.

use std::sync::mpsc::Sender;
use std::sync::Arc;

use log::warn;

use crate::capability::Capability;
use crate::command::QueueType;
use crate::control::CtrlType;
use crate::control::CtrlVal;
use crate::control::QueryCtrlResponse;
use crate::control::QueryCtrlType;
use crate::error::VideoError;
use crate::error::VideoResult;
use crate::format::Format;
use crate::params::MemoryType;
use crate::params::Params;
use crate::resource::Resource;
use crate::worker::WorkerMsg;

pub mod null;

/// Whether a stream-wide request finished during the call or will be acknowledged later through
/// the completion handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Done,
    Pending,
}

/// Something the backend tells the device about a stream, after the call that caused it returned.
#[derive(Debug)]
pub enum BackendEvent {
    /// The buffer of a `queue_resource` call has been processed.
    BufferDone {
        stream_id: u32,
        queue_type: QueueType,
        resource_id: u32,
        timestamp: u64,
        flags: u32,
        size: u32,
    },
    /// Decoding of a frame started.
    FrameStarted {
        stream_id: u32,
        frame_id: u32,
        timestamp: u64,
    },
    /// A frame announced by `FrameStarted` is available and goes into the oldest output buffer.
    FrameReady {
        stream_id: u32,
        frame_id: u32,
        flags: u32,
        size: u32,
    },
    DrainDone {
        stream_id: u32,
        result: VideoResult<()>,
    },
    ClearDone {
        stream_id: u32,
        result: VideoResult<()>,
    },
    /// A stream whose destruction was pending has been fully released.
    StreamReleased { stream_id: u32 },
    /// The decoder found new output parameters in the bitstream.
    ResolutionChanged { stream_id: u32, output: Params },
    /// The stream hit an unrecoverable error.
    Error { stream_id: u32 },
}

impl BackendEvent {
    pub fn stream_id(&self) -> u32 {
        use BackendEvent::*;
        match self {
            BufferDone { stream_id, .. }
            | FrameStarted { stream_id, .. }
            | FrameReady { stream_id, .. }
            | DrainDone { stream_id, .. }
            | ClearDone { stream_id, .. }
            | StreamReleased { stream_id }
            | ResolutionChanged { stream_id, .. }
            | Error { stream_id } => *stream_id,
        }
    }
}

/// Posts backend events to the device. Never touches device state itself, so it can be used from
/// any thread, including from inside a backend call.
#[derive(Clone, Debug)]
pub struct CompletionHandle {
    sender: Sender<WorkerMsg>,
}

impl CompletionHandle {
    pub(crate) fn new(sender: Sender<WorkerMsg>) -> Self {
        CompletionHandle { sender }
    }

    pub fn post(&self, event: BackendEvent) {
        if let Err(e) = self.sender.send(WorkerMsg::Backend(event)) {
            warn!("device is gone, dropping backend event {:?}", e.0);
        }
    }
}

/// A `queue_resource` request.
#[derive(Debug, Clone)]
pub struct WorkRequest {
    pub stream_id: u32,
    pub queue_type: QueueType,
    pub resource: Arc<Resource>,
    pub timestamp: u64,
    pub data_sizes: Vec<u32>,
}

/// A codec engine.
pub trait VideoBackend: Send + Sync {
    /// Formats, frame sizes and controls the engine supports. Called once at realize.
    fn capabilities(&self) -> Capability;

    /// Gives the backend the handle to report asynchronous results with.
    fn attach(&self, handle: CompletionHandle);

    fn create_stream(
        &self,
        stream_id: u32,
        coded_format: Format,
        input_mem_type: MemoryType,
        output_mem_type: MemoryType,
    ) -> VideoResult<()>;

    /// `Pending` means the stream is released later, see `stream_released`.
    fn destroy_stream(&self, stream_id: u32) -> VideoResult<Completion>;

    /// Processes everything queued so far. `Pending` is acknowledged with `DrainDone`.
    ///
    /// Called with the device lock held, so it must not block on the codec. Work that takes time
    /// returns `Pending` and reports through the `CompletionHandle`.
    fn drain_stream(&self, stream_id: u32) -> VideoResult<Completion>;

    /// Always completes asynchronously with `BufferDone` or a frame, or is cancelled by a clear.
    fn queue_resource(&self, request: WorkRequest) -> VideoResult<()>;

    fn destroy_all_resources(&self, stream_id: u32, queue_type: QueueType) -> VideoResult<()>;

    /// Drops every buffer queued on one side. `Pending` is acknowledged with `ClearDone`.
    ///
    /// Like `drain_stream`, this runs under the device lock and must not block.
    fn clear_queue(&self, stream_id: u32, queue_type: QueueType) -> VideoResult<Completion>;

    /// Returns the parameters to report for a queue, starting from what the device knows.
    fn get_params(&self, _stream_id: u32, _queue_type: QueueType, current: Params) -> Params {
        current
    }

    /// Applies the parameters and returns the ones actually in effect.
    fn set_params(
        &self,
        stream_id: u32,
        queue_type: QueueType,
        params: Params,
    ) -> VideoResult<Params>;

    fn query_control(
        &self,
        capability: &Capability,
        query: &QueryCtrlType,
    ) -> VideoResult<QueryCtrlResponse> {
        capability.query_control(query)
    }

    fn get_control(&self, _stream_id: u32, ctrl_type: CtrlType) -> VideoResult<CtrlVal> {
        Err(VideoError::UnsupportedControl(ctrl_type as u32))
    }

    fn set_control(&self, _stream_id: u32, ctrl_val: CtrlVal) -> VideoResult<()> {
        Err(VideoError::UnsupportedControl(ctrl_val.ctrl_type() as u32))
    }

    /// Polled for streams whose `destroy_stream` returned `Pending`.
    fn stream_released(&self, _stream_id: u32) -> bool {
        true
    }
}
