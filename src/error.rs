// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Errors a single command can run into.

use remain::sorted;
use thiserror::Error as ThisError;

/// A request-level error. The offending command is answered with an error response and the
/// command queue keeps working; see `crate::Error` for the fatal kind.
#[sorted]
#[derive(Debug, ThisError)]
pub enum VideoError {
    /// The codec backend refused or failed the request.
    #[error("backend failure: {0:#}")]
    BackendFailure(anyhow::Error),
    /// The request is not valid in the current stream state.
    #[error("invalid operation")]
    InvalidOperation,
    #[error("invalid parameter")]
    InvalidParameter,
    #[error("invalid resource ID {resource_id} for stream {stream_id}")]
    InvalidResourceId { stream_id: u32, resource_id: u32 },
    #[error("invalid stream ID {0}")]
    InvalidStreamId(u32),
    /// The host could not map a guest range in full.
    #[error("failed to map guest range {addr:#x}+{len:#x}")]
    MappingFailed { addr: u64, len: u32 },
    #[error("out of memory")]
    OutOfMemory,
    #[error("unsupported control {0:#x}")]
    UnsupportedControl(u32),
    #[error("unsupported memory type {0}")]
    UnsupportedMemoryType(u32),
}

pub type VideoResult<T> = Result<T, VideoError>;
