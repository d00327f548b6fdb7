// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Data structures for responses of virtio video devices.

use std::io;

use crate::capability::CapabilityTable;
use crate::command::QueueType;
use crate::control::QueryCtrlResponse;
use crate::descriptor::Writer;
use crate::error::VideoError;
use crate::params::Params;
use crate::protocol::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmdError {
    InvalidResourceId,
    InvalidStreamId,
    InvalidParameter,
    InvalidOperation,
    OutOfMemory,
    UnsupportedControl,
}

/// A response to a `VideoCmd`. These correspond to `VIRTIO_VIDEO_RESP_*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CmdResponse {
    NoData,
    QueryCapability(CapabilityTable),
    ResourceQueue {
        timestamp: u64,
        flags: u32,
        size: u32,
    },
    GetParams {
        queue_type: QueueType,
        params: Params,
    },
    QueryControl(QueryCtrlResponse),
    /// Raw value of the control.
    GetControl(u32),
    Error(CmdError),
}

impl From<VideoError> for CmdResponse {
    fn from(error: VideoError) -> Self {
        let cmd_error = match error {
            VideoError::InvalidResourceId { .. } => CmdError::InvalidResourceId,
            VideoError::InvalidStreamId(_) => CmdError::InvalidStreamId,
            VideoError::InvalidParameter | VideoError::UnsupportedMemoryType(_) => {
                CmdError::InvalidParameter
            }
            VideoError::UnsupportedControl(_) => CmdError::UnsupportedControl,
            VideoError::OutOfMemory => CmdError::OutOfMemory,
            VideoError::BackendFailure(_)
            | VideoError::InvalidOperation
            | VideoError::MappingFailed { .. } => CmdError::InvalidOperation,
        };
        CmdResponse::Error(cmd_error)
    }
}

impl CmdResponse {
    pub fn type_(&self) -> u32 {
        use CmdResponse::*;
        match self {
            NoData => VIRTIO_VIDEO_RESP_OK_NODATA,
            QueryCapability(_) => VIRTIO_VIDEO_RESP_OK_QUERY_CAPABILITY,
            ResourceQueue { .. } => VIRTIO_VIDEO_RESP_OK_RESOURCE_QUEUE,
            GetParams { .. } => VIRTIO_VIDEO_RESP_OK_GET_PARAMS,
            QueryControl(_) => VIRTIO_VIDEO_RESP_OK_QUERY_CONTROL,
            GetControl(_) => VIRTIO_VIDEO_RESP_OK_GET_CONTROL,
            Error(e) => match e {
                CmdError::InvalidResourceId => VIRTIO_VIDEO_RESP_ERR_INVALID_RESOURCE_ID,
                CmdError::InvalidStreamId => VIRTIO_VIDEO_RESP_ERR_INVALID_STREAM_ID,
                CmdError::InvalidParameter => VIRTIO_VIDEO_RESP_ERR_INVALID_PARAMETER,
                CmdError::InvalidOperation => VIRTIO_VIDEO_RESP_ERR_INVALID_OPERATION,
                CmdError::OutOfMemory => VIRTIO_VIDEO_RESP_ERR_OUT_OF_MEMORY,
                CmdError::UnsupportedControl => VIRTIO_VIDEO_RESP_ERR_UNSUPPORTED_CONTROL,
            },
        }
    }

    /// Writes the response for a command addressed to `stream_id` into the chain.
    ///
    /// Fails without writing anything past the header if the chain is too small, which the caller
    /// must treat as fatal for the command queue.
    pub fn write(&self, stream_id: u32, w: &mut Writer) -> io::Result<()> {
        use CmdResponse::*;

        let hdr = virtio_video_cmd_hdr {
            type_: Le32::from(self.type_()),
            stream_id: Le32::from(stream_id),
        };

        match self {
            NoData | Error(_) => w.write_obj(hdr),
            QueryCapability(table) => {
                w.write_obj(virtio_video_query_capability_resp {
                    hdr,
                    num_descs: Le32::from(table.num_descs()),
                    ..Default::default()
                })?;
                w.write_all(table.body())
            }
            ResourceQueue {
                timestamp,
                flags,
                size,
            } => w.write_obj(virtio_video_resource_queue_resp {
                hdr,
                timestamp: Le64::from(*timestamp),
                flags: Le32::from(*flags),
                size: Le32::from(*size),
            }),
            GetParams { queue_type, params } => {
                let params = params.to_virtio_video_params(*queue_type);
                w.write_obj(virtio_video_get_params_resp { hdr, params })
            }
            QueryControl(r) => {
                let mut body = Vec::new();
                r.encode(&mut body);
                w.write_obj(virtio_video_query_control_resp { hdr })?;
                w.write_all(&body)
            }
            GetControl(value) => {
                w.write_obj(hdr)?;
                w.write_obj(virtio_video_control_val {
                    value: Le32::from(*value),
                    ..Default::default()
                })
            }
        }
    }
}
