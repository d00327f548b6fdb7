// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Data structures for commands of virtio video devices.

use std::io;

use enumn::N;
use log::error;
use remain::sorted;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error as ThisError;

use crate::control::*;
use crate::descriptor::Reader;
use crate::error::VideoError;
use crate::format::*;
use crate::params::MemoryType;
use crate::params::Params;
use crate::protocol::*;
use crate::resource::GuestMemEntry;

/// An error indicating a failure while reading a request from the guest.
#[sorted]
#[derive(Debug, ThisError)]
pub enum ReadCmdError {
    /// The request was well formed but names something invalid. Answered with an error response.
    #[error("invalid request for stream {stream_id}: {error}")]
    InvalidRequest { stream_id: u32, error: VideoError },
    /// Failed to read an object; the request is truncated.
    #[error("failed to read object: {0}")]
    IoError(#[from] io::Error),
}

#[derive(PartialEq, Eq, PartialOrd, Ord, N, Clone, Copy, Debug, Serialize, Deserialize)]
#[repr(u32)]
pub enum QueueType {
    Input = VIRTIO_VIDEO_QUEUE_TYPE_INPUT,
    Output = VIRTIO_VIDEO_QUEUE_TYPE_OUTPUT,
}
impl_try_from_u32_for_enumn!(QueueType, "queue_type");

#[derive(Debug)]
pub enum VideoCmd {
    QueryCapability {
        /// Echoed in the response; the query is not addressed to a stream.
        stream_id: u32,
        queue_type: QueueType,
    },
    StreamCreate {
        stream_id: u32,
        coded_format: Format,
        input_mem_type: MemoryType,
        output_mem_type: MemoryType,
        /// Guest-provided debug name.
        tag: String,
    },
    StreamDestroy {
        stream_id: u32,
    },
    StreamDrain {
        stream_id: u32,
    },
    ResourceCreate {
        stream_id: u32,
        queue_type: QueueType,
        resource_id: u32,
        planes_layout: u32,
        plane_offsets: Vec<u32>,
        /// One entry per memory plane, each holding the scatter-gather list of that plane.
        plane_entries: Vec<Vec<GuestMemEntry>>,
    },
    ResourceQueue {
        stream_id: u32,
        queue_type: QueueType,
        resource_id: u32,
        timestamp: u64,
        data_sizes: Vec<u32>,
    },
    ResourceDestroyAll {
        stream_id: u32,
        queue_type: QueueType,
    },
    QueueClear {
        stream_id: u32,
        queue_type: QueueType,
    },
    GetParams {
        stream_id: u32,
        queue_type: QueueType,
    },
    SetParams {
        stream_id: u32,
        queue_type: QueueType,
        params: Params,
    },
    QueryControl {
        stream_id: u32,
        query_ctrl_type: QueryCtrlType,
    },
    GetControl {
        stream_id: u32,
        ctrl_type: CtrlType,
    },
    SetControl {
        stream_id: u32,
        ctrl_val: CtrlVal,
    },
}

impl VideoCmd {
    /// Reads a request on the command virtqueue and constructs a `VideoCmd` value.
    pub fn from_reader(r: &mut Reader) -> Result<Self, ReadCmdError> {
        use self::VideoCmd::*;

        let hdr = r.read_obj::<virtio_video_cmd_hdr>()?;
        let cmd_type = hdr.type_.get();
        let stream_id = hdr.stream_id.get();
        let invalid = |error: VideoError| ReadCmdError::InvalidRequest { stream_id, error };

        Ok(match cmd_type {
            VIRTIO_VIDEO_CMD_QUERY_CAPABILITY => {
                let virtio_video_query_capability { queue_type, .. } = r.read_obj()?;
                QueryCapability {
                    stream_id,
                    queue_type: queue_type.try_into().map_err(invalid)?,
                }
            }
            VIRTIO_VIDEO_CMD_STREAM_CREATE => {
                let virtio_video_stream_create {
                    in_mem_type,
                    out_mem_type,
                    coded_format,
                    tag,
                    ..
                } = r.read_obj()?;
                let tag_len = tag.iter().position(|&c| c == 0).unwrap_or(tag.len());
                StreamCreate {
                    stream_id,
                    coded_format: coded_format.try_into().map_err(invalid)?,
                    input_mem_type: in_mem_type.try_into().map_err(invalid)?,
                    output_mem_type: out_mem_type.try_into().map_err(invalid)?,
                    tag: String::from_utf8_lossy(&tag[..tag_len]).into_owned(),
                }
            }
            VIRTIO_VIDEO_CMD_STREAM_DESTROY => StreamDestroy { stream_id },
            VIRTIO_VIDEO_CMD_STREAM_DRAIN => StreamDrain { stream_id },
            VIRTIO_VIDEO_CMD_RESOURCE_CREATE => {
                let virtio_video_resource_create {
                    queue_type,
                    resource_id,
                    planes_layout,
                    num_planes,
                    plane_offsets,
                    num_entries,
                } = r.read_obj()?;

                let queue_type: QueueType = queue_type.try_into().map_err(invalid)?;
                let num_planes = num_planes.get();
                if num_planes == 0 || num_planes > VIRTIO_VIDEO_MAX_PLANES {
                    error!(
                        "resource_create: num_planes is {} but must be within 1..={}",
                        num_planes, VIRTIO_VIDEO_MAX_PLANES
                    );
                    return Err(invalid(VideoError::InvalidParameter));
                }
                let num_planes = num_planes as usize;

                let plane_offsets = plane_offsets[..num_planes]
                    .iter()
                    .map(|x| x.get())
                    .collect::<Vec<u32>>();

                // The entries follow the fixed part, in plane order, wherever the guest split the
                // chain.
                let plane_entries = num_entries[..num_planes]
                    .iter()
                    .map(|n| -> io::Result<Vec<GuestMemEntry>> {
                        let entries = r.read_objs::<virtio_video_mem_entry>(n.get() as usize)?;
                        Ok(entries.iter().map(GuestMemEntry::from).collect())
                    })
                    .collect::<io::Result<Vec<_>>>()?;

                ResourceCreate {
                    stream_id,
                    queue_type,
                    resource_id: resource_id.get(),
                    planes_layout: planes_layout.get(),
                    plane_offsets,
                    plane_entries,
                }
            }
            VIRTIO_VIDEO_CMD_RESOURCE_QUEUE => {
                let virtio_video_resource_queue {
                    queue_type,
                    resource_id,
                    timestamp,
                    num_data_sizes,
                    data_sizes,
                    ..
                } = r.read_obj()?;

                let num_data_sizes = num_data_sizes.get() as usize;
                if num_data_sizes > data_sizes.len() {
                    error!("resource_queue: {} data sizes is too many", num_data_sizes);
                    return Err(invalid(VideoError::InvalidParameter));
                }
                let data_sizes = data_sizes[..num_data_sizes]
                    .iter()
                    .map(|x| x.get())
                    .collect::<Vec<u32>>();
                ResourceQueue {
                    stream_id,
                    queue_type: queue_type.try_into().map_err(invalid)?,
                    resource_id: resource_id.get(),
                    timestamp: timestamp.get(),
                    data_sizes,
                }
            }
            VIRTIO_VIDEO_CMD_RESOURCE_DESTROY_ALL => {
                let virtio_video_resource_destroy_all { queue_type, .. } = r.read_obj()?;
                ResourceDestroyAll {
                    stream_id,
                    queue_type: queue_type.try_into().map_err(invalid)?,
                }
            }
            VIRTIO_VIDEO_CMD_QUEUE_CLEAR => {
                let virtio_video_queue_clear { queue_type, .. } = r.read_obj()?;
                QueueClear {
                    stream_id,
                    queue_type: queue_type.try_into().map_err(invalid)?,
                }
            }
            VIRTIO_VIDEO_CMD_GET_PARAMS => {
                let virtio_video_get_params { queue_type, .. } = r.read_obj()?;
                GetParams {
                    stream_id,
                    queue_type: queue_type.try_into().map_err(invalid)?,
                }
            }
            VIRTIO_VIDEO_CMD_SET_PARAMS => {
                let virtio_video_set_params { params } = r.read_obj()?;
                let (queue_type, params) =
                    Params::from_virtio_video_params(&params).map_err(invalid)?;
                SetParams {
                    stream_id,
                    queue_type,
                    params,
                }
            }
            VIRTIO_VIDEO_CMD_QUERY_CONTROL => {
                let virtio_video_query_control { control, .. } = r.read_obj()?;
                let query_ctrl_type = match control.get() {
                    VIRTIO_VIDEO_CONTROL_PROFILE => {
                        let body = r.read_obj::<virtio_video_query_control_profile>()?;
                        QueryCtrlType::Profile(body.format.try_into().map_err(invalid)?)
                    }
                    VIRTIO_VIDEO_CONTROL_LEVEL => {
                        let body = r.read_obj::<virtio_video_query_control_level>()?;
                        QueryCtrlType::Level(body.format.try_into().map_err(invalid)?)
                    }
                    t => return Err(invalid(VideoError::UnsupportedControl(t))),
                };
                QueryControl {
                    stream_id,
                    query_ctrl_type,
                }
            }
            VIRTIO_VIDEO_CMD_GET_CONTROL => {
                let virtio_video_get_control { control, .. } = r.read_obj()?;
                let ctrl_type = CtrlType::n(control.get())
                    .ok_or_else(|| invalid(VideoError::UnsupportedControl(control.get())))?;
                GetControl {
                    stream_id,
                    ctrl_type,
                }
            }
            VIRTIO_VIDEO_CMD_SET_CONTROL => {
                let virtio_video_set_control { control, .. } = r.read_obj()?;
                let virtio_video_control_val { value, .. } = r.read_obj()?;
                let ctrl_type = CtrlType::n(control.get())
                    .ok_or_else(|| invalid(VideoError::UnsupportedControl(control.get())))?;
                SetControl {
                    stream_id,
                    ctrl_val: CtrlVal::from_raw(ctrl_type, value.get()).map_err(invalid)?,
                }
            }
            _ => {
                error!("unsupported command type {:#x}", cmd_type);
                return Err(invalid(VideoError::InvalidOperation));
            }
        })
    }

    /// Stream id of the request header, which the response carries back.
    pub fn stream_id(&self) -> u32 {
        use self::VideoCmd::*;
        match self {
            QueryCapability { stream_id, .. }
            | QueryControl { stream_id, .. }
            | StreamCreate { stream_id, .. }
            | StreamDestroy { stream_id }
            | StreamDrain { stream_id }
            | ResourceCreate { stream_id, .. }
            | ResourceQueue { stream_id, .. }
            | ResourceDestroyAll { stream_id, .. }
            | QueueClear { stream_id, .. }
            | GetParams { stream_id, .. }
            | SetParams { stream_id, .. }
            | GetControl { stream_id, .. }
            | SetControl { stream_id, .. } => *stream_id,
        }
    }
}
