// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Parameters negotiated for each queue of a stream.

use enumn::N;
use log::error;
use serde::Deserialize;
use serde::Serialize;

use crate::command::QueueType;
use crate::error::VideoError;
use crate::error::VideoResult;
use crate::format::Crop;
use crate::format::Format;
use crate::format::PlaneFormat;
use crate::protocol::*;

/// How the guest backs the buffers of a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, N, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[repr(u32)]
pub enum MemoryType {
    GuestPages = VIRTIO_VIDEO_MEM_TYPE_GUEST_PAGES,
    /// Recognized on the wire, but resources of this type cannot be created.
    VirtioObject = VIRTIO_VIDEO_MEM_TYPE_VIRTIO_OBJECT,
}
impl_try_from_u32_for_enumn!(MemoryType, "memory type");

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Params {
    pub format: Option<Format>,
    pub frame_width: u32,
    pub frame_height: u32,
    pub min_buffers: u32,
    pub max_buffers: u32,
    pub crop: Crop,
    pub frame_rate: u32,
    pub plane_formats: Vec<PlaneFormat>,
}

impl Params {
    /// Parses the body of a SET_PARAMS request. The queue type travels inside the params.
    pub fn from_virtio_video_params(params: &virtio_video_params) -> VideoResult<(QueueType, Self)> {
        let queue_type = QueueType::try_from(params.queue_type)?;
        let num_planes = params.num_planes.get();
        if num_planes > VIRTIO_VIDEO_MAX_PLANES {
            error!("set_params: {} planes exceeds the maximum", num_planes);
            return Err(VideoError::InvalidParameter);
        }
        let format = Format::try_from(params.format)?;
        let plane_formats = params.plane_formats[..num_planes as usize]
            .iter()
            .map(|p| PlaneFormat::from(*p))
            .collect();
        Ok((
            queue_type,
            Params {
                format: Some(format),
                frame_width: params.frame_width.get(),
                frame_height: params.frame_height.get(),
                min_buffers: params.min_buffers.get(),
                max_buffers: params.max_buffers.get(),
                crop: params.crop.into(),
                frame_rate: params.frame_rate.get(),
                plane_formats,
            },
        ))
    }

    pub fn to_virtio_video_params(&self, queue_type: QueueType) -> virtio_video_params {
        let mut plane_formats: [virtio_video_plane_format; 8] = Default::default();
        for (dst, src) in plane_formats.iter_mut().zip(self.plane_formats.iter()) {
            *dst = (*src).into();
        }
        virtio_video_params {
            queue_type: Le32::from(queue_type as u32),
            format: Le32::from(self.format.map(|f| f as u32).unwrap_or(0)),
            frame_width: Le32::from(self.frame_width),
            frame_height: Le32::from(self.frame_height),
            min_buffers: Le32::from(self.min_buffers),
            max_buffers: Le32::from(self.max_buffers),
            crop: self.crop.into(),
            frame_rate: Le32::from(self.frame_rate),
            num_planes: Le32::from(self.plane_formats.len().min(plane_formats.len()) as u32),
            plane_formats,
        }
    }
}

/// State of one direction of a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueInfo {
    pub mem_type: MemoryType,
    pub params: Params,
    /// Whether the guest has explicitly set the params at least once.
    pub set: bool,
}

impl QueueInfo {
    pub fn new(mem_type: MemoryType, params: Params) -> Self {
        QueueInfo {
            mem_type,
            params,
            set: false,
        }
    }
}
