// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Device configuration.

use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;
use serde_keyvalue::from_key_values;

use crate::command::QueueType;
use crate::format::Format;
use crate::params::MemoryType;
use crate::protocol::*;

pub const QUEUE_SIZES: &[u16] = &[VIRTIO_VIDEO_QUEUE_SIZE, VIRTIO_VIDEO_QUEUE_SIZE];

/// Which side of the codec the device exposes.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub enum VideoDeviceType {
    #[serde(rename = "v4l2-enc")]
    Encoder,
    #[serde(rename = "v4l2-dec")]
    Decoder,
}

impl VideoDeviceType {
    pub fn device_id(self) -> u32 {
        match self {
            VideoDeviceType::Encoder => VIRTIO_ID_VIDEO_ENC,
            VideoDeviceType::Decoder => VIRTIO_ID_VIDEO_DEC,
        }
    }

    /// The queue carrying the bitstream.
    pub fn coded_queue(self) -> QueueType {
        match self {
            VideoDeviceType::Encoder => QueueType::Output,
            VideoDeviceType::Decoder => QueueType::Input,
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum VideoBackendType {
    Vaapi,
    Ffmpeg,
    Gstreamer,
    MediaSdk,
    /// Built-in backend that produces no data; see `backend::null`.
    Null,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlanesLayout {
    SingleBuffer,
    PerPlane,
}

impl PlanesLayout {
    pub fn to_raw(self) -> u32 {
        match self {
            PlanesLayout::SingleBuffer => VIRTIO_VIDEO_PLANES_LAYOUT_SINGLE_BUFFER,
            PlanesLayout::PerPlane => VIRTIO_VIDEO_PLANES_LAYOUT_PER_PLANE,
        }
    }
}

/// How resources with a missing or invalid planes layout are fixed up, and whether output
/// resources get a contiguous remapping.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct PlanesLayoutPolicy {
    pub guest_pages: PlanesLayout,
    pub virtio_object: PlanesLayout,
    /// Formats whose buffers are always laid out as a single buffer.
    pub single_buffer_formats: Vec<Format>,
    pub remap_output: bool,
}

impl Default for PlanesLayoutPolicy {
    fn default() -> Self {
        PlanesLayoutPolicy {
            guest_pages: PlanesLayout::PerPlane,
            virtio_object: PlanesLayout::SingleBuffer,
            single_buffer_formats: vec![Format::NV12],
            remap_output: true,
        }
    }
}

impl PlanesLayoutPolicy {
    /// Returns `requested` if it names a layout, otherwise the policy's choice for a resource of
    /// `format` backed by `mem_type`.
    pub fn normalize(&self, requested: u32, mem_type: MemoryType, format: Format) -> u32 {
        if requested == VIRTIO_VIDEO_PLANES_LAYOUT_SINGLE_BUFFER
            || requested == VIRTIO_VIDEO_PLANES_LAYOUT_PER_PLANE
        {
            return requested;
        }
        let layout = if self.single_buffer_formats.contains(&format) {
            PlanesLayout::SingleBuffer
        } else {
            match mem_type {
                MemoryType::GuestPages => self.guest_pages,
                MemoryType::VirtioObject => self.virtio_object,
            }
        };
        log::debug!(
            "planes layout {:#x} fixed up to {:?} for {} buffers",
            requested,
            layout,
            format
        );
        layout.to_raw()
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct VideoDeviceConfig {
    pub model: VideoDeviceType,
    pub backend: VideoBackendType,
    /// Name of a dedicated I/O thread. Without one, queue notifications are handled on the
    /// caller's thread.
    #[serde(default)]
    pub iothread: Option<String>,
    #[serde(default)]
    pub planes_layout: PlanesLayoutPolicy,
}

impl VideoDeviceConfig {
    pub fn new(model: VideoDeviceType, backend: VideoBackendType) -> Self {
        VideoDeviceConfig {
            model,
            backend,
            iothread: None,
            planes_layout: Default::default(),
        }
    }
}

/// Virtio features offered to the guest.
pub fn supported_virtio_features() -> u64 {
    1u64 << VIRTIO_VIDEO_F_RESOURCE_GUEST_PAGES | 1u64 << VIRTIO_VIDEO_F_RESOURCE_NON_CONTIG
}

/// The configuration space exposed to the guest.
pub fn device_config() -> virtio_video_config {
    virtio_video_config {
        version: Le32::from(VIRTIO_VIDEO_VERSION),
        max_caps_length: Le32::from(VIRTIO_VIDEO_CAPS_LENGTH_MAX),
        max_resp_length: Le32::from(VIRTIO_VIDEO_RESPONSE_LENGTH_MAX),
    }
}

/// Parses `model=v4l2-dec,backend=null[,iothread=NAME]
/// [,planes-layout=[single-buffer-formats=[nv12,yuv420],remap-output=BOOL]]`.
impl FromStr for VideoDeviceConfig {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        from_key_values(s).map_err(|e| e.to_string())
    }
}
