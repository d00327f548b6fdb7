// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Wire layout of the virtio video protocol (version 3 of the draft).
//!
//! Names follow the C header so the structures can be compared against it side by side. Request
//! structs do not embed `virtio_video_cmd_hdr`; the header is read separately.

#![allow(non_camel_case_types)]

use static_assertions::const_assert_eq;
use zerocopy::byteorder::LittleEndian;
use zerocopy::byteorder::U32;
use zerocopy::byteorder::U64;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

pub type Le32 = U32<LittleEndian>;
pub type Le64 = U64<LittleEndian>;

pub const VIRTIO_ID_VIDEO_ENC: u32 = 30;
pub const VIRTIO_ID_VIDEO_DEC: u32 = 31;

pub const VIRTIO_VIDEO_F_RESOURCE_GUEST_PAGES: u32 = 0;
pub const VIRTIO_VIDEO_F_RESOURCE_NON_CONTIG: u32 = 1;
pub const VIRTIO_VIDEO_F_RESOURCE_VIRTIO_OBJECT: u32 = 2;

pub const VIRTIO_VIDEO_VERSION: u32 = 0;
pub const VIRTIO_VIDEO_CAPS_LENGTH_MAX: u32 = 1024;
pub const VIRTIO_VIDEO_RESPONSE_LENGTH_MAX: u32 = 1024;
pub const VIRTIO_VIDEO_QUEUE_SIZE: u16 = 256;

pub const VIRTIO_VIDEO_MAX_PLANES: u32 = 8;

pub const VIRTIO_VIDEO_FORMAT_RAW_MIN: u32 = 1;
pub const VIRTIO_VIDEO_FORMAT_ARGB8888: u32 = 1;
pub const VIRTIO_VIDEO_FORMAT_BGRA8888: u32 = 2;
pub const VIRTIO_VIDEO_FORMAT_NV12: u32 = 3;
pub const VIRTIO_VIDEO_FORMAT_YUV420: u32 = 4;
pub const VIRTIO_VIDEO_FORMAT_YVU420: u32 = 5;
pub const VIRTIO_VIDEO_FORMAT_RAW_MAX: u32 = 5;
pub const VIRTIO_VIDEO_FORMAT_CODED_MIN: u32 = 0x1000;
pub const VIRTIO_VIDEO_FORMAT_MPEG2: u32 = 0x1000;
pub const VIRTIO_VIDEO_FORMAT_MPEG4: u32 = 0x1001;
pub const VIRTIO_VIDEO_FORMAT_H264: u32 = 0x1002;
pub const VIRTIO_VIDEO_FORMAT_HEVC: u32 = 0x1003;
pub const VIRTIO_VIDEO_FORMAT_VP8: u32 = 0x1004;
pub const VIRTIO_VIDEO_FORMAT_VP9: u32 = 0x1005;
pub const VIRTIO_VIDEO_FORMAT_CODED_MAX: u32 = 0x1005;

pub const VIRTIO_VIDEO_PROFILE_H264_MIN: u32 = 0x100;
pub const VIRTIO_VIDEO_PROFILE_H264_BASELINE: u32 = 0x100;
pub const VIRTIO_VIDEO_PROFILE_H264_MAIN: u32 = 0x101;
pub const VIRTIO_VIDEO_PROFILE_H264_EXTENDED: u32 = 0x102;
pub const VIRTIO_VIDEO_PROFILE_H264_HIGH: u32 = 0x103;
pub const VIRTIO_VIDEO_PROFILE_H264_HIGH10PROFILE: u32 = 0x104;
pub const VIRTIO_VIDEO_PROFILE_H264_HIGH422PROFILE: u32 = 0x105;
pub const VIRTIO_VIDEO_PROFILE_H264_HIGH444PREDICTIVEPROFILE: u32 = 0x106;
pub const VIRTIO_VIDEO_PROFILE_H264_SCALABLEBASELINE: u32 = 0x107;
pub const VIRTIO_VIDEO_PROFILE_H264_SCALABLEHIGH: u32 = 0x108;
pub const VIRTIO_VIDEO_PROFILE_H264_STEREOHIGH: u32 = 0x109;
pub const VIRTIO_VIDEO_PROFILE_H264_MULTIVIEWHIGH: u32 = 0x10A;
pub const VIRTIO_VIDEO_PROFILE_H264_MAX: u32 = 0x10A;
pub const VIRTIO_VIDEO_PROFILE_HEVC_MIN: u32 = 0x200;
pub const VIRTIO_VIDEO_PROFILE_HEVC_MAIN: u32 = 0x200;
pub const VIRTIO_VIDEO_PROFILE_HEVC_MAIN10: u32 = 0x201;
pub const VIRTIO_VIDEO_PROFILE_HEVC_MAIN_STILL_PICTURE: u32 = 0x202;
pub const VIRTIO_VIDEO_PROFILE_HEVC_MAX: u32 = 0x202;
pub const VIRTIO_VIDEO_PROFILE_VP8_MIN: u32 = 0x300;
pub const VIRTIO_VIDEO_PROFILE_VP8_PROFILE0: u32 = 0x300;
pub const VIRTIO_VIDEO_PROFILE_VP8_PROFILE1: u32 = 0x301;
pub const VIRTIO_VIDEO_PROFILE_VP8_PROFILE2: u32 = 0x302;
pub const VIRTIO_VIDEO_PROFILE_VP8_PROFILE3: u32 = 0x303;
pub const VIRTIO_VIDEO_PROFILE_VP8_MAX: u32 = 0x303;
pub const VIRTIO_VIDEO_PROFILE_VP9_MIN: u32 = 0x400;
pub const VIRTIO_VIDEO_PROFILE_VP9_PROFILE0: u32 = 0x400;
pub const VIRTIO_VIDEO_PROFILE_VP9_PROFILE1: u32 = 0x401;
pub const VIRTIO_VIDEO_PROFILE_VP9_PROFILE2: u32 = 0x402;
pub const VIRTIO_VIDEO_PROFILE_VP9_PROFILE3: u32 = 0x403;
pub const VIRTIO_VIDEO_PROFILE_VP9_MAX: u32 = 0x403;

pub const VIRTIO_VIDEO_LEVEL_H264_MIN: u32 = 0x100;
pub const VIRTIO_VIDEO_LEVEL_H264_1_0: u32 = 0x100;
pub const VIRTIO_VIDEO_LEVEL_H264_1_1: u32 = 0x101;
pub const VIRTIO_VIDEO_LEVEL_H264_1_2: u32 = 0x102;
pub const VIRTIO_VIDEO_LEVEL_H264_1_3: u32 = 0x103;
pub const VIRTIO_VIDEO_LEVEL_H264_2_0: u32 = 0x104;
pub const VIRTIO_VIDEO_LEVEL_H264_2_1: u32 = 0x105;
pub const VIRTIO_VIDEO_LEVEL_H264_2_2: u32 = 0x106;
pub const VIRTIO_VIDEO_LEVEL_H264_3_0: u32 = 0x107;
pub const VIRTIO_VIDEO_LEVEL_H264_3_1: u32 = 0x108;
pub const VIRTIO_VIDEO_LEVEL_H264_3_2: u32 = 0x109;
pub const VIRTIO_VIDEO_LEVEL_H264_4_0: u32 = 0x10A;
pub const VIRTIO_VIDEO_LEVEL_H264_4_1: u32 = 0x10B;
pub const VIRTIO_VIDEO_LEVEL_H264_4_2: u32 = 0x10C;
pub const VIRTIO_VIDEO_LEVEL_H264_5_0: u32 = 0x10D;
pub const VIRTIO_VIDEO_LEVEL_H264_5_1: u32 = 0x10E;
pub const VIRTIO_VIDEO_LEVEL_H264_MAX: u32 = 0x10E;

pub const VIRTIO_VIDEO_BITRATE_MODE_VBR: u32 = 0;
pub const VIRTIO_VIDEO_BITRATE_MODE_CBR: u32 = 1;

pub const VIRTIO_VIDEO_CMD_QUERY_CAPABILITY: u32 = 0x100;
pub const VIRTIO_VIDEO_CMD_STREAM_CREATE: u32 = 0x101;
pub const VIRTIO_VIDEO_CMD_STREAM_DESTROY: u32 = 0x102;
pub const VIRTIO_VIDEO_CMD_STREAM_DRAIN: u32 = 0x103;
pub const VIRTIO_VIDEO_CMD_RESOURCE_CREATE: u32 = 0x104;
pub const VIRTIO_VIDEO_CMD_RESOURCE_QUEUE: u32 = 0x105;
pub const VIRTIO_VIDEO_CMD_RESOURCE_DESTROY_ALL: u32 = 0x106;
pub const VIRTIO_VIDEO_CMD_QUEUE_CLEAR: u32 = 0x107;
pub const VIRTIO_VIDEO_CMD_GET_PARAMS: u32 = 0x108;
pub const VIRTIO_VIDEO_CMD_SET_PARAMS: u32 = 0x109;
pub const VIRTIO_VIDEO_CMD_QUERY_CONTROL: u32 = 0x10A;
pub const VIRTIO_VIDEO_CMD_GET_CONTROL: u32 = 0x10B;
pub const VIRTIO_VIDEO_CMD_SET_CONTROL: u32 = 0x10C;

pub const VIRTIO_VIDEO_RESP_OK_NODATA: u32 = 0x200;
pub const VIRTIO_VIDEO_RESP_OK_QUERY_CAPABILITY: u32 = 0x201;
pub const VIRTIO_VIDEO_RESP_OK_RESOURCE_QUEUE: u32 = 0x202;
pub const VIRTIO_VIDEO_RESP_OK_GET_PARAMS: u32 = 0x203;
pub const VIRTIO_VIDEO_RESP_OK_QUERY_CONTROL: u32 = 0x204;
pub const VIRTIO_VIDEO_RESP_OK_GET_CONTROL: u32 = 0x205;
pub const VIRTIO_VIDEO_RESP_ERR_INVALID_OPERATION: u32 = 0x300;
pub const VIRTIO_VIDEO_RESP_ERR_OUT_OF_MEMORY: u32 = 0x301;
pub const VIRTIO_VIDEO_RESP_ERR_INVALID_STREAM_ID: u32 = 0x302;
pub const VIRTIO_VIDEO_RESP_ERR_INVALID_RESOURCE_ID: u32 = 0x303;
pub const VIRTIO_VIDEO_RESP_ERR_INVALID_PARAMETER: u32 = 0x304;
pub const VIRTIO_VIDEO_RESP_ERR_UNSUPPORTED_CONTROL: u32 = 0x305;

pub const VIRTIO_VIDEO_QUEUE_TYPE_INPUT: u32 = 0x100;
pub const VIRTIO_VIDEO_QUEUE_TYPE_OUTPUT: u32 = 0x101;

pub const VIRTIO_VIDEO_MEM_TYPE_GUEST_PAGES: u32 = 0;
pub const VIRTIO_VIDEO_MEM_TYPE_VIRTIO_OBJECT: u32 = 1;

pub const VIRTIO_VIDEO_PLANES_LAYOUT_SINGLE_BUFFER: u32 = 1 << 0;
pub const VIRTIO_VIDEO_PLANES_LAYOUT_PER_PLANE: u32 = 1 << 1;

pub const VIRTIO_VIDEO_BUFFER_FLAG_ERR: u32 = 0x0001;
pub const VIRTIO_VIDEO_BUFFER_FLAG_EOS: u32 = 0x0002;
pub const VIRTIO_VIDEO_BUFFER_FLAG_IFRAME: u32 = 0x0004;
pub const VIRTIO_VIDEO_BUFFER_FLAG_PFRAME: u32 = 0x0008;
pub const VIRTIO_VIDEO_BUFFER_FLAG_BFRAME: u32 = 0x0010;

pub const VIRTIO_VIDEO_CONTROL_BITRATE: u32 = 1;
pub const VIRTIO_VIDEO_CONTROL_PROFILE: u32 = 2;
pub const VIRTIO_VIDEO_CONTROL_LEVEL: u32 = 3;
pub const VIRTIO_VIDEO_CONTROL_FORCE_KEYFRAME: u32 = 4;
pub const VIRTIO_VIDEO_CONTROL_BITRATE_MODE: u32 = 5;
pub const VIRTIO_VIDEO_CONTROL_BITRATE_PEAK: u32 = 6;
pub const VIRTIO_VIDEO_CONTROL_PREPEND_SPSPPS_TO_IDR: u32 = 7;

pub const VIRTIO_VIDEO_EVENT_ERROR: u32 = 0x100;
pub const VIRTIO_VIDEO_EVENT_DECODER_RESOLUTION_CHANGED: u32 = 0x200;

#[repr(C)]
#[derive(Debug, Default, Copy, Clone, FromBytes, Immutable, IntoBytes, KnownLayout)]
pub struct virtio_video_config {
    pub version: Le32,
    pub max_caps_length: Le32,
    pub max_resp_length: Le32,
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone, FromBytes, Immutable, IntoBytes, KnownLayout)]
pub struct virtio_video_cmd_hdr {
    pub type_: Le32,
    pub stream_id: Le32,
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone, FromBytes, Immutable, IntoBytes, KnownLayout)]
pub struct virtio_video_query_capability {
    pub queue_type: Le32,
    pub padding: [u8; 4usize],
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone, FromBytes, Immutable, IntoBytes, KnownLayout)]
pub struct virtio_video_format_range {
    pub min: Le32,
    pub max: Le32,
    pub step: Le32,
    pub padding: [u8; 4usize],
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone, FromBytes, Immutable, IntoBytes, KnownLayout)]
pub struct virtio_video_format_frame {
    pub width: virtio_video_format_range,
    pub height: virtio_video_format_range,
    pub num_rates: Le32,
    pub padding: [u8; 4usize],
    // Followed by `num_rates` instances of `virtio_video_format_range`.
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone, FromBytes, Immutable, IntoBytes, KnownLayout)]
pub struct virtio_video_format_desc {
    pub mask: Le64,
    pub format: Le32,
    pub planes_layout: Le32,
    pub plane_align: Le32,
    pub num_frames: Le32,
    // Followed by `num_frames` instances of `virtio_video_format_frame`.
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone, FromBytes, Immutable, IntoBytes, KnownLayout)]
pub struct virtio_video_query_capability_resp {
    pub hdr: virtio_video_cmd_hdr,
    pub num_descs: Le32,
    pub padding: [u8; 4usize],
    // Followed by `num_descs` instances of `virtio_video_format_desc`.
}

#[repr(C)]
#[derive(Debug, Copy, Clone, FromBytes, Immutable, IntoBytes, KnownLayout)]
pub struct virtio_video_stream_create {
    pub in_mem_type: Le32,
    pub out_mem_type: Le32,
    pub coded_format: Le32,
    pub padding: [u8; 4usize],
    pub tag: [u8; 64usize],
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone, FromBytes, Immutable, IntoBytes, KnownLayout)]
pub struct virtio_video_mem_entry {
    pub addr: Le64,
    pub length: Le32,
    pub padding: [u8; 4usize],
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone, FromBytes, Immutable, IntoBytes, KnownLayout)]
pub struct virtio_video_resource_create {
    pub queue_type: Le32,
    pub resource_id: Le32,
    pub planes_layout: Le32,
    pub num_planes: Le32,
    pub plane_offsets: [Le32; 8usize],
    pub num_entries: [Le32; 8usize],
    // Followed by the `virtio_video_mem_entry` list of every plane, in plane order.
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone, FromBytes, Immutable, IntoBytes, KnownLayout)]
pub struct virtio_video_resource_queue {
    pub queue_type: Le32,
    pub resource_id: Le32,
    pub timestamp: Le64,
    pub num_data_sizes: Le32,
    pub data_sizes: [Le32; 8usize],
    pub padding: [u8; 4usize],
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone, FromBytes, Immutable, IntoBytes, KnownLayout)]
pub struct virtio_video_resource_queue_resp {
    pub hdr: virtio_video_cmd_hdr,
    pub timestamp: Le64,
    pub flags: Le32,
    pub size: Le32,
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone, FromBytes, Immutable, IntoBytes, KnownLayout)]
pub struct virtio_video_resource_destroy_all {
    pub queue_type: Le32,
    pub padding: [u8; 4usize],
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone, FromBytes, Immutable, IntoBytes, KnownLayout)]
pub struct virtio_video_queue_clear {
    pub queue_type: Le32,
    pub padding: [u8; 4usize],
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone, FromBytes, Immutable, IntoBytes, KnownLayout)]
pub struct virtio_video_plane_format {
    pub plane_size: Le32,
    pub stride: Le32,
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone, FromBytes, Immutable, IntoBytes, KnownLayout)]
pub struct virtio_video_crop {
    pub left: Le32,
    pub top: Le32,
    pub width: Le32,
    pub height: Le32,
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone, FromBytes, Immutable, IntoBytes, KnownLayout)]
pub struct virtio_video_params {
    pub queue_type: Le32,
    pub format: Le32,
    pub frame_width: Le32,
    pub frame_height: Le32,
    pub min_buffers: Le32,
    pub max_buffers: Le32,
    pub crop: virtio_video_crop,
    pub frame_rate: Le32,
    pub num_planes: Le32,
    pub plane_formats: [virtio_video_plane_format; 8usize],
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone, FromBytes, Immutable, IntoBytes, KnownLayout)]
pub struct virtio_video_get_params {
    pub queue_type: Le32,
    pub padding: [u8; 4usize],
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone, FromBytes, Immutable, IntoBytes, KnownLayout)]
pub struct virtio_video_get_params_resp {
    pub hdr: virtio_video_cmd_hdr,
    pub params: virtio_video_params,
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone, FromBytes, Immutable, IntoBytes, KnownLayout)]
pub struct virtio_video_set_params {
    pub params: virtio_video_params,
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone, FromBytes, Immutable, IntoBytes, KnownLayout)]
pub struct virtio_video_query_control {
    pub control: Le32,
    pub padding: [u8; 4usize],
    // Followed by `virtio_video_query_control_profile` or `virtio_video_query_control_level`.
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone, FromBytes, Immutable, IntoBytes, KnownLayout)]
pub struct virtio_video_query_control_profile {
    pub format: Le32,
    pub padding: [u8; 4usize],
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone, FromBytes, Immutable, IntoBytes, KnownLayout)]
pub struct virtio_video_query_control_level {
    pub format: Le32,
    pub padding: [u8; 4usize],
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone, FromBytes, Immutable, IntoBytes, KnownLayout)]
pub struct virtio_video_query_control_resp {
    pub hdr: virtio_video_cmd_hdr,
    // Followed by `virtio_video_query_control_resp_profile` or `..._level`.
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone, FromBytes, Immutable, IntoBytes, KnownLayout)]
pub struct virtio_video_query_control_resp_profile {
    pub num: Le32,
    pub padding: [u8; 4usize],
    // Followed by `num` little-endian 32-bit profile values.
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone, FromBytes, Immutable, IntoBytes, KnownLayout)]
pub struct virtio_video_query_control_resp_level {
    pub num: Le32,
    pub padding: [u8; 4usize],
    // Followed by `num` little-endian 32-bit level values.
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone, FromBytes, Immutable, IntoBytes, KnownLayout)]
pub struct virtio_video_get_control {
    pub control: Le32,
    pub padding: [u8; 4usize],
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone, FromBytes, Immutable, IntoBytes, KnownLayout)]
pub struct virtio_video_set_control {
    pub control: Le32,
    pub padding: [u8; 4usize],
    // Followed by a `virtio_video_control_val`.
}

/// Every control value on the wire is a single 32-bit value padded to 8 bytes.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, FromBytes, Immutable, IntoBytes, KnownLayout)]
pub struct virtio_video_control_val {
    pub value: Le32,
    pub padding: [u8; 4usize],
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone, FromBytes, Immutable, IntoBytes, KnownLayout)]
pub struct virtio_video_event {
    pub event_type: Le32,
    pub stream_id: Le32,
}

const_assert_eq!(std::mem::size_of::<virtio_video_config>(), 12);
const_assert_eq!(std::mem::size_of::<virtio_video_cmd_hdr>(), 8);
const_assert_eq!(std::mem::size_of::<virtio_video_format_range>(), 16);
const_assert_eq!(std::mem::size_of::<virtio_video_format_frame>(), 40);
const_assert_eq!(std::mem::size_of::<virtio_video_format_desc>(), 24);
const_assert_eq!(std::mem::size_of::<virtio_video_query_capability_resp>(), 16);
const_assert_eq!(std::mem::size_of::<virtio_video_stream_create>(), 80);
const_assert_eq!(std::mem::size_of::<virtio_video_mem_entry>(), 16);
const_assert_eq!(std::mem::size_of::<virtio_video_resource_create>(), 80);
const_assert_eq!(std::mem::size_of::<virtio_video_resource_queue>(), 56);
const_assert_eq!(std::mem::size_of::<virtio_video_resource_queue_resp>(), 24);
const_assert_eq!(std::mem::size_of::<virtio_video_params>(), 112);
const_assert_eq!(std::mem::size_of::<virtio_video_get_params_resp>(), 120);
const_assert_eq!(std::mem::size_of::<virtio_video_event>(), 8);
