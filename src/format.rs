// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Data structures that represent video format information in virtio video devices.

use std::fmt;
use std::fmt::Display;
use std::mem::size_of;

use enumn::N;
use serde::Deserialize;
use serde::Serialize;
use zerocopy::IntoBytes;

use crate::protocol::*;

#[derive(PartialEq, Eq, PartialOrd, Ord, N, Clone, Copy, Debug, Serialize, Deserialize)]
#[repr(u32)]
pub enum Profile {
    H264Baseline = VIRTIO_VIDEO_PROFILE_H264_BASELINE,
    H264Main = VIRTIO_VIDEO_PROFILE_H264_MAIN,
    H264Extended = VIRTIO_VIDEO_PROFILE_H264_EXTENDED,
    H264High = VIRTIO_VIDEO_PROFILE_H264_HIGH,
    H264High10 = VIRTIO_VIDEO_PROFILE_H264_HIGH10PROFILE,
    H264High422 = VIRTIO_VIDEO_PROFILE_H264_HIGH422PROFILE,
    H264High444PredictiveProfile = VIRTIO_VIDEO_PROFILE_H264_HIGH444PREDICTIVEPROFILE,
    H264ScalableBaseline = VIRTIO_VIDEO_PROFILE_H264_SCALABLEBASELINE,
    H264ScalableHigh = VIRTIO_VIDEO_PROFILE_H264_SCALABLEHIGH,
    H264StereoHigh = VIRTIO_VIDEO_PROFILE_H264_STEREOHIGH,
    H264MultiviewHigh = VIRTIO_VIDEO_PROFILE_H264_MULTIVIEWHIGH,
    HevcMain = VIRTIO_VIDEO_PROFILE_HEVC_MAIN,
    HevcMain10 = VIRTIO_VIDEO_PROFILE_HEVC_MAIN10,
    HevcMainStillPicture = VIRTIO_VIDEO_PROFILE_HEVC_MAIN_STILL_PICTURE,
    VP8Profile0 = VIRTIO_VIDEO_PROFILE_VP8_PROFILE0,
    VP8Profile1 = VIRTIO_VIDEO_PROFILE_VP8_PROFILE1,
    VP8Profile2 = VIRTIO_VIDEO_PROFILE_VP8_PROFILE2,
    VP8Profile3 = VIRTIO_VIDEO_PROFILE_VP8_PROFILE3,
    VP9Profile0 = VIRTIO_VIDEO_PROFILE_VP9_PROFILE0,
    VP9Profile1 = VIRTIO_VIDEO_PROFILE_VP9_PROFILE1,
    VP9Profile2 = VIRTIO_VIDEO_PROFILE_VP9_PROFILE2,
    VP9Profile3 = VIRTIO_VIDEO_PROFILE_VP9_PROFILE3,
}
impl_try_from_u32_for_enumn!(Profile, "profile");

impl Profile {
    pub fn to_format(self) -> Format {
        use Profile::*;
        match self {
            H264Baseline
            | H264Main
            | H264Extended
            | H264High
            | H264High10
            | H264High422
            | H264High444PredictiveProfile
            | H264ScalableBaseline
            | H264ScalableHigh
            | H264StereoHigh
            | H264MultiviewHigh => Format::H264,
            HevcMain | HevcMain10 | HevcMainStillPicture => Format::Hevc,
            VP8Profile0 | VP8Profile1 | VP8Profile2 | VP8Profile3 => Format::VP8,
            VP9Profile0 | VP9Profile1 | VP9Profile2 | VP9Profile3 => Format::VP9,
        }
    }
}

#[derive(PartialEq, Eq, PartialOrd, Ord, N, Clone, Copy, Debug, Serialize, Deserialize)]
#[repr(u32)]
pub enum Level {
    H264_1_0 = VIRTIO_VIDEO_LEVEL_H264_1_0,
    H264_1_1 = VIRTIO_VIDEO_LEVEL_H264_1_1,
    H264_1_2 = VIRTIO_VIDEO_LEVEL_H264_1_2,
    H264_1_3 = VIRTIO_VIDEO_LEVEL_H264_1_3,
    H264_2_0 = VIRTIO_VIDEO_LEVEL_H264_2_0,
    H264_2_1 = VIRTIO_VIDEO_LEVEL_H264_2_1,
    H264_2_2 = VIRTIO_VIDEO_LEVEL_H264_2_2,
    H264_3_0 = VIRTIO_VIDEO_LEVEL_H264_3_0,
    H264_3_1 = VIRTIO_VIDEO_LEVEL_H264_3_1,
    H264_3_2 = VIRTIO_VIDEO_LEVEL_H264_3_2,
    H264_4_0 = VIRTIO_VIDEO_LEVEL_H264_4_0,
    H264_4_1 = VIRTIO_VIDEO_LEVEL_H264_4_1,
    H264_4_2 = VIRTIO_VIDEO_LEVEL_H264_4_2,
    H264_5_0 = VIRTIO_VIDEO_LEVEL_H264_5_0,
    H264_5_1 = VIRTIO_VIDEO_LEVEL_H264_5_1,
}
impl_try_from_u32_for_enumn!(Level, "level");

#[derive(PartialEq, Eq, PartialOrd, Ord, N, Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u32)]
pub enum Format {
    // Raw formats
    ARGB8888 = VIRTIO_VIDEO_FORMAT_ARGB8888,
    BGRA8888 = VIRTIO_VIDEO_FORMAT_BGRA8888,
    NV12 = VIRTIO_VIDEO_FORMAT_NV12,
    YUV420 = VIRTIO_VIDEO_FORMAT_YUV420,
    YVU420 = VIRTIO_VIDEO_FORMAT_YVU420,

    // Bitstream formats
    MPEG2 = VIRTIO_VIDEO_FORMAT_MPEG2,
    MPEG4 = VIRTIO_VIDEO_FORMAT_MPEG4,
    H264 = VIRTIO_VIDEO_FORMAT_H264,
    Hevc = VIRTIO_VIDEO_FORMAT_HEVC,
    VP8 = VIRTIO_VIDEO_FORMAT_VP8,
    VP9 = VIRTIO_VIDEO_FORMAT_VP9,
}
impl_try_from_u32_for_enumn!(Format, "format");

impl Format {
    pub fn is_coded(self) -> bool {
        (VIRTIO_VIDEO_FORMAT_CODED_MIN..=VIRTIO_VIDEO_FORMAT_CODED_MAX).contains(&(self as u32))
    }

    /// Whether a resource of this format may be made of `num_planes` memory planes.
    ///
    /// Multi-planar raw formats can always be carried in a single buffer.
    pub fn accepts_num_planes(self, num_planes: u32) -> bool {
        use Format::*;
        match self {
            NV12 => matches!(num_planes, 1 | 2),
            YUV420 | YVU420 => matches!(num_planes, 1 | 3),
            ARGB8888 | BGRA8888 => num_planes == 1,
            MPEG2 | MPEG4 | H264 | Hevc | VP8 | VP9 => num_planes == 1,
        }
    }
}

impl Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use Format::*;
        match self {
            ARGB8888 => write!(f, "ARGB8888"),
            BGRA8888 => write!(f, "BGRA8888"),
            NV12 => write!(f, "NV12"),
            YUV420 => write!(f, "YUV420"),
            YVU420 => write!(f, "YVU420"),
            MPEG2 => write!(f, "MPEG2"),
            MPEG4 => write!(f, "MPEG4"),
            H264 => write!(f, "H264"),
            Hevc => write!(f, "HEVC"),
            VP8 => write!(f, "VP8"),
            VP9 => write!(f, "VP9"),
        }
    }
}

#[derive(PartialEq, Eq, PartialOrd, Ord, N, Clone, Copy, Debug, Serialize, Deserialize)]
#[repr(u32)]
pub enum BitrateMode {
    Vbr = VIRTIO_VIDEO_BITRATE_MODE_VBR,
    Cbr = VIRTIO_VIDEO_BITRATE_MODE_CBR,
}
impl_try_from_u32_for_enumn!(BitrateMode, "bitrate_mode");

#[derive(PartialEq, Eq, Debug, Default, Copy, Clone, Serialize, Deserialize)]
pub struct Crop {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}
impl_from_for_interconvertible_structs!(virtio_video_crop, Crop, left, top, width, height);

#[derive(PartialEq, Eq, Debug, Default, Clone, Copy, Serialize, Deserialize)]
pub struct PlaneFormat {
    pub plane_size: u32,
    pub stride: u32,
}
impl_from_for_interconvertible_structs!(virtio_video_plane_format, PlaneFormat, plane_size, stride);

impl PlaneFormat {
    /// Computes the per-plane layout of a tightly packed frame of `format`.
    ///
    /// Returns `None` for coded formats, whose buffer sizes are not derived from the resolution.
    pub fn get_plane_layout(format: Format, width: u32, height: u32) -> Option<Vec<PlaneFormat>> {
        // Halved size for chroma sampling, rounded up so odd resolutions stay covered.
        let half_width = width.div_ceil(2);
        let half_height = height.div_ceil(2);
        match format {
            Format::NV12 => Some(vec![
                PlaneFormat {
                    plane_size: width * height,
                    stride: width,
                },
                // Interleaved UV, one sample pair per 2x2 block.
                PlaneFormat {
                    plane_size: width * half_height,
                    stride: width,
                },
            ]),
            Format::YUV420 | Format::YVU420 => Some(vec![
                PlaneFormat {
                    plane_size: width * height,
                    stride: width,
                },
                PlaneFormat {
                    plane_size: half_width * half_height,
                    stride: half_width,
                },
                PlaneFormat {
                    plane_size: half_width * half_height,
                    stride: half_width,
                },
            ]),
            Format::ARGB8888 | Format::BGRA8888 => Some(vec![PlaneFormat {
                plane_size: width * height * 4,
                stride: width * 4,
            }]),
            _ => None,
        }
    }
}

#[derive(PartialEq, Eq, Debug, Default, Clone, Copy)]
pub struct FormatRange {
    pub min: u32,
    pub max: u32,
    pub step: u32,
}
impl_from_for_interconvertible_structs!(virtio_video_format_range, FormatRange, min, max, step);

/// One supported frame size range and the frame rates available at that size.
///
/// An empty `frame_rates` is serialized as `num_rates = 0`; the guest then picks its own rate.
#[derive(Debug, Default, Clone)]
pub struct FrameFormat {
    pub width: FormatRange,
    pub height: FormatRange,
    pub frame_rates: Vec<FormatRange>,
}

impl FrameFormat {
    pub fn encoded_len(&self) -> usize {
        size_of::<virtio_video_format_frame>()
            + self.frame_rates.len() * size_of::<virtio_video_format_range>()
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        let frame = virtio_video_format_frame {
            width: self.width.into(),
            height: self.height.into(),
            num_rates: Le32::from(self.frame_rates.len() as u32),
            ..Default::default()
        };
        buf.extend_from_slice(frame.as_bytes());
        for rate in &self.frame_rates {
            buf.extend_from_slice(virtio_video_format_range::from(*rate).as_bytes());
        }
    }
}

#[derive(Debug, Clone)]
pub struct FormatDesc {
    /// Bit `i` is set when this format can be paired with the `i`-th descriptor of the other
    /// queue.
    pub mask: u64,
    pub format: Format,
    pub planes_layout: u32,
    pub plane_align: u32,
    pub frame_formats: Vec<FrameFormat>,
}

impl FormatDesc {
    pub fn encoded_len(&self) -> usize {
        size_of::<virtio_video_format_desc>()
            + self
                .frame_formats
                .iter()
                .map(FrameFormat::encoded_len)
                .sum::<usize>()
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        let desc = virtio_video_format_desc {
            mask: self.mask.into(),
            format: Le32::from(self.format as u32),
            planes_layout: Le32::from(self.planes_layout),
            plane_align: Le32::from(self.plane_align),
            num_frames: Le32::from(self.frame_formats.len() as u32),
        };
        buf.extend_from_slice(desc.as_bytes());
        for frame in &self.frame_formats {
            frame.encode(buf);
        }
    }
}
