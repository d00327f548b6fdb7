// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Implementation of data structures for virtio-video controls.

use std::mem::size_of;

use enumn::N;
use serde::Deserialize;
use serde::Serialize;
use zerocopy::IntoBytes;

use crate::error::VideoResult;
use crate::format::BitrateMode;
use crate::format::Format;
use crate::format::Level;
use crate::format::Profile;
use crate::protocol::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryCtrlType {
    Profile(Format),
    Level(Format),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryCtrlResponse {
    Profile(Vec<Profile>),
    Level(Vec<Level>),
}

impl QueryCtrlResponse {
    /// Appends the count header and the value array.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        let values: Vec<Le32> = match self {
            QueryCtrlResponse::Profile(ps) => ps.iter().map(|p| Le32::from(*p as u32)).collect(),
            QueryCtrlResponse::Level(ls) => ls.iter().map(|l| Le32::from(*l as u32)).collect(),
        };
        buf.reserve(size_of::<virtio_video_query_control_resp_profile>() + values.len() * 4);
        // The profile and level count headers share one layout.
        let head = virtio_video_query_control_resp_profile {
            num: Le32::from(values.len() as u32),
            ..Default::default()
        };
        buf.extend_from_slice(head.as_bytes());
        buf.extend_from_slice(values.as_bytes());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, N, Serialize, Deserialize)]
#[repr(u32)]
pub enum CtrlType {
    Bitrate = VIRTIO_VIDEO_CONTROL_BITRATE,
    Profile = VIRTIO_VIDEO_CONTROL_PROFILE,
    Level = VIRTIO_VIDEO_CONTROL_LEVEL,
    ForceKeyframe = VIRTIO_VIDEO_CONTROL_FORCE_KEYFRAME,
    BitrateMode = VIRTIO_VIDEO_CONTROL_BITRATE_MODE,
    BitratePeak = VIRTIO_VIDEO_CONTROL_BITRATE_PEAK,
    PrependSpsPpsToIdr = VIRTIO_VIDEO_CONTROL_PREPEND_SPSPPS_TO_IDR,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CtrlVal {
    Bitrate(u32),
    Profile(Profile),
    Level(Level),
    ForceKeyframe,
    BitrateMode(BitrateMode),
    BitratePeak(u32),
    PrependSpsPpsToIdr(bool),
}

impl CtrlVal {
    /// Interprets the raw value carried by a SET_CONTROL request.
    pub fn from_raw(ctrl_type: CtrlType, value: u32) -> VideoResult<CtrlVal> {
        Ok(match ctrl_type {
            CtrlType::Bitrate => CtrlVal::Bitrate(value),
            CtrlType::Profile => CtrlVal::Profile(Profile::try_from(value)?),
            CtrlType::Level => CtrlVal::Level(Level::try_from(value)?),
            CtrlType::ForceKeyframe => CtrlVal::ForceKeyframe,
            CtrlType::BitrateMode => CtrlVal::BitrateMode(BitrateMode::try_from(value)?),
            CtrlType::BitratePeak => CtrlVal::BitratePeak(value),
            CtrlType::PrependSpsPpsToIdr => CtrlVal::PrependSpsPpsToIdr(value != 0),
        })
    }

    pub fn ctrl_type(&self) -> CtrlType {
        match self {
            CtrlVal::Bitrate(_) => CtrlType::Bitrate,
            CtrlVal::Profile(_) => CtrlType::Profile,
            CtrlVal::Level(_) => CtrlType::Level,
            CtrlVal::ForceKeyframe => CtrlType::ForceKeyframe,
            CtrlVal::BitrateMode(_) => CtrlType::BitrateMode,
            CtrlVal::BitratePeak(_) => CtrlType::BitratePeak,
            CtrlVal::PrependSpsPpsToIdr(_) => CtrlType::PrependSpsPpsToIdr,
        }
    }

    /// The wire value, or `None` for button controls which have no readable value.
    pub fn to_raw(&self) -> Option<u32> {
        match self {
            CtrlVal::Bitrate(r) | CtrlVal::BitratePeak(r) => Some(*r),
            CtrlVal::Profile(p) => Some(*p as u32),
            CtrlVal::Level(l) => Some(*l as u32),
            CtrlVal::BitrateMode(m) => Some(*m as u32),
            CtrlVal::PrependSpsPpsToIdr(p) => Some(*p as u32),
            CtrlVal::ForceKeyframe => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_list_encoding() {
        let resp = QueryCtrlResponse::Profile(vec![Profile::H264Baseline, Profile::H264High]);
        let mut buf = Vec::new();
        resp.encode(&mut buf);
        assert_eq!(buf.len(), 16);
        assert_eq!(&buf[0..4], &2u32.to_le_bytes());
        assert_eq!(&buf[8..12], &VIRTIO_VIDEO_PROFILE_H264_BASELINE.to_le_bytes());
        assert_eq!(&buf[12..16], &VIRTIO_VIDEO_PROFILE_H264_HIGH.to_le_bytes());
    }

    #[test]
    fn raw_values() {
        let val = CtrlVal::from_raw(CtrlType::Level, VIRTIO_VIDEO_LEVEL_H264_4_1).unwrap();
        assert_eq!(val, CtrlVal::Level(Level::H264_4_1));
        assert_eq!(val.to_raw(), Some(VIRTIO_VIDEO_LEVEL_H264_4_1));
        assert!(CtrlVal::from_raw(CtrlType::Profile, 7).is_err());
        assert_eq!(CtrlVal::ForceKeyframe.to_raw(), None);
        assert_eq!(
            CtrlVal::from_raw(CtrlType::PrependSpsPpsToIdr, 5).unwrap(),
            CtrlVal::PrependSpsPpsToIdr(true)
        );
    }
}
