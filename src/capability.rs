// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Capabilities advertised by the device, per queue direction.

use std::collections::BTreeMap;
use std::mem::size_of;

use log::error;

use crate::command::QueueType;
use crate::control::*;
use crate::error::VideoError;
use crate::error::VideoResult;
use crate::format::*;
use crate::protocol::virtio_video_query_capability_resp;

/// The serialized descriptor table of a QUERY_CAPABILITY response, without its header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityTable {
    num_descs: u32,
    body: Vec<u8>,
}

impl CapabilityTable {
    pub fn num_descs(&self) -> u32 {
        self.num_descs
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Size of the whole response, header included.
    pub fn response_len(&self) -> usize {
        size_of::<virtio_video_query_capability_resp>() + self.body.len()
    }
}

/// Formats, frame sizes and frame rates the backend supports, plus the profiles and levels of each
/// coded format. Read-only once the device is realized.
#[derive(Debug, Clone, Default)]
pub struct Capability {
    in_fmts: Vec<FormatDesc>,
    out_fmts: Vec<FormatDesc>,

    // Stores supported profiles and levels for each format.
    profiles: BTreeMap<Format, Vec<Profile>>,
    levels: BTreeMap<Format, Vec<Level>>,
}

impl Capability {
    pub fn new(
        in_fmts: Vec<FormatDesc>,
        out_fmts: Vec<FormatDesc>,
        profiles: BTreeMap<Format, Vec<Profile>>,
        levels: BTreeMap<Format, Vec<Level>>,
    ) -> Self {
        Self {
            in_fmts,
            out_fmts,
            profiles,
            levels,
        }
    }

    pub fn formats(&self, queue_type: QueueType) -> &[FormatDesc] {
        match queue_type {
            QueueType::Input => &self.in_fmts,
            QueueType::Output => &self.out_fmts,
        }
    }

    pub fn supports(&self, queue_type: QueueType, format: Format) -> bool {
        self.formats(queue_type).iter().any(|d| d.format == format)
    }

    pub fn first_format(&self, queue_type: QueueType) -> Option<Format> {
        self.formats(queue_type).first().map(|d| d.format)
    }

    /// Serializes the descriptors of one direction in registry order.
    ///
    /// The size is computed up front and the table is built in a single allocation.
    pub fn serialize(&self, queue_type: QueueType) -> CapabilityTable {
        let descs = self.formats(queue_type);
        let len: usize = descs.iter().map(FormatDesc::encoded_len).sum();
        let mut body = Vec::with_capacity(len);
        for desc in descs {
            desc.encode(&mut body);
        }
        debug_assert_eq!(body.len(), len);
        CapabilityTable {
            num_descs: descs.len() as u32,
            body,
        }
    }

    pub fn query_control(&self, t: &QueryCtrlType) -> VideoResult<QueryCtrlResponse> {
        use QueryCtrlType::*;
        match *t {
            Profile(fmt) => match self.profiles.get(&fmt) {
                Some(profiles) => Ok(QueryCtrlResponse::Profile(profiles.to_vec())),
                None => {
                    error!("no profiles are known for format {}", fmt);
                    Err(VideoError::InvalidParameter)
                }
            },
            Level(fmt) => match self.levels.get(&fmt) {
                Some(levels) => Ok(QueryCtrlResponse::Level(levels.to_vec())),
                None => {
                    error!("no levels are known for format {}", fmt);
                    Err(VideoError::InvalidParameter)
                }
            },
        }
    }
}
