// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Events can happen in virtio video devices.

use std::io;

use enumn::N;

use crate::descriptor::Writer;
use crate::protocol::*;

#[derive(Debug, Copy, Clone, PartialEq, Eq, N)]
#[repr(u32)]
pub enum EvtType {
    Error = VIRTIO_VIDEO_EVENT_ERROR,
    DecResChanged = VIRTIO_VIDEO_EVENT_DECODER_RESOLUTION_CHANGED,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoEvt {
    pub typ: EvtType,
    pub stream_id: u32,
}

impl VideoEvt {
    pub fn write(&self, w: &mut Writer) -> Result<(), io::Error> {
        w.write_obj(virtio_video_event {
            event_type: Le32::from(self.typ as u32),
            stream_id: Le32::from(self.stream_id),
        })
    }
}
