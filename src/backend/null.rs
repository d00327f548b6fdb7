// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! A backend that accepts every stream and produces no data.
//!
//! Input buffers complete as soon as they are queued. Output buffers are kept until the queue is
//! cleared or the stream goes away, so a drain ends with the device signaling end of stream into
//! the oldest of them.

use std::collections::BTreeMap;

use log::debug;
use sync::Mutex;

use crate::backend::BackendEvent;
use crate::backend::Completion;
use crate::backend::CompletionHandle;
use crate::backend::VideoBackend;
use crate::backend::WorkRequest;
use crate::capability::Capability;
use crate::command::QueueType;
use crate::config::VideoDeviceType;
use crate::control::CtrlType;
use crate::control::CtrlVal;
use crate::error::VideoError;
use crate::error::VideoResult;
use crate::format::*;
use crate::params::MemoryType;
use crate::params::Params;
use crate::protocol::VIRTIO_VIDEO_PLANES_LAYOUT_PER_PLANE;
use crate::protocol::VIRTIO_VIDEO_PLANES_LAYOUT_SINGLE_BUFFER;

const CODED_FORMATS: [Format; 4] = [Format::H264, Format::Hevc, Format::VP8, Format::VP9];
const RAW_FORMATS: [Format; 2] = [Format::NV12, Format::YUV420];

#[derive(Default)]
struct NullStream {
    /// Output resource ids, in queueing order.
    held_outputs: Vec<u32>,
    controls: BTreeMap<CtrlType, CtrlVal>,
}

pub struct NullBackend {
    model: VideoDeviceType,
    handle: Mutex<Option<CompletionHandle>>,
    streams: Mutex<BTreeMap<u32, NullStream>>,
}

impl NullBackend {
    pub fn new(model: VideoDeviceType) -> Self {
        NullBackend {
            model,
            handle: Mutex::new(None),
            streams: Mutex::new(BTreeMap::new()),
        }
    }

    fn with_stream<T>(
        &self,
        stream_id: u32,
        f: impl FnOnce(&mut NullStream) -> T,
    ) -> VideoResult<T> {
        self.streams
            .lock()
            .get_mut(&stream_id)
            .map(f)
            .ok_or(VideoError::InvalidStreamId(stream_id))
    }

    fn post(&self, event: BackendEvent) {
        match &*self.handle.lock() {
            Some(handle) => handle.post(event),
            None => debug!("null backend is not attached, dropping {:?}", event),
        }
    }
}

fn format_descs(formats: &[Format], raw_layout: u32) -> Vec<FormatDesc> {
    let frame_formats = vec![FrameFormat {
        width: FormatRange {
            min: 64,
            max: 4096,
            step: 16,
        },
        height: FormatRange {
            min: 64,
            max: 4096,
            step: 16,
        },
        frame_rates: vec![FormatRange {
            min: 1,
            max: 60,
            step: 1,
        }],
    }];
    formats
        .iter()
        .map(|&format| FormatDesc {
            // Every format of this side converts to every format of the other.
            mask: u64::MAX,
            format,
            planes_layout: if format.is_coded() {
                VIRTIO_VIDEO_PLANES_LAYOUT_SINGLE_BUFFER
            } else {
                raw_layout
            },
            plane_align: 1,
            frame_formats: frame_formats.clone(),
        })
        .collect()
}

impl VideoBackend for NullBackend {
    fn capabilities(&self) -> Capability {
        let raw_layout =
            VIRTIO_VIDEO_PLANES_LAYOUT_SINGLE_BUFFER | VIRTIO_VIDEO_PLANES_LAYOUT_PER_PLANE;
        let coded = format_descs(&CODED_FORMATS, raw_layout);
        let raw = format_descs(&RAW_FORMATS, raw_layout);
        let (in_fmts, out_fmts) = match self.model {
            VideoDeviceType::Decoder => (coded, raw),
            VideoDeviceType::Encoder => (raw, coded),
        };

        let mut profiles = BTreeMap::new();
        profiles.insert(
            Format::H264,
            vec![Profile::H264Baseline, Profile::H264Main, Profile::H264High],
        );
        profiles.insert(Format::Hevc, vec![Profile::HevcMain]);
        profiles.insert(Format::VP8, vec![Profile::VP8Profile0]);
        profiles.insert(Format::VP9, vec![Profile::VP9Profile0]);
        let mut levels = BTreeMap::new();
        levels.insert(
            Format::H264,
            vec![
                Level::H264_1_0,
                Level::H264_2_0,
                Level::H264_3_0,
                Level::H264_4_0,
                Level::H264_4_1,
                Level::H264_5_0,
            ],
        );
        Capability::new(in_fmts, out_fmts, profiles, levels)
    }

    fn attach(&self, handle: CompletionHandle) {
        *self.handle.lock() = Some(handle);
    }

    fn create_stream(
        &self,
        stream_id: u32,
        coded_format: Format,
        _input_mem_type: MemoryType,
        _output_mem_type: MemoryType,
    ) -> VideoResult<()> {
        let mut streams = self.streams.lock();
        if streams.contains_key(&stream_id) {
            return Err(VideoError::InvalidStreamId(stream_id));
        }
        debug!("null backend: stream {} for {}", stream_id, coded_format);
        streams.insert(stream_id, Default::default());
        Ok(())
    }

    fn destroy_stream(&self, stream_id: u32) -> VideoResult<Completion> {
        self.streams
            .lock()
            .remove(&stream_id)
            .ok_or(VideoError::InvalidStreamId(stream_id))?;
        Ok(Completion::Done)
    }

    fn drain_stream(&self, stream_id: u32) -> VideoResult<Completion> {
        self.with_stream(stream_id, |_| Completion::Done)
    }

    fn queue_resource(&self, request: WorkRequest) -> VideoResult<()> {
        let resource_id = request.resource.id();
        match request.queue_type {
            QueueType::Input => {
                self.with_stream(request.stream_id, |_| ())?;
                self.post(BackendEvent::BufferDone {
                    stream_id: request.stream_id,
                    queue_type: QueueType::Input,
                    resource_id,
                    timestamp: request.timestamp,
                    flags: 0,
                    size: 0,
                });
            }
            QueueType::Output => {
                self.with_stream(request.stream_id, |s| s.held_outputs.push(resource_id))?;
            }
        }
        Ok(())
    }

    fn destroy_all_resources(&self, stream_id: u32, queue_type: QueueType) -> VideoResult<()> {
        self.with_stream(stream_id, |s| {
            if queue_type == QueueType::Output {
                s.held_outputs.clear();
            }
        })
    }

    fn clear_queue(&self, stream_id: u32, queue_type: QueueType) -> VideoResult<Completion> {
        self.destroy_all_resources(stream_id, queue_type)?;
        Ok(Completion::Done)
    }

    fn set_params(
        &self,
        stream_id: u32,
        _queue_type: QueueType,
        mut params: Params,
    ) -> VideoResult<Params> {
        self.with_stream(stream_id, |_| ())?;
        if params.plane_formats.is_empty() {
            if let Some(format) = params.format {
                params.plane_formats =
                    PlaneFormat::get_plane_layout(format, params.frame_width, params.frame_height)
                        .unwrap_or_default();
            }
        }
        Ok(params)
    }

    fn get_control(&self, stream_id: u32, ctrl_type: CtrlType) -> VideoResult<CtrlVal> {
        self.with_stream(stream_id, |s| s.controls.get(&ctrl_type).copied())?
            .ok_or(VideoError::UnsupportedControl(ctrl_type as u32))
    }

    fn set_control(&self, stream_id: u32, ctrl_val: CtrlVal) -> VideoResult<()> {
        if self.model == VideoDeviceType::Decoder {
            return Err(VideoError::UnsupportedControl(ctrl_val.ctrl_type() as u32));
        }
        self.with_stream(stream_id, |s| {
            // Forcing a keyframe is a one-shot action with nothing to remember.
            if ctrl_val != CtrlVal::ForceKeyframe {
                s.controls.insert(ctrl_val.ctrl_type(), ctrl_val);
            }
        })
    }
}
