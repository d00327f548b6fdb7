// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Fakes for the device's collaborators, and builders for guest requests.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::VecDeque;
use std::sync::Arc;

use sync::Mutex;
use zerocopy::FromBytes;
use zerocopy::FromZeros;
use zerocopy::IntoBytes;

use crate::backend::Completion;
use crate::backend::CompletionHandle;
use crate::backend::VideoBackend;
use crate::backend::WorkRequest;
use crate::capability::Capability;
use crate::command::QueueType;
use crate::control::CtrlType;
use crate::control::CtrlVal;
use crate::descriptor::DescriptorChain;
use crate::error::VideoError;
use crate::error::VideoResult;
use crate::format::*;
use crate::params::MemoryType;
use crate::params::Params;
use crate::protocol::*;
use crate::queue::VideoQueue;
use crate::resource::BackingFile;
use crate::resource::DmaDirection;
use crate::resource::GuestMemoryMapper;
use crate::resource::HostRegion;

#[derive(Default)]
struct TestQueueState {
    available: VecDeque<DescriptorChain>,
    used: Vec<DescriptorChain>,
    detached: Vec<DescriptorChain>,
    interrupts: usize,
}

/// An in-memory virtqueue. Clones share the same ring.
#[derive(Clone, Default)]
pub struct TestQueue {
    state: Arc<Mutex<TestQueueState>>,
}

impl TestQueue {
    pub fn new() -> Self {
        Default::default()
    }

    /// Makes a chain available to the device.
    pub fn push(&self, desc: DescriptorChain) {
        self.state.lock().available.push_back(desc);
    }

    /// Takes the chains the device returned so far, in return order.
    pub fn take_used(&self) -> Vec<DescriptorChain> {
        std::mem::take(&mut self.state.lock().used)
    }

    pub fn num_detached(&self) -> usize {
        self.state.lock().detached.len()
    }

    pub fn num_available(&self) -> usize {
        self.state.lock().available.len()
    }

    pub fn interrupts(&self) -> usize {
        self.state.lock().interrupts
    }
}

impl VideoQueue for TestQueue {
    fn pop(&mut self) -> Option<DescriptorChain> {
        self.state.lock().available.pop_front()
    }

    fn add_used(&mut self, desc: DescriptorChain, len: u32) {
        assert_eq!(len as usize, desc.writer.bytes_written());
        self.state.lock().used.push(desc);
    }

    fn detach(&mut self, desc: DescriptorChain) {
        self.state.lock().detached.push(desc);
    }

    fn trigger_interrupt(&mut self) {
        self.state.lock().interrupts += 1;
    }
}

#[derive(Default)]
struct FakeMapperState {
    map_calls: usize,
    short_on_call: Option<usize>,
    live: BTreeMap<usize, usize>,
    unmapped: Vec<u64>,
    remap: bool,
    no_backing: BTreeSet<u64>,
    reservations: usize,
    next_reservation: usize,
}

/// Host mapper over an identity map of guest addresses that counts what is mapped.
#[derive(Default)]
pub struct FakeMapper {
    state: Mutex<FakeMapperState>,
}

const RESERVATION_BASE: usize = 0x7000_0000_0000;

impl FakeMapper {
    pub fn new() -> Arc<Self> {
        Arc::new(Default::default())
    }

    /// The `call`th map call (counting from 0) maps only half of the range.
    pub fn map_short_on_call(&self, call: usize) {
        self.state.lock().short_on_call = Some(call);
    }

    /// Supports reserving and overlaying, so output resources get remapped.
    pub fn enable_remap(&self) {
        self.state.lock().remap = true;
    }

    /// The guest range at `addr` has no backing file.
    pub fn drop_backing(&self, addr: u64) {
        self.state.lock().no_backing.insert(addr);
    }

    pub fn live_mappings(&self) -> usize {
        self.state.lock().live.len()
    }

    pub fn unmap_count(&self) -> usize {
        self.state.lock().unmapped.len()
    }

    /// Guest addresses of the unmapped ranges, in unmap order.
    pub fn unmapped_addrs(&self) -> Vec<u64> {
        self.state.lock().unmapped.clone()
    }

    pub fn map_calls(&self) -> usize {
        self.state.lock().map_calls
    }

    pub fn live_reservations(&self) -> usize {
        self.state.lock().reservations
    }
}

impl GuestMemoryMapper for FakeMapper {
    fn map(&self, addr: u64, len: u32, _dir: DmaDirection) -> Option<HostRegion> {
        let mut state = self.state.lock();
        let call = state.map_calls;
        state.map_calls += 1;
        let len = if state.short_on_call == Some(call) {
            (len / 2).max(1) as usize
        } else {
            len as usize
        };
        let addr = addr as usize;
        assert!(
            state.live.insert(addr, len).is_none(),
            "{:#x} mapped twice",
            addr
        );
        Some(HostRegion { addr, len })
    }

    fn unmap(&self, region: HostRegion, _dir: DmaDirection) {
        let mut state = self.state.lock();
        assert_eq!(
            state.live.remove(&region.addr),
            Some(region.len),
            "{:#x} unmapped but not mapped",
            region.addr
        );
        state.unmapped.push(region.addr as u64);
    }

    fn backing_file(&self, addr: u64, _len: u32) -> Option<BackingFile> {
        let state = self.state.lock();
        if !state.remap || state.no_backing.contains(&addr) {
            return None;
        }
        Some(BackingFile {
            handle: 1,
            offset: addr,
        })
    }

    fn reserve(&self, len: usize) -> Option<HostRegion> {
        let mut state = self.state.lock();
        if !state.remap {
            return None;
        }
        let addr = RESERVATION_BASE + state.next_reservation;
        state.next_reservation += len.next_multiple_of(0x1000);
        state.reservations += 1;
        Some(HostRegion { addr, len })
    }

    fn overlay(&self, at: usize, _len: usize, _backing: BackingFile) -> Option<usize> {
        Some(at)
    }

    fn release(&self, _region: HostRegion) {
        self.state.lock().reservations -= 1;
    }
}

/// A call the fake backend received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateStream(u32),
    DestroyStream(u32),
    Drain(u32),
    Clear(u32, QueueType),
    Queue(u32, QueueType, u32),
    DestroyAll(u32, QueueType),
    SetParams(u32, QueueType),
    SetControl(u32, CtrlVal),
}

struct FakeBackendState {
    calls: Vec<Call>,
    destroy: Completion,
    drain: Completion,
    clear: Completion,
    unreleased: BTreeSet<u32>,
    fail_create: bool,
    controls: BTreeMap<(u32, CtrlType), CtrlVal>,
}

/// A backend that records calls and answers as scripted. Queued work never completes by itself;
/// tests post completions through `handle()`.
pub struct FakeBackend {
    state: Mutex<FakeBackendState>,
    handle: Mutex<Option<CompletionHandle>>,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(FakeBackend {
            state: Mutex::new(FakeBackendState {
                calls: Vec::new(),
                destroy: Completion::Done,
                drain: Completion::Pending,
                clear: Completion::Pending,
                unreleased: BTreeSet::new(),
                fail_create: false,
                controls: BTreeMap::new(),
            }),
            handle: Mutex::new(None),
        })
    }

    pub fn set_destroy(&self, completion: Completion) {
        self.state.lock().destroy = completion;
    }

    pub fn set_drain(&self, completion: Completion) {
        self.state.lock().drain = completion;
    }

    pub fn set_clear(&self, completion: Completion) {
        self.state.lock().clear = completion;
    }

    pub fn fail_create(&self) {
        self.state.lock().fail_create = true;
    }

    /// `stream_released` reports `false` for `stream_id` until `release` is called.
    pub fn hold_release(&self, stream_id: u32) {
        self.state.lock().unreleased.insert(stream_id);
    }

    pub fn release(&self, stream_id: u32) {
        self.state.lock().unreleased.remove(&stream_id);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub fn handle(&self) -> CompletionHandle {
        match &*self.handle.lock() {
            Some(handle) => handle.clone(),
            None => panic!("backend is not attached"),
        }
    }

    fn record(&self, call: Call) {
        self.state.lock().calls.push(call);
    }
}

impl VideoBackend for FakeBackend {
    fn capabilities(&self) -> Capability {
        decoder_capability()
    }

    fn attach(&self, handle: CompletionHandle) {
        *self.handle.lock() = Some(handle);
    }

    fn create_stream(
        &self,
        stream_id: u32,
        _coded_format: Format,
        _input_mem_type: MemoryType,
        _output_mem_type: MemoryType,
    ) -> VideoResult<()> {
        self.record(Call::CreateStream(stream_id));
        if self.state.lock().fail_create {
            return Err(VideoError::OutOfMemory);
        }
        Ok(())
    }

    fn destroy_stream(&self, stream_id: u32) -> VideoResult<Completion> {
        self.record(Call::DestroyStream(stream_id));
        Ok(self.state.lock().destroy)
    }

    fn drain_stream(&self, stream_id: u32) -> VideoResult<Completion> {
        self.record(Call::Drain(stream_id));
        Ok(self.state.lock().drain)
    }

    fn queue_resource(&self, request: WorkRequest) -> VideoResult<()> {
        self.record(Call::Queue(
            request.stream_id,
            request.queue_type,
            request.resource.id(),
        ));
        Ok(())
    }

    fn destroy_all_resources(&self, stream_id: u32, queue_type: QueueType) -> VideoResult<()> {
        self.record(Call::DestroyAll(stream_id, queue_type));
        Ok(())
    }

    fn clear_queue(&self, stream_id: u32, queue_type: QueueType) -> VideoResult<Completion> {
        self.record(Call::Clear(stream_id, queue_type));
        Ok(self.state.lock().clear)
    }

    fn set_params(
        &self,
        stream_id: u32,
        queue_type: QueueType,
        params: Params,
    ) -> VideoResult<Params> {
        self.record(Call::SetParams(stream_id, queue_type));
        Ok(params)
    }

    fn get_control(&self, stream_id: u32, ctrl_type: CtrlType) -> VideoResult<CtrlVal> {
        self.state
            .lock()
            .controls
            .get(&(stream_id, ctrl_type))
            .copied()
            .ok_or(VideoError::UnsupportedControl(ctrl_type as u32))
    }

    fn set_control(&self, stream_id: u32, ctrl_val: CtrlVal) -> VideoResult<()> {
        self.record(Call::SetControl(stream_id, ctrl_val));
        self.state
            .lock()
            .controls
            .insert((stream_id, ctrl_val.ctrl_type()), ctrl_val);
        Ok(())
    }

    fn stream_released(&self, stream_id: u32) -> bool {
        !self.state.lock().unreleased.contains(&stream_id)
    }
}

fn range(min: u32, max: u32, step: u32) -> FormatRange {
    FormatRange { min, max, step }
}

/// H.264 and VP8 in, NV12 and YUV420 out.
pub fn decoder_capability() -> Capability {
    let frames = vec![FrameFormat {
        width: range(64, 1920, 16),
        height: range(64, 1080, 16),
        frame_rates: vec![range(1, 60, 1)],
    }];
    let desc = |format| FormatDesc {
        mask: 0b11,
        format,
        planes_layout: VIRTIO_VIDEO_PLANES_LAYOUT_SINGLE_BUFFER,
        plane_align: 1,
        frame_formats: frames.clone(),
    };
    let in_fmts = vec![desc(Format::H264), desc(Format::VP8)];
    let out_fmts = vec![desc(Format::NV12), desc(Format::YUV420)];
    let mut profiles = BTreeMap::new();
    profiles.insert(
        Format::H264,
        vec![Profile::H264Baseline, Profile::H264Main, Profile::H264High],
    );
    let mut levels = BTreeMap::new();
    levels.insert(Format::H264, vec![Level::H264_1_0, Level::H264_4_1]);
    Capability::new(in_fmts, out_fmts, profiles, levels)
}

/// Size of the writable part of request chains; enough for any response.
pub const RESP_SIZE: usize = 1024;

fn header(type_: u32, stream_id: u32) -> Vec<u8> {
    virtio_video_cmd_hdr {
        type_: Le32::from(type_),
        stream_id: Le32::from(stream_id),
    }
    .as_bytes()
    .to_vec()
}

/// A command made of a header and a fixed body, in one readable descriptor.
pub fn request<T: IntoBytes + zerocopy::Immutable>(
    index: u16,
    type_: u32,
    stream_id: u32,
    body: T,
) -> DescriptorChain {
    let mut req = header(type_, stream_id);
    req.extend_from_slice(body.as_bytes());
    DescriptorChain::new(index, vec![req], &[RESP_SIZE])
}

/// A command made of a header alone.
pub fn bare_request(index: u16, type_: u32, stream_id: u32) -> DescriptorChain {
    DescriptorChain::new(index, vec![header(type_, stream_id)], &[RESP_SIZE])
}

pub fn stream_create(index: u16, stream_id: u32, coded_format: Format) -> DescriptorChain {
    let mut body = virtio_video_stream_create::new_zeroed();
    body.coded_format = Le32::from(coded_format as u32);
    body.tag[..4].copy_from_slice(b"test");
    request(index, VIRTIO_VIDEO_CMD_STREAM_CREATE, stream_id, body)
}

/// A queue-typed command (destroy-all, clear, get-params, query-capability).
pub fn queue_request(index: u16, type_: u32, stream_id: u32, queue_type: u32) -> DescriptorChain {
    request(
        index,
        type_,
        stream_id,
        virtio_video_queue_clear {
            queue_type: Le32::from(queue_type),
            ..Default::default()
        },
    )
}

pub fn set_params(
    index: u16,
    stream_id: u32,
    queue_type: QueueType,
    format: Format,
    num_planes: u32,
) -> DescriptorChain {
    let params = virtio_video_params {
        queue_type: Le32::from(queue_type as u32),
        format: Le32::from(format as u32),
        frame_width: Le32::from(640),
        frame_height: Le32::from(480),
        num_planes: Le32::from(num_planes),
        ..Default::default()
    };
    request(
        index,
        VIRTIO_VIDEO_CMD_SET_PARAMS,
        stream_id,
        virtio_video_set_params { params },
    )
}

/// A resource-create command with the entries of every plane in a second descriptor.
pub fn resource_create(
    index: u16,
    stream_id: u32,
    queue_type: QueueType,
    resource_id: u32,
    planes: &[&[(u64, u32)]],
) -> DescriptorChain {
    let mut body = virtio_video_resource_create {
        queue_type: Le32::from(queue_type as u32),
        resource_id: Le32::from(resource_id),
        planes_layout: Le32::from(VIRTIO_VIDEO_PLANES_LAYOUT_PER_PLANE),
        num_planes: Le32::from(planes.len() as u32),
        ..Default::default()
    };
    let mut entries = Vec::new();
    for (i, plane) in planes.iter().enumerate() {
        body.num_entries[i] = Le32::from(plane.len() as u32);
        for &(addr, len) in plane.iter() {
            let entry = virtio_video_mem_entry {
                addr: Le64::from(addr),
                length: Le32::from(len),
                ..Default::default()
            };
            entries.extend_from_slice(entry.as_bytes());
        }
    }
    let mut req = header(VIRTIO_VIDEO_CMD_RESOURCE_CREATE, stream_id);
    req.extend_from_slice(body.as_bytes());
    DescriptorChain::new(index, vec![req, entries], &[RESP_SIZE])
}

pub fn resource_queue(
    index: u16,
    stream_id: u32,
    queue_type: QueueType,
    resource_id: u32,
    timestamp: u64,
) -> DescriptorChain {
    request(
        index,
        VIRTIO_VIDEO_CMD_RESOURCE_QUEUE,
        stream_id,
        virtio_video_resource_queue {
            queue_type: Le32::from(queue_type as u32),
            resource_id: Le32::from(resource_id),
            timestamp: Le64::from(timestamp),
            ..Default::default()
        },
    )
}

/// Response type and stream id of a returned chain.
pub fn response_header(desc: &DescriptorChain) -> (u32, u32) {
    let hdr = virtio_video_cmd_hdr::read_from_prefix(desc.writer.written())
        .map(|(hdr, _)| hdr)
        .unwrap_or_else(|_| panic!("descriptor {} has no response", desc.index));
    (hdr.type_.get(), hdr.stream_id.get())
}

/// Timestamp, flags and size of a resource-queue response.
pub fn queue_response(desc: &DescriptorChain) -> (u64, u32, u32) {
    let resp = virtio_video_resource_queue_resp::read_from_bytes(desc.writer.written())
        .unwrap_or_else(|_| panic!("descriptor {} is not a queue response", desc.index));
    assert_eq!(resp.hdr.type_.get(), VIRTIO_VIDEO_RESP_OK_RESOURCE_QUEUE);
    (resp.timestamp.get(), resp.flags.get(), resp.size.get())
}
