// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Per-stream state: negotiated parameters, resources, queued work and stream-wide commands.
//!
//! Every method here runs under the stream lock and never calls into the backend. Methods that
//! change what the guest or the backend must be told return an [`Outcome`] which the device acts
//! on once the lock is released.

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::sync::Arc;

use log::debug;
use log::warn;
use serde::Deserialize;
use serde::Serialize;

use crate::backend::WorkRequest;
use crate::command::QueueType;
use crate::config::PlanesLayoutPolicy;
use crate::error::VideoError;
use crate::error::VideoResult;
use crate::event::EvtType;
use crate::event::VideoEvt;
use crate::format::Format;
use crate::params::Params;
use crate::params::QueueInfo;
use crate::protocol::VIRTIO_VIDEO_BUFFER_FLAG_EOS;
use crate::reply::PendingReply;
use crate::reply::Reply;
use crate::resource::GuestMemoryMapper;
use crate::resource::Resource;
use crate::resource::ResourceSpec;
use crate::response::CmdError;
use crate::response::CmdResponse;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Init,
    Running,
    Drain,
    InputPaused,
    Terminate,
    /// A clear arrived while a drain was outstanding.
    DrainPlusClear,
    /// A destroy arrived behind a drain and a clear.
    DrainPlusClearDestroy,
}

/// A pair of values, one for each queue of a stream.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerQueue<T> {
    pub input: T,
    pub output: T,
}

impl<T> PerQueue<T> {
    pub fn get(&self, queue_type: QueueType) -> &T {
        match queue_type {
            QueueType::Input => &self.input,
            QueueType::Output => &self.output,
        }
    }

    pub fn get_mut(&mut self, queue_type: QueueType) -> &mut T {
        match queue_type {
            QueueType::Input => &mut self.input,
            QueueType::Output => &mut self.output,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamCmdKind {
    Drain,
    Clear(QueueType),
    Destroy,
}

/// A stream-wide command and the ticket it is answered through.
#[derive(Debug)]
pub struct StreamCmd {
    pub kind: StreamCmdKind,
    pub ticket: PendingReply,
}

/// A queued resource awaiting completion.
#[derive(Debug)]
pub struct WorkItem {
    pub resource: Arc<Resource>,
    pub timestamp: u64,
    pub data_sizes: Vec<u32>,
    pub ticket: PendingReply,
    /// Whether the backend has been handed this item. Input queued while the stream waits for
    /// new output parameters is held back.
    submitted: bool,
}

impl WorkItem {
    pub fn new(
        resource: Arc<Resource>,
        timestamp: u64,
        data_sizes: Vec<u32>,
        ticket: PendingReply,
    ) -> Self {
        WorkItem {
            resource,
            timestamp,
            data_sizes,
            ticket,
            submitted: false,
        }
    }

    fn request(&self, stream_id: u32) -> WorkRequest {
        WorkRequest {
            stream_id,
            queue_type: self.resource.queue_type(),
            resource: Arc::clone(&self.resource),
            timestamp: self.timestamp,
            data_sizes: self.data_sizes.clone(),
        }
    }
}

/// A decoded frame announced by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Frame {
    id: u32,
    timestamp: u64,
    flags: u32,
    size: u32,
}

/// What the device must do after a stream changed.
#[derive(Debug, Default)]
pub struct Outcome {
    pub replies: Vec<Reply>,
    pub events: Vec<VideoEvt>,
    /// Work to hand to the backend.
    pub submit: Vec<WorkRequest>,
    /// A stream-wide command that just became the in-flight one and must be issued.
    pub start: Option<StreamCmdKind>,
}

impl Outcome {
    fn reply(&mut self, ticket: PendingReply, response: CmdResponse) {
        self.replies.push((ticket, response));
    }
}

/// What survives a snapshot of a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSnapshot {
    pub id: u32,
    pub tag: String,
    pub coded_format: Format,
    pub queues: PerQueue<QueueInfo>,
    pub started: bool,
    pub awaiting_output_reconfig: bool,
    pub resources: Vec<ResourceSpec>,
}

pub struct Stream {
    id: u32,
    tag: String,
    coded_format: Format,
    queues: PerQueue<QueueInfo>,
    resources: PerQueue<BTreeMap<u32, Arc<Resource>>>,
    pending: PerQueue<VecDeque<WorkItem>>,
    /// Frames started but not ready yet.
    frames: VecDeque<Frame>,
    /// Ready frames with no output buffer to go into yet.
    ready_frames: VecDeque<Frame>,
    /// A drain completed while no output buffer was queued.
    eos_pending: bool,
    started: bool,
    awaiting_output_reconfig: bool,
    inflight: Option<StreamCmd>,
    deferred: VecDeque<StreamCmd>,
}

impl Stream {
    pub fn new(
        id: u32,
        tag: String,
        coded_format: Format,
        input: QueueInfo,
        output: QueueInfo,
    ) -> Self {
        Stream {
            id,
            tag,
            coded_format,
            queues: PerQueue { input, output },
            resources: Default::default(),
            pending: Default::default(),
            frames: Default::default(),
            ready_frames: Default::default(),
            eos_pending: false,
            started: false,
            awaiting_output_reconfig: false,
            inflight: None,
            deferred: Default::default(),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    fn idle_state(&self) -> StreamState {
        if self.awaiting_output_reconfig {
            StreamState::InputPaused
        } else if self.started {
            StreamState::Running
        } else {
            StreamState::Init
        }
    }

    pub fn state(&self) -> StreamState {
        let mut kinds = self
            .inflight
            .iter()
            .chain(self.deferred.iter())
            .map(|c| c.kind);
        let first = match kinds.next() {
            Some(kind) => kind,
            None => return self.idle_state(),
        };
        let rest: Vec<StreamCmdKind> = kinds.collect();
        let clear_queued = rest.iter().any(|k| matches!(k, StreamCmdKind::Clear(_)));
        let destroy_queued =
            first == StreamCmdKind::Destroy || rest.contains(&StreamCmdKind::Destroy);
        match first {
            StreamCmdKind::Drain if clear_queued && destroy_queued => {
                StreamState::DrainPlusClearDestroy
            }
            StreamCmdKind::Drain if clear_queued => StreamState::DrainPlusClear,
            _ if destroy_queued => StreamState::Terminate,
            StreamCmdKind::Drain => StreamState::Drain,
            _ => self.idle_state(),
        }
    }

    /// Whether a destroy has been accepted for this stream.
    pub fn is_terminating(&self) -> bool {
        matches!(
            self.state(),
            StreamState::Terminate | StreamState::DrainPlusClearDestroy
        )
    }

    fn check_alive(&self) -> VideoResult<()> {
        if self.is_terminating() {
            warn!("stream {}: command after destroy", self.id);
            return Err(VideoError::InvalidOperation);
        }
        Ok(())
    }

    pub fn queue_info(&self, queue_type: QueueType) -> &QueueInfo {
        self.queues.get(queue_type)
    }

    pub fn num_resources(&self, queue_type: QueueType) -> usize {
        self.resources.get(queue_type).len()
    }

    pub fn num_pending(&self, queue_type: QueueType) -> usize {
        self.pending.get(queue_type).len()
    }

    /// Whether nothing is queued, in flight or half-way through.
    pub fn is_quiescent(&self) -> bool {
        self.pending.input.is_empty()
            && self.pending.output.is_empty()
            && self.inflight.is_none()
            && self.deferred.is_empty()
            && self.frames.is_empty()
            && self.ready_frames.is_empty()
    }

    /// Parameters can only change while a queue has no resources.
    pub fn check_params_settable(&self, queue_type: QueueType) -> VideoResult<()> {
        self.check_alive()?;
        if !self.resources.get(queue_type).is_empty() {
            warn!(
                "stream {}: cannot set {:?} params while resources exist",
                self.id, queue_type
            );
            return Err(VideoError::InvalidOperation);
        }
        Ok(())
    }

    /// Stores params accepted by the backend. Setting output params resumes a stream paused by a
    /// resolution change, releasing the input held meanwhile.
    pub fn store_params(&mut self, queue_type: QueueType, params: Params) -> Outcome {
        let mut outcome = Outcome::default();
        let queue = self.queues.get_mut(queue_type);
        queue.params = params;
        queue.set = true;
        if queue_type == QueueType::Output && self.awaiting_output_reconfig {
            debug!("stream {}: output reconfigured, resuming input", self.id);
            self.awaiting_output_reconfig = false;
            for item in self.pending.input.iter_mut().filter(|w| !w.submitted) {
                item.submitted = true;
                outcome.submit.push(item.request(self.id));
            }
        }
        outcome
    }

    fn is_in_flight(&self, queue_type: QueueType, resource_id: u32) -> bool {
        self.pending
            .get(queue_type)
            .iter()
            .any(|w| w.resource.id() == resource_id)
    }

    /// Maps and attaches a resource, replacing an idle one with the same id.
    pub fn create_resource(
        &mut self,
        mapper: &Arc<dyn GuestMemoryMapper>,
        policy: &PlanesLayoutPolicy,
        spec: ResourceSpec,
    ) -> VideoResult<()> {
        self.check_alive()?;
        let queue_type = spec.queue_type;
        let resource_id = spec.id;
        if self.is_in_flight(queue_type, resource_id) {
            warn!(
                "stream {}: {:?} resource {} is in flight",
                self.id, queue_type, resource_id
            );
            return Err(VideoError::InvalidResourceId {
                stream_id: self.id,
                resource_id,
            });
        }
        if self.resources.get_mut(queue_type).remove(&resource_id).is_some() {
            debug!(
                "stream {}: replacing idle {:?} resource {}",
                self.id, queue_type, resource_id
            );
        }

        let queue = self.queues.get(queue_type);
        let resource = Resource::create(
            mapper,
            policy,
            queue.mem_type,
            queue.params.format,
            spec,
        )?;
        self.resources
            .get_mut(queue_type)
            .insert(resource_id, Arc::new(resource));
        Ok(())
    }

    /// Finds a resource that can be queued.
    pub fn queueable_resource(
        &self,
        queue_type: QueueType,
        resource_id: u32,
    ) -> VideoResult<Arc<Resource>> {
        self.check_alive()?;
        let invalid = VideoError::InvalidResourceId {
            stream_id: self.id,
            resource_id,
        };
        let resource = match self.resources.get(queue_type).get(&resource_id) {
            Some(r) => r,
            None => {
                warn!(
                    "stream {}: no {:?} resource {}",
                    self.id, queue_type, resource_id
                );
                return Err(invalid);
            }
        };
        if self.is_in_flight(queue_type, resource_id) {
            warn!(
                "stream {}: {:?} resource {} queued twice",
                self.id, queue_type, resource_id
            );
            return Err(invalid);
        }
        Ok(Arc::clone(resource))
    }

    /// Appends queued work. Output may complete right away with a pending end of stream or a
    /// frame that is already ready.
    pub fn push_work(&mut self, mut item: WorkItem) -> Outcome {
        let mut outcome = Outcome::default();
        let queue_type = item.resource.queue_type();
        self.started = true;

        if queue_type == QueueType::Output {
            if self.eos_pending {
                self.eos_pending = false;
                debug!(
                    "stream {}: signaling EOS with resource {}",
                    self.id,
                    item.resource.id()
                );
                outcome.reply(item.ticket, eos_response());
                return outcome;
            }
            if let Some(frame) = self.ready_frames.pop_front() {
                outcome.reply(item.ticket, frame_response(&frame));
                return outcome;
            }
        }

        if queue_type == QueueType::Input && self.awaiting_output_reconfig {
            debug!(
                "stream {}: holding input resource {} until output is reconfigured",
                self.id,
                item.resource.id()
            );
        } else {
            item.submitted = true;
            outcome.submit.push(item.request(self.id));
        }
        self.pending.get_mut(queue_type).push_back(item);
        outcome
    }

    /// Completes the oldest submitted work item of `resource_id`.
    pub fn buffer_done(
        &mut self,
        queue_type: QueueType,
        resource_id: u32,
        timestamp: u64,
        flags: u32,
        size: u32,
    ) -> Outcome {
        let mut outcome = Outcome::default();
        let pending = self.pending.get_mut(queue_type);
        let position = pending
            .iter()
            .position(|w| w.submitted && w.resource.id() == resource_id);
        match position.and_then(|p| pending.remove(p)) {
            Some(item) => outcome.reply(
                item.ticket,
                CmdResponse::ResourceQueue {
                    timestamp,
                    // End of stream is only signaled on drain completion.
                    flags: flags & !VIRTIO_VIDEO_BUFFER_FLAG_EOS,
                    size,
                },
            ),
            None => warn!(
                "stream {}: completion for {:?} resource {} which is not queued",
                self.id, queue_type, resource_id
            ),
        }
        outcome
    }

    /// Fails a work item the backend refused.
    pub fn abort_work(
        &mut self,
        queue_type: QueueType,
        resource_id: u32,
        error: VideoError,
    ) -> Option<Reply> {
        let pending = self.pending.get_mut(queue_type);
        let position = pending
            .iter()
            .rposition(|w| w.submitted && w.resource.id() == resource_id);
        let item = position.and_then(|p| pending.remove(p))?;
        warn!(
            "stream {}: backend refused {:?} resource {}: {}",
            self.id, queue_type, resource_id, error
        );
        Some((item.ticket, error.into()))
    }

    pub fn frame_started(&mut self, frame_id: u32, timestamp: u64) {
        self.frames.push_back(Frame {
            id: frame_id,
            timestamp,
            flags: 0,
            size: 0,
        });
    }

    /// Puts a ready frame into the oldest queued output buffer, or keeps it until one is queued.
    pub fn frame_ready(&mut self, frame_id: u32, flags: u32, size: u32) -> Outcome {
        let mut outcome = Outcome::default();
        let position = self.frames.iter().position(|f| f.id == frame_id);
        let mut frame = match position.and_then(|p| self.frames.remove(p)) {
            Some(frame) => frame,
            None => {
                warn!("stream {}: unknown frame {} is ready", self.id, frame_id);
                return outcome;
            }
        };
        frame.flags = flags & !VIRTIO_VIDEO_BUFFER_FLAG_EOS;
        frame.size = size;

        let position = self.pending.output.iter().position(|w| w.submitted);
        match position.and_then(|p| self.pending.output.remove(p)) {
            Some(item) => outcome.reply(item.ticket, frame_response(&frame)),
            None => self.ready_frames.push_back(frame),
        }
        outcome
    }

    /// Pauses input until the guest sets new output params.
    pub fn resolution_changed(&mut self, output: Params) -> Outcome {
        debug!(
            "stream {}: output changed to {}x{}",
            self.id, output.frame_width, output.frame_height
        );
        self.awaiting_output_reconfig = true;
        self.queues.output.params = output;
        Outcome {
            events: vec![VideoEvt {
                typ: EvtType::DecResChanged,
                stream_id: self.id,
            }],
            ..Default::default()
        }
    }

    /// Rejects a stream-wide command that cannot be accepted anymore.
    pub fn check_cmd_acceptable(&self) -> VideoResult<()> {
        self.check_alive()
    }

    /// The stream-wide command waiting for a backend acknowledgement, if any.
    pub fn inflight_kind(&self) -> Option<StreamCmdKind> {
        self.inflight.as_ref().map(|c| c.kind)
    }

    /// Accepts a stream-wide command. It starts right away when none is in flight and returns its
    /// kind, otherwise it waits behind the ones already accepted.
    pub fn begin_cmd(&mut self, cmd: StreamCmd) -> Option<StreamCmdKind> {
        let kind = cmd.kind;
        if self.inflight.is_some() {
            debug!("stream {}: deferring {:?}", self.id, kind);
            self.deferred.push_back(cmd);
            return None;
        }
        self.inflight = Some(cmd);
        Some(kind)
    }

    /// Applies the acknowledgement of the in-flight drain or clear, answers it and starts the next
    /// deferred command if there is one.
    pub fn finish_cmd(&mut self, kind: StreamCmdKind, result: VideoResult<()>) -> Outcome {
        let mut outcome = Outcome::default();
        let cmd = match self.inflight.take() {
            Some(cmd) if cmd.kind == kind => cmd,
            other => {
                warn!(
                    "stream {}: {:?} acknowledged while {:?} is in flight",
                    self.id,
                    kind,
                    other.as_ref().map(|c| c.kind)
                );
                self.inflight = other;
                return outcome;
            }
        };

        let response = match result {
            Ok(()) => {
                match kind {
                    StreamCmdKind::Drain => self.signal_eos(&mut outcome),
                    StreamCmdKind::Clear(queue_type) => self.cancel_queue(queue_type, &mut outcome),
                    StreamCmdKind::Destroy => {}
                }
                CmdResponse::NoData
            }
            Err(e) => {
                warn!("stream {}: {:?} failed: {}", self.id, kind, e);
                e.into()
            }
        };
        outcome.reply(cmd.ticket, response);

        if let Some(next) = self.deferred.pop_front() {
            outcome.start = Some(next.kind);
            self.inflight = Some(next);
        }
        outcome
    }

    fn signal_eos(&mut self, outcome: &mut Outcome) {
        let position = self.pending.output.iter().position(|w| w.submitted);
        match position.and_then(|p| self.pending.output.remove(p)) {
            Some(item) => {
                debug!(
                    "stream {}: signaling EOS with resource {}",
                    self.id,
                    item.resource.id()
                );
                outcome.reply(item.ticket, eos_response());
            }
            None => {
                debug!("stream {}: EOS waits for the next output buffer", self.id);
                self.eos_pending = true;
            }
        }
    }

    /// Answers every work item of a queue as cancelled.
    fn cancel_queue(&mut self, queue_type: QueueType, outcome: &mut Outcome) {
        let cancelled = self.pending.get_mut(queue_type).drain(..);
        for item in cancelled {
            outcome.reply(
                item.ticket,
                CmdResponse::ResourceQueue {
                    timestamp: item.timestamp,
                    flags: 0,
                    size: 0,
                },
            );
        }
        if queue_type == QueueType::Output {
            self.frames.clear();
            self.ready_frames.clear();
            self.eos_pending = false;
        }
    }

    /// Fails every queued work item. Used when the stream goes away.
    pub fn fail_all_work(&mut self) -> Vec<Reply> {
        let mut replies = Vec::new();
        for queue_type in [QueueType::Input, QueueType::Output] {
            for item in self.pending.get_mut(queue_type).drain(..) {
                replies.push((
                    item.ticket,
                    CmdResponse::Error(CmdError::InvalidOperation),
                ));
            }
        }
        self.frames.clear();
        self.ready_frames.clear();
        self.eos_pending = false;
        replies
    }

    /// Checks that a queue's resources can be destroyed.
    pub fn check_destroy_all(&self, queue_type: QueueType) -> VideoResult<()> {
        self.check_alive()?;
        if !self.pending.get(queue_type).is_empty() {
            warn!(
                "stream {}: cannot destroy {:?} resources while work is queued",
                self.id, queue_type
            );
            return Err(VideoError::InvalidOperation);
        }
        Ok(())
    }

    /// Detaches every resource of a queue. They are unmapped when the returned values are dropped.
    pub fn take_resources(&mut self, queue_type: QueueType) -> Vec<Arc<Resource>> {
        std::mem::take(self.resources.get_mut(queue_type))
            .into_values()
            .collect()
    }

    /// Ends the destruction of the stream: answers the destroy and drops every resource.
    pub fn finish_destroy(&mut self, result: VideoResult<()>) -> Option<Reply> {
        let _input = self.take_resources(QueueType::Input);
        let _output = self.take_resources(QueueType::Output);
        match self.inflight.take() {
            Some(cmd) if cmd.kind == StreamCmdKind::Destroy => {
                let response = match result {
                    Ok(()) => CmdResponse::NoData,
                    Err(e) => e.into(),
                };
                Some((cmd.ticket, response))
            }
            other => {
                warn!("stream {}: destroy finished without a destroy command", self.id);
                self.inflight = other;
                None
            }
        }
    }

    /// Fails everything the stream still holds, for device teardown.
    pub fn teardown(&mut self) -> Vec<Reply> {
        let mut replies = self.fail_all_work();
        for cmd in self.inflight.take().into_iter().chain(self.deferred.drain(..)) {
            replies.push((cmd.ticket, CmdResponse::Error(CmdError::InvalidOperation)));
        }
        let _input = self.take_resources(QueueType::Input);
        let _output = self.take_resources(QueueType::Output);
        replies
    }

    pub fn snapshot(&self) -> StreamSnapshot {
        let resources = [QueueType::Input, QueueType::Output]
            .iter()
            .flat_map(|q| self.resources.get(*q).values())
            .map(|r| r.spec().clone())
            .collect();
        StreamSnapshot {
            id: self.id,
            tag: self.tag.clone(),
            coded_format: self.coded_format,
            queues: self.queues.clone(),
            started: self.started,
            awaiting_output_reconfig: self.awaiting_output_reconfig,
            resources,
        }
    }

    /// Rebuilds a stream from a snapshot, mapping its resources again.
    pub fn restore(
        snapshot: StreamSnapshot,
        mapper: &Arc<dyn GuestMemoryMapper>,
        policy: &PlanesLayoutPolicy,
    ) -> VideoResult<Stream> {
        let StreamSnapshot {
            id,
            tag,
            coded_format,
            queues,
            started,
            awaiting_output_reconfig,
            resources,
        } = snapshot;
        let mut stream = Stream::new(id, tag, coded_format, queues.input, queues.output);
        stream.started = started;
        stream.awaiting_output_reconfig = awaiting_output_reconfig;
        for spec in resources {
            stream.create_resource(mapper, policy, spec)?;
        }
        Ok(stream)
    }
}

fn eos_response() -> CmdResponse {
    CmdResponse::ResourceQueue {
        timestamp: 0,
        flags: VIRTIO_VIDEO_BUFFER_FLAG_EOS,
        size: 0,
    }
}

fn frame_response(frame: &Frame) -> CmdResponse {
    CmdResponse::ResourceQueue {
        timestamp: frame.timestamp,
        flags: frame.flags,
        size: frame.size,
    }
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.id)
            .field("tag", &self.tag)
            .field("state", &self.state())
            .field("inputs", &self.resources.input.len())
            .field("outputs", &self.resources.output.len())
            .finish()
    }
}
