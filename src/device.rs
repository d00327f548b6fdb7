// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The virtio video device: command dispatch, backend completions, snapshot and teardown.
//!
//! Every entry point takes the device lock (the stream table) first, then at most one stream lock
//! at a time. Backend calls are made with no stream lock held. The command and event queues are
//! leaf locks.

use std::collections::BTreeMap;
use std::sync::mpsc;
use std::sync::mpsc::Receiver;
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::bail;
use anyhow::Context;
use log::debug;
use log::error;
use log::warn;
use serde::Deserialize;
use serde::Serialize;
use sync::Mutex;
use zerocopy::IntoBytes;

use crate::backend::null::NullBackend;
use crate::backend::BackendEvent;
use crate::backend::Completion;
use crate::backend::CompletionHandle;
use crate::backend::VideoBackend;
use crate::capability::Capability;
use crate::command::QueueType;
use crate::command::ReadCmdError;
use crate::command::VideoCmd;
use crate::config::device_config;
use crate::config::supported_virtio_features;
use crate::config::VideoBackendType;
use crate::config::VideoDeviceConfig;
use crate::config::VideoDeviceType;
use crate::config::QUEUE_SIZES;
use crate::descriptor::DescriptorChain;
use crate::error::VideoError;
use crate::error::VideoResult;
use crate::event::EvtType;
use crate::event::VideoEvt;
use crate::event_queue::EventQueue;
use crate::params::Params;
use crate::params::QueueInfo;
use crate::queue::CommandQueue;
use crate::queue::VideoQueue;
use crate::reply::PendingReply;
use crate::reply::Reply;
use crate::resource::GuestMemoryMapper;
use crate::resource::ResourceSpec;
use crate::response::CmdResponse;
use crate::stream::Outcome;
use crate::stream::PerQueue;
use crate::stream::Stream;
use crate::stream::StreamCmd;
use crate::stream::StreamCmdKind;
use crate::stream::StreamSnapshot;
use crate::stream::WorkItem;
use crate::watchdog;
use crate::watchdog::Overdue;
use crate::worker;
use crate::worker::WorkerMsg;
use crate::Error;

type StreamMap = BTreeMap<u32, Arc<Mutex<Stream>>>;

fn other_queue(queue_type: QueueType) -> QueueType {
    match queue_type {
        QueueType::Input => QueueType::Output,
        QueueType::Output => QueueType::Input,
    }
}

fn lookup(streams: &StreamMap, stream_id: u32) -> VideoResult<Arc<Mutex<Stream>>> {
    match streams.get(&stream_id) {
        Some(stream) => Ok(Arc::clone(stream)),
        None => {
            error!("no stream with id {}", stream_id);
            Err(VideoError::InvalidStreamId(stream_id))
        }
    }
}

fn take_ticket(ticket: &mut Option<PendingReply>) -> VideoResult<PendingReply> {
    ticket.take().ok_or_else(|| {
        error!("command ticket was already taken");
        VideoError::InvalidOperation
    })
}

#[derive(Serialize, Deserialize)]
struct DeviceSnapshot {
    model: VideoDeviceType,
    streams: Vec<StreamSnapshot>,
}

/// State shared by the device, its message thread and its watchdog.
pub(crate) struct DeviceShared {
    config: VideoDeviceConfig,
    backend: Arc<dyn VideoBackend>,
    mapper: Arc<dyn GuestMemoryMapper>,
    capability: Capability,
    streams: Mutex<StreamMap>,
    cmd_queue: Mutex<Option<CommandQueue>>,
    event_queue: Mutex<Option<EventQueue>>,
    overdue: Overdue,
}

impl DeviceShared {
    pub fn backend(&self) -> &dyn VideoBackend {
        self.backend.as_ref()
    }

    pub fn overdue(&self) -> &Overdue {
        &self.overdue
    }

    /// Handles one message. Returns false when the worker must stop.
    pub fn handle_msg(&self, msg: WorkerMsg) -> bool {
        match msg {
            WorkerMsg::CmdQueue => self.process_cmd_queue(),
            WorkerMsg::EventQueue => self.process_event_queue(),
            WorkerMsg::Backend(event) => self.handle_backend_event(event),
            WorkerMsg::Barrier(ack) => {
                // The waiter may have given up; nothing else to do.
                let _ = ack.send(());
            }
            WorkerMsg::Kill => return false,
        }
        true
    }

    fn process_cmd_queue(&self) {
        loop {
            let desc = match self.cmd_queue.lock().as_mut().and_then(CommandQueue::pop) {
                Some(desc) => desc,
                None => break,
            };
            self.handle_desc(desc);
        }
    }

    fn process_event_queue(&self) {
        if let Some(event_queue) = self.event_queue.lock().as_mut() {
            event_queue.handle_available();
        }
    }

    fn handle_desc(&self, mut desc: DescriptorChain) {
        let cmd = match VideoCmd::from_reader(&mut desc.reader) {
            Ok(cmd) => cmd,
            Err(ReadCmdError::InvalidRequest { stream_id, error }) => {
                error!("invalid request for stream {}: {}", stream_id, error);
                self.send_replies(vec![(
                    PendingReply::new(stream_id, desc),
                    CmdResponse::from(error),
                )]);
                return;
            }
            Err(e) => {
                let index = desc.index;
                if let Some(cmd_queue) = self.cmd_queue.lock().as_mut() {
                    cmd_queue.mark_broken(&Error::ReadFailure(e));
                    cmd_queue.detach(desc);
                }
                debug!("detached malformed command {}", index);
                return;
            }
        };
        debug!("processing {:?}", cmd);

        let stream_id = cmd.stream_id();
        let mut ticket = Some(PendingReply::new(stream_id, desc));
        let result = {
            let mut streams = self.streams.lock();
            self.dispatch(&mut streams, cmd, &mut ticket)
        };
        let response = match result {
            Ok(Some(response)) => response,
            Ok(None) => return,
            Err(e) => {
                warn!("command for stream {} failed: {}", stream_id, e);
                e.into()
            }
        };
        match ticket {
            Some(ticket) => self.send_replies(vec![(ticket, response)]),
            None => error!("no ticket left for response {:?}", response),
        }
    }

    /// Runs one command. `Ok(None)` means `ticket` was taken and is answered later.
    fn dispatch(
        &self,
        streams: &mut StreamMap,
        cmd: VideoCmd,
        ticket: &mut Option<PendingReply>,
    ) -> VideoResult<Option<CmdResponse>> {
        use VideoCmd::*;
        match cmd {
            QueryCapability { queue_type, .. } => Ok(Some(CmdResponse::QueryCapability(
                self.capability.serialize(queue_type),
            ))),
            StreamCreate {
                stream_id,
                coded_format,
                input_mem_type,
                output_mem_type,
                tag,
            } => {
                if streams.contains_key(&stream_id) || self.overdue.contains(stream_id) {
                    error!("stream {} already exists", stream_id);
                    return Err(VideoError::InvalidStreamId(stream_id));
                }
                let coded_queue = self.config.model.coded_queue();
                if !self.capability.supports(coded_queue, coded_format) {
                    error!(
                        "{} is not supported on the {:?} queue",
                        coded_format, coded_queue
                    );
                    return Err(VideoError::InvalidParameter);
                }
                self.backend.create_stream(
                    stream_id,
                    coded_format,
                    input_mem_type,
                    output_mem_type,
                )?;

                let mut formats = PerQueue::default();
                *formats.get_mut(coded_queue) = Some(coded_format);
                *formats.get_mut(other_queue(coded_queue)) =
                    self.capability.first_format(other_queue(coded_queue));
                let initial = |queue_type, mem_type| {
                    let params = Params {
                        format: *formats.get(queue_type),
                        ..Default::default()
                    };
                    QueueInfo::new(
                        mem_type,
                        self.backend.get_params(stream_id, queue_type, params),
                    )
                };
                let stream = Stream::new(
                    stream_id,
                    tag,
                    coded_format,
                    initial(QueueType::Input, input_mem_type),
                    initial(QueueType::Output, output_mem_type),
                );
                debug!("created {:?}", stream);
                streams.insert(stream_id, Arc::new(Mutex::new(stream)));
                Ok(Some(CmdResponse::NoData))
            }
            StreamDestroy { stream_id } => {
                self.begin_stream_cmd(streams, stream_id, StreamCmdKind::Destroy, ticket)
            }
            StreamDrain { stream_id } => {
                self.begin_stream_cmd(streams, stream_id, StreamCmdKind::Drain, ticket)
            }
            QueueClear {
                stream_id,
                queue_type,
            } => self.begin_stream_cmd(
                streams,
                stream_id,
                StreamCmdKind::Clear(queue_type),
                ticket,
            ),
            ResourceCreate {
                stream_id,
                queue_type,
                resource_id,
                planes_layout,
                plane_offsets,
                plane_entries,
            } => {
                let stream = lookup(streams, stream_id)?;
                let spec = ResourceSpec {
                    id: resource_id,
                    queue_type,
                    planes_layout,
                    plane_offsets,
                    plane_entries,
                };
                stream
                    .lock()
                    .create_resource(&self.mapper, &self.config.planes_layout, spec)?;
                Ok(Some(CmdResponse::NoData))
            }
            ResourceQueue {
                stream_id,
                queue_type,
                resource_id,
                timestamp,
                data_sizes,
            } => {
                let stream = lookup(streams, stream_id)?;
                let outcome = {
                    let mut stream = stream.lock();
                    let resource = stream.queueable_resource(queue_type, resource_id)?;
                    let ticket = take_ticket(ticket)?;
                    stream.push_work(WorkItem::new(resource, timestamp, data_sizes, ticket))
                };
                self.apply(&stream, outcome);
                Ok(None)
            }
            ResourceDestroyAll {
                stream_id,
                queue_type,
            } => {
                let stream = lookup(streams, stream_id)?;
                stream.lock().check_destroy_all(queue_type)?;
                self.backend.destroy_all_resources(stream_id, queue_type)?;
                let resources = stream.lock().take_resources(queue_type);
                debug!(
                    "stream {}: destroyed {} {:?} resources",
                    stream_id,
                    resources.len(),
                    queue_type
                );
                Ok(Some(CmdResponse::NoData))
            }
            GetParams {
                stream_id,
                queue_type,
            } => {
                let stream = lookup(streams, stream_id)?;
                let current = stream.lock().queue_info(queue_type).params.clone();
                let params = self.backend.get_params(stream_id, queue_type, current);
                Ok(Some(CmdResponse::GetParams { queue_type, params }))
            }
            SetParams {
                stream_id,
                queue_type,
                params,
            } => {
                let stream = lookup(streams, stream_id)?;
                stream.lock().check_params_settable(queue_type)?;
                match params.format {
                    Some(format) if self.capability.supports(queue_type, format) => {}
                    format => {
                        error!(
                            "stream {}: format {:?} is not supported on the {:?} queue",
                            stream_id, format, queue_type
                        );
                        return Err(VideoError::InvalidParameter);
                    }
                }
                let params = self.backend.set_params(stream_id, queue_type, params)?;
                let outcome = stream.lock().store_params(queue_type, params);
                self.apply(&stream, outcome);
                Ok(Some(CmdResponse::NoData))
            }
            QueryControl { query_ctrl_type, .. } => {
                let response = self
                    .backend
                    .query_control(&self.capability, &query_ctrl_type)?;
                Ok(Some(CmdResponse::QueryControl(response)))
            }
            GetControl {
                stream_id,
                ctrl_type,
            } => {
                lookup(streams, stream_id)?;
                let value = self.backend.get_control(stream_id, ctrl_type)?;
                match value.to_raw() {
                    Some(raw) => Ok(Some(CmdResponse::GetControl(raw))),
                    None => Err(VideoError::UnsupportedControl(ctrl_type as u32)),
                }
            }
            SetControl {
                stream_id,
                ctrl_val,
            } => {
                lookup(streams, stream_id)?;
                self.backend.set_control(stream_id, ctrl_val)?;
                Ok(Some(CmdResponse::NoData))
            }
        }
    }

    /// Accepts a drain, clear or destroy, starting it unless another one is in flight.
    fn begin_stream_cmd(
        &self,
        streams: &mut StreamMap,
        stream_id: u32,
        kind: StreamCmdKind,
        ticket: &mut Option<PendingReply>,
    ) -> VideoResult<Option<CmdResponse>> {
        let stream = lookup(streams, stream_id)?;
        let start = {
            let mut stream = stream.lock();
            stream.check_cmd_acceptable()?;
            let ticket = take_ticket(ticket)?;
            stream.begin_cmd(StreamCmd { kind, ticket })
        };
        if let Some(kind) = start {
            self.run_stream_cmd(streams, stream_id, kind);
        }
        Ok(None)
    }

    /// Issues a stream-wide command to the backend, then every deferred command that becomes
    /// startable because the previous one completed synchronously.
    fn run_stream_cmd(&self, streams: &mut StreamMap, stream_id: u32, kind: StreamCmdKind) {
        let mut next = Some(kind);
        while let Some(kind) = next.take() {
            debug!("stream {}: starting {:?}", stream_id, kind);
            let result = match kind {
                StreamCmdKind::Drain => self.backend.drain_stream(stream_id),
                StreamCmdKind::Clear(queue_type) => self.backend.clear_queue(stream_id, queue_type),
                StreamCmdKind::Destroy => {
                    self.destroy_stream(streams, stream_id);
                    return;
                }
            };
            next = match result {
                Ok(Completion::Pending) => None,
                Ok(Completion::Done) => self.finish_stream_cmd(streams, stream_id, kind, Ok(())),
                Err(e) => self.finish_stream_cmd(streams, stream_id, kind, Err(e)),
            };
        }
    }

    fn finish_stream_cmd(
        &self,
        streams: &StreamMap,
        stream_id: u32,
        kind: StreamCmdKind,
        result: VideoResult<()>,
    ) -> Option<StreamCmdKind> {
        let stream = Arc::clone(streams.get(&stream_id)?);
        let outcome = stream.lock().finish_cmd(kind, result);
        self.apply(&stream, outcome)
    }

    /// Removes the stream, fails its queued work and asks the backend to release it.
    fn destroy_stream(&self, streams: &mut StreamMap, stream_id: u32) {
        let stream = match streams.remove(&stream_id) {
            Some(stream) => stream,
            None => return,
        };
        let replies = {
            let mut stream = stream.lock();
            debug!(
                "stream {}: destroying with {}/{} resources and {}/{} buffers queued",
                stream_id,
                stream.num_resources(QueueType::Input),
                stream.num_resources(QueueType::Output),
                stream.num_pending(QueueType::Input),
                stream.num_pending(QueueType::Output)
            );
            stream.fail_all_work()
        };
        self.send_replies(replies);
        if let Some(event_queue) = self.event_queue.lock().as_mut() {
            event_queue.discard_stream(stream_id);
        }
        match self.backend.destroy_stream(stream_id) {
            Ok(Completion::Done) => self.finalize(&stream, Ok(())),
            Ok(Completion::Pending) => {
                debug!("stream {}: destruction is overdue", stream_id);
                self.overdue.add(stream_id, stream);
            }
            Err(e) => {
                error!("backend failed to destroy stream {}: {}", stream_id, e);
                self.finalize(&stream, Err(e));
            }
        }
    }

    fn finalize(&self, stream: &Arc<Mutex<Stream>>, result: VideoResult<()>) {
        let reply = stream.lock().finish_destroy(result);
        self.send_replies(reply.into_iter().collect());
    }

    /// Completes the destruction of a stream the backend has released.
    pub fn finalize_overdue(&self, stream_id: u32) {
        let _streams = self.streams.lock();
        if let Some(stream) = self.overdue.take(stream_id) {
            self.finalize(&stream, Ok(()));
        }
    }

    /// Acts on what a stream asked for, returning the stream-wide command to start next.
    fn apply(&self, stream: &Arc<Mutex<Stream>>, outcome: Outcome) -> Option<StreamCmdKind> {
        let Outcome {
            replies,
            events,
            submit,
            start,
        } = outcome;
        self.send_replies(replies);
        self.raise_events(events);
        for request in submit {
            let queue_type = request.queue_type;
            let resource_id = request.resource.id();
            if let Err(e) = self.backend.queue_resource(request) {
                let reply = stream.lock().abort_work(queue_type, resource_id, e);
                self.send_replies(reply.into_iter().collect());
            }
        }
        start
    }

    fn handle_backend_event(&self, event: BackendEvent) {
        let mut streams = self.streams.lock();
        let stream_id = event.stream_id();
        if let BackendEvent::StreamReleased { .. } = event {
            if let Some(stream) = self.overdue.take(stream_id) {
                self.finalize(&stream, Ok(()));
            }
            return;
        }
        let stream = match streams.get(&stream_id) {
            Some(stream) => Arc::clone(stream),
            None => {
                warn!("dropping {:?} for a stream that is gone", event);
                return;
            }
        };

        let outcome = match event {
            BackendEvent::BufferDone {
                queue_type,
                resource_id,
                timestamp,
                flags,
                size,
                ..
            } => stream
                .lock()
                .buffer_done(queue_type, resource_id, timestamp, flags, size),
            BackendEvent::FrameStarted {
                frame_id,
                timestamp,
                ..
            } => {
                stream.lock().frame_started(frame_id, timestamp);
                return;
            }
            BackendEvent::FrameReady {
                frame_id,
                flags,
                size,
                ..
            } => stream.lock().frame_ready(frame_id, flags, size),
            BackendEvent::DrainDone { result, .. } => {
                stream.lock().finish_cmd(StreamCmdKind::Drain, result)
            }
            BackendEvent::ClearDone { result, .. } => {
                let mut stream = stream.lock();
                match stream.inflight_kind() {
                    Some(kind @ StreamCmdKind::Clear(_)) => stream.finish_cmd(kind, result),
                    other => {
                        warn!(
                            "stream {}: clear acknowledged while {:?} is in flight",
                            stream_id, other
                        );
                        return;
                    }
                }
            }
            BackendEvent::ResolutionChanged { output, .. } => {
                stream.lock().resolution_changed(output)
            }
            BackendEvent::Error { .. } => {
                error!("backend reported an error on stream {}", stream_id);
                Outcome {
                    events: vec![VideoEvt {
                        typ: EvtType::Error,
                        stream_id,
                    }],
                    ..Default::default()
                }
            }
            BackendEvent::StreamReleased { .. } => return,
        };
        if let Some(kind) = self.apply(&stream, outcome) {
            self.run_stream_cmd(&mut streams, stream_id, kind);
        }
    }

    /// Writes responses into their chains and returns them to the guest.
    fn send_replies(&self, replies: Vec<Reply>) {
        if replies.is_empty() {
            return;
        }
        let mut cmd_queue = self.cmd_queue.lock();
        for (ticket, response) in replies {
            let stream_id = ticket.stream_id();
            let (desc, result) = ticket.complete(&response);
            let queue = match cmd_queue.as_mut() {
                Some(queue) => queue,
                None => {
                    warn!("no command queue for the response to stream {}", stream_id);
                    continue;
                }
            };
            match result {
                Ok(()) => {
                    debug!("stream {}: responded {:?}", stream_id, response);
                    queue.complete(desc);
                }
                Err(error) => {
                    queue.mark_broken(&Error::WriteResponse {
                        index: desc.index,
                        error,
                    });
                    queue.detach(desc);
                }
            }
        }
        if let Some(cmd_queue) = cmd_queue.as_mut() {
            cmd_queue.trigger_interrupt();
        }
    }

    fn raise_events(&self, events: Vec<VideoEvt>) {
        if events.is_empty() {
            return;
        }
        match self.event_queue.lock().as_mut() {
            Some(event_queue) => {
                for event in events {
                    event_queue.raise(event);
                }
            }
            None => warn!("no event queue, dropping {} events", events.len()),
        }
    }

    /// Fails everything still pending, destroys every stream and releases both queues.
    fn teardown(&self) {
        let mut streams = self.streams.lock();
        for (stream_id, stream) in std::mem::take(&mut *streams) {
            if let Err(e) = self.backend.destroy_stream(stream_id) {
                warn!("backend failed to destroy stream {}: {}", stream_id, e);
            }
            let replies = stream.lock().teardown();
            self.send_replies(replies);
        }
        for stream in self.overdue.take_all() {
            let replies = stream.lock().teardown();
            self.send_replies(replies);
        }
        if let Some(mut event_queue) = self.event_queue.lock().take() {
            event_queue.teardown();
        }
        *self.cmd_queue.lock() = None;
    }

    fn snapshot(&self) -> anyhow::Result<DeviceSnapshot> {
        let streams = self.streams.lock();
        if !self.overdue.is_empty() {
            bail!("cannot snapshot while a stream destruction is pending");
        }
        let mut snapshots = Vec::with_capacity(streams.len());
        for (stream_id, stream) in streams.iter() {
            let stream = stream.lock();
            if !stream.is_quiescent() {
                bail!("cannot snapshot stream {} while it has work in flight", stream_id);
            }
            snapshots.push(stream.snapshot());
        }
        Ok(DeviceSnapshot {
            model: self.config.model,
            streams: snapshots,
        })
    }

    fn restore(&self, snapshot: DeviceSnapshot) -> anyhow::Result<()> {
        if snapshot.model != self.config.model {
            bail!(
                "snapshot of a {:?} device cannot be restored into a {:?} device",
                snapshot.model,
                self.config.model
            );
        }
        let mut streams = self.streams.lock();
        if !streams.is_empty() || !self.overdue.is_empty() {
            bail!("cannot restore over live streams");
        }

        let mut restored = StreamMap::new();
        for stream in snapshot.streams {
            match self.restore_stream(stream) {
                Ok(stream) => {
                    restored.insert(stream.id(), Arc::new(Mutex::new(stream)));
                }
                Err(e) => {
                    for stream_id in restored.keys() {
                        if let Err(e) = self.backend.destroy_stream(*stream_id) {
                            warn!("failed to roll back stream {}: {}", stream_id, e);
                        }
                    }
                    return Err(e);
                }
            }
        }
        *streams = restored;
        Ok(())
    }

    fn restore_stream(&self, snapshot: StreamSnapshot) -> anyhow::Result<Stream> {
        let stream_id = snapshot.id;
        self.backend
            .create_stream(
                stream_id,
                snapshot.coded_format,
                snapshot.queues.input.mem_type,
                snapshot.queues.output.mem_type,
            )
            .with_context(|| format!("failed to recreate stream {}", stream_id))?;

        let configure = || -> anyhow::Result<Stream> {
            for queue_type in [QueueType::Input, QueueType::Output] {
                let info = snapshot.queues.get(queue_type);
                if info.set {
                    self.backend
                        .set_params(stream_id, queue_type, info.params.clone())
                        .with_context(|| {
                            format!("failed to restore {:?} params of stream {}", queue_type, stream_id)
                        })?;
                }
            }
            Stream::restore(snapshot, &self.mapper, &self.config.planes_layout)
                .with_context(|| format!("failed to restore resources of stream {}", stream_id))
        };
        let result = configure();
        if result.is_err() {
            if let Err(e) = self.backend.destroy_stream(stream_id) {
                warn!("failed to roll back stream {}: {}", stream_id, e);
            }
        }
        result
    }
}

/// Name of the message thread when no I/O thread is configured.
const WORKER_THREAD_NAME: &str = "v_video_worker";

/// A virtio video encoder or decoder.
pub struct VideoDevice {
    shared: Arc<DeviceShared>,
    sender: Sender<WorkerMsg>,
    /// Moved to the message thread on activation.
    receiver: Option<Receiver<WorkerMsg>>,
    worker_thread: Option<JoinHandle<()>>,
    watchdog_thread: Option<JoinHandle<()>>,
}

impl VideoDevice {
    /// Realizes the device with the backend named in `config`.
    pub fn realize(
        config: VideoDeviceConfig,
        mapper: Arc<dyn GuestMemoryMapper>,
    ) -> anyhow::Result<Self> {
        let backend: Arc<dyn VideoBackend> = match config.backend {
            VideoBackendType::Null => Arc::new(NullBackend::new(config.model)),
            other => bail!("the {:?} backend is not available in this build", other),
        };
        Self::with_backend(config, backend, mapper)
    }

    /// Realizes the device on top of a backend provided by the embedder.
    pub fn with_backend(
        config: VideoDeviceConfig,
        backend: Arc<dyn VideoBackend>,
        mapper: Arc<dyn GuestMemoryMapper>,
    ) -> anyhow::Result<Self> {
        let (sender, receiver) = mpsc::channel();
        backend.attach(CompletionHandle::new(sender.clone()));
        let capability = backend.capabilities();
        let coded_queue = config.model.coded_queue();
        if capability.formats(coded_queue).is_empty() {
            bail!(
                "backend supports no coded format on the {:?} queue",
                coded_queue
            );
        }
        let shared = Arc::new(DeviceShared {
            config,
            backend,
            mapper,
            capability,
            streams: Mutex::new(BTreeMap::new()),
            cmd_queue: Mutex::new(None),
            event_queue: Mutex::new(None),
            overdue: Overdue::new(),
        });
        Ok(VideoDevice {
            shared,
            sender,
            receiver: Some(receiver),
            worker_thread: None,
            watchdog_thread: None,
        })
    }

    pub fn device_type(&self) -> u32 {
        self.shared.config.model.device_id()
    }

    pub fn queue_max_sizes(&self) -> &[u16] {
        QUEUE_SIZES
    }

    pub fn features(&self) -> u64 {
        supported_virtio_features()
    }

    pub fn read_config(&self, offset: u64, data: &mut [u8]) {
        let cfg = device_config();
        let bytes = cfg.as_bytes();
        let offset = match usize::try_from(offset) {
            Ok(offset) if offset < bytes.len() => offset,
            _ => return,
        };
        let len = data.len().min(bytes.len() - offset);
        data[..len].copy_from_slice(&bytes[offset..offset + len]);
    }

    pub fn write_config(&self, offset: u64, data: &[u8]) {
        warn!(
            "ignoring a {} byte write to the read-only config space at {:#x}",
            data.len(),
            offset
        );
    }

    /// Starts processing the queues. Spawns the watchdog and the message thread, which applies
    /// backend completions as they are posted. Queue notifications are served on that thread
    /// only when an I/O thread is configured.
    pub fn activate(
        &mut self,
        cmd_queue: Box<dyn VideoQueue>,
        event_queue: Box<dyn VideoQueue>,
    ) -> anyhow::Result<()> {
        if self.watchdog_thread.is_some() {
            bail!("device is already active");
        }
        *self.shared.cmd_queue.lock() = Some(CommandQueue::new(cmd_queue));
        *self.shared.event_queue.lock() = Some(EventQueue::new(event_queue));

        self.watchdog_thread = Some(
            watchdog::spawn(Arc::clone(&self.shared)).context("failed to spawn video watchdog")?,
        );
        let name = match &self.shared.config.iothread {
            Some(name) => name.clone(),
            None => WORKER_THREAD_NAME.to_string(),
        };
        let receiver = self
            .receiver
            .take()
            .context("message channel is already in use")?;
        self.worker_thread = Some(
            worker::spawn(name.clone(), Arc::clone(&self.shared), receiver)
                .with_context(|| format!("failed to spawn video worker {}", name))?,
        );
        Ok(())
    }

    fn notify(&self, msg: WorkerMsg) {
        if self.shared.config.iothread.is_some() {
            if let Err(e) = self.sender.send(msg) {
                error!("video worker is gone, dropping {:?}", e.0);
            }
        } else {
            self.shared.handle_msg(msg);
            // Completions the backend posted during the call are answered before returning.
            self.process_backend_events();
        }
    }

    /// The guest made command buffers available.
    pub fn kick_command_queue(&self) {
        self.notify(WorkerMsg::CmdQueue);
    }

    /// The guest posted event buffers.
    pub fn kick_event_queue(&self) {
        self.notify(WorkerMsg::EventQueue);
    }

    /// Blocks until every backend event posted so far has been applied. Completions are applied
    /// on their own as they arrive; this only orders the caller after them.
    pub fn process_backend_events(&self) {
        if self.worker_thread.is_none() {
            return;
        }
        let (ack, done) = mpsc::channel();
        if self.sender.send(WorkerMsg::Barrier(ack)).is_err() || done.recv().is_err() {
            warn!("video worker is gone, backend events were not applied");
        }
    }

    /// Captures every stream. Fails while any stream has work in flight.
    pub fn snapshot(&self) -> anyhow::Result<serde_json::Value> {
        let snapshot = self.shared.snapshot()?;
        serde_json::to_value(snapshot).context("failed to serialize video device snapshot")
    }

    /// Recreates the streams of a snapshot. The device must have no streams.
    pub fn restore(&self, data: serde_json::Value) -> anyhow::Result<()> {
        let snapshot: DeviceSnapshot =
            serde_json::from_value(data).context("failed to deserialize video device snapshot")?;
        self.shared.restore(snapshot)
    }
}

impl Drop for VideoDevice {
    fn drop(&mut self) {
        if let Some(worker_thread) = self.worker_thread.take() {
            // Ignore the result because there is nothing we can do about it.
            let _ = self.sender.send(WorkerMsg::Kill);
            if worker_thread.join().is_err() {
                error!("video worker panicked");
            }
        }
        self.shared.overdue().stop();
        if let Some(watchdog_thread) = self.watchdog_thread.take() {
            if watchdog_thread.join().is_err() {
                error!("video watchdog panicked");
            }
        }
        self.shared.teardown();
    }
}

#[cfg(test)]
mod tests {
    use std::mem::size_of;
    use std::time::Duration;
    use std::time::Instant;

    use zerocopy::FromBytes;

    use super::*;
    use crate::format::Format;
    use crate::protocol::*;
    use crate::test_utils::*;

    struct Harness {
        device: VideoDevice,
        backend: Arc<FakeBackend>,
        mapper: Arc<FakeMapper>,
        cmd: TestQueue,
        evt: TestQueue,
    }

    impl Harness {
        fn with_config(config: VideoDeviceConfig) -> Self {
            let backend = FakeBackend::new();
            let mapper = FakeMapper::new();
            let dyn_backend: Arc<dyn VideoBackend> = backend.clone();
            let dyn_mapper: Arc<dyn GuestMemoryMapper> = mapper.clone();
            let mut device = VideoDevice::with_backend(config, dyn_backend, dyn_mapper).unwrap();
            let cmd = TestQueue::new();
            let evt = TestQueue::new();
            device
                .activate(Box::new(cmd.clone()), Box::new(evt.clone()))
                .unwrap();
            Harness {
                device,
                backend,
                mapper,
                cmd,
                evt,
            }
        }

        fn new() -> Self {
            Self::with_config(VideoDeviceConfig::new(
                VideoDeviceType::Decoder,
                VideoBackendType::Null,
            ))
        }

        /// Submits a command and returns every chain returned meanwhile.
        fn call(&self, desc: DescriptorChain) -> Vec<DescriptorChain> {
            self.cmd.push(desc);
            self.device.kick_command_queue();
            self.cmd.take_used()
        }

        /// Submits a command that must be answered right away with `resp_type`.
        fn expect(&self, desc: DescriptorChain, resp_type: u32) -> DescriptorChain {
            let index = desc.index;
            let mut used = self.call(desc);
            assert_eq!(used.len(), 1, "command {} got {} responses", index, used.len());
            let desc = used.remove(0);
            assert_eq!(desc.index, index);
            assert_eq!(response_header(&desc).0, resp_type);
            desc
        }

        /// Submits a command whose answer is deferred.
        fn defer(&self, desc: DescriptorChain) {
            let index = desc.index;
            let used = self.call(desc);
            assert!(used.is_empty(), "command {} was answered", index);
        }

        fn post(&self, event: BackendEvent) -> Vec<DescriptorChain> {
            self.backend.handle().post(event);
            self.device.process_backend_events();
            self.cmd.take_used()
        }

        /// Creates a decoder stream with H.264 input and NV12 output.
        fn open_stream(&self, stream_id: u32) {
            self.expect(
                stream_create(1, stream_id, Format::H264),
                VIRTIO_VIDEO_RESP_OK_NODATA,
            );
            self.expect(
                set_params(2, stream_id, QueueType::Input, Format::H264, 1),
                VIRTIO_VIDEO_RESP_OK_NODATA,
            );
            self.expect(
                set_params(3, stream_id, QueueType::Output, Format::NV12, 1),
                VIRTIO_VIDEO_RESP_OK_NODATA,
            );
        }

        fn create_resource(&self, stream_id: u32, queue_type: QueueType, id: u32, addr: u64) {
            self.expect(
                resource_create(4, stream_id, queue_type, id, &[&[(addr, 0x1000)]]),
                VIRTIO_VIDEO_RESP_OK_NODATA,
            );
        }

        fn post_event_buffer(&self, index: u16) {
            self.evt.push(DescriptorChain::new(index, Vec::new(), &[64]));
            self.device.kick_event_queue();
        }
    }

    fn indexes(used: &[DescriptorChain]) -> Vec<u16> {
        used.iter().map(|d| d.index).collect()
    }

    fn buffer_done(stream_id: u32, queue_type: QueueType, resource_id: u32, ts: u64) -> BackendEvent {
        BackendEvent::BufferDone {
            stream_id,
            queue_type,
            resource_id,
            timestamp: ts,
            flags: 0,
            size: 100,
        }
    }

    #[test]
    fn queued_input_is_answered_on_completion() {
        let h = Harness::new();
        h.open_stream(1);
        h.create_resource(1, QueueType::Input, 7, 0x10000);
        h.defer(resource_queue(10, 1, QueueType::Input, 7, 1234));
        assert_eq!(
            h.backend.calls().last(),
            Some(&Call::Queue(1, QueueType::Input, 7))
        );

        let used = h.post(buffer_done(1, QueueType::Input, 7, 1234));
        assert_eq!(indexes(&used), vec![10]);
        assert_eq!(response_header(&used[0]), (VIRTIO_VIDEO_RESP_OK_RESOURCE_QUEUE, 1));
        assert_eq!(queue_response(&used[0]), (1234, 0, 100));

        // A second completion for the same buffer has nothing to answer.
        assert!(h.post(buffer_done(1, QueueType::Input, 7, 1234)).is_empty());
    }

    #[test]
    fn invalid_queue_type_in_capability_query() {
        let h = Harness::new();
        let desc = h.expect(
            queue_request(1, VIRTIO_VIDEO_CMD_QUERY_CAPABILITY, 0, 2),
            VIRTIO_VIDEO_RESP_ERR_INVALID_PARAMETER,
        );
        assert_eq!(desc.writer.bytes_written(), size_of::<virtio_video_cmd_hdr>());
    }

    #[test]
    fn capability_query() {
        let h = Harness::new();
        let desc = h.expect(
            queue_request(
                1,
                VIRTIO_VIDEO_CMD_QUERY_CAPABILITY,
                7,
                VIRTIO_VIDEO_QUEUE_TYPE_OUTPUT,
            ),
            VIRTIO_VIDEO_RESP_OK_QUERY_CAPABILITY,
        );
        // The header's stream id comes back even though no such stream exists.
        assert_eq!(response_header(&desc).1, 7);
        let (resp, _) =
            virtio_video_query_capability_resp::read_from_prefix(desc.writer.written()).unwrap();
        assert_eq!(resp.num_descs.get(), 2);
    }

    #[test]
    fn recreating_idle_resource_replaces_it() {
        let h = Harness::new();
        h.open_stream(1);
        h.create_resource(1, QueueType::Input, 3, 0x10000);
        h.create_resource(1, QueueType::Input, 3, 0x20000);
        assert_eq!(h.mapper.unmapped_addrs(), vec![0x10000]);
        assert_eq!(h.mapper.live_mappings(), 1);

        h.defer(resource_queue(10, 1, QueueType::Input, 3, 5));
        let used = h.post(buffer_done(1, QueueType::Input, 3, 5));
        assert_eq!(indexes(&used), vec![10]);
        assert_eq!(queue_response(&used[0]).0, 5);
    }

    #[test]
    fn clear_cancels_pending_input_then_destroy() {
        let h = Harness::new();
        h.open_stream(1);
        h.create_resource(1, QueueType::Input, 1, 0x10000);
        h.create_resource(1, QueueType::Input, 2, 0x20000);
        h.defer(resource_queue(10, 1, QueueType::Input, 1, 100));
        h.defer(resource_queue(11, 1, QueueType::Input, 2, 200));

        h.defer(queue_request(
            12,
            VIRTIO_VIDEO_CMD_QUEUE_CLEAR,
            1,
            VIRTIO_VIDEO_QUEUE_TYPE_INPUT,
        ));
        let used = h.post(BackendEvent::ClearDone {
            stream_id: 1,
            result: Ok(()),
        });
        assert_eq!(indexes(&used), vec![10, 11, 12]);
        assert_eq!(queue_response(&used[0]), (100, 0, 0));
        assert_eq!(queue_response(&used[1]), (200, 0, 0));
        assert_eq!(response_header(&used[2]).0, VIRTIO_VIDEO_RESP_OK_NODATA);

        h.expect(
            bare_request(13, VIRTIO_VIDEO_CMD_STREAM_DESTROY, 1),
            VIRTIO_VIDEO_RESP_OK_NODATA,
        );
        assert!(h.backend.calls().contains(&Call::DestroyStream(1)));
        assert_eq!(h.mapper.live_mappings(), 0);
    }

    #[test]
    fn synchronous_clear_answers_right_away() {
        let h = Harness::new();
        h.backend.set_clear(Completion::Done);
        h.open_stream(1);
        h.create_resource(1, QueueType::Input, 1, 0x10000);
        h.defer(resource_queue(10, 1, QueueType::Input, 1, 100));
        let interrupts = h.cmd.interrupts();

        let used = h.call(queue_request(
            11,
            VIRTIO_VIDEO_CMD_QUEUE_CLEAR,
            1,
            VIRTIO_VIDEO_QUEUE_TYPE_INPUT,
        ));
        assert_eq!(indexes(&used), vec![10, 11]);
        assert_eq!(queue_response(&used[0]), (100, 0, 0));
        assert_eq!(response_header(&used[1]).0, VIRTIO_VIDEO_RESP_OK_NODATA);
        assert!(h.cmd.interrupts() > interrupts);
    }

    #[test]
    fn drain_clear_destroy_run_in_order() {
        let h = Harness::new();
        h.open_stream(1);
        h.create_resource(1, QueueType::Output, 5, 0x30000);
        h.defer(resource_queue(10, 1, QueueType::Output, 5, 7));

        h.defer(bare_request(11, VIRTIO_VIDEO_CMD_STREAM_DRAIN, 1));
        h.defer(queue_request(
            12,
            VIRTIO_VIDEO_CMD_QUEUE_CLEAR,
            1,
            VIRTIO_VIDEO_QUEUE_TYPE_OUTPUT,
        ));
        h.defer(bare_request(13, VIRTIO_VIDEO_CMD_STREAM_DESTROY, 1));
        assert!(!h
            .backend
            .calls()
            .contains(&Call::Clear(1, QueueType::Output)));

        // Nothing is accepted once a destroy is queued.
        h.expect(
            resource_queue(14, 1, QueueType::Output, 5, 8),
            VIRTIO_VIDEO_RESP_ERR_INVALID_OPERATION,
        );

        let used = h.post(BackendEvent::DrainDone {
            stream_id: 1,
            result: Ok(()),
        });
        assert_eq!(indexes(&used), vec![10, 11]);
        assert_eq!(queue_response(&used[0]), (0, VIRTIO_VIDEO_BUFFER_FLAG_EOS, 0));
        assert!(h
            .backend
            .calls()
            .contains(&Call::Clear(1, QueueType::Output)));

        let used = h.post(BackendEvent::ClearDone {
            stream_id: 1,
            result: Ok(()),
        });
        assert_eq!(indexes(&used), vec![12, 13]);
        assert_eq!(response_header(&used[1]).0, VIRTIO_VIDEO_RESP_OK_NODATA);

        h.expect(
            queue_request(15, VIRTIO_VIDEO_CMD_GET_PARAMS, 1, VIRTIO_VIDEO_QUEUE_TYPE_INPUT),
            VIRTIO_VIDEO_RESP_ERR_INVALID_STREAM_ID,
        );
    }

    #[test]
    fn in_flight_resource_is_protected() {
        let h = Harness::new();
        h.open_stream(1);
        h.create_resource(1, QueueType::Input, 7, 0x10000);
        h.defer(resource_queue(10, 1, QueueType::Input, 7, 1));

        h.expect(
            resource_create(11, 1, QueueType::Input, 7, &[&[(0x20000, 0x1000)]]),
            VIRTIO_VIDEO_RESP_ERR_INVALID_RESOURCE_ID,
        );
        h.expect(
            resource_queue(12, 1, QueueType::Input, 7, 2),
            VIRTIO_VIDEO_RESP_ERR_INVALID_RESOURCE_ID,
        );
        h.expect(
            queue_request(
                13,
                VIRTIO_VIDEO_CMD_RESOURCE_DESTROY_ALL,
                1,
                VIRTIO_VIDEO_QUEUE_TYPE_INPUT,
            ),
            VIRTIO_VIDEO_RESP_ERR_INVALID_OPERATION,
        );
        h.expect(
            set_params(14, 1, QueueType::Input, Format::VP8, 1),
            VIRTIO_VIDEO_RESP_ERR_INVALID_OPERATION,
        );
        assert_eq!(h.mapper.live_mappings(), 1);

        h.post(buffer_done(1, QueueType::Input, 7, 1));
        h.expect(
            queue_request(
                15,
                VIRTIO_VIDEO_CMD_RESOURCE_DESTROY_ALL,
                1,
                VIRTIO_VIDEO_QUEUE_TYPE_INPUT,
            ),
            VIRTIO_VIDEO_RESP_OK_NODATA,
        );
        assert_eq!(h.mapper.live_mappings(), 0);
        assert!(h
            .backend
            .calls()
            .contains(&Call::DestroyAll(1, QueueType::Input)));
    }

    #[test]
    fn stream_create_checks() {
        let h = Harness::new();
        h.open_stream(1);
        h.expect(
            stream_create(10, 1, Format::H264),
            VIRTIO_VIDEO_RESP_ERR_INVALID_STREAM_ID,
        );
        // Raw formats cannot be decoded from.
        h.expect(
            stream_create(11, 2, Format::NV12),
            VIRTIO_VIDEO_RESP_ERR_INVALID_PARAMETER,
        );
        h.expect(
            bare_request(12, VIRTIO_VIDEO_CMD_STREAM_DRAIN, 9),
            VIRTIO_VIDEO_RESP_ERR_INVALID_STREAM_ID,
        );

        h.backend.fail_create();
        h.expect(
            stream_create(13, 3, Format::VP8),
            VIRTIO_VIDEO_RESP_ERR_OUT_OF_MEMORY,
        );
    }

    #[test]
    fn unset_output_defaults_to_first_raw_format() {
        let h = Harness::new();
        h.expect(
            stream_create(1, 4, Format::VP8),
            VIRTIO_VIDEO_RESP_OK_NODATA,
        );
        let desc = h.expect(
            queue_request(2, VIRTIO_VIDEO_CMD_GET_PARAMS, 4, VIRTIO_VIDEO_QUEUE_TYPE_OUTPUT),
            VIRTIO_VIDEO_RESP_OK_GET_PARAMS,
        );
        let resp = virtio_video_get_params_resp::read_from_bytes(desc.writer.written()).unwrap();
        assert_eq!(resp.params.format.get(), VIRTIO_VIDEO_FORMAT_NV12);
        assert_eq!(resp.params.queue_type.get(), VIRTIO_VIDEO_QUEUE_TYPE_OUTPUT);
    }

    #[test]
    fn synchronous_drain_signals_eos_on_next_output() {
        let h = Harness::new();
        h.backend.set_drain(Completion::Done);
        h.open_stream(1);
        h.expect(
            bare_request(10, VIRTIO_VIDEO_CMD_STREAM_DRAIN, 1),
            VIRTIO_VIDEO_RESP_OK_NODATA,
        );
        h.create_resource(1, QueueType::Output, 2, 0x10000);
        let desc = h.expect(
            resource_queue(11, 1, QueueType::Output, 2, 9),
            VIRTIO_VIDEO_RESP_OK_RESOURCE_QUEUE,
        );
        assert_eq!(queue_response(&desc), (0, VIRTIO_VIDEO_BUFFER_FLAG_EOS, 0));
    }

    #[test]
    fn frames_fill_output_buffers() {
        let h = Harness::new();
        h.open_stream(1);
        h.create_resource(1, QueueType::Output, 1, 0x10000);
        h.create_resource(1, QueueType::Output, 2, 0x20000);
        h.defer(resource_queue(10, 1, QueueType::Output, 1, 0));
        h.defer(resource_queue(11, 1, QueueType::Output, 2, 0));

        assert!(h
            .post(BackendEvent::FrameStarted {
                stream_id: 1,
                frame_id: 40,
                timestamp: 333,
            })
            .is_empty());
        let used = h.post(BackendEvent::FrameReady {
            stream_id: 1,
            frame_id: 40,
            flags: VIRTIO_VIDEO_BUFFER_FLAG_EOS,
            size: 4096,
        });
        assert_eq!(indexes(&used), vec![10]);
        assert_eq!(queue_response(&used[0]), (333, 0, 4096));
    }

    #[test]
    fn resolution_change_pauses_input() {
        let h = Harness::new();
        h.open_stream(1);
        h.post_event_buffer(50);
        h.post(BackendEvent::ResolutionChanged {
            stream_id: 1,
            output: Params {
                format: Some(Format::NV12),
                frame_width: 1280,
                frame_height: 720,
                ..Default::default()
            },
        });
        let events = h.evt.take_used();
        assert_eq!(indexes(&events), vec![50]);
        let event = virtio_video_event::read_from_bytes(events[0].writer.written()).unwrap();
        assert_eq!(
            event.event_type.get(),
            VIRTIO_VIDEO_EVENT_DECODER_RESOLUTION_CHANGED
        );
        assert_eq!(event.stream_id.get(), 1);

        h.create_resource(1, QueueType::Input, 1, 0x10000);
        h.defer(resource_queue(10, 1, QueueType::Input, 1, 1));
        let queued = Call::Queue(1, QueueType::Input, 1);
        assert!(!h.backend.calls().contains(&queued));

        h.expect(
            set_params(11, 1, QueueType::Output, Format::NV12, 1),
            VIRTIO_VIDEO_RESP_OK_NODATA,
        );
        assert_eq!(h.backend.calls().last(), Some(&queued));
    }

    #[test]
    fn backend_error_raises_event() {
        let h = Harness::new();
        h.open_stream(2);
        h.post(BackendEvent::Error { stream_id: 2 });
        h.post_event_buffer(60);
        let events = h.evt.take_used();
        let event = virtio_video_event::read_from_bytes(events[0].writer.written()).unwrap();
        assert_eq!(event.event_type.get(), VIRTIO_VIDEO_EVENT_ERROR);
        assert_eq!(event.stream_id.get(), 2);
    }

    #[test]
    fn events_of_destroyed_stream_are_discarded() {
        let h = Harness::new();
        h.open_stream(1);
        h.post(BackendEvent::Error { stream_id: 1 });
        h.expect(
            bare_request(10, VIRTIO_VIDEO_CMD_STREAM_DESTROY, 1),
            VIRTIO_VIDEO_RESP_OK_NODATA,
        );
        h.post_event_buffer(60);
        assert!(h.evt.take_used().is_empty());
    }

    #[test]
    fn overdue_destroy_completes_on_release() {
        let h = Harness::new();
        h.backend.set_destroy(Completion::Pending);
        h.backend.hold_release(1);
        h.open_stream(1);
        h.create_resource(1, QueueType::Input, 1, 0x10000);

        h.defer(bare_request(10, VIRTIO_VIDEO_CMD_STREAM_DESTROY, 1));
        assert_eq!(h.mapper.live_mappings(), 1);
        h.expect(
            stream_create(11, 1, Format::H264),
            VIRTIO_VIDEO_RESP_ERR_INVALID_STREAM_ID,
        );
        assert!(h.device.snapshot().is_err());

        h.backend.release(1);
        let used = h.post(BackendEvent::StreamReleased { stream_id: 1 });
        assert_eq!(indexes(&used), vec![10]);
        assert_eq!(response_header(&used[0]).0, VIRTIO_VIDEO_RESP_OK_NODATA);
        assert_eq!(h.mapper.live_mappings(), 0);

        h.backend.set_destroy(Completion::Done);
        h.expect(
            stream_create(12, 1, Format::H264),
            VIRTIO_VIDEO_RESP_OK_NODATA,
        );
    }

    #[test]
    fn watchdog_finalizes_released_stream() {
        let h = Harness::new();
        h.backend.set_destroy(Completion::Pending);
        h.open_stream(1);
        h.defer(bare_request(10, VIRTIO_VIDEO_CMD_STREAM_DESTROY, 1));

        let deadline = Instant::now() + Duration::from_secs(10);
        let mut used = Vec::new();
        while used.is_empty() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
            used = h.cmd.take_used();
        }
        assert_eq!(indexes(&used), vec![10]);
    }

    #[test]
    fn controls() {
        let h = Harness::new();
        h.open_stream(1);

        let mut req = virtio_video_cmd_hdr {
            type_: Le32::from(VIRTIO_VIDEO_CMD_SET_CONTROL),
            stream_id: Le32::from(1),
        }
        .as_bytes()
        .to_vec();
        req.extend_from_slice(
            virtio_video_set_control {
                control: Le32::from(VIRTIO_VIDEO_CONTROL_BITRATE),
                ..Default::default()
            }
            .as_bytes(),
        );
        req.extend_from_slice(
            virtio_video_control_val {
                value: Le32::from(8000),
                ..Default::default()
            }
            .as_bytes(),
        );
        h.expect(
            DescriptorChain::new(10, vec![req], &[RESP_SIZE]),
            VIRTIO_VIDEO_RESP_OK_NODATA,
        );

        let get = |index, stream_id| {
            request(
                index,
                VIRTIO_VIDEO_CMD_GET_CONTROL,
                stream_id,
                virtio_video_get_control {
                    control: Le32::from(VIRTIO_VIDEO_CONTROL_BITRATE),
                    ..Default::default()
                },
            )
        };
        let desc = h.expect(get(11, 1), VIRTIO_VIDEO_RESP_OK_GET_CONTROL);
        let (val, _) = virtio_video_control_val::read_from_prefix(
            &desc.writer.written()[size_of::<virtio_video_cmd_hdr>()..],
        )
        .unwrap();
        assert_eq!(val.value.get(), 8000);
        h.expect(get(12, 2), VIRTIO_VIDEO_RESP_ERR_INVALID_STREAM_ID);
    }

    #[test]
    fn unknown_opcode_is_rejected() {
        let h = Harness::new();
        h.expect(
            bare_request(1, 0x999, 1),
            VIRTIO_VIDEO_RESP_ERR_INVALID_OPERATION,
        );
        // The queue keeps working.
        h.open_stream(1);
    }

    #[test]
    fn truncated_command_breaks_queue() {
        let h = Harness::new();
        let used = h.call(DescriptorChain::new(1, vec![vec![0u8; 3]], &[RESP_SIZE]));
        assert!(used.is_empty());
        assert_eq!(h.cmd.num_detached(), 1);

        assert!(h.call(stream_create(2, 1, Format::H264)).is_empty());
        assert_eq!(h.cmd.num_available(), 1);
    }

    #[test]
    fn deferred_reply_after_break_is_detached() {
        let h = Harness::new();
        h.open_stream(1);
        h.create_resource(1, QueueType::Input, 7, 0x10000);
        h.defer(resource_queue(10, 1, QueueType::Input, 7, 1));

        assert!(h
            .call(DescriptorChain::new(11, vec![vec![0u8; 3]], &[RESP_SIZE]))
            .is_empty());
        assert_eq!(h.cmd.num_detached(), 1);

        assert!(h.post(buffer_done(1, QueueType::Input, 7, 1)).is_empty());
        assert_eq!(h.cmd.num_detached(), 2);
    }

    #[test]
    fn small_response_buffer_breaks_queue() {
        let h = Harness::new();
        let mut desc = stream_create(1, 1, Format::H264);
        desc.writer = crate::descriptor::Writer::new(&[4]);
        assert!(h.call(desc).is_empty());
        assert_eq!(h.cmd.num_detached(), 1);
        assert!(h.call(stream_create(2, 2, Format::H264)).is_empty());
    }

    #[test]
    fn snapshot_round_trip() {
        let h = Harness::new();
        h.open_stream(1);
        h.create_resource(1, QueueType::Input, 1, 0x10000);
        h.create_resource(1, QueueType::Output, 2, 0x20000);

        h.defer(resource_queue(10, 1, QueueType::Input, 1, 1));
        assert!(h.device.snapshot().is_err());
        h.post(buffer_done(1, QueueType::Input, 1, 1));
        let data = h.device.snapshot().unwrap();

        let restored = Harness::new();
        restored.device.restore(data.clone()).unwrap();
        let calls = restored.backend.calls();
        assert_eq!(
            calls,
            vec![
                Call::CreateStream(1),
                Call::SetParams(1, QueueType::Input),
                Call::SetParams(1, QueueType::Output),
            ]
        );
        assert_eq!(restored.mapper.live_mappings(), 2);
        restored.defer(resource_queue(20, 1, QueueType::Input, 1, 2));
        assert!(restored.device.restore(data).is_err());
    }

    #[test]
    fn restore_checks_model() {
        let h = Harness::new();
        h.open_stream(1);
        let mut data = h.device.snapshot().unwrap();
        data["model"] = serde_json::json!("v4l2-enc");
        let other = Harness::new();
        assert!(other.device.restore(data).is_err());
        assert!(other.backend.calls().is_empty());
    }

    #[test]
    fn teardown_answers_everything() {
        let h = Harness::new();
        h.open_stream(1);
        h.create_resource(1, QueueType::Input, 1, 0x10000);
        h.defer(resource_queue(10, 1, QueueType::Input, 1, 1));
        h.defer(bare_request(11, VIRTIO_VIDEO_CMD_STREAM_DRAIN, 1));
        h.post_event_buffer(60);

        let Harness {
            device,
            backend,
            mapper,
            cmd,
            evt,
        } = h;
        drop(device);

        let used = cmd.take_used();
        assert_eq!(indexes(&used), vec![10, 11]);
        for desc in &used {
            assert_eq!(
                response_header(desc).0,
                VIRTIO_VIDEO_RESP_ERR_INVALID_OPERATION
            );
        }
        assert_eq!(evt.num_detached(), 1);
        assert!(backend.calls().contains(&Call::DestroyStream(1)));
        assert_eq!(mapper.live_mappings(), 0);
    }

    #[test]
    fn config_space() {
        let h = Harness::new();
        let mut data = [0xffu8; 12];
        h.device.read_config(0, &mut data);
        assert_eq!(&data[..4], &[0, 0, 0, 0]);
        assert_eq!(&data[4..8], &1024u32.to_le_bytes());

        let mut data = [0u8; 8];
        h.device.read_config(8, &mut data);
        assert_eq!(&data[..4], &1024u32.to_le_bytes());
        assert_eq!(&data[4..], &[0, 0, 0, 0]);

        h.device.read_config(64, &mut data);
        assert_eq!(h.device.device_type(), VIRTIO_ID_VIDEO_DEC);
        assert_eq!(h.device.queue_max_sizes(), &[256, 256]);
        assert_eq!(h.device.features(), 0b11);
    }

    #[test]
    fn iothread_serves_commands() {
        let mut config = VideoDeviceConfig::new(VideoDeviceType::Decoder, VideoBackendType::Null);
        config.iothread = Some("v_video_test".to_string());
        let h = Harness::with_config(config);

        h.cmd.push(stream_create(1, 1, Format::H264));
        h.device.kick_command_queue();
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut used = Vec::new();
        while used.is_empty() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
            used = h.cmd.take_used();
        }
        assert_eq!(indexes(&used), vec![1]);
        assert_eq!(response_header(&used[0]).0, VIRTIO_VIDEO_RESP_OK_NODATA);
    }

    #[test]
    fn completion_from_another_thread_is_applied() {
        let h = Harness::new();
        h.open_stream(1);
        h.create_resource(1, QueueType::Input, 7, 0x10000);
        h.defer(resource_queue(10, 1, QueueType::Input, 7, 55));

        let handle = h.backend.handle();
        std::thread::spawn(move || handle.post(buffer_done(1, QueueType::Input, 7, 55)))
            .join()
            .unwrap();

        // Nothing on this thread touches the device after the post.
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut used = Vec::new();
        while used.is_empty() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
            used = h.cmd.take_used();
        }
        assert_eq!(indexes(&used), vec![10]);
        assert_eq!(queue_response(&used[0]).0, 55);
    }

    #[test]
    fn null_backend_end_to_end() {
        let config = VideoDeviceConfig::new(VideoDeviceType::Decoder, VideoBackendType::Null);
        let mapper = FakeMapper::new();
        let mut device = VideoDevice::realize(config, mapper.clone()).unwrap();
        let cmd = TestQueue::new();
        device
            .activate(Box::new(cmd.clone()), Box::new(TestQueue::new()))
            .unwrap();

        let run = |desc| {
            cmd.push(desc);
            device.kick_command_queue();
            cmd.take_used()
        };
        assert_eq!(run(stream_create(1, 1, Format::VP9)).len(), 1);
        assert_eq!(run(set_params(2, 1, QueueType::Input, Format::VP9, 1)).len(), 1);
        assert_eq!(
            run(resource_create(3, 1, QueueType::Input, 1, &[&[(0x10000, 0x1000)]])).len(),
            1
        );
        let used = run(resource_queue(4, 1, QueueType::Input, 1, 77));
        assert_eq!(indexes(&used), vec![4]);
        assert_eq!(queue_response(&used[0]).0, 77);

        let mut vaapi = VideoDeviceConfig::new(VideoDeviceType::Decoder, VideoBackendType::Null);
        vaapi.backend = VideoBackendType::Vaapi;
        assert!(VideoDevice::realize(vaapi, mapper).is_err());
    }
}
