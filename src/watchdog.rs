// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Finalizes streams whose destruction the backend could not complete right away.

use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;

use log::debug;
use sync::Condvar;
use sync::Mutex;

use crate::device::DeviceShared;
use crate::stream::Stream;

/// How often the backend is asked again about overdue streams.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

struct OverdueState {
    streams: BTreeMap<u32, Arc<Mutex<Stream>>>,
    running: bool,
}

/// Streams removed from the device but not yet released by the backend.
pub(crate) struct Overdue {
    state: Mutex<OverdueState>,
    cvar: Condvar,
}

impl Overdue {
    pub fn new() -> Self {
        Overdue {
            state: Mutex::new(OverdueState {
                streams: BTreeMap::new(),
                running: true,
            }),
            cvar: Condvar::new(),
        }
    }

    pub fn add(&self, stream_id: u32, stream: Arc<Mutex<Stream>>) {
        self.state.lock().streams.insert(stream_id, stream);
        self.cvar.notify_one();
    }

    /// Removes a stream so exactly one caller finalizes it.
    pub fn take(&self, stream_id: u32) -> Option<Arc<Mutex<Stream>>> {
        self.state.lock().streams.remove(&stream_id)
    }

    pub fn contains(&self, stream_id: u32) -> bool {
        self.state.lock().streams.contains_key(&stream_id)
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().streams.is_empty()
    }

    pub fn take_all(&self) -> Vec<Arc<Mutex<Stream>>> {
        std::mem::take(&mut self.state.lock().streams)
            .into_values()
            .collect()
    }

    pub fn stop(&self) {
        self.state.lock().running = false;
        self.cvar.notify_all();
    }

    /// Blocks until there is something to poll, then waits one poll interval. Returns the ids to
    /// poll, or `None` once stopped.
    fn wait_for_work(&self) -> Option<Vec<u32>> {
        let mut state = self.state.lock();
        while state.running && state.streams.is_empty() {
            state = self.cvar.wait(state);
        }
        if !state.running {
            return None;
        }
        let (state, _) = self.cvar.wait_timeout(state, POLL_INTERVAL);
        if !state.running {
            return None;
        }
        Some(state.streams.keys().copied().collect())
    }
}

/// Starts the thread polling the backend for overdue streams.
pub(crate) fn spawn(shared: Arc<DeviceShared>) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("v_video_watchdog".to_string())
        .spawn(move || {
            while let Some(ids) = shared.overdue().wait_for_work() {
                for stream_id in ids {
                    // The backend is polled without any lock held.
                    if shared.backend().stream_released(stream_id) {
                        debug!("watchdog: stream {} released", stream_id);
                        shared.finalize_overdue(stream_id);
                    }
                }
            }
            debug!("watchdog stopped");
        })
}
