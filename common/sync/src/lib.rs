// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Lock types that panic on poison instead of returning an error.
//!
//! The device is built to abort on panic, so a poisoned lock can only be observed while the
//! process is already going down. Callers of these wrappers never have to handle poisoning, which
//! keeps `.lock().unwrap()` out of device code.

mod condvar;
mod mutex;

pub use crate::condvar::Condvar;
pub use crate::mutex::Mutex;
