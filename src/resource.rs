// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Resource management: turning guest scatter-gather lists into host mappings.
//!
//! Every mapping is owned by a [`MappedSlice`] which unmaps it when dropped, so a resource whose
//! creation fails halfway releases exactly what it had mapped, in reverse order, and a resource
//! that is destroyed releases each slice exactly once.

use std::fmt;
use std::sync::Arc;

use log::debug;
use log::error;
use serde::Deserialize;
use serde::Serialize;

use crate::command::QueueType;
use crate::config::PlanesLayoutPolicy;
use crate::error::VideoError;
use crate::error::VideoResult;
use crate::format::Format;
use crate::params::MemoryType;
use crate::protocol::*;

/// One guest physical range of a scatter-gather list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestMemEntry {
    pub addr: u64,
    pub len: u32,
}

impl From<&virtio_video_mem_entry> for GuestMemEntry {
    fn from(entry: &virtio_video_mem_entry) -> Self {
        GuestMemEntry {
            addr: entry.addr.get(),
            len: entry.length.get(),
        }
    }
}

/// Direction of the data flow through a mapping, from the device's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaDirection {
    /// The device reads the buffer (input queue).
    ToDevice,
    /// The device writes the buffer (output queue).
    FromDevice,
}

impl From<QueueType> for DmaDirection {
    fn from(queue_type: QueueType) -> Self {
        match queue_type {
            QueueType::Input => DmaDirection::ToDevice,
            QueueType::Output => DmaDirection::FromDevice,
        }
    }
}

/// A host virtual address range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostRegion {
    pub addr: usize,
    pub len: usize,
}

/// The file and offset backing a guest range, as needed to overlay it elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackingFile {
    /// Handle understood by the mapper that returned it.
    pub handle: u64,
    pub offset: u64,
}

/// Host primitives for reaching guest memory.
///
/// Calls may block (e.g. on first touch) and are only made from the command-processing context.
pub trait GuestMemoryMapper: Send + Sync {
    /// Maps the guest range starting at `addr`. The returned region may be shorter than `len`,
    /// and `None` means nothing could be mapped.
    fn map(&self, addr: u64, len: u32, dir: DmaDirection) -> Option<HostRegion>;

    /// Undoes one successful `map`.
    fn unmap(&self, region: HostRegion, dir: DmaDirection);

    /// Finds the file backing a guest range, if it is file-backed.
    fn backing_file(&self, _addr: u64, _len: u32) -> Option<BackingFile> {
        None
    }

    /// Reserves `len` bytes of contiguous host address space.
    fn reserve(&self, _len: usize) -> Option<HostRegion> {
        None
    }

    /// Maps `len` bytes of `backing` at the fixed address `at`, inside a reserved region.
    /// Returns the address actually used.
    fn overlay(&self, _at: usize, _len: usize, _backing: BackingFile) -> Option<usize> {
        None
    }

    /// Gives back a region obtained from `reserve`, along with everything overlaid in it.
    fn release(&self, _region: HostRegion) {}
}

/// A host mapping of one scatter-gather entry. Unmapped on drop.
pub struct MappedSlice {
    mapper: Arc<dyn GuestMemoryMapper>,
    region: HostRegion,
    dir: DmaDirection,
    remapped: Option<usize>,
}

impl MappedSlice {
    fn map(
        mapper: &Arc<dyn GuestMemoryMapper>,
        entry: GuestMemEntry,
        dir: DmaDirection,
    ) -> VideoResult<MappedSlice> {
        let failed = VideoError::MappingFailed {
            addr: entry.addr,
            len: entry.len,
        };
        let region = mapper.map(entry.addr, entry.len, dir).ok_or(failed)?;
        // Owned from here on, so the short case below unmaps it too.
        let slice = MappedSlice {
            mapper: Arc::clone(mapper),
            region,
            dir,
            remapped: None,
        };
        if region.len < entry.len as usize {
            error!(
                "guest range {:#x}+{:#x} only mapped {:#x} bytes",
                entry.addr, entry.len, region.len
            );
            return Err(VideoError::MappingFailed {
                addr: entry.addr,
                len: entry.len,
            });
        }
        Ok(slice)
    }

    pub fn len(&self) -> usize {
        self.region.len
    }

    pub fn is_empty(&self) -> bool {
        self.region.len == 0
    }

    /// Address of this slice inside the resource's contiguous remapping, if any.
    pub fn remapped_addr(&self) -> Option<usize> {
        self.remapped
    }
}

impl Drop for MappedSlice {
    fn drop(&mut self) {
        self.mapper.unmap(self.region, self.dir);
    }
}

impl fmt::Debug for MappedSlice {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("MappedSlice")
            .field("region", &self.region)
            .field("dir", &self.dir)
            .field("remapped", &self.remapped)
            .finish()
    }
}

/// The slices of every plane. Released last-mapped first.
#[derive(Debug, Default)]
struct SliceStack {
    planes: Vec<Vec<MappedSlice>>,
}

impl Drop for SliceStack {
    fn drop(&mut self) {
        while let Some(mut plane) = self.planes.pop() {
            while let Some(slice) = plane.pop() {
                drop(slice);
            }
        }
    }
}

/// Reserved contiguous host region holding the overlay of all the slices of a resource.
struct RemapRegion {
    mapper: Arc<dyn GuestMemoryMapper>,
    region: HostRegion,
}

impl Drop for RemapRegion {
    fn drop(&mut self) {
        self.mapper.release(self.region);
    }
}

/// What the guest asked for in a RESOURCE_CREATE command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub id: u32,
    pub queue_type: QueueType,
    pub planes_layout: u32,
    pub plane_offsets: Vec<u32>,
    pub plane_entries: Vec<Vec<GuestMemEntry>>,
}

/// A guest buffer attached to one queue of a stream.
pub struct Resource {
    spec: ResourceSpec,
    // Declared before `slices` so the overlay goes away before the mappings under it.
    remap: Option<RemapRegion>,
    slices: SliceStack,
}

impl Resource {
    /// Validates `spec` against the queue's format and memory type and maps its memory.
    ///
    /// On failure nothing stays mapped.
    pub fn create(
        mapper: &Arc<dyn GuestMemoryMapper>,
        policy: &PlanesLayoutPolicy,
        mem_type: MemoryType,
        format: Option<Format>,
        mut spec: ResourceSpec,
    ) -> VideoResult<Resource> {
        let num_planes = spec.plane_entries.len() as u32;
        let format = match format {
            Some(f) if f.accepts_num_planes(num_planes) => f,
            f => {
                error!(
                    "cannot create a resource with {} planes for {:?} queue whose format is {:?}",
                    num_planes, spec.queue_type, f
                );
                return Err(VideoError::InvalidParameter);
            }
        };

        spec.planes_layout = policy.normalize(spec.planes_layout, mem_type, format);

        match mem_type {
            MemoryType::GuestPages => {}
            MemoryType::VirtioObject => {
                error!("resources backed by virtio objects are not supported");
                return Err(VideoError::UnsupportedMemoryType(mem_type as u32));
            }
        }

        let dir = DmaDirection::from(spec.queue_type);
        let mut slices = SliceStack::default();
        for entries in &spec.plane_entries {
            slices.planes.push(Vec::with_capacity(entries.len()));
            for entry in entries {
                let slice = MappedSlice::map(mapper, *entry, dir)?;
                if let Some(plane) = slices.planes.last_mut() {
                    plane.push(slice);
                }
            }
        }

        let remap = if spec.queue_type == QueueType::Output && policy.remap_output {
            Self::remap(mapper, &mut slices, &spec.plane_entries)
        } else {
            None
        };

        debug!(
            "created {:?} resource {} with {} planes ({} bytes mapped{})",
            spec.queue_type,
            spec.id,
            num_planes,
            slices.planes.iter().flatten().map(MappedSlice::len).sum::<usize>(),
            if remap.is_some() { ", remapped" } else { "" }
        );

        Ok(Resource {
            spec,
            remap,
            slices,
        })
    }

    /// Tries to overlay every entry back to back in one reserved region. Any failure leaves the
    /// resource usable through its individual slices.
    fn remap(
        mapper: &Arc<dyn GuestMemoryMapper>,
        slices: &mut SliceStack,
        plane_entries: &[Vec<GuestMemEntry>],
    ) -> Option<RemapRegion> {
        let total: usize = plane_entries.iter().flatten().map(|e| e.len as usize).sum();
        let region = match mapper.reserve(total) {
            Some(region) => region,
            None => {
                debug!("remap unavailable, using slices");
                return None;
            }
        };
        let remap = RemapRegion {
            mapper: Arc::clone(mapper),
            region,
        };

        let mut cursor = region.addr;
        let mut addrs = Vec::new();
        for entry in plane_entries.iter().flatten() {
            let Some(backing) = mapper.backing_file(entry.addr, entry.len) else {
                debug!("guest range {:#x} has no backing file, using slices", entry.addr);
                return None;
            };
            match mapper.overlay(cursor, entry.len as usize, backing) {
                Some(addr) if addr == cursor => {
                    addrs.push(addr);
                    cursor += entry.len as usize;
                }
                other => {
                    debug!("overlay at {:#x} landed at {:?}, using slices", cursor, other);
                    return None;
                }
            }
        }

        for (slice, addr) in slices.planes.iter_mut().flatten().zip(addrs) {
            slice.remapped = Some(addr);
        }
        Some(remap)
    }

    pub fn id(&self) -> u32 {
        self.spec.id
    }

    pub fn queue_type(&self) -> QueueType {
        self.spec.queue_type
    }

    pub fn planes_layout(&self) -> u32 {
        self.spec.planes_layout
    }

    pub fn plane_offsets(&self) -> &[u32] {
        &self.spec.plane_offsets
    }

    pub fn num_planes(&self) -> usize {
        self.slices.planes.len()
    }

    pub fn plane(&self, index: usize) -> &[MappedSlice] {
        self.slices
            .planes
            .get(index)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Start of the contiguous remapping of the whole resource, when one could be made.
    pub fn remapped_base(&self) -> Option<usize> {
        self.remap.as_ref().map(|r| r.region.addr)
    }

    /// The request this resource was built from, kept so it can be rebuilt after a restore.
    pub fn spec(&self) -> &ResourceSpec {
        &self.spec
    }
}

impl Drop for Resource {
    fn drop(&mut self) {
        self.remap.take();
        debug!(
            "destroying {:?} resource {}",
            self.spec.queue_type, self.spec.id
        );
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Resource")
            .field("id", &self.spec.id)
            .field("queue_type", &self.spec.queue_type)
            .field("planes_layout", &self.spec.planes_layout)
            .field("num_planes", &self.num_planes())
            .field("remapped_base", &self.remapped_base())
            .finish()
    }
}
