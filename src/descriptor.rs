// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Descriptor chains popped from a virtqueue, with cursors over their readable and writable parts.
//!
//! The transport copies the device-readable descriptors in when it pops a chain and copies the
//! writer's bytes back into the device-writable descriptors when the chain is returned as used.
//! Everything in between runs on plain host buffers.

use std::io;
use std::mem::size_of;

use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;

/// Sequential reader over the device-readable descriptors of a chain.
#[derive(Debug, Default, Clone)]
pub struct Reader {
    segments: Vec<Vec<u8>>,
    segment: usize,
    offset: usize,
    bytes_read: usize,
}

impl Reader {
    pub fn new(segments: Vec<Vec<u8>>) -> Reader {
        Reader {
            segments,
            ..Default::default()
        }
    }

    /// Bytes left to read across every remaining descriptor.
    pub fn available_bytes(&self) -> usize {
        let total: usize = self.segments.iter().map(Vec::len).sum();
        total - self.bytes_read
    }

    pub fn bytes_read(&self) -> usize {
        self.bytes_read
    }

    /// Fills `buf` entirely, crossing descriptor boundaries as needed.
    pub fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        if buf.len() > self.available_bytes() {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof));
        }
        let mut filled = 0;
        while filled < buf.len() {
            let segment = &self.segments[self.segment];
            let chunk = (segment.len() - self.offset).min(buf.len() - filled);
            buf[filled..filled + chunk].copy_from_slice(&segment[self.offset..self.offset + chunk]);
            filled += chunk;
            self.offset += chunk;
            if self.offset == segment.len() {
                self.segment += 1;
                self.offset = 0;
            }
        }
        self.bytes_read += filled;
        Ok(())
    }

    /// Reads and consumes an object from the chain.
    pub fn read_obj<T: FromBytes>(&mut self) -> io::Result<T> {
        let mut buf = vec![0u8; size_of::<T>()];
        self.read_exact(&mut buf)?;
        T::read_from_bytes(&buf).map_err(|_| io::Error::from(io::ErrorKind::InvalidData))
    }

    /// Reads `count` consecutive objects. Fails before allocating if the chain is too short.
    pub fn read_objs<T: FromBytes>(&mut self, count: usize) -> io::Result<Vec<T>> {
        match count.checked_mul(size_of::<T>()) {
            Some(len) if len <= self.available_bytes() => {}
            _ => return Err(io::Error::from(io::ErrorKind::UnexpectedEof)),
        }
        (0..count).map(|_| self.read_obj()).collect()
    }
}

/// Sequential writer into the device-writable descriptors of a chain.
#[derive(Debug, Default, Clone)]
pub struct Writer {
    buffer: Vec<u8>,
    capacity: usize,
}

impl Writer {
    /// Creates a writer over writable descriptors of the given sizes.
    pub fn new(segment_sizes: &[usize]) -> Writer {
        Writer {
            buffer: Vec::new(),
            capacity: segment_sizes.iter().sum(),
        }
    }

    pub fn available_bytes(&self) -> usize {
        self.capacity - self.buffer.len()
    }

    pub fn bytes_written(&self) -> usize {
        self.buffer.len()
    }

    /// What has been written so far, to be copied back to guest memory.
    pub fn written(&self) -> &[u8] {
        &self.buffer
    }

    /// Writes all of `data` or nothing.
    pub fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        if data.len() > self.available_bytes() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "descriptor chain is too small for the response",
            ));
        }
        self.buffer.extend_from_slice(data);
        Ok(())
    }

    pub fn write_obj<T: IntoBytes + Immutable>(&mut self, val: T) -> io::Result<()> {
        self.write_all(val.as_bytes())
    }

    pub fn write_iter<T: IntoBytes + Immutable, I: Iterator<Item = T>>(
        &mut self,
        mut iter: I,
    ) -> io::Result<()> {
        iter.try_for_each(|v| self.write_obj(v))
    }
}

/// One available buffer popped from a virtqueue.
#[derive(Debug)]
pub struct DescriptorChain {
    /// Index into the descriptor table, used when returning the chain to the guest.
    pub index: u16,
    pub reader: Reader,
    pub writer: Writer,
}

impl DescriptorChain {
    pub fn new(index: u16, readable: Vec<Vec<u8>>, writable_sizes: &[usize]) -> DescriptorChain {
        DescriptorChain {
            index,
            reader: Reader::new(readable),
            writer: Writer::new(writable_sizes),
        }
    }
}
