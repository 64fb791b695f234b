//! Shared memory mapping of the framebuffer
//!
//! The mapping is owned by exactly one [`Device`](crate::Device) and never
//! handed out. All access goes through offset/width pairs that are checked
//! against the mapped length.

use crate::{FramebufferError, Result};
use libc::{c_void, mmap, munmap};
use std::os::fd::{AsRawFd, BorrowedFd};
use std::{io, ptr};

pub(crate) struct MappedBuffer {
    ptr: *mut u8,
    len: usize,
}

impl MappedBuffer {
    /// Map `len` bytes from offset 0 of `fd`, read-write and shared with the kernel
    pub(crate) fn map(fd: BorrowedFd<'_>, len: usize) -> Result<Self> {
        let mapped_ptr = unsafe {
            mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd.as_raw_fd(),
                0,
            )
        };

        if mapped_ptr == libc::MAP_FAILED {
            return Err(FramebufferError::MmapFailed(io::Error::last_os_error()));
        }

        Ok(Self {
            ptr: mapped_ptr as *mut u8,
            len,
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    #[cfg(test)]
    pub(crate) fn is_mapped(&self) -> bool {
        !self.ptr.is_null()
    }

    /// Start offset of `width` bytes at `offset` if they all lie inside the mapping
    fn checked_range(&self, offset: usize, width: usize) -> Option<usize> {
        if self.ptr.is_null() || width > 4 {
            return None;
        }
        let end = offset.checked_add(width)?;
        (end <= self.len).then_some(offset)
    }

    /// Read `width` (1..=4) bytes at `offset` as a little-endian value.
    ///
    /// Returns `None` when any of the bytes lies outside the mapping.
    pub(crate) fn read_le(&self, offset: usize, width: usize) -> Option<u32> {
        let offset = self.checked_range(offset, width)?;
        let mut raw = [0u8; 4];
        for (i, byte) in raw[..width].iter_mut().enumerate() {
            // The kernel may change device memory behind our back.
            *byte = unsafe { ptr::read_volatile(self.ptr.add(offset + i)) };
        }
        Some(u32::from_le_bytes(raw))
    }

    /// Write the low `width` (1..=4) bytes of `value` little-endian at `offset`.
    ///
    /// Nothing is written if any of the bytes lies outside the mapping.
    pub(crate) fn write_le(&mut self, offset: usize, width: usize, value: u32) -> bool {
        let Some(offset) = self.checked_range(offset, width) else {
            return false;
        };
        for (i, byte) in value.to_le_bytes()[..width].iter().enumerate() {
            unsafe { ptr::write_volatile(self.ptr.add(offset + i), *byte) };
        }
        true
    }

    /// Unmap the region. Calling this again after success does nothing.
    pub(crate) fn unmap(&mut self) -> io::Result<()> {
        if self.ptr.is_null() {
            return Ok(());
        }
        let rc = unsafe { munmap(self.ptr as *mut c_void, self.len) };
        self.ptr = ptr::null_mut();
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        log::trace!("unmapped {} framebuffer bytes", self.len);
        Ok(())
    }
}

impl Drop for MappedBuffer {
    fn drop(&mut self) {
        let _ = self.unmap();
    }
}

// Safety: the pointer is only dereferenced through &self (reads) and
// &mut self (writes), so the borrow checker serialises mutation.
unsafe impl Send for MappedBuffer {}
unsafe impl Sync for MappedBuffer {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Seek, SeekFrom};
    use std::os::fd::AsFd;

    fn backing_file(len: u64) -> std::fs::File {
        let file = tempfile::tempfile().unwrap();
        file.set_len(len).unwrap();
        file
    }

    fn file_bytes(file: &mut std::fs::File) -> Vec<u8> {
        let mut bytes = Vec::new();
        file.seek(SeekFrom::Start(0)).unwrap();
        file.read_to_end(&mut bytes).unwrap();
        bytes
    }

    #[test]
    fn test_write_is_visible_through_file() {
        let mut file = backing_file(16);
        let mut buffer = MappedBuffer::map(file.as_fd(), 16).unwrap();
        assert!(buffer.write_le(4, 2, 0xF800));
        let bytes = file_bytes(&mut file);
        assert_eq!(&bytes[4..6], &[0x00, 0xF8]);
        assert!(bytes[..4].iter().chain(&bytes[6..]).all(|&b| b == 0));
    }

    #[test]
    fn test_read_little_endian() {
        let mut file = backing_file(8);
        let mut buffer = MappedBuffer::map(file.as_fd(), 8).unwrap();
        assert!(buffer.write_le(4, 4, 0x1122_3344));
        assert_eq!(file_bytes(&mut file)[4..], [0x44, 0x33, 0x22, 0x11]);
        assert_eq!(buffer.read_le(4, 4), Some(0x1122_3344));
        assert_eq!(buffer.read_le(4, 2), Some(0x3344));
    }

    #[test]
    fn test_access_past_end() {
        let mut file = backing_file(8);
        let mut buffer = MappedBuffer::map(file.as_fd(), 8).unwrap();
        assert_eq!(buffer.read_le(7, 2), None);
        assert_eq!(buffer.read_le(usize::MAX, 2), None);
        assert_eq!(buffer.read_le(0, 5), None);
        assert!(!buffer.write_le(6, 4, u32::MAX));
        assert!(!buffer.write_le(usize::MAX, 4, u32::MAX));
        assert_eq!(file_bytes(&mut file), vec![0u8; 8]);
    }

    #[test]
    fn test_unmap_twice() {
        let file = backing_file(8);
        let mut buffer = MappedBuffer::map(file.as_fd(), 8).unwrap();
        assert!(buffer.is_mapped());
        buffer.unmap().unwrap();
        assert!(!buffer.is_mapped());
        buffer.unmap().unwrap();
        assert_eq!(buffer.read_le(0, 2), None);
        assert!(!buffer.write_le(0, 2, 0));
    }

    #[test]
    fn test_map_zero_length_fails() {
        let file = backing_file(8);
        assert!(matches!(
            MappedBuffer::map(file.as_fd(), 0),
            Err(FramebufferError::MmapFailed(_))
        ));
    }
}
