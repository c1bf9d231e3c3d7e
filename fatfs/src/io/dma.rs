//! DMA Scratch Buffers
//!
//! Devices that transfer by DMA need buffers aligned to [`DMA_ALIGN`]. When
//! the engine hands over an unaligned buffer, the router bounces the
//! transfer through a cluster-sized [`DmaBuffer`] allocated at mount.

use alloc::alloc::{alloc_zeroed, dealloc, Layout};
use core::ptr::NonNull;
use core::slice;

use crate::config::DMA_ALIGN;

/// Round `val` up to a multiple of `align` (a power of two)
pub const fn align_up(val: usize, align: usize) -> usize {
    (val + align - 1) & !(align - 1)
}

/// Round `val` down to a multiple of `align` (a power of two)
pub const fn align_down(val: usize, align: usize) -> usize {
    val & !(align - 1)
}

/// True when `ptr` may be handed to a DMA device as is
pub fn is_dma_aligned(ptr: *const u8) -> bool {
    ptr as usize & (DMA_ALIGN - 1) == 0
}

/// Zeroed heap buffer aligned to [`DMA_ALIGN`]
pub struct DmaBuffer {
    ptr: NonNull<u8>,
    layout: Layout,
}

// The buffer is uniquely owned; nothing else holds the pointer.
unsafe impl Send for DmaBuffer {}

impl DmaBuffer {
    /// Allocate `len` bytes, or `None` if `len` is zero or memory is short
    pub fn try_new(len: usize) -> Option<Self> {
        if len == 0 {
            return None;
        }
        let layout = Layout::from_size_align(align_up(len, DMA_ALIGN), DMA_ALIGN).ok()?;
        // SAFETY: layout has a non-zero size.
        let ptr = NonNull::new(unsafe { alloc_zeroed(layout) })?;
        Some(Self { ptr, layout })
    }

    pub fn len(&self) -> usize {
        self.layout.size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr is valid for layout.size() initialised bytes.
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.layout.size()) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above, and &mut self guarantees exclusivity.
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.layout.size()) }
    }
}

impl Drop for DmaBuffer {
    fn drop(&mut self) {
        // SAFETY: allocated in try_new with this exact layout.
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align() {
        assert_eq!(align_up(1, 32), 32);
        assert_eq!(align_up(64, 32), 64);
        assert_eq!(align_down(63, 32), 32);
    }

    #[test]
    fn test_buffer_alignment() {
        let mut buf = DmaBuffer::try_new(4096).unwrap();
        assert!(is_dma_aligned(buf.as_slice().as_ptr()));
        assert_eq!(buf.len(), 4096);
        assert!(buf.as_slice().iter().all(|&b| b == 0));
        buf.as_mut_slice()[4095] = 1;
        assert_eq!(buf.as_slice()[4095], 1);
    }

    #[test]
    fn test_zero_length() {
        assert!(DmaBuffer::try_new(0).is_none());
    }
}
