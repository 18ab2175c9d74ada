// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Descriptor rings and the DMA memory behind them.
//!
//! A "descriptor ring" here is an array of 16-byte hardware descriptors,
//! each permanently bonded to one frame-sized buffer in a parallel array.
//! The controller walks each array in order and wraps at the ring length we
//! program.
//!
//! # Descriptor ownership
//!
//! A descriptor is either owned by the hardware (its `OWN` bit is set) or by
//! software. While the hardware owns it, the DMA engine may read or write
//! the descriptor and its buffer at any time, so we only ever look at it
//! through `VolatileCell` and never hand out `&mut` to the buffer.
//!
//! Software gives a descriptor to the hardware by filling in every other
//! word, issuing a release fence, and only then setting `OWN`. That step is
//! done in exactly one place per direction ([`Ring::with_next_buffer`] and
//! [`Ring::rearm`]); nothing else in the crate sets `OWN`.
//!
//! On platforms without coherent DMA, each descriptor access is bracketed by
//! cache maintenance through [`CacheControl`]: invalidate before reading
//! anything the hardware might have written, flush after writing anything
//! the hardware will read.
//!
//! # Memory
//!
//! All descriptors and buffers live in a [`DmaPool`], normally a `static`.
//! A pool is claimed once by the engine that uses it and stays claimed
//! across stop/start cycles, since the hardware may still hold addresses
//! into it; it is only given back by an explicit [`DmaRings::release`].

use core::cell::UnsafeCell;
use core::sync::atomic::{fence, AtomicBool, Ordering};

use drv_boot_io_api::CacheControl;
use static_assertions::const_assert_eq;
use vcell::VolatileCell;

pub const TX_DESCRIPTORS: usize = 4;
pub const RX_DESCRIPTORS: usize = 4;

/// Largest data-cache line we have to keep buffers apart by.
pub const CACHE_LINE: usize = 64;

/// Largest frame we send or receive, rounded up to a cache line.
pub const MAX_PACKET_SIZE: usize =
    (1568 + CACHE_LINE - 1) / CACHE_LINE * CACHE_LINE;

pub const DESC3_OWN: u32 = 1 << 31;
pub const DESC3_FD: u32 = 1 << 29;
pub const DESC3_LD: u32 = 1 << 28;
pub const DESC3_BUF1V: u32 = 1 << 24;
/// Packet length, in an RX write-back descriptor and in a TX descriptor.
pub const DESC3_LENGTH_MASK: u32 = 0x7fff;

/// One hardware descriptor, in the layout the DMA engine reads.
#[repr(C, align(16))]
pub struct Descriptor {
    des0: VolatileCell<u32>,
    des1: VolatileCell<u32>,
    des2: VolatileCell<u32>,
    des3: VolatileCell<u32>,
}

const_assert_eq!(core::mem::size_of::<Descriptor>(), 16);

impl Descriptor {
    const EMPTY: Self = Self {
        des0: VolatileCell::new(0),
        des1: VolatileCell::new(0),
        des2: VolatileCell::new(0),
        des3: VolatileCell::new(0),
    };

    pub fn is_owned_by_hw(&self) -> bool {
        self.des3.get() & DESC3_OWN != 0
    }

    /// Length of the frame the hardware wrote back.
    pub fn frame_len(&self) -> usize {
        (self.des3.get() & DESC3_LENGTH_MASK) as usize
    }

    fn clear(&self) {
        self.des0.set(0);
        self.des1.set(0);
        self.des2.set(0);
        self.des3.set(0);
    }

    /// Fills in a single-buffer transmit descriptor, without `OWN`.
    pub fn set_tx(&self, buffer: u32, len: u32) {
        self.des0.set(buffer);
        self.des1.set(0);
        self.des2.set(len);
        self.des3.set(DESC3_FD | DESC3_LD | (len & DESC3_LENGTH_MASK));
    }

    /// Marks this descriptor as owned by the hardware. All other words must
    /// already be written; this issues the fence that keeps them ahead of
    /// `OWN`.
    fn set_owned_by_hw(&self) {
        fence(Ordering::Release);
        self.des3.set(self.des3.get() | DESC3_OWN);
    }

    fn addr(&self) -> usize {
        self as *const Self as usize
    }

    #[cfg(test)]
    pub(crate) fn words(&self) -> [u32; 4] {
        [
            self.des0.get(),
            self.des1.get(),
            self.des2.get(),
            self.des3.get(),
        ]
    }

    /// Plays the DMA engine: writes `des3` back, which normally drops `OWN`.
    #[cfg(test)]
    pub(crate) fn write_back(&self, des3: u32) {
        self.des3.set(des3);
    }
}

/// A frame buffer, aligned so that no two buffers share a cache line.
#[repr(C, align(64))]
pub struct DmaBuffer(pub [u8; MAX_PACKET_SIZE]);

const_assert_eq!(core::mem::align_of::<DmaBuffer>(), CACHE_LINE);

impl DmaBuffer {
    const ZERO: Self = Self([0; MAX_PACKET_SIZE]);
}

/// Both descriptor rings, contiguous, in one cache-aligned block.
#[repr(C, align(64))]
struct DescriptorBlock {
    tx: [Descriptor; TX_DESCRIPTORS],
    rx: [Descriptor; RX_DESCRIPTORS],
}

/// Backing memory for one engine.
pub struct DmaPool {
    claimed: AtomicBool,
    descriptors: DescriptorBlock,
    tx_buffers: UnsafeCell<[DmaBuffer; TX_DESCRIPTORS]>,
    rx_buffers: UnsafeCell<[DmaBuffer; RX_DESCRIPTORS]>,
}

// Safety: nothing in the pool is touched except through the `DmaRings`
// handed out by `claim`, of which at most one exists at a time.
unsafe impl Sync for DmaPool {}

impl DmaPool {
    #[allow(clippy::new_without_default)]
    pub const fn new() -> Self {
        Self {
            claimed: AtomicBool::new(false),
            descriptors: DescriptorBlock {
                tx: [Descriptor::EMPTY; TX_DESCRIPTORS],
                rx: [Descriptor::EMPTY; RX_DESCRIPTORS],
            },
            tx_buffers: UnsafeCell::new([DmaBuffer::ZERO; TX_DESCRIPTORS]),
            rx_buffers: UnsafeCell::new([DmaBuffer::ZERO; RX_DESCRIPTORS]),
        }
    }

    /// Takes the pool, unless someone already has it.
    pub fn claim(&'static self) -> Option<DmaRings> {
        if self
            .claimed
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return None;
        }
        Some(DmaRings {
            pool: self,
            tx: Ring {
                descriptors: &self.descriptors.tx,
                buffers: self.tx_buffers.get() as *mut DmaBuffer,
                next: 0,
            },
            rx: Ring {
                descriptors: &self.descriptors.rx,
                buffers: self.rx_buffers.get() as *mut DmaBuffer,
                next: 0,
            },
        })
    }

    #[cfg(test)]
    pub(crate) fn tx_descriptor(&self, i: usize) -> &Descriptor {
        &self.descriptors.tx[i]
    }

    #[cfg(test)]
    pub(crate) fn rx_descriptor(&self, i: usize) -> &Descriptor {
        &self.descriptors.rx[i]
    }

    #[cfg(test)]
    pub(crate) fn tx_buffer(&self, i: usize) -> *mut u8 {
        (self.tx_buffers.get() as *mut DmaBuffer).wrapping_add(i) as *mut u8
    }

    #[cfg(test)]
    pub(crate) fn rx_buffer(&self, i: usize) -> *mut u8 {
        (self.rx_buffers.get() as *mut DmaBuffer).wrapping_add(i) as *mut u8
    }
}

/// A claimed pool, split into its two rings.
pub struct DmaRings {
    pool: &'static DmaPool,
    pub tx: Ring,
    pub rx: Ring,
}

impl DmaRings {
    /// Gives the memory back. The DMA engine must be stopped.
    pub fn release(self) {
        self.pool.claimed.store(false, Ordering::Release);
    }
}

/// Signal returned from ring operations to allow them to back out changes.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Commit {
    /// Leave the descriptor with software; the next call gets it again.
    No,
    /// Hand the descriptor to the hardware.
    Yes,
}

/// One ring of descriptors, and a matching ring of buffers.
///
/// `next` is the descriptor software will touch next: on transmit the next
/// one to fill, on receive the next one we expect the hardware to complete.
pub struct Ring {
    descriptors: &'static [Descriptor],
    /// Pointer, rather than `&'static mut`, because we loan the buffers to
    /// the DMA hardware.
    buffers: *mut DmaBuffer,
    /// Invariant: always `< descriptors.len()`.
    next: usize,
}

impl Ring {
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn next(&self) -> usize {
        self.next
    }

    pub fn successor(&self, i: usize) -> usize {
        if i + 1 == self.len() {
            0
        } else {
            i + 1
        }
    }

    pub fn advance(&mut self) {
        self.next = self.successor(self.next);
    }

    pub fn descriptor_addr(&self, i: usize) -> usize {
        self.descriptors[i].addr()
    }

    pub fn base_addr(&self) -> usize {
        self.descriptor_addr(0)
    }

    /// Address of the `next` descriptor, for the tail-pointer doorbell.
    pub fn next_addr(&self) -> usize {
        self.descriptor_addr(self.next)
    }

    pub fn buffer_addr(&self, i: usize) -> usize {
        self.buffers.wrapping_add(i) as usize
    }

    /// Re-reads descriptor `i` from memory and reports whether the hardware
    /// owns it.
    pub fn is_owned_by_hw(&self, cache: &impl CacheControl, i: usize) -> bool {
        let d = &self.descriptors[i];
        cache.invalidate(d.addr(), core::mem::size_of::<Descriptor>());
        d.is_owned_by_hw()
    }

    /// Frame length written back into descriptor `i`.
    pub fn frame_len(&self, i: usize) -> usize {
        self.descriptors[i].frame_len()
    }

    /// Contents of buffer `i`.
    ///
    /// # Safety
    ///
    /// Descriptor `i` must be owned by software, and must stay that way for
    /// as long as the returned slice lives.
    pub unsafe fn buffer(&self, i: usize) -> &[u8; MAX_PACKET_SIZE] {
        assert!(i < self.len());
        // Safety: in bounds per the assert; exclusivity is the caller's
        // contract.
        unsafe { &(*self.buffers.wrapping_add(i)).0 }
    }

    /// Puts every descriptor in its idle state and rewinds `next`. Receive
    /// descriptors (`rx == true`) are bonded to their buffers and handed to
    /// the hardware.
    ///
    /// The DMA engine must not be running.
    pub fn reset(&mut self, cache: &impl CacheControl, rx: bool) {
        for (i, d) in self.descriptors.iter().enumerate() {
            d.clear();
            if rx {
                d.des0.set(cache.bus_address(self.buffer_addr(i)));
                d.des3.set(DESC3_BUF1V);
                d.set_owned_by_hw();
            }
            cache.flush(d.addr(), core::mem::size_of::<Descriptor>());
        }
        self.next = 0;
    }

    /// Obtains the next buffer, if it is not still owned by the hardware.
    ///
    /// If the descriptor is free, calls `body` with the descriptor and its
    /// buffer. `body` fills them in and returns `Commit::Yes`, at which point
    /// the descriptor is handed to the hardware and `next` advances, or
    /// `Commit::No`, in which case nothing happens. The result is returned
    /// in `Some`.
    ///
    /// If the descriptor is still owned by the hardware, `body` isn't
    /// called, and the result is `None`.
    pub fn with_next_buffer(
        &mut self,
        cache: &impl CacheControl,
        body: impl FnOnce(&Descriptor, &mut DmaBuffer) -> Commit,
    ) -> Option<Commit> {
        if self.is_owned_by_hw(cache, self.next) {
            return None;
        }
        let d = &self.descriptors[self.next];
        // Safety: the hardware does not own this descriptor, and the hardware
        // never *takes* ownership, so nobody else touches the buffer until we
        // set OWN below. `&mut self` keeps us from handing it out twice.
        let buf = unsafe { &mut *self.buffers.wrapping_add(self.next) };
        let result = body(d, buf);

        if result == Commit::Yes {
            d.set_owned_by_hw();
            cache.flush(d.addr(), core::mem::size_of::<Descriptor>());
            self.advance();
        }
        Some(result)
    }

    /// Hands receive descriptor `i` and its buffer back to the hardware.
    ///
    /// The buffer pointer is torn down and rebuilt so that no stale
    /// write-back survives in the descriptor, and the buffer is invalidated
    /// so the next frame isn't shadowed by cached bytes of the last one.
    pub fn rearm(&mut self, cache: &impl CacheControl, i: usize) {
        let d = &self.descriptors[i];
        let len = core::mem::size_of::<Descriptor>();
        let buf = self.buffer_addr(i);

        d.des0.set(0);
        fence(Ordering::Release);
        cache.flush(d.addr(), len);
        cache.invalidate(buf, MAX_PACKET_SIZE);

        d.des0.set(cache.bus_address(buf));
        d.des1.set(0);
        d.des2.set(0);
        d.des3.set(DESC3_BUF1V);
        d.set_owned_by_hw();
        cache.flush(d.addr(), len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drv_boot_io_api::fakes::{NoopCache, RecordingCache};

    fn pool() -> &'static DmaPool {
        Box::leak(Box::new(DmaPool::new()))
    }

    #[test]
    fn pool_is_claimed_once() {
        let pool = pool();
        let rings = pool.claim().unwrap();
        assert!(pool.claim().is_none());
        rings.release();
        assert!(pool.claim().is_some());
    }

    #[test]
    fn rings_are_contiguous_and_aligned() {
        let rings = pool().claim().unwrap();
        assert_eq!(rings.tx.base_addr() % CACHE_LINE, 0);
        assert_eq!(
            rings.rx.base_addr(),
            rings.tx.base_addr() + 16 * TX_DESCRIPTORS
        );
        assert_eq!(rings.rx.buffer_addr(1) - rings.rx.buffer_addr(0), 1600);
        assert_eq!(MAX_PACKET_SIZE, 1600);
    }

    #[test]
    fn reset_hands_rx_to_hardware() {
        let pool = pool();
        let mut rings = pool.claim().unwrap();
        let cache = RecordingCache::default();
        rings.rx.reset(&cache, true);
        rings.tx.reset(&cache, false);
        for i in 0..RX_DESCRIPTORS {
            let w = pool.rx_descriptor(i).words();
            assert_eq!(w[0], cache.bus_address(rings.rx.buffer_addr(i)));
            assert_eq!(w[3], DESC3_OWN | DESC3_BUF1V);
        }
        for i in 0..TX_DESCRIPTORS {
            assert_eq!(pool.tx_descriptor(i).words(), [0; 4]);
        }
        assert_eq!(cache.flushes.get(), RX_DESCRIPTORS + TX_DESCRIPTORS);
    }

    #[test]
    fn uncommitted_buffer_is_offered_again() {
        let pool = pool();
        let mut rings = pool.claim().unwrap();
        let tx = &mut rings.tx;
        let r = tx.with_next_buffer(&NoopCache, |_, _| Commit::No);
        assert_eq!(r, Some(Commit::No));
        assert_eq!(tx.next(), 0);
        assert!(!pool.tx_descriptor(0).is_owned_by_hw());

        let r = tx.with_next_buffer(&NoopCache, |d, buf| {
            buf.0[..3].copy_from_slice(b"abc");
            d.set_tx(0x1000, 3);
            Commit::Yes
        });
        assert_eq!(r, Some(Commit::Yes));
        assert_eq!(tx.next(), 1);
        assert_eq!(
            pool.tx_descriptor(0).words(),
            [0x1000, 0, 3, DESC3_OWN | DESC3_FD | DESC3_LD | 3]
        );
    }

    #[test]
    fn owned_buffer_is_refused() {
        let pool = pool();
        let mut rings = pool.claim().unwrap();
        let tx = &mut rings.tx;
        for _ in 0..TX_DESCRIPTORS {
            tx.with_next_buffer(&NoopCache, |d, _| {
                d.set_tx(0, 60);
                Commit::Yes
            })
            .unwrap();
        }
        assert_eq!(tx.next(), 0);
        let mut called = false;
        let r = tx.with_next_buffer(&NoopCache, |_, _| {
            called = true;
            Commit::Yes
        });
        assert_eq!(r, None);
        assert!(!called);
    }

    #[test]
    fn rearm_rebuilds_descriptor() {
        let pool = pool();
        let mut rings = pool.claim().unwrap();
        rings.rx.reset(&NoopCache, true);
        pool.rx_descriptor(2).write_back(60 | DESC3_FD | DESC3_LD);
        assert!(!rings.rx.is_owned_by_hw(&NoopCache, 2));
        assert_eq!(rings.rx.frame_len(2), 60);

        rings.rx.rearm(&NoopCache, 2);
        let w = pool.rx_descriptor(2).words();
        assert_eq!(w[0], NoopCache.bus_address(rings.rx.buffer_addr(2)));
        assert_eq!(&w[1..], &[0, 0, DESC3_OWN | DESC3_BUF1V]);
    }

    #[test]
    fn successor_wraps() {
        let rings = pool().claim().unwrap();
        assert_eq!(rings.rx.successor(0), 1);
        assert_eq!(rings.rx.successor(RX_DESCRIPTORS - 1), 0);
    }
}
