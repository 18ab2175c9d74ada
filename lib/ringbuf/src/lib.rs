// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Static trace rings for boot drivers.
//!
//! A driver declares a ring of some small `Copy + PartialEq` event type and
//! drops entries into it as it goes. Nothing reads the ring at runtime; it is
//! there to be inspected from a debugger after something has gone wrong, or
//! dumped by board glue through [`Ringbuf::iter`].
//!
//! ```ignore
//! #[derive(Copy, Clone, PartialEq)]
//! enum Trace {
//!     None,
//!     Reset(u32),
//! }
//!
//! ringbuf!(Trace, 16, Trace::None);
//!
//! ringbuf_entry!(Trace::Reset(status));
//! ```
//!
//! Without a name the ring is called `__RINGBUF`, so a module gets one
//! unnamed ring. Give rings names (`ringbuf!(MDIO_RINGBUF, ...)` and
//! `ringbuf_entry!(MDIO_RINGBUF, ...)`) to have more.
//!
//! An entry identical to the previous one (same source line, same payload)
//! bumps that entry's count instead of taking a new slot, so a polling loop
//! doesn't wipe out the history that led up to it.
//!
//! Rings live in statics, and the host test harness runs tests on several
//! threads. An entry that finds its ring busy is dropped. The `disabled`
//! feature compiles the rings out while still type-checking the payloads.

#![cfg_attr(not(test), no_std)]

/// Re-exported so the macros can name it from any crate.
pub use static_cell::StaticCell;

/// Declares a static ring: `ringbuf!(NAME, Type, N, init)`, or
/// `ringbuf!(Type, N, init)` for the module's unnamed ring.
#[cfg(not(feature = "disabled"))]
#[macro_export]
macro_rules! ringbuf {
    ($name:ident, $t:ty, $n:expr, $init:expr) => {
        #[used]
        static $name: $crate::StaticCell<$crate::Ringbuf<$t, $n>> =
            $crate::StaticCell::new($crate::Ringbuf {
                last: None,
                buffer: [$crate::RingbufEntry {
                    line: 0,
                    generation: 0,
                    count: 0,
                    payload: $init,
                }; $n],
            });
    };
    ($t:ty, $n:expr, $init:expr) => {
        $crate::ringbuf!(__RINGBUF, $t, $n, $init);
    };
}

#[cfg(feature = "disabled")]
#[macro_export]
macro_rules! ringbuf {
    ($name:ident, $t:ty, $n:expr, $init:expr) => {
        #[allow(dead_code)]
        const _: $t = $init;
    };
    ($t:ty, $n:expr, $init:expr) => {
        #[allow(dead_code)]
        const _: $t = $init;
    };
}

/// Records `payload` in ring `NAME` (or the unnamed ring), tagged with the
/// calling line.
#[cfg(not(feature = "disabled"))]
#[macro_export]
macro_rules! ringbuf_entry {
    ($buf:expr, $payload:expr) => {{
        // Evaluated as a pair so neither expression can see the other's
        // binding.
        let (p, buf) = ($payload, &$buf);
        if let Some(mut ring) = $crate::StaticCell::try_borrow_mut(buf) {
            $crate::Ringbuf::entry(&mut *ring, line!() as u16, p);
        }
    }};
    ($payload:expr) => {
        $crate::ringbuf_entry!(__RINGBUF, $payload);
    };
}

#[cfg(feature = "disabled")]
#[macro_export]
macro_rules! ringbuf_entry {
    ($buf:expr, $payload:expr) => {{
        let _ = &$buf;
        let _ = &$payload;
    }};
    ($payload:expr) => {{
        let _ = &$payload;
    }};
}

/// One slot of a [`Ringbuf`].
///
/// `generation` counts how many times the slot has been overwritten, which
/// tells a reader where the ring wrapped.
#[derive(Debug, Copy, Clone)]
pub struct RingbufEntry<T: Copy + PartialEq> {
    pub line: u16,
    pub generation: u16,
    pub count: u32,
    pub payload: T,
}

/// `N` entries of `T`. Declare these with [`ringbuf!`].
#[derive(Debug)]
pub struct Ringbuf<T: Copy + PartialEq, const N: usize> {
    /// Slot written most recently; `None` until the first entry.
    pub last: Option<usize>,
    pub buffer: [RingbufEntry<T>; N],
}

impl<T: Copy + PartialEq, const N: usize> Ringbuf<T, N> {
    pub fn entry(&mut self, line: u16, payload: T) {
        // A corrupt `last` is treated like an empty ring.
        let last = self.last.filter(|&l| l < N);

        if let Some(ent) = last.map(|l| &mut self.buffer[l]) {
            if ent.line == line && ent.payload == payload {
                if let Some(count) = ent.count.checked_add(1) {
                    ent.count = count;
                    return;
                }
            }
        }

        let ndx = match last {
            Some(l) if l + 1 < N => l + 1,
            _ => 0,
        };
        let Some(ent) = self.buffer.get_mut(ndx) else {
            return;
        };
        *ent = RingbufEntry {
            line,
            generation: ent.generation.wrapping_add(1),
            count: 1,
            payload,
        };
        self.last = Some(ndx);
    }

    /// Walks the populated entries, most recent first.
    pub fn iter(&self) -> impl Iterator<Item = &RingbufEntry<T>> + '_ {
        let last = self.last.filter(|&l| l < N);
        let n = if last.is_some() { N } else { 0 };
        (0..n)
            .map(move |back| {
                let l = last.unwrap_or(0);
                &self.buffer[(l + N - back) % N]
            })
            .filter(|ent| ent.count != 0)
    }
}
