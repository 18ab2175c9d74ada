// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Single-borrower containers for `static` items.
//!
//! Boot firmware runs on one core with no preemption, so a borrow flag is all
//! the arbitration a static needs. The host test harness is another matter:
//! it runs tests on several threads, all of which share the same statics.
//! [`StaticCell::try_borrow_mut`] lets callers that can tolerate losing an
//! access (trace rings, mostly) skip it instead of panicking.

#![cfg_attr(not(test), no_std)]

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, Ordering};

/// A RefCell-style container that can be used in a static for cases where only
/// a single borrow needs to happen at any given time.
///
/// This only provides `mut` access. It does _not_ provide the many-reader
/// one-writer behavior of `RefCell`, only the one-writer part.
#[derive(Default)]
pub struct StaticCell<T> {
    borrowed: AtomicBool,
    cell: UnsafeCell<T>,
}

impl<T> StaticCell<T> {
    /// Creates a `StaticCell` containing `contents`.
    pub const fn new(contents: T) -> Self {
        Self {
            borrowed: AtomicBool::new(false),
            cell: UnsafeCell::new(contents),
        }
    }

    /// Gets mutable access to the contents of `self`, or `None` if a
    /// `StaticRef` for `self` is still alive somewhere.
    pub fn try_borrow_mut(&self) -> Option<StaticRef<'_, T>> {
        if self.borrowed.swap(true, Ordering::Acquire) {
            return None;
        }
        // Safety: the flag swap above ensures that we are not producing an
        // aliasing &mut to our contents.
        Some(unsafe {
            StaticRef {
                contents: &mut *self.cell.get(),
                borrow: &self.borrowed,
            }
        })
    }

    /// Gets mutable access to the contents of `self`.
    ///
    /// If a `StaticRef` for `self` still exists anywhere in the program, this
    /// will panic.
    #[track_caller]
    pub fn borrow_mut(&self) -> StaticRef<'_, T> {
        match self.try_borrow_mut() {
            Some(r) => r,
            None => panic!("StaticCell already borrowed"),
        }
    }
}

unsafe impl<T> Sync for StaticCell<T> where for<'a> &'a mut T: Send {}

pub struct StaticRef<'a, T> {
    contents: &'a mut T,
    borrow: &'a AtomicBool,
}

impl<T> Drop for StaticRef<'_, T> {
    fn drop(&mut self) {
        self.borrow.store(false, Ordering::Release);
    }
}

impl<T> core::ops::Deref for StaticRef<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &*self.contents
    }
}

impl<T> core::ops::DerefMut for StaticRef<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.contents
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_borrow_is_refused_until_first_drops() {
        let cell = StaticCell::new(5u32);
        let first = cell.try_borrow_mut();
        assert!(first.is_some());
        assert!(cell.try_borrow_mut().is_none());
        drop(first);

        let mut again = cell.borrow_mut();
        *again += 1;
        drop(again);
        assert_eq!(*cell.borrow_mut(), 6);
    }
}
