//! Per-thread interpreter state.
//!
//! A [`ManagedThread`] is owned by the thread running the dispatch loop.
//! Only the status word is shared: other threads request suspension,
//! termination or a safepoint through a [`StatusHandle`].

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use bitflags::bitflags;

use crate::method::{Field, Method};
use crate::value::{ClassRef, ObjectRef};

bitflags! {
    /// Requests the interpreter observes in call prologues.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct ThreadFlags: u32 {
        const SUSPEND_REQUEST = 1 << 0;
        const TERMINATION_REQUEST = 1 << 1;
        const SAFEPOINT_REQUEST = 1 << 2;
    }
}

/// Shared view of a thread's status word.
#[derive(Clone, Debug, Default)]
pub struct StatusHandle(Arc<AtomicU32>);

impl StatusHandle {
    pub fn set(&self, flags: ThreadFlags) {
        self.0.fetch_or(flags.bits(), Ordering::AcqRel);
    }

    pub fn clear(&self, flags: ThreadFlags) {
        self.0.fetch_and(!flags.bits(), Ordering::AcqRel);
    }

    pub fn get(&self) -> ThreadFlags {
        ThreadFlags::from_bits_truncate(self.0.load(Ordering::Acquire))
    }

    pub fn test(&self, flags: ThreadFlags) -> bool {
        self.get().intersects(flags)
    }
}

/// Something the interpreter resolved for an instruction.
#[derive(Clone, Debug)]
pub enum CachedEntity {
    Method(Arc<Method>),
    Field(Arc<Field>),
    Class(ClassRef),
}

#[derive(Clone, Debug)]
struct CacheSlot {
    method_id: u32,
    pc: u32,
    entity: CachedEntity,
}

/// Direct-mapped cache of resolution results keyed by
/// `(method id, bytecode offset)`.
#[derive(Debug)]
pub struct InterpreterCache {
    slots: Box<[Option<CacheSlot>]>,
    hits: u64,
    misses: u64,
}

impl Default for InterpreterCache {
    fn default() -> Self {
        Self {
            slots: vec![None; Self::SIZE].into_boxed_slice(),
            hits: 0,
            misses: 0,
        }
    }
}

impl InterpreterCache {
    pub const SIZE: usize = 256;

    #[inline]
    fn index(method_id: u32, pc: u32) -> usize {
        ((pc >> 1) ^ method_id.wrapping_mul(0x9e37_79b9).rotate_left(7)) as usize & (Self::SIZE - 1)
    }

    pub fn get(&mut self, method_id: u32, pc: u32) -> Option<&CachedEntity> {
        let slot = self.slots[Self::index(method_id, pc)].as_ref();
        match slot {
            Some(s) if s.method_id == method_id && s.pc == pc => {
                self.hits += 1;
                Some(&s.entity)
            }
            _ => {
                self.misses += 1;
                None
            }
        }
    }

    /// Store `entity`, evicting whatever shared the slot.
    pub fn set(&mut self, method_id: u32, pc: u32, entity: CachedEntity) {
        self.slots[Self::index(method_id, pc)] = Some(CacheSlot {
            method_id,
            pc,
            entity,
        });
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = None);
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }
}

/// Outcome counts of one conditional branch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BranchCounters {
    pub taken: u64,
    pub not_taken: u64,
}

/// Interpreter-facing state of one managed thread.
#[derive(Debug, Default)]
pub struct ManagedThread {
    status: StatusHandle,
    exception: Option<ObjectRef>,
    cache: InterpreterCache,
    branches: HashMap<(u32, u32), BranchCounters>,
}

impl ManagedThread {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle other threads use to post requests.
    pub fn status_handle(&self) -> StatusHandle {
        self.status.clone()
    }

    #[inline]
    pub fn flags(&self) -> ThreadFlags {
        self.status.get()
    }

    #[inline]
    pub fn has_flags(&self) -> bool {
        !self.status.get().is_empty()
    }

    pub fn set_flag(&self, flags: ThreadFlags) {
        self.status.set(flags);
    }

    pub fn clear_flag(&self, flags: ThreadFlags) {
        self.status.clear(flags);
    }

    #[inline]
    pub fn pending_exception(&self) -> Option<ObjectRef> {
        self.exception
    }

    #[inline]
    pub fn has_pending_exception(&self) -> bool {
        self.exception.is_some()
    }

    pub fn set_exception(&mut self, exception: ObjectRef) {
        self.exception = Some(exception);
    }

    pub fn clear_exception(&mut self) -> Option<ObjectRef> {
        self.exception.take()
    }

    pub fn cache(&self) -> &InterpreterCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut InterpreterCache {
        &mut self.cache
    }

    pub(crate) fn record_branch(&mut self, method_id: u32, pc: u32, taken: bool) {
        let counters = self.branches.entry((method_id, pc)).or_default();
        if taken {
            counters.taken += 1;
        } else {
            counters.not_taken += 1;
        }
    }

    /// Profile of the conditional branch at `pc` of `method_id`.
    pub fn branch_profile(&self, method_id: u32, pc: u32) -> BranchCounters {
        self.branches.get(&(method_id, pc)).copied().unwrap_or_default()
    }
}
