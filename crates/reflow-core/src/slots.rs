//! Cursor-addressed hook storage.
//!
//! Slots are created in call order during the first pass and revisited in
//! the same order on every later pass. The contract is positional: a hook
//! call that moves, disappears or changes its slot type between passes is a
//! programming error and panics.

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

pub(crate) struct HookSlots {
    slots: Vec<Rc<dyn Any>>,
    cursor: usize,
    hooked: bool,
}

impl HookSlots {
    pub(crate) fn new() -> Self {
        Self {
            slots: Vec::new(),
            cursor: 0,
            hooked: false,
        }
    }

    pub(crate) fn begin_pass(&mut self) {
        self.cursor = 0;
    }

    /// True once any slot has ever been claimed. A component that never
    /// touches a slot is static and its loop yields exactly once.
    pub(crate) fn hooked(&self) -> bool {
        self.hooked
    }

    /// Claims the next slot, seeding it with `init` on first visit.
    /// Returns (slot, created).
    pub(crate) fn claim<T: 'static>(
        &mut self,
        init: impl FnOnce() -> T,
    ) -> (Rc<RefCell<T>>, bool) {
        self.hooked = true;
        let index = self.cursor;
        self.cursor += 1;
        if let Some(existing) = self.slots.get(index) {
            let slot = Rc::clone(existing)
                .downcast::<RefCell<T>>()
                .unwrap_or_else(|_| panic!("hook order violated at slot {index}"));
            return (slot, false);
        }
        let slot = Rc::new(RefCell::new(init()));
        self.slots.push(slot.clone() as Rc<dyn Any>);
        (slot, true)
    }
}
