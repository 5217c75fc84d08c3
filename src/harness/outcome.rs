//! Per-session outcome storage
//!
//! Sharing contract: the board has exactly one slot per session, sized once
//! before any driver starts and never resized. Each slot is written by exactly
//! one driver through its [`SlotWriter`], which cannot be cloned and is consumed
//! by the write. The supervisor only reads. No lock is involved; the
//! `completed` flag is published with release ordering after the other fields,
//! so a reader that sees `completed` also sees the rest of the slot.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use super::driver::SessionReport;

const UNWRITTEN: usize = usize::MAX;

#[derive(Debug)]
struct Slot {
    completed: AtomicBool,
    succeeded: AtomicBool,
    /// Identity of the driver that wrote the slot
    written_by: AtomicUsize,
}

impl Slot {
    fn new() -> Self {
        Self {
            completed: AtomicBool::new(false),
            succeeded: AtomicBool::new(false),
            written_by: AtomicUsize::new(UNWRITTEN),
        }
    }
}

/// Fixed-size table of session outcomes
#[derive(Debug)]
pub struct OutcomeBoard {
    slots: Box<[Slot]>,
}

impl OutcomeBoard {
    /// Allocate a zeroed board and one writer per slot
    pub fn new(sessions: usize) -> (Arc<Self>, Vec<SlotWriter>) {
        let board = Arc::new(Self {
            slots: (0..sessions).map(|_| Slot::new()).collect(),
        });
        let writers = (0..sessions)
            .map(|index| SlotWriter {
                board: Arc::clone(&board),
                index,
            })
            .collect();
        (board, writers)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Read one slot
    pub fn slot(&self, index: usize) -> Option<SlotView> {
        let slot = self.slots.get(index)?;
        let completed = slot.completed.load(Ordering::Acquire);
        if !completed {
            // A writer may be midway; nothing but `completed` is published yet
            return Some(SlotView {
                completed: false,
                succeeded: false,
                written_by: None,
            });
        }
        let written_by = slot.written_by.load(Ordering::Relaxed);
        Some(SlotView {
            completed,
            succeeded: slot.succeeded.load(Ordering::Relaxed),
            written_by: (written_by != UNWRITTEN).then_some(written_by),
        })
    }

    /// Read every slot
    pub fn snapshot(&self) -> Vec<SlotView> {
        (0..self.len()).filter_map(|i| self.slot(i)).collect()
    }

    /// Count completed and succeeded sessions
    pub fn tally(&self) -> Tally {
        let mut tally = Tally {
            completed: 0,
            succeeded: 0,
            total: self.len(),
        };
        for view in self.snapshot() {
            if view.completed {
                tally.completed += 1;
            }
            if view.completed && view.succeeded {
                tally.succeeded += 1;
            }
        }
        tally
    }
}

/// Exclusive right to write one slot, exactly once
#[derive(Debug)]
pub struct SlotWriter {
    board: Arc<OutcomeBoard>,
    index: usize,
}

impl SlotWriter {
    /// Slot this writer owns; equals the session identity it was handed to
    pub fn index(&self) -> usize {
        self.index
    }

    /// Publish a session's report
    ///
    /// The report must come from the session this slot belongs to.
    pub fn record(self, report: &SessionReport) {
        debug_assert_eq!(
            report.session, self.index,
            "session {} reported into slot {}",
            report.session, self.index
        );
        let slot = &self.board.slots[self.index];
        slot.succeeded.store(report.is_success(), Ordering::Relaxed);
        slot.written_by.store(report.session, Ordering::Relaxed);
        slot.completed.store(true, Ordering::Release);
    }
}

/// Copy of one slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotView {
    pub completed: bool,
    pub succeeded: bool,
    pub written_by: Option<usize>,
}

/// Board summary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tally {
    pub completed: usize,
    pub succeeded: usize,
    pub total: usize,
}

impl Tally {
    pub fn all_completed(&self) -> bool {
        self.completed == self.total
    }
}

impl fmt::Display for Tally {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} sessions completed ({} successfully), out of {}",
            self.completed, self.succeeded, self.total
        )
    }
}
