/// Per-frame work allowance for cooperative, time-sliced computations.
///
/// Budgets are expressed in abstract work units rather than wall-clock time
/// (for containment tests one point-edge comparison is one unit). A given
/// input therefore always yields control at the same places, which keeps
/// time-sliced work replayable in tests.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FrameBudget {
    total_units: u32,
    remaining_units: u32,
}

impl FrameBudget {
    /// A few thousand comparisons fit comfortably inside one 60 Hz frame.
    pub const DEFAULT_UNITS: u32 = 4096;

    pub fn new(units: u32) -> Self {
        Self {
            total_units: units,
            remaining_units: units,
        }
    }

    /// A practically-unbounded budget (still deterministic).
    pub fn unlimited() -> Self {
        Self::new(u32::MAX)
    }

    pub fn remaining_units(&self) -> u32 {
        self.remaining_units
    }

    pub fn spent_units(&self) -> u32 {
        self.total_units - self.remaining_units
    }

    /// `true` until the first unit is consumed.
    pub fn is_fresh(&self) -> bool {
        self.remaining_units == self.total_units
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining_units == 0
    }

    /// Attempts to consume `units` from the budget.
    ///
    /// Returns `true` if the budget had enough remaining units; otherwise the
    /// budget is left untouched.
    pub fn try_consume(&mut self, units: u32) -> bool {
        if self.remaining_units < units {
            return false;
        }
        self.remaining_units -= units;
        true
    }

    /// Consumes up to `units` and returns how many were actually taken.
    ///
    /// Used to let a single oversized item through on a fresh budget so
    /// time-sliced work always makes progress.
    pub fn consume_up_to(&mut self, units: u32) -> u32 {
        let taken = units.min(self.remaining_units);
        self.remaining_units -= taken;
        taken
    }

    /// Starts a new frame with the same allowance.
    pub fn refill(&mut self) {
        self.remaining_units = self.total_units;
    }
}

impl Default for FrameBudget {
    fn default() -> Self {
        Self::new(Self::DEFAULT_UNITS)
    }
}
