use enumflags2::{bitflags, BitFlags};
use std::sync::atomic::{AtomicU8, Ordering};

/// Status bits shared by every refcounted runtime entity.
#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flag {
    /// teardown has begun, the entity must not accept new work
    Lysing,
    /// the drop path already ran, repeat drops are no-ops
    Dropped,
    /// the entity no longer accepts input
    Closed,
    /// a shallow alias sharing its owner's structure
    Duplicate,
}

/// Lock-free flag word. Flags are monotonic: set during teardown, never
/// cleared.
#[derive(Debug, Default)]
pub struct AtomFlags(AtomicU8);

impl AtomFlags {
    pub fn new() -> Self {
        Self(AtomicU8::new(0))
    }

    pub fn set(&self, flag: Flag) {
        self.0
            .fetch_or(BitFlags::from_flag(flag).bits(), Ordering::AcqRel);
    }

    /// Set `flag`, returning true if this call was the one that set it.
    pub fn set_once(&self, flag: Flag) -> bool {
        let bits = BitFlags::from_flag(flag).bits();
        self.0.fetch_or(bits, Ordering::AcqRel) & bits == 0
    }

    pub fn test(&self, flag: Flag) -> bool {
        BitFlags::<Flag>::from_bits_truncate(self.0.load(Ordering::Acquire)).contains(flag)
    }

    pub fn test_any(&self, flags: BitFlags<Flag>) -> bool {
        BitFlags::<Flag>::from_bits_truncate(self.0.load(Ordering::Acquire)).intersects(flags)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn set_once_reports_first_setter() {
        let flags = AtomFlags::new();
        assert!(!flags.test(Flag::Dropped));
        assert!(flags.set_once(Flag::Dropped));
        assert!(!flags.set_once(Flag::Dropped));
        assert!(flags.test(Flag::Dropped));
        assert!(!flags.test(Flag::Lysing));
    }
}
