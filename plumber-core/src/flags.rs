//! The pipe-flag model (spec §3, C1): a 32-bit word encoding direction,
//! shadow/disabled/async/persist bits and a 16-bit target pipe id used by
//! shadow pipes to reference their companion.

use bitflags::bitflags;

bitflags! {
    /// Wire format is stable and part of the module ABI (spec §6): the low
    /// 16 bits carry behavior bits, the high 16 bits carry the target pipe id
    /// consulted by shadow pipes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PipeFlags: u32 {
        /// Set on the input (downstream-facing) end of a pipe.
        const INPUT    = 0b0000_0001;
        /// Set on the output (upstream-facing) end of a pipe.
        const OUTPUT   = 0b0000_0010;
        /// This is a shadow input: it observes another pipe's byte stream
        /// rather than owning its own. Always paired with INPUT.
        const SHADOW   = 0b0000_0100;
        /// Downstream must treat the data as cancelled unless re-enabled.
        const DISABLED = 0b0000_1000;
        /// Only meaningful on an output pipe: writes may return WouldBlock.
        const ASYNC    = 0b0001_0000;
        /// Passed through to shadow paths but not consulted by them (see
        /// the open question in spec §9).
        const PERSIST  = 0b0010_0000;
    }
}

const TARGET_SHIFT: u32 = 16;
const TARGET_MASK: u32 = 0xFFFF_0000;

impl PipeFlags {
    /// Pack a shadow target pipe id into the high 16 bits of the flag word.
    pub fn with_target(self, target: u16) -> Self {
        let raw = (self.bits() & !TARGET_MASK) | ((target as u32) << TARGET_SHIFT);
        PipeFlags::from_bits_retain(raw)
    }

    /// Read back the shadow target pipe id packed by [`with_target`].
    pub fn target(self) -> u16 {
        ((self.bits() & TARGET_MASK) >> TARGET_SHIFT) as u16
    }

    pub fn is_input(self) -> bool {
        self.contains(PipeFlags::INPUT)
    }

    pub fn is_output(self) -> bool {
        self.contains(PipeFlags::OUTPUT)
    }

    pub fn is_shadow(self) -> bool {
        self.contains(PipeFlags::SHADOW)
    }

    pub fn is_disabled(self) -> bool {
        self.contains(PipeFlags::DISABLED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_round_trips_through_the_high_bits() {
        let flags = (PipeFlags::OUTPUT | PipeFlags::SHADOW).with_target(42);
        assert_eq!(flags.target(), 42);
        assert!(flags.is_shadow());
        assert!(flags.is_output());
    }

    #[test]
    fn disabled_is_independent_of_target() {
        let flags = PipeFlags::INPUT.with_target(7) | PipeFlags::DISABLED;
        assert!(flags.is_disabled());
        assert_eq!(flags.target(), 7);
    }
}
