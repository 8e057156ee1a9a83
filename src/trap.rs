//! Trap causes, the `mtvec`/`mie`/`mip` CSRs, and the cause-code table.
//!
//! Six exceptions and two interrupts: this machine-mode-only core has no
//! S-mode or page-fault causes, so the usual RV32I/Zicsr full cause set is
//! trimmed down to what it can actually raise. Numeric cause codes match
//! the reference hardware description's `TrapCause` table.

use bitvec::prelude::*;

/// A synchronous exception.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Exception {
    InstructionAddressMisaligned,
    /// The only fatal cause: latches `fatal` and halts the sequencer.
    IllegalInstruction,
    Breakpoint,
    LoadAddressMisaligned,
    StoreAddressMisaligned,
    EnvironmentCallFromMMode,
}

impl Exception {
    pub const INSTRUCTION_ADDRESS_MISALIGNED: u32 = 0x0;
    pub const ILLEGAL_INSTRUCTION: u32 = 0x2;
    pub const BREAKPOINT: u32 = 0x3;
    pub const LOAD_ADDRESS_MISALIGNED: u32 = 0x4;
    pub const STORE_ADDRESS_MISALIGNED: u32 = 0x6;
    pub const ENVIRONMENT_CALL_FROM_M_MODE: u32 = 0xB;

    /// The value placed in `mcause` (bit 31 clear).
    pub fn code(self) -> u32 {
        match self {
            Self::InstructionAddressMisaligned => Self::INSTRUCTION_ADDRESS_MISALIGNED,
            Self::IllegalInstruction => Self::ILLEGAL_INSTRUCTION,
            Self::Breakpoint => Self::BREAKPOINT,
            Self::LoadAddressMisaligned => Self::LOAD_ADDRESS_MISALIGNED,
            Self::StoreAddressMisaligned => Self::STORE_ADDRESS_MISALIGNED,
            Self::EnvironmentCallFromMMode => Self::ENVIRONMENT_CALL_FROM_M_MODE,
        }
    }

    /// Whether this exception latches `fatal` and halts the sequencer.
    ///
    /// Currently only `IllegalInstruction`; implementations may surface more.
    pub fn is_fatal(self) -> bool {
        matches!(self, Self::IllegalInstruction)
    }
}

/// An asynchronous interrupt.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Interrupt {
    MachineTimer,
    MachineExternal,
}

impl Interrupt {
    pub const MACHINE_TIMER: u32 = 0x8000_0007;
    pub const MACHINE_EXTERNAL: u32 = 0x8000_000B;

    /// The value placed in `mcause` (bit 31 set).
    pub fn code(self) -> u32 {
        match self {
            Self::MachineTimer => Self::MACHINE_TIMER,
            Self::MachineExternal => Self::MACHINE_EXTERNAL,
        }
    }
}

/// A pending or entered trap: either a synchronous exception or an
/// asynchronous interrupt, unified per the ISA's shared `mtvec` dispatch.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Trap {
    Exception(Exception),
    Interrupt(Interrupt),
}

impl Trap {
    /// The value to place in `mcause`.
    pub fn cause(self) -> u32 {
        match self {
            Self::Exception(exception) => exception.code(),
            Self::Interrupt(interrupt) => interrupt.code(),
        }
    }

    pub fn is_interrupt(self) -> bool {
        matches!(self, Self::Interrupt(_))
    }

    /// Whether this trap latches `fatal` and halts the sequencer.
    pub fn is_fatal(self) -> bool {
        match self {
            Self::Exception(exception) => exception.is_fatal(),
            Self::Interrupt(_) => false,
        }
    }
}

impl From<Exception> for Trap {
    fn from(exception: Exception) -> Self {
        Self::Exception(exception)
    }
}

impl From<Interrupt> for Trap {
    fn from(interrupt: Interrupt) -> Self {
        Self::Interrupt(interrupt)
    }
}

/// `mtvec`: the trap-handler base address and dispatch mode.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct Mtvec(u32);

impl Mtvec {
    /// Whether dispatch is vectored (mode bit set) rather than direct.
    pub fn vectored(self) -> bool {
        self.0 & 0b1 != 0
    }

    /// The word-aligned base address (`mtvec & !0b11`).
    pub fn base(self) -> u32 {
        self.0 & !0b11
    }

    pub fn read(self) -> u32 {
        self.0
    }

    /// Writes the full CSR value. Only mode `0` (direct) and `1` (vectored)
    /// are defined; bit 1 of the mode field is masked to zero (WARL).
    pub fn write(&mut self, value: u32) {
        self.0 = value & !0b10;
    }

    /// The address of the first instruction fetch for `trap`, per §4.4:
    /// vectored dispatch only applies to interrupts, not exceptions.
    pub fn vector_address(self, trap: Trap) -> u32 {
        let offset = if self.vectored() && trap.is_interrupt() {
            (trap.cause() & 0x3FFF_FFFF).wrapping_shl(2)
        } else {
            0
        };
        self.base().wrapping_add(offset)
    }
}

/// Bit indices shared by `mie` and `mip`.
mod idx {
    pub const MTI: usize = 7;
    pub const MEI: usize = 11;
}

/// `mie`: per-source interrupt enables. Only MTI/MEI are implemented.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct Mie {
    mti: bool,
    mei: bool,
}

impl Mie {
    pub fn mti(&self) -> bool {
        self.mti
    }

    pub fn mei(&self) -> bool {
        self.mei
    }

    pub fn read(&self) -> u32 {
        let mut bits = bitarr![u32, Lsb0; 0; 32];
        bits.set(idx::MTI, self.mti);
        bits.set(idx::MEI, self.mei);
        bits.load_le()
    }

    pub fn write(&mut self, value: u32) {
        let bits = value.view_bits::<Lsb0>();
        self.mti = bits[idx::MTI];
        self.mei = bits[idx::MEI];
    }
}

/// `mip`: per-source interrupt pending latches. Only MTI/MEI are implemented.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct Mip {
    mti: bool,
    mei: bool,
}

impl Mip {
    pub fn mti(&self) -> bool {
        self.mti
    }

    pub fn set_mti(&mut self, value: bool) {
        self.mti = value;
    }

    pub fn mei(&self) -> bool {
        self.mei
    }

    pub fn set_mei(&mut self, value: bool) {
        self.mei = value;
    }

    pub fn read(&self) -> u32 {
        let mut bits = bitarr![u32, Lsb0; 0; 32];
        bits.set(idx::MTI, self.mti);
        bits.set(idx::MEI, self.mei);
        bits.load_le()
    }

    /// Writes are accepted but ignored: both pending bits are externally
    /// managed (set by the timer/external interrupt lines, cleared by trap
    /// entry). No bits of `mip` are actually writable in this core.
    pub fn write(&mut self, _value: u32) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cause_codes_match_source() {
        assert_eq!(0x0, Exception::InstructionAddressMisaligned.code());
        assert_eq!(0x2, Exception::IllegalInstruction.code());
        assert_eq!(0x3, Exception::Breakpoint.code());
        assert_eq!(0x4, Exception::LoadAddressMisaligned.code());
        assert_eq!(0x6, Exception::StoreAddressMisaligned.code());
        assert_eq!(0xB, Exception::EnvironmentCallFromMMode.code());
        assert_eq!(0x8000_0007, Interrupt::MachineTimer.code());
        assert_eq!(0x8000_000B, Interrupt::MachineExternal.code());
    }

    #[test]
    fn test_only_illegal_instruction_is_fatal() {
        assert!(Exception::IllegalInstruction.is_fatal());
        for exc in [
            Exception::InstructionAddressMisaligned,
            Exception::Breakpoint,
            Exception::LoadAddressMisaligned,
            Exception::StoreAddressMisaligned,
            Exception::EnvironmentCallFromMMode,
        ] {
            assert!(!exc.is_fatal());
        }
    }

    #[test]
    fn test_mtvec_direct_dispatch_ignores_cause() {
        let mut mtvec = Mtvec::default();
        mtvec.write(0x80); // mode 0 = direct
        assert_eq!(0x80, mtvec.vector_address(Trap::Exception(Exception::Breakpoint)));
        assert_eq!(
            0x80,
            mtvec.vector_address(Trap::Interrupt(Interrupt::MachineTimer))
        );
    }

    #[test]
    fn test_mtvec_vectored_dispatch_only_for_interrupts() {
        let mut mtvec = Mtvec::default();
        mtvec.write(0x81); // mode 1 = vectored
        assert_eq!(
            0x80,
            mtvec.vector_address(Trap::Exception(Exception::Breakpoint))
        );
        // Timer interrupt: cause_low = 7 -> offset 7*4 = 28 = 0x1C.
        assert_eq!(
            0x80 + 0x1C,
            mtvec.vector_address(Trap::Interrupt(Interrupt::MachineTimer))
        );
    }

    #[test]
    fn test_mtvec_masks_reserved_mode_bit() {
        let mut mtvec = Mtvec::default();
        mtvec.write(0x83); // mode bits = 0b11, bit 1 should be masked away
        assert_eq!(0b01, mtvec.read() & 0b11);
        assert!(mtvec.vectored());
    }

    #[test]
    fn test_mie_mip_round_trip() {
        let mut mie = Mie::default();
        mie.write((1 << 7) | (1 << 11));
        assert!(mie.mti());
        assert!(mie.mei());
        assert_eq!((1 << 7) | (1 << 11), mie.read());
    }

    #[test]
    fn test_mip_software_write_is_ignored() {
        let mut mip = Mip::default();
        mip.write(0xFFFF_FFFF);
        assert_eq!(0, mip.read());
        mip.set_mti(true);
        assert_eq!(1 << 7, mip.read());
        mip.write(0);
        assert_eq!(1 << 7, mip.read());
    }
}
