//! Machine register identity.
//!
//! Registers are identified the same way across architectures: a bank
//! (general purpose or floating point) and the hardware encoding inside that
//! bank. Each architecture maps these to DWARF columns and, where a table
//! format exists, to the platform's unwind register numbers.

/// Type for register bank indices.
pub type RegBank = u8;

/// Type for register IDs within a bank.
pub type RegId = u8;

/// General-purpose integer registers.
pub const GP_BANK: RegBank = 0;

/// Floating-point / vector registers.
pub const FP_BANK: RegBank = 1;

/// Combined register identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AsmReg {
    pub bank: RegBank,
    pub id: RegId,
}

impl AsmReg {
    pub const fn new(bank: RegBank, id: RegId) -> Self {
        Self { bank, id }
    }

    /// General-purpose register with hardware encoding `id`.
    pub const fn gp(id: RegId) -> Self {
        Self::new(GP_BANK, id)
    }

    /// Floating-point register with hardware encoding `id`.
    pub const fn fp(id: RegId) -> Self {
        Self::new(FP_BANK, id)
    }

    pub fn is_gp(&self) -> bool {
        self.bank == GP_BANK
    }

    pub fn is_fp(&self) -> bool {
        self.bank == FP_BANK
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bank_constructors() {
        let x19 = AsmReg::gp(19);
        let d8 = AsmReg::fp(8);

        assert!(x19.is_gp());
        assert!(!x19.is_fp());
        assert!(d8.is_fp());
        assert_ne!(AsmReg::gp(8), d8);
        assert_eq!(AsmReg::new(GP_BANK, 19), x19);
    }
}
