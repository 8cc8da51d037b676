//! Operation flags and read termination reasons

use std::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

/// `Device_Flags` carried by most procedures
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationFlags(pub u32);

impl OperationFlags {
    pub const NONE: OperationFlags = OperationFlags(0);
    /// Wait for a lock held by another link instead of failing
    pub const WAIT_LOCK: OperationFlags = OperationFlags(0x01);
    /// Last chunk of a write
    pub const END: OperationFlags = OperationFlags(0x08);
    /// `term_char` of a read request is significant
    pub const TERM_CHAR_SET: OperationFlags = OperationFlags(0x80);

    pub fn contains(self, other: OperationFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn wait_lock(self) -> bool {
        self.contains(Self::WAIT_LOCK)
    }

    pub fn end(self) -> bool {
        self.contains(Self::END)
    }

    pub fn term_char_set(self) -> bool {
        self.contains(Self::TERM_CHAR_SET)
    }
}

impl BitOr for OperationFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        OperationFlags(self.0 | rhs.0)
    }
}

/// Why a `device_read` returned
///
/// Several reasons can hold at once and are OR'd together.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReadReason(pub u32);

impl ReadReason {
    pub const NONE: ReadReason = ReadReason(0);
    /// Requested byte count satisfied
    pub const REQUEST_COUNT: ReadReason = ReadReason(0x01);
    /// Chunk ends with the termination character
    pub const TERM_CHAR: ReadReason = ReadReason(0x02);
    /// Message complete
    pub const END: ReadReason = ReadReason(0x04);

    pub fn contains(self, other: ReadReason) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for ReadReason {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        ReadReason(self.0 | rhs.0)
    }
}

impl BitOrAssign for ReadReason {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags() {
        let flags = OperationFlags::WAIT_LOCK | OperationFlags::END;
        assert!(flags.wait_lock());
        assert!(flags.end());
        assert!(!flags.term_char_set());
        assert!(!OperationFlags::NONE.wait_lock());
    }

    #[test]
    fn test_reason_combination() {
        let mut reason = ReadReason::REQUEST_COUNT;
        reason |= ReadReason::TERM_CHAR;
        assert!(reason.contains(ReadReason::REQUEST_COUNT | ReadReason::TERM_CHAR));
        assert!(!reason.contains(ReadReason::END));
        assert_eq!(reason.0, 0x03);
        assert!(ReadReason::NONE.is_empty());
    }
}
