// FACT KINDS
// ================================================================================================

/// The family a summary-row fact belongs to. The integer codes are the
/// on-disk representation and must never be renumbered; append only.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum FactKind {
    Internal,
    ParamValue,
    UserData,
    HostData,
    ParamFreed,
    MaybeFreed,
    BitSet,
    UserDataSet,
    AtomicInc,
    AtomicDec,
    Lock,
    Unlock,
    HalfLocked,
    HostPtr,
    Dereference,
    LeafFn,
    FilterValue,
    ByteCount,
    ElemCount,
    ErrPtr,
    Nospec,
    Sleep,
    ArrayLen,
    /// Codes written by newer versions than this reader understands.
    Unknown(i32),
}

impl FactKind {
    pub const fn code(self) -> i32 {
        match self {
            FactKind::Internal => 0,
            FactKind::ParamValue => 1,
            FactKind::UserData => 2,
            FactKind::HostData => 3,
            FactKind::ParamFreed => 4,
            FactKind::MaybeFreed => 5,
            FactKind::BitSet => 6,
            FactKind::UserDataSet => 7,
            FactKind::AtomicInc => 8,
            FactKind::AtomicDec => 9,
            FactKind::Lock => 10,
            FactKind::Unlock => 11,
            FactKind::HalfLocked => 12,
            FactKind::HostPtr => 13,
            FactKind::Dereference => 14,
            FactKind::LeafFn => 15,
            FactKind::FilterValue => 16,
            FactKind::ByteCount => 17,
            FactKind::ElemCount => 18,
            FactKind::ErrPtr => 19,
            FactKind::Nospec => 20,
            FactKind::Sleep => 21,
            FactKind::ArrayLen => 22,
            FactKind::Unknown(code) => code,
        }
    }

    pub const fn from_code(code: i32) -> FactKind {
        match code {
            0 => FactKind::Internal,
            1 => FactKind::ParamValue,
            2 => FactKind::UserData,
            3 => FactKind::HostData,
            4 => FactKind::ParamFreed,
            5 => FactKind::MaybeFreed,
            6 => FactKind::BitSet,
            7 => FactKind::UserDataSet,
            8 => FactKind::AtomicInc,
            9 => FactKind::AtomicDec,
            10 => FactKind::Lock,
            11 => FactKind::Unlock,
            12 => FactKind::HalfLocked,
            13 => FactKind::HostPtr,
            14 => FactKind::Dereference,
            15 => FactKind::LeafFn,
            16 => FactKind::FilterValue,
            17 => FactKind::ByteCount,
            18 => FactKind::ElemCount,
            19 => FactKind::ErrPtr,
            20 => FactKind::Nospec,
            21 => FactKind::Sleep,
            22 => FactKind::ArrayLen,
            other => FactKind::Unknown(other),
        }
    }
}

/// Parameter index meaning the fact attaches to the return value.
pub const PARAM_RETURN: i32 = -1;
/// Parameter index meaning the fact is about global context, not an argument.
pub const PARAM_GLOBAL: i32 = -2;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip() {
        for code in 0..23 {
            assert_eq!(FactKind::from_code(code).code(), code);
        }
        assert_eq!(FactKind::from_code(99), FactKind::Unknown(99));
        assert_eq!(FactKind::Unknown(99).code(), 99);
    }
}
