use core::{cmp::Ordering, fmt};

use crate::{BinOp, Ty, UnOp};

// TYPED SCALAR VALUES
// ================================================================================================

/// A 64-bit scalar tagged with the C type it is to be interpreted at.
///
/// The whole point is to hold both `u64::MAX` and `i64::MIN` in one
/// representation: `raw` stores the bit pattern and `ty` says whether to read
/// it signed or unsigned. Arithmetic picks the signed or unsigned path from
/// the promoted result type, never from the host language.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Sval {
    ty: Ty,
    raw: i64,
}

/// Stand-in result for arithmetic the engine refuses to evaluate (division
/// by zero and friends). The caller is expected to have screened the operands
/// already; this keeps the poison visible in debug logs without panicking.
const POISON: i64 = 123_456_789;

impl Sval {
    // CONSTRUCTORS
    // --------------------------------------------------------------------------------------------

    /// Builds an sval from an already-normalized bit pattern. Callers that
    /// hold an arbitrary `i64` should use [`Sval::new`] so the value gets
    /// truncated into the type's width.
    pub const fn from_raw(ty: Ty, raw: i64) -> Self {
        Sval { ty, raw }
    }

    /// Builds an sval of type `ty`, truncating/sign-extending `val` to fit.
    pub fn new(ty: Ty, val: i64) -> Self {
        Sval { ty: Ty::I64, raw: val }.cast(ty)
    }

    pub fn new_unsigned(ty: Ty, val: u64) -> Self {
        Sval { ty: Ty::U64, raw: val as i64 }.cast(ty)
    }

    // ACCESSORS
    // --------------------------------------------------------------------------------------------

    pub const fn ty(&self) -> Ty {
        self.ty
    }

    /// The value read as signed.
    pub const fn value(&self) -> i64 {
        self.raw
    }

    /// The value read as unsigned.
    pub const fn uvalue(&self) -> u64 {
        self.raw as u64
    }

    pub fn is_signed(&self) -> bool {
        self.ty.is_signed()
    }

    pub fn is_unsigned(&self) -> bool {
        self.ty.is_unsigned()
    }

    pub fn bits(&self) -> u32 {
        self.ty.bits()
    }

    pub fn is_negative(&self) -> bool {
        self.cmp_val(0) == Ordering::Less
    }

    /// True when the value sits at (or below) the bottom of its type.
    pub fn is_min(&self) -> bool {
        if self.is_unsigned() {
            self.uvalue() == 0
        } else {
            self.raw <= self.ty.ty_min().raw
        }
    }

    /// True when the value sits at (or above) the top of its type.
    pub fn is_max(&self) -> bool {
        if self.is_unsigned() {
            self.uvalue() >= self.ty.ty_max().uvalue()
        } else {
            self.raw >= self.ty.ty_max().raw
        }
    }

    // CASTS AND COMPARISON
    // --------------------------------------------------------------------------------------------

    /// Converts to another type with C conversion semantics: truncation on
    /// narrowing, sign- or zero-extension on widening per the source width.
    pub fn cast(self, ty: Ty) -> Self {
        let raw = match ty {
            Ty::Bool => (self.raw != 0) as i64,
            _ => match ty.bits() {
                8 => {
                    if ty.is_unsigned() {
                        (self.raw as u8) as i64
                    } else {
                        (self.raw as i8) as i64
                    }
                },
                16 => {
                    if ty.is_unsigned() {
                        (self.raw as u16) as i64
                    } else {
                        (self.raw as i16) as i64
                    }
                },
                32 => {
                    if ty.is_unsigned() {
                        (self.raw as u32) as i64
                    } else {
                        (self.raw as i32) as i64
                    }
                },
                _ => self.raw,
            },
        };
        Sval { ty, raw }
    }

    /// Result type of the usual arithmetic conversions over two operands.
    pub(crate) fn promoted(a: Sval, b: Sval) -> Ty {
        let mut ty = a.ty;
        if b.ty.positive_bits() > a.ty.positive_bits() {
            ty = b.ty;
        }
        if ty.positive_bits() < 31 {
            ty = Ty::I32;
        }
        ty
    }

    /// Compares two svals after promoting both to their common type.
    pub fn cmp(self, other: Sval) -> Ordering {
        let ty = Self::promoted(self, other);
        let one = self.cast(ty);
        let two = other.cast(ty);
        if ty.is_unsigned() {
            one.uvalue().cmp(&two.uvalue())
        } else {
            one.value().cmp(&two.value())
        }
    }

    /// Compares after casting both operands to an explicit type first.
    pub fn cmp_t(ty: Ty, one: Sval, two: Sval) -> Ordering {
        one.cast(ty).cmp(two.cast(ty))
    }

    pub fn cmp_val(self, val: i64) -> Ordering {
        self.cmp(Sval::from_raw(Ty::I64, val))
    }

    pub fn min(self, other: Sval) -> Sval {
        if self.cmp(other) == Ordering::Greater { other } else { self }
    }

    pub fn max(self, other: Sval) -> Sval {
        if self.cmp(other) == Ordering::Less { other } else { self }
    }

    /// Whether `self` is below the range of `ty`.
    pub fn too_low_for(self, ty: Ty) -> bool {
        if self.is_negative() && ty.is_unsigned() {
            return true;
        }
        if ty.is_signed() && self.is_unsigned() {
            return false;
        }
        self.cmp(ty.ty_min()) == Ordering::Less
    }

    /// Whether `self` is above the range of `ty`.
    pub fn too_high_for(self, ty: Ty) -> bool {
        if self.is_negative() {
            return false;
        }
        self.cmp(ty.ty_max()) == Ordering::Greater
    }

    pub fn fits(self, ty: Ty) -> bool {
        !self.too_low_for(ty) && !self.too_high_for(ty)
    }

    // ARITHMETIC
    // --------------------------------------------------------------------------------------------

    pub fn preop(self, op: UnOp) -> Sval {
        let raw = match op {
            UnOp::Not => (self.raw == 0) as i64,
            UnOp::BitNot => !self.raw,
            UnOp::Neg => self.raw.wrapping_neg(),
            _ => self.raw,
        };
        Sval { ty: self.ty, raw }.cast(self.ty)
    }

    fn binop_unsigned(ty: Ty, left: u64, op: BinOp, right: u64) -> i64 {
        let val = match op {
            BinOp::Mul => left.wrapping_mul(right),
            BinOp::Div => {
                if right == 0 {
                    tracing::debug!("divide by zero");
                    POISON as u64
                } else {
                    left / right
                }
            },
            BinOp::Add => left.wrapping_add(right),
            BinOp::Sub => left.wrapping_sub(right),
            BinOp::Mod => {
                if right == 0 {
                    tracing::debug!("mod by zero");
                    POISON as u64
                } else {
                    left % right
                }
            },
            BinOp::Or => left | right,
            BinOp::And => left & right,
            BinOp::Shr => left.wrapping_shr(right as u32),
            BinOp::Shl => left.wrapping_shl(right as u32),
            BinOp::Xor => left ^ right,
        };
        Sval { ty, raw: val as i64 }.cast(ty).raw
    }

    fn binop_signed(ty: Ty, left: i64, op: BinOp, right: i64) -> i64 {
        let val = match op {
            BinOp::Mul => left.wrapping_mul(right),
            BinOp::Div => {
                if right == 0 {
                    tracing::debug!("divide by zero");
                    POISON
                } else if left == i64::MIN && right == -1 {
                    tracing::debug!("invalid divide i64::MIN / -1");
                    POISON
                } else {
                    left / right
                }
            },
            BinOp::Add => left.wrapping_add(right),
            BinOp::Sub => left.wrapping_sub(right),
            BinOp::Mod => {
                if right == 0 {
                    tracing::debug!("mod by zero");
                    POISON
                } else {
                    left % right
                }
            },
            BinOp::Or => left | right,
            BinOp::And => left & right,
            BinOp::Shr => left.wrapping_shr(right as u32),
            BinOp::Shl => left.wrapping_shl(right as u32),
            BinOp::Xor => left ^ right,
        };
        Sval { ty, raw: val }.cast(ty).raw
    }

    /// Evaluates `self op right` at the promoted type.
    pub fn binop(self, op: BinOp, right: Sval) -> Sval {
        let ty = Self::promoted(self, right);
        let l = self.cast(ty);
        let r = right.cast(ty);
        let raw = if ty.is_unsigned() {
            Self::binop_unsigned(ty, l.uvalue(), op, r.uvalue())
        } else {
            Self::binop_signed(ty, l.value(), op, r.value())
        };
        Sval { ty, raw }
    }

    /// Whether `self op right` leaves the range of `self`'s type.
    pub fn binop_overflows(self, op: BinOp, right: Sval) -> bool {
        let max = self.ty.ty_max();
        match op {
            BinOp::Add => self.cmp(max.binop(BinOp::Sub, right)) == Ordering::Greater,
            BinOp::Mul => {
                right.value() != 0 && self.cmp(max.binop(BinOp::Div, right)) == Ordering::Greater
            },
            _ => false,
        }
    }

    // RENDERING
    // --------------------------------------------------------------------------------------------

    /// Plain decimal rendering without the named extremum tokens.
    pub fn to_numstr(&self) -> String {
        if self.is_unsigned() {
            format!("{}", self.uvalue())
        } else if self.raw < 0 {
            format!("({})", self.raw)
        } else {
            format!("{}", self.raw)
        }
    }
}

impl fmt::Display for Sval {
    /// Renders with the extremum tokens so that cross-run output is stable
    /// regardless of the host's formatting of extreme values.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unsigned() {
            match self.uvalue() {
                v if v == u64::MAX => return f.write_str("u64max"),
                v if v == u32::MAX as u64 => return f.write_str("u32max"),
                v if v == u16::MAX as u64 => return f.write_str("u16max"),
                _ => {},
            }
        } else {
            match self.raw {
                v if v == i64::MAX => return f.write_str("s64max"),
                v if v == i32::MAX as i64 => return f.write_str("s32max"),
                v if v == i16::MAX as i64 => return f.write_str("s16max"),
                v if v == i64::MIN => return f.write_str("s64min"),
                v if v == i32::MIN as i64 => return f.write_str("s32min"),
                v if v == i16::MIN as i64 => return f.write_str("s16min"),
                _ => {},
            }
        }
        f.write_str(&self.to_numstr())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn casts_truncate_and_extend() {
        let v = Sval::new(Ty::I32, -1);
        assert_eq!(v.cast(Ty::U8).uvalue(), 0xff);
        assert_eq!(v.cast(Ty::U64).uvalue(), u64::MAX);
        assert_eq!(Sval::new(Ty::U8, 0x1ff).uvalue(), 0xff);
        assert_eq!(Sval::new(Ty::Bool, 7).value(), 1);
    }

    #[test]
    fn comparison_promotes() {
        // -1 as i32 vs 1 as u64 promotes to u64, where -1 wraps high.
        let a = Sval::new(Ty::I32, -1);
        let b = Sval::new(Ty::U64, 1);
        assert_eq!(a.cmp(b), Ordering::Greater);
        // Same comparison at i64 stays signed.
        assert_eq!(a.cmp(Sval::new(Ty::I64, 1)), Ordering::Less);
    }

    #[test]
    fn small_types_promote_to_int() {
        let a = Sval::new(Ty::U8, 200);
        let b = Sval::new(Ty::U8, 100);
        let sum = a.binop(BinOp::Add, b);
        // u8 + u8 happens at i32, so no wrap.
        assert_eq!(sum.ty(), Ty::I32);
        assert_eq!(sum.value(), 300);
    }

    #[test]
    fn division_edge_cases_do_not_panic() {
        let min = Sval::new(Ty::I64, i64::MIN);
        let neg1 = Sval::new(Ty::I64, -1);
        let _ = min.binop(BinOp::Div, neg1);
        let _ = min.binop(BinOp::Div, Sval::new(Ty::I64, 0));
    }

    #[rstest::rstest]
    #[case(Ty::I32.ty_max(), "s32max")]
    #[case(Ty::I32.ty_min(), "s32min")]
    #[case(Ty::U64.ty_max(), "u64max")]
    #[case(Ty::I64.ty_max(), "s64max")]
    #[case(Ty::U16.ty_max(), "u16max")]
    #[case(Sval::new(Ty::I32, -5), "(-5)")]
    #[case(Sval::new(Ty::U32, 5), "5")]
    fn extremum_tokens(#[case] val: Sval, #[case] rendered: &str) {
        assert_eq!(val.to_string(), rendered);
    }

    #[test]
    fn overflow_detection() {
        let max = Ty::I32.ty_max();
        assert!(max.binop_overflows(BinOp::Add, Sval::new(Ty::I32, 1)));
        assert!(!Sval::new(Ty::I32, 1).binop_overflows(BinOp::Add, Sval::new(Ty::I32, 1)));
    }
}
