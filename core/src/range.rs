use core::{cmp::Ordering, fmt};

use crate::{BinOp, CmpOp, Sval, Ty};

// RANGES
// ================================================================================================

/// A closed interval `[min, max]` of two svals of the same type.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Range {
    pub min: Sval,
    pub max: Sval,
}

impl Range {
    /// Builds a range; an inverted pair collapses to the whole range of the
    /// min's type, which is the conservative answer for a bogus request.
    pub fn new(min: Sval, max: Sval) -> Self {
        if min.cmp(max) == Ordering::Greater {
            let ty = min.ty();
            return Range { min: ty.ty_min(), max: ty.ty_max() };
        }
        Range { min, max }
    }

    pub fn singleton(val: Sval) -> Self {
        Range { min: val, max: val }
    }

    /// True when some pairing of values from `self` and `right` satisfies
    /// the comparison.
    pub fn possibly_true(&self, op: CmpOp, right: &Range) -> bool {
        match op {
            CmpOp::Lt | CmpOp::UnsignedLt => self.min.cmp(right.max) == Ordering::Less,
            CmpOp::Lte | CmpOp::UnsignedLte => self.min.cmp(right.max) != Ordering::Greater,
            CmpOp::Eq => {
                self.max.cmp(right.min) != Ordering::Less
                    && self.min.cmp(right.max) != Ordering::Greater
            },
            CmpOp::Gte | CmpOp::UnsignedGte => self.max.cmp(right.min) != Ordering::Less,
            CmpOp::Gt | CmpOp::UnsignedGt => self.max.cmp(right.min) == Ordering::Greater,
            CmpOp::Ne => {
                self.min.cmp(self.max) != Ordering::Equal
                    || right.min.cmp(right.max) != Ordering::Equal
                    || self.min.cmp(right.min) != Ordering::Equal
            },
        }
    }

    /// True when some pairing of values from `self` and `right` falsifies
    /// the comparison.
    pub fn possibly_false(&self, op: CmpOp, right: &Range) -> bool {
        match op {
            CmpOp::Lt | CmpOp::UnsignedLt => self.max.cmp(right.min) != Ordering::Less,
            CmpOp::Lte | CmpOp::UnsignedLte => self.max.cmp(right.min) == Ordering::Greater,
            CmpOp::Eq => {
                self.min.cmp(self.max) != Ordering::Equal
                    || right.min.cmp(right.max) != Ordering::Equal
                    || self.min.cmp(right.min) != Ordering::Equal
            },
            CmpOp::Gte | CmpOp::UnsignedGte => self.min.cmp(right.max) == Ordering::Less,
            CmpOp::Gt | CmpOp::UnsignedGt => self.min.cmp(right.max) != Ordering::Greater,
            CmpOp::Ne => {
                self.max.cmp(right.min) != Ordering::Less
                    && self.min.cmp(right.max) != Ordering::Greater
            },
        }
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.min.cmp(self.max) == Ordering::Equal {
            write!(f, "{}", self.min)
        } else {
            write!(f, "{}-{}", self.min, self.max)
        }
    }
}

// RANGE LISTS
// ================================================================================================

/// An ordered set of disjoint, non-adjacent ranges of one type.
///
/// The canonical form is load-bearing: two range lists describe the same set
/// of values iff they compare equal, and the rendered text round-trips
/// bit-exact through [`RangeList::from_str_ty`]. Every operation reestablishes
/// canonical form before returning.
///
/// The empty list means "impossible"; `whole(ty)` is the full domain of `ty`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RangeList {
    ranges: Vec<Range>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RangeParseError {
    #[error("empty range element in '{0}'")]
    EmptyElement(String),
    #[error("malformed number '{0}'")]
    BadNumber(String),
}

impl RangeList {
    // CONSTRUCTORS
    // --------------------------------------------------------------------------------------------

    pub const fn empty() -> Self {
        RangeList { ranges: Vec::new() }
    }

    pub fn new(min: Sval, max: Sval) -> Self {
        let mut rl = RangeList::empty();
        rl.add_range(min, max);
        rl
    }

    pub fn singleton(val: Sval) -> Self {
        RangeList::new(val, val)
    }

    pub fn whole(ty: Ty) -> Self {
        RangeList::new(ty.ty_min(), ty.ty_max())
    }

    // ACCESSORS
    // --------------------------------------------------------------------------------------------

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn ranges(&self) -> &[Range] {
        &self.ranges
    }

    pub fn ty(&self) -> Option<Ty> {
        self.ranges.first().map(|r| r.min.ty())
    }

    pub fn min_sval(&self) -> Option<Sval> {
        self.ranges.first().map(|r| r.min)
    }

    pub fn max_sval(&self) -> Option<Sval> {
        self.ranges.last().map(|r| r.max)
    }

    /// True when the list covers its type's entire domain (or is empty, in
    /// which case nothing is known about the value).
    pub fn is_whole(&self) -> bool {
        if self.ranges.is_empty() {
            return true;
        }
        self.ranges.len() == 1 && self.ranges[0].min.is_min() && self.ranges[0].max.is_max()
    }

    /// Extracts the value of a singleton list.
    pub fn to_sval(&self) -> Option<Sval> {
        match self.ranges.as_slice() {
            [r] if r.min.cmp(r.max) == Ordering::Equal => Some(r.min),
            _ => None,
        }
    }

    pub fn contains(&self, val: Sval) -> bool {
        self.ranges.iter().any(|r| {
            r.min.cmp(val) != Ordering::Greater && r.max.cmp(val) != Ordering::Less
        })
    }

    // MUTATION
    // --------------------------------------------------------------------------------------------

    /// Inserts `[min, max]`, fusing overlapping and adjacent ranges.
    pub fn add_range(&mut self, min: Sval, max: Sval) {
        self.ranges.push(Range::new(min, max));
        self.normalize();
    }

    /// Reestablishes canonical order: sorted by min, overlaps and adjacent
    /// runs fused.
    fn normalize(&mut self) {
        if self.ranges.len() < 2 {
            return;
        }
        self.ranges.sort_by(|a, b| a.min.cmp(b.min).then(a.max.cmp(b.max)));
        let mut out: Vec<Range> = Vec::with_capacity(self.ranges.len());
        for r in self.ranges.drain(..) {
            match out.last_mut() {
                Some(last) if touches(last.max, r.min) => {
                    if last.max.cmp(r.max) == Ordering::Less {
                        last.max = r.max;
                    }
                },
                _ => out.push(r),
            }
        }
        self.ranges = out;
    }

    // SET ALGEBRA
    // --------------------------------------------------------------------------------------------

    pub fn union(&self, other: &RangeList) -> RangeList {
        let mut out = self.clone();
        for r in &other.ranges {
            out.ranges.push(*r);
        }
        out.normalize();
        out
    }

    pub fn intersection(&self, other: &RangeList) -> RangeList {
        let mut out = RangeList::empty();
        for a in &self.ranges {
            for b in &other.ranges {
                let min = a.min.max(b.min);
                let max = a.max.min(b.max);
                if min.cmp(max) != Ordering::Greater {
                    out.ranges.push(Range { min, max });
                }
            }
        }
        out.normalize();
        out
    }

    /// Removes `[min, max]` from the set, splitting ranges that straddle it.
    pub fn remove(&self, min: Sval, max: Sval) -> RangeList {
        let mut out = RangeList::empty();
        for r in &self.ranges {
            if r.max.cmp(min) == Ordering::Less || r.min.cmp(max) == Ordering::Greater {
                out.ranges.push(*r);
                continue;
            }
            if r.min.cmp(min) == Ordering::Less {
                out.ranges.push(Range { min: r.min, max: step_down(min) });
            }
            if r.max.cmp(max) == Ordering::Greater {
                out.ranges.push(Range { min: step_up(max), max: r.max });
            }
        }
        out.normalize();
        out
    }

    // CASTS
    // --------------------------------------------------------------------------------------------

    /// Converts every range to `ty` with C conversion semantics.
    ///
    /// A singleton converts exactly. Otherwise values that cannot be
    /// represented clamp the result: a negative bound cast to an unsigned
    /// type extends the top half to the type max, and a bound above a signed
    /// type's max pulls the bottom down to the type min. A list that ends up
    /// with nothing representable degrades to the whole target domain.
    pub fn cast(&self, ty: Ty) -> RangeList {
        if self.ranges.is_empty() {
            return RangeList::empty();
        }
        if let Some(v) = self.to_sval() {
            return RangeList::singleton(v.cast(ty));
        }

        let rl_min = self.min_sval().unwrap_or_else(|| ty.ty_min());
        let rl_max = self.max_sval().unwrap_or_else(|| ty.ty_max());
        let set_max = ty.is_unsigned() && rl_min.cmp_val(0) == Ordering::Less;
        let set_min = ty.is_signed() && rl_max.cmp(ty.ty_max()) == Ordering::Greater;

        let mut out = RangeList::empty();
        for r in &self.ranges {
            let mut min = r.min;
            let max = r.max;
            if Sval::cmp_t(ty, max, ty.ty_min()) == Ordering::Less {
                continue;
            }
            if Sval::cmp_t(ty, min, ty.ty_max()) == Ordering::Greater {
                continue;
            }
            if min.cmp_val(0) == Ordering::Less && ty.is_unsigned() {
                min = Sval::new(min.ty(), 0);
            }
            out.ranges.push(Range::new(min.cast(ty), max.cast(ty)));
        }

        if out.ranges.is_empty() {
            return RangeList::whole(ty);
        }
        if set_min {
            out.ranges.first_mut().unwrap().min = ty.ty_min();
        }
        if set_max {
            out.ranges.last_mut().unwrap().max = ty.ty_max();
        }
        out.normalize();
        out
    }

    // ARITHMETIC
    // --------------------------------------------------------------------------------------------

    /// Interval arithmetic over two lists at the operands' promoted type.
    ///
    /// Division or shift by a range with no usable values (only zero, only
    /// negatives, shifts at or past the width) is impossible and returns the
    /// empty list. Results that cannot be bounded degrade to the whole
    /// promoted domain.
    pub fn binop(&self, op: BinOp, right: &RangeList) -> RangeList {
        let (Some(lmin), Some(rmin)) = (self.min_sval(), right.min_sval()) else {
            return RangeList::empty();
        };
        let ty = Sval::promoted(lmin, rmin);

        let mut out = RangeList::empty();
        for l in &self.ranges {
            for r in &right.ranges {
                match binop_pair(ty, *l, op, *r) {
                    PairResult::Range(min, max) => out.add_range(min, max),
                    PairResult::Impossible => {},
                    PairResult::Unbounded => return RangeList::whole(ty),
                }
            }
        }
        out
    }

    // COMPARISON PREDICATES
    // --------------------------------------------------------------------------------------------

    /// True if any pairing of intervals can satisfy `self op right`.
    pub fn possibly_true(&self, op: CmpOp, right: &RangeList) -> bool {
        self.ranges
            .iter()
            .any(|l| right.ranges.iter().any(|r| l.possibly_true(op, r)))
    }

    /// True if any pairing of intervals can falsify `self op right`.
    pub fn possibly_false(&self, op: CmpOp, right: &RangeList) -> bool {
        self.ranges
            .iter()
            .any(|l| right.ranges.iter().any(|r| l.possibly_false(op, r)))
    }

    // PARSING
    // --------------------------------------------------------------------------------------------

    /// Parses the textual form produced by `Display`, at type `ty`.
    pub fn from_str_ty(ty: Ty, text: &str) -> Result<RangeList, RangeParseError> {
        let mut out = RangeList::empty();
        if text.is_empty() {
            return Ok(out);
        }
        for piece in text.split(',') {
            let (lo, hi) = split_range_piece(piece)
                .ok_or_else(|| RangeParseError::EmptyElement(text.to_string()))?;
            let min = parse_bound(lo)?;
            let max = match hi {
                Some(h) => parse_bound(h)?,
                None => min,
            };
            out.add_range(min.cast(ty), max.cast(ty));
        }
        Ok(out)
    }
}

impl fmt::Display for RangeList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, r) in self.ranges.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{r}")?;
        }
        Ok(())
    }
}

// HELPERS
// ================================================================================================

/// Whether `[.., a]` and `[b, ..]` overlap or touch so they can fuse.
fn touches(a: Sval, b: Sval) -> bool {
    if b.cmp(a) != Ordering::Greater {
        return true;
    }
    !a.is_max() && step_up(a).cmp(b) != Ordering::Less
}

fn step_up(v: Sval) -> Sval {
    if v.is_max() {
        return v;
    }
    Sval::new(v.ty(), v.value().wrapping_add(1)).cast(v.ty())
}

fn step_down(v: Sval) -> Sval {
    if v.is_min() {
        return v;
    }
    Sval::new(v.ty(), v.value().wrapping_sub(1)).cast(v.ty())
}

enum PairResult {
    Range(Sval, Sval),
    Impossible,
    Unbounded,
}

/// Reads an sval at `ty` into an i128 so bound math cannot overflow.
fn wide(ty: Ty, v: Sval) -> i128 {
    let v = v.cast(ty);
    if ty.is_unsigned() { v.uvalue() as i128 } else { v.value() as i128 }
}

fn narrow(ty: Ty, lo: i128, hi: i128) -> PairResult {
    let (ty_lo, ty_hi) = (wide(ty, ty.ty_min()), wide(ty, ty.ty_max()));
    if lo < ty_lo || hi > ty_hi {
        return PairResult::Unbounded;
    }
    let mk = |v: i128| {
        if ty.is_unsigned() {
            Sval::new_unsigned(ty, v as u64)
        } else {
            Sval::new(ty, v as i64)
        }
    };
    PairResult::Range(mk(lo), mk(hi))
}

fn binop_pair(ty: Ty, l: Range, op: BinOp, r: Range) -> PairResult {
    let (lmin, lmax) = (wide(ty, l.min), wide(ty, l.max));
    let (rmin, rmax) = (wide(ty, r.min), wide(ty, r.max));
    let ty_lo = wide(ty, ty.ty_min());

    match op {
        BinOp::Add => narrow(ty, lmin + rmin, lmax + rmax),
        BinOp::Sub => narrow(ty, lmin - rmax, lmax - rmin),
        BinOp::Mul => {
            let corners = [lmin * rmin, lmin * rmax, lmax * rmin, lmax * rmax];
            narrow(ty, *corners.iter().min().unwrap(), *corners.iter().max().unwrap())
        },
        BinOp::Div => {
            // Split the divisor around zero; only nonzero values divide.
            let mut lo = i128::MAX;
            let mut hi = i128::MIN;
            let mut any = false;
            for (dmin, dmax) in [(rmin, rmax.min(-1)), (rmin.max(1), rmax)] {
                if dmin > dmax {
                    continue;
                }
                for a in [lmin, lmax] {
                    for d in [dmin, dmax] {
                        if ty.is_signed() && a == ty_lo && d == -1 {
                            continue;
                        }
                        any = true;
                        lo = lo.min(a / d);
                        hi = hi.max(a / d);
                    }
                }
            }
            if !any {
                return PairResult::Impossible;
            }
            narrow(ty, lo, hi)
        },
        BinOp::Mod => {
            if rmax <= 0 {
                return PairResult::Impossible;
            }
            if lmin < 0 {
                return PairResult::Unbounded;
            }
            narrow(ty, 0, lmax.min(rmax - 1))
        },
        BinOp::And => {
            if lmin < 0 || rmin < 0 {
                return PairResult::Unbounded;
            }
            narrow(ty, 0, lmax.min(rmax))
        },
        BinOp::Or | BinOp::Xor => {
            if lmin < 0 || rmin < 0 {
                return PairResult::Unbounded;
            }
            let used = 128 - (lmax | rmax).leading_zeros() as i128;
            narrow(ty, 0, (1i128 << used) - 1)
        },
        BinOp::Shl | BinOp::Shr => {
            let bits = ty.bits() as i128;
            let (smin, smax) = (rmin.max(0), rmax.min(bits - 1));
            if smin > smax || rmax < 0 || rmin >= bits {
                return PairResult::Impossible;
            }
            if lmin < 0 {
                return PairResult::Unbounded;
            }
            let apply = |v: i128, s: i128| {
                if op == BinOp::Shl { v.checked_shl(s as u32) } else { Some(v >> s) }
            };
            let mut lo = i128::MAX;
            let mut hi = i128::MIN;
            for a in [lmin, lmax] {
                for s in [smin, smax] {
                    match apply(a, s) {
                        Some(v) => {
                            lo = lo.min(v);
                            hi = hi.max(v);
                        },
                        None => return PairResult::Unbounded,
                    }
                }
            }
            narrow(ty, lo, hi)
        },
    }
}

fn split_range_piece(piece: &str) -> Option<(&str, Option<&str>)> {
    if piece.is_empty() {
        return None;
    }
    let bytes = piece.as_bytes();
    let mut depth = 0usize;
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'(' => depth += 1,
            b')' => depth = depth.saturating_sub(1),
            b'-' if depth == 0 && i > 0 => {
                return Some((&piece[..i], Some(&piece[i + 1..])));
            },
            _ => {},
        }
    }
    Some((piece, None))
}

fn parse_bound(text: &str) -> Result<Sval, RangeParseError> {
    let text = text.trim_start_matches('(').trim_end_matches(')');
    let v = match text {
        "max" | "s64max" => Sval::new(Ty::I64, i64::MAX),
        "min" | "s64min" => Sval::new(Ty::I64, i64::MIN),
        "u64max" => Sval::new_unsigned(Ty::U64, u64::MAX),
        "u32max" => Sval::new(Ty::I64, u32::MAX as i64),
        "u16max" => Sval::new(Ty::I64, u16::MAX as i64),
        "s32max" => Sval::new(Ty::I64, i32::MAX as i64),
        "s32min" => Sval::new(Ty::I64, i32::MIN as i64),
        "s16max" => Sval::new(Ty::I64, i16::MAX as i64),
        "s16min" => Sval::new(Ty::I64, i16::MIN as i64),
        _ => match text.parse::<i64>() {
            Ok(n) => Sval::new(Ty::I64, n),
            Err(_) => match text.parse::<u64>() {
                Ok(n) => Sval::new_unsigned(Ty::U64, n),
                Err(_) => return Err(RangeParseError::BadNumber(text.to_string())),
            },
        },
    };
    Ok(v)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn rl(pairs: &[(i64, i64)]) -> RangeList {
        let mut out = RangeList::empty();
        for &(a, b) in pairs {
            out.add_range(Sval::new(Ty::I32, a), Sval::new(Ty::I32, b));
        }
        out
    }

    #[test]
    fn insert_fuses_overlaps_and_adjacency() {
        let a = rl(&[(1, 5), (6, 10)]);
        assert_eq!(a.ranges().len(), 1);
        assert_eq!(a.to_string(), "1-10");

        let b = rl(&[(1, 3), (10, 12), (4, 9)]);
        assert_eq!(b.to_string(), "1-12");

        // The gap case the original insert got wrong: min-0,3-max plus 1-2.
        let mut c = RangeList::new(Ty::I32.ty_min(), Sval::new(Ty::I32, 0));
        c.add_range(Sval::new(Ty::I32, 3), Ty::I32.ty_max());
        c.add_range(Sval::new(Ty::I32, 1), Sval::new(Ty::I32, 2));
        assert!(c.is_whole());
    }

    #[test]
    fn remove_splits() {
        let a = rl(&[(0, 10)]);
        let out = a.remove(Sval::new(Ty::I32, 4), Sval::new(Ty::I32, 6));
        assert_eq!(out.to_string(), "0-3,7-10");
        let gone = a.remove(Sval::new(Ty::I32, 0), Sval::new(Ty::I32, 10));
        assert!(gone.is_empty());
    }

    #[test]
    fn intersection_pairs() {
        let a = rl(&[(0, 5), (10, 20)]);
        let b = rl(&[(3, 12)]);
        assert_eq!(a.intersection(&b).to_string(), "3-5,10-12");
    }

    #[test]
    fn cast_negative_to_unsigned_sets_top() {
        let a = RangeList::new(Sval::new(Ty::I32, -5), Sval::new(Ty::I32, 10));
        let out = a.cast(Ty::U32);
        assert_eq!(out.min_sval().unwrap().uvalue(), 0);
        assert_eq!(out.max_sval().unwrap().uvalue(), u32::MAX as u64);
    }

    #[test]
    fn cast_singleton_is_exact() {
        let a = RangeList::singleton(Sval::new(Ty::I32, -1));
        assert_eq!(a.cast(Ty::U8).to_sval().unwrap().uvalue(), 0xff);
    }

    #[test]
    fn binop_add_sub() {
        let a = rl(&[(1, 3)]);
        let b = rl(&[(10, 20)]);
        assert_eq!(a.binop(BinOp::Add, &b).to_string(), "11-23");
        assert_eq!(b.binop(BinOp::Sub, &a).to_string(), "7-19");
    }

    #[test]
    fn binop_div_excludes_zero_divisor() {
        let a = rl(&[(10, 100)]);
        let zero = rl(&[(0, 0)]);
        assert!(a.binop(BinOp::Div, &zero).is_empty());
        let d = rl(&[(-2, 2)]);
        assert_eq!(a.binop(BinOp::Div, &d).to_string(), "(-100)-100");
    }

    #[test]
    fn binop_shift_out_of_width_is_impossible() {
        let a = rl(&[(1, 1)]);
        let s = rl(&[(40, 50)]);
        assert!(a.binop(BinOp::Shl, &s).is_empty());
        let neg = rl(&[(-3, -1)]);
        assert!(a.binop(BinOp::Shr, &neg).is_empty());
    }

    #[test]
    fn predicates() {
        let a = rl(&[(0, 4)]);
        let b = rl(&[(4, 10)]);
        assert!(a.possibly_true(CmpOp::Eq, &b));
        assert!(a.possibly_false(CmpOp::Eq, &b));
        assert!(a.possibly_true(CmpOp::Lt, &b));
        assert!(!b.possibly_true(CmpOp::Lt, &a));
        let x = rl(&[(7, 7)]);
        let y = rl(&[(7, 7)]);
        assert!(!x.possibly_false(CmpOp::Eq, &y));
        assert!(!x.possibly_true(CmpOp::Ne, &y));
    }

    #[test]
    fn render_and_parse() {
        let a = rl(&[(-5, -3), (7, 7)]);
        assert_eq!(a.to_string(), "(-5)-(-3),7");
        let back = RangeList::from_str_ty(Ty::I32, &a.to_string()).unwrap();
        assert_eq!(back, a);

        let whole = RangeList::whole(Ty::I32);
        assert_eq!(whole.to_string(), "s32min-s32max");
        assert_eq!(RangeList::from_str_ty(Ty::I32, "s32min-s32max").unwrap(), whole);
        assert_eq!(RangeList::from_str_ty(Ty::I64, "min-max").unwrap(), RangeList::whole(Ty::I64));
    }

    #[cfg(test)]
    mod props {
        use proptest::prelude::*;

        use super::*;

        fn arb_rl() -> impl Strategy<Value = RangeList> {
            prop::collection::vec((any::<i32>(), any::<i32>()), 0..6).prop_map(|pairs| {
                let mut out = RangeList::empty();
                for (a, b) in pairs {
                    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
                    out.add_range(Sval::new(Ty::I32, lo as i64), Sval::new(Ty::I32, hi as i64));
                }
                out
            })
        }

        proptest! {
            #[test]
            fn canonical_form(rl in arb_rl()) {
                let rs = rl.ranges();
                for w in rs.windows(2) {
                    // Sorted, disjoint, and with a gap of at least 2.
                    prop_assert!(w[0].max.value() + 1 < w[1].min.value());
                }
                for r in rs {
                    prop_assert!(r.min.value() <= r.max.value());
                }
            }

            #[test]
            fn union_is_commutative(a in arb_rl(), b in arb_rl()) {
                prop_assert_eq!(a.union(&b), b.union(&a));
            }

            #[test]
            fn round_trip(rl in arb_rl()) {
                let text = rl.to_string();
                let back = RangeList::from_str_ty(Ty::I32, &text).unwrap();
                prop_assert_eq!(back, rl);
            }

            #[test]
            fn remove_then_union_restores(rl in arb_rl(), a in any::<i32>(), b in any::<i32>()) {
                let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
                let lo = Sval::new(Ty::I32, lo as i64);
                let hi = Sval::new(Ty::I32, hi as i64);
                let cut = rl.remove(lo, hi);
                let mut patch = rl.intersection(&RangeList::new(lo, hi));
                patch = patch.union(&cut);
                prop_assert_eq!(patch, rl);
            }
        }
    }
}
