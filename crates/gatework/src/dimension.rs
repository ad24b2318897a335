use std::fmt;

use crate::error::ModelError;

/// Widest signal value the engine carries. Values are stored in a `u64`.
pub const MAX_WIDTH: u32 = 64;

/// A bit-width requirement: an exact value, a `[min, max]` range, or fully
/// unconstrained.
///
/// Immutable value object with a private representation: every held
/// `Dimension` went through a checked constructor, so exact widths are always
/// in `1..=MAX_WIDTH` and range bounds are always ordered. All arithmetic
/// over dimensions happens through [`Dimension::compatible`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dimension(Constraint);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Constraint {
    Exact(u32),
    Range { min: Option<u32>, max: Option<u32> },
}

impl Dimension {
    /// An exact width. Fails with `InvalidParameter` if `width` is zero or
    /// exceeds [`MAX_WIDTH`].
    pub fn exact(width: u32) -> Result<Self, ModelError> {
        if width == 0 {
            return Err(ModelError::InvalidParameter(
                "exact dimension must be at least 1".into(),
            ));
        }
        if width > MAX_WIDTH {
            return Err(ModelError::InvalidParameter(format!(
                "width {width} exceeds the maximum of {MAX_WIDTH}"
            )));
        }
        Ok(Dimension(Constraint::Exact(width)))
    }

    /// A ranged width. A missing bound is unbounded on that side. Fails with
    /// `InvalidParameter` if `min > max`.
    pub fn range(min: Option<u32>, max: Option<u32>) -> Result<Self, ModelError> {
        if let (Some(lo), Some(hi)) = (min, max)
            && lo > hi
        {
            return Err(ModelError::InvalidParameter(format!(
                "dimension range [{lo}, {hi}] is inverted"
            )));
        }
        Ok(Dimension(Constraint::Range { min, max }))
    }

    pub fn unconstrained() -> Self {
        Dimension(Constraint::Range {
            min: None,
            max: None,
        })
    }

    /// Any width of at least `min` bits. Infallible single-bound form of
    /// [`Dimension::range`].
    pub fn at_least(min: u32) -> Self {
        Dimension(Constraint::Range {
            min: Some(min),
            max: None,
        })
    }

    /// The exact width, if this dimension pins one down.
    pub fn exact_value(&self) -> Option<u32> {
        match self.0 {
            Constraint::Exact(w) => Some(w),
            Constraint::Range { .. } => None,
        }
    }

    /// True iff some integer width satisfies both dimensions. Symmetric.
    pub fn compatible(&self, other: &Dimension) -> bool {
        match (&self.0, &other.0) {
            (Constraint::Exact(a), Constraint::Exact(b)) => a == b,
            (Constraint::Exact(w), Constraint::Range { min, max })
            | (Constraint::Range { min, max }, Constraint::Exact(w)) => {
                min.is_none_or(|lo| lo <= *w) && max.is_none_or(|hi| *w <= hi)
            }
            (
                Constraint::Range { min: min_a, max: max_a },
                Constraint::Range { min: min_b, max: max_b },
            ) => {
                let lo = min_a.unwrap_or(0).max(min_b.unwrap_or(0));
                let hi = match (max_a, max_b) {
                    (Some(a), Some(b)) => Some(*a.min(b)),
                    (Some(a), None) => Some(*a),
                    (None, Some(b)) => Some(*b),
                    (None, None) => None,
                };
                hi.is_none_or(|hi| lo <= hi)
            }
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Constraint::Exact(w) => write!(f, "<{w}>"),
            Constraint::Range { min, max } => {
                let lo = min.map_or("..".to_string(), |v| v.to_string());
                let hi = max.map_or("..".to_string(), |v| v.to_string());
                write!(f, "<{lo}:{hi}>")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn exact_rejects_zero_and_oversize() {
        assert!(matches!(
            Dimension::exact(0),
            Err(ModelError::InvalidParameter(_))
        ));
        assert!(matches!(
            Dimension::exact(65),
            Err(ModelError::InvalidParameter(_))
        ));
        assert!(Dimension::exact(64).is_ok());
    }

    #[test]
    fn range_rejects_inverted_bounds() {
        assert!(matches!(
            Dimension::range(Some(4), Some(2)),
            Err(ModelError::InvalidParameter(_))
        ));
        assert!(Dimension::range(Some(2), Some(4)).is_ok());
        assert!(Dimension::range(None, Some(4)).is_ok());
    }

    #[test]
    fn exact_vs_exact() {
        let a = Dimension::exact(4).unwrap();
        let b = Dimension::exact(4).unwrap();
        let c = Dimension::exact(8).unwrap();
        assert!(a.compatible(&b));
        assert!(!a.compatible(&c));
    }

    #[test]
    fn exact_vs_range() {
        let w = Dimension::exact(4).unwrap();
        assert!(w.compatible(&Dimension::range(Some(2), Some(8)).unwrap()));
        assert!(w.compatible(&Dimension::range(None, Some(4)).unwrap()));
        assert!(w.compatible(&Dimension::at_least(4)));
        assert!(!w.compatible(&Dimension::at_least(5)));
        assert!(w.compatible(&Dimension::unconstrained()));
    }

    #[test]
    fn range_vs_range_overlap() {
        let a = Dimension::range(Some(2), Some(6)).unwrap();
        let b = Dimension::range(Some(6), Some(9)).unwrap();
        let c = Dimension::at_least(7);
        assert!(a.compatible(&b));
        assert!(!a.compatible(&c));
        assert!(b.compatible(&c));
    }

    fn arb_dimension() -> impl Strategy<Value = Dimension> {
        prop_oneof![
            (1u32..=64).prop_map(|w| Dimension::exact(w).unwrap()),
            (0u32..=32, 0u32..=32).prop_map(|(lo, extra)| Dimension::range(
                Some(lo),
                Some(lo + extra)
            )
            .unwrap()),
            (0u32..=64).prop_map(Dimension::at_least),
            (0u32..=64).prop_map(|hi| Dimension::range(None, Some(hi)).unwrap()),
            Just(Dimension::unconstrained()),
        ]
    }

    proptest! {
        #[test]
        fn compatibility_is_symmetric(a in arb_dimension(), b in arb_dimension()) {
            prop_assert_eq!(a.compatible(&b), b.compatible(&a));
        }

        #[test]
        fn every_dimension_is_self_compatible(a in arb_dimension()) {
            prop_assert!(a.compatible(&a));
        }
    }
}
