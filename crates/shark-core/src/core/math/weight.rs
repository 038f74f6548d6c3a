use std::cmp::Ordering;
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Div, Mul};

/// A non-negative Boltzmann weight stored by its natural logarithm.
///
/// Partition sums over large conformation spaces routinely exceed the range of `f64`, so every
/// aggregate in the engine is carried in log space. Zero is represented by `ln = -inf`.
///
/// Subtraction is saturating: [`Weight::saturating_sub`] never produces a negative weight, which
/// matches how interval widths are used (`upper - lower` of a sound interval is never negative).
#[derive(Debug, Clone, Copy)]
pub struct Weight {
    ln: f64,
}

impl Weight {
    pub const ZERO: Weight = Weight {
        ln: f64::NEG_INFINITY,
    };
    pub const ONE: Weight = Weight { ln: 0.0 };

    #[inline]
    pub fn from_ln(ln: f64) -> Self {
        Self { ln }
    }

    pub fn from_f64(value: f64) -> Self {
        if value <= 0.0 {
            Self::ZERO
        } else {
            Self { ln: value.ln() }
        }
    }

    #[inline]
    pub fn ln(&self) -> f64 {
        self.ln
    }

    #[inline]
    pub fn log10(&self) -> f64 {
        self.ln / std::f64::consts::LN_10
    }

    pub fn to_f64(&self) -> f64 {
        self.ln.exp()
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.ln == f64::NEG_INFINITY
    }

    pub fn is_finite(&self) -> bool {
        !self.ln.is_nan() && self.ln != f64::INFINITY
    }

    /// `self - rhs`, clamped at zero.
    pub fn saturating_sub(self, rhs: Weight) -> Weight {
        if rhs.is_zero() {
            return self;
        }
        if rhs.ln >= self.ln {
            return Weight::ZERO;
        }
        let diff = rhs.ln - self.ln;
        Weight {
            ln: self.ln + (-diff.exp_m1()).ln(),
        }
    }

    /// The plain ratio `self / rhs` as a float, with `0/0` defined as zero.
    pub fn ratio(&self, rhs: Weight) -> f64 {
        if self.is_zero() {
            return 0.0;
        }
        (self.ln - rhs.ln).exp()
    }

    pub fn max(self, other: Weight) -> Weight {
        if self >= other { self } else { other }
    }

    pub fn min(self, other: Weight) -> Weight {
        if self <= other { self } else { other }
    }
}

impl Default for Weight {
    fn default() -> Self {
        Weight::ZERO
    }
}

impl Add for Weight {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        if self.is_zero() {
            return rhs;
        }
        if rhs.is_zero() {
            return self;
        }
        let (hi, lo) = if self.ln >= rhs.ln {
            (self.ln, rhs.ln)
        } else {
            (rhs.ln, self.ln)
        };
        Weight {
            ln: hi + (lo - hi).exp().ln_1p(),
        }
    }
}

impl AddAssign for Weight {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Mul for Weight {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self::Output {
        if self.is_zero() || rhs.is_zero() {
            return Weight::ZERO;
        }
        Weight {
            ln: self.ln + rhs.ln,
        }
    }
}

impl Div for Weight {
    type Output = Self;

    fn div(self, rhs: Self) -> Self::Output {
        if self.is_zero() {
            return Weight::ZERO;
        }
        Weight {
            ln: self.ln - rhs.ln,
        }
    }
}

impl Sum for Weight {
    fn sum<I: Iterator<Item = Weight>>(iter: I) -> Self {
        iter.fold(Weight::ZERO, |acc, w| acc + w)
    }
}

impl PartialEq for Weight {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Weight {}

impl PartialOrd for Weight {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Weight {
    fn cmp(&self, other: &Self) -> Ordering {
        self.ln.total_cmp(&other.ln)
    }
}

impl fmt::Display for Weight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_zero() {
            return write!(f, "0");
        }
        if !self.ln.is_finite() {
            return write!(f, "{}", self.ln.exp());
        }
        let log10 = self.log10();
        let exponent = log10.floor();
        let mantissa = 10f64.powf(log10 - exponent);
        write!(f, "{:.4}e{}", mantissa, exponent as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1.0)
    }

    #[test]
    fn from_f64_round_trips_positive_values() {
        assert!(close(Weight::from_f64(42.5).to_f64(), 42.5));
        assert!(Weight::from_f64(0.0).is_zero());
        assert!(Weight::from_f64(-3.0).is_zero());
    }

    #[test]
    fn add_matches_plain_arithmetic() {
        let a = Weight::from_f64(3.0);
        let b = Weight::from_f64(5.0);
        assert!(close((a + b).to_f64(), 8.0));
        assert_eq!(a + Weight::ZERO, a);
        assert_eq!(Weight::ZERO + b, b);
    }

    #[test]
    fn add_handles_values_far_outside_f64_range() {
        let huge = Weight::from_ln(2000.0);
        let sum = huge + huge;
        assert!(close(sum.ln(), 2000.0 + std::f64::consts::LN_2));
    }

    #[test]
    fn saturating_sub_clamps_at_zero() {
        let a = Weight::from_f64(3.0);
        let b = Weight::from_f64(5.0);
        assert!(close((b.saturating_sub(a)).to_f64(), 2.0));
        assert!(a.saturating_sub(b).is_zero());
        assert!(a.saturating_sub(a).is_zero());
        assert_eq!(a.saturating_sub(Weight::ZERO), a);
    }

    #[test]
    fn mul_and_div_work_in_log_space() {
        let a = Weight::from_f64(4.0);
        let b = Weight::from_f64(2.0);
        assert!(close((a * b).to_f64(), 8.0));
        assert!(close((a / b).to_f64(), 2.0));
        assert!((a * Weight::ZERO).is_zero());
        assert!((Weight::ZERO / b).is_zero());
    }

    #[test]
    fn ratio_defines_zero_over_zero_as_zero() {
        assert_eq!(Weight::ZERO.ratio(Weight::ZERO), 0.0);
        assert!(close(Weight::from_f64(1.0).ratio(Weight::from_f64(4.0)), 0.25));
    }

    #[test]
    fn ordering_treats_zero_as_smallest() {
        let mut weights = vec![Weight::from_f64(2.0), Weight::ZERO, Weight::from_f64(1.0)];
        weights.sort();
        assert!(weights[0].is_zero());
        assert!(close(weights[2].to_f64(), 2.0));
    }

    #[test]
    fn sum_folds_all_weights() {
        let total: Weight = [1.0, 2.0, 3.0].iter().map(|&v| Weight::from_f64(v)).sum();
        assert!(close(total.to_f64(), 6.0));
    }

    #[test]
    fn display_uses_scientific_notation() {
        assert_eq!(Weight::from_f64(12345.0).to_string(), "1.2345e4");
        assert_eq!(Weight::ZERO.to_string(), "0");
    }
}
