//! Exact rational credit.
//!
//! Credit is kept as a reduced fraction so that sums of thirds, sevenths and
//! other non-dyadic shares land exactly on their total. Floats only enter at
//! the boundary through [`Credit::from_float`].

use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Mul, Neg, Sub};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Largest denominator produced by [`Credit::from_float`].
const MAX_APPROX_DENOMINATOR: i128 = 1_000_000_000_000;

/// Stop the continued-fraction expansion once the convergent is this close.
const APPROX_TOLERANCE: f64 = 1e-12;

/// A credit value as an exact fraction `numerator / denominator`.
///
/// The denominator is always positive and the fraction is always in lowest
/// terms, so structural equality is numeric equality.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Credit {
    num: i64,
    den: i64,
}

impl Credit {
    pub const ZERO: Credit = Credit { num: 0, den: 1 };
    pub const ONE: Credit = Credit { num: 1, den: 1 };

    /// Build `num / den`. Panics if `den` is zero.
    ///
    /// Use [`Credit::checked_new`] or parse a string for anything that did not
    /// come from a constant.
    pub fn new(num: i64, den: i64) -> Self {
        assert_ne!(den, 0, "credit denominator must be non-zero");
        Self::from_wide(num as i128, den as i128)
    }

    /// Build `num / den`, returning `None` for a zero denominator.
    pub fn checked_new(num: i64, den: i64) -> Option<Self> {
        (den != 0).then(|| Self::from_wide(num as i128, den as i128))
    }

    pub fn from_integer(n: i64) -> Self {
        Self { num: n, den: 1 }
    }

    /// Convert a float to the nearest simple fraction via continued fractions.
    ///
    /// Non-finite input maps to zero.
    pub fn from_float(x: f64) -> Self {
        if !x.is_finite() {
            return Self::ZERO;
        }
        let whole = x.floor();
        if whole.abs() >= i64::MAX as f64 {
            return Self::ZERO;
        }
        let a0 = whole as i128;
        let mut frac = x - whole;

        // Convergents h/k, seeded with h(-1)/k(-1) = 1/0.
        let (mut h_prev, mut h) = (1i128, a0);
        let (mut k_prev, mut k) = (0i128, 1i128);

        for _ in 0..64 {
            if frac == 0.0 || (h as f64 / k as f64 - x).abs() <= APPROX_TOLERANCE {
                break;
            }
            let inv = 1.0 / frac;
            let a = inv.floor();
            frac = inv - a;
            if a >= MAX_APPROX_DENOMINATOR as f64 {
                break;
            }
            let a = a as i128;
            let h_next = a * h + h_prev;
            let k_next = a * k + k_prev;
            if k_next > MAX_APPROX_DENOMINATOR || h_next.abs() > i64::MAX as i128 {
                break;
            }
            (h_prev, h) = (h, h_next);
            (k_prev, k) = (k, k_next);
        }
        Self::from_wide(h, k)
    }

    pub fn numerator(&self) -> i64 {
        self.num
    }

    pub fn denominator(&self) -> i64 {
        self.den
    }

    pub fn is_zero(&self) -> bool {
        self.num == 0
    }

    pub fn is_negative(&self) -> bool {
        self.num < 0
    }

    pub fn to_f64(&self) -> f64 {
        self.num as f64 / self.den as f64
    }

    /// Clamp into `[0, 1]`.
    pub fn clamp_unit(self) -> Self {
        self.clamp(Self::ZERO, Self::ONE)
    }

    /// Divide by another credit. Returns `None` when `rhs` is zero.
    pub fn checked_div(self, rhs: Credit) -> Option<Self> {
        if rhs.is_zero() {
            return None;
        }
        Some(Self::from_wide(
            self.num as i128 * rhs.den as i128,
            self.den as i128 * rhs.num as i128,
        ))
    }

    /// Reduce a wide fraction; fall back to a float approximation if the
    /// reduced terms do not fit in `i64`.
    fn from_wide(num: i128, den: i128) -> Self {
        let (mut num, mut den) = if den < 0 { (-num, -den) } else { (num, den) };
        let g = gcd(num.unsigned_abs(), den.unsigned_abs());
        if g > 1 {
            num /= g as i128;
            den /= g as i128;
        }
        match (i64::try_from(num), i64::try_from(den)) {
            (Ok(num), Ok(den)) => Self { num, den },
            _ => Self::from_float(num as f64 / den as f64),
        }
    }
}

fn gcd(mut a: u128, mut b: u128) -> u128 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    if a == 0 {
        1
    } else {
        a
    }
}

impl Default for Credit {
    fn default() -> Self {
        Self::ZERO
    }
}

impl Add for Credit {
    type Output = Credit;

    fn add(self, rhs: Credit) -> Credit {
        let den = self.den as i128 * rhs.den as i128;
        let num = self.num as i128 * rhs.den as i128 + rhs.num as i128 * self.den as i128;
        Credit::from_wide(num, den)
    }
}

impl Sub for Credit {
    type Output = Credit;

    fn sub(self, rhs: Credit) -> Credit {
        self + (-rhs)
    }
}

impl Mul for Credit {
    type Output = Credit;

    fn mul(self, rhs: Credit) -> Credit {
        Credit::from_wide(
            self.num as i128 * rhs.num as i128,
            self.den as i128 * rhs.den as i128,
        )
    }
}

impl Neg for Credit {
    type Output = Credit;

    fn neg(self) -> Credit {
        // i64::MIN has no positive counterpart at this width.
        Credit::from_wide(-(self.num as i128), self.den as i128)
    }
}

impl std::iter::Sum for Credit {
    fn sum<I: Iterator<Item = Credit>>(iter: I) -> Credit {
        iter.fold(Credit::ZERO, |acc, c| acc + c)
    }
}

impl Ord for Credit {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.num as i128 * other.den as i128).cmp(&(other.num as i128 * self.den as i128))
    }
}

impl PartialOrd for Credit {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<i64> for Credit {
    fn from(n: i64) -> Self {
        Self::from_integer(n)
    }
}

impl From<f64> for Credit {
    fn from(x: f64) -> Self {
        Self::from_float(x)
    }
}

impl fmt::Display for Credit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.den == 1 {
            write!(f, "{}", self.num)
        } else {
            write!(f, "{}/{}", self.num, self.den)
        }
    }
}

impl fmt::Debug for Credit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credit({self})")
    }
}

impl Serialize for Credit {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.to_f64())
    }
}

/// Error parsing a credit string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseCreditError {
    #[error("invalid credit '{0}'")]
    Invalid(String),
    #[error("credit '{0}' has a zero denominator")]
    ZeroDenominator(String),
}

impl FromStr for Credit {
    type Err = ParseCreditError;

    /// Parses `"n/d"` exactly, or a decimal through [`Credit::from_float`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || ParseCreditError::Invalid(s.to_string());
        match s.split_once('/') {
            Some((num, den)) => {
                let num: i64 = num.trim().parse().map_err(|_| invalid())?;
                let den: i64 = den.trim().parse().map_err(|_| invalid())?;
                Credit::checked_new(num, den)
                    .ok_or_else(|| ParseCreditError::ZeroDenominator(s.to_string()))
            }
            None => s.parse::<f64>().map(Credit::from_float).map_err(|_| invalid()),
        }
    }
}

/// Credit is read from a number or from a string such as `"1/3"`.
impl<'de> Deserialize<'de> for Credit {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Number(f64),
            Text(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Number(x) => Ok(Credit::from_float(x)),
            Repr::Text(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// Format a mark count the way feedback text shows it: integers bare,
/// everything else to at most two decimal places.
pub fn format_marks(marks: f64) -> String {
    let rounded = (marks * 100.0).round() / 100.0;
    if rounded.fract() == 0.0 {
        format!("{}", rounded as i64)
    } else {
        let s = format!("{rounded:.2}");
        s.trim_end_matches('0').to_string()
    }
}

/// "mark" or "marks" for the given count.
pub fn pluralise_marks(marks: f64) -> &'static str {
    if (marks.abs() - 1.0).abs() < f64::EPSILON {
        "mark"
    } else {
        "marks"
    }
}
