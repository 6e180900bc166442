// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use core::cmp::Ordering;
use core::fmt::{self, Debug, Formatter};
use core::str::FromStr;

use anyhow::{anyhow, bail, Result};
use num_bigint::{BigInt, Sign};
use num_traits::{One, Signed, ToPrimitive, Zero};

use serde::ser::Serializer;
use serde::Serialize;

use crate::Rc;

/// Significant digits kept when a quotient does not terminate.
const DIVISION_PRECISION: u64 = 34;

/// Largest decimal exponent accepted when reading numbers.
const MAX_EXPONENT: i64 = 10_000;

/// Exact decimal `mantissa * 10^-scale`.
///
/// Always normalized: the mantissa carries no trailing zeros when the scale is
/// positive, and integral values that fit in `i64` are never stored here.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Decimal {
    mantissa: BigInt,
    scale: u32,
}

#[derive(Clone, PartialEq, Eq, Hash)]
pub enum Number {
    Int(i64),
    Decimal(Rc<Decimal>),
}

fn pow10(exp: u64) -> BigInt {
    num_traits::pow(BigInt::from(10u8), exp as usize)
}

fn digit_count(v: &BigInt) -> u64 {
    if v.is_zero() {
        1
    } else {
        v.magnitude().to_str_radix(10).len() as u64
    }
}

// Divide rounding half away from zero.
fn div_round(num: &BigInt, den: &BigInt) -> BigInt {
    let q = num / den;
    let r = num % den;
    if (r.abs() * 2u8) >= den.abs() {
        if num.sign() == den.sign() {
            q + 1
        } else {
            q - 1
        }
    } else {
        q
    }
}

impl Number {
    fn from_parts(mut mantissa: BigInt, mut scale: u32) -> Number {
        if mantissa.is_zero() {
            return Number::Int(0);
        }
        let ten = BigInt::from(10u8);
        while scale > 0 && (&mantissa % &ten).is_zero() {
            mantissa /= &ten;
            scale -= 1;
        }
        if scale == 0 {
            if let Some(i) = mantissa.to_i64() {
                return Number::Int(i);
            }
        }
        Number::Decimal(Rc::new(Decimal { mantissa, scale }))
    }

    fn parts(&self) -> (BigInt, u32) {
        match self {
            Number::Int(i) => (BigInt::from(*i), 0),
            Number::Decimal(d) => (d.mantissa.clone(), d.scale),
        }
    }

    // Bring both operands to a common scale.
    fn aligned(&self, rhs: &Number) -> (BigInt, BigInt, u32) {
        let (a, sa) = self.parts();
        let (b, sb) = rhs.parts();
        match sa.cmp(&sb) {
            Ordering::Equal => (a, b, sa),
            Ordering::Less => (a * pow10((sb - sa) as u64), b, sb),
            Ordering::Greater => (a, b * pow10((sa - sb) as u64), sa),
        }
    }

    pub fn is_integer(&self) -> bool {
        match self {
            Number::Int(_) => true,
            Number::Decimal(d) => d.scale == 0,
        }
    }

    pub fn is_positive(&self) -> bool {
        match self {
            Number::Int(i) => *i > 0,
            Number::Decimal(d) => d.mantissa.is_positive(),
        }
    }

    pub fn is_zero(&self) -> bool {
        matches!(self, Number::Int(0))
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Number::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Number::Int(i) => u64::try_from(*i).ok(),
            Number::Decimal(d) if d.scale == 0 => d.mantissa.to_u64(),
            _ => None,
        }
    }

    pub fn as_usize(&self) -> Option<usize> {
        self.as_u64().and_then(|u| usize::try_from(u).ok())
    }

    pub fn as_big(&self) -> Option<BigInt> {
        match self {
            Number::Int(i) => Some(BigInt::from(*i)),
            Number::Decimal(d) if d.scale == 0 => Some(d.mantissa.clone()),
            _ => None,
        }
    }

    /// Nearest `f64`. Lossy by nature.
    pub fn as_f64(&self) -> f64 {
        match self {
            Number::Int(i) => *i as f64,
            Number::Decimal(_) => self.format_decimal().parse::<f64>().unwrap_or(f64::NAN),
        }
    }

    pub fn add(&self, rhs: &Number) -> Result<Number> {
        if let (Number::Int(a), Number::Int(b)) = (self, rhs) {
            if let Some(c) = a.checked_add(*b) {
                return Ok(Number::Int(c));
            }
        }
        let (a, b, scale) = self.aligned(rhs);
        Ok(Number::from_parts(a + b, scale))
    }

    pub fn sub(&self, rhs: &Number) -> Result<Number> {
        if let (Number::Int(a), Number::Int(b)) = (self, rhs) {
            if let Some(c) = a.checked_sub(*b) {
                return Ok(Number::Int(c));
            }
        }
        let (a, b, scale) = self.aligned(rhs);
        Ok(Number::from_parts(a - b, scale))
    }

    pub fn mul(&self, rhs: &Number) -> Result<Number> {
        if let (Number::Int(a), Number::Int(b)) = (self, rhs) {
            if let Some(c) = a.checked_mul(*b) {
                return Ok(Number::Int(c));
            }
        }
        let (a, sa) = self.parts();
        let (b, sb) = rhs.parts();
        let scale = sa
            .checked_add(sb)
            .ok_or_else(|| anyhow!("number out of range"))?;
        Ok(Number::from_parts(a * b, scale))
    }

    /// Exact when the quotient terminates; otherwise rounded to 34
    /// significant digits.
    pub fn divide(&self, rhs: &Number) -> Result<Number> {
        if rhs.is_zero() {
            bail!("divide by zero");
        }
        if let (Number::Int(a), Number::Int(b)) = (self, rhs) {
            if let Some(0) = a.checked_rem(*b) {
                if let Some(c) = a.checked_div(*b) {
                    return Ok(Number::Int(c));
                }
            }
        }

        // self / rhs == num / den
        let (a, sa) = self.parts();
        let (b, sb) = rhs.parts();
        let num = a * pow10(sb as u64);
        let den = b * pow10(sa as u64);

        let g = num_integer_gcd(&num, &den);
        let (num, mut den) = (num / &g, den / &g);
        if den.is_negative() {
            den = -den;
            return Self::divide_reduced(-num, den);
        }
        Self::divide_reduced(num, den)
    }

    fn divide_reduced(num: BigInt, den: BigInt) -> Result<Number> {
        // A reduced fraction terminates iff the denominator has only 2 and 5
        // as prime factors.
        let (mut twos, mut fives) = (0u64, 0u64);
        let mut rest = den.clone();
        let (two, five) = (BigInt::from(2u8), BigInt::from(5u8));
        while (&rest % &two).is_zero() {
            rest /= &two;
            twos += 1;
        }
        while (&rest % &five).is_zero() {
            rest /= &five;
            fives += 1;
        }

        if rest.is_one() {
            let scale = twos.max(fives);
            let factor = pow10(scale) / &den;
            let scale = u32::try_from(scale).map_err(|_| anyhow!("number out of range"))?;
            return Ok(Number::from_parts(num * factor, scale));
        }

        // Pick a scale that yields exactly DIVISION_PRECISION digits.
        let shift = DIVISION_PRECISION as i64 + digit_count(&den) as i64 - digit_count(&num) as i64;
        let scaled = |s: i64| -> (BigInt, BigInt) {
            if s >= 0 {
                (&num * pow10(s as u64), den.clone())
            } else {
                (num.clone(), &den * pow10(s.unsigned_abs()))
            }
        };
        let (n, d) = scaled(shift);
        let mut q = &n / &d;
        let mut shift = shift;
        let digits = digit_count(&q);
        if digits > DIVISION_PRECISION {
            shift -= (digits - DIVISION_PRECISION) as i64;
        } else if digits < DIVISION_PRECISION && !q.is_zero() {
            shift += (DIVISION_PRECISION - digits) as i64;
        }
        let (n, d) = scaled(shift);
        q = div_round(&n, &d);

        if shift >= 0 {
            let scale = u32::try_from(shift).map_err(|_| anyhow!("number out of range"))?;
            Ok(Number::from_parts(q, scale))
        } else {
            Ok(Number::from_parts(q * pow10(shift.unsigned_abs()), 0))
        }
    }

    /// Remainder with the sign of the dividend. Integers only.
    pub fn modulo(&self, rhs: &Number) -> Result<Number> {
        match (self.as_big(), rhs.as_big()) {
            (Some(_), Some(b)) if b.is_zero() => bail!("modulo by zero"),
            (Some(a), Some(b)) => {
                if let (Number::Int(x), Number::Int(y)) = (self, rhs) {
                    if let Some(r) = x.checked_rem(*y) {
                        return Ok(Number::Int(r));
                    }
                }
                Ok(Number::from_parts(a % b, 0))
            }
            _ => bail!("modulo on floating-point number"),
        }
    }

    pub fn neg(&self) -> Number {
        match self {
            Number::Int(i) => match i.checked_neg() {
                Some(n) => Number::Int(n),
                None => Number::from_parts(-BigInt::from(*i), 0),
            },
            Number::Decimal(d) => Number::from_parts(-d.mantissa.clone(), d.scale),
        }
    }

    pub fn abs(&self) -> Number {
        match self {
            Number::Int(i) if *i >= 0 => self.clone(),
            Number::Decimal(d) if !d.mantissa.is_negative() => self.clone(),
            _ => self.neg(),
        }
    }

    pub fn floor(&self) -> Number {
        match self {
            Number::Decimal(d) if d.scale > 0 => {
                let p = pow10(d.scale as u64);
                let q = &d.mantissa / &p;
                match d.mantissa.is_negative() {
                    true => Number::from_parts(q - 1, 0),
                    false => Number::from_parts(q, 0),
                }
            }
            _ => self.clone(),
        }
    }

    pub fn ceil(&self) -> Number {
        self.neg().floor().neg()
    }

    /// Rounds half away from zero.
    pub fn round(&self) -> Number {
        match self {
            Number::Decimal(d) if d.scale > 0 => {
                Number::from_parts(div_round(&d.mantissa, &pow10(d.scale as u64)), 0)
            }
            _ => self.clone(),
        }
    }

    pub fn format_decimal(&self) -> String {
        match self {
            Number::Int(i) => i.to_string(),
            Number::Decimal(d) => {
                let digits = d.mantissa.magnitude().to_str_radix(10);
                let sign = match d.mantissa.sign() {
                    Sign::Minus => "-",
                    _ => "",
                };
                let scale = d.scale as usize;
                if scale == 0 {
                    format!("{sign}{digits}")
                } else if digits.len() > scale {
                    let (int, frac) = digits.split_at(digits.len() - scale);
                    format!("{sign}{int}.{frac}")
                } else {
                    format!("{sign}0.{}{digits}", "0".repeat(scale - digits.len()))
                }
            }
        }
    }
}

fn num_integer_gcd(a: &BigInt, b: &BigInt) -> BigInt {
    let (mut a, mut b) = (a.abs(), b.abs());
    while !b.is_zero() {
        let r = &a % &b;
        a = b;
        b = r;
    }
    if a.is_zero() {
        BigInt::one()
    } else {
        a
    }
}

impl Debug for Number {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format_decimal())
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format_decimal())
    }
}

impl Serialize for Number {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = self.format_decimal();
        let v = serde_json::Number::from_str(&s)
            .map_err(|_| serde::ser::Error::custom("could not serialize number"))?;
        v.serialize(serializer)
    }
}

impl From<i64> for Number {
    fn from(value: i64) -> Self {
        Number::Int(value)
    }
}

impl From<i32> for Number {
    fn from(value: i32) -> Self {
        Number::Int(value as i64)
    }
}

impl From<u64> for Number {
    fn from(value: u64) -> Self {
        match i64::try_from(value) {
            Ok(i) => Number::Int(i),
            Err(_) => Number::from_parts(BigInt::from(value), 0),
        }
    }
}

impl From<usize> for Number {
    fn from(value: usize) -> Self {
        Number::from(value as u64)
    }
}

impl From<BigInt> for Number {
    fn from(value: BigInt) -> Self {
        Number::from_parts(value, 0)
    }
}

impl FromStr for Number {
    type Err = anyhow::Error;

    // JSON number grammar: -?(0|[1-9][0-9]*)(\.[0-9]+)?([eE][+-]?[0-9]+)?
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (negative, body) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let (significand, exponent) = match body.find(['e', 'E']) {
            Some(pos) => (&body[..pos], Some(&body[pos + 1..])),
            None => (body, None),
        };
        let (int, frac) = match significand.split_once('.') {
            Some((i, f)) => (i, f),
            None => (significand, ""),
        };

        let all_digits = |t: &str| !t.is_empty() && t.bytes().all(|b| b.is_ascii_digit());
        if !all_digits(int) || (significand.contains('.') && !all_digits(frac)) {
            bail!("invalid number `{s}`");
        }

        let exp: i64 = match exponent {
            Some(e) => {
                let digits = e.strip_prefix(['+', '-']).unwrap_or(e);
                if !all_digits(digits) {
                    bail!("invalid number `{s}`");
                }
                let mag: i64 = digits
                    .parse()
                    .ok()
                    .filter(|m| *m <= MAX_EXPONENT)
                    .ok_or_else(|| anyhow!("exponent out of range in `{s}`"))?;
                if e.starts_with('-') {
                    -mag
                } else {
                    mag
                }
            }
            None => 0,
        };

        let mut mantissa = BigInt::parse_bytes(format!("{int}{frac}").as_bytes(), 10)
            .ok_or_else(|| anyhow!("invalid number `{s}`"))?;
        if negative {
            mantissa = -mantissa;
        }

        let scale = frac.len() as i64 - exp;
        if scale < 0 {
            Ok(Number::from_parts(mantissa * pow10(scale.unsigned_abs()), 0))
        } else {
            let scale = u32::try_from(scale).map_err(|_| anyhow!("number out of range"))?;
            Ok(Number::from_parts(mantissa, scale))
        }
    }
}

impl Ord for Number {
    fn cmp(&self, other: &Self) -> Ordering {
        if let (Number::Int(a), Number::Int(b)) = (self, other) {
            return a.cmp(b);
        }
        let (a, b, _) = self.aligned(other);
        a.cmp(&b)
    }
}

impl PartialOrd for Number {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
