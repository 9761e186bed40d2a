
//! Small math utilities for tile and level arithmetic.

use std::convert::TryFrom;
use crate::error::i32_to_usize;
use crate::error::Result;

/// Simple two-dimensional vector of any numerical type.
/// Used for sizes, positions, and sampling rates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Vec2<T> (pub T, pub T);

impl<T> Vec2<T> {

    /// Maps both components of this vector to a new type.
    pub fn map<B>(self, map: impl Fn(T) -> B) -> Vec2<B> {
        Vec2(map(self.0), map(self.1))
    }

    /// Try to convert both components of this vector to a new type,
    /// yielding either a vector of that new type, or an error.
    pub fn try_from<S>(value: Vec2<S>) -> std::result::Result<Self, T::Error> where T: TryFrom<S> {
        let x = T::try_from(value.0)?;
        let y = T::try_from(value.1)?;
        Ok(Vec2(x, y))
    }

    /// Seeing this vector as a size, returns `width * height`.
    pub fn area(self) -> T where T: std::ops::Mul<T, Output = T> {
        self.0 * self.1
    }

    /// The first component of this vector.
    pub fn x(self) -> T { self.0 }

    /// The second component of this vector.
    pub fn y(self) -> T { self.1 }

    /// The first component of this vector, seen as a size.
    pub fn width(self) -> T { self.0 }

    /// The second component of this vector, seen as a size.
    pub fn height(self) -> T { self.1 }
}

impl Vec2<i32> {

    /// Try to convert to `Vec2<usize>`, returning an error on negative numbers.
    pub fn to_usize(self, error_message: &'static str) -> Result<Vec2<usize>> {
        let x = i32_to_usize(self.0, error_message)?;
        let y = i32_to_usize(self.1, error_message)?;
        Ok(Vec2(x, y))
    }
}

impl Vec2<usize> {

    /// Panics for values above `i32::MAX`.
    pub fn to_i32(self) -> Vec2<i32> {
        let x = i32::try_from(self.0).expect("vector x coordinate too large");
        let y = i32::try_from(self.1).expect("vector y coordinate too large");
        Vec2(x, y)
    }
}


impl<T: std::ops::Add<T>> std::ops::Add<Vec2<T>> for Vec2<T> {
    type Output = Vec2<T::Output>;
    fn add(self, other: Vec2<T>) -> Self::Output {
        Vec2(self.0 + other.0, self.1 + other.1)
    }
}

impl<T: std::ops::Sub<T>> std::ops::Sub<Vec2<T>> for Vec2<T> {
    type Output = Vec2<T::Output>;
    fn sub(self, other: Vec2<T>) -> Self::Output {
        Vec2(self.0 - other.0, self.1 - other.1)
    }
}

impl<T: std::ops::Mul<T>> std::ops::Mul<Vec2<T>> for Vec2<T> {
    type Output = Vec2<T::Output>;
    fn mul(self, other: Vec2<T>) -> Self::Output {
        Vec2(self.0 * other.0, self.1 * other.1)
    }
}

impl<T: std::ops::Div<T>> std::ops::Div<Vec2<T>> for Vec2<T> {
    type Output = Vec2<T::Output>;
    fn div(self, other: Vec2<T>) -> Self::Output {
        Vec2(self.0 / other.0, self.1 / other.1)
    }
}

impl<T> From<(T, T)> for Vec2<T> {
    fn from((x, y): (T, T)) -> Self { Vec2(x, y) }
}

impl<T> From<Vec2<T>> for (T, T) {
    fn from(vec2: Vec2<T>) -> Self { (vec2.0, vec2.1) }
}


/// Computes `floor(log2(x))`. Returns 0 for an argument of 0.
pub(crate) fn floor_log_2(number: u32) -> u32 {
    31 - number.max(1).leading_zeros()
}

/// Computes `ceil(log2(x))`. Returns 0 for an argument of 0.
pub(crate) fn ceil_log_2(number: u32) -> u32 {
    if number <= 1 { 0 }
    else { 32 - (number - 1).leading_zeros() }
}


/// Whether to round up or down when computing level sizes.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum RoundingMode {

    /// Round down.
    Down,

    /// Round up.
    Up,
}

impl RoundingMode {
    pub(crate) fn log2(self, number: usize) -> usize {
        match self {
            RoundingMode::Down => self::floor_log_2(number as u32) as usize,
            RoundingMode::Up => self::ceil_log_2(number as u32) as usize,
        }
    }

    // only correct for positive numbers
    pub(crate) fn divide(self, dividend: usize, divisor: usize) -> usize {
        match self {
            RoundingMode::Up => (dividend + divisor - 1) / divisor,
            RoundingMode::Down => dividend / divisor,
        }
    }
}


#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn log2_rounding(){
        assert_eq!(floor_log_2(1), 0);
        assert_eq!(floor_log_2(2), 1);
        assert_eq!(floor_log_2(3), 1);
        assert_eq!(floor_log_2(4), 2);
        assert_eq!(floor_log_2(1024), 10);
        assert_eq!(floor_log_2(1025), 10);

        assert_eq!(ceil_log_2(1), 0);
        assert_eq!(ceil_log_2(2), 1);
        assert_eq!(ceil_log_2(3), 2);
        assert_eq!(ceil_log_2(4), 2);
        assert_eq!(ceil_log_2(1024), 10);
        assert_eq!(ceil_log_2(1025), 11);
    }

    #[test]
    fn vector_operators(){
        assert_eq!(Vec2::<usize>::default(), Vec2(0, 0));
        assert_eq!(Vec2(7_usize, 5) / Vec2(2, 2), Vec2(3, 2));
        assert_eq!(Vec2(1, 2) + Vec2(3, 4), Vec2(4, 6));
        assert_eq!(Vec2(3, 4) - Vec2(1, 2), Vec2(2, 2));
        assert_eq!(Vec2(3, 4) * Vec2(2, 2), Vec2(6, 8));

        let mut modes = std::collections::HashSet::new();
        modes.insert(RoundingMode::Down);
        modes.insert(RoundingMode::Up);
        modes.insert(RoundingMode::Down);
        assert_eq!(modes.len(), 2);
    }

    #[test]
    fn divide_rounding(){
        assert_eq!(RoundingMode::Down.divide(8, 2), 4);
        assert_eq!(RoundingMode::Up.divide(8, 2), 4);
        assert_eq!(RoundingMode::Down.divide(9, 2), 4);
        assert_eq!(RoundingMode::Up.divide(9, 2), 5);
        assert_eq!(RoundingMode::Up.divide(321, 32), 11);
        assert_eq!(RoundingMode::Down.divide(321, 32), 10);
    }
}
