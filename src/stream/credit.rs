//! requestN flow-control credit.

use std::fmt;

use crate::protocol::MAX_REQUEST_N;

/// Flow-control credit for one direction of a stream.
///
/// Credit saturates at 2^31 - 1, which the protocol treats as unbounded:
/// once reached, consuming no longer decrements it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Credit(u32);

impl Credit {
    /// Credit of `n` (clamped to the unbounded value).
    pub fn new(n: u32) -> Self {
        Credit(n.min(MAX_REQUEST_N))
    }

    pub fn zero() -> Self {
        Credit(0)
    }

    pub fn unbounded() -> Self {
        Credit(MAX_REQUEST_N)
    }

    #[inline]
    pub fn is_unbounded(&self) -> bool {
        self.0 == MAX_REQUEST_N
    }

    /// Remaining credit.
    #[inline]
    pub fn available(&self) -> u32 {
        self.0
    }

    #[inline]
    pub fn has_credit(&self) -> bool {
        self.0 > 0
    }

    /// Grant `n` more, saturating at unbounded.
    pub fn add(&mut self, n: u32) {
        self.0 = self.0.saturating_add(n).min(MAX_REQUEST_N);
    }

    /// Take one unit. Returns false when none is left.
    pub fn try_consume(&mut self) -> bool {
        if self.is_unbounded() {
            return true;
        }
        if self.0 == 0 {
            return false;
        }
        self.0 -= 1;
        true
    }
}

impl fmt::Display for Credit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unbounded() {
            write!(f, "unbounded")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consume() {
        let mut credit = Credit::new(2);
        assert!(credit.try_consume());
        assert!(credit.try_consume());
        assert!(!credit.try_consume());
        assert!(!credit.has_credit());
    }

    #[test]
    fn test_add_saturates() {
        let mut credit = Credit::new(MAX_REQUEST_N - 1);
        credit.add(10);
        assert!(credit.is_unbounded());
        assert!(credit.try_consume());
        assert_eq!(credit.available(), MAX_REQUEST_N);
        assert_eq!(credit.to_string(), "unbounded");
    }

    #[test]
    fn test_new_clamps() {
        assert!(Credit::new(u32::MAX).is_unbounded());
        assert_eq!(Credit::zero().to_string(), "0");
    }
}
