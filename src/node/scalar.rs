use std::fmt;

use ordered_float::OrderedFloat;
use regex::Regex;

/// A compiled string pattern. Compiled when the node is defined so decoding
/// never fails on a bad regex.
#[derive(Clone)]
pub struct Pattern(Regex);

impl Pattern {
    pub fn new(source: &str) -> Result<Self, regex::Error> {
        Regex::new(source).map(Pattern)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn is_match(&self, s: &str) -> bool {
        self.0.is_match(s)
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/", self.0.as_str())
    }
}

// ------------------------------- Strings ---------------------------------- //

#[derive(Clone, Debug, Default)]
pub struct StringOptions {
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub length: Option<usize>,
    pub pattern: Option<Pattern>,
    /// Published as the schema `format`; not checked.
    pub format: Option<String>,
    /// Trim surrounding whitespace when casting.
    pub trim: bool,
}

impl StringOptions {
    pub(crate) fn check_definition(&self) -> Result<(), String> {
        if let (Some(min), Some(max)) = (self.min_length, self.max_length) {
            if min > max {
                return Err(format!("min_length {min} > max_length {max}"));
            }
        }
        if let Some(len) = self.length {
            if self.min_length.is_some_and(|min| len < min) || self.max_length.is_some_and(|max| len > max) {
                return Err(format!("length {len} outside of min_length/max_length"));
            }
        }
        Ok(())
    }

    /// Option checks, run after the type check passed.
    pub fn check(&self, s: &str) -> Result<(), String> {
        let len = s.chars().count();
        if let Some(n) = self.length {
            if len != n {
                return Err(format!("length of {n} expected"));
            }
        }
        if let Some(n) = self.min_length {
            if len < n {
                return Err(format!("length of at least {n} expected"));
            }
        }
        if let Some(n) = self.max_length {
            if len > n {
                return Err(format!("length of at most {n} expected"));
            }
        }
        if let Some(p) = &self.pattern {
            if !p.is_match(s) {
                return Err(format!("string matching /{}/ expected", p.as_str()));
            }
        }
        Ok(())
    }
}

// ------------------------------- Numbers ---------------------------------- //

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct NumberOptions {
    pub min: Option<OrderedFloat<f64>>,
    pub max: Option<OrderedFloat<f64>>,
    pub exclusive_min: Option<OrderedFloat<f64>>,
    pub exclusive_max: Option<OrderedFloat<f64>>,
    pub integer: bool,
    pub multiple_of: Option<OrderedFloat<f64>>,
}

impl NumberOptions {
    pub fn integer() -> Self {
        Self { integer: true, ..Self::default() }
    }

    /// Tightest lower bound and whether it is exclusive.
    fn lower(&self) -> Option<(f64, bool)> {
        match (self.min, self.exclusive_min) {
            (Some(a), Some(b)) if b >= a => Some((b.0, true)),
            (Some(a), _) => Some((a.0, false)),
            (None, b) => b.map(|b| (b.0, true)),
        }
    }

    /// Tightest upper bound and whether it is exclusive.
    fn upper(&self) -> Option<(f64, bool)> {
        match (self.max, self.exclusive_max) {
            (Some(a), Some(b)) if b <= a => Some((b.0, true)),
            (Some(a), _) => Some((a.0, false)),
            (None, b) => b.map(|b| (b.0, true)),
        }
    }

    pub(crate) fn check_definition(&self) -> Result<(), String> {
        if let (Some((lo, lo_exclusive)), Some((hi, hi_exclusive))) = (self.lower(), self.upper()) {
            if lo > hi || (lo == hi && (lo_exclusive || hi_exclusive)) {
                return Err(format!("lower bound {lo} does not admit any value below upper bound {hi}"));
            }
        }
        if let Some(m) = self.multiple_of {
            if !(m.0 > 0.0) || !m.0.is_finite() {
                return Err(format!("multiple_of must be a positive number, got {}", m.0));
            }
        }
        for bound in [self.min, self.max, self.exclusive_min, self.exclusive_max].into_iter().flatten() {
            if !bound.0.is_finite() {
                return Err("bounds must be finite".to_string());
            }
        }
        Ok(())
    }

    pub fn check(&self, n: f64) -> Result<(), String> {
        if self.integer && n.fract() != 0.0 {
            return Err("integer expected".to_string());
        }
        if let Some(m) = self.min {
            if n < m.0 {
                return Err(format!("number greater than or equal to {} expected", m.0));
            }
        }
        if let Some(m) = self.exclusive_min {
            if n <= m.0 {
                return Err(format!("number greater than {} expected", m.0));
            }
        }
        if let Some(m) = self.max {
            if n > m.0 {
                return Err(format!("number less than or equal to {} expected", m.0));
            }
        }
        if let Some(m) = self.exclusive_max {
            if n >= m.0 {
                return Err(format!("number less than {} expected", m.0));
            }
        }
        if let Some(m) = self.multiple_of {
            let q = n / m.0;
            if (q - q.round()).abs() > 1e-9 {
                return Err(format!("multiple of {} expected", m.0));
            }
        }
        Ok(())
    }
}

// -------------------------------- Arrays ---------------------------------- //

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ArrayOptions {
    pub min_items: Option<usize>,
    pub max_items: Option<usize>,
}

impl ArrayOptions {
    pub(crate) fn check_definition(&self) -> Result<(), String> {
        match (self.min_items, self.max_items) {
            (Some(min), Some(max)) if min > max => Err(format!("min_items {min} > max_items {max}")),
            _ => Ok(()),
        }
    }

    pub fn check(&self, len: usize) -> Result<(), String> {
        if let Some(n) = self.min_items {
            if len < n {
                return Err(format!("at least {n} items expected"));
            }
        }
        if let Some(n) = self.max_items {
            if len > n {
                return Err(format!("at most {n} items expected"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_checks_count_chars_not_bytes() {
        let o = StringOptions { max_length: Some(3), ..Default::default() };
        assert!(o.check("αβγ").is_ok());
        assert_eq!(o.check("αβγδ").unwrap_err(), "length of at most 3 expected");
    }

    #[test]
    fn string_pattern() {
        let o = StringOptions { pattern: Some(Pattern::new("^[a-z]+$").unwrap()), ..Default::default() };
        assert!(o.check("abc").is_ok());
        assert!(o.check("ab1").is_err());
    }

    #[test]
    fn exclusive_bounds() {
        let o = NumberOptions {
            exclusive_min: Some(OrderedFloat(0.0)),
            max: Some(OrderedFloat(10.0)),
            ..Default::default()
        };
        assert!(o.check(0.0).is_err());
        assert!(o.check(0.1).is_ok());
        assert!(o.check(10.0).is_ok());
        assert!(o.check(10.5).is_err());
    }

    #[test]
    fn contradictory_number_bounds() {
        let o = NumberOptions {
            exclusive_min: Some(OrderedFloat(5.0)),
            exclusive_max: Some(OrderedFloat(5.0)),
            ..Default::default()
        };
        assert!(o.check_definition().is_err());
        let ok = NumberOptions { min: Some(OrderedFloat(5.0)), max: Some(OrderedFloat(5.0)), ..Default::default() };
        assert!(ok.check_definition().is_ok());
    }

    #[test]
    fn only_binding_exclusive_bounds_close_the_range() {
        let o = NumberOptions {
            min: Some(OrderedFloat(5.0)),
            max: Some(OrderedFloat(5.0)),
            exclusive_max: Some(OrderedFloat(10.0)),
            ..Default::default()
        };
        assert!(o.check_definition().is_ok());
        assert!(o.check(5.0).is_ok());
        let closed = NumberOptions { exclusive_max: Some(OrderedFloat(5.0)), ..o };
        assert!(closed.check_definition().is_err());
    }

    #[test]
    fn integer_and_multiple_of() {
        let o = NumberOptions { integer: true, multiple_of: Some(OrderedFloat(5.0)), ..Default::default() };
        assert_eq!(o.check(2.5).unwrap_err(), "integer expected");
        assert!(o.check(15.0).is_ok());
        assert!(o.check(16.0).is_err());
    }
}
