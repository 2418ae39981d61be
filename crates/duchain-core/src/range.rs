//! Source positions

use serde::{Deserialize, Serialize};
use std::fmt;

/// A (line, column) position. Negative coordinates mean "invalid", which
/// disables position-based visibility filtering in lookups.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SimpleCursor {
    pub line: i32,
    pub column: i32,
}

impl SimpleCursor {
    pub const fn new(line: i32, column: i32) -> Self {
        Self { line, column }
    }

    pub const fn invalid() -> Self {
        Self {
            line: -1,
            column: -1,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.line >= 0 && self.column >= 0
    }
}

impl Default for SimpleCursor {
    fn default() -> Self {
        Self::invalid()
    }
}

impl fmt::Display for SimpleCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// A half-open source range `[start, end)`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SimpleRange {
    pub start: SimpleCursor,
    pub end: SimpleCursor,
}

impl SimpleRange {
    pub const fn new(start: SimpleCursor, end: SimpleCursor) -> Self {
        Self { start, end }
    }

    pub const fn from_coordinates(
        start_line: i32,
        start_column: i32,
        end_line: i32,
        end_column: i32,
    ) -> Self {
        Self {
            start: SimpleCursor::new(start_line, start_column),
            end: SimpleCursor::new(end_line, end_column),
        }
    }

    pub const fn invalid() -> Self {
        Self {
            start: SimpleCursor::invalid(),
            end: SimpleCursor::invalid(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.start.is_valid() && self.end.is_valid()
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn contains(&self, position: SimpleCursor) -> bool {
        self.start <= position && position < self.end
    }

    pub fn contains_range(&self, other: &SimpleRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

impl fmt::Display for SimpleRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_ordering() {
        assert!(SimpleCursor::new(1, 5) < SimpleCursor::new(2, 0));
        assert!(SimpleCursor::new(1, 5) < SimpleCursor::new(1, 6));
        assert!(!SimpleCursor::invalid().is_valid());
    }

    #[test]
    fn test_range_contains() {
        let range = SimpleRange::from_coordinates(0, 0, 0, 10);
        assert!(range.contains(SimpleCursor::new(0, 0)));
        assert!(!range.contains(SimpleCursor::new(0, 10)));
        assert!(range.contains_range(&SimpleRange::from_coordinates(0, 2, 0, 4)));
        assert_eq!(range.to_string(), "[0:0, 0:10)");
    }
}
