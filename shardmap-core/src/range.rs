use std::fmt::{self, Debug, Display};

use crate::error::ShardMapError;

/// A key type which a shard map can be partitioned by.
///
/// This is implemented for every ordered, cloneable and thread safe type.
pub trait ShardKey: Ord + Clone + Debug + Send + Sync + 'static {}

impl<T> ShardKey for T where T: Ord + Clone + Debug + Send + Sync + 'static {}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
/// A half-open interval of key space, `[low, high)`.
///
/// A range can only be constructed with `low < high`.
pub struct ShardRange<K> {
    low: K,
    high: K,
}

impl<K: ShardKey> ShardRange<K> {
    /// Creates a new range covering `[low, high)`.
    pub fn new(low: K, high: K) -> Result<Self, ShardMapError> {
        if low >= high {
            return Err(ShardMapError::InvalidRange {
                low: format!("{low:?}"),
                high: format!("{high:?}"),
            });
        }

        Ok(Self { low, high })
    }

    #[inline]
    /// The inclusive lower bound of the range.
    pub fn low(&self) -> &K {
        &self.low
    }

    #[inline]
    /// The exclusive upper bound of the range.
    pub fn high(&self) -> &K {
        &self.high
    }

    #[inline]
    /// Returns if `low <= key < high`.
    pub fn contains(&self, key: &K) -> bool {
        &self.low <= key && key < &self.high
    }

    #[inline]
    /// Returns if the two ranges share at least one key.
    ///
    /// Adjacent ranges such as `[0, 100)` and `[100, 200)` do not overlap.
    pub fn overlaps(&self, other: &Self) -> bool {
        self.low < other.high && other.low < self.high
    }
}

impl<K: Debug> Display for ShardRange<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}, {:?})", self.low, self.high)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_bounds() {
        let range = ShardRange::new(0, 100).expect("Create range");
        assert!(range.contains(&0));
        assert!(range.contains(&99));
        assert!(!range.contains(&100));
        assert!(!range.contains(&-1));
        assert_eq!(range.to_string(), "[0, 100)");
    }

    #[test]
    fn test_invalid_range() {
        let err = ShardRange::new(10, 10).expect_err("Empty range should be rejected");
        assert!(matches!(err, ShardMapError::InvalidRange { .. }));

        let err = ShardRange::new(10, 5).expect_err("Inverted range should be rejected");
        assert!(matches!(err, ShardMapError::InvalidRange { .. }));
    }

    #[test]
    fn test_range_overlaps() {
        let a = ShardRange::new(0, 100).unwrap();
        let b = ShardRange::new(100, 200).unwrap();
        let c = ShardRange::new(50, 150).unwrap();
        let d = ShardRange::new(10, 20).unwrap();

        assert!(!a.overlaps(&b), "Adjacent ranges must not overlap");
        assert!(!b.overlaps(&a), "Adjacent ranges must not overlap");
        assert!(a.overlaps(&c));
        assert!(c.overlaps(&b));
        assert!(a.overlaps(&d), "Contained ranges overlap");
        assert!(d.overlaps(&a), "Contained ranges overlap");
        assert!(a.overlaps(&a));
    }
}
