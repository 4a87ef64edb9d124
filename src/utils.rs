//! Small helpers shared by the configuration types.

use std::cmp;

//------------ DefMinMax -----------------------------------------------------

/// The default, minimum, and maximum values for a config variable.
#[derive(Clone, Copy, Debug)]
pub(crate) struct DefMinMax<T> {
    /// The default value.
    def: T,

    /// The minimum value.
    min: T,

    /// The maximum value.
    max: T,
}

impl<T> DefMinMax<T> {
    /// Creates a new value.
    pub const fn new(def: T, min: T, max: T) -> Self {
        Self { def, min, max }
    }

    /// Returns the default value.
    pub fn default(self) -> T {
        self.def
    }

    /// Trims the given value to fit into the minimum/maximum range.
    pub fn limit(self, value: T) -> T
    where
        T: Ord,
    {
        cmp::max(self.min, cmp::min(self.max, value))
    }
}

//============ Tests =========================================================

#[cfg(test)]
mod test {
    use super::*;
    use std::time::Duration;

    const TIMEOUT: DefMinMax<Duration> = DefMinMax::new(
        Duration::from_secs(10),
        Duration::from_millis(1),
        Duration::from_secs(600),
    );

    #[test]
    fn limit_trims_to_range() {
        assert_eq!(TIMEOUT.default(), Duration::from_secs(10));
        assert_eq!(TIMEOUT.limit(Duration::ZERO), Duration::from_millis(1));
        assert_eq!(
            TIMEOUT.limit(Duration::from_secs(3600)),
            Duration::from_secs(600)
        );
        assert_eq!(
            TIMEOUT.limit(Duration::from_secs(5)),
            Duration::from_secs(5)
        );
    }
}
