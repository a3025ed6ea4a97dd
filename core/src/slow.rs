//! Run-time consistency checks of range maps.
//! These can be disabled with the `"no-slow-safety-checks"` feature.

/// `assert!` that exists only if `"no-slow-safety-checks"` feature is not enabled.
#[cfg(not(feature = "no-slow-safety-checks"))]
#[macro_export]
macro_rules! syncval_slow_assert {
    ($($tt:tt)*) => {
        assert!($($tt)*);
    };
}

/// `assert!` that exists only if `"no-slow-safety-checks"` feature is not enabled.
#[cfg(feature = "no-slow-safety-checks")]
#[macro_export]
macro_rules! syncval_slow_assert {
    ($($tt:tt)*) => {};
}
