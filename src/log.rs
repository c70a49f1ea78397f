//! Logging front-end: `defmt` or `log` when enabled, nothing otherwise.

#[cfg(all(feature = "defmt", feature = "log"))]
compile_error!("features `defmt` and `log` are mutually exclusive");

#[cfg(feature = "defmt")]
#[allow(unused_imports)]
pub(crate) use defmt::{debug, error, info, trace, warn};

#[cfg(all(feature = "log", not(feature = "defmt")))]
#[allow(unused_imports)]
pub(crate) use ::log::{debug, error, info, trace, warn};

#[cfg(not(any(feature = "defmt", feature = "log")))]
mod silent {
    // Arguments are still borrowed so that values only used for logging do not trip lints.
    macro_rules! info {
        ( $( $x:expr ),* $(,)? ) => {{ $( let _ = &$x; )* }};
    }
    macro_rules! debug {
        ( $( $x:expr ),* $(,)? ) => {{ $( let _ = &$x; )* }};
    }
    macro_rules! trace {
        ( $( $x:expr ),* $(,)? ) => {{ $( let _ = &$x; )* }};
    }
    macro_rules! error {
        ( $( $x:expr ),* $(,)? ) => {{ $( let _ = &$x; )* }};
    }
    macro_rules! warner {
        ( $( $x:expr ),* $(,)? ) => {{ $( let _ = &$x; )* }};
    }

    #[allow(unused_imports)]
    pub(crate) use {debug, error, info, trace, warner as warn};
}

#[cfg(not(any(feature = "defmt", feature = "log")))]
#[allow(unused_imports)]
pub(crate) use silent::{debug, error, info, trace, warn};
