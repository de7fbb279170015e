/// Returns early with a string-payload [`SieveError`](crate::SieveError) variant
/// when the condition does not hold.
///
/// ```ignore
/// ensure!(batch_size > 0, ValueError: "batch_size must be positive, got {}", batch_size);
/// ```
#[macro_export]
macro_rules! ensure {
    ($cond:expr, $variant:ident: $($arg:tt)*) => {
        if !$cond {
            return Err($crate::SieveError::$variant(format!($($arg)*)));
        }
    };
}
