// per-message trace, tagged with the id of the host doing the work
macro_rules! verbose {
    ($host:expr, $($arg:tt)*) => (
        log::debug!("[{}] {}", $host.id(), format_args!($($arg)*))
    );
}
