/// Log macros that prefix every line with the call site.
///
/// Format: [file:line] message
///
/// ```
/// info!("wifi: joining {}", ssid);
/// // Output: [src/wifi.rs:88] wifi: joining home
/// ```
///
/// The core library logs through plain `log` macros; these only wrap the
/// firmware's own adapters.

#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {
        {
            const LOC: &str = concat!("[", file!(), ":", line!(), "]");
            ::log::info!("{} {}", LOC, format_args!($($arg)*))
        }
    };
}

#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {
        {
            const LOC: &str = concat!("[", file!(), ":", line!(), "]");
            ::log::warn!("{} {}", LOC, format_args!($($arg)*))
        }
    };
}

#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {
        {
            const LOC: &str = concat!("[", file!(), ":", line!(), "]");
            ::log::error!("{} {}", LOC, format_args!($($arg)*))
        }
    };
}

#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {
        {
            const LOC: &str = concat!("[", file!(), ":", line!(), "]");
            ::log::debug!("{} {}", LOC, format_args!($($arg)*))
        }
    };
}
