//! Panic hook that records the panic through `tracing` before handing over
//! to the previously installed hook.

use std::panic::{self, PanicHookInfo};
use std::sync::Once;
use std::thread;

static INSTALL: Once = Once::new();

/// Install the hook. Later calls are no-ops.
pub fn install_panic_hook() {
    INSTALL.call_once(|| {
        let original_hook = panic::take_hook();
        panic::set_hook(Box::new(move |info: &PanicHookInfo<'_>| {
            log_panic(info);
            original_hook(info);
        }));
    });
}

fn log_panic(info: &PanicHookInfo<'_>) {
    let location = info
        .location()
        .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
        .unwrap_or_else(|| "unknown".to_string());
    let message = if let Some(s) = info.payload().downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = info.payload().downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    };
    let current = thread::current();

    tracing::error!(
        thread = current.name().unwrap_or("<unnamed>"),
        location = %location,
        "Panic: {message}"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hook_survives_repeated_install_and_a_caught_panic() {
        install_panic_hook();
        install_panic_hook();

        let caught = panic::catch_unwind(|| panic!("worker exploded"));
        assert!(caught.is_err());
    }
}
