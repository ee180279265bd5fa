//! Core log interface.
//!
//! Cores log through a printf-style variadic function. The formatting half lives in
//! `csrc/log_shim.c`; the formatted line comes back through [`retrohost_log_message`] and goes
//! to the `log` facade under target `core`.

use std::ffi::CStr;
use std::os::raw::{c_char, c_uint};

use crate::abi::{LogPrintfFn, log_level};

unsafe extern "C" {
    fn retrohost_log_printf(level: c_uint, fmt: *const c_char, ...);
}

/// The function written into `retro_log_callback`.
pub(crate) fn printf_entry() -> LogPrintfFn {
    retrohost_log_printf
}

/// One log line, without the newlines cores like to embed.
pub(crate) fn sanitize(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .replace(['\r', '\n'], " ")
        .trim_end()
        .to_owned()
}

fn level(raw: c_uint) -> log::Level {
    match raw {
        log_level::DEBUG => log::Level::Debug,
        log_level::INFO => log::Level::Info,
        log_level::WARN => log::Level::Warn,
        _ => log::Level::Error,
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn retrohost_log_message(level_raw: c_uint, message: *const c_char) {
    if message.is_null() {
        return;
    }
    // SAFETY: the shim passes a NUL-terminated stack buffer that outlives this call.
    let line = sanitize(unsafe { CStr::from_ptr(message) }.to_bytes());
    log::log!(target: "core", level(level_raw), "{line}");
}
