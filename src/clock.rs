//! Wall-clock milliseconds since the Unix epoch.
//!
//! Uses `worker::Date` on WASM (the Workers runtime virtualises `SystemTime`),
//! `SystemTime` on native.

#[cfg(target_arch = "wasm32")]
pub fn now_ms() -> i64 {
    worker::Date::now().as_millis() as i64
}

#[cfg(not(target_arch = "wasm32"))]
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
