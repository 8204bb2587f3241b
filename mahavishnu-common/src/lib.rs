pub mod clock;
pub mod config;
pub mod ids;
pub mod metrics;
pub mod retries;
pub mod tracing_init;

#[cfg(test)]
test_r::enable!();

/// Redacting counterpart of `Display`, for values that may embed secrets
/// (HMAC keys, access tokens) and still need to be logged at startup.
pub trait SafeDisplay {
    fn to_safe_string(&self) -> String;

    fn to_safe_string_indented(&self) -> String {
        self.to_safe_string()
            .lines()
            .map(|line| format!("  {line}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl SafeDisplay for String {
    fn to_safe_string(&self) -> String {
        self.clone()
    }
}
