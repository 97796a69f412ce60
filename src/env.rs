/// Return whether a feature flag controlled by an environment variable is
/// enabled. Unset variables use `default`; unrecognized values are false.
pub fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(value) => matches!(value.as_str(), "1" | "true" | "t" | "yes" | "y"),
        Err(_) => default,
    }
}

/// Whether to print network setup details (computed outputs, shapes) to
/// stderr.
pub fn debug_net() -> bool {
    env_flag("DENDRITE_DEBUG_NET", false)
}
