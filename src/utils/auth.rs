/// Compare two secrets without short-circuiting on the first differing byte
pub fn constant_time_eq(provided: &str, expected: &str) -> bool {
    let a = provided.as_bytes();
    let b = expected.as_bytes();

    a.len() == b.len() && a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Check an admin key against the configured one
///
/// When no key is configured the admin surface is closed: every request is
/// refused, including ones that present an empty key.
pub fn verify_api_key(provided: &str, configured: Option<&str>) -> bool {
    match configured {
        Some(expected) if !expected.is_empty() => constant_time_eq(provided, expected),
        _ => false,
    }
}
