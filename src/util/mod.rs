pub mod env;
pub mod retry;
pub mod telemetry;

/// Compares two `&str`s without short-circuiting on the first differing byte, so the time taken
/// doesn't leak how much of the gateway token a caller got right
pub fn constant_time_cmp(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let diff = a
        .as_bytes()
        .iter()
        .zip(b.as_bytes())
        .fold(0u8, |acc, (l, r)| {
            acc | (std::hint::black_box(*l) ^ std::hint::black_box(*r))
        });

    std::hint::black_box(diff) == 0
}
