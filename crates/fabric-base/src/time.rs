/// Current wall-clock time as milliseconds since the Unix epoch.
///
/// Centralized so tests and the `lastModifiedMillis` invariants in
/// `fabric-model` have a single seam to reason about.
pub fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_non_decreasing_across_calls() {
        let a = now_millis();
        let b = now_millis();
        assert!(b >= a);
    }
}
