use crate::error::{Error, Result};

/// The maximum TTL the fabric will accept on any keyed entry (§4.2, §7).
pub const MAX_TTL_MILLIS: u64 = 7 * 24 * 60 * 60 * 1000;

/// A validated time-to-live, bounded at construction so call sites never
/// need to re-check the 7-day ceiling.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Ttl(std::time::Duration);

impl Ttl {
    pub fn from_millis(millis: u64) -> Result<Self> {
        if millis > MAX_TTL_MILLIS {
            return Err(Error::InvalidTtl {
                requested_millis: millis,
                max_millis: MAX_TTL_MILLIS,
            });
        }
        Ok(Self(std::time::Duration::from_millis(millis)))
    }

    pub fn from_duration(duration: std::time::Duration) -> Result<Self> {
        Self::from_millis(duration.as_millis() as u64)
    }

    pub fn as_duration(&self) -> std::time::Duration {
        self.0
    }

    pub fn as_millis(&self) -> u64 {
        self.0.as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_exactly_seven_days() {
        assert!(Ttl::from_millis(MAX_TTL_MILLIS).is_ok());
    }

    #[test]
    fn rejects_seven_days_plus_one_millisecond() {
        let err = Ttl::from_millis(MAX_TTL_MILLIS + 1).unwrap_err();
        assert!(matches!(err, Error::InvalidTtl { .. }));
    }
}
