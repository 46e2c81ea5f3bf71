//! Client-side request pacing shared by the HTTP backends

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;

pub(crate) type SharedRateLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

/// Build a per-minute limiter, or none when `rpm` is unset or zero.
pub(crate) fn per_minute(rpm: Option<u32>) -> Option<SharedRateLimiter> {
    let rpm = NonZeroU32::new(rpm?)?;
    Some(Arc::new(RateLimiter::direct(Quota::per_minute(rpm))))
}
