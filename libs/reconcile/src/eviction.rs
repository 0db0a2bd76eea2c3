//! Choosing which subscriptions to drop when capacity shrinks.
//!
//! Selection is by registration order, newest first. Subscriptions bound to
//! the lost pod go before anything else of the same type.

use crate::model::Subscription;

/// Remove up to `count` subscriptions of `service_type`, preferring those on `pod_ip`.
///
/// Subscriptions on `pod_ip` are taken from the end of the list first. If that
/// is not enough, the rest are taken from the other subscriptions of the type,
/// again newest first. Returns the removed subscriptions in eviction order.
pub fn evict(
    subscriptions: &mut Vec<Subscription>,
    service_type: &str,
    pod_ip: &str,
    count: usize,
) -> Vec<Subscription> {
    let mut evicted = take_newest(subscriptions, count, |s| {
        s.service_type == service_type && s.pod_ip == pod_ip
    });
    let missing = count - evicted.len();
    if missing > 0 {
        evicted.extend(take_newest(subscriptions, missing, |s| s.service_type == service_type));
    }
    evicted
}

fn take_newest<F>(subscriptions: &mut Vec<Subscription>, count: usize, matches: F) -> Vec<Subscription>
where
    F: Fn(&Subscription) -> bool,
{
    let mut taken = Vec::new();
    let mut idx = subscriptions.len();
    while idx > 0 && taken.len() < count {
        idx -= 1;
        if matches(&subscriptions[idx]) {
            taken.push(subscriptions.remove(idx));
        }
    }
    taken
}
