//! Priority ordering of credentials.
//!
//! Declared ranks give the default order: lower ranks are tried first and a
//! stable sort keeps declaration order between equal ranks. An explicit
//! priority list (the `provider_priority_order` option) then pins the ids it
//! names to the front, in list order. Credentials it does not name keep
//! their rank order behind them.

use super::ProviderCredential;

/// Trait for things that carry a credential id and a rank, so the ordering
/// helpers can be exercised without real adapters.
pub(crate) trait Ranked {
    fn id(&self) -> &str;
    fn rank(&self) -> u32;
}

impl Ranked for ProviderCredential {
    fn id(&self) -> &str {
        ProviderCredential::id(self).as_str()
    }

    fn rank(&self) -> u32 {
        ProviderCredential::rank(self)
    }
}

/// Sort `items` into the order they should be tried.
pub(crate) fn apply_priority_order<T: Ranked>(items: &mut [T], order: &[String]) {
    // `sort_by_key` is stable: equal keys keep declaration order.
    items.sort_by_key(|item| {
        match order.iter().position(|id| id == item.id()) {
            Some(pos) => (0, pos as u64),
            None => (1, u64::from(item.rank())),
        }
    });
}
