//! Candidate selection.

use crate::Account;

/// Pick the active account with the earliest `next_poll_at`.
///
/// Ties go to the smallest id, so the same input always yields the same
/// account. Inactive accounts are skipped. Linear in the number of accounts.
pub fn select_next<'a, I>(accounts: I) -> Option<&'a Account>
where
    I: IntoIterator<Item = &'a Account>,
{
    accounts
        .into_iter()
        .filter(|a| a.active)
        .min_by_key(|a| (a.next_poll_at, a.id))
}
