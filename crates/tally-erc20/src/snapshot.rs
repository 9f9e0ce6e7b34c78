//! Snapshot log: append-only history of balance changes.

use crate::model::{AccountBalance, NewSnapshot, Provenance};
use crate::unit_of_work::UnitOfWork;

/// Appends a snapshot of `balance` as it stands after the event at `provenance`.
pub fn save_account_balance_snapshot(
    uow: &mut UnitOfWork<'_>,
    balance: &AccountBalance,
    provenance: &Provenance,
) {
    uow.append_snapshot(NewSnapshot {
        account: balance.account,
        token: balance.token,
        balance: balance.balance.clone(),
        provenance: *provenance,
    });
}
