//! Account ledger: accounts and their per-token balances.
//!
//! Increase and decrease return the mutated record without saving it, the caller
//! stamps provenance and saves.

use bigdecimal::BigDecimal;
use primitive_types::H160;
use tally_common::address_to_hex;

use crate::error::LedgerResult;
use crate::model::{Account, AccountBalance};
use crate::unit_of_work::UnitOfWork;

pub fn get_or_create_account(uow: &UnitOfWork<'_>, address: H160) -> LedgerResult<Account> {
    match uow.load_account(address)? {
        Some(account) => Ok(account),
        None => Ok(Account::new(address)),
    }
}

fn get_or_create_balance(
    uow: &UnitOfWork<'_>,
    account: H160,
    token: H160,
) -> LedgerResult<AccountBalance> {
    Ok(uow
        .load_balance(account, token)?
        .unwrap_or_else(|| AccountBalance::new(account, token)))
}

pub fn increase_account_balance(
    uow: &UnitOfWork<'_>,
    account: &Account,
    token: H160,
    amount: &BigDecimal,
) -> LedgerResult<AccountBalance> {
    let mut balance = get_or_create_balance(uow, account.address, token)?;
    balance.balance += amount;
    Ok(balance)
}

/// Balances may go negative (transfers out of accounts funded before indexing
/// started). That is reported, not rejected.
pub fn decrease_account_balance(
    uow: &UnitOfWork<'_>,
    account: &Account,
    token: H160,
    amount: &BigDecimal,
) -> LedgerResult<AccountBalance> {
    let mut balance = get_or_create_balance(uow, account.address, token)?;
    balance.balance -= amount;

    if balance.is_negative() {
        tracing::warn!(
            target: "tally_erc20::ledger",
            account = %address_to_hex(account.address),
            token = %address_to_hex(token),
            balance = %balance.balance,
            "Balance went negative"
        );
        metrics::counter!("tally_negative_balances_total").increment(1);
    }

    Ok(balance)
}
