//! Conversions between rows and domain values.

use chrono::{DateTime, Utc};
use sea_orm::ActiveValue::Set;
use sea_orm::prelude::DateTimeWithTimeZone;
use tally_core::ledger::{
    Account, BalanceView, Direction, Entry, EntryRecord, EntryStatus, Ledger, NormalBalance, Transaction,
    TransactionRecord, TransactionStatus,
};
use tally_core::settlement::{Settlement, SettlementRecord, SettlementStatus};
use tally_shared::types::{
    AccountId, Currency, EntryId, LedgerId, OrganizationId, SettlementId, TransactionId,
};

use crate::entities::{accounts, entries, ledgers, settlements, transactions};
use crate::error::corrupt;
use tally_core::LedgerError;

pub(crate) fn to_db(at: DateTime<Utc>) -> DateTimeWithTimeZone {
    at.fixed_offset()
}

pub(crate) fn from_db(at: DateTimeWithTimeZone) -> DateTime<Utc> {
    at.with_timezone(&Utc)
}

fn currency(code: &str, exponent: i16) -> Result<Currency, LedgerError> {
    let exponent = u8::try_from(exponent).map_err(|e| corrupt("currency exponent", e))?;
    Currency::new(code, exponent).map_err(|e| corrupt("currency", e))
}

fn exponent(currency: &Currency) -> i16 {
    i16::from(currency.exponent())
}

pub(crate) fn ledger_from_model(model: ledgers::Model) -> Result<Ledger, LedgerError> {
    Ok(Ledger {
        id: LedgerId::from_uuid(model.id),
        organization_id: OrganizationId::from_uuid(model.organization_id),
        currency: currency(&model.currency_code, model.currency_exponent)?,
        name: model.name,
        metadata: model.metadata,
        created_at: from_db(model.created_at),
    })
}

pub(crate) fn ledger_active(ledger: &Ledger) -> ledgers::ActiveModel {
    ledgers::ActiveModel {
        id: Set(ledger.id.into_inner()),
        organization_id: Set(ledger.organization_id.into_inner()),
        name: Set(ledger.name.clone()),
        currency_code: Set(ledger.currency.code().to_string()),
        currency_exponent: Set(exponent(&ledger.currency)),
        metadata: Set(ledger.metadata.clone()),
        created_at: Set(to_db(ledger.created_at)),
    }
}

pub(crate) fn account_from_model(model: accounts::Model) -> Result<Account, LedgerError> {
    let normal_balance = model
        .normal_balance
        .parse::<NormalBalance>()
        .map_err(|e| corrupt(format!("account {}", model.id), e))?;
    Ok(Account {
        id: AccountId::from_uuid(model.id),
        organization_id: OrganizationId::from_uuid(model.organization_id),
        ledger_id: LedgerId::from_uuid(model.ledger_id),
        name: model.name,
        normal_balance,
        pending: BalanceView {
            amount: model.pending_amount,
            credits: model.pending_credits,
            debits: model.pending_debits,
        },
        posted: BalanceView {
            amount: model.posted_amount,
            credits: model.posted_credits,
            debits: model.posted_debits,
        },
        available: BalanceView {
            amount: model.available_amount,
            credits: model.available_credits,
            debits: model.available_debits,
        },
        lock_version: model.lock_version,
        metadata: model.metadata,
        created_at: from_db(model.created_at),
        updated_at: from_db(model.updated_at),
    })
}

pub(crate) fn account_active(account: &Account) -> accounts::ActiveModel {
    accounts::ActiveModel {
        id: Set(account.id.into_inner()),
        organization_id: Set(account.organization_id.into_inner()),
        ledger_id: Set(account.ledger_id.into_inner()),
        name: Set(account.name.clone()),
        normal_balance: Set(account.normal_balance.as_str().to_string()),
        pending_amount: Set(account.pending.amount),
        pending_credits: Set(account.pending.credits),
        pending_debits: Set(account.pending.debits),
        posted_amount: Set(account.posted.amount),
        posted_credits: Set(account.posted.credits),
        posted_debits: Set(account.posted.debits),
        available_amount: Set(account.available.amount),
        available_credits: Set(account.available.credits),
        available_debits: Set(account.available.debits),
        lock_version: Set(account.lock_version),
        metadata: Set(account.metadata.clone()),
        created_at: Set(to_db(account.created_at)),
        updated_at: Set(to_db(account.updated_at)),
    }
}

pub(crate) fn entry_record(model: entries::Model, currency: &Currency) -> Result<EntryRecord, LedgerError> {
    let what = || format!("entry {}", model.id);
    if model.currency_code != currency.code() {
        return Err(corrupt(what(), format!("currency {}", model.currency_code)));
    }
    let direction = model.direction.parse::<Direction>().map_err(|e| corrupt(what(), e))?;
    let status = EntryStatus::parse(&model.status).ok_or_else(|| corrupt(what(), &model.status))?;
    Ok(EntryRecord {
        id: EntryId::from_uuid(model.id),
        transaction_id: TransactionId::from_uuid(model.transaction_id),
        account_id: AccountId::from_uuid(model.account_id),
        direction,
        amount: model.amount,
        currency: currency.clone(),
        status,
        metadata: model.metadata,
        posted_at: model.posted_at.map(from_db),
    })
}

pub(crate) fn entry_from_model(model: entries::Model, currency: &Currency) -> Result<Entry, LedgerError> {
    entry_record(model, currency).map(Entry::from_record)
}

/// Rebuilds a transaction from its row and its entry rows in position order.
pub(crate) fn transaction_from_models(
    model: transactions::Model,
    entry_models: Vec<entries::Model>,
) -> Result<Transaction, LedgerError> {
    let what = format!("transaction {}", model.id);
    let currency = currency(&model.currency_code, model.currency_exponent)?;
    let status = TransactionStatus::parse(&model.status).ok_or_else(|| corrupt(&what, &model.status))?;
    let entries = entry_models
        .into_iter()
        .map(|entry| entry_record(entry, &currency))
        .collect::<Result<Vec<_>, _>>()?;

    let record = TransactionRecord {
        id: TransactionId::from_uuid(model.id),
        organization_id: OrganizationId::from_uuid(model.organization_id),
        ledger_id: LedgerId::from_uuid(model.ledger_id),
        currency,
        status,
        entries,
        description: model.description,
        effective_at: from_db(model.effective_at),
        idempotency_key: model.idempotency_key,
        metadata: model.metadata,
        created_at: from_db(model.created_at),
        updated_at: from_db(model.updated_at),
        posted_at: model.posted_at.map(from_db),
        archived_at: model.archived_at.map(from_db),
    };
    Transaction::restore(record).map_err(|e| corrupt(what, e))
}

pub(crate) fn transaction_active(transaction: &Transaction) -> transactions::ActiveModel {
    transactions::ActiveModel {
        id: Set(transaction.id().into_inner()),
        organization_id: Set(transaction.organization_id().into_inner()),
        ledger_id: Set(transaction.ledger_id().into_inner()),
        status: Set(transaction.status().as_str().to_string()),
        amount: Set(transaction.total_amount()),
        currency_code: Set(transaction.currency().code().to_string()),
        currency_exponent: Set(exponent(transaction.currency())),
        description: Set(transaction.description().map(str::to_string)),
        effective_at: Set(to_db(transaction.effective_at())),
        idempotency_key: Set(transaction.idempotency_key().map(str::to_string)),
        metadata: Set(transaction.metadata().cloned()),
        created_at: Set(to_db(transaction.created_at())),
        updated_at: Set(to_db(transaction.updated_at())),
        posted_at: Set(transaction.posted_at().map(to_db)),
        archived_at: Set(transaction.archived_at().map(to_db)),
    }
}

pub(crate) fn entry_active(transaction: &Transaction, entry: &Entry, position: i32) -> entries::ActiveModel {
    entries::ActiveModel {
        id: Set(entry.id().into_inner()),
        transaction_id: Set(transaction.id().into_inner()),
        organization_id: Set(transaction.organization_id().into_inner()),
        ledger_id: Set(transaction.ledger_id().into_inner()),
        account_id: Set(entry.account_id().into_inner()),
        position: Set(position),
        direction: Set(entry.direction().as_str().to_string()),
        amount: Set(entry.amount()),
        currency_code: Set(entry.currency().code().to_string()),
        status: Set(entry.status().as_str().to_string()),
        metadata: Set(entry.metadata().cloned()),
        posted_at: Set(entry.posted_at().map(to_db)),
        created_at: Set(to_db(transaction.created_at())),
    }
}

pub(crate) fn settlement_from_model(model: settlements::Model) -> Result<Settlement, LedgerError> {
    let what = format!("settlement {}", model.id);
    let status = SettlementStatus::parse(&model.status).ok_or_else(|| corrupt(&what, &model.status))?;
    let record = SettlementRecord {
        id: SettlementId::from_uuid(model.id),
        organization_id: OrganizationId::from_uuid(model.organization_id),
        ledger_id: LedgerId::from_uuid(model.ledger_id),
        settled_account_id: AccountId::from_uuid(model.settled_account_id),
        contra_account_id: AccountId::from_uuid(model.contra_account_id),
        status,
        amount: model.amount,
        transaction_id: model.transaction_id.map(TransactionId::from_uuid),
        description: model.description,
        metadata: model.metadata,
        created_at: from_db(model.created_at),
        updated_at: from_db(model.updated_at),
    };
    Settlement::restore(record).map_err(|e| corrupt(what, e))
}

pub(crate) fn settlement_active(settlement: &Settlement) -> settlements::ActiveModel {
    let record = settlement.to_record();
    settlements::ActiveModel {
        id: Set(record.id.into_inner()),
        organization_id: Set(record.organization_id.into_inner()),
        ledger_id: Set(record.ledger_id.into_inner()),
        settled_account_id: Set(record.settled_account_id.into_inner()),
        contra_account_id: Set(record.contra_account_id.into_inner()),
        status: Set(record.status.as_str().to_string()),
        amount: Set(record.amount),
        transaction_id: Set(record.transaction_id.map(TransactionId::into_inner)),
        description: Set(record.description),
        metadata: Set(record.metadata),
        created_at: Set(to_db(record.created_at)),
        updated_at: Set(to_db(record.updated_at)),
    }
}
