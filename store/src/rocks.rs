//! `RocksDB` storage implementation.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, IteratorMode, MultiThreaded,
    Options, WriteBatch,
};

use tally_core::{
    Balance, BillingMonth, DeductEvent, EntryId, FreeQuota, LedgerEntry, OrderStatus,
    RechargeOrder, UserId,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::{DeductOutcome, DeductRequest, LedgerStats, RechargeSettlement, Store, TimeRange};

type RowLock = Arc<Mutex<()>>;
type RowGuard = ArcMutexGuard<RawMutex, ()>;

/// RocksDB-backed storage implementation.
///
/// Compound operations serialize through a per-row lock table and commit via
/// a single `WriteBatch`, so readers never observe a half-applied deduction
/// or settlement.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
    locks: Mutex<HashMap<String, RowLock>>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(Self {
            db: Arc::new(db),
            locks: Mutex::new(HashMap::new()),
        })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Fetch the lock guarding one logical row set.
    fn row_lock(&self, key: &str) -> RowLock {
        let mut table = self.locks.lock();
        table
            .entry(key.to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Lock a set of users in sorted order (deadlock-free for multi-user
    /// batches).
    fn lock_users_sorted(&self, users: &BTreeSet<String>) -> Vec<RowGuard> {
        users
            .iter()
            .map(|user| self.row_lock(user).lock_arc())
            .collect()
    }

    fn get_cf_value<T: serde::de::DeserializeOwned>(
        &self,
        cf_name: &str,
        key: &[u8],
    ) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        self.db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    /// Append one ledger entry (row + user index) to a batch.
    fn batch_ledger_entry(&self, batch: &mut WriteBatch, entry: &LedgerEntry) -> Result<()> {
        let cf_ledger = self.cf(cf::LEDGER)?;
        let cf_index = self.cf(cf::LEDGER_BY_USER)?;
        let value = Self::serialize(entry)?;
        batch.put_cf(&cf_ledger, keys::ledger_key(&entry.entry_id), &value);
        batch.put_cf(
            &cf_index,
            keys::user_ledger_key(&entry.user_id, &entry.entry_id),
            [],
        );
        Ok(())
    }

    /// Collect one user's ledger index keys, oldest first.
    fn user_ledger_keys(&self, user_id: &UserId) -> Result<Vec<Vec<u8>>> {
        let cf_index = self.cf(cf::LEDGER_BY_USER)?;
        let prefix = keys::user_ledger_prefix(user_id);

        let iter = self.db.iterator_cf(
            &cf_index,
            IteratorMode::From(&prefix, rocksdb::Direction::Forward),
        );

        let mut all_keys = Vec::new();
        for item in iter {
            let (key, _) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if !key.starts_with(&prefix) {
                break;
            }
            all_keys.push(key.to_vec());
        }
        Ok(all_keys)
    }

    fn get_ledger_entry(&self, entry_id: &EntryId) -> Result<Option<LedgerEntry>> {
        self.get_cf_value(cf::LEDGER, &keys::ledger_key(entry_id))
    }

    /// Fold one ledger entry into a stats accumulator.
    fn fold_stats(stats: &mut LedgerStats, entry: &LedgerEntry) {
        stats.total_count += entry.count;
        match entry.kind {
            tally_core::LedgerKind::Free => stats.free_count += entry.count,
            tally_core::LedgerKind::Balance => {
                stats.paid_count += entry.count;
                stats.total_cost_cents += entry.amount_cents;
            }
        }
    }
}

/// Split a requested count across remaining free quota and balance.
///
/// `balance_deducted = cost * balance_count / count`, exact in cents because
/// `cost` is `unit_price * count`.
fn split_count(remaining: i64, count: i64, cost_cents: i64) -> (i64, i64, i64) {
    if count <= 0 {
        return (0, 0, 0);
    }
    let free_used = remaining.clamp(0, count);
    let balance_count = count - free_used;
    #[allow(clippy::cast_possible_truncation)]
    let balance_deducted =
        (i128::from(cost_cents) * i128::from(balance_count) / i128::from(count)) as i64;
    (free_used, balance_count, balance_deducted)
}

impl Store for RocksStore {
    fn get_balance(&self, user_id: &UserId) -> Result<Option<Balance>> {
        self.get_cf_value(cf::BALANCES, &keys::balance_key(user_id))
    }

    fn get_quota(
        &self,
        user_id: &UserId,
        service_name: &str,
        month: &BillingMonth,
    ) -> Result<Option<FreeQuota>> {
        self.get_cf_value(cf::QUOTAS, &keys::quota_key(user_id, service_name, month))
    }

    fn create_quota(&self, quota: &FreeQuota) -> Result<()> {
        let lock = self.row_lock(quota.user_id.as_str());
        let _guard = lock.lock();

        let key = keys::quota_key(&quota.user_id, &quota.service_name, &quota.reset_month);
        let cf = self.cf(cf::QUOTAS)?;

        if self
            .db
            .get_cf(&cf, &key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .is_some()
        {
            return Err(StoreError::Duplicate {
                entity: "free_quota",
                id: format!(
                    "{}/{}/{}",
                    quota.user_id, quota.service_name, quota.reset_month
                ),
            });
        }

        let value = Self::serialize(quota)?;
        self.db
            .put_cf(&cf, key, value)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn deduct(&self, request: &DeductRequest) -> Result<DeductOutcome> {
        let lock = self.row_lock(request.user_id.as_str());
        let _guard = lock.lock();

        let now = Utc::now();
        let quota_key = keys::quota_key(&request.user_id, &request.service_name, &request.month);
        let quota: Option<FreeQuota> = self.get_cf_value(cf::QUOTAS, &quota_key)?;

        let remaining = quota.as_ref().map_or(0, FreeQuota::remaining);
        let (free_used, balance_count, balance_deducted) =
            split_count(remaining, request.count, request.cost_cents);

        let mut batch = WriteBatch::default();
        let mut quota_remaining = None;
        let mut balance_cents = None;

        if free_used > 0 {
            let mut quota = quota.ok_or(StoreError::Database(
                "quota row vanished under lock".to_owned(),
            ))?;
            quota.used_quota += free_used;
            quota_remaining = Some(quota.remaining());
            batch.put_cf(&self.cf(cf::QUOTAS)?, &quota_key, Self::serialize(&quota)?);
        }

        if balance_count > 0 {
            let balance_key = keys::balance_key(&request.user_id);
            let balance: Option<Balance> = self.get_cf_value(cf::BALANCES, &balance_key)?;

            let Some(mut balance) = balance else {
                // First deduction attempt for this user: materialize the row
                // at zero, then reject the charge.
                let zero = Balance::zero(request.user_id.clone());
                self.db
                    .put_cf(
                        &self.cf(cf::BALANCES)?,
                        &balance_key,
                        Self::serialize(&zero)?,
                    )
                    .map_err(|e| StoreError::Database(e.to_string()))?;
                return Err(StoreError::InsufficientBalance {
                    balance_cents: 0,
                    required_cents: balance_deducted,
                });
            };

            if balance.balance_cents < balance_deducted {
                return Err(StoreError::InsufficientBalance {
                    balance_cents: balance.balance_cents,
                    required_cents: balance_deducted,
                });
            }

            balance.balance_cents -= balance_deducted;
            balance.updated_at = now;
            balance_cents = Some(balance.balance_cents);
            batch.put_cf(
                &self.cf(cf::BALANCES)?,
                &balance_key,
                Self::serialize(&balance)?,
            );
        }

        // Ledger append. The minted id goes to the BALANCE entry when one
        // exists; a mixed deduction's FREE entry gets its own id.
        let minted = EntryId::generate();
        if free_used > 0 {
            let free_id = if balance_count > 0 {
                EntryId::generate()
            } else {
                minted
            };
            let entry = LedgerEntry::free(
                free_id,
                request.user_id.clone(),
                request.service_name.clone(),
                free_used,
                now,
            );
            self.batch_ledger_entry(&mut batch, &entry)?;
        }
        if balance_count > 0 {
            let entry = LedgerEntry::balance(
                minted,
                request.user_id.clone(),
                request.service_name.clone(),
                balance_deducted,
                balance_count,
                now,
            );
            self.batch_ledger_entry(&mut batch, &entry)?;
        }

        self.write(batch)?;

        Ok(DeductOutcome {
            entry_id: minted,
            free_count: free_used,
            paid_count: balance_count,
            balance_deducted_cents: balance_deducted,
            quota_remaining,
            balance_cents,
        })
    }

    fn apply_deduct_events(&self, events: &[DeductEvent]) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }

        let users: BTreeSet<String> = events
            .iter()
            .map(|e| e.user_id.as_str().to_owned())
            .collect();
        let _guards = self.lock_users_sorted(&users);

        // Accumulate row mutations first so several events against the same
        // tuple fold additively, then commit everything in one batch.
        let mut quotas: BTreeMap<Vec<u8>, FreeQuota> = BTreeMap::new();
        let mut balances: BTreeMap<Vec<u8>, Balance> = BTreeMap::new();
        let mut entries: Vec<LedgerEntry> = Vec::new();

        for event in events {
            if event.free_count > 0 {
                let key = keys::quota_key(&event.user_id, &event.service_name, &event.month);
                let quota = match quotas.entry(key) {
                    Entry::Occupied(entry) => entry.into_mut(),
                    Entry::Vacant(entry) => {
                        let loaded: FreeQuota = self
                            .get_cf_value(cf::QUOTAS, entry.key())?
                            .ok_or(StoreError::NotFound {
                                entity: "free_quota",
                                id: format!(
                                    "{}/{}/{}",
                                    event.user_id, event.service_name, event.month
                                ),
                            })?;
                        entry.insert(loaded)
                    }
                };
                quota.used_quota += event.free_count;
            }

            if event.balance_deducted_cents > 0 {
                let key = keys::balance_key(&event.user_id);
                let balance = match balances.entry(key) {
                    Entry::Occupied(entry) => entry.into_mut(),
                    Entry::Vacant(entry) => {
                        let loaded: Balance = self
                            .get_cf_value(cf::BALANCES, entry.key())?
                            .ok_or(StoreError::NotFound {
                                entity: "balance",
                                id: event.user_id.to_string(),
                            })?;
                        entry.insert(loaded)
                    }
                };
                balance.balance_cents -= event.balance_deducted_cents;
                balance.updated_at = event.deduct_time;
            }

            // Same id rule as the slow path: the event's id lands on the
            // BALANCE entry when one exists, else on the FREE entry.
            if event.free_count > 0 {
                let free_id = if event.paid_count > 0 {
                    EntryId::generate()
                } else {
                    event.entry_id
                };
                entries.push(LedgerEntry::free(
                    free_id,
                    event.user_id.clone(),
                    event.service_name.clone(),
                    event.free_count,
                    event.deduct_time,
                ));
            }
            if event.paid_count > 0 {
                entries.push(LedgerEntry::balance(
                    event.entry_id,
                    event.user_id.clone(),
                    event.service_name.clone(),
                    event.balance_deducted_cents,
                    event.paid_count,
                    event.deduct_time,
                ));
            }
        }

        let mut batch = WriteBatch::default();
        for (key, quota) in &quotas {
            batch.put_cf(&self.cf(cf::QUOTAS)?, key, Self::serialize(quota)?);
        }
        for (key, balance) in &balances {
            batch.put_cf(&self.cf(cf::BALANCES)?, key, Self::serialize(balance)?);
        }
        for entry in &entries {
            self.batch_ledger_entry(&mut batch, entry)?;
        }
        self.write(batch)
    }

    fn list_ledger(
        &self,
        user_id: &UserId,
        page: u64,
        page_size: u64,
    ) -> Result<(Vec<LedgerEntry>, u64)> {
        let mut all_keys = self.user_ledger_keys(user_id)?;
        all_keys.reverse(); // newest first

        let total = all_keys.len() as u64;
        let offset = page.saturating_sub(1).saturating_mul(page_size);

        let mut entries = Vec::new();
        for key in all_keys
            .into_iter()
            .skip(usize::try_from(offset).unwrap_or(usize::MAX))
            .take(usize::try_from(page_size).unwrap_or(usize::MAX))
        {
            let entry_id = keys::extract_entry_id(&key);
            if let Some(entry) = self.get_ledger_entry(&entry_id)? {
                entries.push(entry);
            }
        }

        Ok((entries, total))
    }

    fn create_order(&self, order: &RechargeOrder) -> Result<()> {
        let lock = self.row_lock(&order.order_id);
        let _guard = lock.lock();

        let key = keys::order_key(&order.order_id);
        let cf = self.cf(cf::ORDERS)?;

        if self
            .db
            .get_cf(&cf, &key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .is_some()
        {
            return Err(StoreError::Duplicate {
                entity: "recharge_order",
                id: order.order_id.clone(),
            });
        }

        let value = Self::serialize(order)?;
        self.db
            .put_cf(&cf, key, value)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn get_order(&self, order_id: &str) -> Result<Option<RechargeOrder>> {
        self.get_cf_value(cf::ORDERS, &keys::order_key(order_id))
    }

    fn get_order_by_payment(&self, payment_id: &str) -> Result<Option<RechargeOrder>> {
        let cf_index = self.cf(cf::ORDERS_BY_PAYMENT)?;
        let Some(order_id) = self
            .db
            .get_cf(&cf_index, keys::payment_index_key(payment_id))
            .map_err(|e| StoreError::Database(e.to_string()))?
        else {
            return Ok(None);
        };
        let order_id = String::from_utf8(order_id)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.get_order(&order_id)
    }

    fn settle_recharge(
        &self,
        order_id: &str,
        payment_id: &str,
        amount_cents: i64,
    ) -> Result<RechargeSettlement> {
        let order_lock = self.row_lock(order_id);
        let _order_guard = order_lock.lock();

        let mut order = self.get_order(order_id)?.ok_or(StoreError::NotFound {
            entity: "recharge_order",
            id: order_id.to_owned(),
        })?;

        // Re-check under the lock: a racing callback may have won.
        if order.status == OrderStatus::Success {
            let balance_cents = self
                .get_balance(&order.user_id)?
                .map_or(0, |b| b.balance_cents);
            return Ok(RechargeSettlement {
                user_id: order.user_id,
                balance_cents,
                already_settled: true,
            });
        }

        let user_lock = self.row_lock(order.user_id.as_str());
        let _user_guard = user_lock.lock();

        let now = Utc::now();
        order.payment_id = Some(payment_id.to_owned());
        order.status = OrderStatus::Success;
        order.updated_at = now;

        let balance_key = keys::balance_key(&order.user_id);
        let mut balance = self
            .get_cf_value::<Balance>(cf::BALANCES, &balance_key)?
            .unwrap_or_else(|| Balance::zero(order.user_id.clone()));
        balance.balance_cents += amount_cents;
        balance.updated_at = now;

        let mut batch = WriteBatch::default();
        batch.put_cf(
            &self.cf(cf::ORDERS)?,
            keys::order_key(order_id),
            Self::serialize(&order)?,
        );
        batch.put_cf(
            &self.cf(cf::ORDERS_BY_PAYMENT)?,
            keys::payment_index_key(payment_id),
            order_id.as_bytes(),
        );
        batch.put_cf(&self.cf(cf::BALANCES)?, &balance_key, Self::serialize(&balance)?);
        self.write(batch)?;

        Ok(RechargeSettlement {
            user_id: order.user_id,
            balance_cents: balance.balance_cents,
            already_settled: false,
        })
    }

    fn ledger_stats(
        &self,
        user_id: &UserId,
        service_name: Option<&str>,
        range: &TimeRange,
    ) -> Result<LedgerStats> {
        let mut stats = LedgerStats::default();
        for key in self.user_ledger_keys(user_id)? {
            let entry_id = keys::extract_entry_id(&key);
            let Some(entry) = self.get_ledger_entry(&entry_id)? else {
                continue;
            };
            if !range.contains(entry.created_at) {
                continue;
            }
            if let Some(service) = service_name {
                if entry.service_name != service {
                    continue;
                }
            }
            Self::fold_stats(&mut stats, &entry);
        }
        Ok(stats)
    }

    fn ledger_stats_by_service(
        &self,
        user_id: &UserId,
        range: &TimeRange,
    ) -> Result<Vec<(String, LedgerStats)>> {
        let mut grouped: BTreeMap<String, LedgerStats> = BTreeMap::new();
        for key in self.user_ledger_keys(user_id)? {
            let entry_id = keys::extract_entry_id(&key);
            let Some(entry) = self.get_ledger_entry(&entry_id)? else {
                continue;
            };
            if !range.contains(entry.created_at) {
                continue;
            }
            let stats = grouped.entry(entry.service_name.clone()).or_default();
            Self::fold_stats(stats, &entry);
        }
        Ok(grouped.into_iter().collect())
    }

    fn distinct_user_ids(&self) -> Result<Vec<UserId>> {
        let mut users: BTreeSet<Vec<u8>> = BTreeSet::new();

        let cf_balances = self.cf(cf::BALANCES)?;
        for item in self.db.iterator_cf(&cf_balances, IteratorMode::Start) {
            let (key, _) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            users.insert(key.to_vec());
        }

        let cf_quotas = self.cf(cf::QUOTAS)?;
        for item in self.db.iterator_cf(&cf_quotas, IteratorMode::Start) {
            let (key, _) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if let Some(user) = keys::quota_key_user(&key) {
                users.insert(user.to_vec());
            }
        }

        users
            .into_iter()
            .map(|raw| {
                let raw = String::from_utf8(raw)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                UserId::new(raw).map_err(|e| StoreError::Serialization(e.to_string()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;
    use tally_core::LedgerKind;

    fn create_test_store() -> (RocksStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        (store, dir)
    }

    fn user(raw: &str) -> UserId {
        UserId::new(raw).unwrap()
    }

    fn month() -> BillingMonth {
        "2025-01".parse().unwrap()
    }

    fn seed_quota(store: &RocksStore, u: &UserId, service: &str, total: i64) {
        store
            .create_quota(&FreeQuota::fresh(u.clone(), service, total, month()))
            .unwrap();
    }

    fn seed_balance(store: &RocksStore, u: &UserId, cents: i64) {
        // Seed through a settled recharge so the row goes through the public
        // surface.
        store
            .create_order(&RechargeOrder::pending(
                format!("recharge_{u}_1700000000"),
                u.clone(),
                cents,
            ))
            .unwrap();
        store
            .settle_recharge(&format!("recharge_{u}_1700000000"), "pay_seed", cents)
            .unwrap();
    }

    fn deduct_request(u: &UserId, service: &str, count: i64, cost: i64) -> DeductRequest {
        DeductRequest {
            user_id: u.clone(),
            service_name: service.to_owned(),
            count,
            cost_cents: cost,
            month: month(),
        }
    }

    fn full_range() -> TimeRange {
        TimeRange {
            start: Utc::now() - Duration::hours(1),
            end: Utc::now() + Duration::hours(1),
        }
    }

    #[test]
    fn quota_create_is_unique_per_tuple() {
        let (store, _dir) = create_test_store();
        let u = user("u1");
        seed_quota(&store, &u, "asr", 100);

        let err = store
            .create_quota(&FreeQuota::fresh(u.clone(), "asr", 100, month()))
            .unwrap_err();
        assert!(err.is_duplicate());

        // Same user, different service is fine.
        seed_quota(&store, &u, "tts", 10);
        let q = store.get_quota(&u, "asr", &month()).unwrap().unwrap();
        assert_eq!(q.total_quota, 100);
    }

    #[test]
    fn pure_free_deduct_writes_one_free_entry() {
        let (store, _dir) = create_test_store();
        let u = user("u1");
        seed_quota(&store, &u, "asr", 100);

        let outcome = store.deduct(&deduct_request(&u, "asr", 30, 0)).unwrap();
        assert_eq!(outcome.free_count, 30);
        assert_eq!(outcome.paid_count, 0);
        assert_eq!(outcome.quota_remaining, Some(70));
        assert_eq!(outcome.balance_cents, None);

        let quota = store.get_quota(&u, "asr", &month()).unwrap().unwrap();
        assert_eq!(quota.used_quota, 30);

        let (entries, total) = store.list_ledger(&u, 1, 10).unwrap();
        assert_eq!(total, 1);
        assert_eq!(entries[0].kind, LedgerKind::Free);
        assert_eq!(entries[0].count, 30);
        assert_eq!(entries[0].amount_cents, 0);
        assert_eq!(entries[0].entry_id, outcome.entry_id);
    }

    #[test]
    fn mixed_deduct_returns_balance_entry_id() {
        let (store, _dir) = create_test_store();
        let u = user("u1");
        seed_quota(&store, &u, "tts", 10);
        seed_balance(&store, &u, 100);

        // unit price 2 cents, count 15 => cost 30; free 10, paid 5, 10 cents.
        let outcome = store.deduct(&deduct_request(&u, "tts", 15, 30)).unwrap();
        assert_eq!(outcome.free_count, 10);
        assert_eq!(outcome.paid_count, 5);
        assert_eq!(outcome.balance_deducted_cents, 10);
        assert_eq!(outcome.quota_remaining, Some(0));
        assert_eq!(outcome.balance_cents, Some(90));

        let (entries, total) = store.list_ledger(&u, 1, 10).unwrap();
        assert_eq!(total, 2);

        let balance_entry = entries
            .iter()
            .find(|e| e.kind == LedgerKind::Balance)
            .unwrap();
        let free_entry = entries.iter().find(|e| e.kind == LedgerKind::Free).unwrap();

        assert_eq!(balance_entry.entry_id, outcome.entry_id);
        assert_ne!(free_entry.entry_id, outcome.entry_id);
        assert_eq!(balance_entry.amount_cents, 10);
        assert_eq!(balance_entry.count, 5);
        assert_eq!(free_entry.count, 10);
    }

    #[test]
    fn insufficient_balance_leaves_no_trace() {
        let (store, _dir) = create_test_store();
        let u = user("u2");
        seed_balance(&store, &u, 5);

        // cost 20 cents over 10 units, no quota row at all.
        let err = store.deduct(&deduct_request(&u, "tts", 10, 20)).unwrap_err();
        assert!(matches!(
            err,
            StoreError::InsufficientBalance {
                balance_cents: 5,
                required_cents: 20
            }
        ));

        let (entries, total) = store.list_ledger(&u, 1, 10).unwrap();
        assert!(entries.is_empty());
        assert_eq!(total, 0);
        let balance = store.get_balance(&u).unwrap().unwrap();
        assert_eq!(balance.balance_cents, 5);
    }

    #[test]
    fn deduct_materializes_zero_balance_row_on_first_touch() {
        let (store, _dir) = create_test_store();
        let u = user("u3");
        assert!(store.get_balance(&u).unwrap().is_none());

        let err = store.deduct(&deduct_request(&u, "tts", 10, 20)).unwrap_err();
        assert!(matches!(err, StoreError::InsufficientBalance { .. }));

        let balance = store.get_balance(&u).unwrap().unwrap();
        assert_eq!(balance.balance_cents, 0);
    }

    #[test]
    fn exact_quota_boundary_succeeds_as_free() {
        let (store, _dir) = create_test_store();
        let u = user("u1");
        seed_quota(&store, &u, "asr", 30);

        let outcome = store.deduct(&deduct_request(&u, "asr", 30, 0)).unwrap();
        assert_eq!(outcome.free_count, 30);
        assert_eq!(outcome.paid_count, 0);
        assert_eq!(outcome.quota_remaining, Some(0));
    }

    #[test]
    fn exact_balance_boundary_succeeds() {
        let (store, _dir) = create_test_store();
        let u = user("u1");
        seed_balance(&store, &u, 20);

        let outcome = store.deduct(&deduct_request(&u, "tts", 10, 20)).unwrap();
        assert_eq!(outcome.paid_count, 10);
        assert_eq!(outcome.balance_cents, Some(0));
    }

    #[test]
    fn apply_events_is_additive_and_order_insensitive() {
        let (store, _dir) = create_test_store();
        let u = user("u1");
        seed_quota(&store, &u, "asr", 100);
        seed_balance(&store, &u, 1_000);

        let make_event = |free, paid, deducted| DeductEvent {
            entry_id: EntryId::generate(),
            user_id: u.clone(),
            service_name: "asr".into(),
            count: free + paid,
            cost_cents: deducted,
            free_count: free,
            paid_count: paid,
            balance_deducted_cents: deducted,
            deduct_time: Utc::now(),
            month: month(),
        };

        // Deliberately unordered deliveries within the batch.
        let events = vec![make_event(0, 5, 50), make_event(30, 0, 0), make_event(20, 0, 0)];
        store.apply_deduct_events(&events).unwrap();

        let quota = store.get_quota(&u, "asr", &month()).unwrap().unwrap();
        assert_eq!(quota.used_quota, 50);
        let balance = store.get_balance(&u).unwrap().unwrap();
        assert_eq!(balance.balance_cents, 950);

        let (_, total) = store.list_ledger(&u, 1, 10).unwrap();
        assert_eq!(total, 3);
    }

    #[test]
    fn apply_events_missing_quota_row_fails_whole_batch() {
        let (store, _dir) = create_test_store();
        let u = user("u1");
        seed_balance(&store, &u, 1_000);

        let event = DeductEvent {
            entry_id: EntryId::generate(),
            user_id: u.clone(),
            service_name: "asr".into(),
            count: 10,
            cost_cents: 0,
            free_count: 10,
            paid_count: 0,
            balance_deducted_cents: 0,
            deduct_time: Utc::now(),
            month: month(),
        };

        let err = store.apply_deduct_events(&[event]).unwrap_err();
        assert!(matches!(err, StoreError::NotFound { entity: "free_quota", .. }));
        let (_, total) = store.list_ledger(&u, 1, 10).unwrap();
        assert_eq!(total, 0);
    }

    #[test]
    fn settle_recharge_is_idempotent() {
        let (store, _dir) = create_test_store();
        let u = user("u3");
        store
            .create_order(&RechargeOrder::pending(
                "recharge_u3_1700000000".into(),
                u.clone(),
                5_000,
            ))
            .unwrap();

        let first = store
            .settle_recharge("recharge_u3_1700000000", "pay_1", 5_000)
            .unwrap();
        assert!(!first.already_settled);
        assert_eq!(first.balance_cents, 5_000);

        let second = store
            .settle_recharge("recharge_u3_1700000000", "pay_1", 5_000)
            .unwrap();
        assert!(second.already_settled);
        assert_eq!(second.balance_cents, 5_000);

        let order = store.get_order("recharge_u3_1700000000").unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Success);
        assert_eq!(order.payment_id.as_deref(), Some("pay_1"));

        let by_payment = store.get_order_by_payment("pay_1").unwrap().unwrap();
        assert_eq!(by_payment.order_id, "recharge_u3_1700000000");
    }

    #[test]
    fn settle_recharge_unknown_order() {
        let (store, _dir) = create_test_store();
        let err = store.settle_recharge("recharge_ghost_1", "pay_x", 100).unwrap_err();
        assert!(matches!(err, StoreError::NotFound { entity: "recharge_order", .. }));
    }

    #[test]
    fn concurrent_settles_credit_once() {
        let (store, _dir) = create_test_store();
        let store = Arc::new(store);
        let u = user("u5");
        store
            .create_order(&RechargeOrder::pending(
                "recharge_u5_1700000000".into(),
                u.clone(),
                5_000,
            ))
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let store = Arc::clone(&store);
            handles.push(std::thread::spawn(move || {
                store
                    .settle_recharge("recharge_u5_1700000000", "pay_9", 5_000)
                    .unwrap()
            }));
        }
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(results.iter().filter(|r| !r.already_settled).count(), 1);
        let balance = store.get_balance(&u).unwrap().unwrap();
        assert_eq!(balance.balance_cents, 5_000);
    }

    #[test]
    fn ledger_stats_filters_and_sums() {
        let (store, _dir) = create_test_store();
        let u = user("u1");
        seed_quota(&store, &u, "tts", 10);
        seed_balance(&store, &u, 100);

        store.deduct(&deduct_request(&u, "tts", 15, 30)).unwrap();

        let stats = store.ledger_stats(&u, None, &full_range()).unwrap();
        assert_eq!(stats.total_count, 15);
        assert_eq!(stats.free_count, 10);
        assert_eq!(stats.paid_count, 5);
        assert_eq!(stats.total_cost_cents, 10);

        let filtered = store
            .ledger_stats(&u, Some("other"), &full_range())
            .unwrap();
        assert_eq!(filtered, LedgerStats::default());

        let by_service = store.ledger_stats_by_service(&u, &full_range()).unwrap();
        assert_eq!(by_service.len(), 1);
        assert_eq!(by_service[0].0, "tts");
        assert_eq!(by_service[0].1.total_cost_cents, 10);
    }

    #[test]
    fn distinct_users_unions_balances_and_quotas() {
        let (store, _dir) = create_test_store();
        seed_balance(&store, &user("u1"), 100);
        seed_quota(&store, &user("u2"), "asr", 100);
        seed_quota(&store, &user("u1"), "asr", 100);

        let users = store.distinct_user_ids().unwrap();
        let names: Vec<_> = users.iter().map(UserId::as_str).collect();
        assert_eq!(names, vec!["u1", "u2"]);
    }

    #[test]
    fn list_ledger_paginates_newest_first() {
        let (store, _dir) = create_test_store();
        let u = user("u1");
        seed_quota(&store, &u, "asr", 100);

        for _ in 0..3 {
            std::thread::sleep(std::time::Duration::from_millis(2));
            store.deduct(&deduct_request(&u, "asr", 1, 0)).unwrap();
        }

        let (page1, total) = store.list_ledger(&u, 1, 2).unwrap();
        assert_eq!(total, 3);
        assert_eq!(page1.len(), 2);
        let (page2, _) = store.list_ledger(&u, 2, 2).unwrap();
        assert_eq!(page2.len(), 1);

        // Newest first across the pages.
        assert!(page1[0].created_at >= page1[1].created_at);
        assert!(page1[1].created_at >= page2[0].created_at);
    }
}
