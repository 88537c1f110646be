//! Key encoding for the column families.
//!
//! User ids are opaque strings, so composite keys join segments with a NUL
//! separator (`UserId` validation rejects NUL in ids). Entry ids are 16 ULID
//! bytes and sort chronologically.

use tally_core::{BillingMonth, EntryId, UserId};

/// Separator between variable-length key segments.
const SEP: u8 = 0;

/// Balance row key.
#[must_use]
pub fn balance_key(user_id: &UserId) -> Vec<u8> {
    user_id.as_ref().to_vec()
}

/// Free-quota row key: `user \0 service \0 month`.
#[must_use]
pub fn quota_key(user_id: &UserId, service_name: &str, month: &BillingMonth) -> Vec<u8> {
    let month = month.to_string();
    let mut key =
        Vec::with_capacity(user_id.as_str().len() + service_name.len() + month.len() + 2);
    key.extend_from_slice(user_id.as_ref());
    key.push(SEP);
    key.extend_from_slice(service_name.as_bytes());
    key.push(SEP);
    key.extend_from_slice(month.as_bytes());
    key
}

/// Ledger row key.
#[must_use]
pub fn ledger_key(entry_id: &EntryId) -> Vec<u8> {
    entry_id.to_bytes().to_vec()
}

/// Ledger-by-user index key: `user \0 entry_id`.
#[must_use]
pub fn user_ledger_key(user_id: &UserId, entry_id: &EntryId) -> Vec<u8> {
    let mut key = Vec::with_capacity(user_id.as_str().len() + 17);
    key.extend_from_slice(user_id.as_ref());
    key.push(SEP);
    key.extend_from_slice(&entry_id.to_bytes());
    key
}

/// Prefix for iterating one user's ledger index in time order.
#[must_use]
pub fn user_ledger_prefix(user_id: &UserId) -> Vec<u8> {
    let mut key = Vec::with_capacity(user_id.as_str().len() + 1);
    key.extend_from_slice(user_id.as_ref());
    key.push(SEP);
    key
}

/// Extract the entry id from a ledger-by-user index key.
///
/// # Panics
///
/// Panics if the key does not end in 16 ULID bytes.
#[must_use]
pub fn extract_entry_id(key: &[u8]) -> EntryId {
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&key[key.len() - 16..]);
    EntryId::from_bytes(bytes)
}

/// Recharge order row key.
#[must_use]
pub fn order_key(order_id: &str) -> Vec<u8> {
    order_id.as_bytes().to_vec()
}

/// Order-by-payment index key.
#[must_use]
pub fn payment_index_key(payment_id: &str) -> Vec<u8> {
    payment_id.as_bytes().to_vec()
}

/// Decode the user segment of a quota key.
#[must_use]
pub fn quota_key_user(key: &[u8]) -> Option<&[u8]> {
    key.split(|&b| b == SEP).next()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_key_segments() {
        let user = UserId::new("u1").unwrap();
        let month: BillingMonth = "2025-01".parse().unwrap();
        let key = quota_key(&user, "asr", &month);
        assert_eq!(key, b"u1\0asr\x002025-01");
        assert_eq!(quota_key_user(&key), Some(b"u1".as_ref()));
    }

    #[test]
    fn user_ledger_key_is_prefixed_and_ordered() {
        let user = UserId::new("u1").unwrap();
        let a = EntryId::generate();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = EntryId::generate();

        let ka = user_ledger_key(&user, &a);
        let kb = user_ledger_key(&user, &b);
        let prefix = user_ledger_prefix(&user);

        assert!(ka.starts_with(&prefix));
        assert!(kb.starts_with(&prefix));
        assert!(ka < kb);
    }

    #[test]
    fn extract_entry_id_roundtrip() {
        let user = UserId::new("dev_42").unwrap();
        let id = EntryId::generate();
        let key = user_ledger_key(&user, &id);
        assert_eq!(extract_entry_id(&key), id);
    }
}
