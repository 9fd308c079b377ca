use std::cmp::Ordering;
use std::sync::Arc;

use crate::types::{extract_user_key, pack_sequence_and_type, MAX_SEQUENCE, VALUE_TYPE_FOR_SEEK};
use crate::coding::{decode_fixed64, put_fixed64};

/// Total order over user keys.
///
/// The name is persisted in the manifest; reopening a database with a
/// comparator of a different name is refused.
pub trait Comparator: Send + Sync {
    fn name(&self) -> &str;

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;

    /// Returns a key `k` with `start <= k < limit` that is as short as
    /// possible. Used to shrink index block entries. Returning `start`
    /// unchanged is always correct.
    fn find_shortest_separator(&self, start: &[u8], limit: &[u8]) -> Vec<u8>;

    /// Returns a short key `k >= key`.
    fn find_short_successor(&self, key: &[u8]) -> Vec<u8>;
}

/// Lexicographic byte order.
#[derive(Debug, Default, Clone, Copy)]
pub struct BytewiseComparator;

impl Comparator for BytewiseComparator {
    fn name(&self) -> &str {
        "stratadb.BytewiseComparator"
    }

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }

    fn find_shortest_separator(&self, start: &[u8], limit: &[u8]) -> Vec<u8> {
        let min_len = start.len().min(limit.len());
        let diff = start
            .iter()
            .zip(limit.iter())
            .position(|(a, b)| a != b)
            .unwrap_or(min_len);

        if diff < min_len {
            let byte = start[diff];
            if byte < 0xff && byte + 1 < limit[diff] {
                let mut sep = start[..=diff].to_vec();
                sep[diff] += 1;
                return sep;
            }
        }
        start.to_vec()
    }

    fn find_short_successor(&self, key: &[u8]) -> Vec<u8> {
        match key.iter().position(|&b| b != 0xff) {
            Some(i) => {
                let mut succ = key[..=i].to_vec();
                succ[i] += 1;
                succ
            }
            // all 0xff: no shorter successor exists
            None => key.to_vec(),
        }
    }
}

/// Orders encoded internal keys: user key ascending, then
/// (sequence, type) descending so the newest version comes first.
#[derive(Clone)]
pub struct InternalKeyComparator {
    user: Arc<dyn Comparator>,
}

impl InternalKeyComparator {
    pub fn new(user: Arc<dyn Comparator>) -> Self {
        InternalKeyComparator { user }
    }

    pub fn user_comparator(&self) -> &Arc<dyn Comparator> {
        &self.user
    }

    pub fn compare_user(&self, a: &[u8], b: &[u8]) -> Ordering {
        self.user.compare(a, b)
    }
}

impl Comparator for InternalKeyComparator {
    fn name(&self) -> &str {
        "stratadb.InternalKeyComparator"
    }

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        self.user
            .compare(extract_user_key(a), extract_user_key(b))
            .then_with(|| {
                let a_tag = decode_fixed64(&a[a.len() - 8..]);
                let b_tag = decode_fixed64(&b[b.len() - 8..]);
                b_tag.cmp(&a_tag)
            })
    }

    fn find_shortest_separator(&self, start: &[u8], limit: &[u8]) -> Vec<u8> {
        let user_start = extract_user_key(start);
        let user_limit = extract_user_key(limit);
        let tmp = self.user.find_shortest_separator(user_start, user_limit);
        if tmp.len() < user_start.len() && self.user.compare(user_start, &tmp) == Ordering::Less {
            // the user key got shorter but physically larger; tag it with the
            // earliest possible sequence so it still sorts before `limit`
            let mut sep = tmp;
            put_fixed64(&mut sep, pack_sequence_and_type(MAX_SEQUENCE, VALUE_TYPE_FOR_SEEK));
            debug_assert_eq!(self.compare(start, &sep), Ordering::Less);
            debug_assert_eq!(self.compare(&sep, limit), Ordering::Less);
            return sep;
        }
        start.to_vec()
    }

    fn find_short_successor(&self, key: &[u8]) -> Vec<u8> {
        let user_key = extract_user_key(key);
        let tmp = self.user.find_short_successor(user_key);
        if tmp.len() < user_key.len() && self.user.compare(user_key, &tmp) == Ordering::Less {
            let mut succ = tmp;
            put_fixed64(&mut succ, pack_sequence_and_type(MAX_SEQUENCE, VALUE_TYPE_FOR_SEEK));
            return succ;
        }
        key.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{InternalKey, ValueType};

    fn ikey(user: &[u8], seq: u64, vt: ValueType) -> Vec<u8> {
        InternalKey::new(user, seq, vt).encode().to_vec()
    }

    fn shorten(a: &[u8], b: &[u8]) -> Vec<u8> {
        InternalKeyComparator::new(Arc::new(BytewiseComparator)).find_shortest_separator(a, b)
    }

    #[test]
    fn internal_order_newest_first() {
        let icmp = InternalKeyComparator::new(Arc::new(BytewiseComparator));
        let a1 = ikey(b"a", 1, ValueType::Value);
        let a2 = ikey(b"a", 2, ValueType::Value);
        let b1 = ikey(b"b", 1, ValueType::Value);
        assert_eq!(icmp.compare(&a2, &a1), Ordering::Less);
        assert_eq!(icmp.compare(&a1, &b1), Ordering::Less);
        assert_eq!(icmp.compare(&a1, &a1), Ordering::Equal);

        let put = ikey(b"a", 5, ValueType::Value);
        let del = ikey(b"a", 5, ValueType::Deletion);
        assert_eq!(icmp.compare(&put, &del), Ordering::Less);
    }

    #[test]
    fn shortest_separator() {
        // same user key: unchanged
        assert_eq!(
            shorten(&ikey(b"foo", 100, ValueType::Value), &ikey(b"foo", 99, ValueType::Value)),
            ikey(b"foo", 100, ValueType::Value)
        );
        // misordered user keys: unchanged
        assert_eq!(
            shorten(&ikey(b"foo", 100, ValueType::Value), &ikey(b"bar", 99, ValueType::Value)),
            ikey(b"foo", 100, ValueType::Value)
        );
        // one is a prefix of the other: unchanged
        assert_eq!(
            shorten(&ikey(b"foo", 100, ValueType::Value), &ikey(b"foobar", 200, ValueType::Value)),
            ikey(b"foo", 100, ValueType::Value)
        );
        assert_eq!(
            shorten(&ikey(b"foo", 100, ValueType::Value), &ikey(b"hello", 200, ValueType::Value)),
            ikey(b"g", MAX_SEQUENCE, VALUE_TYPE_FOR_SEEK)
        );
    }

    #[test]
    fn short_successor() {
        let icmp = InternalKeyComparator::new(Arc::new(BytewiseComparator));
        assert_eq!(
            icmp.find_short_successor(&ikey(b"foo", 100, ValueType::Value)),
            ikey(b"g", MAX_SEQUENCE, VALUE_TYPE_FOR_SEEK)
        );
        assert_eq!(
            icmp.find_short_successor(&ikey(b"\xff\xff", 100, ValueType::Value)),
            ikey(b"\xff\xff", 100, ValueType::Value)
        );
    }
}
