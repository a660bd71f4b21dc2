//! Priority merging of bound records.
//!
//! `merge(lower, higher)` combines two values of the same record type:
//! additive fields concatenate with the higher-priority elements first,
//! set-info fields take the higher value when its flag is set, nested
//! records recurse.

use indexmap::IndexMap;

use super::SetInfo;

/// Combine a lower-priority value with a higher-priority one.
pub trait Merge: Sized {
    fn merge(self, higher: Self) -> Self;
}

impl<T> Merge for Vec<T> {
    fn merge(self, higher: Self) -> Self {
        let mut out = higher;
        out.extend(self);
        out
    }
}

impl<T> Merge for Option<T> {
    fn merge(self, higher: Self) -> Self {
        higher.or(self)
    }
}

impl<T> Merge for SetInfo<T> {
    fn merge(self, higher: Self) -> Self {
        if higher.is_set() {
            higher
        } else {
            self
        }
    }
}

impl<V: Merge> Merge for IndexMap<String, V> {
    fn merge(mut self, higher: Self) -> Self {
        for (key, value) in higher {
            match self.shift_remove(&key) {
                Some(existing) => {
                    self.insert(key, existing.merge(value));
                }
                None => {
                    self.insert(key, value);
                }
            }
        }
        self
    }
}

impl Merge for String {
    fn merge(self, higher: Self) -> Self {
        higher
    }
}

/// Concatenate higher-first while dropping repeats, for additive fields that
/// are sets in spirit (registry URLs, search paths).
pub fn merge_unique<T: PartialEq>(lower: Vec<T>, higher: Vec<T>) -> Vec<T> {
    let mut out = higher;
    for item in lower {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}
