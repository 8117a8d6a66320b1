/*!
A counter for tracking frequencies of a set of named objects. The counter
starts with no keys. Incrementing an unknown key inserts it with a count of
one; incrementing a known key bumps its count. The state of the counter can be
extracted by formatting it, which lists the counts for all keys with the
heaviest hitters first.
*/

use std::collections::HashMap;
use std::fmt::{Display, Formatter, Result};

/// Maps individual keys to count values.
#[derive(Debug, Default)]
pub struct Counter {
    items: HashMap<String, u64>,
}

/// The supported operations on the values stored in this counter.
enum CounterOperation {
    Add,
    Set,
    Subtract,
}

impl Counter {
    /// A new counter with no keys.
    pub fn new() -> Counter {
        Counter {
            items: HashMap::new(),
        }
    }

    /// Increment the counter value by one for the key given by id.
    /// Returns the value of the counter after it was incremented.
    pub fn add_one(&mut self, id: &str) -> u64 {
        self.operate(id, CounterOperation::Add, 1)
    }

    /// Decrement the counter value by one for the key given by id. If the
    /// decrement would produce a negative value, the value is set to 0
    /// instead. Returns the value of the counter after it was decremented.
    pub fn sub_one(&mut self, id: &str) -> u64 {
        self.operate(id, CounterOperation::Subtract, 1)
    }

    /// Increment the counter value by the given value for the key given by id.
    /// Returns the value of the counter after it was incremented.
    pub fn add_value(&mut self, id: &str, value: u64) -> u64 {
        self.operate(id, CounterOperation::Add, value)
    }

    /// Sets the counter value to the given value for the key given by id.
    pub fn set_value(&mut self, id: &str, value: u64) -> u64 {
        self.operate(id, CounterOperation::Set, value)
    }

    /// Returns the counter value for the key given by id, or 0 if no
    /// operations have been performed on the key.
    pub fn get_value(&self, id: &str) -> u64 {
        match self.items.get(id) {
            Some(val) => *val,
            None => 0,
        }
    }

    /// Add all counts from another counter into this one.
    pub fn add_counter(&mut self, other: &Counter) {
        for (key, value) in other.items.iter() {
            self.add_value(key, *value);
        }
    }

    /// True if no key has ever been touched.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn operate(&mut self, id: &str, op: CounterOperation, value: u64) -> u64 {
        match self.items.get_mut(id) {
            Some(val) => {
                // update and return the existing value without allocating a new key
                match op {
                    CounterOperation::Add => *val += value,
                    CounterOperation::Subtract => {
                        if value < *val {
                            *val -= value
                        } else {
                            *val = 0
                        }
                    }
                    CounterOperation::Set => *val = value,
                }
                *val
            }
            None => {
                // allocate a new key with an initial value of 0, then operate on it
                assert_eq!(self.items.insert(id.to_string(), 0), None);
                self.operate(id, op, value)
            }
        }
    }
}

impl Display for Counter {
    /// Formats the counter as `{key1:value1, key2:value2, ..., keyN:valueN}`,
    /// sorted with the largest value first. Keys with equal values are sorted
    /// lexicographically so that the output is deterministic.
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        let mut item_vec: Vec<(&String, &u64)> = self.items.iter().collect();
        item_vec.sort_by(|(ka, va), (kb, vb)| vb.cmp(va).then_with(|| ka.cmp(kb)));

        write!(f, "{{")?;
        for (i, (key, value)) in item_vec.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{key}:{value}")?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_get() {
        let mut counter = Counter::new();
        assert_eq!(counter.get_value("socket"), 0);
        assert_eq!(counter.add_one("socket"), 1);
        assert_eq!(counter.add_one("socket"), 2);
        assert_eq!(counter.add_value("socket", 3), 5);
        assert_eq!(counter.get_value("socket"), 5);
        assert_eq!(counter.get_value("pipe"), 0);
    }

    #[test]
    fn test_sub_saturates() {
        let mut counter = Counter::new();
        counter.add_value("x", 2);
        assert_eq!(counter.sub_one("x"), 1);
        assert_eq!(counter.sub_one("x"), 0);
        assert_eq!(counter.sub_one("x"), 0);
    }

    #[test]
    fn test_set() {
        let mut counter = Counter::new();
        assert_eq!(counter.set_value("y", 10), 10);
        assert_eq!(counter.set_value("y", 3), 3);
    }

    #[test]
    fn test_add_counter() {
        let mut a = Counter::new();
        a.add_value("x", 1);
        a.add_value("y", 2);

        let mut b = Counter::new();
        b.add_value("y", 3);
        b.add_value("z", 4);

        a.add_counter(&b);
        assert_eq!(a.get_value("x"), 1);
        assert_eq!(a.get_value("y"), 5);
        assert_eq!(a.get_value("z"), 4);
        // the source counter is unchanged
        assert_eq!(b.get_value("y"), 3);
    }

    #[test]
    fn test_display() {
        let mut counter = Counter::new();
        counter.add_value("b", 2);
        counter.add_value("a", 2);
        counter.add_value("c", 7);
        assert_eq!(counter.to_string(), "{c:7, a:2, b:2}");
    }
}
