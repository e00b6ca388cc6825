//! Unit counters for a countable rental item.
//!
//! `Stock` is only ever mutated while the owning item's write lock is held,
//! so each operation here is one indivisible check-and-write.

/// `available` / `total` for one item. Invariant: `available <= total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stock {
    total: u32,
    available: u32,
}

/// A decrement that would take `available` below zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shortfall {
    pub requested: u32,
    pub available: u32,
}

impl Stock {
    /// A fresh item: every unit is on the shelf.
    pub fn new(total: u32) -> Self {
        Self { total, available: total }
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn available(&self) -> u32 {
        self.available
    }

    /// Units currently lent out.
    pub fn lent(&self) -> u32 {
        self.total - self.available
    }

    pub fn can_cover(&self, quantity: u32) -> bool {
        quantity <= self.available
    }

    /// Take `quantity` units off the shelf, or leave the counter untouched.
    pub fn decrement(&mut self, quantity: u32) -> Result<(), Shortfall> {
        if !self.can_cover(quantity) {
            return Err(Shortfall {
                requested: quantity,
                available: self.available,
            });
        }
        self.available -= quantity;
        Ok(())
    }

    /// Put `quantity` units back. Clamped at `total`; returns the number of
    /// units that did not fit (non-zero only on a duplicate return).
    pub fn increment(&mut self, quantity: u32) -> u32 {
        let room = self.total - self.available;
        let applied = quantity.min(room);
        self.available += applied;
        quantity - applied
    }

    /// Change `total`, shifting `available` by the same delta. Fails if the
    /// new total cannot cover the units already lent out.
    pub fn resize(&mut self, new_total: u32) -> Result<(), Shortfall> {
        let lent = self.lent();
        if new_total < lent {
            return Err(Shortfall {
                requested: lent,
                available: new_total,
            });
        }
        self.total = new_total;
        self.available = new_total - lent;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decrement_until_empty() {
        let mut s = Stock::new(5);
        s.decrement(3).unwrap();
        assert_eq!(s.available(), 2);
        s.decrement(2).unwrap();
        assert_eq!(s.available(), 0);
        assert_eq!(s.lent(), 5);
    }

    #[test]
    fn decrement_shortfall_leaves_counter() {
        let mut s = Stock::new(5);
        s.decrement(4).unwrap();
        let err = s.decrement(2).unwrap_err();
        assert_eq!(err, Shortfall { requested: 2, available: 1 });
        assert_eq!(s.available(), 1);
    }

    #[test]
    fn decrement_zero_total() {
        let mut s = Stock::new(0);
        assert!(s.decrement(1).is_err());
        assert!(s.decrement(0).is_ok());
    }

    #[test]
    fn increment_restores_capacity() {
        let mut s = Stock::new(5);
        s.decrement(5).unwrap();
        assert_eq!(s.increment(5), 0);
        assert_eq!(s, Stock::new(5));
    }

    #[test]
    fn increment_is_clamped_at_total() {
        let mut s = Stock::new(5);
        s.decrement(2).unwrap();
        assert_eq!(s.increment(3), 1);
        assert_eq!(s.available(), 5);
        assert_eq!(s.increment(2), 2);
        assert_eq!(s.available(), 5);
    }

    #[test]
    fn resize_keeps_lent_units() {
        let mut s = Stock::new(10);
        s.decrement(4).unwrap();
        s.resize(6).unwrap();
        assert_eq!((s.total(), s.available()), (6, 2));
        s.resize(20).unwrap();
        assert_eq!((s.total(), s.available()), (20, 16));
    }

    #[test]
    fn resize_below_lent_fails() {
        let mut s = Stock::new(10);
        s.decrement(7).unwrap();
        let err = s.resize(5).unwrap_err();
        assert_eq!(err, Shortfall { requested: 7, available: 5 });
        assert_eq!((s.total(), s.available()), (10, 3));
    }
}
