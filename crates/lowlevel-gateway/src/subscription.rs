// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-slot channel subscriptions.
//!
//! One 32-bit mask per connection slot, indexed exactly like the
//! connection table. Bit `n` set means the slot receives channel `n` data.

use crate::command::CHANNEL_COUNT;

/// Channels 1 and 2.
pub const DEFAULT_SUBSCRIPTION: u32 = 0x06;

/// Channel bitmask per slot.
#[derive(Debug, Clone)]
pub struct SubscriptionTable {
    masks: Box<[u32]>,
    default_mask: u32,
}

impl SubscriptionTable {
    /// Table of `capacity` slots, each starting at `default_mask`.
    pub fn new(capacity: usize, default_mask: u32) -> Self {
        Self {
            masks: vec![default_mask; capacity].into_boxed_slice(),
            default_mask,
        }
    }

    pub fn capacity(&self) -> usize {
        self.masks.len()
    }

    pub fn default_mask(&self) -> u32 {
        self.default_mask
    }

    /// Mask of `slot`, or 0 for an unknown slot.
    pub fn mask(&self, slot: usize) -> u32 {
        self.masks.get(slot).copied().unwrap_or(0)
    }

    pub fn is_subscribed(&self, slot: usize, channel: u8) -> bool {
        channel < CHANNEL_COUNT && self.mask(slot) & (1 << channel) != 0
    }

    /// Set the channel bit. Returns false when slot or channel is out of range.
    pub fn subscribe(&mut self, slot: usize, channel: u8) -> bool {
        self.update(slot, channel, true)
    }

    /// Clear the channel bit. Returns false when slot or channel is out of range.
    pub fn unsubscribe(&mut self, slot: usize, channel: u8) -> bool {
        self.update(slot, channel, false)
    }

    fn update(&mut self, slot: usize, channel: u8, subscribe: bool) -> bool {
        if channel >= CHANNEL_COUNT {
            return false;
        }
        match self.masks.get_mut(slot) {
            Some(mask) => {
                if subscribe {
                    *mask |= 1 << channel;
                } else {
                    *mask &= !(1 << channel);
                }
                true
            }
            None => false,
        }
    }

    /// Replace the whole mask of `slot`.
    pub fn set(&mut self, slot: usize, mask: u32) -> bool {
        match self.masks.get_mut(slot) {
            Some(m) => {
                *m = mask;
                true
            }
            None => false,
        }
    }

    /// Restore the default mask of one slot.
    pub fn reset(&mut self, slot: usize) {
        if let Some(mask) = self.masks.get_mut(slot) {
            *mask = self.default_mask;
        }
    }

    /// Restore the default mask everywhere.
    pub fn reset_all(&mut self) {
        self.masks.fill(self.default_mask);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_mask() {
        let table = SubscriptionTable::new(4, DEFAULT_SUBSCRIPTION);
        assert_eq!(table.capacity(), 4);
        for slot in 0..4 {
            assert!(!table.is_subscribed(slot, 0));
            assert!(table.is_subscribed(slot, 1));
            assert!(table.is_subscribed(slot, 2));
            assert!(!table.is_subscribed(slot, 3));
        }
    }

    #[test]
    fn test_subscribe_unsubscribe() {
        let mut table = SubscriptionTable::new(4, DEFAULT_SUBSCRIPTION);
        assert!(table.subscribe(3, 31));
        assert!(table.is_subscribed(3, 31));
        assert!(!table.is_subscribed(2, 31));

        assert!(table.unsubscribe(3, 1));
        assert_eq!(table.mask(3), (1 << 31) | (1 << 2));

        // idempotent
        assert!(table.unsubscribe(3, 1));
        assert_eq!(table.mask(3), (1 << 31) | (1 << 2));
    }

    #[test]
    fn test_out_of_range() {
        let mut table = SubscriptionTable::new(2, DEFAULT_SUBSCRIPTION);
        assert!(!table.subscribe(2, 5));
        assert!(!table.subscribe(0, 32));
        assert!(!table.is_subscribed(0, 40));
        assert_eq!(table.mask(9), 0);
        assert!(!table.set(5, 0xFF));
    }

    #[test]
    fn test_reset() {
        let mut table = SubscriptionTable::new(3, DEFAULT_SUBSCRIPTION);
        table.set(0, 0);
        table.set(1, u32::MAX);
        table.set(2, 0x10);

        table.reset(1);
        assert_eq!(table.mask(1), DEFAULT_SUBSCRIPTION);
        assert_eq!(table.mask(0), 0);

        table.reset_all();
        for slot in 0..3 {
            assert_eq!(table.mask(slot), DEFAULT_SUBSCRIPTION);
        }
    }
}
