use amqp_wire::{
    constants::DEFAULT_CONN_CHANNEL,
    types::{AmqpChannelId, ShortUint},
};

const INITIAL_BIT_MASK: u8 = 0b1000_0000;

/// Bitmap of channel numbers in use, `1..=channel_max`.
///
/// Channel 0 belongs to the connection and is never handed out.
pub(crate) struct ChannelIdRepository {
    /// 1: occupied, 0: free. Id `n` is bit `(n - 1) % 8` of byte `(n - 1) / 8`.
    id_state: Vec<u8>,
    channel_max: ShortUint,
}

impl ChannelIdRepository {
    /// `channel_max == 0` means no limit other than the protocol's.
    pub fn new(channel_max: ShortUint) -> Self {
        let channel_max = if channel_max == 0 {
            ShortUint::MAX
        } else {
            channel_max
        };
        let len = 1 + (channel_max as usize - 1) / 8;
        Self {
            id_state: vec![0; len],
            channel_max,
        }
    }

    fn pos_mask(id: AmqpChannelId) -> (usize, u8) {
        let pos = (id as usize - 1) / 8;
        let mask = INITIAL_BIT_MASK >> ((id - 1) % 8);
        (pos, mask)
    }

    fn in_range(&self, id: AmqpChannelId) -> bool {
        id != DEFAULT_CONN_CHANNEL && id <= self.channel_max
    }

    /// Lowest free id, `None` once all are taken.
    pub fn allocate(&mut self) -> Option<AmqpChannelId> {
        let pos = self.id_state.iter().position(|&v| v != 0b1111_1111)?;
        for i in 0..8 {
            let mask = INITIAL_BIT_MASK >> i;
            if self.id_state[pos] & mask == 0 {
                let id = pos * 8 + i + 1;
                if id > self.channel_max as usize {
                    return None;
                }
                self.id_state[pos] |= mask;
                return Some(id as AmqpChannelId);
            }
        }
        None
    }

    /// Mark a caller chosen id as used. `false` if it is taken or out of range.
    pub fn reserve(&mut self, id: AmqpChannelId) -> bool {
        if !self.in_range(id) {
            return false;
        }
        let (pos, mask) = Self::pos_mask(id);
        if self.id_state[pos] & mask != 0 {
            return false;
        }
        self.id_state[pos] |= mask;
        true
    }

    /// `false` if the id was not in use.
    pub fn release(&mut self, id: AmqpChannelId) -> bool {
        if !self.in_range(id) {
            return false;
        }
        let (pos, mask) = Self::pos_mask(id);
        if self.id_state[pos] & mask == 0 {
            return false;
        }
        self.id_state[pos] &= !mask;
        true
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::ChannelIdRepository;

    #[test]
    fn test_allocate_until_exhausted() {
        let channel_max = 2047;
        let mut repo = ChannelIdRepository::new(channel_max);

        let ids: HashSet<_> = (0..channel_max).map(|_| repo.allocate().unwrap()).collect();
        assert_eq!(channel_max as usize, ids.len());
        assert!(!ids.contains(&0));
        assert_eq!(None, repo.allocate());

        assert!(repo.release(1000));
        assert_eq!(Some(1000), repo.allocate());
    }

    #[test]
    fn test_reserve_and_release() {
        let mut repo = ChannelIdRepository::new(10);
        assert!(repo.reserve(3));
        assert!(!repo.reserve(3));
        assert!(!repo.reserve(0));
        assert!(!repo.reserve(11));

        assert_eq!(Some(1), repo.allocate());
        assert_eq!(Some(2), repo.allocate());
        assert_eq!(Some(4), repo.allocate());

        assert!(repo.release(3));
        assert!(!repo.release(3));
        assert!(!repo.release(0));
    }

    #[test]
    fn test_unlimited_channel_max() {
        let mut repo = ChannelIdRepository::new(0);
        assert!(repo.reserve(u16::MAX));
        assert_eq!(Some(1), repo.allocate());
    }
}
