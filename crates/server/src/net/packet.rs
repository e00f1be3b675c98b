/// Delivery guarantee requested for a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Delivery {
    /// Retransmitted until acknowledged, delivered once and in order.
    Reliable,
    /// Fire-and-forget. May be dropped without notice.
    Unreliable,
}

/// An owned payload tagged with its delivery mode.
///
/// Once handed to [`Host::send`](super::Host::send) the packet is marked sent
/// and its buffer can no longer be borrowed mutably.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    data: Vec<u8>,
    delivery: Delivery,
    sent: bool,
}

impl Packet {
    pub fn new(data: impl Into<Vec<u8>>, delivery: Delivery) -> Self {
        Self {
            data: data.into(),
            delivery,
            sent: false,
        }
    }

    pub fn reliable(data: impl Into<Vec<u8>>) -> Self {
        Self::new(data, Delivery::Reliable)
    }

    pub fn unreliable(data: impl Into<Vec<u8>>) -> Self {
        Self::new(data, Delivery::Unreliable)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mutable access to the buffer, or `None` once the packet was sent.
    pub fn data_mut(&mut self) -> Option<&mut Vec<u8>> {
        if self.sent {
            None
        } else {
            Some(&mut self.data)
        }
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    pub fn delivery(&self) -> Delivery {
        self.delivery
    }

    pub fn is_reliable(&self) -> bool {
        self.delivery == Delivery::Reliable
    }

    pub fn is_sent(&self) -> bool {
        self.sent
    }

    pub(crate) fn mark_sent(&mut self) {
        self.sent = true;
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sent_packets_are_frozen() {
        let mut packet = Packet::reliable(vec![1, 2]);
        packet.data_mut().unwrap().push(3);
        assert_eq!(packet.data(), &[1, 2, 3]);

        packet.mark_sent();
        assert!(packet.is_sent());
        assert!(packet.data_mut().is_none());
        assert_eq!(packet.data(), &[1, 2, 3]);
    }

    #[test]
    fn delivery_tag() {
        assert!(Packet::reliable(b"x".to_vec()).is_reliable());
        assert_eq!(Packet::unreliable(Vec::new()).delivery(), Delivery::Unreliable);
    }
}
