use std::collections::VecDeque;

use bytes::Bytes;

use crate::address::UniqueAddress;
use crate::control::system_message::SystemMessageEnvelope;
use crate::error::{Error, Result};

/// Sender half of reliable system-message delivery.
///
/// Sequence numbers are per association incarnation and start at 1. Every
/// offered message stays buffered until a cumulative ack covers it; the
/// control lane retransmits the whole buffer on its resend tick. Overflowing
/// the buffer is unrecoverable for this peer.
#[derive(Debug)]
pub(crate) struct SystemMessageDelivery {
    next_seq: u64,
    unacked: VecDeque<SystemMessageEnvelope>,
    capacity: usize,
}

impl SystemMessageDelivery {
    pub(crate) fn new(capacity: usize) -> Self {
        SystemMessageDelivery {
            next_seq: 1,
            unacked: VecDeque::new(),
            capacity,
        }
    }

    /// Assigns the next sequence number and buffers the envelope for
    /// retransmission.
    pub(crate) fn offer(
        &mut self,
        message: Bytes,
        ack_reply_to: UniqueAddress,
    ) -> Result<SystemMessageEnvelope> {
        if self.unacked.len() >= self.capacity {
            return Err(Error::ErrSystemMessageBufferOverflow {
                capacity: self.capacity,
            });
        }
        let envelope = SystemMessageEnvelope {
            seq_no: self.next_seq,
            ack_reply_to,
            message,
        };
        self.next_seq += 1;
        self.unacked.push_back(envelope.clone());
        Ok(envelope)
    }

    /// Cumulative ack: drops everything up to and including `seq_no`.
    pub(crate) fn on_ack(&mut self, seq_no: u64) {
        while let Some(front) = self.unacked.front() {
            if front.seq_no <= seq_no {
                self.unacked.pop_front();
            } else {
                break;
            }
        }
    }

    /// Gap hint: everything from the receiver's expected sequence number
    /// onward, for immediate retransmission.
    pub(crate) fn on_nack(&mut self, seq_no: u64) -> Vec<SystemMessageEnvelope> {
        // the nack also acknowledges everything before the expected seq
        self.on_ack(seq_no.saturating_sub(1));
        self.unacked
            .iter()
            .filter(|e| e.seq_no >= seq_no)
            .cloned()
            .collect()
    }

    /// Everything awaiting an ack, oldest first, for the periodic resend.
    pub(crate) fn unacked(&self) -> Vec<SystemMessageEnvelope> {
        self.unacked.iter().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.unacked.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.unacked.is_empty()
    }
}

/// What the receiver does with an arriving system-message envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AckDecision {
    /// In order: hand to the dispatcher and ack.
    Deliver { ack: u64 },
    /// Already delivered: re-ack so the sender can trim its buffer.
    Duplicate { ack: u64 },
    /// Ahead of the expected sequence: drop and hint at the gap.
    Gap { nack: u64 },
}

/// Receiver half: tracks the highest contiguous sequence delivered to the
/// dispatcher. Out-of-order envelopes are discarded; the sender's periodic
/// resend closes the gap, the nack merely accelerates it.
#[derive(Debug, Default)]
pub(crate) struct SystemMessageAcker {
    last_delivered: u64,
}

impl SystemMessageAcker {
    pub(crate) fn new() -> Self {
        SystemMessageAcker::default()
    }

    pub(crate) fn on_envelope(&mut self, seq_no: u64) -> AckDecision {
        let expected = self.last_delivered + 1;
        if seq_no == expected {
            self.last_delivered = seq_no;
            AckDecision::Deliver { ack: seq_no }
        } else if seq_no < expected {
            AckDecision::Duplicate {
                ack: self.last_delivered,
            }
        } else {
            AckDecision::Gap { nack: expected }
        }
    }

    pub(crate) fn last_delivered(&self) -> u64 {
        self.last_delivered
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::address::Address;

    fn reply_to() -> UniqueAddress {
        UniqueAddress::new(Address::new("sys", "127.0.0.1", 1), 1)
    }

    #[test]
    fn test_sender_sequences_from_one() -> Result<()> {
        let mut delivery = SystemMessageDelivery::new(10);
        for expected in 1..=5u64 {
            let env = delivery.offer(Bytes::from_static(b"m"), reply_to())?;
            assert_eq!(env.seq_no, expected);
        }
        assert_eq!(delivery.len(), 5);
        Ok(())
    }

    #[test]
    fn test_cumulative_ack_trims_buffer() -> Result<()> {
        let mut delivery = SystemMessageDelivery::new(10);
        for _ in 0..5 {
            delivery.offer(Bytes::from_static(b"m"), reply_to())?;
        }
        delivery.on_ack(3);
        assert_eq!(delivery.len(), 2);
        assert_eq!(delivery.unacked()[0].seq_no, 4);

        delivery.on_ack(100);
        assert!(delivery.is_empty());
        Ok(())
    }

    #[test]
    fn test_overflow_fails() -> Result<()> {
        let mut delivery = SystemMessageDelivery::new(2);
        delivery.offer(Bytes::from_static(b"1"), reply_to())?;
        delivery.offer(Bytes::from_static(b"2"), reply_to())?;
        assert_eq!(
            delivery.offer(Bytes::from_static(b"3"), reply_to()).err(),
            Some(Error::ErrSystemMessageBufferOverflow { capacity: 2 })
        );
        Ok(())
    }

    #[test]
    fn test_nack_returns_tail_for_resend() -> Result<()> {
        let mut delivery = SystemMessageDelivery::new(10);
        for _ in 0..5 {
            delivery.offer(Bytes::from_static(b"m"), reply_to())?;
        }
        let resend = delivery.on_nack(3);
        let seqs: Vec<u64> = resend.iter().map(|e| e.seq_no).collect();
        assert_eq!(seqs, vec![3, 4, 5]);
        // seqs 1 and 2 were implicitly acknowledged
        assert_eq!(delivery.len(), 3);
        Ok(())
    }

    #[test]
    fn test_acker_in_order_duplicate_and_gap() {
        let mut acker = SystemMessageAcker::new();
        assert_eq!(acker.on_envelope(1), AckDecision::Deliver { ack: 1 });
        assert_eq!(acker.on_envelope(2), AckDecision::Deliver { ack: 2 });
        assert_eq!(acker.on_envelope(2), AckDecision::Duplicate { ack: 2 });
        assert_eq!(acker.on_envelope(5), AckDecision::Gap { nack: 3 });
        assert_eq!(acker.on_envelope(3), AckDecision::Deliver { ack: 3 });
        assert_eq!(acker.last_delivered(), 3);
    }

    #[test]
    fn test_delivery_over_lossy_channel_stays_gap_free() -> Result<()> {
        // Drop every other transmission; the periodic resend (modelled as
        // draining `unacked`) must still deliver 1..=100 in order.
        let mut delivery = SystemMessageDelivery::new(200);
        let mut acker = SystemMessageAcker::new();
        let mut delivered = vec![];

        for i in 0..100u64 {
            delivery.offer(Bytes::from(i.to_be_bytes().to_vec()), reply_to())?;
        }

        let mut drop_toggle = false;
        let mut rounds = 0;
        while !delivery.is_empty() {
            rounds += 1;
            assert!(rounds < 64, "resend must converge");
            let mut highest_ack = None;
            for env in delivery.unacked() {
                drop_toggle = !drop_toggle;
                if drop_toggle {
                    continue; // lost on the wire
                }
                match acker.on_envelope(env.seq_no) {
                    AckDecision::Deliver { ack } => {
                        delivered.push(env.seq_no);
                        highest_ack = Some(ack);
                    }
                    AckDecision::Duplicate { ack } => highest_ack = Some(ack),
                    AckDecision::Gap { .. } => {}
                }
            }
            if let Some(ack) = highest_ack {
                delivery.on_ack(ack);
            }
        }

        assert_eq!(delivered, (1..=100).collect::<Vec<u64>>());
        Ok(())
    }
}
