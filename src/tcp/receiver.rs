//! Tracks the peer's ISN, turns inbound segments into reassembler pushes,
//! and derives the ackno/window pair the connection stamps onto outbound
//! segments.

use super::reassembler::Reassembler;
use super::segment::TcpSegment;
use super::wrap::Wrap32;

#[derive(Debug)]
pub struct TcpReceiver {
    isn: Option<Wrap32>,
    reassembler: Reassembler,
}

impl TcpReceiver {
    pub fn new(capacity: usize) -> Self {
        TcpReceiver {
            isn: None,
            reassembler: Reassembler::new(capacity),
        }
    }

    pub fn reassembler(&self) -> &Reassembler {
        &self.reassembler
    }

    pub fn reassembler_mut(&mut self) -> &mut Reassembler {
        &mut self.reassembler
    }

    fn expected_abs_ack(&self) -> u64 {
        // next_index is SYN-relative stream index; the absolute sequence
        // number of "one past the last byte accepted" is next_index + 1
        // (to account for the SYN occupying absolute index 0).
        1 + self.reassembler.next_index()
    }

    pub fn segment_received(&mut self, seg: &TcpSegment) {
        if seg.syn {
            match self.isn {
                Some(isn) if isn != seg.seqno => return,
                Some(_) => {}
                None => self.isn = Some(seg.seqno),
            }
        }
        let isn = match self.isn {
            Some(isn) => isn,
            None => return,
        };

        let checkpoint = self.reassembler.next_index();
        let abs_seqno = seg.seqno.unwrap(isn, checkpoint);
        let length = seg.length_in_sequence_space() as u64;

        let expected_ack = self.expected_abs_ack();
        let window = self.window_size() as u64;
        // RFC 793 SEGMENT ARRIVES acceptability test, in absolute-index units.
        // A zero-length probe against a zero window is the one case the
        // general overlap test can't express, since an empty interval never
        // overlaps anything.
        let in_window = if length == 0 {
            if window == 0 {
                abs_seqno == expected_ack
            } else {
                abs_seqno >= expected_ack && abs_seqno < expected_ack + window
            }
        } else if window == 0 {
            false
        } else {
            abs_seqno < expected_ack + window && abs_seqno + length > expected_ack
        };
        if !in_window {
            return;
        }

        let stream_index = if abs_seqno > 0 { abs_seqno - 1 } else { 0 };
        let abs_fin = abs_seqno + length;
        let fin_fits = seg.fin && abs_fin <= expected_ack + window;

        self.reassembler
            .push_substring(&seg.payload, stream_index, fin_fits);
    }

    /// Unset until the ISN has been latched; otherwise `wrap(1 + next_index +
    /// (1 if FIN consumed), isn)`.
    pub fn ackno(&self) -> Option<Wrap32> {
        let isn = self.isn?;
        let mut abs_ack = 1 + self.reassembler.next_index();
        if self.reassembler.output().input_ended() {
            abs_ack += 1;
        }
        Some(Wrap32::wrap(abs_ack, isn))
    }

    pub fn window_size(&self) -> usize {
        self.reassembler.window_size()
    }

    pub fn unassembled_bytes(&self) -> usize {
        self.reassembler.unassembled_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn syn(isn: u32) -> TcpSegment {
        TcpSegment {
            seqno: Wrap32::new(isn),
            syn: true,
            ..Default::default()
        }
    }

    #[test]
    fn latches_isn_on_syn() {
        let mut r = TcpReceiver::new(64);
        assert_eq!(r.ackno(), None);
        r.segment_received(&syn(100));
        assert_eq!(r.ackno(), Some(Wrap32::new(101)));
    }

    #[test]
    fn data_before_syn_is_rejected() {
        let mut r = TcpReceiver::new(64);
        let seg = TcpSegment {
            seqno: Wrap32::new(5),
            payload: b"hi".to_vec(),
            ..Default::default()
        };
        r.segment_received(&seg);
        assert_eq!(r.ackno(), None);
        assert_eq!(r.unassembled_bytes(), 0);
    }

    #[test]
    fn ackno_advances_past_payload_and_fin() {
        let mut r = TcpReceiver::new(64);
        r.segment_received(&syn(0));
        let data = TcpSegment {
            seqno: Wrap32::new(1),
            payload: b"hello".to_vec(),
            ..Default::default()
        };
        r.segment_received(&data);
        assert_eq!(r.ackno(), Some(Wrap32::new(6)));

        let fin = TcpSegment {
            seqno: Wrap32::new(6),
            fin: true,
            ..Default::default()
        };
        r.segment_received(&fin);
        assert_eq!(r.ackno(), Some(Wrap32::new(7)));
    }

    #[test]
    fn out_of_window_segment_is_dropped() {
        let mut r = TcpReceiver::new(4);
        r.segment_received(&syn(0));
        // window is tiny; a segment far beyond it must be ignored.
        let far = TcpSegment {
            seqno: Wrap32::new(1000),
            payload: b"x".to_vec(),
            ..Default::default()
        };
        r.segment_received(&far);
        assert_eq!(r.unassembled_bytes(), 0);
    }
}
