//! Receive assembly for segmented provisioning PDUs
//!
//! Tracks one transaction at a time: a start segment announces the
//! transaction id, the index of the last segment, the total length and the
//! expected FCS; continuation segments fill in the rest. Completion is
//! reached when no segment bit is left outstanding and the FCS matches.
//!
//! PB-GATT delivers whole PDUs, so the bearer only owns and resets this
//! record. Bearers that segment on the air drive it.

use thiserror::Error;
use tracing::debug;

/// Payload carried by a transaction start segment
pub const START_PAYLOAD_MAX: usize = 20;

/// Payload carried by a continuation segment
pub const CONT_PAYLOAD_MAX: usize = 23;

/// Highest segment index representable in the bitmap
pub const MAX_SEG_INDEX: u8 = 63;

const FCS_TABLE: [u8; 256] = build_fcs_table();

const fn build_fcs_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 { (crc >> 1) ^ 0xE0 } else { crc >> 1 };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// Frame check sequence over a provisioning PDU (3GPP TS 27.010)
pub fn fcs_calc(data: &[u8]) -> u8 {
    let fcs = data
        .iter()
        .fold(0xFFu8, |fcs, byte| FCS_TABLE[(fcs ^ byte) as usize]);
    !fcs
}

/// Check `data` against a received FCS
pub fn fcs_check(data: &[u8], received: u8) -> bool {
    fcs_calc(data) == received
}

/// Errors for receive assembly
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RxError {
    #[error("Transaction {0} still has unreceived segments")]
    InProgress(u8),
    #[error("Zero-length provisioning PDU")]
    ZeroLength,
    #[error("Too large provisioning PDU (len {len}, max {max})")]
    TooLarge { len: usize, max: usize },
    #[error("Total length {total_len} does not fit {last_seg} continuation segments")]
    LengthMismatch { total_len: usize, last_seg: u8 },
    #[error("Data for unknown transaction {0}")]
    UnknownTransaction(u8),
    #[error("Invalid segment index {0}")]
    InvalidSegment(u8),
    #[error("Incorrect length for segment {index} (expected {expected}, got {actual})")]
    SegmentLength {
        index: u8,
        expected: usize,
        actual: usize,
    },
    #[error("Incorrect FCS (expected {expected:#04x}, calculated {actual:#04x})")]
    FcsMismatch { expected: u8, actual: u8 },
}

/// Outcome of feeding a segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RxProgress {
    /// More segments are outstanding
    Pending,
    /// Repeat of something already received; the peer may be acknowledged again
    Duplicate,
    /// Transaction finished with a verified PDU
    Complete(Vec<u8>),
}

/// Reassembly bookkeeping for one link
#[derive(Debug, Clone)]
pub struct RxAssembly {
    /// Current transaction id
    id: u8,
    /// Last completed transaction id
    prev_id: Option<u8>,
    /// Bit-field of unreceived segments
    seg: u64,
    /// Index of the last segment
    last_seg: u8,
    /// Expected FCS of the complete PDU
    fcs: u8,
    buf: Vec<u8>,
    limit: usize,
}

fn seg_mask(last_seg: u8) -> u64 {
    if last_seg >= MAX_SEG_INDEX {
        u64::MAX
    } else {
        (1u64 << (last_seg + 1)) - 1
    }
}

impl RxAssembly {
    /// Create an idle record around a pool buffer; its capacity bounds the PDU length
    pub fn new(mut buf: Vec<u8>) -> Self {
        buf.clear();
        let limit = buf.capacity();
        Self {
            id: 0,
            prev_id: None,
            seg: 0,
            last_seg: 0,
            fcs: 0,
            buf,
            limit,
        }
    }

    /// Current transaction id
    pub fn id(&self) -> u8 {
        self.id
    }

    /// Last completed transaction id
    pub fn prev_id(&self) -> Option<u8> {
        self.prev_id
    }

    /// Bitmap of segments still outstanding
    pub fn pending_segments(&self) -> u64 {
        self.seg
    }

    /// Index of the last segment of the current transaction
    pub fn last_seg(&self) -> u8 {
        self.last_seg
    }

    /// Expected FCS of the current transaction
    pub fn fcs(&self) -> u8 {
        self.fcs
    }

    /// Largest PDU the buffer can hold
    pub fn capacity(&self) -> usize {
        self.limit
    }

    /// True when no transaction is in progress and nothing has been received
    pub fn is_idle(&self) -> bool {
        self.seg == 0 && self.buf.is_empty()
    }

    /// Bytes expected in continuation segment `index` of a `total_len` PDU
    fn cont_len(&self, index: u8, total_len: usize) -> usize {
        if index == self.last_seg {
            total_len - START_PAYLOAD_MAX - CONT_PAYLOAD_MAX * (index as usize - 1)
        } else {
            CONT_PAYLOAD_MAX
        }
    }

    /// Handle a transaction start segment
    pub fn start(
        &mut self,
        id: u8,
        last_seg: u8,
        total_len: u16,
        fcs: u8,
        data: &[u8],
    ) -> Result<RxProgress, RxError> {
        if self.seg != 0 {
            debug!("Got Start while there are unreceived segments");
            return Err(RxError::InProgress(self.id));
        }

        if self.prev_id == Some(id) {
            debug!("Ignoring repeated start for transaction {}", id);
            return Ok(RxProgress::Duplicate);
        }

        let total_len = total_len as usize;
        if total_len == 0 {
            return Err(RxError::ZeroLength);
        }
        if total_len > self.limit {
            return Err(RxError::TooLarge {
                len: total_len,
                max: self.limit,
            });
        }
        if last_seg > MAX_SEG_INDEX {
            return Err(RxError::InvalidSegment(last_seg));
        }

        let expected_first = if last_seg == 0 {
            if total_len > START_PAYLOAD_MAX {
                return Err(RxError::LengthMismatch {
                    total_len,
                    last_seg,
                });
            }
            total_len
        } else {
            let min = START_PAYLOAD_MAX + CONT_PAYLOAD_MAX * (last_seg as usize - 1);
            let max = START_PAYLOAD_MAX + CONT_PAYLOAD_MAX * last_seg as usize;
            if total_len <= min || total_len > max {
                return Err(RxError::LengthMismatch {
                    total_len,
                    last_seg,
                });
            }
            START_PAYLOAD_MAX
        };

        if data.len() != expected_first {
            return Err(RxError::SegmentLength {
                index: 0,
                expected: expected_first,
                actual: data.len(),
            });
        }

        self.id = id;
        self.last_seg = last_seg;
        self.fcs = fcs;
        self.buf.clear();
        self.buf.resize(total_len, 0);
        self.buf[..data.len()].copy_from_slice(data);
        self.seg = seg_mask(last_seg) & !1;

        self.try_complete()
    }

    /// Handle a transaction continuation segment
    pub fn continuation(&mut self, id: u8, index: u8, data: &[u8]) -> Result<RxProgress, RxError> {
        if self.seg == 0 {
            if self.prev_id == Some(id) {
                debug!("Ignoring already received segment");
                return Ok(RxProgress::Duplicate);
            }
            return Err(RxError::UnknownTransaction(id));
        }

        if id != self.id {
            return Err(RxError::UnknownTransaction(id));
        }

        if index == 0 || index > self.last_seg {
            return Err(RxError::InvalidSegment(index));
        }

        let expected = self.cont_len(index, self.buf.len());
        if data.len() != expected {
            return Err(RxError::SegmentLength {
                index,
                expected,
                actual: data.len(),
            });
        }

        if self.seg & (1u64 << index) == 0 {
            debug!("Ignoring already received segment");
            return Ok(RxProgress::Duplicate);
        }

        let offset = START_PAYLOAD_MAX + CONT_PAYLOAD_MAX * (index as usize - 1);
        self.buf[offset..offset + data.len()].copy_from_slice(data);
        self.seg &= !(1u64 << index);

        self.try_complete()
    }

    fn try_complete(&mut self) -> Result<RxProgress, RxError> {
        if self.seg != 0 {
            return Ok(RxProgress::Pending);
        }

        let actual = fcs_calc(&self.buf);
        if actual != self.fcs {
            self.buf.clear();
            return Err(RxError::FcsMismatch {
                expected: self.fcs,
                actual,
            });
        }

        self.prev_id = Some(self.id);
        self.id = 0;
        let pdu = std::mem::replace(&mut self.buf, Vec::with_capacity(self.limit));
        Ok(RxProgress::Complete(pdu))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assembly() -> RxAssembly {
        RxAssembly::new(Vec::with_capacity(128))
    }

    #[test]
    fn test_fcs_table_matches_reflected_polynomial() {
        assert_eq!(FCS_TABLE[0], 0x00);
        assert_eq!(FCS_TABLE[1], 0x91);
        assert_eq!(FCS_TABLE[2], 0xE3);
        assert_eq!(FCS_TABLE[3], 0x72);
    }

    #[test]
    fn test_fcs_detects_corruption() {
        let pdu = [0x00, 0x05];
        let fcs = fcs_calc(&pdu);
        assert!(fcs_check(&pdu, fcs));
        assert!(!fcs_check(&[0x00, 0x04], fcs));
    }

    #[test]
    fn test_single_segment_completes() {
        let mut rx = assembly();
        let pdu = [0x00, 0x05];

        let progress = rx.start(1, 0, 2, fcs_calc(&pdu), &pdu).expect("Valid start");

        assert_eq!(progress, RxProgress::Complete(pdu.to_vec()));
        assert_eq!(rx.prev_id(), Some(1));
        assert_eq!(rx.pending_segments(), 0);
        assert!(rx.is_idle());
    }

    #[test]
    fn test_multi_segment_out_of_order() {
        let mut rx = assembly();
        let pdu: Vec<u8> = (0..65).collect();
        let fcs = fcs_calc(&pdu);

        // 20 + 23 + 22
        let progress = rx.start(4, 2, 65, fcs, &pdu[..20]).expect("Valid start");
        assert_eq!(progress, RxProgress::Pending);
        assert_eq!(rx.pending_segments(), 0b110);

        let progress = rx.continuation(4, 2, &pdu[43..]).expect("Last segment");
        assert_eq!(progress, RxProgress::Pending);

        let progress = rx.continuation(4, 1, &pdu[20..43]).expect("Middle segment");
        assert_eq!(progress, RxProgress::Complete(pdu));
        assert_eq!(rx.prev_id(), Some(4));
    }

    #[test]
    fn test_repeated_start_after_completion_is_duplicate() {
        let mut rx = assembly();
        let pdu = [0x03, 0x01];
        let fcs = fcs_calc(&pdu);

        rx.start(9, 0, 2, fcs, &pdu).expect("Valid start");
        assert_eq!(rx.start(9, 0, 2, fcs, &pdu), Ok(RxProgress::Duplicate));
        assert_eq!(rx.continuation(9, 1, &[0u8; 23]), Ok(RxProgress::Duplicate));
    }

    #[test]
    fn test_start_while_in_progress_rejected() {
        let mut rx = assembly();
        let pdu = vec![0xAA; 30];
        let fcs = fcs_calc(&pdu);

        rx.start(1, 1, 30, fcs, &pdu[..20]).expect("Valid start");
        assert_eq!(rx.start(2, 0, 1, 0, &[0]), Err(RxError::InProgress(1)));
        assert_eq!(rx.pending_segments(), 0b10);
    }

    #[test]
    fn test_duplicate_continuation_ignored() {
        let mut rx = assembly();
        let pdu = vec![0x55; 70];
        let fcs = fcs_calc(&pdu);

        rx.start(1, 3, 70, fcs, &pdu[..20]).expect("Valid start");
        rx.continuation(1, 1, &pdu[20..43]).expect("Segment 1");
        assert_eq!(
            rx.continuation(1, 1, &pdu[20..43]),
            Ok(RxProgress::Duplicate)
        );
        assert_eq!(rx.pending_segments(), 0b1100);
    }

    #[test]
    fn test_unknown_transaction_and_bad_index() {
        let mut rx = assembly();
        let pdu = vec![0x11; 30];

        assert_eq!(
            rx.continuation(1, 1, &pdu[20..]),
            Err(RxError::UnknownTransaction(1))
        );

        rx.start(1, 1, 30, fcs_calc(&pdu), &pdu[..20]).expect("Valid start");
        assert_eq!(
            rx.continuation(2, 1, &pdu[20..]),
            Err(RxError::UnknownTransaction(2))
        );
        assert_eq!(rx.continuation(1, 2, &pdu[20..]), Err(RxError::InvalidSegment(2)));
        assert_eq!(rx.continuation(1, 0, &pdu[20..]), Err(RxError::InvalidSegment(0)));
    }

    #[test]
    fn test_last_segment_length_checked() {
        let mut rx = assembly();
        let pdu = vec![0x22; 30];

        rx.start(1, 1, 30, fcs_calc(&pdu), &pdu[..20]).expect("Valid start");
        assert_eq!(
            rx.continuation(1, 1, &pdu[20..29]),
            Err(RxError::SegmentLength {
                index: 1,
                expected: 10,
                actual: 9
            })
        );
    }

    #[test]
    fn test_start_length_validation() {
        let mut rx = assembly();

        assert_eq!(rx.start(1, 0, 0, 0, &[]), Err(RxError::ZeroLength));
        assert_eq!(
            rx.start(1, 0, 200, 0, &[0; 20]),
            Err(RxError::TooLarge { len: 200, max: 128 })
        );
        // Multi-segment PDU that would fit in the start segment
        assert_eq!(
            rx.start(1, 1, 20, 0, &[0; 20]),
            Err(RxError::LengthMismatch {
                total_len: 20,
                last_seg: 1
            })
        );
        assert_eq!(
            rx.start(1, 0, 5, 0, &[0; 4]),
            Err(RxError::SegmentLength {
                index: 0,
                expected: 5,
                actual: 4
            })
        );
        assert!(rx.is_idle());
    }

    #[test]
    fn test_fcs_mismatch_abandons_transaction() {
        let mut rx = assembly();
        let pdu = [0x00, 0x05];
        let fcs = fcs_calc(&pdu);

        let result = rx.start(1, 0, 2, fcs ^ 0xFF, &pdu);
        assert_eq!(
            result,
            Err(RxError::FcsMismatch {
                expected: fcs ^ 0xFF,
                actual: fcs
            })
        );
        assert_eq!(rx.prev_id(), None);
        assert!(rx.is_idle());

        // The peer retransmits with the same id
        assert_eq!(
            rx.start(1, 0, 2, fcs, &pdu),
            Ok(RxProgress::Complete(pdu.to_vec()))
        );
    }
}
