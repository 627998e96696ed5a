//! Multi-packet payload reassembly
//!
//! Chunked payloads are `[chunk_index, total_chunks, data...]`. Two disciplines
//! are in use on the wire and both are reproduced here:
//!
//! - [`ChunkOrdering::ArrivalOrder`]: data is appended as it arrives and the
//!   index byte is ignored. The robot handles SSID and password this way, so a
//!   reordered delivery yields a scrambled value.
//! - [`ChunkOrdering::Indexed`]: chunks land in slots keyed by index and are
//!   joined `1..=total` on completion, dropping zero padding. Scanners read
//!   serial numbers this way.

use tracing::debug;

use super::constants::{CHUNK_DATA_LEN, CHUNK_HEADER_LEN, MAX_CHUNKS};
use crate::error::ChunkError;

/// One parsed chunk header plus its data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk<'a> {
    pub index: u8,
    pub total: u8,
    pub data: &'a [u8],
}

impl<'a> Chunk<'a> {
    /// Split an instruction payload into header and data
    pub fn parse(payload: &'a [u8]) -> Result<Self, ChunkError> {
        if payload.len() < CHUNK_HEADER_LEN {
            return Err(ChunkError::MissingHeader);
        }

        let total = payload[1];
        if total == 0 || total as usize > MAX_CHUNKS {
            return Err(ChunkError::InvalidTotal(total));
        }

        Ok(Self {
            index: payload[0],
            total,
            data: &payload[CHUNK_HEADER_LEN..],
        })
    }
}

/// How arriving chunks are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOrdering {
    ArrivalOrder,
    Indexed,
}

/// Accumulates chunks until the declared total has been seen
#[derive(Debug, Clone)]
pub struct Reassembler {
    ordering: ChunkOrdering,
    /// Arrival-order accumulation
    buffer: Vec<u8>,
    /// Index-keyed arena; slot `i` holds chunk `i + 1`
    slots: [Vec<u8>; MAX_CHUNKS],
    present: u64,
    received: usize,
    expected: usize,
}

impl Reassembler {
    pub fn new(ordering: ChunkOrdering) -> Self {
        Self {
            ordering,
            buffer: Vec::new(),
            slots: std::array::from_fn(|_| Vec::new()),
            present: 0,
            received: 0,
            expected: 0,
        }
    }

    pub fn arrival_order() -> Self {
        Self::new(ChunkOrdering::ArrivalOrder)
    }

    pub fn indexed() -> Self {
        Self::new(ChunkOrdering::Indexed)
    }

    /// Chunks counted toward completion so far
    pub fn received(&self) -> usize {
        self.received
    }

    /// Total chunks declared by the most recent header
    pub fn expected(&self) -> usize {
        self.expected
    }

    pub fn is_idle(&self) -> bool {
        self.received == 0
    }

    /// Feed one chunked payload.
    ///
    /// Returns the reassembled bytes when this chunk completes the sequence,
    /// after which the reassembler is empty again. On a header error the
    /// partial state is discarded.
    pub fn push(&mut self, payload: &[u8]) -> Result<Option<Vec<u8>>, ChunkError> {
        let chunk = match Chunk::parse(payload) {
            Ok(chunk) => chunk,
            Err(e) => {
                self.reset();
                return Err(e);
            }
        };

        self.expected = chunk.total as usize;
        debug!(
            "Chunk {} of {} ({} data bytes, {:?})",
            chunk.index,
            chunk.total,
            chunk.data.len(),
            self.ordering
        );

        match self.ordering {
            ChunkOrdering::ArrivalOrder => {
                self.buffer.extend_from_slice(chunk.data);
                self.received += 1;
            }
            ChunkOrdering::Indexed => {
                if chunk.index == 0 || chunk.index > chunk.total {
                    debug!("Ignoring chunk index {} outside 1..={}", chunk.index, chunk.total);
                    return Ok(None);
                }
                let slot = chunk.index as usize - 1;
                self.slots[slot].clear();
                self.slots[slot].extend_from_slice(chunk.data);
                self.present |= 1u64 << slot;
                self.received = self.present.count_ones() as usize;
            }
        }

        if self.received >= self.expected {
            Ok(Some(self.finish()))
        } else {
            Ok(None)
        }
    }

    /// Drop any partial sequence
    pub fn reset(&mut self) {
        self.buffer.clear();
        for slot in self.slots.iter_mut() {
            slot.clear();
        }
        self.present = 0;
        self.received = 0;
        self.expected = 0;
    }

    fn finish(&mut self) -> Vec<u8> {
        let out = match self.ordering {
            ChunkOrdering::ArrivalOrder => std::mem::take(&mut self.buffer),
            ChunkOrdering::Indexed => {
                let mut out = Vec::new();
                for slot in 0..self.expected {
                    if self.present & (1u64 << slot) != 0 {
                        out.extend(self.slots[slot].iter().copied().filter(|&b| b != 0x00));
                    }
                }
                out
            }
        };
        self.reset();
        out
    }
}

/// Split `data` into chunk payloads of at most `chunk_len` data bytes each.
///
/// Indices are 1-based. Empty input still produces one empty chunk so the
/// receiver sees a complete sequence.
pub fn split_chunks(data: &[u8], chunk_len: usize) -> Result<Vec<Vec<u8>>, ChunkError> {
    let chunk_len = chunk_len.max(1);
    let pieces: Vec<&[u8]> = if data.is_empty() {
        vec![data]
    } else {
        data.chunks(chunk_len).collect()
    };

    if pieces.len() > MAX_CHUNKS {
        return Err(ChunkError::InvalidTotal(pieces.len().min(u8::MAX as usize) as u8));
    }

    let total = pieces.len() as u8;
    Ok(pieces
        .into_iter()
        .enumerate()
        .map(|(i, piece)| {
            let mut payload = Vec::with_capacity(CHUNK_HEADER_LEN + piece.len());
            payload.push(i as u8 + 1);
            payload.push(total);
            payload.extend_from_slice(piece);
            payload
        })
        .collect())
}

/// [`split_chunks`] with the default outbound chunk size
pub fn split_default(data: &[u8]) -> Result<Vec<Vec<u8>>, ChunkError> {
    split_chunks(data, CHUNK_DATA_LEN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn chunk(index: u8, total: u8, data: &[u8]) -> Vec<u8> {
        let mut payload = vec![index, total];
        payload.extend_from_slice(data);
        payload
    }

    #[test]
    fn test_arrival_order_completes_on_last_chunk() {
        let mut reassembler = Reassembler::arrival_order();

        assert_eq!(reassembler.push(&chunk(1, 3, b"Hom")).unwrap(), None);
        assert_eq!(reassembler.push(&chunk(2, 3, b"eNe")).unwrap(), None);
        assert_eq!(reassembler.received(), 2);
        assert_eq!(reassembler.push(&chunk(3, 3, b"t")).unwrap(), Some(b"HomeNet".to_vec()));
        assert!(reassembler.is_idle());
    }

    #[test]
    fn test_arrival_order_ignores_indices() {
        let mut in_order = Reassembler::arrival_order();
        in_order.push(&chunk(1, 2, b"ABC")).unwrap();
        let expected = in_order.push(&chunk(2, 2, b"DEF")).unwrap().unwrap();

        let mut swapped = Reassembler::arrival_order();
        swapped.push(&chunk(2, 2, b"DEF")).unwrap();
        let scrambled = swapped.push(&chunk(1, 2, b"ABC")).unwrap().unwrap();

        assert_eq!(expected, b"ABCDEF");
        assert_eq!(scrambled, b"DEFABC");
        assert_ne!(expected, scrambled);
    }

    #[test]
    fn test_arrival_order_keeps_zero_bytes() {
        let mut reassembler = Reassembler::arrival_order();
        let out = reassembler.push(&chunk(1, 1, &[b'a', 0, b'b'])).unwrap();
        assert_eq!(out, Some(vec![b'a', 0, b'b']));
    }

    #[test]
    fn test_indexed_reorders_and_strips_padding() {
        let mut reassembler = Reassembler::indexed();

        assert_eq!(reassembler.push(&chunk(2, 2, b"-0042\0\0")).unwrap(), None);
        let serial = reassembler.push(&chunk(1, 2, b"B2\0X1")).unwrap();
        assert_eq!(serial, Some(b"B2X1-0042".to_vec()));
    }

    #[test]
    fn test_indexed_duplicate_does_not_complete() {
        let mut reassembler = Reassembler::indexed();

        reassembler.push(&chunk(1, 2, b"AA")).unwrap();
        assert_eq!(reassembler.push(&chunk(1, 2, b"BB")).unwrap(), None);
        assert_eq!(reassembler.received(), 1);
        assert_eq!(reassembler.push(&chunk(2, 2, b"CC")).unwrap(), Some(b"BBCC".to_vec()));
    }

    #[test]
    fn test_indexed_ignores_out_of_range_index() {
        let mut reassembler = Reassembler::indexed();

        assert_eq!(reassembler.push(&chunk(0, 1, b"junk")).unwrap(), None);
        assert_eq!(reassembler.push(&chunk(5, 2, b"junk")).unwrap(), None);
        assert!(reassembler.is_idle());
        assert_eq!(reassembler.push(&chunk(1, 1, b"OK")).unwrap(), Some(b"OK".to_vec()));
    }

    #[test]
    fn test_header_errors_reset_state() {
        let mut reassembler = Reassembler::arrival_order();
        reassembler.push(&chunk(1, 2, b"half")).unwrap();

        assert_eq!(reassembler.push(&[0x01]), Err(ChunkError::MissingHeader));
        assert!(reassembler.is_idle());

        reassembler.push(&chunk(1, 2, b"half")).unwrap();
        assert_eq!(reassembler.push(&chunk(2, 0, b"")), Err(ChunkError::InvalidTotal(0)));
        assert_eq!(
            reassembler.push(&chunk(1, (MAX_CHUNKS + 1) as u8, b"")),
            Err(ChunkError::InvalidTotal(65))
        );
        assert!(reassembler.is_idle());
    }

    #[test]
    fn test_split_chunks() {
        let chunks = split_chunks(b"abcdefghij", 4).unwrap();
        assert_eq!(
            chunks,
            vec![chunk(1, 3, b"abcd"), chunk(2, 3, b"efgh"), chunk(3, 3, b"ij")]
        );

        assert_eq!(split_chunks(b"", 4).unwrap(), vec![chunk(1, 1, b"")]);
        assert!(split_chunks(&[b'x'; MAX_CHUNKS * 2 + 1], 2).is_err());
    }

    #[test]
    fn test_split_then_arrival_order_roundtrip() {
        let password = b"correct horse battery staple;$(reboot);";
        let mut reassembler = Reassembler::arrival_order();
        let mut result = None;
        for payload in split_default(password).unwrap() {
            result = reassembler.push(&payload).unwrap();
        }
        assert_eq!(result.as_deref(), Some(&password[..]));
    }

    /// A serial together with its chunks in arbitrary order
    fn shuffled_serial() -> impl Strategy<Value = (Vec<u8>, Vec<Vec<u8>>)> {
        (1usize..20)
            .prop_flat_map(|chunk_len| {
                let max_len = (chunk_len * MAX_CHUNKS).min(200);
                (proptest::collection::vec(1u8..=255, 1..=max_len), Just(chunk_len))
            })
            .prop_flat_map(|(serial, chunk_len)| {
                let chunks = split_chunks(&serial, chunk_len).unwrap();
                (Just(serial), Just(chunks).prop_shuffle())
            })
    }

    proptest! {
        #[test]
        fn prop_indexed_is_order_independent((serial, chunks) in shuffled_serial()) {
            let mut reassembler = Reassembler::indexed();
            let mut result = None;
            for payload in &chunks {
                prop_assert!(result.is_none());
                result = reassembler.push(payload).unwrap();
            }
            prop_assert_eq!(result, Some(serial));
        }
    }
}
