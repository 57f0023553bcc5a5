//! Log Reader
//!
//! Sequential iteration over the frames in a contiguous log image.

use crate::error::Result;

use super::record::{decode_record, RecordView};

/// Iterates frames in order. Stops after the first error.
pub struct LogReader<'a> {
    data: &'a [u8],
    /// Log offset of `data[0]`
    base: u64,
    /// Current position within `data`
    position: usize,
    failed: bool,
}

impl<'a> LogReader<'a> {
    /// Read a log image that starts at log offset 0
    pub fn new(data: &'a [u8]) -> Self {
        Self::with_base(data, 0)
    }

    /// Read a log image whose first byte sits at log offset `base`
    pub fn with_base(data: &'a [u8], base: u64) -> Self {
        Self {
            data,
            base,
            position: 0,
            failed: false,
        }
    }
}

impl<'a> Iterator for LogReader<'a> {
    type Item = Result<RecordView<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        match decode_record(self.data, self.position, self.base) {
            Ok(Some(record)) => {
                self.position += record.frame_len as usize;
                Some(Ok(record))
            }
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::{encode_record, RecordKind};
    use bytes::BytesMut;

    #[test]
    fn test_reads_all_frames_in_order() {
        let mut buf = BytesMut::new();
        encode_record(&mut buf, 1, RecordKind::Put, b"a", b"1").unwrap();
        encode_record(&mut buf, 2, RecordKind::Put, b"b", b"2").unwrap();
        encode_record(&mut buf, 3, RecordKind::Delete, b"a", b"").unwrap();

        let records: Vec<_> = LogReader::new(&buf).collect::<Result<_>>().unwrap();

        assert_eq!(records.len(), 3);
        assert_eq!(records.iter().map(|r| r.seq).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(records[2].kind, RecordKind::Delete);
        assert_eq!(records[1].offset, records[0].frame_len as u64);
    }

    #[test]
    fn test_stops_after_corruption() {
        let mut buf = BytesMut::new();
        encode_record(&mut buf, 1, RecordKind::Put, b"a", b"1").unwrap();
        buf.extend_from_slice(&[0xAB; 5]);

        let mut reader = LogReader::new(&buf);
        assert!(reader.next().unwrap().is_ok());
        assert!(reader.next().unwrap().is_err());
        assert!(reader.next().is_none());
    }
}
