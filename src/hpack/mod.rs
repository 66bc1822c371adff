//! HPACK header compression, RFC 7541.
//!
//! The teacher's own `hpack.rs` only sketched the table shapes (`TableEntry`,
//! `Table`, the `static_table!` macro) and left `Encoder::encode` and
//! `Decoder::decode` unimplemented; those shapes are carried over into
//! [`table`] but the codec itself is written fresh against the RFC, since
//! there was nothing finished to generalize.

mod huffman;
mod integer;
mod table;

use bytes::{Buf, Bytes, BytesMut};
use table::{DynamicTable, STATIC_TABLE};

#[derive(thiserror::Error, Debug)]
pub enum HpackError {
    #[error("truncated integer representation")]
    TruncatedInteger,
    #[error("integer representation overflowed")]
    IntegerOverflow,
    #[error("truncated string literal")]
    TruncatedString,
    #[error("invalid Huffman code sequence")]
    HuffmanDecode,
    #[error("Huffman-decoded data contained the EOS symbol")]
    HuffmanEosInData,
    #[error("header field referenced table index {0}, which does not exist")]
    InvalidIndex(usize),
    #[error("dynamic table size update appeared after a header field in the same block")]
    DynamicTableSizeUpdateNotAtStart,
    #[error("decoded header list size {size} exceeds the limit of {limit}")]
    HeaderListTooLarge { limit: usize, size: usize },
    #[error("dynamic table size update to {size} exceeds the advertised limit of {limit}")]
    DynamicTableSizeUpdateExceedsLimit { limit: usize, size: usize },
}

/// RFC 7541 §6.1-6.3 representation-form tags, as the high bits of the first
/// octet of a header field representation.
mod prefix {
    pub const INDEXED: u8 = 0x80;
    pub const LITERAL_INCREMENTAL: u8 = 0x40;
    pub const DYNAMIC_TABLE_SIZE_UPDATE: u8 = 0x20;
    pub const LITERAL_NEVER_INDEXED: u8 = 0x10;
    pub const LITERAL_WITHOUT_INDEXING: u8 = 0x00;
}

/// How a literal header field should be represented on the wire. Incremental
/// indexing is the default (and the only form the encoder currently emits);
/// `NeverIndexed` exists so callers can mark sensitive fields (e.g.
/// `authorization`) per RFC 7541 §7.1.3, instructing proxies not to recompress
/// them into a different representation either.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Indexing {
    Incremental,
    WithoutIndexing,
    NeverIndexed,
}

enum TableMatch {
    Full(usize),
    NameOnly(usize),
}

#[derive(Debug, Clone)]
pub struct Encoder {
    table: DynamicTable,
    pending_size_update: Option<usize>,
}

impl Encoder {
    pub fn new() -> Self {
        Self::with_size(4096)
    }

    pub fn with_size(dynamic_table_size: usize) -> Self {
        Self {
            table: DynamicTable::new(dynamic_table_size),
            pending_size_update: None,
        }
    }

    /// Shrinks or grows the encoder's view of the dynamic table. The change
    /// is announced to the peer as a dynamic table size update at the start
    /// of the next encoded block (RFC 7541 §6.3).
    pub fn set_max_dynamic_table_size(&mut self, size: usize) {
        self.table.set_max_size(size);
        self.pending_size_update = Some(size);
    }

    /// Encodes a header list using incremental indexing for every field.
    pub fn encode<'a, I>(&mut self, headers: I) -> Bytes
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut buf = BytesMut::new();
        self.encode_into(headers.into_iter().map(|(n, v)| (n, v, Indexing::Incremental)), &mut buf);
        buf.freeze()
    }

    /// Encodes a header list where each field carries its own indexing
    /// choice, e.g. to keep a sensitive header out of the dynamic table.
    pub fn encode_with_indexing<'a, I>(&mut self, headers: I) -> Bytes
    where
        I: IntoIterator<Item = (&'a str, &'a str, Indexing)>,
    {
        let mut buf = BytesMut::new();
        self.encode_into(headers, &mut buf);
        buf.freeze()
    }

    fn encode_into<'a, I>(&mut self, headers: I, buf: &mut BytesMut)
    where
        I: IntoIterator<Item = (&'a str, &'a str, Indexing)>,
    {
        if let Some(size) = self.pending_size_update.take() {
            integer::encode(size, 5, prefix::DYNAMIC_TABLE_SIZE_UPDATE, buf);
        }
        for (name, value, indexing) in headers {
            self.encode_header(name, value, indexing, buf);
        }
    }

    fn encode_header(&mut self, name: &str, value: &str, indexing: Indexing, buf: &mut BytesMut) {
        if let Some(TableMatch::Full(index)) = self.find(name, value) {
            integer::encode(index, 7, prefix::INDEXED, buf);
            return;
        }

        let (prefix_bits, leading_bits) = match indexing {
            Indexing::Incremental => (6, prefix::LITERAL_INCREMENTAL),
            Indexing::WithoutIndexing => (4, prefix::LITERAL_WITHOUT_INDEXING),
            Indexing::NeverIndexed => (4, prefix::LITERAL_NEVER_INDEXED),
        };

        match self.find(name, value) {
            Some(TableMatch::NameOnly(index)) => integer::encode(index, prefix_bits, leading_bits, buf),
            _ => {
                integer::encode(0, prefix_bits, leading_bits, buf);
                write_string(name.as_bytes(), buf);
            }
        }
        write_string(value.as_bytes(), buf);

        if indexing == Indexing::Incremental {
            self.table.insert(
                Bytes::copy_from_slice(name.as_bytes()),
                Bytes::copy_from_slice(value.as_bytes()),
            );
        }
    }

    fn find(&self, name: &str, value: &str) -> Option<TableMatch> {
        let mut name_only = None;
        for (i, entry) in STATIC_TABLE.iter().enumerate() {
            if entry.name == name.as_bytes() {
                if entry.value == value.as_bytes() {
                    return Some(TableMatch::Full(i + 1));
                }
                name_only.get_or_insert(i + 1);
            }
        }
        for (index, entry) in self.table.iter() {
            if entry.name == name.as_bytes() {
                if entry.value == value.as_bytes() {
                    return Some(TableMatch::Full(index));
                }
                name_only.get_or_insert(index);
            }
        }
        name_only.map(TableMatch::NameOnly)
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::with_size(4096)
    }
}

fn write_string(data: &[u8], buf: &mut BytesMut) {
    let huffman_bits = huffman::encoded_bit_len(data);
    let huffman_len = (huffman_bits + 7) / 8;
    if huffman_len < data.len() {
        integer::encode(huffman_len, 7, prefix::INDEXED, buf);
        huffman::encode(data, buf);
    } else {
        integer::encode(data.len(), 7, 0, buf);
        buf.extend_from_slice(data);
    }
}

fn read_string(buf: &mut &[u8]) -> Result<Bytes, HpackError> {
    let huffman_coded = buf.first().copied().ok_or(HpackError::TruncatedString)? & prefix::INDEXED != 0;
    let len = integer::decode(7, buf)?;
    if buf.len() < len {
        return Err(HpackError::TruncatedString);
    }
    let raw = buf.copy_to_bytes(len);
    if huffman_coded {
        Ok(Bytes::from(huffman::decode(&raw)?))
    } else {
        Ok(raw)
    }
}

#[derive(Debug, Clone)]
pub struct Decoder {
    table: DynamicTable,
    max_header_list_size: Option<usize>,
    /// The SETTINGS_HEADER_TABLE_SIZE value this endpoint advertised to its
    /// peer. A dynamic-table-size-update above this is a peer protocol
    /// violation (RFC 7541 §6.3), not just a local resize.
    advertised_max_size: usize,
}

impl Decoder {
    pub fn new() -> Self {
        Self::with_size(4096)
    }

    pub fn with_size(dynamic_table_size: usize) -> Self {
        Self {
            table: DynamicTable::new(dynamic_table_size),
            max_header_list_size: None,
            advertised_max_size: dynamic_table_size,
        }
    }

    /// Enforces SETTINGS_MAX_HEADER_LIST_SIZE (RFC 7541 §4.2): the running
    /// sum of `name.len() + value.len() + 32` across a decoded block must
    /// stay within the limit, or decoding fails.
    pub fn set_max_header_list_size(&mut self, limit: Option<usize>) {
        self.max_header_list_size = limit;
    }

    pub fn max_dynamic_table_size(&self) -> usize {
        self.table.max_size()
    }

    pub fn decode(&mut self, data: impl AsRef<[u8]>) -> Result<Vec<(Bytes, Bytes)>, HpackError> {
        let mut cur: &[u8] = data.as_ref();
        let mut headers = Vec::new();
        let mut size_update_allowed = true;
        let mut total_size = 0usize;
        // RFC 7541 §4.2 lets an endpoint keep decoding past the configured
        // limit to keep the dynamic table in sync with the peer's encoder
        // rather than bailing mid-block; the overflow is reported once the
        // whole block (and every table insertion in it) has been processed.
        let mut overflow: Option<(usize, usize)> = None;

        while !cur.is_empty() {
            let first = cur[0];
            if first & prefix::INDEXED != 0 {
                size_update_allowed = false;
                let index = integer::decode(7, &mut cur)?;
                let (name, value) = self.table.get(index).ok_or(HpackError::InvalidIndex(index))?;
                self.accumulate(&mut total_size, &name, &value, &mut overflow);
                headers.push((name, value));
            } else if first & prefix::LITERAL_INCREMENTAL != 0 {
                size_update_allowed = false;
                let (name, value) = self.decode_literal(&mut cur, 6)?;
                self.accumulate(&mut total_size, &name, &value, &mut overflow);
                self.table.insert(name.clone(), value.clone());
                headers.push((name, value));
            } else if first & prefix::DYNAMIC_TABLE_SIZE_UPDATE != 0 {
                if !size_update_allowed {
                    return Err(HpackError::DynamicTableSizeUpdateNotAtStart);
                }
                let size = integer::decode(5, &mut cur)?;
                if size > self.advertised_max_size {
                    return Err(HpackError::DynamicTableSizeUpdateExceedsLimit {
                        limit: self.advertised_max_size,
                        size,
                    });
                }
                self.table.set_max_size(size);
            } else {
                // 0000xxxx (without indexing) and 0001xxxx (never indexed)
                // share a 4-bit prefix and differ only in downstream
                // forwarding semantics, which this decoder does not need to
                // distinguish.
                size_update_allowed = false;
                let (name, value) = self.decode_literal(&mut cur, 4)?;
                self.accumulate(&mut total_size, &name, &value, &mut overflow);
                headers.push((name, value));
            }
        }

        if let Some((limit, size)) = overflow {
            return Err(HpackError::HeaderListTooLarge { limit, size });
        }
        Ok(headers)
    }

    fn decode_literal(&self, cur: &mut &[u8], prefix_bits: u8) -> Result<(Bytes, Bytes), HpackError> {
        let index = integer::decode(prefix_bits, cur)?;
        let name = if index == 0 {
            read_string(cur)?
        } else {
            self.table.get(index).ok_or(HpackError::InvalidIndex(index))?.0
        };
        let value = read_string(cur)?;
        Ok((name, value))
    }

    fn accumulate(&self, total: &mut usize, name: &Bytes, value: &Bytes, overflow: &mut Option<(usize, usize)>) {
        *total += name.len() + value.len() + 32;
        if let Some(limit) = self.max_header_list_size {
            if *total > limit && overflow.is_none() {
                *overflow = Some((limit, *total));
            }
        }
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::with_size(4096)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ::hpack as their_hpack;

    #[test]
    fn encode_then_decode_round_trip() {
        let mut encoder = Encoder::default();
        let mut decoder = Decoder::default();
        let headers = vec![(":method", "GET"), (":path", "/"), ("custom-key", "custom-value")];
        let wire = encoder.encode(headers.clone());
        let decoded = decoder.decode(&wire).unwrap();
        let expected: Vec<(Bytes, Bytes)> = headers
            .into_iter()
            .map(|(k, v)| (Bytes::copy_from_slice(k.as_bytes()), Bytes::copy_from_slice(v.as_bytes())))
            .collect();
        assert_eq!(decoded, expected);
    }

    #[test]
    fn repeated_header_is_served_from_dynamic_table() {
        let mut encoder = Encoder::default();
        let first = encoder.encode(vec![("custom-key", "custom-value")]);
        let second = encoder.encode(vec![("custom-key", "custom-value")]);
        // A full dynamic-table hit fits in a single indexed byte.
        assert!(second.len() < first.len());
    }

    #[test]
    fn decodes_output_of_the_external_decoder() {
        let mut their_encoder = their_hpack::Encoder::new();
        let mut our_decoder = Decoder::default();
        let headers = vec![(&b":method"[..], &b"GET"[..]), (&b":path"[..], &b"/"[..])];
        let wire = their_encoder.encode(headers.clone());
        let decoded = our_decoder.decode(&wire).unwrap();
        let expected: Vec<(Bytes, Bytes)> = headers
            .into_iter()
            .map(|(k, v)| (Bytes::copy_from_slice(k), Bytes::copy_from_slice(v)))
            .collect();
        assert_eq!(decoded, expected);
    }

    #[test]
    fn our_encoder_is_decoded_by_the_external_decoder() {
        let mut our_encoder = Encoder::default();
        let mut their_decoder = their_hpack::Decoder::new();
        let headers = vec![(":method", "GET"), (":path", "/")];
        let wire = our_encoder.encode(headers.clone());
        let decoded = their_decoder.decode(&wire).unwrap();
        let expected: Vec<(Vec<u8>, Vec<u8>)> = headers
            .into_iter()
            .map(|(k, v)| (k.as_bytes().to_vec(), v.as_bytes().to_vec()))
            .collect();
        assert_eq!(decoded, expected);
    }

    #[test]
    fn dynamic_table_size_update_mid_block_is_rejected() {
        let mut buf = BytesMut::new();
        // Indexed field (":method": "GET", index 2), then an out-of-place
        // size update.
        integer::encode(2, 7, prefix::INDEXED, &mut buf);
        integer::encode(100, 5, prefix::DYNAMIC_TABLE_SIZE_UPDATE, &mut buf);
        let mut decoder = Decoder::default();
        let err = decoder.decode(&buf).unwrap_err();
        assert!(matches!(err, HpackError::DynamicTableSizeUpdateNotAtStart));
    }

    #[test]
    fn unknown_index_is_rejected() {
        let mut buf = BytesMut::new();
        integer::encode(200, 7, prefix::INDEXED, &mut buf);
        let mut decoder = Decoder::default();
        assert!(matches!(decoder.decode(&buf), Err(HpackError::InvalidIndex(200))));
    }

    #[test]
    fn header_list_size_limit_is_enforced() {
        let mut encoder = Encoder::default();
        let wire = encoder.encode(vec![("x", "y")]);
        let mut decoder = Decoder::default();
        decoder.set_max_header_list_size(Some(4));
        assert!(matches!(decoder.decode(&wire), Err(HpackError::HeaderListTooLarge { .. })));
    }

    #[test]
    fn oversized_dynamic_table_size_update_is_rejected() {
        let mut decoder = Decoder::with_size(4096);
        let mut wire = BytesMut::new();
        integer::encode(1 << 20, 5, prefix::DYNAMIC_TABLE_SIZE_UPDATE, &mut wire);
        assert!(matches!(
            decoder.decode(&wire),
            Err(HpackError::DynamicTableSizeUpdateExceedsLimit { limit: 4096, .. })
        ));
    }

    #[test]
    fn dynamic_table_size_update_within_the_advertised_limit_is_applied() {
        let mut decoder = Decoder::with_size(4096);
        let mut wire = BytesMut::new();
        integer::encode(100, 5, prefix::DYNAMIC_TABLE_SIZE_UPDATE, &mut wire);
        decoder.decode(&wire).unwrap();
        assert_eq!(decoder.max_dynamic_table_size(), 100);
    }
}
