//! Static and dynamic header tables, RFC 7541 §2.3, §3.2.
//!
//! Indices are 1-based and span both tables: `1..=61` addresses the fixed
//! static table, anything above addresses the dynamic table, most-recently
//! added entry first.

use bytes::Bytes;
use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct TableEntry {
    pub size: usize,
    pub name: Bytes,
    pub value: Bytes,
}

impl TableEntry {
    fn new(name: Bytes, value: Bytes) -> Self {
        Self {
            size: name.len() + value.len() + 32,
            name,
            value,
        }
    }
}

macro_rules! static_table {
    ( $( $name:expr => $value:expr ),+ $(,)? ) => {
        [
            $(
                TableEntry {
                    size: $name.len() + $value.len() + 32,
                    name: Bytes::from_static($name),
                    value: Bytes::from_static($value),
                }
            ),+
        ]
    };
}

/// https://httpwg.org/specs/rfc7541.html#static.table.definition
pub static STATIC_TABLE: [TableEntry; 61] = static_table![
    b":authority" => b"",
    b":method" => b"GET",
    b":method" => b"POST",
    b":path" => b"/",
    b":path" => b"/index.html",
    b":scheme" => b"http",
    b":scheme" => b"https",
    b":status" => b"200",
    b":status" => b"204",
    b":status" => b"206",
    b":status" => b"304",
    b":status" => b"400",
    b":status" => b"404",
    b":status" => b"500",
    b"accept-charset" => b"",
    b"accept-encoding" => b"gzip, deflate",
    b"accept-language" => b"",
    b"accept-ranges" => b"",
    b"accept" => b"",
    b"access-control-allow-origin" => b"",
    b"age" => b"",
    b"allow" => b"",
    b"authorization" => b"",
    b"cache-control" => b"",
    b"content-disposition" => b"",
    b"content-encoding" => b"",
    b"content-language" => b"",
    b"content-length" => b"",
    b"content-location" => b"",
    b"content-range" => b"",
    b"content-type" => b"",
    b"cookie" => b"",
    b"date" => b"",
    b"etag" => b"",
    b"expect" => b"",
    b"expires" => b"",
    b"from" => b"",
    b"host" => b"",
    b"if-match" => b"",
    b"if-modified-since" => b"",
    b"if-none-match" => b"",
    b"if-range" => b"",
    b"if-unmodified-since" => b"",
    b"last-modified" => b"",
    b"link" => b"",
    b"location" => b"",
    b"max-forwards" => b"",
    b"proxy-authenticate" => b"",
    b"proxy-authorization" => b"",
    b"range" => b"",
    b"referer" => b"",
    b"refresh" => b"",
    b"retry-after" => b"",
    b"server" => b"",
    b"set-cookie" => b"",
    b"strict-transport-security" => b"",
    b"transfer-encoding" => b"",
    b"user-agent" => b"",
    b"vary" => b"",
    b"via" => b"",
    b"www-authenticate" => b"",
];

/// The dynamic table, shared shape between encoder and decoder sides (RFC
/// 7541 keeps the two tables structurally identical, only their insertion
/// source differs).
#[derive(Debug, Clone)]
pub struct DynamicTable {
    max_size: usize,
    current_size: usize,
    entries: VecDeque<TableEntry>,
}

impl DynamicTable {
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            current_size: 0,
            entries: VecDeque::new(),
        }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn len(&self) -> usize {
        STATIC_TABLE.len() + self.entries.len()
    }

    /// Entries in the dynamic table, most-recently-inserted first, paired
    /// with their full 1-based table index (offset past the static table).
    pub fn iter(&self) -> impl Iterator<Item = (usize, &TableEntry)> {
        let base = STATIC_TABLE.len() + 1;
        self.entries.iter().enumerate().map(move |(i, e)| (base + i, e))
    }

    /// 1-based lookup spanning the static table then the dynamic table.
    pub fn get(&self, index: usize) -> Option<(Bytes, Bytes)> {
        if index == 0 {
            return None;
        }
        if let Some(entry) = STATIC_TABLE.get(index - 1) {
            return Some((entry.name.clone(), entry.value.clone()));
        }
        self.entries
            .get(index - 1 - STATIC_TABLE.len())
            .map(|entry| (entry.name.clone(), entry.value.clone()))
    }

    /// Inserts a new entry, evicting from the tail until the table fits
    /// within `max_size` (RFC 7541 §4.4). An entry larger than the whole
    /// table empties it rather than being stored, per §4.4's note that this
    /// is not an error.
    pub fn insert(&mut self, name: Bytes, value: Bytes) {
        let entry = TableEntry::new(name, value);
        self.current_size += entry.size;
        self.entries.push_front(entry);
        self.evict_to_fit();
    }

    /// A dynamic table size update (RFC 7541 §6.3) changes the eviction
    /// bound and immediately evicts if the table is now oversized.
    pub fn set_max_size(&mut self, max_size: usize) {
        self.max_size = max_size;
        self.evict_to_fit();
    }

    fn evict_to_fit(&mut self) {
        while self.current_size > self.max_size {
            match self.entries.pop_back() {
                Some(popped) => self.current_size -= popped.size,
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_table_indices_match_rfc_examples() {
        assert_eq!(STATIC_TABLE[0].name, Bytes::from_static(b":authority"));
        assert_eq!(STATIC_TABLE[1].value, Bytes::from_static(b"GET"));
        assert_eq!(STATIC_TABLE[7].value, Bytes::from_static(b"200"));
        assert_eq!(STATIC_TABLE.len(), 61);
    }

    #[test]
    fn dynamic_insert_and_lookup() {
        let mut table = DynamicTable::new(4096);
        table.insert(Bytes::from_static(b"custom-key"), Bytes::from_static(b"custom-value"));
        let (name, value) = table.get(62).unwrap();
        assert_eq!(name, Bytes::from_static(b"custom-key"));
        assert_eq!(value, Bytes::from_static(b"custom-value"));
    }

    #[test]
    fn eviction_drops_oldest_entries_first() {
        let mut table = DynamicTable::new(64);
        table.insert(Bytes::from_static(b"a"), Bytes::from_static(b"1")); // size 34
        table.insert(Bytes::from_static(b"b"), Bytes::from_static(b"2")); // size 34, evicts "a"
        assert_eq!(table.len(), STATIC_TABLE.len() + 1);
        let (name, _) = table.get(STATIC_TABLE.len() + 1).unwrap();
        assert_eq!(name, Bytes::from_static(b"b"));
    }

    #[test]
    fn resize_to_zero_empties_table() {
        let mut table = DynamicTable::new(4096);
        table.insert(Bytes::from_static(b"k"), Bytes::from_static(b"v"));
        table.set_max_size(0);
        assert_eq!(table.len(), STATIC_TABLE.len());
    }
}
