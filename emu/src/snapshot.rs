//! Self-describing snapshot format.
//!
//! A snapshot is a tag/length/value stream: a 32-bit little-endian total size
//! (counting itself) followed by records. Each record is a one-byte tag, a
//! length-prefixed UTF-8 key and a tag-dependent body:
//!
//! | Tag | Kind   | Body                               |
//! |-----|--------|------------------------------------|
//! | 1   | INT32  | 4 bytes, little endian             |
//! | 2   | STRING | `u32` length + bytes               |
//! | 3   | STRUCT | a nested stream                    |
//! | 4   | BLOB   | `u32` length + raw bytes           |
//! | 5   | BOOL   | 1 byte, zero or non-zero           |
//!
//! Decoding is strictly bounded: a nested stream that claims more bytes than
//! its container holds aborts the whole restore.

use thiserror::Error;

const TAG_INT: u8 = 1;
const TAG_STRING: u8 = 2;
const TAG_STRUCT: u8 = 3;
const TAG_BLOB: u8 = 4;
const TAG_BOOL: u8 = 5;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("snapshot stream ends before its declared size")]
    Truncated,
    #[error("nested stream size exceeds the bytes available")]
    Oversize,
    #[error("unknown snapshot tag {0}")]
    BadTag(u8),
    #[error("snapshot key or string is not valid UTF-8")]
    BadUtf8,
}

/// One value in the snapshot tree. Streams always carry a [`Node::Struct`] at
/// the top level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Int(i32),
    Str(String),
    Struct(Vec<(String, Node)>),
    Blob(Vec<u8>),
    Bool(bool),
}

impl Node {
    /// Looks up a field of a struct node by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Self> {
        match self {
            Self::Struct(fields) => fields
                .iter()
                .find(|(name, _)| name == key)
                .map(|(_, node)| node),
            _ => None,
        }
    }

    /// Serializes the tree.
    ///
    /// # Panics
    ///
    /// The top level of a stream is a record list, so `self` must be a
    /// [`Node::Struct`]; anything else is a programming error.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let Self::Struct(fields) = self else {
            panic!("snapshot root must be a struct node");
        };
        encode_stream(fields)
    }

    /// Decodes a stream back into a tree.
    ///
    /// # Errors
    ///
    /// Fails on truncation, size overruns, unknown tags and invalid UTF-8.
    /// Trailing bytes beyond the declared size are ignored.
    pub fn from_bytes(data: &[u8]) -> Result<Self, SnapshotError> {
        let mut reader = Reader { data, pos: 0 };
        let fields = reader.read_stream(data.len())?;
        Ok(Self::Struct(fields))
    }
}

fn encode_stream(fields: &[(String, Node)]) -> Vec<u8> {
    let mut body = Vec::new();
    for (key, node) in fields {
        body.push(match node {
            Node::Int(_) => TAG_INT,
            Node::Str(_) => TAG_STRING,
            Node::Struct(_) => TAG_STRUCT,
            Node::Blob(_) => TAG_BLOB,
            Node::Bool(_) => TAG_BOOL,
        });
        body.extend_from_slice(&(key.len() as u32).to_le_bytes());
        body.extend_from_slice(key.as_bytes());
        match node {
            Node::Int(value) => body.extend_from_slice(&value.to_le_bytes()),
            Node::Str(value) => {
                body.extend_from_slice(&(value.len() as u32).to_le_bytes());
                body.extend_from_slice(value.as_bytes());
            }
            Node::Struct(nested) => body.extend_from_slice(&encode_stream(nested)),
            Node::Blob(bytes) => {
                body.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
                body.extend_from_slice(bytes);
            }
            Node::Bool(value) => body.push(u8::from(*value)),
        }
    }

    let mut stream = Vec::with_capacity(body.len() + 4);
    stream.extend_from_slice(&(body.len() as u32 + 4).to_le_bytes());
    stream.extend_from_slice(&body);
    stream
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn take(&mut self, len: usize, limit: usize) -> Result<&[u8], SnapshotError> {
        if self.pos.checked_add(len).is_none_or(|end| end > limit) {
            return Err(SnapshotError::Truncated);
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    fn read_u8(&mut self, limit: usize) -> Result<u8, SnapshotError> {
        Ok(self.take(1, limit)?[0])
    }

    fn read_u32(&mut self, limit: usize) -> Result<u32, SnapshotError> {
        let bytes = self.take(4, limit)?;
        Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
    }

    fn read_string(&mut self, limit: usize) -> Result<String, SnapshotError> {
        let len = self.read_u32(limit)? as usize;
        let bytes = self.take(len, limit)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| SnapshotError::BadUtf8)
    }

    /// Reads one stream starting at the cursor; `available` bounds how far
    /// this stream may reach into its container.
    fn read_stream(&mut self, available: usize) -> Result<Vec<(String, Node)>, SnapshotError> {
        let total = self.read_u32(available)? as usize;
        if total < 4 {
            return Err(SnapshotError::Truncated);
        }
        let limit = self.pos - 4 + total;
        if limit > available {
            return Err(SnapshotError::Oversize);
        }

        let mut fields = Vec::new();
        while self.pos < limit {
            let tag = self.read_u8(limit)?;
            let key = self.read_string(limit)?;
            let node = match tag {
                TAG_INT => {
                    let bytes = self.take(4, limit)?;
                    Node::Int(i32::from_le_bytes(bytes.try_into().unwrap()))
                }
                TAG_STRING => Node::Str(self.read_string(limit)?),
                TAG_STRUCT => Node::Struct(self.read_stream(limit)?),
                TAG_BLOB => {
                    let len = self.read_u32(limit)? as usize;
                    Node::Blob(self.take(len, limit)?.to_vec())
                }
                TAG_BOOL => Node::Bool(self.read_u8(limit)? != 0),
                tag => return Err(SnapshotError::BadTag(tag)),
            };
            fields.push((key, node));
        }
        self.pos = limit;
        Ok(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> Node {
        Node::Struct(vec![
            ("cycles".into(), Node::Int(-123_456)),
            ("title".into(), Node::Str("HELLOWORLD".into())),
            (
                "dma".into(),
                Node::Struct(vec![
                    ("enable".into(), Node::Bool(true)),
                    ("count".into(), Node::Int(0x4000)),
                ]),
            ),
            ("ram".into(), Node::Blob(vec![0xAA; 64])),
            ("halted".into(), Node::Bool(false)),
        ])
    }

    #[test]
    fn roundtrip_is_identity() {
        let tree = sample();
        let bytes = tree.to_bytes();
        assert_eq!(Node::from_bytes(&bytes).unwrap(), tree);
    }

    #[test]
    fn declared_size_counts_itself() {
        let bytes = Node::Struct(Vec::new()).to_bytes();
        assert_eq!(bytes, vec![4, 0, 0, 0]);
    }

    #[test]
    fn field_lookup() {
        let tree = sample();
        assert_eq!(tree.get("cycles"), Some(&Node::Int(-123_456)));
        assert_eq!(tree.get("dma").unwrap().get("enable"), Some(&Node::Bool(true)));
        assert_eq!(tree.get("missing"), None);
    }

    #[test]
    fn truncated_stream_is_rejected() {
        let bytes = sample().to_bytes();
        assert_eq!(
            Node::from_bytes(&bytes[..bytes.len() - 1]),
            Err(SnapshotError::Oversize)
        );
    }

    #[test]
    fn nested_oversize_is_rejected() {
        let mut bytes = sample().to_bytes();
        // Inflate the nested struct's declared size past its container.
        let dma_offset = bytes
            .windows(3)
            .position(|window| window == b"dma")
            .unwrap()
            + 3;
        bytes[dma_offset..dma_offset + 4].copy_from_slice(&10_000_u32.to_le_bytes());
        assert_eq!(Node::from_bytes(&bytes), Err(SnapshotError::Oversize));
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let mut bytes = Node::Struct(vec![("x".into(), Node::Bool(true))]).to_bytes();
        bytes[4] = 9;
        assert_eq!(Node::from_bytes(&bytes), Err(SnapshotError::BadTag(9)));
    }

    #[test]
    fn blob_longer_than_stream_is_rejected() {
        let mut bytes = Node::Struct(vec![("b".into(), Node::Blob(vec![1, 2, 3]))]).to_bytes();
        // Claim a 3-byte blob is much longer.
        let len_offset = bytes.len() - 7;
        bytes[len_offset..len_offset + 4].copy_from_slice(&100_u32.to_le_bytes());
        assert_eq!(Node::from_bytes(&bytes), Err(SnapshotError::Truncated));
    }
}
