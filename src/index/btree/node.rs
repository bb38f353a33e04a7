//! B-tree node and its on-page body encoding.

/// Index of a node in the tree's arena.
pub type NodeId = usize;

/// One B-tree node.
///
/// `values[i]` belongs to `keys[i]`. An internal node has exactly
/// `keys.len() + 1` children; `children[i]` holds keys between `keys[i-1]`
/// and `keys[i]`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Node {
    pub keys: Vec<Vec<u8>>,
    pub values: Vec<Vec<u8>>,
    pub children: Vec<NodeId>,
    pub is_leaf: bool,
}

impl Node {
    pub fn leaf() -> Self {
        Self {
            is_leaf: true,
            ..Self::default()
        }
    }

    pub fn internal() -> Self {
        Self::default()
    }

    /// Binary search for `key`: `Ok(i)` if present, `Err(i)` for the child
    /// (or insert position) that would hold it.
    #[inline]
    pub fn search(&self, key: &[u8]) -> Result<usize, usize> {
        self.keys.binary_search_by(|k| k.as_slice().cmp(key))
    }

    #[inline]
    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    /// Bytes needed by [`Node::encode_body`], given `u32` child references.
    pub fn encoded_len(&self) -> usize {
        let pairs: usize = self
            .keys
            .iter()
            .zip(&self.values)
            .map(|(k, v)| 8 + k.len() + v.len())
            .sum();
        2 + pairs + self.children.len() * 4
    }

    /// Serialize keys, values and the given child references.
    ///
    /// # Layout (little-endian)
    /// ```text
    /// u16 key_count
    /// key_count × (u32 key_len, key, u32 value_len, value)
    /// (key_count + 1) × u32 child     // internal nodes only
    /// ```
    pub fn encode_body(&self, children: &[u32], out: &mut Vec<u8>) {
        out.extend_from_slice(&(self.keys.len() as u16).to_le_bytes());
        for (key, value) in self.keys.iter().zip(&self.values) {
            out.extend_from_slice(&(key.len() as u32).to_le_bytes());
            out.extend_from_slice(key);
            out.extend_from_slice(&(value.len() as u32).to_le_bytes());
            out.extend_from_slice(value);
        }
        for child in children {
            out.extend_from_slice(&child.to_le_bytes());
        }
    }

    /// Decode a body written by [`Node::encode_body`].
    ///
    /// Returns the node (with empty `children`) and its raw child references.
    /// `None` if the body is truncated.
    pub fn decode_body(body: &[u8], is_leaf: bool) -> Option<(Node, Vec<u32>)> {
        let mut reader = Reader { buf: body, pos: 0 };
        let count = u16::from_le_bytes(reader.array()?) as usize;

        let mut node = if is_leaf { Node::leaf() } else { Node::internal() };
        for _ in 0..count {
            let key_len = u32::from_le_bytes(reader.array()?) as usize;
            node.keys.push(reader.take(key_len)?.to_vec());
            let value_len = u32::from_le_bytes(reader.array()?) as usize;
            node.values.push(reader.take(value_len)?.to_vec());
        }

        let mut children = Vec::new();
        if !is_leaf {
            for _ in 0..=count {
                children.push(u32::from_le_bytes(reader.array()?));
            }
        }
        Some((node, children))
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        let bytes = self.buf.get(self.pos..end)?;
        self.pos = end;
        Some(bytes)
    }

    fn array<const N: usize>(&mut self) -> Option<[u8; N]> {
        self.take(N)?.try_into().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search() {
        let mut node = Node::leaf();
        node.keys = vec![b"b".to_vec(), b"d".to_vec()];

        assert_eq!(node.search(b"b"), Ok(0));
        assert_eq!(node.search(b"a"), Err(0));
        assert_eq!(node.search(b"c"), Err(1));
        assert_eq!(node.search(b"e"), Err(2));
    }

    #[test]
    fn test_internal_body_roundtrip() {
        let mut node = Node::internal();
        node.keys = vec![b"k1".to_vec(), b"k2".to_vec()];
        node.values = vec![b"v1".to_vec(), Vec::new()];

        let mut body = Vec::new();
        node.encode_body(&[7, 8, 9], &mut body);
        assert_eq!(body.len(), node.encoded_len() + 12);

        let (decoded, children) = Node::decode_body(&body, false).unwrap();
        assert_eq!(decoded.keys, node.keys);
        assert_eq!(decoded.values, node.values);
        assert_eq!(children, vec![7, 8, 9]);
    }

    #[test]
    fn test_truncated_body_is_rejected() {
        let mut node = Node::leaf();
        node.keys = vec![b"key".to_vec()];
        node.values = vec![b"value".to_vec()];

        let mut body = Vec::new();
        node.encode_body(&[], &mut body);

        assert!(Node::decode_body(&body[..body.len() - 1], true).is_none());
        assert!(Node::decode_body(&body, true).is_some());
    }
}
