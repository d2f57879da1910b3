use std::sync::atomic::AtomicBool;

use madrona_store::Marshaler;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_bytes::ByteBuf;

use crate::{Link, MadronaTreeError, Node, Snapshot, TreeKey, TreeValue};

/// Selects how nodes are laid out on the wire.
///
/// The format is fixed per tree and recorded in its [`crate::Root`], so
/// readers always know which decoder to use.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum NodeFormat {
    /// Length-prefixed binary arrays; the default for new trees.
    #[default]
    Binary,
    /// The older structured-document layout whose entries are pre-marshaled
    /// byte strings.
    Wrapper,
}

impl NodeFormat {
    /// The wire tag for this format.
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeFormat::Binary => "binary",
            NodeFormat::Wrapper => "wrapper",
        }
    }

    /// The format assumed for roots that predate the format tag.
    pub(crate) fn legacy() -> Self {
        NodeFormat::Wrapper
    }
}

impl Serialize for NodeFormat {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for NodeFormat {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let tag = String::deserialize(deserializer)?;
        match tag.as_str() {
            "binary" => Ok(NodeFormat::Binary),
            // An empty tag is a root written before formats were tagged.
            "wrapper" | "" => Ok(NodeFormat::Wrapper),
            other => Err(serde::de::Error::custom(format!(
                "unknown node format '{other}'"
            ))),
        }
    }
}

/// The wrapper-format document: the three node arrays with each key and
/// value individually pre-marshaled.
#[derive(Debug, Serialize, Deserialize)]
struct WireNode {
    keys: Vec<ByteBuf>,
    values: Vec<ByteBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    links: Option<Vec<String>>,
}

fn link_name<K, V>(link: &Link<K, V>) -> &str {
    match link {
        Link::Absent => "",
        Link::Persisted(hash) => hash,
        Link::Inline(_) => panic!("inline link survived to encoding"),
    }
}

/// Encodes a node whose links have all been resolved to hashes (or are
/// absent). When every link is absent the link array is omitted from the
/// wire; readers reconstruct `n + 1` absent links.
pub(crate) fn encode_node<K, V, M>(
    keys: &[K],
    values: &[V],
    links: &[Link<K, V>],
    format: NodeFormat,
    marshaler: &M,
) -> Result<Vec<u8>, MadronaTreeError>
where
    K: TreeKey,
    V: TreeValue,
    M: Marshaler,
{
    let trimmed = links.iter().all(Link::is_absent);
    match format {
        NodeFormat::Binary => {
            let mut buf = Vec::new();
            write_uvarint(&mut buf, keys.len() as u64);
            for key in keys {
                let body = marshaler.marshal(key)?;
                write_uvarint(&mut buf, body.len() as u64);
                buf.extend_from_slice(&body);
            }
            write_uvarint(&mut buf, values.len() as u64);
            for value in values {
                let body = marshaler.marshal(value)?;
                write_uvarint(&mut buf, body.len() as u64);
                buf.extend_from_slice(&body);
            }
            if trimmed {
                write_uvarint(&mut buf, 0);
            } else {
                write_uvarint(&mut buf, links.len() as u64);
                for link in links {
                    let name = link_name(link);
                    write_uvarint(&mut buf, name.len() as u64);
                    buf.extend_from_slice(name.as_bytes());
                }
            }
            Ok(buf)
        }
        NodeFormat::Wrapper => {
            let mut wire = WireNode {
                keys: Vec::new(),
                values: Vec::new(),
                links: None,
            };
            for key in keys {
                wire.keys.push(ByteBuf::from(marshaler.marshal(key)?));
            }
            for value in values {
                wire.values.push(ByteBuf::from(marshaler.marshal(value)?));
            }
            if !trimmed {
                wire.links = Some(links.iter().map(|link| link_name(link).to_owned()).collect());
            }
            Ok(marshaler.marshal(&wire)?)
        }
    }
}

/// Decodes persisted node bytes. The returned node is clean, shared, and
/// remembers the hash (and a snapshot of itself) for corruption checks.
pub(crate) fn decode_node<K, V, M>(
    bytes: &[u8],
    format: NodeFormat,
    marshaler: &M,
    source: &str,
) -> Result<Node<K, V>, MadronaTreeError>
where
    K: TreeKey,
    V: TreeValue,
    M: Marshaler,
{
    let (keys, values, link_names) = match format {
        NodeFormat::Binary => {
            let mut reader = ByteReader::new(bytes);
            let mut keys = Vec::new();
            for _ in 0..reader.read_uvarint()? {
                let body = reader.read_body()?;
                keys.push(unmarshal_entry(marshaler, body)?);
            }
            let mut values = Vec::new();
            for _ in 0..reader.read_uvarint()? {
                let body = reader.read_body()?;
                values.push(unmarshal_entry(marshaler, body)?);
            }
            let mut link_names = Vec::new();
            for _ in 0..reader.read_uvarint()? {
                let body = reader.read_body()?;
                let name = std::str::from_utf8(body)
                    .map_err(|error| MadronaTreeError::Decode(format!("bad link name: {error}")))?;
                link_names.push(name.to_owned());
            }
            (keys, values, link_names)
        }
        NodeFormat::Wrapper => {
            let wire: WireNode = marshaler
                .unmarshal(bytes)
                .map_err(|error| MadronaTreeError::Decode(format!("{error}")))?;
            let mut keys = Vec::new();
            for body in &wire.keys {
                keys.push(unmarshal_entry(marshaler, body)?);
            }
            let mut values = Vec::new();
            for body in &wire.values {
                values.push(unmarshal_entry(marshaler, body)?);
            }
            (keys, values, wire.links.unwrap_or_default())
        }
    };

    if keys.len() != values.len() {
        return Err(MadronaTreeError::Decode(format!(
            "{} keys but {} values",
            keys.len(),
            values.len()
        )));
    }
    let links = if link_names.is_empty() {
        vec![Link::Absent; keys.len() + 1]
    } else if link_names.len() == keys.len() + 1 {
        link_names
            .into_iter()
            .map(|name| {
                if name.is_empty() {
                    Link::Absent
                } else {
                    Link::Persisted(name)
                }
            })
            .collect()
    } else {
        return Err(MadronaTreeError::Decode(format!(
            "{} links for {} keys",
            link_names.len(),
            keys.len()
        )));
    };

    Ok(Node {
        expected: Some(Snapshot {
            keys: keys.clone(),
            values: values.clone(),
        }),
        keys,
        values,
        links,
        dirty: false,
        shared: AtomicBool::new(true),
        source: Some(source.to_owned()),
    })
}

fn unmarshal_entry<T, M>(marshaler: &M, body: &[u8]) -> Result<T, MadronaTreeError>
where
    T: serde::de::DeserializeOwned,
    M: Marshaler,
{
    marshaler
        .unmarshal(body)
        .map_err(|error| MadronaTreeError::Decode(format!("{error}")))
}

fn write_uvarint(buf: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        buf.push(value as u8 | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

struct ByteReader<'a> {
    bytes: &'a [u8],
    index: usize,
}

impl<'a> ByteReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        ByteReader { bytes, index: 0 }
    }

    fn read_u8(&mut self) -> Result<u8, MadronaTreeError> {
        let byte = *self
            .bytes
            .get(self.index)
            .ok_or_else(|| MadronaTreeError::Decode("unexpected end of node bytes".into()))?;
        self.index += 1;
        Ok(byte)
    }

    fn read_uvarint(&mut self) -> Result<u64, MadronaTreeError> {
        let mut value = 0u64;
        let mut shift = 0u32;
        loop {
            let byte = self.read_u8()?;
            if shift >= 63 && byte & 0x7f > 1 {
                return Err(MadronaTreeError::Decode("bad length".into()));
            }
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
            if shift >= 64 {
                return Err(MadronaTreeError::Decode("bad length".into()));
            }
        }
    }

    /// Reads a length-prefixed body.
    fn read_body(&mut self) -> Result<&'a [u8], MadronaTreeError> {
        let count = usize::try_from(self.read_uvarint()?)
            .map_err(|_| MadronaTreeError::Decode("bad body length".into()))?;
        let end = self
            .index
            .checked_add(count)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| MadronaTreeError::Decode("bad body length".into()))?;
        let body = &self.bytes[self.index..end];
        self.index = end;
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use madrona_store::JsonMarshaler;

    #[test]
    fn binary_round_trips_with_links() {
        let keys = vec![10u64, 20, 30];
        let values = vec![1u64, 2, 3];
        let links: Vec<Link<u64, u64>> = vec![
            Link::Absent,
            Link::Persisted("abc".into()),
            Link::Absent,
            Link::Persisted("def".into()),
        ];
        let bytes =
            encode_node(&keys, &values, &links, NodeFormat::Binary, &JsonMarshaler).unwrap();
        let node: Node<u64, u64> =
            decode_node(&bytes, NodeFormat::Binary, &JsonMarshaler, "hash").unwrap();
        assert_eq!(node.keys, keys);
        assert_eq!(node.values, values);
        assert_eq!(node.links, links);
        assert!(!node.dirty);
        assert!(node.shared.load(std::sync::atomic::Ordering::Relaxed));
        assert_eq!(node.source.as_deref(), Some("hash"));
    }

    #[test]
    fn all_absent_links_are_omitted_and_reconstructed() {
        let keys = vec![1u64, 2];
        let values = vec![1u64, 2];
        let links: Vec<Link<u64, u64>> = vec![Link::Absent; 3];
        for format in [NodeFormat::Binary, NodeFormat::Wrapper] {
            let bytes = encode_node(&keys, &values, &links, format, &JsonMarshaler).unwrap();
            let node: Node<u64, u64> = decode_node(&bytes, format, &JsonMarshaler, "h").unwrap();
            assert_eq!(node.links, links);
        }
    }

    #[test]
    fn wrapper_round_trips() {
        let keys = vec!["a".to_string(), "b".to_string()];
        let values = vec![7u64, 8];
        let links: Vec<Link<String, u64>> = vec![
            Link::Persisted("left".into()),
            Link::Absent,
            Link::Persisted("right".into()),
        ];
        let bytes =
            encode_node(&keys, &values, &links, NodeFormat::Wrapper, &JsonMarshaler).unwrap();
        let node: Node<String, u64> =
            decode_node(&bytes, NodeFormat::Wrapper, &JsonMarshaler, "hash").unwrap();
        assert_eq!(node.keys, keys);
        assert_eq!(node.values, values);
        assert_eq!(node.links, links);
    }

    #[test]
    fn truncated_bytes_are_rejected() {
        let keys = vec![10u64];
        let values = vec![10u64];
        let links: Vec<Link<u64, u64>> = vec![Link::Absent, Link::Absent];
        let bytes =
            encode_node(&keys, &values, &links, NodeFormat::Binary, &JsonMarshaler).unwrap();
        let result: Result<Node<u64, u64>, _> = decode_node(
            &bytes[..bytes.len() - 2],
            NodeFormat::Binary,
            &JsonMarshaler,
            "h",
        );
        assert!(matches!(result, Err(MadronaTreeError::Decode(_))));
    }

    #[test]
    fn mismatched_counts_are_rejected() {
        // One key, zero values.
        let mut buf = Vec::new();
        write_uvarint(&mut buf, 1);
        let body = JsonMarshaler.marshal(&1u64).unwrap();
        write_uvarint(&mut buf, body.len() as u64);
        buf.extend_from_slice(&body);
        write_uvarint(&mut buf, 0);
        write_uvarint(&mut buf, 0);
        let result: Result<Node<u64, u64>, _> =
            decode_node(&buf, NodeFormat::Binary, &JsonMarshaler, "h");
        assert!(matches!(result, Err(MadronaTreeError::Decode(_))));
    }

    #[test]
    fn format_tags_round_trip_and_accept_legacy() {
        assert_eq!(
            serde_json::to_string(&NodeFormat::Binary).unwrap(),
            "\"binary\""
        );
        let legacy: NodeFormat = serde_json::from_str("\"\"").unwrap();
        assert_eq!(legacy, NodeFormat::Wrapper);
        assert!(serde_json::from_str::<NodeFormat>("\"v9\"").is_err());
    }
}
