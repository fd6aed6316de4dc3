//! Golden wire vectors.
//!
//! Each vector is a byte-exact wire input and the nodes a fresh store must
//! hold after parsing it. They pin down the grammar other implementations
//! speak, so a change here is a protocol change.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use dstore_store::DataStore;
use dstore_sync::{Parser, PeerState, RecordReader, SyncError};

/// A node a vector expects to find after parsing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedNode {
    pub id: String,
    pub node_type: String,
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub buffer: String,
    /// Id of the owning or linking parent, if checked.
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub reference_to: Option<String>,
    #[serde(default)]
    pub spirit: bool,
}

/// A single golden wire vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireVector {
    pub name: String,
    pub description: String,
    pub wire: String,
    pub expected: Vec<ExpectedNode>,
    /// Ids that must not exist afterwards.
    #[serde(default)]
    pub absent: Vec<String>,
}

fn node(id: &str, node_type: &str, name: &str, value: &str, parent: &str) -> ExpectedNode {
    ExpectedNode {
        id: id.into(),
        node_type: node_type.into(),
        name: name.into(),
        value: value.into(),
        buffer: String::new(),
        parent: Some(parent.into()),
        reference_to: None,
        spirit: false,
    }
}

/// Get all golden wire vectors.
pub fn all_vectors() -> Vec<WireVector> {
    vec![
        WireVector {
            name: "sample tree".into(),
            description: "three nested nodes, one value escaped".into(),
            wire: concat!(
                r#"<DataElement type="DOCUMENT" id="doc" name="document" value="document" source="" sourceLocation="" refType="value" depth="1">"#, "\n",
                r#"<DataElement type="directory" id="1" name="root" value="root" source="" sourceLocation="" refType="value" depth="2">"#, "\n",
                r#"<DataElement type="file" id="2" name="child" value="a" source="" sourceLocation="" refType="value" depth="2">"#, "\n",
                r#"<DataElement type="file" id="3" name="grand" value="b&lt;c" source="" sourceLocation="" refType="value" depth="2">"#, "\n",
                "</DataElement>\n</DataElement>\n</DataElement>\n</DataElement>\n",
            )
            .into(),
            expected: vec![
                node("1", "directory", "root", "root", "doc"),
                node("2", "file", "child", "a", "1"),
                node("3", "file", "grand", "b<c", "2"),
            ],
            absent: vec![],
        },
        WireVector {
            name: "legacy vocabulary".into(),
            description: "isRef attribute with false and true tokens".into(),
            wire: concat!(
                r#"<DataElement type="DOCUMENT" id="doc" name="document" value="document" source="" sourceLocation="" isRef="false" depth="2">"#, "\n",
                r#"<DataElement type="file" id="1" name="a" value="a" source="" sourceLocation="" isRef="false" depth="2">"#, "\n",
                "</DataElement>\n",
                r#"<DataElement type="contents" id="r1" name="1" value="1" source="" sourceLocation="" isRef="true" depth="2">"#, "\n",
                "</DataElement>\n</DataElement>\n",
            )
            .into(),
            expected: vec![
                node("1", "file", "a", "a", "doc"),
                ExpectedNode {
                    reference_to: Some("1".into()),
                    ..node("r1", "contents", "1", "1", "doc")
                },
            ],
            absent: vec![],
        },
        WireVector {
            name: "buffer entities".into(),
            description: "buffer lines are unescaped and joined with newlines".into(),
            wire: concat!(
                r#"<DataElement type="DOCUMENT" id="doc" name="document" value="document" source="" sourceLocation="" refType="value" depth="1">"#, "\n",
                r#"<DataElement type="file" id="1" name="notes" value="notes" source="" sourceLocation="" refType="value" depth="2">"#, "\n",
                "<Buffer>\n",
                "x &amp; y\n",
                "z&#59; &quot;q&quot;\n",
                "</Buffer>\n",
                "</DataElement>\n</DataElement>\n",
            )
            .into(),
            expected: vec![ExpectedNode {
                buffer: "x & y\nz; \"q\"".into(),
                ..node("1", "file", "notes", "notes", "doc")
            }],
            absent: vec![],
        },
        WireVector {
            name: "quoted newline".into(),
            description: "a newline inside a quoted value does not end the record".into(),
            wire: concat!(
                r#"<DataElement type="DOCUMENT" id="doc" name="document" value="document" source="" sourceLocation="" refType="value" depth="1">"#, "\n",
                "<DataElement type=\"file\" id=\"1\" name=\"n\" value=\"x\ny\" source=\"\" sourceLocation=\"\" refType=\"value\" depth=\"2\"/>\n",
                "</DataElement>\n",
            )
            .into(),
            expected: vec![node("1", "file", "n", "x\ny", "doc")],
            absent: vec![],
        },
        WireVector {
            name: "unknown reference".into(),
            description: "a reference to a missing id becomes a value node".into(),
            wire: concat!(
                r#"<DataElement type="DOCUMENT" id="doc" name="document" value="document" source="" sourceLocation="" refType="value" depth="1">"#, "\n",
                r#"<DataElement type="contents" id="r99" name="99" value="99" source="" sourceLocation="" refType="reference" depth="2"/>"#, "\n",
                "</DataElement>\n",
            )
            .into(),
            expected: vec![node("r99", "contents", "99", "99", "doc")],
            absent: vec![],
        },
        WireVector {
            name: "spirit".into(),
            description: "spirit records are stored flagged".into(),
            wire: concat!(
                r#"<DataElement type="DOCUMENT" id="doc" name="document" value="document" source="" sourceLocation="" refType="value" depth="1">"#, "\n",
                r#"<DataElement type="directory" id="d" name="docs" value="/docs" source="" sourceLocation="" refType="spirit" depth="2"/>"#, "\n",
                "</DataElement>\n",
            )
            .into(),
            expected: vec![ExpectedNode {
                spirit: true,
                ..node("d", "directory", "docs", "/docs", "doc")
            }],
            absent: vec![],
        },
        WireVector {
            name: "deleted unknown".into(),
            description: "a deletion of a node never seen creates nothing".into(),
            wire: concat!(
                r#"<DataElement type="DOCUMENT" id="doc" name="document" value="document" source="" sourceLocation="" refType="value" depth="1">"#, "\n",
                r#"<DataElement type="file" id="gone" name="x" value="deleted" source="" sourceLocation="" refType="value" depth="2"/>"#, "\n",
                "</DataElement>\n",
            )
            .into(),
            expected: vec![],
            absent: vec!["gone".into()],
        },
    ]
}

/// All vectors as pretty JSON, for other implementations to consume.
pub fn vectors_json() -> String {
    serde_json::to_string_pretty(&all_vectors()).unwrap_or_default()
}

/// Parse a vector's wire bytes into a fresh store and check the result.
pub async fn verify_vector(vector: &WireVector) -> Result<(), String> {
    let store = Arc::new(DataStore::default());
    let mut parser = Parser::new(Arc::clone(&store), Arc::new(PeerState::new()));
    let mut reader = RecordReader::new(vector.wire.as_bytes());
    loop {
        match parser.parse_document(&mut reader).await {
            Ok(_) => {}
            Err(SyncError::ConnectionLost) => break,
            Err(e) => return Err(format!("{}: {}", vector.name, e)),
        }
    }

    let tree = store.read();
    for want in &vector.expected {
        let got = tree
            .find(&want.id)
            .ok_or_else(|| format!("{}: node {} missing", vector.name, want.id))?;
        let actual = ExpectedNode {
            id: got.id().to_string(),
            node_type: got.node_type().into(),
            name: got.name().into(),
            value: got.value().into(),
            buffer: got.buffer().into(),
            parent: match &want.parent {
                Some(p) if tree.find(p).is_some_and(|n| n.has_child(got.id())) => Some(p.clone()),
                _ => got.parent().map(|p| p.to_string()),
            },
            reference_to: got.target().map(|t| t.to_string()),
            spirit: got.is_spirit(),
        };
        if &actual != want {
            return Err(format!("{}: expected {:?}, got {:?}", vector.name, want, actual));
        }
    }
    for id in &vector.absent {
        if tree.contains(id) {
            return Err(format!("{}: node {} should not exist", vector.name, id));
        }
    }
    Ok(())
}

/// Verify every vector, collecting failures.
pub async fn verify_all_vectors() -> Vec<String> {
    let mut failures = Vec::new();
    for vector in all_vectors() {
        if let Err(e) = verify_vector(&vector).await {
            failures.push(e);
        }
    }
    failures
}
