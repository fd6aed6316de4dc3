//! Wire-level behavior: generation, parsing and reconciliation without a
//! live connection.

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;

use dstore::core::NodeId;
use dstore::store::{DataStore, StoreConfig, Tree};
use dstore::sync::{Generator, GeneratorConfig, Parsed, Parser, PeerState, RecordReader, TransferLedger};
use dstore_testkit::generators::{build_tree, node_spec, spec_depth};
use dstore_testkit::{all_vectors, init_tracing, sample_tree, verify_all_vectors, ChunkedReader};

fn generate(store: &DataStore, roots: &[NodeId], depth: u32) -> Vec<u8> {
    let mut generator = Generator::new(GeneratorConfig::default(), Arc::new(TransferLedger::new()));
    let tree = store.read();
    generator.generate_document(&tree, &NodeId::new("doc"), roots, depth);
    generator.take_output().concat()
}

async fn parse_all(store: &Arc<DataStore>, bytes: &[u8]) -> Vec<Parsed> {
    let mut parser = Parser::new(Arc::clone(store), Arc::new(PeerState::new()));
    let mut reader = RecordReader::new(bytes);
    let mut out = Vec::new();
    while let Ok(parsed) = parser.parse_document(&mut reader).await {
        out.push(parsed);
    }
    out
}

fn assert_same_subtree(a: &Tree, b: &Tree, id: &NodeId) {
    let left = a.get(id).unwrap();
    let right = b.get(id).unwrap();
    assert_eq!(left.attributes(), right.attributes(), "attributes of {}", id);
    assert_eq!(left.buffer(), right.buffer(), "buffer of {}", id);
    let children = a.children_of(id);
    assert_eq!(children, b.children_of(id), "children of {}", id);
    for child in &children {
        assert_same_subtree(a, b, child);
    }
}

#[tokio::test]
async fn test_sample_tree_round_trip() {
    init_tracing();
    let source = DataStore::default();
    let sample = sample_tree(&source);
    let bytes = generate(&source, &[sample.root.clone()], 2);

    let text = String::from_utf8(bytes.clone()).unwrap();
    assert!(text.contains(r#"value="b&lt;c""#));
    assert!(!text.contains("b<c"));

    let target = Arc::new(DataStore::default());
    parse_all(&target, &bytes).await;
    assert_same_subtree(&source.read(), &target.read(), &sample.root);
    assert_eq!(target.find("3").unwrap().value(), "b<c");
}

#[tokio::test]
async fn test_generation_matches_golden_vector() {
    let store = DataStore::default();
    let sample = sample_tree(&store);
    let bytes = generate(&store, &[sample.root], 2);
    assert_eq!(String::from_utf8(bytes).unwrap(), all_vectors()[0].wire);
}

#[tokio::test]
async fn test_golden_vectors() {
    let failures = verify_all_vectors().await;
    assert!(failures.is_empty(), "{:#?}", failures);
}

#[test]
fn test_regeneration_is_skipped_until_mutation() {
    let store = DataStore::default();
    let sample = sample_tree(&store);
    let mut generator = Generator::new(GeneratorConfig::default(), Arc::new(TransferLedger::new()));

    let once = |generator: &mut Generator| {
        let tree = store.read();
        generator.generate(&tree, &sample.child, 1);
        generator.take_output().concat()
    };
    let first = once(&mut generator);
    assert!(!first.is_empty());
    assert!(once(&mut generator).is_empty());

    store.modify(|tree| tree.get_mut(&sample.child).unwrap().set_value("changed"));
    let third = String::from_utf8(once(&mut generator)).unwrap();
    assert!(third.contains(r#"value="changed""#));
    // The grandchild did not change.
    assert!(!third.contains(r#"id="3""#));
}

#[tokio::test]
async fn test_split_reads_reassemble_payload() {
    let wire = concat!(
        r#"<File.Binary type="FILE" id="f" name="/bin" value="" source="mem" sourceLocation="" refType="value" depth="5">"#,
        "\n\x01\n\"\0\x02\n</File.Binary>\n",
    );
    for chunk in [1, 2, 3, 7] {
        let store = Arc::new(DataStore::default());
        let mut parser = Parser::new(Arc::clone(&store), Arc::new(PeerState::new()));
        let mut reader = RecordReader::new(ChunkedReader::new(wire.as_bytes(), chunk));
        match parser.parse_document(&mut reader).await.unwrap() {
            Parsed::Payload(payload) => assert_eq!(&payload.bytes[..], b"\x01\n\"\0\x02"),
            other => panic!("chunk {}: expected payload, got {:?}", chunk, other),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_spirit_eviction_then_full_update() {
    let config = StoreConfig {
        spirit_enabled: true,
        spirit_expiry: Duration::from_secs(10),
    };
    let store = Arc::new(DataStore::new(config));
    let sample = sample_tree(&store);

    store.disconnect_object(&sample.child).unwrap();
    tokio::time::advance(Duration::from_secs(11)).await;
    assert_eq!(store.sweep_spirits(), 1);

    let spirit = store.find(sample.child.as_str()).unwrap();
    assert!(spirit.is_spirit());
    assert_eq!(spirit.name(), "child");
    assert_eq!(spirit.value(), "a");
    assert!(spirit.children().is_empty());
    assert!(store.find("3").is_none());

    // The peer resends the full subtree.
    let peer = DataStore::default();
    let peer_sample = sample_tree(&peer);
    let bytes = generate(&peer, &[peer_sample.child], 1);
    parse_all(&store, &bytes).await;

    let restored = store.find(sample.child.as_str()).unwrap();
    assert!(!restored.is_spirit());
    assert_eq!(restored.children().len(), 1);
    assert_eq!(store.find("3").unwrap().value(), "b<c");
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_tree_survives_the_wire(spec in node_spec(3, 3)) {
        let source = DataStore::default();
        let root = source.modify(|tree| {
            let host = tree.host_root().clone();
            build_tree(tree, &host, &spec, "n")
        });
        let bytes = generate(&source, &[root.clone()], spec_depth(&spec));

        let target = Arc::new(DataStore::default());
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        runtime.block_on(parse_all(&target, &bytes));

        assert_same_subtree(&source.read(), &target.read(), &root);
    }
}
