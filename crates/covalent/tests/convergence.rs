//! Two writers applying arbitrary edit scripts end with the same map.

use covalent::content_types;
use covalent_testkit::generators::{list_script, ListStep, MapScript, ScriptEdit};
use covalent_testkit::{connect, pump, TestFixture};
use proptest::prelude::*;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

async fn apply_map<S: covalent::Storage>(
    node: &mut covalent::Node<S>,
    map: covalent::CoValueId,
    edits: &[ScriptEdit],
) {
    for edit in edits {
        match edit {
            ScriptEdit::Set { key, value } => node.set(map, key, value.clone()).await.unwrap(),
            ScriptEdit::Delete { key } => node.delete(map, key).await.unwrap(),
        };
    }
}

async fn apply_list<S: covalent::Storage>(
    node: &mut covalent::Node<S>,
    list: covalent::CoValueId,
    steps: &[ListStep],
) {
    for step in steps {
        let len = node.list(list).unwrap().len();
        match step {
            ListStep::Push(value) => {
                node.push(list, value.clone()).await.unwrap();
            }
            ListStep::Prepend(value) => {
                node.prepend(list, value.clone()).await.unwrap();
            }
            ListStep::InsertAfter(_, value) if len == 0 => {
                node.push(list, value.clone()).await.unwrap();
            }
            ListStep::InsertAfter(index, value) => {
                node.insert_after(list, index % len, value.clone())
                    .await
                    .unwrap();
            }
            ListStep::Remove(_) if len == 0 => {}
            ListStep::Remove(index) => {
                node.remove_at(list, index % len).await.unwrap();
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn maps_converge(script in any::<MapScript>()) {
        runtime().block_on(async {
            let fixture = TestFixture::new();
            let mut alice = fixture.node(1).await.unwrap();
            let mut bob = fixture.node(2).await.unwrap();
            connect(&mut alice, &mut bob).await.unwrap();
            let map = alice.create(content_types::COMAP, None, None).await.unwrap();
            pump(&mut alice, &mut bob).await.unwrap();

            apply_map(&mut alice, map, &script.first).await;
            apply_map(&mut bob, map, &script.second).await;
            pump(&mut alice, &mut bob).await.unwrap();

            let (a, b) = (alice.map(map).unwrap(), bob.map(map).unwrap());
            assert_eq!(a.to_json(), b.to_json());
            for edit in script.first.iter().chain(&script.second) {
                assert_eq!(a.get(edit.key()), b.get(edit.key()));
            }
        });
    }

    #[test]
    fn lists_converge(first in list_script(), second in list_script()) {
        runtime().block_on(async {
            let fixture = TestFixture::new();
            let mut alice = fixture.node(1).await.unwrap();
            let mut bob = fixture.node(2).await.unwrap();
            connect(&mut alice, &mut bob).await.unwrap();
            let list = alice.create(content_types::COLIST, None, None).await.unwrap();
            pump(&mut alice, &mut bob).await.unwrap();

            apply_list(&mut alice, list, &first).await;
            apply_list(&mut bob, list, &second).await;
            pump(&mut alice, &mut bob).await.unwrap();

            assert_eq!(alice.list(list).unwrap().to_vec(), bob.list(list).unwrap().to_vec());
        });
    }
}
