//! A server node running in its own task answers loads.

use covalent::{content_types, NodeError};
use covalent_testkit::{connect, pump, TestFixture};
use tokio::sync::oneshot;

#[tokio::test]
async fn client_loads_through_running_server() {
    let fixture = TestFixture::new();
    let mut alice = fixture.node(1).await.unwrap();
    let mut carol = fixture.node(3).await.unwrap();
    let mut server = fixture.node(2).await.unwrap();
    connect(&mut alice, &mut server).await.unwrap();
    connect(&mut carol, &mut server).await.unwrap();

    let map = alice
        .create(content_types::COMAP, None, None)
        .await
        .unwrap();
    alice.set(map, "greeting", "hi carol").await.unwrap();
    pump(&mut alice, &mut server).await.unwrap();
    pump(&mut carol, &mut server).await.unwrap();

    let (stop, stopped) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        server
            .run_until(async {
                let _ = stopped.await;
            })
            .await?;
        Ok::<_, NodeError>(server)
    });

    carol.load(map).await.unwrap();
    assert_eq!(carol.map(map).unwrap().get_str("greeting"), Some("hi carol"));

    // Later writes reach carol through the server.
    alice.set(map, "greeting", "hi again").await.unwrap();
    let mut seen = None;
    for _ in 0..100 {
        alice.poll().await.unwrap();
        carol.poll().await.unwrap();
        seen = carol.map(map).unwrap().get_str("greeting").map(String::from);
        if seen.as_deref() == Some("hi again") {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(seen.as_deref(), Some("hi again"));

    stop.send(()).unwrap();
    let server = task.await.unwrap().unwrap();
    assert!(server.contains(&map));
}

#[tokio::test]
async fn load_of_unknown_value_fails() {
    let fixture = TestFixture::new();
    let mut carol = fixture.node(3).await.unwrap();
    let mut server = fixture.node(2).await.unwrap();
    connect(&mut carol, &mut server).await.unwrap();
    pump(&mut carol, &mut server).await.unwrap();

    let (stop, stopped) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        server
            .run_until(async {
                let _ = stopped.await;
            })
            .await
    });

    let missing = covalent::CoValueId::from_bytes([9; 32]);
    assert!(matches!(
        carol.load(missing).await,
        Err(NodeError::Unavailable(id)) if id == missing
    ));

    stop.send(()).unwrap();
    task.await.unwrap().unwrap();
}
