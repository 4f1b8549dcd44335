//! Wiring nodes together inside one task.
//!
//! Nodes in the same task cannot wait on each other, so tests connect them
//! with in-memory transports and pump messages by hand.

use covalent::{MemoryTransport, Node, PeerId, PeerRole};
use covalent_store::Storage;

/// Rounds after which [`pump`] gives up.
pub const MAX_ROUNDS: usize = 64;

/// Peer id a node uses for `node`.
pub fn peer_id<S: Storage>(node: &Node<S>) -> PeerId {
    PeerId::new(node.account_id().to_string())
}

/// Connect `client` to `server`. The client pushes everything it holds and
/// every later change to the server.
pub async fn connect<A: Storage, B: Storage>(
    client: &mut Node<A>,
    server: &mut Node<B>,
) -> anyhow::Result<()> {
    let (to_server, to_client) = MemoryTransport::pair();
    let server_id = peer_id(server);
    let client_id = peer_id(client);
    server
        .add_peer(client_id, PeerRole::Client, Box::new(to_client))
        .await?;
    client
        .add_peer(server_id, PeerRole::Server, Box::new(to_server))
        .await?;
    Ok(())
}

/// Poll both nodes until a round passes with no messages. Returns the
/// number of rounds.
pub async fn pump<A: Storage, B: Storage>(a: &mut Node<A>, b: &mut Node<B>) -> anyhow::Result<usize> {
    for round in 1..=MAX_ROUNDS {
        let from_b = a.poll().await?.messages;
        let from_a = b.poll().await?.messages;
        if from_a == 0 && from_b == 0 {
            return Ok(round);
        }
    }
    anyhow::bail!("nodes still talking after {MAX_ROUNDS} rounds")
}

/// Give each node the other's account, so either can add the other to a
/// group.
pub async fn introduce<A: Storage, B: Storage>(a: &mut Node<A>, b: &mut Node<B>) -> anyhow::Result<()> {
    let a_account = a.export(a.account_id()).await?;
    let b_account = b.export(b.account_id()).await?;
    b.import(&a_account).await?;
    a.import(&b_account).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::TestFixture;
    use covalent::content_types;

    #[tokio::test]
    async fn test_pushes_to_server() {
        let fixture = TestFixture::new();
        let mut client = fixture.node(1).await.unwrap();
        let mut server = fixture.node(2).await.unwrap();
        connect(&mut client, &mut server).await.unwrap();
        pump(&mut client, &mut server).await.unwrap();
        assert!(server.contains(&client.account_id()));

        let map = client
            .create(content_types::COMAP, None, None)
            .await
            .unwrap();
        client.set(map, "k", 1).await.unwrap();
        pump(&mut client, &mut server).await.unwrap();
        assert_eq!(server.map(map).unwrap().get_i64("k"), Some(1));
    }

    #[tokio::test]
    async fn test_introduce() {
        let fixture = TestFixture::new();
        let mut a = fixture.node(1).await.unwrap();
        let mut b = fixture.node(2).await.unwrap();
        introduce(&mut a, &mut b).await.unwrap();
        assert!(a.contains(&b.account_id()));
        assert!(b.contains(&a.account_id()));
    }
}
