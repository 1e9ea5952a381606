//! Contact graph maintenance.
//!
//! Edges are directed (`pers1 -> pers2`) and only ever added. The returned
//! ops are committed by the caller in the same batch as the challenge or
//! participant change that caused them.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;

use crate::error::ApiResult;
use crate::storage::{ChallengeStore, WriteOp};
use crate::types::{Contact, UserId};

pub struct ContactGraph {
    store: Arc<dyn ChallengeStore>,
}

impl ContactGraph {
    pub fn new(store: Arc<dyn ChallengeStore>) -> Self {
        Self { store }
    }

    /// Candidates with no edge from `source` yet, in input order without
    /// duplicates. `source` itself is never a candidate.
    pub async fn diff_new_contacts(
        &self,
        source: UserId,
        candidates: &[UserId],
    ) -> ApiResult<Vec<UserId>> {
        let mut known: HashSet<UserId> = self
            .store
            .contacts(source)
            .await?
            .into_iter()
            .map(|c| c.pers2_id)
            .collect();
        known.insert(source);

        Ok(candidates
            .iter()
            .copied()
            .filter(|id| known.insert(*id))
            .collect())
    }

    /// owner -> invitee for every invitee not yet connected
    pub async fn grow_from_challenge_create(
        &self,
        owner_id: UserId,
        invited: &[UserId],
        now: DateTime<Utc>,
    ) -> ApiResult<Vec<WriteOp>> {
        let fresh = self.diff_new_contacts(owner_id, invited).await?;
        Ok(fresh
            .into_iter()
            .map(|pers2_id| edge(owner_id, pers2_id, now))
            .collect())
    }

    /// acceptor -> owner, unless the acceptor is the owner
    pub async fn grow_from_challenge_accept(
        &self,
        acceptor_id: UserId,
        owner_id: UserId,
        now: DateTime<Utc>,
    ) -> ApiResult<Vec<WriteOp>> {
        let fresh = self.diff_new_contacts(acceptor_id, &[owner_id]).await?;
        Ok(fresh
            .into_iter()
            .map(|pers2_id| edge(acceptor_id, pers2_id, now))
            .collect())
    }
}

fn edge(pers1_id: UserId, pers2_id: UserId, now: DateTime<Utc>) -> WriteOp {
    WriteOp::InsertContact(Contact {
        pers1_id,
        pers2_id,
        created_at: now,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStore, WriteBatch};
    use crate::types::User;

    async fn users(store: &MemoryStore, n: usize) -> Vec<UserId> {
        let mut ids = Vec::new();
        for i in 0..n {
            let user = User::new(format!("u{}@example.com", i), Utc::now());
            store.create_user(&user).await.unwrap();
            ids.push(user.id);
        }
        ids
    }

    #[tokio::test]
    async fn test_diff_skips_existing_self_and_duplicates() {
        let store = Arc::new(MemoryStore::new());
        let ids = users(&store, 4).await;
        let (owner, a, b, c) = (ids[0], ids[1], ids[2], ids[3]);

        let mut batch = WriteBatch::new();
        batch.push(edge(owner, a, Utc::now()));
        store.commit(batch).await.unwrap();

        let graph = ContactGraph::new(store.clone());
        let fresh = graph
            .diff_new_contacts(owner, &[a, b, owner, b, c])
            .await
            .unwrap();
        assert_eq!(fresh, vec![b, c]);
    }

    #[tokio::test]
    async fn test_edges_are_directed() {
        let store = Arc::new(MemoryStore::new());
        let ids = users(&store, 2).await;
        let (owner, guest) = (ids[0], ids[1]);
        let graph = ContactGraph::new(store.clone());

        let mut batch = WriteBatch::new();
        batch.extend(
            graph
                .grow_from_challenge_create(owner, &[guest], Utc::now())
                .await
                .unwrap(),
        );
        store.commit(batch).await.unwrap();

        // owner -> guest exists, guest -> owner does not
        let back = graph
            .grow_from_challenge_accept(guest, owner, Utc::now())
            .await
            .unwrap();
        assert_eq!(back.len(), 1);

        let again = graph
            .grow_from_challenge_create(owner, &[guest], Utc::now())
            .await
            .unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn test_owner_accepting_own_challenge_adds_nothing() {
        let store = Arc::new(MemoryStore::new());
        let ids = users(&store, 1).await;
        let graph = ContactGraph::new(store);

        let ops = graph
            .grow_from_challenge_accept(ids[0], ids[0], Utc::now())
            .await
            .unwrap();
        assert!(ops.is_empty());
    }
}
