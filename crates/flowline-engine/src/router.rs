// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Keyword/entry router.

use std::sync::Arc;

use flowline_core::types::{KeywordBinding, SystemKeyword};
use flowline_core::{FlowlineError, StorageAdapter};
use tracing::warn;

/// Where an inbound text enters.
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    /// Command keyword; bypasses and replaces any active session.
    System(SystemKeyword),
    /// Campaign keyword of an active campaign.
    Campaign(KeywordBinding),
    NoMatch,
}

/// Read-only lookups against the keyword tables.
pub struct EntryRouter {
    storage: Arc<dyn StorageAdapter + Send + Sync>,
}

impl EntryRouter {
    pub fn new(storage: Arc<dyn StorageAdapter + Send + Sync>) -> Self {
        Self { storage }
    }

    /// Resolve normalized input.
    ///
    /// System keywords always win. Campaign keywords are only consulted when
    /// the contact has no active session, since input to an active session
    /// belongs to that session.
    pub async fn resolve(
        &self,
        normalized: &str,
        has_active_session: bool,
    ) -> Result<Route, FlowlineError> {
        if normalized.is_empty() {
            return Ok(Route::NoMatch);
        }
        if let Some(system) = self.storage.find_system_keyword(normalized).await? {
            return Ok(Route::System(system));
        }
        if has_active_session {
            return Ok(Route::NoMatch);
        }

        let mut bindings = self.storage.find_campaign_keywords(normalized).await?;
        if bindings.len() > 1 {
            let campaigns: Vec<&str> = bindings.iter().map(|b| b.campaign_id.as_str()).collect();
            warn!(
                keyword = normalized,
                ?campaigns,
                chosen = %bindings[0].campaign_id,
                "keyword owned by several active campaigns, using the most recently activated"
            );
        }
        // Ordered most recently activated first.
        if bindings.is_empty() {
            Ok(Route::NoMatch)
        } else {
            Ok(Route::Campaign(bindings.swap_remove(0)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowline_config::model::StorageConfig;
    use flowline_core::flow::{FlowDefinition, FlowNode, NodeKind};
    use flowline_core::types::{Campaign, CampaignStatus};
    use flowline_storage::SqliteStorage;
    use tracing_test::traced_test;

    async fn storage() -> (Arc<dyn StorageAdapter + Send + Sync>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let storage = SqliteStorage::new(StorageConfig {
            database_path: dir.path().join("r.db").to_string_lossy().into_owned(),
            wal_mode: true,
        });
        storage.initialize().await.unwrap();
        for id in ["promo", "menu"] {
            storage
                .upsert_flow(&FlowDefinition {
                    id: id.into(),
                    name: String::new(),
                    entry_key: "START".into(),
                    fallback_key: "START".into(),
                    nodes: vec![FlowNode {
                        key: "START".into(),
                        kind: NodeKind::Fallback {
                            body: "hi".into(),
                            next: None,
                        },
                        allowed_inputs: vec![],
                        wait_timeout_secs: None,
                    }],
                })
                .await
                .unwrap();
        }
        (Arc::new(storage), dir)
    }

    async fn active_campaign(
        storage: &Arc<dyn StorageAdapter + Send + Sync>,
        id: &str,
        activated_at: &str,
    ) {
        storage
            .upsert_campaign(&Campaign {
                id: id.into(),
                name: id.into(),
                flow_id: "promo".into(),
                status: CampaignStatus::Active,
                starts_at: None,
                ends_at: None,
                activated_at: Some(activated_at.into()),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn campaign_keyword_resolves_to_entry() {
        let (storage, _dir) = storage().await;
        active_campaign(&storage, "42", "2026-03-01T09:00:00.000Z").await;
        storage.bind_keyword("promo", "42").await.unwrap();

        let router = EntryRouter::new(storage);
        match router.resolve("promo", false).await.unwrap() {
            Route::Campaign(b) => {
                assert_eq!(b.campaign_id, "42");
                assert_eq!(b.entry_key, "START");
            }
            other => panic!("unexpected route {other:?}"),
        }
        assert_eq!(router.resolve("hello", false).await.unwrap(), Route::NoMatch);
    }

    #[tokio::test]
    async fn system_keyword_wins_even_with_active_session() {
        let (storage, _dir) = storage().await;
        storage.bind_system_keyword("/menu", "menu").await.unwrap();
        let router = EntryRouter::new(storage);

        assert!(matches!(
            router.resolve("/menu", true).await.unwrap(),
            Route::System(_)
        ));
    }

    #[tokio::test]
    async fn active_session_suppresses_campaign_keywords() {
        let (storage, _dir) = storage().await;
        active_campaign(&storage, "42", "2026-03-01T09:00:00.000Z").await;
        storage.bind_keyword("promo", "42").await.unwrap();
        let router = EntryRouter::new(storage);

        assert_eq!(router.resolve("promo", true).await.unwrap(), Route::NoMatch);
    }

    #[tokio::test]
    #[traced_test]
    async fn ambiguous_keyword_picks_latest_activation_and_warns() {
        let (storage, _dir) = storage().await;
        active_campaign(&storage, "old", "2026-03-01T09:00:00.000Z").await;
        active_campaign(&storage, "new", "2026-03-02T09:00:00.000Z").await;
        // Written around the live-owner guard, as a stale import might.
        storage.bind_keyword("sale", "old").await.unwrap();
        storage
            .upsert_campaign(&Campaign {
                id: "old".into(),
                name: "old".into(),
                flow_id: "promo".into(),
                status: CampaignStatus::Ended,
                starts_at: None,
                ends_at: None,
                activated_at: Some("2026-03-01T09:00:00.000Z".into()),
            })
            .await
            .unwrap();
        storage.bind_keyword("sale", "new").await.unwrap();
        active_campaign(&storage, "old", "2026-03-01T09:00:00.000Z").await;

        let router = EntryRouter::new(storage);
        match router.resolve("sale", false).await.unwrap() {
            Route::Campaign(b) => assert_eq!(b.campaign_id, "new"),
            other => panic!("unexpected route {other:?}"),
        }
        assert!(logs_contain("several active campaigns"));
    }
}
