// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite implementation of the StorageAdapter trait.

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::debug;

use flowline_config::model::StorageConfig;
use flowline_core::flow::FlowDefinition;
use flowline_core::types::{
    AttemptUpdate, Campaign, ClaimedAttempt, CommitOutcome, DeliveryAttempt, KeywordBinding,
    Message, OutboundRecord, Session, SessionStatus, SystemKeyword, TurnCommit,
};
use flowline_core::{AdapterType, FlowlineError, HealthStatus, PluginAdapter, StorageAdapter};

use crate::database::Database;
use crate::queries;

/// SQLite-backed storage adapter.
///
/// Wraps a [`Database`] handle and delegates all query operations to the
/// typed query modules. The database is lazily initialized on the first
/// call to [`StorageAdapter::initialize`].
pub struct SqliteStorage {
    config: StorageConfig,
    db: OnceCell<Database>,
}

impl SqliteStorage {
    /// Create a new SqliteStorage with the given configuration.
    ///
    /// The database connection is not opened until [`initialize`] is called.
    pub fn new(config: StorageConfig) -> Self {
        Self {
            config,
            db: OnceCell::new(),
        }
    }

    fn db(&self) -> Result<&Database, FlowlineError> {
        self.db.get().ok_or_else(|| FlowlineError::Storage {
            source: "storage not initialized -- call initialize() first".into(),
        })
    }
}

#[async_trait]
impl PluginAdapter for SqliteStorage {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Storage
    }

    async fn health_check(&self) -> Result<HealthStatus, FlowlineError> {
        let db = self.db()?;
        db.connection()
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute_batch("SELECT 1;")?;
                Ok(())
            })
            .await
            .map_err(crate::database::map_tr_err)?;
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), FlowlineError> {
        if let Some(db) = self.db.get() {
            db.close().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl StorageAdapter for SqliteStorage {
    async fn initialize(&self) -> Result<(), FlowlineError> {
        let path = self.config.database_path.clone();
        let db = Database::open_with(&path, self.config.wal_mode).await?;
        self.db.set(db).map_err(|_| FlowlineError::Storage {
            source: "storage already initialized".into(),
        })?;
        debug!(path = %self.config.database_path, "SQLite storage initialized");
        Ok(())
    }

    async fn close(&self) -> Result<(), FlowlineError> {
        self.db()?.close().await?;
        debug!("WAL checkpoint complete");
        Ok(())
    }

    // --- Flow store ---

    async fn get_flow(&self, flow_id: &str) -> Result<Option<FlowDefinition>, FlowlineError> {
        queries::flows::get_flow(self.db()?, flow_id).await
    }

    async fn upsert_flow(&self, flow: &FlowDefinition) -> Result<(), FlowlineError> {
        queries::flows::upsert_flow(self.db()?, flow).await
    }

    // --- Campaigns and keywords ---

    async fn upsert_campaign(&self, campaign: &Campaign) -> Result<(), FlowlineError> {
        queries::campaigns::upsert_campaign(self.db()?, campaign).await
    }

    async fn get_campaign(&self, id: &str) -> Result<Option<Campaign>, FlowlineError> {
        queries::campaigns::get_campaign(self.db()?, id).await
    }

    async fn bind_keyword(&self, keyword: &str, campaign_id: &str) -> Result<(), FlowlineError> {
        queries::campaigns::bind_keyword(self.db()?, keyword, campaign_id).await
    }

    async fn bind_system_keyword(
        &self,
        keyword: &str,
        flow_id: &str,
    ) -> Result<(), FlowlineError> {
        queries::campaigns::bind_system_keyword(self.db()?, keyword, flow_id).await
    }

    async fn find_system_keyword(
        &self,
        normalized: &str,
    ) -> Result<Option<SystemKeyword>, FlowlineError> {
        queries::campaigns::find_system_keyword(self.db()?, normalized).await
    }

    async fn find_campaign_keywords(
        &self,
        normalized: &str,
    ) -> Result<Vec<KeywordBinding>, FlowlineError> {
        queries::campaigns::find_campaign_keywords(self.db()?, normalized).await
    }

    async fn activate_due_campaigns(&self, now: &str) -> Result<u64, FlowlineError> {
        queries::campaigns::activate_due_campaigns(self.db()?, now).await
    }

    async fn end_due_campaigns(&self, now: &str) -> Result<u64, FlowlineError> {
        queries::campaigns::end_due_campaigns(self.db()?, now).await
    }

    // --- Session store ---

    async fn get_session(&self, id: &str) -> Result<Option<Session>, FlowlineError> {
        queries::sessions::get_session(self.db()?, id).await
    }

    async fn active_session_for_contact(
        &self,
        contact_id: &str,
    ) -> Result<Option<Session>, FlowlineError> {
        queries::sessions::active_session_for_contact(self.db()?, contact_id).await
    }

    async fn is_processed(&self, provider_message_id: &str) -> Result<bool, FlowlineError> {
        queries::sessions::is_processed(self.db()?, provider_message_id).await
    }

    async fn commit_turn(&self, commit: &TurnCommit) -> Result<CommitOutcome, FlowlineError> {
        queries::turns::commit_turn(self.db()?, commit).await
    }

    async fn transition_session(
        &self,
        id: &str,
        from: SessionStatus,
        to: SessionStatus,
        now: &str,
    ) -> Result<bool, FlowlineError> {
        queries::sessions::transition_session(self.db()?, id, from, to, now).await
    }

    async fn expire_idle_sessions(
        &self,
        now: &str,
        idle_cutoff: &str,
    ) -> Result<u64, FlowlineError> {
        queries::sessions::expire_idle_sessions(self.db()?, now, idle_cutoff).await
    }

    async fn sessions_due_feedback(
        &self,
        prompt_cutoff: &str,
        idle_cutoff: &str,
        limit: u32,
    ) -> Result<Vec<Session>, FlowlineError> {
        queries::sessions::sessions_due_feedback(self.db()?, prompt_cutoff, idle_cutoff, limit)
            .await
    }

    async fn record_feedback_prompt(
        &self,
        session: &Session,
        outbound: &OutboundRecord,
        now: &str,
    ) -> Result<bool, FlowlineError> {
        queries::sessions::record_feedback_prompt(self.db()?, session, outbound, now).await
    }

    async fn discard_unanswered_feedback(
        &self,
        now: &str,
        discard_cutoff: &str,
    ) -> Result<u64, FlowlineError> {
        queries::sessions::discard_unanswered_feedback(self.db()?, now, discard_cutoff).await
    }

    async fn messages_for_session(&self, session_id: &str) -> Result<Vec<Message>, FlowlineError> {
        queries::sessions::messages_for_session(self.db()?, session_id).await
    }

    // --- Delivery log ---

    async fn get_attempt(&self, id: &str) -> Result<Option<DeliveryAttempt>, FlowlineError> {
        queries::deliveries::get_attempt(self.db()?, id).await
    }

    async fn claim_attempt(
        &self,
        id: &str,
        now: &str,
        lease_until: &str,
    ) -> Result<Option<ClaimedAttempt>, FlowlineError> {
        queries::deliveries::claim_attempt(self.db()?, id, now, lease_until).await
    }

    async fn update_attempt(&self, update: &AttemptUpdate) -> Result<bool, FlowlineError> {
        queries::deliveries::update_attempt(self.db()?, update).await
    }

    async fn due_attempts(
        &self,
        now: &str,
        max_retries: u32,
        limit: u32,
    ) -> Result<Vec<DeliveryAttempt>, FlowlineError> {
        queries::deliveries::due_attempts(self.db()?, now, max_retries, limit).await
    }

    async fn expired_leases(&self, now: &str) -> Result<Vec<DeliveryAttempt>, FlowlineError> {
        queries::deliveries::expired_leases(self.db()?, now).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowline_core::flow::{FlowNode, NodeKind};
    use flowline_core::types::CampaignStatus;
    use tempfile::tempdir;

    fn make_config(path: &str) -> StorageConfig {
        StorageConfig {
            database_path: path.to_string(),
            wal_mode: true,
        }
    }

    #[tokio::test]
    async fn sqlite_storage_implements_plugin_adapter() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let storage = SqliteStorage::new(make_config(db_path.to_str().unwrap()));

        assert_eq!(storage.name(), "sqlite");
        assert_eq!(storage.version(), semver::Version::new(0, 1, 0));
        assert_eq!(storage.adapter_type(), AdapterType::Storage);
    }

    #[tokio::test]
    async fn initialize_opens_database_at_configured_path() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("init_test.db");
        let storage = SqliteStorage::new(make_config(db_path.to_str().unwrap()));

        storage.initialize().await.unwrap();
        assert!(db_path.exists(), "database file should be created");
    }

    #[tokio::test]
    async fn initialize_twice_returns_error() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("double_init.db");
        let storage = SqliteStorage::new(make_config(db_path.to_str().unwrap()));

        storage.initialize().await.unwrap();
        let result = storage.initialize().await;
        assert!(result.is_err(), "second initialize should fail");
    }

    #[tokio::test]
    async fn health_check_reflects_initialization() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("health.db");
        let storage = SqliteStorage::new(make_config(db_path.to_str().unwrap()));

        assert!(storage.health_check().await.is_err());
        storage.initialize().await.unwrap();
        assert_eq!(storage.health_check().await.unwrap(), HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn keyword_routing_data_through_adapter() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("routing.db");
        let storage = SqliteStorage::new(make_config(db_path.to_str().unwrap()));
        storage.initialize().await.unwrap();

        let flow = FlowDefinition {
            id: "promo".into(),
            name: "Promo".into(),
            entry_key: "START".into(),
            fallback_key: "START".into(),
            nodes: vec![FlowNode {
                key: "START".into(),
                kind: NodeKind::Fallback {
                    body: "Welcome".into(),
                    next: None,
                },
                allowed_inputs: vec![],
                wait_timeout_secs: None,
            }],
        };
        storage.upsert_flow(&flow).await.unwrap();
        storage
            .upsert_campaign(&Campaign {
                id: "42".into(),
                name: "Spring".into(),
                flow_id: "promo".into(),
                status: CampaignStatus::Active,
                starts_at: None,
                ends_at: None,
                activated_at: Some("2026-03-01T09:00:00.000Z".into()),
            })
            .await
            .unwrap();
        storage.bind_keyword("PROMO", "42").await.unwrap();

        let bindings = storage.find_campaign_keywords("promo").await.unwrap();
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].flow_id, "promo");

        storage.shutdown().await.unwrap();
    }
}
