// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Per-user memory capability.
//!
//! Before an agent call the orchestrator may attach an opaque per-user
//! context block; afterwards it detaches it again. Failures here are
//! never fatal to the conversation turn: they degrade to "no memory
//! attached". After a connection-class store error the manager marks the
//! store unavailable and short-circuits further calls until
//! [`MemoryManager::reset_server_state`] is invoked.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::utils::Emitter;

/// Errors surfaced by a memory store.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    /// The store could not be reached. Triggers the unavailable latch.
    #[error("connection failed: {0}")]
    Connection(String),
    /// The store did not answer within the configured timeout.
    #[error("memory operation timed out after {0} ms")]
    Timeout(u64),
    /// The store answered with a non-success status.
    #[error("memory API error (HTTP {status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },
    /// Any other failure.
    #[error("{0}")]
    Other(String),
}

/// Per-user memory store capability.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Find or create the context block for one user, returning its ID.
    async fn get_or_create_user_block(
        &self,
        agent_id: &str,
        user_id: &str,
    ) -> Result<String, MemoryError>;

    /// Attach a block to the agent. Attaching an already-attached block
    /// must succeed.
    async fn attach_block(&self, agent_id: &str, block_id: &str) -> Result<(), MemoryError>;

    /// Detach a block from the agent. Detaching a non-attached block must
    /// succeed.
    async fn detach_block(&self, agent_id: &str, block_id: &str) -> Result<(), MemoryError>;
}

/// Events fanned out by the [`MemoryManager`].
#[derive(Debug, Clone)]
pub enum MemoryEvent {
    /// The store was marked unavailable after a connection-class error.
    ServerUnavailable,
    /// An attach attempt failed for a user (non-fatal).
    AttachFailed {
        /// Affected user.
        user_id: String,
    },
    /// A detach attempt failed for a block (non-fatal).
    DetachFailed {
        /// Affected block.
        block_id: String,
    },
}

/// Manages per-user block attach/detach around agent calls.
pub struct MemoryManager {
    store: Arc<dyn MemoryStore>,
    agent_id: String,
    timeout: Duration,
    unavailable: AtomicBool,
    attached: Mutex<HashSet<String>>,
    events: Emitter<MemoryEvent>,
}

impl MemoryManager {
    /// Create a manager for one agent over `store`.
    pub fn new(store: Arc<dyn MemoryStore>, agent_id: impl Into<String>, timeout: Duration) -> Self {
        Self {
            store,
            agent_id: agent_id.into(),
            timeout,
            unavailable: AtomicBool::new(false),
            attached: Mutex::new(HashSet::new()),
            events: Emitter::new(),
        }
    }

    /// Subscribe to memory lifecycle events.
    pub fn subscribe(&self) -> tokio::sync::mpsc::UnboundedReceiver<MemoryEvent> {
        self.events.subscribe()
    }

    /// True until a connection-class error latched the unavailable flag.
    pub fn is_server_available(&self) -> bool {
        !self.unavailable.load(Ordering::SeqCst)
    }

    /// Clear the unavailable latch once the store is known healthy.
    pub fn reset_server_state(&self) {
        self.unavailable.store(false, Ordering::SeqCst);
    }

    async fn with_timeout<T>(
        &self,
        future: impl std::future::Future<Output = Result<T, MemoryError>>,
    ) -> Result<T, MemoryError> {
        match tokio::time::timeout(self.timeout, future).await {
            Ok(result) => result,
            Err(_) => Err(MemoryError::Timeout(self.timeout.as_millis() as u64)),
        }
    }

    fn note_failure(&self, error: &MemoryError) {
        if matches!(error, MemoryError::Connection(_)) {
            self.unavailable.store(true, Ordering::SeqCst);
            self.events.emit(MemoryEvent::ServerUnavailable);
        }
    }

    /// Attach the user's context blocks ahead of an agent call. Returns
    /// the attached block IDs; empty on any failure (non-fatal).
    pub async fn attach_user_blocks(&self, user_id: &str) -> Vec<String> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Vec::new();
        }

        let result = async {
            let block_id = self
                .with_timeout(self.store.get_or_create_user_block(&self.agent_id, user_id))
                .await?;
            self.with_timeout(self.store.attach_block(&self.agent_id, &block_id))
                .await?;
            Ok::<String, MemoryError>(block_id)
        }
        .await;

        match result {
            Ok(block_id) => {
                self.attached
                    .lock()
                    .expect("attached lock poisoned")
                    .insert(block_id.clone());
                vec![block_id]
            }
            Err(e) => {
                tracing::warn!(user = %user_id, error = %e, "MemoryManager: attach failed");
                self.note_failure(&e);
                self.events.emit(MemoryEvent::AttachFailed {
                    user_id: user_id.to_string(),
                });
                Vec::new()
            }
        }
    }

    /// Detach previously attached blocks after an agent call. Failures
    /// are logged, not propagated.
    pub async fn detach_user_blocks(&self, block_ids: &[String]) {
        if self.unavailable.load(Ordering::SeqCst) {
            return;
        }

        for block_id in block_ids {
            let result = self
                .with_timeout(self.store.detach_block(&self.agent_id, block_id))
                .await;
            if let Err(e) = result {
                tracing::warn!(block = %block_id, error = %e, "MemoryManager: detach failed");
                self.note_failure(&e);
                self.events.emit(MemoryEvent::DetachFailed {
                    block_id: block_id.clone(),
                });
            }
            self.attached
                .lock()
                .expect("attached lock poisoned")
                .remove(block_id);
        }
    }

    /// Detach everything still attached.
    pub async fn destroy(&self) {
        let block_ids: Vec<String> = self
            .attached
            .lock()
            .expect("attached lock poisoned")
            .iter()
            .cloned()
            .collect();
        self.detach_user_blocks(&block_ids).await;
        self.attached
            .lock()
            .expect("attached lock poisoned")
            .clear();
    }
}

// ---------------------------------------------------------------------------
// HTTP store implementation
// ---------------------------------------------------------------------------

const USER_BLOCK_LIMIT: u32 = 5000;

/// Block label for one user: `/{agent_id}/voice/users/{user_id}`.
fn user_block_label(agent_id: &str, user_id: &str) -> String {
    format!("/{}/voice/users/{}", agent_id, user_id)
}

#[derive(Debug, Serialize)]
struct CreateBlockRequest {
    label: String,
    value: String,
    limit: u32,
}

#[derive(Debug, Deserialize)]
struct BlockInfo {
    id: String,
}

#[derive(Debug, Serialize)]
struct AttachRequest<'a> {
    block_id: &'a str,
}

/// REST client for a Letta-style block store.
pub struct HttpMemoryStore {
    base_url: String,
    client: reqwest::Client,
}

impl HttpMemoryStore {
    /// Create a store client against `base_url`.
    pub fn new(base_url: impl Into<String>) -> Result<Self, MemoryError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| MemoryError::Other(format!("HTTP client build: {}", e)))?;
        Ok(Self {
            base_url: base_url.into(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    fn map_send_error(e: reqwest::Error) -> MemoryError {
        if e.is_connect() {
            MemoryError::Connection(e.to_string())
        } else {
            MemoryError::Other(e.to_string())
        }
    }

    async fn check_status(
        response: reqwest::Response,
        tolerated: &[u16],
    ) -> Result<reqwest::Response, MemoryError> {
        let status = response.status();
        if status.is_success() || tolerated.contains(&status.as_u16()) {
            Ok(response)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(MemoryError::Api {
                status: status.as_u16(),
                body,
            })
        }
    }
}

#[async_trait]
impl MemoryStore for HttpMemoryStore {
    async fn get_or_create_user_block(
        &self,
        agent_id: &str,
        user_id: &str,
    ) -> Result<String, MemoryError> {
        let label = user_block_label(agent_id, user_id);

        // Look for an existing block by label.
        let response = self
            .client
            .get(self.url("/v1/blocks"))
            .query(&[("label", label.as_str())])
            .send()
            .await
            .map_err(Self::map_send_error)?;
        let response = Self::check_status(response, &[]).await?;
        let existing: Vec<BlockInfo> = response
            .json()
            .await
            .map_err(|e| MemoryError::Other(format!("response parse: {}", e)))?;
        if let Some(block) = existing.first() {
            return Ok(block.id.clone());
        }

        // None found: create one.
        let body = CreateBlockRequest {
            label,
            value: format!("Voice user memory block for {}", user_id),
            limit: USER_BLOCK_LIMIT,
        };
        let response = self
            .client
            .post(self.url("/v1/blocks"))
            .json(&body)
            .send()
            .await
            .map_err(Self::map_send_error)?;
        let response = Self::check_status(response, &[]).await?;
        let created: BlockInfo = response
            .json()
            .await
            .map_err(|e| MemoryError::Other(format!("response parse: {}", e)))?;
        Ok(created.id)
    }

    async fn attach_block(&self, agent_id: &str, block_id: &str) -> Result<(), MemoryError> {
        let response = self
            .client
            .post(self.url(&format!("/v1/agents/{}/blocks/attach", agent_id)))
            .json(&AttachRequest { block_id })
            .send()
            .await
            .map_err(Self::map_send_error)?;
        // 409: already attached, fine.
        Self::check_status(response, &[409]).await?;
        Ok(())
    }

    async fn detach_block(&self, agent_id: &str, block_id: &str) -> Result<(), MemoryError> {
        let response = self
            .client
            .delete(self.url(&format!("/v1/agents/{}/blocks/{}", agent_id, block_id)))
            .send()
            .await
            .map_err(Self::map_send_error)?;
        // 404: not attached, fine for a detach.
        Self::check_status(response, &[404]).await?;
        Ok(())
    }
}
