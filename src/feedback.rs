//! Off-chain feedback ledger.
//!
//! The reputation registry only stores that a server agent authorized a
//! client to give feedback. The feedback itself (rating and comment) lives
//! here, in memory and optionally appended to a JSONL file. Each record may
//! reference the authorization transaction it was given under.

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use alloy::primitives::{B256, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::FeedbackError;

pub const MAX_RATING: u8 = 100;

/// One piece of feedback from a client agent about a server agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub id: Uuid,
    pub client_agent_id: U256,
    pub server_agent_id: U256,
    /// 0-100.
    pub rating: u8,
    pub comment: Option<String>,
    /// `acceptFeedback` transaction, when the feedback was authorized on chain.
    pub authorization_tx: Option<B256>,
    pub created_at: DateTime<Utc>,
}

/// Feedback about to be recorded.
#[derive(Debug, Clone)]
pub struct NewFeedback {
    pub client_agent_id: U256,
    pub server_agent_id: U256,
    pub rating: u8,
    pub comment: Option<String>,
    pub authorization_tx: Option<B256>,
}

#[derive(Debug, Default)]
pub struct FeedbackLedger {
    records: Vec<FeedbackRecord>,
    path: Option<PathBuf>,
}

impl FeedbackLedger {
    /// Ledger kept only in memory.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load the ledger at `path`, creating it on first write. Lines that do
    /// not parse are skipped.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, FeedbackError> {
        let path = path.into();
        let mut records = Vec::new();

        if path.exists() {
            let file = std::fs::File::open(&path)?;
            for (lineno, line) in BufReader::new(file).lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<FeedbackRecord>(&line) {
                    Ok(record) => records.push(record),
                    Err(e) => warn!(
                        path = %path.display(),
                        line = lineno + 1,
                        error = %e,
                        "Skipping unreadable feedback record"
                    ),
                }
            }
            debug!(path = %path.display(), count = records.len(), "Loaded feedback ledger");
        }

        Ok(Self {
            records,
            path: Some(path),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn record(&mut self, feedback: NewFeedback) -> Result<FeedbackRecord, FeedbackError> {
        if feedback.rating > MAX_RATING {
            return Err(FeedbackError::InvalidRating(feedback.rating));
        }

        let record = FeedbackRecord {
            id: Uuid::new_v4(),
            client_agent_id: feedback.client_agent_id,
            server_agent_id: feedback.server_agent_id,
            rating: feedback.rating,
            comment: feedback.comment,
            authorization_tx: feedback.authorization_tx,
            created_at: Utc::now(),
        };

        if let Some(path) = &self.path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut file = OpenOptions::new().create(true).append(true).open(path)?;
            let line = serde_json::to_string(&record)?;
            writeln!(file, "{line}")?;
        }

        info!(
            client = %record.client_agent_id,
            server = %record.server_agent_id,
            rating = record.rating,
            authorized = record.authorization_tx.is_some(),
            "Feedback recorded"
        );
        self.records.push(record.clone());
        Ok(record)
    }

    pub fn records(&self) -> &[FeedbackRecord] {
        &self.records
    }

    pub fn for_server(&self, server_agent_id: U256) -> Vec<&FeedbackRecord> {
        self.records
            .iter()
            .filter(|r| r.server_agent_id == server_agent_id)
            .collect()
    }

    /// Mean rating for a server agent, `None` without feedback.
    pub fn average_rating(&self, server_agent_id: U256) -> Option<f64> {
        let ratings: Vec<f64> = self
            .for_server(server_agent_id)
            .iter()
            .map(|r| f64::from(r.rating))
            .collect();
        if ratings.is_empty() {
            return None;
        }
        Some(ratings.iter().sum::<f64>() / ratings.len() as f64)
    }
}
