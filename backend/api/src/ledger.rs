//! The issuance ledger as seen by the rest of the service.
//!
//! The contract is an external, append-only record of submissions and
//! approvals. Every call blocks until its transaction is mined, so callers
//! must treat it as slow, fallible I/O and never hold a database transaction
//! open across it.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

/// Arguments for the contract's `submitProject` entry point.
///
/// The three image vectors are parallel: entry `i` of each describes the
/// image the contract will store at position `i` of the submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitProjectCall {
    pub ngo_name: String,
    pub email: String,
    pub title: String,
    pub content_hashes: Vec<String>,
    pub lats: Vec<String>,
    pub lngs: Vec<String>,
}

/// A mined, successful transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: String,
    pub block_number: Option<u64>,
}

/// A mined `submitProject` transaction and the submission id it produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionReceipt {
    pub submission_id: u64,
    pub tx_hash: String,
    pub block_number: Option<u64>,
}

/// An image as stored by the contract, returned as its ABI-encoded words.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OnChainImage {
    pub submission_id: u64,
    pub image_index: u64,
    /// `0x`-prefixed return data of the `getImage` call.
    pub raw: String,
    pub words: Vec<String>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    /// The node refused the transaction; nothing was broadcast.
    #[error("ledger rejected transaction: {0}")]
    Rejected(String),

    #[error("ledger transaction {tx_hash} reverted")]
    Reverted { tx_hash: String },

    #[error("ledger transaction {tx_hash} was not confirmed in time")]
    Timeout { tx_hash: String },

    #[error("ledger transaction {tx_hash} emitted no submission event")]
    MissingEvent { tx_hash: String },

    /// The request may or may not have reached the chain. `tx_hash` is known
    /// when the transaction was signed locally.
    #[error("ledger transaction outcome unknown: {reason}")]
    Indeterminate {
        tx_hash: Option<String>,
        reason: String,
    },

    /// Nothing reached the node.
    #[error("ledger transport error: {0}")]
    Transport(String),

    #[error("ledger response could not be decoded: {0}")]
    Decode(String),
}

impl LedgerError {
    /// Hash of the broadcast transaction, when one exists.
    pub fn tx_hash(&self) -> Option<&str> {
        match self {
            Self::Reverted { tx_hash }
            | Self::Timeout { tx_hash }
            | Self::MissingEvent { tx_hash } => Some(tx_hash),
            Self::Indeterminate { tx_hash, .. } => tx_hash.as_deref(),
            Self::Rejected(_) | Self::Transport(_) | Self::Decode(_) => None,
        }
    }

    pub fn public_message(&self) -> String {
        match self {
            Self::Timeout { tx_hash } => {
                format!("Blockchain transaction {tx_hash} was not confirmed in time")
            }
            Self::Reverted { tx_hash } => format!("Blockchain transaction {tx_hash} reverted"),
            Self::Indeterminate { .. } => {
                "Blockchain transaction outcome unknown; it may still be confirmed".to_string()
            }
            _ => "Blockchain call failed".to_string(),
        }
    }
}

#[async_trait]
pub trait Ledger: Send + Sync {
    /// Address of the contract this client writes to.
    fn contract_address(&self) -> &str;

    async fn submit_project(
        &self,
        call: &SubmitProjectCall,
    ) -> Result<SubmissionReceipt, LedgerError>;

    /// Approve the image stored at `image_index` of `submission_id`.
    async fn approve_image(
        &self,
        submission_id: u64,
        image_index: u64,
        credits: u64,
    ) -> Result<TxReceipt, LedgerError>;

    /// Close a submission after its images were approved.
    async fn approve_submission(&self, submission_id: u64) -> Result<TxReceipt, LedgerError>;

    /// Look up a previously broadcast `submitProject` transaction.
    ///
    /// Returns `Ok(None)` while it is still unmined.
    async fn find_submission(&self, tx_hash: &str)
        -> Result<Option<SubmissionReceipt>, LedgerError>;

    /// Read one stored image back from the contract.
    async fn get_image(
        &self,
        submission_id: u64,
        image_index: u64,
    ) -> Result<OnChainImage, LedgerError>;

    async fn shutdown(&self) {}
}
