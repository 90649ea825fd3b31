//! Stored entities and their lifecycle states.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;

/// Lifecycle of one proof image.
///
/// `Pending` is the only non-terminal state: an image moves to `Verified`
/// once its ledger approval confirms, or to `Rejected` by a local decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ImageStatus {
    Pending,
    Verified,
    Rejected,
}

impl ImageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Verified => "verified",
            Self::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Whether `self -> next` is an allowed lifecycle step.
    pub fn can_become(&self, next: ImageStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Verified) | (Self::Pending, Self::Rejected)
        )
    }
}

/// Which contract entry point an audit row records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum TxKind {
    ApproveImage,
    ApproveSubmission,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: i64,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub wallet_address: String,
    pub ngo_location: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AdminRecord {
    pub id: i64,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: String,
    pub blockchain_address: Option<String>,
    pub is_active: bool,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRecord {
    pub id: i64,
    pub project_id: String,
    pub title: String,
    pub description: String,
    pub location: String,
    pub ecosystem: String,
    pub trees_planted: i64,
    pub area_restored: f64,
    pub carbon_stored: f64,
    pub ipfs_images: Json<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ImageRecord {
    pub id: i64,
    pub project_id: i64,
    pub ipfs_hash: String,
    pub lat: f64,
    pub lng: f64,
    pub timestamp: i64,
    pub status: ImageStatus,
    pub reason: String,
    pub carbon_credits: i64,
    pub on_chain_index: Option<i64>,
    pub decided_at: Option<i64>,
    pub approved_by_admin_id: Option<i64>,
    pub approved_by_admin_wallet: Option<String>,
    pub tx_hash: Option<String>,
    pub created_at: i64,
}

/// Binds one NGO account, one project and the images submitted with it.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct NgoProjectRecord {
    pub id: i64,
    pub user_id: i64,
    pub ngo_id: String,
    pub ngo_name: String,
    pub ngo_location: String,
    pub ngo_wallet: Option<String>,
    pub email: String,
    pub project_id: i64,
    pub submission_id_on_chain: Option<i64>,
    pub submission_tx_hash: Option<String>,
    /// Why automatic ledger sync stopped for this project. Cleared by an
    /// operator once the submission has been reconciled by hand.
    pub submission_review: Option<String>,
    /// Always the sum of `carbon_credits` over this project's verified images.
    pub total_carbon_credits: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionRecord {
    pub id: i64,
    pub submission_id_on_chain: i64,
    pub ngo_project_id: i64,
    pub ngo_id: String,
    pub ngo_name: String,
    pub ngo_wallet: Option<String>,
    pub project_id: i64,
    pub title: String,
    pub description: String,
    pub submitted_at: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub id: i64,
    pub tx_hash: String,
    pub kind: TxKind,
    pub contract_address: String,
    pub ngo_project_id: i64,
    pub project_id: i64,
    pub image_id: Option<i64>,
    pub ipfs_hash: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub credits: i64,
    pub admin_id: Option<i64>,
    pub admin_wallet: Option<String>,
    pub ngo_wallet: Option<String>,
    pub ngo_name: String,
    pub block_number: Option<i64>,
    pub created_at: i64,
}

/// Audit row to insert once a ledger transaction confirmed.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub tx_hash: String,
    pub kind: TxKind,
    pub contract_address: String,
    pub ngo_project_id: i64,
    pub project_id: i64,
    pub image_id: Option<i64>,
    pub ipfs_hash: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub credits: i64,
    pub admin_id: Option<i64>,
    pub admin_wallet: Option<String>,
    pub ngo_wallet: Option<String>,
    pub ngo_name: String,
    pub block_number: Option<i64>,
}

// ─────────────────────────────────────────────────────────
// Submission input
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectInput {
    pub project_id: String,
    pub title: String,
    pub description: String,
    pub location: String,
    pub ecosystem: String,
    pub trees_planted: i64,
    pub area_restored: f64,
    pub carbon_stored: f64,
    #[serde(default)]
    pub ipfs_images: Vec<String>,
    #[serde(default)]
    pub ngo_wallet: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageInput {
    pub ipfs_hash: String,
    pub lat: f64,
    pub lng: f64,
    /// Capture time reported by the device.
    pub timestamp: DateTime<Utc>,
}

/// A project with its proof images, as posted by an NGO.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSubmission {
    pub ngo_id: String,
    pub ngo_name: String,
    pub email: String,
    #[serde(alias = "projectData")]
    pub project: ProjectInput,
    pub images: Vec<ImageInput>,
}

// ─────────────────────────────────────────────────────────
// Read models
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectBundle {
    #[serde(flatten)]
    pub ngo_project: NgoProjectRecord,
    pub project: ProjectRecord,
    pub images: Vec<ImageRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_projects: usize,
    pub total_images: usize,
    pub verified: usize,
    pub rejected: usize,
    pub pending: usize,
    pub total_credits: i64,
}

impl DashboardStats {
    pub fn tally(bundles: &[ProjectBundle]) -> Self {
        let mut stats = DashboardStats {
            total_projects: bundles.len(),
            ..Default::default()
        };
        for image in bundles.iter().flat_map(|b| &b.images) {
            stats.total_images += 1;
            match image.status {
                ImageStatus::Verified => {
                    stats.verified += 1;
                    stats.total_credits += image.carbon_credits;
                }
                ImageStatus::Rejected => stats.rejected += 1,
                ImageStatus::Pending => stats.pending += 1,
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_pending_images_can_move() {
        use ImageStatus::*;
        assert!(Pending.can_become(Verified));
        assert!(Pending.can_become(Rejected));
        assert!(!Verified.can_become(Rejected));
        assert!(!Verified.can_become(Pending));
        assert!(!Rejected.can_become(Verified));
        assert!(!Rejected.can_become(Pending));
        assert!(!Pending.can_become(Pending));
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&ImageStatus::Verified).unwrap(),
            "\"verified\""
        );
        assert_eq!(ImageStatus::Rejected.as_str(), "rejected");
        assert!(ImageStatus::Rejected.is_terminal());
        assert!(!ImageStatus::Pending.is_terminal());
    }
}
