//! Approval workflow: moves images and NgoProjects through their lifecycle
//! in lockstep with the ledger.
//!
//! Credits are only ever recorded locally after the matching ledger
//! transaction has been mined. Ledger calls happen with no database
//! transaction open; the confirmed result is then applied in one atomic
//! write guarded on the image still being pending.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::{debug, error, info, warn};

use crate::db::{self, ImageApproval};
use crate::errors::{ApiError, Result};
use crate::ledger::{Ledger, LedgerError, OnChainImage, SubmissionReceipt, SubmitProjectCall};
use crate::models::{
    ImageRecord, ImageStatus, NewSubmission, NewTransaction, NgoProjectRecord, TxKind,
};

#[derive(Debug, Clone)]
pub struct WorkflowSettings {
    /// Used by bulk approval when the caller gives no credit amounts.
    pub default_credits_per_image: i64,
}

/// The admin on whose behalf an approval is made.
#[derive(Debug, Clone)]
pub struct AdminContext {
    pub admin_id: i64,
    pub wallet: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageApproved {
    pub image_id: i64,
    pub credits: i64,
    pub on_chain_index: i64,
    pub tx_hash: String,
}

/// Credits requested for a bulk approval: one amount per image (by index),
/// or one amount for every image.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CreditsPerImage {
    PerImage(Vec<i64>),
    Uniform(i64),
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkApproval {
    pub approved_count: usize,
    pub total_credits_added: i64,
    pub last_tx_hash: Option<String>,
    /// Whether the submission as a whole was approved on chain.
    pub finalized: bool,
    /// Image whose ledger call failed and stopped the run.
    pub failed_image_id: Option<i64>,
    pub failure: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedProject {
    pub ngo_project_id: i64,
    pub submission_id_on_chain: Option<i64>,
    pub tx_hash: Option<String>,
}

/// What one resume attempt did for an NgoProject without a submission id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeOutcome {
    Mapped(i64),
    /// Broadcast earlier and still unmined.
    AwaitingConfirmation,
    /// Sent (again) but not confirmed yet.
    Resubmitted,
    /// The ledger outcome is unknown; parked until an operator checks.
    NeedsReview,
}

#[derive(Clone)]
pub struct ApprovalService {
    pool: SqlitePool,
    ledger: Arc<dyn Ledger>,
    settings: WorkflowSettings,
}

impl ApprovalService {
    pub fn new(pool: SqlitePool, ledger: Arc<dyn Ledger>, settings: WorkflowSettings) -> Self {
        Self {
            pool,
            ledger,
            settings,
        }
    }

    // ─────────────────────────────────────────────────────
    // Single image
    // ─────────────────────────────────────────────────────

    pub async fn approve_single_image(
        &self,
        image_id: i64,
        credits: i64,
        approver: &AdminContext,
    ) -> Result<ImageApproved> {
        if credits <= 0 {
            return Err(ApiError::Validation(
                "Credits must be greater than zero".into(),
            ));
        }
        let image = db::get_image(&self.pool, image_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Image not found".into()))?;
        ensure_transition(&image, ImageStatus::Verified)?;

        let ngo_project = db::ngo_project_for_project(&self.pool, image.project_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("NgoProject not found for this image".into()))?;
        let submission_id = ngo_project
            .submission_id_on_chain
            .ok_or(ApiError::LedgerMappingMissing(ngo_project.id))?;

        self.approve_pending(&ngo_project, submission_id, &image, credits, approver)
            .await
    }

    pub async fn reject_image(&self, image_id: i64, reason: &str) -> Result<ImageRecord> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(ApiError::Validation("Image ID and reason required".into()));
        }
        let image = db::get_image(&self.pool, image_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Image not found".into()))?;
        ensure_transition(&image, ImageStatus::Rejected)?;

        if !db::reject_image(&self.pool, image_id, reason).await? {
            return Err(ApiError::InvalidState(
                "Image was decided by another request".into(),
            ));
        }
        info!("Image {image_id} rejected: {reason}");

        db::get_image(&self.pool, image_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Image not found".into()))
    }

    /// Ledger call for one pending image, then the atomic local update.
    async fn approve_pending(
        &self,
        ngo_project: &NgoProjectRecord,
        submission_id: i64,
        image: &ImageRecord,
        credits: i64,
        approver: &AdminContext,
    ) -> Result<ImageApproved> {
        let index = allocate_on_chain_index(&self.pool, image).await?;

        info!(
            "Approving image {} (submission {submission_id}, index {index}) for {credits} credits",
            image.id
        );
        let receipt = self
            .ledger
            .approve_image(submission_id as u64, index as u64, credits as u64)
            .await
            .map_err(|e| {
                warn!("Ledger approval for image {} failed: {e}", image.id);
                ApiError::Ledger(e)
            })?;

        let approval = ImageApproval {
            image_id: image.id,
            ngo_project_id: ngo_project.id,
            credits,
            on_chain_index: index,
            admin_id: Some(approver.admin_id),
            admin_wallet: approver.wallet.clone(),
            tx_hash: receipt.tx_hash.clone(),
            audit: NewTransaction {
                tx_hash: receipt.tx_hash.clone(),
                kind: TxKind::ApproveImage,
                contract_address: self.ledger.contract_address().to_string(),
                ngo_project_id: ngo_project.id,
                project_id: image.project_id,
                image_id: Some(image.id),
                ipfs_hash: Some(image.ipfs_hash.clone()),
                lat: Some(image.lat),
                lng: Some(image.lng),
                credits,
                admin_id: Some(approver.admin_id),
                admin_wallet: approver.wallet.clone(),
                ngo_wallet: ngo_project.ngo_wallet.clone(),
                ngo_name: ngo_project.ngo_name.clone(),
                block_number: receipt.block_number.map(|b| b as i64),
            },
        };

        if !db::commit_image_approval(&self.pool, &approval).await? {
            error!(
                "Image {} changed state while approval {} was confirming; ledger and store disagree",
                image.id, receipt.tx_hash
            );
            return Err(ApiError::InvalidState(
                "Image was decided by another request".into(),
            ));
        }
        info!("Image {} verified in {}", image.id, receipt.tx_hash);

        Ok(ImageApproved {
            image_id: image.id,
            credits,
            on_chain_index: index,
            tx_hash: receipt.tx_hash,
        })
    }

    // ─────────────────────────────────────────────────────
    // Whole project
    // ─────────────────────────────────────────────────────

    /// Approve every pending image of an NgoProject, in ledger order.
    ///
    /// Stops at the first ledger failure; images confirmed before it stay
    /// verified and the result says how far the run got. The submission is
    /// only closed on chain when the run completed and approved something.
    pub async fn approve_project_bulk(
        &self,
        ngo_project_id: i64,
        credits: Option<&CreditsPerImage>,
        approver: &AdminContext,
    ) -> Result<BulkApproval> {
        let ngo_project = db::get_ngo_project(&self.pool, ngo_project_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("NGO project not found".into()))?;
        let submission_id = ngo_project
            .submission_id_on_chain
            .ok_or(ApiError::LedgerMappingMissing(ngo_project.id))?;

        let images = db::images_for_project(&self.pool, ngo_project.project_id).await?;
        if images.is_empty() {
            return Err(ApiError::Validation("No images found".into()));
        }

        let mut outcome = BulkApproval::default();
        for (position, image) in images.iter().enumerate() {
            if image.status.is_terminal() {
                continue;
            }
            let amount = self.credits_for(credits, position);
            if amount <= 0 {
                debug!("Skipping image {} (no credits requested)", image.id);
                continue;
            }

            match self
                .approve_pending(&ngo_project, submission_id, image, amount, approver)
                .await
            {
                Ok(approved) => {
                    outcome.approved_count += 1;
                    outcome.total_credits_added += amount;
                    outcome.last_tx_hash = Some(approved.tx_hash);
                }
                Err(ApiError::InvalidState(msg)) => {
                    warn!("Skipping image {}: {msg}", image.id);
                }
                Err(e) if outcome.approved_count == 0 => return Err(e),
                Err(e) => {
                    warn!(
                        "Bulk approval of NGO project {ngo_project_id} stopped at image {}: {e}",
                        image.id
                    );
                    outcome.failed_image_id = Some(image.id);
                    outcome.failure = Some(e.public_message());
                    break;
                }
            }
        }

        if outcome.approved_count > 0 && outcome.failed_image_id.is_none() {
            self.finalize_submission(&ngo_project, submission_id, approver, &mut outcome)
                .await?;
        }

        info!(
            "Bulk approval of NGO project {ngo_project_id}: {} images, {} credits, finalized={}",
            outcome.approved_count, outcome.total_credits_added, outcome.finalized
        );
        Ok(outcome)
    }

    async fn finalize_submission(
        &self,
        ngo_project: &NgoProjectRecord,
        submission_id: i64,
        approver: &AdminContext,
        outcome: &mut BulkApproval,
    ) -> Result<()> {
        match self.ledger.approve_submission(submission_id as u64).await {
            Ok(receipt) => {
                db::insert_transaction(
                    &self.pool,
                    &NewTransaction {
                        tx_hash: receipt.tx_hash.clone(),
                        kind: TxKind::ApproveSubmission,
                        contract_address: self.ledger.contract_address().to_string(),
                        ngo_project_id: ngo_project.id,
                        project_id: ngo_project.project_id,
                        image_id: None,
                        ipfs_hash: None,
                        lat: None,
                        lng: None,
                        credits: outcome.total_credits_added,
                        admin_id: Some(approver.admin_id),
                        admin_wallet: approver.wallet.clone(),
                        ngo_wallet: ngo_project.ngo_wallet.clone(),
                        ngo_name: ngo_project.ngo_name.clone(),
                        block_number: receipt.block_number.map(|b| b as i64),
                    },
                )
                .await?;
                outcome.finalized = true;
                outcome.last_tx_hash = Some(receipt.tx_hash);
            }
            Err(e) => {
                warn!("Closing submission {submission_id} failed: {e}");
                outcome.failure = Some(e.public_message());
            }
        }
        Ok(())
    }

    fn credits_for(&self, credits: Option<&CreditsPerImage>, position: usize) -> i64 {
        match credits {
            None => self.settings.default_credits_per_image,
            Some(CreditsPerImage::Uniform(amount)) => *amount,
            Some(CreditsPerImage::PerImage(amounts)) => amounts.get(position).copied().unwrap_or(0),
        }
    }

    // ─────────────────────────────────────────────────────
    // Submission
    // ─────────────────────────────────────────────────────

    /// Store a new project for the NGO account owning `submission.email`,
    /// then push it to the ledger. Ledger failures leave the records in
    /// place for the sync task to finish.
    pub async fn submit_project(&self, submission: &NewSubmission) -> Result<SubmittedProject> {
        validate_submission(submission)?;

        let email = submission.email.trim().to_lowercase();
        let user = db::find_user_by_email(&self.pool, &email)
            .await?
            .ok_or_else(|| ApiError::NotFound("User not found".into()))?;

        let ngo_project = db::create_submission(
            &self.pool,
            user.id,
            &submission.project.location,
            submission,
        )
        .await?;
        info!(
            "Stored NGO project {} ({} images) for user {}",
            ngo_project.id,
            submission.images.len(),
            user.id
        );

        let call = SubmitProjectCall {
            ngo_name: submission.ngo_name.clone(),
            email: submission.email.clone(),
            title: submission.project.title.clone(),
            content_hashes: submission.images.iter().map(|i| i.ipfs_hash.clone()).collect(),
            lats: submission.images.iter().map(|i| i.lat.to_string()).collect(),
            lngs: submission.images.iter().map(|i| i.lng.to_string()).collect(),
        };

        match self.push_submission(&ngo_project, &call).await? {
            Ok(receipt) => Ok(SubmittedProject {
                ngo_project_id: ngo_project.id,
                submission_id_on_chain: Some(receipt.submission_id as i64),
                tx_hash: Some(receipt.tx_hash),
            }),
            Err(e) => Ok(SubmittedProject {
                ngo_project_id: ngo_project.id,
                submission_id_on_chain: None,
                tx_hash: e.tx_hash().map(String::from),
            }),
        }
    }

    /// Send `submitProject` and record the mapping on confirmation.
    ///
    /// The outer result carries store failures; the inner one the ledger's.
    async fn push_submission(
        &self,
        ngo_project: &NgoProjectRecord,
        call: &SubmitProjectCall,
    ) -> Result<std::result::Result<SubmissionReceipt, LedgerError>> {
        db::touch_ngo_project(&self.pool, ngo_project.id).await?;
        match self.ledger.submit_project(call).await {
            Ok(receipt) => {
                self.record_receipt(ngo_project, &receipt).await?;
                Ok(Ok(receipt))
            }
            Err(e) => {
                warn!("Ledger submission of NGO project {} failed: {e}", ngo_project.id);
                if let Some(tx_hash) = e.tx_hash() {
                    db::set_submission_tx_hash(&self.pool, ngo_project.id, Some(tx_hash)).await?;
                }
                if needs_review(&e) {
                    self.park(ngo_project, &e).await?;
                }
                Ok(Err(e))
            }
        }
    }

    async fn park(&self, ngo_project: &NgoProjectRecord, cause: &LedgerError) -> Result<()> {
        error!(
            "NGO project {} needs manual ledger reconciliation: {cause}",
            ngo_project.id
        );
        db::flag_submission_for_review(&self.pool, ngo_project.id, &cause.to_string()).await
    }

    async fn record_receipt(
        &self,
        ngo_project: &NgoProjectRecord,
        receipt: &SubmissionReceipt,
    ) -> Result<()> {
        if db::record_submission(
            &self.pool,
            ngo_project,
            receipt.submission_id as i64,
            &receipt.tx_hash,
        )
        .await?
        {
            info!(
                "NGO project {} mapped to ledger submission {} ({}, block {:?})",
                ngo_project.id, receipt.submission_id, receipt.tx_hash, receipt.block_number
            );
        } else {
            warn!(
                "NGO project {} already mapped; ignoring submission {} from {}",
                ngo_project.id, receipt.submission_id, receipt.tx_hash
            );
        }
        Ok(())
    }

    /// Finish the ledger submission of an NgoProject that has no submission
    /// id yet: look up a transaction already broadcast, or send a new one.
    pub async fn resume_submission(&self, ngo_project: &NgoProjectRecord) -> Result<ResumeOutcome> {
        if let Some(tx_hash) = ngo_project.submission_tx_hash.as_deref() {
            match self.ledger.find_submission(tx_hash).await {
                Ok(Some(receipt)) => {
                    self.record_receipt(ngo_project, &receipt).await?;
                    return Ok(ResumeOutcome::Mapped(receipt.submission_id as i64));
                }
                Ok(None) => return Ok(ResumeOutcome::AwaitingConfirmation),
                Err(e @ LedgerError::MissingEvent { .. }) => {
                    self.park(ngo_project, &e).await?;
                    return Ok(ResumeOutcome::NeedsReview);
                }
                Err(e @ LedgerError::Reverted { .. }) => {
                    warn!(
                        "Submission tx {tx_hash} of NGO project {} is unusable ({e}); resubmitting",
                        ngo_project.id
                    );
                    db::set_submission_tx_hash(&self.pool, ngo_project.id, None).await?;
                }
                Err(e) => return Err(e.into()),
            }
        }

        let project = db::get_project(&self.pool, ngo_project.project_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Project not found".into()))?;
        let images = db::images_for_project(&self.pool, ngo_project.project_id).await?;
        let call = SubmitProjectCall {
            ngo_name: ngo_project.ngo_name.clone(),
            email: ngo_project.email.clone(),
            title: project.title,
            content_hashes: images.iter().map(|i| i.ipfs_hash.clone()).collect(),
            lats: images.iter().map(|i| i.lat.to_string()).collect(),
            lngs: images.iter().map(|i| i.lng.to_string()).collect(),
        };

        match self.push_submission(ngo_project, &call).await? {
            Ok(receipt) => Ok(ResumeOutcome::Mapped(receipt.submission_id as i64)),
            Err(e) if needs_review(&e) => Ok(ResumeOutcome::NeedsReview),
            Err(_) => Ok(ResumeOutcome::Resubmitted),
        }
    }

    /// Read an image back from the contract.
    pub async fn on_chain_image(&self, submission_id: u64, image_index: u64) -> Result<OnChainImage> {
        Ok(self.ledger.get_image(submission_id, image_index).await?)
    }
}

/// Failures after which resending could create a second submission on chain
/// and nothing can be polled to find out.
fn needs_review(err: &LedgerError) -> bool {
    matches!(
        err,
        LedgerError::Indeterminate { tx_hash: None, .. } | LedgerError::MissingEvent { .. }
    )
}

/// Position of `image` in its ledger submission.
///
/// The contract stores a submission's images in the array passed to
/// `submitProject` and addresses them only by index, so this must be the
/// image's rank among its project's images in creation order. This is a
/// compatibility constraint with the contract's storage layout.
pub async fn allocate_on_chain_index(pool: &SqlitePool, image: &ImageRecord) -> Result<i64> {
    match image.on_chain_index {
        Some(index) => Ok(index),
        None => db::image_rank_in_project(pool, image.project_id, image.id).await,
    }
}

fn ensure_transition(image: &ImageRecord, next: ImageStatus) -> Result<()> {
    if image.status.can_become(next) {
        Ok(())
    } else {
        Err(ApiError::InvalidState(format!(
            "Image already {}",
            image.status.as_str()
        )))
    }
}

fn validate_submission(submission: &NewSubmission) -> Result<()> {
    let required = [
        &submission.ngo_id,
        &submission.ngo_name,
        &submission.email,
        &submission.project.project_id,
        &submission.project.title,
    ];
    if required.iter().any(|v| v.trim().is_empty()) || submission.images.is_empty() {
        return Err(ApiError::Validation("Incomplete submission data".into()));
    }
    for image in &submission.images {
        if image.ipfs_hash.trim().is_empty() {
            return Err(ApiError::Validation("Image content hash required".into()));
        }
        if !(-90.0..=90.0).contains(&image.lat) || !(-180.0..=180.0).contains(&image.lng) {
            return Err(ApiError::Validation(format!(
                "Invalid GPS coordinates for image {}",
                image.ipfs_hash
            )));
        }
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────
