//! Database layer: migrations, entity queries and the atomic state
//! transitions used by the approval workflow.

use std::str::FromStr;

use chrono::Utc;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Executor, Sqlite, SqlitePool,
};
use tracing::info;

use crate::errors::{ApiError, Result};
use crate::models::{
    AdminRecord, ImageRecord, ImageStatus, NewSubmission, NewTransaction, NgoProjectRecord, ProjectBundle,
    ProjectRecord, SubmissionRecord, TransactionRecord, UserRecord,
};

/// Establish a SQLite connection pool and run pending migrations.
pub async fn init_pool(database_url: &str) -> Result<SqlitePool> {
    connect(database_url, 5).await
}

async fn connect(database_url: &str, max_connections: u32) -> Result<SqlitePool> {
    let url = if database_url.starts_with("sqlite:") {
        database_url.to_string()
    } else {
        format!("sqlite:{database_url}")
    };

    let options = SqliteConnectOptions::from_str(&url)?
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database migrations applied successfully");
    Ok(pool)
}

/// Single-connection in-memory database for tests.
#[cfg(test)]
pub async fn test_pool() -> SqlitePool {
    connect("sqlite::memory:", 1)
        .await
        .expect("in-memory database")
}

fn now() -> i64 {
    Utc::now().timestamp()
}

fn duplicate_or(err: sqlx::Error, message: &str) -> ApiError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            ApiError::Duplicate(message.to_string())
        }
        _ => err.into(),
    }
}

// ─────────────────────────────────────────────────────────
// Accounts
// ─────────────────────────────────────────────────────────

pub async fn insert_user(
    pool: &SqlitePool,
    name: &str,
    email: &str,
    password_hash: &str,
    wallet_address: &str,
    ngo_location: &str,
) -> Result<i64> {
    let id = sqlx::query(
        r#"
        INSERT INTO users (name, email, password_hash, wallet_address, ngo_location)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
    )
    .bind(name)
    .bind(email)
    .bind(password_hash)
    .bind(wallet_address)
    .bind(ngo_location)
    .execute(pool)
    .await
    .map_err(|e| duplicate_or(e, "Email already exists. Please login."))?
    .last_insert_rowid();
    Ok(id)
}

pub async fn find_user_by_email(pool: &SqlitePool, email: &str) -> Result<Option<UserRecord>> {
    let row = sqlx::query_as::<_, UserRecord>("SELECT * FROM users WHERE email = ?1")
        .bind(email)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

pub async fn get_user(pool: &SqlitePool, id: i64) -> Result<Option<UserRecord>> {
    let row = sqlx::query_as::<_, UserRecord>("SELECT * FROM users WHERE id = ?1")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

pub async fn insert_admin(
    pool: &SqlitePool,
    name: &str,
    email: &str,
    password_hash: &str,
    blockchain_address: Option<&str>,
) -> Result<AdminRecord> {
    let id = sqlx::query(
        r#"
        INSERT INTO admins (name, email, password_hash, blockchain_address)
        VALUES (?1, ?2, ?3, ?4)
        "#,
    )
    .bind(name)
    .bind(email)
    .bind(password_hash)
    .bind(blockchain_address)
    .execute(pool)
    .await
    .map_err(|e| duplicate_or(e, "Email already registered"))?
    .last_insert_rowid();

    get_admin(pool, id)
        .await?
        .ok_or_else(|| ApiError::Internal(format!("admin {id} vanished after insert")))
}

pub async fn find_admin_by_email(pool: &SqlitePool, email: &str) -> Result<Option<AdminRecord>> {
    let row = sqlx::query_as::<_, AdminRecord>("SELECT * FROM admins WHERE email = ?1")
        .bind(email)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

pub async fn get_admin(pool: &SqlitePool, id: i64) -> Result<Option<AdminRecord>> {
    let row = sqlx::query_as::<_, AdminRecord>("SELECT * FROM admins WHERE id = ?1")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

// ─────────────────────────────────────────────────────────
// Submission writes
// ─────────────────────────────────────────────────────────

/// Persist a project, its images and the NgoProject binding them to `user_id`
/// in one transaction. Images get their on-chain index from their position in
/// the submission, which is also the order the ledger stores them in.
pub async fn create_submission(
    pool: &SqlitePool,
    user_id: i64,
    ngo_location: &str,
    submission: &NewSubmission,
) -> Result<NgoProjectRecord> {
    let project = &submission.project;
    let mut tx = pool.begin().await?;

    let project_row = sqlx::query(
        r#"
        INSERT INTO projects
            (project_id, title, description, location, ecosystem,
             trees_planted, area_restored, carbon_stored, ipfs_images)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
    )
    .bind(&project.project_id)
    .bind(&project.title)
    .bind(&project.description)
    .bind(&project.location)
    .bind(&project.ecosystem)
    .bind(project.trees_planted)
    .bind(project.area_restored)
    .bind(project.carbon_stored)
    .bind(sqlx::types::Json(&project.ipfs_images))
    .execute(&mut *tx)
    .await
    .map_err(|e| duplicate_or(e, "A project with this projectId already exists"))?
    .last_insert_rowid();

    for (index, image) in submission.images.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO images (project_id, ipfs_hash, lat, lng, timestamp, on_chain_index)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(project_row)
        .bind(&image.ipfs_hash)
        .bind(image.lat)
        .bind(image.lng)
        .bind(image.timestamp.timestamp())
        .bind(index as i64)
        .execute(&mut *tx)
        .await?;
    }

    let ngo_project_id = sqlx::query(
        r#"
        INSERT INTO ngo_projects
            (user_id, ngo_id, ngo_name, ngo_location, ngo_wallet, email, project_id)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
    )
    .bind(user_id)
    .bind(&submission.ngo_id)
    .bind(&submission.ngo_name)
    .bind(ngo_location)
    .bind(&project.ngo_wallet)
    .bind(&submission.email)
    .bind(project_row)
    .execute(&mut *tx)
    .await?
    .last_insert_rowid();

    let record = sqlx::query_as::<_, NgoProjectRecord>("SELECT * FROM ngo_projects WHERE id = ?1")
        .bind(ngo_project_id)
        .fetch_one(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(record)
}

/// Remember (or forget, with `None`) the transaction carrying an NgoProject's
/// ledger submission while it is unconfirmed.
pub async fn set_submission_tx_hash(
    pool: &SqlitePool,
    ngo_project_id: i64,
    tx_hash: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE ngo_projects
        SET    submission_tx_hash = ?1, updated_at = ?2
        WHERE  id = ?3 AND submission_id_on_chain IS NULL
        "#,
    )
    .bind(tx_hash)
    .bind(now())
    .bind(ngo_project_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Mark an unmapped NgoProject as busy so the sync task keeps away from it
/// while a ledger request for it is in flight.
pub async fn touch_ngo_project(pool: &SqlitePool, ngo_project_id: i64) -> Result<()> {
    sqlx::query(
        "UPDATE ngo_projects SET updated_at = ?1 WHERE id = ?2 AND submission_id_on_chain IS NULL",
    )
    .bind(now())
    .bind(ngo_project_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Take an unmapped NgoProject out of automatic sync until an operator has
/// checked the chain for it.
pub async fn flag_submission_for_review(
    pool: &SqlitePool,
    ngo_project_id: i64,
    reason: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE ngo_projects
        SET    submission_review = ?1, updated_at = ?2
        WHERE  id = ?3 AND submission_id_on_chain IS NULL
        "#,
    )
    .bind(reason)
    .bind(now())
    .bind(ngo_project_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Record the ledger's submission id for an NgoProject and mirror the
/// submission. The id is written at most once; returns `false` when the
/// project already had one.
pub async fn record_submission(
    pool: &SqlitePool,
    ngo_project: &NgoProjectRecord,
    submission_id: i64,
    tx_hash: &str,
) -> Result<bool> {
    let mut tx = pool.begin().await?;

    let updated = sqlx::query(
        r#"
        UPDATE ngo_projects
        SET    submission_id_on_chain = ?1, submission_tx_hash = ?2, updated_at = ?3
        WHERE  id = ?4 AND submission_id_on_chain IS NULL
        "#,
    )
    .bind(submission_id)
    .bind(tx_hash)
    .bind(now())
    .bind(ngo_project.id)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    if updated == 0 {
        tx.rollback().await?;
        return Ok(false);
    }

    sqlx::query(
        r#"
        INSERT INTO submissions
            (submission_id_on_chain, ngo_project_id, ngo_id, ngo_name, ngo_wallet,
             project_id, title, description)
        SELECT ?1, np.id, np.ngo_id, np.ngo_name, np.ngo_wallet, p.id, p.title, p.description
        FROM   ngo_projects np
        JOIN   projects p ON p.id = np.project_id
        WHERE  np.id = ?2
        "#,
    )
    .bind(submission_id)
    .bind(ngo_project.id)
    .execute(&mut *tx)
    .await
    .map_err(|e| duplicate_or(e, "Ledger submission id is already mapped"))?;

    tx.commit().await?;
    Ok(true)
}

// ─────────────────────────────────────────────────────────
// Image transitions
// ─────────────────────────────────────────────────────────

/// Everything written when one image approval has confirmed on chain.
#[derive(Debug, Clone)]
pub struct ImageApproval {
    pub image_id: i64,
    pub ngo_project_id: i64,
    pub credits: i64,
    pub on_chain_index: i64,
    pub admin_id: Option<i64>,
    pub admin_wallet: Option<String>,
    pub tx_hash: String,
    pub audit: NewTransaction,
}

/// Apply a confirmed approval atomically: image status and credits, the
/// parent total, and the audit row. Returns `false` (and writes nothing)
/// when the image is no longer pending.
pub async fn commit_image_approval(pool: &SqlitePool, approval: &ImageApproval) -> Result<bool> {
    let mut tx = pool.begin().await?;
    let at = now();

    let updated = sqlx::query(
        r#"
        UPDATE images
        SET    status = 'verified',
               carbon_credits = ?1,
               on_chain_index = ?2,
               decided_at = ?3,
               approved_by_admin_id = ?4,
               approved_by_admin_wallet = ?5,
               tx_hash = ?6
        WHERE  id = ?7 AND status = 'pending'
        "#,
    )
    .bind(approval.credits)
    .bind(approval.on_chain_index)
    .bind(at)
    .bind(approval.admin_id)
    .bind(&approval.admin_wallet)
    .bind(&approval.tx_hash)
    .bind(approval.image_id)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    if updated == 0 {
        tx.rollback().await?;
        return Ok(false);
    }

    sqlx::query(
        r#"
        UPDATE ngo_projects
        SET    total_carbon_credits = total_carbon_credits + ?1, updated_at = ?2
        WHERE  id = ?3
        "#,
    )
    .bind(approval.credits)
    .bind(at)
    .bind(approval.ngo_project_id)
    .execute(&mut *tx)
    .await?;

    insert_transaction(&mut *tx, &approval.audit).await?;

    tx.commit().await?;
    Ok(true)
}

/// Reject a pending image. Returns `false` when it is no longer pending.
pub async fn reject_image(pool: &SqlitePool, image_id: i64, reason: &str) -> Result<bool> {
    let updated = sqlx::query(
        r#"
        UPDATE images
        SET    status = 'rejected', reason = ?1, decided_at = ?2
        WHERE  id = ?3 AND status = 'pending'
        "#,
    )
    .bind(reason)
    .bind(now())
    .bind(image_id)
    .execute(pool)
    .await?
    .rows_affected();
    Ok(updated == 1)
}

/// Number of images of `project_id` created before `image_id`.
pub async fn image_rank_in_project(pool: &SqlitePool, project_id: i64, image_id: i64) -> Result<i64> {
    let (rank,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM images WHERE project_id = ?1 AND id < ?2")
            .bind(project_id)
            .bind(image_id)
            .fetch_one(pool)
            .await?;
    Ok(rank)
}

// ─────────────────────────────────────────────────────────
// Transactions (audit)
// ─────────────────────────────────────────────────────────

pub async fn insert_transaction<'e, E>(executor: E, t: &NewTransaction) -> Result<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let id = sqlx::query(
        r#"
        INSERT INTO transactions
            (tx_hash, kind, contract_address, ngo_project_id, project_id, image_id,
             ipfs_hash, lat, lng, credits, admin_id, admin_wallet, ngo_wallet,
             ngo_name, block_number)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
        "#,
    )
    .bind(&t.tx_hash)
    .bind(t.kind)
    .bind(&t.contract_address)
    .bind(t.ngo_project_id)
    .bind(t.project_id)
    .bind(t.image_id)
    .bind(&t.ipfs_hash)
    .bind(t.lat)
    .bind(t.lng)
    .bind(t.credits)
    .bind(t.admin_id)
    .bind(&t.admin_wallet)
    .bind(&t.ngo_wallet)
    .bind(&t.ngo_name)
    .bind(t.block_number)
    .execute(executor)
    .await?
    .last_insert_rowid();
    Ok(id)
}

pub async fn latest_transaction_for_image(
    pool: &SqlitePool,
    image_id: i64,
) -> Result<Option<TransactionRecord>> {
    let row = sqlx::query_as::<_, TransactionRecord>(
        "SELECT * FROM transactions WHERE image_id = ?1 ORDER BY id DESC LIMIT 1",
    )
    .bind(image_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn transactions_for_ngo_project(
    pool: &SqlitePool,
    ngo_project_id: i64,
) -> Result<Vec<TransactionRecord>> {
    let rows = sqlx::query_as::<_, TransactionRecord>(
        "SELECT * FROM transactions WHERE ngo_project_id = ?1 ORDER BY id ASC",
    )
    .bind(ngo_project_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

// ─────────────────────────────────────────────────────────
// Reads
// ─────────────────────────────────────────────────────────

pub async fn get_project(pool: &SqlitePool, id: i64) -> Result<Option<ProjectRecord>> {
    let row = sqlx::query_as::<_, ProjectRecord>("SELECT * FROM projects WHERE id = ?1")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

pub async fn get_image(pool: &SqlitePool, id: i64) -> Result<Option<ImageRecord>> {
    let row = sqlx::query_as::<_, ImageRecord>("SELECT * FROM images WHERE id = ?1")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

pub async fn get_images(pool: &SqlitePool, ids: &[i64]) -> Result<Vec<ImageRecord>> {
    let mut images = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(image) = get_image(pool, *id).await? {
            images.push(image);
        }
    }
    Ok(images)
}

/// Images of a project in creation order, which is their ledger order.
pub async fn images_for_project(pool: &SqlitePool, project_id: i64) -> Result<Vec<ImageRecord>> {
    let rows = sqlx::query_as::<_, ImageRecord>(
        "SELECT * FROM images WHERE project_id = ?1 ORDER BY id ASC",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn get_ngo_project(pool: &SqlitePool, id: i64) -> Result<Option<NgoProjectRecord>> {
    let row = sqlx::query_as::<_, NgoProjectRecord>("SELECT * FROM ngo_projects WHERE id = ?1")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

pub async fn ngo_project_for_project(
    pool: &SqlitePool,
    project_id: i64,
) -> Result<Option<NgoProjectRecord>> {
    let row =
        sqlx::query_as::<_, NgoProjectRecord>("SELECT * FROM ngo_projects WHERE project_id = ?1")
            .bind(project_id)
            .fetch_optional(pool)
            .await?;
    Ok(row)
}

/// NgoProjects still waiting for a ledger submission id, not parked for
/// review and untouched since `settled_before` (unix seconds), oldest first.
pub async fn unsynced_ngo_projects(
    pool: &SqlitePool,
    settled_before: i64,
    limit: i64,
) -> Result<Vec<NgoProjectRecord>> {
    let rows = sqlx::query_as::<_, NgoProjectRecord>(
        r#"
        SELECT * FROM ngo_projects
        WHERE  submission_id_on_chain IS NULL
          AND  submission_review IS NULL
          AND  updated_at <= ?1
        ORDER  BY id ASC
        LIMIT  ?2
        "#,
    )
    .bind(settled_before)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn submission_for_ngo_project(
    pool: &SqlitePool,
    ngo_project_id: i64,
) -> Result<Option<SubmissionRecord>> {
    let row = sqlx::query_as::<_, SubmissionRecord>(
        "SELECT * FROM submissions WHERE ngo_project_id = ?1",
    )
    .bind(ngo_project_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

async fn bundle(pool: &SqlitePool, ngo_project: NgoProjectRecord) -> Result<ProjectBundle> {
    let project = get_project(pool, ngo_project.project_id)
        .await?
        .ok_or_else(|| {
            ApiError::Internal(format!("project {} missing", ngo_project.project_id))
        })?;
    let images = images_for_project(pool, ngo_project.project_id).await?;
    Ok(ProjectBundle {
        ngo_project,
        project,
        images,
    })
}

/// Every NgoProject of a user with its project and images.
pub async fn projects_for_user(pool: &SqlitePool, user_id: i64) -> Result<Vec<ProjectBundle>> {
    let rows = sqlx::query_as::<_, NgoProjectRecord>(
        "SELECT * FROM ngo_projects WHERE user_id = ?1 ORDER BY id ASC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    let mut bundles = Vec::with_capacity(rows.len());
    for row in rows {
        bundles.push(bundle(pool, row).await?);
    }
    Ok(bundles)
}

/// NgoProjects with at least one pending image; only the pending images are
/// included.
pub async fn projects_with_pending_images(pool: &SqlitePool) -> Result<Vec<ProjectBundle>> {
    let rows = sqlx::query_as::<_, NgoProjectRecord>(
        r#"
        SELECT np.* FROM ngo_projects np
        WHERE  EXISTS (
            SELECT 1 FROM images i
            WHERE  i.project_id = np.project_id AND i.status = 'pending'
        )
        ORDER  BY np.id ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut bundles = Vec::with_capacity(rows.len());
    for row in rows {
        let mut b = bundle(pool, row).await?;
        b.images
            .retain(|i| i.status == ImageStatus::Pending);
        bundles.push(b);
    }
    Ok(bundles)
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────


#[cfg(test)]
mod tests {
    use super::fixtures::{sample_submission, seed_user};
    use super::*;

    #[tokio::test]
    async fn duplicate_email_is_reported() {
        let pool = test_pool().await;
        seed_user(&pool).await;
        let err = insert_user(&pool, "Other", "ngo@example.org", "h", "0x1", "x")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Duplicate(_)));
    }

    #[tokio::test]
    async fn submission_creates_ordered_pending_images() {
        let pool = test_pool().await;
        let user = seed_user(&pool).await;
        let np = create_submission(&pool, user, "Kolkata", &sample_submission("P-1", 3))
            .await
            .unwrap();

        assert_eq!(np.submission_id_on_chain, None);
        assert_eq!(np.total_carbon_credits, 0);

        let images = images_for_project(&pool, np.project_id).await.unwrap();
        assert_eq!(images.len(), 3);
        for (i, image) in images.iter().enumerate() {
            assert_eq!(image.status, ImageStatus::Pending);
            assert_eq!(image.on_chain_index, Some(i as i64));
            assert_eq!(image.carbon_credits, 0);
        }
    }

    #[tokio::test]
    async fn duplicate_project_id_rolls_back_everything() {
        let pool = test_pool().await;
        let user = seed_user(&pool).await;
        create_submission(&pool, user, "Kolkata", &sample_submission("P-1", 1))
            .await
            .unwrap();
        let err = create_submission(&pool, user, "Kolkata", &sample_submission("P-1", 2))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Duplicate(_)));

        let bundles = projects_for_user(&pool, user).await.unwrap();
        assert_eq!(bundles.len(), 1);
        assert_eq!(bundles[0].images.len(), 1);
    }

    #[tokio::test]
    async fn submission_id_is_recorded_once() {
        let pool = test_pool().await;
        let user = seed_user(&pool).await;
        let np = create_submission(&pool, user, "Kolkata", &sample_submission("P-1", 1))
            .await
            .unwrap();

        assert!(record_submission(&pool, &np, 4, "0xaa").await.unwrap());
        assert!(!record_submission(&pool, &np, 5, "0xbb").await.unwrap());

        let np = get_ngo_project(&pool, np.id).await.unwrap().unwrap();
        assert_eq!(np.submission_id_on_chain, Some(4));
        assert_eq!(np.submission_tx_hash.as_deref(), Some("0xaa"));

        let mirror = submission_for_ngo_project(&pool, np.id).await.unwrap().unwrap();
        assert_eq!(mirror.submission_id_on_chain, 4);
        assert_eq!(mirror.title, "Mangrove belt");
    }

    #[tokio::test]
    async fn rank_follows_creation_order() {
        let pool = test_pool().await;
        let user = seed_user(&pool).await;
        let np = create_submission(&pool, user, "Kolkata", &sample_submission("P-1", 4))
            .await
            .unwrap();
        let images = images_for_project(&pool, np.project_id).await.unwrap();
        for (i, image) in images.iter().enumerate() {
            let rank = image_rank_in_project(&pool, np.project_id, image.id)
                .await
                .unwrap();
            assert_eq!(rank, i as i64);
        }
    }

    #[tokio::test]
    async fn reject_only_touches_pending_images() {
        let pool = test_pool().await;
        let user = seed_user(&pool).await;
        let np = create_submission(&pool, user, "Kolkata", &sample_submission("P-1", 1))
            .await
            .unwrap();
        let image = &images_for_project(&pool, np.project_id).await.unwrap()[0];

        assert!(reject_image(&pool, image.id, "blurry").await.unwrap());
        assert!(!reject_image(&pool, image.id, "again").await.unwrap());

        let image = get_image(&pool, image.id).await.unwrap().unwrap();
        assert_eq!(image.status, ImageStatus::Rejected);
        assert_eq!(image.reason, "blurry");
    }

    #[tokio::test]
    async fn sync_skips_busy_and_parked_projects() {
        let pool = test_pool().await;
        let user = seed_user(&pool).await;
        let first = create_submission(&pool, user, "Kolkata", &sample_submission("P-1", 1))
            .await
            .unwrap();
        let second = create_submission(&pool, user, "Kolkata", &sample_submission("P-2", 1))
            .await
            .unwrap();
        sqlx::query("UPDATE ngo_projects SET updated_at = 0")
            .execute(&pool)
            .await
            .unwrap();

        let cutoff = now() - 60;
        let ids = |rows: Vec<NgoProjectRecord>| rows.iter().map(|r| r.id).collect::<Vec<_>>();
        assert_eq!(
            ids(unsynced_ngo_projects(&pool, cutoff, 10).await.unwrap()),
            vec![first.id, second.id]
        );

        touch_ngo_project(&pool, first.id).await.unwrap();
        flag_submission_for_review(&pool, second.id, "send timed out")
            .await
            .unwrap();
        assert!(unsynced_ngo_projects(&pool, cutoff, 10).await.unwrap().is_empty());

        let parked = get_ngo_project(&pool, second.id).await.unwrap().unwrap();
        assert_eq!(parked.submission_review.as_deref(), Some("send timed out"));
    }
}
