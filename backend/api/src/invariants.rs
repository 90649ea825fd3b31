//! Store-wide consistency checks shared by the workflow and sync tests.

use sqlx::SqlitePool;

use crate::db;
use crate::models::{ImageRecord, ImageStatus};

/// An NgoProject's credit total equals the credits of its verified images.
pub async fn assert_total_matches_verified(pool: &SqlitePool, ngo_project_id: i64) {
    let ngo_project = db::get_ngo_project(pool, ngo_project_id)
        .await
        .unwrap()
        .unwrap_or_else(|| panic!("NGO project {ngo_project_id} missing"));
    let images = db::images_for_project(pool, ngo_project.project_id)
        .await
        .unwrap();

    let verified: i64 = images
        .iter()
        .filter(|i| i.status == ImageStatus::Verified)
        .map(|i| i.carbon_credits)
        .sum();
    assert_eq!(
        ngo_project.total_carbon_credits, verified,
        "NGO project {ngo_project_id}: total {} != verified credits {verified}",
        ngo_project.total_carbon_credits
    );

    for image in &images {
        assert_image_consistent(image);
    }
}

/// Per-image field consistency for its status.
pub fn assert_image_consistent(image: &ImageRecord) {
    match image.status {
        ImageStatus::Pending => {
            assert_eq!(image.carbon_credits, 0, "pending image {} has credits", image.id);
            assert!(image.decided_at.is_none(), "pending image {} is decided", image.id);
            assert!(image.tx_hash.is_none(), "pending image {} has a tx", image.id);
        }
        ImageStatus::Verified => {
            assert!(image.carbon_credits > 0, "verified image {} has no credits", image.id);
            assert!(image.tx_hash.is_some(), "verified image {} has no tx", image.id);
            assert!(image.on_chain_index.is_some());
        }
        ImageStatus::Rejected => {
            assert_eq!(image.carbon_credits, 0, "rejected image {} has credits", image.id);
            assert!(!image.reason.is_empty(), "rejected image {} has no reason", image.id);
            assert!(image.tx_hash.is_none());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[should_panic(expected = "total")]
    async fn drifted_total_is_caught() {
        let pool = db::test_pool().await;
        let user = db::fixtures::seed_user(&pool).await;
        let np = db::create_submission(
            &pool,
            user,
            "Kolkata",
            &db::fixtures::sample_submission("P-1", 1),
        )
        .await
        .unwrap();
        sqlx::query("UPDATE ngo_projects SET total_carbon_credits = 5 WHERE id = ?1")
            .bind(np.id)
            .execute(&pool)
            .await
            .unwrap();
        assert_total_matches_verified(&pool, np.id).await;
    }
}
