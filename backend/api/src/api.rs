//! Axum REST API handlers.

use std::sync::Arc;

use axum::{
    extract::{FromRef, FromRequest, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tracing::info;

use crate::auth::{self, AdminAuth, Role, TokenIssuer, UserAuth, MIN_PASSWORD_LEN};
use crate::config::is_eth_address;
use crate::db;
use crate::errors::{ApiError, Result};
use crate::models::{DashboardStats, NewSubmission};
use crate::workflow::{AdminContext, ApprovalService, CreditsPerImage};

pub struct AppState {
    pub pool: SqlitePool,
    pub service: ApprovalService,
    pub tokens: TokenIssuer,
    /// Recorded as approver wallet for admins without a blockchain address.
    pub signer: String,
}

impl FromRef<Arc<AppState>> for TokenIssuer {
    fn from_ref(state: &Arc<AppState>) -> Self {
        state.tokens.clone()
    }
}

/// JSON request body. Malformed or incomplete bodies are answered with the
/// usual `{success: false, message}` error instead of axum's plain text.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

// ─────────────────────────────────────────────────────────
// Request shapes
// ─────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub wallet_address: String,
    pub ngo_location: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AdminSignupRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub blockchain_address: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectLookup {
    pub project_id: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageLookup {
    pub image_ids: Vec<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproveImageRequest {
    pub image_id: i64,
    pub credits: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectImageRequest {
    pub image_id: i64,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkApproveRequest {
    /// NgoProject id.
    pub project_id: i64,
    #[serde(default)]
    pub credits_per_image: Option<CreditsPerImage>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OnChainImageQuery {
    pub submission_id_on_chain: Option<String>,
    pub image_index: Option<String>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

// ─────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────

fn is_valid_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain
                    .split_once('.')
                    .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty())
        }
        None => false,
    }
}

fn check_credentials(email: &str, password: &str) -> Result<()> {
    if !is_valid_email(email) {
        return Err(ApiError::Validation("Enter a valid email".into()));
    }
    if password.len() < MIN_PASSWORD_LEN {
        return Err(ApiError::Validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

/// The approving admin, re-read from the store so disabled accounts stop
/// working before their token expires.
async fn admin_context(state: &AppState, auth: AdminAuth) -> Result<AdminContext> {
    let admin = db::get_admin(&state.pool, auth.admin_id)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Not Authorized. Login Again".into()))?;
    if !admin.is_active {
        return Err(ApiError::Forbidden("Admin account disabled".into()));
    }
    info!(admin = admin.id, role = ?auth.role, "admin request");
    Ok(AdminContext {
        admin_id: admin.id,
        wallet: admin
            .blockchain_address
            .or_else(|| Some(state.signer.clone())),
    })
}

// ─────────────────────────────────────────────────────────
// Handlers: public
// ─────────────────────────────────────────────────────────

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ─────────────────────────────────────────────────────────
// Handlers: NGO users
// ─────────────────────────────────────────────────────────

/// `POST /api/user/register`
pub async fn register_user(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<RegisterRequest>,
) -> Result<Json<Value>> {
    let required = [
        &req.name,
        &req.email,
        &req.password,
        &req.wallet_address,
        &req.ngo_location,
    ];
    if required.iter().any(|v| v.trim().is_empty()) {
        return Err(ApiError::Validation("Missing Details".into()));
    }
    let email = req.email.trim().to_lowercase();
    check_credentials(&email, &req.password)?;

    let hash = auth::hash_password(&req.password)?;
    let user_id = db::insert_user(
        &state.pool,
        req.name.trim(),
        &email,
        &hash,
        req.wallet_address.trim(),
        req.ngo_location.trim(),
    )
    .await?;
    info!("Registered NGO user {user_id}");

    let token = state.tokens.issue(user_id, Role::Ngo)?;
    Ok(Json(json!({ "success": true, "token": token })))
}

/// `POST /api/user/login`
pub async fn login_user(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> Result<Json<Value>> {
    let invalid = || ApiError::Unauthorized("Invalid credentials".into());
    let user = db::find_user_by_email(&state.pool, &req.email.trim().to_lowercase())
        .await?
        .ok_or_else(invalid)?;
    if !auth::verify_password(&req.password, &user.password_hash)? {
        return Err(invalid());
    }
    let token = state.tokens.issue(user.id, Role::Ngo)?;
    Ok(Json(json!({ "success": true, "token": token })))
}

/// `GET /api/user/user`
pub async fn user_profile(
    State(state): State<Arc<AppState>>,
    auth: UserAuth,
) -> Result<Json<Value>> {
    let user = db::get_user(&state.pool, auth.user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))?;
    Ok(Json(json!({ "success": true, "user": user })))
}

/// `POST /api/user/projects`
///
/// 201 once the ledger confirmed the submission, 202 when the records are
/// stored but the ledger has not confirmed yet. NGOs can only submit under
/// their own account's email.
pub async fn submit_project(
    State(state): State<Arc<AppState>>,
    auth: UserAuth,
    ApiJson(req): ApiJson<NewSubmission>,
) -> Result<(StatusCode, Json<Value>)> {
    let user = db::get_user(&state.pool, auth.user_id)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Not Authorized. Login Again".into()))?;
    if !req.email.trim().eq_ignore_ascii_case(&user.email) {
        return Err(ApiError::Forbidden(
            "Submission email does not match your account".into(),
        ));
    }

    let submitted = state.service.submit_project(&req).await?;
    let (status, message) = if submitted.submission_id_on_chain.is_some() {
        (StatusCode::CREATED, "Project submitted and recorded on blockchain")
    } else {
        (
            StatusCode::ACCEPTED,
            "Project saved; blockchain confirmation pending",
        )
    };
    Ok((
        status,
        Json(json!({
            "success": true,
            "message": message,
            "ngoProjectId": submitted.ngo_project_id,
            "submissionIdOnChain": submitted.submission_id_on_chain,
            "txHash": submitted.tx_hash,
        })),
    ))
}

/// `POST /api/user/dashData`
pub async fn dashboard(
    State(state): State<Arc<AppState>>,
    auth: UserAuth,
) -> Result<Json<Value>> {
    let projects = db::projects_for_user(&state.pool, auth.user_id).await?;
    let stats = DashboardStats::tally(&projects);
    Ok(Json(json!({
        "success": true,
        "stats": stats,
        "projects": projects,
    })))
}

// ─────────────────────────────────────────────────────────
// Handlers: admins
// ─────────────────────────────────────────────────────────

/// `POST /api/admin/signup`
pub async fn admin_signup(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<AdminSignupRequest>,
) -> Result<Json<Value>> {
    if req.name.trim().is_empty() || req.email.trim().is_empty() || req.password.is_empty() {
        return Err(ApiError::Validation("All fields are required".into()));
    }
    let email = req.email.trim().to_lowercase();
    check_credentials(&email, &req.password)?;

    let address = req
        .blockchain_address
        .as_deref()
        .map(str::trim)
        .filter(|a| !a.is_empty());
    if let Some(address) = address {
        if !is_eth_address(address) {
            return Err(ApiError::Validation("Invalid blockchain address".into()));
        }
    }

    let hash = auth::hash_password(&req.password)?;
    let admin = db::insert_admin(&state.pool, req.name.trim(), &email, &hash, address).await?;
    info!("Registered admin {}", admin.id);

    let token = state.tokens.issue(admin.id, Role::Admin)?;
    Ok(Json(json!({ "success": true, "token": token, "admin": admin })))
}

/// `POST /api/admin/login`
pub async fn admin_login(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> Result<Json<Value>> {
    let invalid = || ApiError::Unauthorized("Invalid email or password".into());
    let admin = db::find_admin_by_email(&state.pool, &req.email.trim().to_lowercase())
        .await?
        .ok_or_else(invalid)?;
    if !auth::verify_password(&req.password, &admin.password_hash)? {
        return Err(invalid());
    }
    if !admin.is_active {
        return Err(ApiError::Forbidden("Admin account disabled".into()));
    }
    let token = state.tokens.issue(admin.id, Role::Admin)?;
    Ok(Json(json!({ "success": true, "token": token, "admin": admin })))
}

/// `GET /api/admin/ngo-projects`
///
/// NgoProjects that still have pending images, with only those images.
pub async fn pending_ngo_projects(
    State(state): State<Arc<AppState>>,
    _auth: AdminAuth,
) -> Result<Json<Value>> {
    let projects = db::projects_with_pending_images(&state.pool).await?;
    Ok(Json(json!({
        "success": true,
        "count": projects.len(),
        "projects": projects,
    })))
}

/// `POST /api/admin/projects`
///
/// A project with its images, ledger submission and approval history.
pub async fn project_details(
    State(state): State<Arc<AppState>>,
    _auth: AdminAuth,
    ApiJson(req): ApiJson<ProjectLookup>,
) -> Result<Json<Value>> {
    let project = db::get_project(&state.pool, req.project_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Project not found".into()))?;
    let images = db::images_for_project(&state.pool, project.id).await?;

    let (submission, transactions) = match db::ngo_project_for_project(&state.pool, project.id).await? {
        Some(np) => (
            db::submission_for_ngo_project(&state.pool, np.id).await?,
            db::transactions_for_ngo_project(&state.pool, np.id).await?,
        ),
        None => (None, Vec::new()),
    };
    Ok(Json(json!({
        "success": true,
        "project": project,
        "images": images,
        "submission": submission,
        "transactions": transactions,
    })))
}

/// `POST /api/admin/images`
pub async fn images_by_id(
    State(state): State<Arc<AppState>>,
    _auth: AdminAuth,
    ApiJson(req): ApiJson<ImageLookup>,
) -> Result<Json<Value>> {
    let images = db::get_images(&state.pool, &req.image_ids).await?;
    Ok(Json(json!({ "success": true, "images": images })))
}

/// `POST /api/admin/images/approve`
pub async fn approve_image(
    State(state): State<Arc<AppState>>,
    auth: AdminAuth,
    ApiJson(req): ApiJson<ApproveImageRequest>,
) -> Result<Json<Value>> {
    let admin = admin_context(&state, auth).await?;
    let approved = state
        .service
        .approve_single_image(req.image_id, req.credits, &admin)
        .await?;
    Ok(Json(json!({
        "success": true,
        "message": "Image approved and recorded on blockchain",
        "txHash": approved.tx_hash,
        "approval": approved,
    })))
}

/// `POST /api/admin/images/reject`
pub async fn reject_image(
    State(state): State<Arc<AppState>>,
    auth: AdminAuth,
    ApiJson(req): ApiJson<RejectImageRequest>,
) -> Result<Json<Value>> {
    admin_context(&state, auth).await?;
    let image = state.service.reject_image(req.image_id, &req.reason).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Image rejected",
        "image": image,
    })))
}

/// `POST /api/admin/projects/approve-onchain`
pub async fn approve_project(
    State(state): State<Arc<AppState>>,
    auth: AdminAuth,
    ApiJson(req): ApiJson<BulkApproveRequest>,
) -> Result<Json<Value>> {
    let admin = admin_context(&state, auth).await?;
    let outcome = state
        .service
        .approve_project_bulk(req.project_id, req.credits_per_image.as_ref(), &admin)
        .await?;

    let message = match (&outcome.failure, outcome.finalized) {
        (None, true) => format!(
            "Project approved on blockchain with {} total credits",
            outcome.total_credits_added
        ),
        (None, false) => "No pending images to approve".to_string(),
        (Some(failure), _) => format!(
            "Approved {} images before stopping: {failure}",
            outcome.approved_count
        ),
    };
    Ok(Json(json!({
        "success": true,
        "message": message,
        "result": outcome,
    })))
}

/// `GET /api/admin/transaction/image/:image_id`
pub async fn image_transaction(
    State(state): State<Arc<AppState>>,
    _auth: AdminAuth,
    Path(image_id): Path<i64>,
) -> Result<Json<Value>> {
    let tx = db::latest_transaction_for_image(&state.pool, image_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("No transaction found for this image".into()))?;
    Ok(Json(json!({ "success": true, "transaction": tx })))
}

/// `GET /api/admin/onchain/image?submissionIdOnChain=&imageIndex=`
pub async fn onchain_image(
    State(state): State<Arc<AppState>>,
    _auth: AdminAuth,
    Query(query): Query<OnChainImageQuery>,
) -> Result<Json<Value>> {
    let (Some(submission_id), Some(image_index)) =
        (query.submission_id_on_chain, query.image_index)
    else {
        return Err(ApiError::Validation("Missing query params".into()));
    };
    let parse = |v: &str| {
        v.trim()
            .parse::<u64>()
            .map_err(|_| ApiError::Validation("Invalid query params".into()))
    };
    let image = state
        .service
        .on_chain_image(parse(&submission_id)?, parse(&image_index)?)
        .await?;
    Ok(Json(json!({ "success": true, "onChainImage": image })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::fixtures::sample_submission;
    use crate::ledger::mock::MockLedger;
    use crate::workflow::WorkflowSettings;

    const SIGNER: &str = "0x90F79bf6EB2c4f870365E785982E1f101E93b906";

    async fn app() -> Arc<AppState> {
        let pool = db::test_pool().await;
        let service = ApprovalService::new(
            pool.clone(),
            Arc::new(MockLedger::new()),
            WorkflowSettings {
                default_credits_per_image: 10,
            },
        );
        Arc::new(AppState {
            pool,
            service,
            tokens: TokenIssuer::new("api-test-secret-with-enough-length!!".into()).unwrap(),
            signer: SIGNER.into(),
        })
    }

    fn registration(email: &str) -> RegisterRequest {
        RegisterRequest {
            name: "Green Roots".into(),
            email: email.into(),
            password: "mangroves-2024".into(),
            wallet_address: "0xabc".into(),
            ngo_location: "Kolkata".into(),
        }
    }

    async fn register_ngo(state: &Arc<AppState>, email: &str) -> UserAuth {
        let Json(body) = register_user(State(state.clone()), ApiJson(registration(email)))
            .await
            .unwrap();
        match state
            .tokens
            .verify_user_token(body["token"].as_str().unwrap())
            .unwrap()
        {
            auth::Identity::User { user_id } => UserAuth { user_id },
            other => panic!("unexpected identity {other:?}"),
        }
    }

    async fn signup_admin(state: &Arc<AppState>, address: Option<&str>) -> AdminAuth {
        let Json(body) = admin_signup(
            State(state.clone()),
            ApiJson(AdminSignupRequest {
                name: "Verifier".into(),
                email: "admin@example.org".into(),
                password: "verify-all-the-trees".into(),
                blockchain_address: address.map(String::from),
            }),
        )
        .await
        .unwrap();
        AdminAuth {
            admin_id: body["admin"]["id"].as_i64().unwrap(),
            role: Role::Admin,
        }
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let response = health().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn email_shape() {
        assert!(is_valid_email("ngo@example.org"));
        assert!(!is_valid_email("ngo.example.org"));
        assert!(!is_valid_email("@example.org"));
        assert!(!is_valid_email("ngo@example"));
        assert!(!is_valid_email("a@b@c.org"));
    }

    #[tokio::test]
    async fn register_then_login() {
        let state = app().await;
        let Json(body) = register_user(State(state.clone()), ApiJson(registration("NGO@Example.org")))
            .await
            .unwrap();
        assert_eq!(body["success"], true);
        let token = body["token"].as_str().unwrap();
        assert!(state.tokens.verify_user_token(token).is_ok());

        let Json(body) = login_user(
            State(state.clone()),
            ApiJson(LoginRequest {
                email: "ngo@example.org".into(),
                password: "mangroves-2024".into(),
            }),
        )
        .await
        .unwrap();
        assert!(body["token"].is_string());

        let err = login_user(
            State(state),
            ApiJson(LoginRequest {
                email: "ngo@example.org".into(),
                password: "wrong-password".into(),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn register_validates_input() {
        let state = app().await;
        let mut short = registration("ngo@example.org");
        short.password = "short".into();
        let err = register_user(State(state.clone()), ApiJson(short))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));

        let mut missing = registration("ngo@example.org");
        missing.ngo_location = " ".into();
        let err = register_user(State(state.clone()), ApiJson(missing))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));

        register_user(State(state.clone()), ApiJson(registration("ngo@example.org")))
            .await
            .unwrap();
        let err = register_user(State(state), ApiJson(registration("ngo@example.org")))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Duplicate(_)));
    }

    #[tokio::test]
    async fn admin_signup_checks_address() {
        let state = app().await;
        let err = admin_signup(
            State(state.clone()),
            ApiJson(AdminSignupRequest {
                name: "Verifier".into(),
                email: "admin@example.org".into(),
                password: "verify-all-the-trees".into(),
                blockchain_address: Some("0x1234".into()),
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));

        let auth = signup_admin(&state, None).await;
        let Json(body) = admin_login(
            State(state.clone()),
            ApiJson(LoginRequest {
                email: "admin@example.org".into(),
                password: "verify-all-the-trees".into(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(body["admin"]["id"].as_i64(), Some(auth.admin_id));
        assert!(body["admin"].get("passwordHash").is_none());

        // No address of its own: approvals are stamped with the signer.
        let ctx = admin_context(&state, auth).await.unwrap();
        assert_eq!(ctx.wallet.as_deref(), Some(SIGNER));
    }

    #[tokio::test]
    async fn disabled_admin_is_refused() {
        let state = app().await;
        let auth = signup_admin(&state, None).await;
        sqlx::query("UPDATE admins SET is_active = 0 WHERE id = ?1")
            .bind(auth.admin_id)
            .execute(&state.pool)
            .await
            .unwrap();
        let err = admin_context(&state, auth).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn submit_review_and_dashboard() {
        let state = app().await;
        let user = register_ngo(&state, "ngo@example.org").await;

        let (status, Json(body)) =
            submit_project(State(state.clone()), user, ApiJson(sample_submission("P-1", 3)))
                .await
                .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["submissionIdOnChain"], 0);
        let ngo_project_id = body["ngoProjectId"].as_i64().unwrap();

        let admin = signup_admin(&state, Some("0x70997970C51812dc3A010C7d01b50e0d17dc79C8")).await;
        let Json(pending) = pending_ngo_projects(State(state.clone()), admin)
            .await
            .unwrap();
        assert_eq!(pending["count"], 1);
        let image_ids: Vec<i64> = pending["projects"][0]["images"]
            .as_array()
            .unwrap()
            .iter()
            .map(|i| i["id"].as_i64().unwrap())
            .collect();
        assert_eq!(image_ids.len(), 3);

        reject_image(
            State(state.clone()),
            admin,
            ApiJson(RejectImageRequest {
                image_id: image_ids[0],
                reason: "blurry photo".into(),
            }),
        )
        .await
        .unwrap();

        let Json(body) = approve_image(
            State(state.clone()),
            admin,
            ApiJson(ApproveImageRequest {
                image_id: image_ids[1],
                credits: 15,
            }),
        )
        .await
        .unwrap();
        let tx_hash = body["txHash"].as_str().unwrap().to_string();

        let Json(body) = image_transaction(State(state.clone()), admin, Path(image_ids[1]))
            .await
            .unwrap();
        assert_eq!(body["transaction"]["txHash"], tx_hash.as_str());
        assert_eq!(
            body["transaction"]["adminWallet"],
            "0x70997970C51812dc3A010C7d01b50e0d17dc79C8"
        );

        let Json(body) = approve_project(
            State(state.clone()),
            admin,
            ApiJson(BulkApproveRequest {
                project_id: ngo_project_id,
                credits_per_image: Some(CreditsPerImage::Uniform(20)),
            }),
        )
        .await
        .unwrap();
        assert_eq!(body["result"]["approvedCount"], 1);
        assert_eq!(body["result"]["finalized"], true);

        let Json(body) = dashboard(State(state.clone()), user).await.unwrap();
        assert_eq!(body["stats"]["verified"], 2);
        assert_eq!(body["stats"]["rejected"], 1);
        assert_eq!(body["stats"]["pending"], 0);
        assert_eq!(body["stats"]["totalCredits"], 35);
        assert_eq!(body["projects"][0]["totalCarbonCredits"], 35);

        let Json(pending) = pending_ngo_projects(State(state), admin).await.unwrap();
        assert_eq!(pending["count"], 0);
    }

    #[tokio::test]
    async fn project_details_include_ledger_history() {
        let state = app().await;
        let user = register_ngo(&state, "ngo@example.org").await;
        submit_project(State(state.clone()), user, ApiJson(sample_submission("P-1", 2)))
            .await
            .unwrap();
        let admin = signup_admin(&state, None).await;

        let Json(pending) = pending_ngo_projects(State(state.clone()), admin)
            .await
            .unwrap();
        let project_id = pending["projects"][0]["project"]["id"].as_i64().unwrap();
        let image_id = pending["projects"][0]["images"][0]["id"].as_i64().unwrap();
        approve_image(
            State(state.clone()),
            admin,
            ApiJson(ApproveImageRequest {
                image_id,
                credits: 12,
            }),
        )
        .await
        .unwrap();

        let Json(body) = project_details(State(state.clone()), admin, ApiJson(ProjectLookup { project_id }))
            .await
            .unwrap();
        assert_eq!(body["images"].as_array().unwrap().len(), 2);
        assert_eq!(body["submission"]["submissionIdOnChain"], 0);
        assert_eq!(body["transactions"][0]["kind"], "approve_image");

        let Json(body) = images_by_id(
            State(state),
            admin,
            ApiJson(ImageLookup {
                image_ids: vec![image_id, 999],
            }),
        )
        .await
        .unwrap();
        assert_eq!(body["images"].as_array().unwrap().len(), 1);
        assert_eq!(body["images"][0]["status"], "verified");
    }

    #[tokio::test]
    async fn missing_transaction_is_not_found() {
        let state = app().await;
        let admin = signup_admin(&state, None).await;
        let err = image_transaction(State(state), admin, Path(42))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn submission_must_use_own_email() {
        let state = app().await;
        register_ngo(&state, "ngo@example.org").await;
        let other = register_ngo(&state, "other@example.org").await;

        let err = submit_project(State(state.clone()), other, ApiJson(sample_submission("P-1", 1)))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
        assert!(db::projects_for_user(&state.pool, other.user_id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn incomplete_body_is_a_json_400() {
        use axum::body::Body;
        use axum::http::{header::CONTENT_TYPE, Request};

        let request = Request::builder()
            .method("POST")
            .uri("/api/admin/images/approve")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"credits":10}"#))
            .unwrap();
        let err = ApiJson::<ApproveImageRequest>::from_request(request, &())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["success"], false);
        assert!(body["message"].as_str().unwrap().contains("imageId"));

        let request = Request::builder()
            .method("POST")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let err = ApiJson::<ApproveImageRequest>::from_request(request, &())
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn onchain_image_reads_the_contract() {
        let state = app().await;
        let user = register_ngo(&state, "ngo@example.org").await;
        submit_project(State(state.clone()), user, ApiJson(sample_submission("P-1", 2)))
            .await
            .unwrap();
        let admin = signup_admin(&state, None).await;

        let Json(body) = onchain_image(
            State(state.clone()),
            admin,
            Query(OnChainImageQuery {
                submission_id_on_chain: Some("0".into()),
                image_index: Some("1".into()),
            }),
        )
        .await
        .unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["onChainImage"]["imageIndex"], 1);
        assert_eq!(body["onChainImage"]["words"].as_array().unwrap().len(), 1);

        let err = onchain_image(
            State(state.clone()),
            admin,
            Query(OnChainImageQuery {
                submission_id_on_chain: Some("0".into()),
                image_index: None,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "Missing query params");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err = onchain_image(
            State(state.clone()),
            admin,
            Query(OnChainImageQuery {
                submission_id_on_chain: Some("abc".into()),
                image_index: Some("0".into()),
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));

        let err = onchain_image(
            State(state),
            admin,
            Query(OnChainImageQuery {
                submission_id_on_chain: Some("5".into()),
                image_index: Some("0".into()),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
    }
}
