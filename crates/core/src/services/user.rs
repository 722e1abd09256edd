//! User service.
//!
//! Registration, credentials, profile updates and password reset. The
//! superuser flag is deliberately absent from every input struct here;
//! it is only reachable through the escalation service, which forbids
//! touching one's own flag.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{Duration, Utc};
use sea_orm::Set;
use serde::Deserialize;
use tracing::{debug, info, warn};
use validator::Validate;

use scoutreg_common::{AppError, AppResult, IdGenerator};
use scoutreg_db::entities::user;
use scoutreg_db::repositories::{GroupRepository, PermissionRepository, UserRepository};

use crate::services::notification::{NoticeBuilder, NotifierService};
use crate::services::permission::PermissionService;

/// How long a password-reset token stays valid.
const RESET_TOKEN_TTL_MINUTES: i64 = 10;

/// User service for business logic.
#[derive(Clone)]
pub struct UserService {
    user_repo: UserRepository,
    group_repo: GroupRepository,
    permission_repo: PermissionRepository,
    permissions: PermissionService,
    notifier: NotifierService,
    notices: NoticeBuilder,
    id_gen: IdGenerator,
}

/// Input for registering an account.
#[derive(Debug, Deserialize, Validate)]
pub struct RegisterInput {
    /// Login email address, doubles as the account id.
    #[validate(email, length(max = 120))]
    pub email: String,

    #[validate(length(min = 8, max = 128))]
    pub password: String,

    #[validate(length(min = 1, max = 256))]
    pub name: String,

    /// Group to file an initial management request for.
    pub group_id: Option<String>,
}

/// Input for updating a profile. Absent fields stay unchanged.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdateProfileInput {
    #[validate(length(min = 1, max = 256))]
    pub name: Option<String>,

    /// New login email. Changing it re-keys the account and its
    /// permission rows.
    #[validate(email, length(max = 120))]
    pub email: Option<String>,
}

impl UserService {
    /// Create a new user service.
    #[must_use]
    pub fn new(
        user_repo: UserRepository,
        group_repo: GroupRepository,
        permission_repo: PermissionRepository,
        permissions: PermissionService,
        notifier: NotifierService,
        notices: NoticeBuilder,
    ) -> Self {
        Self {
            user_repo,
            group_repo,
            permission_repo,
            permissions,
            notifier,
            notices,
            id_gen: IdGenerator::new(),
        }
    }

    /// Get a user by id (login email).
    pub async fn get(&self, id: &str) -> AppResult<user::Model> {
        self.user_repo.get_by_id(id).await
    }

    /// Register an account.
    ///
    /// The very first account becomes a superuser. When a group id is
    /// supplied, a pending management request is filed for it and the
    /// approval route notified. The new user gets a welcome notice.
    pub async fn register(&self, input: RegisterInput) -> AppResult<user::Model> {
        input.validate()?;
        let email = input.email.to_lowercase();

        if self.user_repo.find_by_id(&email).await?.is_some() {
            return Err(AppError::Conflict(format!(
                "Account {email} already exists"
            )));
        }
        if let Some(group_id) = &input.group_id {
            self.group_repo.get_by_id(group_id).await?;
        }

        let is_first = self.user_repo.count().await? == 0;
        let password_hash = hash_password(&input.password)?;

        let created = self
            .user_repo
            .create(user::ActiveModel {
                id: Set(email.clone()),
                password_hash: Set(password_hash),
                name: Set(input.name),
                is_superuser: Set(is_first),
                created_at: Set(Utc::now().fixed_offset()),
                last_login: Set(None),
                reset_token: Set(None),
                reset_token_expires_at: Set(None),
            })
            .await?;

        info!(user_id = %created.id, superuser = is_first, "user registered");

        if let Some(group_id) = &input.group_id {
            self.permissions.request(&created.id, group_id).await?;
        }

        let notice = self.notices.welcome(&created, vec![], vec![]);
        if let Err(e) = self.notifier.deliver(notice).await {
            warn!(error = %e, "failed to deliver welcome notice");
        }

        Ok(created)
    }

    /// Check credentials and record the login.
    ///
    /// Unknown email and wrong password are indistinguishable to the
    /// caller.
    pub async fn authenticate(&self, email: &str, password: &str) -> AppResult<user::Model> {
        let Some(found) = self.user_repo.find_by_id(&email.to_lowercase()).await? else {
            return Err(AppError::Unauthorized);
        };
        if !verify_password(password, &found.password_hash)? {
            return Err(AppError::Unauthorized);
        }

        let updated = self
            .user_repo
            .touch_last_login(found, Utc::now().fixed_offset())
            .await?;
        debug!(user_id = %updated.id, "user authenticated");
        Ok(updated)
    }

    /// Update name and/or login email of an account.
    ///
    /// Allowed for the subject itself and for superusers. An email change
    /// re-keys the account and its permission rows in the same call, so
    /// existing grants follow the new address.
    pub async fn update_profile(
        &self,
        actor_id: &str,
        subject_id: &str,
        input: UpdateProfileInput,
    ) -> AppResult<user::Model> {
        input.validate()?;

        let actor = self.user_repo.get_by_id(actor_id).await?;
        if actor_id != subject_id && !actor.is_superuser {
            return Err(AppError::Unauthorized);
        }
        let subject = self.user_repo.get_by_id(subject_id).await?;

        if let Some(name) = input.name {
            let mut active: user::ActiveModel = subject.clone().into();
            active.name = Set(name);
            self.user_repo.update(active).await?;
        }

        let mut current_id = subject.id.clone();
        if let Some(email) = input.email {
            let email = email.to_lowercase();
            if email != current_id {
                if self.user_repo.find_by_id(&email).await?.is_some() {
                    return Err(AppError::Conflict(format!(
                        "Account {email} already exists"
                    )));
                }
                self.user_repo.update_id(&current_id, &email).await?;
                self.permission_repo.update_user_id(&current_id, &email).await?;
                info!(old_id = %current_id, new_id = %email, "account re-keyed");
                current_id = email;
            }
        }

        self.user_repo.get_by_id(&current_id).await
    }

    /// Set a new password directly. Allowed for the subject itself and
    /// for superusers.
    pub async fn set_password(
        &self,
        actor_id: &str,
        subject_id: &str,
        new_password: &str,
    ) -> AppResult<()> {
        check_password_length(new_password)?;

        let actor = self.user_repo.get_by_id(actor_id).await?;
        if actor_id != subject_id && !actor.is_superuser {
            return Err(AppError::Unauthorized);
        }
        let subject = self.user_repo.get_by_id(subject_id).await?;

        let mut active: user::ActiveModel = subject.into();
        active.password_hash = Set(hash_password(new_password)?);
        active.reset_token = Set(None);
        active.reset_token_expires_at = Set(None);
        self.user_repo.update(active).await?;

        info!(user_id = %subject_id, changed_by = %actor_id, "password changed");
        Ok(())
    }

    /// Store a short-lived reset token and mail it to the account.
    ///
    /// Succeeds silently for unknown addresses so the endpoint cannot be
    /// used to probe which accounts exist.
    pub async fn begin_password_reset(&self, email: &str) -> AppResult<()> {
        let Some(found) = self.user_repo.find_by_id(&email.to_lowercase()).await? else {
            debug!("password reset requested for unknown address");
            return Ok(());
        };

        let token = self.id_gen.generate_token();
        let expires_at = Utc::now().fixed_offset() + Duration::minutes(RESET_TOKEN_TTL_MINUTES);

        let mut active: user::ActiveModel = found.clone().into();
        active.reset_token = Set(Some(token.clone()));
        active.reset_token_expires_at = Set(Some(expires_at));
        let updated = self.user_repo.update(active).await?;

        info!(user_id = %updated.id, "password reset started");

        let notice = self.notices.password_reset(&updated, &token);
        if let Err(e) = self.notifier.deliver(notice).await {
            warn!(error = %e, "failed to deliver password reset notice");
        }
        Ok(())
    }

    /// Complete a password reset with a previously mailed token.
    pub async fn reset_password(&self, token: &str, new_password: &str) -> AppResult<()> {
        check_password_length(new_password)?;

        let invalid = || AppError::InvalidState("Invalid or expired reset token".to_string());
        let Some(found) = self.user_repo.find_by_reset_token(token).await? else {
            return Err(invalid());
        };
        let expired = found
            .reset_token_expires_at
            .is_none_or(|at| at < Utc::now().fixed_offset());
        if expired {
            return Err(invalid());
        }

        let user_id = found.id.clone();
        let mut active: user::ActiveModel = found.into();
        active.password_hash = Set(hash_password(new_password)?);
        active.reset_token = Set(None);
        active.reset_token_expires_at = Set(None);
        self.user_repo.update(active).await?;

        info!(user_id = %user_id, "password reset completed");
        Ok(())
    }
}

fn check_password_length(password: &str) -> AppResult<()> {
    if password.len() < 8 || password.len() > 128 {
        return Err(AppError::Validation(
            "Password must be between 8 and 128 characters".to_string(),
        ));
    }
    Ok(())
}

/// Hash a password with argon2id and a fresh salt.
fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| AppError::Internal(format!("Failed to hash password: {e}")))
}

/// Verify a password against a stored hash.
fn verify_password(password: &str, hash: &str) -> AppResult<bool> {
    let parsed_hash =
        PasswordHash::new(hash).map_err(|e| AppError::Internal(format!("Invalid hash: {e}")))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}
