use crate::domain::{User, UserIdentity};
use crate::infrastructure::{RepositoryError, UserRepository};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum AccountError {
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
    #[error("Invalid identity: {0}")]
    InvalidIdentity(String),
}

pub struct AccountService<U>
where
    U: UserRepository,
{
    user_repo: Arc<U>,
}

impl<U> AccountService<U>
where
    U: UserRepository,
{
    pub fn new(user_repo: Arc<U>) -> Self {
        Self { user_repo }
    }

    /// Return the stored user for `identity`, creating it on first contact.
    ///
    /// Safe to call on every request; concurrent first calls converge on one row.
    pub async fn ensure_user(&self, identity: &UserIdentity) -> Result<User, AccountError> {
        if identity.external_id.trim().is_empty() {
            return Err(AccountError::InvalidIdentity(
                "external ID is empty".to_string(),
            ));
        }

        if let Some(user) = self
            .user_repo
            .find_by_external_id(&identity.external_id)
            .await?
        {
            return Ok(user);
        }

        let user = self.user_repo.ensure(&User::new(identity)).await?;
        debug!(user_id = %user.id, external_id = %user.external_id, "Created user on first contact");
        Ok(user)
    }
}
