use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};
use warden_domain::model::User;
use warden_domain::{DomainError, DomainResult, Principal};
use warden_storage::UserRepository;

use super::traits::PrincipalResolver;

/// User lookups.
pub struct UserService {
    users: Arc<dyn UserRepository>,
}

impl UserService {
    pub fn new(users: Arc<dyn UserRepository>) -> Self {
        Self { users }
    }

    pub async fn get(&self, id: &str) -> DomainResult<User> {
        Ok(self.users.get_by_id(id).await?)
    }

    pub async fn get_by_email(&self, email: &str) -> DomainResult<User> {
        Ok(self.users.get_by_email(email).await?)
    }

    pub async fn create(&self, user: User) -> DomainResult<User> {
        if user.email.trim().is_empty() {
            return Err(DomainError::invalid_argument("user email cannot be empty"));
        }
        Ok(self.users.create(user).await?)
    }
}

#[async_trait]
impl PrincipalResolver for UserService {
    #[instrument(skip(self))]
    async fn resolve_identity(&self, identity: &str) -> DomainResult<Principal> {
        let email = identity.trim();
        if email.is_empty() {
            return Err(DomainError::unauthenticated("missing identity"));
        }
        match self.users.get_by_email(email).await {
            Ok(user) => Ok(Principal::user(user.id).with_email(user.email)),
            Err(err) => {
                let err = DomainError::from(err);
                if err.is_not_found() {
                    debug!(email, "identity does not match a user");
                    Err(DomainError::unauthenticated(format!("unknown identity: {email}")))
                } else {
                    Err(err)
                }
            }
        }
    }
}
