//! User service - the local patron directory

use std::sync::Arc;

use anyhow::Result;

use crate::adapters::duckdb::DuckDbRepository;
use crate::domain::result::Error;
use crate::domain::LocalUser;

pub struct UserService {
    repository: Arc<DuckDbRepository>,
}

impl UserService {
    pub fn new(repository: Arc<DuckDbRepository>) -> Self {
        Self { repository }
    }

    /// Register a patron, or re-point an existing username at a new local id
    pub fn add_user(&self, yorku_id: &str, username: &str) -> Result<LocalUser> {
        let yorku_id = yorku_id.trim();
        let username = username.trim();
        if yorku_id.is_empty() || username.is_empty() {
            return Err(Error::validation("Both a local id and an Alma username are required").into());
        }

        let user = LocalUser::new(yorku_id, username);
        self.repository.upsert_user(&user)?;
        Ok(user)
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<LocalUser>> {
        self.repository.get_user_by_username(username)
    }

    pub fn get_user_by_yorku_id(&self, yorku_id: &str) -> Result<Option<LocalUser>> {
        self.repository.get_user_by_yorku_id(yorku_id)
    }

    /// Find a patron by Alma username first, then by local id
    pub fn resolve(&self, id: &str) -> Result<LocalUser> {
        if let Some(user) = self.get_user_by_username(id)? {
            return Ok(user);
        }
        self.get_user_by_yorku_id(id)?
            .ok_or_else(|| Error::not_found(format!("No patron registered as '{}'", id)).into())
    }

    pub fn list_users(&self) -> Result<Vec<LocalUser>> {
        self.repository.list_users()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, UserService) {
        let temp_dir = TempDir::new().unwrap();
        let repo =
            Arc::new(DuckDbRepository::new(&temp_dir.path().join("test.duckdb")).unwrap());
        repo.ensure_schema().unwrap();
        (temp_dir, UserService::new(repo))
    }

    #[test]
    fn test_add_and_resolve() {
        let (_dir, service) = setup();
        service.add_user(" 101010 ", "12345678910").unwrap();

        assert_eq!(service.resolve("12345678910").unwrap().yorku_id, "101010");
        assert_eq!(service.resolve("101010").unwrap().username, "12345678910");
        assert!(service.resolve("nobody").is_err());
    }

    #[test]
    fn test_add_rejects_blank_ids() {
        let (_dir, service) = setup();
        assert!(service.add_user("", "p1").is_err());
        assert!(service.add_user("1", "   ").is_err());
        assert!(service.list_users().unwrap().is_empty());
    }
}
