use crate::error::Result;

/// Well-known key the user id is stored under.
pub const USER_ID_KEY: &str = "user_id";

/// Trait for identity storage backends
pub trait IdentityStore: Send + Sync {
    /// Read the stored user id, if any
    fn load_user_id(&self) -> Option<String>;

    /// Persist a user id
    fn save_user_id(&self, user_id: &str) -> Result<()>;

    /// Forget the stored user id
    fn clear_user_id(&self) -> Result<()>;
}
