mod filesystem;
mod storage;

pub use filesystem::{FilesystemIdentityStore, MemoryIdentityStore};
pub use storage::{IdentityStore, USER_ID_KEY};

use crate::error::Result;
use crate::models::Session;
use tracing::{debug, info};
use uuid::Uuid;

/// Return the stored user id, generating and storing one on first use.
pub fn resolve_user_id(store: &dyn IdentityStore) -> Result<String> {
    if let Some(user_id) = store.load_user_id() {
        debug!(%user_id, "reusing stored user id");
        return Ok(user_id);
    }

    let user_id = Uuid::new_v4().to_string();
    store.save_user_id(&user_id)?;
    info!(%user_id, "generated new user id");
    Ok(user_id)
}

/// Open a session for the stored identity
pub fn open_session(store: &dyn IdentityStore) -> Result<Session> {
    Ok(Session::new(resolve_user_id(store)?))
}
