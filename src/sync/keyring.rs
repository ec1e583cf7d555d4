use std::collections::HashMap;

use crate::error::{Error, Result};

pub(crate) const SERVICE_NAME: &str = "taskboard-session";

fn attributes(server: &str) -> HashMap<&str, &str> {
    let mut attrs = HashMap::new();
    attrs.insert("service", SERVICE_NAME);
    attrs.insert("server", server);
    attrs
}

async fn open() -> Result<oo7::Keyring> {
    oo7::Keyring::new()
        .await
        .map_err(|e| Error::Keyring(format!("Failed to connect to keyring: {}", e)))
}

/// Remember the session's refresh token so the next run can sign in silently.
pub async fn store_refresh_token(server: &str, refresh_token: &str) -> Result<()> {
    let keyring = open().await?;
    keyring
        .create_item(
            &format!("Taskboard session ({})", server),
            &attributes(server),
            refresh_token.as_bytes(),
            true, // replace existing
        )
        .await
        .map_err(|e| Error::Keyring(format!("Failed to store session: {}", e)))?;
    Ok(())
}

pub async fn load_refresh_token(server: &str) -> Result<Option<String>> {
    let keyring = open().await?;
    let items = keyring
        .search_items(&attributes(server))
        .await
        .map_err(|e| Error::Keyring(format!("Failed to search keyring: {}", e)))?;

    let Some(item) = items.first() else {
        return Ok(None);
    };
    let secret = item
        .secret()
        .await
        .map_err(|e| Error::Keyring(format!("Failed to read secret: {}", e)))?;
    let token = String::from_utf8(secret.to_vec())
        .map_err(|e| Error::Keyring(format!("Invalid UTF-8 in secret: {}", e)))?;
    Ok(Some(token))
}

/// Forget the stored session, e.g. on sign-out.
pub async fn delete_refresh_token(server: &str) -> Result<()> {
    let keyring = open().await?;
    let items = keyring
        .search_items(&attributes(server))
        .await
        .map_err(|e| Error::Keyring(format!("Failed to search keyring: {}", e)))?;

    for item in items {
        item.delete()
            .await
            .map_err(|e| Error::Keyring(format!("Failed to delete session: {}", e)))?;
    }
    Ok(())
}
