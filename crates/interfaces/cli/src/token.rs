use std::io::Read;

use anyhow::{Context, Result, bail};

use trampoline_config::AppConfig;
use trampoline_credentials::{FileTokenStore, TokenStore, key_for_endpoint};

pub(crate) fn store(config: &AppConfig) -> FileTokenStore {
    FileTokenStore::new(&config.credentials.store_path)
}

pub(crate) async fn set(
    store: &dyn TokenStore,
    prefix: &str,
    endpoint: &str,
    username: &str,
) -> Result<()> {
    let mut secret = String::new();
    std::io::stdin()
        .read_to_string(&mut secret)
        .context("failed to read token from stdin")?;
    let secret = secret.trim();
    if secret.is_empty() {
        bail!("no token on stdin");
    }

    store
        .set_item(&key_for_endpoint(prefix, endpoint), username, secret)
        .await?;
    println!("token stored for {username} at {endpoint}");
    Ok(())
}

pub(crate) async fn get(
    store: &dyn TokenStore,
    prefix: &str,
    endpoint: &str,
    username: &str,
) -> Result<()> {
    match store.get_item(&key_for_endpoint(prefix, endpoint), username).await? {
        Some(token) => {
            println!("{token}");
            Ok(())
        }
        None => bail!("no token stored for {username} at {endpoint}"),
    }
}

pub(crate) async fn delete(
    store: &dyn TokenStore,
    prefix: &str,
    endpoint: &str,
    username: &str,
) -> Result<()> {
    if store
        .delete_item(&key_for_endpoint(prefix, endpoint), username)
        .await?
    {
        println!("token deleted for {username} at {endpoint}");
    } else {
        println!("no token stored for {username} at {endpoint}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use trampoline_credentials::MemoryTokenStore;

    use super::*;

    #[tokio::test]
    async fn get_and_delete_use_endpoint_key() {
        let store = MemoryTokenStore::new();
        store
            .set_item("Trampoline - https://api.github.com", "octocat", "ghp_x")
            .await
            .unwrap();

        get(&store, "Trampoline", "https://api.github.com/", "octocat").await.unwrap();
        assert!(get(&store, "Trampoline", "https://api.github.com", "other").await.is_err());

        delete(&store, "Trampoline", "https://api.github.com", "octocat").await.unwrap();
        assert!(get(&store, "Trampoline", "https://api.github.com", "octocat").await.is_err());
    }
}
