//! Name → ID resolution.
//!
//! The API is ID-addressed. The CLI accepts either numeric IDs or names and
//! resolves names through the `/v1/search` indexes.

use std::collections::BTreeMap;
use std::str::FromStr;

use anyhow::Result;
use serde::{de::DeserializeOwned, Deserialize};
use sm_id::{NodeId, ServerId, TemplateId, UserId};

use crate::client::ApiClient;
use crate::error::CliError;

#[derive(Debug, Deserialize)]
struct NameIndex<Id> {
    items: BTreeMap<String, Id>,
}

async fn resolve<Id>(client: &ApiClient, collection: &str, label: &str, ident: &str) -> Result<Id>
where
    Id: FromStr + DeserializeOwned,
{
    let ident = ident.trim();
    if ident.is_empty() {
        anyhow::bail!("{label} cannot be empty");
    }

    if ident.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(id) = ident.parse::<Id>() {
            return Ok(id);
        }
    }

    let index: NameIndex<Id> = client.get(&format!("/v1/search/{collection}")).await?;
    lookup(index.items, label, ident)
}

fn lookup<Id>(mut items: BTreeMap<String, Id>, label: &str, ident: &str) -> Result<Id> {
    items
        .remove(ident)
        .ok_or_else(|| CliError::NotFound(format!("{label} '{ident}' not found")).into())
}

pub async fn template_id(client: &ApiClient, ident: &str) -> Result<TemplateId> {
    resolve(client, "templates", "Template", ident).await
}

pub async fn node_id(client: &ApiClient, ident: &str) -> Result<NodeId> {
    resolve(client, "nodes", "Node", ident).await
}

pub async fn server_id(client: &ApiClient, ident: &str) -> Result<ServerId> {
    resolve(client, "servers", "Server", ident).await
}

pub async fn user_id(client: &ApiClient, ident: &str) -> Result<UserId> {
    resolve(client, "users", "User", ident).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_name() {
        let items = BTreeMap::from([
            ("survival".to_string(), ServerId::new(1)),
            ("vikings".to_string(), ServerId::new(2)),
        ]);
        assert_eq!(lookup(items.clone(), "Server", "vikings").unwrap(), ServerId::new(2));

        let err = lookup(items, "Server", "creative").unwrap_err();
        assert_eq!(err.to_string(), "Resource not found: Server 'creative' not found");
    }
}
