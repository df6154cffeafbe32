use crate::error::RegistryError;
use crate::error::Result;
use file_registry_store::MetadataStore;
use file_registry_store::Tag;
use std::sync::Arc;
use tracing::debug;

/// Tag names as stored: trimmed, non-empty, first occurrence kept.
pub fn normalize_tags(names: &[String]) -> Result<Vec<String>> {
    let mut out: Vec<String> = Vec::with_capacity(names.len());
    for name in names {
        let name = name.trim();
        if name.is_empty() {
            return Err(RegistryError::Validation(
                "tag names must not be empty".to_string(),
            ));
        }
        if !out.iter().any(|existing| existing == name) {
            out.push(name.to_string());
        }
    }
    Ok(out)
}

#[derive(Clone)]
pub struct TagManager {
    store: Arc<dyn MetadataStore>,
}

impl TagManager {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self { store }
    }

    pub async fn get_or_create(&self, name: &str) -> Result<Tag> {
        let name = name.trim();
        if name.is_empty() {
            return Err(RegistryError::Validation("tag name is required".to_string()));
        }
        Ok(self.store.get_or_create_tag(name).await?)
    }

    /// Attach tags; returns the ones that were newly attached.
    pub async fn attach(&self, file_id: &str, names: &[String]) -> Result<Vec<String>> {
        let names = normalize_tags(names)?;
        if names.is_empty() {
            return Ok(names);
        }
        let added = self.store.attach_tags(file_id, &names).await?;
        debug!(file_id, added = added.len(), "Attached tags");
        Ok(added)
    }

    /// Detach tags; names that are not attached are ignored.
    pub async fn detach(&self, file_id: &str, names: &[String]) -> Result<Vec<String>> {
        let names = normalize_tags(names)?;
        if names.is_empty() {
            return Ok(names);
        }
        let removed = self.store.detach_tags(file_id, &names).await?;
        debug!(file_id, removed = removed.len(), "Detached tags");
        Ok(removed)
    }

    pub async fn tags_of(&self, file_id: &str) -> Result<Vec<String>> {
        Ok(self.store.file_tags(file_id).await?)
    }

    /// Every tag with its usage count, ordered by name.
    pub async fn list(&self) -> Result<Vec<Tag>> {
        let mut tags = self.store.list_tags().await?;
        tags.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(tags)
    }
}
