use crate::error::Result;
use file_registry_store::DuplicateScan;
use file_registry_store::FileRecord;
use file_registry_store::MetadataStore;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const DEFAULT_GROUP_LIMIT: usize = 100;

/// Active records sharing one content hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub content_hash: String,
    pub count: usize,
    pub total_size: u64,
    /// Bytes that would be freed by keeping only the smallest copy.
    pub wasted_size: u64,
    pub files: Vec<FileRecord>,
}

impl DuplicateGroup {
    fn from_members(content_hash: String, mut files: Vec<FileRecord>) -> Self {
        // Kept member first: smallest, then oldest indexed.
        files.sort_by(|a, b| {
            a.size
                .cmp(&b.size)
                .then_with(|| a.indexed_at.cmp(&b.indexed_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        let total_size: u64 = files.iter().map(|f| f.size).sum();
        let min_size = files.first().map(|f| f.size).unwrap_or_default();
        Self {
            content_hash,
            count: files.len(),
            total_size,
            wasted_size: total_size - min_size,
            files,
        }
    }

    /// Members other than the one that would be kept.
    pub fn redundant(&self) -> &[FileRecord] {
        self.files.get(1..).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceWaste {
    pub instances: u64,
    pub wasted_size: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateSummary {
    pub total_groups: u64,
    /// Σ(count − 1) over all groups.
    pub total_duplicates: u64,
    pub total_wasted: u64,
    pub by_source: BTreeMap<String, SourceWaste>,
}

#[derive(Clone)]
pub struct DuplicateDetector {
    store: Arc<dyn MetadataStore>,
}

impl DuplicateDetector {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self { store }
    }

    /// Active records with `content_hash`, oldest indexed first.
    pub async fn find_by_hash(&self, content_hash: &str) -> Result<Vec<FileRecord>> {
        Ok(self.store.find_by_hash(content_hash).await?)
    }

    /// Every duplicate group in scope, largest waste first.
    pub async fn all_groups(&self, scan: &DuplicateScan) -> Result<Vec<DuplicateGroup>> {
        let candidates = self.store.duplicate_candidates(scan).await?;
        let mut by_hash: BTreeMap<String, Vec<FileRecord>> = BTreeMap::new();
        for record in candidates {
            by_hash
                .entry(record.content_hash.clone())
                .or_default()
                .push(record);
        }
        let mut groups: Vec<DuplicateGroup> = by_hash
            .into_iter()
            .filter(|(_, members)| members.len() > 1)
            .map(|(hash, members)| DuplicateGroup::from_members(hash, members))
            .collect();
        groups.sort_by(|a, b| {
            b.wasted_size
                .cmp(&a.wasted_size)
                .then_with(|| a.content_hash.cmp(&b.content_hash))
        });
        Ok(groups)
    }

    pub async fn list_groups(
        &self,
        min_size: Option<u64>,
        sources: &[String],
        limit: Option<usize>,
    ) -> Result<Vec<DuplicateGroup>> {
        let scan = DuplicateScan {
            min_size,
            sources: sources.to_vec(),
        };
        let mut groups = self.all_groups(&scan).await?;
        groups.truncate(limit.filter(|l| *l > 0).unwrap_or(DEFAULT_GROUP_LIMIT));
        Ok(groups)
    }

    pub async fn summary(&self, sources: &[String]) -> Result<DuplicateSummary> {
        let scan = DuplicateScan {
            min_size: None,
            sources: sources.to_vec(),
        };
        Ok(summarize(&self.all_groups(&scan).await?))
    }
}

pub fn summarize(groups: &[DuplicateGroup]) -> DuplicateSummary {
    let mut summary = DuplicateSummary::default();
    for group in groups {
        summary.total_groups += 1;
        summary.total_duplicates += (group.count as u64).saturating_sub(1);
        summary.total_wasted += group.wasted_size;
        for record in group.redundant() {
            let entry = summary.by_source.entry(record.source.clone()).or_default();
            entry.instances += 1;
            entry.wasted_size += record.size;
        }
    }
    summary
}
