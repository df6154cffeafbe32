use crate::model::ListCriteria;
use crate::model::SortDirection;
use crate::model::SortField;
use crate::sqlite::rows::to_i64;
use rusqlite::types::Value;

/// WHERE clause and bound values assembled from `ListCriteria`.
#[derive(Debug, Default)]
pub(crate) struct WhereClause {
    conditions: Vec<String>,
    pub(crate) params: Vec<Value>,
}

impl WhereClause {
    pub(crate) fn sql(&self) -> String {
        if self.conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.conditions.join(" AND "))
        }
    }

    fn push(&mut self, condition: impl Into<String>, params: impl IntoIterator<Item = Value>) {
        self.conditions.push(condition.into());
        self.params.extend(params);
    }

    fn push_in(&mut self, column: &str, values: &[String]) {
        if values.is_empty() {
            return;
        }
        self.push(
            format!("{column} IN ({})", placeholders(values.len())),
            values.iter().cloned().map(Value::Text),
        );
    }
}

const TAG_EXISTS: &str = "EXISTS (SELECT 1 FROM file_tags ft JOIN tags t ON t.id = ft.tag_id \
     WHERE ft.file_id = f.id AND t.name";

/// Build the filter for `criteria`. When `fts_query` is set the caller must
/// join `files_fts` into the FROM clause.
pub(crate) fn build_where(criteria: &ListCriteria, fts_query: Option<&str>) -> WhereClause {
    let mut clause = WhereClause::default();

    if let Some(query) = fts_query {
        clause.push("files_fts MATCH ?", [Value::Text(query.to_string())]);
    }

    let statuses: Vec<String> = criteria
        .effective_statuses()
        .into_iter()
        .map(|status| status.as_str().to_string())
        .collect();
    clause.push_in("f.status", &statuses);
    clause.push_in("f.source", &criteria.sources);
    clause.push_in("f.category", &criteria.categories);
    clause.push_in("f.mime_type", &criteria.mime_types);
    clause.push_in("f.extension", &criteria.normalized_extensions());

    if let Some(pattern) = criteria.path_pattern.as_deref().filter(|p| !p.is_empty()) {
        clause.push("f.path LIKE ?", [Value::Text(pattern.to_string())]);
    }
    if let Some(pattern) = criteria.filename_pattern.as_deref().filter(|p| !p.is_empty()) {
        clause.push("f.filename LIKE ?", [Value::Text(pattern.to_string())]);
    }
    if let Some(min) = criteria.min_size {
        clause.push("f.size >= ?", [Value::Integer(to_i64(min))]);
    }
    if let Some(max) = criteria.max_size {
        clause.push("f.size <= ?", [Value::Integer(to_i64(max))]);
    }
    if let Some(after) = criteria.modified_after {
        clause.push("f.modified_at >= ?", [Value::Text(timestamp(after))]);
    }
    if let Some(before) = criteria.modified_before {
        clause.push("f.modified_at <= ?", [Value::Text(timestamp(before))]);
    }

    for tag in &criteria.tags {
        clause.push(format!("{TAG_EXISTS} = ?)"), [Value::Text(tag.clone())]);
    }
    if !criteria.any_tags.is_empty() {
        clause.push(
            format!("{TAG_EXISTS} IN ({}))", placeholders(criteria.any_tags.len())),
            criteria.any_tags.iter().cloned().map(Value::Text),
        );
    }
    if !criteria.exclude_tags.is_empty() {
        clause.push(
            format!(
                "NOT {TAG_EXISTS} IN ({}))",
                placeholders(criteria.exclude_tags.len())
            ),
            criteria.exclude_tags.iter().cloned().map(Value::Text),
        );
    }

    match criteria.has_duplicates {
        Some(true) => clause.push(format!("EXISTS ({DUPLICATE_OF_F})"), []),
        Some(false) => clause.push(format!("NOT EXISTS ({DUPLICATE_OF_F})"), []),
        None => {}
    }

    clause
}

const DUPLICATE_OF_F: &str = "SELECT 1 FROM files d WHERE d.content_hash = f.content_hash \
     AND d.id <> f.id AND d.status = 'active'";

/// ORDER BY for the page query. Relevance only applies with a text query,
/// where lower bm25 means a better match.
pub(crate) fn order_by(criteria: &ListCriteria, has_query: bool) -> String {
    let dir = match criteria.direction {
        SortDirection::Asc => "ASC",
        SortDirection::Desc => "DESC",
    };
    match criteria.order {
        SortField::Relevance if has_query => {
            let rank_dir = match criteria.direction {
                SortDirection::Asc => "DESC",
                SortDirection::Desc => "ASC",
            };
            format!(" ORDER BY fts_rank {rank_dir}, f.id ASC")
        }
        SortField::Size => format!(" ORDER BY f.size {dir}, f.id {dir}"),
        SortField::Name => format!(" ORDER BY f.filename COLLATE NOCASE {dir}, f.id {dir}"),
        SortField::Indexed => format!(" ORDER BY f.indexed_at {dir}, f.id {dir}"),
        SortField::Modified | SortField::Relevance => {
            format!(" ORDER BY f.modified_at {dir}, f.id {dir}")
        }
    }
}

/// Quote every whitespace-separated token so FTS5 operators in user input
/// are matched literally. Tokens are implicitly ANDed.
pub(crate) fn fts_query(raw: &str) -> Option<String> {
    let tokens: Vec<String> = raw
        .split_whitespace()
        .map(|token| format!("\"{}\"", token.replace('"', "\"\"")))
        .collect();
    if tokens.is_empty() {
        None
    } else {
        Some(tokens.join(" "))
    }
}

pub(crate) fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

/// Same text form rusqlite writes for `DateTime<Utc>`, so stored and bound
/// timestamps compare lexically.
pub(crate) fn timestamp(at: chrono::DateTime<chrono::Utc>) -> String {
    at.format("%F %T%.f%:z").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_fts_query_quotes_tokens() {
        assert_eq!(
            fts_query("tax  \"2024\" report*"),
            Some("\"tax\" \"\"\"2024\"\"\" \"report*\"".to_string())
        );
        assert_eq!(fts_query("   "), None);
    }

    #[test]
    fn test_default_criteria_filters_active_only() {
        let clause = build_where(&ListCriteria::default(), None);
        assert_eq!(clause.sql(), " WHERE f.status IN (?)");
        assert_eq!(clause.params, vec![Value::Text("active".to_string())]);
    }

    #[test]
    fn test_required_tags_add_one_subquery_each() {
        let criteria = ListCriteria {
            tags: vec!["a".to_string(), "b".to_string()],
            ..Default::default()
        };
        let clause = build_where(&criteria, None);
        assert_eq!(clause.sql().matches("EXISTS").count(), 2);
        assert_eq!(clause.params.len(), 3);
    }
}
