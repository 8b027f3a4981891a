use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use orderledger_core::{CategoryId, LedgerError, LedgerResult};

/// A node of the category tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: CategoryId,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub parent_id: Option<CategoryId>,
    pub is_active: bool,
}

impl Category {
    /// Create an active category. The slug is derived from the name.
    pub fn new(
        id: CategoryId,
        name: impl Into<String>,
        parent_id: Option<CategoryId>,
    ) -> LedgerResult<Self> {
        let name = name.into().trim().to_string();
        if name.is_empty() {
            return Err(LedgerError::validation("category name cannot be empty"));
        }
        let slug = slugify(&name);
        Ok(Self {
            id,
            name,
            slug,
            description: None,
            parent_id,
            is_active: true,
        })
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_end_matches('-').to_string()
}

/// Check that giving `id` the parent `proposed_parent` keeps the tree acyclic.
///
/// `parent_of` resolves a category to its current parent link: `None` when
/// the category does not exist, `Some(None)` for a root. The walk goes up from
/// the proposed parent; meeting `id` on the way means the write would close a
/// loop.
pub fn ensure_acyclic<F>(
    id: CategoryId,
    proposed_parent: Option<CategoryId>,
    parent_of: F,
) -> LedgerResult<()>
where
    F: Fn(CategoryId) -> Option<Option<CategoryId>>,
{
    let Some(parent) = proposed_parent else {
        return Ok(());
    };

    let mut visited = HashSet::new();
    let mut current = parent;
    loop {
        if current == id {
            return Err(LedgerError::constraint(format!(
                "category {id} cannot be placed under {parent}: the parent chain would form a cycle"
            )));
        }
        if !visited.insert(current) {
            return Err(LedgerError::constraint(format!(
                "category chain above {parent} already contains a cycle"
            )));
        }
        match parent_of(current) {
            None => return Err(LedgerError::not_found("category", current)),
            Some(None) => return Ok(()),
            Some(Some(next)) => current = next,
        }
    }
}
