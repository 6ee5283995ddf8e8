//! Table processing order from a static precedence list.
//!
//! The list runs from the most dependent table (a "leaf", safe to delete
//! first and insert last) to the least dependent ("root"). It is data, not
//! derived from live foreign keys: a table missing from the list is placed
//! after the listed ones in alphabetical order, which may not match its real
//! constraints.

use std::collections::BTreeSet;

/// Precedence of the vocabulary application's tables, leaf first.
pub const DEFAULT_PRECEDENCE: &[&str] = &[
    "django_admin_log",
    "flashcards_reviewlog",
    "flashcards_studysession",
    "flashcards_flashcard_tags",
    "flashcards_flashcard",
    "flashcards_tag",
    "flashcards_deck",
    "flashcards_userprofile",
    "auth_user_user_permissions",
    "auth_user_groups",
    "auth_group_permissions",
    "auth_permission",
    "auth_group",
    "auth_user",
    "django_content_type",
    "django_session",
];

/// Computes deletion and insertion order for a candidate table set.
#[derive(Debug, Clone)]
pub struct DependencyOrderer {
    precedence: Vec<String>,
}

impl Default for DependencyOrderer {
    fn default() -> Self {
        Self::new(DEFAULT_PRECEDENCE.iter().map(|s| s.to_string()).collect())
    }
}

impl DependencyOrderer {
    /// Use a custom precedence list (leaf first).
    pub fn new(precedence: Vec<String>) -> Self {
        Self { precedence }
    }

    /// Built-in list unless `custom` replaces it.
    pub fn from_settings(custom: Option<&[String]>) -> Self {
        match custom {
            Some(list) => Self::new(list.to_vec()),
            None => Self::default(),
        }
    }

    /// Order for the clear phase: listed tables in list order, then the
    /// unlisted ones alphabetically.
    pub fn deletion_order(&self, tables: &BTreeSet<String>) -> Vec<String> {
        let mut order: Vec<String> = self
            .precedence
            .iter()
            .filter(|t| tables.contains(*t))
            .cloned()
            .collect();

        // BTreeSet iteration is already alphabetical.
        order.extend(
            tables
                .iter()
                .filter(|t| !self.precedence.contains(*t))
                .cloned(),
        );
        order
    }

    /// Order for the load phase: the deletion order reversed.
    pub fn insertion_order(&self, tables: &BTreeSet<String>) -> Vec<String> {
        let mut order = self.deletion_order(tables);
        order.reverse();
        order
    }
}
