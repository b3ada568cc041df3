//! Static cascade rule table.
//!
//! For each written category, the list of cached query shapes that must be
//! treated as stale once the write succeeds. The table is built at compile
//! time and never changes at runtime.

use std::fmt;

use tessera_types::{Category, EntityId, Filter};

/// List filter field a rule keys on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterField {
    RelatedTo,
    Owner,
    Organization,
    Actor,
    Target,
}

impl FilterField {
    pub fn as_str(self) -> &'static str {
        match self {
            FilterField::RelatedTo => "related_to",
            FilterField::Owner => "owner",
            FilterField::Organization => "organization",
            FilterField::Actor => "actor",
            FilterField::Target => "target",
        }
    }

    pub fn value(self, filter: &Filter) -> Option<&EntityId> {
        match self {
            FilterField::RelatedTo => filter.related_to.as_ref(),
            FilterField::Owner => filter.owner.as_ref(),
            FilterField::Organization => filter.organization.as_ref(),
            FilterField::Actor => filter.actor.as_ref(),
            FilterField::Target => filter.target.as_ref(),
        }
    }
}

/// Which ids of a write a rule matches against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subject {
    /// The id of the written item.
    Written,
    /// The ids the written item points at.
    Related,
}

impl Subject {
    fn as_str(self) -> &'static str {
        match self {
            Subject::Written => "the written id",
            Subject::Related => "a related id",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CascadeTarget {
    /// Every cached list query of the category, whatever its filter.
    AllLists(Category),
    /// Cached list queries of the category whose `field` equals a subject id.
    ListsWhere {
        category: Category,
        field: FilterField,
        subject: Subject,
    },
    /// Single-item queries of the category for each subject id.
    Items { category: Category, subject: Subject },
}

impl fmt::Display for CascadeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CascadeTarget::AllLists(category) => write!(f, "all {category} lists"),
            CascadeTarget::ListsWhere {
                category,
                field,
                subject,
            } => write!(
                f,
                "{category} lists where {} is {}",
                field.as_str(),
                subject.as_str()
            ),
            CascadeTarget::Items { category, subject } => {
                write!(f, "{category} items of {}", subject.as_str())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CascadeRule {
    pub written: Category,
    pub targets: &'static [CascadeTarget],
}

const RECORD_TARGETS: &[CascadeTarget] = &[
    CascadeTarget::AllLists(Category::Record),
    CascadeTarget::ListsWhere {
        category: Category::Relationship,
        field: FilterField::RelatedTo,
        subject: Subject::Written,
    },
    CascadeTarget::ListsWhere {
        category: Category::Knowledge,
        field: FilterField::RelatedTo,
        subject: Subject::Written,
    },
    CascadeTarget::ListsWhere {
        category: Category::Event,
        field: FilterField::Target,
        subject: Subject::Written,
    },
];

const RELATIONSHIP_TARGETS: &[CascadeTarget] = &[
    CascadeTarget::AllLists(Category::Relationship),
    CascadeTarget::Items {
        category: Category::Record,
        subject: Subject::Related,
    },
];

const EVENT_TARGETS: &[CascadeTarget] = &[
    CascadeTarget::AllLists(Category::Event),
    CascadeTarget::ListsWhere {
        category: Category::Event,
        field: FilterField::Actor,
        subject: Subject::Related,
    },
    CascadeTarget::ListsWhere {
        category: Category::Event,
        field: FilterField::Target,
        subject: Subject::Related,
    },
];

const KNOWLEDGE_TARGETS: &[CascadeTarget] = &[CascadeTarget::AllLists(Category::Knowledge)];

const ORGANIZATION_TARGETS: &[CascadeTarget] = &[
    CascadeTarget::AllLists(Category::Organization),
    CascadeTarget::ListsWhere {
        category: Category::Person,
        field: FilterField::Organization,
        subject: Subject::Written,
    },
    CascadeTarget::ListsWhere {
        category: Category::Record,
        field: FilterField::Organization,
        subject: Subject::Written,
    },
];

const PERSON_TARGETS: &[CascadeTarget] = &[
    CascadeTarget::AllLists(Category::Person),
    CascadeTarget::ListsWhere {
        category: Category::Event,
        field: FilterField::Actor,
        subject: Subject::Written,
    },
    CascadeTarget::ListsWhere {
        category: Category::Record,
        field: FilterField::Owner,
        subject: Subject::Written,
    },
    CascadeTarget::ListsWhere {
        category: Category::Knowledge,
        field: FilterField::Owner,
        subject: Subject::Written,
    },
];

/// The cascade table, one rule per category in [`Category::ALL`] order.
pub const CASCADE_RULES: [CascadeRule; 6] = [
    CascadeRule {
        written: Category::Record,
        targets: RECORD_TARGETS,
    },
    CascadeRule {
        written: Category::Relationship,
        targets: RELATIONSHIP_TARGETS,
    },
    CascadeRule {
        written: Category::Event,
        targets: EVENT_TARGETS,
    },
    CascadeRule {
        written: Category::Knowledge,
        targets: KNOWLEDGE_TARGETS,
    },
    CascadeRule {
        written: Category::Organization,
        targets: ORGANIZATION_TARGETS,
    },
    CascadeRule {
        written: Category::Person,
        targets: PERSON_TARGETS,
    },
];

pub fn rule_for(category: Category) -> &'static CascadeRule {
    match category {
        Category::Record => &CASCADE_RULES[0],
        Category::Relationship => &CASCADE_RULES[1],
        Category::Event => &CASCADE_RULES[2],
        Category::Knowledge => &CASCADE_RULES[3],
        Category::Organization => &CASCADE_RULES[4],
        Category::Person => &CASCADE_RULES[5],
    }
}

/// Human-readable table, one line per target.
pub fn describe() -> Vec<String> {
    CASCADE_RULES
        .iter()
        .flat_map(|rule| {
            rule.targets
                .iter()
                .map(move |target| format!("{} -> {target}", rule.written))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_covers_every_category_in_order() {
        for (rule, category) in CASCADE_RULES.iter().zip(Category::ALL) {
            assert_eq!(rule.written, category);
            assert_eq!(rule_for(category).written, category);
        }
    }

    #[test]
    fn every_category_invalidates_its_own_lists() {
        for category in Category::ALL {
            assert!(
                rule_for(category)
                    .targets
                    .contains(&CascadeTarget::AllLists(category)),
                "{category} must invalidate its own lists"
            );
        }
    }

    #[test]
    fn relationship_writes_reach_endpoint_records() {
        assert!(rule_for(Category::Relationship).targets.contains(&CascadeTarget::Items {
            category: Category::Record,
            subject: Subject::Related,
        }));
    }

    #[test]
    fn describe_lists_every_target() {
        let lines = describe();
        let expected: usize = CASCADE_RULES.iter().map(|rule| rule.targets.len()).sum();
        assert_eq!(lines.len(), expected);
        assert!(lines.contains(&"record -> all record lists".to_string()));
        assert!(lines.contains(&"event -> event lists where actor is a related id".to_string()));
    }
}
