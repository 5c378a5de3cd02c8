//! The catalog of every mutation a metadata domain can journal, and which domain owns it.

mod registry;
mod variants;

pub use registry::DomainRegistry;
pub use variants::{all_variants, domain_for, variant_of, Domain, VariantTag};

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Unrecognized journal entry: no mutation variant is set")]
    UnrecognizedEntry,

    #[error("Domain {0} was registered more than once")]
    DuplicateDomain(Domain),

    #[error("{variant:?} belongs to {expected} but {actual} claims it")]
    OwnershipMismatch {
        variant: VariantTag,
        expected: Domain,
        actual: Domain,
    },

    #[error("{variant:?} is claimed by both {first} and {second}")]
    OverlappingOwnership {
        variant: VariantTag,
        first: Domain,
        second: Domain,
    },

    #[error("No registered domain owns {0:?}")]
    IncompletePartition(Vec<VariantTag>),

    #[error("The {journal} journal can't record an entry owned by {entry_domain}")]
    ForeignEntry { journal: Domain, entry_domain: Domain },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{journal_entry, JournalEntry, RenameEntry};
    use std::collections::BTreeSet;

    const JOURNAL_PROTO: &str = include_str!("../../protos/journal.proto");

    // Batch framing rather than a mutation.
    const FRAMING_FIELDS: &[&str] = &["sequence_number", "operation_id", "journal_entries"];

    /// Every field name of `message JournalEntry`, read straight from the schema source.
    fn journal_entry_field_names() -> Vec<String> {
        let start = JOURNAL_PROTO
            .find("message JournalEntry {")
            .expect("journal.proto declares JournalEntry");
        let body = &JOURNAL_PROTO[start..];
        let mut depth = 0;
        let mut end = body.len();
        for (position, c) in body.char_indices() {
            match c {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        end = position;
                        break;
                    }
                }
                _ => {}
            }
        }
        body[..end]
            .lines()
            .map(|line| line.trim())
            .filter(|line| !line.starts_with("//") && line.contains('=') && line.ends_with(';'))
            .map(|line| {
                // "[repeated] <Type> <field_name> = <n>;"
                let declaration = line.split('=').next().unwrap();
                declaration.split_whitespace().last().unwrap().to_string()
            })
            .collect()
    }

    fn camel_case(snake: &str) -> String {
        snake
            .split('_')
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                    None => String::new(),
                }
            })
            .collect()
    }

    #[test]
    fn catalog_matches_schema_fields() {
        let fields = journal_entry_field_names();
        for framing in FRAMING_FIELDS {
            assert!(fields.iter().any(|f| f.as_str() == *framing), "JournalEntry lost {}", framing);
        }
        let schema: BTreeSet<String> = fields
            .iter()
            .filter(|f| !FRAMING_FIELDS.contains(&f.as_str()))
            .map(|f| camel_case(f))
            .collect();
        assert_eq!(fields.len() - FRAMING_FIELDS.len(), schema.len());
        let catalog: BTreeSet<String> =
            all_variants().iter().map(|v| format!("{:?}", v)).collect();

        assert_eq!(schema.len(), 37);
        assert_eq!(schema, catalog);
    }

    #[test]
    fn every_variant_has_exactly_one_domain() {
        let mut per_domain = 0;
        for domain in Domain::ALL {
            per_domain += all_variants()
                .iter()
                .filter(|v| v.domain() == *domain)
                .count();
        }
        assert_eq!(per_domain, all_variants().len());
    }

    #[test]
    fn default_entry_routes_back_to_its_variant() {
        for variant in all_variants() {
            let entry = variant.default_entry();
            assert_eq!(variant_of(&entry).unwrap(), *variant);
            assert_eq!(domain_for(&entry).unwrap(), variant.domain());
        }
    }

    #[test]
    fn domain_for_known_entries() {
        let rename = JournalEntry {
            entry: Some(journal_entry::Entry::Rename(RenameEntry {
                id: 7,
                path: "/a".into(),
                new_path: "/b".into(),
                op_time_ms: 1,
            })),
            ..JournalEntry::default()
        };
        assert_eq!(domain_for(&rename).unwrap(), Domain::FileSystem);
        assert_eq!(
            domain_for(&VariantTag::LoadJob.default_entry()).unwrap(),
            Domain::Job
        );
        assert_eq!(
            domain_for(&VariantTag::AttachDb.default_entry()).unwrap(),
            Domain::Table
        );
    }

    #[test]
    fn entry_without_variant_is_unrecognized() {
        assert!(matches!(
            domain_for(&JournalEntry::default()),
            Err(CatalogError::UnrecognizedEntry)
        ));
    }

    #[test]
    fn domain_names_round_trip() {
        for domain in Domain::ALL {
            assert_eq!(Domain::from_name(domain.name()), Some(*domain));
        }
        assert_eq!(Domain::from_name("NotAMaster"), None);
    }
}
