use crate::catalog::{CatalogError, Domain, VariantTag};
use crate::journal::Journaled;
use std::collections::BTreeMap;
use std::sync::Arc;

/// DomainRegistry holds the set of domains participating in one journal. Before a journal is
/// opened the registered domains must split the catalog exactly: every variant owned by one and
/// only one domain.
#[derive(Default, Clone)]
pub struct DomainRegistry {
    domains: BTreeMap<Domain, Arc<dyn Journaled>>,
}

impl DomainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, journaled: Arc<dyn Journaled>) -> Result<(), CatalogError> {
        let domain = journaled.domain();
        if self.domains.contains_key(&domain) {
            return Err(CatalogError::DuplicateDomain(domain));
        }
        self.domains.insert(domain, journaled);
        Ok(())
    }

    pub fn verify_partition(&self) -> Result<(), CatalogError> {
        let mut owners: BTreeMap<VariantTag, Domain> = BTreeMap::new();
        for (domain, journaled) in self.domains.iter() {
            for variant in journaled.owned_variants() {
                if variant.domain() != *domain {
                    return Err(CatalogError::OwnershipMismatch {
                        variant,
                        expected: variant.domain(),
                        actual: *domain,
                    });
                }
                if let Some(first) = owners.insert(variant, *domain) {
                    return Err(CatalogError::OverlappingOwnership {
                        variant,
                        first,
                        second: *domain,
                    });
                }
            }
        }

        let unowned: Vec<VariantTag> = VariantTag::ALL
            .iter()
            .copied()
            .filter(|variant| !owners.contains_key(variant))
            .collect();
        if !unowned.is_empty() {
            return Err(CatalogError::IncompletePartition(unowned));
        }

        Ok(())
    }

    pub fn get(&self, domain: Domain) -> Option<&Arc<dyn Journaled>> {
        self.domains.get(&domain)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Domain, &Arc<dyn Journaled>)> {
        self.domains.iter()
    }

    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::ApplyError;
    use crate::schema::JournalEntry;

    struct NoopDomain {
        domain: Domain,
        owned: Option<Vec<VariantTag>>,
    }

    impl NoopDomain {
        fn new(domain: Domain) -> Arc<dyn Journaled> {
            Arc::new(NoopDomain {
                domain,
                owned: None,
            })
        }

        fn owning(domain: Domain, owned: Vec<VariantTag>) -> Arc<dyn Journaled> {
            Arc::new(NoopDomain {
                domain,
                owned: Some(owned),
            })
        }
    }

    impl Journaled for NoopDomain {
        fn domain(&self) -> Domain {
            self.domain
        }

        fn owned_variants(&self) -> Vec<VariantTag> {
            match &self.owned {
                Some(owned) => owned.clone(),
                None => VariantTag::ALL
                    .iter()
                    .copied()
                    .filter(|v| v.domain() == self.domain)
                    .collect(),
            }
        }

        fn process_journal_entry(&self, _entry: &JournalEntry) -> Result<(), ApplyError> {
            Ok(())
        }

        fn checkpoint_entries(&self) -> Vec<JournalEntry> {
            vec![]
        }

        fn reset_state(&self) {}
    }

    fn registry_with(domains: Vec<Arc<dyn Journaled>>) -> DomainRegistry {
        let mut registry = DomainRegistry::new();
        for domain in domains {
            registry.register(domain).unwrap();
        }
        registry
    }

    #[test]
    fn all_domains_partition_the_catalog() {
        let registry = registry_with(Domain::ALL.iter().map(|d| NoopDomain::new(*d)).collect());
        registry.verify_partition().unwrap();
        assert_eq!(registry.len(), 5);
    }

    #[test]
    fn missing_domain_leaves_variants_unowned() {
        let registry = registry_with(vec![
            NoopDomain::new(Domain::Block),
            NoopDomain::new(Domain::FileSystem),
            NoopDomain::new(Domain::Meta),
            NoopDomain::new(Domain::Table),
        ]);
        match registry.verify_partition() {
            Err(CatalogError::IncompletePartition(unowned)) => {
                assert_eq!(unowned, vec![VariantTag::LoadJob]);
            }
            other => panic!("Unexpected result {:?}", other),
        }
    }

    #[test]
    fn duplicate_domain_is_rejected() {
        let mut registry = DomainRegistry::new();
        registry.register(NoopDomain::new(Domain::Job)).unwrap();
        assert!(matches!(
            registry.register(NoopDomain::new(Domain::Job)),
            Err(CatalogError::DuplicateDomain(Domain::Job))
        ));
    }

    #[test]
    fn claiming_a_foreign_variant_is_rejected() {
        let registry = registry_with(vec![
            NoopDomain::new(Domain::Block),
            NoopDomain::new(Domain::FileSystem),
            NoopDomain::new(Domain::Meta),
            NoopDomain::new(Domain::Table),
            NoopDomain::owning(Domain::Job, vec![VariantTag::LoadJob, VariantTag::Rename]),
        ]);
        assert!(matches!(
            registry.verify_partition(),
            Err(CatalogError::OwnershipMismatch {
                variant: VariantTag::Rename,
                expected: Domain::FileSystem,
                actual: Domain::Job,
            })
        ));
    }

    #[test]
    fn variant_claimed_twice_is_rejected() {
        let registry = registry_with(vec![
            NoopDomain::owning(
                Domain::Block,
                vec![
                    VariantTag::BlockContainerIdGenerator,
                    VariantTag::BlockInfo,
                    VariantTag::DeleteBlock,
                    VariantTag::BlockInfo,
                ],
            ),
            NoopDomain::new(Domain::FileSystem),
            NoopDomain::new(Domain::Meta),
            NoopDomain::new(Domain::Table),
            NoopDomain::new(Domain::Job),
        ]);
        assert!(matches!(
            registry.verify_partition(),
            Err(CatalogError::OverlappingOwnership {
                variant: VariantTag::BlockInfo,
                ..
            })
        ));
    }
}
