use std::collections::{BTreeMap, HashMap};

use crate::core::Category;
use crate::fix::Fix;
use crate::probe::Probe;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("duplicate probe id: {0}")]
    DuplicateProbe(String),
    #[error("duplicate fix id: {0}")]
    DuplicateFix(String),
    #[error("probe {probe} has invalid weight 0")]
    InvalidWeight { probe: String },
    #[error("fix {0} has no target probes")]
    FixWithoutTargets(String),
    #[error("fix {0} has no steps")]
    EmptyFix(String),
    #[error("fix {fix} targets unknown probe {probe}")]
    UnknownTarget { fix: String, probe: String },
    #[error("probe {probe} references unknown fix {fix}")]
    UnknownFixReference { probe: String, fix: String },
    #[error("fix {fix} uses a command outside the allowlist: {command}")]
    DisallowedCommand { fix: String, command: String },
}

#[derive(Debug, Default)]
pub struct RegistryBuilder {
    probes: Vec<Probe>,
    fixes: Vec<Fix>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn probe(mut self, probe: Probe) -> Self {
        self.probes.push(probe);
        self
    }

    pub fn probes(mut self, probes: impl IntoIterator<Item = Probe>) -> Self {
        self.probes.extend(probes);
        self
    }

    pub fn fix(mut self, fix: Fix) -> Self {
        self.fixes.push(fix);
        self
    }

    pub fn fixes(mut self, fixes: impl IntoIterator<Item = Fix>) -> Self {
        self.fixes.extend(fixes);
        self
    }

    /// Validates every cross reference. Any violation is fatal for the caller.
    pub fn build(self) -> Result<Registry, RegistryError> {
        let mut probe_index = HashMap::new();
        for (idx, probe) in self.probes.iter().enumerate() {
            if probe.meta().weight == 0 {
                return Err(RegistryError::InvalidWeight {
                    probe: probe.id().to_string(),
                });
            }
            if probe_index.insert(probe.id().to_string(), idx).is_some() {
                return Err(RegistryError::DuplicateProbe(probe.id().to_string()));
            }
        }

        let mut fix_index = HashMap::new();
        let mut fix_category = HashMap::new();
        for (idx, fix) in self.fixes.iter().enumerate() {
            if fix_index.insert(fix.id().to_string(), idx).is_some() {
                return Err(RegistryError::DuplicateFix(fix.id().to_string()));
            }
            if fix.targets().is_empty() {
                return Err(RegistryError::FixWithoutTargets(fix.id().to_string()));
            }
            if fix.steps().is_empty() {
                return Err(RegistryError::EmptyFix(fix.id().to_string()));
            }
            for target in fix.targets() {
                if !probe_index.contains_key(target) {
                    return Err(RegistryError::UnknownTarget {
                        fix: fix.id().to_string(),
                        probe: target.clone(),
                    });
                }
            }
            for step in fix.steps() {
                for cmd in std::iter::once(&step.command).chain(step.undo.iter()) {
                    if !cmd.is_allowed() {
                        return Err(RegistryError::DisallowedCommand {
                            fix: fix.id().to_string(),
                            command: cmd.to_string(),
                        });
                    }
                }
            }
            let first = &fix.targets()[0];
            let category = self.probes[probe_index[first]].category();
            fix_category.insert(fix.id().to_string(), category);
        }

        for probe in &self.probes {
            for fix in probe.fixes() {
                if !fix_index.contains_key(fix) {
                    return Err(RegistryError::UnknownFixReference {
                        probe: probe.id().to_string(),
                        fix: fix.clone(),
                    });
                }
            }
        }

        let mut by_category: BTreeMap<Category, Vec<usize>> = BTreeMap::new();
        for (idx, probe) in self.probes.iter().enumerate() {
            by_category.entry(probe.category()).or_default().push(idx);
        }

        tracing::debug!(
            probes = self.probes.len(),
            fixes = self.fixes.len(),
            "registry built"
        );

        Ok(Registry {
            probes: self.probes,
            fixes: self.fixes,
            probe_index,
            fix_index,
            fix_category,
            by_category,
        })
    }
}

/// Read-only catalog of probes and fixes. Shared freely once built.
#[derive(Debug)]
pub struct Registry {
    probes: Vec<Probe>,
    fixes: Vec<Fix>,
    probe_index: HashMap<String, usize>,
    fix_index: HashMap<String, usize>,
    fix_category: HashMap<String, Category>,
    by_category: BTreeMap<Category, Vec<usize>>,
}

impl Registry {
    pub fn probe(&self, id: &str) -> Option<&Probe> {
        self.probe_index.get(id).map(|&idx| &self.probes[idx])
    }

    pub fn fix(&self, id: &str) -> Option<&Fix> {
        self.fix_index.get(id).map(|&idx| &self.fixes[idx])
    }

    /// Declaration position of a fix; the tie-breaker when ordering plans.
    pub fn fix_position(&self, id: &str) -> Option<usize> {
        self.fix_index.get(id).copied()
    }

    /// The category of a fix's first target probe.
    pub fn fix_category(&self, id: &str) -> Option<Category> {
        self.fix_category.get(id).copied()
    }

    /// Probes of one category in declaration order.
    pub fn probes_in(&self, category: Category) -> impl Iterator<Item = &Probe> {
        self.by_category
            .get(&category)
            .into_iter()
            .flatten()
            .map(|&idx| &self.probes[idx])
    }

    pub fn probes(&self) -> &[Probe] {
        &self.probes
    }

    pub fn fixes(&self) -> &[Fix] {
        &self.fixes
    }

    pub fn categories(&self) -> impl Iterator<Item = Category> + '_ {
        self.by_category.keys().copied()
    }
}

/// The built-in catalog.
pub fn catalog() -> Result<Registry, RegistryError> {
    RegistryBuilder::new()
        .probes(crate::checks::health::probes())
        .probes(crate::checks::drivers::probes())
        .probes(crate::checks::security::probes())
        .probes(crate::checks::desktop::probes())
        .probes(crate::checks::setup::probes())
        .fixes(crate::checks::health::fixes())
        .fixes(crate::checks::drivers::fixes())
        .fixes(crate::checks::security::fixes())
        .fixes(crate::checks::desktop::fixes())
        .fixes(crate::checks::setup::fixes())
        .build()
}
