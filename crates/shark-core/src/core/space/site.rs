use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum SpaceError {
    #[error("Site '{site}' has no choices")]
    EmptySite { site: String },
    #[error("Duplicate site name '{0}'")]
    DuplicateSite(String),
    #[error("Wild-type label '{label}' is not among the choices of site '{site}'")]
    UnknownWildType { site: String, label: String },
    #[error("Site index {index} is out of range for a space of {num_sites} sites")]
    SiteOutOfRange { index: usize, num_sites: usize },
}

/// One discrete option at a site.
///
/// Several choices at the same site may share a label; the label is what a [`Sequence`]
/// fixes, the choice index is what an [`Assignment`] fixes.
///
/// [`Sequence`]: super::Sequence
/// [`Assignment`]: super::Assignment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Choice {
    pub label: String,
}

impl Choice {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

/// A position of the conformation space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Site {
    pub name: String,
    /// The default label of the site. Mutable sites fall back to it when a sequence is filled.
    pub wild_type: String,
    /// Whether a sequence may change the label of this site.
    pub mutable: bool,
    pub choices: Vec<Choice>,
}

impl Site {
    pub fn new(
        name: impl Into<String>,
        wild_type: impl Into<String>,
        mutable: bool,
        choices: Vec<Choice>,
    ) -> Self {
        Self {
            name: name.into(),
            wild_type: wild_type.into(),
            mutable,
            choices,
        }
    }

    #[inline]
    pub fn num_choices(&self) -> usize {
        self.choices.len()
    }

    /// Distinct labels in first-seen order.
    pub fn labels(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.choices
            .iter()
            .map(|c| c.label.as_str())
            .filter(|label| seen.insert(*label))
            .collect()
    }

    pub fn choices_with_label<'a>(&'a self, label: &'a str) -> impl Iterator<Item = usize> + 'a {
        self.choices
            .iter()
            .enumerate()
            .filter(move |(_, c)| c.label == label)
            .map(|(i, _)| i)
    }
}

/// The full discrete conformation space of one state.
///
/// Sites are ordered by index. That index is the identity every other structure
/// (assignments, energy tables, sequences) uses to refer to a site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfSpace {
    sites: Vec<Site>,
}

impl ConfSpace {
    /// Builds a space, validating that every site has at least one choice, that names are
    /// unique, and that every mutable site's wild type is one of its labels.
    pub fn new(sites: Vec<Site>) -> Result<Self, SpaceError> {
        let mut names = HashSet::new();
        for site in &sites {
            if site.choices.is_empty() {
                return Err(SpaceError::EmptySite {
                    site: site.name.clone(),
                });
            }
            if !names.insert(site.name.as_str()) {
                return Err(SpaceError::DuplicateSite(site.name.clone()));
            }
            if site.mutable && site.choices_with_label(&site.wild_type).next().is_none() {
                return Err(SpaceError::UnknownWildType {
                    site: site.name.clone(),
                    label: site.wild_type.clone(),
                });
            }
        }
        Ok(Self { sites })
    }

    #[inline]
    pub fn num_sites(&self) -> usize {
        self.sites.len()
    }

    #[inline]
    pub fn site(&self, index: usize) -> &Site {
        &self.sites[index]
    }

    pub fn sites(&self) -> &[Site] {
        &self.sites
    }

    pub fn find_site(&self, name: &str) -> Option<usize> {
        self.sites.iter().position(|s| s.name == name)
    }

    pub fn mutable_sites(&self) -> Vec<usize> {
        (0..self.sites.len())
            .filter(|&i| self.sites[i].mutable)
            .collect()
    }

    pub fn immutable_sites(&self) -> Vec<usize> {
        (0..self.sites.len())
            .filter(|&i| !self.sites[i].mutable)
            .collect()
    }

    /// A space made of the given sites only, in the given order.
    pub fn restrict(&self, sites: &[usize]) -> Result<Self, SpaceError> {
        let mut kept = Vec::with_capacity(sites.len());
        for &index in sites {
            let site = self.sites.get(index).ok_or(SpaceError::SiteOutOfRange {
                index,
                num_sites: self.sites.len(),
            })?;
            kept.push(site.clone());
        }
        Self::new(kept)
    }
}
