use crate::core::energy::{EnergyMatrix, OracleError, PruningMatrix, TableOracle};
use crate::core::space::{Choice, ChoiceTuple, ConfSpace, Site, SpaceError};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ProblemLoadError {
    #[error("File I/O error for '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("CSV parsing error for '{path}': {source}")]
    Csv { path: String, source: csv::Error },
    #[error("TOML parsing error for '{path}': {source}")]
    Toml {
        path: String,
        source: toml::de::Error,
    },
    #[error("Invalid record in '{path}': {reason}")]
    InvalidRecord { path: String, reason: String },
    #[error("Problem definition is missing the '{0}' state")]
    MissingState(&'static str),
    #[error("Invalid conformation space: {0}")]
    Space(#[from] SpaceError),
    #[error("Invalid energy tables: {0}")]
    Tables(#[from] OracleError),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProblemFile {
    states: Vec<StateEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct StateEntry {
    name: String,
    lower: PathBuf,
    rigid: Option<PathBuf>,
    higher_order: Option<PathBuf>,
    pruned: Option<PathBuf>,
    sites: Vec<SiteEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct SiteEntry {
    name: String,
    #[serde(default)]
    mutable: bool,
    wild_type: Option<String>,
    choices: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EnergyRecord {
    kind: String,
    site1: String,
    choice1: usize,
    site2: Option<String>,
    choice2: Option<usize>,
    energy: f64,
}

#[derive(Debug, Deserialize)]
struct HigherOrderRecord {
    site1: String,
    choice1: usize,
    site2: String,
    choice2: usize,
    site3: String,
    choice3: usize,
    energy: f64,
}

#[derive(Debug, Deserialize)]
struct PrunedRecord {
    site1: String,
    choice1: usize,
    site2: String,
    choice2: usize,
}

/// The three states of a binding design problem, each with its own table-backed oracle.
#[derive(Debug, Clone)]
pub struct DesignProblem {
    pub protein: TableOracle,
    pub ligand: TableOracle,
    pub complex: TableOracle,
}

impl DesignProblem {
    /// Loads a problem description. Table paths are resolved relative to the problem file.
    pub fn load(path: &Path) -> Result<Self, ProblemLoadError> {
        let content = std::fs::read_to_string(path).map_err(|e| ProblemLoadError::Io {
            path: path.to_string_lossy().to_string(),
            source: e,
        })?;
        let file: ProblemFile = toml::from_str(&content).map_err(|e| ProblemLoadError::Toml {
            path: path.to_string_lossy().to_string(),
            source: e,
        })?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));

        let mut protein = None;
        let mut ligand = None;
        let mut complex = None;
        for state in file.states {
            debug!("Loading state '{}' with {} sites.", state.name, state.sites.len());
            let slot = match state.name.as_str() {
                "protein" => &mut protein,
                "ligand" => &mut ligand,
                "complex" => &mut complex,
                other => {
                    return Err(ProblemLoadError::InvalidRecord {
                        path: path.to_string_lossy().to_string(),
                        reason: format!("unknown state '{}'", other),
                    });
                }
            };
            *slot = Some(load_state(&state, base)?);
        }

        Ok(Self {
            protein: protein.ok_or(ProblemLoadError::MissingState("protein"))?,
            ligand: ligand.ok_or(ProblemLoadError::MissingState("ligand"))?,
            complex: complex.ok_or(ProblemLoadError::MissingState("complex"))?,
        })
    }
}

fn load_state(state: &StateEntry, base: &Path) -> Result<TableOracle, ProblemLoadError> {
    let sites = state
        .sites
        .iter()
        .map(|s| {
            let wild_type = s
                .wild_type
                .clone()
                .or_else(|| s.choices.first().cloned())
                .unwrap_or_default();
            Site::new(
                s.name.clone(),
                wild_type,
                s.mutable,
                s.choices.iter().map(Choice::new).collect(),
            )
        })
        .collect();
    let space = ConfSpace::new(sites)?;

    let lower = load_energy_table(&base.join(&state.lower), &space)?;
    let rigid = match &state.rigid {
        Some(rigid) => load_energy_table(&base.join(rigid), &space)?,
        None => lower.clone(),
    };
    let pruning = match &state.pruned {
        Some(pruned) => load_pruned(&base.join(pruned), &space)?,
        None => PruningMatrix::new(),
    };
    let mut oracle = TableOracle::new(space.clone(), lower, rigid, pruning)?;
    if let Some(higher_order) = &state.higher_order {
        let path = base.join(higher_order);
        for record in read_records::<HigherOrderRecord>(&path)? {
            let tuple = ChoiceTuple::new(vec![
                resolve(&path, &space, &record.site1, record.choice1)?,
                resolve(&path, &space, &record.site2, record.choice2)?,
                resolve(&path, &space, &record.site3, record.choice3)?,
            ]);
            oracle.add_higher_order(tuple, record.energy)?;
        }
    }
    Ok(oracle)
}

fn read_records<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>, ProblemLoadError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| ProblemLoadError::Csv {
            path: path.to_string_lossy().to_string(),
            source: e,
        })?;
    reader
        .deserialize::<T>()
        .map(|r| {
            r.map_err(|e| ProblemLoadError::Csv {
                path: path.to_string_lossy().to_string(),
                source: e,
            })
        })
        .collect()
}

fn resolve(
    path: &Path,
    space: &ConfSpace,
    site: &str,
    choice: usize,
) -> Result<(usize, usize), ProblemLoadError> {
    let invalid = |reason: String| ProblemLoadError::InvalidRecord {
        path: path.to_string_lossy().to_string(),
        reason,
    };
    let index = space
        .find_site(site)
        .ok_or_else(|| invalid(format!("unknown site '{}'", site)))?;
    if choice >= space.site(index).num_choices() {
        return Err(invalid(format!(
            "choice {} is out of range for site '{}'",
            choice, site
        )));
    }
    Ok((index, choice))
}

fn load_energy_table(path: &Path, space: &ConfSpace) -> Result<EnergyMatrix, ProblemLoadError> {
    let mut matrix = EnergyMatrix::new(space);
    for record in read_records::<EnergyRecord>(path)? {
        let (s1, c1) = resolve(path, space, &record.site1, record.choice1)?;
        match record.kind.as_str() {
            "one" => matrix.set_one_body(s1, c1, record.energy),
            "pair" => {
                let (Some(site2), Some(choice2)) = (&record.site2, record.choice2) else {
                    return Err(ProblemLoadError::InvalidRecord {
                        path: path.to_string_lossy().to_string(),
                        reason: "pair record needs site2 and choice2".to_string(),
                    });
                };
                let (s2, c2) = resolve(path, space, site2, choice2)?;
                matrix.set_pair(s1, c1, s2, c2, record.energy);
            }
            other => {
                return Err(ProblemLoadError::InvalidRecord {
                    path: path.to_string_lossy().to_string(),
                    reason: format!("unknown record kind '{}'", other),
                });
            }
        }
    }
    Ok(matrix)
}

fn load_pruned(path: &Path, space: &ConfSpace) -> Result<PruningMatrix, ProblemLoadError> {
    let mut pruning = PruningMatrix::new();
    for record in read_records::<PrunedRecord>(path)? {
        let (s1, c1) = resolve(path, space, &record.site1, record.choice1)?;
        let (s2, c2) = resolve(path, space, &record.site2, record.choice2)?;
        pruning.prune_pair(s1, c1, s2, c2);
    }
    Ok(pruning)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::energy::CostOracle;
    use std::fs;
    use tempfile::tempdir;

    fn write_problem(dir: &Path, with_complex: bool) -> PathBuf {
        let mut toml = String::from(
            r#"
            [[states]]
            name = "protein"
            lower = "protein.csv"

            [[states.sites]]
            name = "A1"
            mutable = true
            wild-type = "ALA"
            choices = ["ALA", "GLY"]

            [[states]]
            name = "ligand"
            lower = "ligand.csv"
            pruned = "pruned.csv"

            [[states.sites]]
            name = "L1"
            choices = ["LIG", "LIG"]
            "#,
        );
        if with_complex {
            toml.push_str(
                r#"
            [[states]]
            name = "complex"
            lower = "complex.csv"
            rigid = "complex_rigid.csv"

            [[states.sites]]
            name = "A1"
            mutable = true
            wild-type = "ALA"
            choices = ["ALA", "GLY"]

            [[states.sites]]
            name = "L1"
            choices = ["LIG", "LIG"]
            "#,
            );
        }
        fs::write(
            dir.join("protein.csv"),
            "kind,site1,choice1,site2,choice2,energy\none,A1,0,,,-1.0\none,A1,1,,,0.5\n",
        )
        .unwrap();
        fs::write(
            dir.join("ligand.csv"),
            "kind,site1,choice1,site2,choice2,energy\none,L1,0,,,-2.0\n",
        )
        .unwrap();
        fs::write(dir.join("pruned.csv"), "site1,choice1,site2,choice2\n").unwrap();
        fs::write(
            dir.join("complex.csv"),
            "kind,site1,choice1,site2,choice2,energy\none,A1,0,,,-1.0\npair,A1,0,L1,1,-3.0\n",
        )
        .unwrap();
        fs::write(
            dir.join("complex_rigid.csv"),
            "kind,site1,choice1,site2,choice2,energy\none,A1,0,,,-1.0\npair,A1,0,L1,1,-2.0\n",
        )
        .unwrap();
        let path = dir.join("problem.toml");
        fs::write(&path, toml).unwrap();
        path
    }

    #[test]
    fn load_reads_all_three_states() {
        let dir = tempdir().unwrap();
        let path = write_problem(dir.path(), true);
        let problem = DesignProblem::load(&path).unwrap();

        assert_eq!(problem.protein.space().num_sites(), 1);
        assert_eq!(problem.protein.lower_matrix().one_body(0, 0), -1.0);
        assert_eq!(problem.ligand.space().site(0).wild_type, "LIG");
        assert_eq!(problem.complex.lower_matrix().pair(0, 0, 1, 1), -3.0);
        assert_eq!(problem.complex.rigid_matrix().pair(0, 0, 1, 1), -2.0);
    }

    #[test]
    fn load_reports_missing_state() {
        let dir = tempdir().unwrap();
        let path = write_problem(dir.path(), false);
        assert!(matches!(
            DesignProblem::load(&path),
            Err(ProblemLoadError::MissingState("complex"))
        ));
    }

    #[test]
    fn load_rejects_unknown_site_in_table() {
        let dir = tempdir().unwrap();
        let path = write_problem(dir.path(), true);
        fs::write(
            dir.path().join("ligand.csv"),
            "kind,site1,choice1,site2,choice2,energy\none,Z9,0,,,-2.0\n",
        )
        .unwrap();
        assert!(matches!(
            DesignProblem::load(&path),
            Err(ProblemLoadError::InvalidRecord { .. })
        ));
    }

    #[test]
    fn load_rejects_rigid_table_below_lower_table() {
        let dir = tempdir().unwrap();
        let path = write_problem(dir.path(), true);
        fs::write(
            dir.path().join("complex_rigid.csv"),
            "kind,site1,choice1,site2,choice2,energy\none,A1,0,,,-5.0\n",
        )
        .unwrap();
        assert!(matches!(
            DesignProblem::load(&path),
            Err(ProblemLoadError::Tables(_))
        ));
    }

    #[test]
    fn load_reports_missing_file_as_io_error() {
        let result = DesignProblem::load(Path::new("/definitely/not/here.toml"));
        assert!(matches!(result, Err(ProblemLoadError::Io { .. })));
    }
}
