use crate::cli::DesignArgs;
use crate::config::PartialDesignConfig;
use crate::error::Result;
use crate::utils::output::{ConsoleScoreWriter, TeeScoreWriter, TsvScoreWriter};
use crate::utils::progress::CliProgressHandler;
use sharkpp::core::io::DesignProblem;
use sharkpp::engine::progress::ProgressReporter;
use sharkpp::workflows::design::{self, DesignStates, ScoreWriter, SearchOutcome};
use std::fs::File;
use std::sync::Arc;
use tracing::{info, warn};

pub fn run(args: DesignArgs, threads: Option<usize>) -> Result<()> {
    let partial_config = match &args.config {
        Some(path) => PartialDesignConfig::from_file(path)?,
        None => PartialDesignConfig::default(),
    };
    info!("Merging configuration from file and CLI arguments...");
    let final_config = partial_config.merge_with_cli(&args, threads)?;

    info!("Loading design problem from {:?}", &args.input);
    let states = DesignStates::from(DesignProblem::load(&args.input)?);

    let progress_handler = CliProgressHandler::new();
    let reporter = Arc::new(ProgressReporter::with_callback(
        progress_handler.get_callback(),
    ));

    println!(
        "Searching for the top {} sequence(s) (target ε = {})...",
        final_config.num_sequences, final_config.bound.target_epsilon
    );
    info!("Invoking the core design workflow...");

    let mut console = ConsoleScoreWriter;
    let outcome = match &args.output {
        Some(path) => {
            let mut tsv = TsvScoreWriter::new(File::create(path)?)?;
            let outcome = {
                let mut tee =
                    TeeScoreWriter::new(vec![&mut console as &mut dyn ScoreWriter, &mut tsv]);
                design::run(&states, &final_config, reporter, &mut tee)?
            };
            tsv.into_inner()?;
            info!("Scores written to {:?}", path);
            outcome
        }
        None => design::run(&states, &final_config, reporter, &mut console)?,
    };

    summarize(&outcome);
    Ok(())
}

fn summarize(outcome: &SearchOutcome) {
    info!(
        "Workflow finished, reported {} sequence(s).",
        outcome.sequences.len()
    );
    if outcome.exhausted {
        warn!("The sequence space ran out before the requested number of sequences was found.");
        println!(
            "Warning: only {} sequence(s) exist under the given constraints.",
            outcome.sequences.len()
        );
    }
    if let Some(best) = outcome.sequences.first() {
        println!(
            "✓ Best sequence: {} (score [{:.4}, {:.4}], wild type [{:.4}, {:.4}])",
            best.description,
            best.score.lower,
            best.score.upper,
            outcome.wild_type.score.lower,
            outcome.wild_type.score.upper
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::{Path, PathBuf};
    use tempfile::tempdir;

    fn write_problem(dir: &Path) -> PathBuf {
        let toml = r#"
            [[states]]
            name = "protein"
            lower = "protein.csv"

            [[states.sites]]
            name = "A1"
            mutable = true
            wild-type = "ALA"
            choices = ["ALA", "ALA", "GLY"]

            [[states]]
            name = "ligand"
            lower = "ligand.csv"

            [[states.sites]]
            name = "L1"
            choices = ["LIG", "LIG"]

            [[states]]
            name = "complex"
            lower = "complex.csv"
            rigid = "complex_rigid.csv"

            [[states.sites]]
            name = "A1"
            mutable = true
            wild-type = "ALA"
            choices = ["ALA", "ALA", "GLY"]

            [[states.sites]]
            name = "L1"
            choices = ["LIG", "LIG"]
            "#;
        fs::write(
            dir.join("protein.csv"),
            "kind,site1,choice1,site2,choice2,energy\none,A1,0,,,-1.0\none,A1,2,,,0.5\n",
        )
        .unwrap();
        fs::write(
            dir.join("ligand.csv"),
            "kind,site1,choice1,site2,choice2,energy\none,L1,0,,,-2.0\n",
        )
        .unwrap();
        fs::write(
            dir.join("complex.csv"),
            "kind,site1,choice1,site2,choice2,energy\none,A1,0,,,-1.0\none,L1,0,,,-2.0\npair,A1,2,L1,1,-3.0\n",
        )
        .unwrap();
        fs::write(
            dir.join("complex_rigid.csv"),
            "kind,site1,choice1,site2,choice2,energy\none,A1,0,,,-1.0\none,L1,0,,,-2.0\npair,A1,2,L1,1,-2.5\n",
        )
        .unwrap();
        let path = dir.join("problem.toml");
        fs::write(&path, toml).unwrap();
        path
    }

    fn args(input: PathBuf, output: Option<PathBuf>) -> DesignArgs {
        DesignArgs {
            input,
            config: None,
            output,
            epsilon: Some(0.05),
            num_sequences: Some(3),
            confs_per_batch: None,
            max_mutations: None,
            stability_threshold: None,
            precompute_flexible: false,
            set_values: vec![],
        }
    }

    #[test]
    fn design_command_writes_the_wild_type_and_every_sequence() {
        let dir = tempdir().unwrap();
        let problem = write_problem(dir.path());
        let output = dir.path().join("scores.tsv");

        run(args(problem, Some(output.clone())), Some(2)).expect("design run");

        let text = fs::read_to_string(output).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        // Header, wild type, and the two sequences of the space.
        assert_eq!(lines.len(), 4);
        assert!(lines[1].starts_with("WT\tA1=ALA"));
        assert!(lines[2].starts_with("1\tA1=GLY"));
        assert!(lines[3].starts_with("2\tA1=ALA"));
    }

    #[test]
    fn missing_problem_file_is_reported() {
        let dir = tempdir().unwrap();
        let result = run(args(dir.path().join("absent.toml"), None), Some(1));
        assert!(matches!(result, Err(crate::error::CliError::Problem(_))));
    }
}
