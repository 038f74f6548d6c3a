use sharkpp::engine::bound::BoundResult;
use sharkpp::engine::error::EngineError;
use sharkpp::workflows::design::{ScoreWriter, ScoredSequence};
use std::io::Write;

const HEADER: [&str; 11] = [
    "rank",
    "sequence",
    "status",
    "score_lower",
    "score_upper",
    "protein_log10_lower",
    "protein_log10_upper",
    "ligand_log10_lower",
    "ligand_log10_upper",
    "complex_log10_lower",
    "complex_log10_upper",
];

fn rank_label(scored: &ScoredSequence) -> String {
    scored
        .rank
        .map(|r| r.to_string())
        .unwrap_or_else(|| "WT".to_string())
}

fn log10_pair(result: &BoundResult) -> [String; 2] {
    [
        format!("{:.6}", result.lower.log10()),
        format!("{:.6}", result.upper.log10()),
    ]
}

fn output_error(e: impl std::fmt::Display) -> EngineError {
    EngineError::Output(e.to_string())
}

/// Streams each result as one tab-separated row, flushing after every row.
pub struct TsvScoreWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> TsvScoreWriter<W> {
    pub fn new(inner: W) -> Result<Self, EngineError> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_writer(inner);
        writer.write_record(HEADER).map_err(output_error)?;
        writer.flush().map_err(output_error)?;
        Ok(Self { writer })
    }

    pub fn into_inner(self) -> Result<W, EngineError> {
        self.writer.into_inner().map_err(output_error)
    }
}

impl<W: Write> ScoreWriter for TsvScoreWriter<W> {
    fn write(&mut self, scored: &ScoredSequence) -> Result<(), EngineError> {
        let [protein_lower, protein_upper] = log10_pair(&scored.protein);
        let [ligand_lower, ligand_upper] = log10_pair(&scored.ligand);
        let [complex_lower, complex_upper] = log10_pair(&scored.complex);
        self.writer
            .write_record([
                rank_label(scored),
                scored.description.clone(),
                scored.status.to_string(),
                format!("{:.6}", scored.score.lower),
                format!("{:.6}", scored.score.upper),
                protein_lower,
                protein_upper,
                ligand_lower,
                ligand_upper,
                complex_lower,
                complex_upper,
            ])
            .map_err(output_error)?;
        self.writer.flush().map_err(output_error)
    }
}

/// Prints each result to stdout as it is found.
pub struct ConsoleScoreWriter;

impl ScoreWriter for ConsoleScoreWriter {
    fn write(&mut self, scored: &ScoredSequence) -> Result<(), EngineError> {
        match scored.rank {
            Some(rank) => println!(
                "  #{:<3} {}  score [{:.4}, {:.4}]  ({})",
                rank, scored.description, scored.score.lower, scored.score.upper, scored.status
            ),
            None => println!(
                "  WT   {}  score [{:.4}, {:.4}]",
                scored.description, scored.score.lower, scored.score.upper
            ),
        }
        Ok(())
    }
}

/// Forwards every result to each of its writers in order.
pub struct TeeScoreWriter<'a> {
    writers: Vec<&'a mut dyn ScoreWriter>,
}

impl<'a> TeeScoreWriter<'a> {
    pub fn new(writers: Vec<&'a mut dyn ScoreWriter>) -> Self {
        Self { writers }
    }
}

impl ScoreWriter for TeeScoreWriter<'_> {
    fn write(&mut self, scored: &ScoredSequence) -> Result<(), EngineError> {
        for writer in &mut self.writers {
            writer.write(scored)?;
        }
        Ok(())
    }
}
