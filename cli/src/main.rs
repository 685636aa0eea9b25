//! Outer driver around the search engine: loads a distance matrix from a
//! text file, climbs until improvements dry up, and emits the tree.

use std::fs;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use log::info;
use structopt::StructOpt;

use qsearch::matrix::DistanceMatrix;
use qsearch::{Config, Search};

type AnyError = Box<dyn std::error::Error>;

#[derive(Debug, StructOpt)]
#[structopt(name = "qsearch", about = "Quartet-tree search over a distance matrix")]
struct Opts {
    /// Whitespace-separated matrix file, one row per line.  A leading
    /// non-numeric token on every row is read as that object's label.
    matrix: PathBuf,

    /// TOML file with search parameters; explicit flags win.
    #[structopt(long)]
    config: Option<PathBuf>,

    /// Candidates explored per search round.
    #[structopt(long)]
    tries: Option<usize>,

    /// Base RNG seed for reproducible runs.
    #[structopt(long)]
    seed: Option<u64>,

    /// Metropolis inverse temperature (0 = random walk).
    #[structopt(long)]
    beta: Option<f64>,

    /// Worker threads; defaults to the physical core count.
    #[structopt(long)]
    threads: Option<usize>,

    /// Consecutive improvement-free rounds before stopping.
    #[structopt(long)]
    patience: Option<usize>,

    /// Output format: "dot" or "json".
    #[structopt(long, default_value = "dot")]
    format: String,

    /// Write the tree here instead of stdout.
    #[structopt(short, long)]
    output: Option<PathBuf>,
}

#[derive(Debug, Default, serde::Deserialize)]
struct FileConfig {
    tries: Option<usize>,
    seed: Option<u64>,
    beta: Option<f64>,
    threads: Option<usize>,
    patience: Option<usize>,
}

fn main() {
    env_logger::init();
    let opts = Opts::from_args();
    if let Err(err) = run(opts) {
        eprintln!("error: {}", err);
        process::exit(1);
    }
}

fn run(opts: Opts) -> Result<(), AnyError> {
    let file_config: FileConfig = match &opts.config {
        Some(path) => toml::from_str(&fs::read_to_string(path)?)?,
        None => FileConfig::default(),
    };

    let text = fs::read_to_string(&opts.matrix)?;
    let dm = Arc::new(parse_matrix(&text)?);
    info!("loaded a {0}x{0} distance matrix", dm.dim());

    let config = Config {
        num_threads: opts.threads.or(file_config.threads),
        tries: opts.tries.or(file_config.tries).unwrap_or(32),
        beta: opts.beta.or(file_config.beta).unwrap_or(1.0),
        seed: opts.seed.or(file_config.seed).unwrap_or(0),
    };
    let patience = opts.patience.or(file_config.patience).unwrap_or(5);

    let mut search = Search::new(dm, config);
    let mut tree = search.initial_tree()?;
    let mut rounds = 0u64;
    let mut stale = 0;
    while stale < patience {
        rounds += 1;
        match search.find_better_tree(&mut tree)? {
            Some(better) => {
                tree = better;
                stale = 0;
            }
            None => stale += 1,
        }
    }
    let score = search.scorer().score_tree(&mut tree)?;
    info!(
        "search settled at score {:.6} after {} rounds ({} clonings)",
        score.into_inner(),
        rounds,
        search.stats().total_clonings
    );

    let rendered = match opts.format.as_str() {
        "dot" => tree.to_dot(),
        "json" => tree.to_json()?,
        other => return Err(format!("unknown output format {:?}", other).into()),
    };
    match &opts.output {
        Some(path) => fs::write(path, rendered)?,
        None => print!("{}", rendered),
    }
    Ok(())
}

/// Parses a whitespace-separated matrix, with an optional label leading
/// every row.  Validation proper happens in [`DistanceMatrix`].
fn parse_matrix(text: &str) -> Result<DistanceMatrix, AnyError> {
    let mut labels = Vec::new();
    let mut rows = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut tokens = line.split_whitespace().peekable();
        if let Some(first) = tokens.peek() {
            if first.parse::<f64>().is_err() {
                labels.push(tokens.next().unwrap_or_default().to_owned());
            }
        }
        let row = tokens
            .map(|t| {
                t.parse::<f64>()
                    .map_err(|_| format!("line {}: bad number {:?}", lineno + 1, t))
            })
            .collect::<Result<Vec<f64>, String>>()?;
        rows.push(row);
    }
    if labels.is_empty() {
        Ok(DistanceMatrix::from_rows(rows)?)
    } else if labels.len() == rows.len() {
        Ok(DistanceMatrix::with_labels(rows, labels)?)
    } else {
        Err(format!(
            "{} of {} rows carry a label; label all rows or none",
            labels.len(),
            rows.len()
        )
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_plain_matrix() {
        let text = "0 1 2 3\n1 0 4 5\n2 4 0 6\n3 5 6 0\n";
        let dm = parse_matrix(text).unwrap();
        assert_eq!(dm.dim(), 4);
        assert_eq!(dm.get(1, 3), 5.0);
        assert!(!dm.has_labels());
    }

    #[test]
    fn parses_labels_and_skips_comments() {
        let text = "# four objects\n\
                    ape 0 1 2 3\n\
                    bat 1 0 4 5\n\
                    cat 2 4 0 6\n\
                    doe 3 5 6 0\n";
        let dm = parse_matrix(text).unwrap();
        assert_eq!(dm.dim(), 4);
        assert_eq!(dm.label(0), Some("ape"));
        assert_eq!(dm.label(3), Some("doe"));
    }

    #[test]
    fn rejects_mixed_labelling_and_bad_numbers() {
        let mixed = "ape 0 1 2 3\n1 0 4 5\n2 4 0 6\n3 5 6 0\n";
        assert!(parse_matrix(mixed).is_err());
        let garbled = "0 1 2 x\n1 0 4 5\n2 4 0 6\nx 5 6 0\n";
        assert!(parse_matrix(garbled).is_err());
    }

    #[test]
    fn surfaces_matrix_validation_errors() {
        let asymmetric = "0 1 2 3\n9 0 4 5\n2 4 0 6\n3 5 6 0\n";
        assert!(parse_matrix(asymmetric).is_err());
        let tiny = "0 1\n1 0\n";
        assert!(parse_matrix(tiny).is_err());
    }
}
