use std::path::Path;

use propensity::{
    init_logging, log_app_finish, log_app_start, log_source_selected, logging_config_from_env,
    Evaluator, Probabilities, RunConfig,
};

const DEMO_LABELS: [u8; 10] = [0, 1, 0, 1, 1, 0, 1, 0, 1, 1];
const DEMO_PROBABILITIES: [f64; 10] = [0.1, 0.8, 0.3, 0.7, 0.5, 0.2, 0.6, 0.4, 0.9, 0.05];

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging = logging_config_from_env();
    init_logging(&logging)?;
    log_app_start("evaluate_predictions", &logging);

    let cfg = RunConfig::from_env()?;
    let (title, labels, probabilities) = match &cfg.predictions_path {
        Some(path) => {
            log_source_selected("evaluate_predictions", "csv", &path.display().to_string());
            let (labels, probabilities) = read_predictions(path)?;
            (path.display().to_string(), labels, probabilities)
        }
        None => {
            log_source_selected("evaluate_predictions", "demo", "built-in");
            (
                "Demo".to_string(),
                DEMO_LABELS.to_vec(),
                Probabilities::Positive(DEMO_PROBABILITIES.to_vec()),
            )
        }
    };

    let samples = labels.len();
    let evaluator = Evaluator::new(labels, probabilities, None, None)?;
    evaluator.display_results(&title, &cfg.plot_dir)?;
    println!("Plots written to {}.", cfg.plot_dir.display());

    log_app_finish("evaluate_predictions", samples);
    Ok(())
}

/// Reads `label,p` or `label,p_negative,p_positive` rows with a header line.
fn read_predictions(path: &Path) -> Result<(Vec<u8>, Probabilities), Box<dyn std::error::Error>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut labels = Vec::new();
    let mut rows = Vec::new();

    for (line, record) in reader.records().enumerate() {
        let record = record?;
        let mut fields = record.iter();
        let label = fields
            .next()
            .ok_or_else(|| format!("row {} is empty", line + 1))?
            .trim()
            .parse::<u8>()
            .map_err(|err| format!("row {}: bad label: {err}", line + 1))?;
        let probabilities = fields
            .map(|raw| raw.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| format!("row {}: bad probability: {err}", line + 1))?;

        labels.push(label);
        rows.push(probabilities);
    }

    Ok((labels, Probabilities::from_rows(&rows)?))
}
