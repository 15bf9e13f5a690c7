use propensity::{init_logging, log_app_start, logging_config_from_env, KaggleDataset, RunConfig};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging = logging_config_from_env();
    init_logging(&logging)?;
    log_app_start("kaggle_download", &logging);

    let cfg = RunConfig::from_env()?;
    println!(
        "Kaggle sync start | competition={} data_root={} files={}",
        cfg.dataset.competition,
        cfg.dataset.data_root.display(),
        cfg.dataset.files.join(",")
    );

    let files = KaggleDataset::load(&cfg.dataset)?;
    for file in &files {
        println!(
            "{} -> {} ({:?})",
            file.file_name,
            file.local_path.display(),
            file.source
        );
    }

    println!("Competition files ready under {}.", cfg.dataset.data_root.display());
    Ok(())
}
