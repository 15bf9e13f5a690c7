use std::fs;
use std::path::Path;

use propensity::{
    init_logging, log_app_finish, log_app_start, log_source_selected, logging_config_from_env,
    CsvDataset, Dialect, Features, RunConfig, SqliteExecutor, Table,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging = logging_config_from_env();
    init_logging(&logging)?;
    log_app_start("build_training_table", &logging);

    let cfg = RunConfig::from_env()?;
    if cfg.dialect != Dialect::Sqlite {
        return Err(format!(
            "build_training_table executes queries on SQLite; got dialect {:?}",
            cfg.dialect
        )
        .into());
    }
    let window = cfg.window()?;

    let data_root = cfg.dataset.data_root.display().to_string();
    log_source_selected("build_training_table", "csv", &data_root);

    let mut executor = SqliteExecutor::open_in_memory()?;
    let dataset = CsvDataset::new(&cfg.dataset.data_root, cfg.dataset.files.clone());
    let tables = dataset.load(&mut executor)?;
    println!("Loaded tables: {}", tables.join(", "));

    let training = Features::new(window).build_training_table(&executor)?;
    write_table_csv(&cfg.output_path, &training)?;

    println!(
        "Training table: rows={} columns={} feature=({}, {}] response=({}, {}] -> {}",
        training.len(),
        training.columns.len(),
        window.feature_start(),
        window.feature_end(),
        window.response_start(),
        window.response_end(),
        cfg.output_path.display()
    );
    log_app_finish("build_training_table", training.len());
    Ok(())
}

fn write_table_csv(path: &Path, table: &Table) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(&table.columns)?;
    for row in &table.rows {
        writer.write_record(row.iter().map(|value| value.to_string()))?;
    }
    writer.flush()?;
    Ok(())
}
