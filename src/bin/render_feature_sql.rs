use propensity::{
    init_logging, log_app_start, logging_config_from_env, Features, QueryComposer, RunConfig,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging = logging_config_from_env();
    init_logging(&logging)?;
    log_app_start("render_feature_sql", &logging);

    let cfg = RunConfig::from_env()?;
    let window = cfg.window()?;
    let composer = QueryComposer::new(cfg.dialect);
    let features = Features::new(window);

    println!(
        "-- dialect={:?} feature=({}, {}] response=({}, {}]",
        cfg.dialect,
        window.feature_start(),
        window.feature_end(),
        window.response_start(),
        window.response_end()
    );

    for set in features.feature_sets() {
        println!("\n-- feature set: {}", set.name);
        println!("{};", features.feature_query(&composer, set)?.trim_end());
    }

    println!("\n-- response label");
    println!("{};", features.response_query(&composer).trim_end());
    Ok(())
}
