use super::{exit_codes, resolve_config};
use crate::cli::args::ModelsArgs;
use crate::cli::init_logging;
use promptlab_core::providers::keys::{ApiKeys, Entitlements};

pub async fn run(args: ModelsArgs, log_json: bool) -> anyhow::Result<i32> {
    let cfg = match resolve_config(args.config.as_deref(), false) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}", e);
            return Ok(exit_codes::CONFIG_ERROR);
        }
    };
    init_logging(cfg.log_level(), log_json);

    let catalog = cfg.catalog();
    let keys = ApiKeys::from_env(&cfg.key_env_names());
    let defaults = catalog.default_selection();

    println!(
        "{:<28} {:<20} {:<10} {:>10} {:>10}  KEY",
        "ID", "NAME", "PROVIDER", "IN/1K", "OUT/1K"
    );
    for m in catalog.models() {
        let provider = m
            .provider()
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".into());
        let key = if keys.has_valid_key_for_model(&m.id) {
            "yes"
        } else {
            "no"
        };
        let marker = if defaults.contains(&m.id) { "*" } else { "" };
        println!(
            "{:<28} {:<20} {:<10} {:>10} {:>10}  {}",
            format!("{}{}", m.id, marker),
            m.display_name(),
            provider,
            m.price.input_price_per_k_token,
            m.price.output_price_per_k_token,
            key
        );
    }
    Ok(exit_codes::OK)
}
