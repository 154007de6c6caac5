use std::path::PathBuf;

use log::{error, info};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config"));

    match shortage_pipeline::run_from_config_dir(&config_dir) {
        Ok(report) => {
            info!(
                "Run succeeded: {} rows read, {} accepted, {} rejected",
                report.rows_read, report.rows_accepted, report.rows_rejected
            );
            for (reason, count) in &report.rejections_by_reason {
                info!("  rejected ({reason}): {count}");
            }
            info!(
                "Shortages: {} records, {} total",
                report.shortage_count, report.total_shortage
            );
            for path in &report.outputs {
                info!("  wrote {}", path.display());
            }
        }
        Err(err) => {
            error!("Pipeline failed: {err}");
            std::process::exit(1);
        }
    }
}
