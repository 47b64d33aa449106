use common::utils::config::AppConfig;

#[derive(Debug, Clone)]
pub struct RetrievalTuning {
    /// Zero processes items one at a time in input order.
    pub worker_count: usize,
    pub max_hot_log_lines: usize,
}

impl Default for RetrievalTuning {
    fn default() -> Self {
        Self {
            worker_count: 0,
            max_hot_log_lines: 10_000,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RetrievalConfig {
    pub tuning: RetrievalTuning,
}

impl RetrievalConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            tuning: RetrievalTuning {
                worker_count: config.worker_count,
                max_hot_log_lines: config.max_hot_log_lines,
            },
        }
    }
}
