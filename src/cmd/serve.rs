//! HTTP server command for `lms serve`.

use anyhow::Result;
use lms::config::LmsConfig;

pub async fn cmd_serve(config: LmsConfig) -> Result<()> {
    tracing::info!(
        addr = %config.bind_addr(),
        db = %config.database.path.display(),
        cors_permissive = config.server.cors_permissive,
        "starting server"
    );
    lms::server::start_server(config).await
}
