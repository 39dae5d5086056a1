//! catsd — the CATS protocol server daemon.

use std::sync::Arc;

use anyhow::Result;
use cats_core::config::CatsConfig;

use catsd::dispatch::Api;
use catsd::handlers::{
    EchoHandler, FilesEchoHandler, FormHandler, InteractiveHandler, SignInHandler, ThrottleHandler, ECHO_HANDLER_ID,
    FILES_ECHO_HANDLER_ID, FORM_HANDLER_ID, INTERACTIVE_HANDLER_ID, SIGN_IN_HANDLER_ID, THROTTLE_HANDLER_ID,
};
use catsd::server::Server;

#[tokio::main]
async fn main() -> Result<()> {
    let config = CatsConfig::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(config.logging.filter.clone()))
        .init();

    tracing::info!(host = %config.network.host, port = config.network.port, "catsd starting");

    let mut api = Api::new();
    api.register(ECHO_HANDLER_ID, Arc::new(EchoHandler::default()), None, None)?;
    api.register(FORM_HANDLER_ID, Arc::new(FormHandler::default()), None, None)?;
    api.register(INTERACTIVE_HANDLER_ID, Arc::new(InteractiveHandler::default()), None, None)?;
    api.register(SIGN_IN_HANDLER_ID, Arc::new(SignInHandler::default()), None, None)?;
    api.register(THROTTLE_HANDLER_ID, Arc::new(ThrottleHandler::default()), None, None)?;
    api.register(FILES_ECHO_HANDLER_ID, Arc::new(FilesEchoHandler::default()), None, None)?;

    let server = Arc::new(Server::new(config, api));
    server.run().await
}
