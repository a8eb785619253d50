pub mod analytics;
pub mod billing;
pub mod cli;
pub mod commands;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod forms;
pub mod http;
pub mod render;
pub mod session;
pub mod storage;
pub mod tasks;

#[cfg(test)]
pub(crate) mod test_support;

use std::ffi::OsString;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{
  debug,
  info
};

#[tracing::instrument(skip_all)]
pub fn run(
  raw_args: Vec<OsString>
) -> anyhow::Result<()> {
  let pre =
    cli::preprocess_args(&raw_args)?;
  let cli = cli::GlobalCli::parse_from(
    pre.cleaned_args
  );

  cli::init_tracing(
    cli.verbose,
    cli.quiet
  )?;

  info!(
    verbose = cli.verbose,
    quiet = cli.quiet,
    "starting proddash CLI"
  );
  debug!(?pre.rc_overrides, "preprocessed rc overrides");

  let mut cfg = config::Config::load(
    cli.rc_file.as_deref()
  )?;
  cfg.apply_overrides(
    pre.rc_overrides.into_iter().chain(
      cli
        .rc_overrides
        .into_iter()
        .map(|kv| (kv.key, kv.value))
    )
  );

  let client_config =
    config::ClientConfig::from_config(
      &cfg
    )
    .context(
      "invalid API configuration"
    )?;

  let data_dir =
    config::resolve_data_dir(
      &cfg,
      cli.data.as_deref()
    )
    .context(
      "failed to resolve data \
       directory"
    )?;

  let storage =
    storage::FileStorage::open(
      &data_dir
    )
    .with_context(|| {
      format!(
        "failed to open session \
         storage at {}",
        data_dir.display()
      )
    })?;

  let transport =
    http::ReqwestTransport::new(
      &client_config.base_url,
      client_config.timeout
    )?;

  let renderer =
    render::Renderer::new(&cfg)?;
  let app = commands::App::wire(
    Arc::new(storage),
    Arc::new(transport),
    &client_config,
    Arc::new(http::LoginNotice)
  );

  let runtime =
    tokio::runtime::Builder::new_current_thread()
      .enable_all()
      .build()
      .context(
        "failed to start async \
         runtime"
      )?;
  runtime.block_on(
    commands::dispatch(
      &app,
      &renderer,
      cli.command
    )
  )?;

  info!("done");
  Ok(())
}
